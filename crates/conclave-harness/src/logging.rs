//! Test-run logging.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn";

/// Install a subscriber that writes through the test harness's capture.
///
/// Honors `RUST_LOG`. Safe to call from every test; only the first call in a
/// process installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer().with_target(false))
        .with(filter)
        .try_init();

    if installed.is_ok() {
        tracing::debug!("tracing initialized");
    }
}
