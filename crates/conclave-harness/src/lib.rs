//! Conclave Harness
//!
//! Drives many independent conferencing endpoints from one test thread.
//! Each endpoint owns one engine; a [`Poller`] pumps a chosen set of them
//! round-robin until a predicate over their combined state holds or a
//! deadline passes.
//!
//! # Scheduling
//!
//! Strictly single-threaded and cooperative. A pump is one non-blocking
//! [`conclave_core::Engine::iterate`] call; the only blocking point is the
//! short sleep between rounds. Nothing orders events across endpoints:
//! predicates must hold regardless of pump order.
//!
//! # Counters
//!
//! Engine counters only grow between explicit resets. Compare against a
//! snapshot taken before the action, not an absolute value:
//!
//! ```ignore
//! let before = pauline.stats();
//! marie.engine_mut().send_message(conversation, "hi")?;
//! let received = poll_endpoints(&[&focus, &marie, &pauline])
//!     .wait(|| pauline.stats().delta_since(&before).messages_received >= 1);
//! ctx.check(received, "pauline got the message");
//! ```
//!
//! # Failures
//!
//! Nothing here panics on a failed wait. Waits return `bool`, construction
//! returns `Result`, and role wiring records into an [`AssertContext`] that
//! the test turns into a verdict at the end.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod assert;
mod endpoint;
mod endpoint_poller;
mod harness;
mod logging;
mod poller;
mod roles;

pub use assert::{AssertContext, AssertionFailures, Failure};
pub use endpoint::{
    CLEANUP_TIMEOUT, Endpoint, EndpointState, EngineHandle, EngineHook, WeakEngineHandle,
};
pub use endpoint_poller::{Pumpable, poll_endpoints, poll_handles};
pub use harness::Harness;
pub use logging::{DEFAULT_FILTER, init_tracing};
pub use poller::{DEFAULT_TIMEOUT, Poller, ROUND_INTERVAL, WaitReport};
pub use roles::{ClientConference, Focus};
