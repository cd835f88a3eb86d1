//! Pollers whose pumps are exactly "iterate these endpoints".

use conclave_core::{Engine, EngineFactory};

use crate::{
    endpoint::{Endpoint, EngineHandle},
    poller::Poller,
};

/// Something a poller can pump: one endpoint or role.
pub trait Pumpable {
    /// Let the underlying engine process pending work.
    fn pump(&self);
}

impl<F: EngineFactory> Pumpable for Endpoint<F> {
    fn pump(&self) {
        self.iterate();
    }
}

impl<E: Engine> Pumpable for EngineHandle<E> {
    fn pump(&self) {
        self.iterate();
    }
}

/// Poller pumping `endpoints` in the given order.
///
/// Roles and plain endpoints mix freely:
/// `poll_endpoints(&[&focus, &marie, &pauline])`.
pub fn poll_endpoints<'a>(endpoints: &[&'a dyn Pumpable]) -> Poller<'a> {
    let mut poller = Poller::new();
    for &endpoint in endpoints {
        poller.add_pump(move || endpoint.pump());
    }
    poller
}

/// Poller pumping the engines behind `handles`.
///
/// The poller holds its own strong references, so it may outlive the
/// borrow of `handles`.
pub fn poll_handles<'a, E: Engine + 'a>(handles: &[EngineHandle<E>]) -> Poller<'a> {
    let mut poller = Poller::new();
    for handle in handles {
        let handle = handle.clone();
        poller.add_pump(move || handle.iterate());
    }
    poller
}
