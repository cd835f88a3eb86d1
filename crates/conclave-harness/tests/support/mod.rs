//! Shared deployment for harness tests.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use std::time::Duration;

use conclave_core::{Address, Profile, ProfileStore};
use conclave_harness::{Harness, init_tracing};
use conclave_sim::{NetworkConfig, SimFactory, SimNetwork};

pub const DOMAIN: &str = "example.org";

/// Focus profile name.
pub const FOCUS: &str = "focus";

/// Client profile names with their device ids.
pub const CLIENTS: [(&str, &str); 3] = [("marie", "phone"), ("pauline", "laptop"), ("laure", "tablet")];

pub fn focus_address() -> Address {
    Address::new(FOCUS, DOMAIN).unwrap()
}

/// Factory over a fresh network with one focus and three client profiles.
///
/// Client profiles carry no focus and no encryption setting; the harness
/// roles apply both.
pub fn factory(seed: u64) -> SimFactory {
    let network = SimNetwork::new(NetworkConfig {
        seed,
        min_latency: Duration::ZERO,
        max_latency: Duration::from_micros(200),
    });
    let factory = SimFactory::new(network, ProfileStore::in_memory());

    factory.insert_profile(FOCUS, Profile::new(FOCUS, DOMAIN).unwrap());
    for (user, device) in CLIENTS {
        factory.insert_profile(user, Profile::new(user, DOMAIN).unwrap().with_device(device));
    }
    factory
}

pub fn harness(seed: u64) -> Harness<SimFactory> {
    init_tracing();
    Harness::new(factory(seed))
}
