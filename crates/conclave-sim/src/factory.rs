//! Builds [`SimEngine`]s from named profiles.

use conclave_core::{ConfigError, EngineError, EngineFactory, Profile, ProfileStore};

use crate::{
    engine::SimEngine,
    network::{NetworkConfig, SimNetwork},
};

/// Engine factory over one shared network and profile store.
///
/// Clones share both, so every endpoint of a test run talks to every other.
#[derive(Clone, Default)]
pub struct SimFactory {
    network: SimNetwork,
    profiles: ProfileStore,
}

impl SimFactory {
    /// Factory over an existing network and store.
    pub fn new(network: SimNetwork, profiles: ProfileStore) -> Self {
        Self { network, profiles }
    }

    /// Fresh network seeded with `seed` and an empty in-memory store.
    pub fn seeded(seed: u64) -> Self {
        Self::new(SimNetwork::new(NetworkConfig::with_seed(seed)), ProfileStore::in_memory())
    }

    /// Register an in-memory profile.
    pub fn insert_profile(&self, name: impl Into<String>, profile: Profile) {
        self.profiles.insert(name, profile);
    }

    /// Shared network.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Shared profile store.
    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }
}

impl EngineFactory for SimFactory {
    type Engine = SimEngine;

    fn load(&self, config_name: &str) -> Result<SimEngine, EngineError> {
        let profile = self.profiles.resolve(config_name)?;
        let identity = profile.address().map_err(|e| ConfigError::Invalid {
            name: config_name.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(config = config_name, %identity, "loading engine");
        Ok(SimEngine::new(identity, &profile, self.network.clone()))
    }
}
