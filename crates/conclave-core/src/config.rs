//! Named endpoint configurations.
//!
//! Engines are created from a configuration *name*. A [`ProfileStore`]
//! resolves the name to a [`Profile`], either from `<dir>/<name>.toml` or from
//! profiles inserted in memory. Callers treat the name as opaque.
//!
//! ```toml
//! [identity]
//! user = "marie"
//! domain = "sip.example.org"
//! device = "marie-phone"
//!
//! [conference]
//! focus = "sip:focus@sip.example.org"
//!
//! [security]
//! end_to_end_encryption = true
//! ```

use std::{
    cell::RefCell,
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use serde::Deserialize;

use crate::{
    address::Address,
    error::{AddressError, ConfigError},
};

/// Default registration expiry.
pub const DEFAULT_REGISTRATION_EXPIRY: Duration = Duration::from_secs(3600);

/// Complete configuration for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Profile {
    /// Who this endpoint is
    pub identity: IdentityConfig,
    /// Registrar settings
    #[serde(default)]
    pub registration: RegistrationConfig,
    /// Conferencing role settings
    #[serde(default)]
    pub conference: ConferenceConfig,
    /// End-to-end encryption settings
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Profile {
    /// Minimal profile for `user@domain`.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if the parts do not form a valid address.
    pub fn new(user: &str, domain: &str) -> Result<Self, AddressError> {
        Address::new(user, domain)?;
        Ok(Self {
            identity: IdentityConfig {
                user: user.to_string(),
                domain: domain.to_string(),
                device: None,
                display_name: None,
            },
            registration: RegistrationConfig::default(),
            conference: ConferenceConfig::default(),
            security: SecurityConfig::default(),
        })
    }

    /// Set the device id.
    #[must_use]
    pub fn with_device(mut self, device: &str) -> Self {
        self.identity.device = Some(device.to_string());
        self
    }

    /// Set the conference focus.
    #[must_use]
    pub fn with_focus(mut self, focus: Address) -> Self {
        self.conference.focus = Some(focus);
        self
    }

    /// The address engines built from this profile register under.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if the identity section is malformed.
    pub fn address(&self) -> Result<Address, AddressError> {
        let bare = Address::new(self.identity.user.as_str(), self.identity.domain.as_str())?;
        match &self.identity.device {
            Some(device) => bare.with_device(device.as_str()),
            None => Ok(bare),
        }
    }
}

/// `[identity]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityConfig {
    /// User part of the address
    pub user: String,
    /// Domain part of the address
    pub domain: String,
    /// Device id; endpoints without one are addressed by bare address
    #[serde(default)]
    pub device: Option<String>,
    /// Display name shown to other participants
    #[serde(default)]
    pub display_name: Option<String>,
}

/// `[registration]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Register on start
    pub enabled: bool,
    /// Requested binding lifetime in seconds
    pub expires_secs: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self { enabled: true, expires_secs: DEFAULT_REGISTRATION_EXPIRY.as_secs() }
    }
}

impl RegistrationConfig {
    /// Binding lifetime.
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expires_secs)
    }
}

/// `[conference]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConferenceConfig {
    /// Act as a conference focus
    pub server: bool,
    /// Focus used to create and join conversations
    pub focus: Option<Address>,
    /// Delete hosted conversations once their last participant leaves
    pub prune_empty_conversations: bool,
}

impl Default for ConferenceConfig {
    fn default() -> Self {
        Self { server: false, focus: None, prune_empty_conversations: true }
    }
}

/// `[security]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Seal and open conversation messages end to end
    pub end_to_end_encryption: bool,
}

/// Resolves configuration names to profiles.
///
/// Cheap to clone; clones share the in-memory entries.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    dir: Option<PathBuf>,
    entries: Rc<RefCell<HashMap<String, Profile>>>,
}

impl ProfileStore {
    /// Store with in-memory profiles only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store that falls back to `<dir>/<name>.toml`.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()), entries: Rc::default() }
    }

    /// Register a profile under `name`, replacing any previous one.
    pub fn insert(&self, name: impl Into<String>, profile: Profile) {
        self.entries.borrow_mut().insert(name.into(), profile);
    }

    /// Resolve `name`.
    ///
    /// In-memory entries win over files.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotFound`] if no entry or file exists
    /// - [`ConfigError::Io`] if the file exists but cannot be read
    /// - [`ConfigError::Invalid`] if the file is not a valid profile
    pub fn resolve(&self, name: &str) -> Result<Profile, ConfigError> {
        if let Some(profile) = self.entries.borrow().get(name) {
            return Ok(profile.clone());
        }

        let Some(dir) = &self.dir else {
            return Err(ConfigError::NotFound(name.to_string()));
        };

        let path = dir.join(format!("{name}.toml"));
        if !path.exists() {
            return Err(ConfigError::NotFound(name.to_string()));
        }

        load_file(name, &path)
    }
}

fn load_file(name: &str, path: &Path) -> Result<Profile, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

    let profile: Profile = toml::from_str(&text)
        .map_err(|e| ConfigError::Invalid { name: name.to_string(), reason: e.to_string() })?;

    profile
        .address()
        .map_err(|e| ConfigError::Invalid { name: name.to_string(), reason: e.to_string() })?;

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARIE: &str = r#"
        [identity]
        user = "marie"
        domain = "sip.example.org"
        device = "marie-phone"

        [conference]
        focus = "sip:focus@sip.example.org"

        [security]
        end_to_end_encryption = true
    "#;

    #[test]
    fn sections_have_defaults() {
        let profile: Profile = toml::from_str(MARIE).unwrap();

        assert!(profile.registration.enabled);
        assert_eq!(profile.registration.expiry(), DEFAULT_REGISTRATION_EXPIRY);
        assert!(!profile.conference.server);
        assert!(profile.conference.prune_empty_conversations);
        assert!(profile.security.end_to_end_encryption);
        assert_eq!(
            profile.conference.focus.as_ref().map(ToString::to_string).as_deref(),
            Some("sip:focus@sip.example.org")
        );
    }

    #[test]
    fn address_includes_device() {
        let profile: Profile = toml::from_str(MARIE).unwrap();
        assert_eq!(profile.address().unwrap().to_string(), "sip:marie@sip.example.org;gr=marie-phone");
    }

    #[test]
    fn memory_entries_resolve() {
        let store = ProfileStore::in_memory();
        store.insert("pauline_rc", Profile::new("pauline", "sip.example.org").unwrap());

        let profile = store.resolve("pauline_rc").unwrap();
        assert_eq!(profile.identity.user, "pauline");
        assert!(matches!(store.resolve("laure_rc"), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn files_resolve_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marie_rc.toml"), MARIE).unwrap();
        std::fs::write(dir.path().join("broken_rc.toml"), "[identity]\nuser = 3").unwrap();

        let store = ProfileStore::from_dir(dir.path());

        assert_eq!(store.resolve("marie_rc").unwrap().identity.user, "marie");
        assert!(matches!(store.resolve("broken_rc"), Err(ConfigError::Invalid { .. })));
        assert!(matches!(store.resolve("missing_rc"), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn invalid_identity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad_rc.toml"),
            "[identity]\nuser = \"ma rie\"\ndomain = \"sip.example.org\"\n",
        )
        .unwrap();

        let store = ProfileStore::from_dir(dir.path());
        assert!(matches!(store.resolve("bad_rc"), Err(ConfigError::Invalid { .. })));
    }
}
