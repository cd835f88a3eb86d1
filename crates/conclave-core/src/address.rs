//! Endpoint identities.
//!
//! An [`Address`] is a SIP-style URI: `sip:user@domain`, optionally carrying a
//! device parameter (`;gr=<device>`) that selects one of the participant's
//! devices. Conversations list participants by bare address; the network
//! routes datagrams by full address.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

const SCHEME: &str = "sip:";
const DEVICE_PARAM: &str = ";gr=";

/// A participant or device address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    user: String,
    domain: String,
    device: Option<String>,
}

impl Address {
    /// Create a bare address (no device).
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if either part is empty or contains a
    /// separator character.
    pub fn new(user: impl Into<String>, domain: impl Into<String>) -> Result<Self, AddressError> {
        let user = user.into();
        let domain = domain.into();
        validate_part("user", &user)?;
        validate_part("domain", &domain)?;
        Ok(Self { user, domain, device: None })
    }

    /// Same participant, specific device.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::EmptyPart`] for an empty device id.
    pub fn with_device(&self, device: impl Into<String>) -> Result<Self, AddressError> {
        let device = device.into();
        validate_part("device", &device)?;
        Ok(Self { device: Some(device), ..self.clone() })
    }

    /// User part.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Device id, if this address names a device.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// The participant address with the device stripped.
    #[must_use]
    pub fn bare(&self) -> Self {
        Self { device: None, ..self.clone() }
    }

    /// True if both addresses name the same participant, ignoring devices.
    pub fn same_participant(&self, other: &Self) -> bool {
        self.user == other.user && self.domain == other.domain
    }

    /// Registrar service address for this address's domain.
    pub fn registrar(&self) -> Self {
        Self { user: "registrar".to_string(), domain: self.domain.clone(), device: None }
    }
}

fn validate_part(part: &'static str, value: &str) -> Result<(), AddressError> {
    if value.is_empty() {
        return Err(AddressError::EmptyPart(part));
    }
    if let Some(c) = value.chars().find(|c| matches!(c, '@' | ';' | ':' | ' ')) {
        return Err(AddressError::InvalidCharacter { part, character: c });
    }
    Ok(())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}@{}", self.user, self.domain)?;
        if let Some(device) = &self.device {
            write!(f, "{DEVICE_PARAM}{device}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(SCHEME).ok_or_else(|| AddressError::MissingScheme(s.to_string()))?;

        let (identity, device) = match rest.split_once(DEVICE_PARAM) {
            Some((identity, device)) => (identity, Some(device)),
            None => (rest, None),
        };

        let (user, domain) =
            identity.split_once('@').ok_or_else(|| AddressError::MissingAt(s.to_string()))?;

        let address = Self::new(user, domain)?;
        match device {
            Some(device) => address.with_device(device),
            None => Ok(address),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}
