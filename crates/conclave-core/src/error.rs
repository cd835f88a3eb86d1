//! Error types shared by engines and the harness.
//!
//! Strongly-typed errors per layer: address parsing, profile resolution, wire
//! encoding, and engine operations. Engines report construction and protocol
//! failures as values; nothing here is meant to unwind across an endpoint.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{address::Address, conversation::ConversationId};

/// Errors produced while parsing an [`Address`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Address does not start with `sip:`
    #[error("missing sip: scheme in {0:?}")]
    MissingScheme(String),

    /// Address has no `user@domain` separator
    #[error("missing '@' in {0:?}")]
    MissingAt(String),

    /// One of the address parts is empty
    #[error("empty {0} part")]
    EmptyPart(&'static str),

    /// A part contains a reserved separator
    #[error("invalid character {character:?} in {part} part")]
    InvalidCharacter {
        /// Part that failed validation
        part: &'static str,
        /// Offending character
        character: char,
    },
}

/// Errors produced while resolving a named configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No profile is registered under this name
    #[error("unknown configuration {0:?}")]
    NotFound(String),

    /// Profile file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Profile file is not valid TOML for a profile
    #[error("invalid configuration {name:?}: {reason}")]
    Invalid {
        /// Configuration name
        name: String,
        /// Parser message
        reason: String,
    },
}

/// Errors produced by the CBOR wire codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Value could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes are not a valid message
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Errors reported by a protocol engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Named configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Engine was asked to do something its state does not allow
    #[error("invalid engine state: cannot {operation} while {state}")]
    InvalidState {
        /// State the engine was in
        state: &'static str,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Address is already bound by another running engine
    #[error("address already in use: {0}")]
    AddressInUse(Address),

    /// Client operation needs a focus but none is configured
    #[error("no conference focus configured")]
    NoFocus,

    /// Operation is reserved for the conference server role
    #[error("operation requires conference server role")]
    NotConferenceServer,

    /// Conversation is unknown to this engine
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    /// Address must carry a device parameter
    #[error("address {0} does not name a device")]
    NotADevice(Address),

    /// Registration did not complete in time
    #[error("registration of {address} timed out after {elapsed:?}")]
    RegistrationTimeout {
        /// Address that failed to register
        address: Address,
        /// How long we waited
        elapsed: Duration,
    },

    /// Encryption or decryption failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Wire encoding failed
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl EngineError {
    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Timeouts and missing configuration of a peer are transient; invalid
    /// states and malformed input are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RegistrationTimeout { .. } | Self::AddressInUse(_))
    }
}
