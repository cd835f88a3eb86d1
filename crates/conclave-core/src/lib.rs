//! Conclave core vocabulary.
//!
//! Types shared by protocol engines and the orchestration harness: endpoint
//! [`Address`]es, [`ConversationId`]s, the [`Stats`] counter block, named
//! configuration profiles, the CBOR wire codec, and the engine traits that
//! form the seam between an endpoint and the engine it owns.
//!
//! # Components
//!
//! - [`Engine`], [`EngineFactory`]: lifecycle and pumping of one engine
//! - [`ConferenceEngine`]: focus/client role wiring and callbacks
//! - [`ProfileStore`]: resolves configuration names to [`Profile`]s
//! - [`Message`]: wire messages, encoded with [`Message::encode`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod address;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod stats;
pub mod wire;

pub use address::Address;
pub use config::{Profile, ProfileStore};
pub use conversation::{ConversationId, ConversationParams, ConversationState};
pub use engine::{ConferenceEngine, Engine, EngineEvent, EngineFactory, Observer};
pub use error::{AddressError, ConfigError, EngineError, WireError};
pub use stats::Stats;
pub use wire::{ChatBody, Message};
