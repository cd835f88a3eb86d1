//! Conclave Cryptographic Primitives
//!
//! End-to-end sealing of conversation messages. Pure functions with
//! deterministic outputs; callers provide random bytes.
//!
//! # Key Lifecycle
//!
//! ```text
//! Key-server secret
//!        │
//!        ▼
//! HKDF(label || conversation) → Conversation Key
//!        │
//!        ▼
//! AEAD(nonce = conversation || counter || random) → Ciphertext
//! ```
//!
//! Every participant that holds the key-server secret derives the same
//! conversation key. The focus relays sealed bodies without opening them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod derivation;
mod error;
mod seal;

pub use derivation::{ConversationKey, derive_conversation_key};
pub use error::CryptoError;
pub use seal::{NONCE_RANDOM_SIZE, SealedMessage, nonce_from_slice, open, seal};
