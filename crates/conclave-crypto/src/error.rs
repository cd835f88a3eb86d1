//! Error types for conversation encryption

use thiserror::Error;

/// Errors from sealing and opening conversation messages
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication tag did not verify (wrong key, tampering, or a message
    /// sealed for another conversation)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Nonce has the wrong length
    #[error("invalid nonce length: expected 24, got {0}")]
    InvalidNonce(usize),
}
