//! Message sealing using `XChaCha20-Poly1305`
//!
//! All functions are pure - random bytes must be provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{derivation::ConversationKey, error::CryptoError};

/// Size of the random suffix in the nonce (8 bytes)
pub const NONCE_RANDOM_SIZE: usize = 8;

/// `XChaCha20` nonce size
const NONCE_SIZE: usize = 24;

/// A sealed message with the metadata needed to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// Conversation the message was sealed for
    pub conversation: u64,
    /// Per-sender message counter
    pub counter: u64,
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// Seal `plaintext` for `conversation`.
///
/// The conversation id is authenticated as associated data, so a message
/// replayed into another conversation fails to open.
pub fn seal(
    plaintext: &[u8],
    key: &ConversationKey,
    conversation: u64,
    counter: u64,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> SealedMessage {
    let nonce = build_nonce(conversation, counter, random_suffix);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let aad = conversation.to_be_bytes();

    let Ok(ciphertext) =
        cipher.encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    SealedMessage { conversation, counter, nonce, ciphertext }
}

/// Open a sealed message.
///
/// # Errors
///
/// - `DecryptionFailed`: wrong key, wrong conversation, or tampered bytes
pub fn open(sealed: &SealedMessage, key: &ConversationKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let aad = sealed.conversation.to_be_bytes();

    cipher
        .decrypt(
            XNonce::from_slice(&sealed.nonce),
            Payload { msg: sealed.ciphertext.as_slice(), aad: &aad },
        )
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}

/// Convert a wire nonce into the fixed-size form.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidNonce`] for any length other than 24.
pub fn nonce_from_slice(bytes: &[u8]) -> Result<[u8; NONCE_SIZE], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidNonce(bytes.len()))
}

/// Build a 24-byte nonce.
///
/// Structure:
/// - bytes 0-7: conversation (big-endian)
/// - bytes 8-15: counter (big-endian)
/// - bytes 16-23: random suffix (caller-provided)
fn build_nonce(
    conversation: u64,
    counter: u64,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0..8].copy_from_slice(&conversation.to_be_bytes());
    nonce[8..16].copy_from_slice(&counter.to_be_bytes());
    nonce[16..24].copy_from_slice(&random_suffix);
    nonce
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::derivation::derive_conversation_key;

    const SECRET: &[u8] = b"key_server_secret_material_here!";

    #[test]
    fn open_recovers_plaintext() {
        let key = derive_conversation_key(SECRET, 9);
        let sealed = seal(b"hello", &key, 9, 0, [1; NONCE_RANDOM_SIZE]);

        assert_ne!(sealed.ciphertext, b"hello");
        assert_eq!(open(&sealed, &key).unwrap(), b"hello");
    }

    #[test]
    fn wrong_key_fails() {
        let key = derive_conversation_key(SECRET, 9);
        let other = derive_conversation_key(b"another_secret__________________", 9);
        let sealed = seal(b"hello", &key, 9, 0, [0; NONCE_RANDOM_SIZE]);

        assert!(matches!(open(&sealed, &other), Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn moved_to_other_conversation_fails() {
        let key = derive_conversation_key(SECRET, 9);
        let mut sealed = seal(b"hello", &key, 9, 0, [0; NONCE_RANDOM_SIZE]);
        sealed.conversation = 10;

        assert!(open(&sealed, &key).is_err());
    }

    #[test]
    fn nonce_length_is_checked() {
        assert!(nonce_from_slice(&[0u8; 24]).is_ok());
        assert_eq!(nonce_from_slice(&[0u8; 12]), Err(CryptoError::InvalidNonce(12)));
    }

    proptest! {
        #[test]
        fn tampering_is_detected(
            plaintext in prop::collection::vec(any::<u8>(), 1..256),
            flip in any::<prop::sample::Index>(),
        ) {
            let key = derive_conversation_key(SECRET, 1);
            let mut sealed = seal(&plaintext, &key, 1, 3, [7; NONCE_RANDOM_SIZE]);

            let i = flip.index(sealed.ciphertext.len());
            sealed.ciphertext[i] ^= 0x01;

            prop_assert!(open(&sealed, &key).is_err());
        }
    }
}
