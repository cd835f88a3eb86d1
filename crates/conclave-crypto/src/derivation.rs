//! Conversation key derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

/// Label used for conversation key derivation
const CONVERSATION_KEY_LABEL: &[u8] = b"conclaveConversationV1";

/// Symmetric key shared by every participant of one conversation.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct ConversationKey {
    key: [u8; 32],
}

impl ConversationKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305 AEAD.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(..)")
    }
}

impl Drop for ConversationKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Derive the key for `conversation` from the key-server secret.
///
/// # Security
///
/// - Different conversations produce different keys
/// - Deterministic: every participant holding the secret derives the same key
pub fn derive_conversation_key(secret: &[u8], conversation: u64) -> ConversationKey {
    let hkdf = Hkdf::<Sha256>::new(None, secret);

    // label || conversation
    let mut info = Vec::with_capacity(CONVERSATION_KEY_LABEL.len() + 8);
    info.extend_from_slice(CONVERSATION_KEY_LABEL);
    info.extend_from_slice(&conversation.to_be_bytes());

    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    ConversationKey { key }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"key_server_secret_material_here!";

    #[test]
    fn derive_is_deterministic() {
        let a = derive_conversation_key(SECRET, 42);
        let b = derive_conversation_key(SECRET, 42);
        assert_eq!(a.as_bytes(), b.as_bytes(), "same inputs must produce same key");
    }

    #[test]
    fn different_conversations_produce_different_keys() {
        let a = derive_conversation_key(SECRET, 1);
        let b = derive_conversation_key(SECRET, 2);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_secrets_produce_different_keys() {
        let a = derive_conversation_key(b"secret_a________________________", 7);
        let b = derive_conversation_key(b"secret_b________________________", 7);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = derive_conversation_key(SECRET, 3);
        assert_eq!(format!("{key:?}"), "ConversationKey(..)");
    }
}
