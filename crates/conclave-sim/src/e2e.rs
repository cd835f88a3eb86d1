//! End-to-end sealing of chat bodies.
//!
//! Every engine with end-to-end encryption enabled holds the key-server
//! secret and derives per-conversation keys from it. The focus relays sealed
//! bodies untouched.

use conclave_core::{ChatBody, ConversationId, EngineError};
use conclave_crypto::{
    NONCE_RANDOM_SIZE, SealedMessage, derive_conversation_key, nonce_from_slice, open, seal,
};

/// Key-server secret held by engines that have end-to-end encryption enabled.
pub type KeySecret = [u8; 32];

/// Seal `text` for `conversation`.
pub fn seal_body(
    secret: &KeySecret,
    conversation: ConversationId,
    counter: u64,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
    text: &str,
) -> ChatBody {
    let key = derive_conversation_key(secret, conversation.get());
    let sealed = seal(text.as_bytes(), &key, conversation.get(), counter, random_suffix);
    ChatBody::Sealed { counter, nonce: sealed.nonce.to_vec(), ciphertext: sealed.ciphertext }
}

/// Open a sealed body.
///
/// # Errors
///
/// Returns [`EngineError::Crypto`] if the nonce is malformed, authentication
/// fails, or the plaintext is not UTF-8.
pub fn open_body(
    secret: &KeySecret,
    conversation: ConversationId,
    counter: u64,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<String, EngineError> {
    let key = derive_conversation_key(secret, conversation.get());
    let sealed = SealedMessage {
        conversation: conversation.get(),
        counter,
        nonce: nonce_from_slice(nonce).map_err(|e| EngineError::Crypto(e.to_string()))?,
        ciphertext: ciphertext.to_vec(),
    };
    let plaintext = open(&sealed, &key).map_err(|e| EngineError::Crypto(e.to_string()))?;
    String::from_utf8(plaintext).map_err(|e| EngineError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: KeySecret = [9; 32];

    #[test]
    fn sealed_body_opens_in_same_conversation_only() {
        let conversation = ConversationId::new(5);
        let ChatBody::Sealed { counter, nonce, ciphertext } =
            seal_body(&SECRET, conversation, 1, [0; NONCE_RANDOM_SIZE], "secret plans")
        else {
            panic!("expected sealed body");
        };

        let text = open_body(&SECRET, conversation, counter, &nonce, &ciphertext).unwrap();
        assert_eq!(text, "secret plans");

        let moved = open_body(&SECRET, ConversationId::new(6), counter, &nonce, &ciphertext);
        assert!(matches!(moved, Err(EngineError::Crypto(_))));
    }

    #[test]
    fn short_nonce_is_an_error() {
        let result = open_body(&SECRET, ConversationId::new(5), 1, &[0; 3], &[0; 32]);
        assert!(matches!(result, Err(EngineError::Crypto(_))));
    }
}
