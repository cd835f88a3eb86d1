//! Wire messages exchanged between engines.
//!
//! Each datagram carries one [`Message`] encoded as CBOR. Decoding is strict:
//! unknown variants and trailing garbage are errors, never panics.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    address::Address,
    conversation::{ConversationId, ConversationParams},
    error::WireError,
};

/// Upper bound on an encoded message. Larger datagrams are rejected before
/// decoding.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Chat message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatBody {
    /// Readable by the focus and every participant
    Plain(String),
    /// Sealed end to end
    Sealed {
        /// Per-sender counter bound into the nonce
        counter: u64,
        /// 24-byte nonce
        nonce: Vec<u8>,
        /// Ciphertext with authentication tag
        ciphertext: Vec<u8>,
    },
}

/// Protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask the registrar for a binding
    Register {
        /// Requested lifetime
        expires: Duration,
    },

    /// Registrar accepted the binding
    RegisterOk {
        /// Granted lifetime
        expires: Duration,
    },

    /// Drop the binding
    Unregister,

    /// Client asks the focus to host a conversation
    CreateConversation {
        /// Client-chosen id
        conversation: ConversationId,
        /// Subject line
        subject: String,
        /// Invited participants (bare addresses)
        participants: Vec<Address>,
        /// Creation options
        params: ConversationParams,
    },

    /// Focus accepted a create request
    ConversationCreated {
        /// Conversation
        conversation: ConversationId,
    },

    /// Focus refused a create request
    CreationFailed {
        /// Conversation
        conversation: ConversationId,
        /// Why
        reason: String,
    },

    /// Focus invites a device into a conversation
    Invite {
        /// Conversation
        conversation: ConversationId,
        /// Subject line
        subject: String,
        /// Conversation options
        params: ConversationParams,
    },

    /// Participant asks the focus to add someone
    AddParticipant {
        /// Conversation
        conversation: ConversationId,
        /// Participant to add (bare address)
        participant: Address,
    },

    /// Device leaves a conversation
    Leave {
        /// Conversation
        conversation: ConversationId,
    },

    /// Focus confirmed a leave
    LeaveAck {
        /// Conversation
        conversation: ConversationId,
    },

    /// Focus closed the conversation for everybody
    Terminated {
        /// Conversation
        conversation: ConversationId,
    },

    /// Subscribe to conference events
    Subscribe {
        /// Conversation
        conversation: ConversationId,
    },

    /// Full conference state
    Notify {
        /// Conversation
        conversation: ConversationId,
        /// Increases with every roster change
        version: u64,
        /// Current participants (bare addresses)
        participants: Vec<Address>,
    },

    /// Chat message, sender → focus or focus → recipient
    Chat {
        /// Conversation
        conversation: ConversationId,
        /// Sender-assigned id
        message_id: u64,
        /// Original sender; filled in by the focus when relaying
        sender: Option<Address>,
        /// Body
        body: ChatBody,
    },

    /// Focus accepted a chat message for relay
    Delivered {
        /// Conversation
        conversation: ConversationId,
        /// Sender-assigned id
        message_id: u64,
    },
}

impl Message {
    /// Encode as CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Encode`] if serialization fails or the result
    /// exceeds [`MAX_MESSAGE_SIZE`].
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;

        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::Encode(format!(
                "message of {} bytes exceeds limit of {MAX_MESSAGE_SIZE}",
                buf.len()
            )));
        }

        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Decode`] for oversized or malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::Decode(format!("{} bytes exceeds limit", bytes.len())));
        }

        let mut reader = bytes;
        let message: Self =
            ciborium::de::from_reader(&mut reader).map_err(|e| WireError::Decode(e.to_string()))?;

        if !reader.is_empty() {
            return Err(WireError::Decode(format!("{} trailing bytes", reader.len())));
        }

        Ok(message)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "Register",
            Self::RegisterOk { .. } => "RegisterOk",
            Self::Unregister => "Unregister",
            Self::CreateConversation { .. } => "CreateConversation",
            Self::ConversationCreated { .. } => "ConversationCreated",
            Self::CreationFailed { .. } => "CreationFailed",
            Self::Invite { .. } => "Invite",
            Self::AddParticipant { .. } => "AddParticipant",
            Self::Leave { .. } => "Leave",
            Self::LeaveAck { .. } => "LeaveAck",
            Self::Terminated { .. } => "Terminated",
            Self::Subscribe { .. } => "Subscribe",
            Self::Notify { .. } => "Notify",
            Self::Chat { .. } => "Chat",
            Self::Delivered { .. } => "Delivered",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn create_request_survives_encoding() {
        let message = Message::CreateConversation {
            conversation: ConversationId::new(42),
            subject: "weekly sync".to_string(),
            participants: vec![address("sip:pauline@example.org"), address("sip:laure@example.org")],
            params: ConversationParams::new().ephemeral(Duration::from_secs(5)),
        };

        let bytes = message.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = Message::Unregister.encode().unwrap().to_vec();
        bytes.push(0x00);
        assert!(matches!(Message::decode(&bytes), Err(WireError::Decode(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Message::decode(&[0xff, 0x00, 0x13]).is_err());
        assert!(Message::decode(&[]).is_err());
    }

    #[test]
    fn oversized_input_is_rejected_before_decoding() {
        let bytes = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(Message::decode(&bytes), Err(WireError::Decode(_))));
    }
}
