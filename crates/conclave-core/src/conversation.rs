//! Conversation vocabulary shared by every engine.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Identifier of a group conversation hosted by a focus.
///
/// Chosen by the creating client, so it is known before the focus confirms
/// the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(u64);

impl ConversationId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Lifecycle of a conversation as seen by one endpoint.
///
/// ```text
/// CreationPending ──ConversationCreated──> Created ──Leave──> Terminating
///        │                                   │                   │
///        │ CreationFailed                    │ Terminated        │ LeaveAck
///        ↓                                   ↓                   ↓
///  CreationFailed                        Terminated <────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationState {
    /// Create request sent, focus has not answered
    CreationPending,
    /// Conversation is live
    Created,
    /// Leave requested, waiting for acknowledgement
    Terminating,
    /// Conversation is closed for this endpoint
    Terminated,
    /// Focus refused the conversation
    CreationFailed,
}

impl ConversationState {
    /// True while the conversation still holds protocol state that must be
    /// closed before the engine is released.
    pub fn is_open(self) -> bool {
        matches!(self, Self::CreationPending | Self::Created | Self::Terminating)
    }

    /// Human-readable state name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreationPending => "CreationPending",
            Self::Created => "Created",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
            Self::CreationFailed => "CreationFailed",
        }
    }
}

/// Per-conversation options fixed at creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationParams {
    /// Message bodies are sealed end to end
    pub encrypted: bool,
    /// Messages disappear this long after arrival
    pub ephemeral_lifetime: Option<Duration>,
}

impl ConversationParams {
    /// Plain, persistent conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable end-to-end encryption.
    #[must_use]
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Make messages ephemeral.
    #[must_use]
    pub fn ephemeral(mut self, lifetime: Duration) -> Self {
        self.ephemeral_lifetime = Some(lifetime);
        self
    }
}
