//! Participant side of group conversations.
//!
//! A client creates conversations through its focus, joins the ones it is
//! invited into, subscribes to roster updates and keeps a local message
//! history. All methods return [`EngineAction`]s; nothing here performs I/O.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Instant,
};

use conclave_core::{
    Address, ChatBody, ConversationId, ConversationParams, ConversationState, EngineError,
    EngineEvent, Message, Stats,
};
use serde::{Deserialize, Serialize};

use crate::{
    action::EngineAction,
    e2e::{KeySecret, open_body},
};

/// One entry of a conversation's message history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender-assigned id
    pub id: u64,
    /// Sending device
    pub from: Address,
    /// Readable body
    pub body: String,
    /// False for messages this engine sent
    pub incoming: bool,
    /// When an ephemeral message disappears
    pub expires_at: Option<Instant>,
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConversation {
    id: ConversationId,
    subject: String,
    params: ConversationParams,
    state: ConversationState,
    participants: BTreeSet<Address>,
    version: u64,
    #[serde(skip)]
    subscribed: bool,
    #[serde(skip)]
    history: Vec<ChatMessage>,
}

impl LocalConversation {
    fn new(
        id: ConversationId,
        subject: String,
        params: ConversationParams,
        state: ConversationState,
    ) -> Self {
        Self {
            id,
            subject,
            params,
            state,
            participants: BTreeSet::new(),
            version: 0,
            subscribed: false,
            history: Vec::new(),
        }
    }

    /// Conversation id.
    pub fn id(&self) -> ConversationId {
        self.id
    }

    /// Subject line.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Creation options.
    pub fn params(&self) -> ConversationParams {
        self.params
    }

    /// Current state.
    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Roster from the most recent notification (bare addresses).
    pub fn participants(&self) -> &BTreeSet<Address> {
        &self.participants
    }

    /// Messages still in history.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}

/// Inputs a handler needs besides the message itself.
pub struct Inbound<'a> {
    /// Counter block to update
    pub stats: &'a mut Stats,
    /// Arrival time
    pub now: Instant,
    /// Present when end-to-end encryption is enabled
    pub secret: Option<&'a KeySecret>,
}

/// Every conversation this engine participates in.
#[derive(Debug, Default)]
pub struct ClientState {
    conversations: BTreeMap<ConversationId, LocalConversation>,
}

impl ClientState {
    /// Rebuild from persisted conversations. Nothing is subscribed yet.
    pub fn restore(conversations: Vec<LocalConversation>) -> Self {
        Self { conversations: conversations.into_iter().map(|c| (c.id, c)).collect() }
    }

    /// Conversations to persist.
    pub fn snapshot(&self) -> Vec<LocalConversation> {
        self.conversations.values().cloned().collect()
    }

    /// Look up a conversation.
    pub fn conversation(&self, id: ConversationId) -> Option<&LocalConversation> {
        self.conversations.get(&id)
    }

    /// Conversations that still need closing.
    pub fn open_conversations(&self) -> Vec<ConversationId> {
        self.conversations.values().filter(|c| c.state.is_open()).map(|c| c.id).collect()
    }

    /// Ask `focus` to host a new conversation.
    pub fn begin_create(
        &mut self,
        focus: &Address,
        id: ConversationId,
        subject: &str,
        participants: &[Address],
        params: ConversationParams,
    ) -> Vec<EngineAction> {
        self.conversations.insert(
            id,
            LocalConversation::new(
                id,
                subject.to_string(),
                params,
                ConversationState::CreationPending,
            ),
        );

        vec![
            EngineAction::send(
                focus,
                Message::CreateConversation {
                    conversation: id,
                    subject: subject.to_string(),
                    participants: participants.iter().map(Address::bare).collect(),
                    params,
                },
            ),
            EngineAction::Emit(EngineEvent::ConversationState {
                conversation: id,
                state: ConversationState::CreationPending,
            }),
            EngineAction::Persist,
        ]
    }

    /// Ask `focus` to add `participant` to a live conversation.
    pub fn request_add(
        &self,
        focus: &Address,
        id: ConversationId,
        participant: &Address,
    ) -> Result<Vec<EngineAction>, EngineError> {
        self.require_created(id, "add_participant")?;
        Ok(vec![EngineAction::send(
            focus,
            Message::AddParticipant { conversation: id, participant: participant.bare() },
        )])
    }

    /// Start leaving a conversation. Repeating a pending leave resends it.
    pub fn begin_leave(
        &mut self,
        focus: &Address,
        id: ConversationId,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let conversation = self
            .conversations
            .get_mut(&id)
            .filter(|c| c.state.is_open())
            .ok_or(EngineError::UnknownConversation(id))?;

        let mut actions = vec![EngineAction::send(focus, Message::Leave { conversation: id })];
        if conversation.state != ConversationState::Terminating {
            conversation.state = ConversationState::Terminating;
            actions.push(EngineAction::Emit(EngineEvent::ConversationState {
                conversation: id,
                state: ConversationState::Terminating,
            }));
            actions.push(EngineAction::Persist);
        }
        Ok(actions)
    }

    /// Check that `id` is live and return its options.
    pub fn require_created(
        &self,
        id: ConversationId,
        operation: &'static str,
    ) -> Result<ConversationParams, EngineError> {
        let conversation =
            self.conversations.get(&id).ok_or(EngineError::UnknownConversation(id))?;
        if conversation.state != ConversationState::Created {
            return Err(EngineError::InvalidState { state: conversation.state.as_str(), operation });
        }
        Ok(conversation.params)
    }

    /// Record a message this engine sent.
    pub fn record_outgoing(&mut self, id: ConversationId, message: ChatMessage) {
        if let Some(conversation) = self.conversations.get_mut(&id) {
            conversation.history.push(message);
        }
    }

    /// Resubscribe and resend leaves after (re-)registration.
    pub fn resume(&mut self, focus: &Address, stats: &mut Stats) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        for conversation in self.conversations.values_mut() {
            match conversation.state {
                ConversationState::Created if !conversation.subscribed => {
                    conversation.subscribed = true;
                    stats.subscriptions_sent += 1;
                    actions.push(EngineAction::send(
                        focus,
                        Message::Subscribe { conversation: conversation.id },
                    ));
                },
                ConversationState::Terminating => {
                    actions.push(EngineAction::send(
                        focus,
                        Message::Leave { conversation: conversation.id },
                    ));
                },
                _ => {},
            }
        }
        actions
    }

    /// Remove ephemeral messages whose lifetime has passed.
    pub fn expire(&mut self, now: Instant, stats: &mut Stats) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        for conversation in self.conversations.values_mut() {
            let id = conversation.id;
            conversation.history.retain(|message| {
                let expired = message.expires_at.is_some_and(|at| at <= now);
                if expired {
                    stats.ephemeral_messages_expired += 1;
                    actions.push(EngineAction::Emit(EngineEvent::EphemeralExpired {
                        conversation: id,
                        message_id: message.id,
                    }));
                }
                !expired
            });
        }
        actions
    }

    /// Handle a message from the focus.
    pub fn handle(
        &mut self,
        inbound: &mut Inbound<'_>,
        from: &Address,
        message: Message,
    ) -> Vec<EngineAction> {
        match message {
            Message::ConversationCreated { conversation } => {
                self.on_created(inbound.stats, from, conversation)
            },
            Message::CreationFailed { conversation, reason } => {
                self.on_creation_failed(inbound.stats, conversation, &reason)
            },
            Message::Invite { conversation, subject, params } => {
                self.on_invite(inbound.stats, from, conversation, subject, params)
            },
            Message::Notify { conversation, version, participants } => {
                self.on_notify(inbound.stats, conversation, version, participants)
            },
            Message::Chat { conversation, message_id, sender, body } => {
                let sender = sender.unwrap_or_else(|| from.clone());
                self.on_chat(inbound, conversation, message_id, sender, body)
            },
            Message::Delivered { conversation, message_id } => {
                inbound.stats.messages_delivered += 1;
                vec![EngineAction::Emit(EngineEvent::MessageDelivered { conversation, message_id })]
            },
            Message::LeaveAck { conversation } => self.close(inbound.stats, conversation, true),
            Message::Terminated { conversation } => self.close(inbound.stats, conversation, false),
            other => {
                tracing::debug!(%from, kind = other.kind(), "client ignored message");
                Vec::new()
            },
        }
    }

    fn on_created(
        &mut self,
        stats: &mut Stats,
        focus: &Address,
        id: ConversationId,
    ) -> Vec<EngineAction> {
        let Some(conversation) = self.conversations.get_mut(&id) else {
            tracing::warn!(conversation = %id, "confirmation for unknown conversation");
            return Vec::new();
        };
        if conversation.state != ConversationState::CreationPending {
            return Vec::new();
        }

        conversation.state = ConversationState::Created;
        conversation.subscribed = true;
        stats.conversations_created += 1;
        stats.subscriptions_sent += 1;

        vec![
            EngineAction::Emit(EngineEvent::ConversationState {
                conversation: id,
                state: ConversationState::Created,
            }),
            EngineAction::send(focus, Message::Subscribe { conversation: id }),
            EngineAction::Persist,
        ]
    }

    fn on_creation_failed(
        &mut self,
        stats: &mut Stats,
        id: ConversationId,
        reason: &str,
    ) -> Vec<EngineAction> {
        let Some(conversation) = self.conversations.get_mut(&id) else {
            return Vec::new();
        };
        if conversation.state != ConversationState::CreationPending {
            return Vec::new();
        }

        tracing::warn!(conversation = %id, reason, "focus refused conversation");
        conversation.state = ConversationState::CreationFailed;
        stats.conversation_creation_failures += 1;

        vec![
            EngineAction::Emit(EngineEvent::ConversationState {
                conversation: id,
                state: ConversationState::CreationFailed,
            }),
            EngineAction::Persist,
        ]
    }

    fn on_invite(
        &mut self,
        stats: &mut Stats,
        focus: &Address,
        id: ConversationId,
        subject: String,
        params: ConversationParams,
    ) -> Vec<EngineAction> {
        if self.conversations.get(&id).is_some_and(|c| c.state.is_open()) {
            return Vec::new();
        }

        let mut conversation =
            LocalConversation::new(id, subject, params, ConversationState::Created);
        conversation.subscribed = true;
        self.conversations.insert(id, conversation);
        stats.conversations_joined += 1;
        stats.subscriptions_sent += 1;

        vec![
            EngineAction::Emit(EngineEvent::ConversationState {
                conversation: id,
                state: ConversationState::Created,
            }),
            EngineAction::send(focus, Message::Subscribe { conversation: id }),
            EngineAction::Persist,
        ]
    }

    fn on_notify(
        &mut self,
        stats: &mut Stats,
        id: ConversationId,
        version: u64,
        participants: Vec<Address>,
    ) -> Vec<EngineAction> {
        let Some(conversation) = self.conversations.get_mut(&id) else {
            return Vec::new();
        };
        stats.notifies_received += 1;
        if version <= conversation.version {
            return Vec::new();
        }

        let next: BTreeSet<Address> = participants.into_iter().collect();
        stats.participants_added += next.difference(&conversation.participants).count() as u64;
        stats.participants_removed += conversation.participants.difference(&next).count() as u64;
        conversation.participants = next;
        conversation.version = version;

        vec![
            EngineAction::Emit(EngineEvent::ParticipantsChanged {
                conversation: id,
                participants: conversation.participants.iter().cloned().collect(),
            }),
            EngineAction::Persist,
        ]
    }

    fn on_chat(
        &mut self,
        inbound: &mut Inbound<'_>,
        id: ConversationId,
        message_id: u64,
        sender: Address,
        body: ChatBody,
    ) -> Vec<EngineAction> {
        let Some(conversation) = self.conversations.get_mut(&id).filter(|c| c.state.is_open())
        else {
            tracing::debug!(conversation = %id, "chat for unknown conversation");
            return Vec::new();
        };

        let text = match body {
            ChatBody::Plain(text) => text,
            ChatBody::Sealed { counter, nonce, ciphertext } => {
                let opened = inbound
                    .secret
                    .ok_or_else(|| EngineError::Crypto("end-to-end encryption disabled".into()))
                    .and_then(|secret| open_body(secret, id, counter, &nonce, &ciphertext));
                match opened {
                    Ok(text) => {
                        inbound.stats.encrypted_messages_received += 1;
                        text
                    },
                    Err(error) => {
                        tracing::warn!(conversation = %id, from = %sender, %error, "cannot open message");
                        inbound.stats.decryption_failures += 1;
                        return vec![EngineAction::Emit(EngineEvent::DecryptionFailed {
                            conversation: id,
                            from: sender,
                        })];
                    },
                }
            },
        };

        inbound.stats.messages_received += 1;
        let expires_at = conversation.params.ephemeral_lifetime.map(|lifetime| inbound.now + lifetime);
        conversation.history.push(ChatMessage {
            id: message_id,
            from: sender.clone(),
            body: text.clone(),
            incoming: true,
            expires_at,
        });

        vec![EngineAction::Emit(EngineEvent::MessageReceived {
            conversation: id,
            from: sender,
            body: text,
        })]
    }

    /// Close `id`. A leave acknowledgement only closes a conversation this
    /// engine is leaving; a termination closes any open one.
    fn close(&mut self, stats: &mut Stats, id: ConversationId, acked: bool) -> Vec<EngineAction> {
        let Some(conversation) = self.conversations.get_mut(&id) else {
            return Vec::new();
        };
        let accepted = if acked {
            conversation.state == ConversationState::Terminating
        } else {
            conversation.state.is_open()
        };
        if !accepted {
            return Vec::new();
        }

        conversation.state = ConversationState::Terminated;
        conversation.subscribed = false;
        if acked {
            stats.conversations_left += 1;
        } else {
            stats.conversations_terminated += 1;
        }

        vec![
            EngineAction::Emit(EngineEvent::ConversationState {
                conversation: id,
                state: ConversationState::Terminated,
            }),
            EngineAction::Persist,
        ]
    }
}
