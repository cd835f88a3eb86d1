//! Reference conferencing engine running on [`SimNetwork`].
//!
//! One [`SimEngine`] is one endpoint process. It owns its registration, its
//! client-side conversations and, when acting as a focus, the conversations
//! it hosts. Protocol logic lives in [`crate::client`] and [`crate::focus`];
//! this module decodes datagrams, runs timers and executes the returned
//! [`EngineAction`]s.

use std::time::Instant;

use conclave_core::{
    Address, ChatBody, ConferenceEngine, ConversationId, ConversationParams, ConversationState,
    Engine, EngineError, EngineEvent, Message, Observer, Profile, Stats,
};
use conclave_crypto::NONCE_RANDOM_SIZE;
use rand::RngCore;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    action::EngineAction,
    client::{ChatMessage, ClientState, Inbound, LocalConversation},
    e2e::{KeySecret, seal_body},
    focus::FocusState,
    network::SimNetwork,
    registration::{RegisterOutcome, Registration, RegistrationState},
};

/// Upper bound on datagrams handled by one [`Engine::iterate`] call.
pub const MAX_DATAGRAMS_PER_ITERATE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Staged,
    Running,
    Stopped,
}

impl Lifecycle {
    fn as_str(self) -> &'static str {
        match self {
            Self::Staged => "Staged",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        }
    }
}

/// Persisted engine state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    conversations: Vec<LocalConversation>,
    focus: FocusState,
    next_message_id: u64,
}

/// Conferencing engine bound to a simulated network.
pub struct SimEngine {
    identity: Address,
    network: SimNetwork,
    rng: ChaCha8Rng,
    lifecycle: Lifecycle,
    registration: Registration,
    registration_enabled: bool,
    conference_server: bool,
    focus_address: Option<Address>,
    end_to_end_encryption: bool,
    client: ClientState,
    focus: FocusState,
    observers: Vec<Observer>,
    stats: Stats,
    next_message_id: u64,
}

impl SimEngine {
    /// Build a staged engine for `profile`, restoring any state persisted
    /// for its identity.
    pub fn new(identity: Address, profile: &Profile, network: SimNetwork) -> Self {
        let snapshot = network
            .load(&identity)
            .and_then(|bytes| match ciborium::de::from_reader::<Snapshot, _>(bytes.as_slice()) {
                Ok(snapshot) => Some(snapshot),
                Err(error) => {
                    tracing::warn!(%identity, %error, "discarding unreadable persisted state");
                    None
                },
            })
            .unwrap_or_default();

        let mut focus = snapshot.focus;
        focus.set_prune_empty(profile.conference.prune_empty_conversations);
        let rng = network.fork_rng();

        Self {
            identity,
            rng,
            lifecycle: Lifecycle::Staged,
            registration: Registration::new(profile.registration.expiry()),
            registration_enabled: profile.registration.enabled,
            conference_server: profile.conference.server,
            focus_address: profile.conference.focus.clone(),
            end_to_end_encryption: profile.security.end_to_end_encryption,
            client: ClientState::restore(snapshot.conversations),
            focus,
            observers: Vec::new(),
            stats: Stats::default(),
            next_message_id: snapshot.next_message_id.max(1),
            network,
        }
    }

    /// True if this engine acts as a conference focus.
    pub fn is_conference_server(&self) -> bool {
        self.conference_server
    }

    /// Registration state.
    pub fn registration_state(&self) -> RegistrationState {
        self.registration.state()
    }

    /// Network this engine is attached to.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Create a conversation with `participants`.
    ///
    /// A focus hosts it directly. A client asks its focus; the conversation
    /// is `CreationPending` until the focus answers.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidState`] if the engine is not running
    /// - [`EngineError::NoFocus`] if a client has no focus configured
    /// - [`EngineError::Crypto`] if encryption is requested but disabled
    pub fn create_conversation(
        &mut self,
        subject: &str,
        participants: &[Address],
        params: ConversationParams,
    ) -> Result<ConversationId, EngineError> {
        self.require_running("create_conversation")?;
        if params.encrypted && !self.end_to_end_encryption {
            return Err(EngineError::Crypto("end-to-end encryption is disabled".to_string()));
        }

        let id = ConversationId::new(self.rng.next_u64());
        let actions = if self.conference_server {
            self.focus.host(&mut self.stats, id, None, subject.to_string(), participants, params)
        } else {
            let focus = self.focus_address.clone().ok_or(EngineError::NoFocus)?;
            self.client.begin_create(&focus, id, subject, participants, params)
        };

        tracing::debug!(identity = %self.identity, conversation = %id, subject, "creating conversation");
        self.execute(actions);
        Ok(id)
    }

    /// Add `participant` to a live conversation.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownConversation`] if the conversation is not live
    /// - [`EngineError::NoFocus`] if a client has no focus configured
    pub fn add_participant(
        &mut self,
        conversation: ConversationId,
        participant: &Address,
    ) -> Result<(), EngineError> {
        self.require_running("add_participant")?;
        let actions = if self.conference_server {
            self.focus.add_participant(&mut self.stats, conversation, participant)?
        } else {
            let focus = self.focus_address.clone().ok_or(EngineError::NoFocus)?;
            self.client.request_add(&focus, conversation, participant)?
        };
        self.execute(actions);
        Ok(())
    }

    /// Send a chat message. Returns its id.
    ///
    /// Bodies in encrypted conversations are sealed before leaving the
    /// engine.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownConversation`] or [`EngineError::InvalidState`]
    ///   if the conversation is not live
    /// - [`EngineError::Crypto`] if the conversation is encrypted and this
    ///   engine has encryption disabled
    pub fn send_message(
        &mut self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<u64, EngineError> {
        self.require_running("send_message")?;
        let params = if self.conference_server {
            self.focus
                .conversation(conversation)
                .ok_or(EngineError::UnknownConversation(conversation))?
                .params()
        } else {
            self.client.require_created(conversation, "send_message")?
        };

        let message_id = self.next_message_id;
        let body = if params.encrypted {
            let secret = self.secret().ok_or_else(|| {
                EngineError::Crypto("end-to-end encryption is disabled".to_string())
            })?;
            let mut suffix = [0u8; NONCE_RANDOM_SIZE];
            self.rng.fill_bytes(&mut suffix);
            seal_body(&secret, conversation, message_id, suffix, text)
        } else {
            ChatBody::Plain(text.to_string())
        };

        let actions = if self.conference_server {
            self.focus.broadcast(conversation, &self.identity, message_id, &body)?
        } else {
            let focus = self.focus_address.clone().ok_or(EngineError::NoFocus)?;
            let now = Instant::now();
            self.client.record_outgoing(
                conversation,
                ChatMessage {
                    id: message_id,
                    from: self.identity.clone(),
                    body: text.to_string(),
                    incoming: false,
                    expires_at: params.ephemeral_lifetime.map(|lifetime| now + lifetime),
                },
            );
            vec![EngineAction::send(
                &focus,
                Message::Chat { conversation, message_id, sender: None, body },
            )]
        };

        self.next_message_id += 1;
        self.stats.messages_sent += 1;
        self.execute(actions);
        self.persist();
        Ok(message_id)
    }

    /// State of `conversation` on this endpoint.
    pub fn conversation_state(&self, conversation: ConversationId) -> Option<ConversationState> {
        if self.focus.conversation(conversation).is_some() {
            return Some(ConversationState::Created);
        }
        self.client.conversation(conversation).map(LocalConversation::state)
    }

    /// Subject of `conversation`.
    pub fn subject(&self, conversation: ConversationId) -> Option<String> {
        if let Some(hosted) = self.focus.conversation(conversation) {
            return Some(hosted.subject().to_string());
        }
        self.client.conversation(conversation).map(|c| c.subject().to_string())
    }

    /// Messages still in the history of `conversation`.
    pub fn history(&self, conversation: ConversationId) -> Vec<ChatMessage> {
        self.client.conversation(conversation).map(|c| c.history().to_vec()).unwrap_or_default()
    }

    fn require_running(&self, operation: &'static str) -> Result<(), EngineError> {
        if self.lifecycle == Lifecycle::Running {
            Ok(())
        } else {
            Err(EngineError::InvalidState { state: self.lifecycle.as_str(), operation })
        }
    }

    fn require_focus_role(&self) -> Result<(), EngineError> {
        if self.conference_server { Ok(()) } else { Err(EngineError::NotConferenceServer) }
    }

    fn secret(&self) -> Option<KeySecret> {
        self.end_to_end_encryption.then(|| self.network.key_server_secret())
    }

    fn emit(&mut self, event: &EngineEvent) {
        for observer in &mut self.observers {
            observer(event);
        }
    }

    fn execute(&mut self, actions: Vec<EngineAction>) {
        let mut persist = false;
        for action in actions {
            match action {
                EngineAction::Send { to, message } => {
                    if let Err(error) = self.network.send(&self.identity, &to, &message) {
                        tracing::warn!(identity = %self.identity, %to, %error, "send failed");
                    }
                },
                EngineAction::Emit(event) => self.emit(&event),
                EngineAction::Persist => persist = true,
            }
        }
        if persist {
            self.persist();
        }
    }

    fn persist(&self) {
        let snapshot = Snapshot {
            conversations: self.client.snapshot(),
            focus: self.focus.clone(),
            next_message_id: self.next_message_id,
        };
        let mut bytes = Vec::new();
        match ciborium::ser::into_writer(&snapshot, &mut bytes) {
            Ok(()) => self.network.persist(&self.identity, bytes),
            Err(error) => tracing::warn!(identity = %self.identity, %error, "cannot persist state"),
        }
    }

    /// Subscriptions and pending leaves go out once the engine is reachable.
    fn resume(&mut self) {
        let Some(focus) = self.focus_address.clone() else {
            return;
        };
        let actions = self.client.resume(&focus, &mut self.stats);
        self.execute(actions);
    }

    fn dispatch(&mut self, from: &Address, message: Message, now: Instant) {
        if let Message::RegisterOk { expires } = message {
            match self.registration.on_register_ok(now, expires) {
                RegisterOutcome::Registered => {
                    self.stats.registrations_ok += 1;
                    tracing::info!(identity = %self.identity, "registered");
                    self.emit(&EngineEvent::Registered);
                    self.resume();
                },
                RegisterOutcome::Refreshed => {
                    tracing::debug!(identity = %self.identity, "registration refreshed");
                },
                RegisterOutcome::Ignored => {},
            }
            return;
        }

        let actions = if self.conference_server {
            self.focus.handle(&mut self.stats, from, message)
        } else {
            let secret = self.secret();
            let mut inbound = Inbound { stats: &mut self.stats, now, secret: secret.as_ref() };
            self.client.handle(&mut inbound, from, message)
        };
        self.execute(actions);
    }

    fn tick(&mut self, now: Instant) {
        let before = self.registration.state();
        if let Some(message) = self.registration.tick(now) {
            let registrar = self.identity.registrar();
            self.execute(vec![EngineAction::send(&registrar, message)]);
        }
        if before != RegistrationState::Failed
            && self.registration.state() == RegistrationState::Failed
        {
            self.stats.registration_failures += 1;
            tracing::warn!(identity = %self.identity, "registration failed");
            self.emit(&EngineEvent::RegistrationFailed {
                reason: "registrar did not answer".to_string(),
            });
        }

        let actions = self.client.expire(now, &mut self.stats);
        self.execute(actions);
    }
}

impl Engine for SimEngine {
    fn identity(&self) -> &Address {
        &self.identity
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.lifecycle != Lifecycle::Staged {
            return Err(EngineError::InvalidState {
                state: self.lifecycle.as_str(),
                operation: "start",
            });
        }

        self.network.bind(&self.identity)?;
        self.lifecycle = Lifecycle::Running;
        tracing::info!(
            identity = %self.identity,
            focus = self.conference_server,
            "engine started"
        );

        if !self.registration_enabled {
            self.resume();
            return Ok(());
        }
        if let Some(message) = self.registration.start(Instant::now()) {
            let registrar = self.identity.registrar();
            self.execute(vec![EngineAction::send(&registrar, message)]);
        }
        Ok(())
    }

    fn iterate(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            return;
        }

        let now = Instant::now();
        for _ in 0..MAX_DATAGRAMS_PER_ITERATE {
            let Some(datagram) = self.network.receive(&self.identity) else {
                break;
            };
            match Message::decode(&datagram.payload) {
                Ok(message) => self.dispatch(&datagram.from, message, now),
                Err(error) => {
                    tracing::warn!(identity = %self.identity, from = %datagram.from, %error, "undecodable datagram");
                },
            }
        }
        self.tick(now);
    }

    fn is_registered(&self) -> bool {
        self.lifecycle == Lifecycle::Running && self.registration.is_registered()
    }

    fn open_conversations(&self) -> Vec<ConversationId> {
        let mut open = self.focus.hosted();
        open.extend(self.client.open_conversations());
        open
    }

    fn leave_conversation(&mut self, conversation: ConversationId) -> Result<(), EngineError> {
        self.require_running("leave_conversation")?;
        let actions = if self.focus.conversation(conversation).is_some() {
            self.focus.terminate(&mut self.stats, conversation)?
        } else {
            let focus = self.focus_address.clone().ok_or(EngineError::NoFocus)?;
            self.client.begin_leave(&focus, conversation)?
        };
        self.execute(actions);
        Ok(())
    }

    fn shutdown(&mut self) {
        match self.lifecycle {
            Lifecycle::Stopped => return,
            Lifecycle::Staged => {
                self.lifecycle = Lifecycle::Stopped;
                return;
            },
            Lifecycle::Running => {},
        }

        if let Some(message) = self.registration.close() {
            self.stats.unregistrations += 1;
            let registrar = self.identity.registrar();
            self.execute(vec![EngineAction::send(&registrar, message)]);
        }
        self.persist();
        self.network.unbind(&self.identity);
        self.lifecycle = Lifecycle::Stopped;
        tracing::info!(identity = %self.identity, "engine stopped");
    }
}

impl ConferenceEngine for SimEngine {
    fn set_conference_server(&mut self, enabled: bool) {
        self.conference_server = enabled;
    }

    fn set_focus(&mut self, focus: Address) {
        self.focus_address = Some(focus);
    }

    fn set_end_to_end_encryption(&mut self, enabled: bool) {
        self.end_to_end_encryption = enabled;
    }

    fn set_prune_empty_conversations(&mut self, enabled: bool) {
        self.focus.set_prune_empty(enabled);
    }

    fn on_event(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    fn register_participant_device(&mut self, device: Address) -> Result<(), EngineError> {
        self.require_focus_role()?;
        if self.focus.register_device(&device)? {
            tracing::debug!(identity = %self.identity, %device, "device registered in directory");
            self.persist();
        }
        Ok(())
    }

    fn notify_device_registration(&mut self, device: &Address) -> Result<usize, EngineError> {
        self.require_focus_role()?;
        let (actions, invited) = self.focus.notify_device_registration(&mut self.stats, device)?;
        self.execute(actions);
        Ok(invited)
    }

    fn participants(&self, conversation: ConversationId) -> Option<Vec<Address>> {
        if let Some(hosted) = self.focus.conversation(conversation) {
            return Some(hosted.participants());
        }
        self.client
            .conversation(conversation)
            .map(|c| c.participants().iter().cloned().collect())
    }
}

impl Drop for SimEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SimEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEngine")
            .field("identity", &self.identity)
            .field("lifecycle", &self.lifecycle)
            .field("conference_server", &self.conference_server)
            .field("registration", &self.registration.state())
            .finish_non_exhaustive()
    }
}
