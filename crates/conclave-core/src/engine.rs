//! The seam between endpoints and the protocol engine they own.
//!
//! The harness never looks inside an engine. It creates engines through an
//! [`EngineFactory`], pumps them with [`Engine::iterate`], reads their
//! [`Stats`], and closes their conversations before releasing them. Role
//! wiring (focus vs. client) goes through [`ConferenceEngine`].
//!
//! # Contract
//!
//! - [`Engine::iterate`] never blocks. It processes whatever network and timer
//!   work is already due and returns.
//! - Counters in [`Engine::stats`] never decrease except through an explicit
//!   reset by the owner.
//! - Observers registered with [`ConferenceEngine::on_event`] before
//!   [`Engine::start`] see every event the engine emits.

use crate::{
    address::Address,
    conversation::{ConversationId, ConversationState},
    error::EngineError,
    stats::Stats,
};

/// A protocol engine instance owned by exactly one endpoint.
pub trait Engine {
    /// Address this engine registers under.
    fn identity(&self) -> &Address;

    /// Counter block.
    fn stats(&self) -> &Stats;

    /// Mutable counter block, for resets and carrying counters across a
    /// restart.
    fn stats_mut(&mut self) -> &mut Stats;

    /// Begin processing: bind the network address and register.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine was already started or its address is
    /// bound by another engine.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Process pending network and timer work without blocking.
    fn iterate(&mut self);

    /// True once the registrar accepted this engine's binding.
    fn is_registered(&self) -> bool;

    /// Conversations that still hold protocol state for this engine.
    fn open_conversations(&self) -> Vec<ConversationId>;

    /// Start closing `conversation`.
    ///
    /// Completion is asynchronous: the conversation disappears from
    /// [`Engine::open_conversations`] once the wider system acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownConversation`] if the conversation is not
    /// open here.
    fn leave_conversation(&mut self, conversation: ConversationId) -> Result<(), EngineError>;

    /// Unregister and unbind. Conversations are left as they are.
    fn shutdown(&mut self);
}

/// Creates staged engines from named configurations.
pub trait EngineFactory {
    /// Engine type produced.
    type Engine: Engine;

    /// Load `config_name` and build an engine that has not been started.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the name cannot be resolved.
    fn load(&self, config_name: &str) -> Result<Self::Engine, EngineError>;
}

/// Callback invoked for every [`EngineEvent`].
pub type Observer = Box<dyn FnMut(&EngineEvent)>;

/// Observable side effects of engine processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Registrar accepted the binding
    Registered,

    /// Registrar refused the binding
    RegistrationFailed {
        /// Registrar's reason
        reason: String,
    },

    /// A conversation changed state on this endpoint
    ConversationState {
        /// Conversation
        conversation: ConversationId,
        /// New state
        state: ConversationState,
    },

    /// Roster of a conversation changed
    ParticipantsChanged {
        /// Conversation
        conversation: ConversationId,
        /// Current participants (bare addresses)
        participants: Vec<Address>,
    },

    /// Focus invited a device into a hosted conversation
    DeviceInvited {
        /// Conversation
        conversation: ConversationId,
        /// Invited device
        device: Address,
    },

    /// Chat message arrived from another participant
    MessageReceived {
        /// Conversation
        conversation: ConversationId,
        /// Sending device
        from: Address,
        /// Message body
        body: String,
    },

    /// Focus acknowledged one of our messages
    MessageDelivered {
        /// Conversation
        conversation: ConversationId,
        /// Message id
        message_id: u64,
    },

    /// Ephemeral message was removed from history
    EphemeralExpired {
        /// Conversation
        conversation: ConversationId,
        /// Message id
        message_id: u64,
    },

    /// Sealed message could not be opened
    DecryptionFailed {
        /// Conversation
        conversation: ConversationId,
        /// Sending device
        from: Address,
    },
}

/// Conferencing role wiring on top of [`Engine`].
///
/// Setters are idempotent and may be called before or after
/// [`Engine::start`]; calling them before start guarantees the first network
/// event already sees the setting.
pub trait ConferenceEngine: Engine {
    /// Act as a conference focus.
    fn set_conference_server(&mut self, enabled: bool);

    /// Focus used to create and join conversations.
    fn set_focus(&mut self, focus: Address);

    /// Seal and open messages end to end.
    fn set_end_to_end_encryption(&mut self, enabled: bool);

    /// Delete hosted conversations once their last participant leaves.
    fn set_prune_empty_conversations(&mut self, enabled: bool);

    /// Register an observer for every event this engine emits.
    fn on_event(&mut self, observer: Observer);

    /// Record `device` in the focus directory so conversations listing its
    /// participant invite it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotConferenceServer`] if this engine is not a focus
    /// - [`EngineError::NotADevice`] if `device` has no device parameter
    fn register_participant_device(&mut self, device: Address) -> Result<(), EngineError>;

    /// Deliver a registrar notification that `device` is reachable, inviting
    /// it into every hosted conversation its participant belongs to.
    ///
    /// Returns the number of conversations the device was invited into.
    ///
    /// # Errors
    ///
    /// Same as [`ConferenceEngine::register_participant_device`].
    fn notify_device_registration(&mut self, device: &Address) -> Result<usize, EngineError>;

    /// Current participants of `conversation` (bare addresses), or `None` if
    /// the conversation is unknown here.
    fn participants(&self, conversation: ConversationId) -> Option<Vec<Address>>;
}
