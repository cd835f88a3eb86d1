//! Side effects requested by protocol handlers.
//!
//! Handlers never touch the network or the observers directly. They return
//! actions and [`crate::SimEngine`] executes them in order.

use conclave_core::{Address, EngineEvent, Message};

/// Action for the engine to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Send a message to another address
    Send {
        /// Recipient
        to: Address,
        /// Message
        message: Message,
    },

    /// Notify observers
    Emit(EngineEvent),

    /// Conversation state changed and should be written to storage
    Persist,
}

impl EngineAction {
    /// Shorthand for [`EngineAction::Send`].
    pub fn send(to: &Address, message: Message) -> Self {
        Self::Send { to: to.clone(), message }
    }
}
