//! Conclave Simulation
//!
//! A deterministic, single-threaded stand-in for a conferencing deployment:
//! a shared in-process network with a registrar, and a reference engine that
//! acts as either a conference focus or a participant client.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  datagrams   ┌────────────┐  datagrams   ┌──────────────┐
//! │ SimEngine    │─────────────>│ SimNetwork │<─────────────│ SimEngine    │
//! │ (client)     │<─────────────│ + registrar│─────────────>│ (focus)      │
//! └──────────────┘              └────────────┘              └──────────────┘
//! ```
//!
//! Engines never block. Each [`conclave_core::Engine::iterate`] call drains
//! the datagrams that are due, advances timers and returns. Protocol handlers
//! return [`EngineAction`]s that the engine executes, so the handlers are
//! testable without a network.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod action;
pub mod client;
mod e2e;
mod engine;
mod factory;
pub mod focus;
mod network;
pub mod registration;

pub use action::EngineAction;
pub use client::ChatMessage;
pub use engine::{MAX_DATAGRAMS_PER_ITERATE, SimEngine};
pub use factory::SimFactory;
pub use network::{Datagram, NetworkConfig, SimNetwork};
pub use registration::RegistrationState;
