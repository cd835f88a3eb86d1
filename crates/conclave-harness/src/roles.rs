//! Role wiring for conferencing scenarios.
//!
//! [`Focus`] and [`ClientConference`] are endpoints with role settings
//! applied before the engine starts. They add no orchestration of their own;
//! everything else is the plain [`Endpoint`] underneath (reachable through
//! `Deref`). Role-level failures are recorded in the run's
//! [`crate::AssertContext`] rather than returned.

use std::{
    cell::RefCell,
    ops::{Deref, DerefMut},
    rc::Rc,
};

use conclave_core::{Address, ConferenceEngine, ConversationId, EngineError, EngineEvent, EngineFactory};

use crate::{
    assert::AssertContext,
    endpoint::{Endpoint, EngineHook},
    endpoint_poller::Pumpable,
};

/// Endpoint acting as the conference focus.
pub struct Focus<F: EngineFactory>
where
    F::Engine: ConferenceEngine,
{
    endpoint: Endpoint<F>,
    events: Rc<RefCell<Vec<EngineEvent>>>,
}

impl<F: EngineFactory> Focus<F>
where
    F::Engine: ConferenceEngine,
{
    /// Start a focus from `config_name`.
    ///
    /// Before start: conference-server mode and an event recorder. After
    /// every start: empty-conversation pruning off, so rosters can be
    /// inspected after the last participant leaves.
    ///
    /// # Errors
    ///
    /// Returns the factory or engine error if the focus cannot start.
    pub fn create(ctx: &AssertContext, factory: F, config_name: &str) -> Result<Self, EngineError> {
        let events = Rc::new(RefCell::new(Vec::new()));

        let recorder = Rc::clone(&events);
        let pre_start: EngineHook<F::Engine> = Box::new(move |engine: &mut F::Engine| {
            engine.set_conference_server(true);
            let recorder = Rc::clone(&recorder);
            engine.on_event(Box::new(move |event: &EngineEvent| {
                recorder.borrow_mut().push(event.clone());
            }));
        });
        let post_start: EngineHook<F::Engine> = Box::new(|engine: &mut F::Engine| {
            engine.set_prune_empty_conversations(false);
        });

        let endpoint =
            Endpoint::create_with_hooks(ctx, factory, config_name, Some(pre_start), Some(post_start))?;
        Ok(Self { endpoint, events })
    }

    /// Record `device` in the focus directory. Returns false (and records a
    /// failure) if the focus refused it.
    #[track_caller]
    pub fn register_participant_device(&self, device: &Address) -> bool {
        let result = self.endpoint.engine_mut().register_participant_device(device.clone());
        self.endpoint
            .context()
            .check_ok(result, format_args!("register participant device {device}"))
            .is_some()
    }

    /// Fake the registrar telling the focus that `device` came online.
    /// Returns the number of conversations it was invited into.
    #[track_caller]
    pub fn notify_device_registration(&self, device: &Address) -> usize {
        let result = self.endpoint.engine_mut().notify_device_registration(device);
        self.endpoint
            .context()
            .check_ok(result, format_args!("device registration notification for {device}"))
            .unwrap_or(0)
    }

    /// Roster of a hosted conversation. Records a failure and returns an
    /// empty roster if the focus does not know it.
    #[track_caller]
    pub fn roster(&self, conversation: ConversationId) -> Vec<Address> {
        let roster = self.endpoint.engine().participants(conversation);
        if roster.is_none() {
            self.endpoint.context().fail(format_args!("focus does not host {conversation}"));
        }
        roster.unwrap_or_default()
    }

    /// Every event the focus engine emitted since creation, across restarts.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.borrow().clone()
    }

    /// Underlying endpoint.
    pub fn into_endpoint(self) -> Endpoint<F> {
        self.endpoint
    }
}

impl<F: EngineFactory> Deref for Focus<F>
where
    F::Engine: ConferenceEngine,
{
    type Target = Endpoint<F>;

    fn deref(&self) -> &Endpoint<F> {
        &self.endpoint
    }
}

impl<F: EngineFactory> DerefMut for Focus<F>
where
    F::Engine: ConferenceEngine,
{
    fn deref_mut(&mut self) -> &mut Endpoint<F> {
        &mut self.endpoint
    }
}

impl<F: EngineFactory> Pumpable for Focus<F>
where
    F::Engine: ConferenceEngine,
{
    fn pump(&self) {
        self.endpoint.iterate();
    }
}

/// Endpoint participating in conversations hosted by a [`Focus`].
pub struct ClientConference<F: EngineFactory>
where
    F::Engine: ConferenceEngine,
{
    endpoint: Endpoint<F>,
    focus: Address,
}

impl<F: EngineFactory> ClientConference<F>
where
    F::Engine: ConferenceEngine,
{
    /// Start a client from `config_name` that uses `focus` as its server.
    ///
    /// The client is paired with the focus: dropping or destroying it pumps
    /// the focus until every conversation it left is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns the factory or engine error if the client cannot start.
    pub fn create(
        ctx: &AssertContext,
        factory: F,
        config_name: &str,
        focus: &Focus<F>,
        end_to_end_encryption: bool,
    ) -> Result<Self, EngineError> {
        let focus_address = focus.identity().clone();
        let configured = focus_address.clone();
        let mut endpoint = Endpoint::create_with(ctx, factory, config_name, move |engine| {
            engine.set_focus(configured.clone());
            engine.set_end_to_end_encryption(end_to_end_encryption);
        })?;
        endpoint.pair_with(focus.handle());

        Ok(Self { endpoint, focus: focus_address })
    }

    /// Address of the focus this client talks to.
    pub fn focus_address(&self) -> &Address {
        &self.focus
    }

    /// Underlying endpoint.
    pub fn into_endpoint(self) -> Endpoint<F> {
        self.endpoint
    }
}

impl<F: EngineFactory> Deref for ClientConference<F>
where
    F::Engine: ConferenceEngine,
{
    type Target = Endpoint<F>;

    fn deref(&self) -> &Endpoint<F> {
        &self.endpoint
    }
}

impl<F: EngineFactory> DerefMut for ClientConference<F>
where
    F::Engine: ConferenceEngine,
{
    fn deref_mut(&mut self) -> &mut Endpoint<F> {
        &mut self.endpoint
    }
}

impl<F: EngineFactory> Pumpable for ClientConference<F>
where
    F::Engine: ConferenceEngine,
{
    fn pump(&self) {
        self.endpoint.iterate();
    }
}
