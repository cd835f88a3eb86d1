//! Endpoints: one engine each, with ordered teardown.
//!
//! ```text
//! create ──> Running ──destroy / drop──> Destroyed
//!             │    ↑
//!             │    └── restart
//!             │
//!             └── restart failed ──> Stopped
//! ```
//!
//! There is no uninitialized endpoint: `create` either returns a running
//! one or an error.
//!
//! `restart` swaps the engine inside the shared cell, so pollers and partner
//! endpoints holding an [`EngineHandle`] keep working across it.

use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    rc::{Rc, Weak},
    time::{Duration, Instant},
};

use conclave_core::{Address, Engine, EngineError, EngineFactory, Stats};

use crate::{assert::AssertContext, poller::Poller};

/// Bound on how long teardown waits for open conversations to close.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Hook run against a staged or freshly started engine.
pub type EngineHook<E> = Box<dyn FnMut(&mut E)>;

/// Endpoint lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Engine started
    Running,
    /// A restart could not boot the replacement engine. The old engine is
    /// shut down and nothing is left to clean up. Terminal.
    Stopped,
    /// Conversations closed and engine released. Terminal.
    Destroyed,
}

impl EndpointState {
    /// Human-readable state name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Destroyed => "Destroyed",
        }
    }
}

/// Shared handle to an endpoint's engine.
///
/// Borrows are short-lived: pumps and predicates borrow for one call and
/// release before the next.
pub struct EngineHandle<E> {
    inner: Rc<RefCell<E>>,
}

impl<E> Clone for EngineHandle<E> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<E: Engine> EngineHandle<E> {
    fn new(engine: E) -> Self {
        Self { inner: Rc::new(RefCell::new(engine)) }
    }

    /// Let the engine process pending work.
    pub fn iterate(&self) {
        self.inner.borrow_mut().iterate();
    }

    /// Shared access to the engine.
    pub fn borrow(&self) -> Ref<'_, E> {
        self.inner.borrow()
    }

    /// Exclusive access to the engine.
    pub fn borrow_mut(&self) -> RefMut<'_, E> {
        self.inner.borrow_mut()
    }

    /// Copy of the engine's counters.
    pub fn stats(&self) -> Stats {
        *self.inner.borrow().stats()
    }

    /// Weak reference that does not keep the engine alive.
    pub fn downgrade(&self) -> WeakEngineHandle<E> {
        WeakEngineHandle { inner: Rc::downgrade(&self.inner) }
    }

    fn replace(&self, engine: E) -> E {
        self.inner.replace(engine)
    }
}

/// Non-owning reference to an endpoint's engine.
pub struct WeakEngineHandle<E> {
    inner: Weak<RefCell<E>>,
}

impl<E> Clone for WeakEngineHandle<E> {
    fn clone(&self) -> Self {
        Self { inner: Weak::clone(&self.inner) }
    }
}

impl<E> WeakEngineHandle<E> {
    /// The engine, if its endpoint still exists.
    pub fn upgrade(&self) -> Option<EngineHandle<E>> {
        self.inner.upgrade().map(|inner| EngineHandle { inner })
    }
}

/// One simulated network participant.
pub struct Endpoint<F: EngineFactory> {
    factory: F,
    config_name: String,
    identity: Address,
    pre_start: Option<EngineHook<F::Engine>>,
    post_start: Option<EngineHook<F::Engine>>,
    engine: EngineHandle<F::Engine>,
    partner: Option<WeakEngineHandle<F::Engine>>,
    ctx: AssertContext,
    state: EndpointState,
}

impl<F: EngineFactory> Endpoint<F> {
    /// Load `config_name` and start its engine.
    ///
    /// # Errors
    ///
    /// Returns the factory or engine error if the endpoint cannot start.
    pub fn create(ctx: &AssertContext, factory: F, config_name: &str) -> Result<Self, EngineError> {
        Self::create_with_hooks(ctx, factory, config_name, None, None)
    }

    /// Load `config_name`, run `pre_start` on the staged engine, then start.
    ///
    /// Anything `pre_start` registers is in place before the engine handles
    /// its first network event. The hook runs again on every restart.
    ///
    /// # Errors
    ///
    /// Returns the factory or engine error if the endpoint cannot start.
    pub fn create_with(
        ctx: &AssertContext,
        factory: F,
        config_name: &str,
        pre_start: impl FnMut(&mut F::Engine) + 'static,
    ) -> Result<Self, EngineError> {
        Self::create_with_hooks(ctx, factory, config_name, Some(Box::new(pre_start)), None)
    }

    /// Like [`Endpoint::create_with`], with a second hook applied right after
    /// every start.
    ///
    /// # Errors
    ///
    /// Returns the factory or engine error if the endpoint cannot start.
    pub fn create_with_hooks(
        ctx: &AssertContext,
        factory: F,
        config_name: &str,
        mut pre_start: Option<EngineHook<F::Engine>>,
        mut post_start: Option<EngineHook<F::Engine>>,
    ) -> Result<Self, EngineError> {
        let engine = boot(&factory, config_name, &mut pre_start, &mut post_start)?;
        let identity = engine.identity().clone();
        tracing::info!(config = config_name, %identity, "endpoint running");

        Ok(Self {
            factory,
            config_name: config_name.to_string(),
            identity,
            pre_start,
            post_start,
            engine: EngineHandle::new(engine),
            partner: None,
            ctx: ctx.clone(),
            state: EndpointState::Running,
        })
    }

    /// Address this endpoint registers under. Stable across restarts.
    pub fn identity(&self) -> &Address {
        &self.identity
    }

    /// Configuration name this endpoint was created from.
    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    /// Lifecycle state.
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Copy of the engine's counters.
    pub fn stats(&self) -> Stats {
        self.engine.stats()
    }

    /// Writable counters.
    pub fn stats_mut(&self) -> RefMut<'_, Stats> {
        RefMut::map(self.engine.borrow_mut(), |engine| engine.stats_mut())
    }

    /// Zero every counter.
    pub fn reset_stats(&self) {
        self.stats_mut().reset();
    }

    /// Shared handle to the engine.
    pub fn handle(&self) -> &EngineHandle<F::Engine> {
        &self.engine
    }

    /// Shared access to the engine.
    pub fn engine(&self) -> Ref<'_, F::Engine> {
        self.engine.borrow()
    }

    /// Exclusive access to the engine, for calls a scenario makes directly.
    pub fn engine_mut(&self) -> RefMut<'_, F::Engine> {
        self.engine.borrow_mut()
    }

    /// Let the engine process pending work.
    pub fn iterate(&self) {
        self.engine.iterate();
    }

    /// Assertion context this endpoint reports into.
    pub fn context(&self) -> &AssertContext {
        &self.ctx
    }

    /// Pump `partner` alongside this endpoint during teardown.
    pub fn pair_with(&mut self, partner: &EngineHandle<F::Engine>) {
        self.partner = Some(partner.downgrade());
    }

    /// Tear down and recreate the engine in place.
    ///
    /// Counters carry over: the old block is added to whatever the new
    /// engine counted while starting, and `restarts` is incremented. Both
    /// hooks run again. With `validate_registration`, waits up to the default
    /// timeout for the new engine to register.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidState`] if the endpoint is not running
    /// - Factory or engine error if the new engine cannot start; the endpoint
    ///   is then [`EndpointState::Stopped`]
    /// - [`EngineError::RegistrationTimeout`] if validation was requested and
    ///   registration did not complete
    pub fn restart(&mut self, validate_registration: bool) -> Result<(), EngineError> {
        if self.state != EndpointState::Running {
            return Err(EngineError::InvalidState {
                state: self.state.as_str(),
                operation: "restart",
            });
        }

        let stats = self.stats();
        self.engine.borrow_mut().shutdown();

        let mut engine =
            match boot(&self.factory, &self.config_name, &mut self.pre_start, &mut self.post_start) {
                Ok(engine) => engine,
                Err(error) => {
                    self.state = EndpointState::Stopped;
                    tracing::warn!(identity = %self.identity, %error, "restart failed, endpoint stopped");
                    return Err(error);
                },
            };
        engine.stats_mut().accumulate(&stats);
        engine.stats_mut().restarts += 1;
        drop(self.engine.replace(engine));
        tracing::info!(identity = %self.identity, "endpoint restarted");

        if !validate_registration {
            return Ok(());
        }

        let handle = self.engine.clone();
        let started = Instant::now();
        let mut poller = Poller::new();
        poller.add_pump(|| handle.iterate());
        if poller.wait(|| handle.borrow().is_registered()) {
            Ok(())
        } else {
            Err(EngineError::RegistrationTimeout {
                address: self.identity.clone(),
                elapsed: started.elapsed(),
            })
        }
    }

    /// Close every open conversation, then release the engine.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.state != EndpointState::Running {
            return;
        }

        let handle = self.engine.clone();
        let open = handle.borrow().open_conversations();
        for conversation in &open {
            if let Err(error) = handle.borrow_mut().leave_conversation(*conversation) {
                tracing::warn!(identity = %self.identity, %conversation, %error, "cannot leave");
            }
        }

        if !open.is_empty() {
            let partner = self.partner.as_ref().and_then(WeakEngineHandle::upgrade);
            let mut poller = Poller::new().with_timeout(CLEANUP_TIMEOUT);
            poller.add_pump(|| handle.iterate());
            if let Some(partner) = &partner {
                poller.add_pump(move || partner.iterate());
            }

            let report = poller.poll(CLEANUP_TIMEOUT, || handle.borrow().open_conversations().is_empty());
            if report.satisfied {
                tracing::debug!(
                    identity = %self.identity,
                    conversations = open.len(),
                    rounds = report.rounds,
                    "conversations closed"
                );
            } else {
                let still_open = handle.borrow().open_conversations().len();
                tracing::warn!(
                    identity = %self.identity,
                    still_open,
                    "releasing engine with conversations still open"
                );
                self.ctx.fail(format_args!(
                    "{} released with {still_open} conversation(s) still open after {CLEANUP_TIMEOUT:?}",
                    self.identity
                ));
            }
        }

        handle.borrow_mut().shutdown();
        self.state = EndpointState::Destroyed;
        tracing::info!(identity = %self.identity, "endpoint destroyed");
    }
}

fn boot<F: EngineFactory>(
    factory: &F,
    config_name: &str,
    pre_start: &mut Option<EngineHook<F::Engine>>,
    post_start: &mut Option<EngineHook<F::Engine>>,
) -> Result<F::Engine, EngineError> {
    let mut engine = factory.load(config_name)?;
    if let Some(hook) = pre_start {
        hook(&mut engine);
    }
    engine.start()?;
    if let Some(hook) = post_start {
        hook(&mut engine);
    }
    Ok(engine)
}

impl<F: EngineFactory> Drop for Endpoint<F> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<F: EngineFactory> fmt::Debug for Endpoint<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("config_name", &self.config_name)
            .field("identity", &self.identity)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
