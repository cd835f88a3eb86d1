//! Per-run context: one factory, one assertion context, many endpoints.

use conclave_core::{ConferenceEngine, EngineFactory};

use crate::{
    assert::{AssertContext, AssertionFailures},
    endpoint::Endpoint,
    endpoint_poller::{Pumpable, poll_endpoints},
    poller::Poller,
    roles::{ClientConference, Focus},
};

/// Everything one scenario shares.
///
/// Construction failures are recorded in the context and surface as `None`,
/// so a broken scenario reports instead of panicking mid-setup.
pub struct Harness<F: EngineFactory + Clone> {
    factory: F,
    ctx: AssertContext,
}

impl<F: EngineFactory + Clone> Harness<F> {
    /// Run over `factory` with a fresh context.
    pub fn new(factory: F) -> Self {
        Self { factory, ctx: AssertContext::new() }
    }

    /// Assertion context of this run.
    pub fn context(&self) -> &AssertContext {
        &self.ctx
    }

    /// Factory shared by every endpoint of this run.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Start a plain endpoint.
    #[track_caller]
    pub fn endpoint(&self, config_name: &str) -> Option<Endpoint<F>> {
        self.ctx.check_ok(
            Endpoint::create(&self.ctx, self.factory.clone(), config_name),
            format_args!("create endpoint {config_name}"),
        )
    }

    /// Start a plain endpoint, running `pre_start` on the staged engine.
    #[track_caller]
    pub fn endpoint_with(
        &self,
        config_name: &str,
        pre_start: impl FnMut(&mut F::Engine) + 'static,
    ) -> Option<Endpoint<F>> {
        self.ctx.check_ok(
            Endpoint::create_with(&self.ctx, self.factory.clone(), config_name, pre_start),
            format_args!("create endpoint {config_name}"),
        )
    }

    /// Poller over `endpoints`.
    pub fn poller<'a>(&self, endpoints: &[&'a dyn Pumpable]) -> Poller<'a> {
        poll_endpoints(endpoints)
    }

    /// Report the run.
    ///
    /// # Errors
    ///
    /// Returns every failure recorded by scenario checks and role wiring.
    pub fn finish(self) -> Result<(), AssertionFailures> {
        self.ctx.finish()
    }
}

impl<F: EngineFactory + Clone> Harness<F>
where
    F::Engine: ConferenceEngine,
{
    /// Start a focus.
    #[track_caller]
    pub fn focus(&self, config_name: &str) -> Option<Focus<F>> {
        self.ctx.check_ok(
            Focus::create(&self.ctx, self.factory.clone(), config_name),
            format_args!("create focus {config_name}"),
        )
    }

    /// Start a client of `focus`.
    #[track_caller]
    pub fn client(
        &self,
        config_name: &str,
        focus: &Focus<F>,
        end_to_end_encryption: bool,
    ) -> Option<ClientConference<F>> {
        self.ctx.check_ok(
            ClientConference::create(
                &self.ctx,
                self.factory.clone(),
                config_name,
                focus,
                end_to_end_encryption,
            ),
            format_args!("create client {config_name}"),
        )
    }
}
