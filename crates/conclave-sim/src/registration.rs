//! Registration state machine.
//!
//! Keeps one binding alive at the registrar. Uses the action pattern: methods
//! take the current time and return the message to send, if any; the engine
//! performs the I/O.
//!
//! ```text
//! ┌──────┐  start   ┌─────────┐  RegisterOk   ┌────────────┐
//! │ Idle │─────────>│ Pending │──────────────>│ Registered │──┐ refresh
//! └──────┘          └─────────┘               └────────────┘<─┘
//!                        │ retries exhausted        │
//!                        ↓                          │ close
//!                   ┌────────┐                 ┌────────┐
//!                   │ Failed │                 │ Closed │
//!                   └────────┘                 └────────┘
//! ```

use std::time::{Duration, Instant};

use conclave_core::Message;

/// Time to wait for `RegisterOk` before sending `Register` again.
pub const REGISTER_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Register attempts before giving up.
pub const MAX_REGISTER_ATTEMPTS: u32 = 5;

/// Registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Not started
    Idle,
    /// Register sent, waiting for the registrar
    Pending,
    /// Binding is active
    Registered,
    /// Registrar never answered
    Failed,
    /// Binding removed on shutdown
    Closed,
}

/// Outcome of feeding a registrar answer into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First success since start
    Registered,
    /// Refresh of an existing binding
    Refreshed,
    /// Answer arrived in a state that does not expect one
    Ignored,
}

/// Registration state machine for one identity.
#[derive(Debug, Clone)]
pub struct Registration {
    state: RegistrationState,
    expiry: Duration,
    attempts: u32,
    last_sent: Option<Instant>,
    refresh_at: Option<Instant>,
}

impl Registration {
    /// Create an idle registration requesting `expiry`.
    pub fn new(expiry: Duration) -> Self {
        Self {
            state: RegistrationState::Idle,
            expiry,
            attempts: 0,
            last_sent: None,
            refresh_at: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// True while the binding is active.
    pub fn is_registered(&self) -> bool {
        self.state == RegistrationState::Registered
    }

    /// Begin registering. Returns the first `Register`.
    pub fn start(&mut self, now: Instant) -> Option<Message> {
        if self.state != RegistrationState::Idle {
            return None;
        }
        self.state = RegistrationState::Pending;
        Some(self.register(now))
    }

    /// Feed a `RegisterOk`.
    pub fn on_register_ok(&mut self, now: Instant, granted: Duration) -> RegisterOutcome {
        let outcome = match self.state {
            RegistrationState::Pending => RegisterOutcome::Registered,
            RegistrationState::Registered => RegisterOutcome::Refreshed,
            RegistrationState::Idle | RegistrationState::Failed | RegistrationState::Closed => {
                return RegisterOutcome::Ignored;
            },
        };

        self.state = RegistrationState::Registered;
        self.attempts = 0;
        self.refresh_at = Some(now + granted / 2);
        outcome
    }

    /// Advance timers.
    ///
    /// Returns `Register` when a retry or refresh is due. Moves to
    /// [`RegistrationState::Failed`] once retries are exhausted.
    pub fn tick(&mut self, now: Instant) -> Option<Message> {
        match self.state {
            RegistrationState::Pending => {
                let last = self.last_sent?;
                if now.saturating_duration_since(last) < REGISTER_RETRY_INTERVAL {
                    return None;
                }
                if self.attempts >= MAX_REGISTER_ATTEMPTS {
                    self.state = RegistrationState::Failed;
                    return None;
                }
                Some(self.register(now))
            },
            RegistrationState::Registered => {
                let refresh_at = self.refresh_at?;
                if now < refresh_at {
                    return None;
                }
                self.refresh_at = None;
                Some(self.register(now))
            },
            RegistrationState::Idle | RegistrationState::Failed | RegistrationState::Closed => None,
        }
    }

    /// Stop. Returns `Unregister` if a binding may exist.
    pub fn close(&mut self) -> Option<Message> {
        let had_binding =
            matches!(self.state, RegistrationState::Pending | RegistrationState::Registered);
        self.state = RegistrationState::Closed;
        had_binding.then_some(Message::Unregister)
    }

    fn register(&mut self, now: Instant) -> Message {
        self.attempts += 1;
        self.last_sent = Some(now);
        Message::Register { expires: self.expiry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPIRY: Duration = Duration::from_secs(60);

    #[test]
    fn start_sends_register_once() {
        let now = Instant::now();
        let mut registration = Registration::new(EXPIRY);

        assert_eq!(registration.start(now), Some(Message::Register { expires: EXPIRY }));
        assert_eq!(registration.state(), RegistrationState::Pending);
        assert_eq!(registration.start(now), None);
    }

    #[test]
    fn register_ok_completes_registration() {
        let now = Instant::now();
        let mut registration = Registration::new(EXPIRY);
        registration.start(now);

        assert_eq!(registration.on_register_ok(now, EXPIRY), RegisterOutcome::Registered);
        assert!(registration.is_registered());
        assert_eq!(registration.on_register_ok(now, EXPIRY), RegisterOutcome::Refreshed);
    }

    #[test]
    fn pending_retries_then_fails() {
        let start = Instant::now();
        let mut registration = Registration::new(EXPIRY);
        registration.start(start);

        assert_eq!(registration.tick(start), None);

        let mut now = start;
        for _ in 1..MAX_REGISTER_ATTEMPTS {
            now += REGISTER_RETRY_INTERVAL;
            assert!(registration.tick(now).is_some());
        }

        now += REGISTER_RETRY_INTERVAL;
        assert_eq!(registration.tick(now), None);
        assert_eq!(registration.state(), RegistrationState::Failed);
    }

    #[test]
    fn refresh_at_half_expiry() {
        let now = Instant::now();
        let mut registration = Registration::new(EXPIRY);
        registration.start(now);
        registration.on_register_ok(now, EXPIRY);

        assert_eq!(registration.tick(now + EXPIRY / 4), None);
        assert!(registration.tick(now + EXPIRY / 2).is_some());
        assert_eq!(registration.tick(now + EXPIRY / 2), None);
    }

    #[test]
    fn close_unregisters_only_with_binding() {
        let now = Instant::now();

        let mut idle = Registration::new(EXPIRY);
        assert_eq!(idle.close(), None);

        let mut registered = Registration::new(EXPIRY);
        registered.start(now);
        registered.on_register_ok(now, EXPIRY);
        assert_eq!(registered.close(), Some(Message::Unregister));
        assert_eq!(registered.state(), RegistrationState::Closed);
        assert_eq!(registered.on_register_ok(now, EXPIRY), RegisterOutcome::Ignored);
    }
}
