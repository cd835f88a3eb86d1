//! Cooperative waiting over many independent event loops.
//!
//! A [`Poller`] holds an ordered list of pumps. Each pump lets one endpoint
//! process whatever work is already due and returns. Waiting alternates
//! between checking a predicate and running one round of pumps:
//!
//! ```text
//!        ┌───────────────────────────────────────────────┐
//!        ↓                                               │
//! predicate()? ──true──> return true                     │
//!        │ false                                         │
//!        ↓                                               │
//! pump 1, pump 2, ... pump N                             │
//!        ↓                                               │
//! sleep(ROUND_INTERVAL)                                  │
//!        ↓                                               │
//! elapsed > timeout? ──no────────────────────────────────┘
//!        │ yes
//!        ↓
//! return predicate()
//! ```
//!
//! The result means "the predicate was observed true at some check within
//! the window". The loop stops at the first true observation, so a predicate
//! that flaps afterwards cannot change the outcome.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// Timeout used by [`Poller::wait`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep between pump rounds.
pub const ROUND_INTERVAL: Duration = Duration::from_micros(100);

/// Outcome of a [`Poller::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// Predicate was observed true
    pub satisfied: bool,
    /// Pump rounds run
    pub rounds: u64,
    /// Wall-clock time spent waiting
    pub elapsed: Duration,
}

type Pump<'a> = Box<dyn FnMut() + 'a>;

/// Round-robin driver for a set of pumps.
pub struct Poller<'a> {
    pumps: Vec<Pump<'a>>,
    timeout: Duration,
}

impl Default for Poller<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Poller<'a> {
    /// Poller with no pumps and the default timeout.
    pub fn new() -> Self {
        Self { pumps: Vec::new(), timeout: DEFAULT_TIMEOUT }
    }

    /// Replace the timeout used by [`Poller::wait`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout used by [`Poller::wait`].
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Append a pump. Pumps run in insertion order.
    pub fn add_pump(&mut self, pump: impl FnMut() + 'a) -> &mut Self {
        self.pumps.push(Box::new(pump));
        self
    }

    /// Number of pumps.
    pub fn len(&self) -> usize {
        self.pumps.len()
    }

    /// True if there are no pumps.
    pub fn is_empty(&self) -> bool {
        self.pumps.is_empty()
    }

    /// Run every pump once.
    pub fn pump_round(&mut self) {
        for pump in &mut self.pumps {
            pump();
        }
    }

    /// Pump until `predicate` holds or `timeout` elapses, and report how it
    /// went.
    ///
    /// A predicate that already holds returns before any pump runs.
    pub fn poll(&mut self, timeout: Duration, mut predicate: impl FnMut() -> bool) -> WaitReport {
        let start = Instant::now();
        let mut rounds = 0;

        loop {
            if predicate() {
                return WaitReport { satisfied: true, rounds, elapsed: start.elapsed() };
            }

            self.pump_round();
            rounds += 1;
            std::thread::sleep(ROUND_INTERVAL);

            if start.elapsed() > timeout {
                let satisfied = predicate();
                let elapsed = start.elapsed();
                if !satisfied {
                    tracing::debug!(?timeout, rounds, pumps = self.pumps.len(), "wait timed out");
                }
                return WaitReport { satisfied, rounds, elapsed };
            }
        }
    }

    /// Pump until `predicate` holds or `timeout` elapses.
    pub fn wait_until(&mut self, timeout: Duration, predicate: impl FnMut() -> bool) -> bool {
        self.poll(timeout, predicate).satisfied
    }

    /// [`Poller::wait_until`] with this poller's timeout.
    pub fn wait(&mut self, predicate: impl FnMut() -> bool) -> bool {
        self.wait_until(self.timeout, predicate)
    }

    /// Keep pumping for `duration` without waiting on anything.
    pub fn idle(&mut self, duration: Duration) {
        self.poll(duration, || false);
    }
}

impl fmt::Debug for Poller<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("pumps", &self.pumps.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn true_predicate_skips_pumping() {
        let pumped = Cell::new(0);
        let mut poller = Poller::new();
        poller.add_pump(|| pumped.set(pumped.get() + 1));

        let report = poller.poll(DEFAULT_TIMEOUT, || true);

        assert!(report.satisfied);
        assert_eq!(report.rounds, 0);
        assert_eq!(pumped.get(), 0);
    }

    #[test]
    fn pumps_run_in_insertion_order() {
        let order = std::cell::RefCell::new(Vec::new());
        let mut poller = Poller::new();
        poller.add_pump(|| order.borrow_mut().push('a')).add_pump(|| order.borrow_mut().push('b'));

        poller.pump_round();
        poller.pump_round();

        assert_eq!(*order.borrow(), vec!['a', 'b', 'a', 'b']);
    }

    #[test]
    fn always_false_waits_out_the_timeout() {
        let timeout = Duration::from_millis(20);
        let mut poller = Poller::new();
        poller.add_pump(|| {});

        let start = Instant::now();
        assert!(!poller.wait_until(timeout, || false));
        let elapsed = start.elapsed();

        assert!(elapsed >= timeout);
        // Generous slack for loaded CI machines.
        assert!(elapsed < timeout + Duration::from_millis(200));
    }

    #[test]
    fn predicate_true_at_deadline_is_reported() {
        let timeout = Duration::from_millis(5);
        let start = Instant::now();
        let mut poller = Poller::new();

        // Only the final check after the deadline can see this.
        let satisfied = poller.wait_until(timeout, || start.elapsed() > timeout);

        assert!(satisfied);
    }

    #[test]
    fn idle_keeps_pumping() {
        let pumped = Cell::new(0u64);
        let mut poller = Poller::new();
        poller.add_pump(|| pumped.set(pumped.get() + 1));

        poller.idle(Duration::from_millis(5));

        assert!(pumped.get() > 0);
    }

    #[test]
    fn empty_poller_still_times_out() {
        let mut poller = Poller::new().with_timeout(Duration::from_millis(2));
        assert!(poller.is_empty());
        assert!(!poller.wait(|| false));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn converges_after_k_rounds_with_every_pump_run_k_times(
            k in 0u64..50,
            pumps in 1usize..5,
        ) {
            let counters: Vec<Cell<u64>> = (0..pumps).map(|_| Cell::new(0)).collect();
            let mut poller = Poller::new();
            for counter in &counters {
                poller.add_pump(move || counter.set(counter.get() + 1));
            }

            let report = poller.poll(DEFAULT_TIMEOUT, || counters[0].get() >= k);

            prop_assert!(report.satisfied);
            prop_assert_eq!(report.rounds, k);
            for counter in &counters {
                prop_assert_eq!(counter.get(), k);
            }
        }
    }
}
