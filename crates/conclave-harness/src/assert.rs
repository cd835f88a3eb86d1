//! Result-collecting assertions.
//!
//! Scenario code records failures into an [`AssertContext`] instead of
//! panicking, so a failed convergence ends one scenario with a report rather
//! than tearing down every endpoint mid-protocol. The context is cheap to
//! clone; endpoints and roles hold clones and record role-wiring failures
//! into the same run.

use std::{
    cell::RefCell,
    fmt::{self, Debug, Display},
    panic::Location,
    rc::Rc,
};

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Where the failing check was made
    pub location: &'static Location<'static>,
    /// What went wrong
    pub message: String,
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.location.file(), self.location.line(), self.message)
    }
}

/// Every failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailures {
    /// Failures in recording order
    pub failures: Vec<Failure>,
}

impl Display for AssertionFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} assertion(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AssertionFailures {}

/// Shared failure collector for one test run.
#[derive(Clone, Default)]
pub struct AssertContext {
    failures: Rc<RefCell<Vec<Failure>>>,
}

impl AssertContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure unconditionally.
    #[track_caller]
    pub fn fail(&self, message: impl Display) {
        self.record(Location::caller(), message.to_string());
    }

    /// Record a failure unless `condition` holds. Returns `condition`.
    #[track_caller]
    pub fn check(&self, condition: bool, what: impl Display) -> bool {
        if !condition {
            self.record(Location::caller(), what.to_string());
        }
        condition
    }

    /// Record a failure unless `actual == expected`.
    #[track_caller]
    pub fn check_eq<T: PartialEq + Debug>(&self, actual: T, expected: T, what: impl Display) -> bool {
        let equal = actual == expected;
        if !equal {
            self.record(
                Location::caller(),
                format!("{what}: expected {expected:?}, got {actual:?}"),
            );
        }
        equal
    }

    /// Record a failure if `result` is an error. Returns the success value.
    #[track_caller]
    pub fn check_ok<T, E: Display>(&self, result: Result<T, E>, what: impl Display) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.record(Location::caller(), format!("{what}: {error}"));
                None
            },
        }
    }

    /// Failures recorded so far.
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.borrow().clone()
    }

    /// True while nothing has failed.
    pub fn passed(&self) -> bool {
        self.failures.borrow().is_empty()
    }

    /// Report the run.
    ///
    /// # Errors
    ///
    /// Returns every recorded failure if any check failed.
    pub fn finish(&self) -> Result<(), AssertionFailures> {
        let failures = self.failures();
        if failures.is_empty() { Ok(()) } else { Err(AssertionFailures { failures }) }
    }

    /// Panic with every recorded failure. For use at the end of a `#[test]`.
    #[allow(clippy::panic, reason = "Turns recorded failures into a test failure")]
    pub fn assert_passed(&self) {
        if let Err(failures) = self.finish() {
            panic!("{failures}");
        }
    }

    fn record(&self, location: &'static Location<'static>, message: String) {
        tracing::error!(file = location.file(), line = location.line(), "{message}");
        self.failures.borrow_mut().push(Failure { location, message });
    }
}

impl Debug for AssertContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertContext").field("failures", &self.failures.borrow().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_return_their_outcome() {
        let ctx = AssertContext::new();

        assert!(ctx.check(true, "holds"));
        assert!(ctx.check_eq(2, 2, "equal"));
        assert_eq!(ctx.check_ok::<_, String>(Ok(5), "ok"), Some(5));
        assert!(ctx.passed());

        assert!(!ctx.check(false, "does not hold"));
        assert!(!ctx.check_eq(1, 2, "counter"));
        assert_eq!(ctx.check_ok::<u8, _>(Err("boom"), "load"), None);
        assert_eq!(ctx.failures().len(), 3);
        assert_eq!(ctx.failures()[1].message, "counter: expected 2, got 1");
        assert_eq!(ctx.failures()[2].message, "load: boom");
    }

    #[test]
    fn clones_share_failures() {
        let ctx = AssertContext::new();
        let clone = ctx.clone();
        clone.fail("recorded by a role");

        assert!(!ctx.passed());
        assert!(ctx.finish().is_err());
    }

    #[test]
    fn failures_point_at_the_caller() {
        let ctx = AssertContext::new();
        let line = line!() + 1;
        ctx.fail("here");

        let failure = &ctx.failures()[0];
        assert_eq!(failure.location.file(), file!());
        assert_eq!(failure.location.line(), line);
    }

    #[test]
    #[should_panic(expected = "1 assertion(s) failed")]
    fn assert_passed_panics_on_failure() {
        let ctx = AssertContext::new();
        ctx.fail("nope");
        ctx.assert_passed();
    }

    #[test]
    fn report_lists_every_failure() {
        let ctx = AssertContext::new();
        ctx.fail("first");
        ctx.fail("second");

        let report = ctx.finish().unwrap_err().to_string();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "2 assertion(s) failed");
        assert!(lines[1].ends_with(": first"));
        assert!(lines[2].ends_with(": second"));
    }
}
