//! Guaranteed-release wrapper around [`CleanupLedger`].

use std::ops::{Deref, DerefMut};
use std::thread;

use tracing::warn;

use super::{CleanupLedger, ScopeOutcome, TeardownReport};

/// Drop guard that runs the ledger's exit on every path out of a scope.
///
/// Call [`CleanupScope::finish`] or [`CleanupScope::finish_with`] on the
/// normal path. A scope dropped without finishing (an early `?` return or a
/// panic unwinding through it) exits as a [`ScopeOutcome::Failure`].
///
/// ```
/// use stagehand::ledger::{CleanupLedger, CleanupScope, Retention};
/// # use stagehand::test_support::{CallJournal, FakeResource};
/// # use stagehand::ResourceKind;
/// # let journal = CallJournal::new();
/// # let volume = FakeResource::new("vol-1", ResourceKind::Volume, &journal).deletable();
///
/// let mut scope = CleanupScope::new(CleanupLedger::new());
/// scope.register(&volume, Retention::destroy_always());
/// let result: Result<(), std::io::Error> = Ok(());
/// let result = scope.finish_with(result);
/// assert!(result.is_ok());
/// ```
#[derive(Debug)]
pub struct CleanupScope<'r> {
    ledger: CleanupLedger<'r>,
}

impl<'r> CleanupScope<'r> {
    /// Guards `ledger` until the scope finishes or is dropped.
    #[must_use]
    pub const fn new(ledger: CleanupLedger<'r>) -> Self {
        Self { ledger }
    }

    /// Ends the scope with an explicit outcome.
    pub fn finish(mut self, outcome: ScopeOutcome) -> TeardownReport {
        self.ledger.close(outcome)
    }

    /// Ends the scope with the outcome implied by `result` and hands the
    /// result back unchanged, so the triggering error still propagates.
    ///
    /// # Errors
    ///
    /// Returns `result`'s error untouched.
    pub fn finish_with<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        self.finish(ScopeOutcome::from_result(&result));
        result
    }
}

impl<'r> Deref for CleanupScope<'r> {
    type Target = CleanupLedger<'r>;

    fn deref(&self) -> &Self::Target {
        &self.ledger
    }
}

impl DerefMut for CleanupScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ledger
    }
}

impl Drop for CleanupScope<'_> {
    fn drop(&mut self) {
        if self.ledger.state() != super::LedgerState::Open {
            return;
        }
        if thread::panicking() {
            warn!(scope_id = %self.ledger.id(), "cleanup scope unwinding; tearing down");
        } else {
            warn!(scope_id = %self.ledger.id(), "cleanup scope abandoned; tearing down");
        }
        self.ledger.close(ScopeOutcome::Failure);
    }
}

/// Runs `body` inside a cleanup scope backed by `ledger`.
///
/// The scope exits as a success when `body` returns `Ok` and as a failure
/// when it returns `Err` or panics. The body's result is returned unchanged.
///
/// # Errors
///
/// Returns the error produced by `body`.
pub fn with_cleanup<'r, T, E, F>(ledger: CleanupLedger<'r>, body: F) -> Result<T, E>
where
    F: FnOnce(&mut CleanupLedger<'r>) -> Result<T, E>,
{
    let mut scope = CleanupScope::new(ledger);
    let result = body(&mut *scope);
    scope.finish_with(result)
}
