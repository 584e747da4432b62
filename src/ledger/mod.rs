//! Scoped cleanup ledger for transient cloud resources.
//!
//! A workflow registers every resource it creates as soon as it exists. When
//! the scope ends the ledger selects the resources to destroy according to
//! the scope outcome and each entry's [`Retention`], orders them by
//! [`ResourceKind::teardown_priority`], and destroys them one at a time.
//! Instances go first so that the volumes they mount are released before the
//! volumes themselves are deleted.
//!
//! Teardown is best effort: a failure to destroy one resource is logged and
//! the remaining resources are still attempted. Exiting a ledger never fails.
//!
//! A ledger is single-use and not thread-safe. Concurrent workflows must each
//! own their own ledger.

mod scope;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::resource::{Resource, ResourceKind};
use crate::wait::{DEFAULT_POLL_INTERVAL, PollSettings, wait_for_status};

pub use scope::{CleanupScope, with_cleanup};

/// Status terminated resources settle in.
pub const TERMINATED_STATUS: &str = "terminated";

/// Per-resource flags suppressing destruction on a given scope outcome.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Retention {
    /// Keep the resource when the scope succeeds.
    pub keep_on_success: bool,
    /// Keep the resource when the scope fails.
    pub keep_on_error: bool,
}

impl Retention {
    /// Destroy on both outcomes.
    #[must_use]
    pub const fn destroy_always() -> Self {
        Self {
            keep_on_success: false,
            keep_on_error: false,
        }
    }

    /// Keep the resource when the scope succeeds, for example a build
    /// artefact that is the point of the workflow.
    #[must_use]
    pub const fn keep_on_success() -> Self {
        Self {
            keep_on_success: true,
            keep_on_error: false,
        }
    }

    /// Keep the resource when the scope fails, for example to inspect a
    /// broken instance.
    #[must_use]
    pub const fn keep_on_error() -> Self {
        Self {
            keep_on_success: false,
            keep_on_error: true,
        }
    }

    /// Returns `true` when the entry survives a scope ending with `outcome`.
    #[must_use]
    pub const fn retains(self, outcome: ScopeOutcome) -> bool {
        match outcome {
            ScopeOutcome::Success => self.keep_on_success,
            ScopeOutcome::Failure => self.keep_on_error,
        }
    }
}

/// How the enclosing scope ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeOutcome {
    /// The scope completed normally.
    Success,
    /// The scope failed, returned early, or unwound.
    Failure,
}

impl ScopeOutcome {
    /// Classifies a scope result.
    #[must_use]
    pub const fn from_result<T, E>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(_) => Self::Failure,
        }
    }
}

impl fmt::Display for ScopeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure => f.write_str("failure"),
        }
    }
}

/// Lifecycle of a ledger.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LedgerState {
    /// Accepting registrations.
    Open,
    /// Teardown in progress.
    Closing,
    /// Teardown finished; entries discarded.
    Closed,
}

/// Step of a resource's destruction that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TeardownStage {
    /// The terminate request was rejected.
    Terminate,
    /// The resource never reported the terminated status.
    AwaitTermination,
    /// The delete request was rejected.
    Delete,
    /// An adapter panicked part way through.
    Panic,
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminate => f.write_str("terminate"),
            Self::AwaitTermination => f.write_str("await termination of"),
            Self::Delete => f.write_str("delete"),
            Self::Panic => f.write_str("tear down"),
        }
    }
}

/// Failure to destroy a single resource. Logged by the ledger, never
/// returned from [`CleanupLedger::exit`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to {stage} {resource}: {message}")]
pub struct DestructionFailed {
    /// Resource that could not be destroyed.
    pub resource: String,
    /// Step that failed.
    pub stage: TeardownStage,
    /// Underlying error message.
    pub message: String,
}

impl DestructionFailed {
    fn new(resource: &dyn Resource, stage: TeardownStage, err: &dyn fmt::Display) -> Self {
        Self {
            resource: resource.to_string(),
            stage,
            message: err.to_string(),
        }
    }
}

/// A registered resource and its retention policy.
pub struct LedgerEntry<'r> {
    resource: Box<dyn Resource + 'r>,
    retention: Retention,
}

impl<'r> LedgerEntry<'r> {
    /// The registered resource.
    #[must_use]
    pub fn resource(&self) -> &(dyn Resource + 'r) {
        self.resource.as_ref()
    }

    /// Retention flags given at registration.
    #[must_use]
    pub const fn retention(&self) -> Retention {
        self.retention
    }
}

impl fmt::Debug for LedgerEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerEntry")
            .field("resource", &self.resource.to_string())
            .field("kind", &self.resource.kind())
            .field("retention", &self.retention)
            .finish()
    }
}

/// Summary of a ledger exit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TeardownReport {
    /// Outcome the scope ended with.
    pub outcome: ScopeOutcome,
    /// Resources destroyed without error.
    pub destroyed: usize,
    /// Resources kept because of their retention flags.
    pub retained: usize,
    /// Resources whose destruction failed.
    pub failed: usize,
}

impl TeardownReport {
    const fn empty(outcome: ScopeOutcome) -> Self {
        Self {
            outcome,
            destroyed: 0,
            retained: 0,
            failed: 0,
        }
    }
}

/// Registry of resources to tear down when a scope ends.
pub struct CleanupLedger<'r> {
    id: Uuid,
    entries: Vec<LedgerEntry<'r>>,
    state: LedgerState,
    teardown: PollSettings,
}

impl<'r> CleanupLedger<'r> {
    /// Opens an empty ledger.
    ///
    /// Waiting for terminated resources is unbounded by default, so a
    /// resource stuck before `terminated` blocks the rest of the teardown.
    /// Use [`CleanupLedger::with_teardown_settings`] to bound it.
    #[must_use]
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        debug!(scope_id = %id, "opened cleanup scope");
        Self {
            id,
            entries: Vec::new(),
            state: LedgerState::Open,
            teardown: PollSettings::unbounded(DEFAULT_POLL_INTERVAL),
        }
    }

    /// Overrides how terminated resources are polled during teardown.
    #[must_use]
    pub fn with_teardown_settings(mut self, settings: PollSettings) -> Self {
        self.teardown = settings;
        self
    }

    /// Identifier attached to this scope's log lines.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LedgerState {
        self.state
    }

    /// Polling used while waiting for terminated resources.
    #[must_use]
    pub const fn teardown_settings(&self) -> PollSettings {
        self.teardown
    }

    /// Registered entries in registration order.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry<'r>] {
        &self.entries
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `resource` for teardown. Registration never fails and never
    /// deduplicates.
    pub fn register<R: Resource + 'r>(&mut self, resource: R, retention: Retention) {
        debug!(
            scope_id = %self.id,
            resource = %resource,
            kind = %resource.kind(),
            keep_on_success = retention.keep_on_success,
            keep_on_error = retention.keep_on_error,
            "registered resource for cleanup"
        );
        self.entries.push(LedgerEntry {
            resource: Box::new(resource),
            retention,
        });
    }

    /// Registers `resource` to be destroyed on both outcomes.
    pub fn register_default<R: Resource + 'r>(&mut self, resource: R) {
        self.register(resource, Retention::destroy_always());
    }

    /// Entries that an exit with `outcome` would destroy, in teardown order.
    ///
    /// Kinds are ordered by [`ResourceKind::teardown_priority`]; entries of
    /// the same priority keep their registration order.
    #[must_use]
    pub fn teardown_plan(&self, outcome: ScopeOutcome) -> Vec<&LedgerEntry<'r>> {
        let mut plan = self
            .entries
            .iter()
            .filter(|entry| !entry.retention.retains(outcome))
            .collect::<Vec<_>>();
        plan.sort_by_key(|entry| entry.resource.kind().teardown_priority());
        plan
    }

    /// Ends the scope and tears down the selected resources.
    ///
    /// Destruction failures are logged and counted, never returned.
    pub fn exit(mut self, outcome: ScopeOutcome) -> TeardownReport {
        self.close(outcome)
    }

    fn close(&mut self, outcome: ScopeOutcome) -> TeardownReport {
        if self.state != LedgerState::Open {
            return TeardownReport::empty(outcome);
        }
        self.state = LedgerState::Closing;

        let span = info_span!("cleanup_scope", scope_id = %self.id, %outcome);
        let _entered = span.enter();

        let plan = self.teardown_plan(outcome);
        let mut report = TeardownReport {
            retained: self.entries.len() - plan.len(),
            ..TeardownReport::empty(outcome)
        };
        for entry in plan {
            match destroy_isolated(entry.resource(), self.teardown) {
                Ok(()) => report.destroyed += 1,
                Err(err) => {
                    error!(error = %err, "failed to clean up resource");
                    report.failed += 1;
                }
            }
        }

        self.entries.clear();
        self.state = LedgerState::Closed;
        info!(
            destroyed = report.destroyed,
            retained = report.retained,
            failed = report.failed,
            "cleanup scope closed"
        );
        report
    }
}

impl Default for CleanupLedger<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CleanupLedger<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupLedger")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("entries", &self.entries)
            .field("teardown", &self.teardown)
            .finish()
    }
}

impl Drop for CleanupLedger<'_> {
    fn drop(&mut self) {
        if self.state == LedgerState::Open && !self.entries.is_empty() {
            warn!(
                scope_id = %self.id,
                pending = self.entries.len(),
                "cleanup ledger dropped without exit; registered resources were not torn down"
            );
        }
    }
}

/// Runs [`destroy`] so that a panicking adapter fails only its own entry.
fn destroy_isolated(
    resource: &dyn Resource,
    settings: PollSettings,
) -> Result<(), DestructionFailed> {
    panic::catch_unwind(AssertUnwindSafe(|| destroy(resource, settings))).unwrap_or_else(
        |payload| {
            Err(DestructionFailed {
                resource: resource.to_string(),
                stage: TeardownStage::Panic,
                message: panic_message(payload.as_ref()),
            })
        },
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("panicked"))
}

fn destroy(resource: &dyn Resource, settings: PollSettings) -> Result<(), DestructionFailed> {
    debug!(
        resource = %resource,
        priority = resource.kind().teardown_priority(),
        "cleaning up resource"
    );
    if let Some(terminable) = resource.as_terminable() {
        terminable
            .terminate()
            .map_err(|err| DestructionFailed::new(resource, TeardownStage::Terminate, &err))?;
        wait_for_status(resource, TERMINATED_STATUS, None, settings).map_err(|err| {
            DestructionFailed::new(resource, TeardownStage::AwaitTermination, &err)
        })?;
    }
    if let Some(deletable) = resource.as_deletable() {
        deletable
            .delete()
            .map_err(|err| DestructionFailed::new(resource, TeardownStage::Delete, &err))?;
    }
    Ok(())
}
