//! Behavioural tests for scoped teardown through the public API.

use std::time::Duration;

use rstest::rstest;
use stagehand::ledger::{CleanupLedger, CleanupScope, Retention, ScopeOutcome, with_cleanup};
use stagehand::test_support::{CallJournal, FakeResource};
use stagehand::{PollSettings, ResourceKind};

const FAST: PollSettings = PollSettings::unbounded(Duration::from_millis(1));

fn fake(name: &str, kind: ResourceKind, journal: &CallJournal) -> FakeResource {
    let resource = FakeResource::new(name, kind, journal);
    match kind {
        ResourceKind::Instance => resource.with_statuses(["running"]).terminable(),
        ResourceKind::Volume | ResourceKind::Snapshot | ResourceKind::Other => {
            resource.deletable()
        }
    }
}

fn kind_of(name: &str) -> ResourceKind {
    match name.split('-').next() {
        Some("i") => ResourceKind::Instance,
        Some("vol") => ResourceKind::Volume,
        Some("snap") => ResourceKind::Snapshot,
        _ => ResourceKind::Other,
    }
}

#[rstest]
#[case(&["snap-1", "vol-1", "i-1"], &["i-1", "vol-1", "snap-1"])]
#[case(&["vol-1", "i-1", "vol-2", "i-2"], &["i-1", "i-2", "vol-1", "vol-2"])]
#[case(&["dns-1", "snap-1", "dns-2", "i-1"], &["i-1", "snap-1", "dns-1", "dns-2"])]
#[case(&["vol-2", "vol-1", "vol-3"], &["vol-2", "vol-1", "vol-3"])]
fn teardown_order_is_priority_then_registration(
    #[case] registered: &[&str],
    #[case] expected: &[&str],
) {
    let journal = CallJournal::new();
    let mut ledger = CleanupLedger::new().with_teardown_settings(FAST);
    for name in registered {
        ledger.register_default(fake(name, kind_of(name), &journal));
    }

    let report = ledger.exit(ScopeOutcome::Failure);

    assert_eq!(journal.teardown_order(), expected);
    assert_eq!(report.destroyed, registered.len());
}

#[rstest]
fn image_build_keeps_snapshot_only_on_success() {
    let journal = CallJournal::new();
    let result: Result<&str, String> = with_cleanup(
        CleanupLedger::new().with_teardown_settings(FAST),
        |ledger| {
            ledger.register_default(fake("i-builder", ResourceKind::Instance, &journal));
            ledger.register_default(fake("vol-root", ResourceKind::Volume, &journal));
            ledger.register(
                fake("snap-image", ResourceKind::Snapshot, &journal),
                Retention::keep_on_success(),
            );
            Ok("snap-image")
        },
    );

    assert_eq!(result, Ok("snap-image"));
    assert_eq!(journal.teardown_order(), ["i-builder", "vol-root"]);
}

#[rstest]
fn early_return_from_a_scope_still_tears_down() {
    fn attach(volume: &str) -> Result<(), String> {
        Err(format!("attach {volume} failed"))
    }

    fn provision(journal: &CallJournal) -> Result<(), String> {
        let mut scope = CleanupScope::new(CleanupLedger::new().with_teardown_settings(FAST));
        scope.register_default(fake("vol-1", ResourceKind::Volume, journal));
        attach("vol-1")?;
        scope.finish(ScopeOutcome::Success);
        Ok(())
    }

    let journal = CallJournal::new();
    let result = provision(&journal);

    assert_eq!(result, Err(String::from("attach vol-1 failed")));
    assert_eq!(journal.teardown_order(), ["vol-1"]);
}
