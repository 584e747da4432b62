//! Readiness waits against real loopback sockets.

use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use stagehand::test_support::{CallJournal, FakeResource};
use stagehand::{
    PollSettings, ReadinessProbe, ResourceKind, WaitError, wait_for_instance_ready, wait_for_port,
};

fn reserve_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind: {err}"));
    listener
        .local_addr()
        .unwrap_or_else(|err| panic!("listener addr: {err}"))
        .port()
}

#[test]
fn port_wait_retries_until_listener_appears() {
    let port = reserve_port();
    let server = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let listener =
            TcpListener::bind(("127.0.0.1", port)).unwrap_or_else(|err| panic!("rebind: {err}"));
        listener.accept().ok();
    });

    wait_for_port(
        "test listener",
        "127.0.0.1",
        port,
        PollSettings::new(Duration::from_millis(10), Duration::from_secs(5)),
    )
    .unwrap_or_else(|err| panic!("port should open: {err}"));

    server.join().unwrap_or_else(|_| panic!("listener thread panicked"));
}

#[test]
fn instance_readiness_runs_both_phases() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind: {err}"));
    let port = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("listener addr: {err}"))
        .port();
    let journal = CallJournal::new();
    let instance = FakeResource::new("i-1", ResourceKind::Instance, &journal)
        .with_statuses(["pending", "pending", "running"])
        .with_address("127.0.0.1");

    wait_for_instance_ready(
        &instance,
        &ReadinessProbe::default().with_port(port),
        PollSettings::new(Duration::from_millis(1), Duration::from_secs(5)),
    )
    .unwrap_or_else(|err| panic!("instance should be ready: {err}"));

    assert_eq!(journal.calls().len(), 3);
}

#[test]
fn port_wait_times_out_with_descriptive_error() {
    let port = reserve_port();

    let err = wait_for_port(
        "i-1",
        "127.0.0.1",
        port,
        PollSettings::new(Duration::from_millis(5), Duration::from_millis(30)),
    )
    .expect_err("nothing listens");

    assert_eq!(
        err.to_string(),
        format!("operation timed out waiting for port {port} on i-1")
    );
    assert!(matches!(err, WaitError::OperationTimedOut { .. }));
}
