//! Behavioural smoke tests for the CLI entrypoint.

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn help_lists_every_subcommand() {
    let mut cmd = cargo_bin_cmd!("stagehand");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("template")
                .and(predicate::str::contains("wait"))
                .and(predicate::str::contains("ready"))
                .and(predicate::str::contains("exec"))
                .and(predicate::str::contains("teardown")),
        );
}

#[test]
fn template_prints_merged_json() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    fs::write(tmp.path().join("main.yaml"), "Description: demo\n")
        .unwrap_or_else(|err| panic!("write main: {err}"));
    fs::write(tmp.path().join("Outputs.json"), r#"{"Url": "x"}"#)
        .unwrap_or_else(|err| panic!("write outputs: {err}"));

    let mut cmd = cargo_bin_cmd!("stagehand");
    cmd.arg("template")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#""Description": "demo""#)
                .and(predicate::str::contains(r#""Url": "x""#)),
        );
}

#[test]
fn template_reports_missing_path() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    let mut cmd = cargo_bin_cmd!("stagehand");
    cmd.arg("template")
        .arg(tmp.path().join("absent.json"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("template error"));
}

#[test]
fn wait_rejects_unknown_kind() {
    let mut cmd = cargo_bin_cmd!("stagehand");
    cmd.args(["wait", "bucket", "b-1", "--zone", "fr-par-1", "--status", "ready"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'bucket'"));
}

#[test]
fn exec_requires_a_command_after_separator() {
    let mut cmd = cargo_bin_cmd!("stagehand");
    cmd.args(["exec", "srv-1", "--zone", "fr-par-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("<COMMAND>"));
}

#[test]
fn teardown_with_zero_poll_interval_is_rejected_by_config() {
    let mut cmd = cargo_bin_cmd!("stagehand");
    cmd.env("STAGEHAND_POLL_INTERVAL_SECS", "0")
        .args(["teardown", "--volume", "vol-1", "--zone", "fr-par-1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("poll_interval_secs must be at least 1"));
}
