//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn isolated(tmp: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("srv2ssh");
    cmd.current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env_remove("OS_CLOUD")
        .env_remove("SRV2SSH_CONFIG_PATH")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_successfully() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    isolated(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--all"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    isolated(&tmp).arg("--bogus").assert().code(1);
}

#[test]
fn missing_account_is_a_usage_error() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    isolated(&tmp)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("OS_CLOUD"));
}

#[test]
fn undefined_account_writes_nothing() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    isolated(&tmp)
        .arg("no-such-cloud")
        .assert()
        .code(2)
        .stdout("")
        .stderr(predicate::str::contains("no-such-cloud"));
    assert!(!tmp.path().join(".ssh").exists());
}
