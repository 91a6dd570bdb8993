use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A command with HOME/XDG_CONFIG_HOME pointed at a scratch dir, so tests
/// never read the developer's real global config. The tempdir must outlive
/// the command, hence the pair.
fn agent_sandbox() -> (Command, TempDir) {
    let home = tempfile::tempdir().expect("tempdir");
    let mut cmd = Command::cargo_bin("agent-sandbox").expect("binary built");
    cmd.env("HOME", home.path());
    cmd.env("XDG_CONFIG_HOME", home.path().join(".config"));
    (cmd, home)
}

#[test]
fn help_shows_the_sandbox_usage() {
    let (mut cmd, _home) = agent_sandbox();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("agent-sandbox [OPTIONS] <COMMAND>"));
}

#[test]
fn list_presets_names_every_registry_entry() {
    let (mut cmd, _home) = agent_sandbox();
    cmd.arg("--list-presets")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("@base")
                .and(predicate::str::contains("@caches"))
                .and(predicate::str::contains("@git"))
                .and(predicate::str::contains("@lint/ts"))
                .and(predicate::str::contains("@lint/go"))
                .and(predicate::str::contains("@lint/python"))
                .and(predicate::str::contains("@lint/all"))
                .and(predicate::str::contains("@all"))
                .and(predicate::str::contains("composite")),
        );
}

#[test]
fn missing_command_is_an_error() {
    let (mut cmd, _home) = agent_sandbox();
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no command specified"));
}

#[test]
fn wrap_binary_refuses_to_run_outside_the_sandbox() {
    let (mut cmd, _home) = agent_sandbox();
    cmd.args(["wrap-binary", "--preset", "@git", "git", "status"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "wrap-binary can only run inside sandbox",
        ));
}

#[test]
fn multicall_invocation_outside_the_sandbox_is_refused() {
    let bin = assert_cmd::cargo::cargo_bin("agent-sandbox");
    let dir = tempfile::tempdir().expect("tempdir");
    let alias = dir.path().join("git");
    std::os::unix::fs::symlink(&bin, &alias).expect("symlink");

    let output = std::process::Command::new(&alias)
        .arg("status")
        .output()
        .expect("run alias");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("wrap-binary can only run inside sandbox"),
        "{stderr}"
    );
}

#[test]
fn malformed_cmd_override_fails_before_launch() {
    let (mut cmd, _home) = agent_sandbox();
    cmd.args(["--cmd", "gitgit", "true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid --cmd entry"));
}

#[test]
fn preset_rule_on_the_wrong_command_key_fails_validation() {
    let (mut cmd, _home) = agent_sandbox();
    cmd.args(["--cmd", "npm=@git", "true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("preset"));
}

#[test]
fn unknown_preset_in_project_config_lists_the_registry() {
    let work = tempfile::tempdir().expect("tempdir");
    fs::write(
        work.path().join(".agent-sandbox.json"),
        r#"{ "filesystem": { "presets": ["@nope"] } }"#,
    )
    .expect("write");

    let (mut cmd, _home) = agent_sandbox();
    cmd.current_dir(work.path())
        .arg("true")
        .assert()
        .failure()
        .code(1)
        .stderr(
            predicate::str::contains("unknown preset @nope")
                .and(predicate::str::contains("@lint/python")),
        );
}

#[test]
fn duplicate_project_config_variants_abort() {
    let work = tempfile::tempdir().expect("tempdir");
    fs::write(work.path().join(".agent-sandbox.json"), "{}").expect("write");
    fs::write(work.path().join(".agent-sandbox.jsonc"), "{}").expect("write");

    let (mut cmd, _home) = agent_sandbox();
    cmd.current_dir(work.path())
        .arg("true")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("duplicate config files"));
}

#[test]
fn unknown_config_fields_are_rejected() {
    let work = tempfile::tempdir().expect("tempdir");
    fs::write(
        work.path().join(".agent-sandbox.json"),
        r#"{ "netwrok": true }"#,
    )
    .expect("write");

    let (mut cmd, _home) = agent_sandbox();
    cmd.current_dir(work.path())
        .arg("true")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn explicit_config_must_be_readable() {
    let (mut cmd, _home) = agent_sandbox();
    cmd.args(["--config", "/no/such/config.json", "true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn completion_scripts_are_generated() {
    let (mut cmd, _home) = agent_sandbox();
    cmd.args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("agent-sandbox"));
}
