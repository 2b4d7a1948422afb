//! Integration tests for the `comfortlink` CLI binary.
//!
//! Argument parsing, config file handling and error exit codes, without a
//! live portal.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `comfortlink` binary with env isolation.
fn comfortlink_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("comfortlink");
    cmd.env("HOME", "/tmp/comfortlink-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/comfortlink-cli-test-nonexistent")
        .env_remove("COMFORTLINK_CONFIG")
        .env_remove("COMFORTLINK_USERNAME")
        .env_remove("COMFORTLINK_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = comfortlink_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    comfortlink_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("check")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("set")),
    );
}

#[test]
fn test_version_flag() {
    comfortlink_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("comfortlink"));
}

#[test]
fn test_completions_zsh() {
    comfortlink_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_set_rejects_unknown_mode() {
    comfortlink_cmd()
        .args(["set", "42", "--mode", "turbo"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("turbo"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    comfortlink_cmd()
        .args(["--config", "/tmp/elsewhere/config.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/elsewhere/config.toml"));
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path_arg = path.to_str().unwrap();

    comfortlink_cmd()
        .args(["--config", path_arg, "config", "init", "--username", "user@example.com"])
        .assert()
        .success();
    assert!(path.exists());

    // A second init without --force refuses to overwrite.
    comfortlink_cmd()
        .args(["--config", path_arg, "config", "init", "--username", "other@example.com"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));

    comfortlink_cmd()
        .args(["--config", path_arg, "-o", "json", "config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("user@example.com")
                .and(predicate::str::contains("\"interval\": 300")),
        );
}

#[test]
fn test_config_show_masks_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    write_config(
        &path,
        "[account]\nusername = \"user@example.com\"\npassword = \"hunter2\"\n",
    );

    comfortlink_cmd()
        .args(["--config", path.to_str().unwrap(), "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not());
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_devices_without_username() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    write_config(&path, "[polling]\ninterval = 300\n");

    comfortlink_cmd()
        .args(["--config", path.to_str().unwrap(), "devices"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("username"));
}

#[test]
fn test_bad_timeout_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    write_config(
        &path,
        "[account]\nusername = \"user@example.com\"\ntimeout = 900\n",
    );

    comfortlink_cmd()
        .args(["--config", path.to_str().unwrap(), "check"])
        .env("COMFORTLINK_PASSWORD", "pw")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("timeout"));
}

#[test]
fn test_check_unreachable_portal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    write_config(
        &path,
        "[account]\n\
         username = \"user@example.com\"\n\
         base_url = \"http://127.0.0.1:9/portal/\"\n\
         timeout = 5\n\
         [polling]\n\
         retry_attempts = 1\n",
    );

    comfortlink_cmd()
        .args(["--config", path.to_str().unwrap(), "check"])
        .env("COMFORTLINK_PASSWORD", "pw")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("reach the portal"));
}
