//! Integration tests for the `busmod` binary.
//!
//! Argument parsing, completions and error exits run without a bus. The
//! bus-facing tests start an in-process harness on a temporary socket.
#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use busmod_api::{Event, Harness, Payload};
use predicates::prelude::*;
use serde_json::json;

const WAIT: Duration = Duration::from_secs(10);

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `busmod` binary with env isolation.
///
/// Clears the launch environment and every `BUSMOD_*` variable, and points
/// config directories at a nonexistent path so the user's settings file is
/// never read.
fn busmod_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("busmod");
    cmd.env("HOME", "/tmp/busmod-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/busmod-cli-test-nonexistent")
        .env_remove("RUST_LOG")
        .env_remove("MODULE_ID")
        .env_remove("STATE_DIR")
        .env_remove("BUS_SOCKET")
        .env_remove("MODULE_DIR")
        .env_remove("LOG_LEVEL")
        .env_remove("BUSMOD_CONFIG")
        .env_remove("BUSMOD_MODULE_ID")
        .env_remove("BUSMOD_STATE_DIR")
        .env_remove("BUSMOD_BUS_SOCKET")
        .env_remove("BUSMOD_LOG_LEVEL");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn socket_in(dir: &Path) -> String {
    dir.join("bus.sock").display().to_string()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = busmod_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    busmod_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("harness"))
            .and(predicate::str::contains("publish"))
            .and(predicate::str::contains("listen")),
    );
}

#[test]
fn test_version_flag() {
    busmod_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("busmod"));
}

#[test]
fn test_run_help_lists_overrides() {
    busmod_cmd().args(["run", "--help"]).assert().success().stdout(
        predicate::str::contains("--module-id")
            .and(predicate::str::contains("--bus-socket"))
            .and(predicate::str::contains("--require-key")),
    );
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    busmod_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    busmod_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Man pages ───────────────────────────────────────────────────────

#[test]
fn test_man_writes_pages_into_out_dir() {
    let dir = tempfile::tempdir().unwrap();
    busmod_cmd()
        .args(["man", "--out-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("busmod-run.1"));
    assert!(dir.path().join("busmod.1").exists());
    assert!(dir.path().join("busmod-harness.1").exists());
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_show_reflects_launch_env() {
    busmod_cmd()
        .args(["config", "show"])
        .env("MODULE_ID", "hue")
        .env("BUS_SOCKET", "/run/core/bus.sock")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("module_id = \"hue\"")
                .and(predicate::str::contains("bus_socket = \"/run/core/bus.sock\"")),
        );
}

#[test]
fn test_config_show_reads_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busmod.toml");
    std::fs::write(&path, "module_id = \"zigbee\"\nshutdown_grace_secs = 9\n").unwrap();

    busmod_cmd()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("module_id = \"zigbee\"")
                .and(predicate::str::contains("shutdown_grace_secs = 9")),
        );
}

#[test]
fn test_config_path_prefers_flag() {
    busmod_cmd()
        .args(["config", "path", "--config", "/etc/busmod/custom.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/etc/busmod/custom.toml"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = busmod_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success(), "Expected failure for invalid subcommand");
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_run_without_module_id_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = busmod_cmd()
        .args(["run", "--state-dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(text.contains("module_id"), "Expected module_id in error:\n{text}");
}

#[test]
fn test_run_unreachable_bus_exits_with_connection_code() {
    let dir = tempfile::tempdir().unwrap();
    let output = busmod_cmd()
        .args(["run", "--module-id", "hue", "--bus-socket", &socket_in(dir.path()), "--state-dir"])
        .arg(dir.path().join("state"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    let text = combined_output(&output);
    assert!(text.contains("connect"), "Expected connection error:\n{text}");
}

#[test]
fn test_publish_rejects_non_object_data() {
    let dir = tempfile::tempdir().unwrap();
    busmod_cmd()
        .args(["publish", "--socket", &socket_in(dir.path())])
        .args(["--topic", "commands/hue", "--type", "get_config", "--data", "[1]"])
        .assert()
        .code(2);
}

// ── Against a harness ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_publish_reaches_the_bus() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path().join("bus.sock")).unwrap();
    let mut recorder = harness.recorder();

    let socket = socket_in(dir.path());
    let status = tokio::task::spawn_blocking(move || {
        busmod_cmd()
            .args(["publish", "--socket", &socket, "--topic", "commands/hue"])
            .args(["--type", "set_config", "--data", r#"{"config":{"host":"10.0.0.2"}}"#])
            .output()
            .unwrap()
            .status
    })
    .await
    .unwrap();
    assert!(status.success());

    let event = recorder.next_matching("commands/hue", WAIT).await.unwrap();
    assert_eq!(event.kind, "set_config");
    assert_eq!(event.source.as_deref(), Some("busmod-cli"));
    assert_eq!(event.data["config"], json!({"host": "10.0.0.2"}));

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_goes_active_after_set_config() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path().join("bus.sock")).unwrap();
    let mut recorder = harness.recorder();

    let socket = socket_in(dir.path());
    let state_dir = dir.path().join("state");
    let module = tokio::task::spawn_blocking(move || {
        // The timeout kills the module once the test has seen enough.
        let _ = busmod_cmd()
            .args(["run", "--module-id", "ref", "--bus-socket", &socket, "--state-dir"])
            .arg(&state_dir)
            .timeout(Duration::from_secs(8))
            .output();
    });

    let idle = recorder
        .next_of_kind("sys/bundle_status", "bundle_status", WAIT)
        .await
        .unwrap();
    assert_eq!(idle.data["state"], "idling");

    let mut data = Payload::new();
    data.insert("config".into(), json!({"host": "10.0.0.2"}));
    harness.inject(Event::new("commands/ref", "set_config").with_data(data));

    let mut states = Vec::new();
    while states.last().map(String::as_str) != Some("active") {
        let event = recorder
            .next_of_kind("sys/bundle_status", "bundle_status", WAIT)
            .await
            .unwrap();
        states.push(event.data["state"].as_str().unwrap().to_owned());
    }
    assert_eq!(states, ["validating", "ready", "starting", "active"]);

    module.await.unwrap();
    harness.shutdown().await;
}
