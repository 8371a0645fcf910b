use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

const USER_ID: &str = "5f0c6d3e-8a3b-4d5e-9f1a-2b3c4d5e6f70";

fn profile_sync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("profile-sync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_LOG", "off");
    cmd
}

fn theme_event(theme: &str) -> String {
    format!(
        r#"{{"type":"theme","data":{{"theme":"{theme}"}},"timestamp":1700000000000,"source":"docs","userId":"{USER_ID}"}}"#
    )
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[test]
fn validate_accepts_a_well_formed_event() {
    let home = TempDir::new().expect("home");
    profile_sync_cmd(home.path())
        .args(["validate", &theme_event("dark")])
        .assert()
        .success()
        .stdout(contains("valid"))
        .stdout(contains("theme event from 'docs'"));
}

#[test]
fn validate_lists_every_failing_field() {
    let home = TempDir::new().expect("home");
    let raw = r#"{"type":"weather","timestamp":0,"source":"","userId":"nope"}"#;
    profile_sync_cmd(home.path())
        .args(["validate", raw])
        .assert()
        .failure()
        .stdout(contains("invalid"))
        .stdout(contains("timestamp"))
        .stdout(contains("userId"))
        .stderr(contains("failed validation"));
}

#[test]
fn validate_reads_events_from_a_file() {
    let home = TempDir::new().expect("home");
    let file = home.path().join("event.json");
    fs::write(&file, theme_event("light")).expect("write event");

    profile_sync_cmd(home.path())
        .args(["validate", &format!("@{}", file.display())])
        .assert()
        .success()
        .stdout(contains("valid"));
}

// ---------------------------------------------------------------------------
// serialize / verify
// ---------------------------------------------------------------------------

#[test]
fn serialized_events_verify_and_tampering_is_caught() {
    let home = TempDir::new().expect("home");
    let output = profile_sync_cmd(home.path())
        .args(["serialize", &theme_event("dark")])
        .output()
        .expect("run serialize");
    assert!(output.status.success());
    let mut wire = stdout_json(&output);
    assert_eq!(wire["type"], "theme");
    assert_eq!(wire["data"], r#"{"theme":"dark"}"#);
    assert!(wire["checksum"].is_string());

    let good = home.path().join("good.json");
    fs::write(&good, wire.to_string()).expect("write wire");
    profile_sync_cmd(home.path())
        .args(["verify", &format!("@{}", good.display())])
        .assert()
        .success()
        .stdout(contains("1 event(s) verified"));

    wire["data"] = Value::String(r#"{"theme":"light"}"#.to_string());
    let tampered = home.path().join("tampered.json");
    fs::write(&tampered, wire.to_string()).expect("write tampered");
    profile_sync_cmd(home.path())
        .args(["verify", &format!("@{}", tampered.display())])
        .assert()
        .failure()
        .stdout(contains("integrity"));
}

#[test]
fn verify_requires_the_sender_checksum() {
    let home = TempDir::new().expect("home");
    let output = profile_sync_cmd(home.path())
        .args(["serialize", &theme_event("dark"), "--checksum", "sha256"])
        .output()
        .expect("run serialize");
    assert!(output.status.success());
    let wire = stdout_json(&output);
    assert_eq!(wire["checksum"].as_str().map(str::len), Some(64));

    profile_sync_cmd(home.path())
        .args(["verify", &wire.to_string(), "--checksum", "sha256"])
        .assert()
        .success();
    profile_sync_cmd(home.path())
        .args(["verify", &wire.to_string()])
        .assert()
        .failure();
}

#[test]
fn serialize_rejects_invalid_events() {
    let home = TempDir::new().expect("home");
    profile_sync_cmd(home.path())
        .args(["serialize", r#"{"type":"theme"}"#])
        .assert()
        .failure()
        .stderr(contains("event failed validation"));
}

#[test]
fn unknown_checksum_is_a_usage_error() {
    let home = TempDir::new().expect("home");
    profile_sync_cmd(home.path())
        .args(["serialize", &theme_event("dark"), "--checksum", "md5"])
        .assert()
        .failure()
        .stderr(contains("unknown checksum 'md5'"));
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

#[test]
fn simulated_receivers_converge_on_the_last_change() {
    let home = TempDir::new().expect("home");
    let output = profile_sync_cmd(home.path())
        .args(["simulate", "--contexts", "3", "--events", "20", "--json"])
        .output()
        .expect("run simulate");
    assert!(output.status.success());

    let report = stdout_json(&output);
    assert_eq!(report["converged"], true);
    let contexts = report["contexts"].as_array().expect("contexts");
    assert_eq!(contexts.len(), 3);

    let sender = &contexts[0]["metrics"];
    assert_eq!(sender["received"], 0);
    let sent = sender["sent"].as_u64().expect("sent");
    assert!(sent >= 2 && sent < 20, "throttling should drop sends, got {sent}");

    for receiver in &contexts[1..] {
        assert_eq!(receiver["metrics"]["received"].as_u64(), Some(sent));
        assert_eq!(receiver["lastSeen"], report["lastTimestamp"]);
    }
}

#[test]
fn simulate_prints_a_table() {
    let home = TempDir::new().expect("home");
    profile_sync_cmd(home.path())
        .args(["simulate", "--contexts", "2", "--events", "5", "--optimized"])
        .assert()
        .success()
        .stdout(contains("context"))
        .stdout(contains("sender"))
        .stdout(contains("receiver"));
}

#[test]
fn simulate_needs_two_contexts() {
    let home = TempDir::new().expect("home");
    profile_sync_cmd(home.path())
        .args(["simulate", "--contexts", "1"])
        .assert()
        .failure()
        .stderr(contains("at least 2"));
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_defaults_without_a_file() {
    let home = TempDir::new().expect("home");
    profile_sync_cmd(home.path())
        .args(["config"])
        .assert()
        .success()
        .stdout(contains("(defaults)"))
        .stdout(contains("throttle_delay_ms: 100"));
}

#[test]
fn config_reads_the_home_file() {
    let home = TempDir::new().expect("home");
    let dir = home.path().join(".profile-sync");
    fs::create_dir_all(&dir).expect("config dir");
    fs::write(dir.join("config.yaml"), "throttle_delay_ms: 250\nchecksum: sha256\n")
        .expect("write config");

    let output = profile_sync_cmd(home.path())
        .args(["config", "--json"])
        .output()
        .expect("run config");
    assert!(output.status.success());
    let config = stdout_json(&output);
    assert_eq!(config["throttle_delay_ms"], 250);
    assert_eq!(config["checksum"], "sha256");
    assert_eq!(config["debounce_delay_ms"], 300);
}

#[test]
fn invalid_config_is_reported() {
    let home = TempDir::new().expect("home");
    let file = home.path().join("broken.yaml");
    fs::write(&file, "max_queue_size: 0\n").expect("write config");

    profile_sync_cmd(home.path())
        .args(["config", "--file"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(contains("failed to load"));
}
