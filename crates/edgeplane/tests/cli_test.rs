//! Integration tests for the `edgeplane` CLI binary.
//!
//! Argument parsing, help output, completions, and the offline commands.
//! Nothing here binds a socket.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `edgeplane` binary with env isolation.
fn edgeplane_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("edgeplane");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("NO_COLOR", "1")
        .env_remove("EDGEPLANE_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn device_doc(lan_ip: &str) -> serde_json::Value {
    json!({
        "id": "branch-1",
        "org": "acme",
        "machineId": "M-1",
        "name": "branch-1",
        "isApproved": true,
        "isRunning": true,
        "versions": { "agent": "2.3.0", "router": "1.0.0", "dataPlane": "21.01" },
        "interfaces": [
            { "id": "wan0", "devId": "eth0", "name": "wan", "isAssigned": true, "type": "WAN",
              "ipv4": "192.168.1.10", "ipv4Mask": 24, "gateway": "192.168.1.1" },
            { "id": "lan0", "devId": "eth1", "name": "lan", "isAssigned": true, "type": "LAN",
              "ipv4": lan_ip, "ipv4Mask": 24 }
        ],
        "staticRoutes": [
            { "id": "r1", "destination": "172.16.0.0/12", "gateway": "192.168.1.1",
              "status": "complete" }
        ],
        "dhcp": [
            { "id": "d1", "interface": "eth1", "rangeStart": "10.0.0.50",
              "rangeEnd": "10.0.0.99", "status": "add-wait" }
        ],
        "sync": { "state": "synced", "hash": "abc", "trials": 0 }
    })
}

fn write_json(path: &Path, value: &serde_json::Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = edgeplane_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    edgeplane_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("serve")
            .and(predicate::str::contains("validate"))
            .and(predicate::str::contains("inventory")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    edgeplane_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("edgeplane"));
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    edgeplane_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_invalid_subcommand() {
    let home = tempfile::tempdir().unwrap();
    let output = edgeplane_cmd(home.path()).arg("foobar").output().unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("foobar"));
}

// ── validate ────────────────────────────────────────────────────────

#[test]
fn test_validate_accepts_consistent_device() {
    let home = tempfile::tempdir().unwrap();
    let doc = home.path().join("device.json");
    write_json(&doc, &device_doc("10.0.0.1"));

    edgeplane_cmd(home.path())
        .args(["validate", doc.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("interfaces").and(predicate::str::contains("dhcp eth1")));
}

#[test]
fn test_validate_rejects_dhcp_outside_lan() {
    let home = tempfile::tempdir().unwrap();
    let doc = home.path().join("device.json");
    write_json(&doc, &device_doc("10.0.5.1"));

    let output = edgeplane_cmd(home.path())
        .args(["validate", doc.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("outside"));
}

#[test]
fn test_validate_org_overlap() {
    let home = tempfile::tempdir().unwrap();
    let doc = home.path().join("device.json");
    write_json(&doc, &device_doc("10.0.0.1"));

    let mut peer = device_doc("10.0.0.1");
    peer["id"] = json!("branch-2");
    peer["machineId"] = json!("M-2");
    let org_file = home.path().join("inventory.json");
    write_json(&org_file, &json!({ "devices": [peer] }));

    let output = edgeplane_cmd(home.path())
        .args(["validate", doc.to_str().unwrap(), "--org-file", org_file.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("overlaps"));
}

#[test]
fn test_validate_missing_file() {
    let home = tempfile::tempdir().unwrap();
    edgeplane_cmd(home.path())
        .args(["validate", "/nonexistent/device.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not read"));
}

// ── inventory ───────────────────────────────────────────────────────

#[test]
fn test_inventory_table() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("inventory.json");
    write_json(&file, &json!({ "devices": [device_doc("10.0.0.1")] }));

    edgeplane_cmd(home.path())
        .args(["inventory", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("branch-1")
                .and(predicate::str::contains("synced"))
                .and(predicate::str::contains("2.3.0")),
        );
}

#[test]
fn test_inventory_json() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("inventory.json");
    write_json(&file, &json!({ "devices": [device_doc("10.0.0.1")] }));

    let output = edgeplane_cmd(home.path())
        .args(["inventory", file.to_str().unwrap(), "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["machineId"], "M-1");
    assert_eq!(parsed[0]["pending"], 1);
    assert_eq!(parsed[0]["sync"], "synced");
}

// ── config ──────────────────────────────────────────────────────────

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();
    let config = home.path().join("edgeplane.toml");
    let config_arg = config.to_str().unwrap();

    edgeplane_cmd(home.path())
        .args(["config", "init", "--config", config_arg])
        .assert()
        .success();
    assert!(config.exists());

    edgeplane_cmd(home.path())
        .args(["config", "init", "--config", config_arg])
        .assert()
        .code(6);

    edgeplane_cmd(home.path())
        .args(["config", "show", "--config", config_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("[sync]").and(predicate::str::contains("max_trials = 3")));
}

#[test]
fn test_config_path_honors_flag() {
    let home = tempfile::tempdir().unwrap();
    edgeplane_cmd(home.path())
        .args(["config", "path", "--config", "/tmp/custom-edgeplane.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/custom-edgeplane.toml"));
}

#[test]
fn test_invalid_config_is_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let config = home.path().join("edgeplane.toml");
    std::fs::write(&config, "[rpc]\ntimeout_secs = 0\n").unwrap();

    let output = edgeplane_cmd(home.path())
        .args(["config", "show", "--config", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("rpc.timeout_secs"));
}
