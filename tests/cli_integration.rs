//! CLI Integration Tests
//!
//! These tests verify that the CLI commands work correctly end-to-end.
//! They test the actual binary behavior, not just the library.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use merkle_state::{leaf_hash, Hash};
use std::process::Command;
use tempfile::tempdir;

/// Run mstate against a data dir and return (stdout, stderr, success)
fn run_mstate(args: &[&str], data_dir: &str) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_mstate"))
        .args(["-d", data_dir, "-f", "json"])
        .args(args)
        .output()
        .expect("Failed to execute mstate");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn parse(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout.trim()).expect("stdout should be JSON")
}

// ============================================================================
// Data Commands
// ============================================================================

#[test]
fn test_cli_put_and_get() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    let (stdout, _stderr, success) = run_mstate(&["put", "alice", "100"], data_dir);
    assert!(success, "put should succeed");
    let json = parse(&stdout);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["num_leaves"], 1);
    assert_eq!(json["root"], leaf_hash(b"alice", b"100").to_hex());

    let (stdout, _stderr, success) = run_mstate(&["get", "alice"], data_dir);
    assert!(success, "get should succeed");
    assert_eq!(parse(&stdout)["value"], "100");

    let (stdout, _stderr, _) = run_mstate(&["get", "bob"], data_dir);
    assert!(parse(&stdout)["value"].is_null());
}

#[test]
fn test_cli_contains() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    run_mstate(&["put", "k", "v"], data_dir);

    let (stdout, _, success) = run_mstate(&["contains", "k"], data_dir);
    assert!(success);
    assert_eq!(parse(&stdout)["exists"], true);

    let (stdout, _, _) = run_mstate(&["contains", "missing"], data_dir);
    assert_eq!(parse(&stdout)["exists"], false);
}

#[test]
fn test_cli_hex_keys() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    let (_, _, success) = run_mstate(&["--hex", "put", "00ff", "cafe"], data_dir);
    assert!(success);

    let (stdout, _, _) = run_mstate(&["--hex", "get", "00ff"], data_dir);
    assert_eq!(parse(&stdout)["value"], "cafe");

    let (_, stderr, success) = run_mstate(&["--hex", "get", "zz"], data_dir);
    assert!(!success, "invalid hex should fail");
    assert!(stderr.contains("Invalid hex"));
}

#[test]
fn test_cli_empty_key_fails() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    let (_, stderr, success) = run_mstate(&["put", "", "v"], data_dir);
    assert!(!success, "empty key should be rejected");
    assert!(stderr.contains("empty"));
}

// ============================================================================
// Inspection Commands
// ============================================================================

#[test]
fn test_cli_root_and_info() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    let (stdout, _, success) = run_mstate(&["root"], data_dir);
    assert!(success);
    assert!(parse(&stdout)["root"].is_null());

    run_mstate(&["put", "a", "1"], data_dir);
    run_mstate(&["put", "b", "2"], data_dir);

    let expected = Hash::digest_pair(
        leaf_hash(b"a", b"1").as_bytes(),
        leaf_hash(b"b", b"2").as_bytes(),
    );
    let (stdout, _, _) = run_mstate(&["root"], data_dir);
    assert_eq!(parse(&stdout)["root"], expected.to_hex());

    let (stdout, _, success) = run_mstate(&["info"], data_dir);
    assert!(success);
    let info = parse(&stdout);
    assert_eq!(info["tree"], "default");
    assert_eq!(info["num_leaves"], 2);
    assert_eq!(info["depth"], 1);
    assert_eq!(info["root_on_disk"], expected.to_hex());
    assert_eq!(info["hanging_nodes"][0]["level"], 1);
}

#[test]
fn test_cli_node() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    run_mstate(&["put", "a", "1"], data_dir);
    run_mstate(&["put", "b", "2"], data_dir);

    let leaf = leaf_hash(b"a", b"1").to_hex();
    let (stdout, _, success) = run_mstate(&["node", &leaf], data_dir);
    assert!(success);
    let node = parse(&stdout);
    assert_eq!(node["leaf"], true);
    assert!(node["parent"].is_string());

    let missing = Hash::digest(b"missing").to_hex();
    let (_, stderr, success) = run_mstate(&["node", &missing], data_dir);
    assert!(!success);
    assert!(stderr.contains("Node not found"));
}

// ============================================================================
// Tree Management
// ============================================================================

#[test]
fn test_cli_trees_are_separate() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    run_mstate(&["--tree", "first", "put", "k", "1"], data_dir);
    run_mstate(&["--tree", "second", "put", "k", "2"], data_dir);

    let (stdout, _, _) = run_mstate(&["--tree", "first", "get", "k"], data_dir);
    assert_eq!(parse(&stdout)["value"], "1");
    let (stdout, _, _) = run_mstate(&["--tree", "second", "get", "k"], data_dir);
    assert_eq!(parse(&stdout)["value"], "2");

    assert!(dir.path().join("first").is_dir());
    assert!(dir.path().join("second").is_dir());
}

#[test]
fn test_cli_invalid_tree_name() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    let (_, _, success) = run_mstate(&["--tree", "..", "root"], data_dir);
    assert!(!success, "'..' is not a valid tree name");
}

#[test]
fn test_cli_clear() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    run_mstate(&["put", "a", "1"], data_dir);
    let (stdout, _, success) = run_mstate(&["clear"], data_dir);
    assert!(success);
    assert_eq!(parse(&stdout)["status"], "ok");

    let (stdout, _, _) = run_mstate(&["info"], data_dir);
    let info = parse(&stdout);
    assert_eq!(info["num_leaves"], 0);
    assert!(info["root"].is_null());
}

#[test]
fn test_cli_text_format() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_mstate"))
        .args(["-d", data_dir, "-f", "text", "root"])
        .output()
        .expect("Failed to execute mstate");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("\"root\": null"));
}
