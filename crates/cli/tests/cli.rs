//! Tests that drive the `st` binary and check its JSON output and exit codes

use std::process::{Command, Output};

use tempfile::TempDir;

fn st(config_dir: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_st"))
        .args(args)
        .env("STRATUS_CONFIG_DIR", config_dir.path())
        .env_remove("STRATUS_AUTH_URL")
        .env_remove("STRATUS_AUTH_USER")
        .env_remove("STRATUS_AUTH_KEY")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run st")
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON")
}

#[test]
fn test_alias_list_empty_json() {
    let dir = TempDir::new().unwrap();
    let output = st(&dir, &["alias", "list", "--json"]);

    assert!(output.status.success());
    assert_eq!(json(&output), serde_json::json!({ "aliases": [] }));
}

#[test]
fn test_alias_set_list_remove_json() {
    let dir = TempDir::new().unwrap();

    let output = st(
        &dir,
        &[
            "alias",
            "set",
            "local",
            "http://127.0.0.1:8080/auth/v1.0",
            "test:tester",
            "testing",
            "--region",
            "RegionOne",
            "--json",
        ],
    );
    assert!(output.status.success());
    let set = json(&output);
    assert_eq!(set["success"], true);
    assert_eq!(set["alias"], "local");

    let output = st(&dir, &["alias", "list", "--json"]);
    assert!(output.status.success());
    let list = json(&output);
    let aliases = list["aliases"].as_array().unwrap();
    assert_eq!(aliases.len(), 1);
    assert_eq!(aliases[0]["name"], "local");
    assert_eq!(aliases[0]["auth_user"], "test:tester");
    assert_eq!(aliases[0]["region"], "RegionOne");
    assert!(aliases[0].get("auth_key").is_none());
    assert!(!String::from_utf8_lossy(&output.stdout).contains("testing"));

    let output = st(&dir, &["alias", "remove", "local", "--json"]);
    assert!(output.status.success());
    assert_eq!(json(&output)["alias"], "local");

    let output = st(&dir, &["alias", "list", "--json"]);
    assert_eq!(json(&output)["aliases"], serde_json::json!([]));
}

#[test]
fn test_remove_missing_alias_exits_not_found() {
    let dir = TempDir::new().unwrap();
    let output = st(&dir, &["alias", "remove", "nope", "--json"]);
    assert_eq!(output.status.code(), Some(5));
}

#[test]
fn test_unknown_alias_exits_not_found() {
    let dir = TempDir::new().unwrap();
    let output = st(&dir, &["head", "nope/c/o", "--json"]);
    assert_eq!(output.status.code(), Some(5));

    let stderr: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert!(stderr["error"].as_str().unwrap().contains("nope"));
}

#[test]
fn test_path_without_object_exits_usage() {
    let dir = TempDir::new().unwrap();
    let output = st(&dir, &["get", "local/c"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_path_without_container_exits_usage() {
    let dir = TempDir::new().unwrap();
    assert_eq!(st(&dir, &["delete", "local"]).status.code(), Some(2));
    assert_eq!(st(&dir, &["get", "local", "--all-objects"]).status.code(), Some(2));
}

#[test]
fn test_container_delete_with_unknown_alias_exits_not_found() {
    let dir = TempDir::new().unwrap();
    let output = st(&dir, &["delete", "nope/c", "--recursive", "--json"]);
    assert_eq!(output.status.code(), Some(5));
}

#[test]
fn test_alias_name_with_slash_is_rejected() {
    let dir = TempDir::new().unwrap();
    let output = st(
        &dir,
        &["alias", "set", "a/b", "http://h/auth/v1.0", "u", "k"],
    );
    assert_eq!(output.status.code(), Some(2));
}
