//! Integration tests for the rdb CLI.
//!
//! Run with: `cargo test --package rudi-debug-cli --test cli_integration`

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const LOCATION: &str = r#"
kind: import
label: main
children:
  - { kind: rule, label: greet, line: 4, id: 1 }
  - kind: import
    label: sub
    line: 9
    errors:
      - type: WARNING
        message: "unused variable 'y'"
        location: { line: 5, column: 1 }
    children:
      - { kind: rule, label: bye, line: 2, id: 2 }
"#;

/// Helper to run rdb in a project directory with a clean environment.
fn run_rdb(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rdb"));
    for var in [
        "RDB_PROJECT",
        "RDB_SOURCE_ROOT",
        "RDB_LOCATION_FILE",
        "RDB_WRAPPER_FILE",
        "RDB_SNAPSHOT_DIR",
        "RDB_RUNTIME_ADDRESS",
        "RDB_CONNECT_TIMEOUT_MS",
        "RDB_BATCH_WINDOW_MS",
        "RDB_WATCH_DEBOUNCE_MS",
    ] {
        cmd.env_remove(var);
    }
    cmd.current_dir(dir)
        .args(args)
        .output()
        .expect("Failed to execute rdb command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Create a project with compiled rules under `rules/`.
fn create_project(dir: &Path, compiled: bool) {
    let rules = dir.join("rules");
    fs::create_dir_all(&rules).unwrap();
    fs::write(rules.join("main.rudi"), "// main").unwrap();
    fs::write(rules.join("sub.rudi"), "// sub").unwrap();
    if compiled {
        fs::write(rules.join("RuleLoc.yml"), LOCATION).unwrap();
    }
    fs::write(
        dir.join("rdb.json"),
        r#"{ "rule_source_root": "rules", "snapshot_dir": "snapshots" }"#,
    )
    .unwrap();
}

#[test]
fn test_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_rdb"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("snapshot"));
    assert!(text.contains("watch"));
}

#[test]
fn test_show_prints_tree_and_diagnostics() {
    let temp = TempDir::new().unwrap();
    create_project(temp.path(), true);

    let output = run_rdb(temp.path(), &["show"]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("greet #1"));
    assert!(text.contains("bye #2"));
    assert!(text.contains("Outcome:  with warnings"));
    assert!(text.contains("unused variable 'y'"));
}

#[test]
fn test_show_without_location_file() {
    let temp = TempDir::new().unwrap();
    create_project(temp.path(), false);

    let output = run_rdb(temp.path(), &[]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No compiled rules"));
}

#[test]
fn test_open_prints_file_and_line() {
    let temp = TempDir::new().unwrap();
    create_project(temp.path(), true);

    let output = run_rdb(temp.path(), &["open", "2"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.trim().ends_with("sub.rudi:2"), "{text}");

    let missing = run_rdb(temp.path(), &["open", "99"]);
    assert!(!missing.status.success());
}

#[test]
fn test_set_is_remembered_between_runs() {
    let temp = TempDir::new().unwrap();
    create_project(temp.path(), true);

    let output = run_rdb(temp.path(), &["set", "sub/bye", "always"]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("root: mixed"));

    let text = stdout(&run_rdb(temp.path(), &["show"]));
    assert!(text.contains("bye #2 (always)"), "{text}");
    let sessions: Vec<_> = std::fs::read_dir(temp.path().join("snapshots"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("session-"))
        .collect();
    assert_eq!(sessions.len(), 1);

    let rejected = run_rdb(temp.path(), &["set", "1", "mixed"]);
    assert!(!rejected.status.success());
}

#[test]
fn test_snapshot_save_list_apply() {
    let temp = TempDir::new().unwrap();
    create_project(temp.path(), true);

    run_rdb(temp.path(), &["set", "1", "if-true"]);
    let saved = run_rdb(temp.path(), &["snapshot", "save", "greeting"]);
    assert!(saved.status.success());

    run_rdb(temp.path(), &["set", "1", "never"]);
    let listed = stdout(&run_rdb(temp.path(), &["snapshot", "list"]));
    assert!(listed.contains("greeting"));

    let applied = run_rdb(temp.path(), &["snapshot", "apply", "greeting"]);
    assert!(applied.status.success());
    let text = stdout(&run_rdb(temp.path(), &["show"]));
    assert!(text.contains("greet #1 (if-true)"), "{text}");
}
