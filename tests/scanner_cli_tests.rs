//! End-to-end tests for the demorar scanner CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn demorar() -> Command {
    Command::cargo_bin("demorar").unwrap()
}

#[test]
fn test_clean_file_exits_zero() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("clean.rs");
    fs::write(
        &file,
        "async fn run() {\n    wait_all(vec![spawn_task(job())]).await;\n}\n",
    )
    .unwrap();

    demorar()
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 finding(s)"));
}

#[test]
fn test_deprecated_only_exits_zero_but_reports() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("soft.rs");
    fs::write(&file, "fn run() {\n    ensure_spawned(job());\n}\n").unwrap();

    demorar()
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("ensure-spawned"))
        .stdout(predicate::str::contains("deprecated"));
}

#[test]
fn test_removed_soon_exits_nonzero() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("hard.rs");
    fs::write(&file, "fn run() {\n    wait_for(job(), limit, sched);\n}\n").unwrap();

    demorar()
        .arg(&file)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("explicit-scheduler-arg"));
}

#[test]
fn test_design_error_exits_nonzero() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("mixed.rs");
    fs::write(
        &file,
        "use legacy::coroutine as co;\n\n#[co]\nfn slow() {\n    yield_from!(sleep(1));\n}\n",
    )
    .unwrap();

    demorar()
        .arg(&file)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("legacy-coroutine"))
        .stdout(predicate::str::contains("design-error"));
}

#[test]
fn test_json_mode_structured_records() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("scan.rs");
    fs::write(&file, "fn run() {\n    Task::all_tasks();\n}\n").unwrap();

    let output = demorar()
        .args(["--format", "json"])
        .arg(&file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["format"], "demorar-json-v1");
    let findings = report["findings"].as_array().unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0]["signature_id"], "task-all-tasks");
    assert_eq!(findings[0]["line"], 2);
    assert_eq!(findings[0]["column"], 5);
    assert_eq!(findings[0]["severity"], "deprecated");
    assert!(findings[0]["recommendation"]
        .as_str()
        .unwrap()
        .contains("all_tasks()"));
}

#[test]
fn test_malformed_file_in_batch_is_isolated() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.rs"), "fn a() { ensure_spawned(x()); }\n").unwrap();
    fs::write(dir.path().join("b.rs"), "fn broken( {\n").unwrap();
    fs::write(dir.path().join("c.rs"), "fn c() { Task::current_task(); }\n").unwrap();

    let output = demorar()
        .args(["--format", "json"])
        .arg(dir.path())
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["parse_errors"].as_array().unwrap().len(), 1);
    assert_eq!(report["findings"].as_array().unwrap().len(), 2);
}

#[test]
fn test_repeated_scans_are_identical() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("same.rs");
    fs::write(
        &file,
        "fn run() {\n    ensure_spawned(a());\n    sleep(d, sched);\n}\n",
    )
    .unwrap();

    let run = || {
        demorar()
            .args(["--format", "json"])
            .arg(&file)
            .assert()
            .get_output()
            .stdout
            .clone()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_list_signatures() {
    demorar()
        .arg("--list-signatures")
        .assert()
        .success()
        .stdout(predicate::str::contains("legacy-coroutine"))
        .stdout(predicate::str::contains("raw-future-wait"))
        .stdout(predicate::str::contains("origin-tracking-toggle"));
}

#[test]
fn test_no_paths_is_usage_error() {
    demorar()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no input paths"));
}
