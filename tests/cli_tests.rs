use std::path::Path;

use assert_cmd::Command;
use graphmeta::SqliteGraph;
use serde_json::json;
use tempfile::tempdir;

fn prepare_db(path: &Path) {
    let graph = SqliteGraph::open(path).expect("graph");
    let mut tx = graph.begin().expect("begin");
    let a = tx
        .create_entity(&["Person", "Employee"], &[("name", json!("Ada"))])
        .expect("a");
    let b = tx.create_entity(&["Person"], &[]).expect("b");
    tx.create_relationship(b, a, "REPORTS_TO").expect("edge");
    tx.commit().expect("commit");
}

fn graphmeta(db: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_graphmeta"));
    cmd.arg("--db").arg(db);
    cmd
}

#[test]
fn test_cli_exits_with_success_on_help() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_graphmeta"));
    cmd.arg("--help");
    cmd.assert().success();
}

#[test]
fn test_cli_status_on_fresh_database() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("fresh.db");
    let output = graphmeta(&db).arg("status").output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("entities=0"));
    assert!(stdout.contains("record=none"));
}

#[test]
fn test_cli_recount_then_verify_is_clean() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("graph.db");
    prepare_db(&db);

    let output = graphmeta(&db)
        .args(["--format", "json", "recount"])
        .output()
        .expect("recount");
    assert!(output.status.success());
    let record: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(record["counts"].as_object().expect("counts").len(), 2);
    assert!(record["properties"]["Employee"].is_array());

    graphmeta(&db).arg("verify").assert().success();
}

#[test]
fn test_cli_verify_reports_drift() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("graph.db");
    prepare_db(&db);
    graphmeta(&db).arg("recount").assert().success();

    {
        let graph = SqliteGraph::open(&db).expect("graph");
        let mut tx = graph.begin().expect("begin");
        tx.create_entity(&["Robot"], &[]).expect("robot");
        tx.commit().expect("commit");
    }

    let output = graphmeta(&db).arg("verify").output().expect("verify");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("{Robot}"));
}

#[test]
fn test_cli_show_lists_label_sets() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("graph.db");
    prepare_db(&db);
    graphmeta(&db).arg("recount").assert().success();

    let output = graphmeta(&db).arg("show").output().expect("show");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("{Employee,Person} count=1 relations=1"));
    assert!(stdout.contains("{Person} count=1 relations=0"));
    assert!(stdout.contains("Employee: name"));
}

#[test]
fn test_cli_recount_writes_snapshot() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("graph.db");
    let cache = dir.path().join("cache");
    prepare_db(&db);

    graphmeta(&db)
        .arg("recount")
        .arg("--cache-dir")
        .arg(&cache)
        .assert()
        .success();
    assert!(cache.join("metadata.json").exists());
}
