//! End-to-end tests of the `wartlern` binary against a temporary data directory.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn wartlern(data: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("wartlern").unwrap_or_else(|e| panic!("binary not built: {e}"));
    cmd.arg("--data-dir")
        .arg(data.path())
        .arg("--config")
        .arg(data.path().join("wartlern.json"))
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap_or_else(|e| panic!("cannot write {name}: {e}"));
    path
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap_or_else(|e| panic!("stdout is not JSON: {e}"))
}

#[test]
fn priority_uses_keywords_without_context() {
    let data = TempDir::new().unwrap();
    let out = json_stdout(wartlern(&data).args(["priority", "urgente critico"]));
    assert_eq!(out["priority"], "HIGH");
    assert_eq!(out["source"], "lexical");

    let out = json_stdout(wartlern(&data).args(["priority", "ruido ajuste"]));
    assert_eq!(out["priority"], "MEDIUM");
}

#[test]
fn learning_persists_between_invocations() {
    let data = TempDir::new().unwrap();
    let work = write(
        data.path(),
        "work.json",
        r#"[
            {"id": 1, "category": "ELEC", "type": "correctivo", "priority": "HIGH", "assigned_technician": 7},
            {"id": 2, "category": "HIDR", "type": "preventivo", "assigned_technician": "9"}
        ]"#,
    );
    let outcome = write(
        data.path(),
        "outcome.json",
        r#"{"was_successful": true, "resolution_days": 2, "expected_cost": 100, "actual_cost": 50}"#,
    );

    let learned = json_stdout(
        wartlern(&data)
            .args(["learn", "--id", "1", "--work"])
            .arg(&work)
            .arg("--outcome")
            .arg(&outcome),
    );
    assert_eq!(learned["reward"], 18.0);
    assert_eq!(learned["action"], "technician.7");

    let stats = json_stdout(wartlern(&data).arg("stats"));
    assert_eq!(stats["total_states"], 1);
    assert_eq!(stats["total_actions"], 1);
    // Counters are per process; knowledge is what persists.
    assert_eq!(stats["metrics"]["decisions_total"], 0);
    assert!(data.path().join("wartlern.knowledge.json").exists());

    let techs = write(
        data.path(),
        "techs.json",
        r#"[{"id": 3, "rating": 5.0}, {"id": 7, "rating": 1.0}]"#,
    );
    let assigned = json_stdout(
        wartlern(&data)
            .args(["assign", "--id", "1", "--work"])
            .arg(&work)
            .arg("--technicians")
            .arg(&techs),
    );
    assert_eq!(assigned["source"], "learned");
}

#[test]
fn unknown_work_item_is_not_found() {
    let data = TempDir::new().unwrap();
    let work = write(data.path(), "work.json", r#"[{"id": 1}]"#);
    let techs = write(data.path(), "techs.json", r#"[{"id": 3, "rating": 5.0}]"#);
    wartlern(&data)
        .args(["assign", "--id", "42", "--work"])
        .arg(&work)
        .arg("--technicians")
        .arg(&techs)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found: work item 42"));
}

#[test]
fn reset_requires_confirmation() {
    let data = TempDir::new().unwrap();
    wartlern(&data)
        .arg("reset")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));

    let out = json_stdout(wartlern(&data).args(["reset", "--yes"]));
    assert_eq!(out["states_removed"], 0);
}

#[test]
fn topic_documents_are_learned() {
    let data = TempDir::new().unwrap();
    let doc = write(data.path(), "doc.txt", &"a".repeat(1_500));
    let blank = write(data.path(), "blank.txt", "  \n");
    let out = json_stdout(
        wartlern(&data)
            .args(["learn-topic", "bombas centrifugas"])
            .arg(&doc)
            .arg(&blank),
    );
    assert_eq!(out["state"], "topic_bombas_centrifugas");
    assert_eq!(out["documents_learned"], 1);
    assert_eq!(out["total_reward"], 1.5);
}

#[test]
fn training_runs_to_completion() {
    let data = TempDir::new().unwrap();
    write(
        data.path(),
        "wartlern.json",
        r#"{"training": {"epoch_delay_ms": 1}}"#,
    );
    let out = json_stdout(wartlern(&data).args(["train", "--epochs", "3", "--samples", "90"]));
    assert_eq!(out["status"], "completed");
    assert_eq!(out["current_epoch"], 3);
    assert!(out["test_accuracy"].is_number());
}

#[test]
fn training_rejects_too_few_samples() {
    let data = TempDir::new().unwrap();
    wartlern(&data)
        .args(["train", "--samples", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sample_count"));
}
