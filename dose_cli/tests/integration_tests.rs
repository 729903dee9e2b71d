//! Integration tests for the dosewatch binary.
//!
//! These tests verify end-to-end behavior including:
//! - Registration and scheduling
//! - Reminder delivery through the outbox
//! - Escalation and caregiver alerts
//! - Adherence reporting

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const USER: &str = "15550001111";
const CAREGIVER: &str = "15550002222";

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// CLI bound to `data_dir` with an isolated config location
fn cli(data_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("dosewatch"));
    cmd.env("XDG_CONFIG_HOME", data_dir.join("config"))
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn at(data_dir: &Path, now: &str) -> Command {
    let mut cmd = cli(data_dir);
    cmd.arg("--now").arg(now);
    cmd
}

fn outbox(data_dir: &Path) -> Vec<serde_json::Value> {
    let path = data_dir.join("outbox.jsonl");
    if !path.exists() {
        return Vec::new();
    }
    fs::read_to_string(path)
        .expect("Failed to read outbox")
        .lines()
        .map(|l| serde_json::from_str(l).expect("Invalid outbox line"))
        .collect()
}

fn texts_to(data_dir: &Path, recipient: &str) -> Vec<String> {
    outbox(data_dir)
        .into_iter()
        .filter(|r| r["recipient"] == recipient && r["kind"] == "text")
        .map(|r| r["body"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Register Alice with one daily Aspirin and a caregiver watching her
fn setup_user(data_dir: &Path) {
    at(data_dir, "2024-03-01T06:00:00Z")
        .args(["register", "--user", USER, "--name", "Alice"])
        .args(["--wake", "07:00", "--sleep", "23:00", "--timezone", "UTC"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered Alice"));

    at(data_dir, "2024-03-01T06:00:00Z")
        .args(["add-caregiver", "--user", USER, "--name", "Bob"])
        .args(["--phone", CAREGIVER, "--watch", "Alice"])
        .assert()
        .success();

    at(data_dir, "2024-03-01T06:00:00Z")
        .args(["add-prescription", "--user", USER, "--name", "Aspirin"])
        .args(["--per-day", "1", "--count", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduled 5 doses"));
}

#[test]
fn test_cli_help() {
    let temp_dir = setup_test_dir();
    cli(temp_dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Medication reminder scheduling and escalation",
        ));
}

#[test]
fn test_register_creates_user_document() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    assert!(data_dir.join(format!("users/{}.json", USER)).exists());

    at(data_dir, "2024-03-01T06:00:00Z")
        .args(["show", "--user", USER])
        .assert()
        .success()
        .stdout(predicate::str::contains("Aspirin for Alice"))
        .stdout(predicate::str::contains("5 pills left"))
        .stdout(predicate::str::contains("2024-03-01T08:00:00+00:00"));
}

#[test]
fn test_duplicate_registration_fails() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    cli(data_dir)
        .args(["register", "--user", USER, "--name", "Alice"])
        .assert()
        .failure();
}

#[test]
fn test_tick_sends_reminder_and_reply_confirms() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    at(data_dir, "2024-03-01T07:59:00Z")
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reminders created: 1"));

    let texts = texts_to(data_dir, USER);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Aspirin"));

    at(data_dir, "2024-03-01T08:05:00Z")
        .args(["reply", "--user", USER, "D"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Marked Taken: Aspirin"));

    at(data_dir, "2024-03-01T08:06:00Z")
        .args(["confirm", "--user", USER, "--latest", "skipped"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending reminder"))
        .stdout(predicate::str::contains("Taken"));

    at(data_dir, "2024-03-01T08:06:00Z")
        .args(["show", "--user", USER])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 pills left"));
}

#[test]
fn test_unrecognized_reply_changes_nothing() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    at(data_dir, "2024-03-01T08:00:00Z").arg("tick").assert().success();
    at(data_dir, "2024-03-01T08:01:00Z")
        .args(["reply", "--user", USER, "maybe later"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reply not understood"));

    at(data_dir, "2024-03-01T08:01:00Z")
        .args(["show", "--user", USER])
        .assert()
        .success()
        .stdout(predicate::str::contains("Awaiting answer"));
}

#[test]
fn test_escalation_timeline_alerts_caregiver() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    for now in [
        "2024-03-01T08:00:00Z",
        "2024-03-01T08:20:00Z",
        "2024-03-01T08:30:00Z",
        "2024-03-01T08:40:00Z",
        "2024-03-01T09:30:00Z",
    ] {
        at(data_dir, now).arg("tick").assert().success();
    }

    assert_eq!(texts_to(data_dir, USER).len(), 3);
    let alerts = texts_to(data_dir, CAREGIVER);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("Alice"));
    assert!(alerts[0].contains("Aspirin"));

    // The auto-skipped dose keeps its pills
    at(data_dir, "2024-03-01T09:30:00Z")
        .args(["show", "--user", USER])
        .assert()
        .success()
        .stdout(predicate::str::contains("5 pills left"));
}

#[test]
fn test_call_channel_falls_back_to_text() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    cli(data_dir)
        .args(["channel", "--user", USER])
        .assert()
        .success()
        .stdout(predicate::str::contains("Call"));

    at(data_dir, "2024-03-01T08:00:00Z").arg("reminders").assert().success();

    let records = outbox(data_dir);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["kind"], "text");

    at(data_dir, "2024-03-01T08:02:00Z")
        .args(["call-input", "--user", USER, "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Marked Taken"));
}

#[test]
fn test_paused_user_gets_no_reminders() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    at(data_dir, "2024-03-01T06:30:00Z")
        .args(["status", "--user", USER, "paused"])
        .assert()
        .success();

    at(data_dir, "2024-03-01T08:00:00Z")
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reminders created: 0"));
    assert!(texts_to(data_dir, USER).is_empty());
}

#[test]
fn test_restock_reschedules() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    at(data_dir, "2024-03-01T06:30:00Z")
        .args(["restock", "--user", USER, "--prescription", "Aspirin", "--count", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduled 3 doses"));

    cli(data_dir)
        .args(["restock", "--user", USER, "--prescription", "Unknown", "--count", "3"])
        .assert()
        .failure();
}

#[test]
fn test_report_exports_csv() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    at(data_dir, "2024-03-01T08:00:00Z").arg("tick").assert().success();
    at(data_dir, "2024-03-01T08:01:00Z")
        .args(["confirm", "--user", USER, "--latest", "taken"])
        .assert()
        .success();

    let csv_path = data_dir.join("adherence.csv");
    cli(data_dir)
        .args(["report", "--user", USER, "--csv"])
        .arg(&csv_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Aspirin: 1 taken, 0 skipped"))
        .stdout(predicate::str::contains("adherence 100%"));

    let contents = fs::read_to_string(&csv_path).expect("Failed to read CSV");
    assert!(contents.starts_with("user,entry_id,prescription"));
    assert!(contents.contains(",taken,"));
}

#[test]
fn test_invalid_now_rejected() {
    let temp_dir = setup_test_dir();
    at(temp_dir.path(), "yesterday-ish")
        .arg("tick")
        .assert()
        .failure();
}

#[test]
fn test_tick_with_no_users() {
    let temp_dir = setup_test_dir();
    cli(temp_dir.path())
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 users"));
}

#[test]
fn test_first_tick_after_downtime_sends_one_reminder() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    setup_user(data_dir);

    at(data_dir, "2024-03-03T08:05:00Z")
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("Closed as too late: 2"))
        .stdout(predicate::str::contains("Reminders created: 1"))
        .stdout(predicate::str::contains("Schedules rebuilt: 1"));

    assert_eq!(texts_to(data_dir, USER).len(), 1);
    assert!(texts_to(data_dir, CAREGIVER).is_empty());
}
