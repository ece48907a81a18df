//! CLI tests for `te`
//!
//! These run the real binary, so locking is exercised across processes.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use taskexec::TaskAddress;
use tempfile::TempDir;

struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            temp.path().join("taskexec.yml"),
            "poll:\n  initial-ms: 10\n  max-ms: 50\n",
        )
        .unwrap();
        Self { temp }
    }

    fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    fn counter(&self) -> PathBuf {
        self.temp.path().join("counter")
    }

    fn te(&self) -> Command {
        let mut cmd = Command::cargo_bin("te").unwrap();
        cmd.current_dir(self.temp.path())
            .env("XDG_CONFIG_HOME", self.temp.path())
            .arg("--config")
            .arg(self.temp.path().join("taskexec.yml"))
            .arg("--state-dir")
            .arg(self.state_dir());
        cmd
    }

    /// `te run` of a shell script that appends a line to the counter file first
    fn run_counted(&self, task_id: &str, script: &str) -> Command {
        let mut cmd = self.te();
        cmd.args(["run", task_id, "--", "sh", "-c"])
            .arg(format!("echo x >> \"$0\"; {}", script))
            .arg(self.counter());
        cmd
    }

    fn counted(&self) -> usize {
        fs::read_to_string(self.counter())
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn count_files(dir: &Path, marker: &str) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().contains(marker))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_run_then_cached() {
    let ws = Workspace::new();

    let first = ws.run_counted("t1", "echo '{\"v\": 1}'").output().unwrap();
    assert!(first.status.success());
    assert_eq!(
        stdout_json(&first),
        json!({"task_id": "t1", "status": "completed", "result": {"v": 1}, "idempotent": false})
    );

    // A failing command for the same id never runs
    let second = ws.run_counted("t1", "exit 1").output().unwrap();
    assert!(second.status.success());
    assert_eq!(stdout_json(&second)["result"], json!({"v": 1}));
    assert_eq!(stdout_json(&second)["idempotent"], json!(true));

    assert_eq!(ws.counted(), 1);
}

#[test]
fn test_failing_command_reports_code() {
    let ws = Workspace::new();

    ws.run_counted("broken", "echo bad >&2; exit 4")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[TASK_FAILED]"));

    assert_eq!(ws.counted(), 3);
    assert_eq!(count_files(&ws.state_dir(), ".lock"), 0);
    assert_eq!(count_files(&ws.state_dir(), ".json"), 0);
}

#[test]
fn test_max_retries_flag() {
    let ws = Workspace::new();

    let mut cmd = ws.te();
    cmd.args(["run", "twice", "--max-retries", "2", "--", "sh", "-c", "echo x >> \"$0\"; exit 1"])
        .arg(ws.counter());
    cmd.assert().failure();

    assert_eq!(ws.counted(), 2);
}

#[test]
fn test_status_and_list() {
    let ws = Workspace::new();

    ws.te()
        .args(["status", "report"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No state for task"));

    ws.te()
        .args(["run", "report", "--", "echo", "done"])
        .assert()
        .success();

    let output = ws.te().args(["status", "report"]).output().unwrap();
    assert!(output.status.success());
    let state = stdout_json(&output);
    assert_eq!(state["task_id"], "report");
    assert_eq!(state["status"], "completed");
    assert_eq!(state["result"], "done");
    assert!(state["completed_at"].is_string());

    ws.te()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("report"));
}

#[test]
fn test_list_shows_only_completed() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.state_dir()).unwrap();
    let stale = TaskAddress::new(ws.state_dir(), "half-done").unwrap();
    fs::write(
        &stale.state_path,
        r#"{"task_id":"half-done","status":"running","completed_at":"2025-01-02T03:04:05Z"}"#,
    )
    .unwrap();

    ws.te()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No completed tasks"))
        .stdout(predicate::str::contains("half-done").not());

    ws.te()
        .args(["run", "finished", "--", "echo", "1"])
        .assert()
        .success();

    ws.te()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("finished"))
        .stdout(predicate::str::contains("half-done").not());
}

#[test]
fn test_path_prints_digest() {
    let ws = Workspace::new();
    let addr = TaskAddress::new(ws.state_dir(), "t1").unwrap();

    ws.te()
        .args(["path", "t1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(addr.digest.as_str()))
        .stdout(predicate::str::contains(".json.lock"));
}

#[test]
fn test_orphaned_lock_and_unlock() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.state_dir()).unwrap();
    let addr = TaskAddress::new(ws.state_dir(), "stuck").unwrap();
    fs::write(&addr.lock_path, "").unwrap();

    ws.te()
        .arg("locks")
        .assert()
        .success()
        .stdout(predicate::str::contains(addr.digest.as_str()));

    ws.te()
        .args(["run", "stuck", "--lock-timeout-ms", "100", "--", "echo", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[LOCK_TIMEOUT]"));
    assert!(addr.lock_path.exists());

    ws.te()
        .args(["unlock", "stuck"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed lock"));
    assert!(!addr.lock_path.exists());

    ws.te()
        .args(["run", "stuck", "--", "echo", "1"])
        .assert()
        .success();
}

#[test]
fn test_concurrent_processes_run_once() {
    let ws = Workspace::new();

    let children: Vec<_> = (0..4)
        .map(|_| {
            ws.run_counted("shared", "sleep 0.3; echo '{\"v\": 1}'")
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .unwrap()
        })
        .collect();

    let outputs: Vec<_> = children.into_iter().map(|c| c.wait_with_output().unwrap()).collect();

    assert!(outputs.iter().all(|o| o.status.success()));
    let outcomes: Vec<Value> = outputs.iter().map(stdout_json).collect();
    assert!(outcomes.iter().all(|o| o["result"] == json!({"v": 1})));
    assert_eq!(outcomes.iter().filter(|o| o["idempotent"] == json!(false)).count(), 1);
    assert_eq!(ws.counted(), 1);
    assert_eq!(count_files(&ws.state_dir(), ".lock"), 0);
    assert_eq!(count_files(&ws.state_dir(), ".tmp."), 0);
}
