//! End-to-end scenarios driving the real master and worker binaries.

use std::process::Command;

fn master() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_quarry"));
    cmd.arg("--worker-bin").arg(env!("CARGO_BIN_EXE_quarry-worker"));
    cmd
}

#[test]
fn no_problems_single_worker_exits_cleanly() {
    let status = master().args(["-w", "1"]).status().expect("run master");
    assert!(status.success());
}

#[test]
fn enabled_kind_without_solver_generates_nothing() {
    // Kind 0 is reserved and has no solver, so no problems are ever
    // generated and the run behaves like an empty one.
    let status = master()
        .args(["-w", "1", "-p", "3", "-t", "0"])
        .status()
        .expect("run master");
    assert!(status.success());
}

#[test]
fn trivial_problems_three_workers() {
    let status = master()
        .args(["-w", "3", "-p", "5", "-t", "1"])
        .status()
        .expect("run master");
    assert!(status.success());
}

#[test]
fn miner_problem_with_low_difficulty() {
    let status = master()
        .args(["-w", "2", "-p", "1", "-t", "2", "--difficulty", "12", "--seed", "7"])
        .status()
        .expect("run master");
    assert!(status.success());
}

#[test]
fn aborting_workers_fail_the_run() {
    // A "worker" that exits immediately with a nonzero status must be
    // recorded as aborted and fail the whole run.
    let status = Command::new(env!("CARGO_BIN_EXE_quarry"))
        .args(["--worker-bin", "/bin/false", "-w", "2", "-p", "1", "-t", "1"])
        .status()
        .expect("run master");
    assert!(!status.success());
}

#[test]
fn audit_log_records_the_run() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let log_path = dir.path().join("audit.jsonl");

    let status = master()
        .args(["-w", "2", "-p", "2", "-t", "1"])
        .arg("--audit-log")
        .arg(&log_path)
        .status()
        .expect("run master");
    assert!(status.success());

    let raw = std::fs::read_to_string(&log_path).expect("read audit log");
    let lines: Vec<&str> = raw.lines().collect();
    assert!(!lines.is_empty());
    for line in &lines {
        let value: serde_json::Value = serde_json::from_str(line).expect("parse audit line");
        assert!(value.get("ts").is_some());
        assert!(value.get("type").is_some());
    }
    assert!(raw.contains(r#""type":"started""#));
    assert!(raw.contains(r#""type":"problem_sent""#));
    assert!(raw.contains(r#""type":"result_received""#));
    assert!(raw.contains(r#""type":"finished""#));
}
