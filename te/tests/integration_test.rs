//! Integration tests for taskexec
//!
//! End-to-end behavior of the executor against a real state directory.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use taskexec::{Backoff, BoxError, StateStore, TaskExecutor, TaskFn, TaskRequest, TaskStatus, blocking};
use tempfile::TempDir;

fn slow_counter(calls: Arc<AtomicUsize>, delay: Duration) -> impl TaskFn {
    move || {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(delay).await;
            Ok::<_, BoxError>(json!({"value": n}))
        }
    }
}

fn count_files(dir: &Path, marker: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(marker))
        .count()
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test]
async fn test_sequential_calls_run_once() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let calls = Arc::new(AtomicUsize::new(0));
    let task = slow_counter(calls.clone(), Duration::ZERO);

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        // A fresh executor per call, as separate invocations would have
        let executor = TaskExecutor::new(temp_dir.path()).unwrap();
        outcomes.push(executor.execute("test.concurrent", &task).await.unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!outcomes[0].idempotent);
    assert!(outcomes[1..].iter().all(|o| o.idempotent));
    assert!(outcomes.iter().all(|o| o.result == json!({"value": 1})));
}

#[tokio::test]
async fn test_distinct_ids_are_independent() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let executor = TaskExecutor::new(temp_dir.path()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let task = slow_counter(calls.clone(), Duration::ZERO);

    let a = executor.execute("job.a", &task).await.unwrap();
    let b = executor.execute("job.b", &task).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!a.idempotent && !b.idempotent);
    assert_ne!(a.result, b.result);
    assert_eq!(executor.store().list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_request_scenario() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let first = TaskRequest::new()
        .task_id("t1")
        .task_fn(|| async { Ok::<_, BoxError>(json!({"v": 1})) })
        .state_dir(temp_dir.path())
        .execute()
        .await
        .unwrap();

    let second = TaskRequest::new()
        .task_id("t1")
        .task_fn(blocking(|| Err::<Value, BoxError>("new implementation".into())))
        .state_dir(temp_dir.path())
        .execute()
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        json!({"task_id": "t1", "status": "completed", "result": {"v": 1}, "idempotent": false})
    );
    assert_eq!(
        serde_json::to_value(&second).unwrap(),
        json!({"task_id": "t1", "status": "completed", "result": {"v": 1}, "idempotent": true})
    );
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_run_once() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let state_dir = temp_dir.path().to_path_buf();
            let task = slow_counter(calls.clone(), Duration::from_millis(100));
            tokio::spawn(async move {
                let executor = TaskExecutor::new(&state_dir)
                    .unwrap()
                    .with_backoff(Backoff::fixed(Duration::from_millis(5)));
                executor.execute("shared", &task).await
            })
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcomes.iter().filter(|o| !o.idempotent).count(), 1);
    assert!(outcomes.iter().all(|o| o.result == json!({"value": 1})));
    assert!(outcomes.iter().all(|o| o.status == TaskStatus::Completed));
    assert_eq!(count_files(temp_dir.path(), ".lock"), 0);
    assert_eq!(count_files(temp_dir.path(), ".tmp."), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_ids_do_not_wait_on_each_other() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let state_dir = temp_dir.path().to_path_buf();
            let task = slow_counter(calls.clone(), Duration::from_millis(50));
            tokio::spawn(async move {
                // A short lock timeout: any cross-id contention would fail the call
                let executor = TaskExecutor::new(&state_dir)
                    .unwrap()
                    .with_lock_timeout(Duration::from_millis(10));
                executor.execute(&format!("job.{}", i), &task).await
            })
        })
        .collect();

    for joined in futures::future::join_all(handles).await {
        assert!(!joined.unwrap().unwrap().idempotent);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

// =============================================================================
// Persistence and failure
// =============================================================================

#[tokio::test]
async fn test_failed_call_leaves_no_trace() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let executor = TaskExecutor::new(temp_dir.path()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let err = executor
        .execute("always.fails", &move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Value, BoxError>("nope".into()) }
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), "TASK_FAILED");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(count_files(temp_dir.path(), ".lock"), 0);
    assert_eq!(count_files(temp_dir.path(), ".json"), 0);
}

#[tokio::test]
async fn test_record_is_readable_by_a_new_store() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let executor = TaskExecutor::new(temp_dir.path()).unwrap();
    let outcome = executor
        .execute("persisted", &|| async { Ok::<_, BoxError>(json!(["a", "b"])) })
        .await
        .unwrap();

    let store = StateStore::open(temp_dir.path()).unwrap();
    let addr = store.address("persisted").unwrap();
    let state = store.read(&addr).await.unwrap().expect("state should exist");

    assert_eq!(state.task_id, "persisted");
    assert_eq!(state.result, outcome.result);
    assert!(state.is_completed());
}
