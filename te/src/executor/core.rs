//! Idempotent task executor
//!
//! One call walks `UNLOCKED → LOCK_PENDING → LOCKED → EXECUTING → PERSISTED`
//! and back to `UNLOCKED`:
//!
//! 1. recreate the state directory if needed, then probe the state store; a
//!    completed record is returned without locking
//! 2. wait for the task lock, re-probing before every attempt
//! 3. re-read the state under the lock (another holder may have just finished)
//! 4. run the task, retrying up to `max_retries` attempts
//! 5. persist the completed record atomically
//! 6. release the lock on every exit path

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{TaskError, TaskResult};
use crate::identity::TaskAddress;
use crate::lock::{Backoff, DEFAULT_LOCK_TIMEOUT, LockCoordinator, LockWait};
use crate::state::{StateStore, TaskState, TaskStatus};

use super::task::TaskFn;

/// Default number of attempts per call
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Successful result of an executor call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Value,
    /// True when the result came from an earlier completion instead of this call
    pub idempotent: bool,
}

impl TaskOutcome {
    fn from_state(state: TaskState, idempotent: bool) -> Self {
        Self {
            task_id: state.task_id,
            status: state.status,
            result: state.result,
            idempotent,
        }
    }
}

/// Runs tasks at most once per task id under a state directory
///
/// Holds no state between calls besides its settings; everything shared lives
/// on disk, so any number of executors in any number of processes can point at
/// the same directory.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    store: StateStore,
    locks: LockCoordinator,
    max_retries: u32,
    lock_timeout: Duration,
}

impl TaskExecutor {
    /// Executor with default settings, creating `state_dir` if missing
    pub fn new(state_dir: impl AsRef<Path>) -> TaskResult<Self> {
        Ok(Self {
            store: StateStore::open(state_dir)?,
            locks: LockCoordinator::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Executor configured from `config`
    pub fn from_config(config: &Config) -> TaskResult<Self> {
        debug!(state_dir = ?config.state_dir, "TaskExecutor::from_config: called");
        Ok(Self::new(&config.state_dir)?
            .with_max_retries(config.max_retries)?
            .with_lock_timeout(config.lock_timeout())
            .with_backoff(config.backoff()))
    }

    /// Set the attempt budget; must be at least 1
    pub fn with_max_retries(mut self, max_retries: u32) -> TaskResult<Self> {
        if max_retries == 0 {
            return Err(TaskError::MaxRetries(max_retries));
        }
        self.max_retries = max_retries;
        Ok(self)
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.locks = LockCoordinator::new(backoff);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Run `task_fn` for `task_id` unless it already completed
    ///
    /// Returns the stored result with `idempotent = true` when a completed
    /// record exists (before or after waiting for the lock). Otherwise runs
    /// the task, persists its result and returns it with `idempotent = false`.
    /// When every attempt fails the last task error is returned as `TASK_FAILED`
    /// and nothing is persisted.
    pub async fn execute(&self, task_id: &str, task_fn: &dyn TaskFn) -> TaskResult<TaskOutcome> {
        debug!(%task_id, "TaskExecutor::execute: called");
        let addr = self.store.address(task_id)?;
        self.store.ensure_dir().await?;

        // The probe runs before the first lock attempt, so duplicate calls never touch the lock
        let probe = || self.store.read_completed(&addr);
        let guard = match self.locks.acquire_or(&addr, self.lock_timeout, probe).await? {
            LockWait::Resolved(state) => {
                info!(%task_id, "Task already completed, returning stored result");
                return Ok(TaskOutcome::from_state(state, true));
            }
            LockWait::Acquired(guard) => guard,
        };

        let outcome = self.run_locked(&addr, task_id, task_fn).await;
        guard.release().await;
        outcome
    }

    async fn run_locked(&self, addr: &TaskAddress, task_id: &str, task_fn: &dyn TaskFn) -> TaskResult<TaskOutcome> {
        if let Some(state) = self.store.read_completed(addr).await? {
            info!(%task_id, "Task completed while waiting for lock, returning stored result");
            return Ok(TaskOutcome::from_state(state, true));
        }

        let result = self.call_with_retries(task_id, task_fn).await?;
        let state = TaskState::completed(task_id, result);
        self.store.write(addr, &state).await?;

        info!(%task_id, "Task executed");
        Ok(TaskOutcome::from_state(state, false))
    }

    async fn call_with_retries(&self, task_id: &str, task_fn: &dyn TaskFn) -> TaskResult<Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(%task_id, attempt, "TaskExecutor::call_with_retries: calling task");
            match task_fn.call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries => {
                    warn!(%task_id, attempt, max_retries = self.max_retries, error = %e, "Task attempt failed, retrying");
                }
                Err(e) => {
                    warn!(%task_id, attempt, error = %e, "Task failed, retries exhausted");
                    return Err(TaskError::Task {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}
