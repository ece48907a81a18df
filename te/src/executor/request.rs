//! Single-call entry point
//!
//! Collects the inputs of one executor call and validates them in order:
//! task id, task function, state directory, retry budget.
//!
//! ```ignore
//! let outcome = TaskRequest::new()
//!     .task_id("report.2025-01")
//!     .task_fn(|| async { Ok::<_, BoxError>(build_report().await?) })
//!     .state_dir("/var/lib/reports/state")
//!     .max_retries(5)
//!     .execute()
//!     .await?;
//! ```

use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::{TaskError, TaskResult};
use crate::lock::Backoff;

use super::core::{TaskExecutor, TaskOutcome};
use super::task::TaskFn;

/// Inputs of one executor call
#[derive(Default)]
pub struct TaskRequest {
    task_id: Option<String>,
    task_fn: Option<Box<dyn TaskFn>>,
    state_dir: Option<PathBuf>,
    max_retries: Option<u32>,
    lock_timeout: Option<Duration>,
    backoff: Option<Backoff>,
}

impl TaskRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn task_fn(mut self, task_fn: impl TaskFn + 'static) -> Self {
        self.task_fn = Some(Box::new(task_fn));
        self
    }

    pub fn state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Validate the inputs and run the call
    pub async fn execute(self) -> TaskResult<TaskOutcome> {
        execute_task(self).await
    }
}

/// Validate `request` and run it on a fresh executor
pub async fn execute_task(request: TaskRequest) -> TaskResult<TaskOutcome> {
    let TaskRequest {
        task_id,
        task_fn,
        state_dir,
        max_retries,
        lock_timeout,
        backoff,
    } = request;

    let task_id = task_id.filter(|id| !id.is_empty()).ok_or(TaskError::TaskId)?;
    let task_fn = task_fn.ok_or(TaskError::TaskFn)?;
    let state_dir = state_dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| TaskError::StateDir {
            reason: "state_dir required".to_string(),
            source: None,
        })?;
    debug!(%task_id, ?state_dir, "execute_task: inputs validated");

    let mut executor = TaskExecutor::new(&state_dir)?;
    if let Some(max_retries) = max_retries {
        executor = executor.with_max_retries(max_retries)?;
    }
    if let Some(lock_timeout) = lock_timeout {
        executor = executor.with_lock_timeout(lock_timeout);
    }
    if let Some(backoff) = backoff {
        executor = executor.with_backoff(backoff);
    }

    executor.execute(&task_id, task_fn.as_ref()).await
}
