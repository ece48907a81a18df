//! Executor error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by task functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors that can occur while executing an idempotent task
///
/// Every variant maps to a short machine-readable code (see [`TaskError::code`]).
/// Callers should branch on the code, not on the message text.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task_id required")]
    TaskId,

    #[error("task_fn required")]
    TaskFn,

    #[error("state_dir invalid: {reason}")]
    StateDir {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("max_retries must be at least 1 (got {0})")]
    MaxRetries(u32),

    #[error("lock acquisition failed for {path}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock timeout after {waited:?} waiting for {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("task state corrupt: {path}")]
    StateCorrupt {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("task state write failed: {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task failed after {attempts} attempt(s): {source}")]
    Task {
        attempts: u32,
        #[source]
        source: BoxError,
    },
}

impl TaskError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::TaskId => "TASK_ID",
            TaskError::TaskFn => "TASK_FN",
            TaskError::StateDir { .. } => "STATE_DIR",
            TaskError::MaxRetries(_) => "MAX_RETRIES",
            TaskError::LockFailed { .. } => "LOCK_FAILED",
            TaskError::LockTimeout { .. } => "LOCK_TIMEOUT",
            TaskError::StateCorrupt { .. } => "STATE_CORRUPT",
            TaskError::WriteFailed { .. } => "WRITE_FAILED",
            TaskError::Task { .. } => "TASK_FAILED",
        }
    }

    /// Check if this error came from the task function itself
    pub fn is_task_failure(&self) -> bool {
        matches!(self, TaskError::Task { .. })
    }

    /// Check if a later call for the same task might succeed
    ///
    /// Validation and corruption errors will keep failing until someone fixes the input or the file.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::LockTimeout { .. } => true,
            TaskError::LockFailed { .. } => true,
            TaskError::WriteFailed { .. } => true,
            TaskError::Task { .. } => true,
            TaskError::TaskId
            | TaskError::TaskFn
            | TaskError::StateDir { .. }
            | TaskError::MaxRetries(_)
            | TaskError::StateCorrupt { .. } => false,
        }
    }

    /// Consume the error and return the task function's own error, if that is what failed
    pub fn into_task_error(self) -> Option<BoxError> {
        match self {
            TaskError::Task { source, .. } => Some(source),
            _ => None,
        }
    }
}
