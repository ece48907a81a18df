//! taskexec - filesystem-coordinated idempotent task executor
//!
//! Runs a named unit of work at most once per task id, across any number of
//! concurrent or sequential callers in one or many processes, using only the
//! local filesystem for coordination.
//!
//! # Architecture
//!
//! ```text
//! {state_dir}/
//! ├── {sha256(task_id)}.json            # completed task record
//! ├── {sha256(task_id)}.json.lock       # sentinel, present while a caller runs the task
//! └── {sha256(task_id)}.json.tmp.{id}   # staging file, only during a write
//! ```
//!
//! # Modules
//!
//! - [`identity`] - task id to on-disk address
//! - [`state`] - atomic task state records
//! - [`lock`] - exclusive-create locks with bounded waiting
//! - [`executor`] - check, lock, re-check, run with retries, persist, release
//! - [`command`] - external programs as tasks
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface
//!
//! # Example
//!
//! ```ignore
//! use taskexec::{BoxError, TaskExecutor};
//!
//! let executor = TaskExecutor::new("/var/lib/myapp/tasks")?;
//! let outcome = executor
//!     .execute("invoice.2025-01.send", &|| async { send_invoice().await.map_err(BoxError::from) })
//!     .await?;
//! if outcome.idempotent {
//!     println!("already sent: {}", outcome.result);
//! }
//! ```

pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod lock;
pub mod state;

pub use config::Config;
pub use error::{BoxError, TaskError, TaskResult};
pub use executor::{
    Blocking, DEFAULT_MAX_RETRIES, TaskExecutor, TaskFn, TaskOutcome, TaskRequest, blocking, execute_task,
};
pub use identity::TaskAddress;
pub use lock::{Backoff, DEFAULT_LOCK_TIMEOUT, LockCoordinator, LockGuard, LockWait, MIN_POLL_INTERVAL};
pub use state::{StateStore, TaskState, TaskStatus};
