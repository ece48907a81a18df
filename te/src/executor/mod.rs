//! Idempotent task execution
//!
//! - [`core`] - the executor and its outcome type
//! - [`request`] - validated single-call entry point
//! - [`task`] - the task function trait and adapters

pub mod core;
pub mod request;
pub mod task;

pub use self::core::{DEFAULT_MAX_RETRIES, TaskExecutor, TaskOutcome};
pub use request::{TaskRequest, execute_task};
pub use task::{Blocking, TaskFn, blocking};
