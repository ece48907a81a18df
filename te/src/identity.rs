//! Task identity: maps a caller-chosen task id onto its on-disk address

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::{TaskError, TaskResult};

/// Extension of the state record file
pub const STATE_EXT: &str = "json";

/// Suffix appended to the state path to form the lock sentinel
pub const LOCK_SUFFIX: &str = ".lock";

/// Marker between the state path and the nonce of a staging file
pub const TMP_MARKER: &str = ".tmp.";

/// SHA-256 hex digest of a task id
///
/// Fails with `TASK_ID` when the id is empty.
pub fn digest(task_id: &str) -> TaskResult<String> {
    if task_id.is_empty() {
        return Err(TaskError::TaskId);
    }
    let mut hasher = Sha256::new();
    hasher.update(task_id.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Where one task lives under a state directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAddress {
    /// Hex digest of the task id
    pub digest: String,
    /// `<state_dir>/<digest>.json`
    pub state_path: PathBuf,
    /// `<state_path>.lock`
    pub lock_path: PathBuf,
}

impl TaskAddress {
    /// Resolve the address of `task_id` under `state_dir`
    pub fn new(state_dir: impl AsRef<Path>, task_id: &str) -> TaskResult<Self> {
        let digest = digest(task_id)?;
        let state_path = state_dir.as_ref().join(format!("{}.{}", digest, STATE_EXT));
        let lock_path = with_suffix(&state_path, LOCK_SUFFIX);
        debug!(%task_id, %digest, "TaskAddress::new: resolved");
        Ok(Self {
            digest,
            state_path,
            lock_path,
        })
    }

    /// A fresh, unique staging path next to the state file
    pub fn staging_path(&self) -> PathBuf {
        let nonce = Uuid::now_v7().simple().to_string();
        with_suffix(&self.state_path, &format!("{}{}", TMP_MARKER, nonce))
    }

    /// Directory holding the state file
    pub fn state_dir(&self) -> &Path {
        self.state_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
