//! Durable task state records
//!
//! One pretty-printed JSON file per completed task. Writes stage the full
//! record in a uniquely named sibling file and rename it into place, so a
//! reader sees either the previous record or the new one, never a torn file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{TaskError, TaskResult};
use crate::identity::{STATE_EXT, TaskAddress};

/// Status of a persisted task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    /// The task ran to completion and its result is final
    Completed,
    /// Anything else found on disk; never short-circuits execution
    Other(String),
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => TaskStatus::Completed,
            _ => TaskStatus::Other(s),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.to_string()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Persisted record of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// Caller-chosen task id
    pub task_id: String,
    /// Record status
    pub status: TaskStatus,
    /// Opaque task result
    #[serde(default)]
    pub result: Value,
    /// When the task completed; records without one read as the Unix epoch
    #[serde(default, alias = "completed_at_utc")]
    pub completed_at: DateTime<Utc>,
}

impl TaskState {
    /// A completed record stamped with the current time
    pub fn completed(task_id: impl Into<String>, result: Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            result,
            completed_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// File-backed store of task state records
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    /// Open a store rooted at `state_dir`, creating the directory if missing
    pub fn open(state_dir: impl AsRef<Path>) -> TaskResult<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        if state_dir.as_os_str().is_empty() {
            return Err(TaskError::StateDir {
                reason: "path is empty".to_string(),
                source: None,
            });
        }
        fs::create_dir_all(&state_dir).map_err(|e| TaskError::StateDir {
            reason: format!("cannot create {}", state_dir.display()),
            source: Some(e),
        })?;
        if !state_dir.is_dir() {
            return Err(TaskError::StateDir {
                reason: format!("{} is not a directory", state_dir.display()),
                source: None,
            });
        }
        debug!(?state_dir, "StateStore::open: opened");
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Recreate the state directory if it was removed after [`StateStore::open`]
    pub async fn ensure_dir(&self) -> TaskResult<()> {
        debug!(state_dir = ?self.state_dir, "StateStore::ensure_dir: called");
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| TaskError::StateDir {
                reason: format!("cannot create {}", self.state_dir.display()),
                source: Some(e),
            })
    }

    /// Address of `task_id` in this store
    pub fn address(&self, task_id: &str) -> TaskResult<TaskAddress> {
        TaskAddress::new(&self.state_dir, task_id)
    }

    /// Read the record at `addr`
    ///
    /// Returns `Ok(None)` only when no file exists. An unreadable or unparseable
    /// file is `STATE_CORRUPT`, never "absent".
    pub async fn read(&self, addr: &TaskAddress) -> TaskResult<Option<TaskState>> {
        debug!(path = ?addr.state_path, "StateStore::read: called");
        read_state_file(&addr.state_path).await
    }

    /// Read the record at `addr` and keep it only if it is completed
    pub async fn read_completed(&self, addr: &TaskAddress) -> TaskResult<Option<TaskState>> {
        Ok(self.read(addr).await?.filter(TaskState::is_completed))
    }

    /// Atomically persist `state` at `addr`
    pub async fn write(&self, addr: &TaskAddress, state: &TaskState) -> TaskResult<()> {
        debug!(path = ?addr.state_path, task_id = %state.task_id, "StateStore::write: called");
        let tmp_path = addr.staging_path();

        if let Err(e) = stage_and_rename(&tmp_path, &addr.state_path, state).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                warn!(?tmp_path, error = %cleanup, "StateStore::write: failed to remove staging file");
            }
            return Err(TaskError::WriteFailed {
                path: addr.state_path.clone(),
                source: e,
            });
        }

        info!(task_id = %state.task_id, path = ?addr.state_path, "Task state persisted");
        Ok(())
    }

    /// Every state record in the store, sorted by completion time then task id
    ///
    /// Staging and lock files are ignored. Corrupt records fail the listing.
    pub async fn list(&self) -> TaskResult<Vec<TaskState>> {
        debug!(state_dir = ?self.state_dir, "StateStore::list: called");
        let dir_err = |e: io::Error| TaskError::StateDir {
            reason: format!("cannot read {}", self.state_dir.display()),
            source: Some(e),
        };

        let mut entries = tokio::fs::read_dir(&self.state_dir).await.map_err(dir_err)?;
        let mut states = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if path.extension().map(|e| e == STATE_EXT).unwrap_or(false)
                && is_file
                && let Some(state) = read_state_file(&path).await?
            {
                states.push(state);
            }
        }

        states.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        debug!(count = states.len(), "StateStore::list: returning states");
        Ok(states)
    }

    /// Only the completed records, in [`StateStore::list`] order
    pub async fn list_completed(&self) -> TaskResult<Vec<TaskState>> {
        let mut states = self.list().await?;
        states.retain(TaskState::is_completed);
        Ok(states)
    }
}

async fn read_state_file(path: &Path) -> TaskResult<Option<TaskState>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TaskError::StateCorrupt {
                path: path.to_path_buf(),
                source: Box::new(e),
            });
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| TaskError::StateCorrupt {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
}

async fn stage_and_rename(tmp_path: &Path, final_path: &Path, state: &TaskState) -> io::Result<()> {
    let content = serde_json::to_string_pretty(state)?;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(tmp_path, final_path).await
}
