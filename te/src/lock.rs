//! Cross-process task locks built on exclusive file creation
//!
//! A lock is the existence of `<state file>.lock`. Creating it with
//! `create_new` is atomic for a single path, so at most one caller wins.
//! Losers sleep with bounded exponential backoff and try again until the
//! deadline. A holder that crashes leaves the sentinel behind; it is only
//! removed by an operator (see [`reap`]).

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::error::{TaskError, TaskResult};
use crate::identity::{LOCK_SUFFIX, TaskAddress};

/// Default lock acquisition timeout (10 minutes)
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Floor for any single sleep between lock attempts
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Sleep schedule between lock attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Sleep after the first failed attempt
    pub initial: Duration,
    /// Upper bound for any single sleep
    pub max: Duration,
    /// Growth factor per failed attempt
    pub multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl Backoff {
    /// A fixed-interval schedule
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            multiplier: 1,
        }
    }

    /// Delay after `attempt` failed attempts (0-indexed), never below [`MIN_POLL_INTERVAL`]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_mul(self.multiplier.saturating_pow(attempt))
            .min(self.max)
            .max(MIN_POLL_INTERVAL)
    }
}

/// A held task lock
///
/// Prefer [`LockGuard::release`]. Dropping an unreleased guard removes the
/// sentinel synchronously, so it is also gone after unwinding or cancellation.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the sentinel file. Failures are logged and swallowed.
    pub async fn release(mut self) {
        self.released = true;
        log_release(&self.path, tokio::fs::remove_file(&self.path).await);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            log_release(&self.path, std::fs::remove_file(&self.path));
        }
    }
}

fn log_release(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(?path, "LockGuard: released"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(?path, "LockGuard: sentinel already gone");
        }
        Err(e) => warn!(?path, error = %e, "Failed to release task lock"),
    }
}

/// Outcome of waiting for a lock while probing for an early exit
#[derive(Debug)]
pub enum LockWait<T> {
    /// The lock is ours
    Acquired(LockGuard),
    /// The probe resolved before the lock was taken
    Resolved(T),
}

/// Acquires task locks under a backoff schedule
#[derive(Debug, Clone, Default)]
pub struct LockCoordinator {
    backoff: Backoff,
}

impl LockCoordinator {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Try to create the sentinel once
    ///
    /// `Ok(None)` means someone else holds the lock. Any other filesystem
    /// error is `LOCK_FAILED`.
    pub async fn try_acquire(&self, addr: &TaskAddress) -> TaskResult<Option<LockGuard>> {
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&addr.lock_path)
            .await;
        match created {
            Ok(_file) => {
                debug!(path = ?addr.lock_path, "LockCoordinator::try_acquire: acquired");
                Ok(Some(LockGuard {
                    path: addr.lock_path.clone(),
                    released: false,
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(TaskError::LockFailed {
                path: addr.lock_path.clone(),
                source: e,
            }),
        }
    }

    /// Wait up to `timeout` for the lock
    pub async fn acquire(&self, addr: &TaskAddress, timeout: Duration) -> TaskResult<LockGuard> {
        let never = || async { Ok::<Option<Infallible>, TaskError>(None) };
        match self.acquire_or(addr, timeout, never).await? {
            LockWait::Acquired(guard) => Ok(guard),
            LockWait::Resolved(never) => match never {},
        }
    }

    /// Wait up to `timeout` for the lock, calling `probe` before every attempt
    ///
    /// If the probe yields a value the wait ends with [`LockWait::Resolved`]
    /// and no lock is taken. The probe also runs once more after the deadline
    /// passes, before `LOCK_TIMEOUT` is returned. Probe errors end the wait.
    pub async fn acquire_or<T, F, Fut>(&self, addr: &TaskAddress, timeout: Duration, mut probe: F) -> TaskResult<LockWait<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TaskResult<Option<T>>>,
    {
        debug!(path = ?addr.lock_path, ?timeout, "LockCoordinator::acquire_or: called");
        let start = Instant::now();
        let deadline = start + timeout;
        let mut attempt = 0u32;

        loop {
            if let Some(value) = probe().await? {
                debug!("LockCoordinator::acquire_or: probe resolved");
                return Ok(LockWait::Resolved(value));
            }

            if let Some(guard) = self.try_acquire(addr).await? {
                return Ok(LockWait::Acquired(guard));
            }

            let now = Instant::now();
            if now >= deadline {
                if let Some(value) = probe().await? {
                    debug!("LockCoordinator::acquire_or: probe resolved at deadline");
                    return Ok(LockWait::Resolved(value));
                }
                warn!(path = ?addr.lock_path, attempts = attempt + 1, "Lock wait timed out");
                return Err(TaskError::LockTimeout {
                    path: addr.lock_path.clone(),
                    waited: now - start,
                });
            }

            let delay = self.backoff.delay(attempt).min(deadline - now);
            debug!(attempt, ?delay, "LockCoordinator::acquire_or: lock held elsewhere, sleeping");
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
        }
    }
}

/// A lock sentinel found on disk
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// Path of the sentinel
    pub path: PathBuf,
    /// Digest of the task the lock belongs to
    pub digest: String,
    /// Time since the sentinel was last modified
    pub age: Duration,
}

/// List every lock sentinel under `state_dir`
pub async fn list_locks(state_dir: &Path) -> TaskResult<Vec<LockInfo>> {
    debug!(?state_dir, "list_locks: called");
    let dir_err = |e: io::Error| TaskError::StateDir {
        reason: format!("cannot read {}", state_dir.display()),
        source: Some(e),
    };

    let mut entries = tokio::fs::read_dir(state_dir).await.map_err(dir_err)?;
    let mut locks = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(state_name) = name.strip_suffix(LOCK_SUFFIX) else {
            continue;
        };
        let digest = state_name.split('.').next().unwrap_or(state_name).to_string();

        // The holder may release between read_dir and metadata
        let age = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now().duration_since(modified).unwrap_or_default(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(_) => Duration::ZERO,
        };

        locks.push(LockInfo {
            path: entry.path(),
            digest,
            age,
        });
    }

    locks.sort_by(|a, b| b.age.cmp(&a.age));
    Ok(locks)
}

/// Remove the lock sentinel at `addr` regardless of who holds it
///
/// Only for operator cleanup of orphans left by crashed holders. Returns
/// whether a sentinel was removed.
pub async fn reap(addr: &TaskAddress) -> TaskResult<bool> {
    match tokio::fs::remove_file(&addr.lock_path).await {
        Ok(()) => {
            info!(path = ?addr.lock_path, "Reaped task lock");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TaskError::LockFailed {
            path: addr.lock_path.clone(),
            source: e,
        }),
    }
}
