//! taskexec configuration types and loading

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::executor::DEFAULT_MAX_RETRIES;
use crate::lock::{Backoff, DEFAULT_LOCK_TIMEOUT};

/// Main taskexec configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding state records and lock sentinels
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,

    /// Attempts per call before giving up
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// How long to wait for a task lock
    #[serde(rename = "lock-timeout-ms")]
    pub lock_timeout_ms: u64,

    /// Lock polling schedule
    pub poll: PollConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            max_retries: DEFAULT_MAX_RETRIES,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            poll: PollConfig::default(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskexec")
        .join("state")
}

/// Lock polling schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// First sleep between lock attempts
    #[serde(rename = "initial-ms")]
    pub initial_ms: u64,

    /// Longest sleep between lock attempts
    #[serde(rename = "max-ms")]
    pub max_ms: u64,

    /// Growth factor per failed attempt (1 = fixed interval)
    pub multiplier: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        let backoff = Backoff::default();
        Self {
            initial_ms: backoff.initial.as_millis() as u64,
            max_ms: backoff.max.as_millis() as u64,
            multiplier: backoff.multiplier,
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must load. Otherwise the first readable file among
    /// [`Config::search_paths`] wins, falling back to defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).wrap_err_with(|| format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::search_paths() {
            if !candidate.is_file() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => warn!(path = ?candidate, error = %e, "Skipping unreadable config"),
            }
        }

        debug!("Config::load: no config file found, using defaults");
        Ok(Self::default())
    }

    /// `./.taskexec.yml`, then `<config_dir>/taskexec/taskexec.yml`
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".taskexec.yml")];
        paths.extend(dirs::config_dir().map(|dir| dir.join("taskexec").join("taskexec.yml")));
        paths
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).wrap_err("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).wrap_err("Failed to parse config file")?;
        debug!(?path, "Config::load_from_file: loaded");
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.poll.initial_ms),
            max: Duration::from_millis(self.poll.max_ms),
            multiplier: self.poll.multiplier.max(1),
        }
    }
}
