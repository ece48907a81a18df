//! External command as a task function
//!
//! Used by `te run`. A zero exit status is success; stdout becomes the task
//! result (parsed as JSON when it is JSON, otherwise kept as a trimmed string).

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::error::BoxError;
use crate::executor::TaskFn;

/// Errors from running an external command
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Runs a program with arguments, without a shell
#[derive(Debug, Clone)]
pub struct CommandTask {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandTask {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, cwd: None }
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    async fn run(&self) -> Result<Value, CommandError> {
        let (program, args) = self.argv.split_first().ok_or(CommandError::Empty)?;
        debug!(%program, ?args, "CommandTask::run: spawning");

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().await.map_err(|e| CommandError::Spawn {
            program: program.clone(),
            source: e,
        })?;

        if !output.status.success() {
            debug!(status = ?output.status, "CommandTask::run: command failed");
            return Err(CommandError::Failed {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_stdout(&output.stdout))
    }
}

#[async_trait]
impl TaskFn for CommandTask {
    async fn call(&self) -> Result<Value, BoxError> {
        Ok(self.run().await?)
    }
}

fn parse_stdout(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
