//! CLI argument parsing for taskexec

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "te")]
#[command(author, version, about = "Run tasks at most once, coordinated through the filesystem", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// State directory (overrides config)
    #[arg(short = 'd', long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command as an idempotent task and print the outcome as JSON
    Run {
        /// Task ID
        #[arg(required = true)]
        task_id: String,

        /// Attempts before giving up (default: 3)
        #[arg(short = 'r', long)]
        max_retries: Option<u32>,

        /// Lock wait timeout in milliseconds (default: 600000)
        #[arg(short = 't', long)]
        lock_timeout_ms: Option<u64>,

        /// Program and arguments, after `--`
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },

    /// Print the stored state of a task
    Status {
        /// Task ID
        #[arg(required = true)]
        task_id: String,
    },

    /// Print the on-disk paths of a task
    Path {
        /// Task ID
        #[arg(required = true)]
        task_id: String,
    },

    /// List completed tasks
    List,

    /// List lock files currently on disk
    Locks,

    /// Remove an orphaned lock file left by a crashed holder
    Unlock {
        /// Task ID
        #[arg(required = true)]
        task_id: String,
    },
}
