use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};

use taskexec::cli::{Cli, Command};
use taskexec::command::CommandTask;
use taskexec::config::Config;
use taskexec::identity::TaskAddress;
use taskexec::{StateStore, TaskError, TaskExecutor, lock};

fn setup_logging(verbose: bool) -> Result<()> {
    // Logs go to stderr; stdout is reserved for results
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("{}", e))?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.verbose) {
        eprintln!("Failed to setup logging: {:#}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<TaskError>() {
                Some(task_err) => eprintln!("{} {}", format!("error[{}]:", task_err.code()).red(), task_err),
                None => eprintln!("{} {:#}", "error:".red(), e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    debug!(state_dir = ?config.state_dir, "taskexec configured");

    match cli.command {
        Command::Run {
            task_id,
            max_retries,
            lock_timeout_ms,
            command,
        } => {
            if let Some(max_retries) = max_retries {
                config.max_retries = max_retries;
            }
            if let Some(lock_timeout_ms) = lock_timeout_ms {
                config.lock_timeout_ms = lock_timeout_ms;
            }
            let executor = TaskExecutor::from_config(&config)?;
            let task = CommandTask::new(command);

            info!(%task_id, "Running task");
            let outcome = executor.execute(&task_id, &task).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Status { task_id } => {
            let store = StateStore::open(&config.state_dir)?;
            let addr = store.address(&task_id)?;
            match store.read(&addr).await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => return Err(eyre::eyre!("No state for task: {}", task_id)),
            }
        }
        Command::Path { task_id } => {
            let addr = TaskAddress::new(&config.state_dir, &task_id)?;
            println!("digest: {}", addr.digest);
            println!("state:  {}", addr.state_path.display());
            println!("lock:   {}", addr.lock_path.display());
        }
        Command::List => {
            let store = StateStore::open(&config.state_dir)?;
            let states = store.list_completed().await?;
            if states.is_empty() {
                println!("No completed tasks");
            } else {
                for state in states {
                    println!(
                        "{} {} {}",
                        state.completed_at.to_rfc3339().dimmed(),
                        state.status.to_string().green(),
                        state.task_id.cyan()
                    );
                }
            }
        }
        Command::Locks => {
            let locks = lock::list_locks(&config.state_dir).await?;
            if locks.is_empty() {
                println!("No locks held");
            } else {
                for info in locks {
                    println!(
                        "{} {}",
                        format_age(info.age).yellow(),
                        info.path.display().to_string().cyan()
                    );
                }
            }
        }
        Command::Unlock { task_id } => {
            let addr = TaskAddress::new(&config.state_dir, &task_id)?;
            if lock::reap(&addr).await? {
                println!("{} Removed lock for task: {}", "✓".green(), task_id.cyan());
            } else {
                println!("No lock for task: {}", task_id);
            }
        }
    }

    Ok(())
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
