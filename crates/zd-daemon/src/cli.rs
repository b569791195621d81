//! `zd` command line.

use crate::config::ZdConfig;
use crate::daemon::{load_tasks, Daemon};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zd_core::schedule::minute_of;
use zd_core::{Scheduler, StorageBackend, Task, TickReport, ZfsBackend};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "zd")]
#[command(about = "ZFS snapshot, replication and scrub scheduler", long_about = None)]
pub struct Cli {
    /// Configuration file (.yaml, .yml, .toml or .json).
    #[arg(short, long, default_value = "zd.yaml", env = "ZD_CONFIG")]
    pub config: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Path of the `zfs` binary.
    #[arg(long, default_value = "zfs", env = "ZD_ZFS")]
    pub zfs: String,

    /// Path of the `zpool` binary.
    #[arg(long, default_value = "zpool", env = "ZD_ZPOOL")]
    pub zpool: String,

    /// Path of the `ssh` binary used for remote hosts.
    #[arg(long, default_value = "ssh", env = "ZD_SSH")]
    pub ssh: String,

    /// Subcommand, `run` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What `zd` should do.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the scheduler until interrupted (default).
    Run,
    /// Validate the configuration and list the tasks.
    Check,
    /// Evaluate the current minute once and print the report as JSON.
    Tick {
        /// Run every task regardless of its schedule.
        #[arg(long)]
        force: bool,
    },
}

/// Log line format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
    }
}

/// One-line description of a task for `zd check`.
pub fn describe(task: &Task) -> String {
    let mut line = format!(
        "{} {} {} at {:?}",
        task.kind, task.target, task.cadence, task.when
    );
    if task.kind.snapshots() {
        line.push_str(&format!(" keep {}", task.retention));
    }
    if task.recursive {
        line.push_str(" recursive");
    }
    if task.raw {
        line.push_str(" raw");
    }
    if !task.to.is_empty() {
        let to: Vec<String> = task.to.iter().map(ToString::to_string).collect();
        line.push_str(&format!(" to {}", to.join(", ")));
    }
    line
}

/// Evaluate the minute containing `now` once, or every task when `force`
/// is set. Keeps no last-tick state, so each call runs.
pub async fn evaluate(scheduler: &Scheduler, now: DateTime<Utc>, force: bool) -> TickReport {
    if force {
        return scheduler.run_all(now).await;
    }
    let minute = minute_of(now);
    scheduler.run(minute, scheduler.due_at(minute)).await
}

impl Cli {
    fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::new(ZfsBackend::with_paths(
            self.zfs.clone(),
            self.zpool.clone(),
            self.ssh.clone(),
        ))
    }

    /// Execute the selected subcommand.
    pub async fn run(self) -> Result<()> {
        match self.command.clone().unwrap_or(Command::Run) {
            Command::Run => self.serve().await,
            Command::Check => self.check().await,
            Command::Tick { force } => self.tick(force).await,
        }
    }

    async fn serve(&self) -> Result<()> {
        let daemon = Daemon::start(&self.config, self.backend()).await?;
        daemon.run().await
    }

    async fn check(&self) -> Result<()> {
        let config = ZdConfig::from_file(&self.config)?;
        let tasks = config.validate(self.backend().as_ref()).await?;
        println!("{}: {} task(s)", self.config.display(), tasks.len());
        for task in &tasks {
            println!("  {}", describe(task));
        }
        Ok(())
    }

    async fn tick(&self, force: bool) -> Result<()> {
        let backend = self.backend();
        let tasks = load_tasks(&self.config, backend.as_ref()).await?;
        let scheduler = Scheduler::new(backend, tasks);
        let report = evaluate(&scheduler, Utc::now(), force).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
