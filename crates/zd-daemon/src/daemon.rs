//! The scheduling loop.

use crate::config::{ConfigError, ZdConfig};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use zd_core::schedule::until_next_minute;
use zd_core::{Scheduler, StorageBackend, Task, TickReport};

/// Load, validate and check the targets of the configuration at `path`.
pub async fn load_tasks(path: &Path, backend: &dyn StorageBackend) -> Result<Vec<Task>, ConfigError> {
    ZdConfig::from_file(path)?.validate(backend).await
}

/// Long-running daemon state: the configuration path and the scheduler.
pub struct Daemon {
    config_path: PathBuf,
    backend: Arc<dyn StorageBackend>,
    scheduler: Scheduler,
}

impl Daemon {
    /// Load the configuration once. Fails if it is unreadable or invalid.
    pub async fn start(
        config_path: impl Into<PathBuf>,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, ConfigError> {
        let config_path = config_path.into();
        let tasks = load_tasks(&config_path, backend.as_ref()).await?;
        info!(tasks = tasks.len(), config = %config_path.display(), "Configuration loaded");
        Ok(Self {
            scheduler: Scheduler::new(backend.clone(), tasks),
            config_path,
            backend,
        })
    }

    /// Tasks currently scheduled.
    pub fn tasks(&self) -> &[Task] {
        self.scheduler.tasks()
    }

    /// Re-read the configuration. On failure the task list is emptied so
    /// nothing runs until the file is corrected.
    pub async fn reload(&mut self) -> Result<usize, ConfigError> {
        match load_tasks(&self.config_path, self.backend.as_ref()).await {
            Ok(tasks) => {
                let count = tasks.len();
                self.scheduler.replace_tasks(tasks);
                Ok(count)
            }
            Err(e) => {
                self.scheduler.replace_tasks(Vec::new());
                Err(e)
            }
        }
    }

    /// One loop iteration: reload, then evaluate the minute containing `now`.
    pub async fn step(&mut self, now: DateTime<Utc>) -> Option<TickReport> {
        if let Err(e) = self.reload().await {
            error!("run error: {}", e);
        }
        self.scheduler.tick(now).await
    }

    /// Run until interrupted.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("zd scheduler started");
        loop {
            self.step(Utc::now()).await;

            let delay = until_next_minute(Utc::now());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Interrupted, shutting down");
                    return Ok(());
                }
            }
        }
    }
}
