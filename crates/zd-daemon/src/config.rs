//! Task configuration: loading, semantic validation and target checks.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zd_core::schedule::is_valid_when;
use zd_core::{
    Cadence, DatasetKind, ReplicationTarget, StorageBackend, Task, TaskKind, TargetError,
};

/// Configuration problems. All of them reject the whole file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config error: cannot read {}: {source}", path.display())]
    Io {
        /// File attempted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be deserialized.
    #[error("config error: cannot parse {}: {reason}", path.display())]
    Parse {
        /// File attempted.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },

    /// The file extension names no known format.
    #[error("config error: unsupported config file extension: {0}")]
    UnsupportedFormat(String),

    /// `frequency` is not a cadence.
    #[error("config error: invalid frequency for {target} ({value})")]
    InvalidFrequency {
        /// Task target.
        target: String,
        /// Value found.
        value: String,
    },

    /// `task` is not a task kind.
    #[error("config error: invalid task for {target} ({value})")]
    InvalidTask {
        /// Task target.
        target: String,
        /// Value found.
        value: String,
    },

    /// A snapshotting task has a negative retention.
    #[error("config error: invalid snapshot retention for {target} ({value})")]
    InvalidRetention {
        /// Task target.
        target: String,
        /// Value found.
        value: i64,
    },

    /// Scrubs cannot run hourly.
    #[error("config error: invalid frequency for scrub of {target}")]
    HourlyScrub {
        /// Task target.
        target: String,
    },

    /// `when` can never match the cadence.
    #[error("config error: invalid when for {target} ({when}, expected {expected})")]
    InvalidWhen {
        /// Task target.
        target: String,
        /// Value found.
        when: String,
        /// Shape the cadence expects.
        expected: &'static str,
    },

    /// A replicating task lists no destination.
    #[error("config error: no replication destination for {target}")]
    MissingDestination {
        /// Task target.
        target: String,
    },

    /// A destination is malformed.
    #[error("config error: invalid destination for {target}: {source}")]
    InvalidDestination {
        /// Task target.
        target: String,
        /// Parse failure.
        #[source]
        source: TargetError,
    },

    /// The target pool or dataset does not exist.
    #[error("config error: {target} not found")]
    TargetNotFound {
        /// Task target.
        target: String,
        /// What was looked for.
        kind: DatasetKind,
    },
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZdConfig {
    /// Tasks in the order they are queued.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// One task as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task kind.
    pub task: String,
    /// Dataset, or pool for scrubs.
    pub target: String,
    /// Cadence.
    pub frequency: String,
    /// Time within the cadence period.
    #[serde(deserialize_with = "when_string")]
    pub when: String,
    /// Snapshots to keep.
    #[serde(default)]
    pub retention: i64,
    /// Include child datasets.
    #[serde(default)]
    pub recursive: bool,
    /// Send raw streams.
    #[serde(default)]
    pub raw: bool,
    /// Destinations as `dataset` or `dataset@host`.
    #[serde(default)]
    pub to: Vec<String>,
}

/// Accept `when: "05"` as well as `when: 5`.
fn when_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum When {
        Text(String),
        Number(u64),
    }

    Ok(match When::deserialize(deserializer)? {
        When::Text(s) => s,
        When::Number(n) => format!("{:02}", n),
    })
}

fn expected_when(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Hourly => "mm",
        Cadence::Daily => "HH:mm",
        Cadence::Weekly => "Weekday HH:mm",
        Cadence::Monthly => "MM HH:mm",
    }
}

impl ZdConfig {
    /// Read a configuration file; the format follows the extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let parsed = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| e.to_string()),
            "toml" => toml::from_str(&contents).map_err(|e| e.to_string()),
            "json" => serde_json::from_str(&contents).map_err(|e| e.to_string()),
            _ => return Err(ConfigError::UnsupportedFormat(ext)),
        };
        parsed.map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Semantic checks only. Returns the tasks in file order.
    pub fn tasks(&self) -> Result<Vec<Task>, ConfigError> {
        self.tasks.iter().map(TaskConfig::to_task).collect()
    }

    /// Semantic checks for every task, then check that every target exists
    /// on the local host: scrub targets as pools, others as datasets.
    pub async fn validate(&self, backend: &dyn StorageBackend) -> Result<Vec<Task>, ConfigError> {
        let tasks = self.tasks()?;
        for task in &tasks {
            let kind = match task.kind {
                TaskKind::Scrub => DatasetKind::Pool,
                _ => DatasetKind::Dataset,
            };
            if !backend.exists(None, kind, &task.target).await {
                return Err(ConfigError::TargetNotFound {
                    target: task.target.clone(),
                    kind,
                });
            }
        }
        Ok(tasks)
    }
}

impl TaskConfig {
    /// Validate the record and turn it into a [`Task`].
    pub fn to_task(&self) -> Result<Task, ConfigError> {
        let target = &self.target;
        let cadence: Cadence = self
            .frequency
            .parse()
            .map_err(|_| ConfigError::InvalidFrequency {
                target: target.clone(),
                value: self.frequency.clone(),
            })?;
        let kind: TaskKind = self.task.parse().map_err(|_| ConfigError::InvalidTask {
            target: target.clone(),
            value: self.task.clone(),
        })?;

        if kind.snapshots() && self.retention < 0 {
            return Err(ConfigError::InvalidRetention {
                target: target.clone(),
                value: self.retention,
            });
        }
        if kind == TaskKind::Scrub && cadence == Cadence::Hourly {
            return Err(ConfigError::HourlyScrub {
                target: target.clone(),
            });
        }
        if !is_valid_when(cadence, &self.when) {
            return Err(ConfigError::InvalidWhen {
                target: target.clone(),
                when: self.when.clone(),
                expected: expected_when(cadence),
            });
        }
        if kind.replicates() && self.to.is_empty() {
            return Err(ConfigError::MissingDestination {
                target: target.clone(),
            });
        }

        let mut task = Task::new(kind, target.clone(), cadence, self.when.clone())
            .with_retention(usize::try_from(self.retention).unwrap_or(0));
        task.recursive = self.recursive;
        task.raw = self.raw;
        for destination in &self.to {
            let destination = ReplicationTarget::parse(destination).map_err(|source| {
                ConfigError::InvalidDestination {
                    target: target.clone(),
                    source,
                }
            })?;
            task = task.to(destination);
        }
        Ok(task)
    }
}
