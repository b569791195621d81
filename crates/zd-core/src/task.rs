//! Scheduled task definitions.

use crate::label::Cadence;
use crate::target::ReplicationTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unknown task kind in configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task kind: {0}")]
pub struct UnknownTaskKind(pub String);

/// What a task does when it is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Start a pool scrub.
    Scrub,
    /// Take a snapshot and prune old ones.
    Snapshot,
    /// Replicate snapshots to the configured targets.
    Replication,
    /// Snapshot first, replicate afterwards in the same tick.
    SnapshotAndReplication,
}

impl TaskKind {
    /// Canonical configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Scrub => "scrub",
            TaskKind::Snapshot => "snapshot",
            TaskKind::Replication => "replication",
            TaskKind::SnapshotAndReplication => "snapshot and replication",
        }
    }

    /// Whether the task takes snapshots.
    pub fn snapshots(&self) -> bool {
        matches!(self, TaskKind::Snapshot | TaskKind::SnapshotAndReplication)
    }

    /// Whether the task replicates.
    pub fn replicates(&self) -> bool {
        matches!(self, TaskKind::Replication | TaskKind::SnapshotAndReplication)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrub" => Ok(TaskKind::Scrub),
            "snapshot" => Ok(TaskKind::Snapshot),
            "replication" | "replicate" => Ok(TaskKind::Replication),
            "snapshot and replication" | "snapshot and replicate" => {
                Ok(TaskKind::SnapshotAndReplication)
            }
            other => Err(UnknownTaskKind(other.to_string())),
        }
    }
}

/// A validated task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    /// What to do.
    pub kind: TaskKind,
    /// Dataset, or pool for scrubs.
    pub target: String,
    /// How often to run.
    pub cadence: Cadence,
    /// When within the cadence period, see [`crate::schedule`].
    pub when: String,
    /// Snapshots of this cadence to keep.
    pub retention: usize,
    /// Whether child datasets are included.
    pub recursive: bool,
    /// Whether sends use raw (still encrypted) streams.
    pub raw: bool,
    /// Replication destinations.
    pub to: Vec<ReplicationTarget>,
}

impl Task {
    /// Task with no retention, no destinations and flags off.
    pub fn new(kind: TaskKind, target: impl Into<String>, cadence: Cadence, when: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            cadence,
            when: when.into(),
            retention: 0,
            recursive: false,
            raw: false,
            to: Vec::new(),
        }
    }

    /// Set the retention count.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Include child datasets.
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Send raw streams.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Add a replication destination.
    pub fn to(mut self, target: ReplicationTarget) -> Self {
        self.to.push(target);
        self
    }

    /// Whether the task should run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        crate::schedule::is_due(self.cadence, &self.when, now)
    }
}
