//! Snapshot and scrub task execution.

use crate::backend::StorageBackend;
use crate::label::{SnapshotLabel, SnapshotName};
use crate::prune::RetentionPruner;
use crate::replication::{ReplicationReport, Replicator};
use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Snapshot and prune result for one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSnapshotReport {
    /// Dataset snapshotted.
    pub dataset: String,
    /// Snapshot created, if creation succeeded.
    pub created: Option<String>,
    /// Snapshots destroyed by pruning, oldest first.
    pub pruned: Vec<String>,
    /// Creation or pruning failure.
    pub error: Option<String>,
}

impl DatasetSnapshotReport {
    /// Whether both the snapshot and the prune succeeded.
    pub fn is_success(&self) -> bool {
        self.created.is_some() && self.error.is_none()
    }
}

/// Everything a snapshot task did in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    /// The task's target dataset.
    pub target: String,
    /// One entry per dataset, task target first.
    pub datasets: Vec<DatasetSnapshotReport>,
    /// Failures that prevented work from being attempted at all.
    pub errors: Vec<String>,
}

impl SnapshotReport {
    /// Whether every dataset was snapshotted and pruned.
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty() && self.datasets.iter().all(DatasetSnapshotReport::is_success)
    }
}

/// Result of a scrub task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrubReport {
    /// Pool scrubbed.
    pub pool: String,
    /// Failure, if any.
    pub error: Option<String>,
}

/// Runs tasks against a backend.
#[derive(Clone)]
pub struct TaskExecutor {
    backend: Arc<dyn StorageBackend>,
    pruner: RetentionPruner,
    replicator: Replicator,
}

impl TaskExecutor {
    /// Create an executor over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            pruner: RetentionPruner::new(backend.clone()),
            replicator: Replicator::new(backend.clone()),
            backend,
        }
    }

    /// Snapshot the task target (and its children when recursive) with a
    /// label for `now`, then prune each dataset to the task retention.
    pub async fn snapshot(&self, task: &Task, now: DateTime<Utc>) -> SnapshotReport {
        let label = SnapshotLabel::auto(now, task.cadence).to_string();
        let mut report = SnapshotReport {
            target: task.target.clone(),
            ..Default::default()
        };

        report
            .datasets
            .push(self.snapshot_dataset(&task.target, &label, task).await);

        if task.recursive {
            match self.backend.list_children(&task.target).await {
                Ok(children) => {
                    for child in children {
                        report
                            .datasets
                            .push(self.snapshot_dataset(&child, &label, task).await);
                    }
                }
                Err(e) => {
                    error!("run error: cannot list children of {}: {}", task.target, e);
                    report.errors.push(e.to_string());
                }
            }
        }

        report
    }

    async fn snapshot_dataset(&self, dataset: &str, label: &str, task: &Task) -> DatasetSnapshotReport {
        let mut report = DatasetSnapshotReport {
            dataset: dataset.to_string(),
            created: None,
            pruned: Vec::new(),
            error: None,
        };

        if let Err(e) = self.backend.create_snapshot(dataset, label).await {
            error!("run error: snapshot error: {} ({})", e, dataset);
            report.error = Some(e.to_string());
            return report;
        }
        info!("Ok: snapshotted dataset {} as {}", dataset, label);
        report.created = Some(SnapshotName::new(dataset, label).to_string());

        let destroyed = match self.pruner.prune(dataset, task.cadence, task.retention).await {
            Ok(destroyed) => destroyed,
            Err(e) => {
                error!("run error: {}", e);
                report.error = Some(e.to_string());
                e.destroyed().to_vec()
            }
        };
        match destroyed.as_slice() {
            [] => {}
            [only] => info!("Ok: pruned dataset {} removing {}", dataset, only),
            many => info!("Ok: pruned dataset {} removing {} snapshots", dataset, many.len()),
        }
        report.pruned = destroyed.iter().map(ToString::to_string).collect();
        report
    }

    /// Replicate the task target to its destinations.
    pub async fn replicate(&self, task: &Task) -> ReplicationReport {
        self.replicator.replicate(task).await
    }

    /// Start a scrub of the pool named by the task target.
    pub async fn scrub(&self, task: &Task) -> ScrubReport {
        let error = match self.backend.scrub_pool(&task.target).await {
            Ok(()) => {
                info!("Ok: scrub started on pool {}", task.target);
                None
            }
            Err(e) => {
                error!("run error: scrub error: {} ({})", e, task.target);
                Some(e.to_string())
            }
        };
        ScrubReport {
            pool: task.target.clone(),
            error,
        }
    }
}
