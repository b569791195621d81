//! Replication orchestration across destinations and child datasets.
//!
//! For each dataset the source history is listed once, then every
//! destination is planned and brought up to date on its own. A failure
//! against one destination, or one child dataset, is logged and recorded in
//! the report; the remaining destinations and children still run.

use crate::backend::StorageBackend;
use crate::label::{Cadence, SnapshotName};
use crate::planner::{plan, IncrementalStep, PlanError, TransferPlan};
use crate::snapshot_set::SnapshotSet;
use crate::target::{child_suffix, ReplicationTarget};
use crate::task::Task;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How one dataset/destination pair ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplicationOutcome {
    /// The destination was empty and received a full stream.
    FullSend {
        /// Snapshot sent.
        snapshot: String,
    },
    /// Every planned increment was applied.
    Incremental {
        /// Snapshots applied, oldest first.
        applied: Vec<String>,
    },
    /// The destination already held the newest source snapshot.
    UpToDate,
    /// The full send failed.
    FullSendFailed {
        /// Snapshot that was being sent.
        snapshot: String,
        /// Backend diagnostic.
        error: String,
    },
    /// The chain stopped at a failing increment; earlier ones were kept.
    PartialChain {
        /// Snapshots applied before the failure.
        applied: Vec<String>,
        /// Snapshot whose send failed.
        failed: String,
        /// Backend diagnostic.
        error: String,
        /// Increments not attempted after the failure.
        skipped: usize,
    },
    /// No transfer could be planned.
    NotPlanned {
        /// Why.
        reason: PlanError,
    },
}

impl ReplicationOutcome {
    /// Whether the destination is now in sync with the source.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReplicationOutcome::FullSend { .. }
                | ReplicationOutcome::Incremental { .. }
                | ReplicationOutcome::UpToDate
        )
    }
}

/// Result for one source dataset and one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationReport {
    /// Source dataset.
    pub dataset: String,
    /// Destination as `dataset[@host]`.
    pub destination: String,
    /// What happened.
    pub outcome: ReplicationOutcome,
}

/// Everything a replication task did in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationReport {
    /// The task's target dataset.
    pub target: String,
    /// One entry per dataset and destination, task target first.
    pub destinations: Vec<DestinationReport>,
    /// Failures that prevented work from being attempted at all.
    pub errors: Vec<String>,
}

impl ReplicationReport {
    /// Number of dataset/destination pairs now in sync.
    pub fn succeeded(&self) -> usize {
        self.destinations
            .iter()
            .filter(|d| d.outcome.is_success())
            .count()
    }

    /// Number of dataset/destination pairs left behind.
    pub fn failed(&self) -> usize {
        self.destinations.len() - self.succeeded()
    }

    /// Whether everything succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty() && self.failed() == 0
    }

    /// Outcome for `dataset` towards `destination`.
    pub fn outcome(&self, dataset: &str, destination: &str) -> Option<&ReplicationOutcome> {
        self.destinations
            .iter()
            .find(|d| d.dataset == dataset && d.destination == destination)
            .map(|d| &d.outcome)
    }
}

/// Drives the planner against the backend.
#[derive(Clone)]
pub struct Replicator {
    backend: Arc<dyn StorageBackend>,
}

impl Replicator {
    /// Create a replicator over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Replicate the task target, and its children if the task is
    /// recursive, to every configured destination.
    pub async fn replicate(&self, task: &Task) -> ReplicationReport {
        let mut report = ReplicationReport {
            target: task.target.clone(),
            ..Default::default()
        };

        let reports = self
            .replicate_dataset(&task.target, task.cadence, task.raw, &task.to)
            .await;
        report.destinations.extend(reports);

        if !task.recursive {
            return report;
        }

        let children = match self.backend.list_children(&task.target).await {
            Ok(children) => children,
            Err(e) => {
                error!("run error: cannot list children of {}: {}", task.target, e);
                report.errors.push(e.to_string());
                return report;
            }
        };

        for child in children {
            let Some(suffix) = child_suffix(&task.target, &child) else {
                warn!(child = %child, target = %task.target, "Skipping dataset outside target tree");
                continue;
            };
            let targets: Vec<ReplicationTarget> =
                task.to.iter().map(|t| t.for_child(suffix)).collect();
            let reports = self
                .replicate_dataset(&child, task.cadence, task.raw, &targets)
                .await;
            report.destinations.extend(reports);
        }

        report
    }

    /// Replicate one dataset to each of `targets`.
    pub async fn replicate_dataset(
        &self,
        dataset: &str,
        cadence: Cadence,
        raw: bool,
        targets: &[ReplicationTarget],
    ) -> Vec<DestinationReport> {
        let source = SnapshotSet::list(self.backend.as_ref(), None, dataset, cadence).await;
        if source.is_empty() {
            error!("run error: no source snapshot to replicate {}", dataset);
        }

        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = if source.is_empty() {
                ReplicationOutcome::NotPlanned {
                    reason: PlanError::NoSourceSnapshot,
                }
            } else {
                self.sync_destination(dataset, &source, target, raw).await
            };
            reports.push(DestinationReport {
                dataset: dataset.to_string(),
                destination: target.to_string(),
                outcome,
            });
        }
        reports
    }

    async fn sync_destination(
        &self,
        dataset: &str,
        source: &SnapshotSet,
        target: &ReplicationTarget,
        raw: bool,
    ) -> ReplicationOutcome {
        let destination = SnapshotSet::list(
            self.backend.as_ref(),
            target.host(),
            target.dataset(),
            source.cadence(),
        )
        .await;

        match plan(source.as_slice(), destination.as_slice()) {
            Ok(TransferPlan::Full(snapshot)) => {
                self.send_full(dataset, &snapshot, target, raw).await
            }
            Ok(TransferPlan::Incremental(steps)) if steps.is_empty() => {
                debug!(dataset, destination = %target, "Already in sync");
                ReplicationOutcome::UpToDate
            }
            Ok(TransferPlan::Incremental(steps)) => {
                self.apply_chain(dataset, &steps, target, raw).await
            }
            Err(reason) => {
                error!("run error: {} ({} to {})", reason, dataset, target);
                ReplicationOutcome::NotPlanned { reason }
            }
        }
    }

    async fn send_full(
        &self,
        dataset: &str,
        snapshot: &SnapshotName,
        target: &ReplicationTarget,
        raw: bool,
    ) -> ReplicationOutcome {
        match self.backend.send_full(snapshot, target, raw).await {
            Ok(()) => {
                info!("Ok: replicated {} to {}", dataset, target);
                ReplicationOutcome::FullSend {
                    snapshot: snapshot.to_string(),
                }
            }
            Err(e) => {
                error!("run error: failed to replicate {} to {}: {}", dataset, target, e);
                ReplicationOutcome::FullSendFailed {
                    snapshot: snapshot.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Apply increments in order, stopping at the first failure. Each step
    /// needs the previous one at the destination, so nothing after a failed
    /// step is attempted.
    async fn apply_chain(
        &self,
        dataset: &str,
        steps: &[IncrementalStep],
        target: &ReplicationTarget,
        raw: bool,
    ) -> ReplicationOutcome {
        let mut applied = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if let Err(e) = self
                .backend
                .send_incremental(&step.from, &step.to, target, raw)
                .await
            {
                error!("run error: failed to increment {} to {}: {}", dataset, target, e);
                return ReplicationOutcome::PartialChain {
                    applied,
                    failed: step.to.to_string(),
                    error: e.to_string(),
                    skipped: steps.len() - i - 1,
                };
            }
            info!("Ok: incremented {} to {}", step.to, target);
            applied.push(step.to.to_string());
        }
        ReplicationOutcome::Incremental { applied }
    }
}
