//! Retention pruning: keep the newest N snapshots of a cadence.

use crate::backend::StorageBackend;
use crate::error::BackendError;
use crate::label::{Cadence, SnapshotName};
use crate::snapshot_set::SnapshotSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by [`RetentionPruner::prune`].
#[derive(Debug, Error)]
pub enum PruneError {
    /// The snapshot listing itself failed; nothing was destroyed.
    #[error("prune error: cannot list snapshots of {dataset}: {source}")]
    List {
        /// Dataset being pruned.
        dataset: String,
        /// Backend failure.
        #[source]
        source: BackendError,
    },

    /// A destroy failed; the remaining expired snapshots were left alone.
    #[error("prune error: {source} ({failed})")]
    Destroy {
        /// Snapshots destroyed before the failure, oldest first.
        destroyed: Vec<SnapshotName>,
        /// The snapshot that could not be destroyed.
        failed: SnapshotName,
        /// Backend failure.
        #[source]
        source: BackendError,
    },
}

impl PruneError {
    /// Snapshots that were destroyed before the error occurred.
    pub fn destroyed(&self) -> &[SnapshotName] {
        match self {
            PruneError::List { .. } => &[],
            PruneError::Destroy { destroyed, .. } => destroyed.as_slice(),
        }
    }
}

/// The oldest snapshots of `set` beyond the newest `retain`.
pub fn expired(set: &SnapshotSet, retain: usize) -> &[SnapshotName] {
    let snapshots = set.as_slice();
    let excess = snapshots.len().saturating_sub(retain);
    &snapshots[..excess]
}

/// Destroys snapshots that fall outside a retention count.
#[derive(Clone)]
pub struct RetentionPruner {
    backend: Arc<dyn StorageBackend>,
}

impl RetentionPruner {
    /// Create a pruner over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Destroy all but the newest `retain` snapshots of `cadence` on the
    /// local `dataset`, oldest first. Returns what was destroyed.
    ///
    /// The first destroy failure stops pruning; the error carries the
    /// snapshots already destroyed.
    pub async fn prune(
        &self,
        dataset: &str,
        cadence: Cadence,
        retain: usize,
    ) -> Result<Vec<SnapshotName>, PruneError> {
        let names = self
            .backend
            .list_snapshots(None, dataset)
            .await
            .map_err(|source| PruneError::List {
                dataset: dataset.to_string(),
                source,
            })?;
        let set = SnapshotSet::from_names(cadence, names);
        let victims = expired(&set, retain);
        if victims.is_empty() {
            debug!(dataset, %cadence, retain, count = set.len(), "Nothing to prune");
            return Ok(Vec::new());
        }

        let mut destroyed = Vec::with_capacity(victims.len());
        for snapshot in victims {
            if let Err(source) = self.backend.destroy_snapshot(snapshot).await {
                return Err(PruneError::Destroy {
                    destroyed,
                    failed: snapshot.clone(),
                    source,
                });
            }
            debug!(snapshot = %snapshot, "Destroyed expired snapshot");
            destroyed.push(snapshot.clone());
        }
        Ok(destroyed)
    }
}
