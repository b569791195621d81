//! Ordered snapshot history of one dataset for one cadence.

use crate::backend::StorageBackend;
use crate::label::{Cadence, SnapshotName};
use tracing::debug;

/// Snapshots of a dataset carrying one cadence, oldest first.
///
/// Recomputed from the backend whenever it is needed; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSet {
    cadence: Cadence,
    snapshots: Vec<SnapshotName>,
}

impl SnapshotSet {
    /// Keep the names whose label carries `cadence` and sort them oldest
    /// first.
    ///
    /// Generated labels order by the time they encode. Free-form labels
    /// that still name the cadence as a word are kept, ordered
    /// lexicographically and ahead of the generated ones. Labels without a
    /// cadence word are dropped.
    pub fn from_names(cadence: Cadence, names: impl IntoIterator<Item = SnapshotName>) -> Self {
        let mut snapshots: Vec<SnapshotName> = names
            .into_iter()
            .filter(|name| name.cadence() == Some(cadence))
            .collect();
        snapshots.sort_by_cached_key(|name| {
            let taken_at = name.parsed_label().ok().map(|label| label.taken_at());
            (taken_at, name.clone())
        });
        Self { cadence, snapshots }
    }

    /// Query `dataset` on `host`. A failed or empty listing yields an empty
    /// set: the dataset simply has no history yet.
    pub async fn list(
        backend: &dyn StorageBackend,
        host: Option<&str>,
        dataset: &str,
        cadence: Cadence,
    ) -> Self {
        match backend.list_snapshots(host, dataset).await {
            Ok(names) => Self::from_names(cadence, names),
            Err(e) => {
                debug!(dataset, host = host.unwrap_or("localhost"), error = %e, "No snapshot history");
                Self::from_names(cadence, Vec::new())
            }
        }
    }

    /// Cadence this set was filtered by.
    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Snapshots, oldest first.
    pub fn as_slice(&self) -> &[SnapshotName] {
        &self.snapshots
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<&SnapshotName> {
        self.snapshots.last()
    }

    /// Number of snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the set holds no snapshots.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, SnapshotName> {
        self.snapshots.iter()
    }
}

impl IntoIterator for SnapshotSet {
    type Item = SnapshotName;
    type IntoIter = std::vec::IntoIter<SnapshotName>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshots.into_iter()
    }
}
