//! Storage backend abstraction.
//!
//! Everything that touches the storage subsystem goes through
//! [`StorageBackend`], so planning and pruning can run against the in-memory
//! [`MemoryBackend`] in tests and against [`ZfsBackend`] in production.
//!
//! 1. **Zfs** - shells out to `zfs`/`zpool`, remote hosts reached via `ssh`
//! 2. **Memory** - in-process datasets and snapshots with fault injection

pub mod memory;
pub mod zfs;

pub use memory::{BackendCall, BackendOp, MemoryBackend};
pub use zfs::ZfsBackend;

use crate::error::BackendResult;
use crate::label::SnapshotName;
use crate::target::ReplicationTarget;
use async_trait::async_trait;
use std::fmt;

/// What kind of object an existence check looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    /// A storage pool (`zpool`).
    Pool,
    /// A filesystem or volume (`zfs`).
    Dataset,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Pool => f.write_str("pool"),
            DatasetKind::Dataset => f.write_str("dataset"),
        }
    }
}

/// Primitive operations against the storage subsystem.
///
/// `host` is `None` for the local machine. Operations are awaited one at a
/// time by the engine; implementations need not be re-entrant per dataset.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Whether a pool or dataset called `name` exists on `host`.
    async fn exists(&self, host: Option<&str>, kind: DatasetKind, name: &str) -> bool;

    /// All snapshots of `dataset` on `host`, in backend order.
    async fn list_snapshots(
        &self,
        host: Option<&str>,
        dataset: &str,
    ) -> BackendResult<Vec<SnapshotName>>;

    /// All local datasets below `dataset`, excluding `dataset` itself.
    async fn list_children(&self, dataset: &str) -> BackendResult<Vec<String>>;

    /// Create `dataset@label`.
    async fn create_snapshot(&self, dataset: &str, label: &str) -> BackendResult<()>;

    /// Destroy one snapshot.
    async fn destroy_snapshot(&self, snapshot: &SnapshotName) -> BackendResult<()>;

    /// Start a scrub of `pool`.
    async fn scrub_pool(&self, pool: &str) -> BackendResult<()>;

    /// Send the complete `snapshot` to `destination`.
    async fn send_full(
        &self,
        snapshot: &SnapshotName,
        destination: &ReplicationTarget,
        raw: bool,
    ) -> BackendResult<()>;

    /// Send the delta between `from` and `to` to `destination`, which must
    /// already hold `from`.
    async fn send_incremental(
        &self,
        from: &SnapshotName,
        to: &SnapshotName,
        destination: &ReplicationTarget,
        raw: bool,
    ) -> BackendResult<()>;
}
