#![warn(missing_docs)]

//! zd core: ZFS snapshot retention, incremental replication planning, scheduled scrubs
//!
//! This crate holds the engine of the zd daemon. Tasks are evaluated once a
//! minute by the [`Scheduler`]; snapshots are taken and pruned per cadence,
//! replication plans the shortest incremental chain from the most recent
//! shared snapshot, and pools are scrubbed. All storage access goes through
//! the [`StorageBackend`] trait.

pub mod backend;
pub mod error;
pub mod executor;
pub mod label;
pub mod planner;
pub mod prune;
pub mod replication;
pub mod schedule;
pub mod snapshot_set;
pub mod target;
pub mod task;

pub use backend::{DatasetKind, MemoryBackend, StorageBackend, ZfsBackend};
pub use error::{BackendError, BackendResult};
pub use executor::{DatasetSnapshotReport, ScrubReport, SnapshotReport, TaskExecutor};
pub use label::{Cadence, LabelError, SnapshotLabel, SnapshotName};
pub use planner::{plan, IncrementalStep, PlanError, TransferPlan};
pub use prune::{PruneError, RetentionPruner};
pub use replication::{DestinationReport, ReplicationOutcome, ReplicationReport, Replicator};
pub use schedule::{DueTasks, Scheduler, TickReport};
pub use snapshot_set::SnapshotSet;
pub use target::{ReplicationTarget, TargetError};
pub use task::{Task, TaskKind, UnknownTaskKind};
