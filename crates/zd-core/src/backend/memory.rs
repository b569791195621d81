//! In-memory storage backend for testing.
//!
//! Hosts, pools, datasets and snapshots live in ordinary collections.
//! Transfers copy snapshot labels between datasets with the same rules
//! `zfs receive -F` applies. Failures can be injected per operation and
//! subject, and every mutating call is journaled for assertions.

use super::{DatasetKind, StorageBackend};
use crate::error::{BackendError, BackendResult};
use crate::label::SnapshotName;
use crate::target::{is_descendant, ReplicationTarget};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// Snapshot listing; subject is the dataset.
    ListSnapshots,
    /// Child listing; subject is the parent dataset.
    ListChildren,
    /// Snapshot creation; subject is the dataset.
    CreateSnapshot,
    /// Snapshot destruction; subject is the full snapshot name.
    DestroySnapshot,
    /// Pool scrub; subject is the pool.
    Scrub,
    /// Full send; subject is the full snapshot name.
    SendFull,
    /// Incremental send; subject is the full name of the newer snapshot.
    SendIncremental,
}

/// A mutating call as seen by the backend, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `create_snapshot(dataset, label)`
    CreateSnapshot {
        /// Dataset snapshotted.
        dataset: String,
        /// Label requested.
        label: String,
    },
    /// `destroy_snapshot(name)`
    DestroySnapshot(String),
    /// `scrub_pool(pool)`
    Scrub(String),
    /// `send_full(snapshot, destination, raw)`
    SendFull {
        /// Snapshot sent.
        snapshot: String,
        /// Destination as `dataset[@host]`.
        destination: String,
        /// Raw flag as passed.
        raw: bool,
    },
    /// `send_incremental(from, to, destination, raw)`
    SendIncremental {
        /// Base snapshot.
        from: String,
        /// Snapshot sent.
        to: String,
        /// Destination as `dataset[@host]`.
        destination: String,
        /// Raw flag as passed.
        raw: bool,
    },
}

#[derive(Debug, Default)]
struct HostState {
    pools: BTreeSet<String>,
    /// Dataset name -> snapshot labels in creation order.
    datasets: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    hosts: HashMap<Option<String>, HostState>,
    failures: HashSet<(BackendOp, String)>,
    calls: Vec<BackendCall>,
    scrubs: Vec<String>,
}

/// In-memory backend with a local host and any number of remote hosts.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create a backend with an empty local host and no remote hosts.
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        state.hosts.insert(None, HostState::default());
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `host` reachable. Hosts are created implicitly by
    /// [`add_dataset`](Self::add_dataset) too.
    pub fn add_host(&self, host: &str) {
        self.state()
            .hosts
            .entry(Some(host.to_string()))
            .or_default();
    }

    /// Make `host` unreachable; its datasets are lost.
    pub fn remove_host(&self, host: &str) {
        self.state().hosts.remove(&Some(host.to_string()));
    }

    /// Add a local pool. Its root dataset is created as well.
    pub fn add_pool(&self, pool: &str) {
        let mut state = self.state();
        let local = state.hosts.entry(None).or_default();
        local.pools.insert(pool.to_string());
        local.datasets.entry(pool.to_string()).or_default();
    }

    /// Add an empty dataset on `host`.
    pub fn add_dataset(&self, host: Option<&str>, dataset: &str) {
        self.state()
            .hosts
            .entry(host.map(str::to_string))
            .or_default()
            .datasets
            .entry(dataset.to_string())
            .or_default();
    }

    /// Add a snapshot directly, bypassing the journal.
    pub fn add_snapshot(&self, host: Option<&str>, dataset: &str, label: &str) {
        self.state()
            .hosts
            .entry(host.map(str::to_string))
            .or_default()
            .datasets
            .entry(dataset.to_string())
            .or_default()
            .push(label.to_string());
    }

    /// Snapshot labels of `dataset` on `host`, in creation order.
    pub fn snapshots(&self, host: Option<&str>, dataset: &str) -> Vec<String> {
        self.state()
            .hosts
            .get(&host.map(str::to_string))
            .and_then(|h| h.datasets.get(dataset))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `dataset` exists on `host`.
    pub fn has_dataset(&self, host: Option<&str>, dataset: &str) -> bool {
        self.state()
            .hosts
            .get(&host.map(str::to_string))
            .is_some_and(|h| h.datasets.contains_key(dataset))
    }

    /// Make every future `op` on `subject` fail.
    pub fn fail(&self, op: BackendOp, subject: &str) {
        self.state().failures.insert((op, subject.to_string()));
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Journal of mutating calls, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    /// Forget the journal.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Pools scrubbed successfully, in order.
    pub fn scrubbed_pools(&self) -> Vec<String> {
        self.state().scrubs.clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn check(&self, op: BackendOp, subject: &str) -> BackendResult<()> {
        if self.failures.contains(&(op, subject.to_string())) {
            debug!(?op, subject, "Injected failure");
            return Err(BackendError::Rejected {
                subject: subject.to_string(),
                reason: format!("injected {:?} failure", op),
            });
        }
        Ok(())
    }

    fn host(&self, host: Option<&str>) -> BackendResult<&HostState> {
        self.hosts
            .get(&host.map(str::to_string))
            .ok_or_else(|| BackendError::Unreachable(host.unwrap_or("localhost").to_string()))
    }

    fn host_mut(&mut self, host: Option<&str>) -> BackendResult<&mut HostState> {
        self.hosts
            .get_mut(&host.map(str::to_string))
            .ok_or_else(|| BackendError::Unreachable(host.unwrap_or("localhost").to_string()))
    }

    fn local_snapshot_exists(&self, snapshot: &SnapshotName) -> bool {
        self.hosts
            .get(&None)
            .and_then(|h| h.datasets.get(snapshot.dataset()))
            .is_some_and(|labels| labels.iter().any(|l| l == snapshot.label()))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn exists(&self, host: Option<&str>, kind: DatasetKind, name: &str) -> bool {
        let state = self.state();
        match state.host(host) {
            Ok(h) => match kind {
                DatasetKind::Pool => h.pools.contains(name),
                DatasetKind::Dataset => h.datasets.contains_key(name),
            },
            Err(_) => false,
        }
    }

    async fn list_snapshots(
        &self,
        host: Option<&str>,
        dataset: &str,
    ) -> BackendResult<Vec<SnapshotName>> {
        let state = self.state();
        state.check(BackendOp::ListSnapshots, dataset)?;
        let labels = state
            .host(host)?
            .datasets
            .get(dataset)
            .ok_or_else(|| BackendError::NotFound(dataset.to_string()))?;
        Ok(labels
            .iter()
            .map(|label| SnapshotName::new(dataset, label.as_str()))
            .collect())
    }

    async fn list_children(&self, dataset: &str) -> BackendResult<Vec<String>> {
        let state = self.state();
        state.check(BackendOp::ListChildren, dataset)?;
        let local = state.host(None)?;
        if !local.datasets.contains_key(dataset) {
            return Err(BackendError::NotFound(dataset.to_string()));
        }
        Ok(local
            .datasets
            .keys()
            .filter(|name| is_descendant(dataset, name))
            .cloned()
            .collect())
    }

    async fn create_snapshot(&self, dataset: &str, label: &str) -> BackendResult<()> {
        let mut state = self.state();
        state.calls.push(BackendCall::CreateSnapshot {
            dataset: dataset.to_string(),
            label: label.to_string(),
        });
        state.check(BackendOp::CreateSnapshot, dataset)?;
        let labels = state
            .host_mut(None)?
            .datasets
            .get_mut(dataset)
            .ok_or_else(|| BackendError::NotFound(dataset.to_string()))?;
        if labels.iter().any(|l| l == label) {
            return Err(BackendError::AlreadyExists(format!("{}@{}", dataset, label)));
        }
        labels.push(label.to_string());
        Ok(())
    }

    async fn destroy_snapshot(&self, snapshot: &SnapshotName) -> BackendResult<()> {
        let mut state = self.state();
        let name = snapshot.to_string();
        state.calls.push(BackendCall::DestroySnapshot(name.clone()));
        state.check(BackendOp::DestroySnapshot, &name)?;
        let labels = state
            .host_mut(None)?
            .datasets
            .get_mut(snapshot.dataset())
            .ok_or_else(|| BackendError::NotFound(name.clone()))?;
        let position = labels
            .iter()
            .position(|l| l == snapshot.label())
            .ok_or(BackendError::NotFound(name))?;
        labels.remove(position);
        Ok(())
    }

    async fn scrub_pool(&self, pool: &str) -> BackendResult<()> {
        let mut state = self.state();
        state.calls.push(BackendCall::Scrub(pool.to_string()));
        state.check(BackendOp::Scrub, pool)?;
        if !state.host(None)?.pools.contains(pool) {
            return Err(BackendError::NotFound(pool.to_string()));
        }
        state.scrubs.push(pool.to_string());
        Ok(())
    }

    async fn send_full(
        &self,
        snapshot: &SnapshotName,
        destination: &ReplicationTarget,
        raw: bool,
    ) -> BackendResult<()> {
        let mut state = self.state();
        let name = snapshot.to_string();
        state.calls.push(BackendCall::SendFull {
            snapshot: name.clone(),
            destination: destination.to_string(),
            raw,
        });
        state.check(BackendOp::SendFull, &name)?;
        if !state.local_snapshot_exists(snapshot) {
            return Err(BackendError::NotFound(name));
        }

        let host = state.host_mut(destination.host())?;
        let labels = host
            .datasets
            .entry(destination.dataset().to_string())
            .or_default();
        if !labels.is_empty() {
            return Err(BackendError::Rejected {
                subject: destination.to_string(),
                reason: "destination has snapshots, refusing full stream".to_string(),
            });
        }
        labels.push(snapshot.label().to_string());
        Ok(())
    }

    async fn send_incremental(
        &self,
        from: &SnapshotName,
        to: &SnapshotName,
        destination: &ReplicationTarget,
        raw: bool,
    ) -> BackendResult<()> {
        let mut state = self.state();
        let to_name = to.to_string();
        state.calls.push(BackendCall::SendIncremental {
            from: from.to_string(),
            to: to_name.clone(),
            destination: destination.to_string(),
            raw,
        });
        state.check(BackendOp::SendIncremental, &to_name)?;
        if !state.local_snapshot_exists(from) {
            return Err(BackendError::NotFound(from.to_string()));
        }
        if !state.local_snapshot_exists(to) {
            return Err(BackendError::NotFound(to_name));
        }

        let host = state.host_mut(destination.host())?;
        let labels = host
            .datasets
            .get_mut(destination.dataset())
            .ok_or_else(|| BackendError::NotFound(destination.to_string()))?;
        let base = labels
            .iter()
            .position(|l| l == from.label())
            .ok_or_else(|| BackendError::Rejected {
                subject: destination.to_string(),
                reason: format!("incremental base {} missing", from.label()),
            })?;
        // receive -F rolls the destination back to the base first
        labels.truncate(base + 1);
        labels.push(to.label().to_string());
        Ok(())
    }
}
