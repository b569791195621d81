//! Transfer planning between a source history and a destination history.
//!
//! Snapshots are matched across hosts by label, the part after `@`. The plan
//! starts from the most recent label both sides share; if several labels are
//! shared, older ones are ignored even when a manual rollback on the
//! destination made one of them its newest snapshot.

use crate::label::SnapshotName;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

/// Conditions under which no transfer can be planned.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanError {
    /// The source has no snapshot of the cadence.
    #[error("no source snapshot to replicate")]
    NoSourceSnapshot,
    /// The destination has history, but none of it is shared with the
    /// source. Requires a manual full resync.
    #[error("no matching snapshot between source and destination")]
    NoCommonAncestor,
}

/// One incremental send, `from` already present at the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncrementalStep {
    /// Base snapshot.
    pub from: SnapshotName,
    /// Snapshot to send.
    pub to: SnapshotName,
}

/// What has to be sent to bring a destination up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "snapshots", rename_all = "snake_case")]
pub enum TransferPlan {
    /// The destination is empty: send the newest source snapshot whole.
    Full(SnapshotName),
    /// Consecutive incremental sends, to be applied in order. Empty when the
    /// destination already holds the newest source snapshot.
    Incremental(Vec<IncrementalStep>),
}

impl TransferPlan {
    /// Whether nothing needs to be sent.
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, TransferPlan::Incremental(steps) if steps.is_empty())
    }

    /// Number of sends the plan requires.
    pub fn transfer_count(&self) -> usize {
        match self {
            TransferPlan::Full(_) => 1,
            TransferPlan::Incremental(steps) => steps.len(),
        }
    }
}

/// Plan the transfers from `source` to `destination`.
///
/// Both slices hold snapshots of one cadence, oldest first.
pub fn plan(
    source: &[SnapshotName],
    destination: &[SnapshotName],
) -> Result<TransferPlan, PlanError> {
    let latest = source.last().ok_or(PlanError::NoSourceSnapshot)?;
    if destination.is_empty() {
        return Ok(TransferPlan::Full(latest.clone()));
    }

    let known: HashSet<&str> = destination.iter().map(SnapshotName::label).collect();
    let common = source
        .iter()
        .rposition(|s| known.contains(s.label()))
        .ok_or(PlanError::NoCommonAncestor)?;

    let steps = source[common..]
        .windows(2)
        .map(|pair| IncrementalStep {
            from: pair[0].clone(),
            to: pair[1].clone(),
        })
        .collect();
    Ok(TransferPlan::Incremental(steps))
}
