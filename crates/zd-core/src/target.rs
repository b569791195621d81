//! Replication destinations and dataset tree helpers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a replication target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TargetError {
    /// The dataset part of the target is empty.
    #[error("empty dataset in replication target: {0:?}")]
    EmptyDataset(String),
    /// A `@` was given without a host after it.
    #[error("empty host in replication target: {0:?}")]
    EmptyHost(String),
}

/// Where a dataset is replicated to: `dataset` or `dataset@host`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplicationTarget {
    dataset: String,
    host: Option<String>,
}

impl ReplicationTarget {
    /// Target on the local host.
    pub fn local(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            host: None,
        }
    }

    /// Target on a remote host reached over ssh.
    pub fn remote(dataset: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            host: Some(host.into()),
        }
    }

    /// Parse `dataset` or `dataset@host`.
    pub fn parse(s: &str) -> Result<Self, TargetError> {
        let s = s.trim();
        let (dataset, host) = match s.split_once('@') {
            Some((dataset, host)) => {
                if host.is_empty() {
                    return Err(TargetError::EmptyHost(s.to_string()));
                }
                (dataset, Some(host.to_string()))
            }
            None => (s, None),
        };
        if dataset.is_empty() {
            return Err(TargetError::EmptyDataset(s.to_string()));
        }
        Ok(Self {
            dataset: dataset.to_string(),
            host,
        })
    }

    /// Dataset path on the destination host.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Destination host, `None` when local.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Whether the destination lives on another host.
    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// Target for a child dataset: `suffix` is appended to the dataset path,
    /// the host is kept.
    pub fn for_child(&self, suffix: &str) -> Self {
        Self {
            dataset: format!("{}{}", self.dataset, suffix),
            host: self.host.clone(),
        }
    }
}

impl fmt::Display for ReplicationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}@{}", self.dataset, host),
            None => f.write_str(&self.dataset),
        }
    }
}

impl FromStr for ReplicationTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReplicationTarget {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReplicationTarget> for String {
    fn from(value: ReplicationTarget) -> Self {
        value.to_string()
    }
}

/// Path of `child` relative to `parent`, including the leading `/`.
///
/// Returns `None` unless `child` is a strict descendant of `parent` in the
/// dataset tree, so `tank/ab` is not treated as a child of `tank/a`.
pub fn child_suffix<'a>(parent: &str, child: &'a str) -> Option<&'a str> {
    let parent = parent.trim_end_matches('/');
    child
        .strip_prefix(parent)
        .filter(|suffix| suffix.len() > 1 && suffix.starts_with('/'))
}

/// Whether `child` sits below `parent` in the dataset tree.
pub fn is_descendant(parent: &str, child: &str) -> bool {
    child_suffix(parent, child).is_some()
}
