//! Snapshot naming: cadences, generated labels and `dataset@label` names.
//!
//! Labels created by zd look like `auto_2024-01-01_00-00-00_daily`. The
//! timestamp is fixed-width and zero padded, so sorting labels of one cadence
//! lexicographically sorts them chronologically.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tag prefixed to every label zd creates.
pub const AUTO_TAG: &str = "auto";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const TIMESTAMP_LEN: usize = "YYYY-MM-DD_HH-MM-SS".len();
const LEGACY_UTC_SUFFIX: &str = "_UTC";

/// Errors raised while parsing snapshot names and labels.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LabelError {
    /// The cadence is not one of hourly, daily, weekly, monthly.
    #[error("unknown cadence: {0}")]
    UnknownCadence(String),
    /// A snapshot name without the `@` separator.
    #[error("missing '@' in snapshot name: {0}")]
    MissingSeparator(String),
    /// The label does not follow the `<tag>_<timestamp>_<cadence>` layout.
    #[error("malformed snapshot label: {0}")]
    Malformed(String),
}

/// How often a task runs; also embedded in every snapshot label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// Once an hour.
    Hourly,
    /// Once a day.
    Daily,
    /// Once a week.
    Weekly,
    /// Once a month.
    Monthly,
}

impl Cadence {
    /// All cadences, shortest first.
    pub const ALL: [Cadence; 4] = [
        Cadence::Hourly,
        Cadence::Daily,
        Cadence::Weekly,
        Cadence::Monthly,
    ];

    /// Lowercase name as used in labels and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Hourly => "hourly",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cadence::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| LabelError::UnknownCadence(s.to_string()))
    }
}

/// Structured form of a generated snapshot label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLabel {
    tag: String,
    taken_at: DateTime<Utc>,
    cadence: Cadence,
}

impl SnapshotLabel {
    /// Build a label from its parts. Sub-second precision is dropped.
    pub fn new(tag: impl Into<String>, taken_at: DateTime<Utc>, cadence: Cadence) -> Self {
        let taken_at = DateTime::from_timestamp(taken_at.timestamp(), 0).unwrap_or(taken_at);
        Self {
            tag: tag.into(),
            taken_at,
            cadence,
        }
    }

    /// Label for a snapshot taken by a scheduled task.
    pub fn auto(taken_at: DateTime<Utc>, cadence: Cadence) -> Self {
        Self::new(AUTO_TAG, taken_at, cadence)
    }

    /// Parse `<tag>_<YYYY-MM-DD_HH-MM-SS>[_UTC]_<cadence>`.
    pub fn parse(label: &str) -> Result<Self, LabelError> {
        let malformed = || LabelError::Malformed(label.to_string());

        let (rest, cadence) = label.rsplit_once('_').ok_or_else(malformed)?;
        let cadence: Cadence = cadence.parse()?;
        let rest = rest.strip_suffix(LEGACY_UTC_SUFFIX).unwrap_or(rest);

        let split = rest.len().checked_sub(TIMESTAMP_LEN).ok_or_else(malformed)?;
        if !rest.is_char_boundary(split) {
            return Err(malformed());
        }
        let (head, stamp) = rest.split_at(split);
        let tag = head.strip_suffix('_').filter(|t| !t.is_empty()).ok_or_else(malformed)?;

        let taken_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|_| malformed())?
            .and_utc();

        Ok(Self {
            tag: tag.to_string(),
            taken_at,
            cadence,
        })
    }

    /// Tag preceding the timestamp.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// When the snapshot was taken.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Cadence suffix.
    pub fn cadence(&self) -> Cadence {
        self.cadence
    }
}

impl fmt::Display for SnapshotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.tag,
            self.taken_at.format(TIMESTAMP_FORMAT),
            self.cadence
        )
    }
}

/// Full snapshot name, `dataset@label`.
///
/// The label is the snapshot's identity across hosts: a replicated snapshot
/// keeps its label while the dataset part changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotName {
    dataset: String,
    label: String,
}

impl SnapshotName {
    /// Join a dataset and a label.
    pub fn new(dataset: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            label: label.into(),
        }
    }

    /// Split `dataset@label` at the first `@`.
    pub fn parse(name: &str) -> Result<Self, LabelError> {
        match name.split_once('@') {
            Some((dataset, label)) if !dataset.is_empty() && !label.is_empty() => {
                Ok(Self::new(dataset, label))
            }
            _ => Err(LabelError::MissingSeparator(name.to_string())),
        }
    }

    /// Dataset part.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Label part, the identity shared by replicas of the same snapshot.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Parse the label into its structured form.
    pub fn parsed_label(&self) -> Result<SnapshotLabel, LabelError> {
        SnapshotLabel::parse(&self.label)
    }

    /// Cadence of the label.
    ///
    /// Generated labels report their parsed cadence. Other labels carry a
    /// cadence when one of their `_`-separated words names it
    /// (`daily_2024-01-01_d`); the last such word wins. `None` for labels
    /// with no cadence word at all.
    pub fn cadence(&self) -> Option<Cadence> {
        if let Ok(label) = self.parsed_label() {
            return Some(label.cadence());
        }
        self.label
            .rsplit('_')
            .find_map(|word| word.parse::<Cadence>().ok())
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset, self.label)
    }
}

impl FromStr for SnapshotName {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SnapshotName {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SnapshotName> for String {
    fn from(value: SnapshotName) -> Self {
        value.to_string()
    }
}
