//! Persistence seams used by the change detector.
//!
//! The detector only talks to these traits. [`crate::storage::Database`]
//! implements both on SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::event::ChangeEvent;
use crate::feed::FeatureRecord;

/// Stored state of one feature as of a previous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub release_plan_id: String,
    /// Monotonic per id, starting at 1
    pub version: i64,
    pub record: FeatureRecord,
    pub fetched_at: DateTime<Utc>,
}

/// Result of a compare-and-set snapshot write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { version: i64 },
    /// Another writer replaced the snapshot after it was read
    Conflict,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),

    #[error("Stored snapshot for {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn latest(&self, release_plan_id: &str) -> Result<Option<Snapshot>, StoreError>;

    /// Writes `record` as the next snapshot for `release_plan_id` and
    /// appends `events` to the change log.
    ///
    /// `expected_version` is the version the caller compared against
    /// (`None` when no snapshot existed). The write must fail with
    /// [`SaveOutcome::Conflict`] if the stored latest version differs, and
    /// then no events are appended. The snapshot and its events land
    /// together or not at all: after an error the stored latest version is
    /// still `expected_version`.
    async fn save(
        &self,
        release_plan_id: &str,
        expected_version: Option<i64>,
        record: &FeatureRecord,
        events: &[ChangeEvent],
    ) -> Result<SaveOutcome, StoreError>;
}

/// Where a refresh got its records from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSource {
    Live,
    Fallback,
}

impl RunSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RunSource::Live => "live",
            RunSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for RunSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(RunSource::Live),
            "fallback" => Ok(RunSource::Fallback),
            other => Err(format!("unknown run source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    /// Finished, but at least one record could not be persisted
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "completed_with_errors" => Ok(RunStatus::CompletedWithErrors),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Final totals written when a run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// `None` when neither the feed nor the fallback produced records
    pub source: Option<RunSource>,
    pub total: usize,
    pub new_count: usize,
    pub changed_count: usize,
    pub status: RunStatus,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            source: None,
            total: 0,
            new_count: 0,
            changed_count: 0,
            status: RunStatus::Failed,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait RunLog: Send + Sync {
    /// Records a run in the `running` state and returns its id.
    async fn start(&self) -> Result<i64, StoreError>;

    async fn complete(&self, run_id: i64, outcome: &RunOutcome) -> Result<(), StoreError>;
}
