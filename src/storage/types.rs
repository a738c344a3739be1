use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::detect::{ChangeEvent, ChangeType, RunSource, RunStatus, StoreError, TrackedField};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock longer than busy_timeout
    #[error("The database is locked by another release-tracker process. Please wait and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored row could not be decoded
    #[error("Stored data for {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if is_lock_message(&error_string) || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Corrupt { id, reason } => StoreError::Corrupt { id, reason },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub(crate) fn is_lock_message(lowercase: &str) -> bool {
    lowercase.contains("database is locked")
        || lowercase.contains("database table is locked")
        || lowercase.contains("sqlite_busy")
        || lowercase.contains("sqlite_locked")
}

pub(crate) fn to_timestamp(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub(crate) fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for change_log queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChangeRow {
    pub id: i64,
    pub release_plan_id: String,
    pub feature_name: String,
    pub product_name: String,
    pub change_type: String,
    pub field_changed: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub detected_at: i64,
}

impl ChangeRow {
    pub(crate) fn into_logged(self) -> Result<LoggedChange, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::Corrupt {
            id: format!("change {}", self.id),
            reason,
        };
        let change_type: ChangeType = self.change_type.parse().map_err(corrupt)?;
        let field_changed = match self.field_changed.as_deref() {
            Some(name) => Some(
                TrackedField::from_name(name)
                    .ok_or_else(|| corrupt(format!("unknown tracked field: {name}")))?,
            ),
            None => None,
        };

        Ok(LoggedChange {
            id: self.id,
            event: ChangeEvent {
                release_plan_id: self.release_plan_id,
                feature_name: self.feature_name,
                product_name: self.product_name,
                change_type,
                field_changed,
                old_value: self.old_value,
                new_value: self.new_value,
                detected_at: from_timestamp(self.detected_at),
            },
        })
    }
}

/// A change event as read back from the change log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedChange {
    pub id: i64,
    pub event: ChangeEvent,
}

/// Internal row type for refresh_log queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunRow {
    pub id: i64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub total_features: i64,
    pub new_features: i64,
    pub changed_features: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub source: Option<String>,
}

impl RunRow {
    pub(crate) fn into_record(self) -> Result<RunRecord, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::Corrupt {
            id: format!("run {}", self.id),
            reason,
        };
        let status: RunStatus = self.status.parse().map_err(corrupt)?;
        let source = match self.source.as_deref() {
            Some(s) => Some(s.parse::<RunSource>().map_err(corrupt)?),
            None => None,
        };

        Ok(RunRecord {
            id: self.id,
            started_at: from_timestamp(self.started_at),
            completed_at: self.completed_at.map(from_timestamp),
            total_features: self.total_features,
            new_features: self.new_features,
            changed_features: self.changed_features,
            status,
            error_message: self.error_message,
            source,
        })
    }
}

/// One row of the refresh run log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_features: i64,
    pub new_features: i64,
    pub changed_features: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub source: Option<RunSource>,
}
