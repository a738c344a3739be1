//! Snapshot-based change detection.
//!
//! Each run compares freshly fetched records against the latest stored
//! snapshot per release plan id and appends one change event per differing
//! tracked field (or a single `new_feature` event for unseen ids).

pub mod detector;
pub mod event;
pub mod store;

pub use detector::{ChangeDetector, DetectionReport, PersistenceFailure, DEFAULT_MAX_VALUE_LEN};
pub use event::{diff_records, ChangeEvent, ChangeType, FieldChange, TrackedField};
pub use store::{
    RunLog, RunOutcome, RunSource, RunStatus, SaveOutcome, Snapshot, SnapshotStore, StoreError,
};
