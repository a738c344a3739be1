use chrono::{DateTime, Utc};

use super::event::{diff_records, ChangeEvent};
use super::store::{RunStatus, SaveOutcome, SnapshotStore, StoreError};
use crate::feed::FeatureRecord;

/// Default cap on stored old/new values, in characters
pub const DEFAULT_MAX_VALUE_LEN: usize = 500;

/// A record whose snapshot or events could not be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceFailure {
    pub release_plan_id: String,
    pub message: String,
}

/// Totals for one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub new_count: usize,
    /// Records with at least one changed field (not the number of events)
    pub changed_count: usize,
    pub unchanged_count: usize,
    /// Records without a release plan id
    pub skipped_untracked: usize,
    /// Records whose snapshot was replaced by a concurrent writer
    pub conflicts: usize,
    pub events: Vec<ChangeEvent>,
    pub failures: Vec<PersistenceFailure>,
}

impl DetectionReport {
    pub fn status(&self) -> RunStatus {
        if self.failures.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        }
    }

    /// One-line description of the persistence failures, if any.
    pub fn failure_summary(&self) -> Option<String> {
        let first = self.failures.first()?;
        Some(format!(
            "{} record(s) failed to persist; first: {}: {}",
            self.failures.len(),
            first.release_plan_id,
            first.message
        ))
    }
}

enum Outcome {
    New,
    Changed,
    Unchanged,
    Conflict,
}

/// Compares fresh records against stored snapshots and appends change events.
///
/// Records are processed one at a time. For each id the new snapshot and its
/// events are committed together, with compare-and-set against the version
/// that was read. A lost race or a failed commit leaves nothing behind, so
/// the next run sees the same difference again.
pub struct ChangeDetector<'a> {
    store: &'a dyn SnapshotStore,
    max_value_len: usize,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(store: &'a dyn SnapshotStore) -> Self {
        Self {
            store,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }

    pub fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }

    pub async fn run(&self, records: &[FeatureRecord]) -> DetectionReport {
        self.run_at(records, Utc::now()).await
    }

    /// Runs detection with a fixed detection timestamp.
    pub async fn run_at(&self, records: &[FeatureRecord], now: DateTime<Utc>) -> DetectionReport {
        let mut report = DetectionReport::default();

        for record in records {
            if !record.is_trackable() {
                report.skipped_untracked += 1;
                continue;
            }

            match self.detect_one(record, now, &mut report.events).await {
                Ok(Outcome::New) => report.new_count += 1,
                Ok(Outcome::Changed) => report.changed_count += 1,
                Ok(Outcome::Unchanged) => report.unchanged_count += 1,
                Ok(Outcome::Conflict) => {
                    tracing::warn!(id = %record.id, "Snapshot changed concurrently, skipping");
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "Failed to persist feature");
                    report.failures.push(PersistenceFailure {
                        release_plan_id: record.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            new = report.new_count,
            changed = report.changed_count,
            unchanged = report.unchanged_count,
            skipped = report.skipped_untracked,
            conflicts = report.conflicts,
            failures = report.failures.len(),
            events = report.events.len(),
            "Change detection finished"
        );
        report
    }

    async fn detect_one(
        &self,
        record: &FeatureRecord,
        now: DateTime<Utc>,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<Outcome, StoreError> {
        let previous = self.store.latest(&record.id).await?;

        let (expected, pending, outcome) = match previous {
            None => (
                None,
                vec![ChangeEvent::new_feature(record, now)],
                Outcome::New,
            ),
            Some(snapshot) => {
                let diffs = diff_records(&snapshot.record, record);
                if diffs.is_empty() {
                    return Ok(Outcome::Unchanged);
                }
                let pending: Vec<ChangeEvent> = diffs
                    .iter()
                    .map(|change| ChangeEvent::field_change(record, change, self.max_value_len, now))
                    .collect();
                (Some(snapshot.version), pending, Outcome::Changed)
            }
        };

        match self.store.save(&record.id, expected, record, &pending).await? {
            SaveOutcome::Conflict => Ok(Outcome::Conflict),
            SaveOutcome::Saved { version } => {
                tracing::debug!(id = %record.id, version, events = pending.len(), "Saved snapshot");
                events.extend(pending);
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::event::{ChangeType, TrackedField};
    use crate::detect::store::Snapshot;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        snapshots: Mutex<HashMap<String, Vec<FeatureRecord>>>,
        events: Mutex<Vec<ChangeEvent>>,
        fail_saves_for: HashSet<String>,
        /// Change log writes fail, which must also roll back the snapshot
        fail_event_writes: AtomicBool,
        /// Latest reads lag one version behind the stored head
        stale_reads: bool,
    }

    impl MemoryStore {
        fn version_of(&self, id: &str) -> i64 {
            self.snapshots
                .lock()
                .unwrap()
                .get(id)
                .map(|v| v.len() as i64)
                .unwrap_or(0)
        }

        fn event_count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn latest(&self, id: &str) -> Result<Option<Snapshot>, StoreError> {
            let snapshots = self.snapshots.lock().unwrap();
            let Some(history) = snapshots.get(id) else {
                return Ok(None);
            };
            let index = if self.stale_reads && history.len() > 1 {
                history.len() - 2
            } else {
                history.len() - 1
            };
            Ok(Some(Snapshot {
                release_plan_id: id.to_string(),
                version: index as i64 + 1,
                record: history[index].clone(),
                fetched_at: Utc::now(),
            }))
        }

        async fn save(
            &self,
            id: &str,
            expected: Option<i64>,
            record: &FeatureRecord,
            events: &[ChangeEvent],
        ) -> Result<SaveOutcome, StoreError> {
            if self.fail_saves_for.contains(id) {
                return Err(StoreError::Backend("disk full".into()));
            }
            let mut snapshots = self.snapshots.lock().unwrap();
            let current = snapshots.get(id).map(|h| h.len() as i64).unwrap_or(0);
            if current != expected.unwrap_or(0) {
                return Ok(SaveOutcome::Conflict);
            }
            if self.fail_event_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("change log unavailable".into()));
            }
            let history = snapshots.entry(id.to_string()).or_default();
            history.push(record.clone());
            self.events.lock().unwrap().extend_from_slice(events);
            Ok(SaveOutcome::Saved {
                version: history.len() as i64,
            })
        }
    }

    fn record(id: &str) -> FeatureRecord {
        FeatureRecord {
            id: id.into(),
            feature_name: format!("Feature {id}"),
            product_name: "Dynamics 365 Sales".into(),
            business_value: "Sell faster".into(),
            ga_date: NaiveDate::from_ymd_opt(2025, 4, 1),
            ga_wave: "2025 release wave 1".into(),
            ..Default::default()
        }
    }

    fn detector(store: &MemoryStore) -> ChangeDetector<'_> {
        ChangeDetector::new(store)
    }

    #[tokio::test]
    async fn test_new_feature_yields_one_event() {
        let store = MemoryStore::default();
        let report = detector(&store).run(&[record("a")]).await;

        assert_eq!(report.new_count, 1);
        assert_eq!(report.changed_count, 0);
        assert_eq!(report.events.len(), 1);
        let event = &report.events[0];
        assert_eq!(event.change_type, ChangeType::NewFeature);
        assert_eq!(event.field_changed, None);
        assert_eq!(event.old_value, None);
        assert_eq!(event.new_value, None);
        assert_eq!(event.feature_name, "Feature a");
        assert_eq!(store.version_of("a"), 1);
    }

    #[tokio::test]
    async fn test_second_identical_run_is_silent() {
        let store = MemoryStore::default();
        let records = [record("a"), record("b")];
        detector(&store).run(&records).await;
        let report = detector(&store).run(&records).await;

        assert_eq!((report.new_count, report.changed_count), (0, 0));
        assert_eq!(report.unchanged_count, 2);
        assert!(report.events.is_empty());
        assert_eq!(store.event_count(), 2);
        assert_eq!(store.version_of("a"), 1);
    }

    #[tokio::test]
    async fn test_ga_date_change_is_one_date_event() {
        let store = MemoryStore::default();
        detector(&store).run(&[record("a")]).await;

        let mut moved = record("a");
        moved.ga_date = NaiveDate::from_ymd_opt(2025, 6, 1);
        let report = detector(&store).run(&[moved]).await;

        assert_eq!(report.changed_count, 1);
        assert_eq!(report.events.len(), 1);
        let event = &report.events[0];
        assert_eq!(event.change_type, ChangeType::DateChange);
        assert_eq!(event.field_changed, Some(TrackedField::GaDate));
        assert_eq!(event.old_value.as_deref(), Some("2025-04-01"));
        assert_eq!(event.new_value.as_deref(), Some("2025-06-01"));
        assert_eq!(store.version_of("a"), 2);
    }

    #[tokio::test]
    async fn test_two_fields_changed_counts_record_once() {
        let store = MemoryStore::default();
        detector(&store).run(&[record("a")]).await;

        let mut updated = record("a");
        updated.ga_date = NaiveDate::from_ymd_opt(2025, 6, 1);
        updated.business_value = "Sell much faster".into();
        let report = detector(&store).run(&[updated]).await;

        assert_eq!(report.changed_count, 1);
        let kinds: Vec<_> = report.events.iter().map(|e| e.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::DateChange, ChangeType::DescriptionChange]);
    }

    #[tokio::test]
    async fn test_date_removed_is_reported_as_empty() {
        let store = MemoryStore::default();
        detector(&store).run(&[record("a")]).await;

        let mut cleared = record("a");
        cleared.ga_date = None;
        let report = detector(&store).run(&[cleared]).await;

        assert_eq!(report.events[0].new_value.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_long_values_are_truncated() {
        let store = MemoryStore::default();
        detector(&store).run(&[record("a")]).await;

        let mut verbose = record("a");
        verbose.feature_details = "é".repeat(2000);
        let report = detector(&store).run(&[verbose]).await;

        assert!(report.failures.is_empty());
        let stored = report.events[0].new_value.as_deref().unwrap();
        assert_eq!(stored.chars().count(), DEFAULT_MAX_VALUE_LEN);
    }

    #[tokio::test]
    async fn test_custom_value_bound() {
        let store = MemoryStore::default();
        detector(&store).run(&[record("a")]).await;

        let mut verbose = record("a");
        verbose.enabled_for = "Admins, makers, or analysts, automatically".into();
        let report = ChangeDetector::new(&store)
            .with_max_value_len(6)
            .run(&[verbose])
            .await;

        assert_eq!(report.events[0].new_value.as_deref(), Some("Admins"));
        assert_eq!(report.events[0].change_type, ChangeType::StatusChange);
    }

    #[tokio::test]
    async fn test_records_without_id_are_skipped() {
        let store = MemoryStore::default();
        let report = detector(&store).run(&[record(""), record("a")]).await;

        assert_eq!(report.skipped_untracked, 1);
        assert_eq!(report.new_count, 1);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_write_conflicts_without_events() {
        let store = MemoryStore {
            stale_reads: true,
            ..Default::default()
        };
        detector(&store).run(&[record("a")]).await;
        let mut second = record("a");
        second.ga_wave = "2025 release wave 2".into();
        detector(&store).run(&[second]).await;
        assert_eq!(store.event_count(), 2);

        // Reads now lag one version behind the stored head
        let mut third = record("a");
        third.ga_wave = "2026 release wave 1".into();
        let report = detector(&store).run(&[third]).await;

        assert_eq!(report.conflicts, 1);
        assert_eq!(report.changed_count, 0);
        assert!(report.events.is_empty());
        assert_eq!(store.event_count(), 2);
        assert_eq!(store.version_of("a"), 2);
    }

    #[tokio::test]
    async fn test_failed_record_does_not_abort_batch() {
        let store = MemoryStore {
            fail_saves_for: HashSet::from(["b".to_string()]),
            ..Default::default()
        };
        let report = detector(&store)
            .run(&[record("a"), record("b"), record("c")])
            .await;

        assert_eq!(report.new_count, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].release_plan_id, "b");
        assert!(report.failures[0].message.contains("disk full"));
        assert_eq!(report.status(), RunStatus::CompletedWithErrors);
        assert!(report.failure_summary().unwrap().starts_with("1 record(s)"));
        assert_eq!(store.version_of("c"), 1);
    }

    #[tokio::test]
    async fn test_event_write_failure_keeps_snapshot_unchanged() {
        let store = MemoryStore {
            fail_event_writes: AtomicBool::new(true),
            ..Default::default()
        };
        let report = detector(&store).run(&[record("a")]).await;

        assert_eq!(report.new_count, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(report.events.is_empty());
        assert_eq!(store.version_of("a"), 0);
    }

    #[tokio::test]
    async fn test_rerun_after_failed_event_write_logs_the_events() {
        let store = MemoryStore::default();
        detector(&store).run(&[record("a")]).await;

        let mut moved = record("a");
        moved.ga_date = NaiveDate::from_ymd_opt(2025, 9, 1);
        store.fail_event_writes.store(true, Ordering::SeqCst);
        let failed = detector(&store).run(std::slice::from_ref(&moved)).await;
        assert_eq!(failed.failures.len(), 1);
        assert_eq!(store.version_of("a"), 1);

        store.fail_event_writes.store(false, Ordering::SeqCst);
        let retried = detector(&store).run(&[moved]).await;
        assert_eq!(retried.changed_count, 1);
        assert_eq!(retried.events.len(), 1);
        assert_eq!(retried.events[0].change_type, ChangeType::DateChange);
        assert_eq!(store.event_count(), 2);
        assert_eq!(store.version_of("a"), 2);
    }

    #[tokio::test]
    async fn test_clean_run_status() {
        let store = MemoryStore::default();
        let report = detector(&store).run(&[record("a")]).await;
        assert_eq!(report.status(), RunStatus::Completed);
        assert_eq!(report.failure_summary(), None);
    }
}
