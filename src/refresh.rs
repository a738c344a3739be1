//! One refresh run: fetch (or fall back), persist the fallback copy,
//! detect changes, and record the run.

use std::path::PathBuf;
use thiserror::Error;

use crate::detect::{
    ChangeDetector, DetectionReport, RunLog, RunOutcome, RunSource, SnapshotStore,
    DEFAULT_MAX_VALUE_LEN,
};
use crate::feed::{load_fallback, save_fallback, FeedBatch, FeedError, FeedFetcher, ResponseCache};

#[derive(Debug, Error)]
pub enum RefreshError {
    /// Neither the live feed nor the fallback file produced records
    #[error("Live feed failed ({live}); fallback unavailable ({fallback})")]
    NoData { live: FeedError, fallback: FeedError },
}

pub struct RefreshOptions<'a> {
    pub fallback_path: PathBuf,
    pub cache: Option<&'a ResponseCache>,
    pub max_value_len: usize,
}

impl RefreshOptions<'_> {
    pub fn new(fallback_path: impl Into<PathBuf>) -> Self {
        Self {
            fallback_path: fallback_path.into(),
            cache: None,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshSummary {
    pub run_id: Option<i64>,
    pub source: RunSource,
    pub total: usize,
    /// Why the live fetch was abandoned, when the fallback was used
    pub live_error: Option<String>,
    pub report: DetectionReport,
}

impl RefreshSummary {
    pub fn new_count(&self) -> usize {
        self.report.new_count
    }

    pub fn changed_count(&self) -> usize {
        self.report.changed_count
    }
}

/// Runs one refresh against `store`.
///
/// A live fetch failure of any kind falls back to the local copy. After a
/// successful live fetch the local copy is rewritten; failing to write it
/// is logged and does not fail the run. The run log is best-effort: if it
/// cannot be written the refresh still proceeds.
///
/// # Errors
///
/// Returns [`RefreshError::NoData`] when both the live feed and the
/// fallback file fail. Stored snapshots are untouched in that case.
pub async fn refresh<S>(
    fetcher: &FeedFetcher,
    store: &S,
    options: &RefreshOptions<'_>,
) -> Result<RefreshSummary, RefreshError>
where
    S: SnapshotStore + RunLog,
{
    let run_id = match store.start().await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(error = %e, "Could not record refresh start");
            None
        }
    };

    let (batch, source, live_error) = match fetcher.fetch_all(options.cache).await {
        Ok(batch) => {
            if let Err(e) = save_fallback(&options.fallback_path, &batch.raw) {
                tracing::warn!(
                    path = %options.fallback_path.display(),
                    error = %e,
                    "Failed to update fallback cache"
                );
            }
            (batch, RunSource::Live, None)
        }
        Err(live) => {
            tracing::warn!(kind = ?live.kind(), error = %live, "Live fetch failed, using fallback cache");
            match load_fallback(&options.fallback_path) {
                Ok(batch) => (batch, RunSource::Fallback, Some(live.to_string())),
                Err(fallback) => {
                    let err = RefreshError::NoData { live, fallback };
                    tracing::error!(error = %err, "Refresh failed");
                    finish(store, run_id, &RunOutcome::failed(err.to_string())).await;
                    return Err(err);
                }
            }
        }
    };

    let FeedBatch { records, .. } = batch;
    let report = ChangeDetector::new(store)
        .with_max_value_len(options.max_value_len)
        .run(&records)
        .await;

    let outcome = RunOutcome {
        source: Some(source),
        total: records.len(),
        new_count: report.new_count,
        changed_count: report.changed_count,
        status: report.status(),
        error: report.failure_summary().or_else(|| live_error.clone()),
    };
    finish(store, run_id, &outcome).await;

    tracing::info!(
        source = %source,
        total = records.len(),
        new = report.new_count,
        changed = report.changed_count,
        status = %outcome.status,
        "Refresh complete"
    );

    Ok(RefreshSummary {
        run_id,
        source,
        total: records.len(),
        live_error,
        report,
    })
}

async fn finish<S: RunLog>(store: &S, run_id: Option<i64>, outcome: &RunOutcome) {
    let Some(run_id) = run_id else {
        return;
    };
    if let Err(e) = store.complete(run_id, outcome).await {
        tracing::warn!(run_id, error = %e, "Could not record refresh result");
    }
}
