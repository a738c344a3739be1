//! Last-known-good payload on local disk.
//!
//! The file has the same shape as a live response, so it goes through the
//! same parser. It is read only when a live fetch fails and rewritten after
//! every successful one.

use serde::Serialize;
use std::io::Write;
use std::path::Path;

use super::fetcher::{FeedBatch, FeedError};
use super::parser::parse_page;
use super::record::RawFeature;

/// Maximum fallback file size accepted (256 MB)
const MAX_FALLBACK_SIZE: u64 = 256 * 1024 * 1024;

/// Loads features from the fallback cache file.
///
/// # Errors
///
/// Returns [`FeedError::Fallback`] if the file is missing, unreadable,
/// oversized, or yields no feature records.
pub fn load_fallback(path: &Path) -> Result<FeedBatch, FeedError> {
    let fail = |reason: String| FeedError::Fallback {
        path: path.display().to_string(),
        reason,
    };

    let meta = std::fs::metadata(path).map_err(|e| fail(e.to_string()))?;
    if meta.len() > MAX_FALLBACK_SIZE {
        return Err(fail(format!(
            "file is {} bytes (max {} bytes)",
            meta.len(),
            MAX_FALLBACK_SIZE
        )));
    }

    let bytes = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
    let page = parse_page(&String::from_utf8_lossy(&bytes));
    if page.records.is_empty() {
        return Err(fail("no feature records found".to_string()));
    }

    tracing::info!(
        path = %path.display(),
        records = page.records.len(),
        tier = ?page.tier,
        "Loaded features from fallback cache"
    );

    Ok(FeedBatch::from_page(page, 0))
}

/// Feed-shaped document; field order matches the upstream wrapper
#[derive(Serialize)]
struct FeedDocument<'a> {
    totalrecords: String,
    morerecords: bool,
    results: &'a [RawFeature],
}

/// Writes `raw` objects as a feed-shaped document, atomically.
///
/// Uses write-to-temp-then-rename so a crash mid-write never leaves a
/// truncated file where the last good copy used to be.
pub fn save_fallback(path: &Path, raw: &[RawFeature]) -> std::io::Result<()> {
    let document = FeedDocument {
        totalrecords: raw.len().to_string(),
        morerecords: false,
        results: raw,
    };
    let content = serde_json::to_vec(&document)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", suffix));

    let result = (|| {
        let mut temp_file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        temp_file.write_all(&content)?;
        temp_file.sync_all()?;
        drop(temp_file);

        // Windows rename fails when the destination exists
        #[cfg(windows)]
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    } else {
        tracing::debug!(path = %path.display(), records = raw.len(), "Saved fallback cache");
    }
    result
}
