//! Configuration file parser for ~/.config/release-tracker/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they
//! are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_FEED_URL: &str = "https://releaseplans.microsoft.com/en-US/allreleaseplans/";

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Release plans endpoint; later pages append `?page=N`.
    pub feed_url: String,

    pub user_agent: String,

    /// Timeout for one page request (headers and body), in seconds.
    pub request_timeout_secs: u64,

    /// Upper bound on pages followed through `morerecords`.
    pub max_pages: u32,

    /// A fetch yielding fewer records than this is treated as a failure.
    pub min_records: usize,

    /// Per-page body size cap, in MB.
    pub max_response_mb: usize,

    /// Last-known-good payload. Defaults to `releaseplans.json` next to the database.
    pub fallback_path: Option<PathBuf>,

    /// Stored old/new change values are cut to this many characters.
    pub value_truncate_len: usize,

    /// How long a fetched page may be reused within one process (0 = never).
    pub cache_ttl_minutes: u64,

    /// Refresh interval in minutes for `refresh --watch`. 0 = run once.
    pub refresh_interval_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            user_agent: concat!(
                "Mozilla/5.0 (compatible; ReleaseTracker/",
                env!("CARGO_PKG_VERSION"),
                ")"
            )
            .to_string(),
            request_timeout_secs: 90,
            max_pages: 10,
            min_records: 50,
            max_response_mb: 64,
            fallback_path: None,
            value_truncate_len: 500,
            cache_ttl_minutes: 240,
            refresh_interval_minutes: 0,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "feed_url",
        "user_agent",
        "request_timeout_secs",
        "max_pages",
        "min_records",
        "max_response_mb",
        "fallback_path",
        "value_truncate_len",
        "cache_ttl_minutes",
        "refresh_interval_minutes",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Non-http(s) `feed_url` or zero timeout → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), feed_url = %config.feed_url, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.feed_url)
            .map_err(|e| ConfigError::Invalid(format!("feed_url '{}': {e}", self.feed_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "feed_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured fallback path, or `releaseplans.json` in `data_dir`.
    pub fn fallback_path_in(&self, data_dir: &Path) -> PathBuf {
        self.fallback_path
            .clone()
            .unwrap_or_else(|| data_dir.join("releaseplans.json"))
    }
}

// ============================================================================
// Tests
// ============================================================================
