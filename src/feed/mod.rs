//! Release plans feed: fetching, parsing and normalization.
//!
//! The upstream payload is large and frequently malformed, so parsing is
//! two-tiered:
//!
//! - **Strict**: the body is one JSON document with a `results` array
//! - **Recovery**: a character scanner isolates the array and parses each
//!   object on its own, so one corrupt record cannot poison the batch
//!
//! # Architecture
//!
//! - [`parser`] - Two-tier body parsing into [`FeatureRecord`]s
//! - `scanner` - Brace/quote state scanner used by the recovery tier
//! - [`record`] - Normalized record type, upstream field names, status derivation
//! - [`normalize`] - HTML stripping and date parsing
//! - [`fetcher`] - HTTP pagination, size/time limits, plausibility floor
//! - [`fallback`] - Last-known-good payload on disk
//! - [`cache`] - Caller-owned response memo
//!
//! # Example
//!
//! ```ignore
//! use release_tracker::feed::{build_client, FeedFetcher, FetchOptions};
//!
//! let fetcher = FeedFetcher::new(build_client(&config.user_agent)?, FetchOptions::from_config(&config));
//! let batch = fetcher.fetch_all(None).await?;
//! ```

pub mod cache;
pub mod fallback;
pub mod fetcher;
pub mod normalize;
pub mod parser;
pub mod record;
mod scanner;

pub use cache::ResponseCache;
pub use fallback::{load_fallback, save_fallback};
pub use fetcher::{
    build_client, page_url, FailureKind, FeedBatch, FeedError, FeedFetcher, FetchOptions,
};
pub use normalize::{clean_html, parse_date};
pub use parser::{parse_page, ParseTier, ParsedPage};
pub use record::{fields, sort_by_last_updated, FeatureRecord, RawFeature, Status};
