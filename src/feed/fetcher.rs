use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::cache::ResponseCache;
use super::parser::{parse_page, ParseTier, ParsedPage};
use super::record::{FeatureRecord, RawFeature};
use crate::config::Config;

/// Errors that can occur while fetching the release plans feed.
///
/// Transport-level variants and [`FeedError::Implausible`] are reported
/// separately through [`FeedError::kind`] so callers can choose different
/// fallback behavior for each.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Configured feed URL could not be turned into a page URL
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
    /// Parsing succeeded but yielded fewer records than the plausibility floor
    #[error("Implausible feed: parsed {found} records, expected at least {floor}")]
    Implausible { found: usize, floor: usize },
    /// Local fallback cache missing or unusable
    #[error("Fallback cache unavailable at {path}: {reason}")]
    Fallback { path: String, reason: String },
}

/// Coarse failure category used for fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Implausible,
    Fallback,
}

impl FeedError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FeedError::Network(_)
            | FeedError::HttpStatus(_)
            | FeedError::Timeout(_)
            | FeedError::ResponseTooLarge(_)
            | FeedError::InvalidUrl(_) => FailureKind::Transport,
            FeedError::Implausible { .. } => FailureKind::Implausible,
            FeedError::Fallback { .. } => FailureKind::Fallback,
        }
    }
}

/// Records merged from one or more pages (or the fallback file).
#[derive(Debug, Clone, Default)]
pub struct FeedBatch {
    pub records: Vec<FeatureRecord>,
    pub raw: Vec<RawFeature>,
    /// Pages fetched over HTTP; 0 when loaded from the fallback file
    pub pages: u32,
    /// True if any page needed the recovery tier
    pub recovered: bool,
    /// Elements or candidates dropped across all pages
    pub skipped: usize,
}

impl FeedBatch {
    pub(crate) fn from_page(page: ParsedPage, pages: u32) -> Self {
        Self {
            recovered: page.tier == ParseTier::Recovery,
            skipped: page.skipped,
            records: page.records,
            raw: page.raw,
            pages,
        }
    }

    fn absorb(&mut self, page: ParsedPage) {
        self.recovered |= page.tier == ParseTier::Recovery;
        self.skipped += page.skipped;
        self.records.extend(page.records);
        self.raw.extend(page.raw);
        self.pages += 1;
    }
}

/// Fetch limits and thresholds.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub feed_url: String,
    pub timeout: Duration,
    pub max_pages: u32,
    pub min_records: usize,
    pub max_response_bytes: usize,
    pub cache_ttl: Duration,
}

impl FetchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            feed_url: config.feed_url.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_pages: config.max_pages.max(1),
            min_records: config.min_records,
            max_response_bytes: config.max_response_mb.saturating_mul(1024 * 1024),
            cache_ttl: Duration::from_secs(config.cache_ttl_minutes.saturating_mul(60)),
        }
    }
}

/// Build the HTTP client used for feed requests.
///
/// Sends a descriptive User-Agent plus standard accept headers. Redirects
/// are limited to 3 hops with loop detection.
pub fn build_client(user_agent: &str) -> Result<reqwest::Client, FeedError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    let policy = Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }
        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }
        tracing::debug!(to = %url, hop = attempt.previous().len() + 1, "Following redirect");
        attempt.follow()
    });

    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .redirect(policy)
        .build()?;
    Ok(client)
}

/// Returns the URL for a 1-based page number.
///
/// Page 1 is the bare feed URL; later pages add `?page=N`.
pub fn page_url(feed_url: &str, page: u32) -> Result<String, FeedError> {
    let mut url =
        url::Url::parse(feed_url).map_err(|e| FeedError::InvalidUrl(format!("{feed_url}: {e}")))?;
    if page > 1 {
        url.query_pairs_mut().append_pair("page", &page.to_string());
    }
    Ok(url.into())
}

/// Fetches and parses the release plans feed.
///
/// Holds no state between calls beyond the HTTP client's connection pool;
/// response memoization is the caller's [`ResponseCache`].
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, options: FetchOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetches every page and merges the records.
    ///
    /// Follows `morerecords` up to `max_pages`. A page that needed the
    /// recovery tier stops pagination. The merged batch must reach the
    /// plausibility floor, otherwise the whole fetch is a failure.
    ///
    /// # Errors
    ///
    /// - [`FeedError::Network`], [`FeedError::HttpStatus`], [`FeedError::Timeout`],
    ///   [`FeedError::ResponseTooLarge`], [`FeedError::InvalidUrl`]: transport failures
    /// - [`FeedError::Implausible`]: fewer than `min_records` records parsed
    pub async fn fetch_all(&self, cache: Option<&ResponseCache>) -> Result<FeedBatch, FeedError> {
        let mut batch = FeedBatch::default();
        let mut fetched_urls = Vec::new();

        for page in 1..=self.options.max_pages {
            let url = page_url(&self.options.feed_url, page)?;
            let body = self.page_body(&url, cache).await?;
            fetched_urls.push(url);

            let parsed = parse_page(&body);
            let recovered = parsed.tier == ParseTier::Recovery;
            let more = parsed.more_records;

            tracing::debug!(
                page = page,
                records = parsed.records.len(),
                skipped = parsed.skipped,
                recovered = recovered,
                more = more,
                "Parsed feed page"
            );
            batch.absorb(parsed);

            if recovered || !more {
                break;
            }
            if page == self.options.max_pages {
                tracing::warn!(
                    max_pages = self.options.max_pages,
                    "Feed reports more records but page limit reached"
                );
            }
        }

        if batch.records.len() < self.options.min_records {
            // Never memoize a broken response
            if let Some(cache) = cache {
                for url in &fetched_urls {
                    cache.invalidate(url);
                }
            }
            return Err(FeedError::Implausible {
                found: batch.records.len(),
                floor: self.options.min_records,
            });
        }

        tracing::info!(
            records = batch.records.len(),
            pages = batch.pages,
            skipped = batch.skipped,
            recovered = batch.recovered,
            "Fetched release plans"
        );
        Ok(batch)
    }

    async fn page_body(
        &self,
        url: &str,
        cache: Option<&ResponseCache>,
    ) -> Result<Arc<str>, FeedError> {
        if let Some(body) = cache.and_then(|c| c.get(url, self.options.cache_ttl)) {
            tracing::debug!(url = %url, "Using cached feed response");
            return Ok(body);
        }

        let body: Arc<str> = Arc::from(self.fetch_page(url).await?);
        if let Some(cache) = cache {
            cache.put(url, Arc::clone(&body));
        }
        Ok(body)
    }

    /// Fetches one page body as text.
    ///
    /// The whole exchange (headers and body) shares one timeout. Invalid
    /// UTF-8 is replaced rather than rejected; the parser copes with it.
    pub async fn fetch_page(&self, url: &str) -> Result<String, FeedError> {
        let timeout = self.options.timeout;
        let bytes = tokio::time::timeout(timeout, async {
            let response = self.client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(FeedError::HttpStatus(response.status().as_u16()));
            }
            read_limited_bytes(response, self.options.max_response_bytes).await
        })
        .await
        .map_err(|_| FeedError::Timeout(timeout.as_secs()))??;

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FeedError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FeedError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FeedError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Wrapper keys written in upstream order (record count first)
    fn payload(ids: std::ops::Range<usize>, more: bool) -> String {
        let results: Vec<String> = ids
            .map(|i| {
                json!({
                    "Release Plan ID": format!("id-{i}"),
                    "Feature name": format!("Feature {i}"),
                })
                .to_string()
            })
            .collect();
        format!(
            r#"{{"totalrecords":"{}","morerecords":{},"results":[{}]}}"#,
            results.len(),
            more,
            results.join(",")
        )
    }

    fn options(url: String, min_records: usize) -> FetchOptions {
        FetchOptions {
            feed_url: url,
            timeout: Duration::from_secs(5),
            max_pages: 10,
            min_records,
            max_response_bytes: 1024 * 1024,
            cache_ttl: Duration::from_secs(3600),
        }
    }

    fn fetcher(server: &MockServer, min_records: usize) -> FeedFetcher {
        FeedFetcher::new(
            reqwest::Client::new(),
            options(format!("{}/plans/", server.uri()), min_records),
        )
    }

    #[test]
    fn test_page_url() {
        let base = "https://example.com/allreleaseplans/";
        assert_eq!(page_url(base, 1).unwrap(), base);
        assert_eq!(
            page_url(base, 3).unwrap(),
            "https://example.com/allreleaseplans/?page=3"
        );
        assert!(matches!(
            page_url("not a url", 1),
            Err(FeedError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(FeedError::HttpStatus(500).kind(), FailureKind::Transport);
        assert_eq!(FeedError::Timeout(90).kind(), FailureKind::Transport);
        assert_eq!(
            FeedError::Implausible { found: 3, floor: 50 }.kind(),
            FailureKind::Implausible
        );
    }

    #[tokio::test]
    async fn test_single_page_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plans/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(payload(0..60, false)))
            .expect(1)
            .mount(&server)
            .await;

        let batch = fetcher(&server, 50).fetch_all(None).await.unwrap();
        assert_eq!(batch.records.len(), 60);
        assert_eq!(batch.raw.len(), 60);
        assert_eq!(batch.pages, 1);
        assert!(!batch.recovered);
    }

    #[tokio::test]
    async fn test_pagination_merges_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(payload(30..60, false)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/plans/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(payload(0..30, true)))
            .expect(1)
            .mount(&server)
            .await;

        let batch = fetcher(&server, 50).fetch_all(None).await.unwrap();
        assert_eq!(batch.pages, 2);
        assert_eq!(batch.records.len(), 60);
        assert_eq!(batch.records[0].id, "id-0");
        assert_eq!(batch.records[59].id, "id-59");
    }

    #[tokio::test]
    async fn test_page_limit_bounds_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(payload(0..5, true)))
            .expect(3)
            .mount(&server)
            .await;

        let mut opts = options(format!("{}/plans/", server.uri()), 1);
        opts.max_pages = 3;
        let batch = FeedFetcher::new(reqwest::Client::new(), opts)
            .fetch_all(None)
            .await
            .unwrap();
        assert_eq!(batch.pages, 3);
        assert_eq!(batch.records.len(), 15);
    }

    #[tokio::test]
    async fn test_below_floor_is_implausible() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(payload(0..10, false)))
            .mount(&server)
            .await;

        let err = fetcher(&server, 50).fetch_all(None).await.unwrap_err();
        match err {
            FeedError::Implausible { found, floor } => {
                assert_eq!(found, 10);
                assert_eq!(floor, 50);
            }
            e => panic!("Expected Implausible, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(&server, 50).fetch_all(None).await.unwrap_err();
        assert!(matches!(err, FeedError::HttpStatus(503)));
        assert_eq!(err.kind(), FailureKind::Transport);
    }

    #[tokio::test]
    async fn test_malformed_page_is_recovered_and_stops_pagination() {
        let server = MockServer::start().await;
        let mut body = payload(0..60, true);
        body.truncate(body.len() - 40);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let batch = fetcher(&server, 50).fetch_all(None).await.unwrap();
        assert!(batch.recovered);
        assert_eq!(batch.pages, 1);
        assert!(batch.records.len() >= 58);
    }

    #[tokio::test]
    async fn test_response_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(payload(0..60, false)))
            .mount(&server)
            .await;

        let mut opts = options(format!("{}/plans/", server.uri()), 1);
        opts.max_response_bytes = 100;
        let err = FeedFetcher::new(reqwest::Client::new(), opts)
            .fetch_all(None)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::ResponseTooLarge(100)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(payload(0..60, false))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let mut opts = options(format!("{}/plans/", server.uri()), 1);
        opts.timeout = Duration::from_millis(200);
        let err = FeedFetcher::new(reqwest::Client::new(), opts)
            .fetch_all(None)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(payload(0..60, false)))
            .expect(1)
            .mount(&server)
            .await;

        let cache = ResponseCache::default();
        let fetcher = fetcher(&server, 50);
        let first = fetcher.fetch_all(Some(&cache)).await.unwrap();
        let second = fetcher.fetch_all(Some(&cache)).await.unwrap();
        assert_eq!(first.records, second.records);
    }

    #[tokio::test]
    async fn test_implausible_response_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(payload(0..3, false)))
            .expect(2)
            .mount(&server)
            .await;

        let cache = ResponseCache::default();
        let fetcher = fetcher(&server, 50);
        assert!(fetcher.fetch_all(Some(&cache)).await.is_err());
        assert!(cache.is_empty());
        assert!(fetcher.fetch_all(Some(&cache)).await.is_err());
    }
}
