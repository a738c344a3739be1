use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default number of page bodies kept (one per feed page)
const DEFAULT_CAPACITY: usize = 16;

struct Entry {
    stored_at: Instant,
    body: Arc<str>,
}

/// Caller-owned memo of fetched page bodies.
///
/// The fetcher itself keeps no memory between calls; a caller that wants
/// repeated refreshes to reuse recent responses passes one of these in.
/// The TTL is supplied per lookup so different callers can apply different
/// freshness requirements to the same cache.
pub struct ResponseCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the body stored under `key` if it is younger than `ttl`.
    ///
    /// Expired entries are removed on lookup.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<Arc<str>> {
        let mut entries = self.entries.lock().ok()?;
        let fresh = match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < ttl => Some(Arc::clone(&entry.body)),
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            entries.pop(key);
            tracing::debug!(key = %key, "Cached response expired");
        }
        fresh
    }

    pub fn put(&self, key: &str, body: Arc<str>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                key.to_string(),
                Entry {
                    stored_at: Instant::now(),
                    body,
                },
            );
        }
    }

    /// Drops the entry for `key`, returning whether one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.pop(key).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_get_returns_fresh_entry() {
        let cache = ResponseCache::default();
        cache.put("page-1", Arc::from("body"));
        assert_eq!(cache.get("page-1", HOUR).as_deref(), Some("body"));
    }

    #[test]
    fn test_miss_for_unknown_key() {
        let cache = ResponseCache::default();
        assert!(cache.get("page-1", HOUR).is_none());
    }

    #[test]
    fn test_zero_ttl_expires_and_evicts() {
        let cache = ResponseCache::default();
        cache.put("page-1", Arc::from("body"));
        assert!(cache.get("page-1", Duration::ZERO).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let cache = ResponseCache::default();
        cache.put("page-1", Arc::from("body"));
        assert!(cache.invalidate("page-1"));
        assert!(!cache.invalidate("page-1"));
        assert!(cache.get("page-1", HOUR).is_none());
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = ResponseCache::new(2);
        cache.put("a", Arc::from("1"));
        cache.put("b", Arc::from("2"));
        cache.put("c", Arc::from("3"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a", HOUR).is_none());
        assert!(cache.get("c", HOUR).is_some());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = ResponseCache::new(0);
        cache.put("a", Arc::from("1"));
        assert_eq!(cache.len(), 1);
    }
}
