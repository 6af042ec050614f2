//! Time-bounded data-source cache using moka
//!
//! Holds reference-data payloads (option lists, server-computed values) for
//! one schema session. Lookups are synchronous; populating on a miss is the
//! caller's job.

use moka::sync::Cache;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache key: template plus data-source id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Template id
    pub template_id: String,
    /// Data-source id
    pub source_id: String,
}

/// Cached payload with its fetch time
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Entry key
    pub key: CacheKey,
    /// Payload as returned by the data source
    pub payload: Value,
    /// When the payload was stored
    pub fetched_at: Instant,
}

impl CacheEntry {
    /// Whether the entry is still inside the TTL window at `now`
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
    /// Lookups served from cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
}

/// Data-source cache scoped to one template
///
/// Entries expire `ttl` after they were stored. [`DataSourceCache::invalidate_all`]
/// is for hot-reload only; form resets keep the cache.
#[derive(Debug, Clone)]
pub struct DataSourceCache {
    template_id: String,
    ttl: Duration,
    inner: Cache<CacheKey, Arc<CacheEntry>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl DataSourceCache {
    /// Create cache for `template_id`
    #[must_use]
    pub fn new(template_id: impl Into<String>, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            template_id: template_id.into(),
            ttl,
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create cache with the default capacity and 5 minute TTL
    #[inline]
    #[must_use]
    pub fn with_defaults(template_id: impl Into<String>) -> Self {
        Self::new(template_id, 1024, Duration::from_secs(300))
    }

    fn key(&self, source_id: &str) -> CacheKey {
        CacheKey {
            template_id: self.template_id.clone(),
            source_id: source_id.to_string(),
        }
    }

    /// Cached payload, or `None` on a miss or expired entry
    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<Value> {
        let hit = self
            .inner
            .get(&self.key(source_id))
            .filter(|entry| entry.is_fresh(Instant::now(), self.ttl))
            .map(|entry| entry.payload.clone());
        match hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Full entry for `source_id`, including its fetch time
    #[must_use]
    pub fn entry(&self, source_id: &str) -> Option<Arc<CacheEntry>> {
        self.inner
            .get(&self.key(source_id))
            .filter(|entry| entry.is_fresh(Instant::now(), self.ttl))
    }

    /// Store a payload fetched just now
    pub fn set(&self, source_id: &str, payload: Value) {
        let key = self.key(source_id);
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            fetched_at: Instant::now(),
        };
        self.inner.insert(key, Arc::new(entry));
    }

    /// Drop one entry
    pub fn invalidate(&self, source_id: &str) {
        self.inner.invalidate(&self.key(source_id));
    }

    /// Drop every entry; reserved for hot-reload
    pub fn invalidate_all(&self) {
        tracing::debug!("Invalidating data-source cache for {}", self.template_id);
        self.inner.invalidate_all();
    }

    /// Template this cache belongs to
    #[inline]
    #[must_use]
    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    /// Configured time-to-live
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks();
        CacheStats {
            entry_count: self.inner.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
