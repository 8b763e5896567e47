//! LRU + TTL result cache.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use mca_telemetry::{Metrics, metrics::names};
use serde::Serialize;
use tracing::trace;

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries removed to respect `max_entries`.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expired: u64,
    /// Entries currently held.
    pub entries: usize,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    ttl: Duration,
    stats: CacheStats,
}

fn capacity(max_entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)
}

/// Bounded cache with least-recently-used eviction and per-entry TTL.
///
/// When built with [`ResultCache::with_metrics`], hits, misses and lookup
/// latency are also recorded in the shared registry.
pub struct ResultCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    metrics: Option<Metrics>,
}

impl<K: Eq + Hash + Clone, V: Clone> ResultCache<K, V> {
    /// Create a cache holding at most `max_entries` (at least one) for at
    /// most `ttl` each.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity(max_entries)),
                ttl,
                stats: CacheStats::default(),
            }),
            metrics: None,
        }
    }

    /// Record hits, misses and lookup latency in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Look up `key`, refreshing its recency.
    pub fn get(&self, key: &K) -> Option<V> {
        let _timer = self
            .metrics
            .as_ref()
            .map(|m| m.latency(names::CACHE_LOOKUP_SECONDS).start());

        let mut inner = self.lock();
        let ttl = inner.ttl;
        let expired = inner
            .entries
            .peek(key)
            .map(|e| e.inserted.elapsed() > ttl);

        let result = match expired {
            Some(true) => {
                inner.entries.pop(key);
                inner.stats.expired = inner.stats.expired.saturating_add(1);
                None
            },
            Some(false) => inner.entries.get(key).map(|e| e.value.clone()),
            None => None,
        };

        if result.is_some() {
            inner.stats.hits = inner.stats.hits.saturating_add(1);
        } else {
            inner.stats.misses = inner.stats.misses.saturating_add(1);
        }
        drop(inner);

        if let Some(metrics) = &self.metrics {
            let name = if result.is_some() {
                names::CACHE_HITS
            } else {
                names::CACHE_MISSES
            };
            metrics.counter(name).inc();
        }
        result
    }

    /// Insert or replace `key`.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.lock();
        inner.entries.pop(&key);
        let entry = Entry {
            value,
            inserted: Instant::now(),
        };
        if inner.entries.push(key, entry).is_some() {
            inner.stats.evictions = inner.stats.evictions.saturating_add(1);
        }
        trace!(entries = inner.entries.len(), "Cache insert");
    }

    /// Return the cached value or compute, store and return it.
    pub fn get_or_insert_with<F: FnOnce() -> V>(&self, key: K, compute: F) -> V {
        if let Some(v) = self.get(&key) {
            return v;
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    /// Remove `key`. Returns the value if it was present.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.lock().entries.pop(key).map(|e| e.value)
    }

    /// Change the limits, evicting immediately if the cache is now too full.
    pub fn set_limits(&self, max_entries: usize, ttl: Duration) {
        let mut inner = self.lock();
        let cap = capacity(max_entries);
        while inner.entries.len() > cap.get() {
            if inner.entries.pop_lru().is_none() {
                break;
            }
            inner.stats.evictions = inner.stats.evictions.saturating_add(1);
        }
        inner.entries.resize(cap);
        inner.ttl = ttl;
    }

    /// Remove every entry (statistics are kept).
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("has_metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}
