//! Inferred schema cache
//!
//! Result schemas are keyed by `(datasource, query)` and kept for a fixed
//! TTL. Concurrent lookups of the same key share one inference: the first
//! caller runs it, the others block on the slot until it is filled. A failed
//! inference leaves the slot empty so the next waiter retries.
//!
//! Requests with `no_cache` skip the cache entirely and infer on their own.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use wirebridge_common::{Result, SchemaCacheSettings};

use crate::schema::TableSchema;

/// Counters for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Lookups that skipped the cache
    pub bypassed: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

type CacheKey = (String, String);

#[derive(Debug)]
struct CacheSlot {
    created_at: Instant,
    schema: OnceCell<Arc<TableSchema>>,
}

impl CacheSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            created_at: Instant::now(),
            schema: OnceCell::new(),
        })
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

pub struct SchemaCache {
    enabled: bool,
    max_entries: usize,
    ttl: Duration,
    entries: DashMap<CacheKey, Arc<CacheSlot>>,
    stats: CacheStats,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(&SchemaCacheSettings::default())
    }
}

impl SchemaCache {
    pub fn new(settings: &SchemaCacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_entries: settings.max_entries.max(1),
            ttl: Duration::from_secs(settings.ttl_secs),
            entries: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn with_limits(max_entries: usize, ttl: Duration) -> Self {
        Self {
            enabled: true,
            max_entries: max_entries.max(1),
            ttl,
            entries: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached schema for the key, running `infer` when absent or expired
    pub fn get_or_infer<F>(&self, datasource: &str, query: &str, no_cache: bool, infer: F) -> Result<Arc<TableSchema>>
    where
        F: FnOnce() -> Result<TableSchema>,
    {
        if !self.enabled || no_cache {
            self.stats.bypassed.fetch_add(1, Ordering::Relaxed);
            return infer().map(Arc::new);
        }

        let slot = self.slot_for((datasource.to_string(), query.to_string()));
        let mut inferred = false;
        let schema = slot.schema.get_or_try_init(|| {
            inferred = true;
            infer().map(Arc::new)
        })?;

        if inferred {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(datasource = %datasource, columns = schema.len(), "cached inferred schema");
        } else {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Arc::clone(schema))
    }

    /// Slot for a key, replacing an expired one. The map guard is released
    /// before the caller waits on the slot.
    fn slot_for(&self, key: CacheKey) -> Arc<CacheSlot> {
        let slot = match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(self.ttl) {
                    entry.insert(CacheSlot::new());
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => Arc::clone(entry.insert(CacheSlot::new()).value()),
        };
        if self.entries.len() > self.max_entries {
            self.evict();
        }
        slot
    }

    /// Drop expired entries, then the oldest ones beyond capacity
    fn evict(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(self.ttl));

        let excess = self.entries.len().saturating_sub(self.max_entries);
        if excess > 0 {
            let mut by_age: Vec<(CacheKey, Instant)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().created_at))
                .collect();
            by_age.sort_by_key(|(_, created_at)| *created_at);
            for (key, _) in by_age.into_iter().take(excess) {
                self.entries.remove(&key);
            }
        }

        let evicted = before.saturating_sub(self.entries.len()) as u64;
        self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(evicted, remaining = self.entries.len(), "schema cache eviction");
    }

    /// Forget every schema of one data source
    pub fn invalidate(&self, datasource: &str) {
        self.entries.retain(|(ds, _), _| ds != datasource);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use wirebridge_common::BridgeError;

    fn schema() -> Result<TableSchema> {
        TableSchema::from_text("a Int32, b String")
    }

    #[test]
    fn test_hit_after_miss() {
        let cache = SchemaCache::default();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let s = cache
                .get_or_infer("db", "select 1", false, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    schema()
                })
                .unwrap();
            assert_eq!(s.len(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_no_cache_bypasses() {
        let cache = SchemaCache::default();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .get_or_infer("db", "q", true, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    schema()
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());

        let disabled = SchemaCache::disabled();
        disabled.get_or_infer("db", "q", false, schema).unwrap();
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_single_flight() {
        let cache = Arc::new(SchemaCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_infer("db", "slow", false, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            schema()
                        })
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().len(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_inference_is_not_cached() {
        let cache = SchemaCache::default();
        let err = cache
            .get_or_infer("db", "q", false, || Err(BridgeError::internal("driver down")))
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL");
        let s = cache.get_or_infer("db", "q", false, schema).unwrap();
        assert_eq!(s.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = SchemaCache::with_limits(10, Duration::from_millis(20));
        let calls = AtomicUsize::new(0);
        let infer = || {
            calls.fetch_add(1, Ordering::SeqCst);
            schema()
        };
        cache.get_or_infer("db", "q", false, infer).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        cache.get_or_infer("db", "q", false, infer).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = SchemaCache::with_limits(2, Duration::from_secs(60));
        for query in ["q1", "q2", "q3"] {
            cache.get_or_infer("db", query, false, schema).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.stats().evictions.load(Ordering::Relaxed) >= 1);

        let calls = AtomicUsize::new(0);
        cache
            .get_or_infer("db", "q3", false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                schema()
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalidate_datasource() {
        let cache = SchemaCache::default();
        cache.get_or_infer("a", "q", false, schema).unwrap();
        cache.get_or_infer("b", "q", false, schema).unwrap();
        cache.invalidate("a");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
