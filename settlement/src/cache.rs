//! Bounded in-process cache
//!
//! Keys are content fingerprints, so a hit is always safe to reuse. When
//! full, the oldest entry is evicted first.

use crate::metrics::Metrics;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Cache counters
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
    /// Entries stored
    pub sets: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64) * 100.0
        }
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    stats: CacheStats,
}

/// Bounded cache keyed by fingerprint
#[derive(Debug)]
pub struct BoundedCache<V> {
    inner: Mutex<CacheInner<V>>,
    capacity: usize,
    metrics: Option<Arc<Metrics>>,
}

impl<V: Clone> BoundedCache<V> {
    /// Create cache holding at most `capacity` entries (0 disables caching)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                stats: CacheStats::default(),
            }),
            capacity,
            metrics: None,
        }
    }

    /// Report lookups to a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Look up an entry
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(key).cloned();
        if value.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        drop(inner);

        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(value.is_some());
        }
        value
    }

    /// Store an entry
    pub fn insert(&self, key: impl Into<String>, value: V) {
        if self.capacity == 0 {
            return;
        }

        let key = key.into();
        let mut inner = self.inner.lock();
        if inner.entries.insert(key.clone(), value).is_none() {
            inner.order.push_back(key);
        }
        inner.stats.sets += 1;

        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if inner.entries.remove(&oldest).is_some() {
                inner.stats.evictions += 1;
            }
        }
    }

    /// Drop every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        inner.order.retain(|key| !key.starts_with(prefix));
        before - inner.entries.len()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters so far
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache = BoundedCache::new(4);
        assert_eq!(cache.get("a"), None);
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_evicts_oldest() {
        let cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_prefix() {
        let cache = BoundedCache::new(8);
        cache.insert("s1:greedy", 1);
        cache.insert("s1:direct", 2);
        cache.insert("s2:greedy", 3);

        assert_eq!(cache.invalidate_prefix("s1:"), 2);
        assert_eq!(cache.get("s2:greedy"), Some(3));
    }

    #[test]
    fn test_zero_capacity_disabled() {
        let cache = BoundedCache::new(0);
        cache.insert("a", 1);
        assert!(cache.is_empty());
    }
}
