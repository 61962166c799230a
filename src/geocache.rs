//! Thread-safe LRU+TTL cache in front of the external geo-IP reader (§4.2).

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::metrics::Metrics;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

struct Entry {
    value: GeoLocation,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GeoCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub hit_rate: f64,
}

/// Bounded LRU with per-entry TTL. A single mutex guards the map and LRU
/// order; hit/miss/eviction counters are lock-free so `stats()` never
/// blocks a concurrent `get`/`set`.
pub struct GeoCache {
    inner: Mutex<LruCache<String, Entry>>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl GeoCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Threads the process-wide metrics handle in so `get`/`set` also feed
    /// `geo_cache_hits/misses/evictions_total` (§4.9, §11) alongside the
    /// cache's own atomics that back [`GeoCache::stats`].
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Empty IP is silently rejected: neither stored nor counted.
    pub fn get(&self, ip: &str) -> Option<GeoLocation> {
        if ip.is_empty() {
            return None;
        }
        let mut cache = self.inner.lock();
        match cache.get(ip) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.geo_cache_hits_total.inc();
                }
                Some(entry.value.clone())
            }
            Some(_) => {
                cache.pop(ip);
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.geo_cache_misses_total.inc();
                }
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.geo_cache_misses_total.inc();
                }
                None
            }
        }
    }

    /// Overwrites + refreshes expiry + moves to MRU if present; otherwise
    /// evicts LRU entries until under capacity, then inserts at MRU.
    pub fn set(&self, ip: &str, value: GeoLocation) {
        if ip.is_empty() {
            return;
        }
        let mut cache = self.inner.lock();
        let expires_at = Instant::now() + self.ttl;
        if cache.contains(ip) {
            cache.put(ip.to_string(), Entry { value, expires_at });
            return;
        }
        while cache.len() >= self.capacity {
            if cache.pop_lru().is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.geo_cache_evictions_total.inc();
                }
            } else {
                break;
            }
        }
        cache.put(ip.to_string(), Entry { value, expires_at });
    }

    pub fn stats(&self) -> GeoCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        GeoCacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.inner.lock().len(),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Unused by `GeoCache` itself (it manages capacity manually for precise
/// eviction counting) but kept for callers that want a strictly bounded
/// `LruCache` of their own with the same key type.
#[allow(dead_code)]
fn non_zero_capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n.max(1)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(city: &str) -> GeoLocation {
        GeoLocation {
            country: Some("US".to_string()),
            region: None,
            city: Some(city.to_string()),
        }
    }

    #[test]
    fn set_then_get_returns_value_and_hit() {
        let cache = GeoCache::new(10, Duration::from_secs(3600));
        cache.set("1.2.3.4", loc("Springfield"));
        let hit = cache.get("1.2.3.4");
        assert_eq!(hit, Some(loc("Springfield")));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn empty_ip_is_never_stored_or_counted() {
        let cache = GeoCache::new(10, Duration::from_secs(3600));
        cache.set("", loc("X"));
        assert_eq!(cache.get(""), None);
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn expired_entry_counts_as_miss_and_is_removed() {
        let cache = GeoCache::new(10, Duration::from_millis(1));
        cache.set("1.2.3.4", loc("Springfield"));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("1.2.3.4"), None);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn get_promotes_to_mru_so_eviction_skips_recently_used() {
        let cache = GeoCache::new(3, Duration::from_secs(3600));
        cache.set("a", loc("A"));
        cache.set("b", loc("B"));
        cache.set("c", loc("C"));

        assert_eq!(cache.get("a"), Some(loc("A")));

        cache.set("d", loc("D"));

        assert_eq!(cache.get("b"), None, "b should have been evicted as LRU");
        assert_eq!(cache.get("a").as_ref().map(|l| l.city.clone()), Some(Some("A".to_string())));
        assert_eq!(cache.get("c").as_ref().map(|l| l.city.clone()), Some(Some("C".to_string())));
        assert_eq!(cache.get("d").as_ref().map(|l| l.city.clone()), Some(Some("D".to_string())));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn set_on_existing_key_refreshes_and_moves_to_mru() {
        let cache = GeoCache::new(2, Duration::from_secs(3600));
        cache.set("a", loc("A"));
        cache.set("b", loc("B"));
        cache.set("a", loc("A2"));
        cache.set("c", loc("C"));

        assert_eq!(cache.get("b"), None, "b should be evicted, a was refreshed to MRU");
        assert_eq!(cache.get("a"), Some(loc("A2")));
        assert_eq!(cache.get("c"), Some(loc("C")));
    }
}
