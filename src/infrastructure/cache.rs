// Response cache for the read-only anime data source
// Bounded LRU with per-read max age, read against an injected clock.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::core::clock::Clock;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.inserted_at <= max_age
    }
}

/// Keyed cache where freshness is decided by the reader.
///
/// Callers pass the max age that fits the query kind, so one cache can hold
/// airing schedules and media details with different lifetimes.
#[derive(Debug)]
pub struct TtlCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// A capacity of zero falls back to the default capacity
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }

    /// Returns the value if it was stored no longer than `max_age` ago.
    /// Stale entries are evicted on read.
    pub fn get(&self, key: &K, max_age: Duration) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(key) {
            Some(entry) if entry.is_fresh(now, max_age) => Some(entry.value.clone()),
            Some(_) => {
                inner.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
        };
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, entry);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop(key)
            .map(|entry| entry.value)
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    #[test]
    fn test_entries_expire_by_reader_max_age() {
        let clock = Arc::new(ManualClock::at_epoch_seconds(0));
        let cache: TtlCache<String, i64> = TtlCache::new(8, clock.clone());
        cache.set("airing:1:4".to_string(), 3600);

        clock.advance(Duration::minutes(10));
        assert_eq!(
            cache.get(&"airing:1:4".to_string(), Duration::minutes(15)),
            Some(3600)
        );
        // Same entry, stricter reader
        assert_eq!(cache.get(&"airing:1:4".to_string(), Duration::minutes(5)), None);
        // Evicted by the stale read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_capacity_bounds_entries() {
        let clock = Arc::new(ManualClock::at_epoch_seconds(0));
        let cache: TtlCache<u32, u32> = TtlCache::new(2, clock);
        cache.set(1, 1);
        cache.set(2, 2);
        cache.set(3, 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1, Duration::hours(1)), None);
        assert_eq!(cache.get(&3, Duration::hours(1)), Some(3));
    }
}
