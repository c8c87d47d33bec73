//! Expiring key-value cache.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// A cache with per-entry time-to-live.
pub trait Cache<V>: Send + Sync {
    /// Value under `key`, unless missing or expired.
    fn get(&self, key: &str) -> Option<V>;

    /// Store `value` under `key` for `ttl`.
    fn set(&self, key: &str, value: V, ttl: Duration);
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Size at which an unbounded cache sweeps expired entries on insert.
const SWEEP_THRESHOLD: usize = 256;

/// In-process [`Cache`] backed by a concurrent map.
///
/// Expired entries are evicted on read, and swept on insert once the map
/// reaches its sweep size. A bounded cache also evicts the entry closest to
/// expiry when full.
#[derive(Debug)]
pub struct MemoryCache<V> {
    entries: DashMap<String, Entry<V>>,
    max_entries: Option<usize>,
}

impl<V: Clone> MemoryCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: None,
        }
    }

    /// Create an empty cache holding at most `max_entries` entries.
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: Some(max_entries.max(1)),
        }
    }

    fn make_room(&self, key: &str) {
        let limit = self.max_entries.unwrap_or(SWEEP_THRESHOLD);
        if self.entries.len() < limit || self.entries.contains_key(key) {
            return;
        }

        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);

        if self.max_entries.is_some_and(|max| self.entries.len() >= max) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.expires_at)
                .map(|entry| entry.key().clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Drop one entry.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Entries currently stored, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> Cache<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let hit = self.entries.get(key).map(|entry| {
            (entry.expires_at > Instant::now()).then(|| entry.value.clone())
        })?;

        if hit.is_none() {
            self.entries
                .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        }
        hit
    }

    fn set(&self, key: &str, value: V, ttl: Duration) {
        self.make_room(key);
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_fresh_values() {
        let cache = MemoryCache::new();
        cache.set("k", 7, Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn expired_values_are_evicted() {
        let cache = MemoryCache::new();
        cache.set("k", "v".to_string(), Duration::ZERO);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn set_overwrites_and_invalidate_removes() {
        let cache = MemoryCache::new();
        cache.set("k", 1, Duration::from_secs(60));
        cache.set("k", 2, Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(cache.len(), 1);

        cache.invalidate("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn expired_entries_are_swept_on_insert() {
        let cache = MemoryCache::new();
        for i in 0..2_000 {
            cache.set(&format!("key-{}", i), i, Duration::ZERO);
        }
        assert!(cache.len() <= SWEEP_THRESHOLD);
    }

    #[test]
    fn bounded_cache_evicts_closest_to_expiry() {
        let cache = MemoryCache::bounded(2);
        cache.set("short", 1, Duration::from_secs(10));
        cache.set("long", 2, Duration::from_secs(60));
        cache.set("new", 3, Duration::from_secs(30));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long"), Some(2));
        assert_eq!(cache.get("new"), Some(3));

        // Overwriting an existing key never evicts.
        cache.set("long", 4, Duration::from_secs(60));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("new"), Some(3));
    }

    #[test]
    fn usable_as_trait_object() {
        let cache: Box<dyn Cache<u32>> = Box::new(MemoryCache::new());
        cache.set("k", 3, Duration::from_secs(1));
        assert_eq!(cache.get("k"), Some(3));
    }
}
