//! Bounded in-process cache with per-entry expiry.
//!
//! Values are stored as `serde_json::Value` so any serializable response can be
//! memoized. When the cache is full, expired entries are purged first and then the
//! least recently used entry is evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Longest lifetime an entry may have.
const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug)]
struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
    last_access: u64,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, Entry>,
    tick: u64,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    default_ttl: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCacheStats {
    pub entries: usize,
    pub capacity: usize,
}

impl MemoryCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.get_at(key, Instant::now())
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn set<T>(&self, key: &str, value: &T)
    where
        T: Serialize,
    {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        match serde_json::to_value(value) {
            Ok(value) => self.set_at(key, value, ttl, Instant::now()),
            Err(err) => tracing::debug!(key, error = %err, "memory cache serialization failed"),
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        before - inner.entries.len()
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.lock().purge_expired(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn stats(&self) -> MemoryCacheStats {
        MemoryCacheStats {
            entries: self.len(),
            capacity: self.capacity,
        }
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();
        let expired = match inner.entries.get_mut(key) {
            None => return None,
            Some(entry) if entry.expires_at <= now => true,
            Some(entry) => {
                entry.last_access = tick;
                return Some(entry.value.clone());
            }
        };
        if expired {
            inner.entries.remove(key);
        }
        None
    }

    fn set_at(&self, key: &str, value: serde_json::Value, ttl: Duration, now: Instant) {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            inner.purge_expired(now);
            while inner.entries.len() >= self.capacity {
                inner.evict_lru();
            }
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now),
                last_access: tick,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips_typed_values() {
        let cache = MemoryCache::new(4, Duration::from_secs(30));
        cache.set("course:1", &vec![1, 2, 3]);
        assert_eq!(cache.get::<Vec<i32>>("course:1"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get::<Vec<i32>>("missing"), None);
    }

    #[test]
    fn oversized_ttl_is_capped() {
        let cache = MemoryCache::new(4, Duration::from_secs(30));
        let start = Instant::now();
        cache.set_at("forever", json!(true), Duration::MAX, start);
        assert_eq!(cache.get_at("forever", start + Duration::from_secs(60)), Some(json!(true)));
        assert_eq!(cache.get_at("forever", start + MAX_TTL), None);
    }

    #[test]
    fn expired_entries_are_not_returned_and_are_removed() {
        let cache = MemoryCache::new(4, Duration::from_secs(30));
        let start = Instant::now();
        cache.set_at("k", json!(1), Duration::from_secs(5), start);
        assert_eq!(cache.get_at("k", start + Duration::from_secs(4)), Some(json!(1)));
        assert_eq!(cache.get_at("k", start + Duration::from_secs(5)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_prefers_purging_expired_entries() {
        let cache = MemoryCache::new(2, Duration::from_secs(30));
        let start = Instant::now();
        cache.set_at("short", json!("a"), Duration::from_secs(1), start);
        cache.set_at("long", json!("b"), Duration::from_secs(100), start);

        let later = start + Duration::from_secs(2);
        cache.set_at("new", json!("c"), Duration::from_secs(100), later);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("long", later), Some(json!("b")));
        assert_eq!(cache.get_at("new", later), Some(json!("c")));
    }

    #[test]
    fn full_cache_evicts_least_recently_used() {
        let cache = MemoryCache::new(2, Duration::from_secs(30));
        let now = Instant::now();
        cache.set_at("a", json!(1), Duration::from_secs(60), now);
        cache.set_at("b", json!(2), Duration::from_secs(60), now);
        // touch "a" so "b" becomes the eviction candidate
        assert!(cache.get_at("a", now).is_some());
        cache.set_at("c", json!(3), Duration::from_secs(60), now);

        assert!(cache.get_at("a", now).is_some());
        assert!(cache.get_at("b", now).is_none());
        assert!(cache.get_at("c", now).is_some());
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        let cache = MemoryCache::new(2, Duration::from_secs(30));
        cache.set("a", &1);
        cache.set("b", &2);
        cache.set("a", &10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<i32>("a"), Some(10));
        assert_eq!(cache.get::<i32>("b"), Some(2));
    }

    #[test]
    fn delete_prefix_only_removes_matching_keys() {
        let cache = MemoryCache::new(8, Duration::from_secs(30));
        cache.set("catalog:list:1", &1);
        cache.set("catalog:course:abc", &2);
        cache.set("leaderboard:WEEK", &3);
        assert_eq!(cache.delete_prefix("catalog:"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.delete("leaderboard:WEEK"));
        assert!(!cache.delete("leaderboard:WEEK"));
    }

    #[test]
    fn purge_expired_reports_count() {
        let cache = MemoryCache::new(8, Duration::from_secs(30));
        let start = Instant::now();
        cache.set_at("a", json!(1), Duration::from_millis(1), start);
        cache.set_at("b", json!(2), Duration::from_secs(60), start);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity(capacity in 1usize..16, keys in proptest::collection::vec(0u8..40, 0..200)) {
            let cache = MemoryCache::new(capacity, Duration::from_secs(60));
            for key in keys {
                cache.set(&format!("k{key}"), &key);
                prop_assert!(cache.len() <= capacity);
            }
        }

        #[test]
        fn most_recent_write_is_always_readable(capacity in 1usize..8, keys in proptest::collection::vec(0u8..20, 1..50)) {
            let cache = MemoryCache::new(capacity, Duration::from_secs(60));
            for key in &keys {
                cache.set(&format!("k{key}"), key);
                prop_assert_eq!(cache.get::<u8>(&format!("k{key}")), Some(*key));
            }
        }
    }
}
