//! TTL- and tag-aware key/value cache.
//!
//! The cache never builds values on a miss; single-flight coalescing is the
//! aggregator's job. Expired entries answer as misses and are lazily
//! dropped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    tags: Vec<String>,
    expires_at: Instant,
}

pub struct Cache<V: Clone> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> Cache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the value for `key` unless absent or expired. An expired
    /// entry is removed on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().ok()?;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at <= Instant::now() => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration, tags: &[String]) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key.into(),
                CacheEntry {
                    value,
                    tags: tags.to_vec(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    /// Drops every entry carrying `tag`; returns how many went away.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
        before - entries.len()
    }

    /// Current entry count, counting not-yet-collected expired entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Eagerly removes expired entries.
    pub fn purge_expired(&self) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

impl<V: Clone> Default for Cache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_what_put_stored() {
        let cache: Cache<String> = Cache::new();
        cache.put("k", "v".to_string(), Duration::from_secs(60), &[]);
        assert_eq!(cache.get("k"), Some("v".to_string()));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entries_miss_and_are_collected() {
        let cache: Cache<u32> = Cache::new();
        cache.put("k", 7, Duration::from_millis(0), &[]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn tag_invalidation_is_selective() {
        let cache: Cache<u32> = Cache::new();
        cache.put("a", 1, Duration::from_secs(60), &["flight".to_string()]);
        cache.put(
            "b",
            2,
            Duration::from_secs(60),
            &["flight".to_string(), "flight:BT318".to_string()],
        );
        cache.put("c", 3, Duration::from_secs(60), &["wx".to_string()]);

        assert_eq!(cache.invalidate_by_tag("flight:BT318"), 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);

        assert_eq!(cache.invalidate_by_tag("flight"), 1);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn overwrite_replaces_value_and_ttl() {
        let cache: Cache<u32> = Cache::new();
        cache.put("k", 1, Duration::from_millis(0), &[]);
        cache.put("k", 2, Duration::from_secs(60), &[]);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn purge_expired_only_drops_stale_entries() {
        let cache: Cache<u32> = Cache::new();
        cache.put("stale", 1, Duration::from_millis(0), &[]);
        cache.put("fresh", 2, Duration::from_secs(60), &[]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
