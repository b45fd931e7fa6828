//! Bounded per-key state for the admission gates.
//!
//! Entries are created lazily on first use and mutated under the lock of the
//! map shard that holds them, so callers with different keys rarely contend.
//! The store never grows past `max_entries`: when full, entries idle for
//! longer than `idle_ttl` are dropped first, then the least recently used.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_entries: usize,
    pub idle_ttl: Duration,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            idle_ttl: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct KeyedStore<V> {
    entries: DashMap<String, Slot<V>>,
    limits: StoreLimits,
}

impl<V> KeyedStore<V> {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            entries: DashMap::new(),
            limits,
        }
    }

    /// Runs `f` on the entry for `key`, creating it with `create` if absent.
    pub fn with_entry<R>(
        &self,
        key: &str,
        now: Instant,
        create: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        if !self.entries.contains_key(key) && self.entries.len() >= self.limits.max_entries {
            self.evict(now);
        }
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Slot {
                value: create(),
                last_seen: now,
            });
        slot.last_seen = now;
        f(&mut slot.value)
    }

    /// Runs `f` on an existing entry without creating one or refreshing its
    /// recency.
    pub fn with_existing<R>(&self, key: &str, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.entries.get_mut(key).map(|mut slot| f(&mut slot.value))
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn evict(&self, now: Instant) {
        let ttl = self.limits.idle_ttl;
        self.entries
            .retain(|_, slot| now.saturating_duration_since(slot.last_seen) < ttl);

        let len = self.entries.len();
        if len < self.limits.max_entries {
            return;
        }

        // Still full: make room for one more by dropping the stalest entries.
        let excess = len + 1 - self.limits.max_entries;
        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_seen))
            .collect();
        by_age.sort_by_key(|(_, last_seen)| *last_seen);
        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        log::debug!("Admission store evicted {} least recently used entries", excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_entries: usize, idle_secs: u64) -> StoreLimits {
        StoreLimits {
            max_entries,
            idle_ttl: Duration::from_secs(idle_secs),
        }
    }

    #[test]
    fn creates_lazily_and_mutates_in_place() {
        let store = KeyedStore::new(limits(10, 60));
        let now = Instant::now();
        assert!(store.with_existing("a", |v: &mut u32| *v).is_none());
        store.with_entry("a", now, || 0u32, |v| *v += 1);
        store.with_entry("a", now, || 100u32, |v| *v += 1);
        assert_eq!(store.with_existing("a", |v| *v), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn evicts_idle_entries_before_recent_ones() {
        let store = KeyedStore::new(limits(2, 60));
        let start = Instant::now();
        store.with_entry("old", start, || 0u32, |_| ());
        store.with_entry("recent", start + Duration::from_secs(100), || 0u32, |_| ());
        store.with_entry("new", start + Duration::from_secs(120), || 0u32, |_| ());
        assert!(!store.contains("old"));
        assert!(store.contains("recent"));
        assert!(store.contains("new"));
    }

    #[test]
    fn falls_back_to_least_recently_used() {
        let store = KeyedStore::new(limits(3, 3600));
        let start = Instant::now();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            store.with_entry(key, start + Duration::from_secs(i as u64), || 0u32, |_| ());
        }
        // Touch "a" so that "b" becomes the stalest.
        store.with_entry("a", start + Duration::from_secs(10), || 0u32, |_| ());
        store.with_entry("d", start + Duration::from_secs(11), || 0u32, |_| ());
        assert_eq!(store.len(), 3);
        assert!(!store.contains("b"));
        assert!(store.contains("a") && store.contains("c") && store.contains("d"));
    }
}
