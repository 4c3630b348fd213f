use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Entry {
    value: Value,
    data_type: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Key/value store with capacity-bounded FIFO eviction.
#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key).map(|entry| entry.value.clone()) {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// The `dataType` tag stored alongside `key`, if any.
    pub fn data_type(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .entries
            .get(key)
            .and_then(|entry| entry.data_type.clone())
    }

    /// Stores `value` under `key`. Overwriting keeps the key's original
    /// position in the eviction order.
    pub fn set(&self, key: impl Into<String>, value: Value, data_type: Option<String>) {
        let key = key.into();
        let mut inner = self.inner.lock();
        let entry = Entry { value, data_type };

        if let Some(existing) = inner.entries.get_mut(&key) {
            *existing = entry;
            return;
        }

        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.evictions += 1;
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, entry);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_counts_hits_and_misses() {
        let cache = MemoryCache::new(4);
        cache.set("a", json!("x"), Some("svg".into()));

        assert_eq!(cache.get("a"), Some(json!("x")));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.data_type("a").as_deref(), Some("svg"));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn evicts_oldest_first() {
        let cache = MemoryCache::new(2);
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        cache.set("a", json!(10), None);
        cache.set("c", json!(3), None);

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
        assert_eq!(cache.get("c"), Some(json!(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn clear_keeps_counters() {
        let cache = MemoryCache::new(2);
        cache.set("a", json!(1), None);
        cache.get("a");
        cache.clear();

        assert_eq!(cache.get("a"), None);
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 0,
                capacity: 2,
                hits: 1,
                misses: 1,
                evictions: 0,
            }
        );
    }
}
