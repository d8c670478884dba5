use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    last_used: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    tick: u64,
}

/// A size bounded cache evicting the least recently used entry.
///
/// Values are cloned out of the cache, so large payloads should be wrapped in
/// an `Arc`. A miss is never an error: the caller recomputes the value.
pub struct SoftCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> SoftCache<K, V> {
    /// Create a cache holding at most `capacity` entries. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                tick: 0,
            }),
        }
    }

    /// Maximal number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key`, marking it as recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.get_mut(key).map(|e| {
            e.last_used = tick;
            e.value.clone()
        })
    }

    /// Store `value` under `key`, evicting the least recently used entry when full.
    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                last_used: tick,
            },
        );
    }

    /// Return the cached value for `key` or compute, store and return it.
    ///
    /// The lock is not held while computing, so concurrent misses on the same
    /// key may compute the value more than once.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        f: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = f()?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = SoftCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));

        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn zero_capacity_never_stores() {
        let cache = SoftCache::new(0);
        cache.insert(1, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn get_or_try_insert_with() {
        let cache = SoftCache::<u32, u32>::new(4);
        let mut calls = 0;
        for _ in 0..3 {
            let v: Result<u32, ()> = cache.get_or_try_insert_with(&7, || {
                calls += 1;
                Ok(49)
            });
            assert_eq!(v, Ok(49));
        }
        assert_eq!(calls, 1);

        let err: Result<u32, &str> = cache.get_or_try_insert_with(&8, || Err("failed"));
        assert_eq!(err, Err("failed"));
        assert_eq!(cache.get(&8), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
