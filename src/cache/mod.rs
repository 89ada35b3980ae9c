//! Process-wide plan caches.
//!
//! Compiled plans and rendered statements are keyed by structural keys that
//! never contain concrete argument values, so the caches grow only with the
//! number of distinct query shapes and are never evicted.
//!
//! Readers and builders may race: a build happens outside the map lock and the
//! finished value is published behind an [`Arc`]. Two concurrent builds of
//! the same key are both valid; the last insert wins.

mod hash;

pub use hash::compute_hash;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

/// A concurrent map from structural keys to shared, immutable values.
#[derive(Debug)]
pub struct PlanCache<K, V>
where
    K: Eq + Hash,
{
    name: &'static str,
    entries: DashMap<K, Arc<V>>,
}

impl<K, V> PlanCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Publish a value, replacing any entry built concurrently.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries.insert(key, Arc::clone(&value));
        value
    }

    /// Return the cached value or build, publish and return a new one.
    ///
    /// The map is not locked while `build` runs. A failed build caches
    /// nothing.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(hit) = self.get(key) {
            tracing::debug!(target: "gensql::cache", cache = self.name, key = ?key, "hit");
            return Ok(hit);
        }
        tracing::debug!(target: "gensql::cache", cache = self.name, key = ?key, "miss");
        let value = build()?;
        tracing::debug!(target: "gensql::cache", cache = self.name, key = ?key, "built");
        Ok(self.insert(key.clone(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_once_per_key() {
        let cache: PlanCache<String, usize> = PlanCache::new("test");
        let mut builds = 0;
        let a = cache
            .get_or_try_insert_with(&"k".to_string(), || {
                builds += 1;
                Ok::<_, ()>(7)
            })
            .unwrap();
        let b = cache
            .get_or_try_insert_with(&"k".to_string(), || {
                builds += 1;
                Ok::<_, ()>(8)
            })
            .unwrap();
        assert_eq!(builds, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache: PlanCache<u32, u32> = PlanCache::new("test");
        assert!(cache.get_or_try_insert_with(&1, || Err("boom")).is_err());
        assert!(cache.is_empty());
        assert_eq!(*cache.get_or_try_insert_with(&1, || Ok::<_, ()>(3)).unwrap(), 3);
    }

    #[test]
    fn test_insert_replaces() {
        let cache: PlanCache<u32, &str> = PlanCache::new("test");
        cache.insert(1, "a");
        cache.insert(1, "b");
        assert_eq!(*cache.get(&1).unwrap(), "b");
        cache.clear();
        assert!(cache.get(&1).is_none());
    }
}
