//! Process-wide item cache for decoder state shared across streams.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::enc::Jbig2Globals;
use crate::object::PlainRef;

struct Slot<V> {
    value: V,
    weight: usize,
    stamp: u64,
}

struct Inner<K, V> {
    map: HashMap<K, Slot<V>>,
    total: usize,
    tick: u64,
}

/// Identity-keyed cache with a byte budget. Entries carry an explicit weight;
/// when the budget is exceeded, the least recently used entries are dropped
/// first. Values are shared handles, so an evicted entry stays alive for as
/// long as anyone still holds it.
pub struct ItemCache<K, V> {
    limit: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ItemCache<K, V> {
    pub fn new(limit: usize) -> ItemCache<K, V> {
        ItemCache {
            limit,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                total: 0,
                tick: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let slot = inner.map.get_mut(key)?;
        slot.stamp = tick;
        Some(slot.value.clone())
    }

    pub fn store(&self, key: K, value: V, weight: usize) {
        if weight > self.limit {
            return;
        }
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(old) = inner.map.insert(key, Slot { value, weight, stamp: tick }) {
            inner.total -= old.weight;
        }
        inner.total += weight;
        while inner.total > self.limit && inner.map.len() > 1 {
            let oldest = inner.map.iter()
                .min_by_key(|(_, slot)| slot.stamp)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    if let Some(slot) = inner.map.remove(&k) {
                        inner.total -= slot.weight;
                    }
                }
                None => break,
            }
        }
    }

    /// Drop every entry whose key matches; used when a document closes.
    pub fn remove_if(&self, mut pred: impl FnMut(&K) -> bool) {
        let mut inner = self.lock();
        let mut freed = 0;
        inner.map.retain(|k, slot| {
            if pred(k) {
                freed += slot.weight;
                false
            } else {
                true
            }
        });
        inner.total -= freed;
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key: (document serial, reference of the globals object). Object numbers
/// alone are only unique within one document.
pub(crate) type GlobalsKey = (u64, PlainRef);

/// JBIG2 globals shared by all documents in the process; 256 MB budget,
/// weighted by the loaded buffer size.
pub(crate) static JBIG2_GLOBALS: Lazy<ItemCache<GlobalsKey, Arc<Jbig2Globals>>> =
    Lazy::new(|| ItemCache::new(256 << 20));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_eviction() {
        let cache = ItemCache::new(10);
        cache.store("a", 1u32, 4);
        cache.store("b", 2, 4);
        // touch "a" so "b" is the eviction candidate
        assert_eq!(cache.find(&"a"), Some(1));
        cache.store("c", 3, 4);
        assert_eq!(cache.find(&"b"), None);
        assert_eq!(cache.find(&"a"), Some(1));
        assert_eq!(cache.find(&"c"), Some(3));
    }

    #[test]
    fn oversized_entries_are_not_cached() {
        let cache = ItemCache::new(10);
        cache.store("big", 1u32, 100);
        assert_eq!(cache.find(&"big"), None);
    }

    #[test]
    fn restore_updates_weight() {
        let cache = ItemCache::new(10);
        cache.store("a", 1u32, 8);
        cache.store("a", 2, 2);
        cache.store("b", 3, 8);
        // both fit: replacing "a" released its old weight
        assert_eq!(cache.find(&"a"), Some(2));
        assert_eq!(cache.find(&"b"), Some(3));
    }

    #[test]
    fn remove_if_filters_keys() {
        let cache = ItemCache::new(100);
        cache.store((1, "x"), 1u32, 1);
        cache.store((2, "y"), 2, 1);
        cache.remove_if(|&(doc, _)| doc == 1);
        assert_eq!(cache.find(&(1, "x")), None);
        assert_eq!(cache.find(&(2, "y")), Some(2));
    }
}
