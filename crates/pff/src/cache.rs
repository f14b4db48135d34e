//! Fixed-capacity caches for decoded artifacts.
//!
//! Three independent caches sit in front of the block reader, the stream
//! assembler, and the table decoder. Entries are handed out as `Arc`s so a
//! reader keeps its borrow alive across eviction; the cache itself only
//! tracks the last access ordinal per entry and evicts the stalest one.
//!
//! Locking protocol: the mutex is held for lookup and installation only.
//! Decoding happens outside the lock; `insert` re-checks for a concurrently
//! installed entry and returns the winner so every caller shares one copy.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
};

struct Slot<V> {
    last_access: u64,
    value: Arc<V>,
}

struct Inner<K, V> {
    capacity: usize,
    counter: u64,
    slots: HashMap<K, Slot<V>>,
}

pub(crate) struct Cache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Copy,
{
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: capacity.max(1),
                counter: 0,
                slots: HashMap::new(),
            }),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock().ok()?;
        inner.counter += 1;
        let counter = inner.counter;
        let slot = inner.slots.get_mut(key)?;
        slot.last_access = counter;
        Some(Arc::clone(&slot.value))
    }

    /// Install `value` under `key`, unless another thread won the race, in
    /// which case the already-installed entry is returned instead.
    pub(crate) fn insert(&self, key: K, value: Arc<V>) -> Arc<V> {
        let Ok(mut inner) = self.inner.lock() else {
            return value;
        };
        inner.counter += 1;
        let counter = inner.counter;

        if let Some(slot) = inner.slots.get_mut(&key) {
            slot.last_access = counter;
            return Arc::clone(&slot.value);
        }

        if inner.slots.len() >= inner.capacity {
            if let Some(&stalest) = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(key, _)| key)
            {
                inner.slots.remove(&stalest);
            }
        }

        inner.slots.insert(
            key,
            Slot {
                last_access: counter,
                value: Arc::clone(&value),
            },
        );
        value
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.slots.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_miss_then_hit() {
        let cache = Cache::new(4);
        assert!(cache.get(&1_u64).is_none());
        cache.insert(1_u64, Arc::new(vec![1_u8]));
        assert_eq!(*cache.get(&1_u64).unwrap(), vec![1_u8]);
    }

    #[test]
    fn test_insert_race_returns_winner() {
        let cache = Cache::new(4);
        let first = cache.insert(7_u64, Arc::new(vec![1_u8]));
        let second = cache.insert(7_u64, Arc::new(vec![2_u8]));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, vec![1_u8]);
    }

    #[test]
    fn test_evicts_stalest() {
        let cache = Cache::new(2);
        cache.insert(1_u64, Arc::new(1_u32));
        cache.insert(2_u64, Arc::new(2_u32));
        // Touch 1 so 2 becomes the stalest.
        cache.get(&1_u64);
        cache.insert(3_u64, Arc::new(3_u32));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&2_u64).is_none());
        assert!(cache.get(&1_u64).is_some());
        assert!(cache.get(&3_u64).is_some());
    }

    #[test]
    fn test_entry_survives_eviction_for_borrowers() {
        let cache = Cache::new(1);
        let held = cache.insert(1_u64, Arc::new(vec![0xAA_u8; 16]));
        cache.insert(2_u64, Arc::new(vec![0xBB_u8; 16]));
        assert!(cache.get(&1_u64).is_none());
        assert_eq!(held[0], 0xAA);
    }
}
