use std::hash::Hash;

use indexmap::IndexMap;

use crate::{Key, Observable, Result, Same, Topic};

const SIZE: &str = "size";
const ENTRIES: &str = "entries";

impl<K: 'static, V: 'static> Observable for IndexMap<K, V> {
    fn keys(&self) -> Vec<Key> {
        vec![Key::from(SIZE), Key::from(ENTRIES)]
    }
}

/// Journaled access to an observable map.
///
/// Every read of the contents is keyed by `"entries"` and the size by
/// `"size"`, which only changes when an entry is added or removed.
impl<K, V> Topic<IndexMap<K, V>>
where
    K: Hash + Eq + Clone + 'static,
    V: Same + Clone + 'static,
{
    pub fn len(&self) -> usize {
        self.read(SIZE, |m: &IndexMap<K, V>| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let key = key.clone();
        self.read(ENTRIES, move |m: &IndexMap<K, V>| m.get(&key).cloned())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let key = key.clone();
        self.read(ENTRIES, move |m: &IndexMap<K, V>| m.contains_key(&key))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K>
    where
        K: Same,
    {
        self.read(ENTRIES, |m: &IndexMap<K, V>| m.keys().cloned().collect())
    }

    pub fn values(&self) -> Vec<V> {
        self.read(ENTRIES, |m: &IndexMap<K, V>| m.values().cloned().collect())
    }

    /// Insert or overwrite an entry, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        let (old, grew, changed) = self.mutate(|m| {
            let changed = m.get(&key).is_none_or(|old| !old.same(&value));
            let size = m.len();
            let old = m.insert(key, value);
            (old, m.len() > size, changed)
        })?;
        match (grew, changed) {
            (true, _) => self.notify([SIZE, ENTRIES]),
            (false, true) => self.notify([ENTRIES]),
            (false, false) => {}
        }
        Ok(old)
    }

    /// Remove an entry, keeping the order of the others.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let removed = self.mutate(|m| m.shift_remove(key))?;
        if removed.is_some() {
            self.notify([SIZE, ENTRIES]);
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result {
        let cleared = self.mutate(|m| {
            let cleared = !m.is_empty();
            m.clear();
            cleared
        })?;
        if cleared {
            self.notify([SIZE, ENTRIES]);
        }
        Ok(())
    }
}
