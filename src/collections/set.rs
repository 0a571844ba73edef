use std::hash::Hash;

use indexmap::IndexSet;

use crate::{Key, Observable, Result, Same, Topic};

const SIZE: &str = "size";
const VALUES: &str = "values";

impl<T: 'static> Observable for IndexSet<T> {
    fn keys(&self) -> Vec<Key> {
        vec![Key::from(SIZE), Key::from(VALUES)]
    }
}

/// Journaled access to an observable set. Membership reads are keyed by
/// `"values"`, the size by `"size"`; both change on every effective insert
/// or removal.
impl<T> Topic<IndexSet<T>>
where
    T: Hash + Eq + Same + Clone + 'static,
{
    pub fn len(&self) -> usize {
        self.read(SIZE, |s: &IndexSet<T>| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: &T) -> bool {
        let value = value.clone();
        self.read(VALUES, move |s: &IndexSet<T>| s.contains(&value))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.read(VALUES, |s: &IndexSet<T>| s.iter().cloned().collect())
    }

    /// Returns whether the value was newly added.
    pub fn insert(&self, value: T) -> Result<bool> {
        let added = self.mutate(|s| s.insert(value))?;
        if added {
            self.notify([SIZE, VALUES]);
        }
        Ok(added)
    }

    /// Returns whether the value was present.
    pub fn remove(&self, value: &T) -> Result<bool> {
        let removed = self.mutate(|s| s.shift_remove(value))?;
        if removed {
            self.notify([SIZE, VALUES]);
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result {
        let cleared = self.mutate(|s| {
            let cleared = !s.is_empty();
            s.clear();
            cleared
        })?;
        if cleared {
            self.notify([SIZE, VALUES]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{ObserverHandle, flush, journal, on, wrap};
    use std::{cell::Cell, rc::Rc};

    use super::*;

    #[test]
    fn test_set_operations() {
        let set = wrap(IndexSet::<u32>::new());
        assert!(set.insert(3).unwrap());
        assert!(set.insert(1).unwrap());
        assert!(!set.insert(3).unwrap());
        assert_eq!(set.to_vec(), vec![3, 1]);
        assert!(set.remove(&3).unwrap());
        assert!(!set.remove(&3).unwrap());
        assert!(set.contains(&1));
        set.clear().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_redundant_insert_is_silent() {
        let set = wrap(IndexSet::from([1u32]));
        let calls = Rc::new(Cell::new(0));
        let observer = {
            let calls = calls.clone();
            ObserverHandle::from_fn(move |_| calls.set(calls.get() + 1))
        };
        on(&set, &observer);

        let (_, marker) = journal::recording(|| set.contains(&1));
        set.insert(1).unwrap();
        flush();
        assert_eq!(calls.get(), 0);
        assert!(!marker.recording().replay());
    }
}
