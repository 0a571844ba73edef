use std::iter;

use crate::{Error, Key, Observable, Result, Same, Topic};

const LENGTH: &str = "length";
const VALUES: &str = "values";

impl<T: 'static> Observable for Vec<T> {
    fn keys(&self) -> Vec<Key> {
        (0..self.len())
            .map(Key::from)
            .chain(iter::once(Key::from(LENGTH)))
            .collect()
    }
}

fn indices(range: std::ops::Range<usize>) -> impl Iterator<Item = Key> {
    range.map(Key::from).chain(iter::once(Key::from(LENGTH)))
}

/// Journaled access to an observable sequence.
///
/// Elements are keyed by their index and the length by `"length"`. Reads of
/// the whole sequence are keyed by `"values"`; every mutation also changes
/// it.
impl<T> Topic<Vec<T>>
where
    T: Same + Clone + 'static,
{
    pub fn len(&self) -> usize {
        self.read(LENGTH, |v: &Vec<T>| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.read(index, move |v: &Vec<T>| v.get(index).cloned())
    }

    pub fn first(&self) -> Option<T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<T> {
        self.len().checked_sub(1).and_then(|index| self.get(index))
    }

    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        let value = value.clone();
        self.read(VALUES, move |v: &Vec<T>| v.contains(&value))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.read(VALUES, |v: &Vec<T>| v.clone())
    }

    pub fn push(&self, value: T) -> Result {
        let index = self.mutate(|v| {
            v.push(value);
            v.len() - 1
        })?;
        self.changed(index..index + 1);
        Ok(())
    }

    pub fn pop(&self) -> Result<Option<T>> {
        let popped = self.mutate(|v| v.pop().map(|value| (value, v.len())))?;
        Ok(popped.map(|(value, index)| {
            self.changed(index..index + 1);
            value
        }))
    }

    /// Insert at `index`, shifting everything after it.
    pub fn insert(&self, index: usize, value: T) -> Result {
        let len = self.mutate(|v| {
            let len = v.len();
            if index > len {
                return Err(Error::OutOfBounds { index, len });
            }
            v.insert(index, value);
            Ok(len + 1)
        })??;
        self.changed(index..len);
        Ok(())
    }

    /// Remove the element at `index`, shifting everything after it.
    pub fn remove(&self, index: usize) -> Result<T> {
        let (value, len) = self.mutate(|v| {
            let len = v.len();
            if index >= len {
                return Err(Error::OutOfBounds { index, len });
            }
            Ok((v.remove(index), len))
        })??;
        self.changed(index..len);
        Ok(value)
    }

    /// Replace the element at `index`, returning the old one.
    ///
    /// Replacing an element with a [`Same`] value announces nothing.
    pub fn replace(&self, index: usize, value: T) -> Result<T> {
        let (old, changed) = self.mutate(|v| {
            let len = v.len();
            let slot = v.get_mut(index).ok_or(Error::OutOfBounds { index, len })?;
            let changed = !slot.same(&value);
            Ok::<_, Error>((std::mem::replace(slot, value), changed))
        })??;
        if changed {
            self.notify([Key::from(index), Key::from(VALUES)]);
        }
        Ok(old)
    }

    pub fn truncate(&self, len: usize) -> Result {
        let old = self.mutate(|v| {
            let old = v.len();
            v.truncate(len);
            old
        })?;
        if old > len {
            self.changed(len..old);
        }
        Ok(())
    }

    pub fn clear(&self) -> Result {
        self.truncate(0)
    }

    pub fn extend(&self, values: impl IntoIterator<Item = T>) -> Result {
        let (old, new) = self.mutate(|v| {
            let old = v.len();
            v.extend(values);
            (old, v.len())
        })?;
        if new > old {
            self.changed(old..new);
        }
        Ok(())
    }

    fn changed(&self, range: std::ops::Range<usize>) {
        self.notify(indices(range).chain(iter::once(Key::from(VALUES))));
    }
}
