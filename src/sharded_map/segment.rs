//! [`Segment`] is a single lock-guarded shard of a [`ShardedMap`](super::ShardedMap).

use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::PoisonError;

use crate::sync::{Mutex, MutexGuard};

/// [`Segment`] owns a hash table and the mutex serializing every access to it.
///
/// Segments are stored next to each other in a boxed slice; the alignment makes sure that no two
/// segments share a cache line, so contention on one segment does not slow down its neighbors.
///
/// Callbacks passed to the traversal methods are invoked while the lock is held: they must not
/// access the same segment again.
#[repr(align(128))]
pub(crate) struct Segment<K, V> {
    table: Mutex<HashMap<K, V>>,
}

impl<K, V> Segment<K, V> {
    /// Creates an empty [`Segment`].
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Locks the table.
    ///
    /// Every operation leaves the table in a consistent state, therefore a panic in user code
    /// that poisoned the mutex does not invalidate the data.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, HashMap<K, V>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of entries in the segment.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Removes every entry and returns the number of removed entries.
    #[inline]
    pub(crate) fn clear(&self) -> usize {
        let mut table = self.lock();
        let removed = table.len();
        table.clear();
        removed
    }

    /// Invokes `f` for every entry.
    #[inline]
    pub(crate) fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        self.lock().iter().for_each(|(k, v)| f(k, v));
    }

    /// Invokes `f` for every key.
    #[inline]
    pub(crate) fn for_each_key<F: FnMut(&K)>(&self, f: F) {
        self.lock().keys().for_each(f);
    }

    /// Invokes `f` for every value.
    #[inline]
    pub(crate) fn for_each_value<F: FnMut(&V)>(&self, f: F) {
        self.lock().values().for_each(f);
    }
}

impl<K: Eq + Hash, V> Segment<K, V> {
    /// Returns a clone of the value associated with the key.
    #[inline]
    pub(crate) fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.lock().get(key).cloned()
    }

    /// Reads the entry associated with the key.
    #[inline]
    pub(crate) fn read<Q, R, F: FnOnce(&K, &V) -> R>(&self, key: &Q, reader: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lock().get_key_value(key).map(|(k, v)| reader(k, v))
    }

    /// Returns `true` if the segment has the key.
    #[inline]
    pub(crate) fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lock().contains_key(key)
    }

    /// Inserts or replaces the value, returning the previous one.
    #[inline]
    pub(crate) fn put(&self, key: K, val: V) -> Option<V> {
        self.lock().insert(key, val)
    }

    /// Inserts or replaces the value, returning the previous one and whether the stored value
    /// differs from it.
    #[inline]
    pub(crate) fn put_changed(&self, key: K, val: V) -> (Option<V>, bool)
    where
        V: PartialEq,
    {
        match self.lock().entry(key) {
            Entry::Occupied(mut o) => {
                let changed = *o.get() != val;
                (Some(o.insert(val)), changed)
            }
            Entry::Vacant(v) => {
                v.insert(val);
                (None, true)
            }
        }
    }

    /// Removes the entry associated with the key.
    #[inline]
    pub(crate) fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lock().remove(key)
    }

    /// Removes the entry if the condition holds for its value.
    #[inline]
    pub(crate) fn remove_if<Q, F: FnOnce(&V) -> bool>(&self, key: &Q, condition: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut table = self.lock();
        if table.get(key).map_or(false, condition) {
            table.remove(key)
        } else {
            None
        }
    }
}
