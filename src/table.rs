//! [`ConcurrentTable`] is the backing storage of a snapshot map.

use std::borrow::Borrow;
use std::hash::Hash;

/// [`ConcurrentTable`] is a key-value table that is safe for concurrent single-entry operations.
///
/// A [`SnapshotMapBase`](crate::SnapshotMapBase) stores its entries in a [`ConcurrentTable`]
/// and keeps a cached snapshot of it; [`ShardedMap`](crate::ShardedMap) is the default
/// implementation.
///
/// [`ConcurrentTable::for_each`] is not required to be atomic with respect to concurrent
/// modifications; it must visit every entry that is present throughout the traversal exactly
/// once.
pub trait ConcurrentTable<K, V> {
    /// Reads the entry associated with the key.
    fn read<Q, R, F: FnOnce(&K, &V) -> R>(&self, key: &Q, reader: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized;

    /// Inserts or replaces the value, returning the previous one.
    fn put(&self, key: K, val: V) -> Option<V>;

    /// Inserts or replaces the value, returning the previous one and whether the newly stored
    /// value differs from the previous one.
    ///
    /// The comparison and the replacement must be atomic.
    fn put_changed(&self, key: K, val: V) -> (Option<V>, bool)
    where
        V: PartialEq;

    /// Removes the entry associated with the key.
    fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized;

    /// Removes the entry associated with the key if the condition holds for its value.
    fn remove_if<Q, F: FnOnce(&V) -> bool>(&self, key: &Q, condition: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized;

    /// Returns `true` if the table has the key.
    #[inline]
    fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.read(key, |_, _| ()).is_some()
    }

    /// Returns the number of entries.
    fn len(&self) -> usize;

    /// Returns `true` if the table is empty.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    fn clear(&self);

    /// Invokes `f` for every entry.
    fn for_each<F: FnMut(&K, &V)>(&self, f: F);
}
