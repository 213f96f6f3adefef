//! Collection views of a [`SnapshotMapBase`].
//!
//! Iterators acquire a snapshot when they are created and then walk it, therefore they are
//! never affected by concurrent mutations, and they never block writers.

use std::borrow::Borrow;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::iter::FusedIterator;
use std::marker::PhantomData;

use sdd::Shared;

use super::snapshot::Snapshot;
use super::{BuildLock, SnapshotMapBase};
use crate::{ConcurrentTable, ViewError};

/// [`Keys`] is a view of the keys of a [`SnapshotMapBase`].
pub struct Keys<'m, K, V, L, T> {
    map: &'m SnapshotMapBase<K, V, L, T>,
}

/// [`Values`] is a view of the values of a [`SnapshotMapBase`].
pub struct Values<'m, K, V, L, T> {
    map: &'m SnapshotMapBase<K, V, L, T>,
}

/// [`Entries`] is a view of the entries of a [`SnapshotMapBase`].
pub struct Entries<'m, K, V, L, T> {
    map: &'m SnapshotMapBase<K, V, L, T>,
}

/// [`KeyIter`] iterates over the keys in a snapshot.
pub struct KeyIter<'m, K, V, L, T> {
    map: &'m SnapshotMapBase<K, V, L, T>,
    snapshot: Shared<Snapshot<K, V>>,
    index: usize,
}

/// [`ValueIter`] iterates over the values in a snapshot.
pub struct ValueIter<'m, K, V, L, T> {
    map: PhantomData<&'m SnapshotMapBase<K, V, L, T>>,
    snapshot: Shared<Snapshot<K, V>>,
    index: usize,
}

/// [`EntryIter`] iterates over the entries in a snapshot.
pub struct EntryIter<'m, K, V, L, T> {
    map: &'m SnapshotMapBase<K, V, L, T>,
    snapshot: Shared<Snapshot<K, V>>,
    index: usize,
}

/// [`SnapshotEntry`] is a key-value pair yielded by an [`EntryIter`].
///
/// It is a copy of the entry at the time the snapshot was taken;
/// [`SnapshotEntry::set_value`] writes the new value through to the map.
pub struct SnapshotEntry<'m, K, V, L, T> {
    map: &'m SnapshotMapBase<K, V, L, T>,
    key: K,
    val: V,
}

impl<'m, K, V, L, T> Keys<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    pub(super) fn new(map: &'m SnapshotMapBase<K, V, L, T>) -> Self {
        Self { map }
    }

    /// Returns the number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if there are no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` if the map has the key.
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Removes the key from the map, returning `true` if it was present.
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.remove(key).is_some()
    }

    /// Returns an iterator over the keys in a snapshot of the map.
    #[inline]
    pub fn iter(&self) -> KeyIter<'m, K, V, L, T> {
        KeyIter {
            map: self.map,
            snapshot: self.map.acquire_snapshot(),
            index: 0,
        }
    }
}

impl<'m, K, V, L, T> Values<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    pub(super) fn new(map: &'m SnapshotMapBase<K, V, L, T>) -> Self {
        Self { map }
    }

    /// Returns the number of values.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if there are no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` if a snapshot of the map contains the value.
    #[inline]
    pub fn contains(&self, val: &V) -> bool
    where
        V: PartialEq,
    {
        self.map.acquire_snapshot().values().contains(val)
    }

    /// Returns an iterator over the values in a snapshot of the map.
    #[inline]
    pub fn iter(&self) -> ValueIter<'m, K, V, L, T> {
        ValueIter {
            map: PhantomData,
            snapshot: self.map.acquire_snapshot(),
            index: 0,
        }
    }
}

impl<'m, K, V, L, T> Entries<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    pub(super) fn new(map: &'m SnapshotMapBase<K, V, L, T>) -> Self {
        Self { map }
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if there are no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` if the key is currently associated with the value.
    #[inline]
    pub fn contains<Q>(&self, key: &Q, val: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: PartialEq,
    {
        self.map.read(key, |_, v| v == val).unwrap_or(false)
    }

    /// Removes the entry if the key is currently associated with the value.
    #[inline]
    pub fn remove<Q>(&self, key: &Q, val: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: PartialEq,
    {
        self.map.remove_entry(key, val)
    }

    /// Returns an iterator over the entries in a snapshot of the map.
    #[inline]
    pub fn iter(&self) -> EntryIter<'m, K, V, L, T> {
        EntryIter {
            map: self.map,
            snapshot: self.map.acquire_snapshot(),
            index: 0,
        }
    }
}

impl<'m, K, V, L, T> KeyIter<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    /// Removes the key last returned by the iterator from the map.
    ///
    /// Returns the removed value, or `None` if the key is no longer in the map.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::NoCurrentElement`] if no key has been returned yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    /// assert!(map.put(1, 0).is_none());
    ///
    /// let keys = map.keys();
    /// let mut iter = keys.iter();
    /// assert!(iter.remove().is_err());
    /// assert_eq!(iter.next(), Some(1));
    /// assert_eq!(iter.remove(), Ok(Some(0)));
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    pub fn remove(&mut self) -> Result<Option<V>, ViewError> {
        let key = self
            .index
            .checked_sub(1)
            .and_then(|i| self.snapshot.key(i))
            .ok_or(ViewError::NoCurrentElement)?;
        Ok(self.map.remove(key))
    }
}

impl<'m, K, V, L, T> ValueIter<'m, K, V, L, T> {
    /// Removing through a value iterator is not supported.
    ///
    /// A value does not identify the entry to remove if duplicate values exist.
    ///
    /// # Errors
    ///
    /// Always returns [`ViewError::Unsupported`].
    #[inline]
    pub fn remove(&mut self) -> Result<V, ViewError> {
        Err(ViewError::Unsupported)
    }
}

impl<'m, K, V, L, T> EntryIter<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    /// Removes the entry last returned by the iterator from the map.
    ///
    /// The key is removed regardless of its current value.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::NoCurrentElement`] if no entry has been returned yet.
    #[inline]
    pub fn remove(&mut self) -> Result<Option<V>, ViewError> {
        let key = self
            .index
            .checked_sub(1)
            .and_then(|i| self.snapshot.key(i))
            .ok_or(ViewError::NoCurrentElement)?;
        Ok(self.map.remove(key))
    }
}

impl<'m, K, V, L, T> SnapshotEntry<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    /// Returns a reference to the key.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns a reference to the value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.val
    }

    /// Associates the key with the new value in the map, returning the value this entry held.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    /// assert!(map.put(1, 0).is_none());
    ///
    /// for mut entry in &map.entries() {
    ///     assert_eq!(entry.set_value(5), 0);
    ///     assert_eq!(*entry.value(), 5);
    /// }
    /// assert_eq!(map.get(&1), Some(5));
    /// ```
    #[inline]
    pub fn set_value(&mut self, val: V) -> V
    where
        V: PartialEq,
    {
        self.map.put(self.key.clone(), val.clone());
        std::mem::replace(&mut self.val, val)
    }

    /// Converts the entry into a key-value pair.
    #[inline]
    pub fn into_pair(self) -> (K, V) {
        (self.key, self.val)
    }
}

impl<'m, K, V, L, T> Iterator for KeyIter<'m, K, V, L, T>
where
    K: Clone,
{
    type Item = K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let key = self.snapshot.key(self.index)?.clone();
        self.index += 1;
        Some(key)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.snapshot.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl<'m, K, V, L, T> Iterator for ValueIter<'m, K, V, L, T>
where
    V: Clone,
{
    type Item = V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let val = self.snapshot.value(self.index)?.clone();
        self.index += 1;
        Some(val)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.snapshot.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl<'m, K, V, L, T> Iterator for EntryIter<'m, K, V, L, T>
where
    K: Clone,
    V: Clone,
{
    type Item = SnapshotEntry<'m, K, V, L, T>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let key = self.snapshot.key(self.index)?.clone();
        let val = self.snapshot.value(self.index)?.clone();
        self.index += 1;
        Some(SnapshotEntry {
            map: self.map,
            key,
            val,
        })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.snapshot.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl<K: Clone, V, L, T> ExactSizeIterator for KeyIter<'_, K, V, L, T> {}
impl<K: Clone, V, L, T> FusedIterator for KeyIter<'_, K, V, L, T> {}
impl<K, V: Clone, L, T> ExactSizeIterator for ValueIter<'_, K, V, L, T> {}
impl<K, V: Clone, L, T> FusedIterator for ValueIter<'_, K, V, L, T> {}
impl<K: Clone, V: Clone, L, T> ExactSizeIterator for EntryIter<'_, K, V, L, T> {}
impl<K: Clone, V: Clone, L, T> FusedIterator for EntryIter<'_, K, V, L, T> {}

impl<'m, K, V, L, T> IntoIterator for &Keys<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    type Item = K;
    type IntoIter = KeyIter<'m, K, V, L, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'m, K, V, L, T> IntoIterator for &Values<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    type Item = V;
    type IntoIter = ValueIter<'m, K, V, L, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'m, K, V, L, T> IntoIterator for &Entries<'m, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    type Item = SnapshotEntry<'m, K, V, L, T>;
    type IntoIter = EntryIter<'m, K, V, L, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, L, T> Debug for Keys<'_, K, V, L, T>
where
    K: 'static + Clone + Debug + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<K, V, L, T> Debug for Values<'_, K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone + Debug,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<K, V, L, T> Debug for Entries<'_, K, V, L, T>
where
    K: 'static + Clone + Debug + Eq + Hash,
    V: 'static + Clone + Debug,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(SnapshotEntry::into_pair))
            .finish()
    }
}

impl<K: Debug, V: Debug, L, T> Debug for SnapshotEntry<'_, K, V, L, T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SnapshotEntry")
            .field(&self.key)
            .field(&self.val)
            .finish()
    }
}
