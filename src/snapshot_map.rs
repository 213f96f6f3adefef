//! [`SnapshotMapBase`] is a concurrent map that caches an immutable snapshot of its entries for
//! iteration.

mod build_lock;
mod snapshot;
mod view;

use std::borrow::Borrow;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};

use sdd::{AtomicShared, Guard, Shared, Tag};

pub use build_lock::{
    BlockingBuildLock, BuildLock, LockAsync, SuspendingBuildLock, SuspendingBuildLockGuard,
};
pub use view::{EntryIter, Entries, KeyIter, Keys, SnapshotEntry, ValueIter, Values};

use snapshot::Snapshot;

use crate::sync::AtomicU64;
use crate::{ConcurrentTable, ShardedMap};

/// Snapshot-caching concurrent map.
///
/// [`SnapshotMapBase`] stores its entries in a [`ConcurrentTable`], and serves iteration from an
/// immutable snapshot of the table that is built on demand and reused until the next mutation.
/// Iterating over an unchanged map therefore costs no more than walking two arrays, without any
/// lock.
///
/// [`SnapshotMapBase`] is not meant to be used directly; use [`SnapshotMap`] in synchronous code
/// or [`SuspendingSnapshotMap`] in asynchronous code.
///
/// ## Versioning
///
/// Every mutation that changes the contents increments the version of the map and drops the
/// cached snapshot: inserting a key, replacing a value with a different one, removing an entry,
/// [`SnapshotMapBase::put_all`] and [`SnapshotMapBase::clear`]. Replacing a value with an equal
/// one does not touch the version, so the cached snapshot survives.
///
/// ## Locking behavior
///
/// Mutations never acquire the build lock, therefore readers building or holding a snapshot
/// never block writers. A snapshot is built while holding the build lock; the snapshot is
/// published only if the version did not change during the construction, and a published
/// snapshot is used only if its version matches the current version of the map.
///
/// ## Consistency
///
/// Iteration always observes a self-consistent snapshot that reflects the map at some point
/// during the call, though it may miss mutations made concurrently with the call.
pub struct SnapshotMapBase<K, V, L, T = ShardedMap<K, V>> {
    table: T,
    version: AtomicU64,
    snapshot: AtomicShared<Snapshot<K, V>>,
    build_lock: L,
}

/// [`SnapshotMap`] blocks the calling thread while waiting for another thread to finish building
/// a snapshot.
///
/// # Examples
///
/// ```
/// use snapshard::SnapshotMap;
///
/// let map: SnapshotMap<&str, u32> = SnapshotMap::new();
///
/// assert!(map.put("a", 1).is_none());
///
/// let mut count = 0;
/// map.for_each(|_, _| count += 1);
/// assert_eq!(count, 1);
/// ```
pub type SnapshotMap<K, V, T = ShardedMap<K, V>> = SnapshotMapBase<K, V, BlockingBuildLock, T>;

/// [`SuspendingSnapshotMap`] suspends the calling task instead of blocking the thread while
/// waiting for another task to finish building a snapshot.
///
/// # Examples
///
/// ```
/// use snapshard::SuspendingSnapshotMap;
///
/// let map: SuspendingSnapshotMap<&str, u32> = SuspendingSnapshotMap::new();
///
/// assert!(map.put("a", 1).is_none());
///
/// let future = async {
///     let mut count = 0;
///     map.for_each_async(|_, _| count += 1).await;
///     count
/// };
/// assert_eq!(futures::executor::block_on(future), 1);
/// ```
pub type SuspendingSnapshotMap<K, V, T = ShardedMap<K, V>> =
    SnapshotMapBase<K, V, SuspendingBuildLock, T>;

impl<K, V, L, T> SnapshotMapBase<K, V, L, T>
where
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    /// Creates an empty [`SnapshotMapBase`] backed by the given table.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::{ShardedMap, SnapshotMap};
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::with_table(ShardedMap::with_shard_count(4));
    ///
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    pub fn with_table(table: T) -> Self {
        Self {
            table,
            version: AtomicU64::new(0),
            snapshot: AtomicShared::null(),
            build_lock: L::default(),
        }
    }

    /// Returns the number of entries in the [`SnapshotMapBase`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// assert_eq!(map.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the [`SnapshotMapBase`] is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns a reference to the backing table.
    #[inline]
    pub fn table(&self) -> &T {
        &self.table
    }

    /// Returns the current version.
    #[cfg(test)]
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Acquire)
    }
}

impl<K, V, L> SnapshotMapBase<K, V, L, ShardedMap<K, V>>
where
    K: Eq + Hash,
    L: BuildLock,
{
    /// Creates an empty [`SnapshotMapBase`] backed by a default [`ShardedMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_table(ShardedMap::default())
    }
}

impl<K, V, L, T> SnapshotMapBase<K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    /// Gets a clone of the value associated with the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.get(&1).is_none());
    /// assert!(map.put(1, 10).is_none());
    /// assert_eq!(map.get(&1), Some(10));
    /// ```
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.read(key, |_, v| v.clone())
    }

    /// Reads the entry associated with the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, String> = SnapshotMap::new();
    ///
    /// assert!(map.put(1, "one".to_string()).is_none());
    /// assert_eq!(map.read(&1, |_, v| v.len()), Some(3));
    /// ```
    #[inline]
    pub fn read<Q, R, F: FnOnce(&K, &V) -> R>(&self, key: &Q, reader: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.read(key, reader)
    }

    /// Returns `true` if the [`SnapshotMapBase`] has the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(!map.contains_key(&1));
    /// assert!(map.put(1, 0).is_none());
    /// assert!(map.contains_key(&1));
    /// ```
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.contains_key(key)
    }

    /// Inserts or replaces the value associated with the key, returning the previous value.
    ///
    /// The cached snapshot is dropped unless the previous value equals the new one.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// assert_eq!(map.put(1, 1), Some(0));
    /// assert_eq!(map.get(&1), Some(1));
    /// ```
    #[inline]
    pub fn put(&self, key: K, val: V) -> Option<V>
    where
        V: PartialEq,
    {
        let (previous, changed) = self.table.put_changed(key, val);
        if changed {
            self.invalidate();
        }
        previous
    }

    /// Removes the key-value pair associated with the key, returning the removed value.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.remove(&1).is_none());
    /// assert!(map.put(1, 0).is_none());
    /// assert_eq!(map.remove(&1), Some(0));
    /// ```
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let removed = self.table.remove(key);
        if removed.is_some() {
            self.invalidate();
        }
        removed
    }

    /// Removes the key-value pair if the key is currently associated with the value.
    ///
    /// Returns `true` if the entry was removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// assert!(!map.remove_entry(&1, &1));
    /// assert!(map.remove_entry(&1, &0));
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    pub fn remove_entry<Q>(&self, key: &Q, val: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: PartialEq,
    {
        let removed = self.table.remove_if(key, |v| v == val).is_some();
        if removed {
            self.invalidate();
        }
        removed
    }

    /// Inserts or replaces every key-value pair in the iterator.
    ///
    /// The cached snapshot is dropped once after all the pairs are inserted.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// map.put_all([(1, 1), (2, 2)]);
    /// assert_eq!(map.len(), 2);
    /// ```
    #[inline]
    pub fn put_all<I: IntoIterator<Item = (K, V)>>(&self, iter: I) {
        iter.into_iter().for_each(|(k, v)| {
            self.table.put(k, v);
        });
        self.invalidate();
    }

    /// Clears the [`SnapshotMapBase`] by removing all key-value pairs.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// map.put_all([(1, 1), (2, 2)]);
    /// map.clear();
    ///
    /// let mut count = 0;
    /// map.for_each(|_, _| count += 1);
    /// assert_eq!(count, 0);
    /// ```
    #[inline]
    pub fn clear(&self) {
        self.table.clear();
        self.invalidate();
    }

    /// Iterates over all the entries in a snapshot of the [`SnapshotMapBase`].
    ///
    /// If an up-to-date snapshot is cached, the entries are read from it without acquiring any
    /// lock. Otherwise, a new snapshot is built while holding the build lock, and it is cached
    /// if no mutation happened during the construction.
    ///
    /// Building and visiting are two separate passes: the table is copied while the build lock
    /// is held, and the closure is invoked afterwards over the finished snapshot instead of
    /// during the walk of the table. The visited entries are exactly the copied ones. The
    /// closure is invoked without holding any lock, therefore it is allowed to access the
    /// [`SnapshotMapBase`], including nested iteration and mutation.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.put(1, 1).is_none());
    /// assert!(map.put(2, 2).is_none());
    ///
    /// let mut sum = 0;
    /// map.for_each(|k, v| sum += *k + u64::from(*v));
    /// assert_eq!(sum, 6);
    /// ```
    #[inline]
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        {
            let guard = Guard::new();
            if let Some(snapshot) = self.cached_snapshot(&guard) {
                snapshot.for_each(&mut f);
                return;
            }
        }
        self.acquire_snapshot().for_each(f);
    }

    /// Returns a view of the keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// assert!(map.keys().contains(&1));
    /// assert_eq!(map.keys().iter().collect::<Vec<_>>(), vec![1]);
    /// ```
    #[inline]
    pub fn keys(&self) -> Keys<'_, K, V, L, T> {
        Keys::new(self)
    }

    /// Returns a view of the values.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.put(1, 7).is_none());
    /// assert!(map.values().contains(&7));
    /// assert_eq!(map.values().iter().sum::<u32>(), 7);
    /// ```
    #[inline]
    pub fn values(&self) -> Values<'_, K, V, L, T> {
        Values::new(self)
    }

    /// Returns a view of the entries.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::new();
    ///
    /// assert!(map.put(1, 7).is_none());
    /// for entry in &map.entries() {
    ///     assert_eq!((*entry.key(), *entry.value()), (1, 7));
    /// }
    /// ```
    #[inline]
    pub fn entries(&self) -> Entries<'_, K, V, L, T> {
        Entries::new(self)
    }

    /// Returns a snapshot, building one if no up-to-date snapshot is cached.
    pub(crate) fn acquire_snapshot(&self) -> Shared<Snapshot<K, V>> {
        if let Some(snapshot) = self.cached_shared() {
            return snapshot;
        }
        let _lock = self.build_lock.lock_sync();
        self.cached_shared()
            .unwrap_or_else(|| self.build_snapshot_under_lock())
    }

    /// Increments the version and drops the cached snapshot.
    #[inline]
    fn invalidate(&self) {
        self.version.fetch_add(1, AcqRel);
        if !self.snapshot.is_null(Acquire) {
            self.snapshot.swap((None, Tag::None), Release);
        }
    }

    /// Returns the cached snapshot if it is up to date.
    #[inline]
    fn cached_snapshot<'g>(&self, guard: &'g Guard) -> Option<&'g Snapshot<K, V>> {
        let snapshot = self.snapshot.load(Acquire, guard).as_ref()?;
        (snapshot.version() == self.version.load(Acquire)).then_some(snapshot)
    }

    /// Returns a strong reference to the cached snapshot if it is up to date.
    #[inline]
    fn cached_shared(&self) -> Option<Shared<Snapshot<K, V>>> {
        let snapshot = self.snapshot.get_shared(Acquire, &Guard::new())?;
        (snapshot.version() == self.version.load(Acquire)).then_some(snapshot)
    }

    /// Copies the entries of the table into a new snapshot.
    ///
    /// The build lock must be held. The snapshot is cached only if the version did not change
    /// while the table was being copied.
    fn build_snapshot_under_lock(&self) -> Shared<Snapshot<K, V>> {
        let start_version = self.version.load(Acquire);
        let len = self.table.len();
        let mut keys = Vec::with_capacity(len);
        let mut values = Vec::with_capacity(len);
        self.table.for_each(|k, v| {
            keys.push(k.clone());
            values.push(v.clone());
        });

        let snapshot = Shared::new(Snapshot::new(keys, values, start_version));
        if self.version.load(Acquire) == start_version {
            self.snapshot
                .swap((Some(snapshot.clone()), Tag::None), Release);
        }
        snapshot
    }
}

impl<K, V, T> SnapshotMapBase<K, V, SuspendingBuildLock, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    T: ConcurrentTable<K, V>,
{
    /// Iterates over all the entries in a snapshot of the [`SuspendingSnapshotMap`].
    ///
    /// It is an asynchronous version of [`SnapshotMapBase::for_each`]: if a snapshot has to be
    /// built while another task is building one, the current task is suspended until the build
    /// lock is released, instead of blocking the thread. As with the blocking version, the
    /// closure is invoked over the finished snapshot after the build lock is released.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SuspendingSnapshotMap;
    ///
    /// let map: SuspendingSnapshotMap<u64, u32> = SuspendingSnapshotMap::new();
    ///
    /// assert!(map.put(1, 1).is_none());
    /// let future_for_each = map.for_each_async(|k, v| assert_eq!(u64::from(*v), *k));
    /// ```
    #[inline]
    pub async fn for_each_async<F: FnMut(&K, &V)>(&self, mut f: F) {
        {
            let guard = Guard::new();
            if let Some(snapshot) = self.cached_snapshot(&guard) {
                snapshot.for_each(&mut f);
                return;
            }
        }
        let snapshot = self.acquire_snapshot_async().await;
        snapshot.for_each(f);
    }

    /// Returns a snapshot, suspending the task if the build lock is held by another task.
    async fn acquire_snapshot_async(&self) -> Shared<Snapshot<K, V>> {
        if let Some(snapshot) = self.cached_shared() {
            return snapshot;
        }
        let _lock = self.build_lock.lock_async().await;
        self.cached_shared()
            .unwrap_or_else(|| self.build_snapshot_under_lock())
    }
}

impl<K, V, L, T> Debug for SnapshotMapBase<K, V, L, T>
where
    K: 'static + Clone + Debug + Eq + Hash,
    V: 'static + Clone + Debug,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    /// Prints the entries in a snapshot of the [`SnapshotMapBase`].
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_map();
        self.for_each(|k, v| {
            d.entry(k, v);
        });
        d.finish()
    }
}

impl<K, V, L, T> Default for SnapshotMapBase<K, V, L, T>
where
    L: BuildLock,
    T: ConcurrentTable<K, V> + Default,
{
    /// Creates an empty [`SnapshotMapBase`] backed by a default table.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::SnapshotMap;
    ///
    /// let map: SnapshotMap<u64, u32> = SnapshotMap::default();
    ///
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    fn default() -> Self {
        Self::with_table(T::default())
    }
}

impl<K, V, L, T> PartialEq for SnapshotMapBase<K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone + PartialEq,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    /// Compares a snapshot of `self` with the current contents of `other`.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        let snapshot = self.acquire_snapshot();
        if snapshot.len() != other.len() {
            return false;
        }
        let mut equal = true;
        snapshot.for_each(|k, v| {
            if equal && other.read(k, |_, o| o == v) != Some(true) {
                equal = false;
            }
        });
        equal
    }
}

impl<K, V, L, T> Extend<(K, V)> for SnapshotMapBase<K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    #[inline]
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.put_all(iter);
    }
}

impl<K, V, L, T> FromIterator<(K, V)> for SnapshotMapBase<K, V, L, T>
where
    K: 'static + Clone + Eq + Hash,
    V: 'static + Clone,
    L: BuildLock,
    T: ConcurrentTable<K, V> + Default,
{
    #[inline]
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::default();
        map.put_all(iter);
        map
    }
}
