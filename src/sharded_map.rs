//! [`ShardedMap`] is a concurrent hash map that stripes its entries over independently locked
//! segments.

mod segment;

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::Ordering::Relaxed;
use std::thread::available_parallelism;

use segment::Segment;

use crate::sync::AtomicIsize;
use crate::ConcurrentTable;

/// The maximum number of segments of a [`ShardedMap`].
pub const MAX_SHARD_COUNT: usize = 1 << 16;

/// Sharded concurrent hash map.
///
/// [`ShardedMap`] owns a fixed, power-of-two sized array of segments where each segment is a
/// hash table guarded by its own mutex. Every operation on a single key is routed to exactly one
/// segment, therefore writers only contend when their keys share a segment.
///
/// ## The key features of [`ShardedMap`]
///
/// * Striped locking: operations on keys in different segments never block each other.
/// * Cache-line separated segments: the locks of adjacent segments do not share cache lines.
/// * No allocation in iteration: [`ShardedMap::for_each`] walks the segments in place.
///
/// ## Consistency
///
/// Operations on a single segment are linearizable. Nothing is promised across segments:
/// [`ShardedMap::for_each`] and [`ShardedMap::snapshot`] visit the segments one after another,
/// so a write landing in a segment that was already visited is not observed.
/// [`ShardedMap::len`] is maintained by a separate counter that is updated right after the
/// segment lock is released, thus it may briefly disagree with the contents while writers are
/// active. It never drifts: once all writers are done, it equals the number of entries.
///
/// ## Locking behavior
///
/// Callbacks passed to the traversal methods are invoked while the corresponding segment is
/// locked, therefore accessing the same [`ShardedMap`] in the callback may lead to a deadlock.
pub struct ShardedMap<K, V, H = RandomState>
where
    H: BuildHasher,
{
    segments: Box<[Segment<K, V>]>,
    mask: usize,
    len: AtomicIsize,
    build_hasher: H,
}

impl<K, V, H> ShardedMap<K, V, H>
where
    H: BuildHasher,
{
    /// Creates an empty [`ShardedMap`] with the given [`BuildHasher`].
    ///
    /// The number of segments is derived from the available parallelism.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let map: ShardedMap<u64, u32, RandomState> = ShardedMap::with_hasher(RandomState::new());
    /// assert!(map.shard_count() >= 2);
    /// ```
    #[inline]
    pub fn with_hasher(build_hasher: H) -> Self {
        Self::with_shard_count_and_hasher(default_shard_count(), build_hasher)
    }

    /// Creates an empty [`ShardedMap`] with the specified number of segments and
    /// [`BuildHasher`].
    ///
    /// The number of segments is rounded up to the next power of two, and it is at least `2` and
    /// at most [`MAX_SHARD_COUNT`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let map: ShardedMap<u64, u32, RandomState> =
    ///     ShardedMap::with_shard_count_and_hasher(5, RandomState::new());
    /// assert_eq!(map.shard_count(), 8);
    /// ```
    #[inline]
    pub fn with_shard_count_and_hasher(shard_count: usize, build_hasher: H) -> Self {
        let shard_count = shard_count.clamp(2, MAX_SHARD_COUNT).next_power_of_two();
        Self {
            segments: (0..shard_count).map(|_| Segment::new()).collect(),
            mask: shard_count - 1,
            len: AtomicIsize::new(0),
            build_hasher,
        }
    }

    /// Returns the number of segments.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::with_shard_count(0);
    /// assert_eq!(map.shard_count(), 2);
    /// ```
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns the number of entries in the [`ShardedMap`].
    ///
    /// The value is approximate while other threads are modifying the [`ShardedMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// assert_eq!(map.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        usize::try_from(self.len.load(Relaxed)).unwrap_or(0)
    }

    /// Returns `true` if the [`ShardedMap`] is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.is_empty());
    /// assert!(map.put(1, 0).is_none());
    /// assert!(!map.is_empty());
    /// ```
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears the [`ShardedMap`] by removing all key-value pairs.
    ///
    /// Segments are cleared one after another, therefore an entry inserted into an already
    /// cleared segment by another thread survives.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// map.clear();
    ///
    /// assert!(!map.contains_key(&1));
    /// assert_eq!(map.len(), 0);
    /// ```
    #[inline]
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            let removed = segment.clear();
            if removed > 0 {
                self.len
                    .fetch_sub(isize::try_from(removed).unwrap_or(isize::MAX), Relaxed);
            }
        }
    }

    /// Iterates over all the entries in the [`ShardedMap`].
    ///
    /// The iteration is weakly consistent: each segment is locked while it is being visited,
    /// and an entry is never visited twice, but modifications made by other threads during
    /// the iteration may or may not be observed.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// assert!(map.put(2, 1).is_none());
    ///
    /// let mut sum = 0;
    /// map.for_each(|k, v| sum += *k + u64::from(*v));
    /// assert_eq!(sum, 4);
    /// ```
    #[inline]
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        for segment in self.segments.iter() {
            segment.for_each(&mut f);
        }
    }

    /// Iterates over all the keys in the [`ShardedMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.put(1, 0).is_none());
    ///
    /// let mut keys = Vec::new();
    /// map.for_each_key(|k| keys.push(*k));
    /// assert_eq!(keys, vec![1]);
    /// ```
    #[inline]
    pub fn for_each_key<F: FnMut(&K)>(&self, mut f: F) {
        for segment in self.segments.iter() {
            segment.for_each_key(&mut f);
        }
    }

    /// Iterates over all the values in the [`ShardedMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.put(1, 7).is_none());
    ///
    /// let mut values = Vec::new();
    /// map.for_each_value(|v| values.push(*v));
    /// assert_eq!(values, vec![7]);
    /// ```
    #[inline]
    pub fn for_each_value<F: FnMut(&V)>(&self, mut f: F) {
        for segment in self.segments.iter() {
            segment.for_each_value(&mut f);
        }
    }

    /// Returns a point-in-time copy of the entries as a [`HashMap`].
    ///
    /// Each segment is copied atomically, but not the [`ShardedMap`] as a whole.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// let copied = map.snapshot();
    /// assert!(map.put(2, 0).is_none());
    ///
    /// assert_eq!(copied.len(), 1);
    /// assert_eq!(copied.get(&1), Some(&0));
    /// ```
    #[inline]
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone + Eq + Hash,
        V: Clone,
    {
        let mut snapshot = HashMap::with_capacity(self.len());
        self.for_each(|k, v| {
            snapshot.insert(k.clone(), v.clone());
        });
        snapshot
    }
}

impl<K, V, H> ShardedMap<K, V, H>
where
    K: Eq + Hash,
    H: BuildHasher,
{
    /// Gets a clone of the value associated with the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<&str, u32> = ShardedMap::default();
    ///
    /// assert!(map.get("apple").is_none());
    /// assert!(map.put("apple", 1).is_none());
    /// assert_eq!(map.get("apple"), Some(1));
    /// ```
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.segment(key).get(key)
    }

    /// Reads the entry associated with the key.
    ///
    /// The reader is invoked while the segment is locked.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, String> = ShardedMap::default();
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
        self.segment(key).read(key, reader)
    }

    /// Returns `true` if the [`ShardedMap`] has the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
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
        self.segment(key).contains(key)
    }

    /// Inserts or replaces the value associated with the key, returning the previous value.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// assert_eq!(map.put(1, 1), Some(0));
    /// assert_eq!(map.len(), 1);
    /// ```
    #[inline]
    pub fn put(&self, key: K, val: V) -> Option<V> {
        let previous = self.segment(&key).put(key, val);
        if previous.is_none() {
            self.len.fetch_add(1, Relaxed);
        }
        previous
    }

    /// Inserts or replaces the value associated with the key.
    ///
    /// This is an alias of [`ShardedMap::put`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.insert(1, 0).is_none());
    /// assert_eq!(map.get(&1), Some(0));
    /// ```
    #[inline]
    pub fn insert(&self, key: K, val: V) -> Option<V> {
        self.put(key, val)
    }

    /// Removes the key-value pair associated with the key, returning the removed value.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.remove(&1).is_none());
    /// assert!(map.put(1, 0).is_none());
    /// assert_eq!(map.remove(&1), Some(0));
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let removed = self.segment(key).remove(key);
        if removed.is_some() {
            self.len.fetch_sub(1, Relaxed);
        }
        removed
    }

    /// Removes the key-value pair associated with the key if the condition holds for the value.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.put(1, 0).is_none());
    /// assert!(map.remove_if(&1, |v| *v == 1).is_none());
    /// assert_eq!(map.remove_if(&1, |v| *v == 0), Some(0));
    /// ```
    #[inline]
    pub fn remove_if<Q, F: FnOnce(&V) -> bool>(&self, key: &Q, condition: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let removed = self.segment(key).remove_if(key, condition);
        if removed.is_some() {
            self.len.fetch_sub(1, Relaxed);
        }
        removed
    }

    /// Returns the index of the segment that the key is routed to.
    ///
    /// The index is stable for the lifetime of the [`ShardedMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::with_shard_count(4);
    ///
    /// let index = map.shard_index(&11);
    /// assert!(index < 4);
    /// assert_eq!(index, map.shard_index(&11));
    /// ```
    #[inline]
    pub fn shard_index<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        let mut hasher = self.build_hasher.build_hasher();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let smeared = smear(hasher.finish()) as usize;
        smeared & self.mask
    }

    /// Returns the segment that the key is routed to.
    #[inline]
    fn segment<Q>(&self, key: &Q) -> &Segment<K, V>
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        &self.segments[self.shard_index(key)]
    }

    /// Inserts or replaces the value, and reports whether the stored value changed.
    #[inline]
    fn put_changed(&self, key: K, val: V) -> (Option<V>, bool)
    where
        V: PartialEq,
    {
        let (previous, changed) = self.segment(&key).put_changed(key, val);
        if previous.is_none() {
            self.len.fetch_add(1, Relaxed);
        }
        (previous, changed)
    }
}

impl<K, V> ShardedMap<K, V, RandomState> {
    /// Creates an empty default [`ShardedMap`].
    ///
    /// The number of segments is the next power of two of twice the available parallelism.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::new();
    ///
    /// assert!(map.shard_count().is_power_of_two());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty [`ShardedMap`] with the specified number of segments.
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::with_shard_count(4);
    ///
    /// assert_eq!(map.shard_count(), 4);
    /// ```
    #[inline]
    #[must_use]
    pub fn with_shard_count(shard_count: usize) -> Self {
        Self::with_shard_count_and_hasher(shard_count, RandomState::new())
    }
}

impl<K, V, H> ConcurrentTable<K, V> for ShardedMap<K, V, H>
where
    K: Eq + Hash,
    H: BuildHasher,
{
    #[inline]
    fn read<Q, R, F: FnOnce(&K, &V) -> R>(&self, key: &Q, reader: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        ShardedMap::read(self, key, reader)
    }

    #[inline]
    fn put(&self, key: K, val: V) -> Option<V> {
        ShardedMap::put(self, key, val)
    }

    #[inline]
    fn put_changed(&self, key: K, val: V) -> (Option<V>, bool)
    where
        V: PartialEq,
    {
        ShardedMap::put_changed(self, key, val)
    }

    #[inline]
    fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        ShardedMap::remove(self, key)
    }

    #[inline]
    fn remove_if<Q, F: FnOnce(&V) -> bool>(&self, key: &Q, condition: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        ShardedMap::remove_if(self, key, condition)
    }

    #[inline]
    fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        ShardedMap::contains_key(self, key)
    }

    /// Returns the exact number of entries by summing up the segments.
    ///
    /// Snapshot maps size their snapshot buffers with it, so the approximate counter is not
    /// good enough.
    #[inline]
    fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    #[inline]
    fn clear(&self) {
        ShardedMap::clear(self);
    }

    #[inline]
    fn for_each<F: FnMut(&K, &V)>(&self, f: F) {
        ShardedMap::for_each(self, f);
    }
}

impl<K, V, H> Debug for ShardedMap<K, V, H>
where
    K: Debug,
    V: Debug,
    H: BuildHasher,
{
    /// Iterates over all the entries in the [`ShardedMap`] to print them.
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_map();
        self.for_each(|k, v| {
            d.entry(k, v);
        });
        d.finish()
    }
}

impl<K, V, H> Default for ShardedMap<K, V, H>
where
    H: BuildHasher + Default,
{
    /// Creates an empty default [`ShardedMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use snapshard::ShardedMap;
    ///
    /// let map: ShardedMap<u64, u32> = ShardedMap::default();
    ///
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    fn default() -> Self {
        Self::with_hasher(H::default())
    }
}

impl<K, V, H> PartialEq for ShardedMap<K, V, H>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
    H: BuildHasher,
{
    /// Compares two [`ShardedMap`] instances by copying their entries.
    ///
    /// Segments of the two maps are never locked at the same time.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.snapshot() == other.snapshot()
    }
}

impl<K, V, H> Extend<(K, V)> for ShardedMap<K, V, H>
where
    K: Eq + Hash,
    H: BuildHasher,
{
    #[inline]
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        iter.into_iter().for_each(|(k, v)| {
            self.put(k, v);
        });
    }
}

impl<K, V, H> FromIterator<(K, V)> for ShardedMap<K, V, H>
where
    K: Eq + Hash,
    H: BuildHasher + Default,
{
    #[inline]
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

/// Mixes the high bits of the hash into the low bits used for segment selection.
#[inline]
const fn smear(hash: u64) -> u64 {
    hash ^ (hash >> 16)
}

/// Returns the default number of segments: twice the available parallelism.
#[inline]
fn default_shard_count() -> usize {
    available_parallelism().map_or(1, NonZeroUsize::get) * 2
}
