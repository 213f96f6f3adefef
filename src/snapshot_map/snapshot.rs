/// [`Snapshot`] is an immutable point-in-time copy of the entries of a snapshot map.
///
/// `keys[i]` is associated with `values[i]`. Once published, a [`Snapshot`] is shared among
/// readers without synchronization.
#[derive(Debug)]
pub(crate) struct Snapshot<K, V> {
    keys: Box<[K]>,
    values: Box<[V]>,
    version: u64,
}

impl<K, V> Snapshot<K, V> {
    /// Creates a new [`Snapshot`] from the collected keys and values.
    #[inline]
    pub(crate) fn new(keys: Vec<K>, values: Vec<V>, version: u64) -> Self {
        debug_assert_eq!(keys.len(), values.len());
        Self {
            keys: keys.into_boxed_slice(),
            values: values.into_boxed_slice(),
            version,
        }
    }

    /// Returns the version of the map at which the snapshot was captured.
    #[inline]
    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    /// Returns the number of entries.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns the key at the position.
    #[inline]
    pub(crate) fn key(&self, index: usize) -> Option<&K> {
        self.keys.get(index)
    }

    /// Returns the value at the position.
    #[inline]
    pub(crate) fn value(&self, index: usize) -> Option<&V> {
        self.values.get(index)
    }

    /// Returns the values.
    #[inline]
    pub(crate) fn values(&self) -> &[V] {
        &self.values
    }

    /// Invokes `f` for every entry.
    #[inline]
    pub(crate) fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        self.keys
            .iter()
            .zip(self.values.iter())
            .for_each(|(k, v)| f(k, v));
    }
}
