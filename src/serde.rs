use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

use serde::de::{Deserialize, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserializer;

use super::snapshot_map::BuildLock;
use super::{ConcurrentTable, ShardedMap, SnapshotMapBase};

/// Helper type to allow `serde` to access [`ShardedMap`] entries.
pub struct ShardedMapVisitor<K, V, H: BuildHasher> {
    #[allow(clippy::type_complexity)]
    marker: PhantomData<fn() -> ShardedMap<K, V, H>>,
}

impl<'de, K, V, H> Visitor<'de> for ShardedMapVisitor<K, V, H>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
    H: BuildHasher + Default,
{
    type Value = ShardedMap<K, V, H>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a ShardedMap")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let map = ShardedMap::default();
        while let Some((key, val)) = access.next_entry()? {
            map.put(key, val);
        }
        Ok(map)
    }
}

impl<'de, K, V, H> Deserialize<'de> for ShardedMap<K, V, H>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
    H: BuildHasher + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ShardedMapVisitor {
            marker: PhantomData,
        })
    }
}

impl<K, V, H> Serialize for ShardedMap<K, V, H>
where
    K: Serialize,
    V: Serialize,
    H: BuildHasher,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // The number of entries may change during serialization.
        let mut map = serializer.serialize_map(None)?;
        let mut error = None;
        self.for_each(|k, v| {
            if error.is_none() {
                if let Err(e) = map.serialize_entry(k, v) {
                    error.replace(e);
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        map.end()
    }
}

/// Helper type to allow `serde` to access [`SnapshotMapBase`] entries.
pub struct SnapshotMapVisitor<K, V, L, T> {
    #[allow(clippy::type_complexity)]
    marker: PhantomData<fn() -> SnapshotMapBase<K, V, L, T>>,
}

impl<'de, K, V, L, T> Visitor<'de> for SnapshotMapVisitor<K, V, L, T>
where
    K: 'static + Clone + Deserialize<'de> + Eq + Hash,
    V: 'static + Clone + Deserialize<'de>,
    L: BuildLock,
    T: ConcurrentTable<K, V> + Default,
{
    type Value = SnapshotMapBase<K, V, L, T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a SnapshotMap")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let table = T::default();
        while let Some((key, val)) = access.next_entry()? {
            table.put(key, val);
        }
        Ok(SnapshotMapBase::with_table(table))
    }
}

impl<'de, K, V, L, T> Deserialize<'de> for SnapshotMapBase<K, V, L, T>
where
    K: 'static + Clone + Deserialize<'de> + Eq + Hash,
    V: 'static + Clone + Deserialize<'de>,
    L: BuildLock,
    T: ConcurrentTable<K, V> + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(SnapshotMapVisitor {
            marker: PhantomData,
        })
    }
}

impl<K, V, L, T> Serialize for SnapshotMapBase<K, V, L, T>
where
    K: 'static + Clone + Eq + Hash + Serialize,
    V: 'static + Clone + Serialize,
    L: BuildLock,
    T: ConcurrentTable<K, V>,
{
    /// Serializes the entries of a single snapshot.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let snapshot = self.acquire_snapshot();
        let mut map = serializer.serialize_map(Some(snapshot.len()))?;
        let mut error = None;
        snapshot.for_each(|k, v| {
            if error.is_none() {
                if let Err(e) = map.serialize_entry(k, v) {
                    error.replace(e);
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        map.end()
    }
}
