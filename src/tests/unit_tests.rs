mod sharded_map {
    use std::collections::hash_map::RandomState;
    use std::collections::BTreeSet;
    use std::hash::{BuildHasherDefault, Hasher};
    use std::panic::{RefUnwindSafe, UnwindSafe};
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;

    use crate::sharded_map::MAX_SHARD_COUNT;
    use crate::{ConcurrentTable, ShardedMap};

    static_assertions::assert_impl_all!(ShardedMap<String, String>: Send, Sync, RefUnwindSafe, UnwindSafe);
    static_assertions::assert_not_impl_any!(ShardedMap<Rc<String>, Rc<String>>: Send, Sync);
    static_assertions::assert_not_impl_any!(ShardedMap<String, *const String>: Send, Sync);

    struct R(&'static AtomicUsize);
    impl R {
        fn new(cnt: &'static AtomicUsize) -> R {
            cnt.fetch_add(1, Relaxed);
            R(cnt)
        }
    }
    impl Drop for R {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Relaxed);
        }
    }

    /// Hashes a `u64` key to itself.
    #[derive(Default)]
    struct IdentityHasher(u64);
    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }
        fn write(&mut self, bytes: &[u8]) {
            for b in bytes {
                self.0 = (self.0 << 8) | u64::from(*b);
            }
        }
        fn write_u64(&mut self, i: u64) {
            self.0 = i;
        }
    }

    #[test]
    fn fruits() {
        let map: ShardedMap<&str, u32> = ShardedMap::with_shard_count(4);
        assert_eq!(map.shard_count(), 4);
        assert!(map.put("apple", 1).is_none());
        assert!(map.put("banana", 2).is_none());
        assert_eq!(map.get("apple"), Some(1));
        assert_eq!(map.len(), 2);

        assert_eq!(map.put("apple", 3), Some(1));
        assert_eq!(map.get("apple"), Some(3));
        assert_eq!(map.len(), 2);

        assert_eq!(map.remove("banana"), Some(2));
        assert!(map.remove("banana").is_none());
        assert!(!map.contains_key("banana"));
        assert_eq!(map.len(), 1);

        let map: ShardedMap<&str, u32> = ShardedMap::with_shard_count(4);
        assert!(map.put("apple", 1).is_none());
        assert!(map.put("banana", 2).is_none());
        assert_eq!(map.get("apple"), Some(1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.remove("apple"), Some(1));
        assert!(map.get("apple").is_none());
        assert_eq!(map.get("banana"), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn shard_count() {
        assert_eq!(ShardedMap::<u64, u64>::with_shard_count(0).shard_count(), 2);
        assert_eq!(ShardedMap::<u64, u64>::with_shard_count(1).shard_count(), 2);
        assert_eq!(ShardedMap::<u64, u64>::with_shard_count(3).shard_count(), 4);
        assert_eq!(ShardedMap::<u64, u64>::with_shard_count(64).shard_count(), 64);
        assert_eq!(ShardedMap::<u64, u64>::with_shard_count(65).shard_count(), 128);

        let shard_count = ShardedMap::<u64, u64>::default().shard_count();
        assert!(shard_count >= 2);
        assert!(shard_count <= MAX_SHARD_COUNT);
        assert!(shard_count.is_power_of_two());
    }

    #[test]
    fn shard_count_cap() {
        assert!(MAX_SHARD_COUNT.is_power_of_two());
        for requested in [MAX_SHARD_COUNT + 1, (usize::MAX >> 1) + 1, usize::MAX] {
            let map: ShardedMap<u64, u64> = ShardedMap::with_shard_count(requested);
            assert_eq!(map.shard_count(), MAX_SHARD_COUNT);
            assert!(map.put(7, 7).is_none());
            assert_eq!(map.get(&7), Some(7));
            assert!(map.shard_index(&7) < MAX_SHARD_COUNT);
        }
        let map: ShardedMap<u64, u64> = ShardedMap::with_shard_count(MAX_SHARD_COUNT);
        assert_eq!(map.shard_count(), MAX_SHARD_COUNT);
    }

    #[test]
    fn shard_index() {
        let map: ShardedMap<String, usize> = ShardedMap::with_shard_count(16);
        for i in 0..1024 {
            let key = i.to_string();
            let index = map.shard_index(key.as_str());
            assert!(index < 16);
            assert!(map.put(key.clone(), index).is_none());
            assert_eq!(map.shard_index(&key), index);
        }
        map.for_each(|k, v| assert_eq!(map.shard_index(k.as_str()), *v));
    }

    #[test]
    fn smear() {
        // Keys only differing above the mask land in different segments after smearing.
        let map: ShardedMap<u64, u64, BuildHasherDefault<IdentityHasher>> =
            ShardedMap::with_shard_count_and_hasher(16, BuildHasherDefault::default());
        let indexes: BTreeSet<usize> = (0..16_u64).map(|i| map.shard_index(&(i << 16))).collect();
        assert_eq!(indexes.len(), 16);
        assert_eq!(map.shard_index(&7), 7);
    }

    #[test]
    fn clear() {
        static INST_CNT: AtomicUsize = AtomicUsize::new(0);
        let map: ShardedMap<usize, R> = ShardedMap::with_shard_count(8);

        let workload_size = 1 << 10;
        for k in 0..workload_size {
            assert!(map.put(k, R::new(&INST_CNT)).is_none());
        }
        assert_eq!(INST_CNT.load(Relaxed), workload_size);
        assert_eq!(map.len(), workload_size);

        map.clear();
        assert_eq!(INST_CNT.load(Relaxed), 0);
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());

        for k in 0..workload_size {
            assert!(map.put(k, R::new(&INST_CNT)).is_none());
        }
        drop(map);
        assert_eq!(INST_CNT.load(Relaxed), 0);
    }

    #[test]
    fn remove_if() {
        let map: ShardedMap<u64, u64> = ShardedMap::default();
        assert!(map.put(1, 10).is_none());
        assert!(map.remove_if(&1, |v| *v == 11).is_none());
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove_if(&1, |v| *v == 10), Some(10));
        assert!(map.is_empty());
        assert!(map.remove_if(&1, |_| true).is_none());
    }

    #[test]
    fn traversal() {
        let map: ShardedMap<u64, u64> = (0..64).map(|i| (i, i + 1)).collect();
        assert_eq!(map.len(), 64);

        let mut keys = BTreeSet::new();
        map.for_each_key(|k| assert!(keys.insert(*k)));
        assert_eq!(keys, (0..64).collect());

        let mut values = BTreeSet::new();
        map.for_each_value(|v| assert!(values.insert(*v)));
        assert_eq!(values, (1..65).collect());

        let mut count = 0;
        map.for_each(|k, v| {
            assert_eq!(*k + 1, *v);
            count += 1;
        });
        assert_eq!(count, 64);

        let copied = map.snapshot();
        assert_eq!(copied.len(), 64);
        assert!(copied.iter().all(|(k, v)| *k + 1 == *v));

        let mut empty: ShardedMap<u64, u64> = ShardedMap::default();
        empty.for_each(|_, _| unreachable!());
        assert!(empty.snapshot().is_empty());
        empty.extend([(3, 4)]);
        assert_eq!(empty.get(&3), Some(4));
    }

    #[test]
    fn concurrent_table() {
        fn exercise<T: ConcurrentTable<u64, u64>>(table: &T) {
            assert!(table.is_empty());
            assert!(table.put(1, 1).is_none());
            assert_eq!(table.put_changed(1, 1), (Some(1), false));
            assert_eq!(table.put_changed(1, 2), (Some(1), true));
            assert_eq!(table.put_changed(2, 2), (None, true));
            assert!(table.contains_key(&2));
            assert_eq!(table.read(&1, |_, v| *v), Some(2));
            assert_eq!(table.len(), 2);
            assert!(table.remove_if(&1, |v| *v == 1).is_none());
            assert_eq!(table.remove(&1), Some(2));
            let mut count = 0;
            table.for_each(|_, _| count += 1);
            assert_eq!(count, 1);
            table.clear();
            assert!(table.is_empty());
        }

        let map: ShardedMap<u64, u64> = ShardedMap::with_shard_count(2);
        exercise(&map);
        assert!(map.is_empty());
    }

    #[test]
    fn debug_and_compare() {
        let map: ShardedMap<u64, u64, RandomState> = ShardedMap::with_shard_count(4);
        assert_eq!(format!("{map:?}"), "{}");
        assert!(map.put(1, 2).is_none());
        assert_eq!(format!("{map:?}"), "{1: 2}");

        let other: ShardedMap<u64, u64, RandomState> = ShardedMap::with_shard_count(8);
        assert!(map != other);
        assert!(other.put(1, 2).is_none());
        assert!(map == other);
        assert!(other.put(1, 3).is_some());
        assert!(map != other);
    }
}

mod snapshot_map {
    use std::borrow::Borrow;
    use std::hash::Hash;
    use std::panic::{RefUnwindSafe, UnwindSafe};
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;

    use crate::snapshot_map::{EntryIter, KeyIter, Keys, ValueIter};
    use crate::{
        ConcurrentTable, ShardedMap, SnapshotMap, SnapshotMapBase, SuspendingSnapshotMap,
        ViewError,
    };

    static_assertions::assert_impl_all!(SnapshotMap<String, String>: Send, Sync, RefUnwindSafe, UnwindSafe);
    static_assertions::assert_impl_all!(SuspendingSnapshotMap<String, String>: Send, Sync);
    static_assertions::assert_not_impl_any!(SnapshotMap<Rc<String>, Rc<String>>: Send, Sync);
    static_assertions::assert_not_impl_any!(SuspendingSnapshotMap<Rc<String>, Rc<String>>: Send, Sync);
    static_assertions::assert_impl_all!(KeyIter<'static, String, String, crate::snapshot_map::BlockingBuildLock, ShardedMap<String, String>>: Send, Sync);
    static_assertions::assert_impl_all!(Keys<'static, String, String, crate::snapshot_map::BlockingBuildLock, ShardedMap<String, String>>: Send, Sync);

    /// [`ShardedMap`] wrapper that counts full traversals.
    #[derive(Default)]
    struct CountingTable {
        map: ShardedMap<u64, u64>,
        traversals: AtomicUsize,
    }

    impl ConcurrentTable<u64, u64> for CountingTable {
        fn read<Q, R, F: FnOnce(&u64, &u64) -> R>(&self, key: &Q, reader: F) -> Option<R>
        where
            u64: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.map.read(key, reader)
        }

        fn put(&self, key: u64, val: u64) -> Option<u64> {
            self.map.put(key, val)
        }

        fn put_changed(&self, key: u64, val: u64) -> (Option<u64>, bool) {
            ConcurrentTable::put_changed(&self.map, key, val)
        }

        fn remove<Q>(&self, key: &Q) -> Option<u64>
        where
            u64: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.map.remove(key)
        }

        fn remove_if<Q, F: FnOnce(&u64) -> bool>(&self, key: &Q, condition: F) -> Option<u64>
        where
            u64: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.map.remove_if(key, condition)
        }

        fn len(&self) -> usize {
            ConcurrentTable::len(&self.map)
        }

        fn clear(&self) {
            self.map.clear();
        }

        fn for_each<F: FnMut(&u64, &u64)>(&self, f: F) {
            self.traversals.fetch_add(1, Relaxed);
            self.map.for_each(f);
        }
    }

    fn count<L, T>(map: &SnapshotMapBase<u64, u64, L, T>) -> usize
    where
        L: crate::snapshot_map::BuildLock,
        T: ConcurrentTable<u64, u64>,
    {
        let mut count = 0;
        map.for_each(|_, _| count += 1);
        count
    }

    #[test]
    fn letters() {
        let map: SnapshotMap<&str, u32> = SnapshotMap::new();
        assert!(map.put("a", 1).is_none());
        assert!(map.put("b", 2).is_none());

        let mut sum = 0;
        map.for_each(|_, v| sum += *v);
        assert_eq!(sum, 3);

        map.put_all([("c", 3), ("d", 4)]);
        let mut sum = 0;
        map.for_each(|_, v| sum += *v);
        assert_eq!(sum, 10);

        map.clear();
        let mut count = 0;
        map.for_each(|_, _| count += 1);
        assert_eq!(count, 0);
        assert!(map.is_empty());
    }

    #[test]
    fn snapshot_reuse() {
        let map: SnapshotMap<u64, u64, CountingTable> =
            SnapshotMap::with_table(CountingTable::default());
        assert!(map.put(1, 1).is_none());
        assert!(map.put(2, 2).is_none());

        assert_eq!(count(&map), 2);
        assert_eq!(map.table().traversals.load(Relaxed), 1);
        assert_eq!(count(&map), 2);
        assert_eq!(map.table().traversals.load(Relaxed), 1);

        // Storing an equal value keeps both the version and the snapshot.
        let version = map.version();
        assert_eq!(map.put(1, 1), Some(1));
        assert_eq!(map.version(), version);
        assert_eq!(count(&map), 2);
        assert_eq!(map.table().traversals.load(Relaxed), 1);

        assert_eq!(map.put(1, 3), Some(1));
        assert!(map.version() > version);
        let mut sum = 0;
        map.for_each(|_, v| sum += *v);
        assert_eq!(sum, 5);
        assert_eq!(map.table().traversals.load(Relaxed), 2);

        // Failed removals do not touch the snapshot.
        let version = map.version();
        assert!(map.remove(&7).is_none());
        assert!(!map.remove_entry(&1, &1));
        assert_eq!(map.version(), version);
        assert_eq!(count(&map), 2);
        assert_eq!(map.table().traversals.load(Relaxed), 2);

        assert!(map.remove_entry(&1, &3));
        assert!(map.version() > version);
        assert_eq!(count(&map), 1);
        assert_eq!(map.table().traversals.load(Relaxed), 3);
    }

    #[test]
    fn put_all_and_clear() {
        let map: SnapshotMap<u64, u64, CountingTable> =
            SnapshotMap::with_table(CountingTable::default());
        let version = map.version();
        map.put_all((0..32).map(|i| (i, i)));
        assert_eq!(map.version(), version + 1);
        assert_eq!(map.len(), 32);
        assert_eq!(count(&map), 32);

        map.clear();
        assert_eq!(map.version(), version + 2);
        assert_eq!(count(&map), 0);
        assert_eq!(map.table().traversals.load(Relaxed), 2);

        let collected: SnapshotMap<u64, u64> = (0..4).map(|i| (i, i * i)).collect();
        assert_eq!(collected.get(&3), Some(9));
        let mut extended = collected;
        extended.extend([(4, 16)]);
        assert_eq!(extended.len(), 5);
    }

    #[test]
    fn reentrant_callback() {
        let map: SnapshotMap<u64, u64> = SnapshotMap::new();
        map.put_all((0..8).map(|i| (i, i)));

        let mut visited = 0;
        map.for_each(|k, v| {
            assert_eq!(map.get(k), Some(*v));
            assert!(map.put(*k + 100, *v).is_none());
            visited += 1;
        });
        assert_eq!(visited, 8);
        assert_eq!(map.len(), 16);
        assert_eq!(count(&map), 16);
    }

    #[tokio::test]
    async fn reentrant_callback_async() {
        let map: SuspendingSnapshotMap<u64, u64> = SuspendingSnapshotMap::new();
        map.put_all((0..8).map(|i| (i, i)));

        let mut visited = 0;
        map.for_each_async(|k, _| {
            assert!(map.remove(k).is_some());
            assert!(map.put(*k + 100, *k).is_none());
            visited += 1;
        })
        .await;
        assert_eq!(visited, 8);
        assert_eq!(map.len(), 8);

        let mut sum = 0;
        map.for_each_async(|k, _| sum += *k).await;
        assert_eq!(sum, (100..108).sum::<u64>());
    }

    #[test]
    fn stable_iterator() {
        let map: SnapshotMap<u64, u64> = SnapshotMap::new();
        map.put_all((0..4).map(|i| (i, i)));

        let keys = map.keys();
        let mut iter = keys.iter();
        assert_eq!(iter.len(), 4);
        assert!(map.put(4, 4).is_none());
        assert!(map.remove(&0).is_some());
        let mut collected: Vec<u64> = iter.by_ref().collect();
        collected.sort_unstable();
        assert_eq!(collected, vec![0, 1, 2, 3]);
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());

        let mut current: Vec<u64> = map.keys().iter().collect();
        current.sort_unstable();
        assert_eq!(current, vec![1, 2, 3, 4]);
    }

    #[test]
    fn key_iter_remove() {
        let map: SnapshotMap<u64, u64> = SnapshotMap::new();
        map.put_all((0..16).map(|i| (i, i)));

        let keys = map.keys();
        assert_eq!(keys.len(), 16);
        let mut iter: KeyIter<_, _, _, _> = keys.iter();
        assert_eq!(iter.remove(), Err(ViewError::NoCurrentElement));
        while let Some(k) = iter.next() {
            if k % 2 == 0 {
                assert_eq!(iter.remove(), Ok(Some(k)));
                assert_eq!(iter.remove(), Ok(None));
            }
        }
        assert_eq!(map.len(), 8);
        assert!(keys.contains(&1));
        assert!(!keys.contains(&2));
        assert!(keys.remove(&1));
        assert!(!keys.remove(&1));
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn value_iter() {
        let map: SnapshotMap<u64, u64> = SnapshotMap::new();
        map.put_all((0..4).map(|i| (i, i * 10)));

        let values = map.values();
        assert_eq!(values.len(), 4);
        assert!(values.contains(&30));
        assert!(!values.contains(&31));

        let mut iter: ValueIter<_, _, _, _> = values.iter();
        assert_eq!(iter.remove(), Err(ViewError::Unsupported));
        assert!(iter.next().is_some());
        assert_eq!(iter.remove(), Err(ViewError::Unsupported));
        assert_eq!(iter.len(), 3);
        assert_eq!(map.len(), 4);
        assert_eq!(values.iter().sum::<u64>(), 60);
    }

    #[test]
    fn entry_iter() {
        let map: SnapshotMap<u64, u64> = SnapshotMap::new();
        map.put_all((0..8).map(|i| (i, i)));

        let entries = map.entries();
        assert!(entries.contains(&3, &3));
        assert!(!entries.contains(&3, &4));
        assert!(!entries.remove(&3, &4));
        assert!(entries.remove(&3, &3));
        assert_eq!(entries.len(), 7);

        let mut iter: EntryIter<_, _, _, _> = entries.iter();
        assert!(matches!(iter.remove(), Err(ViewError::NoCurrentElement)));
        while let Some(mut entry) = iter.next() {
            let (k, v) = (*entry.key(), *entry.value());
            assert_eq!(k, v);
            if k == 0 {
                assert!(matches!(iter.remove(), Ok(Some(0))));
            } else {
                assert_eq!(entry.set_value(v + 1), v);
                assert_eq!(*entry.value(), v + 1);
            }
        }
        assert_eq!(map.len(), 6);
        map.for_each(|k, v| assert_eq!(*k + 1, *v));

        let pairs: Vec<(u64, u64)> = entries.iter().map(|e| e.into_pair()).collect();
        assert_eq!(pairs.len(), 6);
    }

    #[test]
    fn debug_and_compare() {
        let map: SnapshotMap<u64, u64> = SnapshotMap::new();
        assert!(map.put(1, 2).is_none());
        assert_eq!(format!("{:?}", map.keys()), "{1}");
        assert_eq!(format!("{:?}", map.values()), "[2]");
        assert_eq!(format!("{:?}", map.entries()), "{1: 2}");

        let other: SnapshotMap<u64, u64> = SnapshotMap::new();
        assert!(map != other);
        assert!(other.put(1, 2).is_none());
        assert!(map == other);
        assert!(other.put(2, 2).is_none());
        assert!(map != other);
    }

    #[test]
    fn custom_table() {
        let map: SuspendingSnapshotMap<u64, u64, CountingTable> =
            SuspendingSnapshotMap::with_table(CountingTable::default());
        assert!(map.put(1, 1).is_none());
        futures::executor::block_on(async {
            let mut sum = 0;
            map.for_each_async(|_, v| sum += *v).await;
            assert_eq!(sum, 1);
            map.for_each_async(|_, v| sum += *v).await;
            assert_eq!(sum, 2);
        });
        assert_eq!(count(&map), 1);
        assert_eq!(map.table().traversals.load(Relaxed), 1);
    }
}
