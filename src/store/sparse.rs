use std::{any::Any, ops::ControlFlow};

use crate::{
    encoding::FlagType,
    error::{StoreError, UndefinedMaxIndexSnafu, UndefinedMinIndexSnafu},
    proto,
    store::{check_reweight_factor, encode_bins, key_at_rank, Bin, Bins, Store},
};

type FastHashMap<K, V> = hashbrown::HashMap<K, V, foldhash::quality::RandomState>;

/// A store backed by a hash map, holding only the bins that were touched.
///
/// The number of distinct indices is unbounded and bins are never collapsed. Ordering is produced on demand by
/// sorting a snapshot of the map, so ordered operations cost `O(n log n)` and extremum lookups cost `O(n)`.
///
/// Adding a count of zero never creates a bin, but a bin whose count reaches zero through a merge is kept. Such bins
/// are still visited by [`for_each`][Store::for_each] and count towards the extremum indices, but are skipped when
/// iterating or encoding bins.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SparseStore {
    counts: FastHashMap<i32, f64>,
}

impl SparseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered_bins(&self) -> Vec<Bin> {
        let mut bins = self
            .counts
            .iter()
            .filter(|&(_, &count)| count != 0.0)
            .map(|(&index, &count)| Bin { index, count })
            .collect::<Vec<_>>();
        bins.sort_unstable_by_key(|bin| bin.index);
        bins
    }
}

impl Store for SparseStore {
    fn add_with_count(&mut self, index: i32, count: f64) {
        if count == 0.0 {
            return;
        }
        *self.counts.entry(index).or_insert(0.0) += count;
    }

    fn bins(&self) -> Bins<'_> {
        Box::new(self.ordered_bins().into_iter())
    }

    fn for_each(&self, f: &mut dyn FnMut(i32, f64) -> ControlFlow<()>) {
        for (&index, &count) in &self.counts {
            if f(index, count).is_break() {
                return;
            }
        }
    }

    fn copy(&self) -> Box<dyn Store> {
        Box::new(self.clone())
    }

    fn clear(&mut self) {
        self.counts.clear();
    }

    fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn max_index(&self) -> Result<i32, StoreError> {
        self.counts.keys().copied().max().ok_or_else(|| UndefinedMaxIndexSnafu.build())
    }

    fn min_index(&self) -> Result<i32, StoreError> {
        self.counts.keys().copied().min().ok_or_else(|| UndefinedMinIndexSnafu.build())
    }

    fn total_count(&self) -> f64 {
        self.counts.values().sum()
    }

    fn key_at_rank(&self, rank: f64) -> i32 {
        key_at_rank(self.ordered_bins(), rank)
    }

    fn merge_with(&mut self, other: &dyn Store) {
        other.for_each(&mut |index, count| {
            self.add_with_count(index, count);
            ControlFlow::Continue(())
        });
    }

    fn to_proto(&self) -> proto::Store {
        proto::Store {
            bin_counts: self.counts.iter().map(|(&index, &count)| (index, count)).collect(),
            ..Default::default()
        }
    }

    fn reweight(&mut self, factor: f64) -> Result<(), StoreError> {
        check_reweight_factor(factor)?;
        if factor == 1.0 {
            return Ok(());
        }
        for count in self.counts.values_mut() {
            *count *= factor;
        }
        Ok(())
    }

    fn encode(&self, buf: &mut Vec<u8>, flag_type: FlagType) {
        let bins = self.ordered_bins();
        if bins.is_empty() {
            return;
        }
        encode_bins(buf, flag_type, bins.len(), bins);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bins_of(store: &dyn Store) -> Vec<(i32, f64)> {
        store.bins().map(|bin| (bin.index(), bin.count())).collect()
    }

    fn sample_store() -> SparseStore {
        let mut store = SparseStore::new();
        store.add_with_count(5, 2.0);
        store.add_with_count(1, 3.0);
        store
    }

    #[test]
    fn test_empty_store() {
        let store = SparseStore::new();
        assert!(store.is_empty());
        assert_eq!(store.total_count(), 0.0);
        assert_eq!(store.min_index(), Err(StoreError::UndefinedMinIndex));
        assert_eq!(store.max_index(), Err(StoreError::UndefinedMaxIndex));
        assert_eq!(store.key_at_rank(0.0), 0);
        assert_eq!(store.bins().count(), 0);

        let mut buf = Vec::new();
        store.encode(&mut buf, FlagType::PositiveStore);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_add_and_order() {
        let mut store = SparseStore::new();
        for index in [7, -3, 7, 0, 1000, -3, 7] {
            store.add(index);
        }
        store.add_with_count(12, 0.0);

        assert_eq!(bins_of(&store), vec![(-3, 2.0), (0, 1.0), (7, 3.0), (1000, 1.0)]);
        assert_eq!(store.total_count(), 7.0);
        assert_eq!(store.min_index(), Ok(-3));
        assert_eq!(store.max_index(), Ok(1000));
    }

    #[test]
    fn test_key_at_rank() {
        let store = sample_store();
        assert_eq!(store.key_at_rank(0.0), 1);
        assert_eq!(store.key_at_rank(2.9), 1);
        assert_eq!(store.key_at_rank(3.0), 5);
        assert_eq!(store.key_at_rank(10.0), 5);
    }

    #[test]
    fn test_reweight() {
        let mut store = sample_store();
        store.reweight(2.0).unwrap();
        assert_eq!(bins_of(&store), vec![(1, 6.0), (5, 4.0)]);

        assert_eq!(store.reweight(0.0), Err(StoreError::InvalidReweightFactor { factor: 0.0 }));
        assert!(store.reweight(-1.0).is_err());
        assert_eq!(bins_of(&store), vec![(1, 6.0), (5, 4.0)]);
    }

    #[test]
    fn test_for_each_stops_early() {
        let store = sample_store();
        let mut visited = 0;
        store.for_each(&mut |_, _| {
            visited += 1;
            ControlFlow::Break(())
        });
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_merge_keeps_zeroed_bins() {
        let mut store = sample_store();
        let mut other = SparseStore::new();
        other.add_with_count(1, -3.0);
        other.add(9);

        store.merge_with(&other);
        assert_eq!(bins_of(&store), vec![(5, 2.0), (9, 1.0)]);
        assert_eq!(store.total_count(), 3.0);
        assert_eq!(store.to_proto().bin_counts.get(&1), Some(&0.0));
        assert_eq!(store.min_index(), Ok(1));
    }

    #[test]
    fn test_copy_is_independent() {
        let store = sample_store();
        let mut copy = store.copy();
        copy.add(1);
        assert_eq!(store.total_count(), 5.0);
        assert_eq!(copy.total_count(), 6.0);

        let mut cleared = sample_store();
        cleared.clear();
        assert!(cleared.is_empty());
    }

    #[test]
    fn test_proto_roundtrip() {
        let store = sample_store();
        let pb = store.to_proto();
        assert_eq!(pb.bin_counts.len(), 2);
        assert!(pb.contiguous_bin_counts.is_empty());

        let mut restored = SparseStore::new();
        restored.add(42);
        restored.from_proto(&pb);
        assert_eq!(restored, store);
    }
}
