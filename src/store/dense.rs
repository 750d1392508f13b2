use std::{any::Any, ops::ControlFlow};

#[cfg(feature = "serde")]
use snafu::ensure;
use tracing::debug;

#[cfg(feature = "serde")]
use crate::error::InvalidStoreStateSnafu;
use crate::{
    encoding::FlagType,
    error::{StoreError, UndefinedMaxIndexSnafu, UndefinedMinIndexSnafu},
    proto,
    store::{check_reweight_factor, encode_bins, key_at_rank, Bin, Bins, Store},
};

/// Number of extra bins allocated past the requested index when a dense store grows.
pub(crate) const GROWTH_BUFFER: i64 = 128;

/// Number of slots needed to cover `[min_index, max_index]`.
pub(crate) fn span(min_index: i64, max_index: i64) -> usize {
    debug_assert!(max_index >= min_index - 1, "inverted window [{}, {}]", min_index, max_index);
    (max_index - min_index + 1) as usize
}

/// A store backed by a contiguous array covering every index between its lowest and highest bin.
///
/// The array grows in either direction as needed, over-allocating by a fixed buffer to amortize reallocations, and
/// never collapses. Memory is proportional to the index range rather than to the number of distinct indices.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "DenseStoreState"))]
pub struct DenseStore {
    /// `bins[i]` holds the count for index `min_index + i`.
    pub(crate) bins: Vec<f64>,
    pub(crate) count: f64,
    // Window edges, not necessarily non-empty bins. Always `max_index - min_index + 1 == bins.len()` once allocated.
    pub(crate) min_index: i64,
    pub(crate) max_index: i64,
}

impl DenseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh window of `len` slots whose highest index is `index`.
    pub(crate) fn seed_window(&mut self, index: i64, len: i64) {
        self.bins = vec![0.0; len as usize];
        self.max_index = index;
        self.min_index = index - len + 1;
    }

    pub(crate) fn slot(&self, index: i64) -> usize {
        (index - self.min_index) as usize
    }

    pub(crate) fn non_empty_bins(&self) -> impl DoubleEndedIterator<Item = Bin> + '_ {
        let min_index = self.min_index;
        self.bins
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count != 0.0)
            .map(move |(i, &count)| Bin {
                index: (min_index + i as i64) as i32,
                count,
            })
    }

    pub(crate) fn reset(&mut self) {
        self.bins = Vec::new();
        self.count = 0.0;
        self.min_index = 0;
        self.max_index = 0;
    }

    pub(crate) fn lowest_index(&self) -> Result<i32, StoreError> {
        if self.count == 0.0 {
            return UndefinedMinIndexSnafu.fail();
        }
        self.non_empty_bins()
            .next()
            .map(|bin| bin.index)
            .ok_or_else(|| UndefinedMinIndexSnafu.build())
    }

    pub(crate) fn highest_index(&self) -> Result<i32, StoreError> {
        if self.count == 0.0 {
            return UndefinedMaxIndexSnafu.fail();
        }
        self.non_empty_bins()
            .next_back()
            .map(|bin| bin.index)
            .ok_or_else(|| UndefinedMaxIndexSnafu.build())
    }

    pub(crate) fn visit(&self, f: &mut dyn FnMut(i32, f64) -> ControlFlow<()>) {
        for bin in self.non_empty_bins() {
            if f(bin.index, bin.count).is_break() {
                return;
            }
        }
    }

    pub(crate) fn scale(&mut self, factor: f64) -> Result<(), StoreError> {
        check_reweight_factor(factor)?;
        if factor == 1.0 {
            return Ok(());
        }
        for count in &mut self.bins {
            *count *= factor;
        }
        self.count *= factor;
        Ok(())
    }

    /// Contiguous protobuf representation, trimmed to the non-empty range.
    pub(crate) fn contiguous_proto(&self) -> proto::Store {
        let (Ok(min_index), Ok(max_index)) = (self.lowest_index(), self.highest_index()) else {
            return proto::Store::default();
        };
        let first = self.slot(i64::from(min_index));
        let last = self.slot(i64::from(max_index));
        proto::Store {
            contiguous_bin_counts: self.bins[first..=last].to_vec(),
            contiguous_bin_index_offset: min_index,
            ..Default::default()
        }
    }

    pub(crate) fn encode_window(&self, buf: &mut Vec<u8>, flag_type: FlagType) {
        let num_bins = self.non_empty_bins().count();
        if num_bins == 0 {
            return;
        }
        encode_bins(buf, flag_type, num_bins, self.non_empty_bins());
    }

    fn grow_left(&mut self, index: i64) {
        if index >= self.min_index {
            return;
        }
        let min_index = index - GROWTH_BUFFER;
        let mut bins = vec![0.0; span(min_index, self.max_index)];
        let shift = (self.min_index - min_index) as usize;
        bins[shift..].copy_from_slice(&self.bins);
        self.bins = bins;
        self.min_index = min_index;
    }

    fn grow_right(&mut self, index: i64) {
        if index <= self.max_index {
            return;
        }
        let max_index = index + GROWTH_BUFFER;
        self.bins.resize(span(self.min_index, max_index), 0.0);
        self.max_index = max_index;
    }
}

/// Deserialized fields of a [`DenseStore`], checked before they become a store.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct DenseStoreState {
    bins: Vec<f64>,
    count: f64,
    min_index: i64,
    max_index: i64,
}

#[cfg(feature = "serde")]
impl TryFrom<DenseStoreState> for DenseStore {
    type Error = StoreError;

    fn try_from(state: DenseStoreState) -> Result<Self, Self::Error> {
        let DenseStoreState {
            bins,
            count,
            min_index,
            max_index,
        } = state;

        ensure!(
            count.is_finite() && count >= 0.0,
            InvalidStoreStateSnafu {
                reason: "total count must be finite and non-negative"
            }
        );
        if bins.is_empty() {
            ensure!(
                count == 0.0,
                InvalidStoreStateSnafu {
                    reason: "store without bins has a non-zero count"
                }
            );
            return Ok(Self::default());
        }

        let lowest_edge = i64::from(i32::MIN) - GROWTH_BUFFER;
        let highest_edge = i64::from(i32::MAX) + GROWTH_BUFFER;
        ensure!(
            lowest_edge <= min_index && min_index <= max_index && max_index <= highest_edge,
            InvalidStoreStateSnafu {
                reason: "window edges are out of range"
            }
        );
        ensure!(
            span(min_index, max_index) == bins.len(),
            InvalidStoreStateSnafu {
                reason: "window length does not match the number of bins"
            }
        );
        for (i, &bin) in bins.iter().enumerate() {
            ensure!(
                bin.is_finite() && bin >= 0.0,
                InvalidStoreStateSnafu {
                    reason: "bin counts must be finite and non-negative"
                }
            );
            ensure!(
                bin == 0.0 || i32::try_from(min_index + i as i64).is_ok(),
                InvalidStoreStateSnafu {
                    reason: "non-empty bin outside the index range"
                }
            );
        }

        Ok(Self {
            bins,
            count,
            min_index,
            max_index,
        })
    }
}

impl Store for DenseStore {
    fn add_with_count(&mut self, index: i32, count: f64) {
        if count == 0.0 {
            return;
        }
        let index = i64::from(index);
        if self.count == 0.0 {
            self.seed_window(index, GROWTH_BUFFER);
        }
        if index < self.min_index {
            self.grow_left(index);
        } else if index > self.max_index {
            self.grow_right(index);
        }
        let slot = self.slot(index);
        self.bins[slot] += count;
        self.count += count;
    }

    fn bins(&self) -> Bins<'_> {
        Box::new(self.non_empty_bins())
    }

    fn for_each(&self, f: &mut dyn FnMut(i32, f64) -> ControlFlow<()>) {
        self.visit(f);
    }

    fn copy(&self) -> Box<dyn Store> {
        Box::new(self.clone())
    }

    fn clear(&mut self) {
        self.reset();
    }

    fn is_empty(&self) -> bool {
        self.count == 0.0
    }

    fn max_index(&self) -> Result<i32, StoreError> {
        self.highest_index()
    }

    fn min_index(&self) -> Result<i32, StoreError> {
        self.lowest_index()
    }

    fn total_count(&self) -> f64 {
        self.count
    }

    fn key_at_rank(&self, rank: f64) -> i32 {
        key_at_rank(self.non_empty_bins(), rank)
    }

    fn merge_with(&mut self, other: &dyn Store) {
        if other.total_count() == 0.0 {
            return;
        }

        let Some(other) = other.as_any().downcast_ref::<DenseStore>() else {
            debug!("Merging store of a different kind into dense store bin by bin.");
            other.for_each(&mut |index, count| {
                self.add_with_count(index, count);
                ControlFlow::Continue(())
            });
            return;
        };

        if self.count == 0.0 {
            self.clone_from(other);
            return;
        }

        self.grow_left(other.min_index);
        self.grow_right(other.max_index);
        for (i, &count) in other.bins.iter().enumerate() {
            let slot = self.slot(other.min_index + i as i64);
            self.bins[slot] += count;
        }
        self.count += other.count;
    }

    fn to_proto(&self) -> proto::Store {
        self.contiguous_proto()
    }

    fn reweight(&mut self, factor: f64) -> Result<(), StoreError> {
        self.scale(factor)
    }

    fn encode(&self, buf: &mut Vec<u8>, flag_type: FlagType) {
        self.encode_window(buf, flag_type);
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

    fn assert_window_invariants(store: &DenseStore) {
        if store.bins.is_empty() {
            return;
        }
        assert_eq!(span(store.min_index, store.max_index), store.bins.len());
        assert_eq!(store.bins.iter().sum::<f64>(), store.count);
    }

    #[test]
    fn test_span() {
        assert_eq!(span(-3, 4), 8);
        assert_eq!(span(7, 7), 1);
        assert_eq!(span(7, 6), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "inverted window")]
    fn test_span_rejects_inverted_window() {
        span(10, 2);
    }

    #[test]
    fn test_empty_store() {
        let store = DenseStore::new();
        assert!(store.is_empty());
        assert_eq!(store.total_count(), 0.0);
        assert_eq!(store.min_index(), Err(StoreError::UndefinedMinIndex));
        assert_eq!(store.max_index(), Err(StoreError::UndefinedMaxIndex));
        assert_eq!(store.key_at_rank(3.0), 0);
        assert_eq!(store.to_proto(), proto::Store::default());
    }

    #[test]
    fn test_simple_store() {
        let mut store = DenseStore::new();
        for i in 0..100 {
            store.add(i);
        }

        assert_window_invariants(&store);
        assert_eq!(store.total_count(), 100.0);
        assert_eq!(store.min_index(), Ok(0));
        assert_eq!(store.max_index(), Ok(99));
        assert_eq!(store.key_at_rank(0.0), 0);
        assert_eq!(store.key_at_rank(99.0), 99);
    }

    #[test]
    fn test_grows_in_both_directions() {
        let mut store = DenseStore::new();
        store.add(0);
        store.add(-1000);
        assert_window_invariants(&store);
        store.add(5000);
        assert_window_invariants(&store);
        store.add_with_count(-1000, 2.0);

        assert_eq!(bins_of(&store), vec![(-1000, 3.0), (0, 1.0), (5000, 1.0)]);
        assert_eq!(store.min_index, -1000 - GROWTH_BUFFER);
        assert_eq!(store.max_index, 5000 + GROWTH_BUFFER);
    }

    #[test]
    fn test_key_at_rank() {
        let mut store = DenseStore::new();
        store.add_with_count(5, 2.0);
        store.add_with_count(1, 3.0);

        assert_eq!(store.key_at_rank(0.0), 1);
        assert_eq!(store.key_at_rank(2.9), 1);
        assert_eq!(store.key_at_rank(3.0), 5);
        assert_eq!(store.key_at_rank(10.0), 5);
    }

    #[test]
    fn test_reweight() {
        let mut store = DenseStore::new();
        store.add_with_count(1, 3.0);
        store.add_with_count(5, 2.0);

        store.reweight(2.0).unwrap();
        assert_eq!(bins_of(&store), vec![(1, 6.0), (5, 4.0)]);
        assert_eq!(store.total_count(), 10.0);

        let before = store.clone();
        assert!(store.reweight(0.0).is_err());
        assert_eq!(store, before);
    }

    #[test]
    fn test_merge_stores() {
        let mut s1 = DenseStore::new();
        let mut s2 = DenseStore::new();
        for i in 0..50 {
            s1.add(i);
        }
        for i in 300..350 {
            s2.add(i);
        }

        s1.merge_with(&s2);
        assert_window_invariants(&s1);
        assert_eq!(s1.total_count(), 100.0);
        assert_eq!(s2.total_count(), 50.0);
        assert_eq!(s1.key_at_rank(0.0), 0);
        assert_eq!(s1.key_at_rank(99.0), 349);
    }

    #[test]
    fn test_merge_into_empty_copies() {
        let mut other = DenseStore::new();
        other.add_with_count(-20, 4.0);

        let mut store = DenseStore::new();
        store.merge_with(&other);
        assert_eq!(store, other);
    }

    #[test]
    fn test_merge_other_kind() {
        let mut sparse = crate::store::SparseStore::new();
        sparse.add_with_count(-3, 1.5);
        sparse.add_with_count(400, 2.0);

        let mut store = DenseStore::new();
        store.add(0);
        store.merge_with(&sparse);
        assert_window_invariants(&store);
        assert_eq!(bins_of(&store), vec![(-3, 1.5), (0, 1.0), (400, 2.0)]);
    }

    #[test]
    fn test_proto_is_trimmed() {
        let mut store = DenseStore::new();
        store.add(10);
        store.add_with_count(13, 2.0);

        let pb = store.to_proto();
        assert!(pb.bin_counts.is_empty());
        assert_eq!(pb.contiguous_bin_index_offset, 10);
        assert_eq!(pb.contiguous_bin_counts, vec![1.0, 0.0, 0.0, 2.0]);

        let mut restored = DenseStore::new();
        restored.from_proto(&pb);
        assert_eq!(bins_of(&restored), bins_of(&store));
    }

    #[test]
    fn test_clear() {
        let mut store = DenseStore::new();
        store.add(3);
        store.clear();
        assert!(store.is_empty());
        assert!(store.bins.is_empty());

        store.add(-8);
        assert_eq!(bins_of(&store), vec![(-8, 1.0)]);
    }
}
