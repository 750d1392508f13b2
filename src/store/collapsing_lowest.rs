use std::{any::Any, ops::ControlFlow};

#[cfg(feature = "serde")]
use snafu::ensure;
use tracing::{debug, trace};

#[cfg(feature = "serde")]
use crate::error::InvalidStoreStateSnafu;
use crate::{
    encoding::FlagType,
    error::StoreError,
    proto,
    store::{
        dense::{span, DenseStore, GROWTH_BUFFER},
        key_at_rank, Bins, Store,
    },
};

/// A dense store holding at most `max_num_bins` bins.
///
/// Bins are allocated lazily and grow as needed up to the limit. Once the limit is reached, growing towards higher
/// indices collapses the lowest bins: their counts are summed into the lowest bin that remains, and any value added
/// below the retained range is counted in that lowest bin as well. This trades accuracy on the lowest values for a
/// hard memory bound; the total count is always preserved.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "CollapsingLowestDenseStoreState"))]
pub struct CollapsingLowestDenseStore {
    store: DenseStore,
    max_num_bins: i64,
}

/// Largest meaningful bin limit: one bin for every `i32` index.
const MAX_NUM_BINS_LIMIT: i64 = 1 << 32;

impl CollapsingLowestDenseStore {
    /// Creates an empty store holding at most `max_num_bins` bins.
    ///
    /// A limit of zero is treated as one. Limits above the number of distinct `i32` indices behave as that number,
    /// so `usize::MAX` gives a store that never collapses.
    pub fn new(max_num_bins: usize) -> Self {
        let max_num_bins = i64::try_from(max_num_bins)
            .unwrap_or(MAX_NUM_BINS_LIMIT)
            .clamp(1, MAX_NUM_BINS_LIMIT);
        Self {
            store: DenseStore::new(),
            max_num_bins,
        }
    }

    /// Returns the maximum number of bins this store will hold.
    pub fn max_num_bins(&self) -> usize {
        usize::try_from(self.max_num_bins).unwrap_or(usize::MAX)
    }

    fn grow_left(&mut self, index: i64) {
        let store = &mut self.store;
        if index >= store.min_index || store.bins.len() as i64 >= self.max_num_bins {
            return;
        }

        let lowest_allowed = store.max_index - self.max_num_bins + 1;
        let min_index = if store.max_index >= index + self.max_num_bins {
            lowest_allowed
        } else {
            // Over-allocate by up to GROWTH_BUFFER bins.
            (index - GROWTH_BUFFER).max(lowest_allowed)
        };

        let mut bins = vec![0.0; span(min_index, store.max_index)];
        let shift = (store.min_index - min_index) as usize;
        bins[shift..].copy_from_slice(&store.bins);
        store.bins = bins;
        store.min_index = min_index;
    }

    fn grow_right(&mut self, index: i64) {
        let max_num_bins = self.max_num_bins;
        let store = &mut self.store;
        if index <= store.max_index {
            return;
        }

        if index >= store.max_index + max_num_bins {
            // The whole current window falls below the new one.
            trace!(index, max_num_bins, "Collapsing every bin into the lowest bin.");
            store.seed_window(index, max_num_bins);
            store.bins[0] = store.count;
        } else if index >= store.min_index + max_num_bins {
            let min_index = index - max_num_bins + 1;
            let shift = (min_index - store.min_index) as usize;
            let collapsed: f64 = store.bins[..shift].iter().sum();
            trace!(index, min_index, collapsed, "Collapsing lowest bins.");

            if (store.bins.len() as i64) < max_num_bins {
                let mut bins = vec![0.0; max_num_bins as usize];
                let retained = store.bins.len() - shift;
                bins[..retained].copy_from_slice(&store.bins[shift..]);
                store.bins = bins;
            } else {
                let len = store.bins.len();
                store.bins.copy_within(shift.., 0);
                store.bins[len - shift..].fill(0.0);
            }
            store.max_index = index;
            store.min_index = min_index;
            store.bins[0] += collapsed;
        } else {
            store.bins.resize(span(store.min_index, index), 0.0);
            store.max_index = index;
        }
    }

    fn merge_same_kind(&mut self, other: &CollapsingLowestDenseStore) {
        if self.store.count == 0.0 {
            self.clone_from(other);
            return;
        }

        self.grow_right(other.store.max_index);
        self.grow_left(other.store.min_index);

        let store = &mut self.store;
        let overlap_start = store.min_index.max(other.store.min_index);
        let overlap_end = store.max_index.min(other.store.max_index);
        for index in overlap_start..=overlap_end {
            let slot = store.slot(index);
            store.bins[slot] += other.store.bins[other.store.slot(index)];
        }

        // Whatever part of the other window is still below ours lands in our lowest bin.
        let below_end = (store.min_index - 1).min(other.store.max_index);
        let collapsed: f64 = (other.store.min_index..=below_end)
            .map(|index| other.store.bins[other.store.slot(index)])
            .sum();
        store.bins[0] += collapsed;
        store.count += other.store.count;
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct CollapsingLowestDenseStoreState {
    store: DenseStore,
    max_num_bins: i64,
}

#[cfg(feature = "serde")]
impl TryFrom<CollapsingLowestDenseStoreState> for CollapsingLowestDenseStore {
    type Error = StoreError;

    fn try_from(state: CollapsingLowestDenseStoreState) -> Result<Self, Self::Error> {
        let CollapsingLowestDenseStoreState { store, max_num_bins } = state;
        ensure!(
            (1..=MAX_NUM_BINS_LIMIT).contains(&max_num_bins),
            InvalidStoreStateSnafu {
                reason: "bin limit is out of range"
            }
        );
        ensure!(
            store.bins.len() as i64 <= max_num_bins,
            InvalidStoreStateSnafu {
                reason: "window is wider than the bin limit"
            }
        );
        Ok(Self { store, max_num_bins })
    }
}

impl Store for CollapsingLowestDenseStore {
    fn add_with_count(&mut self, index: i32, count: f64) {
        if count == 0.0 {
            return;
        }
        let index = i64::from(index);
        if self.store.count == 0.0 {
            let len = GROWTH_BUFFER.min(self.max_num_bins);
            self.store.seed_window(index, len);
        }
        if index < self.store.min_index {
            self.grow_left(index);
        } else if index > self.store.max_index {
            self.grow_right(index);
        }

        let store = &mut self.store;
        let slot = if index < store.min_index { 0 } else { store.slot(index) };
        store.bins[slot] += count;
        store.count += count;
    }

    fn bins(&self) -> Bins<'_> {
        Box::new(self.store.non_empty_bins())
    }

    fn for_each(&self, f: &mut dyn FnMut(i32, f64) -> ControlFlow<()>) {
        self.store.visit(f);
    }

    fn copy(&self) -> Box<dyn Store> {
        Box::new(self.clone())
    }

    fn clear(&mut self) {
        self.store.reset();
    }

    fn is_empty(&self) -> bool {
        self.store.count == 0.0
    }

    fn max_index(&self) -> Result<i32, StoreError> {
        self.store.highest_index()
    }

    fn min_index(&self) -> Result<i32, StoreError> {
        self.store.lowest_index()
    }

    fn total_count(&self) -> f64 {
        self.store.count
    }

    fn key_at_rank(&self, rank: f64) -> i32 {
        key_at_rank(self.store.non_empty_bins(), rank)
    }

    fn merge_with(&mut self, other: &dyn Store) {
        if other.total_count() == 0.0 {
            return;
        }
        match other.as_any().downcast_ref::<CollapsingLowestDenseStore>() {
            Some(other) => self.merge_same_kind(other),
            None => {
                debug!("Merging store of a different kind into collapsing store bin by bin.");
                for bin in other.bins() {
                    self.add_bin(bin);
                }
            }
        }
    }

    fn to_proto(&self) -> proto::Store {
        self.store.contiguous_proto()
    }

    fn reweight(&mut self, factor: f64) -> Result<(), StoreError> {
        self.store.scale(factor)
    }

    fn encode(&self, buf: &mut Vec<u8>, flag_type: FlagType) {
        self.store.encode_window(buf, flag_type);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
