//! Bin stores.
//!
//! A store counts how many values fall into each bin of a sketch, keyed by the integer index that the sketch's
//! mapping assigned to the value. All stores implement [`Store`] and can be merged into one another, serialized to the
//! binary wire format, and converted to and from the protobuf representation.

use std::{any::Any, fmt, ops::ControlFlow};

use snafu::ensure;
use tracing::warn;

use crate::{
    encoding::{
        decode_uvarint64, decode_varfloat64, decode_varint64, encode_flag, encode_uvarint64, encode_varfloat64,
        encode_varint64, Flag, FlagType, SubFlag,
    },
    error::{
        DecodeError, IndexOutOfRangeSnafu, InvalidReweightFactorSnafu, NegativeBinCountSnafu, StoreError,
        UnknownBinEncodingSnafu,
    },
    proto,
};

mod collapsing_lowest;
mod dense;
mod sparse;

pub use self::collapsing_lowest::CollapsingLowestDenseStore;
pub use self::dense::DenseStore;
pub use self::sparse::SparseStore;

/// A bin index and the number of values counted in it.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "BinState"))]
pub struct Bin {
    pub(crate) index: i32,
    pub(crate) count: f64,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct BinState {
    index: i32,
    count: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<BinState> for Bin {
    type Error = StoreError;

    fn try_from(state: BinState) -> Result<Self, Self::Error> {
        Bin::new(state.index, state.count)
    }
}

impl Bin {
    /// Creates a new bin.
    ///
    /// # Errors
    ///
    /// If `count` is negative, an error is returned.
    pub fn new(index: i32, count: f64) -> Result<Self, StoreError> {
        if count < 0.0 {
            return NegativeBinCountSnafu { count }.fail();
        }
        Ok(Self { index, count })
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn count(&self) -> f64 {
        self.count
    }
}

/// Iterator over the non-empty bins of a store, in ascending index order.
pub type Bins<'a> = Box<dyn Iterator<Item = Bin> + 'a>;

/// Counts of values per bin index.
pub trait Store: fmt::Debug + Send + Sync + 'static {
    /// Counts one value at `index`.
    fn add(&mut self, index: i32) {
        self.add_with_count(index, 1.0);
    }

    /// Counts the values held by `bin`.
    fn add_bin(&mut self, bin: Bin) {
        self.add_with_count(bin.index, bin.count);
    }

    /// Counts `count` values at `index`. Adding a count of zero does nothing.
    fn add_with_count(&mut self, index: i32, count: f64);

    /// Returns the non-empty bins in ascending index order.
    fn bins(&self) -> Bins<'_>;

    /// Visits every bin, in no particular order, until `f` breaks.
    fn for_each(&self, f: &mut dyn FnMut(i32, f64) -> ControlFlow<()>);

    /// Returns a deep copy of this store.
    fn copy(&self) -> Box<dyn Store>;

    /// Removes every bin.
    fn clear(&mut self);

    fn is_empty(&self) -> bool;

    /// Returns the highest index holding a non-zero count.
    ///
    /// # Errors
    ///
    /// If the store is empty, an error is returned.
    fn max_index(&self) -> Result<i32, StoreError>;

    /// Returns the lowest index holding a non-zero count.
    ///
    /// # Errors
    ///
    /// If the store is empty, an error is returned.
    fn min_index(&self) -> Result<i32, StoreError>;

    fn total_count(&self) -> f64;

    /// Returns the index of the first bin, in ascending order, at which the cumulative count exceeds `rank`.
    ///
    /// If `rank` is at least the total count, the highest non-empty index is returned. An empty store returns zero, so
    /// callers should check [`is_empty`][Store::is_empty] first.
    fn key_at_rank(&self, rank: f64) -> i32;

    /// Adds every bin of `other` into this store.
    fn merge_with(&mut self, other: &dyn Store);

    fn to_proto(&self) -> proto::Store;

    /// Replaces the contents of this store with the bins carried by `pb`.
    ///
    /// Both the sparse and contiguous representations are replayed through
    /// [`add_with_count`][Store::add_with_count], so any capacity rules of this store apply.
    fn from_proto(&mut self, pb: &proto::Store) {
        self.clear();
        for entry in pb.entries() {
            match entry {
                Ok((index, count)) => self.add_with_count(index, count),
                Err(index) => warn!(index, "Skipping protobuf bin with out-of-range index."),
            }
        }
    }

    /// Multiplies every count by `factor`.
    ///
    /// # Errors
    ///
    /// If `factor` is not strictly positive, an error is returned and the store is left untouched.
    fn reweight(&mut self, factor: f64) -> Result<(), StoreError>;

    /// Appends the binary encoding of this store to `buf`, tagged with `flag_type`. Empty stores write nothing.
    fn encode(&self, buf: &mut Vec<u8>, flag_type: FlagType);

    /// Decodes one store encoded with `sub_flag` from `buf` and merges its bins into this store.
    ///
    /// # Errors
    ///
    /// If the input is truncated or uses an unknown encoding, an error is returned. Bins decoded before the error
    /// remain merged.
    fn decode_and_merge_with(&mut self, buf: &mut &[u8], sub_flag: SubFlag) -> Result<(), StoreError> {
        decode_and_merge_with(self, buf, sub_flag)
    }

    /// Returns this store as [`Any`], for same-kind merge fast paths.
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Store> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Writes `bins` using the index-deltas-and-counts encoding.
///
/// `num_bins` must equal the number of items yielded by `bins`, which must be non-empty and in ascending index order.
pub(crate) fn encode_bins<I>(buf: &mut Vec<u8>, flag_type: FlagType, num_bins: usize, bins: I)
where
    I: IntoIterator<Item = Bin>,
{
    encode_flag(buf, Flag::new(flag_type, SubFlag::BIN_ENCODING_INDEX_DELTAS_AND_COUNTS));
    encode_uvarint64(buf, num_bins as u64);
    let mut previous_index = 0i64;
    for bin in bins {
        let index = i64::from(bin.index);
        encode_varint64(buf, index - previous_index);
        encode_varfloat64(buf, bin.count);
        previous_index = index;
    }
}

fn checked_index(index: i64) -> Result<i32, DecodeError> {
    i32::try_from(index).map_err(|_| IndexOutOfRangeSnafu { index }.build())
}

/// Decodes one store encoded with `sub_flag` from `buf`, merging each bin into `store` as it is read.
///
/// No intermediate store is built, so the receiving store applies its own capacity rules to every decoded bin.
pub fn decode_and_merge_with<S>(store: &mut S, buf: &mut &[u8], sub_flag: SubFlag) -> Result<(), StoreError>
where
    S: Store + ?Sized,
{
    match sub_flag {
        SubFlag::BIN_ENCODING_INDEX_DELTAS_AND_COUNTS => {
            let num_bins = decode_uvarint64(buf)?;
            let mut index = 0i64;
            for _ in 0..num_bins {
                index = index.wrapping_add(decode_varint64(buf)?);
                let count = decode_varfloat64(buf)?;
                store.add_with_count(checked_index(index)?, count);
            }
        }
        SubFlag::BIN_ENCODING_INDEX_DELTAS => {
            let num_bins = decode_uvarint64(buf)?;
            let mut index = 0i64;
            for _ in 0..num_bins {
                index = index.wrapping_add(decode_varint64(buf)?);
                store.add(checked_index(index)?);
            }
        }
        SubFlag::BIN_ENCODING_CONTIGUOUS_COUNTS => {
            let num_bins = decode_uvarint64(buf)?;
            let mut index = decode_varint64(buf)?;
            let index_delta = decode_varint64(buf)?;
            for _ in 0..num_bins {
                let count = decode_varfloat64(buf)?;
                store.add_with_count(checked_index(index)?, count);
                index = index.wrapping_add(index_delta);
            }
        }
        other => return Err(UnknownBinEncodingSnafu { sub_flag: other.value() }.build().into()),
    }
    Ok(())
}

/// Returns the index at which the cumulative count of `bins` first exceeds `rank`.
pub(crate) fn key_at_rank<I>(bins: I, rank: f64) -> i32
where
    I: IntoIterator<Item = Bin>,
{
    let mut cumulative = 0.0;
    let mut last = None;
    for bin in bins {
        cumulative += bin.count;
        if cumulative > rank {
            return bin.index;
        }
        last = Some(bin.index);
    }
    last.unwrap_or(0)
}

pub(crate) fn check_reweight_factor(factor: f64) -> Result<(), StoreError> {
    // NaN fails the comparison as well.
    ensure!(factor > 0.0, InvalidReweightFactorSnafu { factor });
    Ok(())
}
