//! Protocol buffer representation of a store.
//!
//! Mirrors the `Store` message of the DDSketch protobuf schema:
//!
//! ```text
//! message Store {
//!   map<sint32, double> binCounts = 1;
//!   repeated double contiguousBinCounts = 2 [packed = true];
//!   sint32 contiguousBinIndexOffset = 3;
//! }
//! ```
//!
//! A store may populate either representation, or both; readers sum them.

use std::collections::BTreeMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Store {
    /// Sparse representation: bin index to count.
    #[prost(btree_map = "sint32, double", tag = "1")]
    pub bin_counts: BTreeMap<i32, f64>,

    /// Contiguous representation: counts for consecutive indices starting at `contiguous_bin_index_offset`.
    #[prost(double, repeated, tag = "2")]
    pub contiguous_bin_counts: Vec<f64>,

    #[prost(sint32, tag = "3")]
    pub contiguous_bin_index_offset: i32,
}

impl Store {
    /// Iterates over every `(index, count)` pair carried by either representation.
    ///
    /// Contiguous entries whose index would not fit in an `i32` are yielded as `Err` with the out-of-range index.
    pub fn entries(&self) -> impl Iterator<Item = Result<(i32, f64), i64>> + '_ {
        let sparse = self.bin_counts.iter().map(|(&index, &count)| Ok((index, count)));
        let offset = i64::from(self.contiguous_bin_index_offset);
        let contiguous = self.contiguous_bin_counts.iter().enumerate().map(move |(i, &count)| {
            let index = offset + i as i64;
            i32::try_from(index).map(|index| (index, count)).map_err(|_| index)
        });
        sparse.chain(contiguous)
    }
}
