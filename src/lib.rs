//! Bin stores and binary codec for DDSketch quantile sketches.
//!
//! A sketch maps every value to an integer bin index; the stores in this crate count how many values landed in each
//! bin. Three kinds share the [`Store`] trait:
//!
//! - [`SparseStore`]: a hash map holding only touched bins.
//! - [`DenseStore`]: a contiguous array covering the whole index range.
//! - [`CollapsingLowestDenseStore`]: a contiguous array capped at a fixed number of bins, collapsing the lowest ones.
//!
//! Stores of any kind merge into one another, encode to the DDSketch binary format, and decode straight into an
//! existing store.
#![forbid(unsafe_code)]

pub mod encoding;
mod error;
pub mod proto;
mod provider;
mod store;


pub use self::error::{DecodeError, StoreError};
pub use self::provider::{StoreProvider, DEFAULT_MAX_NUM_BINS};
pub use self::store::{
    decode_and_merge_with, Bin, Bins, CollapsingLowestDenseStore, DenseStore, SparseStore, Store,
};
