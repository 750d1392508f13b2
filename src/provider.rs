use crate::store::{CollapsingLowestDenseStore, DenseStore, SparseStore, Store};

/// Default bin limit for collapsing stores.
pub const DEFAULT_MAX_NUM_BINS: usize = 2048;

/// Selects the kind of store a sketch builds for its bins.
///
/// When the `serde` feature is enabled, this can be embedded in configuration:
///
/// ```toml
/// [store]
/// kind = "collapsing_lowest_dense"
/// max_num_bins = 4096
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum StoreProvider {
    /// Hash-indexed store, unbounded in the number of distinct indices.
    Sparse,

    /// Contiguous store, unbounded in its index range.
    Dense,

    /// Contiguous store that collapses its lowest bins to stay within `max_num_bins`.
    CollapsingLowestDense { max_num_bins: usize },
}

impl StoreProvider {
    /// Builds a new, empty store of the selected kind.
    pub fn new_store(&self) -> Box<dyn Store> {
        match *self {
            StoreProvider::Sparse => Box::new(SparseStore::new()),
            StoreProvider::Dense => Box::new(DenseStore::new()),
            StoreProvider::CollapsingLowestDense { max_num_bins } => {
                Box::new(CollapsingLowestDenseStore::new(max_num_bins))
            }
        }
    }
}

impl Default for StoreProvider {
    fn default() -> Self {
        StoreProvider::CollapsingLowestDense {
            max_num_bins: DEFAULT_MAX_NUM_BINS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_kinds() {
        let sparse = StoreProvider::Sparse.new_store();
        assert!(sparse.as_any().is::<SparseStore>());

        let dense = StoreProvider::Dense.new_store();
        assert!(dense.as_any().is::<DenseStore>());

        let collapsing = StoreProvider::default().new_store();
        let collapsing = collapsing
            .as_any()
            .downcast_ref::<CollapsingLowestDenseStore>()
            .expect("default provider should build a collapsing store");
        assert_eq!(collapsing.max_num_bins(), DEFAULT_MAX_NUM_BINS);
        assert!(collapsing.is_empty());
    }
}
