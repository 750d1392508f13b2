use snafu::Snafu;

/// Errors raised while decoding the binary wire format.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("Unexpected end of input while decoding {what}."))]
    UnexpectedEof { what: &'static str },

    #[snafu(display("Unknown bin encoding (sub-flag {sub_flag:#04x})."))]
    UnknownBinEncoding { sub_flag: u8 },

    #[snafu(display("Decoded bin index {index} does not fit in a 32-bit index."))]
    IndexOutOfRange { index: i64 },
}

/// Errors raised by store operations.
#[derive(Clone, Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("Minimum index is undefined for an empty store."))]
    UndefinedMinIndex,

    #[snafu(display("Maximum index is undefined for an empty store."))]
    UndefinedMaxIndex,

    #[snafu(display("Reweight factor must be strictly positive, got {factor}."))]
    InvalidReweightFactor { factor: f64 },

    #[snafu(display("Bin count cannot be negative, got {count}."))]
    NegativeBinCount { count: f64 },

    #[snafu(display("Serialized store is inconsistent: {reason}."))]
    InvalidStoreState { reason: &'static str },

    #[snafu(context(false), display("Failed to decode store: {source}"))]
    Decode { source: DecodeError },
}
