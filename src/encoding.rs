//! Binary codec primitives shared by every store.
//!
//! The layout is byte-compatible with the other DDSketch implementations: a one-byte flag (two low bits for the flag
//! type, six high bits for the sub-flag), LEB128-style unsigned varints capped at nine bytes, zigzag signed varints,
//! and a variable-length float encoding that favours small integral counts.
//!
//! Decoders read from a caller-owned cursor (`&mut &[u8]`) and advance it past the consumed bytes.

use crate::error::{DecodeError, UnexpectedEofSnafu};

/// Maximum number of bytes used by a 64-bit varint or varfloat.
const MAX_VAR_LEN_64: usize = 9;

const VARFLOAT64_ROTATE: u32 = 6;

/// What a flagged section of an encoded sketch describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FlagType {
    SketchFeatures = 0b00,
    PositiveStore = 0b01,
    IndexMapping = 0b10,
    NegativeStore = 0b11,
}

impl FlagType {
    const MASK: u8 = 0b11;

    fn from_bits(bits: u8) -> Self {
        match bits & Self::MASK {
            0b00 => FlagType::SketchFeatures,
            0b01 => FlagType::PositiveStore,
            0b10 => FlagType::IndexMapping,
            _ => FlagType::NegativeStore,
        }
    }
}

/// Sub-mode of a flag; for store sections it names the bin encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubFlag(u8);

impl SubFlag {
    /// Bin count followed by `(index delta, count)` pairs.
    pub const BIN_ENCODING_INDEX_DELTAS_AND_COUNTS: SubFlag = SubFlag(1);

    /// Bin count followed by index deltas; every bin has a count of one.
    pub const BIN_ENCODING_INDEX_DELTAS: SubFlag = SubFlag(2);

    /// Bin count, start index and index delta, followed by one count per bin.
    pub const BIN_ENCODING_CONTIGUOUS_COUNTS: SubFlag = SubFlag(3);

    /// Creates a sub-flag from its raw six-bit value.
    pub const fn new(value: u8) -> Self {
        SubFlag(value & 0b11_1111)
    }

    /// Returns the raw six-bit value.
    pub const fn value(self) -> u8 {
        self.0
    }
}

/// A single flag byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Flag(u8);

impl Flag {
    pub const fn new(flag_type: FlagType, sub_flag: SubFlag) -> Self {
        Flag((sub_flag.0 << 2) | flag_type as u8)
    }

    pub fn flag_type(self) -> FlagType {
        FlagType::from_bits(self.0)
    }

    pub fn sub_flag(self) -> SubFlag {
        SubFlag(self.0 >> 2)
    }

    pub const fn to_byte(self) -> u8 {
        self.0
    }
}

impl From<u8> for Flag {
    fn from(byte: u8) -> Self {
        Flag(byte)
    }
}

fn next_byte(buf: &mut &[u8], what: &'static str) -> Result<u8, DecodeError> {
    match buf.split_first() {
        Some((&byte, rest)) => {
            *buf = rest;
            Ok(byte)
        }
        None => UnexpectedEofSnafu { what }.fail(),
    }
}

pub fn encode_flag(buf: &mut Vec<u8>, flag: Flag) {
    buf.push(flag.to_byte());
}

pub fn decode_flag(buf: &mut &[u8]) -> Result<Flag, DecodeError> {
    next_byte(buf, "flag").map(Flag)
}

/// Writes `value` as an unsigned varint.
///
/// The ninth byte, when reached, carries eight payload bits with no continuation bit.
pub fn encode_uvarint64(buf: &mut Vec<u8>, mut value: u64) {
    for _ in 0..MAX_VAR_LEN_64 - 1 {
        if value < 0x80 {
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub fn decode_uvarint64(buf: &mut &[u8]) -> Result<u64, DecodeError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for i in 0..MAX_VAR_LEN_64 {
        let byte = next_byte(buf, "unsigned varint")?;
        if byte < 0x80 || i == MAX_VAR_LEN_64 - 1 {
            return Ok(value | (u64::from(byte) << shift));
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Ok(value)
}

/// Writes `value` as a zigzag-encoded signed varint.
pub fn encode_varint64(buf: &mut Vec<u8>, value: i64) {
    encode_uvarint64(buf, ((value >> 63) ^ (value << 1)) as u64);
}

pub fn decode_varint64(buf: &mut &[u8]) -> Result<i64, DecodeError> {
    let zigzag = decode_uvarint64(buf)?;
    Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
}

/// Writes `value` as a variable-length float.
///
/// Values are offset by one and their bit pattern rotated so that small non-negative integers, the common case for
/// bin counts, only need their first byte or two.
pub fn encode_varfloat64(buf: &mut Vec<u8>, value: f64) {
    let mut x = (value + 1.0).to_bits().wrapping_sub(1.0f64.to_bits()).rotate_left(VARFLOAT64_ROTATE);
    for _ in 0..MAX_VAR_LEN_64 - 1 {
        let byte = (x >> (64 - 7)) as u8;
        x <<= 7;
        if x == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
    buf.push((x >> (8 * 7)) as u8);
}

pub fn decode_varfloat64(buf: &mut &[u8]) -> Result<f64, DecodeError> {
    let mut x = 0u64;
    let mut shift: u32 = 64 - 7;
    for i in 0..MAX_VAR_LEN_64 {
        let byte = next_byte(buf, "varfloat")?;
        if i == MAX_VAR_LEN_64 - 1 {
            x |= u64::from(byte);
            break;
        }
        if byte < 0x80 {
            x |= u64::from(byte) << shift;
            break;
        }
        x |= u64::from(byte & 0x7f) << shift;
        shift -= 7;
    }
    let bits = x.rotate_right(VARFLOAT64_ROTATE).wrapping_add(1.0f64.to_bits());
    Ok(f64::from_bits(bits) - 1.0)
}
