// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Value model and wire serializers shared by the decoder generator
//! and its tests.

use bytes::BufMut;

pub use alloy_primitives::{hex, I256, U256};

pub mod packed;
pub mod ssz;
pub mod stride;
mod value;

pub use packed::Packed;
pub use ssz::Ssz;
pub use value::Value;

/// Size in bytes of an SSZ offset, and of a packed length or count prefix.
pub const OFFSET_SIZE: usize = 4;

/// Size in bytes of a machine word.
pub const WORD_SIZE: usize = 32;

/// Type of serialization errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("the value {value} does not fit in {width} bytes")]
    InvalidScalarValue { value: String, width: usize },
    #[error("invalid scalar width {width}, expected a value in the range 1..=32")]
    InvalidScalarWidth { width: usize },
    #[error("the offset or length {size} cannot be represented with {width} bytes")]
    OffsetOverflow { size: usize, width: usize },
    #[error("union values (selector {selector}) have no packed representation")]
    UnsupportedUnion { selector: u8 },
    #[error("the blob length {length} does not fit in a {width} byte prefix")]
    PrefixOverflow { length: usize, width: usize },
}

/// Trait implemented by the supported wire encodings.
pub trait Encoding {
    /// Return the length of the encoded value.
    fn encoded_len(value: &Value) -> usize;

    /// Write the value to an output buffer.
    fn encode(value: &Value, buf: &mut impl BufMut) -> Result<(), EncodeError>;

    /// Encode the value to a byte vector.
    fn encode_to_vec(value: &Value) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(Self::encoded_len(value));
        Self::encode(value, &mut buf)?;
        Ok(buf)
    }
}

/// Check that an unsigned value is representable with `width` bytes.
pub fn uint_fits(value: &U256, width: usize) -> bool {
    value.bit_len() <= 8 * width
}

/// Check that a signed value is representable with `width` bytes
/// in two's complement.
pub fn int_fits(value: &I256, width: usize) -> bool {
    if width >= WORD_SIZE {
        return true;
    }
    let bits = 8 * width;
    let raw = value.into_raw();
    let mask = (U256::from(1) << bits) - U256::from(1);
    let low = raw & mask;
    let sign = U256::from(1) << (bits - 1);
    let extended = if low & sign == U256::ZERO { low } else { low | !mask };
    extended == raw
}

/// Write the low `width` bytes of a word, most significant byte first.
pub(crate) fn put_be_word(word: U256, width: usize, buf: &mut impl BufMut) {
    let bytes = word.to_be_bytes::<32>();
    buf.put_slice(&bytes[WORD_SIZE - width..]);
}

/// Write a scalar value. Only called on fixed width primitives.
pub(crate) fn encode_scalar(value: &Value, buf: &mut impl BufMut) -> Result<(), EncodeError> {
    match value {
        Value::Uint { width, value } => {
            check_width(*width)?;
            if !uint_fits(value, *width) {
                return Err(EncodeError::InvalidScalarValue {
                    value: value.to_string(),
                    width: *width,
                });
            }
            put_be_word(*value, *width, buf);
        }
        Value::Int { width, value } => {
            check_width(*width)?;
            if !int_fits(value, *width) {
                return Err(EncodeError::InvalidScalarValue {
                    value: value.to_string(),
                    width: *width,
                });
            }
            put_be_word(value.into_raw(), *width, buf);
        }
        Value::Bool(value) => buf.put_u8(*value as u8),
        Value::FixedBytes(bytes) => {
            check_width(bytes.len())?;
            buf.put_slice(bytes);
        }
        _ => unreachable!("encode_scalar called on a composite value"),
    }
    Ok(())
}

fn check_width(width: usize) -> Result<(), EncodeError> {
    if (1..=WORD_SIZE).contains(&width) {
        Ok(())
    } else {
        Err(EncodeError::InvalidScalarWidth { width })
    }
}

/// Write a 4 byte length, count, or offset with the selected byte order.
pub(crate) fn put_u32(
    size: usize,
    little_endian: bool,
    buf: &mut impl BufMut,
) -> Result<(), EncodeError> {
    let size = u32::try_from(size)
        .map_err(|_| EncodeError::OffsetOverflow { size, width: OFFSET_SIZE })?;
    if little_endian {
        buf.put_u32_le(size)
    } else {
        buf.put_u32(size)
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_fits() {
        let int = |s: &str| s.parse::<I256>().unwrap();
        assert!(int_fits(&int("127"), 1));
        assert!(int_fits(&int("-128"), 1));
        assert!(!int_fits(&int("128"), 1));
        assert!(!int_fits(&int("-129"), 1));
        assert!(int_fits(&int("-1"), 4));
        assert!(int_fits(&I256::MIN, 32));
    }

    #[test]
    fn test_uint_fits() {
        assert!(uint_fits(&U256::from(255), 1));
        assert!(!uint_fits(&U256::from(256), 1));
        assert!(uint_fits(&U256::MAX, 32));
    }
}
