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

//! Packed serializer.
//!
//! Fields are written back to back with no padding, most significant
//! byte first. Dynamic bytes are preceded by a 4-byte big-endian
//! length, lists by a 4-byte big-endian element count.

use crate::{encode_scalar, put_u32, EncodeError, Encoding, Value, OFFSET_SIZE};
use bytes::BufMut;

/// Packed wire encoding.
pub struct Packed;

impl Encoding for Packed {
    fn encoded_len(value: &Value) -> usize {
        match value {
            Value::Uint { width, .. } | Value::Int { width, .. } => *width,
            Value::Bool(_) => 1,
            Value::FixedBytes(bytes) => bytes.len(),
            Value::Bytes(bytes) => OFFSET_SIZE + bytes.len(),
            Value::List(elements) => {
                OFFSET_SIZE + elements.iter().map(Packed::encoded_len).sum::<usize>()
            }
            Value::Vector(elements) | Value::Container(elements) => {
                elements.iter().map(Packed::encoded_len).sum()
            }
            // Unions are rejected by `encode`.
            Value::Union { .. } => 0,
        }
    }

    fn encode(value: &Value, buf: &mut impl BufMut) -> Result<(), EncodeError> {
        match value {
            Value::Bytes(bytes) => {
                put_u32(bytes.len(), false, buf)?;
                buf.put_slice(bytes);
            }
            Value::List(elements) => {
                put_u32(elements.len(), false, buf)?;
                for element in elements {
                    Packed::encode(element, buf)?;
                }
            }
            Value::Vector(elements) | Value::Container(elements) => {
                for element in elements {
                    Packed::encode(element, buf)?;
                }
            }
            Value::Union { selector, .. } => {
                return Err(EncodeError::UnsupportedUnion { selector: *selector })
            }
            _ => encode_scalar(value, buf)?,
        }
        Ok(())
    }
}

/// Return the length of the encoded value.
pub fn encoded_len(value: &Value) -> usize {
    Packed::encoded_len(value)
}

/// Write the value to an output buffer.
pub fn encode(value: &Value, buf: &mut impl BufMut) -> Result<(), EncodeError> {
    Packed::encode(value, buf)
}

/// Encode a value to a byte vector.
pub fn encode_to_vec(value: &Value) -> Result<Vec<u8>, EncodeError> {
    Packed::encode_to_vec(value)
}
