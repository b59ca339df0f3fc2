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

//! SSZ serializer.
//!
//! Composite values are laid out as a fixed region followed by the
//! payloads of their variable size elements. The fixed region holds
//! fixed size elements inline, and a 4-byte little-endian offset
//! relative to the start of the composite for each variable size
//! element. Numbers are written most significant byte first, matching
//! the loads performed by the generated decoders. Dynamic bytes do not
//! carry a length; it is recovered from the surrounding offsets.

use crate::{encode_scalar, put_u32, EncodeError, Encoding, Value, OFFSET_SIZE};
use bytes::BufMut;

/// SSZ wire encoding.
pub struct Ssz;

impl Encoding for Ssz {
    fn encoded_len(value: &Value) -> usize {
        match value {
            Value::Uint { width, .. } | Value::Int { width, .. } => *width,
            Value::Bool(_) => 1,
            Value::FixedBytes(bytes) | Value::Bytes(bytes) => bytes.len(),
            Value::Vector(elements) | Value::List(elements) | Value::Container(elements) => {
                elements.iter().map(element_len).sum()
            }
            Value::Union { value, .. } => 1 + value.as_deref().map_or(0, Ssz::encoded_len),
        }
    }

    fn encode(value: &Value, buf: &mut impl BufMut) -> Result<(), EncodeError> {
        match value {
            Value::Bytes(bytes) => buf.put_slice(bytes),
            Value::Vector(elements) | Value::List(elements) | Value::Container(elements) => {
                encode_composite(elements, buf)?
            }
            Value::Union { selector, value } => {
                buf.put_u8(*selector);
                if let Some(value) = value {
                    Ssz::encode(value, buf)?;
                }
            }
            _ => encode_scalar(value, buf)?,
        }
        Ok(())
    }
}

/// Size taken by an element in the fixed region of its parent,
/// plus the size of its variable payload.
fn element_len(value: &Value) -> usize {
    if value.is_fixed_len() {
        Ssz::encoded_len(value)
    } else {
        OFFSET_SIZE + Ssz::encoded_len(value)
    }
}

fn encode_composite(elements: &[Value], buf: &mut impl BufMut) -> Result<(), EncodeError> {
    let fixed_len: usize = elements
        .iter()
        .map(|element| {
            if element.is_fixed_len() {
                Ssz::encoded_len(element)
            } else {
                OFFSET_SIZE
            }
        })
        .sum();

    let mut offset = fixed_len;
    for element in elements {
        if element.is_fixed_len() {
            Ssz::encode(element, buf)?;
        } else {
            put_u32(offset, true, buf)?;
            offset += Ssz::encoded_len(element);
        }
    }

    for element in elements.iter().filter(|element| !element.is_fixed_len()) {
        Ssz::encode(element, buf)?;
    }
    Ok(())
}

/// Return the length of the encoded value.
pub fn encoded_len(value: &Value) -> usize {
    Ssz::encoded_len(value)
}

/// Write the value to an output buffer.
pub fn encode(value: &Value, buf: &mut impl BufMut) -> Result<(), EncodeError> {
    Ssz::encode(value, buf)
}

/// Encode a value to a byte vector.
pub fn encode_to_vec(value: &Value) -> Result<Vec<u8>, EncodeError> {
    Ssz::encode_to_vec(value)
}
