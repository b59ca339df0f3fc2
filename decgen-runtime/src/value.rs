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

use crate::{I256, U256};

/// Typed value tree mirroring a compiled schema.
///
/// Widths are expressed in bytes. Addresses are represented as
/// 20-byte `FixedBytes` values, strings as UTF-8 `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Uint { width: usize, value: U256 },
    Int { width: usize, value: I256 },
    Bool(bool),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    Vector(Vec<Value>),
    List(Vec<Value>),
    Container(Vec<Value>),
    /// Tagged value. The payload is absent for the `none` branch.
    Union { selector: u8, value: Option<Box<Value>> },
}

impl Value {
    /// Shorthand for an unsigned integer value.
    pub fn uint(width: usize, value: u64) -> Value {
        Value::Uint { width, value: U256::from(value) }
    }

    /// Shorthand for a signed integer value.
    pub fn int(width: usize, value: i64) -> Value {
        let value = if value < 0 {
            -I256::from_raw(U256::from(value.unsigned_abs()))
        } else {
            I256::from_raw(U256::from(value as u64))
        };
        Value::Int { width, value }
    }

    /// Shorthand for a UTF-8 string value.
    pub fn string(value: &str) -> Value {
        Value::Bytes(value.as_bytes().to_vec())
    }

    /// Return true if the encoded size of the value does not depend
    /// on its contents.
    pub fn is_fixed_len(&self) -> bool {
        match self {
            Value::Uint { .. } | Value::Int { .. } | Value::Bool(_) | Value::FixedBytes(_) => true,
            Value::Bytes(_) | Value::List(_) | Value::Union { .. } => false,
            Value::Vector(elements) | Value::Container(elements) => {
                elements.iter().all(Value::is_fixed_len)
            }
        }
    }
}
