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

//! Calling convention of the generated decoders.
//!
//! The caller owns the memory of the root value. Records and vectors
//! which are not nested in a dynamic value are allocated before the
//! decoder runs, the way the target language allocates memory for a
//! return value. Slots of dynamic values initially hold the address
//! of the zero slot.

use decgen_compiler::analyzer::{self, Schema, SchemaKind};
use decgen_compiler::ast::{Declaration, Primitive};
use decgen_compiler::backends::{self, encoder, EncodeOptions, GenerateOptions, Generated};
use decgen_runtime::{Value, I256, U256};

use crate::vm::{Machine, VmError, ZERO_SLOT};

const WORD_SIZE: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HarnessError {
    #[error(transparent)]
    Compile(#[from] decgen_compiler::Error),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("invalid union selector {selector} read at `{name}`")]
    InvalidSelector { name: String, selector: U256 },
}

fn to_usize(value: U256) -> Result<usize, HarnessError> {
    if value > U256::from(u32::MAX) {
        return Err(VmError::MemoryLimit(value).into());
    }
    Ok(value.as_limbs()[0] as usize)
}

/// Initial content of the slot of a value.
pub fn initial_slot(machine: &mut Machine, schema: &Schema) -> Result<U256, HarnessError> {
    Ok(match &schema.kind {
        SchemaKind::Container(_) | SchemaKind::Vector { .. } => {
            U256::from(preallocate(machine, schema)?)
        }
        SchemaKind::List { .. } | SchemaKind::Union(_) => U256::from(ZERO_SLOT),
        SchemaKind::Primitive { primitive } if primitive.is_dynamic() => U256::from(ZERO_SLOT),
        SchemaKind::Primitive { .. } => U256::ZERO,
    })
}

/// Allocate the memory of a record or vector, recursively.
/// Returns the address of the allocated region.
pub fn preallocate(machine: &mut Machine, schema: &Schema) -> Result<usize, HarnessError> {
    let elements: Vec<&Schema> = match &schema.kind {
        SchemaKind::Container(container) => container.fields.iter().collect(),
        SchemaKind::Vector { element, length } => {
            std::iter::repeat(element.as_ref()).take(*length).collect()
        }
        _ => vec![],
    };
    let ptr = machine.alloc(elements.len())?;
    for (index, element) in elements.into_iter().enumerate() {
        let value = initial_slot(machine, element)?;
        machine.mstore(ptr + index * WORD_SIZE, value)?;
    }
    Ok(ptr)
}

fn read_elements(
    machine: &mut Machine,
    element: &Schema,
    ptr: usize,
    count: usize,
) -> Result<Vec<Value>, HarnessError> {
    let mut values = Vec::with_capacity(count);
    for index in 0..count {
        let word = machine.mload(ptr + index * WORD_SIZE)?;
        values.push(read_value(machine, element, word)?);
    }
    Ok(values)
}

fn read_primitive(
    machine: &mut Machine,
    primitive: &Primitive,
    word: U256,
) -> Result<Value, HarnessError> {
    let bytes = word.to_be_bytes::<32>();
    Ok(match primitive {
        Primitive::Uint { width } => Value::Uint { width: *width, value: word },
        Primitive::Int { width } => Value::Int { width: *width, value: I256::from_raw(word) },
        Primitive::Bool => Value::Bool(word != U256::ZERO),
        Primitive::Address => Value::FixedBytes(bytes[WORD_SIZE - 20..].to_vec()),
        Primitive::FixedBytes { width } => Value::FixedBytes(bytes[..*width].to_vec()),
        Primitive::Bytes | Primitive::String => {
            let ptr = to_usize(word)?;
            let len = to_usize(machine.mload(ptr)?)?;
            Value::Bytes(machine.read_bytes(ptr + WORD_SIZE, len)?)
        }
        Primitive::None => Value::Container(vec![]),
    })
}

/// Read back a decoded value from the content of its slot.
pub fn read_value(
    machine: &mut Machine,
    schema: &Schema,
    word: U256,
) -> Result<Value, HarnessError> {
    match &schema.kind {
        SchemaKind::Primitive { primitive } => read_primitive(machine, primitive, word),
        SchemaKind::Vector { element, length } => {
            Ok(Value::Vector(read_elements(machine, element, to_usize(word)?, *length)?))
        }
        SchemaKind::List { element } => {
            let ptr = to_usize(word)?;
            let count = to_usize(machine.mload(ptr)?)?;
            Ok(Value::List(read_elements(machine, element, ptr + WORD_SIZE, count)?))
        }
        SchemaKind::Container(container) => {
            let ptr = to_usize(word)?;
            let mut fields = Vec::with_capacity(container.fields.len());
            for (index, field) in container.fields.iter().enumerate() {
                let word = machine.mload(ptr + index * WORD_SIZE)?;
                fields.push(read_value(machine, field, word)?);
            }
            Ok(Value::Container(fields))
        }
        SchemaKind::Union(union) => {
            let ptr = to_usize(word)?;
            let selector = machine.mload(ptr)?;
            let branch = to_usize(selector)
                .ok()
                .and_then(|index| union.branches.get(index))
                .ok_or_else(|| HarnessError::InvalidSelector {
                    name: schema.name.clone(),
                    selector,
                })?;
            let value = match branch.as_primitive() {
                Some(Primitive::None) => None,
                _ => {
                    let payload = machine.mload(ptr + WORD_SIZE)?;
                    Some(Box::new(read_value(machine, branch, payload)?))
                }
            };
            Ok(Value::Union { selector: selector.as_limbs()[0] as u8, value })
        }
    }
}

/// Run a generated decoder on an encoded blob, and read back the
/// decoded value.
pub fn decode(generated: &Generated, root: &Schema, blob: &[u8]) -> Result<Value, HarnessError> {
    let mut machine = Machine::new(generated);
    let data = machine.store_bytes(blob)?;
    match root.kind {
        SchemaKind::Container(_) => {
            let record = preallocate(&mut machine, root)?;
            machine.decode(data, record)?;
            read_value(&mut machine, root, U256::from(record))
        }
        _ => {
            let slot = machine.alloc(1)?;
            let initial = initial_slot(&mut machine, root)?;
            machine.mstore(slot, initial)?;
            machine.decode(data, slot)?;
            let word = machine.mload(slot)?;
            read_value(&mut machine, root, word)
        }
    }
}

/// Values compared by a round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTrip {
    pub encoded: Vec<u8>,
    pub expected: Value,
    pub decoded: Value,
}

/// Encode a JSON value following a declaration, decode the encoded
/// blob with the generated decoder, and return both value trees.
pub fn roundtrip(
    decl: &Declaration,
    json: &serde_json::Value,
    options: &GenerateOptions,
) -> Result<RoundTrip, HarnessError> {
    let compiled = analyzer::compile(decl)?;
    let generated = backends::generate_decoder(&compiled, &backends::root_name(decl), options)?;
    let expected = encoder::to_value(compiled.root(), json, &decl.name)?;
    let encoded = encoder::encode_value(&expected, &EncodeOptions::from(options))?;
    let decoded = decode(&generated, compiled.root(), &encoded)?;
    Ok(RoundTrip { encoded, expected, decoded })
}
