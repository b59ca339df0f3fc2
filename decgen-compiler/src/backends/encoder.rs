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

//! Value encoder front-end.
//!
//! JSON values are converted into the typed value tree of the runtime
//! following the compiled schema of the declaration, then serialized
//! with the selected wire encoding.

use decgen_runtime::{hex, int_fits, stride, uint_fits, Encoding as _, Packed, Ssz, Value};
use decgen_runtime::{I256, U256};
use serde_json::Value as Json;
use tracing::debug;

use crate::analyzer::{self, Error, Schema, SchemaKind};
use crate::ast::{Declaration, Primitive};
use crate::backends::{EncodeOptions, Encoding};

fn mismatch(path: &str, message: impl Into<String>) -> Error {
    Error::ValueMismatch { path: path.to_owned(), message: message.into() }
}

fn describe(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

fn unexpected(path: &str, expected: &str, json: &Json) -> Error {
    mismatch(path, format!("expected {expected}, got {}", describe(json)))
}

fn parse_uint(json: &Json, path: &str) -> Result<U256, Error> {
    match json {
        Json::Number(number) => number
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| mismatch(path, format!("expected an unsigned integer, got {number}"))),
        Json::String(string) => string
            .parse::<U256>()
            .map_err(|_| mismatch(path, format!("invalid unsigned integer `{string}`"))),
        json => Err(unexpected(path, "an unsigned integer", json)),
    }
}

fn parse_int(json: &Json, path: &str) -> Result<I256, Error> {
    let string = match json {
        Json::Number(number) if number.is_i64() || number.is_u64() => number.to_string(),
        Json::String(string) => string.clone(),
        json => return Err(unexpected(path, "an integer", json)),
    };
    let invalid = || mismatch(path, format!("invalid integer `{string}`"));
    let (negative, digits) = match string.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, string.as_str()),
    };
    let value = I256::from_raw(digits.parse::<U256>().map_err(|_| invalid())?);
    match (negative, value.is_negative()) {
        (_, false) => Ok(if negative { -value } else { value }),
        (true, true) if value == I256::MIN => Ok(value),
        _ => Err(invalid()),
    }
}

fn parse_hex(json: &Json, path: &str) -> Result<Vec<u8>, Error> {
    let Json::String(string) = json else {
        return Err(unexpected(path, "a hex string", json));
    };
    let digits = string.strip_prefix("0x").unwrap_or(string);
    hex::decode(digits).map_err(|err| mismatch(path, format!("invalid hex string: {err}")))
}

fn to_primitive(primitive: &Primitive, json: &Json, path: &str) -> Result<Value, Error> {
    Ok(match primitive {
        Primitive::Uint { width } => {
            let value = parse_uint(json, path)?;
            if !uint_fits(&value, *width) {
                return Err(mismatch(path, format!("{value} does not fit in {width} bytes")));
            }
            Value::Uint { width: *width, value }
        }
        Primitive::Int { width } => {
            let value = parse_int(json, path)?;
            if !int_fits(&value, *width) {
                return Err(mismatch(path, format!("{value} does not fit in {width} bytes")));
            }
            Value::Int { width: *width, value }
        }
        Primitive::Bool => match json {
            Json::Bool(value) => Value::Bool(*value),
            json => return Err(unexpected(path, "a boolean", json)),
        },
        Primitive::Address => {
            let bytes = parse_hex(json, path)?;
            if bytes.len() != 20 {
                return Err(mismatch(path, format!("expected 20 bytes, got {}", bytes.len())));
            }
            Value::FixedBytes(bytes)
        }
        Primitive::FixedBytes { width } => {
            let mut bytes = parse_hex(json, path)?;
            if bytes.len() > *width {
                return Err(mismatch(
                    path,
                    format!("expected at most {width} bytes, got {}", bytes.len()),
                ));
            }
            bytes.resize(*width, 0);
            Value::FixedBytes(bytes)
        }
        Primitive::Bytes => match json {
            Json::String(string) if string.starts_with("0x") => {
                Value::Bytes(parse_hex(json, path)?)
            }
            Json::String(string) => Value::string(string),
            json => return Err(unexpected(path, "a string", json)),
        },
        Primitive::String => match json {
            Json::String(string) => Value::string(string),
            json => return Err(unexpected(path, "a string", json)),
        },
        Primitive::None => return Err(mismatch(path, "`none` values have no payload")),
    })
}

fn to_elements(element: &Schema, json: &Json, path: &str) -> Result<Vec<Value>, Error> {
    let Json::Array(elements) = json else {
        return Err(unexpected(path, "an array", json));
    };
    elements
        .iter()
        .enumerate()
        .map(|(index, json)| to_value(element, json, &format!("{path}[{index}]")))
        .collect()
}

/// Convert a JSON value to the value tree of a schema.
///
/// Tuples are given as positional arrays or as objects keyed by field
/// name, unions as `{ "selector": n, "value": ... }`.
pub fn to_value(schema: &Schema, json: &Json, path: &str) -> Result<Value, Error> {
    match &schema.kind {
        SchemaKind::Primitive { primitive } => to_primitive(primitive, json, path),
        SchemaKind::Vector { element, length } => {
            let elements = to_elements(element, json, path)?;
            if elements.len() != *length {
                return Err(mismatch(
                    path,
                    format!("expected {length} elements, got {}", elements.len()),
                ));
            }
            Ok(Value::Vector(elements))
        }
        SchemaKind::List { element } => Ok(Value::List(to_elements(element, json, path)?)),
        SchemaKind::Container(container) => {
            let mut fields = Vec::with_capacity(container.fields.len());
            match json {
                Json::Array(values) if values.len() == container.fields.len() => {
                    for (field, json) in container.fields.iter().zip(values) {
                        fields.push(to_value(field, json, &format!("{path}.{}", field.name))?);
                    }
                }
                Json::Array(values) => {
                    return Err(mismatch(
                        path,
                        format!("expected {} fields, got {}", container.fields.len(), values.len()),
                    ))
                }
                Json::Object(values) => {
                    for field in &container.fields {
                        let path = format!("{path}.{}", field.name);
                        let json = values
                            .get(&field.name)
                            .ok_or_else(|| mismatch(&path, "missing field"))?;
                        fields.push(to_value(field, json, &path)?);
                    }
                }
                json => return Err(unexpected(path, "a tuple", json)),
            }
            Ok(Value::Container(fields))
        }
        SchemaKind::Union(union) => {
            let Json::Object(object) = json else {
                return Err(unexpected(path, "a union", json));
            };
            let selector = object
                .get("selector")
                .and_then(Json::as_u64)
                .ok_or_else(|| mismatch(path, "missing union selector"))?;
            let branch = usize::try_from(selector)
                .ok()
                .and_then(|selector| union.branches.get(selector))
                .ok_or_else(|| mismatch(path, format!("invalid union selector {selector}")))?;
            let selector = selector as u8;
            let path = format!("{path}.{}", branch.name);
            let value = match (branch.as_primitive(), object.get("value")) {
                (Some(Primitive::None), None | Some(Json::Null)) => None,
                (Some(Primitive::None), Some(_)) => {
                    return Err(mismatch(&path, "`none` values have no payload"))
                }
                (_, Some(json)) => Some(Box::new(to_value(branch, json, &path)?)),
                (_, None) => return Err(mismatch(&path, "missing union value")),
            };
            Ok(Value::Union { selector, value })
        }
    }
}

/// Serialize a value tree with the selected options.
pub fn encode_value(value: &Value, options: &EncodeOptions) -> Result<Vec<u8>, Error> {
    let blob = match options.encoding {
        Encoding::Ssz => Ssz::encode_to_vec(value)?,
        Encoding::Packed => Packed::encode_to_vec(value)?,
    };
    Ok(stride::with_length_prefix(&blob, options.prefix_size)?)
}

/// Encode a JSON value following a field declaration.
pub fn encode(decl: &Declaration, json: &Json, options: &EncodeOptions) -> Result<Vec<u8>, Error> {
    let compiled = analyzer::compile(decl)?;
    let value = to_value(compiled.root(), json, &decl.name)?;
    let bytes = encode_value(&value, options)?;
    debug!(root = %decl.name, encoding = ?options.encoding, length = bytes.len(), "encoded value");
    Ok(bytes)
}
