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

use serde::{Deserialize, Serialize};

/// Field declaration, as loaded from configuration.
///
/// `type_` is a type string such as `uint32`, `string[]` or `tuple[2]`.
/// `size` is expressed in bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<Declaration>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Primitive {
    /// Unsigned integer of `width` bytes.
    Uint { width: usize },
    /// Signed integer of `width` bytes.
    Int { width: usize },
    Bool,
    Address,
    /// Fixed size byte array of `width` bytes.
    FixedBytes { width: usize },
    Bytes,
    String,
    /// Empty union branch.
    None,
}

/// Parsed field type. Array dimensions are folded so that the last
/// dimension of the type string is the outermost node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Primitive(Primitive),
    Vector { element: Box<Type>, length: usize },
    List { element: Box<Type> },
    Tuple(Vec<Field>),
    Union(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    /// Type string as declared.
    pub type_string: String,
    pub ty: Type,
}

impl Declaration {
    pub fn new(name: &str, type_: &str) -> Declaration {
        Declaration { name: name.to_owned(), type_: type_.to_owned(), size: None, components: None }
    }

    pub fn with_size(mut self, size: usize) -> Declaration {
        self.size = Some(size);
        self
    }

    pub fn with_components(mut self, components: Vec<Declaration>) -> Declaration {
        self.components = Some(components);
        self
    }
}

impl Primitive {
    /// Return the encoded size in bytes, absent for dynamic bytes.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Primitive::Uint { width }
            | Primitive::Int { width }
            | Primitive::FixedBytes { width } => Some(*width),
            Primitive::Bool => Some(1),
            Primitive::Address => Some(20),
            Primitive::None => Some(0),
            Primitive::Bytes | Primitive::String => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Primitive::Uint { .. } => "uint",
            Primitive::Int { .. } => "int",
            Primitive::Bool => "bool",
            Primitive::Address => "address",
            Primitive::FixedBytes { .. } => "fixed_bytes",
            Primitive::Bytes => "bytes",
            Primitive::String => "string",
            Primitive::None => "none",
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Primitive::Bytes | Primitive::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_declaration() {
        let decl: Declaration = serde_json::from_str(
            r#"{
                "name": "Test",
                "type": "tuple",
                "components": [
                    { "name": "quantity", "type": "uint8", "size": 8 },
                    { "name": "active", "type": "bool" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            decl,
            Declaration::new("Test", "tuple").with_components(vec![
                Declaration::new("quantity", "uint8").with_size(8),
                Declaration::new("active", "bool"),
            ])
        );
    }

    #[test]
    fn test_fixed_size() {
        assert_eq!(Primitive::Uint { width: 4 }.fixed_size(), Some(4));
        assert_eq!(Primitive::Address.fixed_size(), Some(20));
        assert_eq!(Primitive::String.fixed_size(), None);
    }
}
