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

//! Record declarations for the decoded values.
//!
//! Each tuple of the declaration tree becomes a named record, emitted
//! after the records of its own tuple fields. Union fields are kept as
//! raw `bytes` in their owning record; the records describing the
//! union branches are grouped by the unit decoding the union.

use heck::ToUpperCamelCase;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::analyzer::{self, Error};
use crate::ast::{self, Declaration, Primitive, Type};
use crate::backends::ssz;
use crate::parser;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Struct {
    pub name: String,
    pub fields: Vec<StructField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Organized {
    /// Records of the main unit, inner records first.
    pub structs: Vec<Struct>,
    /// Records of the union branches, keyed by unit name.
    pub union_structs: BTreeMap<String, Vec<Struct>>,
}

fn primitive_type(primitive: &Primitive) -> String {
    match primitive {
        Primitive::Uint { width } => format!("uint{}", 8 * width),
        Primitive::Int { width } => format!("int{}", 8 * width),
        Primitive::FixedBytes { width } => format!("bytes{width}"),
        Primitive::Bool => "bool".to_owned(),
        Primitive::Address => "address".to_owned(),
        Primitive::Bytes => "bytes".to_owned(),
        Primitive::String => "string".to_owned(),
        Primitive::None => "none".to_owned(),
    }
}

/// Split a type into its array dimension suffix, in declaration
/// order, and its base type.
fn dimensions(ty: &Type) -> (String, &Type) {
    match ty {
        Type::Vector { element, length } => {
            let (suffix, base) = dimensions(element);
            (format!("{suffix}[{length}]"), base)
        }
        Type::List { element } => {
            let (suffix, base) = dimensions(element);
            (format!("{suffix}[]"), base)
        }
        _ => (String::new(), ty),
    }
}

struct Organizer {
    /// Number of records declared with each base name.
    names: HashMap<String, usize>,
    /// Unit names of the unions, keyed by field path.
    units: HashMap<Vec<String>, String>,
    organized: Organized,
}

impl Organizer {
    fn struct_name(&mut self, name: &str) -> String {
        let base = name.to_upper_camel_case();
        let count = self.names.entry(base.clone()).or_insert(0);
        *count += 1;
        match *count {
            1 => base,
            count => format!("{base}_{count}"),
        }
    }

    fn push(&mut self, unit: Option<&str>, record: Struct) {
        match unit {
            Some(unit) => {
                self.organized.union_structs.entry(unit.to_owned()).or_default().push(record)
            }
            None => self.organized.structs.push(record),
        }
    }

    /// Declare the records of a field, and return the type of the field
    /// in its parent record.
    fn visit(
        &mut self,
        field: &ast::Field,
        path: &[String],
        unit: Option<&str>,
    ) -> Result<String, Error> {
        let (suffix, base) = dimensions(&field.ty);
        match base {
            Type::Primitive(primitive) => Ok(format!("{}{suffix}", primitive_type(primitive))),
            Type::Tuple(children) => {
                let mut fields = Vec::with_capacity(children.len());
                for child in children {
                    let child_path = [path, &[child.name.clone()]].concat();
                    let type_ = self.visit(child, &child_path, unit)?;
                    fields.push(StructField { name: child.name.clone(), type_ });
                }
                let name = self.struct_name(&field.name);
                self.push(unit, Struct { name: name.clone(), fields });
                Ok(format!("{name}{suffix}"))
            }
            Type::Union(branches) => {
                let union_unit = self.units.get(path).cloned().ok_or_else(|| {
                    Error::UnsupportedShape {
                        path: path.join("."),
                        message: "union without a decoding unit".to_owned(),
                    }
                })?;
                let mut fields = vec![];
                for branch in branches {
                    if branch.ty == Type::Primitive(Primitive::None) {
                        continue;
                    }
                    let branch_path = [path, &[branch.name.clone()]].concat();
                    let type_ = self.visit(branch, &branch_path, Some(&union_unit))?;
                    fields.push(StructField { name: branch.name.clone(), type_ });
                }
                let name = self.struct_name(&field.name);
                self.push(Some(&union_unit), Struct { name, fields });
                Ok(format!("bytes{suffix}"))
            }
            Type::Vector { .. } | Type::List { .. } => Err(Error::UnsupportedShape {
                path: path.join("."),
                message: "unexpected array base type".to_owned(),
            }),
        }
    }
}

/// Organize the tuples of a declaration into named records.
pub fn organize(decl: &Declaration) -> Result<Organized, Error> {
    let compiled = analyzer::compile(decl)?;
    let units = compiled
        .unions
        .iter()
        .filter_map(|node| node.as_union())
        .map(|union| (union.struct_names.clone(), ssz::unit_name(union)))
        .collect();
    let root = parser::parse_declaration(decl)?;
    let mut organizer = Organizer { names: HashMap::new(), units, organized: Organized::default() };
    organizer.visit(&root, &[], None)?;
    Ok(organizer.organized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, type_: &str) -> StructField {
        StructField { name: name.to_owned(), type_: type_.to_owned() }
    }

    #[test]
    fn test_inner_records_first() {
        let organized = organize(&Declaration::new("price_feed", "tuple").with_components(vec![
            Declaration::new("round", "tuple[2]")
                .with_components(vec![Declaration::new("answer", "int256")]),
            Declaration::new("decimals", "uint8"),
            Declaration::new("tags", "string[]"),
        ]))
        .unwrap();
        assert_eq!(
            organized.structs,
            vec![
                Struct { name: "Round".to_owned(), fields: vec![field("answer", "int256")] },
                Struct {
                    name: "PriceFeed".to_owned(),
                    fields: vec![
                        field("round", "Round[2]"),
                        field("decimals", "uint8"),
                        field("tags", "string[]")
                    ]
                },
            ]
        );
        assert!(organized.union_structs.is_empty());
    }

    #[test]
    fn test_duplicate_names() {
        let organized = organize(&Declaration::new("Test", "tuple").with_components(vec![
            Declaration::new("a", "tuple")
                .with_components(vec![Declaration::new("test", "tuple")
                    .with_components(vec![Declaration::new("x", "bool")])]),
        ]))
        .unwrap();
        let names: Vec<_> = organized.structs.iter().map(|record| record.name.as_str()).collect();
        assert_eq!(names, vec!["Test", "A", "Test_2"]);
        assert_eq!(organized.structs[1].fields, vec![field("test", "Test")]);
    }

    #[test]
    fn test_union_records() {
        let organized = organize(&Declaration::new("Test", "tuple").with_components(vec![
            Declaration::new("choice", "union[]").with_components(vec![
                Declaration::new("none", "none"),
                Declaration::new("point", "tuple")
                    .with_components(vec![Declaration::new("x", "uint32")]),
            ]),
        ]))
        .unwrap();
        assert_eq!(
            organized.structs,
            vec![Struct { name: "Test".to_owned(), fields: vec![field("choice", "bytes[]")] }]
        );
        assert_eq!(
            organized.union_structs["SSZ_Choice"],
            vec![
                Struct { name: "Point".to_owned(), fields: vec![field("x", "uint32")] },
                Struct { name: "Choice".to_owned(), fields: vec![field("point", "Point")] },
            ]
        );
    }
}
