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

//! Schema compiler.
//!
//! Expands parsed field declarations into schema nodes annotated with
//! their wire layout: fixed sizes, container field ranges, offset table
//! positions, and the generation unit names of union nodes.

use heck::ToUpperCamelCase;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::Range;
use tracing::{debug, trace};

use crate::ast::{self, Primitive};
use crate::parser;

/// Size in bytes of an offset table entry.
pub const OFFSET_SIZE: usize = decgen_runtime::OFFSET_SIZE;

/// Maximum number of union branches addressable by a selector byte.
pub const MAX_UNION_BRANCHES: usize = 128;

/// Maximum encoded size and vector length. Offsets and lengths are
/// encoded on 4 bytes.
pub const MAX_ENCODED_SIZE: usize = u32::MAX as usize;

/// List of unique errors reported by the compiler.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidTypeString = 1,
    UnknownType = 2,
    UnsupportedWidth = 3,
    UnsupportedByteWidth = 4,
    SizeMismatch = 5,
    MissingComponents = 6,
    UnexpectedComponents = 7,
    EmptyComposite = 8,
    ZeroLengthVector = 9,
    MisplacedNone = 10,
    TooManyBranches = 11,
    DuplicateFieldIdentifier = 12,
    UnsupportedShape = 20,
    ValueMismatch = 30,
    EncodeFailure = 31,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "E{}", *self as u16)
    }
}

/// Type of compilation, generation and encoding errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("{code}: invalid declaration `{path}`: {message}")]
    Declaration { code: ErrorCode, path: String, message: String },
    #[error("{}: unsupported shape at `{path}`: {message}", ErrorCode::UnsupportedShape)]
    UnsupportedShape { path: String, message: String },
    #[error("{}: value mismatch at `{path}`: {message}", ErrorCode::ValueMismatch)]
    ValueMismatch { path: String, message: String },
    #[error("{}: {}", ErrorCode::EncodeFailure, .0)]
    Encode(#[from] decgen_runtime::EncodeError),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Declaration { code, .. } => *code,
            Error::UnsupportedShape { .. } => ErrorCode::UnsupportedShape,
            Error::ValueMismatch { .. } => ErrorCode::ValueMismatch,
            Error::Encode(_) => ErrorCode::EncodeFailure,
        }
    }
}

/// Compiled schema node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub name: String,
    /// Encoded size in bytes, absent for variable size nodes.
    pub fixed_size: Option<usize>,
    /// Set on every node below a list element or a union branch.
    /// Nested composites are decoded into freshly allocated memory.
    pub is_nested: bool,
    #[serde(flatten)]
    pub kind: SchemaKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type_name")]
pub enum SchemaKind {
    Primitive { primitive: Primitive },
    Vector { element: Box<Schema>, length: usize },
    List { element: Box<Schema> },
    Container(Container),
    Union(Union),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub fields: Vec<Schema>,
    pub is_fixed_len: Vec<bool>,
    /// Byte ranges of the fixed size fields, relative to the container start.
    pub field_ranges_fixed_len: Vec<Range<usize>>,
    /// Position of the offsets of the variable size fields,
    /// relative to the container start.
    pub variable_offsets_position: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Union {
    pub branches: Vec<Schema>,
    /// Names of the fields leading from the root to the union.
    pub struct_names: Vec<String>,
    /// Declared type string of the union field.
    pub actual_type: String,
    /// Deduplicated name of the generation unit holding the branch decoders.
    pub contract_name: String,
}

/// Output of the schema compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Compiled {
    /// Root schema nodes.
    pub schema: Vec<Schema>,
    /// Union nodes in discovery order, one per generation unit.
    pub unions: Vec<Schema>,
}

impl Schema {
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            SchemaKind::Primitive { primitive } if primitive.is_dynamic() => "List",
            SchemaKind::Primitive { primitive } => primitive.kind(),
            SchemaKind::Vector { .. } => "Vector",
            SchemaKind::List { .. } => "List",
            SchemaKind::Container(_) => "Container",
            SchemaKind::Union(_) => "union",
        }
    }

    pub fn is_fixed_len(&self) -> bool {
        self.fixed_size.is_some()
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match &self.kind {
            SchemaKind::Primitive { primitive } => Some(primitive),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<&Union> {
        match &self.kind {
            SchemaKind::Union(union) => Some(union),
            _ => None,
        }
    }

    /// Count the schema nodes rooted at this node, union branches included.
    pub fn node_count(&self) -> usize {
        1 + match &self.kind {
            SchemaKind::Primitive { .. } => 0,
            SchemaKind::Vector { element, .. } | SchemaKind::List { element } => {
                element.node_count()
            }
            SchemaKind::Container(container) => {
                container.fields.iter().map(Schema::node_count).sum()
            }
            SchemaKind::Union(union) => union.branches.iter().map(Schema::node_count).sum(),
        }
    }
}

impl Compiled {
    pub fn root(&self) -> &Schema {
        &self.schema[0]
    }
}

impl Container {
    /// Size of the fixed region: fixed fields plus offset table entries.
    pub fn fixed_region_size(&self) -> usize {
        let fixed: usize = self.field_ranges_fixed_len.iter().map(|range| range.len()).sum();
        fixed + OFFSET_SIZE * self.variable_offsets_position.len()
    }
}

/// Compute the generation unit name for a union at `path`.
///
/// Path segments are converted to UpperCamelCase and joined with `_`.
/// Names already present in `taken` receive a numeric suffix.
pub fn unit_name(path: &[String], root_name: &str, taken: &BTreeSet<String>) -> String {
    let base = if path.is_empty() {
        root_name.to_upper_camel_case()
    } else {
        path.iter().map(|segment| segment.to_upper_camel_case()).collect::<Vec<_>>().join("_")
    };
    let mut name = base.clone();
    let mut suffix = 1;
    while taken.contains(&name) {
        suffix += 1;
        name = format!("{base}_{suffix}");
    }
    name
}

struct Compiler<'d> {
    root_name: &'d str,
    unions: Vec<Schema>,
    unit_names: BTreeSet<String>,
}

impl Compiler<'_> {
    fn error_path(&self, path: &[String]) -> String {
        std::iter::once(self.root_name)
            .chain(path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn declaration_error(&self, code: ErrorCode, path: &[String], message: String) -> Error {
        Error::Declaration { code, path: self.error_path(path), message }
    }

    fn check_unique_names(&self, fields: &[ast::Field], path: &[String]) -> Result<(), Error> {
        let mut names = HashSet::new();
        for field in fields {
            if !names.insert(field.name.as_str()) {
                return Err(self.declaration_error(
                    ErrorCode::DuplicateFieldIdentifier,
                    path,
                    format!("redeclaration of field identifier `{}`", field.name),
                ));
            }
        }
        Ok(())
    }

    fn compile_type(
        &mut self,
        field: &ast::Field,
        ty: &ast::Type,
        path: &[String],
        nested: bool,
        allow_none: bool,
    ) -> Result<Schema, Error> {
        let name = field.name.clone();
        let schema = match ty {
            ast::Type::Primitive(Primitive::None) if !allow_none => {
                return Err(self.declaration_error(
                    ErrorCode::MisplacedNone,
                    path,
                    "`none` is only allowed as the first branch of a union".to_owned(),
                ))
            }
            ast::Type::Primitive(primitive) => Schema {
                name,
                fixed_size: primitive.fixed_size(),
                is_nested: nested,
                kind: SchemaKind::Primitive { primitive: *primitive },
            },
            ast::Type::Vector { element, length } => {
                let element = self.compile_type(field, element, path, nested, false)?;
                let too_large = || Error::UnsupportedShape {
                    path: self.error_path(path),
                    message: format!("vector of {length} elements is too large"),
                };
                if *length > MAX_ENCODED_SIZE {
                    return Err(too_large());
                }
                let fixed_size = match element.fixed_size {
                    Some(size) => Some(
                        size.checked_mul(*length)
                            .filter(|size| *size <= MAX_ENCODED_SIZE)
                            .ok_or_else(too_large)?,
                    ),
                    None => None,
                };
                Schema {
                    name,
                    fixed_size,
                    is_nested: nested,
                    kind: SchemaKind::Vector { element: Box::new(element), length: *length },
                }
            }
            ast::Type::List { element } => {
                let element = self.compile_type(field, element, path, true, false)?;
                Schema {
                    name,
                    fixed_size: None,
                    is_nested: nested,
                    kind: SchemaKind::List { element: Box::new(element) },
                }
            }
            ast::Type::Tuple(fields) => self.compile_container(field, fields, path, nested)?,
            ast::Type::Union(branches) => self.compile_union(field, branches, path, nested)?,
        };
        trace!(
            path = %self.error_path(path),
            type_name = schema.type_name(),
            fixed_size = ?schema.fixed_size,
            is_nested = schema.is_nested,
            "compiled schema node"
        );
        Ok(schema)
    }

    fn compile_container(
        &mut self,
        field: &ast::Field,
        fields: &[ast::Field],
        path: &[String],
        nested: bool,
    ) -> Result<Schema, Error> {
        if fields.is_empty() {
            return Err(self.declaration_error(
                ErrorCode::EmptyComposite,
                path,
                "tuples must have at least one component".to_owned(),
            ));
        }
        self.check_unique_names(fields, path)?;

        let mut container = Container {
            fields: Vec::with_capacity(fields.len()),
            is_fixed_len: Vec::with_capacity(fields.len()),
            field_ranges_fixed_len: vec![],
            variable_offsets_position: vec![],
        };
        let mut offset: usize = 0;
        for child in fields {
            let child_path = [path, &[child.name.clone()]].concat();
            let schema = self.compile_type(child, &child.ty, &child_path, nested, false)?;
            let size = schema.fixed_size.unwrap_or(OFFSET_SIZE);
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= MAX_ENCODED_SIZE)
                .ok_or_else(|| Error::UnsupportedShape {
                    path: self.error_path(path),
                    message: "fixed region of the tuple is too large".to_owned(),
                })?;
            match schema.fixed_size {
                Some(_) => {
                    container.is_fixed_len.push(true);
                    container.field_ranges_fixed_len.push(offset..end);
                }
                None => {
                    container.is_fixed_len.push(false);
                    container.variable_offsets_position.push(offset);
                }
            }
            offset = end;
            container.fields.push(schema);
        }

        let fixed_size = container.variable_offsets_position.is_empty().then_some(offset);
        Ok(Schema {
            name: field.name.clone(),
            fixed_size,
            is_nested: nested,
            kind: SchemaKind::Container(container),
        })
    }

    fn compile_union(
        &mut self,
        field: &ast::Field,
        branches: &[ast::Field],
        path: &[String],
        nested: bool,
    ) -> Result<Schema, Error> {
        if branches.is_empty() {
            return Err(self.declaration_error(
                ErrorCode::EmptyComposite,
                path,
                "unions must have at least one branch".to_owned(),
            ));
        }
        if branches.len() > MAX_UNION_BRANCHES {
            return Err(self.declaration_error(
                ErrorCode::TooManyBranches,
                path,
                format!(
                    "unions have at most {MAX_UNION_BRANCHES} branches, got {}",
                    branches.len()
                ),
            ));
        }
        self.check_unique_names(branches, path)?;

        let mut compiled = Vec::with_capacity(branches.len());
        for (index, branch) in branches.iter().enumerate() {
            let branch_path = [path, &[branch.name.clone()]].concat();
            compiled.push(self.compile_type(branch, &branch.ty, &branch_path, true, index == 0)?);
        }

        let contract_name = unit_name(path, self.root_name, &self.unit_names);
        self.unit_names.insert(contract_name.clone());
        let schema = Schema {
            name: field.name.clone(),
            fixed_size: None,
            is_nested: nested,
            kind: SchemaKind::Union(Union {
                branches: compiled,
                struct_names: path.to_vec(),
                actual_type: field.type_string.clone(),
                contract_name,
            }),
        };
        self.unions.push(schema.clone());
        Ok(schema)
    }
}

/// Compile a field declaration tree into its schema.
pub fn compile(decl: &ast::Declaration) -> Result<Compiled, Error> {
    let root = parser::parse_declaration(decl)?;
    let mut compiler =
        Compiler { root_name: &decl.name, unions: vec![], unit_names: BTreeSet::new() };
    let schema = compiler.compile_type(&root, &root.ty, &[], false, false)?;
    debug!(
        root = %decl.name,
        nodes = schema.node_count(),
        unions = compiler.unions.len(),
        "compiled declaration"
    );
    Ok(Compiled { schema: vec![schema], unions: compiler.unions })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::Declaration;
    use googletest::prelude::{assert_that, eq};

    macro_rules! raises {
        ($code:ident, $decl:expr) => {{
            let result = compile(&$decl);
            assert!(matches!(result, Err(_)));
            let error = result.err().unwrap();
            println!("{}", error);
            assert_eq!(error.code(), ErrorCode::$code);
        }};
    }

    macro_rules! valid {
        ($decl:expr) => {{
            assert!(compile(&$decl).is_ok());
        }};
    }

    fn tuple(name: &str, components: Vec<Declaration>) -> Declaration {
        Declaration::new(name, "tuple").with_components(components)
    }

    fn union(name: &str, branches: Vec<Declaration>) -> Declaration {
        Declaration::new(name, "union").with_components(branches)
    }

    fn container(schema: &Schema) -> &Container {
        match &schema.kind {
            SchemaKind::Container(container) => container,
            _ => panic!("expected a container"),
        }
    }

    #[test]
    fn test_fixed_container() {
        let compiled = compile(&tuple(
            "Test",
            vec![Declaration::new("quantity", "uint8"), Declaration::new("active", "bool")],
        ))
        .unwrap();
        let root = compiled.root();
        assert_that!(root.fixed_size, eq(Some(2)));
        assert_that!(root.type_name(), eq("Container"));
        let container = container(root);
        assert_that!(container.variable_offsets_position.len(), eq(0));
        assert_that!(container.field_ranges_fixed_len.clone(), eq(vec![0..1, 1..2]));
        assert_that!(container.is_fixed_len.clone(), eq(vec![true, true]));
    }

    #[test]
    fn test_variable_container() {
        let compiled = compile(&tuple(
            "Test",
            vec![
                Declaration::new("name", "string"),
                Declaration::new("id", "uint32"),
                Declaration::new("tags", "uint8[]"),
                Declaration::new("pair", "uint16[2]"),
            ],
        ))
        .unwrap();
        let root = compiled.root();
        assert_that!(root.fixed_size, eq(None));
        let container = container(root);
        assert_that!(container.variable_offsets_position.clone(), eq(vec![0, 8]));
        assert_that!(container.field_ranges_fixed_len.clone(), eq(vec![4..8, 12..16]));
        assert_that!(container.is_fixed_len.clone(), eq(vec![false, true, false, true]));
        assert_that!(container.fixed_region_size(), eq(16));
        assert_that!(container.fields[0].type_name(), eq("List"));
        assert_that!(container.fields[3].type_name(), eq("Vector"));
    }

    #[test]
    fn test_is_nested() {
        let compiled = compile(&tuple(
            "Test",
            vec![
                tuple("inner", vec![Declaration::new("a", "uint8")]),
                Declaration::new("items", "tuple[]")
                    .with_components(vec![tuple("deep", vec![Declaration::new("b", "string")])]),
            ],
        ))
        .unwrap();
        let root = container(compiled.root());
        assert!(!root.fields[0].is_nested);
        let items = &root.fields[1];
        assert!(!items.is_nested);
        let SchemaKind::List { element } = &items.kind else { panic!("expected a list") };
        assert!(element.is_nested);
        assert!(container(element).fields[0].is_nested);
    }

    #[test]
    fn test_union_units() {
        let compiled = compile(&tuple(
            "Test",
            vec![
                union(
                    "choice",
                    vec![
                        Declaration::new("none", "none"),
                        Declaration::new("integer", "uint32"),
                        union(
                            "inner",
                            vec![Declaration::new("flag", "bool"), Declaration::new("s", "string")],
                        ),
                    ],
                ),
                Declaration::new("other_choice", "union[]")
                    .with_components(vec![Declaration::new("x", "uint8")]),
            ],
        ))
        .unwrap();
        let names: Vec<_> = compiled
            .unions
            .iter()
            .map(|schema| schema.as_union().unwrap().contract_name.clone())
            .collect();
        assert_that!(
            names,
            eq(vec!["Choice_Inner".to_owned(), "Choice".to_owned(), "OtherChoice".to_owned()])
        );
        let choice = compiled.unions[1].as_union().unwrap();
        assert_that!(choice.struct_names.clone(), eq(vec!["choice".to_owned()]));
        assert_that!(choice.actual_type.as_str(), eq("union"));
        assert!(choice.branches.iter().all(|branch| branch.is_nested));
        assert_that!(compiled.unions[2].as_union().unwrap().actual_type.as_str(), eq("union[]"));
    }

    #[test]
    fn test_root_union_unit_name() {
        let compiled =
            compile(&union("my_value", vec![Declaration::new("a", "uint8")])).unwrap();
        assert_that!(compiled.unions[0].as_union().unwrap().contract_name.as_str(), eq("MyValue"));
    }

    #[test]
    fn test_unit_name_dedup() {
        let taken = BTreeSet::from(["AB_C".to_owned(), "AB_C_2".to_owned()]);
        let path = vec!["a_b".to_owned(), "c".to_owned()];
        assert_that!(unit_name(&path, "Root", &taken).as_str(), eq("AB_C_3"));
        assert_that!(unit_name(&path, "Root", &BTreeSet::new()).as_str(), eq("AB_C"));
    }

    #[test]
    fn test_root_list() {
        let compiled = compile(&Declaration::new("values", "uint16[]")).unwrap();
        assert_that!(compiled.root().type_name(), eq("List"));
        assert_that!(compiled.schema.len(), eq(1));
    }

    #[test]
    fn test_errors() {
        raises!(EmptyComposite, tuple("Test", vec![]));
        raises!(EmptyComposite, tuple("Test", vec![union("u", vec![])]));
        raises!(MisplacedNone, tuple("Test", vec![Declaration::new("n", "none")]));
        raises!(
            MisplacedNone,
            union("u", vec![Declaration::new("a", "uint8"), Declaration::new("n", "none")])
        );
        raises!(MisplacedNone, union("u", vec![Declaration::new("n", "none[2]")]));
        raises!(
            DuplicateFieldIdentifier,
            tuple("Test", vec![Declaration::new("a", "uint8"), Declaration::new("a", "bool")])
        );
        raises!(
            TooManyBranches,
            union(
                "u",
                (0..129).map(|i| Declaration::new(&format!("b{i}"), "uint8")).collect()
            )
        );
        raises!(UnsupportedWidth, tuple("Test", vec![Declaration::new("a", "int12")]));
    }

    #[test]
    fn test_valid() {
        valid!(union("u", vec![Declaration::new("n", "none"), Declaration::new("a", "uint8")]));
        valid!(Declaration::new("raw", "bytes[3][]"));
        valid!(tuple(
            "Test",
            vec![Declaration::new("a", "address"), Declaration::new("b", "bytes32")]
        ));
        valid!(union(
            "u",
            (0..128).map(|i| Declaration::new(&format!("b{i}"), "uint8")).collect()
        ));
    }

    #[test]
    fn test_error_display() {
        let error = compile(&tuple("Test", vec![Declaration::new("a", "uint12")])).unwrap_err();
        assert_eq!(
            error.to_string(),
            "E3: invalid declaration `Test.a`: unsupported integer width 12, expected a multiple of 8 up to 256"
        );
        let error = Error::UnsupportedShape { path: "x".to_owned(), message: "m".to_owned() };
        assert_eq!(error.to_string(), format!("{}: unsupported shape at `x`: m", error.code()));
        assert_eq!(error.to_string(), "E20: unsupported shape at `x`: m");
        let error = Error::ValueMismatch { path: "x".to_owned(), message: "m".to_owned() };
        assert_eq!(error.to_string(), "E30: value mismatch at `x`: m");
    }
}
