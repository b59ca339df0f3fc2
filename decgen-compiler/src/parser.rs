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

use crate::analyzer::{Error, ErrorCode};
use crate::ast;
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use std::iter::Peekable;

// Generate the type string parser.
#[derive(pest_derive::Parser)]
#[grammar_inline = r#"
base_name = @{ ASCII_ALPHA+ }
width = @{ ASCII_DIGIT+ }

base = { base_name ~ width? }
dimension = { "[" ~ width? ~ "]" }

type_string = { SOI ~ base ~ dimension* ~ EOI }
"#]
pub struct TypeParser;

type Node<'i> = Pair<'i, Rule>;
type NodeIterator<'i> = Peekable<Pairs<'i, Rule>>;

/// Type string split into its base name, optional base width,
/// and array dimensions in declaration order (innermost first).
/// `None` dimensions are dynamic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeString {
    pub base: String,
    pub width: Option<usize>,
    pub dimensions: Vec<Option<usize>>,
}

trait Helpers<'i> {
    fn children(self) -> NodeIterator<'i>;
    fn as_string(&self) -> String;
    fn as_usize(&self) -> Result<usize, String>;
}

impl<'i> Helpers<'i> for Node<'i> {
    fn children(self) -> NodeIterator<'i> {
        self.into_inner().peekable()
    }

    fn as_string(&self) -> String {
        self.as_str().to_owned()
    }

    fn as_usize(&self) -> Result<usize, String> {
        self.as_str().parse().map_err(|_| format!("cannot convert '{}' to usize", self.as_str()))
    }
}

fn err_unexpected_rule<T>(expected: Rule, found: Rule) -> Result<T, String> {
    Err(format!("expected rule {:?}, got {:?}", expected, found))
}

fn err_missing_rule<T>(expected: Rule) -> Result<T, String> {
    Err(format!("expected rule {:?}, got nothing", expected))
}

fn expect<'i>(iter: &mut impl Iterator<Item = Node<'i>>, rule: Rule) -> Result<Node<'i>, String> {
    match iter.next() {
        Some(node) if node.as_rule() == rule => Ok(node),
        Some(node) => err_unexpected_rule(rule, node.as_rule()),
        None => err_missing_rule(rule),
    }
}

fn maybe<'i>(iter: &mut NodeIterator<'i>, rule: Rule) -> Option<Node<'i>> {
    iter.next_if(|n| n.as_rule() == rule)
}

fn parse_width_opt(iter: &mut NodeIterator<'_>) -> Result<Option<usize>, String> {
    maybe(iter, Rule::width).map(|n| n.as_usize()).transpose()
}

/// Parse a type string into its components.
pub fn parse_type_string(input: &str) -> Result<TypeString, String> {
    let root = TypeParser::parse(Rule::type_string, input)
        .map_err(|err| format!("malformed type string `{input}`: {}", err.variant.message()))?
        .next()
        .ok_or_else(|| format!("empty type string `{input}`"))?;
    let mut children = root.children();
    let mut base = expect(&mut children, Rule::base)?.children();
    let base_name = expect(&mut base, Rule::base_name)?.as_string();
    let width = parse_width_opt(&mut base)?;
    let mut dimensions = vec![];
    while let Some(dimension) = maybe(&mut children, Rule::dimension) {
        dimensions.push(parse_width_opt(&mut dimension.children())?);
    }
    expect(&mut children, Rule::EOI)?;
    Ok(TypeString { base: base_name, width, dimensions })
}

fn declaration_error(code: ErrorCode, path: &str, message: impl Into<String>) -> Error {
    Error::Declaration { code, path: path.to_owned(), message: message.into() }
}

fn check_size(path: &str, size: Option<usize>, bits: usize) -> Result<(), Error> {
    match size {
        Some(size) if size != bits => Err(declaration_error(
            ErrorCode::SizeMismatch,
            path,
            format!("declared size {size} does not match the type width {bits}"),
        )),
        _ => Ok(()),
    }
}

fn parse_integer_bits(
    path: &str,
    decl: &ast::Declaration,
    width: Option<usize>,
) -> Result<usize, Error> {
    let bits = match width {
        Some(bits) => {
            check_size(path, decl.size, bits)?;
            bits
        }
        None => decl.size.unwrap_or(256),
    };
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(declaration_error(
            ErrorCode::UnsupportedWidth,
            path,
            format!("unsupported integer width {bits}, expected a multiple of 8 up to 256"),
        ));
    }
    Ok(bits / 8)
}

fn parse_base(path: &str, decl: &ast::Declaration, ts: &TypeString) -> Result<ast::Type, Error> {
    let no_width = |ty: ast::Type| match ts.width {
        Some(_) => Err(declaration_error(
            ErrorCode::UnknownType,
            path,
            format!("unknown type `{}`", decl.type_),
        )),
        None => Ok(ty),
    };
    let primitive = match ts.base.as_str() {
        "uint" => ast::Primitive::Uint { width: parse_integer_bits(path, decl, ts.width)? },
        "int" => ast::Primitive::Int { width: parse_integer_bits(path, decl, ts.width)? },
        "bytes" => match ts.width {
            Some(width) if (1..=32).contains(&width) => {
                check_size(path, decl.size, 8 * width)?;
                ast::Primitive::FixedBytes { width }
            }
            Some(width) => {
                return Err(declaration_error(
                    ErrorCode::UnsupportedByteWidth,
                    path,
                    format!("unsupported byte array width {width}, expected a value in 1..=32"),
                ))
            }
            None => ast::Primitive::Bytes,
        },
        "bool" => {
            check_size(path, decl.size, 8)?;
            return no_width(ast::Type::Primitive(ast::Primitive::Bool));
        }
        "address" => {
            check_size(path, decl.size, 160)?;
            return no_width(ast::Type::Primitive(ast::Primitive::Address));
        }
        "string" => return no_width(ast::Type::Primitive(ast::Primitive::String)),
        "none" => return no_width(ast::Type::Primitive(ast::Primitive::None)),
        "tuple" => return no_width(ast::Type::Tuple(parse_components(path, decl)?)),
        "union" => return no_width(ast::Type::Union(parse_components(path, decl)?)),
        _ => {
            return Err(declaration_error(
                ErrorCode::UnknownType,
                path,
                format!("unknown type `{}`", decl.type_),
            ))
        }
    };
    Ok(ast::Type::Primitive(primitive))
}

fn parse_components(path: &str, decl: &ast::Declaration) -> Result<Vec<ast::Field>, Error> {
    let components = decl.components.as_ref().ok_or_else(|| {
        declaration_error(
            ErrorCode::MissingComponents,
            path,
            format!("`{}` declarations require components", decl.type_),
        )
    })?;
    components.iter().map(|component| parse_field(component, Some(path))).collect()
}

fn parse_field(decl: &ast::Declaration, parent: Option<&str>) -> Result<ast::Field, Error> {
    let path = match parent {
        Some(parent) => format!("{parent}.{}", decl.name),
        None => decl.name.clone(),
    };
    let ts = parse_type_string(&decl.type_)
        .map_err(|message| declaration_error(ErrorCode::InvalidTypeString, &path, message))?;

    let composite = matches!(ts.base.as_str(), "tuple" | "union");
    if !composite && decl.components.as_ref().is_some_and(|components| !components.is_empty()) {
        return Err(declaration_error(
            ErrorCode::UnexpectedComponents,
            &path,
            format!("`{}` declarations cannot have components", decl.type_),
        ));
    }

    let mut ty = parse_base(&path, decl, &ts)?;
    for dimension in &ts.dimensions {
        ty = match dimension {
            Some(0) => {
                return Err(declaration_error(
                    ErrorCode::ZeroLengthVector,
                    &path,
                    "fixed arrays must have at least one element",
                ))
            }
            Some(length) => ast::Type::Vector { element: Box::new(ty), length: *length },
            None => ast::Type::List { element: Box::new(ty) },
        };
    }

    Ok(ast::Field { name: decl.name.clone(), type_string: decl.type_.clone(), ty })
}

/// Parse a field declaration tree into the typed field representation.
pub fn parse_declaration(decl: &ast::Declaration) -> Result<ast::Field, Error> {
    parse_field(decl, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Declaration, Primitive, Type};

    #[test]
    fn test_parse_type_string() {
        assert_eq!(
            parse_type_string("uint8").unwrap(),
            TypeString { base: "uint".to_owned(), width: Some(8), dimensions: vec![] }
        );
        assert_eq!(
            parse_type_string("tuple[2][]").unwrap(),
            TypeString { base: "tuple".to_owned(), width: None, dimensions: vec![Some(2), None] }
        );
        assert!(parse_type_string("uint8[").is_err());
        assert!(parse_type_string("uint 8").is_err());
        assert!(parse_type_string("").is_err());
    }

    #[test]
    fn test_dimensions_nest_last_outermost() {
        let field = parse_declaration(&Declaration::new("x", "uint16[3][]")).unwrap();
        assert_eq!(
            field.ty,
            Type::List {
                element: Box::new(Type::Vector {
                    element: Box::new(Type::Primitive(Primitive::Uint { width: 2 })),
                    length: 3,
                })
            }
        );
    }

    #[test]
    fn test_widths() {
        let ty = |decl: Declaration| parse_declaration(&decl).map(|field| field.ty);
        assert_eq!(
            ty(Declaration::new("x", "uint")).unwrap(),
            Type::Primitive(Primitive::Uint { width: 32 })
        );
        assert_eq!(
            ty(Declaration::new("x", "int").with_size(24)).unwrap(),
            Type::Primitive(Primitive::Int { width: 3 })
        );
        assert_eq!(
            ty(Declaration::new("x", "bytes4")).unwrap(),
            Type::Primitive(Primitive::FixedBytes { width: 4 })
        );
        assert_eq!(ty(Declaration::new("x", "bytes")).unwrap(), Type::Primitive(Primitive::Bytes));
        assert_eq!(
            ty(Declaration::new("x", "bool").with_size(8)).unwrap(),
            Type::Primitive(Primitive::Bool)
        );
    }

    #[test]
    fn test_declaration_errors() {
        let code = |decl: Declaration| parse_declaration(&decl).unwrap_err().code();
        assert_eq!(code(Declaration::new("x", "uint7")), ErrorCode::UnsupportedWidth);
        assert_eq!(code(Declaration::new("x", "uint264")), ErrorCode::UnsupportedWidth);
        assert_eq!(code(Declaration::new("x", "bytes33")), ErrorCode::UnsupportedByteWidth);
        assert_eq!(code(Declaration::new("x", "uint8").with_size(16)), ErrorCode::SizeMismatch);
        assert_eq!(code(Declaration::new("x", "address").with_size(8)), ErrorCode::SizeMismatch);
        assert_eq!(code(Declaration::new("x", "float")), ErrorCode::UnknownType);
        assert_eq!(code(Declaration::new("x", "string8")), ErrorCode::UnknownType);
        assert_eq!(code(Declaration::new("x", "tuple")), ErrorCode::MissingComponents);
        assert_eq!(code(Declaration::new("x", "uint8[0]")), ErrorCode::ZeroLengthVector);
        assert_eq!(code(Declaration::new("x", "uint8]")), ErrorCode::InvalidTypeString);
        assert_eq!(
            code(
                Declaration::new("x", "uint8")
                    .with_components(vec![Declaration::new("y", "bool")])
            ),
            ErrorCode::UnexpectedComponents
        );
    }

    #[test]
    fn test_error_path() {
        let decl = Declaration::new("Test", "tuple")
            .with_components(vec![Declaration::new("inner", "tuple")
                .with_components(vec![Declaration::new("bad", "uint9")])]);
        let Error::Declaration { path, .. } = parse_declaration(&decl).unwrap_err() else {
            panic!("expected a declaration error")
        };
        assert_eq!(path, "Test.inner.bad");
    }
}
