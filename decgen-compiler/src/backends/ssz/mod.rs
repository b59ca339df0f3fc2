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

//! SSZ decoder generator.
//!
//! The blob is passed as a memory byte string `data`, so byte `b` of
//! the blob is found at address `data + 32 + b`. Ranges handled by the
//! generator are absolute offsets from `data`.
//!
//! Union branches are decoded by separate units. The routine owning a
//! union field first copies the union payload, selector included, then
//! dispatches on the selector once the whole value has been decoded.

use std::collections::{BTreeMap, HashSet};
use tracing::trace;

use crate::analyzer::{Compiled, Error, Schema, SchemaKind, Union};
use crate::ast::Primitive;
use crate::backends::common::memory::{self, word_at, WORD_SIZE};
use crate::backends::common::Dest;
use crate::backends::{GenerateOptions, Generated};
use crate::ir::{add, div, lt, mload, mul, shr, sub, Expr, Ident, Routine, Scopes, Stmt, Unit};
use crate::offsets::{add_offsets, BytesRange, Offset};

mod container;
mod dispatch;
mod nested;

/// Name of the main generation unit.
pub const MAIN_UNIT: &str = "SSZDecoder";

/// Step from a routine's root value towards a nested value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Field(usize),
    List,
    Vector(usize),
}

/// Branch of a union dispatch.
#[derive(Debug, Clone)]
struct Branch {
    selector: usize,
    /// Decode routine of the branch, absent for the `none` branch.
    routine: Option<String>,
}

/// Location of a union field decoded by the current routine.
#[derive(Debug, Clone)]
struct UnionSite {
    path: Vec<Step>,
    unit: String,
    branches: Vec<Branch>,
}

/// Name of the unit decoding the branches of a union.
pub fn unit_name(union: &Union) -> String {
    format!("SSZ_{}", union.contract_name)
}

/// Names of the routines decoding the branches of a union, in
/// selector order. Branch names which sanitize to the same identifier
/// get a numeric suffix.
pub fn branch_routines(union: &Union) -> Vec<String> {
    let mut taken = HashSet::new();
    union
        .branches
        .iter()
        .map(|branch| {
            let name: String = branch
                .name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect();
            let base = format!("decode_{name}");
            let mut routine = base.clone();
            let mut count = 1;
            while !taken.insert(routine.clone()) {
                count += 1;
                routine = format!("{base}_{count}");
            }
            routine
        })
        .collect()
}

pub(crate) struct Generator<'a> {
    options: &'a GenerateOptions,
    data: Ident,
    scopes: Scopes,
    path: Vec<Step>,
    sites: Vec<UnionSite>,
}

/// Length of a byte range.
fn range_len(range: &BytesRange) -> Expr {
    match (&range.start, &range.end) {
        (Offset::Const(start), Offset::Const(end)) => Expr::Lit(end.saturating_sub(*start)),
        (start, end) => sub(end, start),
    }
}

impl<'a> Generator<'a> {
    fn new(options: &'a GenerateOptions) -> Self {
        Generator {
            options,
            data: Ident::new("data"),
            scopes: Scopes::default(),
            path: vec![],
            sites: vec![],
        }
    }

    /// Address of byte `offset` of the blob.
    fn blob_address(&self, offset: &Offset) -> Expr {
        add(&self.data, offset)
    }

    fn routine(
        &mut self,
        name: String,
        root: Ident,
        schema: &Schema,
        dest: Dest,
        range: BytesRange,
        mut body: Vec<Stmt>,
    ) -> Result<Routine, Error> {
        self.path.clear();
        self.sites.clear();
        self.generate(schema, dest.clone(), range, &mut body)?;
        let sites = std::mem::take(&mut self.sites);
        dispatch::generate(self, &dest, &sites, &mut body)?;
        trace!(routine = %name, sites = sites.len(), "generated routine");
        Ok(Routine { name, params: vec![self.data.clone(), root], body })
    }

    fn generate(
        &mut self,
        schema: &Schema,
        dest: Dest,
        range: BytesRange,
        lines: &mut Vec<Stmt>,
    ) -> Result<(), Error> {
        match &schema.kind {
            SchemaKind::Primitive { primitive } => {
                self.generate_primitive(primitive, dest, range, lines);
                Ok(())
            }
            SchemaKind::Container(container) => {
                container::generate(self, schema, container, dest, range, lines)
            }
            SchemaKind::Vector { element, length } => {
                self.generate_array(schema, element, Some(*length), dest, range, lines)
            }
            SchemaKind::List { element } => {
                self.generate_array(schema, element, None, dest, range, lines)
            }
            SchemaKind::Union(union) => {
                self.generate_union(schema, union, dest, range, lines);
                Ok(())
            }
        }
    }

    fn generate_primitive(
        &mut self,
        primitive: &Primitive,
        dest: Dest,
        range: BytesRange,
        lines: &mut Vec<Stmt>,
    ) {
        match primitive {
            Primitive::None => (),
            Primitive::Bytes | Primitive::String => {
                let src = self.blob_address(&range.start);
                let bytes = memory::decode_bytes(
                    lines,
                    &mut self.scopes,
                    self.options.evm_version,
                    src,
                    range_len(&range),
                );
                lines.push(Stmt::MStore(dest.address().clone(), bytes.into()));
            }
            _ => {
                let word = mload(self.blob_address(&range.start));
                lines.push(Stmt::MStore(dest.address().clone(), memory::extract(primitive, word)));
            }
        }
    }

    fn generate_union(
        &mut self,
        schema: &Schema,
        union: &Union,
        dest: Dest,
        range: BytesRange,
        lines: &mut Vec<Stmt>,
    ) {
        let unit = unit_name(union);
        lines.push(Stmt::Comment(format!("union {}, dispatched to {unit}", schema.name)));
        self.generate_primitive(&Primitive::Bytes, dest, range, lines);
        let branches = union
            .branches
            .iter()
            .zip(branch_routines(union))
            .enumerate()
            .map(|(selector, (branch, routine))| Branch {
                selector,
                routine: (branch.as_primitive() != Some(&Primitive::None)).then_some(routine),
            })
            .collect();
        self.sites.push(UnionSite { path: self.path.clone(), unit, branches });
    }

    /// Resolve the memory region receiving the elements of an array.
    fn array_region(
        &mut self,
        schema: &Schema,
        length: Option<usize>,
        count: &Expr,
        dest: &Dest,
        lines: &mut Vec<Stmt>,
    ) -> Ident {
        let addr = dest.address().clone();
        match length {
            None => {
                let words = match count.as_lit() {
                    Some(count) => Expr::Lit(count + 1),
                    None => add(count.clone(), 1),
                };
                let array = memory::alloc(lines, &mut self.scopes, "array", words);
                lines.push(Stmt::MStore((&array).into(), count.clone()));
                lines.push(Stmt::MStore(addr, (&array).into()));
                array
            }
            Some(length) if schema.is_nested => {
                let array = memory::alloc(lines, &mut self.scopes, "array", Expr::Lit(length));
                lines.push(Stmt::MStore(addr, (&array).into()));
                array
            }
            Some(_) => {
                let array = self.scopes.fresh("array");
                lines.push(Stmt::Let(array.clone(), mload(addr)));
                array
            }
        }
    }

    /// Address of the slot of element `index` of an array region.
    fn element_slot(array: &Ident, length: Option<usize>, index: &Ident) -> Expr {
        match length {
            None => word_at(array, add(index, 1)),
            Some(_) => word_at(array, index),
        }
    }

    fn generate_array(
        &mut self,
        schema: &Schema,
        element: &Schema,
        length: Option<usize>,
        dest: Dest,
        range: BytesRange,
        lines: &mut Vec<Stmt>,
    ) -> Result<(), Error> {
        let Some(size) = element.fixed_size else {
            return nested::generate(self, schema, element, length, dest, range, lines);
        };
        if size == 0 {
            return Err(Error::UnsupportedShape {
                path: schema.name.clone(),
                message: "arrays of zero sized elements cannot be decoded".to_owned(),
            });
        }

        let mut body = vec![Stmt::Comment(format!("array {}", schema.name))];
        let count = match (length, range_len(&range)) {
            (Some(length), _) => Expr::Lit(length),
            (None, Expr::Lit(len)) => Expr::Lit(len / size),
            (None, len) => {
                let count = self.scopes.fresh("count");
                body.push(Stmt::Let(count.clone(), div(len, size)));
                count.into()
            }
        };
        let array = self.array_region(schema, length, &count, &dest, &mut body);

        let i = self.scopes.fresh("i");
        let start = self.scopes.fresh("start");
        let element_start =
            add_offsets(None, range.start.clone(), Offset::Sym(mul(&i, size)));
        let mut loop_body = vec![Stmt::Let(start.clone(), element_start.into())];
        let element_range =
            BytesRange { start: Offset::from(&start), end: Offset::Sym(add(&start, size)) };
        self.path.push(match length {
            Some(length) => Step::Vector(length),
            None => Step::List,
        });
        self.generate(
            element,
            Dest::Slot(Self::element_slot(&array, length, &i)),
            element_range,
            &mut loop_body,
        )?;
        self.path.pop();

        body.push(Stmt::For {
            init: vec![Stmt::Let(i.clone(), 0.into())],
            cond: lt(&i, count),
            post: vec![Stmt::Assign(i.clone(), add(&i, 1))],
            body: loop_body,
        });
        lines.push(Stmt::Block(body));
        Ok(())
    }
}

/// Statements computing the root range of the main routine.
fn main_prologue(generator: &mut Generator, prefix_size: usize) -> (Vec<Stmt>, BytesRange) {
    let end = generator.scopes.fresh("end");
    let data = generator.data.clone();
    let mut lines = vec![];
    if prefix_size == 0 {
        lines.push(Stmt::Let(end.clone(), add(mload(&data), WORD_SIZE)));
    } else {
        let length = generator.scopes.fresh("data_length");
        lines.push(Stmt::Let(
            length.clone(),
            shr(8 * (WORD_SIZE - prefix_size), mload(add(&data, WORD_SIZE))),
        ));
        lines.push(Stmt::Let(end.clone(), add(&length, WORD_SIZE)));
    }
    (lines, BytesRange { start: Offset::Const(WORD_SIZE + prefix_size), end: Offset::from(&end) })
}

/// Statements computing the root range of a union branch routine.
/// The payload follows the selector byte.
fn branch_prologue(generator: &mut Generator) -> (Vec<Stmt>, BytesRange) {
    let end = generator.scopes.fresh("end");
    let lines = vec![Stmt::Let(end.clone(), add(mload(&generator.data), WORD_SIZE))];
    (lines, BytesRange { start: Offset::Const(WORD_SIZE + 1), end: Offset::from(&end) })
}

fn root_dest(schema: &Schema, root: &Ident) -> Dest {
    match schema.kind {
        SchemaKind::Container(_) => Dest::Record(root.into()),
        _ => Dest::Slot(root.into()),
    }
}

/// Generate the body of the main decode routine for a schema.
pub fn generate_lines(
    schema: &Schema,
    root: &str,
    options: &GenerateOptions,
) -> Result<Vec<Stmt>, Error> {
    options.validate(root)?;
    let mut generator = Generator::new(options);
    let root = Ident::new(root);
    let (prologue, range) = main_prologue(&mut generator, options.prefix_size);
    let routine = generator.routine(
        "decode".to_owned(),
        root.clone(),
        schema,
        root_dest(schema, &root),
        range,
        prologue,
    )?;
    Ok(routine.body)
}

/// Generate the main unit and the union branch units.
pub fn generate(
    compiled: &Compiled,
    root: &str,
    options: &GenerateOptions,
) -> Result<Generated, Error> {
    options.validate(root)?;
    let mut generator = Generator::new(options);
    let schema = compiled.root();
    let root = Ident::new(root);
    let (prologue, range) = main_prologue(&mut generator, options.prefix_size);
    let decode = generator.routine(
        "decode".to_owned(),
        root.clone(),
        schema,
        root_dest(schema, &root),
        range,
        prologue,
    )?;
    let main = Unit { name: MAIN_UNIT.to_owned(), routines: vec![decode] };

    let mut units = BTreeMap::new();
    for node in &compiled.unions {
        let SchemaKind::Union(union) = &node.kind else { continue };
        let name = unit_name(union);
        let mut routines = Vec::with_capacity(union.branches.len());
        for (branch, routine) in union.branches.iter().zip(branch_routines(union)) {
            let dest = Ident::new("dest");
            let (prologue, range) = branch_prologue(&mut generator);
            routines.push(generator.routine(
                routine,
                dest.clone(),
                branch,
                Dest::Slot(dest.into()),
                range,
                prologue,
            )?);
        }
        trace!(unit = %name, branches = routines.len(), "generated union unit");
        units.insert(name.clone(), Unit { name, routines });
    }

    Ok(Generated { main, units })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::compile;
    use crate::ast::Declaration;
    use crate::ir::Builtin;

    fn generate_decl(decl: &Declaration) -> Generated {
        generate(&compile(decl).unwrap(), "_test", &GenerateOptions::default()).unwrap()
    }

    fn statements(routine: &Routine) -> Vec<Stmt> {
        let mut stmts = vec![];
        for stmt in &routine.body {
            stmt.walk(&mut |stmt| stmts.push(stmt.clone()));
        }
        stmts
    }

    fn count_mloads(expr: &Expr) -> usize {
        match expr {
            Expr::Call(Builtin::MLoad, args) => 1 + args.iter().map(count_mloads).sum::<usize>(),
            Expr::Call(_, args) => args.iter().map(count_mloads).sum(),
            _ => 0,
        }
    }

    #[test]
    fn test_fixed_container_reads_in_place() {
        let generated = generate_decl(
            &Declaration::new("Test", "tuple").with_components(vec![
                Declaration::new("quantity", "uint8"),
                Declaration::new("active", "bool"),
            ]),
        );
        let stmts = statements(&generated.main.routines[0]);
        let root = Expr::Var(Ident::new("_test"));
        let data = Ident::new("data");
        assert!(stmts.contains(&Stmt::MStore(root.clone(), shr(248, mload(add(&data, 32))))));
        assert!(stmts.contains(&Stmt::MStore(add(root, 32), shr(248, mload(add(&data, 33))))));
        // No offset is read.
        assert!(!stmts.iter().any(|stmt| matches!(stmt, Stmt::Let(_, Expr::Call(Builtin::Shr, args))
            if args.first() == Some(&Expr::Lit(224)))));
        assert!(generated.units.is_empty());
    }

    #[test]
    fn test_variable_container_reads_offsets() {
        let generated = generate_decl(
            &Declaration::new("Test", "tuple").with_components(vec![
                Declaration::new("name", "string"),
                Declaration::new("id", "uint32"),
            ]),
        );
        let stmts = statements(&generated.main.routines[0]);
        let offset_reads = stmts
            .iter()
            .filter(|stmt| {
                matches!(stmt, Stmt::Let(_, Expr::Call(Builtin::Shr, args))
                    if args.first() == Some(&Expr::Lit(224)))
            })
            .count();
        assert_eq!(offset_reads, 1);
        assert!(stmts.iter().any(|stmt| matches!(stmt, Stmt::MCopy { .. })));
    }

    #[test]
    fn test_union_units() {
        let generated = generate_decl(
            &Declaration::new("Test", "tuple").with_components(vec![Declaration::new(
                "choice", "union",
            )
            .with_components(vec![
                Declaration::new("none", "none"),
                Declaration::new("integer", "uint32"),
            ])]),
        );
        let unit = &generated.units["SSZ_Choice"];
        let routines: Vec<_> = unit.routines.iter().map(|routine| routine.name.as_str()).collect();
        assert_eq!(routines, vec!["decode_none", "decode_integer"]);
        let stmts = statements(&generated.main.routines[0]);
        assert!(stmts.iter().any(|stmt| matches!(
            stmt,
            Stmt::Call { unit, routine, .. } if unit == "SSZ_Choice" && routine == "decode_integer"
        )));
        assert!(!stmts.iter().any(
            |stmt| matches!(stmt, Stmt::Call { routine, .. } if routine == "decode_none")
        ));
        assert!(stmts
            .iter()
            .any(|stmt| matches!(stmt, Stmt::Switch { cases, .. } if cases.len() == 2)));
    }

    #[test]
    fn test_prefix() {
        let options = GenerateOptions { prefix_size: 2, ..Default::default() };
        let lines = generate_lines(
            compile(&Declaration::new("Test", "uint16")).unwrap().root(),
            "_test",
            &options,
        )
        .unwrap();
        let data = Ident::new("data");
        assert!(lines.contains(&Stmt::MStore(
            Expr::Var(Ident::new("_test")),
            shr(240, mload(add(&data, 34)))
        )));
        assert!(matches!(&lines[0], Stmt::Let(_, expr) if count_mloads(expr) == 1));
    }

    #[test]
    fn test_branch_routine_name() {
        let compiled = compile(&Declaration::new("u", "union").with_components(vec![
            Declaration::new("my-branch", "uint8"),
        ]))
        .unwrap();
        let union = compiled.root().as_union().unwrap();
        assert_eq!(branch_routines(union), vec!["decode_my_branch"]);
        assert_eq!(unit_name(union), "SSZ_U");
    }

    #[test]
    fn test_branch_routine_names_are_unique() {
        let compiled = compile(&Declaration::new("u", "union").with_components(vec![
            Declaration::new("a-b", "uint8"),
            Declaration::new("a_b", "uint16"),
            Declaration::new("a_b_2", "uint32"),
        ]))
        .unwrap();
        let union = compiled.root().as_union().unwrap();
        assert_eq!(branch_routines(union), vec!["decode_a_b", "decode_a_b_2", "decode_a_b_2_2"]);

        let generated = generate(&compiled, "_u", &GenerateOptions::default()).unwrap();
        let routines: Vec<_> =
            generated.units["SSZ_U"].routines.iter().map(|routine| routine.name.as_str()).collect();
        assert_eq!(routines, vec!["decode_a_b", "decode_a_b_2", "decode_a_b_2_2"]);
    }
}
