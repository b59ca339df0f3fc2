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

//! Packed decoder generator.
//!
//! The decoder keeps the current blob word in `word`, loaded from
//! `data + shift`. Fixed size fields are extracted from the word with
//! shifts computed at generation time; the word is reloaded whenever
//! the next field does not fit. Dynamic data always ends the current
//! window: decoding resumes with a fresh word after it.

use std::collections::BTreeMap;
use tracing::trace;

use crate::analyzer::{Compiled, Error, Schema, SchemaKind};
use crate::ast::Primitive;
use crate::backends::common::alignment::WordAligner;
use crate::backends::common::memory::{self, word_at, WORD_SIZE};
use crate::backends::common::Dest;
use crate::backends::{GenerateOptions, Generated};
use crate::ir::{add, div, gt, lt, mload, shl, shr, Expr, Ident, Routine, Scopes, Stmt, Unit};

/// Name of the main generation unit.
pub const MAIN_UNIT: &str = "PackedDecoder";

const WORD_BITS: usize = 8 * WORD_SIZE;

struct Generator<'a> {
    options: &'a GenerateOptions,
    data: Ident,
    shift: Ident,
    word: Ident,
    scopes: Scopes,
    aligner: WordAligner,
}

impl<'a> Generator<'a> {
    fn new(options: &'a GenerateOptions) -> Self {
        Generator {
            options,
            data: Ident::new("data"),
            shift: Ident::new("shift"),
            word: Ident::new("word"),
            scopes: Scopes::default(),
            aligner: WordAligner::new(WORD_BITS),
        }
    }

    fn prologue(&self, lines: &mut Vec<Stmt>) {
        lines.push(Stmt::Let(self.shift.clone(), Expr::Lit(WORD_SIZE + self.options.prefix_size)));
        lines.push(Stmt::Let(self.word.clone(), mload(add(&self.data, &self.shift))));
    }

    /// Advance the window by `advance` bytes and load the next word.
    fn reload(&self, advance: impl Into<Expr>, lines: &mut Vec<Stmt>) {
        lines.push(Stmt::Assign(self.shift.clone(), add(&self.shift, advance)));
        lines.push(Stmt::Assign(self.word.clone(), mload(add(&self.data, &self.shift))));
    }

    /// Close the current window, moving to the first unread byte.
    fn flush(&mut self, lines: &mut Vec<Stmt>) {
        if let Some(consumed) = self.aligner.flush() {
            self.reload(consumed, lines);
        }
    }

    /// Current word shifted left by `bit_offset` bits.
    fn window(&self, bit_offset: impl Into<Expr>) -> Expr {
        match bit_offset.into() {
            Expr::Lit(0) => (&self.word).into(),
            bit_offset => shl(bit_offset, &self.word),
        }
    }

    /// Place a field of `width` bits in the window, reloading the word
    /// if needed. Returns the bit offset of the field.
    fn place(&mut self, width: usize, lines: &mut Vec<Stmt>) -> usize {
        let placement = self.aligner.add_field(width);
        if let Some(advance) = placement.reload {
            self.reload(advance, lines);
        }
        placement.bit_offset
    }

    /// Read a 4-byte big-endian length or count into a fresh variable.
    /// Returns the variable and the byte offset following the length,
    /// relative to `shift`.
    fn read_length(&mut self, hint: &str, lines: &mut Vec<Stmt>) -> (Ident, usize) {
        let bit_offset = self.place(32, lines);
        let length = self.scopes.fresh(hint);
        lines.push(Stmt::Let(length.clone(), shr(224, self.window(bit_offset))));
        (length, bit_offset / 8 + 4)
    }

    fn generate(
        &mut self,
        schema: &Schema,
        dest: Dest,
        lines: &mut Vec<Stmt>,
    ) -> Result<(), Error> {
        trace!(name = %schema.name, type_name = schema.type_name(), "packed node");
        match &schema.kind {
            SchemaKind::Primitive { primitive } if primitive.is_dynamic() => {
                self.generate_bytes(dest, lines);
                Ok(())
            }
            SchemaKind::Primitive { primitive } => {
                self.generate_primitive(primitive, dest, lines);
                Ok(())
            }
            SchemaKind::Container(container) => {
                let mut body = vec![Stmt::Comment(format!("container {}", schema.name))];
                let record: Expr = match dest {
                    Dest::Record(addr) => addr,
                    Dest::Slot(addr) => {
                        let words = Expr::Lit(container.fields.len());
                        let record = memory::alloc(&mut body, &mut self.scopes, "record", words);
                        body.push(Stmt::MStore(addr, (&record).into()));
                        record.into()
                    }
                };
                for (index, field) in container.fields.iter().enumerate() {
                    self.generate(field, Dest::Slot(word_at(record.clone(), index)), &mut body)?;
                }
                lines.push(Stmt::Block(body));
                Ok(())
            }
            SchemaKind::Vector { element, length } => {
                self.generate_array(schema, element, Some(*length), dest, lines)
            }
            SchemaKind::List { element } => self.generate_array(schema, element, None, dest, lines),
            SchemaKind::Union(_) => Err(unsupported_union(schema)),
        }
    }

    fn generate_primitive(&mut self, primitive: &Primitive, dest: Dest, lines: &mut Vec<Stmt>) {
        let Some(width) = primitive.fixed_size().filter(|width| *width > 0) else { return };
        let bit_offset = self.place(8 * width, lines);
        let value = memory::extract(primitive, self.window(bit_offset));
        lines.push(Stmt::MStore(dest.address().clone(), value));
    }

    fn generate_bytes(&mut self, dest: Dest, lines: &mut Vec<Stmt>) {
        let (length, skip) = self.read_length("length", lines);
        let src = add(add(&self.data, &self.shift), skip);
        let bytes = memory::decode_bytes(
            lines,
            &mut self.scopes,
            self.options.evm_version,
            src,
            (&length).into(),
        );
        lines.push(Stmt::MStore(dest.address().clone(), bytes.into()));
        self.reload(add(skip, &length), lines);
        self.aligner.reset();
    }

    fn generate_array(
        &mut self,
        schema: &Schema,
        element: &Schema,
        length: Option<usize>,
        dest: Dest,
        lines: &mut Vec<Stmt>,
    ) -> Result<(), Error> {
        let mut body = vec![Stmt::Comment(format!("array {}", schema.name))];
        let count: Expr = match length {
            Some(length) => Expr::Lit(length),
            None => {
                let (count, _) = self.read_length("count", &mut body);
                count.into()
            }
        };

        let (words, index_base) = match count.as_lit() {
            Some(count) if length.is_some() => (Expr::Lit(count), 0),
            _ => (add(count.clone(), 1), 1),
        };
        let array = memory::alloc(&mut body, &mut self.scopes, "array", words);
        if length.is_none() {
            body.push(Stmt::MStore((&array).into(), count.clone()));
        }
        body.push(Stmt::MStore(dest.address().clone(), (&array).into()));

        let i = self.scopes.fresh("i");
        let slot = match index_base {
            0 => word_at(&array, &i),
            base => word_at(&array, add(&i, base)),
        };
        let (loop_body, cursor) = match element.as_primitive() {
            Some(primitive) if !primitive.is_dynamic() => {
                let (loop_body, cursor) = self.primitive_elements(primitive, slot, &mut body);
                (loop_body, Some(cursor))
            }
            _ => {
                self.flush(&mut body);
                let mut loop_body = vec![];
                self.generate(element, Dest::Slot(slot), &mut loop_body)?;
                self.flush(&mut loop_body);
                (loop_body, None)
            }
        };
        body.push(Stmt::For {
            init: vec![Stmt::Let(i.clone(), 0.into())],
            cond: lt(&i, count),
            post: vec![Stmt::Assign(i.clone(), add(&i, 1))],
            body: loop_body,
        });
        if let Some(cursor) = cursor {
            self.reload(div(&cursor, 8), &mut body);
        }
        lines.push(Stmt::Block(body));
        Ok(())
    }

    /// Loop body decoding one primitive element into `slot`.
    ///
    /// Elements need not tile the word evenly, so the bit offset is
    /// tracked at run time by a cursor variable, returned along with
    /// the loop body. The word is reloaded when the next element would
    /// cross the word boundary.
    fn primitive_elements(
        &mut self,
        primitive: &Primitive,
        slot: Expr,
        lines: &mut Vec<Stmt>,
    ) -> (Vec<Stmt>, Ident) {
        let width = 8 * primitive.fixed_size().unwrap_or(WORD_SIZE);
        let cursor = self.scopes.fresh("bit_offset");
        lines.push(Stmt::Let(cursor.clone(), Expr::Lit(self.aligner.width())));
        self.aligner.reset();

        let loop_body = vec![
            Stmt::If(
                gt(add(&cursor, width), WORD_BITS),
                vec![
                    Stmt::Assign(self.shift.clone(), add(&self.shift, div(&cursor, 8))),
                    Stmt::Assign(self.word.clone(), mload(add(&self.data, &self.shift))),
                    Stmt::Assign(cursor.clone(), 0.into()),
                ],
            ),
            Stmt::MStore(slot, memory::extract(primitive, self.window(&cursor))),
            Stmt::Assign(cursor.clone(), add(&cursor, width)),
        ];
        (loop_body, cursor)
    }
}

/// Generate the main unit of a packed decoder.
pub fn generate(
    compiled: &Compiled,
    root: &str,
    options: &GenerateOptions,
) -> Result<Generated, Error> {
    options.validate(root)?;
    if let Some(union) = compiled.unions.first() {
        return Err(unsupported_union(union));
    }
    let mut generator = Generator::new(options);
    let schema = compiled.root();
    let root = Ident::new(root);
    let dest = match schema.kind {
        SchemaKind::Container(_) => Dest::Record((&root).into()),
        _ => Dest::Slot((&root).into()),
    };
    let mut body = vec![];
    generator.prologue(&mut body);
    generator.generate(schema, dest, &mut body)?;
    let decode =
        Routine { name: "decode".to_owned(), params: vec![generator.data.clone(), root], body };
    Ok(Generated {
        main: Unit { name: MAIN_UNIT.to_owned(), routines: vec![decode] },
        units: BTreeMap::new(),
    })
}

fn unsupported_union(schema: &Schema) -> Error {
    Error::UnsupportedShape {
        path: schema.name.clone(),
        message: "unions cannot be decoded from the packed encoding".to_owned(),
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::compile;
    use crate::ast::Declaration;

    fn generate_decl(decl: &Declaration) -> Result<Generated, Error> {
        generate(&compile(decl)?, "_test", &GenerateOptions::default())
    }

    fn word_reloads(generated: &Generated) -> usize {
        let word = Ident::new("word");
        let mut reloads = 0;
        for stmt in &generated.main.routines[0].body {
            stmt.walk(&mut |stmt| {
                if matches!(stmt, Stmt::Assign(ident, _) if *ident == word) {
                    reloads += 1
                }
            });
        }
        reloads
    }

    fn pairs(count: usize) -> Declaration {
        let mut components = vec![];
        for index in 0..count {
            components.push(Declaration::new(&format!("a{index}"), "bool"));
            components.push(Declaration::new(&format!("b{index}"), "uint16"));
        }
        Declaration::new("Test", "tuple").with_components(components)
    }

    #[test]
    fn test_reload_per_word_boundary() {
        // 10 pairs fill 30 bytes, 11 pairs straddle the first word.
        assert_eq!(word_reloads(&generate_decl(&pairs(10)).unwrap()), 0);
        assert_eq!(word_reloads(&generate_decl(&pairs(11)).unwrap()), 1);
        assert_eq!(word_reloads(&generate_decl(&pairs(22)).unwrap()), 2);
    }

    #[test]
    fn test_field_shifts() {
        let generated = generate_decl(&pairs(1)).unwrap();
        let body = &generated.main.routines[0].body;
        let Stmt::Block(block) = &body[2] else { panic!("expected a block") };
        let root = Expr::Var(Ident::new("_test"));
        let word = Expr::Var(Ident::new("word"));
        assert_eq!(block[1], Stmt::MStore(root.clone(), shr(248, word.clone())));
        assert_eq!(block[2], Stmt::MStore(add(root, 32), shr(240, shl(8, word))));
    }

    #[test]
    fn test_bytes_resets_window() {
        let generated = generate_decl(&Declaration::new("Test", "tuple").with_components(vec![
            Declaration::new("a", "uint8"),
            Declaration::new("name", "string"),
            Declaration::new("b", "uint8"),
        ]))
        .unwrap();
        let body = &generated.main.routines[0].body;
        let Stmt::Block(block) = &body[2] else { panic!("expected a block") };
        let word = Expr::Var(Ident::new("word"));
        // The field following the string is read from the start of the reloaded word.
        assert_eq!(
            block.last(),
            Some(&Stmt::MStore(add(Expr::Var(Ident::new("_test")), 64), shr(248, word)))
        );
        assert_eq!(word_reloads(&generated), 1);
    }

    #[test]
    fn test_primitive_array_checks_word_boundary() {
        let generated = generate_decl(&Declaration::new("values", "uint24[]")).unwrap();
        let mut checks = 0;
        for stmt in &generated.main.routines[0].body {
            stmt.walk(&mut |stmt| {
                let boundary = gt(add(Ident::new("bit_offset_4"), 24), 256);
                if matches!(stmt, Stmt::If(cond, _) if *cond == boundary) {
                    checks += 1
                }
            });
        }
        assert_eq!(checks, 1);
    }

    #[test]
    fn test_prefix_shifts_start() {
        let compiled = compile(&Declaration::new("value", "uint8")).unwrap();
        let options = GenerateOptions { prefix_size: 4, ..Default::default() };
        let generated = generate(&compiled, "_value", &options).unwrap();
        assert_eq!(
            generated.main.routines[0].body[0],
            Stmt::Let(Ident::new("shift"), Expr::Lit(36))
        );
    }

    #[test]
    fn test_unions_rejected() {
        let decl = Declaration::new("Test", "tuple").with_components(vec![Declaration::new(
            "choice", "union",
        )
        .with_components(vec![Declaration::new("a", "uint8")])]);
        assert!(matches!(generate_decl(&decl), Err(Error::UnsupportedShape { .. })));
    }
}
