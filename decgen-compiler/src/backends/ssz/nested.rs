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

//! Arrays of variable size elements.
//!
//! The elements are preceded by a table of little-endian offsets
//! relative to the start of the array. The first offset is also the
//! size of the table, which gives the element count of lists.

use super::{Generator, Step};
use crate::analyzer::{Error, Schema, OFFSET_SIZE};
use crate::backends::common::memory::{self, word_at};
use crate::backends::common::Dest;
use crate::ir::{add, div, gt, lt, mload, mul, Expr, Stmt};
use crate::offsets::{add_offsets, load_u32, read_offset, swap_endianness_32, BytesRange, Offset};

pub(super) fn generate(
    generator: &mut Generator,
    schema: &Schema,
    element: &Schema,
    length: Option<usize>,
    dest: Dest,
    range: BytesRange,
    lines: &mut Vec<Stmt>,
) -> Result<(), Error> {
    let mut body = vec![Stmt::Comment(format!("array {}", schema.name))];
    let data = generator.data.clone();
    let start = range.start.to_expr();
    let first = generator.scopes.fresh("first");

    let count: Expr = match length {
        None => {
            // An empty range holds an empty list.
            let count = generator.scopes.fresh("count");
            body.push(Stmt::Let(count.clone(), 0.into()));
            body.push(Stmt::Let(first.clone(), 0.into()));
            body.push(Stmt::If(
                gt(range.end.to_expr(), start.clone()),
                vec![
                    Stmt::Assign(first.clone(), load_u32(&data, start.clone())),
                    swap_endianness_32(&first),
                    Stmt::Assign(count.clone(), div(&first, OFFSET_SIZE)),
                ],
            ));
            count.into()
        }
        Some(length) => {
            body.push(Stmt::Let(first.clone(), load_u32(&data, start.clone())));
            body.push(swap_endianness_32(&first));
            Expr::Lit(length)
        }
    };
    let first = add_offsets(Some(&mut body), Offset::from(&first), range.start.clone());

    // Absolute element boundaries, terminated by the end of the array.
    let words = match count.as_lit() {
        Some(count) => Expr::Lit(count + 1),
        None => add(count.clone(), 1),
    };
    let table = memory::alloc(&mut body, &mut generator.scopes, "table", words);
    body.push(Stmt::MStore((&table).into(), first.into()));

    let i = generator.scopes.fresh("i");
    let mut read_body = vec![];
    let offset = read_offset(
        &mut read_body,
        &mut generator.scopes,
        &data,
        "offset",
        add(start.clone(), mul(&i, OFFSET_SIZE)),
    );
    let offset = add_offsets(Some(&mut read_body), Offset::from(&offset), range.start.clone());
    read_body.push(Stmt::MStore(word_at(&table, &i), offset.into()));
    body.push(Stmt::For {
        init: vec![Stmt::Let(i.clone(), 1.into())],
        cond: lt(&i, count.clone()),
        post: vec![Stmt::Assign(i.clone(), add(&i, 1))],
        body: read_body,
    });
    body.push(Stmt::MStore(word_at(&table, count.clone()), range.end.to_expr()));

    let array = generator.array_region(schema, length, &count, &dest, &mut body);

    let j = generator.scopes.fresh("j");
    let element_start = generator.scopes.fresh("start");
    let element_end = generator.scopes.fresh("end");
    let mut loop_body = vec![
        Stmt::Let(element_start.clone(), mload(word_at(&table, &j))),
        Stmt::Let(element_end.clone(), mload(word_at(&table, add(&j, 1)))),
    ];
    generator.path.push(match length {
        Some(length) => Step::Vector(length),
        None => Step::List,
    });
    generator.generate(
        element,
        Dest::Slot(Generator::element_slot(&array, length, &j)),
        BytesRange { start: Offset::from(&element_start), end: Offset::from(&element_end) },
        &mut loop_body,
    )?;
    generator.path.pop();
    body.push(Stmt::For {
        init: vec![Stmt::Let(j.clone(), 0.into())],
        cond: lt(&j, count),
        post: vec![Stmt::Assign(j.clone(), add(&j, 1))],
        body: loop_body,
    });

    lines.push(Stmt::Block(body));
    Ok(())
}
