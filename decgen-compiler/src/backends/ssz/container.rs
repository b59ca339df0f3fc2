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

use super::{Generator, Step};
use crate::analyzer::{Container, Error, Schema};
use crate::backends::common::memory::{self, word_at};
use crate::backends::common::Dest;
use crate::ir::{mload, Expr, Stmt};
use crate::offsets::{add_offsets, read_offset, BytesRange, Offset};

/// Resolve the byte ranges of the fields of a container spanning `range`.
///
/// The offsets of the variable size fields are read from the blob and
/// made absolute. The end of each variable size field is the start of
/// the next one, or the end of the container.
fn field_ranges(
    generator: &mut Generator,
    schema: &Schema,
    container: &Container,
    range: &BytesRange,
    lines: &mut Vec<Stmt>,
) -> Result<Vec<BytesRange>, Error> {
    let mut offsets = Vec::with_capacity(container.variable_offsets_position.len() + 1);
    for position in &container.variable_offsets_position {
        let at = add_offsets(None, range.start.clone(), Offset::Const(*position));
        let offset = read_offset(lines, &mut generator.scopes, &generator.data, "offset", at);
        offsets.push(add_offsets(Some(lines), Offset::from(&offset), range.start.clone()));
    }
    offsets.push(range.end.clone());

    let mut fixed_ranges = container.field_ranges_fixed_len.iter();
    let mut variable = offsets.windows(2);
    let mut ranges = Vec::with_capacity(container.fields.len());
    for is_fixed_len in &container.is_fixed_len {
        let range = if *is_fixed_len {
            fixed_ranges.next().map(|fixed| BytesRange {
                start: add_offsets(None, range.start.clone(), Offset::Const(fixed.start)),
                end: add_offsets(None, range.start.clone(), Offset::Const(fixed.end)),
            })
        } else {
            variable
                .next()
                .map(|window| BytesRange { start: window[0].clone(), end: window[1].clone() })
        };
        ranges.push(range.ok_or_else(|| Error::UnsupportedShape {
            path: schema.name.clone(),
            message: "inconsistent container layout".to_owned(),
        })?);
    }
    Ok(ranges)
}

pub(super) fn generate(
    generator: &mut Generator,
    schema: &Schema,
    container: &Container,
    dest: Dest,
    range: BytesRange,
    lines: &mut Vec<Stmt>,
) -> Result<(), Error> {
    let mut body = vec![Stmt::Comment(format!("container {}", schema.name))];
    let ranges = field_ranges(generator, schema, container, &range, &mut body)?;

    let record: Expr = match dest {
        Dest::Record(addr) => addr,
        Dest::Slot(addr) if schema.is_nested => {
            let words = Expr::Lit(container.fields.len());
            let record = memory::alloc(&mut body, &mut generator.scopes, "record", words);
            body.push(Stmt::MStore(addr, (&record).into()));
            record.into()
        }
        Dest::Slot(addr) => {
            // The record is allocated by the caller.
            let record = generator.scopes.fresh("record");
            body.push(Stmt::Let(record.clone(), mload(addr)));
            record.into()
        }
    };

    for (index, (field, range)) in container.fields.iter().zip(ranges).enumerate() {
        generator.path.push(Step::Field(index));
        generator.generate(field, Dest::Slot(word_at(record.clone(), index)), range, &mut body)?;
        generator.path.pop();
    }

    lines.push(Stmt::Block(body));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::compile;
    use crate::ast::Declaration;
    use crate::backends::GenerateOptions;
    use crate::ir::{add, Ident};

    #[test]
    fn test_offsets_are_absolute() {
        let options = GenerateOptions::default();
        let mut generator = Generator::new(&options);
        let compiled = compile(&Declaration::new("Test", "tuple").with_components(vec![
            Declaration::new("a", "string"),
            Declaration::new("b", "uint8"),
            Declaration::new("c", "bytes"),
        ]))
        .unwrap();
        let crate::analyzer::SchemaKind::Container(container) = &compiled.root().kind else {
            panic!("expected a container")
        };
        let range = BytesRange {
            start: Offset::Const(32),
            end: Offset::Sym(Expr::Var(Ident::new("end"))),
        };
        let mut lines = vec![];
        let ranges =
            field_ranges(&mut generator, compiled.root(), container, &range, &mut lines).unwrap();

        let a = Ident::new("offset_1");
        let c = Ident::new("offset_2");
        assert_eq!(ranges[0], BytesRange { start: Offset::from(&a), end: Offset::from(&c) });
        assert_eq!(ranges[1], BytesRange { start: Offset::Const(36), end: Offset::Const(37) });
        assert_eq!(ranges[2].start, Offset::from(&c));
        assert_eq!(ranges[2].end, range.end);
        // read, swap, absolutize for each offset.
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[2], Stmt::Assign(a.clone(), add(&a, 32)));
    }
}
