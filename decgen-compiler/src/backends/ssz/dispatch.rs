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

//! Union dispatch.
//!
//! After the body of a routine has run, each union slot holds the raw
//! union payload. The dispatch code walks the decoded value down to
//! every union slot, calls the decode routine selected by the first
//! payload byte, and replaces the slot content with a pointer to the
//! pair `[selector, value]`.

use super::{Generator, Step, UnionSite};
use crate::analyzer::Error;
use crate::backends::common::memory::{self, word_at, WORD_SIZE};
use crate::backends::common::Dest;
use crate::ir::{add, lt, mload, shr, Expr, Stmt};

/// Position reached while walking towards a union slot.
enum Cursor {
    /// Address of a record.
    Record(Expr),
    /// Address of a memory word.
    Slot(Expr),
}

fn misplaced(site: &UnionSite) -> Error {
    Error::UnsupportedShape {
        path: site.unit.clone(),
        message: "union dispatch does not reach a value slot".to_owned(),
    }
}

fn walk(
    generator: &mut Generator,
    site: &UnionSite,
    path: &[Step],
    cursor: Cursor,
    lines: &mut Vec<Stmt>,
) -> Result<(), Error> {
    let Some((step, rest)) = path.split_first() else {
        return match cursor {
            Cursor::Slot(slot) => {
                select(generator, site, slot, lines);
                Ok(())
            }
            Cursor::Record(_) => Err(misplaced(site)),
        };
    };

    match (step, cursor) {
        (Step::Field(index), Cursor::Record(record)) => {
            walk(generator, site, rest, Cursor::Slot(word_at(record, *index)), lines)
        }
        (Step::Field(index), Cursor::Slot(slot)) => {
            let record = generator.scopes.fresh("record");
            lines.push(Stmt::Let(record.clone(), mload(slot)));
            walk(generator, site, rest, Cursor::Slot(word_at(&record, *index)), lines)
        }
        (Step::List | Step::Vector(_), Cursor::Slot(slot)) => {
            let length = match step {
                Step::Vector(length) => Some(*length),
                _ => None,
            };
            let array = generator.scopes.fresh("array");
            lines.push(Stmt::Let(array.clone(), mload(slot)));
            let count = match length {
                Some(length) => Expr::Lit(length),
                None => mload(&array),
            };
            let i = generator.scopes.fresh("i");
            let mut body = vec![];
            let element = Generator::element_slot(&array, length, &i);
            walk(generator, site, rest, Cursor::Slot(element), &mut body)?;
            lines.push(Stmt::For {
                init: vec![Stmt::Let(i.clone(), 0.into())],
                cond: lt(&i, count),
                post: vec![Stmt::Assign(i.clone(), add(&i, 1))],
                body,
            });
            Ok(())
        }
        (Step::List | Step::Vector(_), Cursor::Record(_)) => Err(misplaced(site)),
    }
}

/// Emit the selector switch for the union held by `slot`.
fn select(generator: &mut Generator, site: &UnionSite, slot: Expr, lines: &mut Vec<Stmt>) {
    let payload = generator.scopes.fresh("union");
    let selector = generator.scopes.fresh("selector");
    lines.push(Stmt::Let(payload.clone(), mload(slot.clone())));
    lines.push(Stmt::Let(selector.clone(), shr(248, mload(add(&payload, WORD_SIZE)))));

    let mut cases = Vec::with_capacity(site.branches.len());
    for branch in &site.branches {
        let mut case = vec![];
        let value = memory::alloc(&mut case, &mut generator.scopes, "value", Expr::Lit(2));
        case.push(Stmt::MStore((&value).into(), Expr::Lit(branch.selector)));
        match &branch.routine {
            Some(routine) => case.push(Stmt::Call {
                unit: site.unit.clone(),
                routine: routine.clone(),
                args: vec![(&payload).into(), add(&value, WORD_SIZE)],
            }),
            None => case.push(Stmt::MStore(add(&value, WORD_SIZE), 0.into())),
        }
        case.push(Stmt::MStore(slot.clone(), (&value).into()));
        cases.push((branch.selector, case));
    }
    lines.push(Stmt::Switch { on: selector.into(), cases, default: vec![Stmt::Revert] });
}

/// Append the dispatch code of the union sites of a routine whose root
/// value is written to `root`.
pub(super) fn generate(
    generator: &mut Generator,
    root: &Dest,
    sites: &[UnionSite],
    lines: &mut Vec<Stmt>,
) -> Result<(), Error> {
    for site in sites {
        let cursor = match root {
            Dest::Record(addr) => Cursor::Record(addr.clone()),
            Dest::Slot(addr) => Cursor::Slot(addr.clone()),
        };
        let mut body = vec![Stmt::Comment(format!("dispatch {}", site.unit))];
        walk(generator, site, &site.path, cursor, &mut body)?;
        lines.push(Stmt::Block(body));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::Branch;
    use super::*;
    use crate::backends::GenerateOptions;
    use crate::ir::Ident;

    fn site(path: Vec<Step>) -> UnionSite {
        UnionSite {
            path,
            unit: "SSZ_Choice".to_owned(),
            branches: vec![
                Branch { selector: 0, routine: None },
                Branch { selector: 1, routine: Some("decode_value".to_owned()) },
            ],
        }
    }

    #[test]
    fn test_dispatch_root_union() {
        let options = GenerateOptions::default();
        let mut generator = Generator::new(&options);
        let root = Dest::Slot(Expr::Var(Ident::new("dest")));
        let mut lines = vec![];
        generate(&mut generator, &root, &[site(vec![])], &mut lines).unwrap();
        let Stmt::Block(body) = &lines[0] else { panic!("expected a block") };
        let Some(Stmt::Switch { cases, default, .. }) = body.last() else {
            panic!("expected a switch")
        };
        assert_eq!(default, &vec![Stmt::Revert]);
        assert_eq!(cases.len(), 2);
        assert!(cases[0].1.contains(&Stmt::MStore(
            add(Expr::Var(Ident::new("value_3")), 32),
            Expr::Lit(0)
        )));
        assert!(cases[1].1.iter().any(|stmt| matches!(stmt,
            Stmt::Call { routine, .. } if routine == "decode_value")));
    }

    #[test]
    fn test_dispatch_through_list() {
        let options = GenerateOptions::default();
        let mut generator = Generator::new(&options);
        let root = Dest::Record(Expr::Var(Ident::new("_test")));
        let mut lines = vec![];
        generate(&mut generator, &root, &[site(vec![Step::Field(1), Step::List])], &mut lines)
            .unwrap();
        let Stmt::Block(body) = &lines[0] else { panic!("expected a block") };
        assert_eq!(
            body[1],
            Stmt::Let(Ident::new("array_1"), mload(add(Expr::Var(Ident::new("_test")), 32)))
        );
        assert!(matches!(&body[2], Stmt::For { cond, .. }
            if *cond == lt(Expr::Var(Ident::new("i_2")), mload(Expr::Var(Ident::new("array_1"))))));
    }

    #[test]
    fn test_dispatch_must_reach_slot() {
        let options = GenerateOptions::default();
        let mut generator = Generator::new(&options);
        let root = Dest::Record(Expr::Var(Ident::new("_test")));
        let mut lines = vec![];
        assert!(matches!(
            generate(&mut generator, &root, &[site(vec![])], &mut lines),
            Err(Error::UnsupportedShape { .. })
        ));
    }
}
