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

//! Offset algebra.
//!
//! Byte positions inside the decoded blob are either known at
//! generation time or computed by previously emitted statements.

use crate::ir::{self, Builtin, Expr, Ident, Scopes, Stmt};

/// Byte offset into the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offset {
    Const(usize),
    /// Offset computed by previously emitted statements.
    Sym(Expr),
}

/// Byte range `[start, end)` into the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesRange {
    pub start: Offset,
    pub end: Offset,
}

impl Offset {
    pub fn to_expr(&self) -> Expr {
        match self {
            Offset::Const(value) => Expr::Lit(*value),
            Offset::Sym(expr) => expr.clone(),
        }
    }
}

impl From<usize> for Offset {
    fn from(value: usize) -> Offset {
        Offset::Const(value)
    }
}

impl From<Expr> for Offset {
    fn from(expr: Expr) -> Offset {
        match expr {
            Expr::Lit(value) => Offset::Const(value),
            expr => Offset::Sym(expr),
        }
    }
}

impl From<&Ident> for Offset {
    fn from(ident: &Ident) -> Offset {
        Offset::Sym(Expr::Var(ident.clone()))
    }
}

impl From<Offset> for Expr {
    fn from(offset: Offset) -> Expr {
        offset.to_expr()
    }
}

impl From<&Offset> for Expr {
    fn from(offset: &Offset) -> Expr {
        offset.to_expr()
    }
}

/// Add two offsets.
///
/// Constants are folded. When `lines` is provided, a variable operand
/// may be updated in place by appending one assignment to `lines`; the
/// returned offset then names the updated variable. Callers must only
/// provide `lines` when the variables involved are temporaries they own.
pub fn add_offsets(lines: Option<&mut Vec<Stmt>>, left: Offset, right: Offset) -> Offset {
    match (left, right) {
        (Offset::Const(left), Offset::Const(right)) => Offset::Const(left + right),
        (Offset::Sym(expr), Offset::Const(0)) | (Offset::Const(0), Offset::Sym(expr)) => {
            Offset::Sym(expr)
        }
        (Offset::Sym(expr), Offset::Const(value)) | (Offset::Const(value), Offset::Sym(expr)) => {
            add_constant(lines, expr, value)
        }
        (Offset::Sym(left), Offset::Sym(right)) => add_symbolic(lines, left, right),
    }
}

fn add_constant(lines: Option<&mut Vec<Stmt>>, expr: Expr, value: usize) -> Offset {
    match expr {
        Expr::Call(Builtin::Add, args) => match args.as_slice() {
            [base, Expr::Lit(constant)] | [Expr::Lit(constant), base] => {
                Offset::Sym(ir::add(base.clone(), constant + value))
            }
            _ => Offset::Sym(ir::add(Expr::Call(Builtin::Add, args), value)),
        },
        Expr::Var(ident) => match lines {
            Some(lines) => {
                lines.push(Stmt::Assign(ident.clone(), ir::add(&ident, value)));
                Offset::Sym(Expr::Var(ident))
            }
            None => Offset::Sym(ir::add(&ident, value)),
        },
        expr => Offset::Sym(ir::add(expr, value)),
    }
}

fn add_symbolic(lines: Option<&mut Vec<Stmt>>, left: Expr, right: Expr) -> Offset {
    // Prefer updating a local variable over a memory read.
    let (target, other) = if !matches!(left, Expr::Var(_)) && matches!(right, Expr::Var(_)) {
        (right, left)
    } else {
        (left, right)
    };
    match (lines, target) {
        (Some(lines), Expr::Var(ident)) => {
            lines.push(Stmt::Assign(ident.clone(), ir::add(&ident, other)));
            Offset::Sym(Expr::Var(ident))
        }
        (_, target) => Offset::Sym(ir::add(target, other)),
    }
}

/// Load the 32-bit value stored at byte `at` of the blob `data`.
/// The loaded value keeps the wire byte order.
pub fn load_u32(data: &Ident, at: impl Into<Expr>) -> Expr {
    ir::shr(224, ir::mload(ir::add(data, at)))
}

/// Convert the 32-bit value held by `ident` from little-endian to
/// big-endian byte order, in place.
pub fn swap_endianness_32(ident: &Ident) -> Stmt {
    let byte = |mask: usize| ir::and(ident, mask);
    Stmt::Assign(
        ident.clone(),
        ir::or(
            ir::or(ir::shl(24, byte(0xff)), ir::shl(8, byte(0xff00))),
            ir::or(ir::shr(8, byte(0xff0000)), ir::shr(24, byte(0xff000000))),
        ),
    )
}

/// Read a little-endian 4-byte offset from byte `at` of the blob into
/// a fresh variable.
pub fn read_offset(
    lines: &mut Vec<Stmt>,
    scopes: &mut Scopes,
    data: &Ident,
    hint: &str,
    at: impl Into<Expr>,
) -> Ident {
    let ident = scopes.fresh(hint);
    lines.push(Stmt::Let(ident.clone(), load_u32(data, at)));
    lines.push(swap_endianness_32(&ident));
    ident
}
