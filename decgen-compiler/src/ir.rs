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

//! Instruction IR emitted by the decoder generators.
//!
//! The IR is a structured subset of Yul: expressions are literals,
//! variables and builtin calls; statements cover variable declarations,
//! memory writes, loops, conditionals and calls into other units.

use serde::Serialize;
use std::fmt;

/// Variable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: &str) -> Ident {
        Ident(name.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Builtin {
    Add,
    Sub,
    Mul,
    Div,
    Shl,
    Shr,
    And,
    Or,
    Lt,
    Gt,
    MLoad,
    SignExtend,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Add => "add",
            Builtin::Sub => "sub",
            Builtin::Mul => "mul",
            Builtin::Div => "div",
            Builtin::Shl => "shl",
            Builtin::Shr => "shr",
            Builtin::And => "and",
            Builtin::Or => "or",
            Builtin::Lt => "lt",
            Builtin::Gt => "gt",
            Builtin::MLoad => "mload",
            Builtin::SignExtend => "signextend",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Builtin::MLoad => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Lit(usize),
    Var(Ident),
    Call(Builtin, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Comment(String),
    Let(Ident, Expr),
    Assign(Ident, Expr),
    MStore(Expr, Expr),
    MCopy { dst: Expr, src: Expr, len: Expr },
    Block(Vec<Stmt>),
    For { init: Vec<Stmt>, cond: Expr, post: Vec<Stmt>, body: Vec<Stmt> },
    If(Expr, Vec<Stmt>),
    Switch { on: Expr, cases: Vec<(usize, Vec<Stmt>)>, default: Vec<Stmt> },
    /// Call a routine of another generation unit.
    Call { unit: String, routine: String, args: Vec<Expr> },
    Revert,
}

/// Named list of statements with parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Routine {
    pub name: String,
    pub params: Vec<Ident>,
    pub body: Vec<Stmt>,
}

/// Self-contained generation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    pub name: String,
    pub routines: Vec<Routine>,
}

impl From<usize> for Expr {
    fn from(value: usize) -> Expr {
        Expr::Lit(value)
    }
}

impl From<&Ident> for Expr {
    fn from(ident: &Ident) -> Expr {
        Expr::Var(ident.clone())
    }
}

impl From<Ident> for Expr {
    fn from(ident: Ident) -> Expr {
        Expr::Var(ident)
    }
}

macro_rules! builtins {
    ($($name:ident => $builtin:ident ( $($arg:ident),* );)*) => {
        $(
            pub fn $name($($arg: impl Into<Expr>),*) -> Expr {
                Expr::Call(Builtin::$builtin, vec![$($arg.into()),*])
            }
        )*
    };
}

builtins! {
    add => Add(a, b);
    sub => Sub(a, b);
    mul => Mul(a, b);
    div => Div(a, b);
    shl => Shl(shift, value);
    shr => Shr(shift, value);
    and => And(a, b);
    or => Or(a, b);
    lt => Lt(a, b);
    gt => Gt(a, b);
    mload => MLoad(addr);
    signextend => SignExtend(byte, value);
}

impl Expr {
    pub fn as_lit(&self) -> Option<usize> {
        match self {
            Expr::Lit(value) => Some(*value),
            _ => None,
        }
    }
}

impl Stmt {
    /// Visit this statement and all nested statements in program order.
    pub fn walk(&self, f: &mut impl FnMut(&Stmt)) {
        f(self);
        match self {
            Stmt::Block(body) | Stmt::If(_, body) => body.iter().for_each(|stmt| stmt.walk(f)),
            Stmt::For { init, post, body, .. } => {
                init.iter().chain(body.iter()).chain(post.iter()).for_each(|stmt| stmt.walk(f))
            }
            Stmt::Switch { cases, default, .. } => cases
                .iter()
                .flat_map(|(_, body)| body.iter())
                .chain(default.iter())
                .for_each(|stmt| stmt.walk(f)),
            _ => (),
        }
    }
}

/// Count the statements in a list, nested statements included.
pub fn instruction_count(stmts: &[Stmt]) -> usize {
    let mut count = 0;
    for stmt in stmts {
        stmt.walk(&mut |_| count += 1);
    }
    count
}

impl Unit {
    pub fn routine(&self, name: &str) -> Option<&Routine> {
        self.routines.iter().find(|routine| routine.name == name)
    }
}

/// Source of numbered identifiers.
///
/// Identifiers are formed from a sanitized hint and a counter value
/// that is never reused within a generation run.
#[derive(Debug, Default)]
pub struct Scopes {
    next: usize,
}

impl Scopes {
    pub fn fresh(&mut self, hint: &str) -> Ident {
        self.next += 1;
        let hint: String = hint
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let hint = if hint.is_empty() { "v".to_owned() } else { hint };
        Ident(format!("{hint}_{}", self.next))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Lit(value) if *value >= 256 => write!(f, "{value:#x}"),
            Expr::Lit(value) => write!(f, "{value}"),
            Expr::Var(ident) => write!(f, "{ident}"),
            Expr::Call(builtin, args) => {
                write!(f, "{}(", builtin.name())?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_indent(f: &mut fmt::Formatter, indent: usize) -> fmt::Result {
    write!(f, "{:width$}", "", width = 4 * indent)
}

fn write_inline(f: &mut fmt::Formatter, stmts: &[Stmt]) -> fmt::Result {
    f.write_str("{ ")?;
    for stmt in stmts {
        match stmt {
            Stmt::Let(ident, value) => write!(f, "let {ident} := {value} ")?,
            Stmt::Assign(ident, value) => write!(f, "{ident} := {value} ")?,
            _ => write!(f, "/* unsupported */ ")?,
        }
    }
    f.write_str("}")
}

fn write_block(f: &mut fmt::Formatter, stmts: &[Stmt], indent: usize) -> fmt::Result {
    writeln!(f, "{{")?;
    write_stmts(f, stmts, indent + 1)?;
    write_indent(f, indent)?;
    write!(f, "}}")
}

fn write_stmts(f: &mut fmt::Formatter, stmts: &[Stmt], indent: usize) -> fmt::Result {
    for stmt in stmts {
        write_indent(f, indent)?;
        match stmt {
            Stmt::Comment(text) => write!(f, "// {text}")?,
            Stmt::Let(ident, value) => write!(f, "let {ident} := {value}")?,
            Stmt::Assign(ident, value) => write!(f, "{ident} := {value}")?,
            Stmt::MStore(addr, value) => write!(f, "mstore({addr}, {value})")?,
            Stmt::MCopy { dst, src, len } => write!(f, "mcopy({dst}, {src}, {len})")?,
            Stmt::Block(body) => write_block(f, body, indent)?,
            Stmt::For { init, cond, post, body } => {
                f.write_str("for ")?;
                write_inline(f, init)?;
                write!(f, " {cond} ")?;
                write_inline(f, post)?;
                f.write_str(" ")?;
                write_block(f, body, indent)?;
            }
            Stmt::If(cond, body) => {
                write!(f, "if {cond} ")?;
                write_block(f, body, indent)?;
            }
            Stmt::Switch { on, cases, default } => {
                writeln!(f, "switch {on}")?;
                for (value, body) in cases {
                    write_indent(f, indent)?;
                    write!(f, "case {value} ")?;
                    write_block(f, body, indent)?;
                    writeln!(f)?;
                }
                write_indent(f, indent)?;
                f.write_str("default ")?;
                write_block(f, default, indent)?;
            }
            Stmt::Call { unit, routine, args } => {
                write!(f, "{unit}.{routine}(")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")?;
            }
            Stmt::Revert => f.write_str("revert(0, 0)")?,
        }
        writeln!(f)?;
    }
    Ok(())
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let params: Vec<_> = self.params.iter().map(Ident::as_str).collect();
        write!(f, "function {}({}) ", self.name, params.join(", "))?;
        write_block(f, &self.body, 0)?;
        writeln!(f)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "// unit {}", self.name)?;
        for routine in &self.routines {
            write!(f, "{routine}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes() {
        let mut scopes = Scopes::default();
        assert_eq!(scopes.fresh("offset"), Ident::new("offset_1"));
        assert_eq!(scopes.fresh("my-field.x"), Ident::new("my_field_x_2"));
        assert_eq!(scopes.fresh(""), Ident::new("v_3"));
    }

    #[test]
    fn test_display_expr() {
        let data = Ident::new("data");
        assert_eq!(shr(224, mload(add(&data, 36))).to_string(), "shr(224, mload(add(data, 36)))");
        assert_eq!(and(&data, 0xffffffff_usize).to_string(), "and(data, 0xffffffff)");
    }

    #[test]
    fn test_display_routine() {
        let i = Ident::new("i_1");
        let routine = Routine {
            name: "decode".to_owned(),
            params: vec![Ident::new("data"), Ident::new("dest")],
            body: vec![
                Stmt::Comment("loop".to_owned()),
                Stmt::For {
                    init: vec![Stmt::Let(i.clone(), 0.into())],
                    cond: lt(&i, 3),
                    post: vec![Stmt::Assign(i.clone(), add(&i, 1))],
                    body: vec![Stmt::MStore(add(Ident::new("dest"), mul(&i, 32)), (&i).into())],
                },
            ],
        };
        assert_eq!(
            routine.to_string(),
            "function decode(data, dest) {\n    // loop\n    for { let i_1 := 0 } lt(i_1, 3) { i_1 := add(i_1, 1) } {\n        mstore(add(dest, mul(i_1, 32)), i_1)\n    }\n}\n"
        );
    }

    #[test]
    fn test_instruction_count() {
        let body = vec![
            Stmt::Revert,
            Stmt::If(1.into(), vec![Stmt::Revert, Stmt::Block(vec![Stmt::Revert])]),
        ];
        assert_eq!(instruction_count(&body), 5);
    }
}
