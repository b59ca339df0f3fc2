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

//! Memory layout helpers shared by the decoder generators.
//!
//! Decoded values follow the memory layout of the target language:
//! records are arrays of words, dynamic arrays are prefixed with their
//! length, and byte strings are stored as a length word followed by
//! the raw bytes padded to a word boundary.

use crate::ast::Primitive;
use crate::backends::EvmVersion;
use crate::ir::{add, div, lt, mload, mul, shl, shr, signextend, Expr, Ident, Scopes, Stmt};

/// Address of the free memory pointer.
pub const FREE_MEMORY_POINTER: usize = 0x40;

/// Word size in bytes.
pub const WORD_SIZE: usize = 32;

/// Allocate `words` words of memory. Returns the variable holding the
/// address of the allocated region.
pub fn alloc(lines: &mut Vec<Stmt>, scopes: &mut Scopes, hint: &str, words: Expr) -> Ident {
    let ptr = scopes.fresh(hint);
    lines.push(Stmt::Let(ptr.clone(), mload(FREE_MEMORY_POINTER)));
    let size = match words.as_lit() {
        Some(words) => Expr::Lit(words * WORD_SIZE),
        None => mul(words, WORD_SIZE),
    };
    lines.push(Stmt::MStore(FREE_MEMORY_POINTER.into(), add(&ptr, size)));
    ptr
}

/// Address of word `index` of the memory region at `base`.
pub fn word_at(base: impl Into<Expr>, index: impl Into<Expr>) -> Expr {
    let base = base.into();
    match index.into() {
        Expr::Lit(0) => base,
        Expr::Lit(index) => add(base, index * WORD_SIZE),
        index => add(base, mul(index, WORD_SIZE)),
    }
}

/// Extract a fixed size primitive from a word in which the primitive
/// occupies the most significant bytes.
///
/// Integers and addresses are right-aligned, signed integers sign
/// extended, and fixed byte arrays left-aligned with the trailing
/// bytes cleared.
pub fn extract(primitive: &Primitive, word: Expr) -> Expr {
    let width = primitive.fixed_size().unwrap_or(WORD_SIZE);
    if width >= WORD_SIZE {
        return word;
    }
    let shift = 8 * (WORD_SIZE - width);
    match primitive {
        Primitive::FixedBytes { .. } => shl(shift, shr(shift, word)),
        Primitive::Int { .. } => signextend(width - 1, shr(shift, word)),
        _ => shr(shift, word),
    }
}

/// Copy `len` bytes from `src` to `dst`.
pub fn copy_bytes(
    lines: &mut Vec<Stmt>,
    scopes: &mut Scopes,
    evm_version: EvmVersion,
    dst: Expr,
    src: Expr,
    len: Expr,
) {
    match evm_version {
        EvmVersion::Cancun => lines.push(Stmt::MCopy { dst, src, len }),
        EvmVersion::Legacy => {
            let i = scopes.fresh("i");
            lines.push(Stmt::For {
                init: vec![Stmt::Let(i.clone(), 0.into())],
                cond: lt(&i, len),
                post: vec![Stmt::Assign(i.clone(), add(&i, WORD_SIZE))],
                body: vec![Stmt::MStore(add(dst, &i), mload(add(src, &i)))],
            });
        }
    }
}

/// Copy `len` bytes starting at memory address `src` into a freshly
/// allocated byte string. Returns the variable holding the address of
/// the byte string.
pub fn decode_bytes(
    lines: &mut Vec<Stmt>,
    scopes: &mut Scopes,
    evm_version: EvmVersion,
    src: Expr,
    len: Expr,
) -> Ident {
    let len = match len {
        Expr::Lit(_) | Expr::Var(_) => len,
        len => {
            let size = scopes.fresh("size");
            lines.push(Stmt::Let(size.clone(), len));
            Expr::Var(size)
        }
    };
    let ptr = scopes.fresh("bytes");
    lines.push(Stmt::Let(ptr.clone(), mload(FREE_MEMORY_POINTER)));
    lines.push(Stmt::MStore((&ptr).into(), len.clone()));
    copy_bytes(lines, scopes, evm_version, add(&ptr, WORD_SIZE), src, len.clone());
    let padded = mul(div(add(len, WORD_SIZE - 1), WORD_SIZE), WORD_SIZE);
    lines.push(Stmt::MStore(FREE_MEMORY_POINTER.into(), add(add(&ptr, WORD_SIZE), padded)));
    ptr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Var(Ident::new(name))
    }

    #[test]
    fn test_extract() {
        let word = || var("w");
        assert_eq!(extract(&Primitive::Uint { width: 1 }, word()), shr(248, word()));
        assert_eq!(extract(&Primitive::Uint { width: 32 }, word()), word());
        assert_eq!(extract(&Primitive::Address, word()), shr(96, word()));
        assert_eq!(extract(&Primitive::Int { width: 2 }, word()), signextend(1, shr(240, word())));
        assert_eq!(
            extract(&Primitive::FixedBytes { width: 4 }, word()),
            shl(224, shr(224, word()))
        );
    }

    #[test]
    fn test_word_at() {
        assert_eq!(word_at(var("p"), 0), var("p"));
        assert_eq!(word_at(var("p"), 2), add(var("p"), 64));
        assert_eq!(word_at(var("p"), var("i")), add(var("p"), mul(var("i"), 32)));
    }

    #[test]
    fn test_alloc() {
        let mut lines = vec![];
        let mut scopes = Scopes::default();
        let ptr = alloc(&mut lines, &mut scopes, "record", Expr::Lit(3));
        assert_eq!(
            lines,
            vec![
                Stmt::Let(ptr.clone(), mload(0x40)),
                Stmt::MStore(Expr::Lit(0x40), add(&ptr, 96)),
            ]
        );
    }

    #[test]
    fn test_copy_bytes() {
        let mut scopes = Scopes::default();
        let mut cancun = vec![];
        copy_bytes(&mut cancun, &mut scopes, EvmVersion::Cancun, var("d"), var("s"), var("n"));
        assert_eq!(cancun, vec![Stmt::MCopy { dst: var("d"), src: var("s"), len: var("n") }]);

        let mut legacy = vec![];
        copy_bytes(&mut legacy, &mut scopes, EvmVersion::Legacy, var("d"), var("s"), var("n"));
        assert!(matches!(legacy.as_slice(), [Stmt::For { .. }]));
    }
}
