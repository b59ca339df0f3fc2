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

//! Interpreter for the decoder instruction IR.
//!
//! Memory is byte addressed and grows on demand. Words are 256-bit
//! big-endian values. Arithmetic wraps, division by zero yields zero
//! and shifts by 256 bits or more clear the value.

use decgen_compiler::backends::Generated;
use decgen_compiler::ir::{Builtin, Expr, Ident, Routine, Stmt};
use decgen_runtime::U256;
use std::collections::HashMap;

/// Address of the free memory pointer.
pub const FREE_MEMORY_POINTER: usize = 0x40;

/// Address of the zero slot, used as the empty dynamic value.
pub const ZERO_SLOT: usize = 0x60;

/// Address of the first allocatable word.
pub const HEAP_START: usize = 0x80;

const WORD_SIZE: usize = 32;
const MEMORY_LIMIT: usize = 1 << 24;
const STEP_LIMIT: usize = 1 << 22;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VmError {
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("unknown routine `{unit}.{routine}`")]
    UnknownRoutine { unit: String, routine: String },
    #[error("routine `{routine}` takes {expected} arguments, got {actual}")]
    InvalidArguments { routine: String, expected: usize, actual: usize },
    #[error("builtin `{0}` called with the wrong number of arguments")]
    InvalidBuiltin(&'static str),
    #[error("memory access at {0:#x} exceeds the memory limit")]
    MemoryLimit(U256),
    #[error("execution exceeded the step limit")]
    StepLimit,
    #[error("execution reverted")]
    Revert,
}

pub struct Machine<'a> {
    generated: &'a Generated,
    memory: Vec<u8>,
    frames: Vec<HashMap<Ident, U256>>,
    steps: usize,
}

fn word(value: usize) -> U256 {
    U256::from(value)
}

fn flag(value: bool) -> U256 {
    if value {
        U256::from(1)
    } else {
        U256::ZERO
    }
}

fn signextend(byte: U256, value: U256) -> U256 {
    if byte >= word(WORD_SIZE - 1) {
        return value;
    }
    let bits = 8 * (byte.as_limbs()[0] as usize + 1);
    let mask = (U256::from(1) << bits) - U256::from(1);
    if value.bit(bits - 1) {
        value | !mask
    } else {
        value & mask
    }
}

impl<'a> Machine<'a> {
    pub fn new(generated: &'a Generated) -> Self {
        let mut machine =
            Machine { generated, memory: vec![0; HEAP_START], frames: vec![], steps: 0 };
        machine.memory[FREE_MEMORY_POINTER + WORD_SIZE - 1] = HEAP_START as u8;
        machine
    }

    fn address(value: U256) -> Result<usize, VmError> {
        if value > word(MEMORY_LIMIT) {
            return Err(VmError::MemoryLimit(value));
        }
        Ok(value.as_limbs()[0] as usize)
    }

    fn grow(&mut self, end: usize) -> Result<(), VmError> {
        if end > MEMORY_LIMIT {
            return Err(VmError::MemoryLimit(word(end)));
        }
        if self.memory.len() < end {
            self.memory.resize(end, 0);
        }
        Ok(())
    }

    pub fn mload(&mut self, addr: usize) -> Result<U256, VmError> {
        self.grow(addr + WORD_SIZE)?;
        Ok(U256::from_be_slice(&self.memory[addr..addr + WORD_SIZE]))
    }

    pub fn mstore(&mut self, addr: usize, value: U256) -> Result<(), VmError> {
        self.grow(addr + WORD_SIZE)?;
        self.memory[addr..addr + WORD_SIZE].copy_from_slice(&value.to_be_bytes::<32>());
        Ok(())
    }

    pub fn read_bytes(&mut self, addr: usize, len: usize) -> Result<Vec<u8>, VmError> {
        self.grow(addr + len)?;
        Ok(self.memory[addr..addr + len].to_vec())
    }

    fn mcopy(&mut self, dst: usize, src: usize, len: usize) -> Result<(), VmError> {
        let bytes = self.read_bytes(src, len)?;
        self.grow(dst + len)?;
        self.memory[dst..dst + len].copy_from_slice(&bytes);
        Ok(())
    }

    /// Allocate `words` zeroed words. Returns the address of the region.
    pub fn alloc(&mut self, words: usize) -> Result<usize, VmError> {
        let ptr = Self::address(self.mload(FREE_MEMORY_POINTER)?)?;
        let end = ptr + words * WORD_SIZE;
        self.grow(end)?;
        self.mstore(FREE_MEMORY_POINTER, word(end))?;
        Ok(ptr)
    }

    /// Copy a byte string into memory as `[len, raw...]`.
    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<usize, VmError> {
        let ptr = self.alloc(1 + bytes.len().div_ceil(WORD_SIZE))?;
        self.mstore(ptr, word(bytes.len()))?;
        self.memory[ptr + WORD_SIZE..ptr + WORD_SIZE + bytes.len()].copy_from_slice(bytes);
        Ok(ptr)
    }

    fn var(&self, ident: &Ident) -> Result<U256, VmError> {
        self.frames
            .last()
            .and_then(|frame| frame.get(ident))
            .copied()
            .ok_or_else(|| VmError::UndefinedVariable(ident.to_string()))
    }

    fn set(&mut self, ident: &Ident, value: U256, declare: bool) -> Result<(), VmError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| VmError::UndefinedVariable(ident.to_string()))?;
        if !declare && !frame.contains_key(ident) {
            return Err(VmError::UndefinedVariable(ident.to_string()));
        }
        frame.insert(ident.clone(), value);
        Ok(())
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<U256, VmError> {
        let (builtin, args) = match expr {
            Expr::Lit(value) => return Ok(word(*value)),
            Expr::Var(ident) => return self.var(ident),
            Expr::Call(builtin, args) => (builtin, args),
        };
        if args.len() != builtin.arity() {
            return Err(VmError::InvalidBuiltin(builtin.name()));
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        let a = values[0];
        let b = values.get(1).copied().unwrap_or_default();
        Ok(match builtin {
            Builtin::Add => a.wrapping_add(b),
            Builtin::Sub => a.wrapping_sub(b),
            Builtin::Mul => a.wrapping_mul(b),
            Builtin::Div if b == U256::ZERO => U256::ZERO,
            Builtin::Div => a / b,
            Builtin::Shl if a >= word(256) => U256::ZERO,
            Builtin::Shl => b << a.as_limbs()[0] as usize,
            Builtin::Shr if a >= word(256) => U256::ZERO,
            Builtin::Shr => b >> a.as_limbs()[0] as usize,
            Builtin::And => a & b,
            Builtin::Or => a | b,
            Builtin::Lt => flag(a < b),
            Builtin::Gt => flag(a > b),
            Builtin::MLoad => self.mload(Self::address(a)?)?,
            Builtin::SignExtend => signextend(a, b),
        })
    }

    fn step(&mut self) -> Result<(), VmError> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            Err(VmError::StepLimit)
        } else {
            Ok(())
        }
    }

    fn exec(&mut self, stmts: &[Stmt]) -> Result<(), VmError> {
        for stmt in stmts {
            self.step()?;
            match stmt {
                Stmt::Comment(_) => (),
                Stmt::Let(ident, value) => {
                    let value = self.eval(value)?;
                    self.set(ident, value, true)?;
                }
                Stmt::Assign(ident, value) => {
                    let value = self.eval(value)?;
                    self.set(ident, value, false)?;
                }
                Stmt::MStore(addr, value) => {
                    let addr = Self::address(self.eval(addr)?)?;
                    let value = self.eval(value)?;
                    self.mstore(addr, value)?;
                }
                Stmt::MCopy { dst, src, len } => {
                    let dst = Self::address(self.eval(dst)?)?;
                    let src = Self::address(self.eval(src)?)?;
                    let len = Self::address(self.eval(len)?)?;
                    self.mcopy(dst, src, len)?;
                }
                Stmt::Block(body) => self.exec(body)?,
                Stmt::For { init, cond, post, body } => {
                    self.exec(init)?;
                    while self.eval(cond)? != U256::ZERO {
                        self.exec(body)?;
                        self.exec(post)?;
                    }
                }
                Stmt::If(cond, body) => {
                    if self.eval(cond)? != U256::ZERO {
                        self.exec(body)?;
                    }
                }
                Stmt::Switch { on, cases, default } => {
                    let on = self.eval(on)?;
                    match cases.iter().find(|(value, _)| word(*value) == on) {
                        Some((_, body)) => self.exec(body)?,
                        None => self.exec(default)?,
                    }
                }
                Stmt::Call { unit, routine, args } => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg)?);
                    }
                    let generated = self.generated;
                    let target = generated
                        .unit(unit)
                        .and_then(|unit| unit.routine(routine))
                        .ok_or_else(|| VmError::UnknownRoutine {
                            unit: unit.clone(),
                            routine: routine.clone(),
                        })?;
                    self.call(target, &values)?;
                }
                Stmt::Revert => return Err(VmError::Revert),
            }
        }
        Ok(())
    }

    /// Run a routine with the given arguments in a new frame.
    pub fn call(&mut self, routine: &Routine, args: &[U256]) -> Result<(), VmError> {
        if routine.params.len() != args.len() {
            return Err(VmError::InvalidArguments {
                routine: routine.name.clone(),
                expected: routine.params.len(),
                actual: args.len(),
            });
        }
        self.frames.push(routine.params.iter().cloned().zip(args.iter().copied()).collect());
        let result = self.exec(&routine.body);
        self.frames.pop();
        result
    }

    /// Run the `decode` routine of the main unit.
    pub fn decode(&mut self, data: usize, root: usize) -> Result<(), VmError> {
        let generated = self.generated;
        let routine = generated.main.routine("decode").ok_or_else(|| VmError::UnknownRoutine {
            unit: generated.main.name.clone(),
            routine: "decode".to_owned(),
        })?;
        self.call(routine, &[word(data), word(root)])
    }
}
