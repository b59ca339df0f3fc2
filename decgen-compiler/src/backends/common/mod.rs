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

//! Helpers shared by the decoder generators.

pub mod alignment;
pub mod memory;

use crate::ir::Expr;

/// Destination of a decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dest {
    /// Address of a record whose fields are written in place.
    Record(Expr),
    /// Address of a memory word receiving the value, or a pointer to it.
    Slot(Expr),
}

impl Dest {
    pub fn address(&self) -> &Expr {
        match self {
            Dest::Record(addr) | Dest::Slot(addr) => addr,
        }
    }
}
