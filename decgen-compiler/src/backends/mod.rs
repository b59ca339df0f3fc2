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

//! Decoder generators and companion backends.

use heck::ToLowerCamelCase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use crate::analyzer::{self, Compiled, Error};
use crate::ast;
use crate::ir::{self, Unit};

pub mod common;
pub mod encoder;
pub mod json;
pub mod packed;
pub mod ssz;
pub mod structs;

/// Wire encoding of the decoded blobs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Ssz,
    Packed,
}

/// Target machine revision. Decides how bulk memory copies are emitted.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvmVersion {
    /// Bulk copies use a single `mcopy`.
    #[default]
    Cancun,
    /// Bulk copies are performed word by word.
    Legacy,
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "ssz" => Ok(Self::Ssz),
            "packed" => Ok(Self::Packed),
            _ => Err("could not parse encoding, supported values are: ssz, packed".to_owned()),
        }
    }
}

impl FromStr for EvmVersion {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "cancun" => Ok(Self::Cancun),
            "legacy" => Ok(Self::Legacy),
            _ => {
                Err("could not parse evm version, supported values are: cancun, legacy".to_owned())
            }
        }
    }
}

/// Decoder generation options.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    pub encoding: Encoding,
    pub evm_version: EvmVersion,
    /// Size in bytes of the length prefix preceding the blob, 0 if absent.
    pub prefix_size: usize,
}

impl GenerateOptions {
    /// Check the options against the limits of the generators. The
    /// length prefix is read from the first word of the blob.
    pub fn validate(&self, root: &str) -> Result<(), Error> {
        if self.prefix_size > common::memory::WORD_SIZE {
            return Err(Error::UnsupportedShape {
                path: root.to_owned(),
                message: format!(
                    "length prefix of {} bytes exceeds the word size",
                    self.prefix_size
                ),
            });
        }
        Ok(())
    }
}

/// Encoder options.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    pub encoding: Encoding,
    /// Size in bytes of the length prefix preceding the blob, 0 if absent.
    pub prefix_size: usize,
}

impl From<&GenerateOptions> for EncodeOptions {
    fn from(options: &GenerateOptions) -> EncodeOptions {
        EncodeOptions { encoding: options.encoding, prefix_size: options.prefix_size }
    }
}

/// Generated decoder units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generated {
    /// Unit holding the `decode(data, <root>)` routine.
    pub main: Unit,
    /// Union branch units, keyed by unit name.
    pub units: BTreeMap<String, Unit>,
}

impl Generated {
    /// Look up a unit by name, main unit included.
    pub fn unit(&self, name: &str) -> Option<&Unit> {
        if self.main.name == name {
            Some(&self.main)
        } else {
            self.units.get(name)
        }
    }

    pub fn instruction_count(&self) -> usize {
        std::iter::once(&self.main)
            .chain(self.units.values())
            .flat_map(|unit| unit.routines.iter())
            .map(|routine| ir::instruction_count(&routine.body))
            .sum()
    }
}

impl std::fmt::Display for Generated {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.main)?;
        for unit in self.units.values() {
            writeln!(f)?;
            write!(f, "{unit}")?;
        }
        Ok(())
    }
}

/// Name of the root parameter of the main decode routine.
pub fn root_name(decl: &ast::Declaration) -> String {
    format!("_{}", decl.name.to_lower_camel_case())
}

/// Generate the decoder units for compiled declarations.
pub fn generate_decoder(
    compiled: &Compiled,
    root: &str,
    options: &GenerateOptions,
) -> Result<Generated, Error> {
    let generated = match options.encoding {
        Encoding::Ssz => ssz::generate(compiled, root, options)?,
        Encoding::Packed => packed::generate(compiled, root, options)?,
    };
    debug!(
        encoding = ?options.encoding,
        units = generated.units.len(),
        instructions = generated.instruction_count(),
        "generated decoder"
    );
    Ok(generated)
}

/// Output of a complete generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Output {
    pub decoder: Generated,
    pub structs: structs::Organized,
}

/// Compile a declaration, and generate its decoder and record
/// declarations.
pub fn generate(decl: &ast::Declaration, options: &GenerateOptions) -> Result<Output, Error> {
    let compiled = analyzer::compile(decl)?;
    let decoder = generate_decoder(&compiled, &root_name(decl), options)?;
    let structs = structs::organize(decl)?;
    Ok(Output { decoder, structs })
}
