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

//! Decoder generator and value encoder.

use argh::FromArgs;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use decgen_compiler::backends::{self, EncodeOptions, Encoding, EvmVersion, GenerateOptions};
use decgen_compiler::{analyzer, ast};
use decgen_runtime::hex;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum OutputFormat {
    Yul,
    Json,
    Schema,
    Structs,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "yul" => Ok(Self::Yul),
            "json" => Ok(Self::Json),
            "schema" => Ok(Self::Schema),
            "structs" => Ok(Self::Structs),
            _ => Err(format!(
                "could not parse {input:?}, valid option are 'yul', 'json', 'schema', 'structs'."
            )),
        }
    }
}

#[derive(FromArgs, Debug)]
/// Decoder generator for field declarations.
struct Opt {
    #[argh(switch)]
    /// print tool version and exit.
    version: bool,

    #[argh(option, default = "OutputFormat::Yul")]
    /// generate output in this format ("yul", "json", "schema", "structs").
    /// The output will be printed on stdout in all cases.
    /// The input file is the JSON field declaration.
    output_format: OutputFormat,

    #[argh(option, default = "Encoding::Ssz")]
    /// wire encoding of the decoded blobs ("ssz", "packed").
    encoding: Encoding,

    #[argh(option, default = "EvmVersion::Cancun")]
    /// target machine revision ("cancun", "legacy").
    evm_version: EvmVersion,

    #[argh(option, default = "0")]
    /// size in bytes of the length prefix preceding the blob.
    prefix_size: usize,

    #[argh(option)]
    /// encode the values from the provided JSON file instead of generating
    /// a decoder. The encoded blob is printed on stdout as a hex string.
    values: Option<String>,

    #[argh(positional)]
    /// input file.
    input_file: Option<String>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, String> {
    let contents =
        std::fs::read_to_string(path).map_err(|err| format!("could not read {path}: {err}"))?;
    serde_json::from_str(&contents).map_err(|err| format!("could not parse {path}: {err}"))
}

fn encode_values(opt: &Opt, decl: &ast::Declaration, values_file: &str) -> Result<(), String> {
    let values: serde_json::Value = read_json(values_file)?;
    let options = EncodeOptions { encoding: opt.encoding, prefix_size: opt.prefix_size };
    let bytes = backends::encoder::encode(decl, &values, &options).map_err(|err| err.to_string())?;
    println!("0x{}", hex::encode(bytes));
    Ok(())
}

fn generate_backend(opt: &Opt, decl: &ast::Declaration) -> Result<(), String> {
    let options = GenerateOptions {
        encoding: opt.encoding,
        evm_version: opt.evm_version,
        prefix_size: opt.prefix_size,
    };
    match opt.output_format {
        OutputFormat::Schema => {
            let compiled = analyzer::compile(decl).map_err(|err| err.to_string())?;
            println!("{}", backends::json::generate_schema(&compiled)?);
        }
        OutputFormat::Structs => {
            let organized = backends::structs::organize(decl).map_err(|err| err.to_string())?;
            println!("{}", backends::json::generate_structs(&organized)?);
        }
        OutputFormat::Yul => {
            let output = backends::generate(decl, &options).map_err(|err| err.to_string())?;
            print!("{}", output.decoder);
        }
        OutputFormat::Json => {
            let output = backends::generate(decl, &options).map_err(|err| err.to_string())?;
            println!("{}", backends::json::generate(&output.decoder)?);
        }
    }
    Ok(())
}

fn main() -> Result<(), String> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let opt: Opt = argh::from_env();

    if opt.version {
        println!("decgen {}\nCopyright (C) 2026 Google LLC", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some(input_file) = opt.input_file.as_ref() else {
        return Err("No input file is specified".to_owned());
    };
    let decl: ast::Declaration = read_json(input_file)?;
    info!(input = %input_file, root = %decl.name, "loaded declaration");

    if let Some(values_file) = opt.values.as_ref() {
        encode_values(&opt, &decl, values_file)?
    } else {
        generate_backend(&opt, &decl)?
    }

    Ok(())
}
