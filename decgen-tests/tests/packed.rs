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

use decgen_compiler::ast::Declaration;
use decgen_compiler::backends::{Encoding, EvmVersion, GenerateOptions};
use decgen_runtime::Value;
use decgen_tests::{roundtrip, RoundTrip};
use serde_json::json;

fn packed() -> GenerateOptions {
    GenerateOptions { encoding: Encoding::Packed, ..Default::default() }
}

fn check(decl: &Declaration, value: serde_json::Value, options: &GenerateOptions) -> RoundTrip {
    let result = roundtrip(decl, &value, options).unwrap();
    assert_eq!(result.decoded, result.expected);
    result
}

#[test]
fn test_word_boundary() {
    let mut components = vec![];
    let mut values = serde_json::Map::new();
    for index in 0..12 {
        components.push(Declaration::new(&format!("a{index}"), "bool"));
        components.push(Declaration::new(&format!("b{index}"), "uint16"));
        values.insert(format!("a{index}"), json!(index % 2 == 0));
        values.insert(format!("b{index}"), json!(1000 + index));
    }
    let decl = Declaration::new("Pairs", "tuple").with_components(components);
    let result = check(&decl, serde_json::Value::Object(values), &packed());
    assert_eq!(result.encoded.len(), 36);
}

#[test]
fn test_primitive_arrays() {
    let decl = Declaration::new("Series", "tuple").with_components(vec![
        Declaration::new("flag", "bool"),
        Declaration::new("points", "uint24[]"),
        Declaration::new("window", "int16[3]"),
    ]);
    let points: Vec<u32> = (0..40).map(|index| index * 40503).collect();
    let result =
        check(&decl, json!({ "flag": true, "points": points, "window": [-1, 0, 1] }), &packed());
    assert_eq!(result.encoded[..5], [1, 0, 0, 0, 40]);
    check(&decl, json!({ "flag": false, "points": [], "window": [5, 6, 7] }), &packed());
}

#[test]
fn test_strings() {
    let decl = Declaration::new("Profile", "tuple").with_components(vec![
        Declaration::new("id", "uint8"),
        Declaration::new("name", "string"),
        Declaration::new("avatar", "bytes"),
        Declaration::new("score", "uint32"),
    ]);
    let result = check(
        &decl,
        json!({ "id": 1, "name": "abc", "avatar": "0x", "score": 9 }),
        &packed(),
    );
    assert_eq!(result.encoded, vec![1, 0, 0, 0, 3, b'a', b'b', b'c', 0, 0, 0, 0, 0, 0, 0, 9]);

    let long = "x".repeat(100);
    check(&decl, json!({ "id": 2, "name": long, "avatar": "0xff00", "score": 10 }), &packed());
}

#[test]
fn test_nested_tuples() {
    let decl = Declaration::new("Book", "tuple").with_components(vec![
        Declaration::new("levels", "tuple[]").with_components(vec![
            Declaration::new("price", "uint64"),
            Declaration::new("label", "string"),
        ]),
        Declaration::new("best", "tuple").with_components(vec![
            Declaration::new("bid", "uint128"),
            Declaration::new("ask", "uint128"),
        ]),
        Declaration::new("names", "string[2]"),
    ]);
    let result = check(
        &decl,
        json!({
            "levels": [
                { "price": 101, "label": "a" },
                { "price": 102, "label": "bb" },
            ],
            "best": { "bid": 1, "ask": 2 },
            "names": ["left", "right"],
        }),
        &packed(),
    );
    let Value::Container(fields) = &result.decoded else { panic!("expected a container") };
    assert_eq!(fields[1], Value::Container(vec![Value::uint(16, 1), Value::uint(16, 2)]));
}

#[test]
fn test_legacy_length_prefix() {
    let decl = Declaration::new("Blob", "tuple").with_components(vec![
        Declaration::new("payload", "bytes"),
        Declaration::new("nonce", "uint64"),
    ]);
    let options = GenerateOptions {
        encoding: Encoding::Packed,
        evm_version: EvmVersion::Legacy,
        prefix_size: 4,
    };
    let payload = format!("0x{}", "5a".repeat(45));
    let result = check(&decl, json!({ "payload": payload, "nonce": 3 }), &options);
    assert_eq!(result.encoded.len() % 32, 0);
}
