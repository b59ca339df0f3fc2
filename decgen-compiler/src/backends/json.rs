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

//! Rudimentary JSON backends.

use crate::analyzer::Compiled;
use crate::backends::structs::Organized;
use crate::backends::Generated;

/// Turn the generated decoder units into a JSON object.
pub fn generate(generated: &Generated) -> Result<String, String> {
    serde_json::to_string_pretty(generated)
        .map_err(|err| format!("could not JSON serialize decoder: {err}"))
}

/// Turn the compiled schema into a JSON object.
pub fn generate_schema(compiled: &Compiled) -> Result<String, String> {
    serde_json::to_string_pretty(compiled)
        .map_err(|err| format!("could not JSON serialize schema: {err}"))
}

/// Turn the organized records into a JSON object.
pub fn generate_structs(organized: &Organized) -> Result<String, String> {
    serde_json::to_string_pretty(organized)
        .map_err(|err| format!("could not JSON serialize structs: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::compile;
    use crate::ast::Declaration;

    #[test]
    fn test_schema_fields() {
        let compiled = compile(&Declaration::new("Test", "tuple").with_components(vec![
            Declaration::new("quantity", "uint8"),
            Declaration::new("name", "string"),
        ]))
        .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&generate_schema(&compiled).unwrap()).unwrap();
        let root = &json["schema"][0];
        assert_eq!(root["type_name"], "Container");
        assert_eq!(root["fixed_size"], serde_json::Value::Null);
        assert_eq!(root["variable_offsets_position"], serde_json::json!([1]));
        assert_eq!(root["fields"][0]["primitive"]["kind"], "uint");
    }
}
