#![no_main]

use decgen_compiler::parser;
use libfuzzer_sys::fuzz_target;

// Fuzz decgen_compiler::parser::parse_type_string.
fuzz_target!(|source: String| {
    let _ = parser::parse_type_string(&source);
});
