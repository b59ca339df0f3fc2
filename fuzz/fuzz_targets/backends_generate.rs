#![no_main]

use decgen_compiler::{ast, backends};
use libfuzzer_sys::fuzz_target;

// Fuzz decgen_compiler::backends::generate with both encodings.
fuzz_target!(|source: String| {
    let Ok(decl) = serde_json::from_str::<ast::Declaration>(&source) else {
        return;
    };
    for encoding in [backends::Encoding::Ssz, backends::Encoding::Packed] {
        let options = backends::GenerateOptions { encoding, ..Default::default() };
        let _ = backends::generate(&decl, &options);
    }
});
