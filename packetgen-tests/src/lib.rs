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

//! Shared helpers of the packetgen integration tests.

use packetgen::analyzer;
use packetgen::ast;
use packetgen::backends::artifacts::{self, Artifacts};
use packetgen::declarations::Declarations;
use packetgen::runtime::{Context, Registry};
use packetgen_runtime::byte_sum;

/// Analyzed declarations with their artifacts and external functions.
#[derive(Debug)]
pub struct Compiled {
    pub decls: Declarations,
    pub artifacts: Artifacts,
    pub registry: Registry,
}

impl Compiled {
    pub fn context(&self) -> Context<'_> {
        Context::new(&self.decls, &self.artifacts, &self.registry)
    }
}

fn file(endianness: &str, declarations: serde_json::Value) -> ast::File {
    serde_json::from_value(serde_json::json!({
        "endianness": endianness,
        "declarations": declarations,
    }))
    .expect("malformed declaration description")
}

/// Functions available to all tests:
///  - `sum8`, `sum16`: byte sums truncated to 8 and 16 bits,
///  - `length_prefixed`: values whose first octet is the number of
///    octets that follow it.
pub fn registry() -> Registry {
    Registry::new()
        .with_checksum("sum8", byte_sum(8))
        .with_checksum("sum16", byte_sum(16))
        .with_custom_field("length_prefixed", |bytes: &[u8]| {
            bytes.first().map(|len| *len as usize + 1).filter(|size| *size <= bytes.len())
        })
}

/// Analyze declarations that must be valid, using the default registry.
pub fn compile(endianness: &str, declarations: serde_json::Value) -> Compiled {
    compile_with(endianness, declarations, registry())
}

/// Analyze declarations that must be valid.
pub fn compile_with(
    endianness: &str,
    declarations: serde_json::Value,
    registry: Registry,
) -> Compiled {
    let decls = match analyzer::analyze(&file(endianness, declarations)) {
        Ok(decls) => decls,
        Err(diagnostics) => panic!(
            "unexpected analysis failure: {:?}",
            diagnostics.diagnostics.iter().map(|d| d.message.clone()).collect::<Vec<_>>()
        ),
    };
    let artifacts = artifacts::generate(&decls);
    Compiled { decls, artifacts, registry }
}

/// Return the codes of the errors raised by the analysis of the
/// declarations, or an empty list if they are valid.
pub fn error_codes(endianness: &str, declarations: serde_json::Value) -> Vec<String> {
    match analyzer::analyze(&file(endianness, declarations)) {
        Ok(_) => vec![],
        Err(diagnostics) => {
            diagnostics.diagnostics.iter().filter_map(|d| d.code.clone()).collect()
        }
    }
}
