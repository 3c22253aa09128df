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

//! Various utility functions used in tests.

use crate::analyzer::{self, Diagnostics};
use crate::ast;
use crate::declarations::Declarations;

/// Analyze a list of JSON declarations.
///
/// # Panics
///
/// Panics if the declarations do not match the description format.
pub fn analyze_json(
    endianness: &str,
    declarations: serde_json::Value,
) -> Result<Declarations, Diagnostics> {
    let file: ast::File = serde_json::from_value(serde_json::json!({
        "endianness": endianness,
        "declarations": declarations,
    }))
    .expect("malformed declaration description");
    analyzer::analyze(&file)
}

/// Analyze a list of JSON declarations that must be valid.
///
/// # Panics
///
/// Panics if the analysis fails; the diagnostic codes are included in the
/// panic message.
pub fn declarations(endianness: &str, declarations: serde_json::Value) -> Declarations {
    match analyze_json(endianness, declarations) {
        Ok(decls) => decls,
        Err(diagnostics) => panic!(
            "unexpected analysis failure: {:?}",
            diagnostics
                .diagnostics
                .iter()
                .map(|d| (d.code.clone(), d.message.clone()))
                .collect::<Vec<_>>()
        ),
    }
}
