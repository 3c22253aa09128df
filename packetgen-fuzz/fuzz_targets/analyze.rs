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

#![no_main]

use libfuzzer_sys::fuzz_target;
use packetgen::{analyzer, ast, backends};

// Fuzz packetgen::analyzer::analyze and the layout backends.
fuzz_target!(|source: String| {
    let Ok(file) = ast::File::from_json(&source) else {
        return;
    };
    let Ok(decls) = analyzer::analyze(&file) else {
        return;
    };
    let artifacts = backends::artifacts::generate(&decls);
    let _ = backends::json::generate(&artifacts);
    let _ = backends::summary::generate(&artifacts);
});
