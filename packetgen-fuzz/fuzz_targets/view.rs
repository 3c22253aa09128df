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
use packetgen::runtime::{Context, Registry};
use packetgen::{analyzer, ast, backends};

const DECLARATIONS: &str = r#"{
  "endianness": "big_endian",
  "declarations": [
    { "kind": "struct_declaration", "id": "Label", "fields": [
        { "kind": "count_field", "field_id": "chars", "width": 8 },
        { "kind": "array_field", "id": "chars", "width": 8 } ] },
    { "kind": "packet_declaration", "id": "Frame", "fields": [
        { "kind": "scalar_field", "id": "kind", "width": 4 },
        { "kind": "reserved_field", "width": 4 },
        { "kind": "size_field", "field_id": "_payload_", "width": 8 },
        { "kind": "payload_field", "size_modifier": "+1" },
        { "kind": "scalar_field", "id": "footer", "width": 8 } ] },
    { "kind": "packet_declaration", "id": "Marker", "parent_id": "Frame",
      "constraints": [ { "id": "kind", "value": 1 } ],
      "fields": [
        { "kind": "typedef_field", "id": "label", "type_id": "Label" },
        { "kind": "count_field", "field_id": "points", "width": 8 },
        { "kind": "array_field", "id": "points", "width": 16 } ] }
  ]
}"#;

// Fuzz the validation and decoding of views.
fuzz_target!(|bytes: &[u8]| {
    let Ok(file) = ast::File::from_json(DECLARATIONS) else {
        return;
    };
    let Ok(decls) = analyzer::analyze(&file) else {
        return;
    };
    let artifacts = backends::artifacts::generate(&decls);
    let registry = Registry::new();
    let ctx = Context::new(&decls, &artifacts, &registry);
    let Ok(view) = ctx.view("Frame", bytes) else {
        return;
    };
    if let Some(view) = ctx.specialize(&view) {
        let _ = view.to_struct_value();
        let _ = view.size();
    }
});
