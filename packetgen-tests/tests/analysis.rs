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

use googletest::prelude::{assert_that, eq, is_empty};
use packetgen_tests::error_codes;
use serde_json::json;

#[test]
fn test_ambiguous_field_offset() {
    // Two unbounded arrays cannot both be located.
    assert_that!(
        error_codes(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "array_field", "id": "a", "width": 8 },
                    { "kind": "array_field", "id": "b", "width": 8 }
                ] }
            ]),
        ),
        eq(vec!["E56".to_owned()])
    );
}

#[test]
fn test_constraint_out_of_range() {
    assert_that!(
        error_codes(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "scalar_field", "id": "a", "width": 4 },
                    { "kind": "reserved_field", "width": 4 },
                    { "kind": "payload_field" }
                ] },
                { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                  "constraints": [ { "id": "a", "value": 16 } ],
                  "fields": [] }
            ]),
        ),
        eq(vec!["E18".to_owned()])
    );
}

#[test]
fn test_warnings_do_not_fail_analysis() {
    assert_that!(
        error_codes(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "scalar_field", "id": "a", "width": 8 },
                    { "kind": "payload_field" }
                ] },
                { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                  "constraints": [ { "id": "a", "value": 1 } ], "fields": [] },
                { "kind": "packet_declaration", "id": "C", "parent_id": "A",
                  "constraints": [ { "id": "a", "value": 1 } ], "fields": [] }
            ]),
        ),
        is_empty()
    );
}
