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

use std::fs;
use std::process::{Command, Output};

use googletest::prelude::{assert_that, contains_substring, eq, not};

const DECLARATIONS: &str = r#"{
  "endianness": "little_endian",
  "declarations": [
    { "kind": "enum_declaration", "id": "Color", "width": 8,
      "tags": [ { "id": "RED", "value": 1 }, { "id": "GREEN", "value": 2 } ] },
    { "kind": "packet_declaration", "id": "Pixel", "fields": [
        { "kind": "typedef_field", "id": "color", "type_id": "Color" },
        { "kind": "scalar_field", "id": "x", "width": 16 } ] },
    { "kind": "struct_declaration", "id": "Unused", "fields": [
        { "kind": "scalar_field", "id": "a", "width": 8 } ] }
  ]
}"#;

/// Run `packetgen` on the declarations with the selected arguments.
///
/// # Panics
///
/// Panics if `packetgen` cannot be started.
fn packetgen(declarations: &str, args: &[&str]) -> Output {
    let tempdir = tempfile::tempdir().unwrap();
    let input = tempdir.path().join("input.json");
    fs::write(&input, declarations.as_bytes()).unwrap();
    Command::new(env!("CARGO_BIN_EXE_packetgen"))
        .args(args)
        .arg(input)
        .output()
        .expect("packetgen failed")
}

#[track_caller]
fn stdout(output: Output) -> String {
    assert!(output.status.success(), "packetgen failure: {:?}", output);
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_json_output() {
    let output = stdout(packetgen(DECLARATIONS, &[]));
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_that!(value["endianness"].as_str(), eq(Some("little_endian")));
    assert_that!(value["types"]["Pixel"]["view"]["min_size"].as_u64(), eq(Some(24)));
    assert_that!(value["types"]["Unused"]["kind"].as_str(), eq(Some("struct")));
}

#[test]
fn test_layout_output() {
    let output = stdout(packetgen(DECLARATIONS, &["--output-format", "layout"]));
    assert_that!(output, contains_substring("enum Color : 8"));
    assert_that!(output, contains_substring("packet Pixel (size 24, min 24)"));
}

#[test]
fn test_exclude_declaration() {
    let output = stdout(packetgen(DECLARATIONS, &["--exclude-declaration", "Unused"]));
    assert_that!(output, contains_substring("Pixel"));
    assert_that!(output, not(contains_substring("Unused")));
}

#[test]
fn test_analysis_failure() {
    let declarations = r#"{
      "endianness": "big_endian",
      "declarations": [
        { "kind": "packet_declaration", "id": "A", "fields": [
            { "kind": "scalar_field", "id": "a", "width": 8 },
            { "kind": "scalar_field", "id": "a", "width": 8 } ] }
      ]
    }"#;
    let output = packetgen(declarations, &[]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert_that!(stderr, contains_substring("Analysis failed"));
    assert_that!(stderr, contains_substring("`a`"));
}

#[test]
fn test_malformed_input() {
    let output = packetgen("{ \"declarations\": 1 }", &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert_that!(stderr, contains_substring("could not parse"));
}
