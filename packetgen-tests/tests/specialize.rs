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

use googletest::prelude::{assert_that, eq};
use packetgen::runtime::Value;
use packetgen_runtime::EncodeError;
use packetgen_tests::{compile, Compiled};
use serde_json::json;

fn no_parameters() -> [(&'static str, Value); 0] {
    []
}

mod child_determined_by_constraint {
    use super::*;

    fn compiled() -> Compiled {
        compile(
            "big_endian",
            json!([
                { "kind": "packet_declaration", "id": "Parent", "fields": [
                    { "kind": "scalar_field", "id": "kind", "width": 8 },
                    { "kind": "payload_field" }
                ] },
                { "kind": "packet_declaration", "id": "Child1", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "value": 1 } ],
                  "fields": [ { "kind": "scalar_field", "id": "a", "width": 8 } ] },
                { "kind": "packet_declaration", "id": "Child2", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "value": 2 } ],
                  "fields": [ { "kind": "scalar_field", "id": "b", "width": 16 } ] }
            ]),
        )
    }

    #[test]
    fn test_child1() {
        let compiled = compiled();
        let ctx = compiled.context();
        let bytes = ctx.builder("Child1", [("a", Value::Integer(5))]).unwrap().serialize().unwrap();
        assert_that!(bytes, eq(vec![1, 5]));

        let parent = ctx.view("Parent", &bytes).unwrap();
        let child = ctx.specialize(&parent).unwrap();
        assert_that!(child.name(), eq("Child1"));
        assert_that!(child.get("a"), eq(Ok(Value::Integer(5))));
        assert_that!(child.get("kind"), eq(Ok(Value::Integer(1))));
        assert_that!(parent.payload(), eq(Ok(&[5u8][..])));
        assert_that!(ctx.matching_children(&parent), eq(vec!["Child1".to_owned()]));
    }

    #[test]
    fn test_child2() {
        let compiled = compiled();
        let ctx = compiled.context();
        let bytes = [2, 0, 7];
        let parent = ctx.view("Parent", &bytes).unwrap();
        let child = ctx.specialize(&parent).unwrap();
        assert_that!(child.name(), eq("Child2"));
        assert_that!(child.get("b"), eq(Ok(Value::Integer(7))));

        // The payload is too short for Child2.
        let bytes = [2, 0];
        let parent = ctx.view("Parent", &bytes).unwrap();
        assert_that!(ctx.specialize(&parent).map(|view| view.name()), eq(Some("Parent")));
    }

    #[test]
    fn test_none() {
        let compiled = compiled();
        let ctx = compiled.context();
        let bytes = [4, 0];
        let parent = ctx.view("Parent", &bytes).unwrap();
        assert_that!(ctx.specialize(&parent).map(|view| view.name()), eq(Some("Parent")));
        assert!(ctx.matching_children(&parent).is_empty());

        // Views of children validate the constraints of the chain.
        assert!(!ctx.view("Child1", &bytes).unwrap().is_valid());

        let bytes: [u8; 0] = [];
        let parent = ctx.view("Parent", &bytes).unwrap();
        assert!(ctx.specialize(&parent).is_none());
    }

    #[test]
    fn test_build_parent() {
        let compiled = compiled();
        let ctx = compiled.context();
        let builder = ctx
            .builder("Parent", [("kind", Value::Integer(9))])
            .unwrap()
            .with_payload(vec![1, 2])
            .unwrap();
        assert_that!(builder.size(), eq(Ok(3)));
        assert_that!(builder.serialize(), eq(Ok(vec![9, 1, 2])));

        // Constrained fields are not parameters of the child builders.
        assert_that!(
            ctx.builder("Child1", [("kind", Value::Integer(1)), ("a", Value::Integer(5))])
                .map(|builder| builder.name()),
            eq(Err(EncodeError::UnknownParameter {
                packet: "Child1".to_owned(),
                field: "kind".to_owned(),
            }))
        );
        assert_that!(
            ctx.builder("Child1", [("a", Value::Integer(5))])
                .unwrap()
                .with_payload(vec![1])
                .map(|builder| builder.name()),
            eq(Err(EncodeError::UnknownParameter {
                packet: "Child1".to_owned(),
                field: "_payload_".to_owned(),
            }))
        );
    }
}

mod indistinguishable_children {
    use super::*;

    #[test]
    fn test_first_declared_is_selected() {
        let compiled = compile(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "Parent", "fields": [
                    { "kind": "scalar_field", "id": "kind", "width": 8 },
                    { "kind": "payload_field" }
                ] },
                { "kind": "packet_declaration", "id": "A", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "value": 1 } ],
                  "fields": [ { "kind": "scalar_field", "id": "a", "width": 8 } ] },
                { "kind": "packet_declaration", "id": "B", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "value": 1 } ],
                  "fields": [ { "kind": "scalar_field", "id": "b", "width": 8 } ] }
            ]),
        );
        assert_eq!(compiled.decls.warnings().diagnostics.len(), 1);

        let ctx = compiled.context();
        let bytes = [1, 42];
        let parent = ctx.view("Parent", &bytes).unwrap();
        assert_that!(ctx.matching_children(&parent), eq(vec!["A".to_owned(), "B".to_owned()]));
        assert_that!(ctx.specialize(&parent).map(|view| view.name()), eq(Some("A")));
    }
}

mod nested_hierarchy {
    use super::*;

    fn compiled() -> Compiled {
        compile(
            "little_endian",
            json!([
                { "kind": "enum_declaration", "id": "Kind", "width": 8,
                  "tags": [ { "id": "DATA", "value": 1 }, { "id": "CONTROL", "value": 2 } ] },
                { "kind": "packet_declaration", "id": "Frame", "fields": [
                    { "kind": "typedef_field", "id": "kind", "type_id": "Kind" },
                    { "kind": "size_field", "field_id": "_payload_", "width": 8 },
                    { "kind": "payload_field" },
                    { "kind": "scalar_field", "id": "footer", "width": 8 }
                ] },
                { "kind": "packet_declaration", "id": "Data", "parent_id": "Frame",
                  "constraints": [ { "id": "kind", "tag_id": "DATA" } ],
                  "fields": [
                    { "kind": "scalar_field", "id": "channel", "width": 8 },
                    { "kind": "size_field", "field_id": "_payload_", "width": 8 },
                    { "kind": "payload_field" }
                  ] },
                { "kind": "packet_declaration", "id": "Text", "parent_id": "Data",
                  "constraints": [ { "id": "channel", "value": 7 } ],
                  "fields": [
                    { "kind": "array_field", "id": "text", "width": 8 }
                  ] }
            ]),
        )
    }

    #[test]
    fn test_serialize() {
        let compiled = compiled();
        let ctx = compiled.context();
        let builder = ctx
            .builder(
                "Text",
                [
                    ("footer", Value::Integer(0xff)),
                    ("text", Value::List(vec![Value::Integer(0x68), Value::Integer(0x69)])),
                ],
            )
            .unwrap();
        assert_that!(builder.size(), eq(Ok(7)));
        assert_that!(builder.serialize(), eq(Ok(vec![1, 4, 7, 2, 0x68, 0x69, 0xff])));
    }

    #[test]
    fn test_specialize() {
        let compiled = compiled();
        let ctx = compiled.context();
        let bytes = [1, 4, 7, 2, 0x68, 0x69, 0xff];
        let frame = ctx.view("Frame", &bytes).unwrap();
        let text = ctx.specialize(&frame).unwrap();
        assert_that!(text.name(), eq("Text"));
        assert_that!(
            text.get("text"),
            eq(Ok(Value::List(vec![Value::Integer(0x68), Value::Integer(0x69)])))
        );
        assert_that!(text.get("footer"), eq(Ok(Value::Integer(0xff))));
        assert_that!(text.get("kind"), eq(Ok(Value::Tag("DATA".to_owned()))));
        assert_that!(text.size(), eq(7));

        // The size fields of each level delimit their own payload.
        let data = ctx.view("Data", &bytes).unwrap();
        assert!(data.is_valid());
        assert_that!(data.payload(), eq(Ok(&[0x68u8, 0x69][..])));
        assert_that!(frame.payload(), eq(Ok(&[7u8, 2, 0x68, 0x69][..])));
    }

    #[test]
    fn test_inner_payload_overflow() {
        let compiled = compiled();
        let ctx = compiled.context();
        // The payload of Data extends past the payload of Frame.
        let bytes = [1, 4, 7, 3, 0x68, 0x69, 0xff];
        let frame = ctx.view("Frame", &bytes).unwrap();
        assert_that!(ctx.specialize(&frame).map(|view| view.name()), eq(Some("Frame")));
        assert!(!ctx.view("Data", &bytes).unwrap().is_valid());
    }

    #[test]
    fn test_abstract_declaration() {
        let compiled = compile(
            "little_endian",
            json!([
                { "kind": "struct_declaration", "id": "Abstract", "fields": [
                    { "kind": "scalar_field", "id": "a", "width": 8 },
                    { "kind": "body_field" }
                ] }
            ]),
        );
        assert_that!(
            compiled.context().builder("Abstract", no_parameters()).map(|builder| builder.name()),
            eq(Err(EncodeError::AbstractDeclaration { packet: "Abstract".to_owned() }))
        );
    }
}
