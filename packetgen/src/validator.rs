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

//! Validation plans.
//!
//! A struct or packet is validated one declaration level at a time,
//! starting from the root declaration. Each level runs, in order:
//! a minimum size check, a walk over its fields, checksum checks,
//! constraint checks and field value checks. The first failing step
//! makes the whole view invalid.

use serde::Serialize;

use crate::constraints::constraint_integer;
use crate::declarations::Declarations;
use crate::field::FieldKind;
use crate::typedef::{TypeDefKind, TypeKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumCheck {
    /// Checksum start marker.
    pub start: String,
    pub field: String,
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintCheck {
    pub field: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum FieldCheck {
    /// The field must hold the fixed value.
    Fixed { field: String, value: u64 },
    /// The nested struct must be valid.
    Struct { field: String, struct_id: String },
}

/// Validation plan of one declaration level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatorSpec {
    /// Static size of the fields of the level, in bits.
    pub min_size: usize,
    /// Fields of the level, in the order they are walked.
    pub walk: Vec<String>,
    pub checksums: Vec<ChecksumCheck>,
    pub constraints: Vec<ConstraintCheck>,
    pub field_checks: Vec<FieldCheck>,
}

pub fn generate_validator(decls: &Declarations, key: TypeKey) -> Option<ValidatorSpec> {
    let def = decls.parent_def(key)?;

    let walk = def.fields.iter().map(|field| field.name.clone()).collect();

    let checksums = def
        .fields
        .iter()
        .filter_map(|start| match &start.kind {
            FieldKind::ChecksumStart { checksum_field } => {
                let field = def.fields.get(checksum_field)?;
                let FieldKind::Checksum { type_key, .. } = &field.kind else {
                    return None;
                };
                let TypeDefKind::Checksum(checksum) = &decls.get(*type_key).kind else {
                    return None;
                };
                Some(ChecksumCheck {
                    start: start.name.clone(),
                    field: field.name.clone(),
                    function: checksum.function.clone(),
                })
            }
            _ => None,
        })
        .collect();

    let constraints = def
        .constraints
        .iter()
        .filter_map(|(name, value)| {
            let parent = def.parent?;
            let owner = decls.owner_of(parent, name)?;
            let field = decls.parent_def(owner)?.fields.get(name)?;
            Some(ConstraintCheck {
                field: name.clone(),
                value: constraint_integer(decls, field, value)?,
            })
        })
        .collect();

    let field_checks = def
        .fields
        .iter()
        .filter_map(|field| match &field.kind {
            FieldKind::FixedScalar { value, .. } | FieldKind::FixedEnum { value, .. } => {
                Some(FieldCheck::Fixed { field: field.name.clone(), value: *value })
            }
            FieldKind::Struct { type_key, .. } | FieldKind::VariableLengthStruct { type_key } => {
                Some(FieldCheck::Struct {
                    field: field.name.clone(),
                    struct_id: decls.get(*type_key).name.clone(),
                })
            }
            _ => None,
        })
        .collect();

    Some(ValidatorSpec {
        min_size: decls.level_min_size(key),
        walk,
        checksums,
        constraints,
        field_checks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::declarations;
    use serde_json::json;

    #[test]
    fn test_generate_validator() {
        let decls = declarations(
            "big_endian",
            json!([
                { "kind": "enum_declaration", "id": "Kind", "width": 8,
                  "tags": [ { "id": "A", "value": 1 }, { "id": "B", "value": 2 } ] },
                { "kind": "checksum_declaration", "id": "Sum", "function": "sum", "width": 8 },
                { "kind": "struct_declaration", "id": "S", "fields": [
                    { "kind": "scalar_field", "id": "s", "width": 8 }
                ] },
                { "kind": "packet_declaration", "id": "Parent", "fields": [
                    { "kind": "typedef_field", "id": "kind", "type_id": "Kind" },
                    { "kind": "payload_field" }
                ] },
                { "kind": "packet_declaration", "id": "Child", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "tag_id": "B" } ],
                  "fields": [
                    { "kind": "checksum_field", "field_id": "crc" },
                    { "kind": "fixed_scalar_field", "width": 8, "value": 42 },
                    { "kind": "typedef_field", "id": "nested", "type_id": "S" },
                    { "kind": "typedef_field", "id": "crc", "type_id": "Sum" }
                  ] }
            ]),
        );
        let spec = generate_validator(&decls, decls.lookup("Child").unwrap()).unwrap();
        assert_eq!(spec.min_size, 24);
        assert_eq!(spec.walk, vec!["_checksum_start_0", "_fixed_1", "nested", "crc"]);
        assert_eq!(
            spec.checksums,
            vec![ChecksumCheck {
                start: "_checksum_start_0".to_owned(),
                field: "crc".to_owned(),
                function: "sum".to_owned(),
            }]
        );
        assert_eq!(spec.constraints, vec![ConstraintCheck { field: "kind".to_owned(), value: 2 }]);
        assert_eq!(
            spec.field_checks,
            vec![
                FieldCheck::Fixed { field: "_fixed_1".to_owned(), value: 42 },
                FieldCheck::Struct { field: "nested".to_owned(), struct_id: "S".to_owned() },
            ]
        );
        assert!(generate_validator(&decls, decls.lookup("Kind").unwrap()).is_none());
    }
}
