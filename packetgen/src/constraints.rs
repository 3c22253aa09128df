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

//! Constraints placed by derived declarations on the fields of their
//! parents, and the builder parameters that remain.

use codespan_reporting::diagnostic::Diagnostic;
use indexmap::IndexMap;
use packetgen_runtime::max_value;
use serde::Serialize;
use std::fmt;

use crate::analyzer::{ErrorCode, FileId};
use crate::ast;
use crate::declarations::Declarations;
use crate::field::{Field, FieldKind};
use crate::typedef::{TypeDefKind, TypeKey};

/// Literal assigned to a constrained field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConstraintValue {
    Scalar(u64),
    Tag(String),
}

impl fmt::Display for ConstraintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintValue::Scalar(value) => write!(f, "{value}"),
            ConstraintValue::Tag(tag) => write!(f, "{tag}"),
        }
    }
}

/// Field still provided by the builder of a declaration, with the
/// declaration that owns it.
#[derive(Debug, Clone, Copy)]
pub struct Parameter<'d> {
    pub owner: TypeKey,
    pub field: &'d Field,
}

/// Return the fields of the declaration and its ancestors that remain to
/// be provided by its builder: every parameter field not constrained by
/// the declaration or one of its ancestors. Ancestor fields come first.
pub fn parameters(decls: &Declarations, key: TypeKey) -> Vec<Parameter<'_>> {
    let Some(def) = decls.parent_def(key) else {
        return vec![];
    };
    let mut parameters = match def.parent {
        Some(parent) => parameters(decls, parent),
        None => vec![],
    };
    parameters.retain(|parameter| !def.constraints.contains_key(&parameter.field.name));
    parameters.extend(
        def.fields
            .iter()
            .filter(|field| field.takes_parameter())
            .map(|field| Parameter { owner: key, field }),
    );
    parameters
}

/// Return all the constraints applied by the declaration and its
/// ancestors, outermost first.
pub fn chain_constraints(decls: &Declarations, key: TypeKey) -> IndexMap<String, ConstraintValue> {
    let mut chain: Vec<TypeKey> = decls.iter_parents_and_self(key).collect();
    chain.reverse();
    let mut constraints = IndexMap::new();
    for key in chain {
        if let Some(def) = decls.parent_def(key) {
            for (field, value) in &def.constraints {
                constraints.insert(field.clone(), value.clone());
            }
        }
    }
    constraints
}

/// Validate a constraint on a field of `parent` and add it to the
/// constraints of the derived declaration.
pub fn add_parent_constraint(
    decls: &Declarations,
    parent: TypeKey,
    constraints: &mut IndexMap<String, ConstraintValue>,
    constraint: &ast::Constraint,
) -> Result<(), Diagnostic<FileId>> {
    let id = &constraint.id;
    if constraints.contains_key(id) {
        return Err(Diagnostic::error()
            .with_code(ErrorCode::DuplicateConstraintIdentifier)
            .with_message(format!("duplicate constraint on field `{id}`")));
    }

    let visible = parameters(decls, parent);
    let Some(parameter) = visible.iter().find(|parameter| parameter.field.name == *id) else {
        let declared = decls
            .iter_parents_and_self(parent)
            .filter_map(|key| decls.parent_def(key))
            .any(|def| def.fields.contains(id));
        return Err(if declared {
            Diagnostic::error()
                .with_code(ErrorCode::InvalidConstraintIdentifier)
                .with_message(format!("field `{id}` cannot be constrained"))
                .with_notes(vec![format!(
                    "note: `{id}` is already constrained by `{}` or one of its parents",
                    decls.get(parent).name
                )])
        } else {
            Diagnostic::error()
                .with_code(ErrorCode::UndeclaredConstraintIdentifier)
                .with_message(format!(
                    "undeclared constraint identifier `{id}` in the fields of `{}`",
                    decls.get(parent).name
                ))
        });
    };

    let value = match (&parameter.field.kind, constraint.value, &constraint.tag_id) {
        (FieldKind::Scalar { width }, Some(value), None) => {
            if value > max_value(*width) {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::ConstraintValueOutOfRange)
                    .with_message(format!(
                        "constraint value `{value}` is larger than maximum value"
                    ))
                    .with_notes(vec![format!("note: `{id}` is {width} bits wide")]));
            }
            ConstraintValue::Scalar(value)
        }
        (FieldKind::Enum { type_key, .. }, None, Some(tag_id)) => {
            let declared = matches!(&decls.get(*type_key).kind,
                TypeDefKind::Enum(def) if def.value_of(tag_id).is_some());
            if !declared {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::UndeclaredEnumTag)
                    .with_message(format!(
                        "undeclared enum tag `{tag_id}` of enum `{}`",
                        decls.get(*type_key).name
                    )));
            }
            ConstraintValue::Tag(tag_id.clone())
        }
        (FieldKind::Scalar { .. }, _, _) | (FieldKind::Enum { .. }, _, _) => {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::InvalidConstraintValue)
                .with_message(format!(
                    "invalid constraint value for field `{id}`, expected {}",
                    if matches!(parameter.field.kind, FieldKind::Scalar { .. }) {
                        "an integer"
                    } else {
                        "an enum tag"
                    }
                )))
        }
        _ => {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::InvalidConstraintIdentifier)
                .with_message(format!(
                    "field `{id}` cannot be constrained, only scalar and enum fields can"
                )))
        }
    };
    constraints.insert(id.clone(), value);
    Ok(())
}

/// Resolve a constraint value to the integer stored on the wire.
pub fn constraint_integer(
    decls: &Declarations,
    field: &Field,
    value: &ConstraintValue,
) -> Option<u64> {
    match (value, &field.kind) {
        (ConstraintValue::Scalar(value), _) => Some(*value),
        (ConstraintValue::Tag(tag), FieldKind::Enum { type_key, .. }) => {
            match &decls.get(*type_key).kind {
                TypeDefKind::Enum(def) => def.value_of(tag),
                _ => None,
            }
        }
        _ => None,
    }
}
