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

//! Specification objects for the views, validators and builders of
//! every declared type.
//!
//! The artifacts hold everything a code generator needs to emit a parser
//! and serializer for a declaration file: field locations expressed as
//! [`Size`] expressions, per-level validation plans, builder parameter
//! lists and dispatch trees.

use indexmap::IndexMap;
use packetgen_runtime::Endianness;
use serde::Serialize;

use crate::constraints::{chain_constraints, parameters, ConstraintValue};
use crate::declarations::Declarations;
use crate::dispatch::{dispatch_tree, DispatchNode};
use crate::field::{FieldKind, FieldType};
use crate::layout::bitfield_chunks;
use crate::size::Size;
use crate::typedef::{TypeDefKind, TypeKey};
use crate::validator::{generate_validator, ValidatorSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumSpec {
    pub width: usize,
    pub tags: IndexMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumSpec {
    pub width: usize,
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomSpec {
    pub width: Option<usize>,
    pub function: String,
}

/// Position of a bit-field within its chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitfieldSpec {
    /// First field of the chunk, which locates the chunk.
    pub chunk: String,
    pub chunk_width: usize,
    pub shift: usize,
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    /// Declaration owning the field.
    pub owner: String,
    pub field_type: FieldType,
    pub start: Size,
    pub end: Size,
    pub size: Size,
    pub addressable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitfield: Option<BitfieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewSpec {
    pub name: String,
    pub parent: Option<String>,
    /// Declaration and its parents, root first.
    pub levels: Vec<String>,
    pub size: Size,
    /// Static size of the declaration, in bits.
    pub min_size: usize,
    /// Payload or body field of the declaration itself.
    pub payload: Option<String>,
    /// Fields of all levels, in wire order.
    pub fields: Vec<FieldSpec>,
}

impl ViewSpec {
    /// Return the named field as seen from the declaration: fields of
    /// derived levels shadow the generated fields of their parents.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .filter(|field| field.name == name)
            .max_by_key(|field| self.levels.iter().position(|level| *level == field.owner))
    }

    /// Return the named field owned by the selected level.
    pub fn level_field(&self, level: &str, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.owner == level && field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    pub owner: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuilderSpec {
    pub parameters: Vec<ParameterSpec>,
    /// Parent fields fixed by the constraints of the declaration chain.
    pub constants: IndexMap<String, ConstraintValue>,
    /// Whether the builder accepts payload bytes.
    pub payload: bool,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentArtifact {
    pub view: ViewSpec,
    pub validator: ValidatorSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builder: Option<BuilderSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeArtifact {
    Enum(EnumSpec),
    Checksum(ChecksumSpec),
    Custom(CustomSpec),
    Struct(ParentArtifact),
    Packet(ParentArtifact),
}

impl TypeArtifact {
    pub fn parent_artifact(&self) -> Option<&ParentArtifact> {
        match self {
            TypeArtifact::Struct(artifact) | TypeArtifact::Packet(artifact) => Some(artifact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub endianness: &'static str,
    /// Artifacts of all declarations, in declaration order.
    pub types: IndexMap<String, TypeArtifact>,
}

impl Artifacts {
    pub fn get(&self, name: &str) -> Option<&TypeArtifact> {
        self.types.get(name)
    }

    pub fn parent_artifact(&self, name: &str) -> Option<&ParentArtifact> {
        self.get(name).and_then(TypeArtifact::parent_artifact)
    }

    pub fn view(&self, name: &str) -> Option<&ViewSpec> {
        self.parent_artifact(name).map(|artifact| &artifact.view)
    }
}

fn generate_view(decls: &Declarations, key: TypeKey) -> ViewSpec {
    let mut levels: Vec<String> =
        decls.iter_parents_and_self(key).map(|key| decls.get(key).name.clone()).collect();
    levels.reverse();

    let mut bitfields = IndexMap::new();
    for level in decls.iter_parents_and_self(key) {
        let Some(def) = decls.parent_def(level) else { continue };
        for chunk in bitfield_chunks(&def.fields).unwrap_or_default() {
            for (name, shift, width) in &chunk.fields {
                bitfields.insert(
                    (level, name.clone()),
                    BitfieldSpec {
                        chunk: chunk.first().to_owned(),
                        chunk_width: chunk.width,
                        shift: *shift,
                        width: *width,
                    },
                );
            }
        }
    }

    let fields = decls
        .flattened_fields(key)
        .into_iter()
        .map(|(owner, field)| {
            // Locations are computed from the owning level, so that the
            // generated names of parent levels resolve to their own fields.
            let location = decls.field_location(owner, &field.name);
            let (start, end, size) = match location {
                Some(location) => (location.start, location.end, location.size),
                None => (Size::unknown(), Size::unknown(), field.size()),
            };
            FieldSpec {
                name: field.name.clone(),
                owner: decls.get(owner).name.clone(),
                field_type: field.field_type(),
                start,
                end,
                size,
                addressable: field.is_addressable(),
                bitfield: bitfields.get(&(owner, field.name.clone())).cloned(),
            }
        })
        .collect();

    ViewSpec {
        name: decls.get(key).name.clone(),
        parent: decls.get_parent(key).map(|parent| decls.get(parent).name.clone()),
        levels,
        size: decls.size_of(key, false),
        min_size: decls.min_size(key),
        payload: decls
            .parent_def(key)
            .and_then(|def| def.fields.payload())
            .map(|field| field.name.clone()),
        fields,
    }
}

fn generate_builder(decls: &Declarations, key: TypeKey) -> Option<BuilderSpec> {
    let def = decls.parent_def(key)?;
    if matches!(def.fields.payload().map(|field| &field.kind), Some(FieldKind::Body { .. })) {
        return None;
    }
    Some(BuilderSpec {
        parameters: parameters(decls, key)
            .into_iter()
            .map(|parameter| ParameterSpec {
                name: parameter.field.name.clone(),
                owner: decls.get(parameter.owner).name.clone(),
                field_type: parameter.field.field_type(),
            })
            .collect(),
        constants: chain_constraints(decls, key),
        payload: def.fields.payload().is_some(),
        size: decls.size_of(key, false),
    })
}

/// Generate the artifacts of all declarations.
pub fn generate(decls: &Declarations) -> Artifacts {
    let mut types = IndexMap::new();
    for key in decls.keys() {
        let def = decls.get(key);
        let artifact = match &def.kind {
            TypeDefKind::Enum(def) => TypeArtifact::Enum(EnumSpec {
                width: def.width,
                tags: def.constants.iter().map(|(value, tag)| (tag.clone(), *value)).collect(),
            }),
            TypeDefKind::Checksum(def) => TypeArtifact::Checksum(ChecksumSpec {
                width: def.width,
                function: def.function.clone(),
            }),
            TypeDefKind::Custom(def) => TypeArtifact::Custom(CustomSpec {
                width: def.width,
                function: def.function.clone(),
            }),
            TypeDefKind::Struct(_) | TypeDefKind::Packet(_) => {
                let Some(validator) = generate_validator(decls, key) else { continue };
                let artifact = ParentArtifact {
                    view: generate_view(decls, key),
                    validator,
                    builder: generate_builder(decls, key),
                    dispatch: dispatch_tree(decls, key),
                };
                if def.is_packet() {
                    TypeArtifact::Packet(artifact)
                } else {
                    TypeArtifact::Struct(artifact)
                }
            }
        };
        tracing::debug!(id = def.name.as_str(), kind = def.kind_name(), "generated artifact");
        types.insert(def.name.clone(), artifact);
    }
    Artifacts {
        endianness: match decls.endianness() {
            Endianness::LittleEndian => "little_endian",
            Endianness::BigEndian => "big_endian",
        },
        types,
    }
}
