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

//! Declared types.

use codespan_reporting::diagnostic::Diagnostic;
use heck::ToShoutySnakeCase;
use indexmap::IndexMap;
use packetgen_runtime::{max_value, Endianness};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::analyzer::{ErrorCode, FileId};
use crate::constraints::ConstraintValue;
use crate::field_list::FieldList;

/// Stable reference to a declaration in the declaration table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TypeKey(pub usize);

/// Enumeration of named constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub width: usize,
    pub constants: BTreeMap<u64, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDef {
    pub width: usize,
    /// Name of the external checksum algorithm.
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDef {
    /// Width in bits. Custom fields without a width use an external
    /// size function to determine their size.
    pub width: Option<usize>,
    pub function: String,
}

/// Shared definition of structs and packets.
#[derive(Debug, Clone)]
pub struct ParentDef {
    pub parent: Option<TypeKey>,
    pub fields: FieldList,
    /// Values assigned to parent fields, in declaration order.
    pub constraints: IndexMap<String, ConstraintValue>,
    pub endianness: Endianness,
}

#[derive(Debug, Clone)]
pub enum TypeDefKind {
    Enum(EnumDef),
    Checksum(ChecksumDef),
    Custom(CustomDef),
    Struct(ParentDef),
    Packet(ParentDef),
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeDefKind,
}

/// Check that a scalar width can be held by a single integer.
pub(crate) fn check_width(
    width: usize,
    what: impl std::fmt::Display,
) -> Result<(), Diagnostic<FileId>> {
    if width == 0 || width > 64 {
        return Err(Diagnostic::error()
            .with_code(ErrorCode::InvalidFieldWidth)
            .with_message(format!("invalid width {width} for {what}"))
            .with_notes(vec!["note: widths must be in the range 1..=64".to_owned()]));
    }
    Ok(())
}

impl EnumDef {
    /// Construct an enum from its tags, in declaration order.
    pub fn new<I, S>(name: &str, width: usize, tags: I) -> Result<EnumDef, Diagnostic<FileId>>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        check_width(width, format_args!("enum `{name}`"))?;
        let mut constants = BTreeMap::new();
        let mut names = std::collections::HashSet::new();
        for (id, value) in tags {
            let id = id.into();
            if id.is_empty()
                || !id.starts_with(|c: char| c.is_ascii_uppercase())
                || id.to_shouty_snake_case() != id
            {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::InvalidTagIdentifier)
                    .with_message(format!("tag `{id}` of enum `{name}` is not UPPER_SNAKE_CASE")));
            }
            if value > max_value(width) {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::InvalidTagValue)
                    .with_message(format!(
                        "value {value} of tag `{id}` does not fit in {width} bits"
                    )));
            }
            if !names.insert(id.clone()) {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::DuplicateTagIdentifier)
                    .with_message(format!("duplicate tag identifier `{id}` in enum `{name}`")));
            }
            if let Some(other) = constants.get(&value) {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::DuplicateTagValue)
                    .with_message(format!(
                        "tags `{other}` and `{id}` of enum `{name}` have the same value {value}"
                    )));
            }
            constants.insert(value, id);
        }
        Ok(EnumDef { width, constants })
    }

    pub fn value_of(&self, tag: &str) -> Option<u64> {
        self.constants.iter().find(|(_, id)| *id == tag).map(|(value, _)| *value)
    }

    pub fn name_of(&self, value: u64) -> Option<&str> {
        self.constants.get(&value).map(String::as_str)
    }
}

impl TypeDef {
    pub fn new(name: impl Into<String>, kind: TypeDefKind) -> TypeDef {
        TypeDef { name: name.into(), kind }
    }

    pub fn parent_def(&self) -> Option<&ParentDef> {
        match &self.kind {
            TypeDefKind::Struct(def) | TypeDefKind::Packet(def) => Some(def),
            _ => None,
        }
    }

    pub fn parent_def_mut(&mut self) -> Option<&mut ParentDef> {
        match &mut self.kind {
            TypeDefKind::Struct(def) | TypeDefKind::Packet(def) => Some(def),
            _ => None,
        }
    }

    pub fn is_packet(&self) -> bool {
        matches!(self.kind, TypeDefKind::Packet(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TypeDefKind::Enum(_) => "enum",
            TypeDefKind::Checksum(_) => "checksum",
            TypeDefKind::Custom(_) => "custom field",
            TypeDefKind::Struct(_) => "struct",
            TypeDefKind::Packet(_) => "packet",
        }
    }
}
