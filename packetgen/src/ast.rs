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

//! Serialized description of packet declarations.
//!
//! This is the format emitted by PDL front-ends as JSON: a list of
//! declarations tagged by `kind`, with fields in declaration order.
//! Source text parsing is not part of this crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndiannessValue {
    LittleEndian,
    BigEndian,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    #[serde(default)]
    pub value: Option<u64>,
    #[serde(default)]
    pub tag_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Field {
    /// Start of the bytes covered by the named checksum field.
    #[serde(rename = "checksum_field")]
    Checksum { field_id: String },
    #[serde(rename = "padding_field")]
    Padding { size: usize },
    #[serde(rename = "size_field")]
    Size { field_id: String, width: usize },
    #[serde(rename = "count_field")]
    Count { field_id: String, width: usize },
    #[serde(rename = "body_field")]
    Body,
    #[serde(rename = "payload_field")]
    Payload {
        #[serde(default)]
        size_modifier: Option<String>,
    },
    #[serde(rename = "fixed_scalar_field")]
    FixedScalar { width: usize, value: u64 },
    #[serde(rename = "fixed_enum_field")]
    FixedEnum { enum_id: String, tag_id: String },
    #[serde(rename = "reserved_field")]
    Reserved { width: usize },
    #[serde(rename = "array_field")]
    Array {
        id: String,
        #[serde(default)]
        width: Option<usize>,
        #[serde(default)]
        type_id: Option<String>,
        #[serde(default)]
        size_modifier: Option<String>,
        #[serde(default)]
        size: Option<usize>,
    },
    #[serde(rename = "scalar_field")]
    Scalar { id: String, width: usize },
    #[serde(rename = "typedef_field")]
    Typedef { id: String, type_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Decl {
    #[serde(rename = "checksum_declaration")]
    Checksum { id: String, function: String, width: usize },
    #[serde(rename = "custom_field_declaration")]
    CustomField {
        id: String,
        #[serde(default)]
        width: Option<usize>,
        function: String,
    },
    #[serde(rename = "enum_declaration")]
    Enum { id: String, tags: Vec<Tag>, width: usize },
    #[serde(rename = "packet_declaration")]
    Packet {
        id: String,
        #[serde(default)]
        constraints: Vec<Constraint>,
        fields: Vec<Field>,
        #[serde(default)]
        parent_id: Option<String>,
    },
    #[serde(rename = "struct_declaration")]
    Struct {
        id: String,
        #[serde(default)]
        constraints: Vec<Constraint>,
        fields: Vec<Field>,
        #[serde(default)]
        parent_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub endianness: EndiannessValue,
    pub declarations: Vec<Decl>,
}

impl Decl {
    pub fn id(&self) -> &str {
        match self {
            Decl::Checksum { id, .. }
            | Decl::CustomField { id, .. }
            | Decl::Enum { id, .. }
            | Decl::Packet { id, .. }
            | Decl::Struct { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Decl::Checksum { .. } => "checksum",
            Decl::CustomField { .. } => "custom field",
            Decl::Enum { .. } => "enum",
            Decl::Packet { .. } => "packet",
            Decl::Struct { .. } => "struct",
        }
    }
}

impl Field {
    pub fn id(&self) -> Option<&str> {
        match self {
            Field::Array { id, .. } | Field::Scalar { id, .. } | Field::Typedef { id, .. } => {
                Some(id)
            }
            _ => None,
        }
    }
}

impl File {
    /// Parse a declaration file from its JSON representation.
    pub fn from_json(text: &str) -> serde_json::Result<File> {
        serde_json::from_str(text)
    }
}
