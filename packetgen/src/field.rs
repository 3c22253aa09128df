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

//! Fields of struct and packet declarations.

use serde::Serialize;

use crate::size::Size;
use crate::typedef::TypeKey;

/// Reference from a vector or payload to the field holding its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sizer {
    /// Size field, holding the length in octets.
    Size(String),
    /// Count field, holding the number of elements.
    Count(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar { width: usize },
    Enum { type_key: TypeKey, width: usize },
    /// Fixed number of elements.
    Array { element: Box<Field>, count: usize },
    /// Variable number of elements, delimited by a size or count field,
    /// or by the end of the enclosing declaration.
    Vector { element: Box<Field>, sizer: Option<Sizer>, modifier: usize },
    /// Opaque value of a custom type. Custom fields without a width are
    /// measured by their size function.
    Custom { type_key: TypeKey, width: Option<usize> },
    /// Struct of statically known width.
    Struct { type_key: TypeKey, width: usize },
    VariableLengthStruct { type_key: TypeKey },
    Checksum { type_key: TypeKey, width: usize },
    /// Start of the bytes covered by a checksum.
    ChecksumStart { checksum_field: String },
    Size { target: String, width: usize },
    Count { target: String, width: usize },
    FixedScalar { width: usize, value: u64 },
    FixedEnum { type_key: TypeKey, width: usize, tag: String, value: u64 },
    Reserved { width: usize },
    /// Pads the preceding field to `size` octets.
    Padding { size: usize },
    Body { sizer: Option<Sizer> },
    Payload { sizer: Option<Sizer>, modifier: usize },
}

/// Field kind discriminant, used for filtering field lists.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Scalar,
    Enum,
    Array,
    Vector,
    Custom,
    Struct,
    VariableLengthStruct,
    Checksum,
    ChecksumStart,
    Size,
    Count,
    FixedScalar,
    FixedEnum,
    Reserved,
    Padding,
    Body,
    Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

/// Source of the names given to anonymous fields. One sequence is used
/// per compilation.
#[derive(Debug, Default)]
pub struct NameSequence {
    next: usize,
}

impl NameSequence {
    pub fn next(&mut self, prefix: &str) -> String {
        let name = format!("_{prefix}_{}", self.next);
        self.next += 1;
        name
    }
}

pub const PAYLOAD_NAME: &str = "_payload_";
pub const BODY_NAME: &str = "_body_";

pub fn size_field_name(target: &str) -> String {
    format!("_size_({target})")
}

pub fn count_field_name(target: &str) -> String {
    format!("_count_({target})")
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Field {
        Field { name: name.into(), kind }
    }

    pub fn field_type(&self) -> FieldType {
        match self.kind {
            FieldKind::Scalar { .. } => FieldType::Scalar,
            FieldKind::Enum { .. } => FieldType::Enum,
            FieldKind::Array { .. } => FieldType::Array,
            FieldKind::Vector { .. } => FieldType::Vector,
            FieldKind::Custom { .. } => FieldType::Custom,
            FieldKind::Struct { .. } => FieldType::Struct,
            FieldKind::VariableLengthStruct { .. } => FieldType::VariableLengthStruct,
            FieldKind::Checksum { .. } => FieldType::Checksum,
            FieldKind::ChecksumStart { .. } => FieldType::ChecksumStart,
            FieldKind::Size { .. } => FieldType::Size,
            FieldKind::Count { .. } => FieldType::Count,
            FieldKind::FixedScalar { .. } => FieldType::FixedScalar,
            FieldKind::FixedEnum { .. } => FieldType::FixedEnum,
            FieldKind::Reserved { .. } => FieldType::Reserved,
            FieldKind::Padding { .. } => FieldType::Padding,
            FieldKind::Body { .. } => FieldType::Body,
            FieldKind::Payload { .. } => FieldType::Payload,
        }
    }

    /// Size of the field on the wire.
    ///
    /// Padding fields report the padded size; offset computations
    /// account for the padded field and its padding as a unit.
    pub fn size(&self) -> Size {
        match &self.kind {
            FieldKind::Scalar { width }
            | FieldKind::Enum { width, .. }
            | FieldKind::Struct { width, .. }
            | FieldKind::Checksum { width, .. }
            | FieldKind::Size { width, .. }
            | FieldKind::Count { width, .. }
            | FieldKind::FixedScalar { width, .. }
            | FieldKind::FixedEnum { width, .. }
            | FieldKind::Reserved { width } => Size::from_bits(*width),
            FieldKind::Custom { width: Some(width), .. } => Size::from_bits(*width),
            FieldKind::Custom { width: None, .. } | FieldKind::VariableLengthStruct { .. } => {
                Size::unknown()
            }
            FieldKind::ChecksumStart { .. } => Size::from_bits(0),
            FieldKind::Padding { size } => Size::from_bits(size * 8),
            FieldKind::Array { element, count } => {
                let element_size = element.size();
                if element_size.is_static() {
                    Size::from_bits(element_size.bits() * count)
                } else {
                    Size::field_size(&self.name)
                }
            }
            FieldKind::Vector { sizer: Some(_), .. }
            | FieldKind::Body { sizer: Some(_) }
            | FieldKind::Payload { sizer: Some(_), .. } => Size::field_size(&self.name),
            FieldKind::Vector { sizer: None, .. }
            | FieldKind::Body { sizer: None }
            | FieldKind::Payload { sizer: None, .. } => Size::unknown(),
        }
    }

    /// Return true if the field is packed with its neighbours into
    /// integer chunks.
    pub fn is_bitfield(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Scalar { .. }
                | FieldKind::Enum { .. }
                | FieldKind::Checksum { .. }
                | FieldKind::Size { .. }
                | FieldKind::Count { .. }
                | FieldKind::FixedScalar { .. }
                | FieldKind::FixedEnum { .. }
                | FieldKind::Reserved { .. }
        )
    }

    /// Return true if the field value can be read from a view.
    pub fn is_addressable(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Scalar { .. }
                | FieldKind::Enum { .. }
                | FieldKind::Array { .. }
                | FieldKind::Vector { .. }
                | FieldKind::Custom { .. }
                | FieldKind::Struct { .. }
                | FieldKind::VariableLengthStruct { .. }
                | FieldKind::Checksum { .. }
        )
    }

    /// Return true if the field value is provided to the builder.
    /// Checksums are computed during serialization.
    pub fn takes_parameter(&self) -> bool {
        self.is_addressable() && !matches!(self.kind, FieldKind::Checksum { .. })
    }

    pub fn is_payload_or_body(&self) -> bool {
        matches!(self.kind, FieldKind::Payload { .. } | FieldKind::Body { .. })
    }

    /// Return true if the size of the field can only be discovered by
    /// walking the bytes from the start of the field.
    pub fn needs_start_offset(&self) -> bool {
        match &self.kind {
            FieldKind::Custom { width: None, .. } | FieldKind::VariableLengthStruct { .. } => true,
            FieldKind::Size { .. } | FieldKind::Count { .. } => true,
            FieldKind::Array { element, .. } => !element.size().is_static(),
            FieldKind::Vector { element, sizer: Some(Sizer::Count(_)), .. } => {
                !element.size().is_static()
            }
            _ => false,
        }
    }

    /// Type referenced by the field or its elements.
    pub fn type_key(&self) -> Option<TypeKey> {
        match &self.kind {
            FieldKind::Enum { type_key, .. }
            | FieldKind::Custom { type_key, .. }
            | FieldKind::Struct { type_key, .. }
            | FieldKind::VariableLengthStruct { type_key }
            | FieldKind::Checksum { type_key, .. }
            | FieldKind::FixedEnum { type_key, .. } => Some(*type_key),
            FieldKind::Array { element, .. } | FieldKind::Vector { element, .. } => {
                element.type_key()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_element(width: usize) -> Box<Field> {
        Box::new(Field::new("a", FieldKind::Scalar { width }))
    }

    #[test]
    fn test_static_sizes() {
        assert_eq!(Field::new("a", FieldKind::Scalar { width: 12 }).size(), Size::from_bits(12));
        assert_eq!(
            Field::new("a", FieldKind::Array { element: scalar_element(16), count: 3 }).size(),
            Size::from_bits(48)
        );
        assert_eq!(Field::new("_padding_0", FieldKind::Padding { size: 4 }).size().bits(), 32);
        assert_eq!(
            Field::new("_checksum_start_0", FieldKind::ChecksumStart { checksum_field: "c".into() })
                .size(),
            Size::from_bits(0)
        );
    }

    #[test]
    fn test_dynamic_sizes() {
        let sized = Field::new(
            "a",
            FieldKind::Vector {
                element: scalar_element(8),
                sizer: Some(Sizer::Size("_size_(a)".into())),
                modifier: 0,
            },
        );
        assert_eq!(sized.size(), Size::field_size("a"));
        let unbounded = Field::new(
            "a",
            FieldKind::Vector { element: scalar_element(8), sizer: None, modifier: 0 },
        );
        assert!(unbounded.size().empty());
        let payload = Field::new(PAYLOAD_NAME, FieldKind::Payload { sizer: None, modifier: 0 });
        assert!(payload.size().empty());
    }

    #[test]
    fn test_properties() {
        let size =
            Field::new(size_field_name("a"), FieldKind::Size { target: "a".into(), width: 8 });
        assert!(size.is_bitfield());
        assert!(!size.is_addressable());
        assert!(size.needs_start_offset());
        let checksum = Field::new("crc", FieldKind::Checksum { type_key: TypeKey(0), width: 16 });
        assert!(checksum.is_addressable());
        assert!(!checksum.takes_parameter());
        let reserved = Field::new("_reserved_0", FieldKind::Reserved { width: 4 });
        assert!(reserved.is_bitfield());
        assert!(!reserved.is_addressable());
    }

    #[test]
    fn test_name_sequence() {
        let mut sequence = NameSequence::default();
        assert_eq!(sequence.next("fixed"), "_fixed_0");
        assert_eq!(sequence.next("reserved"), "_reserved_1");
    }
}
