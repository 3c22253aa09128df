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

//! Field offsets and declaration sizes.

use codespan_reporting::diagnostic::Diagnostic;

use crate::analyzer::{ErrorCode, FileId};
use crate::declarations::Declarations;
use crate::field::{Field, FieldKind};
use crate::field_list::FieldList;
use crate::size::{Size, SizeTerm};
use crate::typedef::{TypeDefKind, TypeKey};

/// Location of a field within a declaration. Offsets are measured from
/// the start of the outermost declaration to the field start, and from
/// the field end to the end of the outermost declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLocation {
    pub start: Size,
    pub end: Size,
    pub size: Size,
}

impl FieldLocation {
    /// Return true if both ends of the field can be computed at runtime.
    pub fn is_resolved(&self) -> bool {
        let start = !self.start.empty();
        let end = !self.end.empty();
        let size = !self.size.empty();
        (start && (size || end)) || (end && size)
    }
}

/// Integer formed of consecutive bit-fields. The first field occupies the
/// least significant bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub width: usize,
    /// Field names with their shift and width.
    pub fields: Vec<(String, usize, usize)>,
}

impl Chunk {
    pub fn first(&self) -> &str {
        &self.fields[0].0
    }
}

/// Size contributed by the field at `index` when walking the list.
/// A field followed by padding contributes nothing: the padding
/// accounts for both.
fn contribution(fields: &[&Field], index: usize) -> Size {
    let padded = matches!(
        fields.get(index + 1).map(|field| &field.kind),
        Some(FieldKind::Padding { .. })
    );
    if padded {
        Size::from_bits(0)
    } else {
        fields[index].size()
    }
}

/// Same as [`contribution`], for a field whose offset from the start of
/// the outermost declaration is `start`. Fields discovered by walking
/// their bytes are sized at runtime when their start is known.
fn contribution_at(fields: &[&Field], index: usize, start: &Size) -> Size {
    let field = fields[index];
    let padded = matches!(
        fields.get(index + 1).map(|field| &field.kind),
        Some(FieldKind::Padding { .. })
    );
    match &field.kind {
        _ if padded || start.empty() => contribution(fields, index),
        FieldKind::Custom { width: None, .. } => Size::from_term(SizeTerm::CustomSize {
            field: field.name.clone(),
            offset: Box::new(start.clone()),
        }),
        FieldKind::VariableLengthStruct { .. } => Size::field_size(&field.name),
        _ => contribution(fields, index),
    }
}

/// Offset of a field relative to the bounds of its own field list.
/// `base` is the offset of the list from the start of the outermost
/// declaration.
fn local_offset(fields: &FieldList, name: &str, from_end: bool, base: &Size) -> Option<Size> {
    let fields: Vec<&Field> = fields.iter().collect();
    let position = fields.iter().position(|field| field.name == name)?;
    let mut offset = Size::from_bits(0);
    if !from_end {
        for index in 0..position {
            offset += contribution_at(&fields, index, &(base.clone() + offset.clone()));
        }
        return Some(offset);
    }

    match fields.get(position + 1).map(|field| &field.kind) {
        Some(FieldKind::Padding { size }) => {
            for index in position + 2..fields.len() {
                offset += contribution(&fields, index);
            }
            let own = fields[position].size();
            if own.is_static() && own.bits() <= size * 8 {
                Some(offset + Size::from_bits(size * 8 - own.bits()))
            } else if own.empty() {
                // Unbounded fields fill the padded region.
                Some(offset)
            } else {
                Some(Size::unknown())
            }
        }
        _ => {
            for index in position + 1..fields.len() {
                offset += contribution(&fields, index);
            }
            Some(offset)
        }
    }
}

impl Declarations {
    /// Size of an enum, checksum, custom field, struct or packet.
    ///
    /// For structs and packets, the size includes the fields inherited
    /// from the parent declarations. The payload or body is excluded when
    /// `without_payload` is set.
    pub fn size_of(&self, key: TypeKey, without_payload: bool) -> Size {
        match &self.get(key).kind {
            TypeDefKind::Enum(def) => Size::from_bits(def.width),
            TypeDefKind::Checksum(def) => Size::from_bits(def.width),
            TypeDefKind::Custom(def) => def.width.map(Size::from_bits).unwrap_or_default(),
            TypeDefKind::Struct(def) | TypeDefKind::Packet(def) => {
                let fields: Vec<&Field> = def.fields.iter().collect();
                let mut size = Size::from_bits(0);
                for (index, field) in fields.iter().enumerate() {
                    if without_payload && field.is_payload_or_body() {
                        continue;
                    }
                    let start =
                        self.offset_for_field(key, &field.name, false).unwrap_or_default();
                    size += contribution_at(&fields, index, &start);
                }
                match def.parent {
                    Some(parent) => size + self.size_of(parent, true),
                    None => size,
                }
            }
        }
    }

    /// Offset of the named field, from the start of the declaration or
    /// from its end. Returns `None` if the declaration and its parents do
    /// not declare the field, and an unknown size if the offset cannot be
    /// computed.
    pub fn offset_for_field(&self, key: TypeKey, name: &str, from_end: bool) -> Option<Size> {
        let def = self.parent_def(key)?;
        if !def.fields.contains(name) {
            return self.offset_for_field(def.parent?, name, from_end);
        }
        match def.parent {
            None => local_offset(&def.fields, name, from_end, &Size::from_bits(0)),
            Some(parent) => {
                let payload = self.parent_def(parent)?.fields.payload()?;
                let base = self.offset_for_field(parent, &payload.name, from_end)?;
                Some(local_offset(&def.fields, name, from_end, &base)? + base)
            }
        }
    }

    /// Static size of the fields declared by the selected declaration,
    /// excluding its parents.
    pub fn level_min_size(&self, key: TypeKey) -> usize {
        let Some(def) = self.parent_def(key) else {
            return self.size_of(key, false).bits();
        };
        let fields: Vec<&Field> = def.fields.iter().collect();
        (0..fields.len())
            .map(|index| contribution(&fields, index))
            .filter(Size::is_static)
            .map(|size| size.bits())
            .sum()
    }

    /// Static size of the declaration, including its parents. Dynamic and
    /// unknown parts are ignored.
    pub fn min_size(&self, key: TypeKey) -> usize {
        self.iter_parents_and_self(key).map(|key| self.level_min_size(key)).sum()
    }

    /// Location of a field declared by the selected declaration or one of
    /// its parents.
    pub fn field_location(&self, key: TypeKey, name: &str) -> Option<FieldLocation> {
        let owner = self.owner_of(key, name)?;
        let field = self.parent_def(owner)?.fields.get(name)?;
        let start = self.offset_for_field(key, name, false)?;
        let end = self.offset_for_field(key, name, true)?;
        let size = match &field.kind {
            FieldKind::Custom { width: None, .. } if !start.empty() => {
                Size::from_term(SizeTerm::CustomSize {
                    field: name.to_owned(),
                    offset: Box::new(start.clone()),
                })
            }
            FieldKind::VariableLengthStruct { .. } if !start.empty() => Size::field_size(name),
            _ => field.size(),
        };
        Some(FieldLocation { start, end, size })
    }
}

/// Group the bit-fields of a field list into octet aligned chunks.
pub fn bitfield_chunks(fields: &FieldList) -> Result<Vec<Chunk>, Diagnostic<FileId>> {
    let mut chunks = vec![];
    let mut current: Option<Chunk> = None;
    for field in fields {
        if field.is_bitfield() {
            let width = field.size().bits();
            let chunk = current.get_or_insert_with(|| Chunk { width: 0, fields: vec![] });
            chunk.fields.push((field.name.clone(), chunk.width, width));
            chunk.width += width;
            if chunk.width > 64 {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::InvalidBitfieldChunk)
                    .with_message(format!(
                        "bit-field `{}` extends a group of bit-fields beyond 64 bits",
                        field.name
                    ))
                    .with_notes(vec![
                        "note: consecutive bit-fields must be octet aligned within 64 bits"
                            .to_owned(),
                    ]));
            }
            if chunk.width % 8 == 0 {
                chunks.extend(current.take());
            }
        } else if let Some(chunk) = &current {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::InvalidFieldOffset)
                .with_message(format!(
                    "field `{}` does not start on an octet boundary",
                    field.name
                ))
                .with_notes(vec![format!(
                    "note: the preceding bit-fields have a total width of {} bits",
                    chunk.width
                )]));
        }
    }
    if let Some(chunk) = current {
        return Err(Diagnostic::error()
            .with_code(ErrorCode::InvalidPacketSize)
            .with_message("declaration size is not an integral number of octets".to_owned())
            .with_notes(vec![format!(
                "note: the trailing bit-fields have a total width of {} bits",
                chunk.width
            )]));
    }
    Ok(chunks)
}

/// Check the layout of a struct or packet declaration.
pub(crate) fn check_layout(decls: &Declarations, key: TypeKey) -> Result<(), Diagnostic<FileId>> {
    let Some(def) = decls.parent_def(key) else {
        return Ok(());
    };
    let name = &decls.get(key).name;
    bitfield_chunks(&def.fields)?;

    for field in &def.fields {
        if matches!(field.kind, FieldKind::Padding { .. }) {
            continue;
        }
        let Some(location) = decls.field_location(key, &field.name) else {
            continue;
        };
        if !location.is_resolved() || (field.needs_start_offset() && location.start.empty()) {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::AmbiguousFieldOffset)
                .with_message(format!(
                    "the location of field `{}` in `{name}` cannot be determined",
                    field.name
                ))
                .with_notes(vec![
                    "note: a field must be preceded or followed by fields of known size"
                        .to_owned(),
                ]));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PAYLOAD_NAME;
    use crate::test_utils::declarations;
    use serde_json::json;

    #[test]
    fn test_static_offsets() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "scalar_field", "id": "a", "width": 8 },
                    { "kind": "scalar_field", "id": "b", "width": 16 },
                    { "kind": "scalar_field", "id": "c", "width": 32 }
                ] }
            ]),
        );
        let a = decls.lookup("A").unwrap();
        assert_eq!(decls.offset_for_field(a, "a", false), Some(Size::from_bits(0)));
        assert_eq!(decls.offset_for_field(a, "b", false), Some(Size::from_bits(8)));
        assert_eq!(decls.offset_for_field(a, "b", true), Some(Size::from_bits(32)));
        assert_eq!(decls.offset_for_field(a, "c", true), Some(Size::from_bits(0)));
        assert_eq!(decls.offset_for_field(a, "d", true), None);
        assert_eq!(decls.size_of(a, false), Size::from_bits(56));
        assert_eq!(decls.min_size(a), 56);
    }

    #[test]
    fn test_dynamic_offsets() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "size_field", "field_id": "v", "width": 8 },
                    { "kind": "array_field", "id": "v", "width": 8 },
                    { "kind": "scalar_field", "id": "b", "width": 16 },
                    { "kind": "array_field", "id": "w", "width": 8 },
                    { "kind": "scalar_field", "id": "c", "width": 8 }
                ] }
            ]),
        );
        let a = decls.lookup("A").unwrap();
        let b = decls.offset_for_field(a, "b", false).unwrap();
        assert_eq!(b, Size::from_bits(8) + Size::field_size("v"));
        assert!(decls.offset_for_field(a, "c", false).unwrap().empty());
        assert_eq!(decls.offset_for_field(a, "c", true), Some(Size::from_bits(0)));
        assert!(decls.offset_for_field(a, "b", true).unwrap().empty());
        assert!(decls.size_of(a, false).empty());
        assert_eq!(decls.min_size(a), 32);

        let w = decls.field_location(a, "w").unwrap();
        assert!(w.is_resolved());
        assert_eq!(w.end, Size::from_bits(8));
    }

    #[test]
    fn test_inherited_offsets() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "scalar_field", "id": "a", "width": 8 },
                    { "kind": "payload_field" },
                    { "kind": "scalar_field", "id": "z", "width": 16 }
                ] },
                { "kind": "packet_declaration", "id": "B", "parent_id": "A", "fields": [
                    { "kind": "scalar_field", "id": "b", "width": 8 },
                    { "kind": "scalar_field", "id": "c", "width": 8 }
                ] }
            ]),
        );
        let b = decls.lookup("B").unwrap();
        assert_eq!(decls.offset_for_field(b, "c", false), Some(Size::from_bits(16)));
        assert_eq!(decls.offset_for_field(b, "b", true), Some(Size::from_bits(24)));
        assert_eq!(decls.offset_for_field(b, "a", false), Some(Size::from_bits(0)));
        assert_eq!(decls.offset_for_field(b, "z", true), Some(Size::from_bits(0)));
        assert_eq!(decls.size_of(b, false), Size::from_bits(40));
        assert_eq!(decls.min_size(b), 40);
        assert_eq!(decls.level_min_size(b), 16);

        let a = decls.lookup("A").unwrap();
        let payload = decls.field_location(a, PAYLOAD_NAME).unwrap();
        assert_eq!(payload.start, Size::from_bits(8));
        assert_eq!(payload.end, Size::from_bits(16));
        assert!(payload.size.empty());
    }

    #[test]
    fn test_padded_offsets() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "size_field", "field_id": "v", "width": 8 },
                    { "kind": "array_field", "id": "v", "width": 8 },
                    { "kind": "padding_field", "size": 8 },
                    { "kind": "scalar_field", "id": "b", "width": 16 }
                ] }
            ]),
        );
        let a = decls.lookup("A").unwrap();
        assert_eq!(decls.offset_for_field(a, "b", false), Some(Size::from_bits(72)));
        assert_eq!(decls.size_of(a, false), Size::from_bits(88));
        assert!(decls.offset_for_field(a, "v", true).unwrap().empty());
    }

    #[test]
    fn test_custom_field_size() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "custom_field_declaration", "id": "Name", "function": "name_size" },
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "scalar_field", "id": "a", "width": 8 },
                    { "kind": "typedef_field", "id": "name", "type_id": "Name" }
                ] }
            ]),
        );
        let a = decls.lookup("A").unwrap();
        assert_eq!(decls.size_of(a, false).to_string(), "8 + custom_size(name @ 8)");
        let location = decls.field_location(a, "name").unwrap();
        assert_eq!(location.size.to_string(), "custom_size(name @ 8)");
    }

    #[test]
    fn test_walked_field_offsets() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "custom_field_declaration", "id": "Name", "function": "name_size" },
                { "kind": "struct_declaration", "id": "V", "fields": [
                    { "kind": "size_field", "field_id": "b", "width": 8 },
                    { "kind": "array_field", "id": "b", "width": 8 }
                ] },
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "typedef_field", "id": "name", "type_id": "Name" },
                    { "kind": "scalar_field", "id": "x", "width": 8 },
                    { "kind": "typedef_field", "id": "v", "type_id": "V" },
                    { "kind": "scalar_field", "id": "y", "width": 8 }
                ] }
            ]),
        );
        let a = decls.lookup("A").unwrap();
        let offset = |name| decls.offset_for_field(a, name, false).unwrap().to_string();
        assert_eq!(offset("x"), "custom_size(name @ 0)");
        assert_eq!(offset("v"), "8 + custom_size(name @ 0)");
        assert_eq!(offset("y"), "8 + custom_size(name @ 0) + size(v)");
        assert_eq!(decls.field_location(a, "v").unwrap().size, Size::field_size("v"));
    }

    #[test]
    fn test_unbounded_padded_field() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "array_field", "id": "a", "width": 8 },
                    { "kind": "padding_field", "size": 4 },
                    { "kind": "scalar_field", "id": "b", "width": 8 }
                ] }
            ]),
        );
        let a = decls.lookup("A").unwrap();
        let location = decls.field_location(a, "a").unwrap();
        assert_eq!(location.start, Size::from_bits(0));
        assert_eq!(location.end, Size::from_bits(8));
        assert!(location.is_resolved());
        assert_eq!(decls.size_of(a, false), Size::from_bits(40));
    }

    #[test]
    fn test_bitfield_chunks() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "scalar_field", "id": "seven_bits", "width": 7 },
                    { "kind": "scalar_field", "id": "straddle", "width": 4 },
                    { "kind": "scalar_field", "id": "five_bits", "width": 5 },
                    { "kind": "scalar_field", "id": "byte", "width": 8 }
                ] }
            ]),
        );
        let def = decls.parent_def(decls.lookup("A").unwrap()).unwrap();
        let chunks = bitfield_chunks(&def.fields).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].width, 16);
        assert_eq!(chunks[0].first(), "seven_bits");
        assert_eq!(
            chunks[0].fields,
            vec![
                ("seven_bits".to_owned(), 0, 7),
                ("straddle".to_owned(), 7, 4),
                ("five_bits".to_owned(), 11, 5)
            ]
        );
        assert_eq!(chunks[1].fields, vec![("byte".to_owned(), 0, 8)]);
    }

    proptest::proptest! {
        #[test]
        fn test_offsets_cover_static_declaration(
            widths in proptest::collection::vec(
                proptest::sample::select(vec![8usize, 16, 24, 32, 48, 64]),
                1..10,
            )
        ) {
            let fields: Vec<serde_json::Value> = widths
                .iter()
                .enumerate()
                .map(|(index, width)| match index % 3 {
                    2 => json!({ "kind": "array_field", "id": format!("f{index}"), "width": 8,
                                 "size": width / 8 }),
                    _ => json!({ "kind": "scalar_field", "id": format!("f{index}"),
                                 "width": width }),
                })
                .collect();
            let decls = declarations(
                "big_endian",
                json!([ { "kind": "packet_declaration", "id": "A", "fields": fields } ]),
            );
            let a = decls.lookup("A").unwrap();
            let total: usize = widths.iter().sum();
            proptest::prop_assert_eq!(decls.size_of(a, false), Size::from_bits(total));
            let mut start = 0;
            for (index, width) in widths.iter().enumerate() {
                let location = decls.field_location(a, &format!("f{index}")).unwrap();
                proptest::prop_assert_eq!(&location.start, &Size::from_bits(start));
                proptest::prop_assert_eq!(&location.size, &Size::from_bits(*width));
                proptest::prop_assert_eq!(
                    location.start.bits() + location.size.bits() + location.end.bits(),
                    total
                );
                start += width;
            }
        }
    }
}
