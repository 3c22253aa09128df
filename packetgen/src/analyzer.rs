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

//! Conversion of declaration descriptions into the declaration table.

use codespan_reporting::diagnostic::Diagnostic;
use codespan_reporting::files;
use codespan_reporting::term;
use codespan_reporting::term::termcolor;
use indexmap::IndexMap;
use packetgen_runtime::{max_value, Endianness};
use std::fmt;

use crate::ast;
use crate::constraints;
use crate::declarations::Declarations;
use crate::field::{
    count_field_name, size_field_name, Field, FieldKind, FieldType, NameSequence, BODY_NAME,
    PAYLOAD_NAME,
};
use crate::field_list::FieldList;
use crate::typedef::{
    check_width, ChecksumDef, CustomDef, EnumDef, ParentDef, TypeDef, TypeDefKind, TypeKey,
};

/// File identifier.
/// References a source file in the source database.
pub type FileId = usize;

/// Source database.
/// Stores the source file contents for reference.
pub type SourceDatabase = files::SimpleFiles<String, String>;

/// List of unique errors reported as analyzer diagnostics.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    DuplicateDeclIdentifier = 1,
    UndeclaredTypeIdentifier = 5,
    InvalidTypeIdentifier = 6,
    UndeclaredParentIdentifier = 7,
    InvalidParentIdentifier = 8,
    DuplicateFieldIdentifier = 11,
    DuplicateTagIdentifier = 12,
    DuplicateTagValue = 13,
    InvalidTagValue = 14,
    UndeclaredConstraintIdentifier = 15,
    InvalidConstraintIdentifier = 16,
    InvalidConstraintValue = 17,
    ConstraintValueOutOfRange = 18,
    UndeclaredEnumTag = 19,
    DuplicateConstraintIdentifier = 22,
    DuplicateSizeField = 23,
    UndeclaredSizeIdentifier = 24,
    InvalidSizeIdentifier = 25,
    DuplicateCountField = 26,
    UndeclaredCountIdentifier = 27,
    InvalidCountIdentifier = 28,
    FixedValueOutOfRange = 32,
    UndeclaredChecksumIdentifier = 33,
    InvalidChecksumIdentifier = 34,
    MissingChecksumStart = 35,
    DuplicatePayloadField = 36,
    MissingPayloadField = 37,
    RedundantArraySize = 38,
    InvalidPaddingField = 39,
    InvalidTagIdentifier = 42,
    SizeFieldAfterTarget = 43,
    InvalidFieldWidth = 49,
    InvalidFieldOffset = 51,
    InvalidFieldSize = 52,
    InvalidPacketSize = 53,
    InvalidSizeModifier = 54,
    InvalidBitfieldChunk = 55,
    AmbiguousFieldOffset = 56,
    IndistinguishableChildren = 57,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "E{}", *self as u16)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        format!("{}", code)
    }
}

/// Aggregate analyzer diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic<FileId>>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub(crate) fn push(&mut self, diagnostic: Diagnostic<FileId>) {
        self.diagnostics.push(diagnostic)
    }

    pub fn emit(
        &self,
        sources: &SourceDatabase,
        writer: &mut dyn termcolor::WriteColor,
    ) -> Result<(), files::Error> {
        let config = term::Config::default();
        for d in self.diagnostics.iter() {
            term::emit(writer, &config, sources, d)?;
        }
        Ok(())
    }
}

impl From<Diagnostic<FileId>> for Diagnostics {
    fn from(diagnostic: Diagnostic<FileId>) -> Self {
        Diagnostics { diagnostics: vec![diagnostic] }
    }
}

/// Load the declarations of a file into a frozen declaration table.
/// Analysis stops at the first error.
pub fn analyze(file: &ast::File) -> Result<Declarations, Diagnostics> {
    let endianness = match file.endianness {
        ast::EndiannessValue::LittleEndian => Endianness::LittleEndian,
        ast::EndiannessValue::BigEndian => Endianness::BigEndian,
    };
    let mut declarations = Declarations::new(endianness);
    let mut sequence = NameSequence::default();

    for decl in &file.declarations {
        if let Some(prev) = declarations.lookup(decl.id()) {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::DuplicateDeclIdentifier)
                .with_message(format!(
                    "redeclaration of {} identifier `{}`",
                    decl.kind(),
                    decl.id()
                ))
                .with_notes(vec![format!(
                    "note: `{}` is first declared as a {}",
                    decl.id(),
                    declarations.get(prev).kind_name()
                )])
                .into());
        }
        let def = convert_decl(&declarations, &mut sequence, decl)?;
        let key = if def.is_packet() {
            declarations.add_packet_def(def)?
        } else {
            declarations.add_type_def(def)?
        };
        tracing::debug!(id = decl.id(), kind = decl.kind(), key = key.0, "declared type");
    }

    declarations.finalize()?;
    Ok(declarations)
}

fn convert_decl(
    decls: &Declarations,
    sequence: &mut NameSequence,
    decl: &ast::Decl,
) -> Result<TypeDef, Diagnostic<FileId>> {
    let kind = match decl {
        ast::Decl::Checksum { id, function, width } => {
            check_width(*width, format_args!("checksum `{id}`"))?;
            TypeDefKind::Checksum(ChecksumDef { width: *width, function: function.clone() })
        }
        ast::Decl::CustomField { id, width, function } => {
            if let Some(width) = width {
                if *width == 0 || width % 8 != 0 {
                    return Err(Diagnostic::error()
                        .with_code(ErrorCode::InvalidFieldSize)
                        .with_message(format!(
                            "width of custom field `{id}` ({width}) is not a multiple of 8"
                        )));
                }
            }
            TypeDefKind::Custom(CustomDef { width: *width, function: function.clone() })
        }
        ast::Decl::Enum { id, tags, width } => TypeDefKind::Enum(EnumDef::new(
            id,
            *width,
            tags.iter().map(|tag| (tag.id.clone(), tag.value)),
        )?),
        ast::Decl::Packet { id, constraints, fields, parent_id } => {
            TypeDefKind::Packet(convert_parent_decl(
                decls,
                sequence,
                id,
                true,
                parent_id.as_deref(),
                fields,
                constraints,
            )?)
        }
        ast::Decl::Struct { id, constraints, fields, parent_id } => {
            TypeDefKind::Struct(convert_parent_decl(
                decls,
                sequence,
                id,
                false,
                parent_id.as_deref(),
                fields,
                constraints,
            )?)
        }
    };
    Ok(TypeDef::new(decl.id(), kind))
}

fn convert_parent_decl(
    decls: &Declarations,
    sequence: &mut NameSequence,
    id: &str,
    is_packet: bool,
    parent_id: Option<&str>,
    fields: &[ast::Field],
    constraints: &[ast::Constraint],
) -> Result<ParentDef, Diagnostic<FileId>> {
    let parent = match parent_id {
        None => None,
        Some(parent_id) => {
            let key = decls.lookup(parent_id).ok_or_else(|| {
                Diagnostic::error()
                    .with_code(ErrorCode::UndeclaredParentIdentifier)
                    .with_message(format!("undeclared parent identifier `{parent_id}`"))
                    .with_notes(vec![format!(
                        "note: `{id}` extends `{parent_id}`, which must be declared first"
                    )])
            })?;
            let parent = decls.get(key);
            if parent.parent_def().is_none() || parent.is_packet() != is_packet {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::InvalidParentIdentifier)
                    .with_message(format!(
                        "invalid parent identifier `{parent_id}` of {} `{id}`",
                        if is_packet { "packet" } else { "struct" }
                    ))
                    .with_notes(vec![format!(
                        "note: `{parent_id}` is a {}",
                        parent.kind_name()
                    )]));
            }
            Some(key)
        }
    };

    let mut list = FieldList::new();
    for field in fields {
        let field = convert_field(decls, sequence, id, &list, field)?;
        list.append(field)?;
    }
    check_checksum_starts(id, &list)?;

    if let Some(parent) = parent {
        let parent_def = decls.parent_def(parent);
        if !list.is_empty() && parent_def.and_then(|def| def.fields.payload()).is_none() {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::MissingPayloadField)
                .with_message(format!(
                    "`{id}` declares fields, but its parent `{}` has no payload or body",
                    decls.get(parent).name
                )));
        }
        // Payload size fields are scoped to their level.
        let scoped = [FieldType::Size, FieldType::Count];
        let mut wire = list.without_types(&scoped);
        for ancestor in decls.iter_parents_and_self(parent) {
            if let Some(def) = decls.parent_def(ancestor) {
                wire = def.fields.without_types(&scoped).merge(&wire)?;
            }
        }
    }

    let mut constraint_values = IndexMap::new();
    for constraint in constraints {
        match parent {
            Some(parent) => constraints::add_parent_constraint(
                decls,
                parent,
                &mut constraint_values,
                constraint,
            )?,
            None => {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::UndeclaredConstraintIdentifier)
                    .with_message(format!(
                        "constraint on `{}` in `{id}`, which has no parent",
                        constraint.id
                    )))
            }
        }
    }

    Ok(ParentDef {
        parent,
        fields: list,
        constraints: constraint_values,
        endianness: decls.endianness(),
    })
}

fn convert_field(
    decls: &Declarations,
    sequence: &mut NameSequence,
    decl_id: &str,
    previous: &FieldList,
    field: &ast::Field,
) -> Result<Field, Diagnostic<FileId>> {
    Ok(match field {
        ast::Field::Checksum { field_id } => Field::new(
            sequence.next("checksum_start"),
            FieldKind::ChecksumStart { checksum_field: field_id.clone() },
        ),
        ast::Field::Padding { size } => {
            let padded = previous.len().checked_sub(1).and_then(|last| previous.get_index(last));
            let padded_size = match padded.map(|field| &field.kind) {
                Some(FieldKind::Array { .. }) | Some(FieldKind::Vector { .. }) if *size > 0 => {
                    padded.map(Field::size).unwrap_or_default()
                }
                _ => {
                    return Err(Diagnostic::error()
                        .with_code(ErrorCode::InvalidPaddingField)
                        .with_message(format!(
                            "padding field in `{decl_id}` does not follow an array field"
                        )))
                }
            };
            if padded_size.is_static() && padded_size.bits() > size * 8 {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::InvalidPaddingField)
                    .with_message(format!(
                        "array is {} bits long, but is padded to {} octets",
                        padded_size.bits(),
                        size
                    )));
            }
            Field::new(sequence.next("padding"), FieldKind::Padding { size: *size })
        }
        ast::Field::Size { field_id, width } => {
            check_width(*width, format_args!("size field of `{field_id}`"))?;
            if previous.contains(&size_field_name(field_id))
                || previous.contains(&count_field_name(field_id))
            {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::DuplicateSizeField)
                    .with_message(format!("duplicate size field for `{field_id}` in `{decl_id}`")));
            }
            Field::new(
                size_field_name(field_id),
                FieldKind::Size { target: field_id.clone(), width: *width },
            )
        }
        ast::Field::Count { field_id, width } => {
            check_width(*width, format_args!("count field of `{field_id}`"))?;
            if previous.contains(&size_field_name(field_id))
                || previous.contains(&count_field_name(field_id))
            {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::DuplicateCountField)
                    .with_message(format!(
                        "duplicate count field for `{field_id}` in `{decl_id}`"
                    )));
            }
            Field::new(
                count_field_name(field_id),
                FieldKind::Count { target: field_id.clone(), width: *width },
            )
        }
        ast::Field::Body => Field::new(BODY_NAME, FieldKind::Body { sizer: None }),
        ast::Field::Payload { size_modifier } => Field::new(
            PAYLOAD_NAME,
            FieldKind::Payload {
                sizer: None,
                modifier: parse_size_modifier(PAYLOAD_NAME, size_modifier.as_deref())?,
            },
        ),
        ast::Field::FixedScalar { width, value } => {
            check_width(*width, "fixed field")?;
            if *value > max_value(*width) {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::FixedValueOutOfRange)
                    .with_message(format!(
                        "fixed value {value} does not fit in {width} bits in `{decl_id}`"
                    )));
            }
            Field::new(
                sequence.next("fixed"),
                FieldKind::FixedScalar { width: *width, value: *value },
            )
        }
        ast::Field::FixedEnum { enum_id, tag_id } => {
            let (type_key, def) = resolve_type(decls, enum_id)?;
            let TypeDefKind::Enum(enum_def) = &def.kind else {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::InvalidTypeIdentifier)
                    .with_message(format!(
                        "fixed field in `{decl_id}` uses `{enum_id}`, which is not an enum"
                    )));
            };
            let value = enum_def.value_of(tag_id).ok_or_else(|| {
                Diagnostic::error()
                    .with_code(ErrorCode::UndeclaredEnumTag)
                    .with_message(format!("undeclared tag `{tag_id}` of enum `{enum_id}`"))
            })?;
            Field::new(
                sequence.next("fixed"),
                FieldKind::FixedEnum {
                    type_key,
                    width: enum_def.width,
                    tag: tag_id.clone(),
                    value,
                },
            )
        }
        ast::Field::Reserved { width } => {
            check_width(*width, "reserved field")?;
            Field::new(sequence.next("reserved"), FieldKind::Reserved { width: *width })
        }
        ast::Field::Array { id, width, type_id, size_modifier, size } => {
            let element = Box::new(convert_element(decls, id, *width, type_id.as_deref())?);
            match size {
                Some(count) => {
                    if size_modifier.is_some() {
                        return Err(Diagnostic::error()
                            .with_code(ErrorCode::InvalidSizeModifier)
                            .with_message(format!(
                                "array `{id}` has a fixed size and cannot declare a size modifier"
                            )));
                    }
                    Field::new(id, FieldKind::Array { element, count: *count })
                }
                None => Field::new(
                    id,
                    FieldKind::Vector {
                        element,
                        sizer: None,
                        modifier: parse_size_modifier(id, size_modifier.as_deref())?,
                    },
                ),
            }
        }
        ast::Field::Scalar { id, width } => {
            check_width(*width, format_args!("scalar field `{id}`"))?;
            Field::new(id, FieldKind::Scalar { width: *width })
        }
        ast::Field::Typedef { id, type_id } => convert_typedef_field(decls, id, type_id)?,
    })
}

/// Size modifiers are written `+N`, with `N` a number of octets.
fn parse_size_modifier(
    field_id: &str,
    modifier: Option<&str>,
) -> Result<usize, Diagnostic<FileId>> {
    match modifier {
        None => Ok(0),
        Some(text) => text
            .trim()
            .strip_prefix('+')
            .and_then(|value| value.trim().parse::<usize>().ok())
            .ok_or_else(|| {
                Diagnostic::error()
                    .with_code(ErrorCode::InvalidSizeModifier)
                    .with_message(format!("invalid size modifier `{text}` for `{field_id}`"))
                    .with_notes(vec!["note: expected `+N`".to_owned()])
            }),
    }
}

fn resolve_type<'d>(
    decls: &'d Declarations,
    type_id: &str,
) -> Result<(TypeKey, &'d TypeDef), Diagnostic<FileId>> {
    let key = decls.lookup(type_id).ok_or_else(|| {
        Diagnostic::error()
            .with_code(ErrorCode::UndeclaredTypeIdentifier)
            .with_message(format!("undeclared type identifier `{type_id}`"))
            .with_notes(vec!["note: types must be declared before they are referenced".to_owned()])
    })?;
    Ok((key, decls.get(key)))
}

fn convert_typedef_field(
    decls: &Declarations,
    id: &str,
    type_id: &str,
) -> Result<Field, Diagnostic<FileId>> {
    let (type_key, def) = resolve_type(decls, type_id)?;
    let kind = match &def.kind {
        TypeDefKind::Enum(def) => FieldKind::Enum { type_key, width: def.width },
        TypeDefKind::Checksum(def) => FieldKind::Checksum { type_key, width: def.width },
        TypeDefKind::Custom(def) => FieldKind::Custom { type_key, width: def.width },
        TypeDefKind::Struct(_) => {
            let size = decls.size_of(type_key, false);
            if size.is_static() {
                FieldKind::Struct { type_key, width: size.bits() }
            } else {
                FieldKind::VariableLengthStruct { type_key }
            }
        }
        TypeDefKind::Packet(_) => {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::InvalidTypeIdentifier)
                .with_message(format!(
                    "field `{id}` has type `{type_id}`, which is a packet"
                ))
                .with_notes(vec!["note: packets cannot be used as field types".to_owned()]))
        }
    };
    Ok(Field::new(id, kind))
}

fn convert_element(
    decls: &Declarations,
    id: &str,
    width: Option<usize>,
    type_id: Option<&str>,
) -> Result<Field, Diagnostic<FileId>> {
    let element = match (width, type_id) {
        (Some(width), None) => {
            check_width(width, format_args!("elements of `{id}`"))?;
            Field::new(id, FieldKind::Scalar { width })
        }
        (None, Some(type_id)) => convert_typedef_field(decls, id, type_id)?,
        _ => {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::InvalidTypeIdentifier)
                .with_message(format!(
                    "array `{id}` must declare either an element width or an element type"
                )))
        }
    };
    match &element.kind {
        FieldKind::Checksum { .. } => Err(Diagnostic::error()
            .with_code(ErrorCode::InvalidTypeIdentifier)
            .with_message(format!("array `{id}` cannot hold checksum elements"))),
        FieldKind::Scalar { width } | FieldKind::Enum { width, .. } if width % 8 != 0 => {
            Err(Diagnostic::error()
                .with_code(ErrorCode::InvalidFieldSize)
                .with_message(format!(
                    "elements of array `{id}` are {width} bits wide, which is not a multiple of 8"
                )))
        }
        _ => Ok(element),
    }
}

/// Check that checksum start markers point to a checksum field declared
/// after them, and that every checksum field has a start marker.
fn check_checksum_starts(decl_id: &str, fields: &FieldList) -> Result<(), Diagnostic<FileId>> {
    for (position, field) in fields.iter().enumerate() {
        let FieldKind::ChecksumStart { checksum_field } = &field.kind else {
            continue;
        };
        match fields.get(checksum_field).map(|field| &field.kind) {
            None => {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::UndeclaredChecksumIdentifier)
                    .with_message(format!(
                        "undeclared checksum field `{checksum_field}` in `{decl_id}`"
                    )))
            }
            Some(FieldKind::Checksum { .. })
                if fields.position(checksum_field).is_some_and(|end| end > position) => {}
            Some(_) => {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::InvalidChecksumIdentifier)
                    .with_message(format!(
                        "`{checksum_field}` is not a checksum field declared after its start"
                    )))
            }
        }
    }
    for field in fields.iter() {
        if matches!(field.kind, FieldKind::Checksum { .. })
            && !fields.iter().any(|start| {
                matches!(&start.kind, FieldKind::ChecksumStart { checksum_field }
                    if *checksum_field == field.name)
            })
        {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::MissingChecksumStart)
                .with_message(format!(
                    "checksum field `{}` in `{decl_id}` has no start marker",
                    field.name
                )));
        }
    }
    Ok(())
}
