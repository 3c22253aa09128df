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

use std::collections::HashMap;

use indexmap::IndexMap;
use packetgen_runtime::{max_value, read_uint, write_uint, EncodeError};

use super::{Context, StructValue, Value};
use crate::backends::artifacts::BuilderSpec;
use crate::constraints::constraint_integer;
use crate::field::{Field, FieldKind, PAYLOAD_NAME};
use crate::size::SizeContext;
use crate::typedef::{TypeDefKind, TypeKey};

/// Checksum field waiting for the bytes it covers.
struct PendingChecksum<'d> {
    function: &'d str,
    /// Offset of the covered bytes.
    start: usize,
    /// Offset and length of the chunk holding the checksum.
    chunk_start: usize,
    chunk_len: usize,
    shift: usize,
    width: usize,
}

/// Serializer for a struct or packet, holding checked parameters.
#[derive(Debug, Clone)]
pub struct Builder<'d> {
    ctx: Context<'d>,
    key: TypeKey,
    spec: &'d BuilderSpec,
    parameters: IndexMap<String, Value>,
    payload: Vec<u8>,
}

fn enum_integer(ctx: Context<'_>, type_key: TypeKey, value: &Value) -> Option<u64> {
    match (value, &ctx.decls.get(type_key).kind) {
        (Value::Integer(value), _) => Some(*value),
        (Value::Tag(tag), TypeDefKind::Enum(def)) => def.value_of(tag),
        _ => None,
    }
}

fn check_integer(owner: &str, field: &Field, value: u64, width: usize) -> Result<(), EncodeError> {
    let maximum_value = max_value(width);
    if value > maximum_value {
        return Err(EncodeError::InvalidScalarValue {
            packet: owner.to_owned(),
            field: field.name.clone(),
            value,
            maximum_value,
        });
    }
    Ok(())
}

/// Check a parameter value against the field declaration.
fn check_value(
    ctx: Context<'_>,
    owner: &str,
    field: &Field,
    value: &Value,
) -> Result<(), EncodeError> {
    let invalid_type = |expected| EncodeError::InvalidParameterType {
        packet: owner.to_owned(),
        field: field.name.clone(),
        expected,
    };
    match (&field.kind, value) {
        (FieldKind::Scalar { width }, Value::Integer(value)) => {
            check_integer(owner, field, *value, *width)
        }
        (FieldKind::Scalar { .. }, _) => Err(invalid_type("integer")),
        (FieldKind::Enum { width, .. }, Value::Integer(value)) => {
            check_integer(owner, field, *value, *width)
        }
        (FieldKind::Enum { type_key, .. }, Value::Tag(tag)) => {
            match enum_integer(ctx, *type_key, value) {
                Some(_) => Ok(()),
                None => Err(EncodeError::InvalidEnumTag {
                    packet: owner.to_owned(),
                    field: field.name.clone(),
                    tag: tag.clone(),
                    type_: ctx.decls.get(*type_key).name.clone(),
                }),
            }
        }
        (FieldKind::Enum { .. }, _) => Err(invalid_type("enum tag")),
        (FieldKind::Array { element, count }, Value::List(values)) => {
            if values.len() != *count {
                return Err(EncodeError::InvalidArrayLength {
                    packet: owner.to_owned(),
                    field: field.name.clone(),
                    expected: *count,
                    actual: values.len(),
                });
            }
            values.iter().try_for_each(|value| check_value(ctx, owner, element, value))
        }
        (FieldKind::Vector { element, .. }, Value::List(values)) => {
            values.iter().try_for_each(|value| check_value(ctx, owner, element, value))
        }
        (FieldKind::Array { .. } | FieldKind::Vector { .. }, _) => Err(invalid_type("list")),
        (FieldKind::Custom { width, .. }, Value::Bytes(bytes)) => match width {
            Some(width) if bytes.len() * 8 != *width => Err(EncodeError::InvalidCustomSize {
                packet: owner.to_owned(),
                field: field.name.clone(),
                size: bytes.len(),
                expected: width / 8,
            }),
            _ => Ok(()),
        },
        (FieldKind::Custom { .. }, _) => Err(invalid_type("bytes")),
        (
            FieldKind::Struct { type_key, .. } | FieldKind::VariableLengthStruct { type_key },
            Value::Struct(value),
        ) => Builder::nested(ctx, *type_key, value).map(|_| ()),
        (FieldKind::Struct { .. } | FieldKind::VariableLengthStruct { .. }, _) => {
            Err(invalid_type("struct"))
        }
        _ => Ok(()),
    }
}

impl<'d> Builder<'d> {
    pub(crate) fn new(
        ctx: Context<'d>,
        key: TypeKey,
        parameters: IndexMap<String, Value>,
    ) -> Result<Builder<'d>, EncodeError> {
        let name = &ctx.decls.get(key).name;
        let spec = ctx
            .artifacts
            .parent_artifact(name)
            .and_then(|artifact| artifact.builder.as_ref())
            .ok_or_else(|| EncodeError::AbstractDeclaration { packet: name.clone() })?;

        if let Some(unknown) =
            parameters.keys().find(|name| !spec.parameters.iter().any(|p| p.name == **name))
        {
            return Err(EncodeError::UnknownParameter {
                packet: name.clone(),
                field: unknown.clone(),
            });
        }
        for parameter in &spec.parameters {
            let missing = || EncodeError::MissingParameter {
                packet: parameter.owner.clone(),
                field: parameter.name.clone(),
            };
            let value = parameters.get(&parameter.name).ok_or_else(missing)?;
            let field = ctx.field(&parameter.owner, &parameter.name).ok_or_else(missing)?;
            check_value(ctx, &parameter.owner, field, value)?;
        }
        Ok(Builder { ctx, key, spec, parameters, payload: vec![] })
    }

    /// Builder for the value of a struct field of type `expected`. Values
    /// of structs derived from `expected` are accepted.
    fn nested(
        ctx: Context<'d>,
        expected: TypeKey,
        value: &StructValue,
    ) -> Result<Builder<'d>, EncodeError> {
        let key = ctx
            .decls
            .lookup(&value.type_id)
            .ok_or_else(|| EncodeError::UnknownDeclaration { name: value.type_id.clone() })?;
        if !ctx.decls.iter_parents_and_self(key).any(|key| key == expected) {
            return Err(EncodeError::InvalidStructType {
                expected: ctx.decls.get(expected).name.clone(),
                actual: value.type_id.clone(),
            });
        }
        let builder = Builder::new(ctx, key, value.fields.clone())?;
        if value.payload.is_empty() {
            Ok(builder)
        } else {
            builder.with_payload(value.payload.clone())
        }
    }

    pub fn name(&self) -> &'d str {
        &self.ctx.decls.get(self.key).name
    }

    /// Set the payload bytes of the declaration.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Result<Builder<'d>, EncodeError> {
        if !self.spec.payload {
            return Err(EncodeError::UnknownParameter {
                packet: self.name().to_owned(),
                field: PAYLOAD_NAME.to_owned(),
            });
        }
        self.payload = payload.into();
        Ok(self)
    }

    /// Size of the serialized bytes.
    pub fn size(&self) -> Result<usize, EncodeError> {
        match self.spec.size.evaluate(self) {
            Some(bits) => Ok(bits / 8),
            None => self.serialize().map(|bytes| bytes.len()),
        }
    }

    /// Serialize the declaration, from the most derived level outwards:
    /// the bytes of each level are the payload of its parent.
    pub fn serialize(&self) -> Result<Vec<u8>, EncodeError> {
        let mut bytes = self.payload.clone();
        for level in self.ctx.decls.iter_parents_and_self(self.key) {
            bytes = self.serialize_level(level, &bytes)?;
        }
        tracing::trace!(name = self.name(), size = bytes.len(), "serialized");
        Ok(bytes)
    }

    fn parameter(&self, owner: &str, field: &Field) -> Result<&Value, EncodeError> {
        self.parameters.get(&field.name).ok_or_else(|| EncodeError::MissingParameter {
            packet: owner.to_owned(),
            field: field.name.clone(),
        })
    }

    /// Value of a scalar or enum field, either constrained by the
    /// declaration chain or provided as parameter.
    fn integer(&self, owner: &str, field: &Field) -> Result<u64, EncodeError> {
        let missing = || EncodeError::MissingParameter {
            packet: owner.to_owned(),
            field: field.name.clone(),
        };
        if let Some(value) = self.spec.constants.get(&field.name) {
            return constraint_integer(self.ctx.decls, field, value).ok_or_else(missing);
        }
        match (&field.kind, self.parameter(owner, field)?) {
            (FieldKind::Enum { type_key, .. }, value) => {
                enum_integer(self.ctx, *type_key, value).ok_or_else(missing)
            }
            (_, value) => value.as_integer().ok_or_else(missing),
        }
    }

    /// Serialize a byte aligned value: vector element, custom field or
    /// struct.
    fn serialize_value(
        &self,
        owner: &str,
        field: &Field,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        let endianness = self.ctx.decls.endianness();
        match (&field.kind, value) {
            (FieldKind::Scalar { width }, Value::Integer(value)) => {
                write_uint(out, *value, width / 8, endianness)
            }
            (FieldKind::Enum { type_key, width }, value) => {
                let value = enum_integer(self.ctx, *type_key, value).ok_or_else(|| {
                    EncodeError::InvalidParameterType {
                        packet: owner.to_owned(),
                        field: field.name.clone(),
                        expected: "enum tag",
                    }
                })?;
                write_uint(out, value, width / 8, endianness)
            }
            (FieldKind::Custom { .. }, Value::Bytes(bytes)) => out.extend_from_slice(bytes),
            (
                FieldKind::Struct { type_key, .. } | FieldKind::VariableLengthStruct { type_key },
                Value::Struct(value),
            ) => out.extend(Builder::nested(self.ctx, *type_key, value)?.serialize()?),
            (kind, _) => {
                return Err(EncodeError::InvalidParameterType {
                    packet: owner.to_owned(),
                    field: field.name.clone(),
                    expected: match kind {
                        FieldKind::Scalar { .. } => "integer",
                        FieldKind::Custom { .. } => "bytes",
                        _ => "struct",
                    },
                })
            }
        }
        Ok(())
    }

    fn serialize_list(&self, owner: &str, field: &Field) -> Result<(Vec<u8>, usize), EncodeError> {
        let (FieldKind::Array { element, .. } | FieldKind::Vector { element, .. }) = &field.kind
        else {
            return Ok((vec![], 0));
        };
        let values = self.parameter(owner, field)?.as_list().unwrap_or_default();
        let mut bytes = vec![];
        for value in values {
            self.serialize_value(owner, element, value, &mut bytes)?;
        }
        Ok((bytes, values.len()))
    }

    fn serialize_level(&self, level: TypeKey, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let decls = self.ctx.decls;
        let endianness = decls.endianness();
        let owner = decls.get(level).name.as_str();
        let Some(def) = decls.parent_def(level) else {
            return Ok(payload.to_vec());
        };

        // Variable parts are serialized first, their size and count
        // fields may precede them.
        let mut parts: HashMap<&str, (Vec<u8>, usize)> = HashMap::new();
        for field in def.fields.iter() {
            match &field.kind {
                FieldKind::Array { .. } | FieldKind::Vector { .. } => {
                    parts.insert(&field.name, self.serialize_list(owner, field)?);
                }
                FieldKind::Payload { .. } | FieldKind::Body { .. } => {
                    parts.insert(&field.name, (payload.to_vec(), 0));
                }
                _ => (),
            }
        }

        let mut out = vec![];
        let mut chunk = 0u64;
        let mut chunk_width = 0;
        let mut checksum_starts: HashMap<&str, usize> = HashMap::new();
        let mut checksums: Vec<PendingChecksum<'_>> = vec![];
        let fields: Vec<&Field> = def.fields.iter().collect();

        for (index, field) in fields.iter().enumerate() {
            if field.is_bitfield() {
                let width = field.size().bits();
                let value = match &field.kind {
                    FieldKind::Scalar { .. } | FieldKind::Enum { .. } => {
                        self.integer(owner, field)?
                    }
                    FieldKind::FixedScalar { value, .. } | FieldKind::FixedEnum { value, .. } => {
                        *value
                    }
                    FieldKind::Checksum { type_key, .. } => {
                        let function = match &decls.get(*type_key).kind {
                            TypeDefKind::Checksum(def) => def.function.as_str(),
                            _ => "",
                        };
                        checksums.push(PendingChecksum {
                            function,
                            start: checksum_starts.get(field.name.as_str()).copied().unwrap_or(0),
                            chunk_start: out.len(),
                            chunk_len: 0,
                            shift: chunk_width,
                            width,
                        });
                        0
                    }
                    FieldKind::Size { target, .. } => {
                        let modifier = match def.fields.get(target).map(|field| &field.kind) {
                            Some(
                                FieldKind::Vector { modifier, .. }
                                | FieldKind::Payload { modifier, .. },
                            ) => *modifier,
                            _ => 0,
                        };
                        let len = parts.get(target.as_str()).map_or(0, |(bytes, _)| bytes.len());
                        let size = len + modifier;
                        let maximum_size = max_value(width);
                        if size as u64 > maximum_size {
                            return Err(EncodeError::SizeOverflow {
                                packet: owner.to_owned(),
                                field: target.clone(),
                                size,
                                maximum_size: maximum_size as usize,
                            });
                        }
                        size as u64
                    }
                    FieldKind::Count { target, .. } => {
                        let count = parts.get(target.as_str()).map_or(0, |(_, count)| *count);
                        let maximum_count = max_value(width);
                        if count as u64 > maximum_count {
                            return Err(EncodeError::CountOverflow {
                                packet: owner.to_owned(),
                                field: target.clone(),
                                count,
                                maximum_count: maximum_count as usize,
                            });
                        }
                        count as u64
                    }
                    _ => 0,
                };
                chunk |= (value & max_value(width)) << chunk_width;
                chunk_width += width;
                if chunk_width % 8 == 0 {
                    let len = chunk_width / 8;
                    for checksum in checksums.iter_mut().filter(|c| c.chunk_len == 0) {
                        checksum.chunk_len = len;
                    }
                    write_uint(&mut out, chunk, len, endianness);
                    chunk = 0;
                    chunk_width = 0;
                }
                continue;
            }

            match &field.kind {
                FieldKind::ChecksumStart { checksum_field } => {
                    checksum_starts.insert(checksum_field.as_str(), out.len());
                }
                FieldKind::Array { .. }
                | FieldKind::Vector { .. }
                | FieldKind::Payload { .. }
                | FieldKind::Body { .. } => {
                    let bytes = parts
                        .get(field.name.as_str())
                        .map_or(&[][..], |(bytes, _)| bytes.as_slice());
                    out.extend_from_slice(bytes);
                    let padding = fields.get(index + 1).map(|field| &field.kind);
                    if let Some(FieldKind::Padding { size }) = padding {
                        if bytes.len() > *size {
                            return Err(EncodeError::PaddingOverflow {
                                packet: owner.to_owned(),
                                field: field.name.clone(),
                                size: bytes.len(),
                                padded_size: *size,
                            });
                        }
                        out.resize(out.len() + size - bytes.len(), 0);
                    }
                }
                FieldKind::Custom { .. }
                | FieldKind::Struct { .. }
                | FieldKind::VariableLengthStruct { .. } => {
                    let value = self.parameter(owner, field)?;
                    self.serialize_value(owner, field, value, &mut out)?;
                }
                _ => (),
            }
        }

        for checksum in checksums {
            let function = self.ctx.registry.checksum(checksum.function).ok_or_else(|| {
                EncodeError::UnregisteredFunction { function: checksum.function.to_owned() }
            })?;
            let end = checksum.chunk_start + checksum.chunk_len;
            let covered = out.get(checksum.start..checksum.chunk_start).unwrap_or_default();
            let value = function.checksum(covered) & max_value(checksum.width);
            let len = checksum.chunk_len;
            let current = read_uint(&out[checksum.chunk_start..end], len, endianness);
            let mut patched = Vec::with_capacity(len);
            write_uint(&mut patched, current | (value << checksum.shift), len, endianness);
            out[checksum.chunk_start..end].copy_from_slice(&patched);
        }
        Ok(out)
    }
}

impl SizeContext for Builder<'_> {
    fn field_size(&self, name: &str) -> Option<usize> {
        let owner = self.ctx.decls.owner_of(self.key, name)?;
        let field = self.ctx.decls.parent_def(owner)?.fields.get(name)?;
        let owner_name = self.ctx.decls.get(owner).name.as_str();
        match &field.kind {
            FieldKind::Payload { .. } | FieldKind::Body { .. } => {
                (owner == self.key).then_some(self.payload.len() * 8)
            }
            FieldKind::Array { .. } | FieldKind::Vector { .. } => {
                self.serialize_list(owner_name, field).ok().map(|(bytes, _)| bytes.len() * 8)
            }
            FieldKind::VariableLengthStruct { .. } => {
                let mut bytes = vec![];
                let value = self.parameters.get(name)?;
                self.serialize_value(owner_name, field, value, &mut bytes).ok()?;
                Some(bytes.len() * 8)
            }
            _ => None,
        }
    }

    fn custom_size(&self, name: &str, _offset: usize) -> Option<usize> {
        Some(self.parameters.get(name)?.as_bytes()?.len() * 8)
    }
}
