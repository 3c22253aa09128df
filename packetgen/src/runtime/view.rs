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

use std::cell::Cell;
use std::fmt;

use indexmap::IndexMap;
use packetgen_runtime::{extract_bits, max_value, read_uint, DecodeError};

use super::{Context, StructValue, Value};
use crate::backends::artifacts::{FieldSpec, ViewSpec};
use crate::field::{Field, FieldKind, FieldType, Sizer};
use crate::size::{Size, SizeContext};
use crate::typedef::{TypeDefKind, TypeKey};
use crate::validator::{ChecksumCheck, FieldCheck, ValidatorSpec};

/// Validation state of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    NotValidated,
    /// Validation is in progress; queries made during validation see the
    /// view as invalid.
    Validating,
    Valid,
    Invalid,
}

/// Bit range `start..end` within the bytes of a view.
type Bounds = (usize, usize);

/// Read-only view of bytes as a struct or packet.
#[derive(Clone)]
pub struct View<'d, 'b> {
    ctx: Context<'d>,
    key: TypeKey,
    spec: &'d ViewSpec,
    bytes: &'b [u8],
    validity: Cell<Validity>,
}

impl fmt::Debug for View<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("name", &self.spec.name)
            .field("bytes", &self.bytes)
            .field("validity", &self.validity.get())
            .finish()
    }
}

impl<'d, 'b> View<'d, 'b> {
    pub(crate) fn from_key(
        ctx: Context<'d>,
        key: TypeKey,
        bytes: &'b [u8],
    ) -> Option<View<'d, 'b>> {
        let spec = ctx.artifacts.view(&ctx.decls.get(key).name)?;
        Some(View { ctx, key, spec, bytes, validity: Cell::new(Validity::NotValidated) })
    }

    pub fn name(&self) -> &'d str {
        &self.spec.name
    }

    pub fn bytes(&self) -> &'b [u8] {
        self.bytes
    }

    pub fn validity(&self) -> Validity {
        self.validity.get()
    }

    pub(crate) fn key(&self) -> TypeKey {
        self.key
    }

    fn decoder(&self) -> Decoder<'d, 'b> {
        Decoder::new(self.ctx, self.spec, self.bytes)
    }

    /// Validate the bytes of the view. The result is memoized.
    pub fn is_valid(&self) -> bool {
        match self.validity.get() {
            Validity::Valid => return true,
            Validity::Invalid | Validity::Validating => return false,
            Validity::NotValidated => (),
        }
        self.validity.set(Validity::Validating);
        let valid = self.validate();
        self.validity.set(if valid { Validity::Valid } else { Validity::Invalid });
        valid
    }

    /// Validate the levels of the declaration, root first. Each derived
    /// level is validated within the payload of its parent.
    fn validate(&self) -> bool {
        let mut region = (0, self.bytes.len() * 8);
        let mut parent: Option<&'d ViewSpec> = None;
        for level in &self.spec.levels {
            let Some(artifact) = self.ctx.artifacts.parent_artifact(level) else {
                return false;
            };
            if let Some(parent) = parent {
                let payload = parent
                    .payload
                    .as_ref()
                    .and_then(|name| parent.level_field(&parent.name, name))
                    .and_then(|payload| Decoder::new(self.ctx, parent, self.bytes).locate(payload));
                match payload {
                    Some(bounds) => region = bounds,
                    None => return false,
                }
            }
            let decoder = Decoder::new(self.ctx, &artifact.view, self.bytes);
            if !decoder.validate_level(&artifact.validator, region) {
                tracing::trace!(view = self.spec.name.as_str(), level = level.as_str(), "invalid");
                return false;
            }
            parent = Some(&artifact.view);
        }
        true
    }

    fn assert_valid(&self) {
        assert!(
            self.validity.get() == Validity::Valid,
            "fields of {} can only be read from a validated view",
            self.spec.name
        );
    }

    /// Read the value of an addressable field.
    ///
    /// # Panics
    ///
    /// Panics if the view was not successfully validated.
    pub fn get(&self, name: &str) -> Result<Value, DecodeError> {
        self.assert_valid();
        let unknown =
            || DecodeError::UnknownField { packet: self.spec.name.clone(), field: name.to_owned() };
        let spec = self.spec.field(name).ok_or_else(unknown)?;
        if !spec.addressable {
            return Err(DecodeError::NonAddressableField {
                packet: spec.owner.clone(),
                field: name.to_owned(),
            });
        }
        let decoder = self.decoder();
        let field = decoder.field(spec).ok_or_else(unknown)?;
        decoder.decode_field(spec, field)
    }

    /// Return the bytes of the payload or body of the declaration.
    ///
    /// # Panics
    ///
    /// Panics if the view was not successfully validated.
    pub fn payload(&self) -> Result<&'b [u8], DecodeError> {
        self.assert_valid();
        let spec = self
            .spec
            .payload
            .as_ref()
            .and_then(|name| self.spec.level_field(&self.spec.name, name))
            .ok_or_else(|| DecodeError::MissingPayload { packet: self.spec.name.clone() })?;
        self.decoder()
            .locate(spec)
            .and_then(|(start, end)| self.bytes.get(start / 8..end / 8))
            .ok_or_else(|| DecodeError::UnknownFieldBounds {
                packet: self.spec.name.clone(),
                field: spec.name.clone(),
            })
    }

    /// Size of the declaration in bytes. Declarations ending with an
    /// unbounded field extend to the end of the bytes.
    ///
    /// # Panics
    ///
    /// Panics if the view was not successfully validated.
    pub fn size(&self) -> usize {
        self.assert_valid();
        self.spec.size.evaluate(&self.decoder()).map_or(self.bytes.len(), |bits| bits / 8)
    }

    /// Decode all addressable fields and the payload.
    pub fn to_struct_value(&self) -> Result<StructValue, DecodeError> {
        let mut fields = IndexMap::new();
        for spec in self.spec.fields.iter().filter(|spec| spec.addressable) {
            fields.insert(spec.name.clone(), self.get(&spec.name)?);
        }
        let payload = match &self.spec.payload {
            Some(_) => self.payload()?.to_vec(),
            None => vec![],
        };
        Ok(StructValue { type_id: self.spec.name.clone(), fields, payload })
    }
}

/// Field lookups and size computations over the bytes of a view.
///
/// Names are resolved from one declaration level of the view outwards,
/// so that the expressions of a parent field refer to the generated
/// fields of the parent even when a derived level reuses their names.
#[derive(Clone, Copy)]
pub(crate) struct Decoder<'d, 'b> {
    ctx: Context<'d>,
    spec: &'d ViewSpec,
    level: usize,
    bytes: &'b [u8],
}

impl<'d, 'b> Decoder<'d, 'b> {
    pub(crate) fn new(ctx: Context<'d>, spec: &'d ViewSpec, bytes: &'b [u8]) -> Self {
        Decoder { ctx, spec, level: spec.levels.len().saturating_sub(1), bytes }
    }

    fn total_bits(&self) -> usize {
        self.bytes.len() * 8
    }

    fn scoped(&self, owner: &str) -> Self {
        let level = self.spec.levels.iter().position(|level| level == owner).unwrap_or(self.level);
        Decoder { level, ..*self }
    }

    /// The payload of a parent level is replaced by the fields of the
    /// derived levels, and is found in the view of the parent itself.
    fn resolve(&self, name: &str) -> Option<&'d FieldSpec> {
        self.spec.levels.iter().take(self.level + 1).rev().find_map(|level| {
            self.spec
                .level_field(level, name)
                .or_else(|| self.ctx.artifacts.view(level)?.level_field(level, name))
        })
    }

    fn evaluate(&self, spec: &FieldSpec, size: &Size) -> Option<usize> {
        size.evaluate(&self.scoped(&spec.owner))
    }

    fn field(&self, spec: &FieldSpec) -> Option<&'d Field> {
        self.ctx.field(&spec.owner, &spec.name)
    }

    /// Locate a field, preferring its start offset, then its end offset.
    pub(crate) fn locate(&self, spec: &FieldSpec) -> Option<Bounds> {
        let total = self.total_bits();
        let start = self.evaluate(spec, &spec.start);
        let size = self.evaluate(spec, &spec.size);
        let (start, end) = match (start, size) {
            (Some(start), Some(size)) => (start, start.checked_add(size)?),
            (start, size) => {
                let end = total.checked_sub(self.evaluate(spec, &spec.end)?)?;
                match (start, size) {
                    (Some(start), _) => (start, end),
                    (None, Some(size)) => (end.checked_sub(size)?, end),
                    (None, None) => return None,
                }
            }
        };
        (start <= end && end <= total).then_some((start, end))
    }

    /// Read a bit-field from its chunk.
    fn read_integer(&self, spec: &FieldSpec) -> Option<u64> {
        let bitfield = spec.bitfield.as_ref()?;
        let chunk = self.spec.level_field(&spec.owner, &bitfield.chunk)?;
        let (start, _) = self.locate(chunk)?;
        let len = bitfield.chunk_width / 8;
        let bytes = self.bytes.get(start / 8..start / 8 + len)?;
        let chunk = read_uint(bytes, len, self.ctx.decls.endianness());
        Some(extract_bits(chunk, bitfield.shift, bitfield.width))
    }

    fn read_level_integer(&self, owner: &str, name: &str) -> Option<u64> {
        self.read_integer(self.spec.level_field(owner, name)?)
    }

    /// Size in bits of the element starting at bit `offset`. Variable
    /// elements are measured within `offset..limit`.
    fn element_size(&self, element: &Field, offset: usize, limit: usize) -> Option<usize> {
        let size = element.size();
        if size.is_static() {
            return Some(size.bits());
        }
        let bytes = self.bytes.get(offset / 8..limit / 8)?;
        match &element.kind {
            FieldKind::Custom { type_key, .. } => {
                let function = self.ctx.custom_function(*type_key)?;
                let size = self.ctx.registry.custom_field(function)?.size(bytes)?;
                (size <= bytes.len()).then_some(size * 8)
            }
            FieldKind::VariableLengthStruct { type_key } => {
                let view = View::from_key(self.ctx, *type_key, bytes)?;
                Some(self.ctx.specialize(&view)?.size() * 8)
            }
            _ => None,
        }
    }

    /// Size of `count` elements starting at the field start.
    fn elements_size(&self, spec: &FieldSpec, element: &Field, count: usize) -> Option<usize> {
        let size = element.size();
        if size.is_static() {
            return count.checked_mul(size.bits());
        }
        let total = self.total_bits();
        let start = self.evaluate(spec, &spec.start)?;
        let mut offset = start;
        for _ in 0..count {
            offset = offset.checked_add(self.element_size(element, offset, total)?)?;
            if offset > total {
                return None;
            }
        }
        Some(offset - start)
    }

    fn sized_bits(&self, spec: &FieldSpec, sizer: &str, modifier: usize) -> Option<usize> {
        let value = usize::try_from(self.read_level_integer(&spec.owner, sizer)?).ok()?;
        value.checked_sub(modifier)?.checked_mul(8)
    }

    fn enum_value(&self, type_key: TypeKey, value: u64) -> Value {
        match &self.ctx.decls.get(type_key).kind {
            TypeDefKind::Enum(def) => match def.name_of(value) {
                Some(tag) => Value::Tag(tag.to_owned()),
                None => Value::Integer(value),
            },
            _ => Value::Integer(value),
        }
    }

    fn decode_field(&self, spec: &FieldSpec, field: &Field) -> Result<Value, DecodeError> {
        let decoder = self.scoped(&spec.owner);
        let unknown_bounds = || DecodeError::UnknownFieldBounds {
            packet: spec.owner.clone(),
            field: spec.name.clone(),
        };
        match &field.kind {
            FieldKind::Scalar { .. } | FieldKind::Checksum { .. } => {
                decoder.read_integer(spec).map(Value::Integer).ok_or_else(unknown_bounds)
            }
            FieldKind::Enum { type_key, .. } => decoder
                .read_integer(spec)
                .map(|value| decoder.enum_value(*type_key, value))
                .ok_or_else(unknown_bounds),
            FieldKind::Array { element, count } => {
                let bounds = decoder.locate(spec).ok_or_else(unknown_bounds)?;
                Ok(Value::List(decoder.decode_elements(&spec.owner, element, bounds, Some(*count))))
            }
            FieldKind::Vector { element, sizer, .. } => {
                let bounds = decoder.locate(spec).ok_or_else(unknown_bounds)?;
                let count = match sizer {
                    Some(Sizer::Count(counter)) => decoder
                        .read_level_integer(&spec.owner, counter)
                        .and_then(|count| usize::try_from(count).ok()),
                    _ => None,
                };
                Ok(Value::List(decoder.decode_elements(&spec.owner, element, bounds, count)))
            }
            _ => {
                let bounds = decoder.locate(spec).ok_or_else(unknown_bounds)?;
                decoder.decode_value(&spec.owner, field, bounds)
            }
        }
    }

    /// Decode a value occupying whole octets.
    fn decode_value(
        &self,
        owner: &str,
        field: &Field,
        (start, end): Bounds,
    ) -> Result<Value, DecodeError> {
        let endianness = self.ctx.decls.endianness();
        let bytes = self.bytes.get(start / 8..end / 8).ok_or_else(|| {
            DecodeError::InvalidLengthError {
                obj: owner.to_owned(),
                wanted: end / 8,
                got: self.bytes.len(),
            }
        })?;
        match &field.kind {
            FieldKind::Scalar { width } => {
                Ok(Value::Integer(read_uint(bytes, width / 8, endianness)))
            }
            FieldKind::Enum { type_key, width } => {
                Ok(self.enum_value(*type_key, read_uint(bytes, width / 8, endianness)))
            }
            FieldKind::Custom { type_key, .. } => {
                let invalid = || DecodeError::InvalidCustomField {
                    packet: owner.to_owned(),
                    field: field.name.clone(),
                };
                let function = self.ctx.custom_function(*type_key).ok_or_else(invalid)?;
                let custom_field = self.ctx.registry.custom_field(function).ok_or_else(|| {
                    DecodeError::UnregisteredFunction { function: function.to_owned() }
                })?;
                match custom_field.size(bytes) {
                    Some(size) if size == bytes.len() => Ok(Value::Bytes(bytes.to_vec())),
                    _ => Err(invalid()),
                }
            }
            FieldKind::Struct { type_key, .. } | FieldKind::VariableLengthStruct { type_key } => {
                let invalid = || DecodeError::InvalidStructField {
                    packet: owner.to_owned(),
                    field: field.name.clone(),
                };
                let view = View::from_key(self.ctx, *type_key, bytes).ok_or_else(invalid)?;
                let view = self.ctx.specialize(&view).ok_or_else(invalid)?;
                view.to_struct_value().map(Value::Struct)
            }
            _ => Err(DecodeError::NonAddressableField {
                packet: owner.to_owned(),
                field: field.name.clone(),
            }),
        }
    }

    /// Decode the elements within `bounds`. Decoding stops at the first
    /// truncated or malformed element.
    fn decode_elements(
        &self,
        owner: &str,
        element: &Field,
        (start, end): Bounds,
        count: Option<usize>,
    ) -> Vec<Value> {
        let mut values = vec![];
        let mut offset = start;
        while offset < end && count.map_or(true, |count| values.len() < count) {
            let Some(size) = self.element_size(element, offset, end) else { break };
            if size == 0 || offset + size > end {
                break;
            }
            match self.decode_value(owner, element, (offset, offset + size)) {
                Ok(value) => values.push(value),
                Err(_) => break,
            }
            offset += size;
        }
        values
    }

    /// Run the checks of the last level of the view, whose fields must
    /// fit within `region`.
    fn validate_level(
        &self,
        validator: &ValidatorSpec,
        (region_start, region_end): Bounds,
    ) -> bool {
        let level = self.spec.name.as_str();
        if region_end - region_start < validator.min_size {
            return false;
        }

        let mut cursor = region_start;
        for name in &validator.walk {
            let Some(spec) = self.spec.level_field(level, name) else { return false };
            let Some((start, end)) = self.locate(spec) else { return false };
            let overlaps = match spec.field_type {
                FieldType::Padding => end < cursor,
                _ => start < cursor,
            };
            // Sized fields must match their size field.
            let sized = spec.size.empty() || self.evaluate(spec, &spec.size) == Some(end - start);
            if overlaps || !sized || end > region_end || !self.check_elements(spec, end - start) {
                return false;
            }
            cursor = end;
        }

        if !validator.checksums.iter().all(|check| self.check_checksum(check)) {
            return false;
        }

        for check in &validator.constraints {
            let value = self.resolve(&check.field).and_then(|spec| self.read_integer(spec));
            if value != Some(check.value) {
                return false;
            }
        }

        validator.field_checks.iter().all(|check| match check {
            FieldCheck::Fixed { field, value } => {
                self.read_level_integer(level, field) == Some(*value)
            }
            FieldCheck::Struct { field, struct_id } => self.check_struct(level, field, struct_id),
        })
    }

    /// Sized vectors of static elements must hold a whole number of
    /// elements.
    fn check_elements(&self, spec: &FieldSpec, size: usize) -> bool {
        match self.field(spec).map(|field| &field.kind) {
            Some(FieldKind::Vector { element, sizer: Some(Sizer::Size(_)), .. }) => {
                let element = element.size();
                !element.is_static() || element.bits() == 0 || size % element.bits() == 0
            }
            _ => true,
        }
    }

    fn check_checksum(&self, check: &ChecksumCheck) -> bool {
        let level = self.spec.name.as_str();
        let (Some(start), Some(field)) =
            (self.spec.level_field(level, &check.start), self.spec.level_field(level, &check.field))
        else {
            return false;
        };
        let Some(bitfield) = &field.bitfield else { return false };
        let Some(chunk) = self.spec.level_field(level, &bitfield.chunk) else { return false };
        let (Some((start, _)), Some((end, _))) = (self.locate(start), self.locate(chunk)) else {
            return false;
        };
        let covered = self.bytes.get(start / 8..end / 8);
        let (Some(bytes), Some(stored)) = (covered, self.read_integer(field)) else {
            return false;
        };
        let Some(checksum) = self.ctx.registry.checksum(&check.function) else {
            tracing::warn!(
                function = check.function.as_str(),
                "checksum function is not registered"
            );
            return false;
        };
        checksum.checksum(bytes) & max_value(bitfield.width) == stored
    }

    fn check_struct(&self, level: &str, field: &str, struct_id: &str) -> bool {
        let Some(spec) = self.spec.level_field(level, field) else { return false };
        let Some((start, end)) = self.locate(spec) else { return false };
        let bytes = self.bytes.get(start / 8..end / 8);
        let (Some(bytes), Some(key)) = (bytes, self.ctx.decls.lookup(struct_id)) else {
            return false;
        };
        View::from_key(self.ctx, key, bytes).is_some_and(|view| view.is_valid())
    }
}

impl SizeContext for Decoder<'_, '_> {
    fn field_size(&self, name: &str) -> Option<usize> {
        let spec = self.resolve(name)?;
        let field = self.field(spec)?;
        let decoder = self.scoped(&spec.owner);
        match &field.kind {
            FieldKind::Vector { sizer: Some(Sizer::Size(sizer)), modifier, .. }
            | FieldKind::Payload { sizer: Some(Sizer::Size(sizer)), modifier } => {
                decoder.sized_bits(spec, sizer, *modifier)
            }
            FieldKind::Body { sizer: Some(Sizer::Size(sizer)) } => {
                decoder.sized_bits(spec, sizer, 0)
            }
            FieldKind::Vector { element, sizer: Some(Sizer::Count(counter)), .. } => {
                let count = decoder.read_level_integer(&spec.owner, counter)?;
                decoder.elements_size(spec, element, usize::try_from(count).ok()?)
            }
            FieldKind::Array { element, count } => decoder.elements_size(spec, element, *count),
            FieldKind::VariableLengthStruct { .. } => {
                let start = decoder.evaluate(spec, &spec.start)?;
                decoder.element_size(field, start, decoder.total_bits())
            }
            _ => None,
        }
    }

    fn custom_size(&self, name: &str, offset: usize) -> Option<usize> {
        let field = self.field(self.resolve(name)?)?;
        self.element_size(field, offset, self.total_bits())
    }
}
