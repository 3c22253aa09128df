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

//! Declaration table.

use codespan_reporting::diagnostic::Diagnostic;
use packetgen_runtime::Endianness;
use std::collections::HashMap;

use crate::analyzer::{Diagnostics, ErrorCode, FileId};
use crate::dispatch;
use crate::field::{Field, FieldKind, Sizer};
use crate::field_list::FieldList;
use crate::layout;
use crate::typedef::{ParentDef, TypeDef, TypeKey};

/// Arena of declared types, in declaration order.
///
/// Types may only reference types declared before them. Once
/// [`Declarations::finalize`] succeeds, size fields are linked to their
/// targets and every struct and packet has been checked for a valid
/// layout.
#[derive(Debug)]
pub struct Declarations {
    defs: Vec<TypeDef>,
    names: HashMap<String, TypeKey>,
    /// Non-packet declarations.
    types: Vec<TypeKey>,
    packets: Vec<TypeKey>,
    endianness: Endianness,
    warnings: Diagnostics,
}

impl Declarations {
    pub fn new(endianness: Endianness) -> Declarations {
        Declarations {
            defs: vec![],
            names: HashMap::new(),
            types: vec![],
            packets: vec![],
            endianness,
            warnings: Diagnostics::default(),
        }
    }

    fn insert(&mut self, def: TypeDef) -> Result<TypeKey, Diagnostic<FileId>> {
        if let Some(prev) = self.names.get(&def.name) {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::DuplicateDeclIdentifier)
                .with_message(format!(
                    "redeclaration of {} identifier `{}`",
                    def.kind_name(),
                    def.name
                ))
                .with_notes(vec![format!(
                    "note: `{}` is first declared as a {}",
                    def.name,
                    self.defs[prev.0].kind_name()
                )]));
        }
        let key = TypeKey(self.defs.len());
        self.names.insert(def.name.clone(), key);
        self.defs.push(def);
        Ok(key)
    }

    /// Add an enum, checksum, custom field or struct declaration.
    pub fn add_type_def(&mut self, def: TypeDef) -> Result<TypeKey, Diagnostic<FileId>> {
        if def.is_packet() {
            return self.add_packet_def(def);
        }
        let key = self.insert(def)?;
        self.types.push(key);
        Ok(key)
    }

    pub fn add_packet_def(&mut self, def: TypeDef) -> Result<TypeKey, Diagnostic<FileId>> {
        if !def.is_packet() {
            return self.add_type_def(def);
        }
        let key = self.insert(def)?;
        self.packets.push(key);
        Ok(key)
    }

    pub fn lookup(&self, name: &str) -> Option<TypeKey> {
        self.names.get(name).copied()
    }

    pub fn get(&self, key: TypeKey) -> &TypeDef {
        &self.defs[key.0]
    }

    /// Return the non-packet declaration with the selected name.
    pub fn get_type_def(&self, name: &str) -> Option<&TypeDef> {
        self.lookup(name).map(|key| self.get(key)).filter(|def| !def.is_packet())
    }

    pub fn get_packet_def(&self, name: &str) -> Option<&TypeDef> {
        self.lookup(name).map(|key| self.get(key)).filter(|def| def.is_packet())
    }

    pub fn parent_def(&self, key: TypeKey) -> Option<&ParentDef> {
        self.defs.get(key.0).and_then(TypeDef::parent_def)
    }

    /// Non-packet declarations, in declaration order.
    pub fn types(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.types.iter().copied()
    }

    /// Packet declarations, in declaration order.
    pub fn packets(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.packets.iter().copied()
    }

    /// All declarations, in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = TypeKey> {
        (0..self.defs.len()).map(TypeKey)
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Non-fatal diagnostics raised by [`Declarations::finalize`].
    pub fn warnings(&self) -> &Diagnostics {
        &self.warnings
    }

    pub fn get_parent(&self, key: TypeKey) -> Option<TypeKey> {
        self.parent_def(key).and_then(|def| def.parent)
    }

    /// Iterate over the parent declarations of the selected declaration,
    /// nearest first.
    pub fn iter_parents(&self, key: TypeKey) -> impl Iterator<Item = TypeKey> + '_ {
        std::iter::successors(self.get_parent(key), |key| self.get_parent(*key))
    }

    /// Iterate over the selected declaration and its parents.
    pub fn iter_parents_and_self(&self, key: TypeKey) -> impl Iterator<Item = TypeKey> + '_ {
        std::iter::successors(Some(key), |key| self.get_parent(*key))
    }

    /// Iterate over the direct children of the selected declaration, in
    /// declaration order.
    pub fn iter_children(&self, key: TypeKey) -> impl Iterator<Item = TypeKey> + '_ {
        self.keys().filter(move |child| self.get_parent(*child) == Some(key))
    }

    /// Return the fields of the declaration and its parents in wire order,
    /// with the fields of each derived declaration in place of the parent
    /// payload. Each field is paired with the declaration that owns it.
    pub fn flattened_fields(&self, key: TypeKey) -> Vec<(TypeKey, &Field)> {
        let Some(def) = self.parent_def(key) else {
            return vec![];
        };
        let own = def.fields.iter().map(|field| (key, field));
        let Some(parent) = def.parent else {
            return own.collect();
        };
        let mut fields = self.flattened_fields(parent);
        let payload =
            fields.iter().position(|(owner, field)| *owner == parent && field.is_payload_or_body());
        match payload {
            Some(position) => {
                fields.splice(position..=position, own);
            }
            None => fields.extend(own),
        }
        fields
    }

    /// Return the declaration, among the selected one and its parents,
    /// that declares the named field.
    pub fn owner_of(&self, key: TypeKey, field: &str) -> Option<TypeKey> {
        self.iter_parents_and_self(key)
            .find(|key| self.parent_def(*key).is_some_and(|def| def.fields.contains(field)))
    }

    /// Link the size and count fields of all structs and packets to the
    /// vector or payload they describe.
    pub fn assign_size_fields(&mut self) -> Result<(), Diagnostic<FileId>> {
        for def in self.defs.iter_mut() {
            let name = def.name.clone();
            if let Some(def) = def.parent_def_mut() {
                assign_size_fields(&name, &mut def.fields)?;
            }
        }
        Ok(())
    }

    /// Apply the file endianness to every struct and packet.
    pub fn propagate_endianness(&mut self) {
        let endianness = self.endianness;
        for def in self.defs.iter_mut() {
            if let Some(def) = def.parent_def_mut() {
                def.endianness = endianness;
            }
        }
    }

    /// Complete the declaration table: link size fields, propagate the
    /// endianness, and check the layout of every struct and packet.
    pub fn finalize(&mut self) -> Result<(), Diagnostics> {
        self.assign_size_fields()?;
        self.propagate_endianness();
        for key in self.keys() {
            if self.parent_def(key).is_some() {
                layout::check_layout(self, key)?;
            }
        }
        self.warnings = dispatch::check_indistinguishable_children(self);
        for warning in &self.warnings.diagnostics {
            tracing::warn!("{}", warning.message);
        }
        Ok(())
    }
}

fn assign_size_fields(decl_id: &str, fields: &mut FieldList) -> Result<(), Diagnostic<FileId>> {
    let links: Vec<(usize, String, String, bool)> = fields
        .iter()
        .enumerate()
        .filter_map(|(position, field)| match &field.kind {
            FieldKind::Size { target, .. } => {
                Some((position, field.name.clone(), target.clone(), false))
            }
            FieldKind::Count { target, .. } => {
                Some((position, field.name.clone(), target.clone(), true))
            }
            _ => None,
        })
        .collect();

    for (position, name, target, is_count) in links {
        let (undeclared, invalid) = if is_count {
            (ErrorCode::UndeclaredCountIdentifier, ErrorCode::InvalidCountIdentifier)
        } else {
            (ErrorCode::UndeclaredSizeIdentifier, ErrorCode::InvalidSizeIdentifier)
        };
        let Some(target_position) = fields.position(&target) else {
            return Err(Diagnostic::error()
                .with_code(undeclared)
                .with_message(format!("undeclared {} identifier `{target}` in `{decl_id}`",
                    if is_count { "count" } else { "size" })));
        };
        if target_position < position {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::SizeFieldAfterTarget)
                .with_message(format!(
                    "`{name}` is declared after `{target}` in `{decl_id}`"
                ))
                .with_notes(vec![
                    "note: size and count fields must precede their target".to_owned()
                ]));
        }
        let sizer = if is_count { Sizer::Count(name.clone()) } else { Sizer::Size(name.clone()) };
        let Some(field) = fields.get_mut(&target) else { continue };
        match &mut field.kind {
            FieldKind::Vector { sizer: slot, .. } if slot.is_none() => *slot = Some(sizer),
            FieldKind::Vector { .. } => {
                return Err(Diagnostic::error()
                    .with_code(if is_count {
                        ErrorCode::DuplicateCountField
                    } else {
                        ErrorCode::DuplicateSizeField
                    })
                    .with_message(format!("`{target}` already has a size or count field")))
            }
            FieldKind::Payload { sizer: slot, .. } | FieldKind::Body { sizer: slot }
                if !is_count =>
            {
                *slot = Some(sizer)
            }
            FieldKind::Array { .. } => {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::RedundantArraySize)
                    .with_message(format!(
                        "`{target}` has a fixed number of elements and cannot have a {} field",
                        if is_count { "count" } else { "size" }
                    )))
            }
            _ => {
                return Err(Diagnostic::error()
                    .with_code(invalid)
                    .with_message(format!(
                        "invalid {} field target `{target}` in `{decl_id}`",
                        if is_count { "count" } else { "size" }
                    ))
                    .with_notes(vec![if is_count {
                        "note: count fields can only refer to array fields".to_owned()
                    } else {
                        "note: size fields can only refer to array, payload and body fields"
                            .to_owned()
                    }]))
            }
        }
        tracing::debug!(
            decl = decl_id,
            field = name.as_str(),
            target = target.as_str(),
            "assigned size field"
        );
    }

    for field in fields.iter() {
        if let FieldKind::Vector { sizer, modifier, .. } | FieldKind::Payload { sizer, modifier } =
            &field.kind
        {
            if *modifier > 0 && !matches!(sizer, Some(Sizer::Size(_))) {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::InvalidSizeModifier)
                    .with_message(format!(
                        "`{}` in `{decl_id}` declares a size modifier but has no size field",
                        field.name
                    )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PAYLOAD_NAME;
    use crate::test_utils::declarations;
    use crate::typedef::{EnumDef, TypeDefKind};
    use indexmap::IndexMap;
    use serde_json::json;

    #[test]
    fn test_insertion_order() {
        let mut decls = Declarations::new(Endianness::BigEndian);
        let color = decls
            .add_type_def(TypeDef::new(
                "Color",
                TypeDefKind::Enum(EnumDef::new("Color", 8, [("RED", 1)]).unwrap()),
            ))
            .unwrap();
        let mut fields = FieldList::new();
        fields
            .append(Field::new("color", FieldKind::Enum { type_key: color, width: 8 }))
            .unwrap();
        let pixel = decls
            .add_packet_def(TypeDef::new(
                "Pixel",
                TypeDefKind::Packet(ParentDef {
                    parent: None,
                    fields,
                    constraints: IndexMap::new(),
                    endianness: Endianness::LittleEndian,
                }),
            ))
            .unwrap();
        decls.finalize().unwrap();

        assert_eq!(decls.types().collect::<Vec<_>>(), vec![color]);
        assert_eq!(decls.packets().collect::<Vec<_>>(), vec![pixel]);
        assert!(decls.get_type_def("Color").is_some());
        assert!(decls.get_type_def("Pixel").is_none());
        assert!(decls.get_packet_def("Pixel").is_some());
        assert_eq!(decls.parent_def(pixel).unwrap().endianness, Endianness::BigEndian);

        let err = decls
            .add_type_def(TypeDef::new(
                "Color",
                TypeDefKind::Enum(EnumDef::new("Color", 8, [("RED", 1)]).unwrap()),
            ))
            .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::DuplicateDeclIdentifier.into()));
    }

    #[test]
    fn test_assign_size_fields() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "size_field", "field_id": "_payload_", "width": 8 },
                    { "kind": "count_field", "field_id": "v", "width": 8 },
                    { "kind": "array_field", "id": "v", "width": 16 },
                    { "kind": "payload_field" }
                ] }
            ]),
        );
        let def = decls.parent_def(decls.lookup("A").unwrap()).unwrap();
        assert!(matches!(
            &def.fields.get("v").unwrap().kind,
            FieldKind::Vector { sizer: Some(Sizer::Count(name)), .. } if name == "_count_(v)"
        ));
        assert!(matches!(
            &def.fields.get(PAYLOAD_NAME).unwrap().kind,
            FieldKind::Payload { sizer: Some(Sizer::Size(name)), .. } if name == "_size_(_payload_)"
        ));
    }

    #[test]
    fn test_hierarchy() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "A", "fields": [
                    { "kind": "scalar_field", "id": "a", "width": 8 },
                    { "kind": "payload_field" },
                    { "kind": "scalar_field", "id": "z", "width": 8 }
                ] },
                { "kind": "packet_declaration", "id": "B", "parent_id": "A", "fields": [
                    { "kind": "scalar_field", "id": "b", "width": 8 },
                    { "kind": "payload_field" }
                ] },
                { "kind": "packet_declaration", "id": "C", "parent_id": "B", "fields": [
                    { "kind": "scalar_field", "id": "c", "width": 8 }
                ] },
                { "kind": "packet_declaration", "id": "D", "parent_id": "A", "fields": [] }
            ]),
        );
        let [a, b, c, d] = ["A", "B", "C", "D"].map(|name| decls.lookup(name).unwrap());
        assert_eq!(decls.iter_parents(c).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(decls.iter_children(a).collect::<Vec<_>>(), vec![b, d]);
        assert_eq!(decls.owner_of(c, "a"), Some(a));
        assert_eq!(decls.owner_of(c, "c"), Some(c));
        let names: Vec<&str> =
            decls.flattened_fields(c).iter().map(|(_, field)| field.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "z"]);
        let owners: Vec<TypeKey> =
            decls.flattened_fields(b).iter().map(|(owner, _)| *owner).collect();
        assert_eq!(owners, vec![a, b, b, a]);
    }
}
