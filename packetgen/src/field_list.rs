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

//! Ordered collection of the fields of a declaration.

use codespan_reporting::diagnostic::Diagnostic;
use indexmap::IndexMap;

use crate::analyzer::{ErrorCode, FileId};
use crate::field::{Field, FieldType};

/// Fields in declaration order, indexed by name. At most one field is
/// a payload or body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldList {
    fields: IndexMap<String, Field>,
    payload: Option<String>,
}

impl FieldList {
    pub fn new() -> FieldList {
        FieldList::default()
    }

    /// Append a field to the end of the list.
    pub fn append(&mut self, field: Field) -> Result<(), Diagnostic<FileId>> {
        if field.is_payload_or_body() {
            if let Some(payload) = &self.payload {
                return Err(Diagnostic::error()
                    .with_code(ErrorCode::DuplicatePayloadField)
                    .with_message(format!(
                        "`{}` is declared after `{payload}`, only one payload or body is allowed",
                        field.name
                    )));
            }
        }
        if self.fields.contains_key(&field.name) {
            return Err(Diagnostic::error()
                .with_code(ErrorCode::DuplicateFieldIdentifier)
                .with_message(format!("redeclaration of field identifier `{}`", field.name)));
        }
        if field.is_payload_or_body() {
            self.payload = Some(field.name.clone());
        }
        self.fields.insert(field.name.clone(), field);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.get_index_of(name)
    }

    pub fn get_index(&self, index: usize) -> Option<&Field> {
        self.fields.get_index(index).map(|(_, field)| field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> + '_ {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Payload or body field, if any.
    pub fn payload(&self) -> Option<&Field> {
        self.payload.as_ref().and_then(|name| self.fields.get(name))
    }

    pub fn has_type(&self, field_type: FieldType) -> bool {
        self.iter().any(|field| field.field_type() == field_type)
    }

    fn from_fields<'a>(fields: impl Iterator<Item = &'a Field>) -> FieldList {
        let mut list = FieldList::new();
        for field in fields {
            if field.is_payload_or_body() {
                list.payload = Some(field.name.clone());
            }
            list.fields.insert(field.name.clone(), field.clone());
        }
        list
    }

    /// Fields declared before the payload or body. All fields if the list
    /// has no payload.
    pub fn fields_before_payload_or_body(&self) -> FieldList {
        FieldList::from_fields(self.iter().take_while(|field| !field.is_payload_or_body()))
    }

    /// Fields declared after the payload or body. Empty if the list has
    /// no payload.
    pub fn fields_after_payload_or_body(&self) -> FieldList {
        match self.payload.as_ref().and_then(|name| self.position(name)) {
            Some(position) => FieldList::from_fields(self.iter().skip(position + 1)),
            None => FieldList::new(),
        }
    }

    /// Flatten a nested field list in place of the payload: the header
    /// of this list, the nested fields, then the footer of this list.
    /// The payload of the result is the payload of the nested list.
    pub fn merge(&self, nested: &FieldList) -> Result<FieldList, Diagnostic<FileId>> {
        let mut merged = FieldList::new();
        for field in self
            .fields_before_payload_or_body()
            .iter()
            .chain(nested.iter())
            .chain(self.fields_after_payload_or_body().iter())
        {
            merged.append(field.clone())?;
        }
        Ok(merged)
    }

    /// Fields of the selected types, in order.
    pub fn with_types(&self, types: &[FieldType]) -> FieldList {
        FieldList::from_fields(self.iter().filter(|field| types.contains(&field.field_type())))
    }

    /// Fields not of the selected types, in order.
    pub fn without_types(&self, types: &[FieldType]) -> FieldList {
        FieldList::from_fields(self.iter().filter(|field| !types.contains(&field.field_type())))
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a Field;
    type IntoIter = indexmap::map::Values<'a, String, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldKind, BODY_NAME, PAYLOAD_NAME};

    fn scalar(name: &str, width: usize) -> Field {
        Field::new(name, FieldKind::Scalar { width })
    }

    fn payload() -> Field {
        Field::new(PAYLOAD_NAME, FieldKind::Payload { sizer: None, modifier: 0 })
    }

    fn names(list: &FieldList) -> Vec<&str> {
        list.iter().map(|field| field.name.as_str()).collect()
    }

    fn list(fields: Vec<Field>) -> FieldList {
        let mut list = FieldList::new();
        for field in fields {
            list.append(field).unwrap();
        }
        list
    }

    #[test]
    fn test_append_duplicate() {
        let mut fields = list(vec![scalar("a", 8)]);
        let err = fields.append(scalar("a", 16)).unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::DuplicateFieldIdentifier.into()));
    }

    #[test]
    fn test_append_second_payload() {
        let mut fields = list(vec![payload()]);
        let err = fields
            .append(Field::new(BODY_NAME, FieldKind::Body { sizer: None }))
            .unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::DuplicatePayloadField.into()));
    }

    #[test]
    fn test_before_after_payload() {
        let fields = list(vec![scalar("a", 8), payload(), scalar("b", 8), scalar("c", 8)]);
        assert_eq!(names(&fields.fields_before_payload_or_body()), vec!["a"]);
        assert_eq!(names(&fields.fields_after_payload_or_body()), vec!["b", "c"]);
        assert_eq!(fields.payload().map(|field| field.name.as_str()), Some(PAYLOAD_NAME));

        let fields = list(vec![scalar("a", 8), scalar("b", 8)]);
        assert_eq!(names(&fields.fields_before_payload_or_body()), vec!["a", "b"]);
        assert!(fields.fields_after_payload_or_body().is_empty());
    }

    #[test]
    fn test_merge() {
        let parent = list(vec![scalar("a", 8), payload(), scalar("z", 8)]);
        let child = list(vec![scalar("b", 8), payload()]);
        let merged = parent.merge(&child).unwrap();
        assert_eq!(names(&merged), vec!["a", "b", PAYLOAD_NAME, "z"]);
        assert_eq!(merged.position(PAYLOAD_NAME), Some(2));

        let child = list(vec![scalar("a", 8)]);
        let err = parent.merge(&child).unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::DuplicateFieldIdentifier.into()));
    }

    #[test]
    fn test_type_filters() {
        let fields = list(vec![
            scalar("a", 8),
            Field::new("_reserved_0", FieldKind::Reserved { width: 8 }),
            scalar("b", 8),
            payload(),
        ]);
        assert_eq!(names(&fields.with_types(&[FieldType::Scalar])), vec!["a", "b"]);
        assert_eq!(
            names(&fields.without_types(&[FieldType::Scalar])),
            vec!["_reserved_0", PAYLOAD_NAME]
        );
        assert!(fields.without_types(&[FieldType::Payload]).payload().is_none());
        assert!(fields.has_type(FieldType::Reserved));
    }
}
