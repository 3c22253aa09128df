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

//! Interpreter for the generated artifacts.
//!
//! A [`Context`] reads and writes bytes exactly as the parsers and
//! serializers generated from the same artifacts would: views validate
//! their bytes one declaration level at a time, builders serialize from
//! the most derived level outwards, and specialization selects the first
//! declared child that validates.

mod builder;
mod registry;
mod value;
mod view;

pub use builder::Builder;
pub use registry::Registry;
pub use value::{StructValue, Value};
pub use view::{Validity, View};

use packetgen_runtime::{DecodeError, EncodeError};

use crate::backends::artifacts::Artifacts;
use crate::declarations::Declarations;
use crate::field::Field;
use crate::typedef::{TypeDefKind, TypeKey};

/// Declarations, artifacts and external functions used to read and
/// write packets.
#[derive(Debug, Clone, Copy)]
pub struct Context<'d> {
    pub(crate) decls: &'d Declarations,
    pub(crate) artifacts: &'d Artifacts,
    pub(crate) registry: &'d Registry,
}

impl<'d> Context<'d> {
    pub fn new(
        decls: &'d Declarations,
        artifacts: &'d Artifacts,
        registry: &'d Registry,
    ) -> Context<'d> {
        Context { decls, artifacts, registry }
    }

    /// Create a view of `bytes` as the named struct or packet. The view
    /// must be validated before its fields are read.
    pub fn view<'b>(&self, name: &str, bytes: &'b [u8]) -> Result<View<'d, 'b>, DecodeError> {
        self.decls
            .lookup(name)
            .and_then(|key| View::from_key(*self, key, bytes))
            .ok_or_else(|| DecodeError::UnknownDeclaration { name: name.to_owned() })
    }

    /// Create a builder for the named struct or packet. All parameters
    /// are checked before the builder is returned.
    pub fn builder<K: Into<String>>(
        &self,
        name: &str,
        parameters: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Builder<'d>, EncodeError> {
        let key = self
            .decls
            .lookup(name)
            .filter(|key| self.decls.parent_def(*key).is_some())
            .ok_or_else(|| EncodeError::UnknownDeclaration { name: name.to_owned() })?;
        Builder::new(*self, key, parameters.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Return the most specific valid view of the bytes of `view`: the
    /// first declared child that validates is selected, recursively.
    /// Returns `None` if `view` itself is not valid.
    pub fn specialize<'b>(&self, view: &View<'d, 'b>) -> Option<View<'d, 'b>> {
        if !view.is_valid() {
            return None;
        }
        let mut current = view.clone();
        'specialize: loop {
            for child in self.decls.iter_children(current.key()) {
                let Some(candidate) = View::from_key(*self, child, current.bytes()) else {
                    continue;
                };
                if candidate.is_valid() {
                    current = candidate;
                    continue 'specialize;
                }
            }
            tracing::debug!(from = view.name(), to = current.name(), "specialized view");
            return Some(current);
        }
    }

    /// Return the direct children of the view declaration that accept
    /// its bytes. More than one entry means that the children cannot be
    /// disambiguated and that [`Context::specialize`] selects the first.
    pub fn matching_children(&self, view: &View<'d, '_>) -> Vec<String> {
        self.decls
            .iter_children(view.key())
            .filter_map(|child| View::from_key(*self, child, view.bytes()))
            .filter(|candidate| candidate.is_valid())
            .map(|candidate| candidate.name().to_owned())
            .collect()
    }

    /// Declaration of the field `name` owned by the declaration `owner`.
    pub(crate) fn field(&self, owner: &str, name: &str) -> Option<&'d Field> {
        let key = self.decls.lookup(owner)?;
        self.decls.parent_def(key)?.fields.get(name)
    }

    /// Size function of a custom field declaration.
    pub(crate) fn custom_function(&self, key: TypeKey) -> Option<&'d str> {
        match &self.decls.get(key).kind {
            TypeDefKind::Custom(def) => Some(def.function.as_str()),
            _ => None,
        }
    }
}
