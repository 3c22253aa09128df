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

use packetgen_runtime::{Checksum, CustomField};
use std::collections::HashMap;
use std::fmt;

/// Implementations of the external functions named by checksum and
/// custom field declarations.
#[derive(Default)]
pub struct Registry {
    checksums: HashMap<String, Box<dyn Checksum>>,
    custom_fields: HashMap<String, Box<dyn CustomField>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn with_checksum(
        mut self,
        function: impl Into<String>,
        checksum: impl Checksum + 'static,
    ) -> Registry {
        self.checksums.insert(function.into(), Box::new(checksum));
        self
    }

    pub fn with_custom_field(
        mut self,
        function: impl Into<String>,
        custom_field: impl CustomField + 'static,
    ) -> Registry {
        self.custom_fields.insert(function.into(), Box::new(custom_field));
        self
    }

    pub fn checksum(&self, function: &str) -> Option<&dyn Checksum> {
        self.checksums.get(function).map(|checksum| checksum.as_ref())
    }

    pub fn custom_field(&self, function: &str) -> Option<&dyn CustomField> {
        self.custom_fields.get(function).map(|custom_field| custom_field.as_ref())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("checksums", &self.checksums.keys().collect::<Vec<_>>())
            .field("custom_fields", &self.custom_fields.keys().collect::<Vec<_>>())
            .finish()
    }
}
