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

//! Bit sizes that may only be known at runtime.

use serde::Serialize;
use std::fmt;
use std::ops;

/// Runtime computed part of a size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeTerm {
    /// Size of the named field, read from the field itself
    /// or from its size or count field.
    FieldSize(String),
    /// Size returned by the size function of a variable width custom
    /// field, evaluated at the given offset.
    CustomSize { field: String, offset: Box<Size> },
}

/// Size of a field or declaration, in bits.
///
/// A size with neither a static part nor dynamic terms is unknown:
/// it can only be discovered by walking the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Size {
    bits: Option<usize>,
    dynamic: Vec<SizeTerm>,
}

/// Error returned when a size is converted to octets but is not
/// a multiple of 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotByteAligned(pub usize);

impl fmt::Display for NotByteAligned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "size of {} bits is not a multiple of 8", self.0)
    }
}

/// Runtime environment for evaluating dynamic size terms.
pub trait SizeContext {
    /// Size in bits of the named field, if it can be determined.
    fn field_size(&self, field: &str) -> Option<usize>;
    /// Size in bits of a variable width custom field starting at the
    /// given bit offset.
    fn custom_size(&self, field: &str, offset: usize) -> Option<usize>;
}

impl Size {
    /// Unknown size.
    pub fn unknown() -> Size {
        Size::default()
    }

    pub fn from_bits(bits: usize) -> Size {
        Size { bits: Some(bits), dynamic: vec![] }
    }

    pub fn from_term(term: SizeTerm) -> Size {
        Size { bits: None, dynamic: vec![term] }
    }

    pub fn field_size(name: &str) -> Size {
        Size::from_term(SizeTerm::FieldSize(name.to_owned()))
    }

    /// Return true if the size is unknown.
    pub fn empty(&self) -> bool {
        self.bits.is_none() && self.dynamic.is_empty()
    }

    pub fn has_dynamic(&self) -> bool {
        !self.dynamic.is_empty()
    }

    /// Return true if the size is known at compile time.
    pub fn is_static(&self) -> bool {
        self.bits.is_some() && self.dynamic.is_empty()
    }

    /// Static part of the size. Unknown sizes and purely dynamic sizes
    /// have a static part of zero.
    pub fn bits(&self) -> usize {
        self.bits.unwrap_or(0)
    }

    /// Static part of the size, in octets.
    pub fn bytes(&self) -> Result<usize, NotByteAligned> {
        let bits = self.bits();
        if bits % 8 == 0 {
            Ok(bits / 8)
        } else {
            Err(NotByteAligned(bits))
        }
    }

    pub fn terms(&self) -> &[SizeTerm] {
        &self.dynamic
    }

    /// Render the dynamic terms as an expression.
    pub fn dynamic_string(&self) -> String {
        self.dynamic.iter().map(|term| term.to_string()).collect::<Vec<_>>().join(" + ")
    }

    /// Compute the concrete size in bits. Returns `None` if the size is
    /// unknown or if one of the dynamic terms cannot be evaluated.
    pub fn evaluate(&self, ctx: &impl SizeContext) -> Option<usize> {
        if self.empty() {
            return None;
        }
        let mut total = self.bits();
        for term in &self.dynamic {
            total += match term {
                SizeTerm::FieldSize(field) => ctx.field_size(field)?,
                SizeTerm::CustomSize { field, offset } => {
                    ctx.custom_size(field, offset.evaluate(ctx)?)?
                }
            };
        }
        Some(total)
    }
}

impl ops::Add for Size {
    type Output = Size;
    fn add(self, rhs: Size) -> Self::Output {
        if self.empty() || rhs.empty() {
            return Size::unknown();
        }
        let bits = match (self.bits, rhs.bits) {
            (None, None) => None,
            (lhs, rhs) => Some(lhs.unwrap_or(0) + rhs.unwrap_or(0)),
        };
        let mut dynamic = self.dynamic;
        dynamic.extend(rhs.dynamic);
        Size { bits, dynamic }
    }
}

impl ops::AddAssign for Size {
    fn add_assign(&mut self, rhs: Size) {
        *self = std::mem::take(self) + rhs;
    }
}

impl fmt::Display for SizeTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeTerm::FieldSize(field) => write!(f, "size({field})"),
            SizeTerm::CustomSize { field, offset } => write!(f, "custom_size({field} @ {offset})"),
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.bits, self.dynamic.is_empty()) {
            (None, true) => write!(f, "unknown"),
            (Some(bits), true) => write!(f, "{bits}"),
            (None | Some(0), false) => write!(f, "{}", self.dynamic_string()),
            (Some(bits), false) => write!(f, "{bits} + {}", self.dynamic_string()),
        }
    }
}

impl Serialize for Size {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
