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

//! Helper definitions shared by packetgen views and builders.

use bytes::{Buf, BufMut};

/// Byte order of multi-octet values on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Endianness {
    LittleEndian,
    BigEndian,
}

/// Type of parsing errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{name} is not a declared struct or packet")]
    UnknownDeclaration { name: String },
    #[error("when parsing {obj} needed length of {wanted} but got {got}")]
    InvalidLengthError { obj: String, wanted: usize, got: usize },
    #[error("{packet} has no field named {field}")]
    UnknownField { packet: String, field: String },
    #[error("{packet}::{field} is not addressable")]
    NonAddressableField { packet: String, field: String },
    #[error("{packet} does not declare a payload")]
    MissingPayload { packet: String },
    #[error("the bounds of {packet}::{field} cannot be determined")]
    UnknownFieldBounds { packet: String, field: String },
    #[error("custom field {packet}::{field} failed to parse")]
    InvalidCustomField { packet: String, field: String },
    #[error("nested struct {packet}::{field} is not valid")]
    InvalidStructField { packet: String, field: String },
    #[error("no implementation is registered for function {function}")]
    UnregisteredFunction { function: String },
}

/// Type of serialization errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{name} is not a declared struct or packet")]
    UnknownDeclaration { name: String },
    #[error("{packet} cannot be built")]
    AbstractDeclaration { packet: String },
    #[error("missing value for parameter {packet}::{field}")]
    MissingParameter { packet: String, field: String },
    #[error("{packet} has no parameter named {field}")]
    UnknownParameter { packet: String, field: String },
    #[error("the value of {packet}::{field} does not have the expected type {expected}")]
    InvalidParameterType { packet: String, field: String, expected: &'static str },
    #[error(
        "the value of {packet}::{field} ({value}) is outside the range of valid values 0..{maximum_value}"
    )]
    InvalidScalarValue { packet: String, field: String, value: u64, maximum_value: u64 },
    #[error("{tag} is not a valid {type_} value for {packet}::{field}")]
    InvalidEnumTag { packet: String, field: String, tag: String, type_: String },
    #[error("the size of {packet}::{field} ({size}) is outside the range of valid values 0..{maximum_size}")]
    SizeOverflow { packet: String, field: String, size: usize, maximum_size: usize },
    #[error(
        "the count of {packet}::{field} ({count}) is outside the range of valid values 0..{maximum_count}"
    )]
    CountOverflow { packet: String, field: String, count: usize, maximum_count: usize },
    #[error("{packet}::{field} has {actual} elements, but exactly {expected} are required")]
    InvalidArrayLength { packet: String, field: String, expected: usize, actual: usize },
    #[error("{packet}::{field} is {size} bytes long, but is padded to {padded_size} bytes")]
    PaddingOverflow { packet: String, field: String, size: usize, padded_size: usize },
    #[error("{packet}::{field} is {size} bytes long, but the declared width is {expected} bytes")]
    InvalidCustomSize { packet: String, field: String, size: usize, expected: usize },
    #[error("{actual} cannot be used as a value of {expected}")]
    InvalidStructType { expected: String, actual: String },
    #[error("no implementation is registered for function {function}")]
    UnregisteredFunction { function: String },
}

/// External checksum algorithm, referenced by name from checksum
/// declarations.
pub trait Checksum {
    /// Compute the checksum of the covered bytes.
    fn checksum(&self, bytes: &[u8]) -> u64;
}

impl<F> Checksum for F
where
    F: Fn(&[u8]) -> u64,
{
    fn checksum(&self, bytes: &[u8]) -> u64 {
        self(bytes)
    }
}

/// External size function of a variable width custom field.
pub trait CustomField {
    /// Return the size in bytes of the value starting at the beginning of
    /// `bytes`, or `None` if the bytes do not hold a valid value.
    fn size(&self, bytes: &[u8]) -> Option<usize>;
}

impl<F> CustomField for F
where
    F: Fn(&[u8]) -> Option<usize>,
{
    fn size(&self, bytes: &[u8]) -> Option<usize> {
        self(bytes)
    }
}

/// Return the largest value representable with `width` bits.
pub fn max_value(width: usize) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Read an unsigned integer of `len` octets from the start of `bytes`.
/// The caller guarantees that `bytes` holds at least `len` octets and that
/// `len` is at most 8.
pub fn read_uint(mut bytes: &[u8], len: usize, endianness: Endianness) -> u64 {
    match endianness {
        Endianness::LittleEndian => bytes.get_uint_le(len),
        Endianness::BigEndian => bytes.get_uint(len),
    }
}

/// Write the low `len` octets of `value`.
pub fn write_uint(buf: &mut impl BufMut, value: u64, len: usize, endianness: Endianness) {
    match endianness {
        Endianness::LittleEndian => buf.put_uint_le(value, len),
        Endianness::BigEndian => buf.put_uint(value, len),
    }
}

/// Extract the bit-field starting at bit `shift` of a chunk.
pub fn extract_bits(chunk: u64, shift: usize, width: usize) -> u64 {
    if shift >= 64 {
        0
    } else {
        (chunk >> shift) & max_value(width)
    }
}

/// Simple byte sum, as used by the 8 and 16 bit checksum declarations of
/// most protocols.
pub fn byte_sum(width: usize) -> impl Fn(&[u8]) -> u64 {
    move |bytes: &[u8]| {
        bytes.iter().fold(0u64, |sum, byte| sum.wrapping_add(*byte as u64)) & max_value(width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_le() {
        let mut buf = vec![];
        write_uint(&mut buf, 0xaaf7, 2, Endianness::LittleEndian);
        assert_eq!(buf, vec![0xf7, 0xaa]);
        assert_eq!(read_uint(&buf, 2, Endianness::LittleEndian), 0xaaf7);
    }

    #[test]
    fn test_uint_be() {
        let mut buf = vec![];
        write_uint(&mut buf, 0x010203, 3, Endianness::BigEndian);
        assert_eq!(buf, vec![0x01, 0x02, 0x03]);
        assert_eq!(read_uint(&buf, 3, Endianness::BigEndian), 0x010203);
    }

    #[test]
    fn test_extract_bits() {
        assert_eq!(extract_bits(0xaaf7, 0, 7), 0x77);
        assert_eq!(extract_bits(0xaaf7, 7, 4), 0x5);
        assert_eq!(extract_bits(0xaaf7, 11, 5), 0x15);
        assert_eq!(extract_bits(u64::MAX, 0, 64), u64::MAX);
    }

    #[test]
    fn test_max_value() {
        assert_eq!(max_value(1), 1);
        assert_eq!(max_value(8), 0xff);
        assert_eq!(max_value(64), u64::MAX);
    }

    #[test]
    fn test_byte_sum() {
        let sum = byte_sum(16);
        assert_eq!(sum.checksum(&[0xff, 0xff, 0x02]), 0x200);
        let sum = byte_sum(8);
        assert_eq!(sum.checksum(&[0xff, 0x02]), 0x01);
    }
}
