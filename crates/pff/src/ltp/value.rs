//! Typed value projection.
//!
//! Stored property bytes become typed values here: exact-width integers,
//! IEEE floats, FILETIME ticks, mixed-endian GUIDs, codepage or UTF-16
//! strings, security identifiers, binary blobs, and multi-value arrays of
//! all of the above. Fixed-width multi-values are packed element runs;
//! variable-width multi-values carry a count and an offset table.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt::{self, Debug, Display};
use std::io::Cursor;

use super::{prop_type::*, *};
use crate::{
    codepage::CodepageRegistry,
    datetime::{FatDateTime, Filetime, HfsTime, NsfTime, PosixTime},
    Result,
};

/// A 16-byte GUID in the mixed-endian Microsoft layout.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        Self {
            data1: u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes")),
            data2: u16::from_le_bytes(bytes[4..6].try_into().expect("2 bytes")),
            data3: u16::from_le_bytes(bytes[6..8].try_into().expect("2 bytes")),
            data4: bytes[8..16].try_into().expect("8 bytes"),
        }
    }

    pub fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0_u8; 16];
        bytes[0..4].copy_from_slice(&self.data1.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.data2.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.data3.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.data4);
        bytes
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

/// A Windows NT security identifier.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NtSid {
    pub revision: u8,
    pub authority: u64,
    pub sub_authorities: Vec<u32>,
}

impl NtSid {
    /// Parse the on-disk SID layout: revision, sub-authority count, a 48-bit
    /// big-endian authority, and the little-endian sub-authorities.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 8 {
            return None;
        }
        let revision = bytes[0];
        let count = usize::from(bytes[1]);
        if bytes.len() < 8 + count * 4 {
            return None;
        }
        let mut authority = 0_u64;
        for &byte in &bytes[2..8] {
            authority = (authority << 8) | u64::from(byte);
        }
        let sub_authorities = bytes[8..8 + count * 4]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("4 bytes")))
            .collect();
        Some(Self {
            revision,
            authority,
            sub_authorities,
        })
    }
}

impl Display for NtSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub_authority in &self.sub_authorities {
            write!(f, "-{sub_authority}")?;
        }
        Ok(())
    }
}

/// A materialized property value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer16(i16),
    Integer32(i32),
    Integer64(i64),
    Floating32(f32),
    Floating64(f64),
    Currency(i64),
    FloatingTime(f64),
    ErrorCode(u32),
    Filetime(Filetime),
    PosixTime(PosixTime),
    HfsTime(HfsTime),
    NsfTime(NsfTime),
    FatDateTime(FatDateTime),
    StringAscii { codepage: u16, value: String },
    StringUnicode(String),
    Binary(Vec<u8>),
    Guid(Guid),
    NtSid(NtSid),
    Object { node: u32, size: u32 },
    MultiValue(Vec<Value>),
}

impl Value {
    /// Reinterpret a binary value as a security identifier.
    pub fn to_nt_sid(&self) -> Option<NtSid> {
        match self {
            Value::Binary(bytes) => NtSid::parse(bytes),
            Value::NtSid(sid) => Some(sid.clone()),
            _ => None,
        }
    }

    /// The stored timestamp normalized to POSIX seconds.
    pub fn to_posix_seconds(&self) -> Option<i64> {
        match self {
            Value::Filetime(value) => Some(value.to_posix_seconds()),
            Value::PosixTime(value) => Some(value.0),
            Value::HfsTime(value) => Some(value.to_posix_seconds()),
            Value::NsfTime(value) => Some(value.to_posix_seconds()),
            _ => None,
        }
    }
}

fn expect_size(prop_type: PropertyType, expected: usize, bytes: &[u8]) -> Result<()> {
    if bytes.len() != expected {
        return Err(LtpError::ValueSizeMismatch {
            prop_type,
            expected,
            actual: bytes.len(),
        }
        .into());
    }
    Ok(())
}

/// Decode UTF-16LE bytes, substituting unpaired surrogates.
pub fn utf16_from_bytes(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes(chunk.try_into().expect("2 bytes")))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Project stored bytes into a typed [`Value`]. Narrow strings decode with
/// `codepage` through `registry`.
pub fn project(
    prop_type: PropertyType,
    bytes: &[u8],
    codepage: u16,
    registry: &CodepageRegistry,
) -> Result<Value> {
    let mut cursor = Cursor::new(bytes);
    let value = match prop_type {
        PropertyType::Null => Value::Null,
        PropertyType::Boolean => {
            expect_size(prop_type, 1, bytes)?;
            Value::Boolean(bytes[0] != 0)
        }
        PropertyType::Integer16 => {
            expect_size(prop_type, 2, bytes)?;
            Value::Integer16(cursor.read_i16::<LittleEndian>()?)
        }
        PropertyType::Integer32 => {
            expect_size(prop_type, 4, bytes)?;
            Value::Integer32(cursor.read_i32::<LittleEndian>()?)
        }
        PropertyType::ErrorCode => {
            expect_size(prop_type, 4, bytes)?;
            Value::ErrorCode(cursor.read_u32::<LittleEndian>()?)
        }
        PropertyType::Integer64 => {
            expect_size(prop_type, 8, bytes)?;
            Value::Integer64(cursor.read_i64::<LittleEndian>()?)
        }
        PropertyType::Currency => {
            expect_size(prop_type, 8, bytes)?;
            Value::Currency(cursor.read_i64::<LittleEndian>()?)
        }
        PropertyType::Floating32 => {
            expect_size(prop_type, 4, bytes)?;
            Value::Floating32(cursor.read_f32::<LittleEndian>()?)
        }
        PropertyType::Floating64 => {
            expect_size(prop_type, 8, bytes)?;
            Value::Floating64(cursor.read_f64::<LittleEndian>()?)
        }
        PropertyType::FloatingTime => {
            expect_size(prop_type, 8, bytes)?;
            Value::FloatingTime(cursor.read_f64::<LittleEndian>()?)
        }
        PropertyType::Time => {
            expect_size(prop_type, 8, bytes)?;
            Value::Filetime(Filetime::from_ticks(cursor.read_u64::<LittleEndian>()?))
        }
        PropertyType::Guid => {
            expect_size(prop_type, 16, bytes)?;
            Value::Guid(Guid::from_bytes(bytes.try_into().expect("16 bytes")))
        }
        PropertyType::String8 => {
            let value = registry
                .decode(codepage, bytes)
                .ok_or(LtpError::UnsupportedCodepage(codepage))?;
            Value::StringAscii { codepage, value }
        }
        PropertyType::Unicode => Value::StringUnicode(utf16_from_bytes(bytes)),
        PropertyType::Binary => Value::Binary(bytes.to_vec()),
        PropertyType::Object => {
            expect_size(prop_type, 8, bytes)?;
            let node = cursor.read_u32::<LittleEndian>()?;
            let size = cursor.read_u32::<LittleEndian>()?;
            Value::Object { node, size }
        }
        multi => {
            let element_type = multi.element_type().map_err(crate::PffError::from)?;
            let mut values = Vec::new();
            for slice in multi_value_slices(element_type, bytes)? {
                values.push(project(element_type, slice, codepage, registry)?);
            }
            Value::MultiValue(values)
        }
    };
    Ok(value)
}

/// Split a multi-value payload into per-element slices.
///
/// Fixed-width elements are packed end to end; variable-width payloads open
/// with an element count and an ascending offset table.
pub fn multi_value_slices(element_type: PropertyType, bytes: &[u8]) -> Result<Vec<&[u8]>> {
    if let Some(size) = element_type.fixed_size() {
        if size == 0 {
            return Ok(Vec::new());
        }
        if bytes.len() % size != 0 {
            return Err(LtpError::ValueSizeMismatch {
                prop_type: element_type,
                expected: size,
                actual: bytes.len() % size,
            }
            .into());
        }
        return Ok(bytes.chunks_exact(size).collect());
    }

    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_u32::<LittleEndian>()?;
    let count_usize = usize::try_from(count).map_err(|_| LtpError::InvalidMultiValueCount(count))?;
    if count_usize > (bytes.len().saturating_sub(4)) / 4 {
        return Err(LtpError::InvalidMultiValueCount(count).into());
    }

    let mut offsets = Vec::with_capacity(count_usize + 1);
    for _ in 0..count_usize {
        let offset = cursor.read_u32::<LittleEndian>()?;
        if usize::try_from(offset).map_or(true, |offset| offset > bytes.len()) {
            return Err(LtpError::InvalidMultiValueOffset(offset).into());
        }
        if let Some(&previous) = offsets.last() {
            if offset < previous {
                return Err(LtpError::InvalidMultiValueOffset(offset).into());
            }
        }
        offsets.push(offset);
    }
    offsets.push(bytes.len() as u32);

    Ok(offsets
        .windows(2)
        .map(|pair| &bytes[pair[0] as usize..pair[1] as usize])
        .collect())
}
