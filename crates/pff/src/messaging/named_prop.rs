//! The named property map.
//!
//! Property identifiers from 0x8000 upward are per-file aliases. The map
//! descriptor (0x61) stores three binary streams: namespace GUIDs, fixed
//! eight-byte name records, and a string pool. Each record pairs a numeric
//! name or a string-pool offset with a namespace and yields the mapped
//! identifier `0x8000 + index`.

use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Cursor;

use super::*;
use crate::{
    item::{Item, LookupFlags},
    ltp::value::{self, Guid},
    Result,
};

/// Property identifiers of the map's own streams.
const GUID_STREAM: u32 = 0x0002;
const ENTRY_STREAM: u32 = 0x0003;
const STRING_STREAM: u32 = 0x0004;

/// The MAPI namespace.
pub const PS_MAPI: Guid = Guid {
    data1: 0x00020328,
    data2: 0x0000,
    data3: 0x0000,
    data4: [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
};

/// The public strings namespace.
pub const PS_PUBLIC_STRINGS: Guid = Guid {
    data1: 0x00020329,
    data2: 0x0000,
    data3: 0x0000,
    data4: [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
};

/// A property name: either a numeric identifier within its namespace or a
/// string.
#[derive(Clone, PartialEq, Debug)]
pub enum NamedPropertyName {
    Numeric(u32),
    String(String),
}

#[derive(Clone, Debug)]
pub struct NamedPropertyEntry {
    pub name: NamedPropertyName,
    pub namespace: Guid,
    /// The mapped property identifier, `0x8000 + index`.
    pub mapped_id: u16,
}

/// The decoded map. Missing or unreadable map streams produce an empty map;
/// named lookups then simply find nothing.
#[derive(Default)]
pub struct NameToIdMap {
    entries: Vec<NamedPropertyEntry>,
    by_mapped_id: HashMap<u16, usize>,
}

impl NameToIdMap {
    /// Decode the map from the map descriptor's item.
    pub(crate) fn read(item: &Item<'_>) -> Result<Self> {
        let flags = LookupFlags {
            ignore_name_map: true,
            match_any_value_type: true,
        };

        let guids = item
            .value_bytes(0, GUID_STREAM, None, flags)?
            .map(|(_, bytes)| bytes)
            .unwrap_or_default();
        let records = item
            .value_bytes(0, ENTRY_STREAM, None, flags)?
            .map(|(_, bytes)| bytes)
            .unwrap_or_default();
        let strings = item
            .value_bytes(0, STRING_STREAM, None, flags)?
            .map(|(_, bytes)| bytes)
            .unwrap_or_default();

        Self::decode(&guids, &records, &strings)
    }

    fn decode(guids: &[u8], records: &[u8], strings: &[u8]) -> Result<Self> {
        let mut map = Self::default();
        let mut cursor = Cursor::new(records);

        for record in 0..records.len() / 8 {
            let name_or_offset = cursor.read_u32::<LittleEndian>()?;
            let guid_field = cursor.read_u16::<LittleEndian>()?;
            let index = cursor.read_u16::<LittleEndian>()?;

            let is_string = guid_field & 0x0001 != 0;
            let guid_index = guid_field >> 1;

            let namespace = match guid_index {
                0 => Guid::default(),
                1 => PS_MAPI,
                2 => PS_PUBLIC_STRINGS,
                index => {
                    let start = usize::from(index - 3) * 16;
                    let Some(bytes) = guids.get(start..start + 16) else {
                        return Err(
                            MessagingError::InvalidNamedPropertyNamespace(index).into()
                        );
                    };
                    Guid::from_bytes(bytes.try_into().expect("16 bytes"))
                }
            };

            let name = if is_string {
                let start = usize::try_from(name_or_offset).map_err(|_| {
                    MessagingError::InvalidNamedPropertyStringOffset(name_or_offset)
                })?;
                let Some(mut tail) = strings.get(start..) else {
                    return Err(
                        MessagingError::InvalidNamedPropertyStringOffset(name_or_offset).into(),
                    );
                };
                let length = tail.read_u32::<LittleEndian>()? as usize;
                let Some(bytes) = tail.get(..length) else {
                    return Err(MessagingError::InvalidNamedPropertyEntry(record * 8).into());
                };
                NamedPropertyName::String(value::utf16_from_bytes(bytes))
            } else {
                NamedPropertyName::Numeric(name_or_offset)
            };

            let mapped_id = 0x8000_u16.wrapping_add(index);
            map.by_mapped_id.insert(mapped_id, map.entries.len());
            map.entries.push(NamedPropertyEntry {
                name,
                namespace,
                mapped_id,
            });
        }

        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[NamedPropertyEntry] {
        &self.entries
    }

    /// The entry behind a stored property identifier (0x8000 and up).
    pub fn by_mapped_id(&self, mapped_id: u16) -> Option<&NamedPropertyEntry> {
        self.by_mapped_id
            .get(&mapped_id)
            .map(|&index| &self.entries[index])
    }

    /// First entry whose numeric name matches, scanning in map order.
    pub fn by_numeric_name(&self, name: u32) -> Option<u16> {
        self.entries
            .iter()
            .find(|entry| entry.name == NamedPropertyName::Numeric(name))
            .map(|entry| entry.mapped_id)
    }

    /// First entry whose string name matches exactly.
    pub fn by_string_name(&self, name: &str) -> Option<u16> {
        self.entries
            .iter()
            .find(|entry| matches!(&entry.name, NamedPropertyName::String(s) if s == name))
            .map(|entry| entry.mapped_id)
    }
}
