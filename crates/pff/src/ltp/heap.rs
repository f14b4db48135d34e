//! Heap-on-node.
//!
//! A heap is a sub-allocator embedded in a data stream. Every backing block
//! of the stream is one heap page; each page ends in an allocation map whose
//! offsets delimit the page's allocations. A heap identifier selects a page
//! and a 1-based allocation within it. The first page additionally opens
//! with the heap header: the map offset, the 0xEC signature, a client
//! signature byte selecting the table layout, and the user root identifier.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{fmt::Debug, io::Cursor, sync::Arc};

use super::*;
use crate::{ndb::data_tree::BlockTree, Result};

/// `bSig` of every heap header.
pub const HEAP_SIGNATURE: u8 = 0xEC;

/// A heap identifier: 5 zero bits, an 11-bit 1-based allocation index, and a
/// 16-bit page index.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapId(u32);

impl HeapId {
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Zero is "no allocation"; table decoders treat it as an absent value.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    /// The kind bits every heap identifier must carry.
    pub fn is_heap_kind(&self) -> bool {
        self.0 & 0x1F == 0
    }

    /// Zero-based allocation index within the page.
    pub fn index(&self) -> LtpResult<u16> {
        let index = ((self.0 >> 5) & 0x7FF) as u16;
        index
            .checked_sub(1)
            .ok_or(LtpError::InvalidHeapId(self.0))
    }

    pub fn page(&self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl Debug for HeapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeapId {{ 0x{:08X} }}", self.0)
    }
}

impl From<u32> for HeapId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

struct HeapPage {
    /// Allocation boundaries: allocation `i` spans `offsets[i]..offsets[i+1]`.
    offsets: Vec<u16>,
}

impl HeapPage {
    fn allocation_count(&self) -> u16 {
        (self.offsets.len().saturating_sub(1)) as u16
    }
}

/// A decoded heap over an assembled data stream.
pub struct HeapNode {
    stream: Arc<BlockTree>,
    pages: Vec<HeapPage>,
    client_signature: u8,
    user_root: HeapId,
}

impl HeapNode {
    pub(crate) fn read(stream: Arc<BlockTree>) -> Result<Self> {
        let first = stream
            .segment(0)
            .ok_or(LtpError::InvalidHeapPageMapOffset(0))?;
        let mut cursor = Cursor::new(first);
        let map_offset = cursor.read_u16::<LittleEndian>()?;
        let signature = cursor.read_u8()?;
        if signature != HEAP_SIGNATURE {
            return Err(LtpError::InvalidHeapSignature(signature).into());
        }
        let client_signature = cursor.read_u8()?;
        let user_root = HeapId::from(cursor.read_u32::<LittleEndian>()?);

        let mut pages = Vec::with_capacity(stream.segment_count());
        pages.push(Self::read_page_map(first, map_offset)?);

        for page in 1..stream.segment_count() {
            let data = stream.segment(page).expect("page index in range");
            let mut cursor = Cursor::new(data);
            let map_offset = cursor.read_u16::<LittleEndian>()?;
            pages.push(Self::read_page_map(data, map_offset)?);
        }

        Ok(Self {
            stream,
            pages,
            client_signature,
            user_root,
        })
    }

    fn read_page_map(data: &[u8], map_offset: u16) -> Result<HeapPage> {
        let start = usize::from(map_offset);
        if start + 4 > data.len() {
            return Err(LtpError::InvalidHeapPageMapOffset(map_offset).into());
        }

        let mut cursor = Cursor::new(&data[start..]);
        let allocation_count = cursor.read_u16::<LittleEndian>()?;
        let _free_count = cursor.read_u16::<LittleEndian>()?;

        let boundary_count = usize::from(allocation_count) + 1;
        if start + 4 + boundary_count * 2 > data.len() {
            return Err(LtpError::InvalidHeapPageMapOffset(map_offset).into());
        }

        let mut offsets = Vec::with_capacity(boundary_count);
        for _ in 0..boundary_count {
            let offset = cursor.read_u16::<LittleEndian>()?;
            if let Some(&previous) = offsets.last() {
                if offset < previous {
                    return Err(LtpError::NonMonotonicHeapOffsets(offset).into());
                }
            }
            offsets.push(offset);
        }

        if let Some(&last) = offsets.last() {
            if usize::from(last) > usize::from(map_offset) {
                return Err(LtpError::HeapAllocationOutOfBounds(last).into());
            }
        }

        Ok(HeapPage { offsets })
    }

    pub fn client_signature(&self) -> u8 {
        self.client_signature
    }

    pub fn user_root(&self) -> HeapId {
        self.user_root
    }

    /// Resolve `id` to its slice of the stream.
    pub fn slice(&self, id: HeapId) -> Result<&[u8]> {
        if !id.is_heap_kind() {
            return Err(LtpError::InvalidHeapId(id.raw()).into());
        }
        let page_index = id.page();
        let page = self
            .pages
            .get(usize::from(page_index))
            .ok_or(LtpError::HeapPageOutOfRange(page_index))?;

        let index = id.index()?;
        if index >= page.allocation_count() {
            return Err(LtpError::HeapIndexOutOfRange {
                index,
                count: page.allocation_count(),
            }
            .into());
        }

        let start = usize::from(page.offsets[usize::from(index)]);
        let end = usize::from(page.offsets[usize::from(index) + 1]);
        let data = self
            .stream
            .segment(usize::from(page_index))
            .ok_or(LtpError::HeapPageOutOfRange(page_index))?;
        Ok(&data[start..end])
    }
}
