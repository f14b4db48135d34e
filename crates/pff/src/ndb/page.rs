//! Index B-tree pages.
//!
//! Both index trees are packed into fixed 512-byte pages: an entry area, a
//! small footer declaring level and entry geometry, and a trailer carrying
//! the page kind, a signature, a CRC, and the back-pointer the parent
//! recorded for the page. The node tree maps descriptor identifiers to data
//! and local-descriptor identifiers; the block tree maps data identifiers to
//! file offsets and sizes.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use super::{block_id::BlockId, node_id::NodeId, *};
use crate::{block_sig::compute_sig, crc::compute_crc, source::ByteSource, Result};

/// Deepest legal index descent. Well-formed files stay below 8 levels; the
/// cap breaks reference cycles between corrupt pages.
pub const MAX_INDEX_DEPTH: u8 = 16;

/// `ptype`
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PageKind {
    BlockIndex = 0x80,
    NodeIndex = 0x81,
    FreeMap = 0x82,
    AllocationPageMap = 0x83,
    AllocationMap = 0x84,
    FreePageMap = 0x85,
    DensityList = 0x86,
}

impl TryFrom<u8> for PageKind {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(PageKind::BlockIndex),
            0x81 => Ok(PageKind::NodeIndex),
            0x82 => Ok(PageKind::FreeMap),
            0x83 => Ok(PageKind::AllocationPageMap),
            0x84 => Ok(PageKind::AllocationMap),
            0x85 => Ok(PageKind::FreePageMap),
            0x86 => Ok(PageKind::DensityList),
            _ => Err(NdbError::InvalidPageKind(value)),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct PageTrailer {
    pub kind: PageKind,
    pub signature: u16,
    pub crc: u32,
    pub back_pointer: u64,
}

impl PageTrailer {
    fn read(f: &mut dyn Read, profile: &FormatProfile) -> Result<Self> {
        let kind = f.read_u8()?;
        let kind_repeat = f.read_u8()?;
        if kind != kind_repeat {
            return Err(NdbError::MismatchedPageKindRepeat(kind, kind_repeat).into());
        }
        let kind = PageKind::try_from(kind)?;
        let signature = f.read_u16::<LittleEndian>()?;

        let (crc, back_pointer) = if profile.is_64bit() {
            let crc = f.read_u32::<LittleEndian>()?;
            let back_pointer = f.read_u64::<LittleEndian>()?;
            (crc, back_pointer)
        } else {
            let back_pointer = u64::from(f.read_u32::<LittleEndian>()?);
            let crc = f.read_u32::<LittleEndian>()?;
            (crc, back_pointer)
        };

        Ok(Self {
            kind,
            signature,
            crc,
            back_pointer,
        })
    }
}

/// A branch entry: the smallest key reachable through the child page, plus
/// the child's location and expected back-pointer.
#[derive(Copy, Clone, Debug)]
pub struct BranchEntry {
    pub key: u64,
    pub child_back_pointer: u64,
    pub child_offset: u64,
}

/// A node-tree leaf entry: one descriptor.
#[derive(Copy, Clone, Debug)]
pub struct NodeEntry {
    pub node: NodeId,
    pub data: BlockId,
    pub sub_nodes: BlockId,
    pub parent: NodeId,
}

/// A block-tree leaf entry: one physical block.
#[derive(Copy, Clone, Debug)]
pub struct BlockEntry {
    pub block: BlockId,
    pub offset: u64,
    pub size: u16,
    pub references: u16,
}

pub enum PageEntries {
    Branch(Vec<BranchEntry>),
    Node(Vec<NodeEntry>),
    Block(Vec<BlockEntry>),
}

pub struct IndexPage {
    pub level: u8,
    pub entries: PageEntries,
    pub trailer: PageTrailer,
}

impl IndexPage {
    /// Read and validate the page at `offset`. `expected_back_pointer` is the
    /// value the parent (or the header root) recorded for this page; `None`
    /// accepts whatever the trailer carries, which the recovery scanner uses
    /// on candidate pages that no parent references anymore.
    pub fn read(
        source: &dyn ByteSource,
        profile: &FormatProfile,
        kind: PageKind,
        offset: u64,
        expected_back_pointer: Option<u64>,
    ) -> Result<Self> {
        let mut buffer = [0_u8; PAGE_SIZE];
        source.read_at(offset, &mut buffer)?;

        let entry_area = usize::from(profile.page_entry_area);
        let mut footer = Cursor::new(&buffer[entry_area..]);
        let entry_count = footer.read_u8()?;
        let max_entries = footer.read_u8()?;
        let entry_size = footer.read_u8()?;
        let level = footer.read_u8()?;

        let trailer_offset = PAGE_SIZE - 12 - if profile.is_64bit() { 4 } else { 0 };
        let mut trailer = Cursor::new(&buffer[trailer_offset..]);
        let trailer = PageTrailer::read(&mut trailer, profile)?;
        if trailer.kind != kind {
            return Err(NdbError::InvalidPageKind(trailer.kind as u8).into());
        }

        let crc = compute_crc(0, &buffer[..trailer_offset]);
        if crc != trailer.crc {
            return Err(NdbError::InvalidPageCrc {
                stored: trailer.crc,
                computed: crc,
            }
            .into());
        }

        let signature = compute_sig(offset as u32, trailer.back_pointer as u32);
        if signature != trailer.signature {
            return Err(NdbError::InvalidPageSignature(trailer.signature).into());
        }

        if let Some(expected) = expected_back_pointer {
            if trailer.back_pointer != expected {
                return Err(NdbError::PageBackPointerMismatch {
                    expected,
                    found: trailer.back_pointer,
                }
                .into());
            }
        }

        let entries = Self::read_entries(
            &buffer[..entry_area],
            profile,
            kind,
            level,
            entry_count,
            max_entries,
            entry_size,
        )?;

        Ok(Self {
            level,
            entries,
            trailer,
        })
    }

    fn read_entries(
        entry_area: &[u8],
        profile: &FormatProfile,
        kind: PageKind,
        level: u8,
        entry_count: u8,
        max_entries: u8,
        entry_size: u8,
    ) -> Result<PageEntries> {
        let expected_size = Self::expected_entry_size(profile, kind, level);
        if entry_size != expected_size {
            return Err(NdbError::InvalidPageEntrySize(entry_size).into());
        }

        let capacity = (entry_area.len() / usize::from(expected_size)) as u16;
        let count = u16::from(entry_count);
        if count > u16::from(max_entries) || count > capacity {
            return Err(NdbError::PageEntryCountExceedsCapacity { count, capacity }.into());
        }

        let mut cursor = Cursor::new(entry_area);
        let entries = if level > 0 {
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = profile.read_identifier(&mut cursor)?;
                let child_back_pointer = profile.read_identifier(&mut cursor)?;
                let child_offset = profile.read_identifier(&mut cursor)?;
                entries.push(BranchEntry {
                    key,
                    child_back_pointer,
                    child_offset,
                });
            }
            Self::check_monotonic(entries.iter().map(|entry| entry.key))?;
            PageEntries::Branch(entries)
        } else if kind == PageKind::NodeIndex {
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let node = NodeId::from(profile.read_identifier(&mut cursor)? as u32);
                let data = BlockId::read(&mut cursor, profile)?;
                let sub_nodes = BlockId::read(&mut cursor, profile)?;
                let parent = NodeId::read(&mut cursor)?;
                if profile.is_64bit() {
                    let _ = cursor.read_u32::<LittleEndian>()?;
                }
                entries.push(NodeEntry {
                    node,
                    data,
                    sub_nodes,
                    parent,
                });
            }
            Self::check_monotonic(entries.iter().map(|entry| u64::from(entry.node.raw())))?;
            PageEntries::Node(entries)
        } else {
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let block = BlockId::read(&mut cursor, profile)?;
                let offset = profile.read_identifier(&mut cursor)?;
                let size = cursor.read_u16::<LittleEndian>()?;
                let references = cursor.read_u16::<LittleEndian>()?;
                if profile.is_64bit() {
                    let _ = cursor.read_u32::<LittleEndian>()?;
                }
                entries.push(BlockEntry {
                    block,
                    offset,
                    size,
                    references,
                });
            }
            Self::check_monotonic(entries.iter().map(|entry| entry.block.raw()))?;
            PageEntries::Block(entries)
        };

        Ok(entries)
    }

    fn expected_entry_size(profile: &FormatProfile, kind: PageKind, level: u8) -> u8 {
        match (profile.is_64bit(), kind, level) {
            (true, _, 1..) => 24,
            (false, _, 1..) => 12,
            (true, PageKind::NodeIndex, 0) => 32,
            (false, PageKind::NodeIndex, 0) => 16,
            (true, _, 0) => 24,
            (false, _, 0) => 12,
        }
    }

    fn check_monotonic(keys: impl Iterator<Item = u64>) -> Result<()> {
        let mut previous: Option<u64> = None;
        for key in keys {
            if let Some(previous) = previous {
                if key <= previous {
                    return Err(NdbError::NonMonotonicPageKeys(key).into());
                }
            }
            previous = Some(key);
        }
        Ok(())
    }
}

/// One of the two index B-trees, identified by its root location from the
/// header and the page kind its pages must carry.
#[derive(Copy, Clone, Debug)]
pub struct BTreeIndex {
    kind: PageKind,
    root_offset: u64,
    root_back_pointer: u64,
}

impl BTreeIndex {
    pub fn node_index(root: &header::RootInfo) -> Self {
        Self {
            kind: PageKind::NodeIndex,
            root_offset: root.node_index.offset,
            root_back_pointer: root.node_index.identifier,
        }
    }

    pub fn block_index(root: &header::RootInfo) -> Self {
        Self {
            kind: PageKind::BlockIndex,
            root_offset: root.block_index.offset,
            root_back_pointer: root.block_index.identifier,
        }
    }

    /// Descend to the leaf entry for `key`, if present.
    pub fn find(
        &self,
        source: &dyn ByteSource,
        profile: &FormatProfile,
        key: u64,
    ) -> Result<Option<LeafEntry>> {
        let mut offset = self.root_offset;
        let mut back_pointer = self.root_back_pointer;
        let mut last_level: Option<u8> = None;

        for _ in 0..MAX_INDEX_DEPTH {
            let page = IndexPage::read(source, profile, self.kind, offset, Some(back_pointer))?;
            if let Some(parent_level) = last_level {
                if page.level + 1 != parent_level {
                    return Err(NdbError::InvalidPageLevel(page.level).into());
                }
            }
            last_level = Some(page.level);

            match &page.entries {
                PageEntries::Branch(entries) => {
                    // Descend into the last child whose separator key is at
                    // most the search key.
                    let position = entries.partition_point(|entry| entry.key <= key);
                    let Some(entry) = position.checked_sub(1).and_then(|i| entries.get(i)) else {
                        return Ok(None);
                    };
                    offset = entry.child_offset;
                    back_pointer = entry.child_back_pointer;
                }
                PageEntries::Node(entries) => {
                    return Ok(entries
                        .binary_search_by_key(&key, |entry| u64::from(entry.node.raw()))
                        .ok()
                        .map(|index| LeafEntry::Node(entries[index])));
                }
                PageEntries::Block(entries) => {
                    return Ok(entries
                        .binary_search_by_key(&key, |entry| entry.block.raw())
                        .ok()
                        .map(|index| LeafEntry::Block(entries[index])));
                }
            }
        }

        Err(NdbError::IndexDepthExceeded(MAX_INDEX_DEPTH).into())
    }

    /// Visit every leaf entry in key order. The callback returns `false` to
    /// stop the scan early.
    pub fn scan(
        &self,
        source: &dyn ByteSource,
        profile: &FormatProfile,
        visit: &mut dyn FnMut(&LeafEntry) -> Result<bool>,
    ) -> Result<()> {
        self.scan_page(
            source,
            profile,
            self.root_offset,
            self.root_back_pointer,
            MAX_INDEX_DEPTH,
            visit,
        )
        .map(|_| ())
    }

    fn scan_page(
        &self,
        source: &dyn ByteSource,
        profile: &FormatProfile,
        offset: u64,
        back_pointer: u64,
        depth_left: u8,
        visit: &mut dyn FnMut(&LeafEntry) -> Result<bool>,
    ) -> Result<bool> {
        if depth_left == 0 {
            return Err(NdbError::IndexDepthExceeded(MAX_INDEX_DEPTH).into());
        }

        let page = IndexPage::read(source, profile, self.kind, offset, Some(back_pointer))?;
        match &page.entries {
            PageEntries::Branch(entries) => {
                for entry in entries {
                    let keep_going = self.scan_page(
                        source,
                        profile,
                        entry.child_offset,
                        entry.child_back_pointer,
                        depth_left - 1,
                        visit,
                    )?;
                    if !keep_going {
                        return Ok(false);
                    }
                }
            }
            PageEntries::Node(entries) => {
                for entry in entries {
                    if !visit(&LeafEntry::Node(*entry))? {
                        return Ok(false);
                    }
                }
            }
            PageEntries::Block(entries) => {
                for entry in entries {
                    if !visit(&LeafEntry::Block(*entry))? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }
}

#[derive(Copy, Clone, Debug)]
pub enum LeafEntry {
    Node(NodeEntry),
    Block(BlockEntry),
}
