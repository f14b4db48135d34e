//! Logical data streams.
//!
//! A descriptor's data identifier names either a single external block, whose
//! decrypted payload is the whole stream, or an internal block carrying a
//! level, a declared total size, and an array of child identifiers. The
//! assembled stream is a run of segments ordered by logical offset; random
//! access binary-searches the segment starts.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{io::Cursor, sync::Arc};

use super::{block_id::BlockId, *};
use crate::Result;

/// Block-kind byte of a data tree block.
pub const DATA_TREE_KIND: u8 = 0x01;

/// Deepest legal data tree.
pub const MAX_DATA_TREE_DEPTH: u8 = 4;

/// Largest assembled stream.
pub const MAX_STREAM_SIZE: u64 = 2 * 1024 * 1024 * 1024;

struct Segment {
    start: u64,
    data: Arc<Vec<u8>>,
}

/// An assembled logical stream.
pub struct BlockTree {
    total_size: u64,
    segments: Vec<Segment>,
}

impl BlockTree {
    /// Assemble the stream rooted at `block`. The declared total size is
    /// authoritative; a shortfall from unreadable or missing children is an
    /// error.
    pub(crate) fn assemble(
        resolver: &dyn BlockResolver,
        profile: &FormatProfile,
        block: BlockId,
    ) -> Result<Self> {
        let mut segments = Vec::new();
        let mut next_start = 0_u64;
        let declared =
            Self::collect(resolver, profile, block, MAX_DATA_TREE_DEPTH, &mut segments, &mut next_start)?;

        let declared = declared.unwrap_or(next_start);
        if declared != next_start {
            return Err(NdbError::DataStreamTruncated {
                declared,
                assembled: next_start,
            }
            .into());
        }

        Ok(Self {
            total_size: next_start,
            segments,
        })
    }

    /// Walk the tree below `block`, appending leaf payloads in order.
    /// Returns the declared total size if `block` is an internal tree block.
    fn collect(
        resolver: &dyn BlockResolver,
        profile: &FormatProfile,
        block: BlockId,
        depth_left: u8,
        segments: &mut Vec<Segment>,
        next_start: &mut u64,
    ) -> Result<Option<u64>> {
        let data = resolver.read(block)?;

        if !block.is_internal() {
            *next_start = next_start
                .checked_add(data.len() as u64)
                .filter(|&total| total <= MAX_STREAM_SIZE)
                .ok_or(NdbError::DataStreamTooLarge(MAX_STREAM_SIZE))?;
            segments.push(Segment {
                start: *next_start - data.len() as u64,
                data,
            });
            return Ok(None);
        }

        if depth_left == 0 {
            return Err(NdbError::DataTreeDepthExceeded(MAX_DATA_TREE_DEPTH).into());
        }

        let mut cursor = Cursor::new(data.as_slice());
        let kind = cursor.read_u8()?;
        if kind != DATA_TREE_KIND {
            return Err(NdbError::InvalidDataTreeKind(kind).into());
        }

        let level = cursor.read_u8()?;
        if level == 0 || level > MAX_DATA_TREE_DEPTH {
            return Err(NdbError::InvalidDataTreeLevel(level).into());
        }

        let entry_count = cursor.read_u16::<LittleEndian>()?;
        let total_size = u64::from(cursor.read_u32::<LittleEndian>()?);
        if total_size > MAX_STREAM_SIZE {
            return Err(NdbError::DataStreamTooLarge(MAX_STREAM_SIZE).into());
        }

        let header_size = 8_usize;
        let capacity =
            (data.len().saturating_sub(header_size)) / usize::from(profile.identifier_size);
        if usize::from(entry_count) > capacity {
            return Err(NdbError::InvalidDataTreeEntryCount(entry_count).into());
        }

        for _ in 0..entry_count {
            let child = BlockId::read(&mut cursor, profile)?;
            Self::collect(resolver, profile, child, depth_left - 1, segments, next_start)?;
        }

        Ok(Some(total_size))
    }

    pub fn size(&self) -> u64 {
        self.total_size
    }

    /// Copy stream bytes starting at `offset` into `buffer`. Returns the
    /// number of bytes copied, which is short only at end of stream.
    pub fn read_at(&self, offset: u64, buffer: &mut [u8]) -> usize {
        if offset >= self.total_size || buffer.is_empty() {
            return 0;
        }

        let mut index = self
            .segments
            .partition_point(|segment| segment.start <= offset)
            .saturating_sub(1);
        let mut copied = 0_usize;
        let mut position = offset;

        while copied < buffer.len() {
            let Some(segment) = self.segments.get(index) else {
                break;
            };
            let within = (position - segment.start) as usize;
            if within >= segment.data.len() {
                break;
            }
            let available = segment.data.len() - within;
            let wanted = buffer.len() - copied;
            let take = available.min(wanted);
            buffer[copied..copied + take]
                .copy_from_slice(&segment.data[within..within + take]);
            copied += take;
            position += take as u64;
            index += 1;
        }

        copied
    }

    /// Copy the whole stream out.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.total_size as usize);
        for segment in &self.segments {
            data.extend_from_slice(&segment.data);
        }
        data
    }

    /// Number of physical blocks backing the stream. The heap-on-node layer
    /// treats each backing block as one heap page.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Borrow the payload of the `index`th backing block.
    pub fn segment(&self, index: usize) -> Option<&[u8]> {
        self.segments.get(index).map(|segment| segment.data.as_slice())
    }

    /// Borrow the stream as one slice when it is backed by a single segment.
    pub fn as_single_slice(&self) -> Option<&[u8]> {
        match self.segments.as_slice() {
            [] => Some(&[]),
            [only] => Some(&only.data),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) struct MapResolver {
        pub blocks: HashMap<u64, Arc<Vec<u8>>>,
    }

    impl BlockResolver for MapResolver {
        fn lookup(&self, block: BlockId) -> Result<page::BlockEntry> {
            let data = self
                .blocks
                .get(&block.raw())
                .ok_or(NdbError::BlockNotFound(block.raw()))?;
            Ok(page::BlockEntry {
                block,
                offset: 0,
                size: data.len() as u16,
                references: 1,
            })
        }

        fn read(&self, block: BlockId) -> Result<Arc<Vec<u8>>> {
            self.blocks
                .get(&block.raw())
                .cloned()
                .ok_or_else(|| NdbError::BlockNotFound(block.raw()).into())
        }
    }

    fn tree_block(profile: &FormatProfile, level: u8, total: u32, children: &[u64]) -> Vec<u8> {
        let mut data = vec![DATA_TREE_KIND, level];
        data.extend_from_slice(&(children.len() as u16).to_le_bytes());
        data.extend_from_slice(&total.to_le_bytes());
        for &child in children {
            if profile.is_64bit() {
                data.extend_from_slice(&child.to_le_bytes());
            } else {
                data.extend_from_slice(&(child as u32).to_le_bytes());
            }
        }
        data
    }

    fn profile() -> FormatProfile {
        FormatProfile::new(FormatVariant::Pst64)
    }

    #[test]
    fn test_single_external_block() {
        let resolver = MapResolver {
            blocks: [(0x200_u64, Arc::new(b"stream bytes".to_vec()))].into(),
        };
        let tree = BlockTree::assemble(&resolver, &profile(), BlockId::from_raw(0x200)).unwrap();
        assert_eq!(tree.size(), 12);
        assert_eq!(tree.to_vec(), b"stream bytes");
        assert_eq!(tree.as_single_slice().unwrap(), b"stream bytes");
    }

    #[test]
    fn test_two_level_tree() {
        let profile = profile();
        let resolver = MapResolver {
            blocks: [
                (
                    0x201_u64,
                    Arc::new(tree_block(&profile, 1, 11, &[0x210, 0x220])),
                ),
                (0x210_u64, Arc::new(b"hello ".to_vec())),
                (0x220_u64, Arc::new(b"world".to_vec())),
            ]
            .into(),
        };
        let tree = BlockTree::assemble(&resolver, &profile, BlockId::from_raw(0x201)).unwrap();
        assert_eq!(tree.size(), 11);
        assert_eq!(tree.to_vec(), b"hello world");
        assert!(tree.as_single_slice().is_none());
    }

    #[test]
    fn test_total_size_mismatch() {
        let profile = profile();
        let resolver = MapResolver {
            blocks: [
                (0x201_u64, Arc::new(tree_block(&profile, 1, 99, &[0x210]))),
                (0x210_u64, Arc::new(b"short".to_vec())),
            ]
            .into(),
        };
        assert!(matches!(
            BlockTree::assemble(&resolver, &profile, BlockId::from_raw(0x201)),
            Err(crate::PffError::Ndb(NdbError::DataStreamTruncated {
                declared: 99,
                assembled: 5,
            }))
        ));
    }

    #[test]
    fn test_read_at_spans_segments() {
        let profile = profile();
        let resolver = MapResolver {
            blocks: [
                (
                    0x201_u64,
                    Arc::new(tree_block(&profile, 1, 11, &[0x210, 0x220])),
                ),
                (0x210_u64, Arc::new(b"hello ".to_vec())),
                (0x220_u64, Arc::new(b"world".to_vec())),
            ]
            .into(),
        };
        let tree = BlockTree::assemble(&resolver, &profile, BlockId::from_raw(0x201)).unwrap();

        let mut buffer = [0_u8; 5];
        assert_eq!(tree.read_at(4, &mut buffer), 5);
        assert_eq!(&buffer, b"o wor");

        // Reading past the end is short, reading at the end is empty.
        assert_eq!(tree.read_at(9, &mut buffer), 2);
        assert_eq!(tree.read_at(11, &mut buffer), 0);
    }

    #[test]
    fn test_rejects_wrong_kind() {
        let profile = profile();
        let resolver = MapResolver {
            blocks: [(0x201_u64, Arc::new(vec![0x02, 0, 0, 0, 0, 0, 0, 0]))].into(),
        };
        assert!(matches!(
            BlockTree::assemble(&resolver, &profile, BlockId::from_raw(0x201)),
            Err(crate::PffError::Ndb(NdbError::InvalidDataTreeKind(0x02)))
        ));
    }

    #[test]
    fn test_depth_cap() {
        let profile = profile();
        // A tree block that names itself as its only child.
        let resolver = MapResolver {
            blocks: [(
                0x201_u64,
                Arc::new(tree_block(&profile, 2, 0, &[0x201])),
            )]
            .into(),
        };
        assert!(matches!(
            BlockTree::assemble(&resolver, &profile, BlockId::from_raw(0x201)),
            Err(crate::PffError::Ndb(NdbError::DataTreeDepthExceeded(_)))
        ));
    }
}
