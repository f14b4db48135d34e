//! Local descriptor trees.
//!
//! A descriptor may carry auxiliary sub-streams (attachment bytes, embedded
//! messages, table row matrices) addressed by 32-bit sub-descriptor
//! identifiers. The mapping lives in its own small B-tree of internal
//! blocks: leaves yield the sub-stream's data identifier and a nested local
//! descriptor identifier, branches point at child blocks.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{collections::BTreeMap, io::Cursor};

use super::{block_id::BlockId, *};
use crate::Result;

/// Block-kind byte of a local descriptor block.
pub const SUB_NODE_KIND: u8 = 0x02;

/// Deepest legal local descriptor tree.
const MAX_SUB_NODE_DEPTH: u8 = 4;

#[derive(Copy, Clone, Debug)]
pub struct SubNodeEntry {
    pub data: BlockId,
    pub sub_nodes: BlockId,
}

/// The decoded mapping of one descriptor's local descriptor tree, in key
/// order.
#[derive(Default)]
pub struct SubNodeTree {
    entries: BTreeMap<u32, SubNodeEntry>,
}

impl SubNodeTree {
    /// Load the tree rooted at `block`; a zero identifier yields an empty
    /// tree.
    pub(crate) fn load(
        resolver: &dyn BlockResolver,
        profile: &FormatProfile,
        block: BlockId,
    ) -> Result<Self> {
        let mut tree = Self::default();
        if !block.is_none() {
            tree.load_block(resolver, profile, block, MAX_SUB_NODE_DEPTH)?;
        }
        Ok(tree)
    }

    fn load_block(
        &mut self,
        resolver: &dyn BlockResolver,
        profile: &FormatProfile,
        block: BlockId,
        depth_left: u8,
    ) -> Result<()> {
        if depth_left == 0 {
            return Err(NdbError::IndexDepthExceeded(MAX_SUB_NODE_DEPTH).into());
        }

        let data = resolver.read(block)?;
        let mut cursor = Cursor::new(data.as_slice());

        let kind = cursor.read_u8()?;
        if kind != SUB_NODE_KIND {
            return Err(NdbError::InvalidSubNodeKind(kind).into());
        }

        let level = cursor.read_u8()?;
        if level > 1 {
            return Err(NdbError::InvalidSubNodeLevel(level).into());
        }

        let entry_count = cursor.read_u16::<LittleEndian>()?;
        if profile.is_64bit() {
            let _ = cursor.read_u32::<LittleEndian>()?;
        }

        for _ in 0..entry_count {
            // Sub-descriptor identifiers are stored at identifier width but
            // only the low 32 bits are meaningful.
            let key = profile.read_identifier(&mut cursor)? as u32;
            if level == 0 {
                let data_id = BlockId::read(&mut cursor, profile)?;
                let sub_nodes = BlockId::read(&mut cursor, profile)?;
                let entry = SubNodeEntry {
                    data: data_id,
                    sub_nodes,
                };
                if self.entries.insert(key, entry).is_some() {
                    return Err(NdbError::DuplicateSubNodeKey(key).into());
                }
            } else {
                let child = BlockId::read(&mut cursor, profile)?;
                self.load_block(resolver, profile, child, depth_left - 1)?;
            }
        }

        Ok(())
    }

    pub fn get(&self, key: u32) -> Option<SubNodeEntry> {
        self.entries.get(&key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, SubNodeEntry)> + '_ {
        self.entries.iter().map(|(&key, &entry)| (key, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndb::data_tree::tests::MapResolver;
    use std::sync::Arc;

    fn profile() -> FormatProfile {
        FormatProfile::new(FormatVariant::Pst64)
    }

    pub(crate) fn leaf_block(profile: &FormatProfile, entries: &[(u32, u64, u64)]) -> Vec<u8> {
        let mut data = vec![SUB_NODE_KIND, 0];
        data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        if profile.is_64bit() {
            data.extend_from_slice(&0_u32.to_le_bytes());
        }
        for &(key, data_id, sub_id) in entries {
            if profile.is_64bit() {
                data.extend_from_slice(&u64::from(key).to_le_bytes());
                data.extend_from_slice(&data_id.to_le_bytes());
                data.extend_from_slice(&sub_id.to_le_bytes());
            } else {
                data.extend_from_slice(&key.to_le_bytes());
                data.extend_from_slice(&(data_id as u32).to_le_bytes());
                data.extend_from_slice(&(sub_id as u32).to_le_bytes());
            }
        }
        data
    }

    #[test]
    fn test_empty_tree() {
        let resolver = MapResolver {
            blocks: Default::default(),
        };
        let tree = SubNodeTree::load(&resolver, &profile(), BlockId::from_raw(0)).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_leaf_entries() {
        let profile = profile();
        let resolver = MapResolver {
            blocks: [(
                0x41_u64,
                Arc::new(leaf_block(
                    &profile,
                    &[(0x671, 0x200, 0), (0x8025, 0x204, 0x45)],
                )),
            )]
            .into(),
        };
        let tree = SubNodeTree::load(&resolver, &profile, BlockId::from_raw(0x41)).unwrap();
        assert_eq!(tree.len(), 2);
        let entry = tree.get(0x8025).unwrap();
        assert_eq!(entry.data.raw(), 0x204);
        assert_eq!(entry.sub_nodes.raw(), 0x45);
        assert!(tree.get(0x1234).is_none());
    }

    #[test]
    fn test_branch_then_leaves() {
        let profile = profile();
        let mut branch = vec![SUB_NODE_KIND, 1];
        branch.extend_from_slice(&2_u16.to_le_bytes());
        branch.extend_from_slice(&0_u32.to_le_bytes());
        for (key, child) in [(0x10_u64, 0x41_u64), (0x30, 0x43)] {
            branch.extend_from_slice(&key.to_le_bytes());
            branch.extend_from_slice(&child.to_le_bytes());
        }

        let resolver = MapResolver {
            blocks: [
                (0x45_u64, Arc::new(branch)),
                (
                    0x41_u64,
                    Arc::new(leaf_block(&profile, &[(0x10, 0x200, 0), (0x20, 0x202, 0)])),
                ),
                (
                    0x43_u64,
                    Arc::new(leaf_block(&profile, &[(0x30, 0x206, 0)])),
                ),
            ]
            .into(),
        };
        let tree = SubNodeTree::load(&resolver, &profile, BlockId::from_raw(0x45)).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(
            tree.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            vec![0x10, 0x20, 0x30]
        );
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let profile = profile();
        let resolver = MapResolver {
            blocks: [(
                0x41_u64,
                Arc::new(leaf_block(&profile, &[(0x10, 0x200, 0), (0x10, 0x202, 0)])),
            )]
            .into(),
        };
        assert!(matches!(
            SubNodeTree::load(&resolver, &profile, BlockId::from_raw(0x41)),
            Err(crate::PffError::Ndb(NdbError::DuplicateSubNodeKey(0x10)))
        ));
    }
}
