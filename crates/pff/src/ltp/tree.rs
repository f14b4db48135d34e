//! B-tree-on-heap.
//!
//! Tables keep their sorted record sets in a small B-tree whose nodes are
//! heap allocations. The header declares the key and record sizes and the
//! number of intermediate levels; level records pair a key with the heap
//! identifier of the child node, leaf records pair a key with the record
//! payload.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::{heap::*, *};
use crate::Result;

/// `bType` of a tree header allocation.
pub const TREE_SIGNATURE: u8 = 0xB5;

const MAX_TREE_DEPTH: u8 = 8;

#[derive(Clone, Copy, Debug)]
pub struct HeapTree {
    key_size: u8,
    record_size: u8,
    levels: u8,
    root: HeapId,
}

impl HeapTree {
    /// Decode the tree header stored in the allocation `header_id`.
    pub fn read(heap: &HeapNode, header_id: HeapId) -> Result<Self> {
        let header = heap.slice(header_id)?;
        let mut cursor = Cursor::new(header);

        let signature = cursor.read_u8()?;
        if signature != TREE_SIGNATURE {
            return Err(LtpError::InvalidTreeSignature(signature).into());
        }

        let key_size = cursor.read_u8()?;
        if !matches!(key_size, 2 | 4 | 8 | 16) {
            return Err(LtpError::InvalidTreeKeySize(key_size).into());
        }

        let record_size = cursor.read_u8()?;
        if record_size == 0 || usize::from(record_size) > 32 {
            return Err(LtpError::InvalidTreeRecordSize(record_size).into());
        }

        let levels = cursor.read_u8()?;
        if levels >= MAX_TREE_DEPTH {
            return Err(LtpError::TreeDepthExceeded(MAX_TREE_DEPTH).into());
        }

        let root = HeapId::from(cursor.read_u32::<LittleEndian>()?);

        Ok(Self {
            key_size,
            record_size,
            levels,
            root,
        })
    }

    pub fn key_size(&self) -> usize {
        usize::from(self.key_size)
    }

    pub fn record_size(&self) -> usize {
        usize::from(self.record_size)
    }

    /// Visit every leaf record in key order as `(key, record)` slices.
    pub fn for_each<'h>(
        &self,
        heap: &'h HeapNode,
        visit: &mut dyn FnMut(&'h [u8], &'h [u8]) -> Result<()>,
    ) -> Result<()> {
        if self.root.is_none() {
            return Ok(());
        }
        self.walk(heap, self.root, self.levels, visit)
    }

    fn walk<'h>(
        &self,
        heap: &'h HeapNode,
        node: HeapId,
        level: u8,
        visit: &mut dyn FnMut(&'h [u8], &'h [u8]) -> Result<()>,
    ) -> Result<()> {
        let data = heap.slice(node)?;

        if level == 0 {
            let record_size = self.key_size() + self.record_size();
            for record in data.chunks_exact(record_size) {
                let (key, payload) = record.split_at(self.key_size());
                visit(key, payload)?;
            }
            return Ok(());
        }

        let record_size = self.key_size() + 4;
        for record in data.chunks_exact(record_size) {
            let child = HeapId::from(u32::from_le_bytes(
                record[self.key_size()..].try_into().expect("4-byte child id"),
            ));
            self.walk(heap, child, level - 1, visit)?;
        }
        Ok(())
    }

    /// Find the leaf record whose key equals `key`.
    pub fn get<'h>(&self, heap: &'h HeapNode, key: &[u8]) -> Result<Option<&'h [u8]>> {
        if key.len() != self.key_size() {
            return Err(LtpError::InvalidTreeKeySize(key.len() as u8).into());
        }
        if self.root.is_none() {
            return Ok(None);
        }

        let mut node = self.root;
        for level in (0..=self.levels).rev() {
            let data = heap.slice(node)?;
            if level == 0 {
                let record_size = self.key_size() + self.record_size();
                let found = data
                    .chunks_exact(record_size)
                    .find(|record| &record[..self.key_size()] == key)
                    .map(|record| &record[self.key_size()..]);
                return Ok(found);
            }

            let record_size = self.key_size() + 4;
            // Keys are stored little-endian, so compare reversed bytes.
            let mut child = None;
            for record in data.chunks_exact(record_size) {
                let record_key = &record[..self.key_size()];
                if compare_le(record_key, key) == std::cmp::Ordering::Greater {
                    break;
                }
                child = Some(HeapId::from(u32::from_le_bytes(
                    record[self.key_size()..].try_into().expect("4-byte child id"),
                )));
            }
            match child {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
        Ok(None)
    }
}

/// Compare two little-endian unsigned keys of equal width.
fn compare_le(left: &[u8], right: &[u8]) -> std::cmp::Ordering {
    left.iter().rev().cmp(right.iter().rev())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltp::heap::tests::{build_heap_page, heap_from_bytes, heap_id};

    fn tree_header(key_size: u8, record_size: u8, levels: u8, root: HeapId) -> Vec<u8> {
        let mut data = vec![TREE_SIGNATURE, key_size, record_size, levels];
        data.extend_from_slice(&root.raw().to_le_bytes());
        data
    }

    #[test]
    fn test_empty_tree() {
        let header = tree_header(2, 6, 0, HeapId::from_raw(0));
        let heap = heap_from_bytes(build_heap_page(0xBC, heap_id(0, 0), &[&header]));
        let tree = HeapTree::read(&heap, heap_id(0, 0)).unwrap();

        let mut count = 0;
        tree.for_each(&heap, &mut |_, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 0);
        assert!(tree.get(&heap, &[0x01, 0x00]).unwrap().is_none());
    }

    #[test]
    fn test_single_leaf() {
        // Two records of key size 2, record size 6.
        let mut leaf = Vec::new();
        leaf.extend_from_slice(&0x3001_u16.to_le_bytes());
        leaf.extend_from_slice(b"AAAAAA");
        leaf.extend_from_slice(&0x3602_u16.to_le_bytes());
        leaf.extend_from_slice(b"BBBBBB");

        let header = tree_header(2, 6, 0, heap_id(0, 1));
        let heap = heap_from_bytes(build_heap_page(0xBC, heap_id(0, 0), &[&header, &leaf]));
        let tree = HeapTree::read(&heap, heap_id(0, 0)).unwrap();

        let mut keys = Vec::new();
        tree.for_each(&heap, &mut |key, record| {
            keys.push(u16::from_le_bytes(key.try_into().unwrap()));
            assert_eq!(record.len(), 6);
            Ok(())
        })
        .unwrap();
        assert_eq!(keys, vec![0x3001, 0x3602]);

        assert_eq!(
            tree.get(&heap, &0x3602_u16.to_le_bytes()).unwrap().unwrap(),
            b"BBBBBB"
        );
        assert!(tree.get(&heap, &0x3603_u16.to_le_bytes()).unwrap().is_none());
    }

    #[test]
    fn test_two_level_tree() {
        let mut left = Vec::new();
        left.extend_from_slice(&0x0010_u16.to_le_bytes());
        left.extend_from_slice(b"LLLLLL");
        let mut right = Vec::new();
        right.extend_from_slice(&0x0020_u16.to_le_bytes());
        right.extend_from_slice(b"RRRRRR");

        // Intermediate records: (first key of child, child heap id).
        let mut branch = Vec::new();
        branch.extend_from_slice(&0x0010_u16.to_le_bytes());
        branch.extend_from_slice(&heap_id(0, 2).raw().to_le_bytes());
        branch.extend_from_slice(&0x0020_u16.to_le_bytes());
        branch.extend_from_slice(&heap_id(0, 3).raw().to_le_bytes());

        let header = tree_header(2, 6, 1, heap_id(0, 1));
        let heap = heap_from_bytes(build_heap_page(
            0xBC,
            heap_id(0, 0),
            &[&header, &branch, &left, &right],
        ));
        let tree = HeapTree::read(&heap, heap_id(0, 0)).unwrap();

        assert_eq!(
            tree.get(&heap, &0x0020_u16.to_le_bytes()).unwrap().unwrap(),
            b"RRRRRR"
        );
        assert_eq!(
            tree.get(&heap, &0x0010_u16.to_le_bytes()).unwrap().unwrap(),
            b"LLLLLL"
        );
        // A key below the first separator is absent.
        assert!(tree.get(&heap, &0x0001_u16.to_le_bytes()).unwrap().is_none());
    }

    #[test]
    fn test_bad_signature() {
        let header = vec![0xB4, 2, 6, 0, 0, 0, 0, 0];
        let heap = heap_from_bytes(build_heap_page(0xBC, heap_id(0, 0), &[&header]));
        assert!(matches!(
            HeapTree::read(&heap, heap_id(0, 0)),
            Err(crate::PffError::Ltp(LtpError::InvalidTreeSignature(0xB4)))
        ));
    }
}
