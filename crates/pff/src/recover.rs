//! Recovery of deleted and orphaned items.
//!
//! Deleting an item unlinks its descriptor from the node index but leaves
//! the index pages and data blocks behind until the space is reused. The
//! scanner walks candidate 512-byte boundaries looking for index pages whose
//! internal invariants still hold, harvests their leaf entries, and keeps
//! every descriptor that is not in the allocated tree and whose table still
//! decodes. Nothing here ever writes; recovered descriptors live in a list
//! parallel to the allocated tree.

use std::collections::HashSet;
use std::ops::Range;

use tracing::trace;

use crate::{
    diag::Diagnostic,
    item::DescriptorNode,
    ltp::heap::HeapNode,
    ndb::{
        page::{BlockEntry, IndexPage, NodeEntry, PageEntries, PageKind},
        PAGE_SIZE,
    },
    PffFile, Result,
};

/// File offset of the first allocation map page.
const FIRST_ALLOCATION_MAP_OFFSET: u64 = 0x4400;

/// Bitmap bytes per allocation map page.
const ALLOCATION_MAP_BYTES: usize = 496;

/// Bytes of file space one allocation bit covers.
const ALLOCATION_GRANULARITY: u64 = 64;

/// File span one allocation map page covers.
const ALLOCATION_MAP_SPAN: u64 = ALLOCATION_MAP_BYTES as u64 * 8 * ALLOCATION_GRANULARITY;

/// Upper bound on recovered descriptors per scan.
const MAX_RECOVERED_ITEMS: usize = 16_384;

#[derive(Copy, Clone, Default, Debug)]
pub struct RecoveryFlags {
    /// Restrict the scan to the ranges the allocation maps mark free.
    pub unallocated_only: bool,
}

/// Enumerate the free ranges recorded by the allocation maps.
pub(crate) fn unallocated_ranges(file: &PffFile) -> Result<Vec<Range<u64>>> {
    let size = file.size();
    let profile = *file.profile();
    let mut ranges: Vec<Range<u64>> = Vec::new();

    let mut map_offset = FIRST_ALLOCATION_MAP_OFFSET;
    while map_offset < size {
        file.check_abort()?;

        let mut page = [0_u8; PAGE_SIZE];
        if file.byte_source().read_at(map_offset, &mut page).is_err() {
            break;
        }

        // The bitmap fills the page up to the trailer; the 32-bit layout
        // carries four bytes of padding first.
        let bitmap_start = if profile.is_64bit() { 0 } else { 4 };
        let bitmap = &page[bitmap_start..bitmap_start + ALLOCATION_MAP_BYTES];

        for (byte_index, &byte) in bitmap.iter().enumerate() {
            for bit in 0..8 {
                let allocated = byte & (0x80 >> bit) != 0;
                if allocated {
                    continue;
                }
                let start = map_offset
                    + (byte_index as u64 * 8 + bit as u64) * ALLOCATION_GRANULARITY;
                if start >= size {
                    break;
                }
                let end = (start + ALLOCATION_GRANULARITY).min(size);
                match ranges.last_mut() {
                    Some(last) if last.end == start => last.end = end,
                    _ => ranges.push(start..end),
                }
            }
        }

        map_offset += ALLOCATION_MAP_SPAN;
    }

    Ok(ranges)
}

/// Run a full recovery scan.
pub(crate) fn scan(file: &PffFile, flags: RecoveryFlags) -> Result<Vec<DescriptorNode>> {
    let ranges = if flags.unallocated_only {
        unallocated_ranges(file)?
    } else {
        vec![FIRST_ALLOCATION_MAP_OFFSET..file.size()]
    };

    // First pass: candidate block index pages, so descriptors whose blocks
    // were also unlinked can still resolve. Allocated entries always win;
    // collisions are reported, not merged.
    let mut block_entries = Vec::new();
    scan_pages(file, &ranges, PageKind::BlockIndex, &mut |page| {
        if let PageEntries::Block(entries) = &page.entries {
            block_entries.extend_from_slice(entries);
        }
        Ok(())
    })?;
    for entry in block_entries {
        note_block_candidate(file, entry)?;
    }

    // Second pass: candidate node index pages yield descriptor candidates.
    let mut candidates: Vec<NodeEntry> = Vec::new();
    scan_pages(file, &ranges, PageKind::NodeIndex, &mut |page| {
        if let PageEntries::Node(entries) = &page.entries {
            candidates.extend_from_slice(entries);
        }
        Ok(())
    })?;

    let mut seen = HashSet::new();
    let mut recovered = Vec::new();
    for entry in candidates {
        file.check_abort()?;
        if recovered.len() >= MAX_RECOVERED_ITEMS {
            file.sink().report(&Diagnostic::new(
                "recover",
                "RecoveredItemCapReached",
                format!("stopped at {MAX_RECOVERED_ITEMS} items"),
            ));
            break;
        }

        let key = (entry.node.raw(), entry.data.raw(), entry.sub_nodes.raw());
        if !seen.insert(key) {
            continue;
        }

        // Descriptors still in the allocated tree are not deleted; the
        // allocated path serves them.
        if file.item_by_identifier(entry.node.raw()).is_some() {
            continue;
        }

        if !probe_candidate(file, &entry) {
            continue;
        }

        recovered.push(DescriptorNode::from_entry(&entry, true));
    }

    trace!(
        name: "PffRecoveryFinished",
        recovered = recovered.len(),
        "recovery scan complete"
    );
    Ok(recovered)
}

/// Walk `ranges` on page boundaries, handing every structurally valid page
/// of `kind` to `visit`. Invalid candidates are simply skipped; this is a
/// scan, not a parse.
fn scan_pages(
    file: &PffFile,
    ranges: &[Range<u64>],
    kind: PageKind,
    visit: &mut dyn FnMut(&IndexPage) -> Result<()>,
) -> Result<()> {
    let profile = file.profile();
    for range in ranges {
        let mut offset = range.start.next_multiple_of(PAGE_SIZE as u64);
        while offset + PAGE_SIZE as u64 <= range.end {
            file.check_abort()?;
            if let Ok(page) =
                IndexPage::read(file.byte_source(), profile, kind, offset, None)
            {
                visit(&page)?;
            }
            offset += PAGE_SIZE as u64;
        }
    }
    Ok(())
}

/// Record a block entry found by the scan, unless the allocated index
/// already claims the identifier. The allocated entry always wins; a
/// candidate that disagrees with it is worth a warning, a candidate that
/// merely repeats it is not.
fn note_block_candidate(file: &PffFile, entry: BlockEntry) -> Result<()> {
    file.check_abort()?;
    let allocated = file
        .block_btree()
        .find(file.byte_source(), file.profile(), entry.block.raw())
        .ok()
        .flatten();
    if let Some(crate::ndb::page::LeafEntry::Block(allocated)) = allocated {
        if allocated.offset != entry.offset || allocated.size != entry.size {
            file.sink().report(&Diagnostic::new(
                "recover",
                "RecoveredEntryOverlap",
                format!(
                    "block 0x{:016X} is still allocated; keeping the allocated entry",
                    entry.block.raw()
                ),
            ));
        }
        return Ok(());
    }
    file.note_recovered_block(entry);
    Ok(())
}

/// A candidate survives when its data stream still assembles and, for
/// property-bearing descriptors, its heap still opens.
fn probe_candidate(file: &PffFile, entry: &NodeEntry) -> bool {
    if entry.data.is_none() {
        return false;
    }
    let Ok(stream) = file.stream(entry.data) else {
        return false;
    };
    HeapNode::read(stream).is_ok()
}
