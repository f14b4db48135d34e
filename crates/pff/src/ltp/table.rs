//! Table decoding.
//!
//! Every table is a heap-on-node whose client signature selects the layout.
//! Five layouts occur in the family:
//!
//! - `0xBC` property context: a single heterogeneous set of properties, the
//!   layout behind individual folders, messages, and attachments.
//! - `0x7C` table context: a dense row matrix with shared column
//!   descriptors, the layout behind contents, hierarchy, recipient, and
//!   attachment tables.
//! - `0x6C` two-column table: sorted (key, value) records, used by the named
//!   property map internals.
//! - `0x9C` identifier array: records keyed by a 32-bit identifier whose
//!   payload points at the entry's data.
//! - `0xAC` external list: a row matrix whose variable values live behind
//!   sub-descriptors.
//!
//! All five decode into one uniform [`Table`]: sets (rows) by entries
//! (columns), each cell either inline bytes, a heap reference, or a
//! sub-descriptor reference.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::{heap::*, prop_type::*, tree::*, *};
use crate::{
    ndb::{data_tree::BlockTree, sub_node::SubNodeTree, BlockResolver, FormatProfile},
    Result,
};

/// Property identifier of the row-identifier column in row matrices.
pub const ROW_ID_PROP: u16 = 0x67F2;

/// Synthetic column identifiers for the keyed layouts (`0x6C`, `0x9C`),
/// which have no property tags of their own.
pub const KEY_COLUMN_PROP: u16 = 0x0000;
pub const VALUE_COLUMN_PROP: u16 = 0x0001;

#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TableKind {
    TwoColumn = 0x6C,
    Matrix = 0x7C,
    IdArray = 0x9C,
    ExternalList = 0xAC,
    Properties = 0xBC,
}

impl TryFrom<u8> for TableKind {
    type Error = LtpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x6C => Ok(Self::TwoColumn),
            0x7C => Ok(Self::Matrix),
            0x9C => Ok(Self::IdArray),
            0xAC => Ok(Self::ExternalList),
            0xBC => Ok(Self::Properties),
            invalid => Err(LtpError::UnknownTableSignature(invalid)),
        }
    }
}

/// Where a cell's value bytes live.
#[derive(Clone, Debug)]
pub enum CellStorage {
    /// The bytes are part of the decoded row or record.
    Inline(Vec<u8>),
    /// The bytes are another allocation of the same heap.
    Heap(HeapId),
    /// The bytes are the data stream of a sub-descriptor of the owning item.
    SubNode(u32),
}

#[derive(Clone, Debug)]
pub struct TableCell {
    pub prop_type: PropertyType,
    pub storage: CellStorage,
}

#[derive(Copy, Clone, Debug)]
pub struct TableColumn {
    pub prop_id: u16,
    pub prop_type: PropertyType,
}

/// Resolved cell bytes, or the sub-descriptor the caller must stream.
pub enum CellSource<'t> {
    Bytes(&'t [u8]),
    SubNode(u32),
}

pub struct Table {
    kind: TableKind,
    heap: HeapNode,
    columns: Vec<TableColumn>,
    rows: Vec<Vec<Option<TableCell>>>,
}

impl Table {
    /// Decode the table stored in `heap`. Row matrices stored behind a
    /// sub-descriptor are pulled through `resolver` and `sub_nodes`.
    pub(crate) fn decode(
        resolver: &dyn BlockResolver,
        profile: &FormatProfile,
        heap: HeapNode,
        sub_nodes: &SubNodeTree,
    ) -> Result<Self> {
        let kind = TableKind::try_from(heap.client_signature()).map_err(crate::PffError::from)?;
        match kind {
            TableKind::Properties => Self::decode_properties(heap),
            TableKind::Matrix | TableKind::ExternalList => {
                Self::decode_matrix(resolver, profile, heap, sub_nodes, kind)
            }
            TableKind::TwoColumn => Self::decode_keyed(heap, TableKind::TwoColumn),
            TableKind::IdArray => Self::decode_keyed(heap, TableKind::IdArray),
        }
    }

    /// `0xBC`: one set, one column per stored property.
    fn decode_properties(heap: HeapNode) -> Result<Self> {
        let tree = HeapTree::read(&heap, heap.user_root())?;
        if tree.key_size() != 2 || tree.record_size() != 6 {
            return Err(LtpError::InvalidTreeRecordSize(tree.record_size() as u8).into());
        }

        let mut columns = Vec::new();
        let mut row = Vec::new();
        tree.for_each(&heap, &mut |key, record| {
            let prop_id = u16::from_le_bytes(key.try_into().expect("2-byte key"));
            let mut cursor = Cursor::new(record);
            let Ok(prop_type) = PropertyType::try_from(cursor.read_u16::<LittleEndian>()?) else {
                tracing::trace!(
                    name: "PffUnknownPropertyType",
                    prop_id,
                    "skipping property with unknown value type"
                );
                return Ok(());
            };
            let value = cursor.read_u32::<LittleEndian>()?;

            columns.push(TableColumn { prop_id, prop_type });
            row.push(Some(TableCell {
                prop_type,
                storage: Self::record_storage(prop_type, value),
            }));
            Ok(())
        })?;

        Ok(Self {
            kind: TableKind::Properties,
            heap,
            columns,
            rows: vec![row],
        })
    }

    /// Storage of a property-context record value: small values live in the
    /// record's own 4 bytes, larger fixed values in a heap allocation, and
    /// variable values behind a heap or sub-descriptor reference.
    fn record_storage(prop_type: PropertyType, value: u32) -> CellStorage {
        if prop_type.fits_inline() {
            let size = prop_type.fixed_size().unwrap_or(4);
            return CellStorage::Inline(value.to_le_bytes()[..size].to_vec());
        }
        if prop_type.fixed_size().is_some() {
            return CellStorage::Heap(HeapId::from(value));
        }
        Self::reference_storage(value)
    }

    /// Storage selected by a 4-byte heap-or-node reference.
    fn reference_storage(value: u32) -> CellStorage {
        let id = HeapId::from(value);
        if id.is_none() {
            CellStorage::Inline(Vec::new())
        } else if id.is_heap_kind() {
            CellStorage::Heap(id)
        } else {
            CellStorage::SubNode(value)
        }
    }

    /// `0x7C` / `0xAC`: column descriptors plus a row matrix.
    fn decode_matrix(
        resolver: &dyn BlockResolver,
        profile: &FormatProfile,
        heap: HeapNode,
        sub_nodes: &SubNodeTree,
        kind: TableKind,
    ) -> Result<Self> {
        let info = heap.slice(heap.user_root())?;
        let mut cursor = Cursor::new(info);

        let signature = cursor.read_u8()?;
        if signature != kind as u8 {
            return Err(LtpError::UnknownTableSignature(signature).into());
        }

        let column_count = usize::from(cursor.read_u8()?);
        let _end_4byte = cursor.read_u16::<LittleEndian>()?;
        let _end_2byte = cursor.read_u16::<LittleEndian>()?;
        let end_1byte = cursor.read_u16::<LittleEndian>()?;
        let end_bitmap = cursor.read_u16::<LittleEndian>()?;
        let _row_index = HeapId::from(cursor.read_u32::<LittleEndian>()?);
        let rows_reference = cursor.read_u32::<LittleEndian>()?;
        let _deprecated = cursor.read_u32::<LittleEndian>()?;

        if end_bitmap < end_1byte
            || usize::from(end_bitmap - end_1byte) != column_count.div_ceil(8)
        {
            return Err(LtpError::InvalidTableColumnOffset(end_bitmap).into());
        }
        let row_size = usize::from(end_bitmap);
        if row_size == 0 {
            return Err(LtpError::InvalidTableRowSize(end_bitmap).into());
        }

        let mut descriptors = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let tag = cursor.read_u32::<LittleEndian>()?;
            let offset = cursor.read_u16::<LittleEndian>()?;
            let size = cursor.read_u8()?;
            let bit = cursor.read_u8()?;

            // A column the projector cannot type is dropped, not fatal; the
            // remaining columns still decode.
            let Ok(prop_type) = PropertyType::try_from(tag as u16) else {
                tracing::trace!(
                    name: "PffUnknownTableColumnType",
                    tag,
                    "skipping table column with unknown value type"
                );
                continue;
            };
            let prop_id = (tag >> 16) as u16;

            if usize::from(offset) + usize::from(size) > row_size {
                return Err(LtpError::InvalidTableColumnOffset(offset).into());
            }
            descriptors.push((prop_id, prop_type, usize::from(offset), usize::from(size), bit));
        }

        let columns = descriptors
            .iter()
            .map(|&(prop_id, prop_type, ..)| TableColumn { prop_id, prop_type })
            .collect();

        let mut rows = Vec::new();
        let mut decode_rows = |data: &[u8]| -> Result<()> {
            for row in data.chunks_exact(row_size) {
                let bitmap = &row[usize::from(end_1byte)..usize::from(end_bitmap)];
                let mut cells = Vec::with_capacity(descriptors.len());
                for &(_, prop_type, offset, size, bit) in &descriptors {
                    let present =
                        bitmap[usize::from(bit) / 8] & (0x80 >> (usize::from(bit) % 8)) != 0;
                    if !present {
                        cells.push(None);
                        continue;
                    }

                    let bytes = &row[offset..offset + size];
                    let storage = match prop_type.fixed_size() {
                        Some(fixed) if fixed == size || prop_type == PropertyType::Null => {
                            CellStorage::Inline(bytes[..fixed.min(size)].to_vec())
                        }
                        _ => {
                            let value = u32::from_le_bytes(
                                bytes.try_into().map_err(|_| {
                                    LtpError::InvalidTableColumnOffset(offset as u16)
                                })?,
                            );
                            match kind {
                                TableKind::ExternalList if value != 0 => {
                                    CellStorage::SubNode(value)
                                }
                                _ => Self::reference_storage(value),
                            }
                        }
                    };
                    cells.push(Some(TableCell { prop_type, storage }));
                }
                rows.push(cells);
            }
            Ok(())
        };

        if rows_reference != 0 {
            let reference = HeapId::from(rows_reference);
            if reference.is_heap_kind() {
                decode_rows(heap.slice(reference)?)?;
            } else {
                // The row matrix lives in a sub-descriptor; every backing
                // block is an independent run of rows.
                let entry = sub_nodes
                    .get(rows_reference)
                    .ok_or(crate::ndb::NdbError::NodeNotFound(rows_reference))?;
                let stream = BlockTree::assemble(resolver, profile, entry.data)?;
                for segment in 0..stream.segment_count() {
                    decode_rows(stream.segment(segment).expect("segment in range"))?;
                }
            }
        }

        Ok(Self {
            kind,
            heap,
            columns,
            rows,
        })
    }

    /// `0x6C` / `0x9C`: sorted records projected as key and value columns.
    fn decode_keyed(heap: HeapNode, kind: TableKind) -> Result<Self> {
        let tree = HeapTree::read(&heap, heap.user_root())?;

        let key_type = match tree.key_size() {
            2 => PropertyType::Integer16,
            4 => PropertyType::Integer32,
            8 => PropertyType::Integer64,
            _ => PropertyType::Binary,
        };
        let value_type = match tree.record_size() {
            2 => PropertyType::Integer16,
            4 => PropertyType::Integer32,
            _ => PropertyType::Binary,
        };

        let columns = vec![
            TableColumn {
                prop_id: KEY_COLUMN_PROP,
                prop_type: key_type,
            },
            TableColumn {
                prop_id: VALUE_COLUMN_PROP,
                prop_type: value_type,
            },
        ];

        let mut rows = Vec::new();
        tree.for_each(&heap, &mut |key, record| {
            let value_cell = if kind == TableKind::IdArray && record.len() == 4 {
                // The record is a reference to the entry's data.
                let value = u32::from_le_bytes(record.try_into().expect("4-byte record"));
                TableCell {
                    prop_type: PropertyType::Binary,
                    storage: Self::reference_storage(value),
                }
            } else {
                TableCell {
                    prop_type: value_type,
                    storage: CellStorage::Inline(record.to_vec()),
                }
            };
            rows.push(vec![
                Some(TableCell {
                    prop_type: key_type,
                    storage: CellStorage::Inline(key.to_vec()),
                }),
                Some(value_cell),
            ]);
            Ok(())
        })?;

        Ok(Self {
            kind,
            heap,
            columns,
            rows,
        })
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Number of sets (rows).
    pub fn set_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of entries (columns) shared across sets.
    pub fn entry_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Option<&TableColumn> {
        self.columns.get(index)
    }

    /// First column carrying `prop_id`, scanning left to right.
    pub fn column_index(&self, prop_id: u16) -> Option<usize> {
        self.columns.iter().position(|column| column.prop_id == prop_id)
    }

    pub fn cell(&self, set: usize, column: usize) -> Option<&TableCell> {
        self.rows.get(set)?.get(column)?.as_ref()
    }

    pub fn cell_by_id(&self, set: usize, prop_id: u16) -> Option<&TableCell> {
        self.cell(set, self.column_index(prop_id)?)
    }

    /// The row identifier of a matrix row: the descriptor of the sub-item
    /// the row describes.
    pub fn row_id(&self, set: usize) -> Option<u32> {
        let cell = self.cell_by_id(set, ROW_ID_PROP)?;
        match &cell.storage {
            CellStorage::Inline(bytes) if bytes.len() == 4 => {
                Some(u32::from_le_bytes(bytes.as_slice().try_into().ok()?))
            }
            _ => None,
        }
    }

    /// Resolve a cell to its bytes, or surface the sub-descriptor the
    /// caller must stream through the owning item's local descriptors.
    pub fn cell_source<'t>(&'t self, cell: &'t TableCell) -> Result<CellSource<'t>> {
        match &cell.storage {
            CellStorage::Inline(bytes) => Ok(CellSource::Bytes(bytes)),
            CellStorage::Heap(id) => Ok(CellSource::Bytes(self.heap.slice(*id)?)),
            CellStorage::SubNode(node) => Ok(CellSource::SubNode(*node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltp::heap::tests::{build_heap_page, heap_from_bytes, heap_id};
    use crate::ndb::{data_tree::tests::MapResolver, FormatVariant};

    fn decode(heap: HeapNode) -> Result<Table> {
        let resolver = MapResolver {
            blocks: Default::default(),
        };
        let profile = FormatProfile::new(FormatVariant::Pst64);
        Table::decode(&resolver, &profile, heap, &SubNodeTree::default())
    }

    /// A property context with an inline 32-bit value and a heap string.
    fn properties_fixture() -> HeapNode {
        // Allocation 0: tree header; 1: leaf records; 2: string bytes.
        let mut header = vec![TREE_SIGNATURE, 2, 6, 0];
        header.extend_from_slice(&heap_id(0, 1).raw().to_le_bytes());

        let mut leaf = Vec::new();
        // 0x3602 Integer32 = 7
        leaf.extend_from_slice(&0x3602_u16.to_le_bytes());
        leaf.extend_from_slice(&u16::from(PropertyType::Integer32).to_le_bytes());
        leaf.extend_from_slice(&7_u32.to_le_bytes());
        // 0x3001 Unicode in allocation 2
        leaf.extend_from_slice(&0x3001_u16.to_le_bytes());
        leaf.extend_from_slice(&u16::from(PropertyType::Unicode).to_le_bytes());
        leaf.extend_from_slice(&heap_id(0, 2).raw().to_le_bytes());

        let name: Vec<u8> = "Inbox"
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();

        heap_from_bytes(build_heap_page(0xBC, heap_id(0, 0), &[&header, &leaf, &name]))
    }

    #[test]
    fn test_property_context() {
        let table = decode(properties_fixture()).unwrap();
        assert_eq!(table.kind(), TableKind::Properties);
        assert_eq!(table.set_count(), 1);
        assert_eq!(table.entry_count(), 2);

        let cell = table.cell_by_id(0, 0x3602).unwrap();
        match table.cell_source(cell).unwrap() {
            CellSource::Bytes(bytes) => assert_eq!(bytes, 7_u32.to_le_bytes()),
            CellSource::SubNode(_) => panic!("inline value expected"),
        }

        let cell = table.cell_by_id(0, 0x3001).unwrap();
        assert_eq!(cell.prop_type, PropertyType::Unicode);
        match table.cell_source(cell).unwrap() {
            CellSource::Bytes(bytes) => assert_eq!(bytes.len(), 10),
            CellSource::SubNode(_) => panic!("heap value expected"),
        }
    }

    /// A 2-row matrix: row id, a 32-bit count, and a unicode name.
    fn matrix_fixture() -> HeapNode {
        let row_size = 14_u16; // 4 (row id) + 4 (count) + 4 (name hnid) + 1 + bitmap 1
        let mut info = Vec::new();
        info.push(0x7C);
        info.push(3); // columns
        info.extend_from_slice(&12_u16.to_le_bytes()); // end of 4-byte values
        info.extend_from_slice(&12_u16.to_le_bytes()); // end of 2-byte values
        info.extend_from_slice(&13_u16.to_le_bytes()); // end of 1-byte values
        info.extend_from_slice(&row_size.to_le_bytes()); // end of bitmap
        info.extend_from_slice(&0_u32.to_le_bytes()); // row index (unused)
        info.extend_from_slice(&heap_id(0, 2).raw().to_le_bytes()); // rows
        info.extend_from_slice(&0_u32.to_le_bytes()); // deprecated
        for (tag, offset, size, bit) in [
            (property_tag(ROW_ID_PROP, PropertyType::Integer32), 0_u16, 4_u8, 0_u8),
            (property_tag(0x3602, PropertyType::Integer32), 4, 4, 1),
            (property_tag(0x3001, PropertyType::Unicode), 8, 4, 2),
        ] {
            info.extend_from_slice(&tag.to_le_bytes());
            info.extend_from_slice(&offset.to_le_bytes());
            info.push(size);
            info.push(bit);
        }

        let name: Vec<u8> = "Drafts"
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();

        let mut matrix = Vec::new();
        // Row 0: id 0x2122, count 5, name present.
        matrix.extend_from_slice(&0x2122_u32.to_le_bytes());
        matrix.extend_from_slice(&5_u32.to_le_bytes());
        matrix.extend_from_slice(&heap_id(0, 3).raw().to_le_bytes());
        matrix.push(0);
        matrix.push(0b1110_0000);
        // Row 1: id 0x2142, count absent, name absent.
        matrix.extend_from_slice(&0x2142_u32.to_le_bytes());
        matrix.extend_from_slice(&0_u32.to_le_bytes());
        matrix.extend_from_slice(&0_u32.to_le_bytes());
        matrix.push(0);
        matrix.push(0b1000_0000);

        heap_from_bytes(build_heap_page(
            0x7C,
            heap_id(0, 1),
            &[b"pad", &info, &matrix, &name],
        ))
    }

    #[test]
    fn test_table_context_rows() {
        let table = decode(matrix_fixture()).unwrap();
        assert_eq!(table.kind(), TableKind::Matrix);
        assert_eq!(table.set_count(), 2);
        assert_eq!(table.entry_count(), 3);

        assert_eq!(table.row_id(0), Some(0x2122));
        assert_eq!(table.row_id(1), Some(0x2142));

        let count = table.cell_by_id(0, 0x3602).unwrap();
        match table.cell_source(count).unwrap() {
            CellSource::Bytes(bytes) => assert_eq!(bytes, 5_u32.to_le_bytes()),
            CellSource::SubNode(_) => panic!("inline value expected"),
        }

        // Absent cells are missing, not typed nulls.
        assert!(table.cell_by_id(1, 0x3602).is_none());
        assert!(table.cell_by_id(1, 0x3001).is_none());

        let name = table.cell_by_id(0, 0x3001).unwrap();
        match table.cell_source(name).unwrap() {
            CellSource::Bytes(bytes) => assert_eq!(bytes.len(), 12),
            CellSource::SubNode(_) => panic!("heap value expected"),
        }
    }

    #[test]
    fn test_enumeration_is_stable() {
        let table = decode(matrix_fixture()).unwrap();
        let first: Vec<_> = (0..table.set_count()).map(|set| table.row_id(set)).collect();
        let table = decode(matrix_fixture()).unwrap();
        let second: Vec<_> = (0..table.set_count()).map(|set| table.row_id(set)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_two_column_table() {
        let mut header = vec![TREE_SIGNATURE, 16, 2, 0];
        header.extend_from_slice(&heap_id(0, 1).raw().to_le_bytes());

        let mut leaf = Vec::new();
        leaf.extend_from_slice(&[0xAA; 16]);
        leaf.extend_from_slice(&3_u16.to_le_bytes());

        let heap = heap_from_bytes(build_heap_page(0x6C, heap_id(0, 0), &[&header, &leaf]));
        let table = decode(heap).unwrap();
        assert_eq!(table.kind(), TableKind::TwoColumn);
        assert_eq!(table.set_count(), 1);
        assert_eq!(table.entry_count(), 2);

        let key = table.cell_by_id(0, KEY_COLUMN_PROP).unwrap();
        match table.cell_source(key).unwrap() {
            CellSource::Bytes(bytes) => assert_eq!(bytes, &[0xAA; 16]),
            CellSource::SubNode(_) => panic!("inline key expected"),
        }
        let value = table.cell_by_id(0, VALUE_COLUMN_PROP).unwrap();
        assert_eq!(value.prop_type, PropertyType::Integer16);
    }

    #[test]
    fn test_unknown_signature() {
        let heap = heap_from_bytes(build_heap_page(0x8C, heap_id(0, 0), &[b"x"]));
        assert!(matches!(
            decode(heap),
            Err(crate::PffError::Ltp(LtpError::UnknownTableSignature(0x8C)))
        ));
    }
}
