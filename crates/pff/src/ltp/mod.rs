//! Lists, tables, and properties: the heap-on-node sub-allocator, the
//! B-tree-on-heap, the table variants, and typed value projection.

use std::io;
use thiserror::Error;

pub mod heap;
pub mod prop_type;
pub mod table;
pub mod tree;
pub mod value;

use prop_type::PropertyType;

#[derive(Error, Debug)]
pub enum LtpError {
    #[error("Invalid heap signature: 0x{0:02X}")]
    InvalidHeapSignature(u8),
    #[error("Invalid heap identifier: 0x{0:08X}")]
    InvalidHeapId(u32),
    #[error("Heap index {index} out of range: page holds {count} allocations")]
    HeapIndexOutOfRange { index: u16, count: u16 },
    #[error("Heap page index {0} out of range")]
    HeapPageOutOfRange(u16),
    #[error("Invalid heap page map offset: 0x{0:04X}")]
    InvalidHeapPageMapOffset(u16),
    #[error("Heap allocation offsets decrease at 0x{0:04X}")]
    NonMonotonicHeapOffsets(u16),
    #[error("Heap allocation runs past its page: 0x{0:04X}")]
    HeapAllocationOutOfBounds(u16),
    #[error("Invalid tree signature: 0x{0:02X}")]
    InvalidTreeSignature(u8),
    #[error("Invalid tree key size: {0}")]
    InvalidTreeKeySize(u8),
    #[error("Invalid tree record size: {0}")]
    InvalidTreeRecordSize(u8),
    #[error("Tree deeper than {0} levels")]
    TreeDepthExceeded(u8),
    #[error("Unknown table signature: 0x{0:02X}")]
    UnknownTableSignature(u8),
    #[error("Invalid table column count: {0}")]
    InvalidTableColumnCount(usize),
    #[error("Invalid table column offset: 0x{0:04X}")]
    InvalidTableColumnOffset(u16),
    #[error("Invalid table row size: {0}")]
    InvalidTableRowSize(u16),
    #[error("Table set {0} out of range")]
    TableSetOutOfRange(usize),
    #[error("Invalid property type: 0x{0:04X}")]
    InvalidPropertyType(u16),
    #[error("Type mismatch: requested {requested:?}, stored {stored:?}")]
    TypeMismatch {
        requested: PropertyType,
        stored: PropertyType,
    },
    #[error("Value is {actual} bytes, expected {expected} for {prop_type:?}")]
    ValueSizeMismatch {
        prop_type: PropertyType,
        expected: usize,
        actual: usize,
    },
    #[error("Unsupported codepage: {0}")]
    UnsupportedCodepage(u16),
    #[error("Invalid multi-value count: {0}")]
    InvalidMultiValueCount(u32),
    #[error("Invalid multi-value offset: 0x{0:08X}")]
    InvalidMultiValueOffset(u32),
}

impl From<LtpError> for io::Error {
    fn from(err: LtpError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

pub type LtpResult<T> = Result<T, LtpError>;
