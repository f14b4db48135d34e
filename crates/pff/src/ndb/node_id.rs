//! 32-bit descriptor identifiers.
//!
//! The low 5 bits of a descriptor identifier carry the kind of object the
//! descriptor holds; the remaining 27 bits are an index. A handful of fixed
//! identifiers address the special descriptors every store carries.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fmt::Debug,
    io::{self, Read},
};

use super::*;

/// The kind field of a descriptor identifier.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NodeKind {
    /// An allocation inside a heap-on-node rather than a descriptor.
    Heap = 0x00,
    /// Internal bookkeeping descriptor (message store, name-to-id map, ...).
    Internal = 0x01,
    /// Folder property set.
    Folder = 0x02,
    /// Search folder property set.
    SearchFolder = 0x03,
    /// Message property set.
    Message = 0x04,
    /// Attachment property set.
    Attachment = 0x05,
    SearchUpdateQueue = 0x06,
    SearchCriteria = 0x07,
    /// Folder-associated message property set.
    AssociatedMessage = 0x08,
    ContentsTableIndex = 0x0A,
    ReceiveFolderTable = 0x0B,
    OutgoingQueueTable = 0x0C,
    /// Sub-folders table of a folder.
    HierarchyTable = 0x0D,
    /// Sub-messages table of a folder.
    ContentsTable = 0x0E,
    /// Sub-associated-contents table of a folder.
    AssociatedContentsTable = 0x0F,
    SearchContentsTable = 0x10,
    /// Attachments table of a message.
    AttachmentTable = 0x11,
    /// Recipients table of a message.
    RecipientTable = 0x12,
    SearchTableIndex = 0x13,
    /// Free-standing lists/tables/properties stream.
    LocalDescriptorValue = 0x1F,
}

impl TryFrom<u8> for NodeKind {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(NodeKind::Heap),
            0x01 => Ok(NodeKind::Internal),
            0x02 => Ok(NodeKind::Folder),
            0x03 => Ok(NodeKind::SearchFolder),
            0x04 => Ok(NodeKind::Message),
            0x05 => Ok(NodeKind::Attachment),
            0x06 => Ok(NodeKind::SearchUpdateQueue),
            0x07 => Ok(NodeKind::SearchCriteria),
            0x08 => Ok(NodeKind::AssociatedMessage),
            0x0A => Ok(NodeKind::ContentsTableIndex),
            0x0B => Ok(NodeKind::ReceiveFolderTable),
            0x0C => Ok(NodeKind::OutgoingQueueTable),
            0x0D => Ok(NodeKind::HierarchyTable),
            0x0E => Ok(NodeKind::ContentsTable),
            0x0F => Ok(NodeKind::AssociatedContentsTable),
            0x10 => Ok(NodeKind::SearchContentsTable),
            0x11 => Ok(NodeKind::AttachmentTable),
            0x12 => Ok(NodeKind::RecipientTable),
            0x13 => Ok(NodeKind::SearchTableIndex),
            0x1F => Ok(NodeKind::LocalDescriptorValue),
            _ => Err(NdbError::InvalidNodeKind(value)),
        }
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn kind(&self) -> NdbResult<NodeKind> {
        NodeKind::try_from((self.0 & 0x1F) as u8)
    }

    pub fn index(&self) -> u32 {
        self.0 >> 5
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub(crate) fn read(f: &mut dyn Read) -> io::Result<Self> {
        Ok(Self(f.read_u32::<LittleEndian>()?))
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Ok(kind) => write!(f, "NodeId {{ {:?}: 0x{:X} }}", kind, self.index()),
            Err(_) => write!(f, "NodeId {{ invalid: 0x{:08X} }}", self.0),
        }
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// Message store descriptor.
pub const NID_MESSAGE_STORE: NodeId = NodeId(0x21);

/// Named property map descriptor.
pub const NID_NAME_TO_ID_MAP: NodeId = NodeId(0x61);

/// Root mailbox folder descriptor.
pub const NID_ROOT_FOLDER: NodeId = NodeId(0x122);

/// Identifier offsets of the tables hanging off a folder descriptor.
pub const SUB_FOLDERS_OFFSET: u32 = 11;
pub const SUB_MESSAGES_OFFSET: u32 = 12;
pub const SUB_ASSOCIATED_CONTENTS_OFFSET: u32 = 13;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_index() {
        let id = NodeId::from_raw(0x122);
        assert_eq!(id.kind().unwrap(), NodeKind::Folder);
        assert_eq!(id.index(), 0x9);
    }

    #[test]
    fn test_well_known_kinds() {
        assert_eq!(NID_MESSAGE_STORE.kind().unwrap(), NodeKind::Internal);
        assert_eq!(NID_NAME_TO_ID_MAP.kind().unwrap(), NodeKind::Internal);
        assert_eq!(NID_ROOT_FOLDER.kind().unwrap(), NodeKind::Folder);
    }

    #[test]
    fn test_invalid_kind() {
        let id = NodeId::from_raw(0x1E);
        assert!(matches!(id.kind(), Err(NdbError::InvalidNodeKind(0x1E))));
    }

    #[test]
    fn test_folder_table_offsets() {
        let folder = NID_ROOT_FOLDER.raw();
        assert_eq!(
            NodeId::from_raw(folder + SUB_FOLDERS_OFFSET).kind().unwrap(),
            NodeKind::HierarchyTable
        );
        assert_eq!(
            NodeId::from_raw(folder + SUB_MESSAGES_OFFSET).kind().unwrap(),
            NodeKind::ContentsTable
        );
        assert_eq!(
            NodeId::from_raw(folder + SUB_ASSOCIATED_CONTENTS_OFFSET)
                .kind()
                .unwrap(),
            NodeKind::AssociatedContentsTable
        );
    }
}
