//! Attachment views.
//!
//! An attachment's property set is a sub-item of its message. The payload
//! sits behind `PidTagAttachDataBinary`, either as ordinary bytes or, for
//! embedded messages, as an object reference into the attachment's own local
//! descriptors. Payload access is a positioned stream so large attachments
//! never have to be materialized wholesale.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use super::*;
use crate::{
    item::{Item, LookupFlags},
    ltp::{prop_type::PropertyType, table::CellSource, value::Value},
    mapi,
    ndb::data_tree::BlockTree,
    Result,
};

/// `PidTagAttachMethod`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AttachmentKind {
    None,
    /// The payload bytes are stored in the file.
    Data,
    /// The payload lives outside the file and only a path is stored.
    Reference,
    /// The payload is an embedded message item.
    EmbeddedMessage,
    /// The payload is an embedded OLE storage.
    Storage,
    Unknown,
}

/// View over an attachment item.
pub struct AttachmentView<'f> {
    item: Item<'f>,
}

impl<'f> AttachmentView<'f> {
    pub fn new(item: Item<'f>) -> MessagingResult<Self> {
        Ok(Self { item })
    }

    pub fn item(&self) -> &Item<'f> {
        &self.item
    }

    pub fn kind(&self) -> Result<AttachmentKind> {
        Ok(match self.item.entry_i32(0, mapi::ATTACH_METHOD)? {
            Some(0) | None => AttachmentKind::None,
            Some(1) => AttachmentKind::Data,
            Some(2..=4) => AttachmentKind::Reference,
            Some(5) => AttachmentKind::EmbeddedMessage,
            Some(6) => AttachmentKind::Storage,
            Some(_) => AttachmentKind::Unknown,
        })
    }

    /// `PidTagAttachLongFilename`, falling back to the short name.
    pub fn long_filename(&self) -> Result<Option<String>> {
        match self.item.entry_string(0, mapi::ATTACH_LONG_FILENAME)? {
            Some(name) => Ok(Some(name)),
            None => self.short_filename(),
        }
    }

    /// `PidTagAttachFilename`.
    pub fn short_filename(&self) -> Result<Option<String>> {
        self.item.entry_string(0, mapi::ATTACH_FILENAME)
    }

    /// `PidTagAttachSize`: the stored size hint, covering the whole
    /// attachment object rather than just the payload.
    pub fn size_hint(&self) -> Result<Option<i32>> {
        self.item.entry_i32(0, mapi::ATTACH_SIZE)
    }

    /// Open the payload as a positioned stream.
    pub fn data(&self) -> Result<AttachmentStream> {
        let table = self.item.table()?;
        let Some(cell) = (0..table.entry_count()).find_map(|index| {
            let column = table.column(index)?;
            (u32::from(column.prop_id) == mapi::ATTACH_DATA)
                .then(|| table.cell(0, index).cloned())
                .flatten()
        }) else {
            return Err(MessagingError::AttachmentDataMissing.into());
        };

        match cell.prop_type {
            PropertyType::Binary => match table.cell_source(&cell)? {
                CellSource::Bytes(bytes) => Ok(AttachmentStream::from_bytes(bytes.to_vec())),
                CellSource::SubNode(node) => {
                    let stream = self.sub_node_stream(node)?;
                    Ok(AttachmentStream::from_tree(stream))
                }
            },
            PropertyType::Object => {
                let CellSource::Bytes(bytes) = table.cell_source(&cell)? else {
                    return Err(MessagingError::AttachmentDataMissing.into());
                };
                if bytes.len() != 8 {
                    return Err(MessagingError::AttachmentDataMissing.into());
                }
                let node = u32::from_le_bytes(bytes[..4].try_into().expect("4 bytes"));
                let stream = self.sub_node_stream(node)?;
                Ok(AttachmentStream::from_tree(stream))
            }
            _ => Err(MessagingError::AttachmentDataMissing.into()),
        }
    }

    fn sub_node_stream(&self, node: u32) -> Result<Arc<BlockTree>> {
        let file = self.item.file();
        let tree = file.sub_node_tree(self.item.node().sub_nodes_block)?;
        let entry = tree
            .get(node)
            .ok_or(crate::ndb::NdbError::NodeNotFound(node))?;
        file.stream(entry.data)
    }

    /// Payload size in bytes.
    pub fn data_size(&self) -> Result<u64> {
        Ok(self.data()?.size())
    }

    /// The embedded message of an `EmbeddedMessage` attachment.
    pub fn embedded_item(&self) -> Result<Item<'f>> {
        let flags = LookupFlags {
            match_any_value_type: true,
            ..Default::default()
        };
        let Some(Value::Object { node, .. }) =
            self.item.value(0, mapi::ATTACH_DATA, None, flags)?
        else {
            return Err(MessagingError::AttachmentItemMissing.into());
        };
        self.item.file().sub_item(&self.item, node)
    }
}

enum StreamBacking {
    Bytes(Vec<u8>),
    Tree(Arc<BlockTree>),
}

/// A positioned reader over an attachment payload.
pub struct AttachmentStream {
    backing: StreamBacking,
    position: u64,
}

impl AttachmentStream {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            backing: StreamBacking::Bytes(bytes),
            position: 0,
        }
    }

    fn from_tree(tree: Arc<BlockTree>) -> Self {
        Self {
            backing: StreamBacking::Tree(tree),
            position: 0,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.backing {
            StreamBacking::Bytes(bytes) => bytes.len() as u64,
            StreamBacking::Tree(tree) => tree.size(),
        }
    }
}

impl Read for AttachmentStream {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let read = match &self.backing {
            StreamBacking::Bytes(bytes) => {
                let start = usize::try_from(self.position.min(bytes.len() as u64))
                    .expect("position within in-memory payload");
                let take = (bytes.len() - start).min(buffer.len());
                buffer[..take].copy_from_slice(&bytes[start..start + take]);
                take
            }
            StreamBacking::Tree(tree) => tree.read_at(self.position, buffer),
        };
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for AttachmentStream {
    fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        let size = self.size();
        let target = match position {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(offset) => i128::from(size) + i128::from(offset),
            SeekFrom::Current(offset) => i128::from(self.position) + i128::from(offset),
        };
        let target = u64::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;
        self.position = target;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_read_and_seek() {
        let mut stream = AttachmentStream::from_bytes(b"attachment payload".to_vec());
        assert_eq!(stream.size(), 18);

        let mut buffer = [0_u8; 10];
        assert_eq!(stream.read(&mut buffer).unwrap(), 10);
        assert_eq!(&buffer, b"attachment");

        stream.seek(SeekFrom::Start(11)).unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"payload");

        stream.seek(SeekFrom::End(-7)).unwrap();
        let mut tail = [0_u8; 7];
        assert_eq!(stream.read(&mut tail).unwrap(), 7);
        assert_eq!(&tail, b"payload");

        assert!(stream.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_stream_read_past_end() {
        let mut stream = AttachmentStream::from_bytes(vec![1, 2, 3]);
        stream.seek(SeekFrom::Start(10)).unwrap();
        let mut buffer = [0_u8; 4];
        assert_eq!(stream.read(&mut buffer).unwrap(), 0);
    }
}
