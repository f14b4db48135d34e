//! Kind-specific views over items: message store, folders, messages,
//! attachments, and the named property map.

use std::io;
use thiserror::Error;

pub mod attachment;
pub mod folder;
pub mod message;
pub mod named_prop;
pub mod recipient;
pub mod store;

/// Sub-descriptor identifier of a message's attachments table.
pub const ATTACHMENTS_DESCRIPTOR: u32 = 0x671;

/// Sub-descriptor identifier of a message's recipients table.
pub const RECIPIENTS_DESCRIPTOR: u32 = 0x692;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Item 0x{id:08X} is not a {expected}")]
    WrongItemKind { id: u32, expected: &'static str },
    #[error("Message store descriptor not found")]
    MessageStoreNotFound,
    #[error("Root folder descriptor not found")]
    RootFolderNotFound,
    #[error("Invalid named property map entry at offset 0x{0:X}")]
    InvalidNamedPropertyEntry(usize),
    #[error("Invalid named property string offset: 0x{0:08X}")]
    InvalidNamedPropertyStringOffset(u32),
    #[error("Invalid named property namespace index: {0}")]
    InvalidNamedPropertyNamespace(u16),
    #[error("Attachment carries no data")]
    AttachmentDataMissing,
    #[error("Attachment does not embed an item")]
    AttachmentItemMissing,
}

impl From<MessagingError> for io::Error {
    fn from(err: MessagingError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
