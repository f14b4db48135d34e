//! The message store item.

use super::*;
use crate::{
    item::{Item, ItemKind},
    ltp::value::Guid,
    mapi, Result,
};

/// View over the message store descriptor (0x21): the per-file root of the
/// mailbox metadata.
pub struct MessageStoreView<'f> {
    item: Item<'f>,
}

impl<'f> MessageStoreView<'f> {
    pub fn new(item: Item<'f>) -> MessagingResult<Self> {
        if item.kind() != ItemKind::MessageStore {
            return Err(MessagingError::WrongItemKind {
                id: item.identifier(),
                expected: "message store",
            });
        }
        Ok(Self { item })
    }

    pub fn item(&self) -> &Item<'f> {
        &self.item
    }

    /// `PidTagDisplayName`.
    pub fn display_name(&self) -> Result<Option<String>> {
        self.item.entry_string(0, mapi::DISPLAY_NAME)
    }

    /// `PidTagRecordKey`: the store's unique key.
    pub fn record_key(&self) -> Result<Option<Vec<u8>>> {
        self.item.entry_binary(0, mapi::RECORD_KEY)
    }

    /// `PidTagStoreRecordKey` rendered as a GUID when it has the right size.
    pub fn store_guid(&self) -> Result<Option<Guid>> {
        Ok(self.record_key()?.and_then(|bytes| {
            let bytes: [u8; 16] = bytes.try_into().ok()?;
            Some(Guid::from_bytes(&bytes))
        }))
    }
}
