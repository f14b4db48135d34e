//! Message views: bodies, recipients, and attachments.

use std::sync::Arc;

use super::*;
use crate::{
    item::{copy_with_terminator, Item, ItemKind, LookupFlags},
    ltp::{table::Table, value::Value},
    mapi,
    ndb::node_id::{NodeId, NodeKind},
    Result,
};

/// Decompressor for the compressed RTF body. The reader hands back the raw
/// compressed bytes; turning them into RTF text is the codec's job.
pub trait RtfCodec {
    fn decompress(&self, compressed: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// Returns the compressed bytes untouched.
#[derive(Default)]
pub struct RawRtfCodec;

impl RtfCodec for RawRtfCodec {
    fn decompress(&self, compressed: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}

/// View over a message item.
pub struct MessageView<'f> {
    item: Item<'f>,
}

impl<'f> MessageView<'f> {
    pub fn new(item: Item<'f>) -> MessagingResult<Self> {
        let id = NodeId::from_raw(item.identifier());
        let is_message = matches!(
            id.kind(),
            Ok(NodeKind::Message) | Ok(NodeKind::AssociatedMessage)
        ) || item.kind() == ItemKind::Email;
        if !is_message {
            return Err(MessagingError::WrongItemKind {
                id: item.identifier(),
                expected: "message",
            });
        }
        Ok(Self { item })
    }

    pub fn item(&self) -> &Item<'f> {
        &self.item
    }

    /// `PidTagMessageClass`.
    pub fn message_class(&self) -> Result<Option<String>> {
        self.item.entry_string(0, mapi::MESSAGE_CLASS)
    }

    /// `PidTagSubject`, with the thread-prefix control sequence removed when
    /// the stored subject carries one.
    pub fn subject(&self) -> Result<Option<String>> {
        Ok(self.item.entry_string(0, mapi::SUBJECT)?.map(|subject| {
            let mut chars = subject.chars();
            if chars.next() == Some('\u{1}') {
                // One control character plus the prefix length follow; the
                // readable subject starts after both.
                chars.next();
                chars.as_str().to_string()
            } else {
                subject
            }
        }))
    }

    /// `PidTagSenderName`.
    pub fn sender_name(&self) -> Result<Option<String>> {
        self.item.entry_string(0, mapi::SENDER_NAME)
    }

    /// `PidTagMessageDeliveryTime`.
    pub fn delivery_time(&self) -> Result<Option<crate::datetime::Filetime>> {
        self.item.entry_filetime(0, mapi::MESSAGE_DELIVERY_TIME)
    }

    /// `PidTagClientSubmitTime`.
    pub fn client_submit_time(&self) -> Result<Option<crate::datetime::Filetime>> {
        self.item.entry_filetime(0, mapi::CLIENT_SUBMIT_TIME)
    }

    /// `PidTagMessageFlags`.
    pub fn flags(&self) -> Result<Option<i32>> {
        self.item.entry_i32(0, mapi::MESSAGE_FLAGS)
    }

    fn body_value(&self, prop_id: u32) -> Result<Option<Value>> {
        let flags = LookupFlags {
            match_any_value_type: true,
            ..Default::default()
        };
        self.item.value(0, prop_id, None, flags)
    }

    /// UTF-8 bytes of a text body, before the terminator is added.
    fn body_utf8(&self, prop_id: u32) -> Result<Option<Vec<u8>>> {
        Ok(match self.body_value(prop_id)? {
            Some(Value::StringUnicode(value)) => Some(value.into_bytes()),
            Some(Value::StringAscii { value, .. }) => Some(value.into_bytes()),
            Some(Value::Binary(bytes)) => Some(bytes),
            _ => None,
        })
    }

    /// Size of the plain text body as UTF-8, including the terminator.
    pub fn plain_text_body_size(&self) -> Result<Option<usize>> {
        Ok(self.body_utf8(mapi::BODY)?.map(|bytes| bytes.len() + 1))
    }

    /// Copy the plain text body as UTF-8 with a terminating NUL.
    pub fn copy_plain_text_body(&self, buffer: &mut [u8]) -> Result<usize> {
        let bytes = self.body_utf8(mapi::BODY)?.ok_or(crate::PffError::NotPresent)?;
        copy_with_terminator(&bytes, buffer)
    }

    /// Size of the HTML body, including the terminator.
    pub fn html_body_size(&self) -> Result<Option<usize>> {
        Ok(self.body_utf8(mapi::BODY_HTML)?.map(|bytes| bytes.len() + 1))
    }

    /// Copy the HTML body with a terminating NUL.
    pub fn copy_html_body(&self, buffer: &mut [u8]) -> Result<usize> {
        let bytes = self.body_utf8(mapi::BODY_HTML)?.ok_or(crate::PffError::NotPresent)?;
        copy_with_terminator(&bytes, buffer)
    }

    /// Size of the compressed RTF body as stored.
    pub fn rtf_body_size(&self) -> Result<Option<usize>> {
        Ok(self
            .item
            .entry_binary(0, mapi::RTF_COMPRESSED)?
            .map(|bytes| bytes.len()))
    }

    /// Copy the compressed RTF body as stored, without a terminator.
    pub fn copy_rtf_body(&self, buffer: &mut [u8]) -> Result<usize> {
        let bytes = self
            .item
            .entry_binary(0, mapi::RTF_COMPRESSED)?
            .ok_or(crate::PffError::NotPresent)?;
        if buffer.len() < bytes.len() {
            return Err(crate::PffError::BufferTooSmall {
                required: bytes.len(),
            });
        }
        buffer[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// The RTF body run through `codec`.
    pub fn rtf_body_with(&self, codec: &dyn RtfCodec) -> Result<Option<Vec<u8>>> {
        match self.item.entry_binary(0, mapi::RTF_COMPRESSED)? {
            Some(bytes) => Ok(Some(codec.decompress(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The table stored behind one of the message's well-known
    /// sub-descriptors.
    fn sub_table(&self, descriptor: u32) -> Result<Option<Arc<Table>>> {
        self.item.file().sub_item_table(&self.item, descriptor)
    }

    /// The recipients table, in on-disk row order.
    pub fn recipients(&self) -> Result<Option<Arc<Table>>> {
        self.sub_table(RECIPIENTS_DESCRIPTOR)
    }

    pub fn recipient_count(&self) -> Result<usize> {
        Ok(self
            .recipients()?
            .map(|table| table.set_count())
            .unwrap_or(0))
    }

    /// The `index`th recipient in on-disk row order.
    pub fn recipient(&self, index: usize) -> Result<Option<recipient::RecipientView<'f>>> {
        let Some(table) = self.recipients()? else {
            return Ok(None);
        };
        if index >= table.set_count() {
            return Ok(None);
        }
        Ok(Some(recipient::RecipientView::new(
            self.item.file(),
            table,
            index,
            self.item.codepage_for_strings(),
        )))
    }

    /// The attachments table, in on-disk row order.
    pub fn attachments(&self) -> Result<Option<Arc<Table>>> {
        self.sub_table(ATTACHMENTS_DESCRIPTOR)
    }

    pub fn attachment_count(&self) -> Result<usize> {
        Ok(self
            .attachments()?
            .map(|table| table.set_count())
            .unwrap_or(0))
    }

    /// The `index`th attachment: its property set lives behind the
    /// sub-descriptor named by the attachments table row.
    pub fn attachment(&self, index: usize) -> Result<Option<attachment::AttachmentView<'f>>> {
        let Some(table) = self.attachments()? else {
            return Ok(None);
        };
        let Some(sub_node) = table.row_id(index) else {
            return Ok(None);
        };
        let item = self.item.file().sub_item(&self.item, sub_node)?;
        Ok(Some(attachment::AttachmentView::new(item)?))
    }

    /// Number of attachment rows whose type is `Attachment`, matching the
    /// count the attachments table advertises.
    pub fn has_attachments(&self) -> Result<bool> {
        Ok(self.attachment_count()? > 0)
    }
}
