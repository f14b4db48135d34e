//! Recipient views.
//!
//! Recipients are rows of a table behind the message's recipients
//! sub-descriptor. Unlike folders and attachments, a recipient row is not a
//! descriptor of its own, so the view reads its columns directly.

use std::sync::Arc;

use super::*;
use crate::{
    ltp::{
        table::{CellSource, Table},
        value::{self, Value},
    },
    mapi, PffFile, Result,
};

/// How a recipient was addressed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RecipientKind {
    Originator,
    To,
    Cc,
    Bcc,
    Unknown,
}

impl From<i32> for RecipientKind {
    fn from(value: i32) -> Self {
        match value {
            mapi::recipient_type::ORIGINATOR => Self::Originator,
            mapi::recipient_type::TO => Self::To,
            mapi::recipient_type::CC => Self::Cc,
            mapi::recipient_type::BCC => Self::Bcc,
            _ => Self::Unknown,
        }
    }
}

/// One row of a message's recipients table.
pub struct RecipientView<'f> {
    file: &'f PffFile,
    table: Arc<Table>,
    row: usize,
    codepage: u16,
}

impl<'f> RecipientView<'f> {
    pub(crate) fn new(file: &'f PffFile, table: Arc<Table>, row: usize, codepage: u16) -> Self {
        Self {
            file,
            table,
            row,
            codepage,
        }
    }

    fn string(&self, prop_id: u16) -> Result<Option<String>> {
        let Some(cell) = self.table.cell_by_id(self.row, prop_id) else {
            return Ok(None);
        };
        let bytes = match self.table.cell_source(cell)? {
            CellSource::Bytes(bytes) => bytes,
            // Recipient strings never outgrow the heap; anything routed to a
            // sub-descriptor is treated as absent rather than streamed here.
            CellSource::SubNode(_) => return Ok(None),
        };
        match value::project(cell.prop_type, bytes, self.codepage, self.file.codepages())? {
            Value::StringUnicode(value) => Ok(Some(value)),
            Value::StringAscii { value, .. } => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    fn integer(&self, prop_id: u16) -> Option<i32> {
        let cell = self.table.cell_by_id(self.row, prop_id)?;
        match self.table.cell_source(cell).ok()? {
            CellSource::Bytes(bytes) if bytes.len() == 4 => {
                Some(i32::from_le_bytes(bytes.try_into().ok()?))
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> RecipientKind {
        self.integer(mapi::RECIPIENT_TYPE as u16)
            .map(RecipientKind::from)
            .unwrap_or(RecipientKind::Unknown)
    }

    /// `PidTagDisplayName`.
    pub fn display_name(&self) -> Result<Option<String>> {
        self.string(mapi::DISPLAY_NAME as u16)
    }

    /// `PidTagAddressType`, typically `SMTP` or `EX`.
    pub fn address_type(&self) -> Result<Option<String>> {
        self.string(mapi::ADDRESS_TYPE as u16)
    }

    /// `PidTagEmailAddress`.
    pub fn email_address(&self) -> Result<Option<String>> {
        self.string(mapi::EMAIL_ADDRESS as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_kind_mapping() {
        assert_eq!(RecipientKind::from(0), RecipientKind::Originator);
        assert_eq!(RecipientKind::from(1), RecipientKind::To);
        assert_eq!(RecipientKind::from(2), RecipientKind::Cc);
        assert_eq!(RecipientKind::from(3), RecipientKind::Bcc);
        assert_eq!(RecipientKind::from(7), RecipientKind::Unknown);
    }
}
