//! Folder views.
//!
//! A folder descriptor owns up to three companion tables at fixed identifier
//! offsets: sub-folders at +11, sub-messages at +12, and sub-associated
//! contents at +13. Rows carry the descriptor identifier of each child, so
//! enumeration goes row → identifier → item. Name lookups scan rows left to
//! right and return the first exact match.

use std::sync::Arc;

use super::*;
use crate::{
    item::{strip_utf16_terminator, Item, ItemKind},
    ltp::table::Table,
    mapi,
    ndb::node_id::*,
    Result,
};

/// What a folder holds, judged from `PidTagContainerClass`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FolderKind {
    Email,
    Task,
    Contact,
    Activity,
    Appointment,
    Note,
    Unknown,
}

/// View over a folder item.
pub struct FolderView<'f> {
    item: Item<'f>,
}

impl<'f> FolderView<'f> {
    pub fn new(item: Item<'f>) -> MessagingResult<Self> {
        if item.kind() != ItemKind::Folder {
            return Err(MessagingError::WrongItemKind {
                id: item.identifier(),
                expected: "folder",
            });
        }
        Ok(Self { item })
    }

    pub fn item(&self) -> &Item<'f> {
        &self.item
    }

    /// `PidTagDisplayName`.
    pub fn name(&self) -> Result<Option<String>> {
        self.item.entry_string(0, mapi::DISPLAY_NAME)
    }

    /// `PidTagContentCount`.
    pub fn content_count(&self) -> Result<Option<i32>> {
        self.item.entry_i32(0, mapi::CONTENT_COUNT)
    }

    /// `PidTagContentUnreadCount`.
    pub fn unread_count(&self) -> Result<Option<i32>> {
        self.item.entry_i32(0, mapi::CONTENT_UNREAD_COUNT)
    }

    /// `PidTagSubfolders`.
    pub fn has_sub_folders(&self) -> Result<Option<bool>> {
        self.item.entry_bool(0, mapi::SUBFOLDERS)
    }

    /// Classify the folder's contents from its container class string.
    pub fn folder_kind(&self) -> Result<FolderKind> {
        let Some(class) = self.item.entry_string(0, mapi::CONTAINER_CLASS)? else {
            return Ok(FolderKind::Unknown);
        };
        Ok(match class.as_str() {
            "IPF.Note" => FolderKind::Email,
            "IPF.Task" => FolderKind::Task,
            "IPF.Contact" => FolderKind::Contact,
            "IPF.Journal" => FolderKind::Activity,
            "IPF.Appointment" => FolderKind::Appointment,
            "IPF.StickyNote" => FolderKind::Note,
            _ => FolderKind::Unknown,
        })
    }

    /// The companion table at `offset` from this folder's identifier, if the
    /// descriptor exists.
    fn companion_table(&self, offset: u32) -> Result<Option<Arc<Table>>> {
        let id = self.item.identifier().wrapping_add(offset);
        let Some(item) = self.item.file().item_by_identifier(id) else {
            return Ok(None);
        };
        Ok(Some(item.table()?))
    }

    fn table_row_item(&self, table: &Table, row: usize) -> Result<Option<Item<'f>>> {
        let Some(id) = table.row_id(row) else {
            return Ok(None);
        };
        Ok(self.item.file().item_by_identifier(id))
    }

    pub fn sub_folder_count(&self) -> Result<usize> {
        Ok(self
            .companion_table(SUB_FOLDERS_OFFSET)?
            .map(|table| table.set_count())
            .unwrap_or(0))
    }

    /// The `index`th sub-folder in on-disk row order.
    pub fn sub_folder(&self, index: usize) -> Result<Option<FolderView<'f>>> {
        let Some(table) = self.companion_table(SUB_FOLDERS_OFFSET)? else {
            return Ok(None);
        };
        if index >= table.set_count() {
            return Ok(None);
        }
        match self.table_row_item(&table, index)? {
            Some(item) => Ok(Some(FolderView::new(item)?)),
            None => Ok(None),
        }
    }

    pub fn sub_message_count(&self) -> Result<usize> {
        Ok(self
            .companion_table(SUB_MESSAGES_OFFSET)?
            .map(|table| table.set_count())
            .unwrap_or(0))
    }

    /// The `index`th contained message in on-disk row order.
    pub fn sub_message(&self, index: usize) -> Result<Option<Item<'f>>> {
        let Some(table) = self.companion_table(SUB_MESSAGES_OFFSET)? else {
            return Ok(None);
        };
        if index >= table.set_count() {
            return Ok(None);
        }
        self.table_row_item(&table, index)
    }

    pub fn sub_associated_content_count(&self) -> Result<usize> {
        Ok(self
            .companion_table(SUB_ASSOCIATED_CONTENTS_OFFSET)?
            .map(|table| table.set_count())
            .unwrap_or(0))
    }

    /// The `index`th folder-associated item in on-disk row order.
    pub fn sub_associated_content(&self, index: usize) -> Result<Option<Item<'f>>> {
        let Some(table) = self.companion_table(SUB_ASSOCIATED_CONTENTS_OFFSET)? else {
            return Ok(None);
        };
        if index >= table.set_count() {
            return Ok(None);
        }
        self.table_row_item(&table, index)
    }

    /// Find a sub-folder by exact display name; the first row wins. The
    /// terminating NUL, when the caller includes one, is not part of the
    /// name.
    pub fn find_by_utf8_name(&self, name: &[u8]) -> Result<Option<FolderView<'f>>> {
        let name = match name.split_last() {
            Some((0, rest)) => rest,
            _ => name,
        };
        let name = String::from_utf8_lossy(name);
        self.find_sub_folder(&name)
    }

    /// Find a sub-folder by exact UTF-16 display name.
    pub fn find_by_utf16_name(&self, name: &[u16]) -> Result<Option<FolderView<'f>>> {
        let name = String::from_utf16_lossy(strip_utf16_terminator(name));
        self.find_sub_folder(&name)
    }

    fn find_sub_folder(&self, name: &str) -> Result<Option<FolderView<'f>>> {
        for index in 0..self.sub_folder_count()? {
            let Some(folder) = self.sub_folder(index)? else {
                continue;
            };
            if folder.name()?.as_deref() == Some(name) {
                return Ok(Some(folder));
            }
        }
        Ok(None)
    }
}
