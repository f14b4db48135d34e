//! Items and the descriptor tree.
//!
//! The node index is flattened into an arena of descriptor records keyed by
//! identifier; parent links are identifiers, never references, so the formal
//! cycles of the format (items naming their parents, attachments embedding
//! messages) cost nothing. An [`Item`] is a cheap handle pairing a borrowed
//! file with one descriptor record; kind-specific behavior lives in the view
//! types of the messaging module.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    ltp::{
        prop_type::PropertyType,
        table::{CellSource, Table, TableCell},
        value::{self, Value},
    },
    messaging::named_prop::NamedPropertyName,
    ndb::{block_id::BlockId, node_id::*, page::NodeEntry},
    PffError, PffFile, Result,
};

/// One record of the descriptor arena.
#[derive(Copy, Clone, Debug)]
pub struct DescriptorNode {
    pub id: u32,
    pub data: BlockId,
    pub sub_nodes_block: BlockId,
    pub parent: u32,
    pub recovered: bool,
}

impl DescriptorNode {
    pub(crate) fn from_entry(entry: &NodeEntry, recovered: bool) -> Self {
        Self {
            id: entry.node.raw(),
            data: entry.data,
            sub_nodes_block: entry.sub_nodes,
            parent: entry.parent.raw(),
            recovered,
        }
    }
}

/// The allocated descriptor tree, built once at open from the node index.
#[derive(Default)]
pub(crate) struct DescriptorTree {
    nodes: HashMap<u32, DescriptorNode>,
    children: HashMap<u32, Vec<u32>>,
    orphans: Vec<u32>,
}

impl DescriptorTree {
    pub(crate) fn build(entries: Vec<NodeEntry>) -> Self {
        let mut tree = Self::default();
        for entry in &entries {
            tree.nodes
                .insert(entry.node.raw(), DescriptorNode::from_entry(entry, false));
        }

        for entry in &entries {
            let id = entry.node.raw();
            let parent = entry.parent.raw();
            if parent == 0 || parent == id {
                // Top-level descriptors hang off the synthetic root.
                continue;
            }
            if tree.nodes.contains_key(&parent) {
                tree.children.entry(parent).or_default().push(id);
            } else {
                // A parent outside the index is not a reason to drop the
                // descriptor; it stays reachable through the orphan list.
                tree.orphans.push(id);
            }
        }
        tree
    }

    pub(crate) fn get(&self, id: u32) -> Option<&DescriptorNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn children(&self, id: u32) -> &[u32] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn orphans(&self) -> &[u32] {
        &self.orphans
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// What an item is, judged from its descriptor kind and, for messages, its
/// message class.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ItemKind {
    MessageStore,
    NameToIdMap,
    Folder,
    Email,
    Appointment,
    Contact,
    Task,
    Note,
    Activity,
    Attachment,
    Attachments,
    Recipients,
    SubFolders,
    SubMessages,
    SubAssociatedContents,
    Unknown,
}

/// Lookup behavior switches.
#[derive(Copy, Clone, Default, Debug)]
pub struct LookupFlags {
    /// Match the raw stored tag of named properties instead of translating
    /// them through the name-to-id map.
    pub ignore_name_map: bool,
    /// Accept whatever value type is stored instead of requiring the
    /// requested one.
    pub match_any_value_type: bool,
}

/// The tag, type, and optional name behind one entry slot.
#[derive(Clone, Debug)]
pub struct EntryType {
    pub prop_id: u32,
    pub prop_type: PropertyType,
    pub name: Option<NamedPropertyName>,
}

/// A handle on one descriptor of an open file.
#[derive(Clone)]
pub struct Item<'f> {
    file: &'f PffFile,
    node: DescriptorNode,
}

impl<'f> Item<'f> {
    pub(crate) fn new(file: &'f PffFile, node: DescriptorNode) -> Self {
        Self { file, node }
    }

    pub fn identifier(&self) -> u32 {
        self.node.id
    }

    pub fn recovered(&self) -> bool {
        self.node.recovered
    }

    pub(crate) fn file(&self) -> &'f PffFile {
        self.file
    }

    pub(crate) fn node(&self) -> &DescriptorNode {
        &self.node
    }

    /// Decode (or fetch from cache) the item's table.
    pub(crate) fn table(&self) -> Result<Arc<Table>> {
        self.file.table_for(&self.node)
    }

    /// Children of this descriptor in the allocated tree.
    pub fn sub_items(&self) -> Result<Vec<Item<'f>>> {
        Ok(self
            .file
            .descriptor_children(self.node.id)
            .into_iter()
            .map(|node| Item::new(self.file, node))
            .collect())
    }

    /// Classify the item. Message descriptors are refined by their message
    /// class string.
    pub fn kind(&self) -> ItemKind {
        let id = NodeId::from_raw(self.node.id);
        if id == NID_MESSAGE_STORE {
            return ItemKind::MessageStore;
        }
        if id == NID_NAME_TO_ID_MAP {
            return ItemKind::NameToIdMap;
        }

        match id.kind() {
            Ok(NodeKind::Folder) | Ok(NodeKind::SearchFolder) => ItemKind::Folder,
            Ok(NodeKind::Message) | Ok(NodeKind::AssociatedMessage) => self.message_kind(),
            Ok(NodeKind::Attachment) => ItemKind::Attachment,
            Ok(NodeKind::AttachmentTable) => ItemKind::Attachments,
            Ok(NodeKind::RecipientTable) => ItemKind::Recipients,
            Ok(NodeKind::HierarchyTable) => ItemKind::SubFolders,
            Ok(NodeKind::ContentsTable) => ItemKind::SubMessages,
            Ok(NodeKind::AssociatedContentsTable) => ItemKind::SubAssociatedContents,
            _ => ItemKind::Unknown,
        }
    }

    fn message_kind(&self) -> ItemKind {
        let Ok(Some(class)) = self.entry_string(0, crate::mapi::MESSAGE_CLASS) else {
            return ItemKind::Email;
        };

        let class = class.as_str();
        if class.eq_ignore_ascii_case("IPM.Note") || class.starts_with("IPM.Note.") {
            ItemKind::Email
        } else if class.starts_with("IPM.Appointment") || class.starts_with("IPM.Schedule") {
            ItemKind::Appointment
        } else if class.starts_with("IPM.Contact") || class.starts_with("IPM.DistList") {
            ItemKind::Contact
        } else if class.starts_with("IPM.Task") {
            ItemKind::Task
        } else if class.starts_with("IPM.StickyNote") {
            ItemKind::Note
        } else if class.starts_with("IPM.Activity") {
            ItemKind::Activity
        } else {
            ItemKind::Email
        }
    }

    /// Number of sets (rows) in the item's table.
    pub fn set_count(&self) -> Result<usize> {
        Ok(self.table()?.set_count())
    }

    /// Number of entries (columns) shared by every set.
    pub fn entry_count(&self) -> Result<usize> {
        Ok(self.table()?.entry_count())
    }

    /// Describe the entry at `index`: its effective tag (named properties
    /// translate through the name-to-id map unless `ignore_name_map`), its
    /// stored type, and the name entry when one exists.
    pub fn entry_type(
        &self,
        index: usize,
        flags: LookupFlags,
    ) -> Result<Option<EntryType>> {
        let table = self.table()?;
        let Some(column) = table.column(index) else {
            return Ok(None);
        };

        let mut entry = EntryType {
            prop_id: u32::from(column.prop_id),
            prop_type: column.prop_type,
            name: None,
        };

        if column.prop_id >= 0x8000 {
            if let Some(named) = self.file.name_map().by_mapped_id(column.prop_id) {
                entry.name = Some(named.name.clone());
                if !flags.ignore_name_map {
                    if let NamedPropertyName::Numeric(name) = named.name {
                        entry.prop_id = name;
                    }
                }
            }
        }

        Ok(Some(entry))
    }

    /// The effective tag used to match a column against a query.
    fn effective_id(&self, column_id: u16, flags: LookupFlags) -> u32 {
        if column_id >= 0x8000 && !flags.ignore_name_map {
            if let Some(named) = self.file.name_map().by_mapped_id(column_id) {
                if let NamedPropertyName::Numeric(name) = named.name {
                    return name;
                }
            }
        }
        u32::from(column_id)
    }

    fn find_cell(
        &self,
        table: &Table,
        set: usize,
        prop_id: u32,
        flags: LookupFlags,
    ) -> Option<TableCell> {
        (0..table.entry_count()).find_map(|index| {
            let column = table.column(index)?;
            if self.effective_id(column.prop_id, flags) != prop_id {
                return None;
            }
            table.cell(set, index).cloned()
        })
    }

    /// Copy out the stored bytes of `(set, prop_id)`, resolving heap and
    /// sub-descriptor indirection. `None` means the property is not present,
    /// which is distinct from every error.
    pub fn value_bytes(
        &self,
        set: usize,
        prop_id: u32,
        want_type: Option<PropertyType>,
        flags: LookupFlags,
    ) -> Result<Option<(PropertyType, Vec<u8>)>> {
        let table = self.table()?;
        let Some(cell) = self.find_cell(&table, set, prop_id, flags) else {
            return Ok(None);
        };

        if let Some(want) = want_type {
            if !flags.match_any_value_type && cell.prop_type != want {
                return Err(crate::ltp::LtpError::TypeMismatch {
                    requested: want,
                    stored: cell.prop_type,
                }
                .into());
            }
        }

        let bytes = match table.cell_source(&cell)? {
            CellSource::Bytes(bytes) => bytes.to_vec(),
            CellSource::SubNode(node) => self.sub_node_bytes(node)?,
        };
        Ok(Some((cell.prop_type, bytes)))
    }

    /// Stream the data of one of this item's sub-descriptors.
    pub(crate) fn sub_node_bytes(&self, sub_node: u32) -> Result<Vec<u8>> {
        let tree = self.file.sub_node_tree(self.node.sub_nodes_block)?;
        let entry = tree
            .get(sub_node)
            .ok_or(crate::ndb::NdbError::NodeNotFound(sub_node))?;
        Ok(self.file.stream(entry.data)?.to_vec())
    }

    /// Materialize `(set, prop_id)` as a typed value.
    pub fn value(
        &self,
        set: usize,
        prop_id: u32,
        want_type: Option<PropertyType>,
        flags: LookupFlags,
    ) -> Result<Option<Value>> {
        let Some((prop_type, bytes)) = self.value_bytes(set, prop_id, want_type, flags)? else {
            return Ok(None);
        };
        let codepage = self.codepage_for_strings();
        Ok(Some(value::project(
            prop_type,
            &bytes,
            codepage,
            self.file.codepages(),
        )?))
    }

    /// The codepage for narrow strings of this item: the owning message's
    /// codepage properties by policy, then the file codepage.
    pub(crate) fn codepage_for_strings(&self) -> u16 {
        let message_codepage = self.raw_u32(crate::mapi::MESSAGE_CODEPAGE);
        let body_codepage = self.raw_u32(crate::mapi::INTERNET_CODEPAGE);
        self.file
            .effective_codepage(message_codepage, body_codepage)
    }

    /// A 32-bit read that never recurses into string decoding; used while
    /// selecting the codepage itself.
    fn raw_u32(&self, prop_id: u32) -> Option<u32> {
        let (prop_type, bytes) = self
            .value_bytes(0, prop_id, None, LookupFlags::default())
            .ok()
            .flatten()?;
        match (prop_type, bytes.len()) {
            (PropertyType::Integer32, 4) => {
                Some(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
            }
            _ => None,
        }
    }

    pub fn entry_bool(&self, set: usize, prop_id: u32) -> Result<Option<bool>> {
        match self.value(set, prop_id, Some(PropertyType::Boolean), LookupFlags::default())? {
            Some(Value::Boolean(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn entry_i16(&self, set: usize, prop_id: u32) -> Result<Option<i16>> {
        match self.value(set, prop_id, Some(PropertyType::Integer16), LookupFlags::default())? {
            Some(Value::Integer16(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn entry_i32(&self, set: usize, prop_id: u32) -> Result<Option<i32>> {
        match self.value(set, prop_id, Some(PropertyType::Integer32), LookupFlags::default())? {
            Some(Value::Integer32(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn entry_i64(&self, set: usize, prop_id: u32) -> Result<Option<i64>> {
        match self.value(set, prop_id, Some(PropertyType::Integer64), LookupFlags::default())? {
            Some(Value::Integer64(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn entry_f64(&self, set: usize, prop_id: u32) -> Result<Option<f64>> {
        let flags = LookupFlags {
            match_any_value_type: true,
            ..Default::default()
        };
        match self.value(set, prop_id, None, flags)? {
            Some(Value::Floating64(value)) => Ok(Some(value)),
            Some(Value::Floating32(value)) => Ok(Some(f64::from(value))),
            _ => Ok(None),
        }
    }

    pub fn entry_filetime(&self, set: usize, prop_id: u32) -> Result<Option<crate::datetime::Filetime>> {
        match self.value(set, prop_id, Some(PropertyType::Time), LookupFlags::default())? {
            Some(Value::Filetime(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn entry_guid(&self, set: usize, prop_id: u32) -> Result<Option<value::Guid>> {
        match self.value(set, prop_id, Some(PropertyType::Guid), LookupFlags::default())? {
            Some(Value::Guid(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn entry_binary(&self, set: usize, prop_id: u32) -> Result<Option<Vec<u8>>> {
        match self.value(set, prop_id, Some(PropertyType::Binary), LookupFlags::default())? {
            Some(Value::Binary(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Any string property as UTF-8, regardless of stored width.
    pub fn entry_string(&self, set: usize, prop_id: u32) -> Result<Option<String>> {
        let flags = LookupFlags {
            match_any_value_type: true,
            ..Default::default()
        };
        match self.value(set, prop_id, None, flags)? {
            Some(Value::StringUnicode(value)) => Ok(Some(value)),
            Some(Value::StringAscii { value, .. }) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Byte count of the UTF-8 rendering plus a terminator, or `None` when
    /// the property is absent.
    pub fn entry_string_size(&self, set: usize, prop_id: u32) -> Result<Option<usize>> {
        Ok(self
            .entry_string(set, prop_id)?
            .map(|value| value.len() + 1))
    }

    /// Copy the UTF-8 rendering and a terminating NUL into `buffer`,
    /// returning the bytes written.
    pub fn copy_entry_string(
        &self,
        set: usize,
        prop_id: u32,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let value = self
            .entry_string(set, prop_id)?
            .ok_or(PffError::NotPresent)?;
        copy_with_terminator(value.as_bytes(), buffer)
    }

    /// Any string property as UTF-16 code units, without a terminator.
    pub fn entry_string_utf16(&self, set: usize, prop_id: u32) -> Result<Option<Vec<u16>>> {
        Ok(self
            .entry_string(set, prop_id)?
            .map(|value| value.encode_utf16().collect()))
    }

    /// Unit count of the UTF-16 rendering plus a terminator, or `None` when
    /// the property is absent.
    pub fn entry_string_utf16_size(&self, set: usize, prop_id: u32) -> Result<Option<usize>> {
        Ok(self
            .entry_string_utf16(set, prop_id)?
            .map(|units| units.len() + 1))
    }

    /// Copy the UTF-16 rendering and a terminating NUL unit into `buffer`,
    /// returning the units written.
    pub fn copy_entry_string_utf16(
        &self,
        set: usize,
        prop_id: u32,
        buffer: &mut [u16],
    ) -> Result<usize> {
        let units = self
            .entry_string_utf16(set, prop_id)?
            .ok_or(PffError::NotPresent)?;
        let required = units.len() + 1;
        if buffer.len() < required {
            return Err(PffError::BufferTooSmall { required });
        }
        buffer[..units.len()].copy_from_slice(&units);
        buffer[units.len()] = 0;
        Ok(required)
    }

    pub fn entry_multi_value(&self, set: usize, prop_id: u32) -> Result<Option<Vec<Value>>> {
        let flags = LookupFlags {
            match_any_value_type: true,
            ..Default::default()
        };
        match self.value(set, prop_id, None, flags)? {
            Some(Value::MultiValue(values)) => Ok(Some(values)),
            Some(_) | None => Ok(None),
        }
    }

    /// Resolve a property by its name through the name-to-id map.
    pub fn entry_by_utf8_name(&self, name: &str, set: usize) -> Result<Option<Value>> {
        let Some(mapped) = self.file.name_map().by_string_name(name) else {
            return Ok(None);
        };
        let flags = LookupFlags {
            ignore_name_map: true,
            match_any_value_type: true,
        };
        self.value(set, u32::from(mapped), None, flags)
    }

    /// Resolve a property by its UTF-16 name.
    pub fn entry_by_utf16_name(&self, name: &[u16], set: usize) -> Result<Option<Value>> {
        let name = String::from_utf16_lossy(strip_utf16_terminator(name));
        self.entry_by_utf8_name(&name, set)
    }
}

/// Copy `bytes` plus a NUL terminator, or report the required size.
pub(crate) fn copy_with_terminator(bytes: &[u8], buffer: &mut [u8]) -> Result<usize> {
    let required = bytes.len() + 1;
    if buffer.len() < required {
        return Err(PffError::BufferTooSmall { required });
    }
    buffer[..bytes.len()].copy_from_slice(bytes);
    buffer[bytes.len()] = 0;
    Ok(required)
}

pub(crate) fn strip_utf16_terminator(units: &[u16]) -> &[u16] {
    match units.split_last() {
        Some((0, rest)) => rest,
        _ => units,
    }
}
