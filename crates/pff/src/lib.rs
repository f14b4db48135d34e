//! Read-only reader for the Personal Folder File family (PAB, PST, OST).
//!
//! A file is a self-contained, B-tree-indexed database of folders, messages,
//! attachments, recipients, and named properties. Opening one decodes the
//! header, indexes every descriptor, and builds the named property map; from
//! there items are cheap handles that decode their property tables on demand
//! through three shared caches. The reader never writes: concurrent readers
//! may share one open file freely.
//!
//! ```no_run
//! use pff::PffFile;
//!
//! # fn main() -> Result<(), pff::PffError> {
//! let file = PffFile::open("archive.pst")?;
//! let root = file.root_folder()?;
//! for index in 0..root.sub_folder_count()? {
//!     if let Some(folder) = root.sub_folder(index)? {
//!         println!("{}", folder.name()?.unwrap_or_default());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::{
    io,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;
use tracing::warn;

pub mod codepage;
pub mod datetime;
pub mod diag;
pub mod item;
pub mod ltp;
pub mod mapi;
pub mod messaging;
pub mod ndb;
pub mod source;

mod block_sig;
mod cache;
mod crc;
mod crypt;
mod recover;

use cache::Cache;
use codepage::{CodepageRegistry, DEFAULT_ASCII_CODEPAGE};
use diag::{Diagnostic, DiagnosticSink, TracingSink};
use item::{DescriptorNode, DescriptorTree, Item};
use ltp::{heap::HeapNode, table::Table, LtpError};
use messaging::{
    folder::FolderView, named_prop::NameToIdMap, store::MessageStoreView, MessagingError,
};
use ndb::{
    block::read_block,
    block_id::BlockId,
    data_tree::BlockTree,
    header::Header,
    node_id::{NID_MESSAGE_STORE, NID_NAME_TO_ID_MAP, NID_ROOT_FOLDER},
    page::{BTreeIndex, LeafEntry},
    sub_node::SubNodeTree,
    BlockResolver, ContentKind, EncryptionKind, FormatProfile, FormatVariant, NdbError,
};
pub use recover::RecoveryFlags;

#[derive(Error, Debug)]
pub enum PffError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Node database error: {0}")]
    Ndb(#[from] NdbError),
    #[error("Lists/tables/properties error: {0}")]
    Ltp(#[from] LtpError),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },
    #[error("Requested value is not present")]
    NotPresent,
    #[error("Operation aborted")]
    Aborted,
}

pub type Result<T, E = PffError> = std::result::Result<T, E>;

/// Which codepage property of a message wins when both are present.
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum CodepagePolicy {
    /// Prefer `PidTagMessageCodepage`, then `PidTagInternetCodepage`.
    #[default]
    MessageFirst,
    /// Prefer `PidTagInternetCodepage`, then `PidTagMessageCodepage`.
    BodyFirst,
}

/// Open-time settings.
#[derive(Clone, Debug)]
pub struct PffOptions {
    pub codepage_policy: CodepagePolicy,
    pub block_cache_capacity: usize,
    pub stream_cache_capacity: usize,
    pub table_cache_capacity: usize,
}

impl Default for PffOptions {
    fn default() -> Self {
        Self {
            codepage_policy: CodepagePolicy::default(),
            block_cache_capacity: 128,
            stream_cache_capacity: 64,
            table_cache_capacity: 64,
        }
    }
}

/// An open file.
pub struct PffFile {
    source: Box<dyn source::ByteSource>,
    profile: FormatProfile,
    header: Header,
    node_index: BTreeIndex,
    block_index: BTreeIndex,
    tree: DescriptorTree,
    name_map: NameToIdMap,
    codepages: CodepageRegistry,
    options: PffOptions,
    sink: Arc<dyn DiagnosticSink>,
    ascii_codepage: AtomicU32,
    abort: AtomicBool,
    block_cache: Cache<u64, Vec<u8>>,
    stream_cache: Cache<u64, BlockTree>,
    table_cache: Cache<u64, Table>,
    recovered: Mutex<Vec<DescriptorNode>>,
    recovered_blocks: Mutex<std::collections::HashMap<u64, ndb::page::BlockEntry>>,
}

impl PffFile {
    /// Open a file on disk with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_from(Box::new(source::FileSource::open(path)?))
    }

    /// Open any byte source with default options.
    pub fn read_from(source: Box<dyn source::ByteSource>) -> Result<Self> {
        Self::read_with(source, PffOptions::default(), Arc::new(TracingSink))
    }

    /// Open any byte source with explicit options and diagnostic sink.
    pub fn read_with(
        source: Box<dyn source::ByteSource>,
        options: PffOptions,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let (header, profile) = Header::read(source.as_ref())?;
        let node_index = BTreeIndex::node_index(&header.root);
        let block_index = BTreeIndex::block_index(&header.root);

        let mut file = Self {
            block_cache: Cache::new(options.block_cache_capacity),
            stream_cache: Cache::new(options.stream_cache_capacity),
            table_cache: Cache::new(options.table_cache_capacity),
            source,
            profile,
            header,
            node_index,
            block_index,
            tree: DescriptorTree::default(),
            name_map: NameToIdMap::default(),
            codepages: CodepageRegistry::default(),
            options,
            sink,
            ascii_codepage: AtomicU32::new(u32::from(DEFAULT_ASCII_CODEPAGE)),
            abort: AtomicBool::new(false),
            recovered: Mutex::new(Vec::new()),
            recovered_blocks: Mutex::new(std::collections::HashMap::new()),
        };

        file.tree = file.build_descriptor_tree()?;
        file.name_map = file.build_name_map();
        Ok(file)
    }

    fn build_descriptor_tree(&self) -> Result<DescriptorTree> {
        let mut entries = Vec::new();
        self.node_index
            .scan(self.source.as_ref(), &self.profile, &mut |leaf| {
                self.check_abort()?;
                if let LeafEntry::Node(entry) = leaf {
                    entries.push(*entry);
                }
                Ok(true)
            })?;
        Ok(DescriptorTree::build(entries))
    }

    fn build_name_map(&self) -> NameToIdMap {
        let Some(item) = self.item_by_identifier(NID_NAME_TO_ID_MAP.raw()) else {
            self.sink.report(&Diagnostic::new(
                "messaging",
                "NamedPropertyMapMissing",
                "descriptor 0x61 not present",
            ));
            return NameToIdMap::default();
        };

        match NameToIdMap::read(&item) {
            Ok(map) => map,
            Err(error) => {
                warn!(
                    name: "PffNamedPropertyMapUnreadable",
                    ?error,
                    "failed to decode the named property map"
                );
                self.sink.report(&Diagnostic::new(
                    "messaging",
                    "NamedPropertyMapUnreadable",
                    error.to_string(),
                ));
                NameToIdMap::default()
            }
        }
    }

    /// Total size of the underlying byte source.
    pub fn size(&self) -> u64 {
        self.source.size()
    }

    pub fn format_variant(&self) -> FormatVariant {
        self.profile.variant
    }

    pub fn content_kind(&self) -> ContentKind {
        self.profile.variant.content_kind()
    }

    pub fn encryption_kind(&self) -> EncryptionKind {
        self.header.encryption
    }

    /// The codepage used for narrow strings when no message-level codepage
    /// applies.
    pub fn ascii_codepage(&self) -> u16 {
        self.ascii_codepage.load(Ordering::Relaxed) as u16
    }

    pub fn set_ascii_codepage(&self, codepage: u16) {
        self.ascii_codepage
            .store(u32::from(codepage), Ordering::Relaxed);
    }

    /// Request that long-running operations stop at their next safe point.
    pub fn signal_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub(crate) fn check_abort(&self) -> Result<()> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(PffError::Aborted);
        }
        Ok(())
    }

    pub(crate) fn reset_abort(&self) {
        self.abort.store(false, Ordering::Relaxed);
    }

    pub fn name_map(&self) -> &NameToIdMap {
        &self.name_map
    }

    pub fn codepages(&self) -> &CodepageRegistry {
        &self.codepages
    }

    /// Register a custom codepage decoder before handing the file out.
    pub fn codepages_mut(&mut self) -> &mut CodepageRegistry {
        &mut self.codepages
    }

    pub(crate) fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }

    pub(crate) fn profile(&self) -> &FormatProfile {
        &self.profile
    }

    pub(crate) fn byte_source(&self) -> &dyn source::ByteSource {
        self.source.as_ref()
    }

    pub(crate) fn block_btree(&self) -> &BTreeIndex {
        &self.block_index
    }

    /// The message-level codepage that wins under the configured policy,
    /// falling back to the file codepage.
    pub(crate) fn effective_codepage(
        &self,
        message_codepage: Option<u32>,
        body_codepage: Option<u32>,
    ) -> u16 {
        select_codepage(
            self.options.codepage_policy,
            message_codepage,
            body_codepage,
            self.ascii_codepage(),
        )
    }

    /// Assemble (or fetch from cache) the logical stream rooted at `block`.
    pub(crate) fn stream(&self, block: BlockId) -> Result<Arc<BlockTree>> {
        if let Some(stream) = self.stream_cache.get(&block.raw()) {
            return Ok(stream);
        }
        let stream = BlockTree::assemble(self, &self.profile, block)?;
        Ok(self.stream_cache.insert(block.raw(), Arc::new(stream)))
    }

    /// Load a descriptor's local descriptor tree; a zero identifier yields
    /// an empty tree.
    pub(crate) fn sub_node_tree(&self, block: BlockId) -> Result<Arc<SubNodeTree>> {
        Ok(Arc::new(SubNodeTree::load(self, &self.profile, block)?))
    }

    /// Decode (or fetch from cache) the table stored at a descriptor's data
    /// stream. Tables are keyed by their data identifier, which is unique
    /// even across sub-descriptors of different items.
    pub(crate) fn table_for(&self, node: &DescriptorNode) -> Result<Arc<Table>> {
        if let Some(table) = self.table_cache.get(&node.data.raw()) {
            return Ok(table);
        }

        let stream = self.stream(node.data)?;
        let heap = HeapNode::read(stream)?;
        let sub_nodes = self.sub_node_tree(node.sub_nodes_block)?;
        let table = Table::decode(self, &self.profile, heap, &sub_nodes)?;
        Ok(self.table_cache.insert(node.data.raw(), Arc::new(table)))
    }

    /// Look up an allocated descriptor. Recovered descriptors are never
    /// returned here; they live only in the recovered item list.
    pub fn item_by_identifier(&self, identifier: u32) -> Option<Item<'_>> {
        self.tree
            .get(identifier)
            .map(|node| Item::new(self, *node))
    }

    pub(crate) fn descriptor_children(&self, identifier: u32) -> Vec<DescriptorNode> {
        self.tree
            .children(identifier)
            .iter()
            .filter_map(|&child| self.tree.get(child).copied())
            .collect()
    }

    /// Number of allocated descriptors.
    pub fn descriptor_count(&self) -> usize {
        self.tree.len()
    }

    /// The root folder item.
    pub fn root_item(&self) -> Result<Item<'_>> {
        self.item_by_identifier(NID_ROOT_FOLDER.raw())
            .ok_or_else(|| MessagingError::RootFolderNotFound.into())
    }

    /// The root folder view.
    pub fn root_folder(&self) -> Result<FolderView<'_>> {
        Ok(FolderView::new(self.root_item()?)?)
    }

    /// The message store view.
    pub fn message_store(&self) -> Result<MessageStoreView<'_>> {
        let item = self
            .item_by_identifier(NID_MESSAGE_STORE.raw())
            .ok_or(MessagingError::MessageStoreNotFound)?;
        Ok(MessageStoreView::new(item)?)
    }

    /// Descriptors whose parent is missing from the index. They are
    /// allocated items, just unreachable from the root.
    pub fn orphan_count(&self) -> usize {
        self.tree.orphans().len()
    }

    pub fn orphan_item(&self, index: usize) -> Option<Item<'_>> {
        let id = *self.tree.orphans().get(index)?;
        self.item_by_identifier(id)
    }

    /// A sub-item of `parent`: an item whose property set lives behind one
    /// of the parent's local descriptors.
    pub(crate) fn sub_item<'f>(&'f self, parent: &Item<'f>, sub_node: u32) -> Result<Item<'f>> {
        let tree = self.sub_node_tree(parent.node().sub_nodes_block)?;
        let entry = tree
            .get(sub_node)
            .ok_or(NdbError::NodeNotFound(sub_node))?;
        Ok(Item::new(
            self,
            DescriptorNode {
                id: sub_node,
                data: entry.data,
                sub_nodes_block: entry.sub_nodes,
                parent: parent.identifier(),
                recovered: parent.recovered(),
            },
        ))
    }

    /// The table of a sub-item, or `None` when the parent has no such
    /// sub-descriptor.
    pub(crate) fn sub_item_table(
        &self,
        parent: &Item<'_>,
        sub_node: u32,
    ) -> Result<Option<Arc<Table>>> {
        let tree = self.sub_node_tree(parent.node().sub_nodes_block)?;
        let Some(entry) = tree.get(sub_node) else {
            return Ok(None);
        };
        let node = DescriptorNode {
            id: sub_node,
            data: entry.data,
            sub_nodes_block: entry.sub_nodes,
            parent: parent.identifier(),
            recovered: parent.recovered(),
        };
        Ok(Some(self.table_for(&node)?))
    }

    /// Scan for deleted and orphaned descriptors. Recovered items populate
    /// a parallel list; the allocated tree is never touched. Returns the
    /// number of recovered items.
    pub fn recover_items(&self, flags: RecoveryFlags) -> Result<usize> {
        self.reset_abort();
        let nodes = recover::scan(self, flags)?;
        let mut recovered = self
            .recovered
            .lock()
            .map_err(|_| io::Error::other("recovered item list poisoned"))?;
        *recovered = nodes;
        Ok(recovered.len())
    }

    pub fn recovered_item_count(&self) -> usize {
        self.recovered.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// A recovered item by index. The handle carries `recovered() == true`
    /// and resolves blocks through the recovered block map as needed.
    pub fn recovered_item(&self, index: usize) -> Option<Item<'_>> {
        let recovered = self.recovered.lock().ok()?;
        recovered.get(index).map(|node| Item::new(self, *node))
    }

    /// Free 64-byte granules according to the allocation maps, merged into
    /// ranges.
    pub fn unallocated_ranges(&self) -> Result<Vec<std::ops::Range<u64>>> {
        recover::unallocated_ranges(self)
    }

    pub(crate) fn note_recovered_block(&self, entry: ndb::page::BlockEntry) {
        if let Ok(mut blocks) = self.recovered_blocks.lock() {
            blocks.entry(entry.block.raw()).or_insert(entry);
        }
    }
}

impl BlockResolver for PffFile {
    fn lookup(&self, block: BlockId) -> Result<ndb::page::BlockEntry> {
        let found = self
            .block_index
            .find(self.source.as_ref(), &self.profile, block.raw())?;
        if let Some(LeafEntry::Block(entry)) = found {
            return Ok(entry);
        }
        if let Ok(blocks) = self.recovered_blocks.lock() {
            if let Some(entry) = blocks.get(&block.raw()) {
                return Ok(*entry);
            }
        }
        Err(NdbError::BlockNotFound(block.raw()).into())
    }

    fn read(&self, block: BlockId) -> Result<Arc<Vec<u8>>> {
        if let Some(data) = self.block_cache.get(&block.raw()) {
            return Ok(data);
        }
        let entry = self.lookup(block)?;
        let data = read_block(
            self.source.as_ref(),
            &self.profile,
            self.header.encryption,
            &entry,
        )?;
        Ok(self.block_cache.insert(block.raw(), Arc::new(data)))
    }
}

/// Pick the codepage two optional message-level properties and a fallback
/// resolve to under `policy`. Zero-valued properties count as absent.
fn select_codepage(
    policy: CodepagePolicy,
    message_codepage: Option<u32>,
    body_codepage: Option<u32>,
    fallback: u16,
) -> u16 {
    let (first, second) = match policy {
        CodepagePolicy::MessageFirst => (message_codepage, body_codepage),
        CodepagePolicy::BodyFirst => (body_codepage, message_codepage),
    };
    first
        .filter(|&codepage| codepage != 0)
        .or(second.filter(|&codepage| codepage != 0))
        .map(|codepage| codepage as u16)
        .unwrap_or(fallback)
}
