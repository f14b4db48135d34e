//! In-memory file images for the integration tests.
//!
//! The builder lays out a minimal but complete 64-bit store: header with
//! both CRCs, one node index page, one block index page, and single-block
//! heaps for every item. Layouts are written here from the format
//! definitions, independently of the reader under test.

/// CRC used by the format: reflected table, zero seed, no final complement.
pub fn crc(data: &[u8]) -> u32 {
    let mut table = [0_u32; 256];
    for (index, slot) in table.iter_mut().enumerate() {
        let mut value = index as u32;
        for _ in 0..8 {
            value = if value & 1 != 0 {
                0xEDB8_8320 ^ (value >> 1)
            } else {
                value >> 1
            };
        }
        *slot = value;
    }
    data.iter().fold(0, |acc, &byte| {
        table[((acc ^ u32::from(byte)) & 0xFF) as usize] ^ (acc >> 8)
    })
}

pub fn sig(offset: u32, identifier: u32) -> u16 {
    let value = offset ^ identifier;
    (value >> 16) as u16 ^ (value as u16)
}

pub const PAGE_SIZE: usize = 512;
const BLOCK_TRAILER_SIZE: usize = 16;

/// Heap identifier of 0-based allocation `index` on the first heap page.
pub fn hid(index: u16) -> u32 {
    u32::from(index + 1) << 5
}

/// UTF-16LE bytes of `text`.
pub fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

/// A single-page heap-on-node image.
pub fn heap(client_signature: u8, user_root: u32, allocations: &[&[u8]]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&[0, 0]);
    data.push(0xEC);
    data.push(client_signature);
    data.extend_from_slice(&user_root.to_le_bytes());
    data.extend_from_slice(&0_u32.to_le_bytes());

    let mut offsets = vec![data.len() as u16];
    for allocation in allocations {
        data.extend_from_slice(allocation);
        offsets.push(data.len() as u16);
    }

    let map_offset = data.len() as u16;
    data[0..2].copy_from_slice(&map_offset.to_le_bytes());
    data.extend_from_slice(&(allocations.len() as u16).to_le_bytes());
    data.extend_from_slice(&0_u16.to_le_bytes());
    for offset in offsets {
        data.extend_from_slice(&offset.to_le_bytes());
    }
    data
}

/// A property-context heap: a two-level-free tree header plus sorted
/// records, with any referenced variable values as extra allocations.
pub struct PropertyBuilder {
    records: Vec<(u16, u16, u32)>,
    values: Vec<Vec<u8>>,
}

impl PropertyBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn inline(mut self, prop_id: u16, prop_type: u16, value: u32) -> Self {
        self.records.push((prop_id, prop_type, value));
        self
    }

    /// Store `bytes` as a heap allocation and reference it from the record.
    pub fn in_heap(mut self, prop_id: u16, prop_type: u16, bytes: Vec<u8>) -> Self {
        // Allocation 0 is the tree header, 1 the record leaf; values follow.
        let value_hid = hid(2 + self.values.len() as u16);
        self.values.push(bytes);
        self.records.push((prop_id, prop_type, value_hid));
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.records.sort_by_key(|&(prop_id, ..)| prop_id);

        let mut header = vec![0xB5, 2, 6, 0];
        header.extend_from_slice(&hid(1).to_le_bytes());

        let mut leaf = Vec::new();
        for (prop_id, prop_type, value) in &self.records {
            leaf.extend_from_slice(&prop_id.to_le_bytes());
            leaf.extend_from_slice(&prop_type.to_le_bytes());
            leaf.extend_from_slice(&value.to_le_bytes());
        }

        let mut allocations: Vec<&[u8]> = vec![&header, &leaf];
        for value in &self.values {
            allocations.push(value);
        }
        heap(0xBC, hid(0), &allocations)
    }
}

/// A one-to-two-column table-context heap whose rows live in the heap.
pub struct MatrixBuilder {
    columns: Vec<(u32, u16, u8, u8)>,
    rows: Vec<Vec<u8>>,
    values: Vec<Vec<u8>>,
    row_size: u16,
    bitmap_offset: u16,
}

impl MatrixBuilder {
    /// Columns are (tag, offset, size, presence bit); `value_end` is the end
    /// of the fixed value area.
    pub fn new(columns: Vec<(u32, u16, u8, u8)>, value_end: u16) -> Self {
        let bitmap_bytes = (columns.len() as u16).div_ceil(8);
        Self {
            columns,
            rows: Vec::new(),
            values: Vec::new(),
            row_size: value_end + bitmap_bytes,
            bitmap_offset: value_end,
        }
    }

    pub fn row(mut self, cells: Vec<u8>, bitmap: &[u8]) -> Self {
        let mut row = cells;
        row.resize(usize::from(self.bitmap_offset), 0);
        row.extend_from_slice(bitmap);
        assert_eq!(row.len(), usize::from(self.row_size));
        self.rows.push(row);
        self
    }

    /// Reserve a heap allocation for a variable value and return its heap
    /// identifier for use inside a row.
    pub fn value(&mut self, bytes: Vec<u8>) -> u32 {
        // Allocation 0 is the info block, 1 the row matrix; values follow.
        let value_hid = hid(2 + self.values.len() as u16);
        self.values.push(bytes);
        value_hid
    }

    pub fn build(self) -> Vec<u8> {
        let mut info = Vec::new();
        info.push(0x7C);
        info.push(self.columns.len() as u8);
        info.extend_from_slice(&self.bitmap_offset.to_le_bytes());
        info.extend_from_slice(&self.bitmap_offset.to_le_bytes());
        info.extend_from_slice(&self.bitmap_offset.to_le_bytes());
        info.extend_from_slice(&self.row_size.to_le_bytes());
        info.extend_from_slice(&0_u32.to_le_bytes());
        info.extend_from_slice(&hid(1).to_le_bytes());
        info.extend_from_slice(&0_u32.to_le_bytes());
        for &(tag, offset, size, bit) in &self.columns {
            info.extend_from_slice(&tag.to_le_bytes());
            info.extend_from_slice(&offset.to_le_bytes());
            info.push(size);
            info.push(bit);
        }

        let matrix: Vec<u8> = self.rows.concat();

        let mut allocations: Vec<&[u8]> = vec![&info, &matrix];
        for value in &self.values {
            allocations.push(value);
        }
        heap(0x7C, hid(0), &allocations)
    }
}

/// A leaf local-descriptor block: (key, data identifier, nested tree).
pub fn sub_node_leaf(entries: &[(u32, u64, u64)]) -> Vec<u8> {
    let mut data = vec![0x02, 0x00];
    data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    data.extend_from_slice(&0_u32.to_le_bytes());
    for &(key, data_id, sub_id) in entries {
        data.extend_from_slice(&u64::from(key).to_le_bytes());
        data.extend_from_slice(&data_id.to_le_bytes());
        data.extend_from_slice(&sub_id.to_le_bytes());
    }
    data
}

#[derive(Clone, Copy)]
pub struct NodeSpec {
    pub id: u32,
    pub data: u64,
    pub sub_nodes: u64,
    pub parent: u32,
}

/// Assembles the file image.
pub struct FileBuilder {
    image: Vec<u8>,
    /// (identifier, offset, payload size) of every placed block.
    blocks: Vec<(u64, u64, u16)>,
    encrypt: Option<fn(&mut [u8])>,
}

impl FileBuilder {
    pub fn new() -> Self {
        Self {
            // Nothing before the first allocation map page matters except
            // the header.
            image: vec![0; 0x4400],
            blocks: Vec::new(),
            encrypt: None,
        }
    }

    /// Apply `encrypt` to every external block payload before placing it.
    pub fn with_encryption(mut self, encrypt: fn(&mut [u8])) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    fn align(&mut self, granularity: usize) -> u64 {
        let offset = self.image.len().next_multiple_of(granularity);
        self.image.resize(offset, 0);
        offset as u64
    }

    /// Place a block image: payload, padding to the 64-byte grid, trailer.
    pub fn block(&mut self, identifier: u64, payload: &[u8]) -> u64 {
        let mut payload = payload.to_vec();
        if identifier & 1 == 0 {
            if let Some(encrypt) = self.encrypt {
                encrypt(&mut payload);
            }
        }

        let offset = self.align(64);
        let size = payload.len() as u16;
        let footprint =
            (usize::from(size) + BLOCK_TRAILER_SIZE).next_multiple_of(64);

        let mut image = vec![0_u8; footprint];
        image[..payload.len()].copy_from_slice(&payload);

        let mut trailer = Vec::new();
        trailer.extend_from_slice(&size.to_le_bytes());
        trailer.extend_from_slice(&sig(offset as u32, identifier as u32).to_le_bytes());
        trailer.extend_from_slice(&crc(&payload).to_le_bytes());
        trailer.extend_from_slice(&identifier.to_le_bytes());
        image[footprint - BLOCK_TRAILER_SIZE..].copy_from_slice(&trailer);

        self.image.extend_from_slice(&image);
        self.blocks.push((identifier, offset, size));
        offset
    }

    fn page(&mut self, kind: u8, back_pointer: u64, entries: &[u8], footer: [u8; 4]) -> u64 {
        let offset = self.align(PAGE_SIZE);
        let mut page = vec![0_u8; PAGE_SIZE];
        page[..entries.len()].copy_from_slice(entries);
        page[488..492].copy_from_slice(&footer);

        page[496] = kind;
        page[497] = kind;
        page[498..500].copy_from_slice(&sig(offset as u32, back_pointer as u32).to_le_bytes());
        let page_crc = crc(&page[..496]);
        page[500..504].copy_from_slice(&page_crc.to_le_bytes());
        page[504..512].copy_from_slice(&back_pointer.to_le_bytes());

        self.image.extend_from_slice(&page);
        offset
    }

    /// A leaf node index page listing `nodes`, which must be sorted.
    pub fn node_page(&mut self, back_pointer: u64, nodes: &[NodeSpec]) -> u64 {
        let mut entries = Vec::new();
        for node in nodes {
            entries.extend_from_slice(&u64::from(node.id).to_le_bytes());
            entries.extend_from_slice(&node.data.to_le_bytes());
            entries.extend_from_slice(&node.sub_nodes.to_le_bytes());
            entries.extend_from_slice(&node.parent.to_le_bytes());
            entries.extend_from_slice(&0_u32.to_le_bytes());
        }
        let footer = [nodes.len() as u8, 15, 32, 0];
        self.page(0x81, back_pointer, &entries, footer)
    }

    /// A leaf block index page listing every block placed so far, plus
    /// `extra` entries, sorted by identifier.
    pub fn block_page(&mut self, back_pointer: u64, extra: &[(u64, u64, u16)]) -> u64 {
        let mut blocks = self.blocks.clone();
        blocks.extend_from_slice(extra);
        blocks.sort_by_key(|&(identifier, ..)| identifier);

        let mut entries = Vec::new();
        for &(identifier, offset, size) in &blocks {
            entries.extend_from_slice(&identifier.to_le_bytes());
            entries.extend_from_slice(&offset.to_le_bytes());
            entries.extend_from_slice(&size.to_le_bytes());
            entries.extend_from_slice(&1_u16.to_le_bytes());
            entries.extend_from_slice(&0_u32.to_le_bytes());
        }
        let footer = [blocks.len() as u8, 20, 24, 0];
        self.page(0x80, back_pointer, &entries, footer)
    }

    /// Forget the blocks placed so far, so they stay out of the block index
    /// page. Recovery fixtures use this for unlinked blocks.
    pub fn unlink_blocks(&mut self) -> Vec<(u64, u64, u16)> {
        std::mem::take(&mut self.blocks)
    }

    /// Write the header and return the finished image.
    pub fn finish(
        mut self,
        crypt_method: u8,
        node_root: (u64, u64),
        block_root: (u64, u64),
    ) -> Vec<u8> {
        let file_size = self.image.len() as u64;

        let mut body = vec![0_u8; 516];
        body[0..2].copy_from_slice(b"SM");
        body[2..4].copy_from_slice(&23_u16.to_le_bytes());
        body[4..6].copy_from_slice(&19_u16.to_le_bytes());
        body[6] = 0x01;
        body[7] = 0x01;

        // The root structure: reserved, sizes, index roots, map validity.
        let root = &mut body[172..244];
        root[4..12].copy_from_slice(&file_size.to_le_bytes());
        root[36..44].copy_from_slice(&node_root.0.to_le_bytes());
        root[44..52].copy_from_slice(&node_root.1.to_le_bytes());
        root[52..60].copy_from_slice(&block_root.0.to_le_bytes());
        root[60..68].copy_from_slice(&block_root.1.to_le_bytes());
        root[68] = 0x02;

        body[504] = 0x80;
        body[505] = crypt_method;

        let crc_partial = crc(&body[..471]);
        let crc_full = crc(&body);

        self.image[0..4].copy_from_slice(b"!BDN");
        self.image[4..8].copy_from_slice(&crc_partial.to_le_bytes());
        self.image[8..524].copy_from_slice(&body);
        self.image[524..528].copy_from_slice(&crc_full.to_le_bytes());

        self.image
    }
}

pub mod props {
    pub const DISPLAY_NAME: u16 = 0x3001;
    pub const EMAIL_ADDRESS: u16 = 0x3003;
    pub const CONTENT_COUNT: u16 = 0x3602;
    pub const CONTAINER_CLASS: u16 = 0x3613;
    pub const MESSAGE_CLASS: u16 = 0x001A;
    pub const RECIPIENT_TYPE: u16 = 0x0C15;
    pub const BODY: u16 = 0x1000;
    pub const ROW_ID: u16 = 0x67F2;

    pub const TYPE_I32: u16 = 0x0003;
    pub const TYPE_UNICODE: u16 = 0x001F;
}

/// Sub-descriptor identifier of a message's recipients table.
pub const RECIPIENTS_DESCRIPTOR: u32 = 0x692;

/// The shared "mailbox" image: a store, a root folder with an Inbox, and a
/// message with a plain text body.
pub struct Mailbox {
    pub image: Vec<u8>,
    pub inbox_heap_offset: u64,
}

pub const STORE: u32 = 0x21;
pub const ROOT_FOLDER: u32 = 0x122;
pub const ROOT_HIERARCHY: u32 = ROOT_FOLDER + 11;
pub const INBOX: u32 = 0x2122;
pub const INBOX_CONTENTS: u32 = INBOX + 12;
pub const MESSAGE: u32 = 0x200024;

pub fn mailbox(crypt_method: u8, encrypt: Option<fn(&mut [u8])>) -> Mailbox {
    use props::*;

    let mut builder = FileBuilder::new();
    if let Some(encrypt) = encrypt {
        builder = builder.with_encryption(encrypt);
    }

    let store_heap = PropertyBuilder::new()
        .in_heap(DISPLAY_NAME, TYPE_UNICODE, utf16("Personal Folders"))
        .build();
    builder.block(0x104, &store_heap);

    let root_heap = PropertyBuilder::new()
        .in_heap(DISPLAY_NAME, TYPE_UNICODE, utf16("Top of Personal Folders"))
        .inline(CONTENT_COUNT, TYPE_I32, 0)
        .build();
    builder.block(0x108, &root_heap);

    let hierarchy_heap = {
        let mut matrix = MatrixBuilder::new(
            vec![
                ((u32::from(ROW_ID) << 16) | u32::from(TYPE_I32), 0, 4, 0),
                ((u32::from(DISPLAY_NAME) << 16) | u32::from(TYPE_UNICODE), 4, 4, 1),
            ],
            8,
        );
        let name = matrix.value(utf16("Inbox"));
        let mut cells = Vec::new();
        cells.extend_from_slice(&INBOX.to_le_bytes());
        cells.extend_from_slice(&name.to_le_bytes());
        matrix.row(cells, &[0b1100_0000]).build()
    };
    builder.block(0x10C, &hierarchy_heap);

    let inbox_heap = PropertyBuilder::new()
        .in_heap(DISPLAY_NAME, TYPE_UNICODE, utf16("Inbox"))
        .in_heap(CONTAINER_CLASS, TYPE_UNICODE, utf16("IPF.Note"))
        .inline(CONTENT_COUNT, TYPE_I32, 1)
        .build();
    let inbox_heap_offset = builder.block(0x110, &inbox_heap);

    let contents_heap = {
        let matrix = MatrixBuilder::new(
            vec![((u32::from(ROW_ID) << 16) | u32::from(TYPE_I32), 0, 4, 0)],
            4,
        );
        let mut cells = Vec::new();
        cells.extend_from_slice(&MESSAGE.to_le_bytes());
        matrix.row(cells, &[0b1000_0000]).build()
    };
    builder.block(0x114, &contents_heap);

    let message_heap = PropertyBuilder::new()
        .in_heap(MESSAGE_CLASS, TYPE_UNICODE, utf16("IPM.Note"))
        .in_heap(BODY, TYPE_UNICODE, utf16("Hello, world."))
        .build();
    builder.block(0x118, &message_heap);

    let recipients_heap = {
        let mut matrix = MatrixBuilder::new(
            vec![
                ((u32::from(ROW_ID) << 16) | u32::from(TYPE_I32), 0, 4, 0),
                ((u32::from(RECIPIENT_TYPE) << 16) | u32::from(TYPE_I32), 4, 4, 1),
                ((u32::from(EMAIL_ADDRESS) << 16) | u32::from(TYPE_UNICODE), 8, 4, 2),
            ],
            12,
        );
        let address = matrix.value(utf16("ana@example.com"));
        let mut cells = Vec::new();
        cells.extend_from_slice(&1_u32.to_le_bytes());
        cells.extend_from_slice(&1_u32.to_le_bytes());
        cells.extend_from_slice(&address.to_le_bytes());
        matrix.row(cells, &[0b1110_0000]).build()
    };
    builder.block(0x11C, &recipients_heap);
    builder.block(
        0x11F,
        &sub_node_leaf(&[(RECIPIENTS_DESCRIPTOR, 0x11C, 0)]),
    );

    let node_root = builder.node_page(
        0x41,
        &[
            NodeSpec { id: STORE, data: 0x104, sub_nodes: 0, parent: 0 },
            NodeSpec { id: ROOT_FOLDER, data: 0x108, sub_nodes: 0, parent: ROOT_FOLDER },
            NodeSpec { id: ROOT_HIERARCHY, data: 0x10C, sub_nodes: 0, parent: ROOT_FOLDER },
            NodeSpec { id: INBOX, data: 0x110, sub_nodes: 0, parent: ROOT_FOLDER },
            NodeSpec { id: INBOX_CONTENTS, data: 0x114, sub_nodes: 0, parent: INBOX },
            NodeSpec { id: MESSAGE, data: 0x118, sub_nodes: 0x11F, parent: INBOX },
        ],
    );
    let block_root = builder.block_page(0x42, &[]);

    let image = builder.finish(crypt_method, (0x41, node_root), (0x42, block_root));
    Mailbox {
        image,
        inbox_heap_offset,
    }
}
