//! File header decoding.
//!
//! The header is a fixed-size structure at offset zero. A magic sequence and
//! a client magic identify the family member, the version word selects the
//! integer widths, and two CRCs guard the body. The 32-bit and 64-bit
//! layouts interleave the same fields in different orders, so the decoder
//! branches once on the version and fills a single [`Header`].

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};
use tracing::warn;

use super::{block_id::BlockId, *};
use crate::{crc::compute_crc, source::ByteSource, PffError, Result};

const HEADER_MAGIC: u32 = u32::from_be_bytes(*b"NDB!");
const CLIENT_MAGIC_STORE: u16 = u16::from_be_bytes(*b"MS");
const CLIENT_MAGIC_ADDRESS_BOOK: u16 = u16::from_be_bytes(*b"BA");

const CLIENT_VERSION: u16 = 19;
const SENTINEL: u8 = 0x80;

/// Bytes covered by the partial CRC, starting at the client magic.
const PARTIAL_CRC_SIZE: usize = 471;
/// Bytes covered by the 64-bit full CRC, starting at the client magic.
const FULL_CRC_SIZE: usize = 516;
/// Size of the CRC-protected body in the 32-bit layout.
const BODY_SIZE_32: usize = 504;

/// Total bytes the decoder needs from the start of the file.
pub const HEADER_READ_SIZE: usize = 564;

/// Location of one index B-tree root: the page's file offset and the
/// back-pointer its trailer must repeat.
#[derive(Copy, Clone, Default, Debug)]
pub struct IndexRoot {
    pub identifier: u64,
    pub offset: u64,
}

impl IndexRoot {
    fn read(f: &mut dyn Read, profile: &FormatProfile) -> std::io::Result<Self> {
        let identifier = profile.read_identifier(f)?;
        let offset = profile.read_identifier(f)?;
        Ok(Self { identifier, offset })
    }
}

/// The root structure embedded in the header: end-of-file index, allocation
/// map state, and the two index B-tree roots.
#[derive(Copy, Clone, Default, Debug)]
pub struct RootInfo {
    pub file_size: u64,
    pub last_allocation_map_offset: u64,
    pub free_size: u64,
    pub free_page_size: u64,
    pub node_index: IndexRoot,
    pub block_index: IndexRoot,
    pub allocation_map_valid: bool,
}

impl RootInfo {
    fn read(f: &mut dyn Read, profile: &FormatProfile) -> std::io::Result<Self> {
        // dwReserved
        let _ = f.read_u32::<LittleEndian>()?;
        let file_size = profile.read_identifier(f)?;
        let last_allocation_map_offset = profile.read_identifier(f)?;
        let free_size = profile.read_identifier(f)?;
        let free_page_size = profile.read_identifier(f)?;
        let node_index = IndexRoot::read(f, profile)?;
        let block_index = IndexRoot::read(f, profile)?;
        let allocation_map_valid = matches!(f.read_u8()?, 0x01 | 0x02);
        let _ = f.read_u8()?;
        let _ = f.read_u16::<LittleEndian>()?;
        Ok(Self {
            file_size,
            last_allocation_map_offset,
            free_size,
            free_page_size,
            node_index,
            block_index,
            allocation_map_valid,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Header {
    pub variant: FormatVariant,
    pub encryption: EncryptionKind,
    pub root: RootInfo,
    pub next_block: BlockId,
}

impl Header {
    /// Decode the header and derive the [`FormatProfile`] the rest of the
    /// reader runs on.
    pub fn read(source: &dyn ByteSource) -> Result<(Self, FormatProfile)> {
        let mut prefix = [0_u8; 12];
        source.read_at(0, &mut prefix)?;
        let mut cursor = Cursor::new(prefix.as_slice());

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != HEADER_MAGIC {
            return Err(NdbError::InvalidHeaderMagic(magic).into());
        }

        let crc_partial = cursor.read_u32::<LittleEndian>()?;

        let client_magic = cursor.read_u16::<LittleEndian>()?;
        let version = cursor.read_u16::<LittleEndian>()?;

        let variant = match (client_magic, version) {
            (CLIENT_MAGIC_ADDRESS_BOOK, 14 | 15) => FormatVariant::Pab,
            (CLIENT_MAGIC_STORE, 14 | 15) => FormatVariant::Pst32,
            (CLIENT_MAGIC_STORE, 21) => FormatVariant::Ost64,
            (CLIENT_MAGIC_STORE, 23) => FormatVariant::Pst64,
            (CLIENT_MAGIC_STORE | CLIENT_MAGIC_ADDRESS_BOOK, version) => {
                return Err(NdbError::UnsupportedFormatVersion(version).into());
            }
            (invalid, _) => {
                return Err(NdbError::InvalidClientMagic(invalid).into());
            }
        };
        let profile = FormatProfile::new(variant);

        let header = if profile.is_64bit() {
            Self::read_64(source, crc_partial, variant)?
        } else {
            Self::read_32(source, crc_partial, variant)?
        };

        Ok((header, profile))
    }

    fn read_64(source: &dyn ByteSource, crc_partial: u32, variant: FormatVariant) -> Result<Self> {
        let profile = FormatProfile::new(variant);
        let body = source.read_vec(8, FULL_CRC_SIZE + 4)?;

        let computed = compute_crc(0, &body[..PARTIAL_CRC_SIZE]);
        if crc_partial != computed {
            return Err(NdbError::InvalidHeaderPartialCrc {
                stored: crc_partial,
                computed,
            }
            .into());
        }

        let mut cursor = Cursor::new(&body[..FULL_CRC_SIZE]);
        let crc_full = {
            let mut tail = Cursor::new(&body[FULL_CRC_SIZE..]);
            tail.read_u32::<LittleEndian>()?
        };
        let computed = compute_crc(0, &body[..FULL_CRC_SIZE]);
        if crc_full != computed {
            return Err(NdbError::InvalidHeaderFullCrc {
                stored: crc_full,
                computed,
            }
            .into());
        }

        // wMagicClient, wVer: already decoded by the caller.
        cursor.seek(SeekFrom::Start(4))?;

        let client_version = cursor.read_u16::<LittleEndian>()?;
        if client_version != CLIENT_VERSION {
            warn!(
                name: "PffUnexpectedClientVersion",
                client_version,
                "header carries an unexpected client version"
            );
        }

        // bPlatformCreate, bPlatformAccess
        let _ = cursor.read_u8()?;
        let _ = cursor.read_u8()?;

        // dwReserved1, dwReserved2
        let _ = cursor.read_u32::<LittleEndian>()?;
        let _ = cursor.read_u32::<LittleEndian>()?;

        // bidUnused, bidNextP
        let _ = cursor.read_u64::<LittleEndian>()?;
        let _ = cursor.read_u64::<LittleEndian>()?;

        // dwUnique
        let _ = cursor.read_u32::<LittleEndian>()?;

        // rgnid
        cursor.seek(SeekFrom::Current(32 * 4))?;

        // qwUnused
        let _ = cursor.read_u64::<LittleEndian>()?;

        let root = RootInfo::read(&mut cursor, &profile)?;

        // dwAlign
        let _ = cursor.read_u32::<LittleEndian>()?;

        // rgbFM, rgbFP
        cursor.seek(SeekFrom::Current(128 + 128))?;

        let sentinel = cursor.read_u8()?;
        if sentinel != SENTINEL {
            return Err(NdbError::InvalidHeaderSentinel(sentinel).into());
        }

        let encryption = EncryptionKind::try_from(cursor.read_u8()?).map_err(PffError::from)?;

        // rgbReserved
        let _ = cursor.read_u16::<LittleEndian>()?;

        let next_block = BlockId::read(&mut cursor, &profile)?;

        Ok(Self {
            variant,
            encryption,
            root,
            next_block,
        })
    }

    fn read_32(source: &dyn ByteSource, crc_partial: u32, variant: FormatVariant) -> Result<Self> {
        let profile = FormatProfile::new(variant);
        let body = source.read_vec(8, BODY_SIZE_32)?;

        let computed = compute_crc(0, &body[..PARTIAL_CRC_SIZE]);
        if crc_partial != computed {
            return Err(NdbError::InvalidHeaderPartialCrc {
                stored: crc_partial,
                computed,
            }
            .into());
        }

        let mut cursor = Cursor::new(body.as_slice());

        // wMagicClient, wVer
        cursor.seek(SeekFrom::Start(4))?;

        let client_version = cursor.read_u16::<LittleEndian>()?;
        if client_version != CLIENT_VERSION {
            warn!(
                name: "PffUnexpectedClientVersion",
                client_version,
                "header carries an unexpected client version"
            );
        }

        // bPlatformCreate, bPlatformAccess
        let _ = cursor.read_u8()?;
        let _ = cursor.read_u8()?;

        // dwReserved1, dwReserved2
        let _ = cursor.read_u32::<LittleEndian>()?;
        let _ = cursor.read_u32::<LittleEndian>()?;

        // bidNextB
        let next_block = BlockId::read(&mut cursor, &profile)?;

        // bidNextP
        let _ = cursor.read_u32::<LittleEndian>()?;

        // dwUnique
        let _ = cursor.read_u32::<LittleEndian>()?;

        // rgnid
        cursor.seek(SeekFrom::Current(32 * 4))?;

        let root = RootInfo::read(&mut cursor, &profile)?;

        // rgbFM, rgbFP
        cursor.seek(SeekFrom::Current(128 + 128))?;

        let sentinel = cursor.read_u8()?;
        if sentinel != SENTINEL {
            return Err(NdbError::InvalidHeaderSentinel(sentinel).into());
        }

        let encryption = EncryptionKind::try_from(cursor.read_u8()?).map_err(PffError::from)?;

        Ok(Self {
            variant,
            encryption,
            root,
            next_block,
        })
    }
}
