//! Physical block reads.
//!
//! A block's location and size come from the block index; the bytes on disk
//! are the payload, padding out to a 64-byte boundary, and a trailer holding
//! the payload size, a 16-bit signature, a CRC, and the block's own
//! identifier repeated as a back-pointer. Payloads of non-internal blocks
//! are scrambled per the header's encryption byte.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use super::{block_id::BlockId, page::BlockEntry, *};
use crate::{block_sig::compute_sig, crc::compute_crc, crypt, source::ByteSource, Result};

/// Hard cap on a single physical block, applied before allocating the read
/// buffer. Well-formed files stay at or under the 8 KiB footprint; recovery
/// can feed the reader arbitrary candidate sizes.
pub const MAX_PHYSICAL_BLOCK: u32 = 8 * 1024 * 1024;

#[derive(Copy, Clone, Debug)]
pub struct BlockTrailer {
    pub size: u16,
    pub signature: u16,
    pub crc: u32,
    pub back_pointer: BlockId,
}

impl BlockTrailer {
    pub fn read(f: &mut dyn Read, profile: &FormatProfile) -> Result<Self> {
        let size = f.read_u16::<LittleEndian>()?;
        let signature = f.read_u16::<LittleEndian>()?;

        let (crc, back_pointer) = if profile.is_64bit() {
            let crc = f.read_u32::<LittleEndian>()?;
            let back_pointer = BlockId::read(f, profile)?;
            (crc, back_pointer)
        } else {
            let back_pointer = BlockId::read(f, profile)?;
            let crc = f.read_u32::<LittleEndian>()?;
            (crc, back_pointer)
        };

        Ok(Self {
            size,
            signature,
            crc,
            back_pointer,
        })
    }
}

/// Read, verify, and decrypt the block described by `entry`.
///
/// Internal blocks hold format metadata and are returned verbatim; external
/// blocks are unscrambled according to `encryption`.
pub fn read_block(
    source: &dyn ByteSource,
    profile: &FormatProfile,
    encryption: EncryptionKind,
    entry: &BlockEntry,
) -> Result<Vec<u8>> {
    let size = entry.size;
    if size == 0 || size > profile.max_block_payload {
        return Err(NdbError::InvalidBlockSize(size).into());
    }
    if u32::from(size) > MAX_PHYSICAL_BLOCK {
        return Err(NdbError::BlockTooLarge(u32::from(size)).into());
    }

    let footprint = usize::from(profile.block_footprint(size));
    let raw = source.read_vec(entry.offset, footprint)?;

    let trailer_offset = footprint - usize::from(profile.block_trailer_size);
    let mut cursor = Cursor::new(&raw[trailer_offset..]);
    let trailer = BlockTrailer::read(&mut cursor, profile)?;

    if trailer.size != size {
        return Err(NdbError::InvalidBlockSize(trailer.size).into());
    }

    if trailer.back_pointer != entry.block {
        return Err(NdbError::BlockBackPointerMismatch {
            expected: entry.block.raw(),
            found: trailer.back_pointer.raw(),
        }
        .into());
    }

    let signature = compute_sig(entry.offset as u32, entry.block.raw() as u32);
    if signature != trailer.signature {
        return Err(NdbError::InvalidBlockSignature(trailer.signature).into());
    }

    let mut data = raw[..usize::from(size)].to_vec();
    let crc = compute_crc(0, &data);
    if crc != trailer.crc {
        return Err(NdbError::InvalidBlockCrc {
            stored: trailer.crc,
            computed: crc,
        }
        .into());
    }

    if !entry.block.is_internal() {
        match encryption {
            EncryptionKind::None => {}
            EncryptionKind::Permute => crypt::permute::decrypt_buffer(&mut data),
            EncryptionKind::Cyclic => {
                crypt::cyclic::crypt_buffer(&mut data, entry.block.cyclic_key())
            }
        }
    }

    Ok(data)
}
