//! Permutative scrambling.
//!
//! A fixed byte-for-byte substitution; decryption applies the inverse table.

use super::*;

/// Decode a block payload in place.
pub fn decrypt_buffer(data: &mut [u8]) {
    substitute(data, decrypt_table());
}

/// Encode a block payload in place. The reader never writes blocks; this is
/// the inverse used by round-trip tests and fixture builders.
pub fn encrypt_buffer(data: &mut [u8]) {
    substitute(data, encrypt_table());
}

fn substitute(data: &mut [u8], table: &[u8; 256]) {
    for byte in data.iter_mut() {
        *byte = table[*byte as usize];
    }
}
