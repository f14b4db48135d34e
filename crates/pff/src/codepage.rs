//! Windows codepage decoding.
//!
//! Narrow strings in the file carry no encoding of their own; the effective
//! codepage comes from the owning message or the file header. Decoding is
//! pluggable: callers may register a [`CodepageDecoder`] per codepage number,
//! and anything unregistered falls back to the `codepage-strings` tables.

use codepage_strings::Coding;
use std::{collections::HashMap, sync::Arc};

/// The codepage assumed when the header carries no usable hint.
pub const DEFAULT_ASCII_CODEPAGE: u16 = 1252;

pub trait CodepageDecoder: Send + Sync {
    /// Decode `bytes` (without terminator) into a string. Undecodable bytes
    /// are substituted, not fatal.
    fn decode(&self, bytes: &[u8]) -> String;
}

struct TableDecoder(Coding);

impl CodepageDecoder for TableDecoder {
    fn decode(&self, bytes: &[u8]) -> String {
        self.0.decode_lossy(bytes).into_owned()
    }
}

#[derive(Default)]
pub struct CodepageRegistry {
    decoders: HashMap<u16, Arc<dyn CodepageDecoder>>,
}

impl CodepageRegistry {
    pub fn register(&mut self, codepage: u16, decoder: Arc<dyn CodepageDecoder>) {
        self.decoders.insert(codepage, decoder);
    }

    /// Decode with the decoder registered for `codepage`, or the built-in
    /// table for it. `None` means the codepage is unknown to both.
    pub fn decode(&self, codepage: u16, bytes: &[u8]) -> Option<String> {
        if let Some(decoder) = self.decoders.get(&codepage) {
            return Some(decoder.decode(bytes));
        }
        Coding::new(codepage)
            .ok()
            .map(|coding| coding.decode_lossy(bytes).into_owned())
    }
}
