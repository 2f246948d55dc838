//! # Frame Memory
//!
//! Byte-addressable scratch space that grows in 32-byte chunks. Growth is paid
//! for up front by the gas model in [`crate::evm::gas`]; the operations here
//! only move bytes.
//!
//! Reads extend memory just like writes do, so a frame's `MSIZE` reflects the
//! highest word it ever touched.

use crate::domain::word::{Word, WORD_SIZE};

/// Memory of one frame. Its length is always a multiple of 32.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Current size in bytes (the `MSIZE` value).
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been touched yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grows to cover `[offset, offset + size)`, rounded up to a word.
    ///
    /// A zero `size` never grows memory, whatever the offset.
    pub fn extend(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let needed = offset.saturating_add(size);
        if needed > self.data.len() {
            let rounded = needed.div_ceil(WORD_SIZE).saturating_mul(WORD_SIZE);
            self.data.resize(rounded, 0);
        }
    }

    /// Reads `size` bytes at `offset`, extending memory first.
    pub fn read(&mut self, offset: usize, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        self.extend(offset, size);
        self.data[offset..offset + size].to_vec()
    }

    /// Reads the word at `offset`, extending memory first.
    pub fn read_word(&mut self, offset: usize) -> Word {
        Word::from_be_slice(&self.read(offset, WORD_SIZE))
    }

    /// Writes the first `size` bytes of `data` at `offset`.
    ///
    /// `size` is clamped to `data.len()`. An unlimited write extends memory; a
    /// limited write is truncated at the current memory size instead.
    pub fn write(&mut self, offset: usize, data: &[u8], size: usize, limited: bool) {
        let mut size = size.min(data.len());
        if !limited {
            self.extend(offset, size);
        }
        if limited && offset.saturating_add(size) > self.data.len() {
            size = self.data.len().saturating_sub(offset);
        }
        if size > 0 {
            self.data[offset..offset + size].copy_from_slice(&data[..size]);
        }
    }

    /// Writes a full word at `offset`.
    pub fn write_word(&mut self, offset: usize, word: Word) {
        self.write(offset, &word.to_bytes(), WORD_SIZE, false);
    }

    /// Writes a single byte at `offset`.
    pub fn write_byte(&mut self, offset: usize, byte: u8) {
        self.write(offset, &[byte], 1, false);
    }

    /// The raw contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

// =============================================================================
// TESTS
// =============================================================================
