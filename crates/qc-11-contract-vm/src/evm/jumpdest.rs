//! # Jump Destination Analysis
//!
//! One pass over a code blob marks every JUMPDEST byte that is an instruction
//! rather than PUSH immediate data. The resulting bitset is immutable and is
//! shared between all frames running the same code.

use crate::domain::services::keccak256;
use crate::domain::value_objects::Hash;
use crate::evm::opcodes::Opcode;
use std::collections::HashMap;
use std::sync::Arc;

/// Valid jump targets of one code blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JumpDestinations {
    bits: Vec<u64>,
    len: usize,
}

impl JumpDestinations {
    /// Analyzes `code`.
    #[must_use]
    pub fn analyze(code: &[u8]) -> Self {
        let mut bits = vec![0u64; code.len().div_ceil(64)];
        let mut pc = 0;
        while pc < code.len() {
            match Opcode::from_byte(code[pc]) {
                Some(Opcode::JumpDest) => bits[pc / 64] |= 1 << (pc % 64),
                Some(op) => {
                    if let Some(size) = op.push_size() {
                        pc += size;
                    }
                }
                None => {}
            }
            pc += 1;
        }
        Self {
            bits,
            len: code.len(),
        }
    }

    /// True if `pc` holds a JUMPDEST instruction.
    #[must_use]
    pub fn is_valid(&self, pc: usize) -> bool {
        pc < self.len && self.bits[pc / 64] & (1 << (pc % 64)) != 0
    }

    /// Number of valid targets.
    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Analyses keyed by code hash, so each blob is scanned at most once.
#[derive(Debug, Default)]
pub struct JumpDestCache {
    entries: HashMap<Hash, Arc<JumpDestinations>>,
}

impl JumpDestCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the analysis of `code`, computing it on first use.
    pub fn get(&mut self, code: &[u8]) -> Arc<JumpDestinations> {
        let key = keccak256(code);
        Arc::clone(
            self.entries
                .entry(key)
                .or_insert_with(|| Arc::new(JumpDestinations::analyze(code))),
        )
    }

    /// Number of distinct blobs analyzed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been analyzed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
