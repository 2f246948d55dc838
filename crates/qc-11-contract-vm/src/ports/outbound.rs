//! # Driven Ports (SPI - Outbound)
//!
//! What the engine needs from its surroundings: account state with nested
//! checkpoints, and the hashes of recent blocks.
//!
//! ## Architecture Compliance
//!
//! - Dependencies point INWARD (adapters implement these traits)
//! - The engine never touches persistence directly

use crate::domain::value_objects::{Address, Hash, U256};
use crate::domain::word::Word;

// =============================================================================
// ACCOUNT STATE
// =============================================================================

/// Account state as seen by one transaction.
///
/// Checkpoints nest: every [`start_tracking`](Repository::start_tracking) opens a
/// layer that reads through to the layers below it, and is closed by exactly
/// one [`commit`](Repository::commit) (fold into the layer below) or
/// [`rollback`](Repository::rollback) (discard).
pub trait Repository: Send {
    /// True if the account was ever created or credited.
    fn exists(&self, address: Address) -> bool;

    /// Balance, zero for a missing account.
    fn get_balance(&self, address: Address) -> U256;

    /// Credits `value`, creating the account if needed.
    fn add_balance(&mut self, address: Address, value: U256);

    /// Debits `value`, saturating at zero. Callers check the balance first.
    fn sub_balance(&mut self, address: Address, value: U256);

    /// Nonce, zero for a missing account.
    fn get_nonce(&self, address: Address) -> u64;

    /// Increments the nonce and returns the new value.
    fn increase_nonce(&mut self, address: Address) -> u64;

    /// Overwrites the nonce.
    fn set_nonce(&mut self, address: Address, nonce: u64);

    /// Code, empty for a missing account.
    fn get_code(&self, address: Address) -> Vec<u8>;

    /// Installs code.
    fn save_code(&mut self, address: Address, code: Vec<u8>);

    /// Storage slot, `None` if empty.
    fn get_storage_row(&self, address: Address, key: Word) -> Option<Word>;

    /// Writes a storage slot. Storing zero empties it.
    fn put_storage_row(&mut self, address: Address, key: Word, value: Word);

    /// Removes the account with its code and storage.
    fn delete(&mut self, address: Address);

    /// Opens a checkpoint.
    fn start_tracking(&mut self);

    /// Folds the innermost checkpoint into the one below.
    fn commit(&mut self);

    /// Discards the innermost checkpoint.
    fn rollback(&mut self);

    /// Moves `value` from `from` to `to`.
    fn transfer(&mut self, from: Address, to: Address, value: U256) {
        self.sub_balance(from, value);
        self.add_balance(to, value);
    }
}

// =============================================================================
// BLOCK HASHES
// =============================================================================

/// Hashes of past blocks, read by BLOCKHASH.
pub trait BlockStore: Send + Sync {
    /// Hash of block `number`, zero if unknown.
    fn block_hash_by_number(&self, number: u64) -> Hash;
}
