//! # State Adapter
//!
//! In-memory [`Repository`] over a [`LayeredState`]. Used by tests, by the
//! service, and by anything that keeps world state in process.

use crate::adapters::overlay::{AccountState, LayeredState};
use crate::domain::value_objects::{Address, Hash, U256};
use crate::domain::word::Word;
use crate::ports::outbound::{BlockStore, Repository};
use std::collections::HashMap;
use tracing::warn;

/// In-memory account state with nested checkpoints.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRepository {
    state: LayeredState,
}

impl InMemoryRepository {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the balance of an address.
    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.state.update_account(address, |acc| acc.balance = balance);
    }

    /// Installs code at an address.
    pub fn set_code(&mut self, address: Address, code: Vec<u8>) {
        self.state.update_account(address, |acc| acc.code = code);
    }

    /// Account as seen from the innermost checkpoint.
    #[must_use]
    pub fn account(&self, address: Address) -> Option<AccountState> {
        self.state.account(address).cloned()
    }

    /// Number of open checkpoints.
    #[must_use]
    pub fn checkpoint_depth(&self) -> usize {
        self.state.depth()
    }
}

impl Repository for InMemoryRepository {
    fn exists(&self, address: Address) -> bool {
        self.state.account(address).is_some()
    }

    fn get_balance(&self, address: Address) -> U256 {
        self.state
            .account(address)
            .map_or_else(U256::zero, |acc| acc.balance)
    }

    fn add_balance(&mut self, address: Address, value: U256) {
        self.state
            .update_account(address, |acc| acc.balance = acc.balance.saturating_add(value));
    }

    fn sub_balance(&mut self, address: Address, value: U256) {
        self.state
            .update_account(address, |acc| acc.balance = acc.balance.saturating_sub(value));
    }

    fn get_nonce(&self, address: Address) -> u64 {
        self.state.account(address).map_or(0, |acc| acc.nonce)
    }

    fn increase_nonce(&mut self, address: Address) -> u64 {
        self.state
            .update_account(address, |acc| acc.nonce = acc.nonce.saturating_add(1));
        self.get_nonce(address)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.state.update_account(address, |acc| acc.nonce = nonce);
    }

    fn get_code(&self, address: Address) -> Vec<u8> {
        self.state
            .account(address)
            .map(|acc| acc.code.clone())
            .unwrap_or_default()
    }

    fn save_code(&mut self, address: Address, code: Vec<u8>) {
        self.set_code(address, code);
    }

    fn get_storage_row(&self, address: Address, key: Word) -> Option<Word> {
        self.state.storage(address, key)
    }

    fn put_storage_row(&mut self, address: Address, key: Word, value: Word) {
        self.state.put_storage(address, key, value);
    }

    fn delete(&mut self, address: Address) {
        self.state.delete(address);
    }

    fn start_tracking(&mut self) {
        self.state.push_layer();
    }

    fn commit(&mut self) {
        if !self.state.commit_layer() {
            warn!("commit without an open checkpoint");
        }
    }

    fn rollback(&mut self) {
        if !self.state.rollback_layer() {
            warn!("rollback without an open checkpoint");
        }
    }
}

// =============================================================================
// BLOCK STORE
// =============================================================================

/// Block hashes kept in a map.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBlockStore {
    hashes: HashMap<u64, Hash>,
}

impl InMemoryBlockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the hash of block `number`.
    pub fn insert(&mut self, number: u64, hash: Hash) {
        self.hashes.insert(number, hash);
    }
}

impl BlockStore for InMemoryBlockStore {
    fn block_hash_by_number(&self, number: u64) -> Hash {
        self.hashes.get(&number).copied().unwrap_or(Hash::ZERO)
    }
}

// =============================================================================
// TESTS
// =============================================================================
