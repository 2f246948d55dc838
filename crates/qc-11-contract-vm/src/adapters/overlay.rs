//! # Copy-on-Write State Layers
//!
//! A checkpoint is a [`StateLayer`] holding only what changed since it was
//! opened. Reads fall through the layers from newest to oldest and finally hit
//! the committed [`StateBase`]. Committing drains a layer into the one below;
//! rolling back drops it.

use crate::domain::value_objects::{Address, U256};
use crate::domain::word::Word;
use std::collections::{HashMap, HashSet};

/// Balance, nonce and code of one account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountState {
    /// Balance in wei.
    pub balance: U256,
    /// Transaction / creation counter.
    pub nonce: u64,
    /// Contract code, empty for plain accounts.
    pub code: Vec<u8>,
}

/// Outcome of looking a key up in one layer.
enum Lookup<T> {
    /// The layer decides the value.
    Found(T),
    /// The layer says nothing; ask the next one.
    Miss,
}

/// Committed state under all checkpoints.
#[derive(Clone, Debug, Default)]
pub struct StateBase {
    pub(crate) accounts: HashMap<Address, AccountState>,
    pub(crate) storage: HashMap<(Address, Word), Word>,
}

impl StateBase {
    fn apply(&mut self, layer: StateLayer) {
        for address in layer.wiped {
            self.storage.retain(|(owner, _), _| *owner != address);
        }
        for (address, account) in layer.accounts {
            match account {
                Some(account) => {
                    self.accounts.insert(address, account);
                }
                None => {
                    self.accounts.remove(&address);
                }
            }
        }
        for (slot, value) in layer.storage {
            if value.is_zero() {
                self.storage.remove(&slot);
            } else {
                self.storage.insert(slot, value);
            }
        }
    }
}

/// Pending changes of one checkpoint.
#[derive(Clone, Debug, Default)]
pub struct StateLayer {
    /// `None` marks a deleted account.
    accounts: HashMap<Address, Option<AccountState>>,
    /// A zero value marks an emptied slot.
    storage: HashMap<(Address, Word), Word>,
    /// Accounts whose older storage is gone.
    wiped: HashSet<Address>,
}

impl StateLayer {
    fn account(&self, address: Address) -> Lookup<Option<&AccountState>> {
        match self.accounts.get(&address) {
            Some(entry) => Lookup::Found(entry.as_ref()),
            None => Lookup::Miss,
        }
    }

    fn storage(&self, address: Address, key: Word) -> Lookup<Option<Word>> {
        if let Some(value) = self.storage.get(&(address, key)) {
            return Lookup::Found((!value.is_zero()).then_some(*value));
        }
        if self.wiped.contains(&address) {
            return Lookup::Found(None);
        }
        Lookup::Miss
    }

    fn delete(&mut self, address: Address) {
        self.accounts.insert(address, None);
        self.storage.retain(|(owner, _), _| *owner != address);
        self.wiped.insert(address);
    }

    fn absorb(&mut self, child: Self) {
        for address in child.wiped {
            self.storage.retain(|(owner, _), _| *owner != address);
            self.wiped.insert(address);
        }
        self.accounts.extend(child.accounts);
        self.storage.extend(child.storage);
    }
}

/// The committed base plus a stack of open checkpoints.
#[derive(Clone, Debug, Default)]
pub struct LayeredState {
    base: StateBase,
    layers: Vec<StateLayer>,
}

impl LayeredState {
    /// Number of open checkpoints.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Account as seen from the innermost checkpoint.
    #[must_use]
    pub fn account(&self, address: Address) -> Option<&AccountState> {
        for layer in self.layers.iter().rev() {
            if let Lookup::Found(entry) = layer.account(address) {
                return entry;
            }
        }
        self.base.accounts.get(&address)
    }

    /// Storage slot as seen from the innermost checkpoint.
    #[must_use]
    pub fn storage(&self, address: Address, key: Word) -> Option<Word> {
        for layer in self.layers.iter().rev() {
            if let Lookup::Found(value) = layer.storage(address, key) {
                return value;
            }
        }
        self.base.storage.get(&(address, key)).copied()
    }

    /// Applies `f` to a copy of the account and records the result.
    pub fn update_account(&mut self, address: Address, f: impl FnOnce(&mut AccountState)) {
        let mut account = self.account(address).cloned().unwrap_or_default();
        f(&mut account);
        match self.layers.last_mut() {
            Some(layer) => {
                layer.accounts.insert(address, Some(account));
            }
            None => {
                self.base.accounts.insert(address, account);
            }
        }
    }

    /// Records a storage write.
    pub fn put_storage(&mut self, address: Address, key: Word, value: Word) {
        match self.layers.last_mut() {
            Some(layer) => {
                layer.storage.insert((address, key), value);
            }
            None if value.is_zero() => {
                self.base.storage.remove(&(address, key));
            }
            None => {
                self.base.storage.insert((address, key), value);
            }
        }
    }

    /// Records an account deletion.
    pub fn delete(&mut self, address: Address) {
        match self.layers.last_mut() {
            Some(layer) => layer.delete(address),
            None => {
                let mut layer = StateLayer::default();
                layer.delete(address);
                self.base.apply(layer);
            }
        }
    }

    /// Opens a checkpoint.
    pub fn push_layer(&mut self) {
        self.layers.push(StateLayer::default());
    }

    /// Drains the innermost checkpoint into the one below. Returns false if
    /// none was open.
    pub fn commit_layer(&mut self) -> bool {
        let Some(layer) = self.layers.pop() else {
            return false;
        };
        match self.layers.last_mut() {
            Some(parent) => parent.absorb(layer),
            None => self.base.apply(layer),
        }
        true
    }

    /// Drops the innermost checkpoint. Returns false if none was open.
    pub fn rollback_layer(&mut self) -> bool {
        self.layers.pop().is_some()
    }

    /// Committed accounts, ignoring open checkpoints.
    #[must_use]
    pub fn base(&self) -> &StateBase {
        &self.base
    }
}

// =============================================================================
// TESTS
// =============================================================================
