//! # Precompiled Contracts
//!
//! Native functions bound to reserved low addresses. A call to one of them is
//! priced by [`PrecompiledContract::gas_for_data`] and answered by
//! [`PrecompiledContract::execute`] without entering the interpreter.
//!
//! Which addresses are live is chosen by [`PrecompileSet`]: the standard set
//! binds only the identity function, the extended set adds SHA-256.

pub mod identity;
pub mod sha256;

use crate::domain::services::precompiles;
use crate::domain::value_objects::Address;
use serde::{Deserialize, Serialize};

/// A native contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrecompiledContract {
    /// SHA-256 digest (0x02).
    Sha256,
    /// Data copy (0x04).
    Identity,
}

impl PrecompiledContract {
    /// Reserved address of the contract.
    #[must_use]
    pub const fn address(self) -> Address {
        match self {
            Self::Sha256 => precompiles::SHA256,
            Self::Identity => precompiles::IDENTITY,
        }
    }

    /// Gas required to process `input`.
    #[must_use]
    pub fn gas_for_data(self, input: &[u8]) -> u64 {
        match self {
            Self::Sha256 => sha256::gas_for_data(input),
            Self::Identity => identity::gas_for_data(input),
        }
    }

    /// Runs the contract, returning the success flag and output.
    #[must_use]
    pub fn execute(self, input: &[u8]) -> (bool, Vec<u8>) {
        match self {
            Self::Sha256 => (true, sha256::execute(input)),
            Self::Identity => (true, identity::execute(input)),
        }
    }
}

/// Registry of live precompiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecompileSet {
    /// Identity only.
    #[default]
    Standard,
    /// Identity and SHA-256.
    Extended,
}

impl PrecompileSet {
    /// Contracts of the set.
    #[must_use]
    pub fn contracts(self) -> &'static [PrecompiledContract] {
        match self {
            Self::Standard => &[PrecompiledContract::Identity],
            Self::Extended => &[PrecompiledContract::Sha256, PrecompiledContract::Identity],
        }
    }

    /// The contract bound to `address`, if any.
    #[must_use]
    pub fn lookup(self, address: Address) -> Option<PrecompiledContract> {
        self.contracts()
            .iter()
            .copied()
            .find(|c| c.address() == address)
    }

    /// True if `address` is bound to a contract of the set.
    #[must_use]
    pub fn contains(self, address: Address) -> bool {
        self.lookup(address).is_some()
    }
}

// =============================================================================
// TESTS
// =============================================================================
