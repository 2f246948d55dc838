//! # Domain Services
//!
//! Pure, deterministic helpers shared by the engine and the transaction
//! executor: hashing and contract address derivation.

use crate::domain::value_objects::{Address, Hash};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

// =============================================================================
// CONTRACT ADDRESS COMPUTATION
// =============================================================================

/// Computes the address of a contract created by `sender` at `nonce`.
///
/// Address = keccak256(sender ‖ `nonce` as 8 big-endian bytes)\[12:\]
///
/// The nonce is fixed-width rather than RLP-encoded.
#[must_use]
pub fn compute_contract_address(sender: Address, nonce: u64) -> Address {
    let mut preimage = [0u8; 28];
    preimage[..20].copy_from_slice(sender.as_bytes());
    preimage[20..].copy_from_slice(&nonce.to_be_bytes());

    let hash = Keccak256::digest(preimage);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..32]);
    Address::new(addr)
}

// =============================================================================
// HASHING
// =============================================================================

/// Computes the Keccak-256 digest of `data`.
#[must_use]
pub fn keccak256(data: &[u8]) -> Hash {
    Hash::new(Keccak256::digest(data).into())
}

/// Computes the SHA-256 digest of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> Hash {
    Hash::new(Sha256::digest(data).into())
}

// =============================================================================
// PRECOMPILE ADDRESSES
// =============================================================================

/// Reserved addresses of native contracts.
pub mod precompiles {
    use super::Address;

    /// SHA-256 (0x02), only in the extended set.
    pub const SHA256: Address = Address::from_low_u8(2);

    /// Identity / data copy (0x04).
    pub const IDENTITY: Address = Address::from_low_u8(4);
}

// =============================================================================
// TESTS
// =============================================================================
