//! # SHA256 Precompile (0x02)
//!
//! Computes the SHA-256 digest of the input.

use crate::domain::services::sha256;

/// Base gas cost.
const SHA256_BASE_COST: u64 = 60;
/// Gas cost per word.
const SHA256_WORD_COST: u64 = 12;

/// Gas charged for hashing `input`.
#[must_use]
pub fn gas_for_data(input: &[u8]) -> u64 {
    SHA256_BASE_COST + SHA256_WORD_COST * input.len().div_ceil(32) as u64
}

/// Hashes `input` into a 32-byte output.
#[must_use]
pub fn execute(input: &[u8]) -> Vec<u8> {
    sha256(input).0.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty() {
        let expected = [
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14,
            0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
            0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c,
            0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
        ];
        assert_eq!(execute(&[]), expected.to_vec());
    }

    #[test]
    fn test_sha256_gas() {
        assert_eq!(gas_for_data(&[]), 60);
        assert_eq!(gas_for_data(b"hello"), 72);
    }
}
