//! # Identity Precompile (0x04)
//!
//! Returns the input unchanged.

/// Base gas cost.
const IDENTITY_BASE_COST: u64 = 15;
/// Gas cost per word.
const IDENTITY_WORD_COST: u64 = 3;

/// Gas charged for copying `input`.
#[must_use]
pub fn gas_for_data(input: &[u8]) -> u64 {
    IDENTITY_BASE_COST + IDENTITY_WORD_COST * input.len().div_ceil(32) as u64
}

/// Copies `input` to the output.
#[must_use]
pub fn execute(input: &[u8]) -> Vec<u8> {
    input.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert_eq!(execute(b"hello world"), b"hello world".to_vec());
        assert!(execute(&[]).is_empty());
    }

    #[test]
    fn test_identity_gas() {
        assert_eq!(gas_for_data(&[]), 15);
        assert_eq!(gas_for_data(&[0u8; 32]), 18);
        assert_eq!(gas_for_data(&[0u8; 33]), 21);
    }
}
