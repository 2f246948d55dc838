//! # Gas Model
//!
//! The fee schedule (Byzantium prices) and the variable-cost formulas the
//! interpreter combines with an instruction's fixed [`Tier`] cost.
//!
//! [`Tier`]: crate::evm::opcodes::Tier

use crate::domain::invariants::limits::MAX_MEMORY_SIZE;
use crate::domain::word::{Word, WORD_SIZE};
use crate::errors::VmError;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

// =============================================================================
// FEE SCHEDULE
// =============================================================================

/// Every gas constant the engine charges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    /// BALANCE.
    pub balance: u64,
    /// SHA3 base cost.
    pub sha3: u64,
    /// SHA3 cost per hashed word.
    pub sha3_word: u64,
    /// SLOAD.
    pub sload: u64,
    /// SUICIDE.
    pub suicide: u64,
    /// SUICIDE to a dead beneficiary with a non-zero balance.
    pub new_acct_suicide: u64,
    /// Refund per self-destructed account.
    pub suicide_refund: u64,
    /// SSTORE zero to non-zero.
    pub set_sstore: u64,
    /// SSTORE non-zero to non-zero.
    pub reset_sstore: u64,
    /// SSTORE non-zero to zero.
    pub clear_sstore: u64,
    /// Refund for clearing a slot.
    pub refund_sstore: u64,
    /// CREATE.
    pub create: u64,
    /// Code deposit cost per byte.
    pub create_data: u64,
    /// CALL family base cost.
    pub call: u64,
    /// Gas added to a value-bearing call.
    pub stipend_call: u64,
    /// Surcharge for a value-bearing call.
    pub vt_call: u64,
    /// Surcharge for a call creating an account.
    pub new_acct_call: u64,
    /// Linear memory cost per word.
    pub memory: u64,
    /// Copy cost per word.
    pub copy_gas: u64,
    /// LOG base cost.
    pub log_gas: u64,
    /// LOG cost per data byte.
    pub log_data_gas: u64,
    /// LOG cost per topic.
    pub log_topic_gas: u64,
    /// EXP base cost.
    pub exp_gas: u64,
    /// EXP cost per exponent byte.
    pub exp_byte_gas: u64,
    /// EXTCODESIZE.
    pub ext_code_size: u64,
    /// EXTCODECOPY base cost.
    pub ext_code_copy: u64,
    /// Intrinsic cost of a call transaction.
    pub transaction: u64,
    /// Intrinsic cost of a create transaction.
    pub transaction_create_contract: u64,
    /// Intrinsic cost per zero data byte.
    pub tx_zero_data: u64,
    /// Intrinsic cost per non-zero data byte.
    pub tx_no_zero_data: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            balance: 400,
            sha3: 30,
            sha3_word: 6,
            sload: 200,
            suicide: 5_000,
            new_acct_suicide: 25_000,
            suicide_refund: 24_000,
            set_sstore: 20_000,
            reset_sstore: 5_000,
            clear_sstore: 5_000,
            refund_sstore: 15_000,
            create: 32_000,
            create_data: 200,
            call: 700,
            stipend_call: 2_300,
            vt_call: 9_000,
            new_acct_call: 25_000,
            memory: 3,
            copy_gas: 3,
            log_gas: 375,
            log_data_gas: 8,
            log_topic_gas: 375,
            exp_gas: 10,
            exp_byte_gas: 50,
            ext_code_size: 700,
            ext_code_copy: 700,
            transaction: 21_000,
            transaction_create_contract: 53_000,
            tx_zero_data: 4,
            tx_no_zero_data: 68,
        }
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// Memory high-water mark needed to touch `size` bytes at `offset`.
///
/// Zero when `size` is zero. Saturates instead of wrapping, so an overflowing
/// window is rejected by [`calc_mem_gas`].
#[must_use]
pub fn mem_needed(offset: Word, size: Word) -> U256 {
    if size.is_zero() {
        U256::zero()
    } else {
        offset.value().saturating_add(size.value())
    }
}

fn memory_cost(fees: &FeeSchedule, words: u64) -> u64 {
    fees.memory * words + words * words / 512
}

/// Memory growth plus copy cost.
///
/// Growth is charged only for the words above `old_mem_size`, which is always
/// a multiple of 32.
///
/// # Errors
///
/// Returns `GasOverflow` if `new_mem_size` exceeds 2^31 - 1.
pub fn calc_mem_gas(
    fees: &FeeSchedule,
    old_mem_size: usize,
    new_mem_size: U256,
    copy_size: u64,
) -> Result<u64, VmError> {
    if new_mem_size > U256::from(MAX_MEMORY_SIZE) {
        return Err(VmError::GasOverflow {
            requested: new_mem_size,
            max: MAX_MEMORY_SIZE,
        });
    }

    let mut cost = 0u64;
    let usage = new_mem_size.low_u64().div_ceil(WORD_SIZE as u64) * WORD_SIZE as u64;
    let old = old_mem_size as u64;
    if usage > old {
        let words = usage / WORD_SIZE as u64;
        let old_words = old / WORD_SIZE as u64;
        cost += memory_cost(fees, words) - memory_cost(fees, old_words);
    }

    if copy_size > 0 {
        cost = cost.saturating_add(fees.copy_gas.saturating_mul(copy_size.div_ceil(32)));
    }

    Ok(cost)
}

// =============================================================================
// INSTRUCTION COSTS
// =============================================================================

/// EXP cost for `exponent`.
#[must_use]
pub fn exp_gas_cost(fees: &FeeSchedule, exponent: Word) -> u64 {
    fees.exp_gas + fees.exp_byte_gas * exponent.bytes_occupied() as u64
}

/// SHA3 cost for hashing `size` bytes, excluding memory growth.
#[must_use]
pub fn sha3_gas_cost(fees: &FeeSchedule, size: u64) -> u64 {
    fees.sha3
        .saturating_add(fees.sha3_word.saturating_mul(size.div_ceil(32)))
}

/// LOG cost for `topics` topics and `size` data bytes, excluding memory growth.
#[must_use]
pub fn log_gas_cost(fees: &FeeSchedule, topics: usize, size: u64) -> u64 {
    fees.log_gas
        .saturating_add(fees.log_topic_gas * topics as u64)
        .saturating_add(fees.log_data_gas.saturating_mul(size))
}

/// Price of an SSTORE and the refund it registers.
///
/// `current` is `None` for an empty slot.
#[must_use]
pub fn sstore_gas_cost(fees: &FeeSchedule, current: Option<Word>, new_value: Word) -> (u64, u64) {
    match current {
        None if !new_value.is_zero() => (fees.set_sstore, 0),
        Some(_) if new_value.is_zero() => (fees.clear_sstore, fees.refund_sstore),
        _ => (fees.reset_sstore, 0),
    }
}

/// Refund actually granted: the pool, capped at half the gas used.
#[must_use]
pub fn calculate_refund(gas_used: u64, refund: u64) -> u64 {
    refund.min(gas_used / 2)
}

/// Intrinsic cost of a transaction carrying `data`.
#[must_use]
pub fn intrinsic_gas(fees: &FeeSchedule, data: &[u8], is_create: bool) -> u64 {
    let zeros = data.iter().filter(|b| **b == 0).count() as u64;
    let non_zeros = data.len() as u64 - zeros;
    let base = if is_create {
        fees.transaction_create_contract
    } else {
        fees.transaction
    };
    base + zeros * fees.tx_zero_data + non_zeros * fees.tx_no_zero_data
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn w(n: u64) -> Word {
        Word::from(n)
    }

    #[test]
    fn test_mem_needed() {
        assert_eq!(mem_needed(w(100), w(0)), U256::zero());
        assert_eq!(mem_needed(w(100), w(32)), U256::from(132));
        assert_eq!(mem_needed(Word::MAX, w(1)), U256::MAX);
    }

    #[test]
    fn test_calc_mem_gas_growth_only() {
        let fees = FeeSchedule::default();
        // One word: 3 * 1 + 1 / 512.
        assert_eq!(calc_mem_gas(&fees, 0, U256::from(1), 0).unwrap(), 3);
        // Already paid for.
        assert_eq!(calc_mem_gas(&fees, 32, U256::from(32), 0).unwrap(), 0);
        // 1 -> 32 words: (96 + 2) - 3.
        assert_eq!(calc_mem_gas(&fees, 32, U256::from(1024), 0).unwrap(), 95);
    }

    #[test]
    fn test_calc_mem_gas_copy() {
        let fees = FeeSchedule::default();
        assert_eq!(calc_mem_gas(&fees, 64, U256::from(64), 33).unwrap(), 6);
        assert_eq!(calc_mem_gas(&fees, 0, U256::from(32), 32).unwrap(), 6);
    }

    #[test]
    fn test_calc_mem_gas_overflow() {
        let fees = FeeSchedule::default();
        let err = calc_mem_gas(&fees, 0, U256::from(0x8000_0000u64), 0).unwrap_err();
        assert!(matches!(err, VmError::GasOverflow { .. }));
        assert!(calc_mem_gas(&fees, 0, U256::from(MAX_MEMORY_SIZE), 0).is_ok());
    }

    #[test]
    fn test_exp_gas_cost() {
        let fees = FeeSchedule::default();
        assert_eq!(exp_gas_cost(&fees, w(0)), 10);
        assert_eq!(exp_gas_cost(&fees, w(255)), 60);
        assert_eq!(exp_gas_cost(&fees, w(256)), 110);
        assert_eq!(exp_gas_cost(&fees, Word::MAX), 10 + 50 * 32);
    }

    #[test]
    fn test_sha3_and_log_costs() {
        let fees = FeeSchedule::default();
        assert_eq!(sha3_gas_cost(&fees, 0), 30);
        assert_eq!(sha3_gas_cost(&fees, 33), 42);
        assert_eq!(log_gas_cost(&fees, 2, 64), 375 + 750 + 512);
    }

    #[test]
    fn test_sstore_transitions() {
        let fees = FeeSchedule::default();
        assert_eq!(sstore_gas_cost(&fees, None, w(1)), (20_000, 0));
        assert_eq!(sstore_gas_cost(&fees, Some(w(1)), w(0)), (5_000, 15_000));
        assert_eq!(sstore_gas_cost(&fees, Some(w(1)), w(2)), (5_000, 0));
        assert_eq!(sstore_gas_cost(&fees, None, w(0)), (5_000, 0));
    }

    #[test]
    fn test_refund_cap() {
        assert_eq!(calculate_refund(50_000, 15_000), 15_000);
        assert_eq!(calculate_refund(20_000, 15_000), 10_000);
    }

    #[test]
    fn test_intrinsic_gas() {
        let fees = FeeSchedule::default();
        assert_eq!(intrinsic_gas(&fees, &[], false), 21_000);
        assert_eq!(intrinsic_gas(&fees, &[0, 1, 0], false), 21_000 + 8 + 68);
        assert_eq!(intrinsic_gas(&fees, &[], true), 53_000);
    }

    #[test]
    fn test_fee_schedule_partial_json() {
        let fees: FeeSchedule = serde_json::from_str(r#"{"sload": 50}"#).unwrap();
        assert_eq!(fees.sload, 50);
        assert_eq!(fees.call, 700);
    }
}
