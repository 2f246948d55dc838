//! # Domain Invariants
//!
//! Post-conditions that must hold for every processed transaction, plus the
//! engine's hard limits.
//!
//! | Invariant | Check |
//! |-----------|-------|
//! | Gas used never exceeds the gas limit | `check_gas_limit_invariant` |
//! | A failed transaction leaves no logs or deletions | `check_failure_rollback_invariant` |
//! | Internal records of a failed transaction are rejected | `check_rejection_invariant` |
//! | Frames never nest deeper than the call depth limit | `check_call_depth_invariant` |

use crate::domain::entities::{ExecutionContext, InternalTransaction, TransactionSummary};

// =============================================================================
// INVARIANT CHECKS
// =============================================================================

/// Gas used never exceeds the transaction gas limit.
#[must_use]
pub fn check_gas_limit_invariant(summary: &TransactionSummary) -> bool {
    summary.gas_used <= summary.gas
}

/// A transaction that ended in an exception keeps no logs or deletions.
#[must_use]
pub fn check_failure_rollback_invariant(summary: &TransactionSummary) -> bool {
    !summary.failed || (summary.logs.is_empty() && summary.deleted_accounts.is_empty())
}

/// Every internal record of a failed transaction is rejected.
#[must_use]
pub fn check_rejection_invariant(summary: &TransactionSummary) -> bool {
    !summary.failed
        || summary
            .internal_transactions
            .iter()
            .all(InternalTransaction::is_rejected)
}

/// A frame's depth stays within the call depth limit.
#[must_use]
pub fn check_call_depth_invariant(ctx: &ExecutionContext, max_call_depth: usize) -> bool {
    ctx.depth <= max_call_depth
}

/// Check all summary invariants at once.
#[must_use]
pub fn check_all_invariants(summary: &TransactionSummary) -> InvariantCheckResult {
    let mut violations = Vec::new();

    if !check_gas_limit_invariant(summary) {
        violations.push(InvariantViolation::GasLimitExceeded {
            used: summary.gas_used,
            limit: summary.gas,
        });
    }

    if !check_failure_rollback_invariant(summary) {
        violations.push(InvariantViolation::SideEffectsNotDiscarded {
            logs: summary.logs.len(),
            deletions: summary.deleted_accounts.len(),
        });
    }

    if !check_rejection_invariant(summary) {
        violations.push(InvariantViolation::InternalTransactionNotRejected);
    }

    if violations.is_empty() {
        InvariantCheckResult::Valid
    } else {
        InvariantCheckResult::Invalid(violations)
    }
}

// =============================================================================
// INVARIANT TYPES
// =============================================================================

/// Result of checking all invariants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvariantCheckResult {
    /// All invariants hold.
    Valid,
    /// One or more invariants violated.
    Invalid(Vec<InvariantViolation>),
}

impl InvariantCheckResult {
    /// Returns true if all invariants hold.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Specific invariant violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Gas limit exceeded.
    GasLimitExceeded {
        /// Gas charged.
        used: u64,
        /// Gas limit.
        limit: u64,
    },
    /// Failed transaction still carries side effects.
    SideEffectsNotDiscarded {
        /// Logs left.
        logs: usize,
        /// Deletions left.
        deletions: usize,
    },
    /// Internal record of a failed transaction is not rejected.
    InternalTransactionNotRejected,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GasLimitExceeded { used, limit } => {
                write!(f, "gas limit exceeded: used {used} > limit {limit}")
            }
            Self::SideEffectsNotDiscarded { logs, deletions } => {
                write!(
                    f,
                    "failed transaction kept side effects: {logs} logs, {deletions} deletions"
                )
            }
            Self::InternalTransactionNotRejected => {
                write!(f, "failed transaction has unrejected internal transactions")
            }
        }
    }
}

// =============================================================================
// EXECUTION LIMIT CONSTANTS
// =============================================================================

/// Hard limits of the engine.
pub mod limits {
    /// Maximum call depth.
    pub const MAX_CALL_DEPTH: usize = 1024;

    /// Maximum operand stack size.
    pub const MAX_STACK_SIZE: usize = 1024;

    /// Maximum size of deployed code in bytes.
    pub const MAX_CONTRACT_SIZE: usize = 0x6000;

    /// Largest memory size the gas model accepts (2^31 - 1).
    pub const MAX_MEMORY_SIZE: u64 = 0x7FFF_FFFF;
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{InternalTxKind, LogInfo, Transaction};
    use crate::domain::value_objects::{Address, Hash, U256};

    fn summary(failed: bool) -> TransactionSummary {
        TransactionSummary {
            tx: Transaction {
                hash: Hash::ZERO,
                from: Address::from_low_u8(1),
                to: Some(Address::from_low_u8(2)),
                nonce: 0,
                value: U256::zero(),
                data: vec![],
                gas: 50_000,
                gas_price: U256::one(),
            },
            value: U256::zero(),
            gas: 50_000,
            gas_price: U256::one(),
            gas_used: 21_000,
            failed,
            return_data: vec![],
            internal_transactions: vec![],
            deleted_accounts: vec![],
            logs: vec![],
        }
    }

    #[test]
    fn test_valid_summary() {
        assert!(check_all_invariants(&summary(false)).is_valid());
        assert!(check_all_invariants(&summary(true)).is_valid());
    }

    #[test]
    fn test_gas_limit_violation() {
        let mut s = summary(false);
        s.gas_used = 60_000;
        let result = check_all_invariants(&s);
        assert_eq!(
            result,
            InvariantCheckResult::Invalid(vec![InvariantViolation::GasLimitExceeded {
                used: 60_000,
                limit: 50_000
            }])
        );
    }

    #[test]
    fn test_failed_with_logs_violation() {
        let mut s = summary(true);
        s.logs.push(LogInfo::new(Address::ZERO, vec![], vec![]));
        assert!(!check_failure_rollback_invariant(&s));
        assert!(!check_all_invariants(&s).is_valid());
    }

    #[test]
    fn test_unrejected_record_violation() {
        let mut s = summary(true);
        s.internal_transactions.push(InternalTransaction::new(
            Hash::ZERO,
            0,
            0,
            InternalTxKind::Call,
            Address::from_low_u8(2),
            Some(Address::from_low_u8(3)),
            0,
            U256::zero(),
            vec![],
            0,
            U256::one(),
        ));
        assert!(!check_rejection_invariant(&s));
    }

    #[test]
    fn test_violation_display() {
        let v = InvariantViolation::GasLimitExceeded { used: 2, limit: 1 };
        assert_eq!(v.to_string(), "gas limit exceeded: used 2 > limit 1");
    }
}
