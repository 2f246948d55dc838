//! # Error Types
//!
//! All error types for contract execution.
//!
//! [`VmError`] halts only the frame that raised it. It is stored in that frame's
//! `ProgramResult` and never unwinds past `Vm::play`.

use crate::domain::value_objects::{Address, U256};
use thiserror::Error;

// =============================================================================
// VM ERRORS
// =============================================================================

/// Frame-fatal conditions raised while executing an instruction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Byte at the program counter is not an instruction.
    #[error("invalid opcode: 0x{0:02X}")]
    InvalidOpcode(u8),

    /// Fewer operands than the instruction consumes.
    #[error("stack underflow: required {required}, actual {actual}")]
    StackUnderflow {
        /// Operands needed.
        required: usize,
        /// Operands present.
        actual: usize,
    },

    /// Executing the instruction would exceed the stack limit.
    #[error("stack overflow: {size} > {max}")]
    StackOverflow {
        /// Resulting stack size.
        size: usize,
        /// Stack limit.
        max: usize,
    },

    /// Not enough gas for a charge.
    #[error("out of gas: {cause} requires {required}, {available} left")]
    OutOfGas {
        /// What the gas was for.
        cause: String,
        /// Gas required.
        required: U256,
        /// Gas available.
        available: u64,
    },

    /// Memory size arithmetic left the representable range.
    #[error("gas overflow: memory size {requested} exceeds {max}")]
    GasOverflow {
        /// Requested memory size.
        requested: U256,
        /// Largest supported size.
        max: u64,
    },

    /// JUMP/JUMPI target is not a JUMPDEST, `None` if it does not fit 4 bytes.
    #[error("bad jump destination: {0:?}")]
    BadJumpDestination(Option<usize>),

    /// State modification attempted inside a static call.
    #[error("attempt to modify state in a static call")]
    StaticCallViolation,

    /// RETURNDATACOPY reads past the end of the return data buffer.
    #[error("return data copy out of bounds: offset {offset}, size {size}, available {available}")]
    ReturnDataCopyOutOfBounds {
        /// Requested offset.
        offset: usize,
        /// Requested size.
        size: usize,
        /// Buffered bytes.
        available: usize,
    },

    /// Generic frame failure.
    #[error("bytecode execution failed: {0}")]
    BytecodeExecution(String),
}

impl VmError {
    /// Builds an `OutOfGas` error from a 64-bit requirement.
    #[must_use]
    pub fn out_of_gas(cause: impl Into<String>, required: u64, available: u64) -> Self {
        Self::OutOfGas {
            cause: cause.into(),
            required: U256::from(required),
            available,
        }
    }
}

// =============================================================================
// TRANSACTION ERRORS
// =============================================================================

/// Reasons a transaction is refused before any code runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Transaction gas plus gas already used in the block exceeds the block limit.
    #[error("block gas limit exceeded: {required} > {limit}")]
    BlockGasLimitExceeded {
        /// Gas the block would need.
        required: u64,
        /// Block gas limit.
        limit: u64,
    },

    /// Gas limit does not cover the intrinsic transaction cost.
    #[error("intrinsic gas too low: required {required}, provided {provided}")]
    IntrinsicGasTooLow {
        /// Intrinsic cost.
        required: u64,
        /// Gas limit of the transaction.
        provided: u64,
    },

    /// Nonce does not match the sender account.
    #[error("invalid nonce for {address:?}: expected {expected}, got {actual}")]
    InvalidNonce {
        /// Sender.
        address: Address,
        /// Account nonce.
        expected: u64,
        /// Transaction nonce.
        actual: u64,
    },

    /// Sender cannot pay value plus gas.
    #[error("insufficient balance for {address:?}: required {required}, available {available}")]
    InsufficientBalance {
        /// Sender.
        address: Address,
        /// Value plus maximum gas cost.
        required: U256,
        /// Sender balance.
        available: U256,
    },

    /// Executor used before a successful `init`.
    #[error("transaction executor is not ready")]
    NotReady,
}

// =============================================================================
// CONFIG ERRORS
// =============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed JSON.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Well-formed but inconsistent value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

// =============================================================================
// SERVICE ERRORS
// =============================================================================

/// Errors returned by the execution service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The transaction failed validation.
    #[error("transaction rejected: {0}")]
    Rejected(#[from] TransactionError),

    /// The service is at its pending request limit.
    #[error("too many pending requests: {pending} >= {max}")]
    Busy {
        /// Requests in flight.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },
}

// =============================================================================
// ASSEMBLY ERRORS
// =============================================================================

/// Errors raised by the mnemonic assembler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssemblyError {
    /// Token is neither a mnemonic nor an immediate.
    #[error("unknown mnemonic: {0}")]
    UnknownMnemonic(String),

    /// PUSH at the end of the source.
    #[error("{0} needs an immediate")]
    MissingImmediate(String),

    /// Immediate wider than the PUSH.
    #[error("immediate {immediate} does not fit {mnemonic}")]
    ImmediateTooLarge {
        /// The PUSH mnemonic.
        mnemonic: String,
        /// The offending token.
        immediate: String,
    },

    /// Malformed hex literal.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_error_display() {
        assert_eq!(VmError::InvalidOpcode(0xFE).to_string(), "invalid opcode: 0xFE");
        assert_eq!(
            VmError::StackUnderflow {
                required: 2,
                actual: 1
            }
            .to_string(),
            "stack underflow: required 2, actual 1"
        );
        assert_eq!(
            VmError::out_of_gas("SSTORE", 20_000, 10).to_string(),
            "out of gas: SSTORE requires 20000, 10 left"
        );
    }

    #[test]
    fn test_service_error_from_transaction_error() {
        let err: ServiceError = TransactionError::NotReady.into();
        assert!(matches!(err, ServiceError::Rejected(TransactionError::NotReady)));
    }

    #[test]
    fn test_config_error_from_json() {
        let err = serde_json::from_str::<u64>("not json").unwrap_err();
        let err: ConfigError = err.into();
        assert!(err.to_string().starts_with("invalid configuration"));
    }
}
