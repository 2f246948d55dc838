//! # Configuration
//!
//! Engine and service settings. Every type deserializes from JSON with all
//! fields optional, so a config file only lists what it overrides:
//!
//! ```json
//! { "constants": { "create_empty_contract_on_oog": true }, "precompiles": "extended" }
//! ```

use crate::domain::entities::Transaction;
use crate::domain::invariants::limits;
use crate::domain::word::Word;
use crate::errors::ConfigError;
use crate::evm::gas::intrinsic_gas;
use crate::evm::opcodes::Opcode;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

pub use crate::evm::gas::FeeSchedule;
pub use crate::evm::precompiles::PrecompileSet;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Protocol limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constants {
    /// Largest deployable code in bytes.
    pub max_contract_size: usize,
    /// Deploy empty code instead of failing when the deposit runs out of gas.
    pub create_empty_contract_on_oog: bool,
    /// Deepest allowed frame.
    pub max_call_depth: usize,
    /// Operand stack limit.
    pub max_stack_size: usize,
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            max_contract_size: limits::MAX_CONTRACT_SIZE,
            create_empty_contract_on_oog: false,
            max_call_depth: limits::MAX_CALL_DEPTH,
            max_stack_size: limits::MAX_STACK_SIZE,
        }
    }
}

// =============================================================================
// VM CONFIG
// =============================================================================

/// Everything the engine is parameterized by.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Gas prices.
    pub fee_schedule: FeeSchedule,
    /// Protocol limits.
    pub constants: Constants,
    /// Live native contracts.
    pub precompiles: PrecompileSet,
}

impl VmConfig {
    /// Gas actually forwarded by a call offering `requested` when `available`
    /// is left after the call's own cost: all but one 64th at most.
    #[must_use]
    pub fn call_gas(&self, _op: Opcode, requested: Word, available: u64) -> u64 {
        let max_allowed = all_but_one_64th(available);
        if requested.value() > U256::from(max_allowed) {
            max_allowed
        } else {
            requested.value().low_u64()
        }
    }

    /// Gas handed to a CREATE child out of `available`.
    #[must_use]
    pub fn create_gas(&self, available: u64) -> u64 {
        all_but_one_64th(available)
    }

    /// Intrinsic cost of `tx`.
    #[must_use]
    pub fn transaction_cost(&self, tx: &Transaction) -> u64 {
        intrinsic_gas(&self.fee_schedule, &tx.data, tx.is_create())
    }

    /// Parses a JSON document and validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the JSON is malformed or inconsistent.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.constants.max_call_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "constants.max_call_depth",
                reason: "must be at least 1".into(),
            });
        }
        // SWAP16 touches 17 slots.
        if self.constants.max_stack_size < 17 {
            return Err(ConfigError::InvalidValue {
                field: "constants.max_stack_size",
                reason: format!("{} cannot hold SWAP16 operands", self.constants.max_stack_size),
            });
        }
        if self.constants.max_contract_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "constants.max_contract_size",
                reason: "must be positive".into(),
            });
        }
        if self.fee_schedule.memory == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fee_schedule.memory",
                reason: "memory must not be free".into(),
            });
        }
        Ok(())
    }
}

fn all_but_one_64th(gas: u64) -> u64 {
    gas - gas / 64
}

// =============================================================================
// SERVICE CONFIG
// =============================================================================

/// Settings of the execution service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Engine configuration.
    pub vm_config: VmConfig,
    /// Requests allowed in flight before new ones are refused.
    pub max_pending_requests: usize,
    /// Emit a trace event per executed instruction.
    pub enable_tracing: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            vm_config: VmConfig::default(),
            max_pending_requests: 1000,
            enable_tracing: false,
        }
    }
}

impl ServiceConfig {
    /// Parses a JSON document and validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the JSON is malformed or inconsistent.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.vm_config.validate()?;
        if config.max_pending_requests == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_pending_requests",
                reason: "must be positive".into(),
            });
        }
        Ok(config)
    }
}

// =============================================================================
// TESTS
// =============================================================================
