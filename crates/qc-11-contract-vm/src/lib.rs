//! # QC-11 Contract VM - Gas-Metered Contract Execution
//!
//! **Subsystem ID:** 11
//! **Instruction set:** Byzantium
//!
//! ## Purpose
//!
//! Executes contract bytecode on a 256-bit stack machine. Every instruction is
//! priced before it runs, every nested call runs inside its own state
//! checkpoint, and any failure inside a frame is contained to that frame.
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | Gas used never exceeds the gas limit | `domain/invariants.rs` - `check_gas_limit_invariant()` |
//! | A failed transaction leaves no logs or deletions | `domain/invariants.rs` - `check_failure_rollback_invariant()` |
//! | Records of failed frames are rejected | `domain/invariants.rs` - `check_rejection_invariant()` |
//! | Frames never nest deeper than the depth limit | `evm/interpreter.rs` - depth check before every CALL / CREATE |
//! | Static frames never write state | `evm/interpreter.rs` - `StaticCallViolation` |
//!
//! ### Execution Limits
//!
//! | Limit | Default | Config field |
//! |-------|---------|--------------|
//! | Call depth | 1024 | `constants.max_call_depth` |
//! | Stack size | 1024 | `constants.max_stack_size` |
//! | Contract size | 24 KB | `constants.max_contract_size` |
//! | Memory | 2^31 - 1 bytes | enforced by memory gas |
//!
//! ## Outbound Dependencies
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | `Repository` | Accounts, code, storage, nested checkpoints |
//! | `BlockStore` | Hashes of recent blocks for BLOCKHASH |
//!
//! ## EVM Components
//!
//! | Component | Location | Purpose |
//! |-----------|----------|---------|
//! | Vm | `evm/interpreter.rs` | Instruction cycle, heap-allocated frames |
//! | Program | `evm/program.rs` | One frame |
//! | Stack | `evm/stack.rs` | 1024-item stack |
//! | Memory | `evm/memory.rs` | Word-aligned memory |
//! | Gas | `evm/gas.rs` | Fee schedule and formulas |
//! | Precompiles | `evm/precompiles/` | identity, sha256 |
//!
//! ## Usage Example
//!
//! ```ignore
//! use qc_11_contract_vm::prelude::*;
//!
//! let service = create_test_service();
//! let summary = service.execute_transaction(tx, block).await?;
//! if !summary.failed {
//!     println!("Gas used: {}", summary.gas_used);
//! }
//! ```

// Crate-level lints
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]

// =============================================================================
// MODULES
// =============================================================================

pub mod adapters;
pub mod config;
pub mod domain;
pub mod errors;
pub mod evm;
pub mod executor;
pub mod ports;
pub mod service;

// =============================================================================
// PRELUDE
// =============================================================================

/// Convenient re-exports for common usage.
pub mod prelude {
    // Domain entities
    pub use crate::domain::entities::{
        BlockContext, ExecutionContext, InternalTransaction, InternalTxKind, LogInfo, Transaction,
        TransactionSummary,
    };
    pub use crate::domain::result::ProgramResult;

    // Value objects
    pub use crate::domain::value_objects::{Address, Hash, U256};
    pub use crate::domain::word::Word;

    // Domain services
    pub use crate::domain::services::{compute_contract_address, keccak256, sha256};

    // Invariants
    pub use crate::domain::invariants::{
        check_all_invariants, limits, InvariantCheckResult, InvariantViolation,
    };

    // Ports
    pub use crate::ports::inbound::ContractExecutionApi;
    pub use crate::ports::outbound::{BlockStore, Repository};

    // Errors
    pub use crate::errors::{ConfigError, ServiceError, TransactionError, VmError};

    // Configuration
    pub use crate::config::{Constants, FeeSchedule, PrecompileSet, ServiceConfig, VmConfig};

    // EVM components
    pub use crate::evm::{
        assemble, disassemble, gas, memory::Memory, opcodes::Opcode, stack::Stack, Program, Vm,
    };

    // Executor
    pub use crate::executor::TransactionExecutor;

    // Adapters
    pub use crate::adapters::{InMemoryBlockStore, InMemoryRepository};

    // Service
    pub use crate::service::{create_test_service, ContractExecutionService, ServiceStats};
}

// =============================================================================
// CRATE INFO
// =============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Subsystem ID.
pub const SUBSYSTEM_ID: u8 = 11;

/// Subsystem name.
pub const SUBSYSTEM_NAME: &str = "Contract VM";

// =============================================================================
// TESTS
// =============================================================================
