//! # Driving Ports (API - Inbound)
//!
//! What the contract engine offers to the rest of the node: run a
//! transaction for real, or run it against a throwaway view of the state.
//!
//! ## Architecture Compliance
//!
//! - These traits define the public API of the execution service
//! - `service.rs` implements them over any `Repository` / `BlockStore`

use crate::domain::entities::{BlockContext, Transaction, TransactionSummary};
use crate::errors::ServiceError;
use async_trait::async_trait;

/// Primary API for contract execution.
///
/// ## Usage
///
/// ```ignore
/// let summary = api.execute_transaction(tx, block).await?;
/// if !summary.failed {
///     println!("gas used: {}", summary.gas_used);
/// }
/// ```
#[async_trait]
pub trait ContractExecutionApi: Send + Sync {
    /// Validates, executes and commits `tx`.
    ///
    /// # Errors
    ///
    /// `Rejected` when validation fails (nothing is charged), `Busy` when the
    /// service is saturated. An execution that fails inside the VM is not an
    /// error: it is reported by `TransactionSummary::failed`.
    async fn execute_transaction(
        &self,
        tx: Transaction,
        block: BlockContext,
    ) -> Result<TransactionSummary, ServiceError>;

    /// Executes `tx` as a local call: no validation, no charge, and every
    /// state change is discarded afterwards.
    ///
    /// # Errors
    ///
    /// `Busy` when the service is saturated.
    async fn call(
        &self,
        tx: Transaction,
        block: BlockContext,
    ) -> Result<TransactionSummary, ServiceError>;

    /// Gas `tx` would use, measured by a local call.
    ///
    /// # Errors
    ///
    /// `Busy` when the service is saturated.
    async fn estimate_gas(&self, tx: Transaction, block: BlockContext) -> Result<u64, ServiceError>;
}
