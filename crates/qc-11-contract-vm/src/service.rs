//! # Contract Execution Service
//!
//! Async front of the engine. Transactions are executed one at a time over a
//! shared repository; the engine itself is synchronous, so a request holds
//! the state lock for the duration of one transaction and never across an
//! await point inside the VM.
//!
//! ## Architecture Compliance
//!
//! - Implements the `ContractExecutionApi` driving port
//! - Generic over the `Repository` and `BlockStore` driven ports
//! - Every request runs in a span carrying its own correlation id

use crate::adapters::{InMemoryBlockStore, InMemoryRepository};
use crate::config::ServiceConfig;
use crate::domain::entities::{BlockContext, Transaction, TransactionSummary};
use crate::errors::{ServiceError, TransactionError};
use crate::executor::TransactionExecutor;
use crate::ports::inbound::ContractExecutionApi;
use crate::ports::outbound::{BlockStore, Repository};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Statistics for the execution service.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    /// Transactions that passed validation and ran.
    pub transactions_executed: u64,
    /// Executions that ended without an exception.
    pub successful_executions: u64,
    /// Executions that ended in an exception.
    pub failed_executions: u64,
    /// Gas charged over all executed transactions.
    pub total_gas_used: u64,
    /// Average execution time in microseconds.
    pub avg_execution_time_us: u64,
    /// Transactions refused by validation.
    pub rejected_requests: u64,
}

/// State guarded by the execution lock.
struct Ledger<R> {
    repo: R,
    block_number: u64,
    gas_used_in_block: u64,
}

/// Decrements the pending counter when a request completes.
struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The contract execution service.
///
/// This service:
/// 1. Validates and executes transactions against the shared repository
/// 2. Tracks gas used by the current block
/// 3. Runs local calls on a checkpoint that is always discarded
/// 4. Maintains execution statistics
pub struct ContractExecutionService<R: Repository, B: BlockStore> {
    config: ServiceConfig,
    ledger: Mutex<Ledger<R>>,
    block_store: Arc<B>,
    pending: AtomicUsize,
    stats: RwLock<ServiceStats>,
}

impl<R: Repository, B: BlockStore> ContractExecutionService<R, B> {
    /// Creates a service over `repo`.
    pub fn new(repo: R, block_store: B, config: ServiceConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger {
                repo,
                block_number: 0,
                gas_used_in_block: 0,
            }),
            block_store: Arc::new(block_store),
            pending: AtomicUsize::new(0),
            stats: RwLock::new(ServiceStats::default()),
        }
    }

    /// Current service statistics.
    pub async fn stats(&self) -> ServiceStats {
        self.stats.read().await.clone()
    }

    /// Gas used so far by the block currently being executed.
    pub async fn gas_used_in_block(&self) -> u64 {
        self.ledger.lock().await.gas_used_in_block
    }

    /// Runs `f` with exclusive access to the repository.
    pub async fn with_repository<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        let mut ledger = self.ledger.lock().await;
        f(&mut ledger.repo)
    }

    fn enter(&self) -> Result<PendingGuard<'_>, ServiceError> {
        let max = self.config.max_pending_requests;
        let pending = self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(&self.pending);
        if pending >= max {
            warn!(pending, max, "too many pending requests");
            return Err(ServiceError::Busy { pending, max });
        }
        Ok(guard)
    }

    #[instrument(
        skip(self, tx, block),
        fields(correlation_id = %correlation_id, tx_hash = ?tx.hash)
    )]
    async fn process(
        &self,
        correlation_id: Uuid,
        tx: Transaction,
        block: BlockContext,
        local: bool,
    ) -> Result<TransactionSummary, ServiceError> {
        let _pending = self.enter()?;
        let start = Instant::now();

        let outcome = {
            let mut ledger = self.ledger.lock().await;
            if ledger.block_number != block.number {
                ledger.block_number = block.number;
                ledger.gas_used_in_block = 0;
            }
            let used = ledger.gas_used_in_block;
            let Ledger { repo, .. } = &mut *ledger;

            if local {
                repo.start_tracking();
            }
            let outcome = TransactionExecutor::new(
                tx,
                block,
                &mut *repo,
                self.block_store.as_ref(),
                &self.config.vm_config,
            )
            .gas_used_in_block(used)
            .local_call(local)
            .with_tracing(self.config.enable_tracing)
            .run();
            if local {
                repo.rollback();
            } else if let Ok(summary) = &outcome {
                ledger.gas_used_in_block += summary.gas_used;
            }
            outcome
        };

        self.record(&outcome, start.elapsed()).await;
        outcome.map_err(ServiceError::from)
    }

    async fn record(&self, outcome: &Result<TransactionSummary, TransactionError>, elapsed: Duration) {
        let mut stats = self.stats.write().await;
        let summary = match outcome {
            Ok(summary) => summary,
            Err(err) => {
                stats.rejected_requests += 1;
                debug!(error = %err, "transaction rejected");
                return;
            }
        };

        stats.transactions_executed += 1;
        stats.total_gas_used = stats.total_gas_used.saturating_add(summary.gas_used);
        if summary.failed {
            stats.failed_executions += 1;
        } else {
            stats.successful_executions += 1;
        }

        let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let total = stats.transactions_executed;
        stats.avg_execution_time_us =
            (stats.avg_execution_time_us * (total - 1) + elapsed_us) / total;

        info!(
            gas_used = summary.gas_used,
            failed = summary.failed,
            logs = summary.logs.len(),
            "transaction executed"
        );
    }
}

/// A service over fresh in-memory state with the default configuration.
#[must_use]
pub fn create_test_service() -> ContractExecutionService<InMemoryRepository, InMemoryBlockStore> {
    ContractExecutionService::new(
        InMemoryRepository::new(),
        InMemoryBlockStore::new(),
        ServiceConfig::default(),
    )
}

// =============================================================================
// ContractExecutionApi Implementation
// =============================================================================

#[async_trait]
impl<R: Repository, B: BlockStore> ContractExecutionApi for ContractExecutionService<R, B> {
    async fn execute_transaction(
        &self,
        tx: Transaction,
        block: BlockContext,
    ) -> Result<TransactionSummary, ServiceError> {
        self.process(Uuid::new_v4(), tx, block, false).await
    }

    async fn call(
        &self,
        tx: Transaction,
        block: BlockContext,
    ) -> Result<TransactionSummary, ServiceError> {
        self.process(Uuid::new_v4(), tx, block, true).await
    }

    async fn estimate_gas(&self, tx: Transaction, block: BlockContext) -> Result<u64, ServiceError> {
        let summary = self.process(Uuid::new_v4(), tx, block, true).await?;
        Ok(summary.gas_used)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{Address, Hash, U256};
    use crate::domain::word::Word;
    use crate::evm::opcodes::assemble;

    const SENDER: Address = Address::from_low_u8(0x01);
    const CONTRACT: Address = Address::from_low_u8(0xC0);

    fn transfer(from: Address, nonce: u64, gas: u64) -> Transaction {
        Transaction {
            hash: Hash::new([nonce as u8; 32]),
            from,
            to: Some(Address::from_low_u8(0xEE)),
            nonce,
            value: U256::from(1),
            data: Vec::new(),
            gas,
            gas_price: U256::one(),
        }
    }

    fn block(number: u64) -> BlockContext {
        BlockContext {
            number,
            gas_limit: 50_000,
            ..BlockContext::default()
        }
    }

    async fn funded_service() -> ContractExecutionService<InMemoryRepository, InMemoryBlockStore> {
        let service = create_test_service();
        service
            .with_repository(|repo| repo.set_balance(SENDER, U256::from(1_000_000)))
            .await;
        service
    }

    #[tokio::test]
    async fn test_create_service() {
        let service = create_test_service();
        assert_eq!(service.stats().await, ServiceStats::default());
        assert_eq!(service.gas_used_in_block().await, 0);
    }

    #[tokio::test]
    async fn test_execute_transaction_updates_state_and_stats() {
        let service = funded_service().await;
        let summary = service
            .execute_transaction(transfer(SENDER, 0, 21_000), block(1))
            .await
            .unwrap();
        assert_eq!(summary.gas_used, 21_000);

        let balance = service
            .with_repository(|repo| repo.get_balance(Address::from_low_u8(0xEE)))
            .await;
        assert_eq!(balance, U256::from(1));

        let stats = service.stats().await;
        assert_eq!(stats.transactions_executed, 1);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.total_gas_used, 21_000);
    }

    #[tokio::test]
    async fn test_rejected_transaction_is_counted() {
        let service = funded_service().await;
        let result = service
            .execute_transaction(transfer(SENDER, 5, 21_000), block(1))
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::Rejected(TransactionError::InvalidNonce { .. }))
        ));

        let stats = service.stats().await;
        assert_eq!(stats.rejected_requests, 1);
        assert_eq!(stats.transactions_executed, 0);
    }

    #[tokio::test]
    async fn test_block_gas_is_tracked_per_block() {
        let service = funded_service().await;
        service
            .execute_transaction(transfer(SENDER, 0, 21_000), block(1))
            .await
            .unwrap();
        service
            .execute_transaction(transfer(SENDER, 1, 21_000), block(1))
            .await
            .unwrap();
        assert_eq!(service.gas_used_in_block().await, 42_000);

        let third = service
            .execute_transaction(transfer(SENDER, 2, 21_000), block(1))
            .await;
        assert!(matches!(
            third,
            Err(ServiceError::Rejected(
                TransactionError::BlockGasLimitExceeded { .. }
            ))
        ));

        service
            .execute_transaction(transfer(SENDER, 2, 21_000), block(2))
            .await
            .unwrap();
        assert_eq!(service.gas_used_in_block().await, 21_000);
    }

    #[tokio::test]
    async fn test_call_discards_state() {
        let service = funded_service().await;
        service
            .with_repository(|repo| {
                repo.set_code(
                    CONTRACT,
                    assemble("PUSH1 0x2a PUSH1 0x00 SSTORE PUSH1 0x2a PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN")
                        .unwrap(),
                );
            })
            .await;

        let mut tx = transfer(SENDER, 0, 100_000);
        tx.to = Some(CONTRACT);
        let summary = service.call(tx.clone(), block(1)).await.unwrap();
        assert_eq!(Word::from_be_slice(&summary.return_data), Word::from(42u64));

        let (slot, nonce, depth) = service
            .with_repository(|repo| {
                (
                    repo.get_storage_row(CONTRACT, Word::ZERO),
                    repo.get_nonce(SENDER),
                    repo.checkpoint_depth(),
                )
            })
            .await;
        assert_eq!(slot, None);
        assert_eq!(nonce, 0);
        assert_eq!(depth, 0);

        let estimate = service.estimate_gas(tx, block(1)).await.unwrap();
        assert_eq!(estimate, summary.gas_used);
        assert_eq!(service.gas_used_in_block().await, 0);
    }

    #[tokio::test]
    async fn test_busy_when_saturated() {
        let mut config = ServiceConfig::default();
        config.max_pending_requests = 1;
        let service = ContractExecutionService::new(
            InMemoryRepository::new(),
            InMemoryBlockStore::new(),
            config,
        );

        let held = service.enter().unwrap();
        let result = service
            .execute_transaction(transfer(SENDER, 0, 21_000), block(1))
            .await;
        assert_eq!(result.unwrap_err(), ServiceError::Busy { pending: 1, max: 1 });
        drop(held);
        assert_eq!(service.pending.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_senders() {
        let service = Arc::new(create_test_service());
        let senders: Vec<Address> = (10..20).map(Address::from_low_u8).collect();
        for sender in &senders {
            let sender = *sender;
            service
                .with_repository(move |repo| repo.set_balance(sender, U256::from(100_000)))
                .await;
        }

        let handles: Vec<_> = senders
            .iter()
            .map(|sender| {
                let service = Arc::clone(&service);
                let tx = transfer(*sender, 0, 21_000);
                tokio::spawn(async move { service.execute_transaction(tx, BlockContext::default()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        let stats = service.stats().await;
        assert_eq!(stats.transactions_executed, 10);
        let received = service
            .with_repository(|repo| repo.get_balance(Address::from_low_u8(0xEE)))
            .await;
        assert_eq!(received, U256::from(10));
    }
}
