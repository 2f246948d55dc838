//! # Transaction Executor
//!
//! Runs one transaction against a repository in four phases:
//!
//! 1. [`init`](TransactionExecutor::init) - validate gas, nonce and balance
//! 2. [`execute`](TransactionExecutor::execute) - charge the sender and set up
//!    the root frame, or handle a transfer / precompile directly
//! 3. [`go`](TransactionExecutor::go) - run the root frame and deposit code
//! 4. [`finish`](TransactionExecutor::finish) - refunds, deletions and the
//!    [`TransactionSummary`]
//!
//! ## State handling
//!
//! The nonce bump and the up-front gas charge go straight to the repository.
//! Everything after them runs inside one checkpoint that is committed on
//! success and rolled back on exception or revert.

use crate::config::VmConfig;
use crate::domain::entities::{BlockContext, ExecutionContext, Transaction, TransactionSummary};
use crate::domain::invariants::check_all_invariants;
use crate::domain::result::ProgramResult;
use crate::domain::services::compute_contract_address;
use crate::domain::value_objects::{Address, U256};
use crate::errors::{TransactionError, VmError};
use crate::evm::gas::calculate_refund;
use crate::evm::interpreter::Vm;
use crate::evm::program::Program;
use crate::ports::outbound::{BlockStore, Repository};
use tracing::{debug, info, warn};

/// Processes a single transaction.
pub struct TransactionExecutor<'a> {
    tx: Transaction,
    block: BlockContext,
    repo: &'a mut dyn Repository,
    block_store: &'a dyn BlockStore,
    config: &'a VmConfig,
    basic_tx_cost: u64,
    gas_used_in_block: u64,
    local_call: bool,
    trace: bool,

    ready: bool,
    tracking: bool,
    program: Option<Program>,
    result: ProgramResult,
    gas_left: u64,
}

impl<'a> TransactionExecutor<'a> {
    /// Creates an executor for `tx` in `block`.
    pub fn new(
        tx: Transaction,
        block: BlockContext,
        repo: &'a mut dyn Repository,
        block_store: &'a dyn BlockStore,
        config: &'a VmConfig,
    ) -> Self {
        let basic_tx_cost = config.transaction_cost(&tx);
        let gas_left = tx.gas;
        Self {
            tx,
            block,
            repo,
            block_store,
            config,
            basic_tx_cost,
            gas_used_in_block: 0,
            local_call: false,
            trace: false,
            ready: false,
            tracking: false,
            program: None,
            result: ProgramResult::new(),
            gas_left,
        }
    }

    /// Gas already consumed by earlier transactions of the block.
    #[must_use]
    pub fn gas_used_in_block(mut self, gas: u64) -> Self {
        self.gas_used_in_block = gas;
        self
    }

    /// A local call skips validation and never charges the sender.
    #[must_use]
    pub fn local_call(mut self, local: bool) -> Self {
        self.local_call = local;
        self
    }

    /// Enables per-instruction trace events.
    #[must_use]
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Runs all four phases.
    ///
    /// # Errors
    ///
    /// Returns the `TransactionError` raised by [`init`](Self::init).
    pub fn run(mut self) -> Result<TransactionSummary, TransactionError> {
        self.init()?;
        self.execute()?;
        self.go()?;
        self.finish()
    }

    // =========================================================================
    // INIT
    // =========================================================================

    /// Validates the transaction against the block and the sender account.
    ///
    /// # Errors
    ///
    /// Returns the first check that fails.
    pub fn init(&mut self) -> Result<(), TransactionError> {
        if self.local_call {
            self.ready = true;
            return Ok(());
        }

        let tx = &self.tx;
        let required = tx.gas.saturating_add(self.gas_used_in_block);
        if required > self.block.gas_limit {
            warn!(required, limit = self.block.gas_limit, "too much gas used in this block");
            return Err(TransactionError::BlockGasLimitExceeded {
                required,
                limit: self.block.gas_limit,
            });
        }

        if tx.gas < self.basic_tx_cost {
            warn!(
                required = self.basic_tx_cost,
                actual = tx.gas,
                "not enough gas to cover basic transaction cost"
            );
            return Err(TransactionError::IntrinsicGasTooLow {
                required: self.basic_tx_cost,
                provided: tx.gas,
            });
        }

        let expected = self.repo.get_nonce(tx.from);
        if expected != tx.nonce {
            warn!(required = expected, actual = tx.nonce, "invalid nonce");
            return Err(TransactionError::InvalidNonce {
                address: tx.from,
                expected,
                actual: tx.nonce,
            });
        }

        let total = tx.value.saturating_add(self.gas_cost());
        let balance = self.repo.get_balance(tx.from);
        if balance < total {
            warn!(required = %total, balance = %balance, "not enough balance");
            return Err(TransactionError::InsufficientBalance {
                address: tx.from,
                required: total,
                available: balance,
            });
        }

        self.ready = true;
        Ok(())
    }

    fn gas_cost(&self) -> U256 {
        U256::from(self.tx.gas).saturating_mul(self.tx.gas_price)
    }

    // =========================================================================
    // EXECUTE
    // =========================================================================

    /// Charges the sender and prepares the root frame.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` unless [`init`](Self::init) succeeded.
    pub fn execute(&mut self) -> Result<(), TransactionError> {
        if !self.ready {
            return Err(TransactionError::NotReady);
        }

        if !self.local_call {
            self.repo.increase_nonce(self.tx.from);
            self.repo.sub_balance(self.tx.from, self.gas_cost());
        }

        self.repo.start_tracking();
        self.tracking = true;

        match self.tx.to {
            Some(target) => self.call(target),
            None => self.create(),
        }
        Ok(())
    }

    fn call(&mut self, target: Address) {
        if let Some(contract) = self.config.precompiles.lookup(target) {
            let spending = self
                .basic_tx_cost
                .saturating_add(contract.gas_for_data(&self.tx.data));
            if !self.local_call && self.gas_left < spending {
                warn!(required = spending, gas_left = self.gas_left, "out of gas calling precompiled contract");
                self.gas_left = 0;
                return;
            }
            self.gas_left = self.gas_left.saturating_sub(spending);

            let (ok, output) = contract.execute(&self.tx.data);
            if !ok {
                warn!(contract = ?target, "error executing precompiled contract");
                self.gas_left = 0;
                return;
            }
            self.result.set_return_data(output);
        } else {
            let code = self.repo.get_code(target);
            if code.is_empty() {
                self.spend_basic_cost();
            } else {
                let ctx = ExecutionContext::for_transaction(&self.tx, target, self.block.clone());
                self.program = Some(self.load(code, ctx));
            }
        }

        self.repo.transfer(self.tx.from, target, self.tx.value);
    }

    fn create(&mut self) {
        let address = compute_contract_address(self.tx.from, self.tx.nonce);
        if self.repo.exists(address) {
            warn!(address = ?address, "contract address already in use");
            self.gas_left = 0;
            return;
        }

        // Any balance already sent to the address is kept.
        self.repo.increase_nonce(address);

        if self.tx.data.is_empty() {
            self.spend_basic_cost();
        } else {
            let ctx = ExecutionContext::for_transaction(&self.tx, address, self.block.clone());
            self.program = Some(self.load(self.tx.data.clone(), ctx));
        }

        self.repo.transfer(self.tx.from, address, self.tx.value);
    }

    fn spend_basic_cost(&mut self) {
        self.gas_left = self.gas_left.saturating_sub(self.basic_tx_cost);
        self.result.spend_gas(self.basic_tx_cost);
    }

    fn load(&self, code: Vec<u8>, ctx: ExecutionContext) -> Program {
        Program::new(code, ctx, self.config.constants.max_stack_size)
    }

    // =========================================================================
    // GO
    // =========================================================================

    /// Runs the root frame, if any, and settles the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` unless [`init`](Self::init) succeeded.
    pub fn go(&mut self) -> Result<(), TransactionError> {
        if !self.ready {
            return Err(TransactionError::NotReady);
        }

        let Some(mut program) = self.program.take() else {
            self.commit();
            return Ok(());
        };

        match program.spend_gas(self.basic_tx_cost, "basic transaction cost") {
            Ok(()) => {
                Vm::new(&mut *self.repo, self.block_store, self.config)
                    .with_tracing(self.trace)
                    .play(&mut program);
            }
            Err(err) => {
                program.spend_all_gas();
                program.result_mut().set_exception(err);
            }
        }

        let mut result = program.into_result();
        self.gas_left = self.tx.gas.saturating_sub(result.gas_used());

        // A failed deposit keeps the gas left after the frame.
        let vm_failed = result.exception().is_some();
        if self.tx.is_create() && result.is_success() {
            self.deposit_code(&mut result);
        }

        if result.exception().is_some() || result.is_revert() {
            result.discard_side_effects();
            result.reject_internal_transactions();
            self.rollback();
            match result.exception() {
                Some(err) => {
                    if vm_failed {
                        self.gas_left = 0;
                    }
                    warn!(error = %err, "exception occurred");
                }
                None => warn!(gas_left = self.gas_left, "REVERT opcode executed"),
            }
        } else {
            self.commit();
        }

        self.result = result;
        Ok(())
    }

    fn deposit_code(&mut self, result: &mut ProgramResult) {
        let len = result.return_data().len();
        let cost = (len as u64).saturating_mul(self.config.fee_schedule.create_data);

        if self.gas_left < cost {
            if !self.config.constants.create_empty_contract_on_oog {
                result.set_exception(VmError::out_of_gas(
                    "No gas to return just created contract",
                    cost,
                    self.gas_left,
                ));
            }
            result.set_return_data(Vec::new());
        } else if len > self.config.constants.max_contract_size {
            result.set_exception(VmError::out_of_gas(
                format!("Contract size too large: {len}"),
                cost,
                self.gas_left,
            ));
            result.set_return_data(Vec::new());
        } else {
            self.gas_left -= cost;
            result.spend_gas(cost);
            let address = compute_contract_address(self.tx.from, self.tx.nonce);
            debug!(contract = ?address, size = len, "contract deployed");
            self.repo.save_code(address, result.return_data().to_vec());
        }
    }

    fn commit(&mut self) {
        if std::mem::take(&mut self.tracking) {
            self.repo.commit();
        }
    }

    fn rollback(&mut self) {
        if std::mem::take(&mut self.tracking) {
            self.repo.rollback();
        }
    }

    // =========================================================================
    // FINISH
    // =========================================================================

    /// Applies refunds and deletions and summarizes the transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` unless [`init`](Self::init) succeeded.
    pub fn finish(mut self) -> Result<TransactionSummary, TransactionError> {
        if !self.ready {
            return Err(TransactionError::NotReady);
        }
        // A checkpoint left open means `go` never ran.
        self.commit();

        let fees = &self.config.fee_schedule;
        let deleted: Vec<Address> = self.result.delete_accounts().iter().copied().collect();
        self.result
            .add_future_refund((deleted.len() as u64).saturating_mul(fees.suicide_refund));

        let refund = calculate_refund(self.gas_used(), self.result.future_refund());
        self.gas_left += refund;

        for address in &deleted {
            self.repo.delete(*address);
        }

        if !self.local_call {
            let total_refund = U256::from(self.gas_left).saturating_mul(self.tx.gas_price);
            self.repo.add_balance(self.tx.from, total_refund);
            info!(amount = %total_refund, "pay total refund to sender");
        }

        let gas_used = self.gas_used();
        let failed = self.result.exception().is_some();
        let return_data = self.result.return_data().to_vec();
        let logs = self.result.logs().to_vec();
        let summary = TransactionSummary {
            value: self.tx.value,
            gas: self.tx.gas,
            gas_price: self.tx.gas_price,
            gas_used,
            failed,
            return_data,
            internal_transactions: self.result.into_internal_transactions(),
            deleted_accounts: deleted,
            logs,
            tx: self.tx,
        };

        let check = check_all_invariants(&summary);
        if !check.is_valid() {
            warn!(violations = ?check, "transaction summary breaks an invariant");
        }
        Ok(summary)
    }

    fn gas_used(&self) -> u64 {
        self.tx.gas.saturating_sub(self.gas_left)
    }
}

// =============================================================================
// TESTS
// =============================================================================
