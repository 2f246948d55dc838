//! # Program Result
//!
//! Everything a frame accumulates while it runs. A parent folds a finished
//! child's result into its own with [`ProgramResult::merge`].

use crate::domain::entities::{InternalTransaction, LogInfo};
use crate::domain::value_objects::Address;
use crate::errors::VmError;
use std::collections::BTreeSet;

/// Accumulated outcome of one frame.
#[derive(Clone, Debug, Default)]
pub struct ProgramResult {
    gas_used: u64,
    return_data: Vec<u8>,
    exception: Option<VmError>,
    revert: bool,
    delete_accounts: BTreeSet<Address>,
    touched_accounts: BTreeSet<Address>,
    internal_transactions: Vec<InternalTransaction>,
    logs: Vec<LogInfo>,
    future_refund: u64,
}

impl ProgramResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // GAS
    // =========================================================================

    /// Gas consumed so far.
    #[must_use]
    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    /// Adds to the consumed gas.
    pub fn spend_gas(&mut self, gas: u64) {
        self.gas_used = self.gas_used.saturating_add(gas);
    }

    /// Returns gas to the frame.
    pub fn refund_gas(&mut self, gas: u64) {
        self.gas_used = self.gas_used.saturating_sub(gas);
    }

    /// Refund pool settled when the transaction finishes.
    #[must_use]
    pub fn future_refund(&self) -> u64 {
        self.future_refund
    }

    /// Adds to the refund pool.
    pub fn add_future_refund(&mut self, gas: u64) {
        self.future_refund = self.future_refund.saturating_add(gas);
    }

    /// Empties the refund pool.
    pub fn reset_future_refund(&mut self) {
        self.future_refund = 0;
    }

    // =========================================================================
    // HALT STATE
    // =========================================================================

    /// Bytes returned by RETURN or REVERT.
    #[must_use]
    pub fn return_data(&self) -> &[u8] {
        &self.return_data
    }

    /// Replaces the return data.
    pub fn set_return_data(&mut self, data: Vec<u8>) {
        self.return_data = data;
    }

    /// Terminal exception, if the frame failed.
    #[must_use]
    pub fn exception(&self) -> Option<&VmError> {
        self.exception.as_ref()
    }

    /// Records the terminal exception.
    pub fn set_exception(&mut self, error: VmError) {
        self.exception = Some(error);
    }

    /// True if the frame halted with REVERT.
    #[must_use]
    pub fn is_revert(&self) -> bool {
        self.revert
    }

    /// Marks the frame as reverted.
    pub fn set_revert(&mut self) {
        self.revert = true;
    }

    /// True if the frame neither failed nor reverted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exception.is_none() && !self.revert
    }

    // =========================================================================
    // SIDE EFFECTS
    // =========================================================================

    /// Accounts scheduled for deletion.
    #[must_use]
    pub fn delete_accounts(&self) -> &BTreeSet<Address> {
        &self.delete_accounts
    }

    /// Schedules an account for deletion.
    pub fn add_delete_account(&mut self, address: Address) {
        self.delete_accounts.insert(address);
    }

    /// Accounts touched by value transfers.
    #[must_use]
    pub fn touched_accounts(&self) -> &BTreeSet<Address> {
        &self.touched_accounts
    }

    /// Records an account as touched.
    pub fn add_touch_account(&mut self, address: Address) {
        self.touched_accounts.insert(address);
    }

    /// Emitted logs in order.
    #[must_use]
    pub fn logs(&self) -> &[LogInfo] {
        &self.logs
    }

    /// Appends a log.
    pub fn add_log(&mut self, log: LogInfo) {
        self.logs.push(log);
    }

    /// Internal transaction records in order.
    #[must_use]
    pub fn internal_transactions(&self) -> &[InternalTransaction] {
        &self.internal_transactions
    }

    /// Appends an internal transaction record and returns its index.
    pub fn add_internal_transaction(&mut self, tx: InternalTransaction) -> usize {
        self.internal_transactions.push(tx);
        self.internal_transactions.len() - 1
    }

    /// Rejects the record at `index`.
    pub fn reject_internal_transaction(&mut self, index: usize) {
        if let Some(tx) = self.internal_transactions.get_mut(index) {
            tx.reject();
        }
    }

    /// Rejects every record held by this result.
    pub fn reject_internal_transactions(&mut self) {
        for tx in &mut self.internal_transactions {
            tx.reject();
        }
    }

    /// Drops the side effects of a failed transaction.
    pub fn discard_side_effects(&mut self) {
        self.delete_accounts.clear();
        self.logs.clear();
        self.future_refund = 0;
    }

    /// Folds a finished child into this result.
    ///
    /// Internal transactions are always kept. Deletions, logs, refunds and
    /// touched accounts are taken only from a child that succeeded.
    pub fn merge(&mut self, child: &Self) {
        self.internal_transactions
            .extend(child.internal_transactions.iter().cloned());
        if child.is_success() {
            self.delete_accounts
                .extend(child.delete_accounts.iter().copied());
            self.logs.extend(child.logs.iter().cloned());
            self.add_future_refund(child.future_refund);
            self.touched_accounts
                .extend(child.touched_accounts.iter().copied());
        }
    }

    /// Consumes the result, yielding its internal transactions.
    #[must_use]
    pub fn into_internal_transactions(self) -> Vec<InternalTransaction> {
        self.internal_transactions
    }
}

// =============================================================================
// TESTS
// =============================================================================
