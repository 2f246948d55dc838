//! # Core Domain Entities
//!
//! Records that flow in and out of the engine: the originating transaction,
//! the block it executes in, the invocation context of a frame, emitted logs,
//! internal transaction records and the final transaction summary.

use crate::domain::value_objects::{Address, Hash, U256};
use crate::domain::word::{Word, WORD_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// TRANSACTION
// =============================================================================

/// An externally signed transaction as handed over by the block processor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash, stamped on every internal transaction it causes.
    pub hash: Hash,
    /// Sender address.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Sender nonce.
    pub nonce: u64,
    /// Value transferred.
    pub value: U256,
    /// Call data or init code.
    pub data: Vec<u8>,
    /// Gas limit.
    pub gas: u64,
    /// Gas price.
    pub gas_price: U256,
}

impl Transaction {
    /// Returns true if this transaction creates a contract.
    #[must_use]
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

// =============================================================================
// BLOCK CONTEXT
// =============================================================================

/// Block-level values visible to executing code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Hash of the parent block.
    pub prev_hash: Hash,
    /// Coinbase address (block proposer).
    pub coinbase: Address,
    /// Block timestamp (unix seconds).
    pub timestamp: u64,
    /// Block number.
    pub number: u64,
    /// Block difficulty.
    pub difficulty: U256,
    /// Block gas limit.
    pub gas_limit: u64,
}

impl Default for BlockContext {
    fn default() -> Self {
        Self {
            prev_hash: Hash::ZERO,
            coinbase: Address::ZERO,
            timestamp: 0,
            number: 0,
            difficulty: U256::zero(),
            gas_limit: 10_000_000,
        }
    }
}

// =============================================================================
// EXECUTION CONTEXT
// =============================================================================

/// Invocation context of one frame.
///
/// Root frames are built from a [`Transaction`]; child frames inherit origin,
/// gas price, block and transaction hash from their parent.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    /// Account whose storage and balance the code acts on.
    pub address: Address,
    /// Externally owned account that started the transaction.
    pub origin: Address,
    /// Immediate caller.
    pub caller: Address,
    /// Value visible through CALLVALUE.
    pub value: U256,
    /// Call data.
    pub data: Vec<u8>,
    /// Gas made available to the frame.
    pub gas: u64,
    /// Gas price of the originating transaction.
    pub gas_price: U256,
    /// Block the transaction executes in.
    pub block: BlockContext,
    /// Call depth, 0 for the root frame.
    pub depth: usize,
    /// State-modifying opcodes are forbidden when set.
    pub is_static: bool,
    /// Hash of the transaction that caused this frame.
    pub tx_hash: Hash,
}

impl ExecutionContext {
    /// Creates the root context for a transaction.
    #[must_use]
    pub fn for_transaction(tx: &Transaction, owner: Address, block: BlockContext) -> Self {
        let data = if tx.is_create() {
            Vec::new()
        } else {
            tx.data.clone()
        };
        Self {
            address: owner,
            origin: tx.from,
            caller: tx.from,
            value: tx.value,
            data,
            gas: tx.gas,
            gas_price: tx.gas_price,
            block,
            depth: 0,
            is_static: false,
            tx_hash: tx.hash,
        }
    }

    /// Creates the context of a nested frame.
    #[must_use]
    pub fn child(
        &self,
        caller: Address,
        address: Address,
        gas: u64,
        value: U256,
        data: Vec<u8>,
        is_static: bool,
    ) -> Self {
        Self {
            address,
            origin: self.origin,
            caller,
            value,
            data,
            gas,
            gas_price: self.gas_price,
            block: self.block.clone(),
            depth: self.depth + 1,
            is_static,
            tx_hash: self.tx_hash,
        }
    }

    /// Size of the call data.
    #[must_use]
    pub fn data_size(&self) -> Word {
        Word::from(self.data.len())
    }

    /// 32 bytes of call data starting at `index`, zero-padded on the right.
    #[must_use]
    pub fn data_value(&self, index: Word) -> Word {
        let Some(start) = index.int_value().filter(|i| *i < self.data.len()) else {
            return Word::ZERO;
        };
        let end = (start + WORD_SIZE).min(self.data.len());
        let mut buffer = [0u8; 32];
        buffer[..end - start].copy_from_slice(&self.data[start..end]);
        Word::from(buffer)
    }

    /// `length` bytes of call data starting at `offset`, zero-padded on the right.
    #[must_use]
    pub fn data_copy(&self, offset: Word, length: usize) -> Vec<u8> {
        let mut buffer = vec![0u8; length];
        if let Some(start) = offset.int_value().filter(|o| *o < self.data.len()) {
            let available = (self.data.len() - start).min(length);
            buffer[..available].copy_from_slice(&self.data[start..start + available]);
        }
        buffer
    }
}

// =============================================================================
// LOG
// =============================================================================

/// A log record emitted by LOG0..LOG4.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInfo {
    /// Contract address that emitted the log.
    pub address: Address,
    /// Topics in pop order (up to 4).
    pub topics: Vec<Word>,
    /// Log payload read from memory.
    pub data: Vec<u8>,
}

impl LogInfo {
    /// Creates a new log.
    #[must_use]
    pub fn new(address: Address, topics: Vec<Word>, data: Vec<u8>) -> Self {
        Self {
            address,
            topics,
            data,
        }
    }
}

// =============================================================================
// INTERNAL TRANSACTION
// =============================================================================

/// What caused an internal transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InternalTxKind {
    /// CALL.
    Call,
    /// CALLCODE.
    CallCode,
    /// DELEGATECALL.
    DelegateCall,
    /// STATICCALL.
    StaticCall,
    /// CREATE.
    Create,
    /// SUICIDE (self-destruct transfer).
    Suicide,
}

impl fmt::Display for InternalTxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Call => "CALL",
            Self::CallCode => "CALLCODE",
            Self::DelegateCall => "DELEGATECALL",
            Self::StaticCall => "STATICCALL",
            Self::Create => "CREATE",
            Self::Suicide => "SUICIDE",
        };
        f.write_str(name)
    }
}

/// A synthetic transfer, call or create performed by executing code.
///
/// Everything is fixed at construction except the rejected flag, which is set
/// when the originating frame fails or reverts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransaction {
    /// Hash of the transaction whose execution produced this record.
    pub parent_hash: Hash,
    /// Call depth of the frame that produced it.
    pub depth: usize,
    /// Position within the producing frame's records.
    pub index: usize,
    /// Kind of operation.
    pub kind: InternalTxKind,
    /// Source account.
    pub from: Address,
    /// Target account, `None` for CREATE.
    pub to: Option<Address>,
    /// Nonce of the source account when the record was made.
    pub nonce: u64,
    /// Value moved.
    pub value: U256,
    /// Call input or init code.
    pub data: Vec<u8>,
    /// Gas handed to the operation.
    pub gas: u64,
    /// Gas price of the originating transaction.
    pub gas_price: U256,
    /// Human-readable description.
    pub note: String,
    rejected: bool,
}

impl InternalTransaction {
    /// Creates a new, not yet rejected record.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        parent_hash: Hash,
        depth: usize,
        index: usize,
        kind: InternalTxKind,
        from: Address,
        to: Option<Address>,
        nonce: u64,
        value: U256,
        data: Vec<u8>,
        gas: u64,
        gas_price: U256,
    ) -> Self {
        let note = match to {
            Some(to) => format!("{kind} {from:?} -> {to:?} at depth {depth}"),
            None => format!("{kind} by {from:?} at depth {depth}"),
        };
        Self {
            parent_hash,
            depth,
            index,
            kind,
            from,
            to,
            nonce,
            value,
            data,
            gas,
            gas_price,
            note,
            rejected: false,
        }
    }

    /// Marks the record as rejected.
    pub fn reject(&mut self) {
        self.rejected = true;
    }

    /// Returns true once the originating frame failed or reverted.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Returns true for CREATE records.
    #[must_use]
    pub fn is_create(&self) -> bool {
        self.kind == InternalTxKind::Create
    }
}

// =============================================================================
// TRANSACTION SUMMARY
// =============================================================================

/// Outcome of a fully processed transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// The processed transaction.
    pub tx: Transaction,
    /// Value transferred.
    pub value: U256,
    /// Gas limit.
    pub gas: u64,
    /// Gas price.
    pub gas_price: U256,
    /// Gas charged after refunds.
    pub gas_used: u64,
    /// True when execution ended in an exception.
    pub failed: bool,
    /// Data returned by the root frame.
    pub return_data: Vec<u8>,
    /// Internal transactions in execution order.
    pub internal_transactions: Vec<InternalTransaction>,
    /// Self-destructed accounts removed from state.
    pub deleted_accounts: Vec<Address>,
    /// Logs emitted by successful frames.
    pub logs: Vec<LogInfo>,
}

// =============================================================================
// TESTS
// =============================================================================
