//! # Program
//!
//! One execution frame: code, program counter, operand stack, memory, the
//! invocation context and the result accumulated so far.
//!
//! A `Program` never drives itself. The [`Vm`](crate::evm::interpreter::Vm)
//! steps it, spawns child frames for CALL and CREATE, and folds their results
//! back in once they halt.

use crate::domain::entities::{ExecutionContext, InternalTransaction, InternalTxKind};
use crate::domain::result::ProgramResult;
use crate::domain::value_objects::{Address, U256};
use crate::domain::word::Word;
use crate::errors::VmError;
use crate::evm::jumpdest::JumpDestinations;
use crate::evm::memory::Memory;
use crate::evm::opcodes::Opcode;
use crate::evm::stack::Stack;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// MESSAGE CALL
// =============================================================================

/// Operands of a CALL-family instruction after gas adjustment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageCall {
    /// CALL, CALLCODE, DELEGATECALL or STATICCALL.
    pub op: Opcode,
    /// Gas handed to the callee, stipend included.
    pub gas: u64,
    /// Account whose code runs.
    pub code_address: Address,
    /// Value transferred with the call.
    pub endowment: U256,
    /// Input window in the caller's memory.
    pub in_offset: usize,
    /// Input window length.
    pub in_size: usize,
    /// Output window in the caller's memory.
    pub out_offset: usize,
    /// Output window length.
    pub out_size: usize,
}

impl MessageCall {
    /// Kind of internal transaction this call records.
    #[must_use]
    pub fn kind(&self) -> InternalTxKind {
        match self.op {
            Opcode::CallCode => InternalTxKind::CallCode,
            Opcode::DelegateCall => InternalTxKind::DelegateCall,
            Opcode::StaticCall => InternalTxKind::StaticCall,
            _ => InternalTxKind::Call,
        }
    }
}

// =============================================================================
// PROGRAM
// =============================================================================

/// A single frame.
#[derive(Debug)]
pub struct Program {
    code: Arc<[u8]>,
    jump_dests: Arc<JumpDestinations>,
    pc: usize,
    stack: Stack,
    memory: Memory,
    ctx: ExecutionContext,
    return_data_buffer: Vec<u8>,
    result: ProgramResult,
    stopped: bool,
}

impl Program {
    /// Creates a frame, analyzing `code` for jump destinations.
    #[must_use]
    pub fn new(code: Vec<u8>, ctx: ExecutionContext, max_stack_size: usize) -> Self {
        let jump_dests = Arc::new(JumpDestinations::analyze(&code));
        Self::with_jump_dests(code, jump_dests, ctx, max_stack_size)
    }

    /// Creates a frame reusing an existing analysis of `code`.
    #[must_use]
    pub fn with_jump_dests(
        code: Vec<u8>,
        jump_dests: Arc<JumpDestinations>,
        ctx: ExecutionContext,
        max_stack_size: usize,
    ) -> Self {
        let stopped = code.is_empty();
        Self {
            code: code.into(),
            jump_dests,
            pc: 0,
            stack: Stack::with_limit(max_stack_size),
            memory: Memory::new(),
            ctx,
            return_data_buffer: Vec::new(),
            result: ProgramResult::new(),
            stopped,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Code being executed.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Program counter.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Operand stack.
    #[must_use]
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Operand stack, mutably.
    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// Memory.
    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Memory, mutably.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Invocation context.
    #[must_use]
    pub fn ctx(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Address the frame acts on.
    #[must_use]
    pub fn owner(&self) -> Address {
        self.ctx.address
    }

    /// True inside a STATICCALL.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.ctx.is_static
    }

    /// Accumulated result.
    #[must_use]
    pub fn result(&self) -> &ProgramResult {
        &self.result
    }

    /// Accumulated result, mutably.
    pub fn result_mut(&mut self) -> &mut ProgramResult {
        &mut self.result
    }

    /// Consumes the frame, yielding its result.
    #[must_use]
    pub fn into_result(self) -> ProgramResult {
        self.result
    }

    /// Output of the most recent CALL or CREATE.
    #[must_use]
    pub fn return_data_buffer(&self) -> &[u8] {
        &self.return_data_buffer
    }

    /// Replaces the return data buffer.
    pub fn set_return_data_buffer(&mut self, data: Vec<u8>) {
        self.return_data_buffer = data;
    }

    /// Empties the return data buffer.
    pub fn clear_return_data_buffer(&mut self) {
        self.return_data_buffer.clear();
    }

    // =========================================================================
    // CONTROL FLOW
    // =========================================================================

    /// True once the frame has halted.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Halts the frame.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Byte at the program counter, STOP past the end.
    #[must_use]
    pub fn current_op(&self) -> u8 {
        self.code.get(self.pc).copied().unwrap_or(0)
    }

    /// Advances one byte.
    pub fn step(&mut self) {
        self.set_pc(self.pc + 1);
    }

    /// Moves the program counter; running off the code halts the frame.
    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
        if self.pc >= self.code.len() {
            self.stop();
        }
    }

    /// Reads `n` immediate bytes, zero-padded past the end of the code.
    pub fn sweep(&mut self, n: usize) -> Vec<u8> {
        let mut data = vec![0u8; n];
        let start = self.pc.min(self.code.len());
        let end = self.pc.saturating_add(n).min(self.code.len());
        data[..end - start].copy_from_slice(&self.code[start..end]);
        self.set_pc(self.pc.saturating_add(n));
        data
    }

    /// Checks a jump target.
    ///
    /// # Errors
    ///
    /// Returns `BadJumpDestination` if `dest` is wider than four bytes or does
    /// not land on a JUMPDEST instruction.
    pub fn verify_jump_dest(&self, dest: Word) -> Result<usize, VmError> {
        if dest.bytes_occupied() > 4 {
            return Err(VmError::BadJumpDestination(None));
        }
        #[allow(clippy::cast_possible_truncation)]
        let pc = dest.value().low_u64() as usize;
        if self.jump_dests.is_valid(pc) {
            Ok(pc)
        } else {
            Err(VmError::BadJumpDestination(Some(pc)))
        }
    }

    // =========================================================================
    // GAS
    // =========================================================================

    /// Gas still available to the frame.
    #[must_use]
    pub fn gas_left(&self) -> u64 {
        self.ctx.gas.saturating_sub(self.result.gas_used())
    }

    /// Charges `gas`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfGas` if less than `gas` is left; nothing is charged then.
    pub fn spend_gas(&mut self, gas: u64, cause: &str) -> Result<(), VmError> {
        let available = self.gas_left();
        if available < gas {
            return Err(VmError::out_of_gas(cause, gas, available));
        }
        debug!(cause, gas, "spend gas");
        self.result.spend_gas(gas);
        Ok(())
    }

    /// Charges everything that is left.
    pub fn spend_all_gas(&mut self) {
        let gas = self.gas_left();
        self.result.spend_gas(gas);
    }

    /// Returns unused gas of a child frame.
    pub fn refund_gas(&mut self, gas: u64, cause: &str) {
        debug!(cause, gas, "refund gas");
        self.result.refund_gas(gas);
    }

    // =========================================================================
    // RECORDS
    // =========================================================================

    /// Appends an internal transaction to this frame's result and returns its
    /// index.
    #[allow(clippy::too_many_arguments)]
    pub fn add_internal_tx(
        &mut self,
        kind: InternalTxKind,
        from: Address,
        to: Option<Address>,
        nonce: u64,
        value: U256,
        data: Vec<u8>,
        gas: u64,
    ) -> usize {
        let tx = InternalTransaction::new(
            self.ctx.tx_hash,
            self.ctx.depth,
            self.result.internal_transactions().len(),
            kind,
            from,
            to,
            nonce,
            value,
            data,
            gas,
            self.ctx.gas_price,
        );
        debug!(note = %tx.note, "internal transaction");
        self.result.add_internal_transaction(tx)
    }
}

// =============================================================================
// TESTS
// =============================================================================
