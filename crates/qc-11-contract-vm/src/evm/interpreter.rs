//! # EVM Interpreter
//!
//! The execution engine. Every instruction goes through the same cycle:
//!
//! 1. decode the byte at the program counter (undefined bytes are fatal)
//! 2. verify stack arity
//! 3. price the instruction, memory growth included, and charge it
//! 4. execute it
//!
//! Any error halts the frame: all of its gas is consumed, its refund pool is
//! cleared and the error is stored in its [`ProgramResult`].
//!
//! ## Nested frames
//!
//! CALL and CREATE never recurse on the native stack. A child frame is pushed
//! on a heap-allocated frame list together with what the parent needs to
//! resume; the driver always steps the innermost frame and, once it halts,
//! folds its result back into the parent. Call depth is therefore bounded
//! only by gas and the configured depth limit.

use crate::config::VmConfig;
use crate::domain::entities::{ExecutionContext, InternalTxKind, LogInfo};
use crate::domain::result::ProgramResult;
use crate::domain::services::{compute_contract_address, keccak256};
use crate::domain::value_objects::{Address, U256};
use crate::domain::word::{Word, WORD_SIZE};
use crate::errors::VmError;
use crate::evm::gas::{
    calc_mem_gas, exp_gas_cost, log_gas_cost, mem_needed, sha3_gas_cost, sstore_gas_cost,
};
use crate::evm::jumpdest::JumpDestCache;
use crate::evm::opcodes::Opcode;
use crate::evm::precompiles::PrecompiledContract;
use crate::evm::program::{MessageCall, Program};
use crate::ports::outbound::{BlockStore, Repository};
use std::cmp::Ordering;
use tracing::{debug, trace};

// =============================================================================
// FRAMES
// =============================================================================

/// What a parent has to do once its child halts.
#[derive(Debug)]
enum Pending {
    Call {
        msg: MessageCall,
        tx_index: usize,
    },
    Create {
        address: Address,
        tx_index: usize,
        gas: u64,
    },
}

/// A running child together with its continuation.
#[derive(Debug)]
struct Frame {
    program: Program,
    pending: Pending,
}

// =============================================================================
// VM
// =============================================================================

/// Drives programs against a repository.
pub struct Vm<'a> {
    repo: &'a mut dyn Repository,
    block_store: &'a dyn BlockStore,
    config: &'a VmConfig,
    jump_dests: JumpDestCache,
    trace: bool,
}

impl<'a> Vm<'a> {
    /// Creates an engine over `repo`.
    pub fn new(
        repo: &'a mut dyn Repository,
        block_store: &'a dyn BlockStore,
        config: &'a VmConfig,
    ) -> Self {
        Self {
            repo,
            block_store,
            config,
            jump_dests: JumpDestCache::new(),
            trace: false,
        }
    }

    /// Emits a trace event per executed instruction when enabled.
    #[must_use]
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Runs `root` and every frame it spawns until `root` halts.
    ///
    /// Never fails: errors end up in the halted frame's result.
    pub fn play(&mut self, root: &mut Program) {
        let mut frames: Vec<Frame> = Vec::new();

        loop {
            let current = frames.last_mut().map_or(&mut *root, |f| &mut f.program);

            if current.is_stopped() {
                let Some(frame) = frames.pop() else {
                    break;
                };
                let parent = frames.last_mut().map_or(&mut *root, |f| &mut f.program);
                if let Err(err) = self.resume(parent, frame) {
                    Self::halt(parent, err);
                }
                continue;
            }

            match self.step(current) {
                Ok(Some(child)) => frames.push(child),
                Ok(None) => {}
                Err(err) => Self::halt(current, err),
            }
        }
    }

    fn halt(program: &mut Program, err: VmError) {
        debug!(
            address = ?program.owner(),
            depth = program.ctx().depth,
            pc = program.pc(),
            error = %err,
            "frame halted"
        );
        program.spend_all_gas();
        program.result_mut().reset_future_refund();
        program.stop();
        program.result_mut().set_exception(err);
    }

    /// Builds a frame sharing the jump analysis of identical code.
    fn load(&mut self, code: Vec<u8>, ctx: ExecutionContext) -> Program {
        let jump_dests = self.jump_dests.get(&code);
        Program::with_jump_dests(code, jump_dests, ctx, self.config.constants.max_stack_size)
    }

    // =========================================================================
    // STEP
    // =========================================================================

    fn step(&mut self, program: &mut Program) -> Result<Option<Frame>, VmError> {
        let byte = program.current_op();
        let op = Opcode::from_byte(byte).ok_or(VmError::InvalidOpcode(byte))?;
        program.stack().verify(op.require(), op.ret())?;

        let call_gas = self.charge(program, op)?;

        if self.trace {
            trace!(
                pc = program.pc(),
                op = %op,
                gas = program.gas_left(),
                depth = program.ctx().depth,
                "step"
            );
        }

        self.execute(program, op, call_gas)
    }

    /// Accounts are never reported empty, so the new-account surcharges of
    /// SUICIDE and CALL do not apply.
    #[allow(clippy::unused_self)]
    fn is_dead_account(&self, _address: Address) -> bool {
        false
    }

    /// Prices and charges `op`. Returns the gas forwarded to a callee, zero
    /// for everything but the call family.
    fn charge(&self, program: &mut Program, op: Opcode) -> Result<u64, VmError> {
        let fees = &self.config.fee_schedule;
        let stack = program.stack();
        let old_mem = program.memory().size();
        let mem = |offset: Word, size: Word| calc_mem_gas(fees, old_mem, mem_needed(offset, size), 0);
        let mut call_gas = 0;
        let mut refund = 0;

        let cost = match op {
            Opcode::Stop => 0,
            Opcode::Suicide => {
                let beneficiary = stack.peek()?.to_address();
                let mut cost = fees.suicide;
                if self.is_dead_account(beneficiary)
                    && !self.repo.get_balance(program.owner()).is_zero()
                {
                    cost += fees.new_acct_suicide;
                }
                cost
            }
            Opcode::SStore => {
                let current = self.repo.get_storage_row(program.owner(), stack.peek()?);
                let (cost, sstore_refund) = sstore_gas_cost(fees, current, stack.get(1)?);
                refund = sstore_refund;
                cost
            }
            Opcode::SLoad => fees.sload,
            Opcode::Balance => fees.balance,
            Opcode::MStore | Opcode::MLoad => {
                op.tier().cost() + mem(stack.peek()?, Word::from(WORD_SIZE))?
            }
            Opcode::MStore8 => op.tier().cost() + mem(stack.peek()?, Word::ONE)?,
            Opcode::Return | Opcode::Revert => mem(stack.peek()?, stack.get(1)?)?,
            Opcode::Sha3 => {
                let size = stack.get(1)?;
                sha3_gas_cost(fees, size.long_value_safe()) + mem(stack.peek()?, size)?
            }
            Opcode::CallDataCopy | Opcode::ReturnDataCopy | Opcode::CodeCopy => {
                let size = stack.get(2)?;
                op.tier().cost()
                    + calc_mem_gas(
                        fees,
                        old_mem,
                        mem_needed(stack.peek()?, size),
                        size.long_value_safe(),
                    )?
            }
            Opcode::ExtCodeSize => fees.ext_code_size,
            Opcode::ExtCodeCopy => {
                let size = stack.get(3)?;
                fees.ext_code_copy
                    + calc_mem_gas(
                        fees,
                        old_mem,
                        mem_needed(stack.get(1)?, size),
                        size.long_value_safe(),
                    )?
            }
            Opcode::Call | Opcode::CallCode | Opcode::DelegateCall | Opcode::StaticCall => {
                let requested = stack.peek()?;
                let target = stack.get(1)?.to_address();
                let value = if op.call_has_value() {
                    stack.get(2)?
                } else {
                    Word::ZERO
                };

                let mut cost = fees.call;
                if op == Opcode::Call && self.is_dead_account(target) && !value.is_zero() {
                    cost += fees.new_acct_call;
                }
                if !value.is_zero() {
                    cost += fees.vt_call;
                }

                let first = if op.call_has_value() { 3 } else { 2 };
                let input = mem_needed(stack.get(first)?, stack.get(first + 1)?);
                let output = mem_needed(stack.get(first + 2)?, stack.get(first + 3)?);
                cost += calc_mem_gas(fees, old_mem, input.max(output), 0)?;

                let available = program.gas_left();
                if cost > available {
                    return Err(VmError::out_of_gas(op.name(), cost, available));
                }
                call_gas = self.config.call_gas(op, requested, available - cost);
                cost + call_gas
            }
            Opcode::Create => fees.create + mem(stack.get(1)?, stack.get(2)?)?,
            Opcode::Log0 | Opcode::Log1 | Opcode::Log2 | Opcode::Log3 | Opcode::Log4 => {
                let size = stack.get(1)?;
                let available = program.gas_left();
                let (data_cost, overflow) =
                    size.value().overflowing_mul(U256::from(fees.log_data_gas));
                if overflow || data_cost > U256::from(available) {
                    return Err(VmError::OutOfGas {
                        cause: op.name(),
                        required: if overflow { U256::MAX } else { data_cost },
                        available,
                    });
                }
                let topics = op.log_topics().unwrap_or(0);
                log_gas_cost(fees, topics, size.value().low_u64()) + mem(stack.peek()?, size)?
            }
            Opcode::Exp => exp_gas_cost(fees, stack.get(1)?),
            _ => op.tier().cost(),
        };

        if refund > 0 {
            program.result_mut().add_future_refund(refund);
        }
        program.spend_gas(cost, &op.name())?;
        Ok(call_gas)
    }

    // =========================================================================
    // EXECUTE
    // =========================================================================

    fn execute(
        &mut self,
        program: &mut Program,
        op: Opcode,
        call_gas: u64,
    ) -> Result<Option<Frame>, VmError> {
        if let Some(n) = op.push_size() {
            program.step();
            let data = program.sweep(n);
            program.stack_mut().push(Word::from_be_slice(&data))?;
            return Ok(None);
        }

        match op {
            Opcode::Stop => {
                program.result_mut().set_return_data(Vec::new());
                program.stop();
            }
            Opcode::Jump => {
                let dest = program.stack_mut().pop()?;
                let pc = program.verify_jump_dest(dest)?;
                program.set_pc(pc);
            }
            Opcode::JumpI => {
                let (dest, condition) = pop2(program)?;
                if condition.is_zero() {
                    program.step();
                } else {
                    let pc = program.verify_jump_dest(dest)?;
                    program.set_pc(pc);
                }
            }
            Opcode::Return | Opcode::Revert => {
                let (offset, size) = pop2(program)?;
                let data = program
                    .memory_mut()
                    .read(offset.int_value_safe(), size.int_value_safe());
                program.result_mut().set_return_data(data);
                program.step();
                program.stop();
                if op == Opcode::Revert {
                    program.result_mut().set_revert();
                }
            }
            Opcode::Suicide => {
                ensure_not_static(program)?;
                let beneficiary = program.stack_mut().pop()?.to_address();
                self.suicide(program, beneficiary);
                program.stop();
            }
            Opcode::Create => {
                ensure_not_static(program)?;
                let (value, offset, size) = pop3(program)?;
                let child = self.create_contract(program, value, offset, size)?;
                if child.is_some() {
                    return Ok(child);
                }
                program.step();
            }
            Opcode::Call | Opcode::CallCode | Opcode::DelegateCall | Opcode::StaticCall => {
                let child = self.message_call(program, op, call_gas)?;
                if child.is_some() {
                    return Ok(child);
                }
                program.step();
            }
            _ => {
                if let Some(word) = self.compute(program, op)? {
                    program.stack_mut().push(word)?;
                }
                program.step();
            }
        }
        Ok(None)
    }

    /// Instructions that only touch the stack, memory or state and then fall
    /// through to the next one. Returns the word to push, if any.
    #[allow(clippy::too_many_lines)]
    fn compute(&mut self, program: &mut Program, op: Opcode) -> Result<Option<Word>, VmError> {
        let word = match op {
            // -----------------------------------------------------------------
            // Arithmetic
            // -----------------------------------------------------------------
            Opcode::Add => binary(program, Word::add)?,
            Opcode::Mul => binary(program, Word::mul)?,
            Opcode::Sub => binary(program, Word::sub)?,
            Opcode::Div => binary(program, Word::div)?,
            Opcode::SDiv => binary(program, Word::sdiv)?,
            Opcode::Mod => binary(program, Word::modulo)?,
            Opcode::SMod => binary(program, Word::smod)?,
            Opcode::Exp => binary(program, Word::exp)?,
            Opcode::AddMod => {
                let (a, b, n) = pop3(program)?;
                a.addmod(b, n)
            }
            Opcode::MulMod => {
                let (a, b, n) = pop3(program)?;
                a.mulmod(b, n)
            }
            Opcode::SignExtend => {
                let k = program.stack_mut().pop()?;
                match k.int_value().filter(|k| *k < WORD_SIZE) {
                    Some(k) => program.stack_mut().pop()?.sign_extend(k),
                    None => return Ok(None),
                }
            }

            // -----------------------------------------------------------------
            // Comparison & bitwise
            // -----------------------------------------------------------------
            Opcode::Lt => binary(program, |a, b| Word::from_bool(a.value() < b.value()))?,
            Opcode::Gt => binary(program, |a, b| Word::from_bool(a.value() > b.value()))?,
            Opcode::SLt => binary(program, |a, b| {
                Word::from_bool(a.signed_cmp(&b) == Ordering::Less)
            })?,
            Opcode::SGt => binary(program, |a, b| {
                Word::from_bool(a.signed_cmp(&b) == Ordering::Greater)
            })?,
            Opcode::Eq => binary(program, |a, b| Word::from_bool(a == b))?,
            Opcode::IsZero => Word::from_bool(program.stack_mut().pop()?.is_zero()),
            Opcode::And => binary(program, Word::and)?,
            Opcode::Or => binary(program, Word::or)?,
            Opcode::Xor => binary(program, Word::xor)?,
            Opcode::Not => program.stack_mut().pop()?.not(),
            Opcode::Byte => binary(program, |index, value| {
                Word::from(u64::from(index.int_value().map_or(0, |i| value.byte(i))))
            })?,
            Opcode::Sha3 => {
                let (offset, size) = pop2(program)?;
                let data = program
                    .memory_mut()
                    .read(offset.int_value_safe(), size.int_value_safe());
                Word::from(keccak256(&data).0)
            }

            // -----------------------------------------------------------------
            // Environment
            // -----------------------------------------------------------------
            Opcode::Address => Word::from(program.owner()),
            Opcode::Balance => {
                let address = program.stack_mut().pop()?.to_address();
                Word::from(self.repo.get_balance(address))
            }
            Opcode::Origin => Word::from(program.ctx().origin),
            Opcode::Caller => Word::from(program.ctx().caller),
            Opcode::CallValue => Word::from(program.ctx().value),
            Opcode::CallDataLoad => {
                let index = program.stack_mut().pop()?;
                program.ctx().data_value(index)
            }
            Opcode::CallDataSize => program.ctx().data_size(),
            Opcode::CallDataCopy => {
                let (mem_offset, data_offset, size) = pop3(program)?;
                let size = size.int_value_safe();
                let data = program.ctx().data_copy(data_offset, size);
                program
                    .memory_mut()
                    .write(mem_offset.int_value_safe(), &data, size, false);
                return Ok(None);
            }
            Opcode::ReturnDataSize => Word::from(program.return_data_buffer().len()),
            Opcode::ReturnDataCopy => {
                let (mem_offset, data_offset, size) = pop3(program)?;
                let (offset, size) = (data_offset.int_value_safe(), size.int_value_safe());
                let available = program.return_data_buffer().len();
                if offset.saturating_add(size) > available {
                    return Err(VmError::ReturnDataCopyOutOfBounds {
                        offset,
                        size,
                        available,
                    });
                }
                let data = program.return_data_buffer()[offset..offset + size].to_vec();
                program
                    .memory_mut()
                    .write(mem_offset.int_value_safe(), &data, size, false);
                return Ok(None);
            }
            Opcode::CodeSize => Word::from(program.code().len()),
            Opcode::ExtCodeSize => {
                let address = program.stack_mut().pop()?.to_address();
                Word::from(self.repo.get_code(address).len())
            }
            Opcode::CodeCopy | Opcode::ExtCodeCopy => {
                let external = if op == Opcode::ExtCodeCopy {
                    Some(self.repo.get_code(program.stack_mut().pop()?.to_address()))
                } else {
                    None
                };
                let (mem_offset, code_offset, size) = pop3(program)?;
                let size = size.int_value_safe();
                let source = external.as_deref().unwrap_or_else(|| program.code());
                let data = padded_copy(source, code_offset.int_value_safe(), size);
                program
                    .memory_mut()
                    .write(mem_offset.int_value_safe(), &data, size, false);
                return Ok(None);
            }
            Opcode::GasPrice => Word::from(program.ctx().gas_price),

            // -----------------------------------------------------------------
            // Block
            // -----------------------------------------------------------------
            Opcode::BlockHash => {
                let n = program.stack_mut().pop()?.int_value_safe() as u64;
                let number = program.ctx().block.number;
                if n < number && n >= number.max(256) - 256 {
                    Word::from(self.block_store.block_hash_by_number(n).0)
                } else {
                    Word::ZERO
                }
            }
            Opcode::Coinbase => Word::from(program.ctx().block.coinbase),
            Opcode::Timestamp => Word::from(program.ctx().block.timestamp),
            Opcode::Number => Word::from(program.ctx().block.number),
            Opcode::Difficulty => Word::from(program.ctx().block.difficulty),
            Opcode::GasLimit => Word::from(program.ctx().block.gas_limit),

            // -----------------------------------------------------------------
            // Stack, memory, storage
            // -----------------------------------------------------------------
            Opcode::Pop => {
                program.stack_mut().pop()?;
                return Ok(None);
            }
            Opcode::MLoad => {
                let offset = program.stack_mut().pop()?;
                program.memory_mut().read_word(offset.int_value_safe())
            }
            Opcode::MStore => {
                let (offset, value) = pop2(program)?;
                program
                    .memory_mut()
                    .write_word(offset.int_value_safe(), value);
                return Ok(None);
            }
            Opcode::MStore8 => {
                let (offset, value) = pop2(program)?;
                program
                    .memory_mut()
                    .write_byte(offset.int_value_safe(), value.byte(WORD_SIZE - 1));
                return Ok(None);
            }
            Opcode::SLoad => {
                let key = program.stack_mut().pop()?;
                self.repo
                    .get_storage_row(program.owner(), key)
                    .unwrap_or(Word::ZERO)
            }
            Opcode::SStore => {
                ensure_not_static(program)?;
                let (key, value) = pop2(program)?;
                self.repo.put_storage_row(program.owner(), key, value);
                return Ok(None);
            }
            Opcode::Pc => Word::from(program.pc()),
            Opcode::MSize => Word::from(program.memory().size()),
            Opcode::Gas => Word::from(program.gas_left()),
            Opcode::JumpDest => return Ok(None),

            Opcode::Log0 | Opcode::Log1 | Opcode::Log2 | Opcode::Log3 | Opcode::Log4 => {
                ensure_not_static(program)?;
                let (offset, size) = pop2(program)?;
                let topics = (0..op.log_topics().unwrap_or(0))
                    .map(|_| program.stack_mut().pop())
                    .collect::<Result<Vec<_>, _>>()?;
                let data = program
                    .memory_mut()
                    .read(offset.int_value_safe(), size.int_value_safe());
                let log = LogInfo::new(program.owner(), topics, data);
                program.result_mut().add_log(log);
                return Ok(None);
            }

            _ if (Opcode::Dup1.byte()..=Opcode::Dup16.byte()).contains(&op.byte()) => {
                let depth = usize::from(op.byte() - Opcode::Dup1.byte());
                program.stack_mut().dup(depth)?;
                return Ok(None);
            }
            _ if (Opcode::Swap1.byte()..=Opcode::Swap16.byte()).contains(&op.byte()) => {
                let depth = usize::from(op.byte() - Opcode::Swap1.byte()) + 1;
                program.stack_mut().swap(0, depth)?;
                return Ok(None);
            }

            // Control flow is dispatched by `execute`.
            _ => return Err(VmError::InvalidOpcode(op.byte())),
        };
        Ok(Some(word))
    }

    // =========================================================================
    // SUICIDE
    // =========================================================================

    fn suicide(&mut self, program: &mut Program, beneficiary: Address) {
        let owner = program.owner();
        let balance = self.repo.get_balance(owner);
        let nonce = self.repo.get_nonce(owner);
        program.add_internal_tx(
            InternalTxKind::Suicide,
            owner,
            Some(beneficiary),
            nonce,
            balance,
            Vec::new(),
            0,
        );

        if owner == beneficiary {
            self.repo.sub_balance(owner, balance);
        } else {
            self.repo.transfer(owner, beneficiary, balance);
        }
        program.result_mut().add_delete_account(owner);
    }

    // =========================================================================
    // CREATE
    // =========================================================================

    fn create_contract(
        &mut self,
        program: &mut Program,
        value: Word,
        offset: Word,
        size: Word,
    ) -> Result<Option<Frame>, VmError> {
        program.clear_return_data_buffer();

        if program.ctx().depth >= self.config.constants.max_call_depth {
            program.stack_mut().push(Word::ZERO)?;
            return Ok(None);
        }

        let sender = program.owner();
        let endowment = value.value();
        if self.repo.get_balance(sender) < endowment {
            program.stack_mut().push(Word::ZERO)?;
            return Ok(None);
        }

        let init_code = program
            .memory_mut()
            .read(offset.int_value_safe(), size.int_value_safe());

        let gas = self.config.create_gas(program.gas_left());
        program.spend_gas(gas, "internal create")?;

        let nonce = self.repo.get_nonce(sender);
        let address = compute_contract_address(sender, nonce);
        let exists = self.repo.exists(address);

        // The sender nonce survives a failed creation.
        self.repo.increase_nonce(sender);
        self.repo.start_tracking();

        self.repo.increase_nonce(address);
        self.repo.transfer(sender, address, endowment);

        let tx_index = program.add_internal_tx(
            InternalTxKind::Create,
            sender,
            None,
            self.repo.get_nonce(sender),
            endowment,
            init_code.clone(),
            gas,
        );

        if exists {
            let mut result = ProgramResult::new();
            result.set_exception(VmError::BytecodeExecution(format!(
                "Account already exists: 0x{}",
                hex::encode(address.as_bytes())
            )));
            self.finish_create(program, address, tx_index, gas, result)?;
            return Ok(None);
        }

        if init_code.is_empty() {
            self.finish_create(program, address, tx_index, gas, ProgramResult::new())?;
            return Ok(None);
        }

        let ctx = program
            .ctx()
            .child(sender, address, gas, endowment, Vec::new(), false);
        let child = self.load(init_code, ctx);
        Ok(Some(Frame {
            program: child,
            pending: Pending::Create {
                address,
                tx_index,
                gas,
            },
        }))
    }

    /// Deploys the returned code and folds the child into `program`.
    fn finish_create(
        &mut self,
        program: &mut Program,
        address: Address,
        tx_index: usize,
        gas: u64,
        mut child: ProgramResult,
    ) -> Result<(), VmError> {
        if child.is_success() {
            self.deposit_code(address, gas, &mut child);
        }

        if child.exception().is_some() || child.is_revert() {
            debug!(
                contract = ?address,
                exception = ?child.exception(),
                "contract creation halted"
            );
            child.reject_internal_transactions();
            program.result_mut().merge(&child);
            program.result_mut().reject_internal_transaction(tx_index);
            self.repo.rollback();
            program.stack_mut().push(Word::ZERO)?;
            if child.exception().is_some() {
                return Ok(());
            }
            program.set_return_data_buffer(child.return_data().to_vec());
        } else {
            program.result_mut().merge(&child);
            self.repo.commit();
            program.stack_mut().push(Word::from(address))?;
        }

        let refund = gas.saturating_sub(child.gas_used());
        if refund > 0 {
            program.refund_gas(refund, "remaining gas from create");
        }
        Ok(())
    }

    /// Charges and stores the code returned by a successful init frame, or
    /// marks the frame failed.
    fn deposit_code(&mut self, address: Address, gas: u64, child: &mut ProgramResult) {
        let config = self.config;
        let constants = &config.constants;
        let code = child.return_data().to_vec();
        let storage_cost = (code.len() as u64).saturating_mul(config.fee_schedule.create_data);
        let left = gas.saturating_sub(child.gas_used());

        if storage_cost > left {
            if constants.create_empty_contract_on_oog {
                self.repo.save_code(address, Vec::new());
            } else {
                child.set_exception(VmError::out_of_gas(
                    "No gas to return just created contract",
                    storage_cost,
                    left,
                ));
            }
        } else if code.len() > constants.max_contract_size {
            child.set_exception(VmError::out_of_gas(
                format!("Contract size too large: {}", code.len()),
                storage_cost,
                left,
            ));
        } else {
            child.spend_gas(storage_cost);
            self.repo.save_code(address, code);
        }
    }

    // =========================================================================
    // MESSAGE CALLS
    // =========================================================================

    fn message_call(
        &mut self,
        program: &mut Program,
        op: Opcode,
        call_gas: u64,
    ) -> Result<Option<Frame>, VmError> {
        // The requested gas was already turned into `call_gas`.
        program.stack_mut().pop()?;
        let code_address = program.stack_mut().pop()?.to_address();
        let value = if op.call_has_value() {
            program.stack_mut().pop()?
        } else {
            Word::ZERO
        };

        if program.is_static() && op == Opcode::Call && !value.is_zero() {
            return Err(VmError::StaticCallViolation);
        }

        let mut gas = call_gas;
        if !value.is_zero() {
            gas += self.config.fee_schedule.stipend_call;
        }

        let stack = program.stack_mut();
        let (in_offset, in_size) = (stack.pop()?, stack.pop()?);
        let (out_offset, out_size) = (stack.pop()?, stack.pop()?);
        let msg = MessageCall {
            op,
            gas,
            code_address,
            endowment: value.value(),
            in_offset: in_offset.int_value_safe(),
            in_size: in_size.int_value_safe(),
            out_offset: out_offset.int_value_safe(),
            out_size: out_size.int_value_safe(),
        };
        program.memory_mut().extend(msg.out_offset, msg.out_size);

        if !op.call_is_stateless() {
            program.result_mut().add_touch_account(code_address);
        }

        match self.config.precompiles.lookup(code_address) {
            Some(contract) => {
                self.call_precompile(program, &msg, contract)?;
                Ok(None)
            }
            None => self.call_to_address(program, msg),
        }
    }

    fn call_to_address(
        &mut self,
        program: &mut Program,
        msg: MessageCall,
    ) -> Result<Option<Frame>, VmError> {
        program.clear_return_data_buffer();

        if program.ctx().depth >= self.config.constants.max_call_depth {
            program.stack_mut().push(Word::ZERO)?;
            program.refund_gas(msg.gas, "call depth limit reached");
            return Ok(None);
        }

        let data = program.memory_mut().read(msg.in_offset, msg.in_size);
        let sender = program.owner();
        let context = if msg.op.call_is_stateless() {
            sender
        } else {
            msg.code_address
        };

        if self.repo.get_balance(sender) < msg.endowment {
            program.stack_mut().push(Word::ZERO)?;
            program.refund_gas(msg.gas, "refund gas from message call");
            return Ok(None);
        }

        let code = self.repo.get_code(msg.code_address);
        self.repo.start_tracking();
        self.repo.transfer(sender, context, msg.endowment);

        let tx_index = program.add_internal_tx(
            msg.kind(),
            sender,
            Some(context),
            self.repo.get_nonce(sender),
            msg.endowment,
            data.clone(),
            msg.gas,
        );

        if code.is_empty() {
            self.repo.commit();
            program.stack_mut().push(Word::ONE)?;
            program.refund_gas(msg.gas, "remaining gas from call");
            return Ok(None);
        }

        let parent = program.ctx();
        let delegate = msg.op.call_is_delegate();
        let ctx = parent.child(
            if delegate { parent.caller } else { sender },
            context,
            msg.gas,
            if delegate { parent.value } else { msg.endowment },
            data,
            msg.op.call_is_static() || parent.is_static,
        );
        let child = self.load(code, ctx);
        Ok(Some(Frame {
            program: child,
            pending: Pending::Call { msg, tx_index },
        }))
    }

    fn finish_call(
        &mut self,
        program: &mut Program,
        msg: &MessageCall,
        tx_index: usize,
        mut child: ProgramResult,
    ) -> Result<(), VmError> {
        if child.exception().is_some() || child.is_revert() {
            debug!(
                contract = ?msg.code_address,
                exception = ?child.exception(),
                "call halted"
            );
            child.reject_internal_transactions();
            program.result_mut().merge(&child);
            program.result_mut().reject_internal_transaction(tx_index);
            self.repo.rollback();
            program.stack_mut().push(Word::ZERO)?;
            if child.exception().is_some() {
                return Ok(());
            }
        } else {
            program.result_mut().merge(&child);
            self.repo.commit();
            program.stack_mut().push(Word::ONE)?;
        }

        let output = child.return_data();
        program
            .memory_mut()
            .write(msg.out_offset, output, msg.out_size, true);
        program.set_return_data_buffer(output.to_vec());

        let refund = msg.gas.saturating_sub(child.gas_used());
        if refund > 0 {
            program.refund_gas(refund, "remaining gas from call");
        }
        Ok(())
    }

    fn call_precompile(
        &mut self,
        program: &mut Program,
        msg: &MessageCall,
        contract: PrecompiledContract,
    ) -> Result<(), VmError> {
        program.clear_return_data_buffer();

        if program.ctx().depth >= self.config.constants.max_call_depth {
            program.stack_mut().push(Word::ZERO)?;
            program.refund_gas(msg.gas, "call depth limit reached");
            return Ok(());
        }

        let sender = program.owner();
        let context = if msg.op.call_is_stateless() {
            sender
        } else {
            msg.code_address
        };
        if self.repo.get_balance(sender) < msg.endowment {
            program.stack_mut().push(Word::ZERO)?;
            program.refund_gas(msg.gas, "refund gas from message call");
            return Ok(());
        }

        let data = program.memory_mut().read(msg.in_offset, msg.in_size);
        self.repo.start_tracking();
        self.repo.transfer(sender, context, msg.endowment);

        let required = contract.gas_for_data(&data);
        if required > msg.gas {
            program.stack_mut().push(Word::ZERO)?;
            self.repo.rollback();
            return Ok(());
        }

        let (ok, output) = contract.execute(&data);
        if ok {
            program.refund_gas(msg.gas - required, "refund gas from pre-compiled call");
            program.stack_mut().push(Word::ONE)?;
            program.set_return_data_buffer(output.clone());
            self.repo.commit();
        } else {
            program.stack_mut().push(Word::ZERO)?;
            self.repo.rollback();
        }

        // The output is written in full, past the charged window if need be.
        let needed = mem_needed(Word::from(msg.out_offset), Word::from(output.len()));
        let growth = calc_mem_gas(&self.config.fee_schedule, program.memory().size(), needed, 0)?;
        if growth > 0 {
            program.spend_gas(growth, "pre-compiled call output")?;
        }

        let memory = program.memory_mut();
        memory.extend(msg.out_offset, msg.out_size);
        memory.write(msg.out_offset, &output, output.len(), false);
        Ok(())
    }

    // =========================================================================
    // RESUME
    // =========================================================================

    /// Folds a halted child into its parent and moves the parent past the
    /// instruction that spawned it.
    fn resume(&mut self, parent: &mut Program, frame: Frame) -> Result<(), VmError> {
        let child = frame.program.into_result();
        match frame.pending {
            Pending::Call { msg, tx_index } => self.finish_call(parent, &msg, tx_index, child)?,
            Pending::Create {
                address,
                tx_index,
                gas,
            } => self.finish_create(parent, address, tx_index, gas, child)?,
        }
        parent.step();
        Ok(())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn ensure_not_static(program: &Program) -> Result<(), VmError> {
    if program.is_static() {
        Err(VmError::StaticCallViolation)
    } else {
        Ok(())
    }
}

fn pop2(program: &mut Program) -> Result<(Word, Word), VmError> {
    let stack = program.stack_mut();
    Ok((stack.pop()?, stack.pop()?))
}

fn pop3(program: &mut Program) -> Result<(Word, Word, Word), VmError> {
    let stack = program.stack_mut();
    Ok((stack.pop()?, stack.pop()?, stack.pop()?))
}

fn binary(program: &mut Program, f: impl FnOnce(Word, Word) -> Word) -> Result<Word, VmError> {
    let (a, b) = pop2(program)?;
    Ok(f(a, b))
}

/// `len` bytes of `source` from `offset`, zero-padded past its end.
fn padded_copy(source: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if offset < source.len() {
        let n = (source.len() - offset).min(len);
        out[..n].copy_from_slice(&source[offset..offset + n]);
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryBlockStore, InMemoryRepository};
    use crate::domain::entities::{BlockContext, ExecutionContext};
    use crate::domain::value_objects::Hash;
    use crate::evm::opcodes::assemble;

    const OWNER: Address = Address::from_low_u8(0xAA);
    const CALLEE: Address = Address::from_low_u8(0xBB);
    const ORIGIN: Address = Address::from_low_u8(0xCC);
    const GAS: u64 = 1_000_000;

    struct World {
        repo: InMemoryRepository,
        blocks: InMemoryBlockStore,
        config: VmConfig,
    }

    impl World {
        fn new() -> Self {
            Self {
                repo: InMemoryRepository::new(),
                blocks: InMemoryBlockStore::new(),
                config: VmConfig::default(),
            }
        }

        fn context(gas: u64) -> ExecutionContext {
            ExecutionContext {
                address: OWNER,
                origin: ORIGIN,
                caller: ORIGIN,
                value: U256::zero(),
                data: Vec::new(),
                gas,
                gas_price: U256::one(),
                block: BlockContext {
                    number: 300,
                    ..BlockContext::default()
                },
                depth: 0,
                is_static: false,
                tx_hash: Hash::ZERO,
            }
        }

        fn run(&mut self, source: &str) -> Program {
            self.run_in(source, Self::context(GAS))
        }

        fn run_in(&mut self, source: &str, ctx: ExecutionContext) -> Program {
            let mut program = Program::new(assemble(source).unwrap(), ctx, 1024);
            Vm::new(&mut self.repo, &self.blocks, &self.config).play(&mut program);
            program
        }

        fn deploy(&mut self, address: Address, source: &str) {
            self.repo.set_code(address, assemble(source).unwrap());
        }
    }

    fn returned(program: &Program) -> Word {
        Word::from_be_slice(program.result().return_data())
    }

    fn top(program: &Program) -> Word {
        program.stack().peek().unwrap()
    }

    /// Calls `target` with no input and a 32-byte output window at 0, then
    /// returns the success flag.
    fn call_and_return_flag(op: &str, target: Address) -> String {
        let value = if op == "CALL" || op == "CALLCODE" {
            "PUSH1 0x00 "
        } else {
            ""
        };
        format!(
            "PUSH1 0x20 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 {value}PUSH1 0x{:02x} PUSH3 0x0fffff {op} \
             PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN",
            target.as_bytes()[19]
        )
    }

    // -------------------------------------------------------------------------
    // Straight-line execution
    // -------------------------------------------------------------------------

    #[test]
    fn test_add_store_return() {
        let mut world = World::new();
        let p = world.run(
            "PUSH1 0x01 PUSH1 0x02 ADD PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN",
        );
        assert!(p.result().exception().is_none());
        assert_eq!(returned(&p), Word::from(3u64));
        assert_eq!(p.result().gas_used(), 24);
    }

    #[test]
    fn test_signed_division_through_opcodes() {
        let mut world = World::new();
        // 0 - 8 = -8, then -8 / 2.
        let p = world.run("PUSH1 0x02 PUSH1 0x08 PUSH1 0x00 SUB SDIV");
        assert_eq!(top(&p), Word::from(4u64).negate());
    }

    #[test]
    fn test_sign_extend_and_byte() {
        let mut world = World::new();
        let p = world.run("PUSH1 0xff PUSH1 0x00 SIGNEXTEND");
        assert_eq!(top(&p), Word::MAX);

        let p = world.run("PUSH1 0x7f PUSH1 0x00 SIGNEXTEND");
        assert_eq!(top(&p), Word::from(0x7Fu64));

        // Out-of-range k leaves the value untouched.
        let p = world.run("PUSH1 0x7f PUSH1 0x20 SIGNEXTEND");
        assert_eq!(top(&p), Word::from(0x7Fu64));
        assert_eq!(p.stack().len(), 1);

        let p = world.run("PUSH2 0x1234 PUSH1 0x1e BYTE");
        assert_eq!(top(&p), Word::from(0x12u64));
        let p = world.run("PUSH2 0x1234 PUSH1 0x20 BYTE");
        assert_eq!(top(&p), Word::ZERO);
    }

    #[test]
    fn test_memory_opcodes() {
        let mut world = World::new();
        let p = world.run("PUSH1 0xab PUSH1 0x21 MSTORE8 MSIZE PC");
        assert_eq!(p.memory().as_slice()[0x21], 0xab);
        assert_eq!(p.stack().get(1).unwrap(), Word::from(64u64));
        assert_eq!(top(&p), Word::from(6u64));
    }

    #[test]
    fn test_calldata_and_codecopy_zero_pad() {
        let mut world = World::new();
        let mut ctx = World::context(GAS);
        ctx.data = vec![0x11, 0x22];
        let p = world.run_in("PUSH1 0x01 CALLDATALOAD", ctx.clone());
        let mut expected = [0u8; 32];
        expected[0] = 0x22;
        assert_eq!(top(&p), Word::from(expected));

        let p = world.run_in("PUSH1 0x04 PUSH1 0x00 PUSH1 0x00 CALLDATACOPY", ctx);
        assert_eq!(&p.memory().as_slice()[..4], &[0x11, 0x22, 0, 0]);

        // CODECOPY reads past the 7-byte program.
        let p = world.run("PUSH1 0x08 PUSH1 0x04 PUSH1 0x00 CODECOPY");
        assert_eq!(&p.memory().as_slice()[..8], &[0x60, 0x00, 0x39, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_sha3() {
        let mut world = World::new();
        let p = world.run("PUSH1 0x00 PUSH1 0x00 SHA3");
        assert_eq!(top(&p), Word::from(keccak256(&[]).0));
        // 3 + 3 + 30
        assert_eq!(p.result().gas_used(), 36);
    }

    #[test]
    fn test_countdown_loop() {
        let mut world = World::new();
        // counter = 5; loop { counter -= 1; if counter != 0 continue }
        let p = world.run(
            "PUSH1 0x05 JUMPDEST PUSH1 0x01 SWAP1 SUB DUP1 PUSH1 0x02 JUMPI \
             PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN",
        );
        assert!(p.result().exception().is_none());
        assert_eq!(returned(&p), Word::ZERO);
    }

    #[test]
    fn test_block_hash_window() {
        let mut world = World::new();
        world.blocks.insert(299, Hash::new([7u8; 32]));
        world.blocks.insert(43, Hash::new([8u8; 32]));
        world.blocks.insert(44, Hash::new([9u8; 32]));

        assert_eq!(top(&world.run("PUSH2 0x012b BLOCKHASH")), Word::from([7u8; 32]));
        // 300 - 256 = 44 is the oldest visible block.
        assert_eq!(top(&world.run("PUSH1 0x2c BLOCKHASH")), Word::from([9u8; 32]));
        assert_eq!(top(&world.run("PUSH1 0x2b BLOCKHASH")), Word::ZERO);
        assert_eq!(top(&world.run("PUSH2 0x012c BLOCKHASH")), Word::ZERO);
    }

    // -------------------------------------------------------------------------
    // Failures
    // -------------------------------------------------------------------------

    #[test]
    fn test_invalid_opcode_consumes_all_gas() {
        let mut world = World::new();
        let p = world.run("PUSH1 0x01 0xfe");
        assert_eq!(p.result().exception(), Some(&VmError::InvalidOpcode(0xFE)));
        assert_eq!(p.result().gas_used(), GAS);
    }

    #[test]
    fn test_stack_underflow() {
        let mut world = World::new();
        let p = world.run("PUSH1 0x01 ADD");
        assert_eq!(
            p.result().exception(),
            Some(&VmError::StackUnderflow {
                required: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_stack_overflow() {
        let mut world = World::new();
        let source = vec!["PUSH1 0x01"; 1025].join(" ");
        let p = world.run(&source);
        assert!(matches!(
            p.result().exception(),
            Some(VmError::StackOverflow { size: 1025, .. })
        ));
    }

    #[test]
    fn test_bad_jump_destination() {
        let mut world = World::new();
        let p = world.run("PUSH1 0x05 JUMP");
        assert_eq!(
            p.result().exception(),
            Some(&VmError::BadJumpDestination(Some(5)))
        );

        // Jumping into PUSH data.
        let p = world.run("PUSH1 0x04 JUMP PUSH1 0x5b");
        assert_eq!(
            p.result().exception(),
            Some(&VmError::BadJumpDestination(Some(4)))
        );

        let p = world.run("PUSH8 0x0100000000000000 JUMP");
        assert_eq!(
            p.result().exception(),
            Some(&VmError::BadJumpDestination(None))
        );
    }

    #[test]
    fn test_out_of_gas() {
        let mut world = World::new();
        let p = world.run_in("PUSH1 0x01 PUSH1 0x02 ADD", World::context(5));
        assert!(matches!(
            p.result().exception(),
            Some(VmError::OutOfGas { available: 2, .. })
        ));
        assert_eq!(p.result().gas_used(), 5);
    }

    #[test]
    fn test_memory_gas_overflow() {
        let mut world = World::new();
        let p = world.run("PUSH1 0x01 PUSH5 0x0100000000 MSTORE");
        assert!(matches!(
            p.result().exception(),
            Some(VmError::GasOverflow { .. })
        ));
    }

    #[test]
    fn test_return_data_copy_out_of_bounds() {
        let mut world = World::new();
        let p = world.run("PUSH1 0x01 PUSH1 0x00 PUSH1 0x00 RETURNDATACOPY");
        assert_eq!(
            p.result().exception(),
            Some(&VmError::ReturnDataCopyOutOfBounds {
                offset: 0,
                size: 1,
                available: 0
            })
        );
    }

    #[test]
    fn test_static_context_rejects_writes() {
        let mut world = World::new();
        for source in [
            "PUSH1 0x01 PUSH1 0x00 SSTORE",
            "PUSH1 0x00 PUSH1 0x00 LOG0",
            "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 CREATE",
            "PUSH1 0x00 SUICIDE",
        ] {
            let mut ctx = World::context(GAS);
            ctx.is_static = true;
            let p = world.run_in(source, ctx);
            assert_eq!(
                p.result().exception(),
                Some(&VmError::StaticCallViolation),
                "{source}"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Storage, logs, suicide
    // -------------------------------------------------------------------------

    #[test]
    fn test_sstore_gas_table() {
        let mut world = World::new();

        let p = world.run("PUSH1 0x01 PUSH1 0x00 SSTORE");
        assert_eq!(p.result().gas_used(), 6 + 20_000);
        assert_eq!(p.result().future_refund(), 0);

        let p = world.run("PUSH1 0x02 PUSH1 0x00 SSTORE");
        assert_eq!(p.result().gas_used(), 6 + 5_000);

        let p = world.run("PUSH1 0x00 PUSH1 0x00 SSTORE");
        assert_eq!(p.result().gas_used(), 6 + 5_000);
        assert_eq!(p.result().future_refund(), 15_000);
        assert_eq!(world.repo.get_storage_row(OWNER, Word::ZERO), None);

        // Zero over an empty slot.
        let p = world.run("PUSH1 0x00 PUSH1 0x00 SSTORE");
        assert_eq!(p.result().gas_used(), 6 + 5_000);
        assert_eq!(p.result().future_refund(), 0);
    }

    #[test]
    fn test_sload() {
        let mut world = World::new();
        world
            .repo
            .put_storage_row(OWNER, Word::from(5u64), Word::from(9u64));
        assert_eq!(top(&world.run("PUSH1 0x05 SLOAD")), Word::from(9u64));
        assert_eq!(top(&world.run("PUSH1 0x06 SLOAD")), Word::ZERO);
    }

    #[test]
    fn test_log_records_topics_and_data() {
        let mut world = World::new();
        let p = world.run("PUSH1 0x2a PUSH1 0x00 MSTORE8 PUSH1 0x07 PUSH1 0x01 PUSH1 0x00 LOG1");
        let logs = p.result().logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, OWNER);
        assert_eq!(logs[0].topics, vec![Word::from(7u64)]);
        assert_eq!(logs[0].data, vec![0x2a]);
    }

    #[test]
    fn test_suicide_transfers_balance() {
        let mut world = World::new();
        world.repo.set_balance(OWNER, U256::from(100));
        let p = world.run("PUSH1 0xbb SUICIDE");
        assert!(p.result().exception().is_none());
        assert_eq!(world.repo.get_balance(CALLEE), U256::from(100));
        assert_eq!(world.repo.get_balance(OWNER), U256::zero());
        assert!(p.result().delete_accounts().contains(&OWNER));
        let tx = &p.result().internal_transactions()[0];
        assert_eq!(tx.kind, InternalTxKind::Suicide);
        assert_eq!(tx.value, U256::from(100));
        assert_eq!(p.result().gas_used(), 3 + 5_000);
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    #[test]
    fn test_call_returns_output() {
        let mut world = World::new();
        world.deploy(
            CALLEE,
            "PUSH1 0x2a PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN",
        );
        let p = world.run(
            "PUSH1 0x20 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0xbb PUSH3 0x0fffff CALL \
             PUSH1 0x20 PUSH1 0x00 RETURN",
        );
        assert!(p.result().exception().is_none());
        assert_eq!(returned(&p), Word::from(42u64));
        assert_eq!(top(&p), Word::ONE);
        assert_eq!(p.return_data_buffer().len(), 32);

        let txs = p.result().internal_transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, InternalTxKind::Call);
        assert_eq!(txs[0].to, Some(CALLEE));
        assert!(!txs[0].is_rejected());
    }

    #[test]
    fn test_call_gas_is_refunded() {
        let mut world = World::new();
        world.deploy(CALLEE, "STOP");
        let p = world.run(
            "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0xbb PUSH3 0x0fffff CALL",
        );
        assert_eq!(top(&p), Word::ONE);
        // Seven pushes plus the call itself.
        assert_eq!(p.result().gas_used(), 21 + 700);
    }

    #[test]
    fn test_call_to_empty_account_succeeds() {
        let mut world = World::new();
        let p = world.run(&call_and_return_flag("CALL", CALLEE));
        assert_eq!(returned(&p), Word::ONE);
        assert_eq!(p.result().internal_transactions().len(), 1);
    }

    #[test]
    fn test_call_depth_limit() {
        let mut world = World::new();
        world.deploy(CALLEE, "PUSH1 0x01 PUSH1 0x00 SSTORE");
        let mut ctx = World::context(GAS);
        ctx.depth = 1024;
        let p = world.run_in(&call_and_return_flag("CALL", CALLEE), ctx);
        assert!(p.result().exception().is_none());
        assert_eq!(returned(&p), Word::ZERO);
        assert_eq!(world.repo.get_storage_row(CALLEE, Word::ZERO), None);
        assert!(p.result().internal_transactions().is_empty());
        assert!(p.result().gas_used() < 1_000);
    }

    #[test]
    fn test_call_depth_limit_keeps_value() {
        let mut world = World::new();
        world.repo.set_balance(OWNER, U256::from(10));
        world.deploy(CALLEE, "PUSH1 0x01 PUSH1 0x00 SSTORE");
        let mut ctx = World::context(GAS);
        ctx.depth = 1024;
        let p = world.run_in(
            "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x07 PUSH1 0xbb PUSH2 0x1000 CALL",
            ctx,
        );
        assert!(p.result().exception().is_none());
        assert_eq!(top(&p), Word::ZERO);
        assert_eq!(world.repo.get_balance(OWNER), U256::from(10));
        assert_eq!(world.repo.get_balance(CALLEE), U256::zero());
        // Forwarded gas and stipend come back untouched.
        assert_eq!(p.result().gas_used(), 21 + 700 + 9_000 - 2_300);
    }

    #[test]
    fn test_child_exception_keeps_value_and_burns_forwarded_gas() {
        let mut world = World::new();
        world.repo.set_balance(OWNER, U256::from(10));
        world.deploy(CALLEE, "PUSH1 0x01 PUSH1 0x00 SSTORE 0xfe");
        let p = world.run(
            "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x07 PUSH1 0xbb PUSH2 0x1000 CALL",
        );
        assert!(p.result().exception().is_none());
        assert_eq!(top(&p), Word::ZERO);
        assert_eq!(world.repo.get_balance(OWNER), U256::from(10));
        assert_eq!(world.repo.get_balance(CALLEE), U256::zero());
        assert_eq!(world.repo.get_storage_row(CALLEE, Word::ZERO), None);
        assert!(p.result().internal_transactions()[0].is_rejected());
        // Pushes, call charge and the 0x1000 forwarded, nothing refunded.
        assert_eq!(p.result().gas_used(), 21 + 700 + 9_000 + 0x1000);
    }

    #[test]
    fn test_child_exception_rolls_back() {
        let mut world = World::new();
        world.deploy(CALLEE, "PUSH1 0x01 PUSH1 0x00 SSTORE 0xfe");
        let p = world.run(&call_and_return_flag("CALL", CALLEE));
        assert!(p.result().exception().is_none());
        assert_eq!(returned(&p), Word::ZERO);
        assert_eq!(world.repo.get_storage_row(CALLEE, Word::ZERO), None);
        assert!(p.result().internal_transactions()[0].is_rejected());
        assert_eq!(world.repo.checkpoint_depth(), 0);
    }

    #[test]
    fn test_revert_keeps_return_data() {
        let mut world = World::new();
        world.deploy(
            CALLEE,
            "PUSH1 0x01 PUSH1 0x00 SSTORE PUSH1 0x2a PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 REVERT",
        );
        let p = world.run(
            "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0xbb PUSH3 0x0fffff CALL \
             RETURNDATASIZE PUSH1 0x00 PUSH1 0x00 RETURNDATACOPY PUSH1 0x20 PUSH1 0x00 RETURN",
        );
        assert!(p.result().exception().is_none());
        assert_eq!(returned(&p), Word::from(42u64));
        assert_eq!(p.stack().as_slice(), &[Word::ZERO]);
        assert_eq!(world.repo.get_storage_row(CALLEE, Word::ZERO), None);
        assert!(p.result().internal_transactions()[0].is_rejected());
    }

    #[test]
    fn test_static_call_blocks_child_writes() {
        let mut world = World::new();
        world.deploy(CALLEE, "PUSH1 0x01 PUSH1 0x00 SSTORE");
        let p = world.run(&call_and_return_flag("STATICCALL", CALLEE));
        assert_eq!(returned(&p), Word::ZERO);
        assert_eq!(world.repo.get_storage_row(CALLEE, Word::ZERO), None);
    }

    #[test]
    fn test_delegate_call_uses_caller_storage() {
        let mut world = World::new();
        world.deploy(CALLEE, "CALLER PUSH1 0x00 SSTORE");
        let p = world.run(&call_and_return_flag("DELEGATECALL", CALLEE));
        assert_eq!(returned(&p), Word::ONE);
        assert_eq!(
            world.repo.get_storage_row(OWNER, Word::ZERO),
            Some(Word::from(ORIGIN))
        );
        assert_eq!(world.repo.get_storage_row(CALLEE, Word::ZERO), None);
    }

    #[test]
    fn test_value_transfer_and_insufficient_balance() {
        let mut world = World::new();
        world.repo.set_balance(OWNER, U256::from(10));
        let source = "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x07 PUSH1 0xbb PUSH2 0x1000 CALL";
        let p = world.run(source);
        assert_eq!(top(&p), Word::ONE);
        assert_eq!(world.repo.get_balance(CALLEE), U256::from(7));
        // The unused stipend is returned to the caller.
        assert_eq!(p.result().gas_used(), 21 + 700 + 9_000 - 2_300);

        let p = world.run(source);
        assert_eq!(top(&p), Word::ZERO);
        assert_eq!(world.repo.get_balance(OWNER), U256::from(3));
    }

    #[test]
    fn test_deep_recursion_runs_on_the_heap() {
        let mut world = World::new();
        // Calls itself with all available gas until the gas runs out.
        world.deploy(
            CALLEE,
            "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 ADDRESS GAS CALL",
        );
        let p = world.run(&call_and_return_flag("CALL", CALLEE));
        assert!(p.result().exception().is_none());
        // Roughly 200 levels fit in the forwarded gas.
        assert!(p.result().internal_transactions().len() > 100);
        assert_eq!(world.repo.checkpoint_depth(), 0);
    }

    #[test]
    fn test_configured_depth_limit() {
        let mut world = World::new();
        world.config.constants.max_call_depth = 3;
        world.deploy(
            CALLEE,
            "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 ADDRESS GAS CALL",
        );
        let p = world.run(&call_and_return_flag("CALL", CALLEE));
        // Frames at depth 1, 2 and 3; the call from depth 3 is refused.
        assert_eq!(p.result().internal_transactions().len(), 3);
        let depths: Vec<_> = p
            .result()
            .internal_transactions()
            .iter()
            .map(|tx| tx.depth)
            .collect();
        assert!(depths.contains(&2));
    }

    #[test]
    fn test_identity_precompile() {
        let mut world = World::new();
        let p = world.run(
            "PUSH1 0x2a PUSH1 0x00 MSTORE \
             PUSH1 0x20 PUSH1 0x20 PUSH1 0x20 PUSH1 0x00 PUSH1 0x00 PUSH1 0x04 PUSH2 0x1000 CALL \
             PUSH1 0x20 PUSH1 0x20 RETURN",
        );
        assert!(p.result().exception().is_none());
        assert_eq!(returned(&p), Word::from(42u64));
        assert_eq!(p.return_data_buffer().len(), 32);
        // Identity charges 15 plus 3 per word.
        assert_eq!(p.result().gas_used(), 12 + 21 + 703 + 18 + 6);
    }

    #[test]
    fn test_precompile_output_pays_for_memory() {
        let mut world = World::new();
        // Zero-sized output window at 0x40, 32 bytes of output.
        let p = world.run(
            "PUSH1 0x00 PUSH1 0x40 PUSH1 0x20 PUSH1 0x00 PUSH1 0x04 PUSH2 0x1000 STATICCALL MSIZE",
        );
        assert!(p.result().exception().is_none());
        assert_eq!(top(&p), Word::from(96u64));
        assert_eq!(p.result().gas_used(), 18 + 703 + 18 + 6 + 2);

        let p = world.run(
            "PUSH1 0x00 PUSH4 0x04000000 PUSH1 0x20 PUSH1 0x00 PUSH1 0x04 PUSH2 0x1000 STATICCALL MSIZE",
        );
        assert!(matches!(
            p.result().exception(),
            Some(VmError::OutOfGas { .. })
        ));
        assert_eq!(p.result().gas_used(), GAS);
        assert!(p.memory().size() <= 32);

        let p = world.run(
            "PUSH1 0x00 PUSH4 0x7fffffff PUSH1 0x20 PUSH1 0x00 PUSH1 0x04 PUSH2 0x1000 STATICCALL MSIZE",
        );
        assert!(matches!(
            p.result().exception(),
            Some(VmError::GasOverflow { .. })
        ));
    }

    #[test]
    fn test_precompile_out_of_gas() {
        let mut world = World::new();
        let p = world.run(
            "PUSH1 0x20 PUSH1 0x20 PUSH1 0x20 PUSH1 0x00 PUSH1 0x00 PUSH1 0x04 PUSH1 0x05 CALL",
        );
        assert_eq!(top(&p), Word::ZERO);
        assert_eq!(world.repo.checkpoint_depth(), 0);
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    /// Stores `init` in memory and runs CREATE on it, returning the result.
    fn create_source(init: &str) -> String {
        let init = assemble(init).unwrap();
        let len = init.len();
        format!(
            "PUSH{len} 0x{} PUSH1 0x00 MSTORE PUSH1 0x{len:02x} PUSH1 0x{:02x} PUSH1 0x00 CREATE \
             PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN",
            hex::encode(&init),
            32 - len
        )
    }

    #[test]
    fn test_create_deploys_code() {
        let mut world = World::new();
        let p = world.run(&create_source(
            "PUSH1 0xaa PUSH1 0x00 MSTORE8 PUSH1 0x01 PUSH1 0x00 RETURN",
        ));
        assert!(p.result().exception().is_none());

        let address = compute_contract_address(OWNER, 0);
        assert_eq!(returned(&p), Word::from(address));
        assert_eq!(world.repo.get_code(address), vec![0xaa]);
        assert_eq!(world.repo.get_nonce(address), 1);
        assert_eq!(world.repo.get_nonce(OWNER), 1);

        let tx = &p.result().internal_transactions()[0];
        assert_eq!(tx.kind, InternalTxKind::Create);
        assert_eq!(tx.to, None);
        assert_eq!(tx.nonce, 1);
    }

    #[test]
    fn test_create_with_empty_init_code() {
        let mut world = World::new();
        let p = world.run(
            "PUSH1 0x00 PUSH1 0x00 PUSH1 0x00 CREATE PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN",
        );
        let address = compute_contract_address(OWNER, 0);
        assert_eq!(returned(&p), Word::from(address));
        assert!(world.repo.exists(address));
        assert!(world.repo.get_code(address).is_empty());
    }

    #[test]
    fn test_create_exceeding_max_code_size() {
        let mut world = World::new();
        world.config.constants.max_contract_size = 1;
        let p = world.run(&create_source("PUSH1 0x02 PUSH1 0x00 RETURN"));
        assert!(p.result().exception().is_none());
        assert_eq!(returned(&p), Word::ZERO);

        let address = compute_contract_address(OWNER, 0);
        assert!(world.repo.get_code(address).is_empty());
        assert!(!world.repo.exists(address));
        // The nonce bump is never rolled back.
        assert_eq!(world.repo.get_nonce(OWNER), 1);
        assert!(p.result().internal_transactions()[0].is_rejected());
    }

    #[test]
    fn test_create_on_existing_account_fails() {
        let mut world = World::new();
        let address = compute_contract_address(OWNER, 0);
        world.repo.set_balance(address, U256::from(1));
        let p = world.run(&create_source("STOP"));
        assert_eq!(returned(&p), Word::ZERO);
        assert_eq!(world.repo.get_nonce(address), 0);
        assert_eq!(world.repo.get_nonce(OWNER), 1);
    }

    #[test]
    fn test_create_revert_sets_return_buffer() {
        let mut world = World::new();
        let p = world.run(&format!(
            "{} RETURNDATASIZE",
            create_source("PUSH1 0x2a PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 REVERT")
                .trim_end_matches(" PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN")
        ));
        assert_eq!(top(&p), Word::from(32u64));
        assert_eq!(p.stack().get(1).unwrap(), Word::ZERO);
    }

    #[test]
    fn test_tracing_leaves_results_unchanged() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let source = "PUSH1 0x01 PUSH1 0x02 ADD PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN";
        let mut world = World::new();
        let plain = world.run(source);

        let mut traced = Program::new(assemble(source).unwrap(), World::context(GAS), 1024);
        Vm::new(&mut world.repo, &world.blocks, &world.config)
            .with_tracing(true)
            .play(&mut traced);

        assert_eq!(traced.result().return_data(), plain.result().return_data());
        assert_eq!(traced.result().gas_used(), plain.result().gas_used());
    }

    #[test]
    fn test_jump_analysis_is_shared() {
        let mut repo = InMemoryRepository::new();
        let blocks = InMemoryBlockStore::new();
        let config = VmConfig::default();
        let mut vm = Vm::new(&mut repo, &blocks, &config);
        let code = assemble("JUMPDEST STOP").unwrap();
        let a = vm.load(code.clone(), World::context(GAS));
        let b = vm.load(code, World::context(GAS));
        assert!(!a.is_stopped() && !b.is_stopped());
        assert_eq!(vm.jump_dests.len(), 1);
    }
}
