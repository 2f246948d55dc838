//! # EVM Implementation
//!
//! The machine itself: words flow through the [`Stack`](stack::Stack) and
//! [`Memory`](memory::Memory) of a [`Program`](program::Program) frame, and
//! the [`Vm`](interpreter::Vm) drives frames against a repository.
//!
//! ## Components
//!
//! - `interpreter.rs` - Instruction cycle and nested frames
//! - `program.rs` - One frame: code, pc, stack, memory, result
//! - `gas.rs` - Fee schedule and cost formulas
//! - `jumpdest.rs` - JUMPDEST analysis, shared per code
//! - `memory.rs` - Byte-addressed, word-aligned memory
//! - `stack.rs` - Bounded operand stack
//! - `opcodes.rs` - Instruction table, assembler, disassembler
//! - `precompiles/` - Native contracts

pub mod gas;
pub mod interpreter;
pub mod jumpdest;
pub mod memory;
pub mod opcodes;
pub mod precompiles;
pub mod program;
pub mod stack;

pub use gas::FeeSchedule;
pub use interpreter::Vm;
pub use jumpdest::{JumpDestCache, JumpDestinations};
pub use memory::Memory;
pub use opcodes::{assemble, disassemble, Opcode, Tier};
pub use precompiles::{PrecompileSet, PrecompiledContract};
pub use program::{MessageCall, Program};
pub use stack::Stack;
