//! # Opcodes
//!
//! The instruction set (Byzantium), with stack arity and fee tier for every
//! defined byte. Bytes without an entry (including 0xFE) are invalid.
//!
//! Also hosts a small mnemonic assembler used by tests and tooling:
//!
//! ```text
//! PUSH1 0x02 PUSH1 0x03 ADD
//! ```

use crate::errors::AssemblyError;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// FEE TIERS
// =============================================================================

/// Base cost class of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// 0 gas.
    Zero,
    /// 2 gas.
    Base,
    /// 3 gas.
    VeryLow,
    /// 5 gas.
    Low,
    /// 8 gas.
    Mid,
    /// 10 gas.
    High,
    /// 20 gas.
    Ext,
    /// 1 gas; the real price is computed per instruction.
    Special,
}

impl Tier {
    /// Gas charged for the tier.
    #[must_use]
    pub const fn cost(self) -> u64 {
        match self {
            Self::Zero => 0,
            Self::Base => 2,
            Self::VeryLow => 3,
            Self::Low => 5,
            Self::Mid => 8,
            Self::High => 10,
            Self::Ext => 20,
            Self::Special => 1,
        }
    }
}

// =============================================================================
// OPCODE ENUM
// =============================================================================

/// A defined instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    // 0x00 - 0x0B: Arithmetic
    Stop = 0x00,
    Add = 0x01,
    Mul = 0x02,
    Sub = 0x03,
    Div = 0x04,
    SDiv = 0x05,
    Mod = 0x06,
    SMod = 0x07,
    AddMod = 0x08,
    MulMod = 0x09,
    Exp = 0x0A,
    SignExtend = 0x0B,

    // 0x10 - 0x1A: Comparison & Bitwise
    Lt = 0x10,
    Gt = 0x11,
    SLt = 0x12,
    SGt = 0x13,
    Eq = 0x14,
    IsZero = 0x15,
    And = 0x16,
    Or = 0x17,
    Xor = 0x18,
    Not = 0x19,
    Byte = 0x1A,

    Sha3 = 0x20,

    // 0x30 - 0x3E: Environment
    Address = 0x30,
    Balance = 0x31,
    Origin = 0x32,
    Caller = 0x33,
    CallValue = 0x34,
    CallDataLoad = 0x35,
    CallDataSize = 0x36,
    CallDataCopy = 0x37,
    CodeSize = 0x38,
    CodeCopy = 0x39,
    GasPrice = 0x3A,
    ExtCodeSize = 0x3B,
    ExtCodeCopy = 0x3C,
    ReturnDataSize = 0x3D,
    ReturnDataCopy = 0x3E,

    // 0x40 - 0x45: Block
    BlockHash = 0x40,
    Coinbase = 0x41,
    Timestamp = 0x42,
    Number = 0x43,
    Difficulty = 0x44,
    GasLimit = 0x45,

    // 0x50 - 0x5B: Stack, Memory, Storage, Flow
    Pop = 0x50,
    MLoad = 0x51,
    MStore = 0x52,
    MStore8 = 0x53,
    SLoad = 0x54,
    SStore = 0x55,
    Jump = 0x56,
    JumpI = 0x57,
    Pc = 0x58,
    MSize = 0x59,
    Gas = 0x5A,
    JumpDest = 0x5B,

    // 0x60 - 0x7F: Push
    Push1 = 0x60,
    Push2 = 0x61,
    Push3 = 0x62,
    Push4 = 0x63,
    Push5 = 0x64,
    Push6 = 0x65,
    Push7 = 0x66,
    Push8 = 0x67,
    Push9 = 0x68,
    Push10 = 0x69,
    Push11 = 0x6A,
    Push12 = 0x6B,
    Push13 = 0x6C,
    Push14 = 0x6D,
    Push15 = 0x6E,
    Push16 = 0x6F,
    Push17 = 0x70,
    Push18 = 0x71,
    Push19 = 0x72,
    Push20 = 0x73,
    Push21 = 0x74,
    Push22 = 0x75,
    Push23 = 0x76,
    Push24 = 0x77,
    Push25 = 0x78,
    Push26 = 0x79,
    Push27 = 0x7A,
    Push28 = 0x7B,
    Push29 = 0x7C,
    Push30 = 0x7D,
    Push31 = 0x7E,
    Push32 = 0x7F,

    // 0x80 - 0x8F: Dup
    Dup1 = 0x80,
    Dup2 = 0x81,
    Dup3 = 0x82,
    Dup4 = 0x83,
    Dup5 = 0x84,
    Dup6 = 0x85,
    Dup7 = 0x86,
    Dup8 = 0x87,
    Dup9 = 0x88,
    Dup10 = 0x89,
    Dup11 = 0x8A,
    Dup12 = 0x8B,
    Dup13 = 0x8C,
    Dup14 = 0x8D,
    Dup15 = 0x8E,
    Dup16 = 0x8F,

    // 0x90 - 0x9F: Swap
    Swap1 = 0x90,
    Swap2 = 0x91,
    Swap3 = 0x92,
    Swap4 = 0x93,
    Swap5 = 0x94,
    Swap6 = 0x95,
    Swap7 = 0x96,
    Swap8 = 0x97,
    Swap9 = 0x98,
    Swap10 = 0x99,
    Swap11 = 0x9A,
    Swap12 = 0x9B,
    Swap13 = 0x9C,
    Swap14 = 0x9D,
    Swap15 = 0x9E,
    Swap16 = 0x9F,

    // 0xA0 - 0xA4: Log
    Log0 = 0xA0,
    Log1 = 0xA1,
    Log2 = 0xA2,
    Log3 = 0xA3,
    Log4 = 0xA4,

    // 0xF0 - 0xFF: System
    Create = 0xF0,
    Call = 0xF1,
    CallCode = 0xF2,
    Return = 0xF3,
    DelegateCall = 0xF4,
    StaticCall = 0xFA,
    Revert = 0xFD,
    Suicide = 0xFF,
}

/// Every defined opcode in byte order.
#[allow(clippy::enum_glob_use)]
const ALL: [Opcode; 134] = {
    use Opcode::*;
    [
        Stop, Add, Mul, Sub, Div, SDiv, Mod, SMod, AddMod, MulMod, Exp, SignExtend, Lt, Gt, SLt,
        SGt, Eq, IsZero, And, Or, Xor, Not, Byte, Sha3, Address, Balance, Origin, Caller,
        CallValue, CallDataLoad, CallDataSize, CallDataCopy, CodeSize, CodeCopy, GasPrice,
        ExtCodeSize, ExtCodeCopy, ReturnDataSize, ReturnDataCopy, BlockHash, Coinbase, Timestamp,
        Number, Difficulty, GasLimit, Pop, MLoad, MStore, MStore8, SLoad, SStore, Jump, JumpI, Pc,
        MSize, Gas, JumpDest, Push1, Push2, Push3, Push4, Push5, Push6, Push7, Push8, Push9,
        Push10, Push11, Push12, Push13, Push14, Push15, Push16, Push17, Push18, Push19, Push20,
        Push21, Push22, Push23, Push24, Push25, Push26, Push27, Push28, Push29, Push30, Push31,
        Push32, Dup1, Dup2, Dup3, Dup4, Dup5, Dup6, Dup7, Dup8, Dup9, Dup10, Dup11, Dup12, Dup13,
        Dup14, Dup15, Dup16, Swap1, Swap2, Swap3, Swap4, Swap5, Swap6, Swap7, Swap8, Swap9, Swap10,
        Swap11, Swap12, Swap13, Swap14, Swap15, Swap16, Log0, Log1, Log2, Log3, Log4, Create,
        Call, CallCode, Return, DelegateCall, StaticCall, Revert, Suicide,
    ]
};

/// Byte-indexed lookup built from [`ALL`].
const TABLE: [Option<Opcode>; 256] = {
    let mut table = [None; 256];
    let mut i = 0;
    while i < ALL.len() {
        table[ALL[i] as usize] = Some(ALL[i]);
        i += 1;
    }
    table
};

impl Opcode {
    /// Decodes a byte, `None` if it is not a defined instruction.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        TABLE[byte as usize]
    }

    /// The instruction byte.
    #[must_use]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Stack items the instruction consumes.
    #[must_use]
    pub const fn require(self) -> usize {
        let b = self as u8;
        match self {
            Self::Stop
            | Self::JumpDest
            | Self::Address
            | Self::Origin
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::GasPrice
            | Self::ReturnDataSize
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::Difficulty
            | Self::GasLimit
            | Self::Pc
            | Self::MSize
            | Self::Gas => 0,
            Self::IsZero
            | Self::Not
            | Self::Balance
            | Self::CallDataLoad
            | Self::ExtCodeSize
            | Self::BlockHash
            | Self::Pop
            | Self::MLoad
            | Self::SLoad
            | Self::Jump
            | Self::Suicide => 1,
            Self::AddMod
            | Self::MulMod
            | Self::CallDataCopy
            | Self::CodeCopy
            | Self::ReturnDataCopy
            | Self::Create => 3,
            Self::ExtCodeCopy => 4,
            Self::DelegateCall | Self::StaticCall => 6,
            Self::Call | Self::CallCode => 7,
            _ if b >= 0x60 && b <= 0x7F => 0,
            _ if b >= 0x80 && b <= 0x8F => (b - 0x7F) as usize,
            _ if b >= 0x90 && b <= 0x9F => (b - 0x8E) as usize,
            _ if b >= 0xA0 && b <= 0xA4 => (b - 0x9E) as usize,
            _ => 2,
        }
    }

    /// Stack items the instruction produces.
    #[must_use]
    pub const fn ret(self) -> usize {
        let b = self as u8;
        match self {
            Self::Stop
            | Self::CallDataCopy
            | Self::CodeCopy
            | Self::ExtCodeCopy
            | Self::ReturnDataCopy
            | Self::Pop
            | Self::MStore
            | Self::MStore8
            | Self::SStore
            | Self::Jump
            | Self::JumpI
            | Self::JumpDest
            | Self::Return
            | Self::Revert
            | Self::Suicide => 0,
            _ if b >= 0x80 && b <= 0x8F => (b - 0x7E) as usize,
            _ if b >= 0x90 && b <= 0x9F => (b - 0x8E) as usize,
            _ if b >= 0xA0 && b <= 0xA4 => 0,
            _ => 1,
        }
    }

    /// Fee tier of the instruction.
    #[must_use]
    pub const fn tier(self) -> Tier {
        let b = self as u8;
        match self {
            Self::Stop | Self::Return | Self::Revert | Self::Suicide => Tier::Zero,
            Self::Mul
            | Self::Div
            | Self::SDiv
            | Self::Mod
            | Self::SMod
            | Self::SignExtend => Tier::Low,
            Self::AddMod | Self::MulMod | Self::Jump => Tier::Mid,
            Self::JumpI => Tier::High,
            Self::Balance | Self::ExtCodeSize | Self::ExtCodeCopy | Self::BlockHash => Tier::Ext,
            Self::Exp
            | Self::Sha3
            | Self::SLoad
            | Self::SStore
            | Self::JumpDest
            | Self::Create
            | Self::Call
            | Self::CallCode
            | Self::DelegateCall
            | Self::StaticCall => Tier::Special,
            _ if b >= 0xA0 && b <= 0xA4 => Tier::Special,
            _ if b >= 0x60 && b <= 0x9F => Tier::VeryLow,
            Self::Address
            | Self::Origin
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::GasPrice
            | Self::ReturnDataSize
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::Difficulty
            | Self::GasLimit
            | Self::Pop
            | Self::Pc
            | Self::MSize
            | Self::Gas => Tier::Base,
            _ => Tier::VeryLow,
        }
    }

    /// Immediate bytes following a PUSH instruction.
    #[must_use]
    pub const fn push_size(self) -> Option<usize> {
        let b = self as u8;
        if b >= 0x60 && b <= 0x7F {
            Some((b - 0x5F) as usize)
        } else {
            None
        }
    }

    /// Topic count of a LOG instruction.
    #[must_use]
    pub const fn log_topics(self) -> Option<usize> {
        let b = self as u8;
        if b >= 0xA0 && b <= 0xA4 {
            Some((b - 0xA0) as usize)
        } else {
            None
        }
    }

    /// True for the four message-call instructions.
    #[must_use]
    pub const fn is_call(self) -> bool {
        matches!(
            self,
            Self::Call | Self::CallCode | Self::DelegateCall | Self::StaticCall
        )
    }

    /// The call carries a value operand.
    #[must_use]
    pub const fn call_has_value(self) -> bool {
        matches!(self, Self::Call | Self::CallCode)
    }

    /// The callee runs in the caller's storage context.
    #[must_use]
    pub const fn call_is_stateless(self) -> bool {
        matches!(self, Self::CallCode | Self::DelegateCall)
    }

    /// The callee inherits the caller's sender and value.
    #[must_use]
    pub const fn call_is_delegate(self) -> bool {
        matches!(self, Self::DelegateCall)
    }

    /// The callee runs in static mode.
    #[must_use]
    pub const fn call_is_static(self) -> bool {
        matches!(self, Self::StaticCall)
    }

    /// Assembly mnemonic.
    #[must_use]
    pub fn name(self) -> String {
        let b = self as u8;
        let fixed = match self {
            Self::Stop => "STOP",
            Self::Add => "ADD",
            Self::Mul => "MUL",
            Self::Sub => "SUB",
            Self::Div => "DIV",
            Self::SDiv => "SDIV",
            Self::Mod => "MOD",
            Self::SMod => "SMOD",
            Self::AddMod => "ADDMOD",
            Self::MulMod => "MULMOD",
            Self::Exp => "EXP",
            Self::SignExtend => "SIGNEXTEND",
            Self::Lt => "LT",
            Self::Gt => "GT",
            Self::SLt => "SLT",
            Self::SGt => "SGT",
            Self::Eq => "EQ",
            Self::IsZero => "ISZERO",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Not => "NOT",
            Self::Byte => "BYTE",
            Self::Sha3 => "SHA3",
            Self::Address => "ADDRESS",
            Self::Balance => "BALANCE",
            Self::Origin => "ORIGIN",
            Self::Caller => "CALLER",
            Self::CallValue => "CALLVALUE",
            Self::CallDataLoad => "CALLDATALOAD",
            Self::CallDataSize => "CALLDATASIZE",
            Self::CallDataCopy => "CALLDATACOPY",
            Self::CodeSize => "CODESIZE",
            Self::CodeCopy => "CODECOPY",
            Self::GasPrice => "GASPRICE",
            Self::ExtCodeSize => "EXTCODESIZE",
            Self::ExtCodeCopy => "EXTCODECOPY",
            Self::ReturnDataSize => "RETURNDATASIZE",
            Self::ReturnDataCopy => "RETURNDATACOPY",
            Self::BlockHash => "BLOCKHASH",
            Self::Coinbase => "COINBASE",
            Self::Timestamp => "TIMESTAMP",
            Self::Number => "NUMBER",
            Self::Difficulty => "DIFFICULTY",
            Self::GasLimit => "GASLIMIT",
            Self::Pop => "POP",
            Self::MLoad => "MLOAD",
            Self::MStore => "MSTORE",
            Self::MStore8 => "MSTORE8",
            Self::SLoad => "SLOAD",
            Self::SStore => "SSTORE",
            Self::Jump => "JUMP",
            Self::JumpI => "JUMPI",
            Self::Pc => "PC",
            Self::MSize => "MSIZE",
            Self::Gas => "GAS",
            Self::JumpDest => "JUMPDEST",
            Self::Create => "CREATE",
            Self::Call => "CALL",
            Self::CallCode => "CALLCODE",
            Self::Return => "RETURN",
            Self::DelegateCall => "DELEGATECALL",
            Self::StaticCall => "STATICCALL",
            Self::Revert => "REVERT",
            Self::Suicide => "SUICIDE",
            _ => "",
        };
        if !fixed.is_empty() {
            return fixed.to_string();
        }
        match b {
            0x60..=0x7F => format!("PUSH{}", b - 0x5F),
            0x80..=0x8F => format!("DUP{}", b - 0x7F),
            0x90..=0x9F => format!("SWAP{}", b - 0x8F),
            _ => format!("LOG{}", b - 0xA0),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Opcode {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        ALL.iter()
            .copied()
            .find(|op| op.name() == upper)
            .ok_or_else(|| AssemblyError::UnknownMnemonic(s.to_string()))
    }
}

// =============================================================================
// ASSEMBLER
// =============================================================================

/// Assembles whitespace-separated mnemonics into bytecode.
///
/// `PUSHn` takes one immediate, written as `0x`-prefixed hex or decimal, and
/// left-padded to `n` bytes. A bare `0x..` token is emitted as raw bytes.
///
/// # Errors
///
/// Returns `AssemblyError` for unknown mnemonics, malformed or oversized
/// immediates, and a `PUSHn` with no immediate.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblyError> {
    let mut code = Vec::new();
    let mut tokens = source.split_whitespace();

    while let Some(token) = tokens.next() {
        if let Some(raw) = token.strip_prefix("0x") {
            code.extend(hex::decode(raw)?);
            continue;
        }

        let op: Opcode = token.parse()?;
        code.push(op.byte());

        if let Some(size) = op.push_size() {
            let immediate = tokens
                .next()
                .ok_or_else(|| AssemblyError::MissingImmediate(op.name()))?;
            let bytes = parse_immediate(immediate)?;
            if bytes.len() > size {
                return Err(AssemblyError::ImmediateTooLarge {
                    mnemonic: op.name(),
                    immediate: immediate.to_string(),
                });
            }
            code.extend(std::iter::repeat(0u8).take(size - bytes.len()));
            code.extend(bytes);
        }
    }

    Ok(code)
}

fn parse_immediate(token: &str) -> Result<Vec<u8>, AssemblyError> {
    if let Some(raw) = token.strip_prefix("0x") {
        let padded = if raw.len() % 2 == 1 {
            format!("0{raw}")
        } else {
            raw.to_string()
        };
        return Ok(hex::decode(padded)?);
    }
    let value: u64 = token
        .parse()
        .map_err(|_| AssemblyError::UnknownMnemonic(token.to_string()))?;
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    Ok(bytes[first..].to_vec())
}

/// Renders bytecode as mnemonics, one instruction per token.
///
/// Undefined bytes print as `0xNN`. A truncated PUSH immediate is printed as-is.
#[must_use]
pub fn disassemble(code: &[u8]) -> String {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        match Opcode::from_byte(code[pc]) {
            Some(op) => {
                out.push(op.name());
                if let Some(size) = op.push_size() {
                    let end = (pc + 1 + size).min(code.len());
                    out.push(format!("0x{}", hex::encode(&code[pc + 1..end])));
                    pc += size;
                }
            }
            None => out.push(format!("0x{:02x}", code[pc])),
        }
        pc += 1;
    }
    out.join(" ")
}

// =============================================================================
// TESTS
// =============================================================================
