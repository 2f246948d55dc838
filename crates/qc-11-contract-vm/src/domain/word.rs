//! # Word
//!
//! The VM's only operand type: a 256-bit big-endian unsigned integer.
//!
//! `Word` is `Copy` and every operation returns a new value, so a word read from
//! the stack, memory or storage can be kept without defensive copying.
//!
//! ## Arithmetic Rules
//!
//! - `add`, `sub`, `mul` and `exp` wrap modulo 2^256.
//! - `div`, `modulo`, `sdiv` and `smod` return zero for a zero divisor.
//! - `sdiv` truncates toward zero; `smod` takes the sign of the dividend.
//! - `addmod` and `mulmod` are computed at 512-bit precision and return zero
//!   for a zero modulus.

use crate::domain::value_objects::{Address, U256};
use primitive_types::U512;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Width of a word in bytes.
pub const WORD_SIZE: usize = 32;

/// Largest value accepted by the 32-bit narrowing conversions.
pub const INT_MAX: u64 = 0x7FFF_FFFF;

/// Largest value accepted by the 64-bit narrowing conversions.
pub const LONG_MAX: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// A 256-bit machine word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Word(U256);

#[allow(clippy::should_implement_trait)]
impl Word {
    /// The zero word.
    pub const ZERO: Self = Self(U256([0, 0, 0, 0]));

    /// The word with value one.
    pub const ONE: Self = Self(U256([1, 0, 0, 0]));

    /// The all-ones word (2^256 - 1, or -1 when read as signed).
    pub const MAX: Self = Self(U256::MAX);

    /// Wraps a raw 256-bit integer.
    #[must_use]
    pub const fn new(value: U256) -> Self {
        Self(value)
    }

    /// Builds a word from big-endian bytes, right-aligned.
    ///
    /// Inputs longer than 32 bytes keep their trailing 32 bytes.
    #[must_use]
    pub fn from_be_slice(bytes: &[u8]) -> Self {
        let start = bytes.len().saturating_sub(WORD_SIZE);
        Self(U256::from_big_endian(&bytes[start..]))
    }

    /// Builds a word from `true`/`false` as 1/0.
    #[must_use]
    pub const fn from_bool(flag: bool) -> Self {
        if flag {
            Self::ONE
        } else {
            Self::ZERO
        }
    }

    /// Returns the underlying integer.
    #[must_use]
    pub const fn value(&self) -> U256 {
        self.0
    }

    /// Returns the 32-byte big-endian encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.to_big_endian(&mut out);
        out
    }

    /// Returns the low 20 bytes as an address.
    #[must_use]
    pub fn to_address(&self) -> Address {
        let bytes = self.to_bytes();
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&bytes[12..]);
        Address(addr)
    }

    /// Returns true if every byte is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the two's-complement sign bit is set.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0.bit(255)
    }

    /// Returns byte `index` counted from the most significant end (0..32).
    #[must_use]
    pub fn byte(&self, index: usize) -> u8 {
        if index >= WORD_SIZE {
            return 0;
        }
        self.0.byte(WORD_SIZE - 1 - index)
    }

    /// Number of bytes from the first non-zero byte to the end (0 for zero).
    #[must_use]
    pub fn bytes_occupied(&self) -> usize {
        (self.0.bits() + 7) / 8
    }

    /// Narrows to a non-negative 32-bit signed range, `None` if it does not fit.
    #[must_use]
    pub fn int_value(&self) -> Option<usize> {
        if self.0 > U256::from(INT_MAX) {
            None
        } else {
            usize::try_from(self.0.low_u64()).ok()
        }
    }

    /// Narrows to a non-negative 32-bit signed range, saturating at `i32::MAX`.
    #[must_use]
    pub fn int_value_safe(&self) -> usize {
        self.int_value().unwrap_or(INT_MAX as usize)
    }

    /// Narrows to a non-negative 64-bit signed range, saturating at `i64::MAX`.
    #[must_use]
    pub fn long_value_safe(&self) -> u64 {
        if self.0 > U256::from(LONG_MAX) {
            LONG_MAX
        } else {
            self.0.low_u64()
        }
    }

    // =========================================================================
    // UNSIGNED ARITHMETIC
    // =========================================================================

    /// `(self + other) mod 2^256`.
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self(self.0.overflowing_add(other.0).0)
    }

    /// `(self - other) mod 2^256`.
    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self(self.0.overflowing_sub(other.0).0)
    }

    /// `(self * other) mod 2^256`.
    #[must_use]
    pub fn mul(self, other: Self) -> Self {
        Self(self.0.overflowing_mul(other.0).0)
    }

    /// Unsigned division, zero for a zero divisor.
    #[must_use]
    pub fn div(self, other: Self) -> Self {
        if other.is_zero() {
            return Self::ZERO;
        }
        Self(self.0 / other.0)
    }

    /// Unsigned remainder, zero for a zero divisor.
    #[must_use]
    pub fn modulo(self, other: Self) -> Self {
        if other.is_zero() {
            return Self::ZERO;
        }
        Self(self.0 % other.0)
    }

    /// `self^exponent mod 2^256` by square-and-multiply.
    #[must_use]
    pub fn exp(self, exponent: Self) -> Self {
        let mut result = U256::one();
        let mut base = self.0;
        let mut exp = exponent.0;

        while !exp.is_zero() {
            if exp.bit(0) {
                result = result.overflowing_mul(base).0;
            }
            exp >>= 1;
            base = base.overflowing_mul(base).0;
        }

        Self(result)
    }

    /// `(self + other) mod modulus` without intermediate truncation.
    #[must_use]
    pub fn addmod(self, other: Self, modulus: Self) -> Self {
        if modulus.is_zero() {
            return Self::ZERO;
        }
        let sum = to_u512(self.0) + to_u512(other.0);
        Self(from_u512(sum % to_u512(modulus.0)))
    }

    /// `(self * other) mod modulus` without intermediate truncation.
    #[must_use]
    pub fn mulmod(self, other: Self, modulus: Self) -> Self {
        if modulus.is_zero() {
            return Self::ZERO;
        }
        let product = to_u512(self.0) * to_u512(other.0);
        Self(from_u512(product % to_u512(modulus.0)))
    }

    // =========================================================================
    // SIGNED ARITHMETIC
    // =========================================================================

    /// Two's-complement negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self((!self.0).overflowing_add(U256::one()).0)
    }

    fn abs(self) -> Self {
        if self.is_negative() {
            self.negate()
        } else {
            self
        }
    }

    /// Signed division truncating toward zero, zero for a zero divisor.
    #[must_use]
    pub fn sdiv(self, other: Self) -> Self {
        if other.is_zero() {
            return Self::ZERO;
        }
        let quotient = Self(self.abs().0 / other.abs().0);
        if self.is_negative() == other.is_negative() {
            quotient
        } else {
            quotient.negate()
        }
    }

    /// Signed remainder carrying the dividend's sign, zero for a zero divisor.
    #[must_use]
    pub fn smod(self, other: Self) -> Self {
        if other.is_zero() {
            return Self::ZERO;
        }
        let remainder = Self(self.abs().0 % other.abs().0);
        if self.is_negative() {
            remainder.negate()
        } else {
            remainder
        }
    }

    /// Compares as two's-complement signed integers.
    #[must_use]
    pub fn signed_cmp(&self, other: &Self) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.0.cmp(&other.0),
        }
    }

    /// Sign-extends from byte `k`, counted from the least significant end.
    ///
    /// Callers only pass `k < 32`; for `k >= 31` the word is returned unchanged.
    #[must_use]
    pub fn sign_extend(self, k: usize) -> Self {
        debug_assert!(k < WORD_SIZE, "sign_extend byte index out of range");
        if k >= WORD_SIZE - 1 {
            return self;
        }
        let sign_bit = k * 8 + 7;
        let low_mask = (U256::one() << (sign_bit + 1)) - U256::one();
        if self.0.bit(sign_bit) {
            Self(self.0 | !low_mask)
        } else {
            Self(self.0 & low_mask)
        }
    }

    // =========================================================================
    // BITWISE
    // =========================================================================

    /// Bitwise AND.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Bitwise OR.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Bitwise XOR.
    #[must_use]
    pub fn xor(self, other: Self) -> Self {
        Self(self.0 ^ other.0)
    }

    /// Bitwise NOT.
    #[must_use]
    pub fn not(self) -> Self {
        Self(!self.0)
    }
}

fn to_u512(value: U256) -> U512 {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes[32..]);
    U512::from_big_endian(&bytes)
}

fn from_u512(value: U512) -> U256 {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}

impl From<U256> for Word {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<usize> for Word {
    fn from(value: usize) -> Self {
        Self(U256::from(value))
    }
}

impl From<Address> for Word {
    fn from(address: Address) -> Self {
        Self::from_be_slice(&address.0)
    }
}

impl From<[u8; 32]> for Word {
    fn from(bytes: [u8; 32]) -> Self {
        Self(U256::from_big_endian(&bytes))
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word(0x{})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn w(n: u64) -> Word {
        Word::from(n)
    }

    fn neg(n: u64) -> Word {
        w(n).negate()
    }

    #[test]
    fn test_add_wraps() {
        assert_eq!(Word::MAX.add(w(1)), Word::ZERO);
        assert_eq!(Word::MAX.add(w(2)), w(1));
        assert_eq!(w(3).add(w(4)), w(7));
    }

    #[test]
    fn test_sub_wraps() {
        assert_eq!(Word::ZERO.sub(w(1)), Word::MAX);
        assert_eq!(w(10).sub(w(4)), w(6));
    }

    #[test]
    fn test_mul_wraps() {
        let half = Word::new(U256::one() << 255);
        assert_eq!(half.mul(w(2)), Word::ZERO);
        assert_eq!(w(6).mul(w(7)), w(42));
    }

    #[test]
    fn test_div_and_mod_by_zero() {
        assert_eq!(w(5).div(Word::ZERO), Word::ZERO);
        assert_eq!(w(5).modulo(Word::ZERO), Word::ZERO);
        assert_eq!(w(5).sdiv(Word::ZERO), Word::ZERO);
        assert_eq!(w(5).smod(Word::ZERO), Word::ZERO);
    }

    #[test]
    fn test_sdiv_signed_semantics() {
        assert_eq!(neg(8).sdiv(w(2)), neg(4));
        assert_eq!(w(8).sdiv(neg(2)), neg(4));
        assert_eq!(neg(8).sdiv(neg(2)), w(4));
        assert_eq!(neg(7).sdiv(w(2)), neg(3));
    }

    #[test]
    fn test_sdiv_min_by_minus_one() {
        let min = Word::new(U256::one() << 255);
        assert_eq!(min.sdiv(Word::MAX), min);
    }

    #[test]
    fn test_smod_takes_dividend_sign() {
        assert_eq!(neg(7).smod(w(3)), neg(1));
        assert_eq!(w(7).smod(neg(3)), w(1));
        assert_eq!(neg(7).smod(neg(3)), neg(1));
    }

    #[test]
    fn test_exp_small_values() {
        assert_eq!(w(2).exp(w(10)), w(1024));
        assert_eq!(w(3).exp(w(0)), w(1));
        assert_eq!(w(0).exp(w(0)), w(1));
        assert_eq!(w(7).exp(w(3)), w(343));
    }

    #[test]
    fn test_exp_wraps_modulo_2_256() {
        assert_eq!(w(2).exp(w(256)), Word::ZERO);
        assert_eq!(w(2).exp(w(255)), Word::new(U256::one() << 255));
    }

    #[test]
    fn test_addmod_full_precision() {
        // 2^256 + 1 = 2 (mod 3)
        assert_eq!(Word::MAX.addmod(w(2), w(3)), w(2));
        assert_eq!(w(10).addmod(w(10), w(8)), w(4));
        assert_eq!(w(10).addmod(w(10), Word::ZERO), Word::ZERO);
    }

    #[test]
    fn test_mulmod_full_precision() {
        // (2^256 - 1)^2 mod 7 computed without truncation
        let max = Word::MAX;
        let expected = {
            let m = U512::from(7u64);
            let v = to_u512(U256::MAX);
            from_u512((v * v) % m)
        };
        assert_eq!(max.mulmod(max, w(7)), Word::new(expected));
        assert_eq!(w(10).mulmod(w(10), w(8)), w(4));
        assert_eq!(w(10).mulmod(w(10), Word::ZERO), Word::ZERO);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(w(0xFF).sign_extend(0), Word::MAX);
        assert_eq!(w(0x7F).sign_extend(0), w(0x7F));
        assert_eq!(w(0x80FF).sign_extend(1), Word::MAX.sub(w(0x7F00)));
        assert_eq!(w(0x1_00FF).sign_extend(0), Word::MAX);
    }

    #[test]
    fn test_bytes_occupied() {
        assert_eq!(Word::ZERO.bytes_occupied(), 0);
        assert_eq!(w(1).bytes_occupied(), 1);
        assert_eq!(w(0x100).bytes_occupied(), 2);
        assert_eq!(Word::MAX.bytes_occupied(), 32);
    }

    #[test]
    fn test_byte_from_msb() {
        let word = Word::from_be_slice(&[0xAA, 0xBB]);
        assert_eq!(word.byte(31), 0xBB);
        assert_eq!(word.byte(30), 0xAA);
        assert_eq!(word.byte(0), 0);
        assert_eq!(word.byte(32), 0);
    }

    #[test]
    fn test_narrowing_conversions() {
        assert_eq!(w(100).int_value(), Some(100));
        assert_eq!(w(1 << 31).int_value(), None);
        assert_eq!(w(1 << 31).int_value_safe(), INT_MAX as usize);
        assert_eq!(Word::MAX.long_value_safe(), LONG_MAX);
        assert_eq!(w(77).long_value_safe(), 77);
    }

    #[test]
    fn test_signed_cmp() {
        assert_eq!(neg(1).signed_cmp(&w(1)), Ordering::Less);
        assert_eq!(w(1).signed_cmp(&neg(1)), Ordering::Greater);
        assert_eq!(neg(2).signed_cmp(&neg(1)), Ordering::Less);
        assert_eq!(neg(1).cmp(&w(1)), Ordering::Greater);
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(w(0b1100).and(w(0b1010)), w(0b1000));
        assert_eq!(w(0b1100).or(w(0b1010)), w(0b1110));
        assert_eq!(w(0b1100).xor(w(0b1010)), w(0b0110));
        assert_eq!(Word::ZERO.not(), Word::MAX);
    }

    #[test]
    fn test_address_round_trip_through_word() {
        let addr = Address([0x11; 20]);
        let word = Word::from(addr);
        assert_eq!(word.to_address(), addr);
        assert_eq!(word.bytes_occupied(), 20);
    }

    #[test]
    fn test_from_be_slice_keeps_trailing_bytes() {
        let mut long = vec![0xFFu8; 2];
        long.extend_from_slice(&[0u8; 31]);
        long.push(5);
        assert_eq!(Word::from_be_slice(&long), w(5));
    }
}
