//! # Operand Stack
//!
//! Bounded LIFO of [`Word`]s. The interpreter checks an instruction's arity with
//! [`Stack::verify`] before it touches anything, so the individual operations
//! below fail only when called outside the dispatch loop.

use crate::domain::invariants::limits::MAX_STACK_SIZE;
use crate::domain::word::Word;
use crate::errors::VmError;

/// Operand stack of one frame.
#[derive(Clone, Debug)]
pub struct Stack {
    data: Vec<Word>,
    limit: usize,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack {
    /// Creates an empty stack with the default limit of 1024.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_STACK_SIZE)
    }

    /// Creates an empty stack holding at most `limit` words.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            data: Vec::with_capacity(64),
            limit,
        }
    }

    /// Returns the number of elements on the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checks that an instruction popping `pops` and pushing `pushes` words fits.
    ///
    /// # Errors
    ///
    /// `StackUnderflow` if fewer than `pops` words are present, `StackOverflow`
    /// if the resulting size would exceed the limit.
    pub fn verify(&self, pops: usize, pushes: usize) -> Result<(), VmError> {
        let size = self.data.len();
        if size < pops {
            return Err(VmError::StackUnderflow {
                required: pops,
                actual: size,
            });
        }
        let after = size - pops + pushes;
        if after > self.limit {
            return Err(VmError::StackOverflow {
                size: after,
                max: self.limit,
            });
        }
        Ok(())
    }

    /// Pushes a word.
    ///
    /// # Errors
    ///
    /// Returns `StackOverflow` if the stack is full.
    pub fn push(&mut self, value: Word) -> Result<(), VmError> {
        if self.data.len() >= self.limit {
            return Err(VmError::StackOverflow {
                size: self.data.len() + 1,
                max: self.limit,
            });
        }
        self.data.push(value);
        Ok(())
    }

    /// Pops the top word.
    ///
    /// # Errors
    ///
    /// Returns `StackUnderflow` if the stack is empty.
    pub fn pop(&mut self) -> Result<Word, VmError> {
        self.data.pop().ok_or(VmError::StackUnderflow {
            required: 1,
            actual: 0,
        })
    }

    /// Returns the top word without removing it.
    ///
    /// # Errors
    ///
    /// Returns `StackUnderflow` if the stack is empty.
    pub fn peek(&self) -> Result<Word, VmError> {
        self.get(0)
    }

    /// Returns the word `depth` positions below the top (0 = top).
    ///
    /// # Errors
    ///
    /// Returns `StackUnderflow` if the stack is not deep enough.
    pub fn get(&self, depth: usize) -> Result<Word, VmError> {
        let size = self.data.len();
        if depth >= size {
            return Err(VmError::StackUnderflow {
                required: depth + 1,
                actual: size,
            });
        }
        Ok(self.data[size - 1 - depth])
    }

    /// Swaps the words at depths `i` and `j` (0 = top).
    ///
    /// # Errors
    ///
    /// Returns `StackUnderflow` if either depth is out of range.
    pub fn swap(&mut self, i: usize, j: usize) -> Result<(), VmError> {
        let size = self.data.len();
        let deepest = i.max(j);
        if deepest >= size {
            return Err(VmError::StackUnderflow {
                required: deepest + 1,
                actual: size,
            });
        }
        self.data.swap(size - 1 - i, size - 1 - j);
        Ok(())
    }

    /// Pushes a copy of the word at depth `n` (0 = top).
    ///
    /// # Errors
    ///
    /// `StackUnderflow` if not enough elements, `StackOverflow` if full.
    pub fn dup(&mut self, n: usize) -> Result<(), VmError> {
        let value = self.get(n)?;
        self.push(value)
    }

    /// Words from bottom to top.
    #[must_use]
    pub fn as_slice(&self) -> &[Word] {
        &self.data
    }
}

// =============================================================================
// TESTS
// =============================================================================
