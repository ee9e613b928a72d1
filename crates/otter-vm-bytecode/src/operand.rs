//! Bytecode operands

use serde::{Deserialize, Serialize};

/// Number of low registers reserved in every activation before the
/// argument registers start.
pub const RESERVED_REGISTERS: u16 = 2;

/// Register holding the receiver (`this`) on function entry.
pub const RECEIVER_REGISTER: Register = Register(0);

/// Register holding `new.target` on function entry.
pub const NEW_TARGET_REGISTER: Register = Register(1);

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub u16);

impl Register {
    /// Create a new register
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Register holding the `index`-th argument
    #[inline]
    pub const fn argument(index: u16) -> Self {
        Self(RESERVED_REGISTERS + index)
    }

    /// Get register index
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }

    /// Register `n` slots after this one (for contiguous argument lists),
    /// or `None` past the last register
    #[inline]
    pub const fn offset(self, n: u16) -> Option<Self> {
        match self.0.checked_add(n) {
            Some(index) => Some(Self(index)),
            None => None,
        }
    }
}

impl From<u16> for Register {
    fn from(index: u16) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Index into a function's constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConstantIndex(pub u32);

impl ConstantIndex {
    /// Create a new constant index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into a function's feedback vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FeedbackIndex(pub u16);

impl FeedbackIndex {
    /// Create a new feedback index
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }
}

/// Jump offset (signed, relative to the jumping instruction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpOffset(pub i32);

impl JumpOffset {
    /// Create a new jump offset
    #[inline]
    pub const fn new(offset: i32) -> Self {
        Self(offset)
    }

    /// Get offset value
    #[inline]
    pub const fn offset(self) -> i32 {
        self.0
    }

    /// Absolute target of a jump located at `pc`, if it stays non-negative
    #[inline]
    pub fn target(self, pc: usize) -> Option<usize> {
        let target = pc as i64 + self.0 as i64;
        usize::try_from(target).ok()
    }
}
