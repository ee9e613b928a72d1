//! Bytecode errors

use thiserror::Error;

use crate::feedback::FeedbackSlotKind;

/// Errors found while validating a function descriptor
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BytecodeError {
    /// Instruction uses a register outside the register file
    #[error("Register r{register} out of range at pc {pc} (register count {count})")]
    RegisterOutOfRange {
        /// Offending instruction
        pc: usize,
        /// Highest register touched
        register: u32,
        /// Declared register count
        count: u16,
    },

    /// Register file too small for receiver, new.target and parameters
    #[error("Register count {count} cannot hold {params} parameters")]
    RegisterFileTooSmall {
        /// Declared register count
        count: u16,
        /// Declared parameter count
        params: u16,
    },

    /// Jump lands outside the instruction stream
    #[error("Jump target out of bounds at pc {0}")]
    InvalidJumpTarget(usize),

    /// Constant index past the end of the pool
    #[error("Constant index {index} out of range at pc {pc}")]
    ConstantOutOfRange {
        /// Offending instruction
        pc: usize,
        /// Constant index
        index: u32,
    },

    /// Feedback index past the end of the feedback vector
    #[error("Feedback slot {index} out of range at pc {pc}")]
    FeedbackOutOfRange {
        /// Offending instruction
        pc: usize,
        /// Feedback index
        index: u16,
    },

    /// Instruction expects a different kind of feedback slot
    #[error("Feedback slot {index} at pc {pc} is {found:?}, expected {expected:?}")]
    FeedbackKindMismatch {
        /// Offending instruction
        pc: usize,
        /// Feedback index
        index: u16,
        /// Kind required by the instruction
        expected: FeedbackSlotKind,
        /// Kind declared in the descriptor
        found: FeedbackSlotKind,
    },

    /// Exception handler with an empty or out-of-bounds range or target
    #[error("Invalid exception handler #{0}")]
    InvalidHandler(usize),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
