//! # Otter VM Bytecode
//!
//! Instruction stream and function descriptors executed by the Otter VM
//! interpreter.
//!
//! ## Design Principles
//!
//! - **Accumulator + registers**: most instructions read and write an
//!   implicit accumulator, naming at most a few registers explicitly
//! - **Validated**: descriptors are checked once by [`FunctionBuilder::build`]
//! - **Feedback-carrying**: property and arithmetic sites own a slot in the
//!   function's [`FeedbackVector`]

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constant;
pub mod error;
pub mod feedback;
pub mod function;
pub mod instruction;
pub mod operand;

pub use constant::{Constant, ConstantPool};
pub use error::BytecodeError;
pub use feedback::{
    FeedbackSlot, FeedbackSlotKind, FeedbackState, FeedbackVector, MAX_POLYMORPHIC_ENTRIES,
    NumericRange, PropertyCache, TypeSummary,
};
pub use function::{ArgumentsPolicy, ExceptionHandler, Function, FunctionBuilder, FunctionFlags};
pub use instruction::{GlobalDeclarationKind, Instruction};
pub use operand::{
    ConstantIndex, FeedbackIndex, JumpOffset, NEW_TARGET_REGISTER, RECEIVER_REGISTER,
    RESERVED_REGISTERS, Register,
};
