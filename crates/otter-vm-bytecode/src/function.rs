//! Function descriptor: the compiled form of one function body

use serde::{Deserialize, Serialize};

use crate::constant::{Constant, ConstantPool};
use crate::error::{BytecodeError, Result};
use crate::feedback::{FeedbackSlotKind, FeedbackVector};
use crate::instruction::Instruction;
use crate::operand::{ConstantIndex, RESERVED_REGISTERS};

/// Function flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Strict mode code
    pub is_strict: bool,
    /// Arrow function (lexical `this`, no `arguments`)
    pub is_arrow: bool,
    /// Generator function
    pub is_generator: bool,
    /// Can be used with `new`
    pub is_constructor: bool,
    /// Object or class method
    pub is_method: bool,
    /// Last parameter is a rest parameter
    pub has_rest: bool,
}

/// How `CreateArguments` materializes the arguments object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum ArgumentsPolicy {
    /// Function never observes `arguments`
    #[default]
    None,
    /// Sloppy function with a simple parameter list
    Mapped,
    /// Strict function or non-simple parameter list
    Unmapped,
}

/// One entry of the exception-handler table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// First protected instruction
    pub start: u32,
    /// One past the last protected instruction
    pub end: u32,
    /// Handler entry point
    pub target: u32,
    /// Environment depth (relative to function entry) to restore
    pub env_depth: u16,
}

impl ExceptionHandler {
    /// Whether `pc` lies in the protected range
    #[inline]
    pub fn covers(&self, pc: usize) -> bool {
        (self.start as usize) <= pc && pc < (self.end as usize)
    }

    fn len(&self) -> u32 {
        self.end - self.start
    }
}

/// A compiled function
#[derive(Debug)]
pub struct Function {
    /// Function name (`None` for anonymous)
    pub name: Option<String>,

    /// Number of declared parameters (not including rest)
    pub param_count: u16,

    /// Number of registers, including the reserved ones
    pub register_count: u16,

    /// Function flags
    pub flags: FunctionFlags,

    /// Arguments object policy decided at resolution time
    pub arguments: ArgumentsPolicy,

    /// Bytecode instructions
    pub instructions: Vec<Instruction>,

    /// Constant pool
    pub constants: ConstantPool,

    /// Exception-handler table
    pub handlers: Vec<ExceptionHandler>,

    /// Feedback vector (mutable at runtime, shared by all activations)
    pub feedback: FeedbackVector,
}

impl Function {
    /// Create a new function builder
    pub fn builder() -> FunctionBuilder {
        FunctionBuilder::new()
    }

    /// Get the function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Check if function is a generator
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.is_generator
    }

    /// Check if function is an arrow function
    #[inline]
    pub fn is_arrow(&self) -> bool {
        self.flags.is_arrow
    }

    /// Check if function is in strict mode
    #[inline]
    pub fn is_strict(&self) -> bool {
        self.flags.is_strict
    }

    /// Check if function can be constructed
    #[inline]
    pub fn is_constructor(&self) -> bool {
        self.flags.is_constructor && !self.flags.is_arrow && !self.flags.is_generator
    }

    /// Constant at `idx`
    #[inline]
    pub fn constant(&self, idx: ConstantIndex) -> Option<&Constant> {
        self.constants.get(idx.0)
    }

    /// Innermost handler whose range contains `pc`
    pub fn handler_for(&self, pc: usize) -> Option<&ExceptionHandler> {
        self.handlers
            .iter()
            .filter(|h| h.covers(pc))
            .min_by_key(|h| h.len())
    }
}

impl Clone for Function {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            param_count: self.param_count,
            register_count: self.register_count,
            flags: self.flags,
            arguments: self.arguments,
            instructions: self.instructions.clone(),
            constants: self.constants.clone(),
            handlers: self.handlers.clone(),
            feedback: self.feedback.clone(),
        }
    }
}

/// Builder for creating functions
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    name: Option<String>,
    param_count: u16,
    register_count: Option<u16>,
    flags: FunctionFlags,
    arguments: ArgumentsPolicy,
    instructions: Vec<Instruction>,
    constants: ConstantPool,
    handlers: Vec<ExceptionHandler>,
    feedback_slots: Option<Vec<FeedbackSlotKind>>,
}

impl FunctionBuilder {
    /// Create a new function builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u16) -> Self {
        self.param_count = count;
        self
    }

    /// Set register count. When left unset, `build` sizes the register file
    /// from the parameters and the registers the instructions touch.
    pub fn register_count(mut self, count: u16) -> Self {
        self.register_count = Some(count);
        self
    }

    /// Set flags
    pub fn flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Mark as generator
    pub fn is_generator(mut self, value: bool) -> Self {
        self.flags.is_generator = value;
        self
    }

    /// Mark as arrow function
    pub fn is_arrow(mut self, value: bool) -> Self {
        self.flags.is_arrow = value;
        self
    }

    /// Mark as strict mode
    pub fn is_strict(mut self, value: bool) -> Self {
        self.flags.is_strict = value;
        self
    }

    /// Mark as constructor
    pub fn is_constructor(mut self, value: bool) -> Self {
        self.flags.is_constructor = value;
        self
    }

    /// Mark the last parameter as a rest parameter
    pub fn has_rest(mut self, value: bool) -> Self {
        self.flags.has_rest = value;
        self
    }

    /// Set the arguments object policy
    pub fn arguments(mut self, policy: ArgumentsPolicy) -> Self {
        self.arguments = policy;
        self
    }

    /// Set all instructions
    pub fn instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Add a single instruction
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Set the constant pool
    pub fn constants(mut self, constants: ConstantPool) -> Self {
        self.constants = constants;
        self
    }

    /// Add an exception handler
    pub fn handler(mut self, handler: ExceptionHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Declare the feedback slot kinds explicitly. When left unset, `build`
    /// derives them from the instructions that use each slot.
    pub fn feedback_slots(mut self, kinds: Vec<FeedbackSlotKind>) -> Self {
        self.feedback_slots = Some(kinds);
        self
    }

    /// Validate and build the function
    pub fn build(self) -> Result<Function> {
        let fixed = u32::from(RESERVED_REGISTERS)
            + u32::from(self.param_count)
            + u32::from(self.flags.has_rest);
        let used = self
            .instructions
            .iter()
            .map(Instruction::register_bound)
            .max()
            .unwrap_or(0);

        let register_count = match self.register_count {
            Some(count) if u32::from(count) < fixed => {
                return Err(BytecodeError::RegisterFileTooSmall {
                    count,
                    params: self.param_count,
                });
            }
            Some(count) => count,
            None => match u16::try_from(fixed.max(used)) {
                Ok(count) => count,
                Err(_) if fixed > u32::from(u16::MAX) => {
                    return Err(BytecodeError::RegisterFileTooSmall {
                        count: u16::MAX,
                        params: self.param_count,
                    });
                }
                // The instruction check below reports the offending register
                Err(_) => u16::MAX,
            },
        };

        let feedback_slots = match self.feedback_slots {
            Some(kinds) => kinds,
            None => infer_feedback_slots(&self.instructions),
        };

        let len = self.instructions.len();
        for (pc, instruction) in self.instructions.iter().enumerate() {
            let bound = instruction.register_bound();
            if bound > u32::from(register_count) {
                return Err(BytecodeError::RegisterOutOfRange {
                    pc,
                    register: bound - 1,
                    count: register_count,
                });
            }

            if let Some(offset) = instruction.jump_offset() {
                // Landing exactly at `len` falls off the end (implicit return)
                match offset.target(pc) {
                    Some(target) if target <= len => {}
                    _ => return Err(BytecodeError::InvalidJumpTarget(pc)),
                }
            }

            if let Some(idx) = instruction.constant_operand() {
                if self.constants.get(idx.0).is_none() {
                    return Err(BytecodeError::ConstantOutOfRange { pc, index: idx.0 });
                }
            }

            if let Some((slot, expected)) = instruction.feedback_slot() {
                match feedback_slots.get(slot.0 as usize) {
                    None => {
                        return Err(BytecodeError::FeedbackOutOfRange { pc, index: slot.0 });
                    }
                    Some(found) if *found != expected => {
                        return Err(BytecodeError::FeedbackKindMismatch {
                            pc,
                            index: slot.0,
                            expected,
                            found: *found,
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        for (i, handler) in self.handlers.iter().enumerate() {
            if handler.start >= handler.end
                || handler.end as usize > len
                || handler.target as usize >= len
            {
                return Err(BytecodeError::InvalidHandler(i));
            }
        }

        Ok(Function {
            name: self.name,
            param_count: self.param_count,
            register_count,
            flags: self.flags,
            arguments: self.arguments,
            instructions: self.instructions,
            constants: self.constants,
            handlers: self.handlers,
            feedback: FeedbackVector::new(&feedback_slots),
        })
    }
}

/// Slot kinds as required by the instructions; unused gaps default to
/// operation slots.
fn infer_feedback_slots(instructions: &[Instruction]) -> Vec<FeedbackSlotKind> {
    let mut kinds: Vec<Option<FeedbackSlotKind>> = Vec::new();
    for (slot, kind) in instructions.iter().filter_map(Instruction::feedback_slot) {
        let idx = slot.0 as usize;
        if kinds.len() <= idx {
            kinds.resize(idx + 1, None);
        }
        // First use wins; a conflicting later use is reported by validation
        kinds[idx].get_or_insert(kind);
    }
    kinds
        .into_iter()
        .map(|k| k.unwrap_or(FeedbackSlotKind::Operation))
        .collect()
}
