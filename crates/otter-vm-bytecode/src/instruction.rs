//! Bytecode instructions
//!
//! Accumulator + register machine. Most instructions read an implicit
//! operand from the accumulator and leave their result there; register
//! operands name slots of the activation's register file.

use serde::{Deserialize, Serialize};

use crate::feedback::FeedbackSlotKind;
use crate::operand::{ConstantIndex, FeedbackIndex, JumpOffset, Register};

/// Kind of binding installed by [`Instruction::DeclareGlobal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalDeclarationKind {
    /// `var x` at script top level
    Var,
    /// `function f() {}` at script top level
    Function,
    /// `let x` at script top level
    Let,
    /// `const x` at script top level
    Const,
}

impl GlobalDeclarationKind {
    /// Lexical declarations live in the declarative part of the global scope
    pub fn is_lexical(self) -> bool {
        matches!(self, Self::Let | Self::Const)
    }
}

/// A decoded instruction with its operands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Constants ====================
    /// acc = undefined
    LoadUndefined,
    /// acc = null
    LoadNull,
    /// acc = true
    LoadTrue,
    /// acc = false
    LoadFalse,
    /// acc = <hole> (uninitialized lexical binding marker)
    LoadHole,
    /// acc = value
    LoadInt {
        /// Immediate
        value: i32,
    },
    /// acc = constants\[idx\]
    LoadConst {
        /// Constant pool index
        idx: ConstantIndex,
    },

    // ==================== Registers ====================
    /// acc = src
    Ldar {
        /// Source register
        src: Register,
    },
    /// dst = acc
    Star {
        /// Destination register
        dst: Register,
    },
    /// dst = src
    Mov {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },

    // ==================== Properties ====================
    /// acc = obj.name
    GetNamed {
        /// Object register
        obj: Register,
        /// Property name (string constant)
        name: ConstantIndex,
        /// Property feedback slot
        slot: FeedbackIndex,
    },
    /// obj.name = acc
    SetNamed {
        /// Object register
        obj: Register,
        /// Property name (string constant)
        name: ConstantIndex,
        /// Property feedback slot
        slot: FeedbackIndex,
    },
    /// acc = obj\[acc\]
    GetKeyed {
        /// Object register
        obj: Register,
        /// Property feedback slot
        slot: FeedbackIndex,
    },
    /// obj\[key\] = acc
    SetKeyed {
        /// Object register
        obj: Register,
        /// Key register
        key: Register,
        /// Property feedback slot
        slot: FeedbackIndex,
    },
    /// acc = delete obj.name
    DeleteNamed {
        /// Object register
        obj: Register,
        /// Property name (string constant)
        name: ConstantIndex,
    },
    /// acc = delete obj\[acc\]
    DeleteKeyed {
        /// Object register
        obj: Register,
    },
    /// acc = {}
    NewObject,
    /// acc = \[first, first+1, ..., first+count-1\]
    NewArray {
        /// First element register
        first: Register,
        /// Element count
        count: u16,
    },
    /// array.push(acc)
    ArrayPush {
        /// Array register
        array: Register,
    },

    // ==================== Binary operations (acc = lhs op acc) ====================
    /// Addition / string concatenation
    Add {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Subtraction
    Sub {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Multiplication
    Mul {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Division
    Div {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Remainder
    Mod {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Exponentiation
    Exp {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Bitwise AND
    BitAnd {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Bitwise OR
    BitOr {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Bitwise XOR
    BitXor {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Left shift
    Shl {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Signed right shift
    Shr {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Unsigned right shift
    Ushr {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },

    // ==================== Comparison (acc = lhs op acc) ====================
    /// Loose equality
    Eq {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Loose inequality
    NotEq {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Strict equality
    StrictEq {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Strict inequality
    StrictNotEq {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Less than
    Lt {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Less than or equal
    Le {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Greater than
    Gt {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// Greater than or equal
    Ge {
        /// Left operand
        lhs: Register,
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// acc = lhs instanceof acc
    InstanceOf {
        /// Left operand
        lhs: Register,
    },
    /// acc = lhs in acc
    In {
        /// Key register
        lhs: Register,
    },

    // ==================== Unary (operate on acc) ====================
    /// acc = -acc
    Negate {
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// acc = ~acc
    BitNot {
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// acc = acc + 1
    Inc {
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// acc = acc - 1
    Dec {
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// acc = ToNumeric(acc)
    ToNumeric {
        /// Operation feedback slot
        slot: FeedbackIndex,
    },
    /// acc = !acc
    Not,
    /// acc = typeof acc
    TypeOf,
    /// acc = acc === null || acc === undefined
    TestNullish,
    /// acc = acc === undefined
    TestUndefined,

    // ==================== Environment cells ====================
    /// Push a fresh environment block with `size` cells (all holes)
    PushEnv {
        /// Number of cells
        size: u16,
    },
    /// Pop the innermost environment block
    PopEnv,
    /// acc = env\[depth\].cells\[slot\]
    LoadCell {
        /// Blocks to walk outward (0 = innermost)
        depth: u16,
        /// Cell index inside the block
        slot: u16,
    },
    /// env\[depth\].cells\[slot\] = acc
    StoreCell {
        /// Blocks to walk outward (0 = innermost)
        depth: u16,
        /// Cell index inside the block
        slot: u16,
    },
    /// Throw a ReferenceError if acc is the hole
    ThrowIfHole {
        /// Binding name (string constant) for the message
        name: ConstantIndex,
    },
    /// Throw a TypeError for an assignment to a constant binding
    ThrowConstAssignment {
        /// Binding name (string constant) for the message
        name: ConstantIndex,
    },

    // ==================== Globals ====================
    /// acc = global binding `name` (ReferenceError if missing)
    LoadGlobal {
        /// Binding name (string constant)
        name: ConstantIndex,
        /// Property feedback slot (global object shape)
        slot: FeedbackIndex,
    },
    /// global binding `name` = acc
    StoreGlobal {
        /// Binding name (string constant)
        name: ConstantIndex,
        /// Property feedback slot (global object shape)
        slot: FeedbackIndex,
    },
    /// acc = typeof global binding `name` (no ReferenceError)
    TypeOfGlobal {
        /// Binding name (string constant)
        name: ConstantIndex,
    },
    /// Install a top-level declaration in the global scope. For functions
    /// the accumulator holds the closure. For `let`/`const` a hole in the
    /// accumulator declares the binding uninitialized and any other value
    /// initializes it.
    DeclareGlobal {
        /// Binding name (string constant)
        name: ConstantIndex,
        /// Declaration kind
        kind: GlobalDeclarationKind,
    },

    // ==================== Control flow ====================
    /// Unconditional jump
    Jump {
        /// Relative offset
        offset: JumpOffset,
    },
    /// Jump if acc is `true` (no coercion)
    JumpIfTrue {
        /// Relative offset
        offset: JumpOffset,
    },
    /// Jump if acc is `false` (no coercion)
    JumpIfFalse {
        /// Relative offset
        offset: JumpOffset,
    },
    /// Jump if ToBoolean(acc)
    JumpIfToBooleanTrue {
        /// Relative offset
        offset: JumpOffset,
    },
    /// Jump if !ToBoolean(acc)
    JumpIfToBooleanFalse {
        /// Relative offset
        offset: JumpOffset,
    },
    /// Jump if acc is null or undefined
    JumpIfNullish {
        /// Relative offset
        offset: JumpOffset,
    },
    /// Jump if acc is neither null nor undefined
    JumpIfNotNullish {
        /// Relative offset
        offset: JumpOffset,
    },
    /// Jump if acc is undefined
    JumpIfUndefined {
        /// Relative offset
        offset: JumpOffset,
    },

    // ==================== Calls ====================
    /// acc = callee.call(receiver, first_arg..first_arg+argc)
    Call {
        /// Callee register
        callee: Register,
        /// Receiver register
        receiver: Register,
        /// First argument register
        first_arg: Register,
        /// Argument count
        argc: u16,
    },
    /// Like `Call`, but the last argument register holds an iterable that
    /// is spread into the argument list
    CallSpread {
        /// Callee register
        callee: Register,
        /// Receiver register
        receiver: Register,
        /// First argument register
        first_arg: Register,
        /// Argument count (including the spread argument)
        argc: u16,
    },
    /// acc = callee.apply(receiver, array)
    CallWithArgumentArray {
        /// Callee register
        callee: Register,
        /// Receiver register
        receiver: Register,
        /// Register holding an array of arguments
        arguments: Register,
    },
    /// acc = new callee(first_arg..first_arg+argc)
    Construct {
        /// Callee register
        callee: Register,
        /// First argument register
        first_arg: Register,
        /// Argument count
        argc: u16,
    },
    /// Like `Construct`, last argument spread
    ConstructSpread {
        /// Callee register
        callee: Register,
        /// First argument register
        first_arg: Register,
        /// Argument count (including the spread argument)
        argc: u16,
    },
    /// acc = new callee(...array)
    ConstructWithArgumentArray {
        /// Callee register
        callee: Register,
        /// Register holding an array of arguments
        arguments: Register,
    },

    // ==================== Iteration ====================
    /// dst = GetIterator(acc)
    GetIterator {
        /// Destination register for the iterator
        dst: Register,
    },
    /// acc = iterator.next() (must be an object)
    IteratorStep {
        /// Iterator register
        iterator: Register,
    },
    /// acc = ToBoolean(result.done)
    IteratorComplete {
        /// Iterator result register
        result: Register,
    },
    /// acc = result.value
    IteratorValue {
        /// Iterator result register
        result: Register,
    },

    // ==================== Functions ====================
    /// acc = closure over constants\[func\] and the current environment chain
    NewClosure {
        /// Function constant index
        func: ConstantIndex,
    },
    /// acc = arguments object, per the descriptor's arguments policy
    CreateArguments,
    /// Suspend the generator, yielding acc. On resumption acc holds the
    /// value sent by the caller.
    Yield,
    /// Return acc
    Return,
    /// Throw acc
    Throw,

    // ==================== Misc ====================
    /// No operation
    Nop,
    /// Debugger statement
    Debugger,
}

impl Instruction {
    /// Get the name of this instruction
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LoadUndefined => "LoadUndefined",
            Self::LoadNull => "LoadNull",
            Self::LoadTrue => "LoadTrue",
            Self::LoadFalse => "LoadFalse",
            Self::LoadHole => "LoadHole",
            Self::LoadInt { .. } => "LoadInt",
            Self::LoadConst { .. } => "LoadConst",
            Self::Ldar { .. } => "Ldar",
            Self::Star { .. } => "Star",
            Self::Mov { .. } => "Mov",
            Self::GetNamed { .. } => "GetNamed",
            Self::SetNamed { .. } => "SetNamed",
            Self::GetKeyed { .. } => "GetKeyed",
            Self::SetKeyed { .. } => "SetKeyed",
            Self::DeleteNamed { .. } => "DeleteNamed",
            Self::DeleteKeyed { .. } => "DeleteKeyed",
            Self::NewObject => "NewObject",
            Self::NewArray { .. } => "NewArray",
            Self::ArrayPush { .. } => "ArrayPush",
            Self::Add { .. } => "Add",
            Self::Sub { .. } => "Sub",
            Self::Mul { .. } => "Mul",
            Self::Div { .. } => "Div",
            Self::Mod { .. } => "Mod",
            Self::Exp { .. } => "Exp",
            Self::BitAnd { .. } => "BitAnd",
            Self::BitOr { .. } => "BitOr",
            Self::BitXor { .. } => "BitXor",
            Self::Shl { .. } => "Shl",
            Self::Shr { .. } => "Shr",
            Self::Ushr { .. } => "Ushr",
            Self::Eq { .. } => "Eq",
            Self::NotEq { .. } => "NotEq",
            Self::StrictEq { .. } => "StrictEq",
            Self::StrictNotEq { .. } => "StrictNotEq",
            Self::Lt { .. } => "Lt",
            Self::Le { .. } => "Le",
            Self::Gt { .. } => "Gt",
            Self::Ge { .. } => "Ge",
            Self::InstanceOf { .. } => "InstanceOf",
            Self::In { .. } => "In",
            Self::Negate { .. } => "Negate",
            Self::BitNot { .. } => "BitNot",
            Self::Inc { .. } => "Inc",
            Self::Dec { .. } => "Dec",
            Self::ToNumeric { .. } => "ToNumeric",
            Self::Not => "Not",
            Self::TypeOf => "TypeOf",
            Self::TestNullish => "TestNullish",
            Self::TestUndefined => "TestUndefined",
            Self::PushEnv { .. } => "PushEnv",
            Self::PopEnv => "PopEnv",
            Self::LoadCell { .. } => "LoadCell",
            Self::StoreCell { .. } => "StoreCell",
            Self::ThrowIfHole { .. } => "ThrowIfHole",
            Self::ThrowConstAssignment { .. } => "ThrowConstAssignment",
            Self::LoadGlobal { .. } => "LoadGlobal",
            Self::StoreGlobal { .. } => "StoreGlobal",
            Self::TypeOfGlobal { .. } => "TypeOfGlobal",
            Self::DeclareGlobal { .. } => "DeclareGlobal",
            Self::Jump { .. } => "Jump",
            Self::JumpIfTrue { .. } => "JumpIfTrue",
            Self::JumpIfFalse { .. } => "JumpIfFalse",
            Self::JumpIfToBooleanTrue { .. } => "JumpIfToBooleanTrue",
            Self::JumpIfToBooleanFalse { .. } => "JumpIfToBooleanFalse",
            Self::JumpIfNullish { .. } => "JumpIfNullish",
            Self::JumpIfNotNullish { .. } => "JumpIfNotNullish",
            Self::JumpIfUndefined { .. } => "JumpIfUndefined",
            Self::Call { .. } => "Call",
            Self::CallSpread { .. } => "CallSpread",
            Self::CallWithArgumentArray { .. } => "CallWithArgumentArray",
            Self::Construct { .. } => "Construct",
            Self::ConstructSpread { .. } => "ConstructSpread",
            Self::ConstructWithArgumentArray { .. } => "ConstructWithArgumentArray",
            Self::GetIterator { .. } => "GetIterator",
            Self::IteratorStep { .. } => "IteratorStep",
            Self::IteratorComplete { .. } => "IteratorComplete",
            Self::IteratorValue { .. } => "IteratorValue",
            Self::NewClosure { .. } => "NewClosure",
            Self::CreateArguments => "CreateArguments",
            Self::Yield => "Yield",
            Self::Return => "Return",
            Self::Throw => "Throw",
            Self::Nop => "Nop",
            Self::Debugger => "Debugger",
        }
    }

    /// Feedback slot used by this instruction, with the slot kind it expects
    pub fn feedback_slot(&self) -> Option<(FeedbackIndex, FeedbackSlotKind)> {
        match self {
            Self::GetNamed { slot, .. }
            | Self::SetNamed { slot, .. }
            | Self::GetKeyed { slot, .. }
            | Self::SetKeyed { slot, .. }
            | Self::LoadGlobal { slot, .. }
            | Self::StoreGlobal { slot, .. } => Some((*slot, FeedbackSlotKind::Property)),

            Self::Add { slot, .. }
            | Self::Sub { slot, .. }
            | Self::Mul { slot, .. }
            | Self::Div { slot, .. }
            | Self::Mod { slot, .. }
            | Self::Exp { slot, .. }
            | Self::BitAnd { slot, .. }
            | Self::BitOr { slot, .. }
            | Self::BitXor { slot, .. }
            | Self::Shl { slot, .. }
            | Self::Shr { slot, .. }
            | Self::Ushr { slot, .. }
            | Self::Eq { slot, .. }
            | Self::NotEq { slot, .. }
            | Self::StrictEq { slot, .. }
            | Self::StrictNotEq { slot, .. }
            | Self::Lt { slot, .. }
            | Self::Le { slot, .. }
            | Self::Gt { slot, .. }
            | Self::Ge { slot, .. }
            | Self::Negate { slot }
            | Self::BitNot { slot }
            | Self::Inc { slot }
            | Self::Dec { slot }
            | Self::ToNumeric { slot } => Some((*slot, FeedbackSlotKind::Operation)),

            _ => None,
        }
    }

    /// Relative jump offset, for jump instructions
    pub fn jump_offset(&self) -> Option<JumpOffset> {
        match self {
            Self::Jump { offset }
            | Self::JumpIfTrue { offset }
            | Self::JumpIfFalse { offset }
            | Self::JumpIfToBooleanTrue { offset }
            | Self::JumpIfToBooleanFalse { offset }
            | Self::JumpIfNullish { offset }
            | Self::JumpIfNotNullish { offset }
            | Self::JumpIfUndefined { offset } => Some(*offset),
            _ => None,
        }
    }

    /// Constant pool operand, for instructions that reference one
    pub fn constant_operand(&self) -> Option<ConstantIndex> {
        match self {
            Self::LoadConst { idx } => Some(*idx),
            Self::GetNamed { name, .. }
            | Self::SetNamed { name, .. }
            | Self::DeleteNamed { name, .. }
            | Self::ThrowIfHole { name }
            | Self::ThrowConstAssignment { name }
            | Self::LoadGlobal { name, .. }
            | Self::StoreGlobal { name, .. }
            | Self::TypeOfGlobal { name }
            | Self::DeclareGlobal { name, .. } => Some(*name),
            Self::NewClosure { func } => Some(*func),
            _ => None,
        }
    }

    /// Highest register (exclusive) touched by this instruction. Wider than
    /// a register index so `r65535` and long argument ranges stay exact.
    pub fn register_bound(&self) -> u32 {
        let single = |r: &Register| u32::from(r.0) + 1;
        let range = |first: &Register, count: u16| u32::from(first.0) + u32::from(count);
        match self {
            Self::Ldar { src } => single(src),
            Self::Star { dst } => single(dst),
            Self::Mov { dst, src } => single(dst).max(single(src)),
            Self::GetNamed { obj, .. }
            | Self::SetNamed { obj, .. }
            | Self::GetKeyed { obj, .. }
            | Self::DeleteNamed { obj, .. }
            | Self::DeleteKeyed { obj } => single(obj),
            Self::SetKeyed { obj, key, .. } => single(obj).max(single(key)),
            Self::NewArray { first, count } => range(first, *count),
            Self::ArrayPush { array } => single(array),
            Self::Add { lhs, .. }
            | Self::Sub { lhs, .. }
            | Self::Mul { lhs, .. }
            | Self::Div { lhs, .. }
            | Self::Mod { lhs, .. }
            | Self::Exp { lhs, .. }
            | Self::BitAnd { lhs, .. }
            | Self::BitOr { lhs, .. }
            | Self::BitXor { lhs, .. }
            | Self::Shl { lhs, .. }
            | Self::Shr { lhs, .. }
            | Self::Ushr { lhs, .. }
            | Self::Eq { lhs, .. }
            | Self::NotEq { lhs, .. }
            | Self::StrictEq { lhs, .. }
            | Self::StrictNotEq { lhs, .. }
            | Self::Lt { lhs, .. }
            | Self::Le { lhs, .. }
            | Self::Gt { lhs, .. }
            | Self::Ge { lhs, .. }
            | Self::InstanceOf { lhs }
            | Self::In { lhs } => single(lhs),
            Self::Call {
                callee,
                receiver,
                first_arg,
                argc,
            }
            | Self::CallSpread {
                callee,
                receiver,
                first_arg,
                argc,
            } => single(callee)
                .max(single(receiver))
                .max(range(first_arg, *argc)),
            Self::CallWithArgumentArray {
                callee,
                receiver,
                arguments,
            } => single(callee).max(single(receiver)).max(single(arguments)),
            Self::Construct {
                callee,
                first_arg,
                argc,
            }
            | Self::ConstructSpread {
                callee,
                first_arg,
                argc,
            } => single(callee).max(range(first_arg, *argc)),
            Self::ConstructWithArgumentArray { callee, arguments } => {
                single(callee).max(single(arguments))
            }
            Self::GetIterator { dst } => single(dst),
            Self::IteratorStep { iterator } => single(iterator),
            Self::IteratorComplete { result } | Self::IteratorValue { result } => single(result),
            _ => 0,
        }
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Return | Self::Throw | Self::Jump { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_name() {
        assert_eq!(Instruction::LoadUndefined.name(), "LoadUndefined");
        assert_eq!(
            Instruction::Add {
                lhs: Register(2),
                slot: FeedbackIndex(0)
            }
            .name(),
            "Add"
        );
        assert_eq!(Instruction::Return.name(), "Return");
    }

    #[test]
    fn test_feedback_slot_kinds() {
        let get = Instruction::GetNamed {
            obj: Register(2),
            name: ConstantIndex(0),
            slot: FeedbackIndex(3),
        };
        assert_eq!(
            get.feedback_slot(),
            Some((FeedbackIndex(3), FeedbackSlotKind::Property))
        );

        let neg = Instruction::Negate {
            slot: FeedbackIndex(1),
        };
        assert_eq!(
            neg.feedback_slot(),
            Some((FeedbackIndex(1), FeedbackSlotKind::Operation))
        );
        assert_eq!(Instruction::Not.feedback_slot(), None);
    }

    #[test]
    fn test_register_bound_covers_argument_range() {
        let call = Instruction::Call {
            callee: Register(2),
            receiver: Register(3),
            first_arg: Register(4),
            argc: 3,
        };
        assert_eq!(call.register_bound(), 7);
        assert_eq!(Instruction::LoadTrue.register_bound(), 0);

        let last = Instruction::Ldar {
            src: Register(u16::MAX),
        };
        assert_eq!(last.register_bound(), 65_536);
        let wide = Instruction::NewArray {
            first: Register(u16::MAX),
            count: u16::MAX,
        };
        assert_eq!(wide.register_bound(), 131_070);
    }

    #[test]
    fn test_instruction_serializes() {
        let instr = Instruction::LoadCell { depth: 1, slot: 2 };
        let json = serde_json::to_string(&instr).unwrap();
        let back: Instruction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, instr);
    }
}
