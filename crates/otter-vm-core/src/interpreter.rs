//! Bytecode interpreter
//!
//! Calls between bytecode functions never recurse on the Rust stack: the
//! dispatch loop keeps the suspended callers in an explicit frame stack
//! bounded by `RuntimeConfig::max_stack_depth`. Only host functions,
//! generator resumption and iteration re-enter the loop from Rust, and that
//! nesting is bounded separately by `RuntimeConfig::max_reentry_depth`. A
//! generator activation leaves the loop at `Yield` and hands its frame back
//! to the generator object.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use otter_vm_bytecode::{
    ArgumentsPolicy, Constant, ConstantIndex, FeedbackIndex, Function, GlobalDeclarationKind,
    Instruction, JumpOffset, NEW_TARGET_REGISTER, RECEIVER_REGISTER, RESERVED_REGISTERS,
    Register, TypeSummary,
};

use crate::context::{CallFrame, VmContext};
use crate::convert::{parse_bigint, to_property_key, to_string};
use crate::environment::Environment;
use crate::error::{StackFrame, VmError, VmResult};
use crate::generator::{GeneratorStep, JsGenerator, ResumeMode, Resumption};
use crate::object::{JsObject, PropertyKey};
use crate::operations::{self, BinaryOp, UnaryOp};
use crate::runtime::RuntimeConfig;
use crate::value::{Closure, HeapRef, Value};

/// The bytecode interpreter
pub struct Interpreter {
    context: VmContext,
    /// Live activations, bytecode and host
    depth: usize,
    /// Dispatch loops and host calls currently on the Rust stack
    reentry: usize,
}

/// Result of executing an instruction
enum InstructionResult {
    /// Continue to next instruction
    Continue,
    /// Continue at an absolute instruction index
    Jump(usize),
    /// Return from function
    Return(Value),
    /// Suspend the generator with the accumulator
    Yield,
    /// Push a bytecode activation on the frame stack
    Call(Box<CallFrame>, CallKind),
}

/// How a bytecode activation was entered
enum CallKind {
    Call,
    /// `new`; a non-object return yields the receiver
    Construct(Value),
}

struct Activation {
    frame: CallFrame,
    kind: CallKind,
}

/// How an activation left the dispatch loop
enum Completion {
    Return(Value),
    Yield(CallFrame, Value),
}

impl Interpreter {
    /// Create an interpreter with a fresh context
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_context(VmContext::new(config))
    }

    /// Create an interpreter over an existing context
    pub fn with_context(context: VmContext) -> Self {
        Self {
            context,
            depth: 0,
            reentry: 0,
        }
    }

    /// Execution context
    pub fn context(&self) -> &VmContext {
        &self.context
    }

    /// Execution context, mutably
    pub fn context_mut(&mut self) -> &mut VmContext {
        &mut self.context
    }

    /// Number of live activations
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Run a function descriptor (usually a script) to completion
    pub fn run(&mut self, function: &Arc<Function>, this: Value, args: &[Value]) -> VmResult<Value> {
        let span = tracing::debug_span!("run", function = function.display_name());
        let _enter = span.enter();
        let closure = self.new_closure(Arc::clone(function), None);
        self.call_value(&closure, this, args.to_vec())
    }

    /// Call any callable value
    pub fn call(&mut self, callee: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        self.call_value(callee, this, args.to_vec())
    }

    /// Call any constructor with `new`
    pub fn construct(&mut self, callee: &Value, args: &[Value]) -> VmResult<Value> {
        self.construct_value(callee, args.to_vec())
    }

    /// Resume a suspended generator
    pub fn resume(
        &mut self,
        generator: &Arc<JsGenerator>,
        mode: ResumeMode,
        value: Value,
    ) -> VmResult<GeneratorStep> {
        let Some(Resumption { mut frame, started }) = generator.begin()? else {
            tracing::debug!(?mode, "resuming a completed generator");
            return match mode {
                ResumeMode::Next => Ok(GeneratorStep::Done(Value::undefined())),
                ResumeMode::Return => Ok(GeneratorStep::Done(value)),
                ResumeMode::Throw => Err(VmError::exception(value)),
            };
        };
        tracing::debug!(?mode, started, pc = frame.pc, "resuming generator");

        match mode {
            ResumeMode::Next => {
                if started {
                    frame.acc = value;
                }
            }
            ResumeMode::Return => {
                generator.complete();
                return Ok(GeneratorStep::Done(value));
            }
            ResumeMode::Throw => {
                if !started {
                    generator.complete();
                    return Err(VmError::exception(value));
                }
                // Raise at the paused Yield
                let function = Arc::clone(&frame.function);
                let yield_pc = frame.pc.saturating_sub(1);
                if let Err(err) = self.unwind(&function, &mut frame, yield_pc, VmError::exception(value)) {
                    generator.complete();
                    return Err(err);
                }
            }
        }

        match self.nested(|interp| interp.execute(frame)) {
            Ok(Completion::Yield(frame, value)) => {
                generator.suspend(frame);
                Ok(GeneratorStep::Yielded(value))
            }
            Ok(Completion::Return(value)) => {
                generator.complete();
                Ok(GeneratorStep::Done(value))
            }
            Err(err) => {
                generator.complete();
                Err(err)
            }
        }
    }

    /// Generic property read (no inline cache)
    pub fn get_property(&self, target: &Value, key: &PropertyKey) -> VmResult<Value> {
        match target.property_holder() {
            Some(holder) => Ok(holder.get(key).unwrap_or_default()),
            None => primitive_property(target, key),
        }
    }

    // ==================== Calls ====================

    fn call_value(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> VmResult<Value> {
        if self.context.is_interrupted() {
            return Err(VmError::interrupted());
        }
        match callee.heap_ref() {
            Some(HeapRef::Function(closure)) => {
                let closure = Arc::clone(closure);
                let frame = self.prepare_frame(&closure, callee, this, Value::undefined(), args);
                if closure.function.is_generator() {
                    let prototype = Arc::clone(self.context.generator_prototype());
                    return Ok(Value::generator(JsGenerator::new(frame, Some(prototype))));
                }
                match self.nested(|interp| interp.execute(frame))? {
                    Completion::Return(value) => Ok(value),
                    Completion::Yield(..) => Err(VmError::internal("yield outside a generator")),
                }
            }
            Some(HeapRef::NativeFunction(native)) => {
                let func = Arc::clone(&native.func);
                self.nested(|interp| (*func)(interp, &this, &args))
            }
            _ => Err(VmError::type_error(format!(
                "{} is not a function",
                describe(callee)
            ))),
        }
    }

    fn construct_value(&mut self, callee: &Value, args: Vec<Value>) -> VmResult<Value> {
        if self.context.is_interrupted() {
            return Err(VmError::interrupted());
        }
        match callee.heap_ref() {
            Some(HeapRef::Function(closure)) if closure.function.is_constructor() => {
                let closure = Arc::clone(closure);
                let receiver = Value::object(Arc::new(JsObject::new(prototype_of(&closure.object))));
                let frame = self.prepare_frame(&closure, callee, receiver.clone(), callee.clone(), args);
                match self.nested(|interp| interp.execute(frame))? {
                    Completion::Return(value) if value.is_object() => Ok(value),
                    Completion::Return(_) => Ok(receiver),
                    Completion::Yield(..) => Err(VmError::internal("yield outside a generator")),
                }
            }
            Some(HeapRef::NativeFunction(native)) if native.constructor => {
                let func = Arc::clone(&native.func);
                let receiver = Value::object(Arc::new(JsObject::new(prototype_of(&native.object))));
                let result = self.nested(|interp| (*func)(interp, &receiver, &args))?;
                Ok(if result.is_object() { result } else { receiver })
            }
            _ => Err(VmError::type_error(format!(
                "{} is not a constructor",
                describe(callee)
            ))),
        }
    }

    /// Run `f` one activation deeper on the Rust stack
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> VmResult<T>) -> VmResult<T> {
        if self.reentry >= self.context.config().max_reentry_depth {
            tracing::debug!(reentry = self.reentry, "re-entrant call depth exhausted");
            return Err(VmError::StackOverflow);
        }
        self.enter_activation()?;
        self.reentry += 1;
        let result = f(self);
        self.reentry -= 1;
        self.depth -= 1;
        result
    }

    fn enter_activation(&mut self) -> VmResult<()> {
        if self.depth >= self.context.config().max_stack_depth {
            tracing::debug!(depth = self.depth, "call stack exhausted");
            return Err(VmError::StackOverflow);
        }
        self.depth += 1;
        Ok(())
    }

    /// Call from bytecode. Plain closures run on the dispatch loop's frame
    /// stack; everything else goes through [`Self::call_value`].
    fn call_from_bytecode(
        &mut self,
        frame: &mut CallFrame,
        callee: Value,
        this: Value,
        args: Vec<Value>,
    ) -> VmResult<InstructionResult> {
        match callee.as_function() {
            Some(closure) if !closure.function.is_generator() => {
                if self.context.is_interrupted() {
                    return Err(VmError::interrupted());
                }
                let closure = Arc::clone(closure);
                let callee_frame = self.prepare_frame(&closure, &callee, this, Value::undefined(), args);
                Ok(InstructionResult::Call(Box::new(callee_frame), CallKind::Call))
            }
            _ => {
                frame.acc = self.call_value(&callee, this, args)?;
                Ok(InstructionResult::Continue)
            }
        }
    }

    fn construct_from_bytecode(
        &mut self,
        frame: &mut CallFrame,
        callee: Value,
        args: Vec<Value>,
    ) -> VmResult<InstructionResult> {
        match callee.as_function() {
            Some(closure) if closure.function.is_constructor() => {
                if self.context.is_interrupted() {
                    return Err(VmError::interrupted());
                }
                let closure = Arc::clone(closure);
                let receiver = Value::object(Arc::new(JsObject::new(prototype_of(&closure.object))));
                let callee_frame =
                    self.prepare_frame(&closure, &callee, receiver.clone(), callee.clone(), args);
                Ok(InstructionResult::Call(
                    Box::new(callee_frame),
                    CallKind::Construct(receiver),
                ))
            }
            _ => {
                frame.acc = self.construct_value(&callee, args)?;
                Ok(InstructionResult::Continue)
            }
        }
    }

    /// Build the activation of a closure: receiver, new.target, parameters
    fn prepare_frame(
        &self,
        closure: &Closure,
        callee: &Value,
        this: Value,
        new_target: Value,
        args: Vec<Value>,
    ) -> CallFrame {
        let function = Arc::clone(&closure.function);
        let keeps_arguments = function.arguments != ArgumentsPolicy::None;
        let mut frame = CallFrame::new(
            Arc::clone(&function),
            if keeps_arguments { args.clone() } else { Vec::new() },
            callee.clone(),
        );
        frame.env = closure.env.clone();

        let this = if !function.is_strict() && !function.is_arrow() && this.is_nullish() {
            Value::object(Arc::clone(self.context.global()))
        } else {
            this
        };
        frame.registers[RECEIVER_REGISTER.index() as usize] = this;
        frame.registers[NEW_TARGET_REGISTER.index() as usize] = new_target;

        let params = function.param_count as usize;
        let mut args = args.into_iter();
        for (i, arg) in args.by_ref().take(params).enumerate() {
            if let Some(slot) = frame.registers.get_mut(RESERVED_REGISTERS as usize + i) {
                *slot = arg;
            }
        }
        if function.flags.has_rest {
            let rest = Value::object(Arc::new(JsObject::array(args.collect())));
            if let Some(slot) = frame.registers.get_mut(RESERVED_REGISTERS as usize + params) {
                *slot = rest;
            }
        }
        frame
    }

    // ==================== Dispatch ====================

    /// Run `frame` and every bytecode activation it calls until `frame`
    /// returns or yields
    fn execute(&mut self, frame: CallFrame) -> VmResult<Completion> {
        let span = tracing::debug_span!("activation", function = frame.function.display_name());
        let _enter = span.enter();

        // Suspended bytecode callers, innermost last
        let mut callers: Vec<Activation> = Vec::new();
        let mut current = Activation {
            frame,
            kind: CallKind::Call,
        };

        loop {
            let function = Arc::clone(&current.frame.function);
            let pc = current.frame.pc;
            let step = match function.instructions.get(pc) {
                Some(instruction) => {
                    tracing::trace!(pc, op = instruction.name(), "dispatch");
                    self.execute_instruction(&function, &mut current.frame, instruction)
                }
                // Running off the end is an implicit `return undefined`
                None => Ok(InstructionResult::Return(Value::undefined())),
            };

            let err = match step {
                Ok(InstructionResult::Continue) => {
                    current.frame.pc = pc + 1;
                    continue;
                }
                Ok(InstructionResult::Jump(target)) => {
                    if target <= pc && self.context.is_interrupted() {
                        VmError::interrupted()
                    } else {
                        current.frame.pc = target;
                        continue;
                    }
                }
                Ok(InstructionResult::Call(frame, kind)) => match self.enter_activation() {
                    Ok(()) => {
                        tracing::trace!(
                            callee = frame.function.display_name(),
                            depth = self.depth,
                            "push frame"
                        );
                        let activation = Activation { frame: *frame, kind };
                        callers.push(std::mem::replace(&mut current, activation));
                        continue;
                    }
                    Err(err) => err,
                },
                Ok(InstructionResult::Return(value)) => {
                    let Some(caller) = callers.pop() else {
                        return Ok(Completion::Return(value));
                    };
                    self.depth -= 1;
                    let finished = std::mem::replace(&mut current, caller);
                    current.frame.acc = match finished.kind {
                        CallKind::Construct(receiver) if !value.is_object() => receiver,
                        _ => value,
                    };
                    current.frame.pc += 1;
                    continue;
                }
                Ok(InstructionResult::Yield) if callers.is_empty() => {
                    current.frame.pc = pc + 1;
                    let value = std::mem::take(&mut current.frame.acc);
                    return Ok(Completion::Yield(current.frame, value));
                }
                Ok(InstructionResult::Yield) => VmError::internal("Yield below a bytecode call"),
                Err(err) => err,
            };

            // Hand the error to the innermost frame with a covering handler
            let mut err = err;
            loop {
                let function = Arc::clone(&current.frame.function);
                let pc = current.frame.pc;
                match self.unwind(&function, &mut current.frame, pc, err) {
                    Ok(()) => break,
                    Err(uncaught) => match callers.pop() {
                        Some(caller) => {
                            self.depth -= 1;
                            current = caller;
                            err = uncaught;
                        }
                        None => return Err(uncaught),
                    },
                }
            }
        }
    }

    /// Route an error raised at `pc` to the innermost covering handler, or
    /// give it back for propagation
    fn unwind(
        &self,
        function: &Function,
        frame: &mut CallFrame,
        pc: usize,
        err: VmError,
    ) -> VmResult<()> {
        if !err.is_catchable() {
            return Err(err);
        }
        let Some(handler) = function.handler_for(pc).copied() else {
            let mut err = err;
            err.push_frame(StackFrame {
                function_name: function.display_name().to_string(),
                pc,
            });
            return Err(err);
        };
        if frame.env_depth < handler.env_depth {
            return Err(VmError::internal(format!(
                "handler at {} expects environment depth {}, found {}",
                handler.target, handler.env_depth, frame.env_depth
            )));
        }
        while frame.env_depth > handler.env_depth {
            frame.env = frame.env.as_ref().and_then(|env| env.parent().cloned());
            frame.env_depth -= 1;
        }
        tracing::debug!(pc, target = handler.target, "exception caught");
        frame.acc = error_value(err);
        frame.pc = handler.target as usize;
        Ok(())
    }

    fn execute_instruction(
        &mut self,
        function: &Function,
        frame: &mut CallFrame,
        instruction: &Instruction,
    ) -> VmResult<InstructionResult> {
        match instruction {
            // ==================== Constants ====================
            Instruction::LoadUndefined => frame.acc = Value::undefined(),
            Instruction::LoadNull => frame.acc = Value::null(),
            Instruction::LoadTrue => frame.acc = Value::boolean(true),
            Instruction::LoadFalse => frame.acc = Value::boolean(false),
            Instruction::LoadHole => frame.acc = Value::hole(),
            Instruction::LoadInt { value } => frame.acc = Value::int32(*value),
            Instruction::LoadConst { idx } => {
                frame.acc = self.load_constant(function, *idx, frame.env.clone())?;
            }

            // ==================== Registers ====================
            Instruction::Ldar { src } => frame.acc = frame.register(*src)?,
            Instruction::Star { dst } => {
                let value = frame.acc.clone();
                frame.set_register(*dst, value)?;
            }
            Instruction::Mov { dst, src } => {
                let value = frame.register(*src)?;
                frame.set_register(*dst, value)?;
            }

            // ==================== Properties ====================
            Instruction::GetNamed { obj, name, slot } => {
                let target = frame.register(*obj)?;
                let key = PropertyKey::from_shared(constant_string(function, *name)?);
                frame.acc = self.get_property_cached(function, &target, &key, *slot)?;
            }
            Instruction::SetNamed { obj, name, slot } => {
                let target = frame.register(*obj)?;
                let key = PropertyKey::from_shared(constant_string(function, *name)?);
                self.set_property_cached(function, &target, key, frame.acc.clone(), *slot)?;
            }
            Instruction::GetKeyed { obj, slot } => {
                let target = frame.register(*obj)?;
                let key = to_property_key(&frame.acc);
                frame.acc = self.get_property_cached(function, &target, &key, *slot)?;
            }
            Instruction::SetKeyed { obj, key, slot } => {
                let target = frame.register(*obj)?;
                let key = to_property_key(&frame.register(*key)?);
                self.set_property_cached(function, &target, key, frame.acc.clone(), *slot)?;
            }
            Instruction::DeleteNamed { obj, name } => {
                let target = frame.register(*obj)?;
                let key = PropertyKey::from_shared(constant_string(function, *name)?);
                frame.acc = Value::boolean(delete_property(&target, &key)?);
            }
            Instruction::DeleteKeyed { obj } => {
                let target = frame.register(*obj)?;
                let key = to_property_key(&frame.acc);
                frame.acc = Value::boolean(delete_property(&target, &key)?);
            }
            Instruction::NewObject => frame.acc = Value::object(Arc::new(JsObject::new(None))),
            Instruction::NewArray { first, count } => {
                let elements = frame.register_range(*first, *count)?;
                frame.acc = Value::object(Arc::new(JsObject::array(elements)));
            }
            Instruction::ArrayPush { array } => match frame.register(*array)?.as_object() {
                Some(array) if array.is_array() => array.array_push(frame.acc.clone()),
                _ => return Err(VmError::internal("ArrayPush target is not an array")),
            },

            // ==================== Binary operations ====================
            Instruction::Add { lhs, slot } => self.binary(function, frame, *lhs, *slot, BinaryOp::Add)?,
            Instruction::Sub { lhs, slot } => self.binary(function, frame, *lhs, *slot, BinaryOp::Sub)?,
            Instruction::Mul { lhs, slot } => self.binary(function, frame, *lhs, *slot, BinaryOp::Mul)?,
            Instruction::Div { lhs, slot } => self.binary(function, frame, *lhs, *slot, BinaryOp::Div)?,
            Instruction::Mod { lhs, slot } => self.binary(function, frame, *lhs, *slot, BinaryOp::Mod)?,
            Instruction::Exp { lhs, slot } => self.binary(function, frame, *lhs, *slot, BinaryOp::Exp)?,
            Instruction::BitAnd { lhs, slot } => {
                self.binary(function, frame, *lhs, *slot, BinaryOp::BitAnd)?
            }
            Instruction::BitOr { lhs, slot } => {
                self.binary(function, frame, *lhs, *slot, BinaryOp::BitOr)?
            }
            Instruction::BitXor { lhs, slot } => {
                self.binary(function, frame, *lhs, *slot, BinaryOp::BitXor)?
            }
            Instruction::Shl { lhs, slot } => self.binary(function, frame, *lhs, *slot, BinaryOp::Shl)?,
            Instruction::Shr { lhs, slot } => self.binary(function, frame, *lhs, *slot, BinaryOp::Shr)?,
            Instruction::Ushr { lhs, slot } => {
                self.binary(function, frame, *lhs, *slot, BinaryOp::Ushr)?
            }

            // ==================== Comparison ====================
            Instruction::Eq { lhs, slot } => {
                let lhs = self.lhs_operand(function, frame, *lhs, *slot)?;
                frame.acc = Value::boolean(operations::loosely_equal(&lhs, &frame.acc));
            }
            Instruction::NotEq { lhs, slot } => {
                let lhs = self.lhs_operand(function, frame, *lhs, *slot)?;
                frame.acc = Value::boolean(!operations::loosely_equal(&lhs, &frame.acc));
            }
            Instruction::StrictEq { lhs, slot } => {
                let lhs = self.lhs_operand(function, frame, *lhs, *slot)?;
                frame.acc = Value::boolean(operations::strictly_equal(&lhs, &frame.acc));
            }
            Instruction::StrictNotEq { lhs, slot } => {
                let lhs = self.lhs_operand(function, frame, *lhs, *slot)?;
                frame.acc = Value::boolean(!operations::strictly_equal(&lhs, &frame.acc));
            }
            Instruction::Lt { lhs, slot } => {
                let lhs = self.lhs_operand(function, frame, *lhs, *slot)?;
                let ordering = operations::compare(&lhs, &frame.acc)?;
                frame.acc = Value::boolean(ordering == Some(Ordering::Less));
            }
            Instruction::Le { lhs, slot } => {
                let lhs = self.lhs_operand(function, frame, *lhs, *slot)?;
                let ordering = operations::compare(&lhs, &frame.acc)?;
                frame.acc = Value::boolean(matches!(ordering, Some(Ordering::Less | Ordering::Equal)));
            }
            Instruction::Gt { lhs, slot } => {
                let lhs = self.lhs_operand(function, frame, *lhs, *slot)?;
                let ordering = operations::compare(&lhs, &frame.acc)?;
                frame.acc = Value::boolean(ordering == Some(Ordering::Greater));
            }
            Instruction::Ge { lhs, slot } => {
                let lhs = self.lhs_operand(function, frame, *lhs, *slot)?;
                let ordering = operations::compare(&lhs, &frame.acc)?;
                frame.acc =
                    Value::boolean(matches!(ordering, Some(Ordering::Greater | Ordering::Equal)));
            }
            Instruction::InstanceOf { lhs } => {
                let value = frame.register(*lhs)?;
                frame.acc = Value::boolean(self.instance_of(&value, &frame.acc)?);
            }
            Instruction::In { lhs } => {
                let key = to_property_key(&frame.register(*lhs)?);
                let found = match frame.acc.property_holder() {
                    Some(holder) => holder.has(&key),
                    None => {
                        return Err(VmError::type_error(format!(
                            "Cannot use 'in' operator to search for '{}' in {}",
                            key,
                            describe(&frame.acc)
                        )));
                    }
                };
                frame.acc = Value::boolean(found);
            }

            // ==================== Unary ====================
            Instruction::Negate { slot } => self.unary(function, frame, *slot, UnaryOp::Negate)?,
            Instruction::BitNot { slot } => self.unary(function, frame, *slot, UnaryOp::BitNot)?,
            Instruction::Inc { slot } => self.unary(function, frame, *slot, UnaryOp::Inc)?,
            Instruction::Dec { slot } => self.unary(function, frame, *slot, UnaryOp::Dec)?,
            Instruction::ToNumeric { slot } => {
                self.record_operation(function, *slot, frame.acc.type_summary());
                frame.acc = operations::numeric_value(&frame.acc)?;
            }
            Instruction::Not => frame.acc = Value::boolean(!frame.acc.to_boolean()),
            Instruction::TypeOf => frame.acc = Value::string(frame.acc.type_of()),
            Instruction::TestNullish => frame.acc = Value::boolean(frame.acc.is_nullish()),
            Instruction::TestUndefined => frame.acc = Value::boolean(frame.acc.is_undefined()),

            // ==================== Environment cells ====================
            Instruction::PushEnv { size } => {
                let env = self
                    .context
                    .allocate_environment(*size as usize, frame.env.clone());
                frame.push_environment(env)?;
            }
            Instruction::PopEnv => {
                if frame.env_depth == 0 {
                    return Err(VmError::internal("PopEnv without a matching PushEnv"));
                }
                frame.env = frame.env.as_ref().and_then(|env| env.parent().cloned());
                frame.env_depth -= 1;
            }
            Instruction::LoadCell { depth, slot } => {
                let value = environment(frame, *depth)?
                    .get(*slot)
                    .ok_or_else(|| cell_out_of_range(*depth, *slot))?;
                frame.acc = value;
            }
            Instruction::StoreCell { depth, slot } => {
                let value = frame.acc.clone();
                if !environment(frame, *depth)?.set(*slot, value) {
                    return Err(cell_out_of_range(*depth, *slot));
                }
            }
            Instruction::ThrowIfHole { name } => {
                if frame.acc.is_hole() {
                    return Err(uninitialized(&constant_string(function, *name)?));
                }
            }
            Instruction::ThrowConstAssignment { .. } => {
                return Err(VmError::type_error("Assignment to constant variable."));
            }

            // ==================== Globals ====================
            Instruction::LoadGlobal { name, slot } => {
                let name = constant_string(function, *name)?;
                frame.acc = self.load_global(function, &name, *slot)?;
            }
            Instruction::StoreGlobal { name, slot } => {
                let name = constant_string(function, *name)?;
                self.store_global(function, &name, frame.acc.clone(), *slot)?;
            }
            Instruction::TypeOfGlobal { name } => {
                let name = constant_string(function, *name)?;
                let value = match self.context.lexical(&name) {
                    Some(binding) if binding.value.is_hole() => return Err(uninitialized(&name)),
                    Some(binding) => binding.value.clone(),
                    None => self
                        .context
                        .global()
                        .get(&PropertyKey::from_shared(name))
                        .unwrap_or_default(),
                };
                frame.acc = Value::string(value.type_of());
            }
            Instruction::DeclareGlobal { name, kind } => {
                let name = constant_string(function, *name)?;
                self.declare_global(name, *kind, frame.acc.clone())?;
            }

            // ==================== Control flow ====================
            Instruction::Jump { offset } => return jump(frame.pc, *offset),
            Instruction::JumpIfTrue { offset } => {
                if frame.acc.as_boolean() == Some(true) {
                    return jump(frame.pc, *offset);
                }
            }
            Instruction::JumpIfFalse { offset } => {
                if frame.acc.as_boolean() == Some(false) {
                    return jump(frame.pc, *offset);
                }
            }
            Instruction::JumpIfToBooleanTrue { offset } => {
                if frame.acc.to_boolean() {
                    return jump(frame.pc, *offset);
                }
            }
            Instruction::JumpIfToBooleanFalse { offset } => {
                if !frame.acc.to_boolean() {
                    return jump(frame.pc, *offset);
                }
            }
            Instruction::JumpIfNullish { offset } => {
                if frame.acc.is_nullish() {
                    return jump(frame.pc, *offset);
                }
            }
            Instruction::JumpIfNotNullish { offset } => {
                if !frame.acc.is_nullish() {
                    return jump(frame.pc, *offset);
                }
            }
            Instruction::JumpIfUndefined { offset } => {
                if frame.acc.is_undefined() {
                    return jump(frame.pc, *offset);
                }
            }

            // ==================== Calls ====================
            Instruction::Call {
                callee,
                receiver,
                first_arg,
                argc,
            } => {
                let callee = frame.register(*callee)?;
                let this = frame.register(*receiver)?;
                let args = frame.register_range(*first_arg, *argc)?;
                return self.call_from_bytecode(frame, callee, this, args);
            }
            Instruction::CallSpread {
                callee,
                receiver,
                first_arg,
                argc,
            } => {
                let callee = frame.register(*callee)?;
                let this = frame.register(*receiver)?;
                let args = self.spread_arguments(frame, *first_arg, *argc)?;
                return self.call_from_bytecode(frame, callee, this, args);
            }
            Instruction::CallWithArgumentArray {
                callee,
                receiver,
                arguments,
            } => {
                let callee = frame.register(*callee)?;
                let this = frame.register(*receiver)?;
                let args = argument_array(&frame.register(*arguments)?)?;
                return self.call_from_bytecode(frame, callee, this, args);
            }
            Instruction::Construct {
                callee,
                first_arg,
                argc,
            } => {
                let callee = frame.register(*callee)?;
                let args = frame.register_range(*first_arg, *argc)?;
                return self.construct_from_bytecode(frame, callee, args);
            }
            Instruction::ConstructSpread {
                callee,
                first_arg,
                argc,
            } => {
                let callee = frame.register(*callee)?;
                let args = self.spread_arguments(frame, *first_arg, *argc)?;
                return self.construct_from_bytecode(frame, callee, args);
            }
            Instruction::ConstructWithArgumentArray { callee, arguments } => {
                let callee = frame.register(*callee)?;
                let args = argument_array(&frame.register(*arguments)?)?;
                return self.construct_from_bytecode(frame, callee, args);
            }

            // ==================== Iteration ====================
            Instruction::GetIterator { dst } => {
                let iterator = self.get_iterator(&frame.acc)?;
                frame.set_register(*dst, iterator)?;
            }
            Instruction::IteratorStep { iterator } => {
                let iterator = frame.register(*iterator)?;
                frame.acc = self.iterator_step(&iterator)?;
            }
            Instruction::IteratorComplete { result } => {
                let done = self.get_property(&frame.register(*result)?, &PropertyKey::string("done"))?;
                frame.acc = Value::boolean(done.to_boolean());
            }
            Instruction::IteratorValue { result } => {
                frame.acc = self.get_property(&frame.register(*result)?, &PropertyKey::string("value"))?;
            }

            // ==================== Functions ====================
            Instruction::NewClosure { func } => {
                let descriptor = match function.constant(*func) {
                    Some(Constant::Function(descriptor)) => Arc::clone(descriptor),
                    _ => {
                        return Err(VmError::internal(format!(
                            "constant {} is not a function",
                            func.index()
                        )));
                    }
                };
                frame.acc = self.new_closure(descriptor, frame.env.clone());
            }
            Instruction::CreateArguments => {
                let arguments = create_arguments(function, frame)?;
                frame.acc = arguments;
            }
            Instruction::Yield => {
                if !function.is_generator() {
                    return Err(VmError::internal("Yield outside a generator"));
                }
                return Ok(InstructionResult::Yield);
            }
            Instruction::Return => return Ok(InstructionResult::Return(frame.acc.clone())),
            Instruction::Throw => return Err(VmError::exception(frame.acc.clone())),

            // ==================== Misc ====================
            Instruction::Nop => {}
            Instruction::Debugger => tracing::debug!(pc = frame.pc, "debugger statement"),
        }

        Ok(InstructionResult::Continue)
    }

    // ==================== Operators ====================

    fn record_operation(&self, function: &Function, slot: FeedbackIndex, observed: TypeSummary) {
        if self.context.config().type_feedback {
            function.feedback.record_operation(slot, observed);
        }
    }

    /// Read the left operand and record both operand types
    fn lhs_operand(
        &self,
        function: &Function,
        frame: &CallFrame,
        lhs: Register,
        slot: FeedbackIndex,
    ) -> VmResult<Value> {
        let lhs = frame.register(lhs)?;
        self.record_operation(function, slot, lhs.type_summary().join(frame.acc.type_summary()));
        Ok(lhs)
    }

    fn binary(
        &self,
        function: &Function,
        frame: &mut CallFrame,
        lhs: Register,
        slot: FeedbackIndex,
        op: BinaryOp,
    ) -> VmResult<()> {
        let lhs = self.lhs_operand(function, frame, lhs, slot)?;
        frame.acc = operations::binary(op, &lhs, &frame.acc)?;
        Ok(())
    }

    fn unary(
        &self,
        function: &Function,
        frame: &mut CallFrame,
        slot: FeedbackIndex,
        op: UnaryOp,
    ) -> VmResult<()> {
        self.record_operation(function, slot, frame.acc.type_summary());
        frame.acc = operations::unary(op, &frame.acc)?;
        Ok(())
    }

    fn instance_of(&self, value: &Value, constructor: &Value) -> VmResult<bool> {
        if !constructor.is_callable() {
            return Err(VmError::type_error(
                "Right-hand side of 'instanceof' is not callable",
            ));
        }
        let prototype = self.get_property(constructor, &PropertyKey::string("prototype"))?;
        let Some(prototype) = prototype.as_object() else {
            return Err(VmError::type_error(
                "Function has non-object prototype in instanceof check",
            ));
        };
        let Some(holder) = value.property_holder() else {
            return Ok(false);
        };
        let mut current = holder.prototype();
        while let Some(object) = current {
            if Arc::ptr_eq(&object, prototype) {
                return Ok(true);
            }
            current = object.prototype();
        }
        Ok(false)
    }

    // ==================== Properties ====================

    /// Own-property read through the site's inline cache
    fn cached_get(
        &self,
        function: &Function,
        holder: &JsObject,
        key: &PropertyKey,
        slot: FeedbackIndex,
    ) -> Option<Value> {
        let config = self.context.config();
        if !config.inline_caches || !matches!(key, PropertyKey::String(_)) {
            return None;
        }
        let shape_id = holder.shape_id()?;
        if let Some(offset) = function.feedback.lookup_property(slot, shape_id) {
            if let Some(value) = holder.get_at_offset(shape_id, offset) {
                tracing::trace!(shape_id, offset, "property cache hit");
                return Some(value);
            }
        }
        let (shape_id, offset) = holder.lookup_offset(key)?;
        let state = function
            .feedback
            .record_property(slot, shape_id, offset, config.polymorphic_limit);
        tracing::trace!(shape_id, offset, ?state, "property cache update");
        holder.get_at_offset(shape_id, offset)
    }

    /// Overwrite an existing own property through the site's inline cache
    fn cached_set(
        &self,
        function: &Function,
        holder: &JsObject,
        key: &PropertyKey,
        value: &Value,
        slot: FeedbackIndex,
    ) -> bool {
        let config = self.context.config();
        if !config.inline_caches || !matches!(key, PropertyKey::String(_)) {
            return false;
        }
        let Some(shape_id) = holder.shape_id() else {
            return false;
        };
        if let Some(offset) = function.feedback.lookup_property(slot, shape_id) {
            if holder.set_at_offset(shape_id, offset, value.clone()) {
                return true;
            }
        }
        let Some((shape_id, offset)) = holder.lookup_offset(key) else {
            return false;
        };
        let state = function
            .feedback
            .record_property(slot, shape_id, offset, config.polymorphic_limit);
        tracing::trace!(shape_id, offset, ?state, "property cache update");
        holder.set_at_offset(shape_id, offset, value.clone())
    }

    fn get_property_cached(
        &self,
        function: &Function,
        target: &Value,
        key: &PropertyKey,
        slot: FeedbackIndex,
    ) -> VmResult<Value> {
        let Some(holder) = target.property_holder() else {
            return primitive_property(target, key);
        };
        if let Some(value) = self.cached_get(function, holder, key, slot) {
            return Ok(value);
        }
        Ok(holder.get(key).unwrap_or_default())
    }

    fn set_property_cached(
        &self,
        function: &Function,
        target: &Value,
        key: PropertyKey,
        value: Value,
        slot: FeedbackIndex,
    ) -> VmResult<()> {
        let Some(holder) = target.property_holder() else {
            if target.is_nullish() {
                return Err(VmError::type_error(format!(
                    "Cannot set properties of {} (setting '{}')",
                    describe(target),
                    key
                )));
            }
            if function.is_strict() {
                return Err(VmError::type_error(format!(
                    "Cannot create property '{}' on {} '{}'",
                    key,
                    target.type_of(),
                    to_string(target)
                )));
            }
            return Ok(());
        };
        if self.cached_set(function, holder, &key, &value, slot) {
            return Ok(());
        }
        if !holder.set(key, value) {
            return Err(VmError::range_error("Invalid array length"));
        }
        Ok(())
    }

    // ==================== Globals ====================

    fn load_global(&self, function: &Function, name: &Arc<str>, slot: FeedbackIndex) -> VmResult<Value> {
        if let Some(binding) = self.context.lexical(name) {
            if binding.value.is_hole() {
                return Err(uninitialized(name));
            }
            return Ok(binding.value.clone());
        }
        let global = self.context.global();
        let key = PropertyKey::from_shared(Arc::clone(name));
        if let Some(value) = self.cached_get(function, global, &key, slot) {
            return Ok(value);
        }
        global
            .get(&key)
            .ok_or_else(|| VmError::reference_error(format!("{} is not defined", name)))
    }

    fn store_global(
        &mut self,
        function: &Function,
        name: &Arc<str>,
        value: Value,
        slot: FeedbackIndex,
    ) -> VmResult<()> {
        if let Some(binding) = self.context.lexical_mut(name) {
            if binding.value.is_hole() {
                return Err(uninitialized(name));
            }
            if !binding.mutable {
                return Err(VmError::type_error("Assignment to constant variable."));
            }
            binding.value = value;
            return Ok(());
        }
        let global = Arc::clone(self.context.global());
        let key = PropertyKey::from_shared(Arc::clone(name));
        if self.cached_set(function, &global, &key, &value, slot) {
            return Ok(());
        }
        if function.is_strict() && !global.has_own(&key) {
            return Err(VmError::reference_error(format!("{} is not defined", name)));
        }
        global.set(key, value);
        Ok(())
    }

    /// Install a top-level declaration. For `let`/`const` a hole declares
    /// the binding uninitialized; any other value initializes it.
    fn declare_global(
        &mut self,
        name: Arc<str>,
        kind: GlobalDeclarationKind,
        value: Value,
    ) -> VmResult<()> {
        tracing::debug!(name = &*name, ?kind, "global declaration");
        let key = PropertyKey::from_shared(Arc::clone(&name));
        match kind {
            GlobalDeclarationKind::Var | GlobalDeclarationKind::Function => {
                if self.context.lexical(&name).is_some() {
                    return Err(redeclaration(&name));
                }
                let global = self.context.global();
                if kind == GlobalDeclarationKind::Function {
                    global.set(key, value);
                } else if !global.has_own(&key) {
                    global.set(key, Value::undefined());
                }
            }
            GlobalDeclarationKind::Let | GlobalDeclarationKind::Const => {
                match self.context.lexical_mut(&name) {
                    Some(binding) if binding.value.is_hole() && !value.is_hole() => {
                        binding.value = value;
                        return Ok(());
                    }
                    Some(_) => return Err(redeclaration(&name)),
                    None => {}
                }
                if self.context.global().has_own(&key) {
                    return Err(redeclaration(&name));
                }
                let mutable = kind == GlobalDeclarationKind::Let;
                self.context.declare_lexical(name, value, mutable);
            }
        }
        Ok(())
    }

    // ==================== Functions ====================

    fn new_closure(&self, function: Arc<Function>, env: Option<Arc<Environment>>) -> Value {
        let object = JsObject::new(None);
        object.set(
            PropertyKey::string("name"),
            Value::string(function.name.as_deref().unwrap_or("")),
        );
        object.set(
            PropertyKey::string("length"),
            Value::int32(i32::from(function.param_count)),
        );
        if function.is_constructor() {
            object.set(
                PropertyKey::string("prototype"),
                Value::object(Arc::new(JsObject::new(None))),
            );
        }
        Value::function(Arc::new(Closure {
            function,
            env,
            object: Arc::new(object),
        }))
    }

    fn load_constant(
        &self,
        function: &Function,
        idx: ConstantIndex,
        env: Option<Arc<Environment>>,
    ) -> VmResult<Value> {
        match function.constant(idx) {
            Some(Constant::Number(n)) => Ok(Value::number(*n)),
            Some(Constant::String(s)) => Ok(Value::string(Arc::clone(s))),
            Some(Constant::BigInt(text)) => Ok(Value::bigint(parse_bigint(text)?)),
            Some(Constant::Function(descriptor)) => {
                Ok(self.new_closure(Arc::clone(descriptor), env))
            }
            None => Err(VmError::internal(format!(
                "constant {} out of range",
                idx.index()
            ))),
        }
    }

    // ==================== Iteration ====================

    fn get_iterator(&self, iterable: &Value) -> VmResult<Value> {
        if let Some(array) = iterable.as_object().filter(|o| o.is_array()) {
            return Ok(list_iterator(ListSource::Array(Arc::clone(array))));
        }
        if let Some(s) = iterable.as_string() {
            let chars = s.chars().map(|c| Value::string(c.to_string())).collect();
            return Ok(list_iterator(ListSource::Values(chars)));
        }
        if iterable.is_generator() {
            return Ok(iterable.clone());
        }
        // Objects that already are iterators
        if let Some(holder) = iterable.property_holder() {
            if holder
                .get(&PropertyKey::string("next"))
                .is_some_and(|next| next.is_callable())
            {
                return Ok(iterable.clone());
            }
        }
        Err(VmError::type_error(format!(
            "{} is not iterable",
            describe(iterable)
        )))
    }

    fn iterator_step(&mut self, iterator: &Value) -> VmResult<Value> {
        if let Some(generator) = iterator.as_generator() {
            let generator = Arc::clone(generator);
            let step = self.resume(&generator, ResumeMode::Next, Value::undefined())?;
            return Ok(step.into_result_object());
        }
        let next = self.get_property(iterator, &PropertyKey::string("next"))?;
        if !next.is_callable() {
            return Err(VmError::type_error("iterator.next is not a function"));
        }
        let result = self.call_value(&next, iterator.clone(), Vec::new())?;
        if !result.is_object() {
            return Err(VmError::type_error(format!(
                "Iterator result {} is not an object",
                describe(&result)
            )));
        }
        Ok(result)
    }

    /// Drain an iterable into a list
    fn iterate_to_vec(&mut self, iterable: &Value) -> VmResult<Vec<Value>> {
        if let Some(array) = iterable.as_object().filter(|o| o.is_array()) {
            return Ok(array.elements());
        }
        let iterator = self.get_iterator(iterable)?;
        let mut values = Vec::new();
        loop {
            let result = self.iterator_step(&iterator)?;
            if self
                .get_property(&result, &PropertyKey::string("done"))?
                .to_boolean()
            {
                return Ok(values);
            }
            values.push(self.get_property(&result, &PropertyKey::string("value"))?);
        }
    }

    /// Argument list whose last register holds an iterable to spread
    fn spread_arguments(
        &mut self,
        frame: &CallFrame,
        first: Register,
        argc: u16,
    ) -> VmResult<Vec<Value>> {
        let mut args = frame.register_range(first, argc)?;
        if let Some(iterable) = args.pop() {
            let spread = self.iterate_to_vec(&iterable)?;
            args.extend(spread);
        }
        Ok(args)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

// ==================== Helpers ====================

fn jump(pc: usize, offset: JumpOffset) -> VmResult<InstructionResult> {
    offset
        .target(pc)
        .map(InstructionResult::Jump)
        .ok_or_else(|| VmError::internal(format!("jump at {} leaves the function", pc)))
}

fn constant_string(function: &Function, idx: ConstantIndex) -> VmResult<Arc<str>> {
    match function.constant(idx) {
        Some(Constant::String(s)) => Ok(Arc::clone(s)),
        _ => Err(VmError::internal(format!(
            "constant {} is not a string",
            idx.index()
        ))),
    }
}

fn environment(frame: &CallFrame, depth: u16) -> VmResult<&Arc<Environment>> {
    frame
        .env
        .as_ref()
        .and_then(|env| env.ancestor(depth))
        .ok_or_else(|| VmError::internal(format!("environment depth {} out of range", depth)))
}

fn cell_out_of_range(depth: u16, slot: u16) -> VmError {
    VmError::internal(format!("cell {} at depth {} out of range", slot, depth))
}

fn uninitialized(name: &str) -> VmError {
    VmError::reference_error(format!("Cannot access '{}' before initialization", name))
}

fn redeclaration(name: &str) -> VmError {
    VmError::syntax_error(format!("Identifier '{}' has already been declared", name))
}

/// Short description of a value for error messages
fn describe(value: &Value) -> String {
    if value.is_string() {
        format!("\"{}\"", to_string(value))
    } else if value.is_object() {
        value.type_of().to_string()
    } else {
        to_string(value).to_string()
    }
}

fn prototype_of(function_object: &JsObject) -> Option<Arc<JsObject>> {
    function_object
        .get(&PropertyKey::string("prototype"))
        .and_then(|p| p.as_object().cloned())
}

/// Script-visible value of a caught error
fn error_value(err: VmError) -> Value {
    match err {
        VmError::Exception(thrown) => thrown.value,
        other => make_error(
            other.error_name().unwrap_or("Error"),
            other.error_message().unwrap_or_default(),
        ),
    }
}

/// Plain error object with `name` and `message`
pub fn make_error(name: &str, message: &str) -> Value {
    let error = JsObject::new(None);
    error.set(PropertyKey::string("name"), Value::string(name));
    error.set(PropertyKey::string("message"), Value::string(message));
    Value::object(Arc::new(error))
}

fn primitive_property(target: &Value, key: &PropertyKey) -> VmResult<Value> {
    if target.is_nullish() {
        return Err(VmError::type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            describe(target),
            key
        )));
    }
    if let Some(s) = target.as_string() {
        match key {
            PropertyKey::String(name) if &**name == "length" => {
                return Ok(Value::number(s.encode_utf16().count() as f64));
            }
            PropertyKey::Index(i) => {
                return Ok(s
                    .encode_utf16()
                    .nth(*i as usize)
                    .map(|unit| Value::string(String::from_utf16_lossy(&[unit])))
                    .unwrap_or_default());
            }
            PropertyKey::String(_) => {}
        }
    }
    Ok(Value::undefined())
}

fn delete_property(target: &Value, key: &PropertyKey) -> VmResult<bool> {
    match target.property_holder() {
        Some(holder) => Ok(holder.delete(key)),
        None if target.is_nullish() => Err(VmError::type_error(
            "Cannot convert undefined or null to object",
        )),
        None => Ok(true),
    }
}

fn argument_array(value: &Value) -> VmResult<Vec<Value>> {
    match value.as_object() {
        Some(array) if array.is_array() => Ok(array.elements()),
        _ if value.is_nullish() => Ok(Vec::new()),
        _ => Err(VmError::type_error(
            "CreateListFromArrayLike called on non-object",
        )),
    }
}

fn create_arguments(function: &Function, frame: &mut CallFrame) -> VmResult<Value> {
    let mapped = match function.arguments {
        ArgumentsPolicy::None => {
            return Err(VmError::internal(format!(
                "{} does not observe its arguments",
                function.display_name()
            )));
        }
        ArgumentsPolicy::Mapped => true,
        ArgumentsPolicy::Unmapped => false,
    };
    let params = function.param_count as usize;
    let arguments = JsObject::new(None);
    for (i, arg) in frame.arguments.iter().enumerate() {
        // Mapped parameters start from their current register value
        let value = match frame.registers.get(RESERVED_REGISTERS as usize + i) {
            Some(current) if mapped && i < params => current.clone(),
            _ => arg.clone(),
        };
        arguments.set(PropertyKey::Index(i as u32), value);
    }
    arguments.set(
        PropertyKey::string("length"),
        Value::number(frame.arguments.len() as f64),
    );
    if !mapped {
        return Ok(Value::object(Arc::new(arguments)));
    }
    arguments.set(PropertyKey::string("callee"), frame.callee.clone());
    let arguments = Arc::new(arguments);
    frame.map_arguments(Arc::clone(&arguments));
    Ok(Value::object(arguments))
}

enum ListSource {
    /// Live view of an array
    Array(Arc<JsObject>),
    /// Fixed snapshot
    Values(Vec<Value>),
}

/// Iterator object whose `next` walks an array or a fixed list
fn list_iterator(source: ListSource) -> Value {
    let position = Mutex::new(Some(0usize));
    let next = Value::native_function("next", move |_, _, _| {
        let mut position = position.lock();
        let item = position.and_then(|i| match &source {
            ListSource::Array(array) if i < array.array_length() => Some(
                array
                    .get(&PropertyKey::Index(i as u32))
                    .unwrap_or_default(),
            ),
            ListSource::Values(values) => values.get(i).cloned(),
            ListSource::Array(_) => None,
        });
        let step = match item {
            Some(value) => {
                *position = position.map(|i| i + 1);
                GeneratorStep::Yielded(value)
            }
            None => {
                *position = None;
                GeneratorStep::Done(Value::undefined())
            }
        };
        Ok(step.into_result_object())
    });
    let iterator = JsObject::new(None);
    iterator.set(PropertyKey::string("next"), next);
    Value::object(Arc::new(iterator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_vm_bytecode::{ConstantPool, NumericRange};

    fn run(function: Function) -> VmResult<Value> {
        let mut interpreter = Interpreter::default();
        interpreter.run(&Arc::new(function), Value::undefined(), &[])
    }

    #[test]
    fn test_load_constants() {
        let mut constants = ConstantPool::new();
        let s = constants.add_string("hello");
        let func = Function::builder()
            .name("main")
            .constants(constants)
            .instruction(Instruction::LoadConst {
                idx: ConstantIndex(s),
            })
            .instruction(Instruction::Return)
            .build()
            .unwrap();

        assert_eq!(run(func).unwrap(), Value::string("hello"));
    }

    #[test]
    fn test_implicit_return_undefined() {
        let func = Function::builder()
            .instruction(Instruction::LoadInt { value: 1 })
            .build()
            .unwrap();
        assert!(run(func).unwrap().is_undefined());
    }

    #[test]
    fn test_arithmetic_records_feedback() {
        let func = Arc::new(
            Function::builder()
                .name("main")
                .instruction(Instruction::LoadInt { value: 1 })
                .instruction(Instruction::Star { dst: Register(2) })
                .instruction(Instruction::LoadInt { value: 2 })
                .instruction(Instruction::Add {
                    lhs: Register(2),
                    slot: FeedbackIndex(0),
                })
                .instruction(Instruction::Return)
                .build()
                .unwrap(),
        );

        let mut interpreter = Interpreter::default();
        let result = interpreter.run(&func, Value::undefined(), &[]).unwrap();
        assert_eq!(result, Value::int32(3));
        assert_eq!(
            func.feedback.get(FeedbackIndex(0)).unwrap().type_summary(),
            Some(TypeSummary::Numeric(NumericRange::SignedSmall))
        );
    }

    #[test]
    fn test_function_call_simple() {
        // double(x): return x + x
        let double = Function::builder()
            .name("double")
            .param_count(1)
            .instruction(Instruction::Ldar { src: Register(2) })
            .instruction(Instruction::Add {
                lhs: Register(2),
                slot: FeedbackIndex(0),
            })
            .instruction(Instruction::Return)
            .build()
            .unwrap();

        let mut constants = ConstantPool::new();
        let double = constants.add_function(double);
        let main = Function::builder()
            .name("main")
            .constants(constants)
            .instruction(Instruction::NewClosure {
                func: ConstantIndex(double),
            })
            .instruction(Instruction::Star { dst: Register(2) })
            .instruction(Instruction::LoadInt { value: 5 })
            .instruction(Instruction::Star { dst: Register(4) })
            .instruction(Instruction::LoadUndefined)
            .instruction(Instruction::Star { dst: Register(3) })
            .instruction(Instruction::Call {
                callee: Register(2),
                receiver: Register(3),
                first_arg: Register(4),
                argc: 1,
            })
            .instruction(Instruction::Return)
            .build()
            .unwrap();

        assert_eq!(run(main).unwrap(), Value::int32(10));
    }

    #[test]
    fn test_calling_non_function_is_type_error() {
        let func = Function::builder()
            .instruction(Instruction::LoadInt { value: 1 })
            .instruction(Instruction::Star { dst: Register(2) })
            .instruction(Instruction::Call {
                callee: Register(2),
                receiver: Register(2),
                first_arg: Register(3),
                argc: 0,
            })
            .build()
            .unwrap();
        assert!(matches!(run(func), Err(VmError::TypeError(m)) if m == "1 is not a function"));
    }

    #[test]
    fn test_uncaught_throw_records_stack() {
        let func = Function::builder()
            .name("thrower")
            .instruction(Instruction::LoadInt { value: 7 })
            .instruction(Instruction::Throw)
            .build()
            .unwrap();
        match run(func) {
            Err(VmError::Exception(thrown)) => {
                assert_eq!(thrown.value, Value::int32(7));
                assert_eq!(thrown.stack[0].function_name, "thrower");
                assert_eq!(thrown.stack[0].pc, 1);
            }
            other => panic!("expected exception, got {:?}", other),
        }
    }
}
