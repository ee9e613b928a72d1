//! Interpreter integration tests
//!
//! Each test assembles function descriptors by hand and runs them through
//! the public `Interpreter` API.

use std::sync::Arc;

use otter_vm_bytecode::{
    ArgumentsPolicy, Constant, ConstantIndex, ConstantPool, ExceptionHandler, FeedbackIndex,
    Function, GlobalDeclarationKind, Instruction, JumpOffset, NumericRange, PropertyCache,
    Register, TypeSummary,
};
use otter_vm_core::convert::FromValue;
use otter_vm_core::{Interpreter, JsObject, PropertyKey, RuntimeConfig, Value, VmError};

// ==================== Helpers ====================

fn pool(strings: &[&str]) -> ConstantPool {
    let mut constants = ConstantPool::new();
    for s in strings {
        constants.add_string(s);
    }
    constants
}

fn c(index: u32) -> ConstantIndex {
    ConstantIndex(index)
}

fn r(index: u16) -> Register {
    Register(index)
}

fn slot(index: u16) -> FeedbackIndex {
    FeedbackIndex(index)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn run(interpreter: &mut Interpreter, function: Function) -> Result<Value, VmError> {
    init_tracing();
    interpreter.run(&Arc::new(function), Value::undefined(), &[])
}

/// Closure value over `function`, created by a one-line script
fn closure_of(interpreter: &mut Interpreter, function: Function) -> Value {
    let mut constants = ConstantPool::new();
    let idx = constants.add(Constant::Function(Arc::new(function)));
    let script = Function::builder()
        .name("wrapper")
        .constants(constants)
        .instruction(Instruction::NewClosure { func: c(idx) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();
    run(interpreter, script).unwrap()
}

fn get(value: &Value, key: &str) -> Value {
    value
        .property_holder()
        .and_then(|o| o.get(&PropertyKey::string(key)))
        .unwrap_or_default()
}

fn object_with(keys: &[&str]) -> Value {
    let object = JsObject::new(None);
    for (i, key) in keys.iter().enumerate() {
        object.set(PropertyKey::string(key), Value::int32(i as i32));
    }
    Value::object(Arc::new(object))
}

// ==================== Basics ====================

#[test]
fn test_add_records_numeric_feedback() {
    let func = Arc::new(
        Function::builder()
            .name("main")
            .instruction(Instruction::LoadInt { value: 1 })
            .instruction(Instruction::Star { dst: r(2) })
            .instruction(Instruction::LoadInt { value: 2 })
            .instruction(Instruction::Add {
                lhs: r(2),
                slot: slot(0),
            })
            .instruction(Instruction::Return)
            .build()
            .unwrap(),
    );

    let mut interpreter = Interpreter::default();
    let result = interpreter.run(&func, Value::undefined(), &[]).unwrap();
    assert_eq!(result, Value::int32(3));
    assert_eq!(
        func.feedback.get(slot(0)).unwrap().type_summary(),
        Some(TypeSummary::Numeric(NumericRange::SignedSmall))
    );
}

#[test]
fn test_feedback_widens_with_strings() {
    let mut constants = pool(&["a"]);
    let half = constants.add_number(0.5);
    let func = Arc::new(
        Function::builder()
            .param_count(1)
            .constants(constants)
            .instruction(Instruction::LoadConst { idx: c(half) })
            .instruction(Instruction::Add {
                lhs: r(2),
                slot: slot(0),
            })
            .instruction(Instruction::Return)
            .build()
            .unwrap(),
    );

    let mut interpreter = Interpreter::default();
    let result = interpreter
        .run(&func, Value::undefined(), &[Value::int32(1)])
        .unwrap();
    assert_eq!(result, Value::number(1.5));
    assert_eq!(
        func.feedback.get(slot(0)).unwrap().type_summary(),
        Some(TypeSummary::Numeric(NumericRange::Number))
    );

    let result = interpreter
        .run(&func, Value::undefined(), &[Value::string("a")])
        .unwrap();
    assert_eq!(result, Value::string("a0.5"));
    assert_eq!(
        func.feedback.get(slot(0)).unwrap().type_summary(),
        Some(TypeSummary::Any)
    );
}

#[test]
fn test_type_feedback_can_be_disabled() {
    let func = Arc::new(
        Function::builder()
            .instruction(Instruction::LoadInt { value: 1 })
            .instruction(Instruction::Negate { slot: slot(0) })
            .instruction(Instruction::Return)
            .build()
            .unwrap(),
    );
    let mut interpreter = Interpreter::new(RuntimeConfig::default().with_type_feedback(false));
    assert_eq!(
        interpreter.run(&func, Value::undefined(), &[]).unwrap(),
        Value::int32(-1)
    );
    assert_eq!(
        func.feedback.get(slot(0)).unwrap().type_summary(),
        Some(TypeSummary::None)
    );
}

#[test]
fn test_loop_with_backward_jump() {
    // sum = 0; for (i = 1; i <= 10; i++) sum += i; return sum
    let func = Function::builder()
        .name("sum")
        .instruction(Instruction::LoadInt { value: 0 })
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::LoadInt { value: 10 })
        .instruction(Instruction::Le {
            lhs: r(2),
            slot: slot(0),
        })
        .instruction(Instruction::JumpIfFalse {
            offset: JumpOffset(8),
        })
        .instruction(Instruction::Ldar { src: r(2) })
        .instruction(Instruction::Add {
            lhs: r(3),
            slot: slot(1),
        })
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::Ldar { src: r(2) })
        .instruction(Instruction::Inc { slot: slot(2) })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::Jump {
            offset: JumpOffset(-9),
        })
        .instruction(Instruction::Ldar { src: r(3) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert_eq!(run(&mut interpreter, func).unwrap(), Value::int32(55));
}

#[test]
fn test_interrupt_stops_loop() {
    let constants = pool(&["stop"]);
    let func = Function::builder()
        .constants(constants)
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::Call {
            callee: r(2),
            receiver: r(2),
            first_arg: r(3),
            argc: 0,
        })
        .instruction(Instruction::Jump {
            offset: JumpOffset(0),
        })
        .handler(ExceptionHandler {
            start: 0,
            end: 4,
            target: 3,
            env_depth: 0,
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    interpreter.context().set_global(
        "stop",
        Value::native_function("stop", |interp, _, _| {
            interp.context().interrupt();
            Ok(Value::undefined())
        }),
    );
    assert!(matches!(
        run(&mut interpreter, func),
        Err(VmError::Interrupted)
    ));
}

// ==================== Exceptions ====================

#[test]
fn test_catch_restores_environment_depth() {
    let func = Function::builder()
        .name("main")
        .instruction(Instruction::PushEnv { size: 1 })
        .instruction(Instruction::PushEnv { size: 1 })
        .instruction(Instruction::LoadInt { value: 5 })
        .instruction(Instruction::Throw)
        .instruction(Instruction::Return)
        // handler: one block must remain
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::PopEnv)
        .instruction(Instruction::Ldar { src: r(2) })
        .instruction(Instruction::Return)
        .handler(ExceptionHandler {
            start: 2,
            end: 4,
            target: 5,
            env_depth: 1,
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert_eq!(run(&mut interpreter, func).unwrap(), Value::int32(5));
}

#[test]
fn test_catch_restores_environment_depth_exactly() {
    // A second PopEnv after the handler would underflow
    let func = Function::builder()
        .instruction(Instruction::PushEnv { size: 1 })
        .instruction(Instruction::PushEnv { size: 1 })
        .instruction(Instruction::LoadInt { value: 5 })
        .instruction(Instruction::Throw)
        .instruction(Instruction::PopEnv)
        .instruction(Instruction::PopEnv)
        .handler(ExceptionHandler {
            start: 2,
            end: 4,
            target: 4,
            env_depth: 1,
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert!(matches!(
        run(&mut interpreter, func),
        Err(VmError::InternalError(_))
    ));
}

#[test]
fn test_language_error_caught_as_object() {
    let constants = pool(&["name", "message"]);
    let func = Function::builder()
        .constants(constants)
        .instruction(Instruction::LoadUndefined)
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::Call {
            callee: r(2),
            receiver: r(2),
            first_arg: r(3),
            argc: 0,
        })
        .instruction(Instruction::Return)
        .instruction(Instruction::Return)
        .handler(ExceptionHandler {
            start: 0,
            end: 4,
            target: 4,
            env_depth: 0,
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let error = run(&mut interpreter, func).unwrap();
    assert_eq!(get(&error, "name"), Value::string("TypeError"));
    assert_eq!(get(&error, "message"), Value::string("undefined is not a function"));
}

#[test]
fn test_innermost_handler_wins() {
    let func = Function::builder()
        .instruction(Instruction::Nop)
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Throw)
        .instruction(Instruction::Nop)
        .instruction(Instruction::LoadInt { value: 10 })
        .instruction(Instruction::Return)
        .instruction(Instruction::Nop)
        .instruction(Instruction::LoadInt { value: 20 })
        .instruction(Instruction::Return)
        .handler(ExceptionHandler {
            start: 0,
            end: 6,
            target: 7,
            env_depth: 0,
        })
        .handler(ExceptionHandler {
            start: 1,
            end: 3,
            target: 4,
            env_depth: 0,
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert_eq!(run(&mut interpreter, func).unwrap(), Value::int32(10));
}

#[test]
fn test_internal_error_is_not_catchable() {
    let func = Function::builder()
        .instruction(Instruction::PopEnv)
        .instruction(Instruction::Return)
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Return)
        .handler(ExceptionHandler {
            start: 0,
            end: 2,
            target: 2,
            env_depth: 0,
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert!(matches!(
        run(&mut interpreter, func),
        Err(VmError::InternalError(_))
    ));
}

#[test]
fn test_exception_crosses_calls() {
    let thrower = Function::builder()
        .name("thrower")
        .instruction(Instruction::LoadInt { value: 9 })
        .instruction(Instruction::Throw)
        .build()
        .unwrap();
    let mut constants = ConstantPool::new();
    let thrower = constants.add_function(thrower);

    let call_thrower = |with_handler: bool| {
        let mut builder = Function::builder()
            .name("main")
            .constants(constants.clone())
            .instruction(Instruction::NewClosure { func: c(thrower) })
            .instruction(Instruction::Star { dst: r(2) })
            .instruction(Instruction::Call {
                callee: r(2),
                receiver: r(2),
                first_arg: r(3),
                argc: 0,
            })
            .instruction(Instruction::Return)
            .instruction(Instruction::Inc { slot: slot(0) })
            .instruction(Instruction::Return);
        if with_handler {
            builder = builder.handler(ExceptionHandler {
                start: 2,
                end: 3,
                target: 4,
                env_depth: 0,
            });
        }
        builder.build().unwrap()
    };

    let mut interpreter = Interpreter::default();
    assert_eq!(
        run(&mut interpreter, call_thrower(true)).unwrap(),
        Value::int32(10)
    );

    match run(&mut interpreter, call_thrower(false)) {
        Err(VmError::Exception(thrown)) => {
            assert_eq!(thrown.value, Value::int32(9));
            let names: Vec<_> = thrown.stack.iter().map(|f| f.function_name.as_str()).collect();
            assert_eq!(names, ["thrower", "main"]);
            assert_eq!(thrown.stack[1].pc, 2);
        }
        other => panic!("expected exception, got {:?}", other),
    }
}

#[test]
fn test_stack_overflow_with_small_depth() {
    let constants = pool(&["f"]);
    let recurse = Function::builder()
        .name("f")
        .constants(constants.clone())
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::Call {
            callee: r(2),
            receiver: r(2),
            first_arg: r(3),
            argc: 0,
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::new(RuntimeConfig::default().with_max_stack_depth(40));
    let f = closure_of(&mut interpreter, recurse);
    interpreter.context().set_global("f", f.clone());

    assert!(matches!(
        interpreter.call(&f, Value::undefined(), &[]),
        Err(VmError::StackOverflow)
    ));
    assert_eq!(interpreter.depth(), 0);

    // Script-level handler sees a RangeError
    let mut constants = constants;
    constants.add_string("message");
    let script = Function::builder()
        .constants(constants)
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::Call {
            callee: r(2),
            receiver: r(2),
            first_arg: r(3),
            argc: 0,
        })
        .instruction(Instruction::Return)
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::GetNamed {
            obj: r(3),
            name: c(1),
            slot: slot(1),
        })
        .instruction(Instruction::Return)
        .handler(ExceptionHandler {
            start: 2,
            end: 3,
            target: 4,
            env_depth: 0,
        })
        .build()
        .unwrap();
    assert_eq!(
        run(&mut interpreter, script).unwrap(),
        Value::string("Maximum call stack size exceeded")
    );
}

/// `function f(n) { return n ? f(n - 1) : 42 }`, stored as global `f`
fn countdown(interpreter: &mut Interpreter) -> Value {
    let countdown = Function::builder()
        .name("f")
        .param_count(1)
        .constants(pool(&["f"]))
        .instruction(Instruction::Ldar { src: r(2) })
        .instruction(Instruction::JumpIfToBooleanFalse {
            offset: JumpOffset(7),
        })
        .instruction(Instruction::Dec { slot: slot(0) })
        .instruction(Instruction::Star { dst: r(4) })
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(1),
        })
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::Call {
            callee: r(3),
            receiver: r(3),
            first_arg: r(4),
            argc: 1,
        })
        .instruction(Instruction::Return)
        .instruction(Instruction::LoadInt { value: 42 })
        .instruction(Instruction::Return)
        .build()
        .unwrap();
    let f = closure_of(interpreter, countdown);
    interpreter.context().set_global("f", f.clone());
    f
}

#[test]
fn test_deep_recursion_runs_on_frame_stack() {
    let mut interpreter = Interpreter::new(RuntimeConfig::default().with_max_stack_depth(20_000));
    let f = countdown(&mut interpreter);
    assert_eq!(
        interpreter
            .call(&f, Value::undefined(), &[Value::int32(10_000)])
            .unwrap(),
        Value::int32(42)
    );
    assert_eq!(interpreter.depth(), 0);
}

#[test]
fn test_unbounded_recursion_with_default_config() {
    let mut interpreter = Interpreter::default();
    let f = countdown(&mut interpreter);
    assert!(matches!(
        interpreter.call(&f, Value::undefined(), &[Value::number(f64::INFINITY)]),
        Err(VmError::StackOverflow)
    ));
    assert_eq!(interpreter.depth(), 0);

    // The interpreter stays usable afterwards
    assert_eq!(
        interpreter
            .call(&f, Value::undefined(), &[Value::int32(3)])
            .unwrap(),
        Value::int32(42)
    );
}

#[test]
fn test_host_reentry_is_bounded() {
    let mut interpreter = Interpreter::default();
    interpreter.context().set_global(
        "g",
        Value::native_function("g", |interp, _, _| {
            let g = interp.context().get_global("g").unwrap_or_default();
            interp.call(&g, Value::undefined(), &[])
        }),
    );
    let g = interpreter.context().get_global("g").unwrap();
    assert!(matches!(
        interpreter.call(&g, Value::undefined(), &[]),
        Err(VmError::StackOverflow)
    ));
    assert_eq!(interpreter.depth(), 0);
}

#[test]
fn test_construct_from_bytecode_returns_receiver() {
    // function Box(v) { this.v = v; return 1 }
    let boxed = Function::builder()
        .name("Box")
        .param_count(1)
        .is_constructor(true)
        .constants(pool(&["v"]))
        .instruction(Instruction::Ldar { src: r(2) })
        .instruction(Instruction::SetNamed {
            obj: r(0),
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Return)
        .build()
        .unwrap();
    let make = Function::builder()
        .param_count(1)
        .instruction(Instruction::LoadInt { value: 8 })
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::Construct {
            callee: r(2),
            first_arg: r(3),
            argc: 1,
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let boxed = closure_of(&mut interpreter, boxed);
    let make = closure_of(&mut interpreter, make);
    let instance = interpreter.call(&make, Value::undefined(), &[boxed]).unwrap();
    assert_eq!(get(&instance, "v"), Value::int32(8));
}

// ==================== Globals ====================

#[test]
fn test_global_let_temporal_dead_zone() {
    let constants = pool(&["x"]);
    let func = Function::builder()
        .constants(constants)
        .instruction(Instruction::LoadHole)
        .instruction(Instruction::DeclareGlobal {
            name: c(0),
            kind: GlobalDeclarationKind::Let,
        })
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    match run(&mut interpreter, func) {
        Err(VmError::ReferenceError(message)) => {
            assert_eq!(message, "Cannot access 'x' before initialization")
        }
        other => panic!("expected ReferenceError, got {:?}", other),
    }
}

#[test]
fn test_global_const_assignment() {
    let constants = pool(&["c"]);
    let func = Function::builder()
        .constants(constants)
        .instruction(Instruction::LoadHole)
        .instruction(Instruction::DeclareGlobal {
            name: c(0),
            kind: GlobalDeclarationKind::Const,
        })
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::DeclareGlobal {
            name: c(0),
            kind: GlobalDeclarationKind::Const,
        })
        .instruction(Instruction::LoadInt { value: 2 })
        .instruction(Instruction::StoreGlobal {
            name: c(0),
            slot: slot(0),
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert!(matches!(
        run(&mut interpreter, func),
        Err(VmError::TypeError(m)) if m == "Assignment to constant variable."
    ));
    assert_eq!(interpreter.context().get_global("c"), Some(Value::int32(1)));
}

#[test]
fn test_global_lexical_conflicts_with_var() {
    let constants = pool(&["v"]);
    let func = Function::builder()
        .constants(constants)
        .instruction(Instruction::LoadHole)
        .instruction(Instruction::DeclareGlobal {
            name: c(0),
            kind: GlobalDeclarationKind::Let,
        })
        .instruction(Instruction::LoadUndefined)
        .instruction(Instruction::DeclareGlobal {
            name: c(0),
            kind: GlobalDeclarationKind::Var,
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert!(matches!(
        run(&mut interpreter, func),
        Err(VmError::SyntaxError(m)) if m == "Identifier 'v' has already been declared"
    ));
}

#[test]
fn test_lexical_conflicts_across_scripts() {
    let declare_let = || {
        Function::builder()
            .constants(pool(&["shared"]))
            .instruction(Instruction::LoadHole)
            .instruction(Instruction::DeclareGlobal {
                name: c(0),
                kind: GlobalDeclarationKind::Let,
            })
            .build()
            .unwrap()
    };

    let mut interpreter = Interpreter::default();
    run(&mut interpreter, declare_let()).unwrap();
    assert!(matches!(
        run(&mut interpreter, declare_let()),
        Err(VmError::SyntaxError(_))
    ));

    // A global object property blocks a later `let`
    interpreter.context().set_global("prop", Value::int32(1));
    let func = Function::builder()
        .constants(pool(&["prop"]))
        .instruction(Instruction::LoadHole)
        .instruction(Instruction::DeclareGlobal {
            name: c(0),
            kind: GlobalDeclarationKind::Let,
        })
        .build()
        .unwrap();
    assert!(matches!(
        run(&mut interpreter, func),
        Err(VmError::SyntaxError(_))
    ));
}

#[test]
fn test_undeclared_global_access() {
    let load = Function::builder()
        .constants(pool(&["missing"]))
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(0),
        })
        .build()
        .unwrap();
    let typeof_missing = Function::builder()
        .constants(pool(&["missing"]))
        .instruction(Instruction::TypeOfGlobal { name: c(0) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert!(matches!(
        run(&mut interpreter, load),
        Err(VmError::ReferenceError(m)) if m == "missing is not defined"
    ));
    assert_eq!(
        run(&mut interpreter, typeof_missing).unwrap(),
        Value::string("undefined")
    );
}

#[test]
fn test_store_to_undeclared_global() {
    let store = |strict: bool| {
        Function::builder()
            .is_strict(strict)
            .constants(pool(&["fresh"]))
            .instruction(Instruction::LoadInt { value: 3 })
            .instruction(Instruction::StoreGlobal {
                name: c(0),
                slot: slot(0),
            })
            .build()
            .unwrap()
    };

    let mut interpreter = Interpreter::default();
    assert!(matches!(
        run(&mut interpreter, store(true)),
        Err(VmError::ReferenceError(_))
    ));
    run(&mut interpreter, store(false)).unwrap();
    assert_eq!(interpreter.context().get_global("fresh"), Some(Value::int32(3)));
}

#[test]
fn test_var_and_function_declarations() {
    let mut constants = pool(&["v", "f"]);
    let body = Function::builder().name("f").build().unwrap();
    let body = constants.add_function(body);
    let func = Function::builder()
        .constants(constants)
        .instruction(Instruction::LoadUndefined)
        .instruction(Instruction::DeclareGlobal {
            name: c(0),
            kind: GlobalDeclarationKind::Var,
        })
        .instruction(Instruction::NewClosure { func: c(body) })
        .instruction(Instruction::DeclareGlobal {
            name: c(1),
            kind: GlobalDeclarationKind::Function,
        })
        .instruction(Instruction::TypeOfGlobal { name: c(1) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    interpreter.context().set_global("v", Value::int32(8));
    assert_eq!(run(&mut interpreter, func).unwrap(), Value::string("function"));
    // Redeclaring a var keeps its value
    assert_eq!(interpreter.context().get_global("v"), Some(Value::int32(8)));
}

// ==================== Environments ====================

#[test]
fn test_closures_share_cells() {
    // function makeCounter() { let n = 0; return () => ++n; }
    let increment = Function::builder()
        .name("increment")
        .is_arrow(true)
        .instruction(Instruction::LoadCell { depth: 0, slot: 0 })
        .instruction(Instruction::Inc { slot: slot(0) })
        .instruction(Instruction::StoreCell { depth: 0, slot: 0 })
        .instruction(Instruction::Return)
        .build()
        .unwrap();
    let mut constants = ConstantPool::new();
    let increment = constants.add_function(increment);
    let make_counter = Function::builder()
        .name("makeCounter")
        .constants(constants)
        .instruction(Instruction::PushEnv { size: 1 })
        .instruction(Instruction::LoadInt { value: 0 })
        .instruction(Instruction::StoreCell { depth: 0, slot: 0 })
        .instruction(Instruction::NewClosure {
            func: c(increment),
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let make_counter = closure_of(&mut interpreter, make_counter);
    let first = interpreter.call(&make_counter, Value::undefined(), &[]).unwrap();
    let second = interpreter.call(&make_counter, Value::undefined(), &[]).unwrap();

    for expected in 1..=3 {
        assert_eq!(
            interpreter.call(&first, Value::undefined(), &[]).unwrap(),
            Value::int32(expected)
        );
    }
    assert_eq!(
        interpreter.call(&second, Value::undefined(), &[]).unwrap(),
        Value::int32(1)
    );
}

#[test]
fn test_cell_read_before_initialization() {
    let func = Function::builder()
        .constants(pool(&["x"]))
        .instruction(Instruction::PushEnv { size: 1 })
        .instruction(Instruction::LoadCell { depth: 0, slot: 0 })
        .instruction(Instruction::ThrowIfHole { name: c(0) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert!(matches!(
        run(&mut interpreter, func),
        Err(VmError::ReferenceError(m)) if m == "Cannot access 'x' before initialization"
    ));
}

#[test]
fn test_cell_out_of_range_is_internal() {
    let func = Function::builder()
        .instruction(Instruction::PushEnv { size: 1 })
        .instruction(Instruction::LoadCell { depth: 1, slot: 0 })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    assert!(matches!(
        run(&mut interpreter, func),
        Err(VmError::InternalError(_))
    ));
}

// ==================== Calls ====================

#[test]
fn test_arguments_objects() {
    let arguments_fn = |policy: ArgumentsPolicy| {
        Function::builder()
            .name("args")
            .param_count(1)
            .arguments(policy)
            .instruction(Instruction::CreateArguments)
            .instruction(Instruction::Return)
            .build()
            .unwrap()
    };
    let args = [Value::int32(1), Value::int32(2), Value::int32(3)];

    let mut interpreter = Interpreter::default();
    let mapped = closure_of(&mut interpreter, arguments_fn(ArgumentsPolicy::Mapped));
    let result = interpreter.call(&mapped, Value::undefined(), &args).unwrap();
    let object = result.as_object().unwrap();
    assert!(!object.is_array());
    assert_eq!(get(&result, "length"), Value::int32(3));
    assert_eq!(object.get(&PropertyKey::Index(2)), Some(Value::int32(3)));
    assert!(get(&result, "callee").same_identity(&mapped));

    let unmapped = closure_of(&mut interpreter, arguments_fn(ArgumentsPolicy::Unmapped));
    let result = interpreter.call(&unmapped, Value::undefined(), &args).unwrap();
    assert_eq!(get(&result, "length"), Value::int32(3));
    assert!(!result.as_object().unwrap().has_own(&PropertyKey::string("callee")));

    let none = closure_of(&mut interpreter, arguments_fn(ArgumentsPolicy::None));
    assert!(matches!(
        interpreter.call(&none, Value::undefined(), &args),
        Err(VmError::InternalError(_))
    ));
}

/// `function (a) { var args = arguments; a = 5; return args[0] }`
fn parameter_write_seen_by_arguments(policy: ArgumentsPolicy, strict: bool) -> Function {
    Function::builder()
        .param_count(1)
        .is_strict(strict)
        .arguments(policy)
        .instruction(Instruction::CreateArguments)
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::LoadInt { value: 5 })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::LoadInt { value: 0 })
        .instruction(Instruction::GetKeyed {
            obj: r(3),
            slot: slot(0),
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap()
}

/// `function (a) { arguments[0] = 9; return a }`
fn arguments_write_seen_by_parameter(policy: ArgumentsPolicy, strict: bool) -> Function {
    Function::builder()
        .param_count(1)
        .is_strict(strict)
        .arguments(policy)
        .instruction(Instruction::CreateArguments)
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::LoadInt { value: 0 })
        .instruction(Instruction::Star { dst: r(4) })
        .instruction(Instruction::LoadInt { value: 9 })
        .instruction(Instruction::SetKeyed {
            obj: r(3),
            key: r(4),
            slot: slot(0),
        })
        .instruction(Instruction::Ldar { src: r(2) })
        .instruction(Instruction::Return)
        .build()
        .unwrap()
}

#[test]
fn test_mapped_arguments_alias_parameters() {
    let mut interpreter = Interpreter::default();
    let one = [Value::int32(1)];

    let sloppy = closure_of(
        &mut interpreter,
        parameter_write_seen_by_arguments(ArgumentsPolicy::Mapped, false),
    );
    assert_eq!(interpreter.call(&sloppy, Value::undefined(), &one).unwrap(), Value::int32(5));
    let sloppy = closure_of(
        &mut interpreter,
        arguments_write_seen_by_parameter(ArgumentsPolicy::Mapped, false),
    );
    assert_eq!(interpreter.call(&sloppy, Value::undefined(), &one).unwrap(), Value::int32(9));

    let strict = closure_of(
        &mut interpreter,
        parameter_write_seen_by_arguments(ArgumentsPolicy::Unmapped, true),
    );
    assert_eq!(interpreter.call(&strict, Value::undefined(), &one).unwrap(), Value::int32(1));
    let strict = closure_of(
        &mut interpreter,
        arguments_write_seen_by_parameter(ArgumentsPolicy::Unmapped, true),
    );
    assert_eq!(interpreter.call(&strict, Value::undefined(), &one).unwrap(), Value::int32(1));

    // A parameter without an argument is not aliased
    let missing = closure_of(
        &mut interpreter,
        parameter_write_seen_by_arguments(ArgumentsPolicy::Mapped, false),
    );
    assert!(interpreter
        .call(&missing, Value::undefined(), &[])
        .unwrap()
        .is_undefined());
}

#[test]
fn test_duplicate_parameter_reads_last_argument() {
    // `function f(a, a) { return a }` binds the second parameter register;
    // the mapped variant writes `arguments[1] = 7` first
    let plain = Function::builder()
        .param_count(2)
        .instruction(Instruction::Ldar { src: r(3) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();
    let aliased = Function::builder()
        .param_count(2)
        .arguments(ArgumentsPolicy::Mapped)
        .instruction(Instruction::CreateArguments)
        .instruction(Instruction::Star { dst: r(4) })
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Star { dst: r(5) })
        .instruction(Instruction::LoadInt { value: 7 })
        .instruction(Instruction::SetKeyed {
            obj: r(4),
            key: r(5),
            slot: slot(0),
        })
        .instruction(Instruction::Ldar { src: r(3) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let args = [Value::int32(1), Value::int32(2)];
    let plain = closure_of(&mut interpreter, plain);
    assert_eq!(interpreter.call(&plain, Value::undefined(), &args).unwrap(), Value::int32(2));
    let aliased = closure_of(&mut interpreter, aliased);
    assert_eq!(interpreter.call(&aliased, Value::undefined(), &args).unwrap(), Value::int32(7));
}

#[test]
fn test_rest_parameter() {
    let func = Function::builder()
        .param_count(1)
        .has_rest(true)
        .instruction(Instruction::Ldar { src: r(3) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let f = closure_of(&mut interpreter, func);
    let rest = interpreter
        .call(
            &f,
            Value::undefined(),
            &[Value::int32(1), Value::int32(2), Value::int32(3)],
        )
        .unwrap();
    let rest = rest.as_object().unwrap();
    assert!(rest.is_array());
    assert_eq!(rest.elements(), vec![Value::int32(2), Value::int32(3)]);
}

#[test]
fn test_sloppy_receiver_is_global_object() {
    let this_fn = |strict: bool| {
        Function::builder()
            .is_strict(strict)
            .instruction(Instruction::Ldar { src: r(0) })
            .instruction(Instruction::Return)
            .build()
            .unwrap()
    };

    let mut interpreter = Interpreter::default();
    let sloppy = closure_of(&mut interpreter, this_fn(false));
    let strict = closure_of(&mut interpreter, this_fn(true));

    let this = interpreter.call(&sloppy, Value::undefined(), &[]).unwrap();
    assert!(Arc::ptr_eq(this.as_object().unwrap(), interpreter.context().global()));
    assert!(interpreter
        .call(&strict, Value::undefined(), &[])
        .unwrap()
        .is_undefined());
}

#[test]
fn test_host_function_arguments() {
    let mut interpreter = Interpreter::default();
    interpreter.context().set_global(
        "add",
        Value::native_function("add", |_, _, args| {
            let a = f64::from_value(args.first().unwrap_or(&Value::undefined()))?;
            let b = f64::from_value(args.get(1).unwrap_or(&Value::undefined()))?;
            Ok(Value::number(a + b))
        }),
    );

    let mut constants = pool(&["add"]);
    let b = constants.add_number(3.5);
    let func = Function::builder()
        .constants(constants)
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::LoadInt { value: 2 })
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::LoadConst { idx: c(b) })
        .instruction(Instruction::Star { dst: r(4) })
        .instruction(Instruction::Call {
            callee: r(2),
            receiver: r(2),
            first_arg: r(3),
            argc: 2,
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    assert_eq!(run(&mut interpreter, func).unwrap(), Value::number(5.5));
}

#[test]
fn test_construct_and_instanceof() {
    // function Point(x) { this.x = x }
    let point = Function::builder()
        .name("Point")
        .param_count(1)
        .is_constructor(true)
        .constants(pool(&["x"]))
        .instruction(Instruction::Ldar { src: r(2) })
        .instruction(Instruction::SetNamed {
            obj: r(0),
            name: c(0),
            slot: slot(0),
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let point = closure_of(&mut interpreter, point);
    let instance = interpreter.construct(&point, &[Value::int32(7)]).unwrap();
    assert_eq!(get(&instance, "x"), Value::int32(7));

    let prototype = get(&point, "prototype");
    assert!(Arc::ptr_eq(
        &instance.as_object().unwrap().prototype().unwrap(),
        prototype.as_object().unwrap()
    ));

    // instance instanceof Point, via bytecode
    let check = Function::builder()
        .param_count(2)
        .instruction(Instruction::Ldar { src: r(3) })
        .instruction(Instruction::InstanceOf { lhs: r(2) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();
    let check = closure_of(&mut interpreter, check);
    assert_eq!(
        interpreter
            .call(&check, Value::undefined(), &[instance, point.clone()])
            .unwrap(),
        Value::boolean(true)
    );
    assert_eq!(
        interpreter
            .call(&check, Value::undefined(), &[object_with(&[]), point])
            .unwrap(),
        Value::boolean(false)
    );
    assert!(matches!(
        interpreter.call(&check, Value::undefined(), &[Value::int32(1), Value::int32(2)]),
        Err(VmError::TypeError(_))
    ));
}

#[test]
fn test_arrow_is_not_a_constructor() {
    let arrow = Function::builder().is_arrow(true).build().unwrap();
    let mut interpreter = Interpreter::default();
    let arrow = closure_of(&mut interpreter, arrow);
    assert!(matches!(
        interpreter.construct(&arrow, &[]),
        Err(VmError::TypeError(m)) if m.ends_with("is not a constructor")
    ));
}

#[test]
fn test_spread_call_over_array() {
    let mut interpreter = Interpreter::default();
    interpreter.context().set_global(
        "count",
        Value::native_function("count", |_, _, args| Ok(Value::int32(args.len() as i32))),
    );

    let func = Function::builder()
        .constants(pool(&["count"]))
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Star { dst: r(5) })
        .instruction(Instruction::Star { dst: r(6) })
        .instruction(Instruction::NewArray {
            first: r(5),
            count: 2,
        })
        .instruction(Instruction::Star { dst: r(4) })
        .instruction(Instruction::LoadTrue)
        .instruction(Instruction::Star { dst: r(3) })
        // count(true, ...[1, 1])
        .instruction(Instruction::CallSpread {
            callee: r(2),
            receiver: r(2),
            first_arg: r(3),
            argc: 2,
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    assert_eq!(run(&mut interpreter, func).unwrap(), Value::int32(3));
}

// ==================== Properties and inline caches ====================

fn reader() -> Function {
    Function::builder()
        .name("read")
        .param_count(1)
        .constants(pool(&["x"]))
        .instruction(Instruction::GetNamed {
            obj: r(2),
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap()
}

fn cache_state(closure: &Value) -> PropertyCache {
    let slot = closure
        .as_function()
        .unwrap()
        .function
        .feedback
        .get(slot(0))
        .unwrap();
    *slot.property_cache().unwrap()
}

#[test]
fn test_inline_cache_transitions() {
    let mut interpreter = Interpreter::default();
    let read = closure_of(&mut interpreter, reader());
    let mut read_x = |object: &Value| {
        interpreter
            .call(&read, Value::undefined(), std::slice::from_ref(object))
            .unwrap()
    };

    let a = object_with(&["x"]);
    assert_eq!(read_x(&a), Value::int32(0));
    assert!(matches!(cache_state(&read), PropertyCache::Monomorphic { .. }));
    assert_eq!(read_x(&a), Value::int32(0));

    let others = [
        object_with(&["b", "x"]),
        object_with(&["c", "x"]),
        object_with(&["d", "x"]),
    ];
    for (i, object) in others.iter().enumerate() {
        assert_eq!(read_x(object), Value::int32(1));
        match cache_state(&read) {
            PropertyCache::Polymorphic { count, .. } => assert_eq!(count as usize, i + 2),
            state => panic!("expected polymorphic cache, got {:?}", state),
        }
    }

    assert_eq!(read_x(&object_with(&["e", "x"])), Value::int32(1));
    assert_eq!(cache_state(&read), PropertyCache::Megamorphic);
    // The generic path still answers correctly
    assert_eq!(read_x(&a), Value::int32(0));

    let hits = read
        .as_function()
        .unwrap()
        .function
        .feedback
        .get(slot(0))
        .unwrap()
        .hits;
    assert_eq!(hits, 1);
}

#[test]
fn test_polymorphic_limit_is_configurable() {
    let mut interpreter =
        Interpreter::new(RuntimeConfig::default().with_polymorphic_limit(2));
    let read = closure_of(&mut interpreter, reader());
    for keys in [&["x"][..], &["p", "x"], &["q", "x"]] {
        interpreter
            .call(&read, Value::undefined(), &[object_with(keys)])
            .unwrap();
    }
    assert_eq!(cache_state(&read), PropertyCache::Megamorphic);
}

#[test]
fn test_cache_follows_shape_changes() {
    let mut interpreter = Interpreter::default();
    let read = closure_of(&mut interpreter, reader());
    let object = object_with(&["x", "y"]);

    let read_x = |interpreter: &mut Interpreter, object: &Value| {
        interpreter
            .call(&read, Value::undefined(), std::slice::from_ref(object))
            .unwrap()
    };
    assert_eq!(read_x(&mut interpreter, &object), Value::int32(0));

    // Same object, new shape
    let holder = object.as_object().unwrap();
    holder.set(PropertyKey::string("z"), Value::int32(2));
    holder.set(PropertyKey::string("x"), Value::int32(42));
    assert_eq!(read_x(&mut interpreter, &object), Value::int32(42));

    // Dictionary mode bypasses the cache
    holder.delete(&PropertyKey::string("y"));
    assert!(holder.is_dictionary_mode());
    holder.set(PropertyKey::string("x"), Value::int32(43));
    assert_eq!(read_x(&mut interpreter, &object), Value::int32(43));
}

#[test]
fn test_disabled_caches_give_same_results() {
    let objects: Vec<Value> = [&["x"][..], &["a", "x"], &["b", "x"], &["x"]]
        .iter()
        .map(|keys| object_with(keys))
        .collect();

    let mut results = Vec::new();
    for enabled in [true, false] {
        let mut interpreter =
            Interpreter::new(RuntimeConfig::default().with_inline_caches(enabled));
        let read = closure_of(&mut interpreter, reader());
        let observed: Vec<Value> = objects
            .iter()
            .map(|o| {
                interpreter
                    .call(&read, Value::undefined(), std::slice::from_ref(o))
                    .unwrap()
            })
            .collect();
        if !enabled {
            assert_eq!(cache_state(&read), PropertyCache::Uninitialized);
        }
        results.push(observed);
    }
    assert_eq!(results[0], results[1]);
}

#[test]
fn test_cached_property_writes() {
    let writer = Function::builder()
        .name("write")
        .param_count(2)
        .constants(pool(&["x"]))
        .instruction(Instruction::Ldar { src: r(3) })
        .instruction(Instruction::SetNamed {
            obj: r(2),
            name: c(0),
            slot: slot(0),
        })
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let write = closure_of(&mut interpreter, writer);
    let object = object_with(&["x"]);
    for n in [5, 6] {
        interpreter
            .call(&write, Value::undefined(), &[object.clone(), Value::int32(n)])
            .unwrap();
        assert_eq!(get(&object, "x"), Value::int32(n));
    }
    assert!(matches!(cache_state(&write), PropertyCache::Monomorphic { .. }));

    // Missing property is added, not cached
    let empty = object_with(&[]);
    interpreter
        .call(&write, Value::undefined(), &[empty.clone(), Value::int32(9)])
        .unwrap();
    assert_eq!(get(&empty, "x"), Value::int32(9));
}

#[test]
fn test_global_loads_use_cache() {
    let func = Function::builder()
        .constants(pool(&["answer"]))
        .instruction(Instruction::LoadGlobal {
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    interpreter.context().set_global("answer", Value::int32(42));
    let load = closure_of(&mut interpreter, func);
    for _ in 0..3 {
        assert_eq!(
            interpreter.call(&load, Value::undefined(), &[]).unwrap(),
            Value::int32(42)
        );
    }
    let slot = load.as_function().unwrap().function.feedback.get(slot(0)).unwrap();
    assert!(matches!(slot.property_cache(), Some(PropertyCache::Monomorphic { .. })));
    assert_eq!(slot.hits, 2);
}

#[test]
fn test_primitive_property_access() {
    let length = Function::builder()
        .param_count(1)
        .constants(pool(&["length"]))
        .instruction(Instruction::GetNamed {
            obj: r(2),
            name: c(0),
            slot: slot(0),
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let length = closure_of(&mut interpreter, length);
    assert_eq!(
        interpreter
            .call(&length, Value::undefined(), &[Value::string("héllo")])
            .unwrap(),
        Value::int32(5)
    );
    assert!(matches!(
        interpreter.call(&length, Value::undefined(), &[Value::undefined()]),
        Err(VmError::TypeError(m)) if m == "Cannot read properties of undefined (reading 'length')"
    ));
}

#[test]
fn test_in_and_delete() {
    let func = Function::builder()
        .param_count(1)
        .constants(pool(&["x"]))
        .instruction(Instruction::DeleteNamed {
            obj: r(2),
            name: c(0),
        })
        .instruction(Instruction::LoadConst { idx: c(0) })
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::Ldar { src: r(2) })
        .instruction(Instruction::In { lhs: r(3) })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let f = closure_of(&mut interpreter, func);
    assert_eq!(
        interpreter
            .call(&f, Value::undefined(), &[object_with(&["x", "y"])])
            .unwrap(),
        Value::boolean(false)
    );
    assert!(matches!(
        interpreter.call(&f, Value::undefined(), &[Value::int32(1)]),
        Err(VmError::TypeError(_))
    ));
}
