//! Generator resumption tests
//!
//! These tests drive generator activations through `Interpreter::resume`,
//! the prototype methods and the iteration instructions.

use std::sync::Arc;

use otter_vm_bytecode::{
    ConstantIndex, ConstantPool, ExceptionHandler, FeedbackIndex, Function, Instruction,
    JumpOffset, Register,
};
use otter_vm_core::{
    GeneratorState, GeneratorStep, Interpreter, PropertyKey, ResumeMode, RuntimeConfig, Value,
    VmError,
};

fn r(index: u16) -> Register {
    Register(index)
}

/// Generator object produced by calling `body` with no arguments
fn start(interpreter: &mut Interpreter, body: Function) -> Value {
    let mut constants = ConstantPool::new();
    let idx = constants.add_function(body);
    let script = Function::builder()
        .constants(constants)
        .instruction(Instruction::NewClosure {
            func: ConstantIndex(idx),
        })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::LoadUndefined)
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::Call {
            callee: r(2),
            receiver: r(3),
            first_arg: r(4),
            argc: 0,
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();
    interpreter
        .run(&Arc::new(script), Value::undefined(), &[])
        .unwrap()
}

/// function* () { const a = yield 1; const b = yield 2; return a + b; }
fn echo_body() -> Function {
    Function::builder()
        .name("echo")
        .is_generator(true)
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Yield)
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::LoadInt { value: 2 })
        .instruction(Instruction::Yield)
        .instruction(Instruction::Add {
            lhs: r(2),
            slot: FeedbackIndex(0),
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap()
}

/// function* () { try { yield 1; return 99 } catch (e) { yield e; return 7 } }
fn catching_body() -> Function {
    Function::builder()
        .name("catching")
        .is_generator(true)
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Yield)
        .instruction(Instruction::LoadInt { value: 99 })
        .instruction(Instruction::Return)
        .instruction(Instruction::Yield)
        .instruction(Instruction::LoadInt { value: 7 })
        .instruction(Instruction::Return)
        .handler(ExceptionHandler {
            start: 0,
            end: 2,
            target: 4,
            env_depth: 0,
        })
        .build()
        .unwrap()
}

fn generator_of(value: &Value) -> Arc<otter_vm_core::JsGenerator> {
    Arc::clone(value.as_generator().unwrap())
}

#[test]
fn test_calling_generator_does_not_run_body() {
    let mut interpreter = Interpreter::default();
    let value = start(&mut interpreter, echo_body());
    assert_eq!(value.type_of(), "object");
    assert_eq!(generator_of(&value).state(), GeneratorState::SuspendedStart);
}

#[test]
fn test_next_passes_values_in() {
    let mut interpreter = Interpreter::default();
    let generator = generator_of(&start(&mut interpreter, echo_body()));

    let step = interpreter
        .resume(&generator, ResumeMode::Next, Value::int32(100))
        .unwrap();
    // The first value sent is dropped
    assert_eq!(step, GeneratorStep::Yielded(Value::int32(1)));
    assert_eq!(generator.state(), GeneratorState::SuspendedYield);

    let step = interpreter
        .resume(&generator, ResumeMode::Next, Value::int32(10))
        .unwrap();
    assert_eq!(step, GeneratorStep::Yielded(Value::int32(2)));

    let step = interpreter
        .resume(&generator, ResumeMode::Next, Value::int32(5))
        .unwrap();
    assert_eq!(step, GeneratorStep::Done(Value::int32(15)));
    assert!(generator.is_completed());

    let step = interpreter
        .resume(&generator, ResumeMode::Next, Value::int32(5))
        .unwrap();
    assert_eq!(step, GeneratorStep::Done(Value::undefined()));
}

#[test]
fn test_prototype_next_returns_result_objects() {
    let mut interpreter = Interpreter::default();
    let generator = start(&mut interpreter, echo_body());
    let next = interpreter
        .get_property(&generator, &PropertyKey::string("next"))
        .unwrap();
    assert!(next.is_callable());

    let result = interpreter.call(&next, generator.clone(), &[]).unwrap();
    let result = result.as_object().unwrap();
    assert_eq!(result.get(&PropertyKey::string("value")), Some(Value::int32(1)));
    assert_eq!(result.get(&PropertyKey::string("done")), Some(Value::boolean(false)));

    // Wrong receiver
    assert!(matches!(
        interpreter.call(&next, Value::int32(1), &[]),
        Err(VmError::TypeError(_))
    ));
}

#[test]
fn test_return_completes_generator() {
    let mut interpreter = Interpreter::default();
    let generator = generator_of(&start(&mut interpreter, echo_body()));
    interpreter
        .resume(&generator, ResumeMode::Next, Value::undefined())
        .unwrap();

    let step = interpreter
        .resume(&generator, ResumeMode::Return, Value::int32(42))
        .unwrap();
    assert_eq!(step, GeneratorStep::Done(Value::int32(42)));
    assert!(generator.is_completed());

    let step = interpreter
        .resume(&generator, ResumeMode::Return, Value::int32(43))
        .unwrap();
    assert_eq!(step, GeneratorStep::Done(Value::int32(43)));
}

#[test]
fn test_throw_is_caught_inside_generator() {
    let mut interpreter = Interpreter::default();
    let generator = generator_of(&start(&mut interpreter, catching_body()));
    assert_eq!(
        interpreter
            .resume(&generator, ResumeMode::Next, Value::undefined())
            .unwrap(),
        GeneratorStep::Yielded(Value::int32(1))
    );

    let step = interpreter
        .resume(&generator, ResumeMode::Throw, Value::string("boom"))
        .unwrap();
    assert_eq!(step, GeneratorStep::Yielded(Value::string("boom")));

    let step = interpreter
        .resume(&generator, ResumeMode::Next, Value::undefined())
        .unwrap();
    assert_eq!(step, GeneratorStep::Done(Value::int32(7)));
}

#[test]
fn test_uncaught_throw_completes_generator() {
    let mut interpreter = Interpreter::default();
    let generator = generator_of(&start(&mut interpreter, echo_body()));
    interpreter
        .resume(&generator, ResumeMode::Next, Value::undefined())
        .unwrap();

    match interpreter.resume(&generator, ResumeMode::Throw, Value::int32(3)) {
        Err(VmError::Exception(thrown)) => assert_eq!(thrown.value, Value::int32(3)),
        other => panic!("expected exception, got {:?}", other),
    }
    assert!(generator.is_completed());

    // Throwing into a completed generator rethrows
    assert!(matches!(
        interpreter.resume(&generator, ResumeMode::Throw, Value::int32(4)),
        Err(VmError::Exception(_))
    ));
}

#[test]
fn test_throw_before_start() {
    let mut interpreter = Interpreter::default();
    let generator = generator_of(&start(&mut interpreter, catching_body()));
    // Handlers are not active before the body starts
    assert!(matches!(
        interpreter.resume(&generator, ResumeMode::Throw, Value::int32(1)),
        Err(VmError::Exception(_))
    ));
    assert!(generator.is_completed());
}

#[test]
fn test_reentrant_resume_is_type_error() {
    let mut constants = ConstantPool::new();
    let g = constants.add_string("g");
    let next = constants.add_string("next");
    let body = Function::builder()
        .name("reenter")
        .is_generator(true)
        .constants(constants)
        .instruction(Instruction::LoadGlobal {
            name: ConstantIndex(g),
            slot: FeedbackIndex(0),
        })
        .instruction(Instruction::Star { dst: r(2) })
        .instruction(Instruction::GetNamed {
            obj: r(2),
            name: ConstantIndex(next),
            slot: FeedbackIndex(1),
        })
        .instruction(Instruction::Star { dst: r(3) })
        .instruction(Instruction::Call {
            callee: r(3),
            receiver: r(2),
            first_arg: r(4),
            argc: 0,
        })
        .instruction(Instruction::Return)
        .build()
        .unwrap();

    let mut interpreter = Interpreter::default();
    let value = start(&mut interpreter, body);
    interpreter.context().set_global("g", value.clone());
    let generator = generator_of(&value);

    assert!(matches!(
        interpreter.resume(&generator, ResumeMode::Next, Value::undefined()),
        Err(VmError::TypeError(m)) if m == "Generator is already running"
    ));
    assert!(generator.is_completed());
}

/// Script body that leaves an iterable in the accumulator, then sums it
fn sum_iterable(setup: Vec<Instruction>, constants: ConstantPool) -> Function {
    let mut instructions = setup;
    instructions.extend([
        Instruction::GetIterator { dst: r(5) },
        Instruction::LoadInt { value: 0 },
        Instruction::Star { dst: r(6) },
        // loop
        Instruction::IteratorStep { iterator: r(5) },
        Instruction::Star { dst: r(7) },
        Instruction::IteratorComplete { result: r(7) },
        Instruction::JumpIfTrue {
            offset: JumpOffset(5),
        },
        Instruction::IteratorValue { result: r(7) },
        Instruction::Add {
            lhs: r(6),
            slot: FeedbackIndex(7),
        },
        Instruction::Star { dst: r(6) },
        Instruction::Jump {
            offset: JumpOffset(-7),
        },
        // done
        Instruction::Ldar { src: r(6) },
        Instruction::Return,
    ]);
    Function::builder()
        .name("sum")
        .constants(constants)
        .instructions(instructions)
        .build()
        .unwrap()
}

#[test]
fn test_iterate_generator() {
    let body = Function::builder()
        .name("numbers")
        .is_generator(true)
        .instruction(Instruction::LoadInt { value: 1 })
        .instruction(Instruction::Yield)
        .instruction(Instruction::LoadInt { value: 2 })
        .instruction(Instruction::Yield)
        .instruction(Instruction::LoadInt { value: 100 })
        .instruction(Instruction::Return)
        .build()
        .unwrap();
    let mut constants = ConstantPool::new();
    let body = constants.add_function(body);

    let script = sum_iterable(
        vec![
            Instruction::NewClosure {
                func: ConstantIndex(body),
            },
            Instruction::Star { dst: r(2) },
            Instruction::Call {
                callee: r(2),
                receiver: r(2),
                first_arg: r(3),
                argc: 0,
            },
        ],
        constants,
    );

    let mut interpreter = Interpreter::default();
    // The returned 100 is not part of the iteration
    assert_eq!(
        interpreter
            .run(&Arc::new(script), Value::undefined(), &[])
            .unwrap(),
        Value::int32(3)
    );
}

#[test]
fn test_iterate_array() {
    let script = sum_iterable(
        vec![
            Instruction::LoadInt { value: 4 },
            Instruction::Star { dst: r(2) },
            Instruction::LoadInt { value: 6 },
            Instruction::Star { dst: r(3) },
            Instruction::NewArray {
                first: r(2),
                count: 2,
            },
        ],
        ConstantPool::new(),
    );

    let mut interpreter = Interpreter::default();
    assert_eq!(
        interpreter
            .run(&Arc::new(script), Value::undefined(), &[])
            .unwrap(),
        Value::int32(10)
    );
}

#[test]
fn test_iterate_non_iterable() {
    let script = sum_iterable(vec![Instruction::LoadInt { value: 4 }], ConstantPool::new());
    let mut interpreter = Interpreter::default();
    assert!(matches!(
        interpreter.run(&Arc::new(script), Value::undefined(), &[]),
        Err(VmError::TypeError(m)) if m == "4 is not iterable"
    ));
}

#[test]
fn test_generator_depth_limit() {
    let mut interpreter = Interpreter::new(RuntimeConfig::default().with_max_stack_depth(1));
    let generator = generator_of(&start(&mut interpreter, echo_body()));
    // Resumption from the host counts as one activation
    assert_eq!(
        interpreter
            .resume(&generator, ResumeMode::Next, Value::undefined())
            .unwrap(),
        GeneratorStep::Yielded(Value::int32(1))
    );
}
