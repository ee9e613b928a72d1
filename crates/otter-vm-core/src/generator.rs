//! JavaScript Generator implementation
//!
//! Generators are functions that can be paused and resumed, yielding values.
//! Calling a generator function builds its activation without running it;
//! the suspended [`CallFrame`] lives inside the generator object until the
//! next resumption. Resumption itself is driven by
//! [`Interpreter::resume`](crate::interpreter::Interpreter::resume).
//!
//! ## Usage
//!
//! ```ignore
//! function* gen() {
//!     yield 1;
//!     yield 2;
//!     return 3;
//! }
//! const g = gen();
//! g.next(); // { value: 1, done: false }
//! g.next(); // { value: 2, done: false }
//! g.next(); // { value: 3, done: true }
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

use otter_vm_bytecode::Function;

use crate::context::CallFrame;
use crate::error::{VmError, VmResult};
use crate::object::{JsObject, PropertyKey};
use crate::value::Value;

/// Generator execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created but never run
    SuspendedStart,
    /// Paused at a `Yield`
    SuspendedYield,
    /// Generator is currently executing
    Executing,
    /// Generator has completed (returned or thrown)
    Completed,
}

/// How the caller resumes a generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// `next(v)`: `v` becomes the value of the paused `yield`
    Next,
    /// `return(v)`: finish with `v`
    Return,
    /// `throw(e)`: raise `e` at the paused `yield`
    Throw,
}

/// Outcome of one resumption
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorStep {
    /// The generator paused with a value
    Yielded(Value),
    /// The generator finished with a value
    Done(Value),
}

impl GeneratorStep {
    /// The yielded or returned value
    pub fn value(&self) -> &Value {
        match self {
            Self::Yielded(v) | Self::Done(v) => v,
        }
    }

    /// Whether the generator finished
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// `{ value, done }` iterator result object
    pub fn into_result_object(self) -> Value {
        let done = self.is_done();
        let value = match self {
            Self::Yielded(v) | Self::Done(v) => v,
        };
        let result = JsObject::new(None);
        result.set(PropertyKey::string("value"), value);
        result.set(PropertyKey::string("done"), Value::boolean(done));
        Value::object(Arc::new(result))
    }
}

/// Prototype carrying the `next`, `return` and `throw` methods
pub(crate) fn generator_prototype() -> Arc<JsObject> {
    let prototype = Arc::new(JsObject::new(None));
    let methods = [
        ("next", ResumeMode::Next),
        ("return", ResumeMode::Return),
        ("throw", ResumeMode::Throw),
    ];
    for (name, mode) in methods {
        let method = Value::native_function(name, move |interpreter, this, args| {
            let generator = this.as_generator().cloned().ok_or_else(|| {
                VmError::type_error(format!(
                    "Generator.prototype.{} called on incompatible receiver",
                    name
                ))
            })?;
            let value = args.first().cloned().unwrap_or_default();
            let step = interpreter.resume(&generator, mode, value)?;
            Ok(step.into_result_object())
        });
        prototype.set(PropertyKey::string(name), method);
    }
    prototype
}

/// Frame handed out for one resumption
pub(crate) struct Resumption {
    pub frame: CallFrame,
    /// False for the first run from the function entry
    pub started: bool,
}

/// A JavaScript Generator object
///
/// Generators maintain their execution state across yields.
pub struct JsGenerator {
    function: Arc<Function>,
    state: Mutex<GeneratorState>,
    frame: Mutex<Option<CallFrame>>,
    object: Arc<JsObject>,
}

impl std::fmt::Debug for JsGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("function", &self.function.display_name())
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl JsGenerator {
    /// Create a generator around a not-yet-started activation
    pub(crate) fn new(frame: CallFrame, prototype: Option<Arc<JsObject>>) -> Arc<Self> {
        Arc::new(Self {
            function: Arc::clone(&frame.function),
            state: Mutex::new(GeneratorState::SuspendedStart),
            frame: Mutex::new(Some(frame)),
            object: Arc::new(JsObject::new(prototype)),
        })
    }

    /// Get the current state
    pub fn state(&self) -> GeneratorState {
        *self.state.lock()
    }

    /// Check if generator is suspended (at start or at a yield)
    pub fn is_suspended(&self) -> bool {
        matches!(
            self.state(),
            GeneratorState::SuspendedStart | GeneratorState::SuspendedYield
        )
    }

    /// Check if generator is executing
    pub fn is_executing(&self) -> bool {
        self.state() == GeneratorState::Executing
    }

    /// Check if generator is completed
    pub fn is_completed(&self) -> bool {
        self.state() == GeneratorState::Completed
    }

    /// Generator function body
    pub fn function(&self) -> &Arc<Function> {
        &self.function
    }

    /// Property storage (prototype chain carries `next`/`return`/`throw`)
    pub fn object(&self) -> &Arc<JsObject> {
        &self.object
    }

    /// Enter the executing state and take the saved frame.
    /// `Ok(None)` means the generator already completed.
    pub(crate) fn begin(&self) -> VmResult<Option<Resumption>> {
        let mut state = self.state.lock();
        let started = match *state {
            GeneratorState::Executing => {
                return Err(VmError::type_error("Generator is already running"));
            }
            GeneratorState::Completed => return Ok(None),
            GeneratorState::SuspendedStart => false,
            GeneratorState::SuspendedYield => true,
        };
        let frame = self
            .frame
            .lock()
            .take()
            .ok_or_else(|| VmError::internal("suspended generator without a frame"))?;
        *state = GeneratorState::Executing;
        Ok(Some(Resumption { frame, started }))
    }

    /// Park the frame after a `Yield`
    pub(crate) fn suspend(&self, frame: CallFrame) {
        *self.frame.lock() = Some(frame);
        *self.state.lock() = GeneratorState::SuspendedYield;
    }

    /// Finish the generator, dropping any saved frame
    pub(crate) fn complete(&self) {
        self.frame.lock().take();
        *self.state.lock() = GeneratorState::Completed;
    }
}
