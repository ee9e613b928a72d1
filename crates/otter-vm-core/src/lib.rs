//! # Otter VM Core
//!
//! Execution engine for resolved Otter bytecode.
//!
//! ## Design Principles
//!
//! - **Thread-safe**: Values are `Send + Sync`; shared state sits behind locks
//! - **NaN-boxing**: Efficient 64-bit value representation
//! - **Hidden classes**: shapes plus per-site inline caches for property access
//! - **Accumulator + registers**: matches the bytecode instruction format
//! - **Table-driven unwinding**: exceptions are routed through each function's
//!   handler table, never through Rust panics

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod context;
pub mod convert;
pub mod environment;
pub mod error;
pub mod generator;
pub mod interpreter;
pub mod object;
pub mod operations;
pub mod runtime;
pub mod shape;
pub mod value;

pub use context::{CallFrame, GlobalLexical, VmContext};
pub use convert::{FromValue, IntoValue};
pub use environment::{Environment, EnvironmentRegistry};
pub use error::{StackFrame, ThrownValue, VmError, VmResult};
pub use generator::{GeneratorState, GeneratorStep, JsGenerator, ResumeMode};
pub use interpreter::Interpreter;
pub use object::{JsObject, PropertyKey};
pub use runtime::{RuntimeConfig, VmRuntime};
pub use shape::Shape;
pub use value::{Closure, HeapRef, NativeFn, NativeFunctionObject, Value};
