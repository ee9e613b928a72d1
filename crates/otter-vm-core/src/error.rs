//! VM error types

use crate::value::Value;
use thiserror::Error;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g., calling non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (undefined variable, TDZ read)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Range error (e.g., BigInt division by zero)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Syntax error (conflicting global declarations)
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    /// Internal error. Never delivered to script handlers.
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Stack overflow
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// Thrown JS exception
    #[error("Uncaught exception: {0}")]
    Exception(Box<ThrownValue>),

    /// Bytecode error
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] otter_vm_bytecode::BytecodeError),

    /// Execution was interrupted (timeout/cancellation)
    #[error("Execution interrupted")]
    Interrupted,
}

/// A thrown JavaScript value
#[derive(Debug)]
pub struct ThrownValue {
    /// The thrown value
    pub value: Value,
    /// The thrown value (as a string representation)
    pub message: String,
    /// Activations the exception left without being caught, innermost first
    pub stack: Vec<StackFrame>,
}

impl std::fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A stack frame in error trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Function name
    pub function_name: String,
    /// Instruction that raised or propagated the exception
    pub pc: usize,
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a reference error
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create a syntax error
    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Create an interrupted error (for timeout/cancellation)
    pub fn interrupted() -> Self {
        Self::Interrupted
    }

    /// Create an exception from a thrown JS value
    pub fn exception(value: Value) -> Self {
        let message = describe_thrown(&value);
        Self::Exception(Box::new(ThrownValue {
            message,
            value,
            stack: Vec::new(),
        }))
    }

    /// Whether a script-level handler may observe this error
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            Self::InternalError(_) | Self::Bytecode(_) | Self::Interrupted
        )
    }

    /// Script-visible error name, for catchable language errors
    pub fn error_name(&self) -> Option<&'static str> {
        match self {
            Self::TypeError(_) => Some("TypeError"),
            Self::ReferenceError(_) => Some("ReferenceError"),
            Self::RangeError(_) | Self::StackOverflow => Some("RangeError"),
            Self::SyntaxError(_) => Some("SyntaxError"),
            _ => None,
        }
    }

    /// Message carried by a language error
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::TypeError(m) | Self::ReferenceError(m) | Self::RangeError(m) | Self::SyntaxError(m) => {
                Some(m)
            }
            Self::StackOverflow => Some("Maximum call stack size exceeded"),
            _ => None,
        }
    }

    /// The thrown value, for `Exception`
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            Self::Exception(thrown) => Some(&thrown.value),
            _ => None,
        }
    }

    /// Append a frame to an exception's trace
    pub(crate) fn push_frame(&mut self, frame: StackFrame) {
        if let Self::Exception(thrown) = self {
            thrown.stack.push(frame);
        }
    }
}

fn describe_thrown(value: &Value) -> String {
    if let Some(s) = value.as_string() {
        return s.to_string();
    }
    if let Some(obj) = value.as_object() {
        use crate::object::PropertyKey;
        let name = obj.get(&PropertyKey::string("name"));
        let message = obj.get(&PropertyKey::string("message"));
        if let (Some(name), Some(message)) = (name, message) {
            if let (Some(name), Some(message)) = (name.as_string(), message.as_string()) {
                return format!("{}: {}", name, message);
            }
        }
    }
    format!("{:?}", value)
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;
