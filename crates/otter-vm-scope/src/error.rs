//! Resolution errors

use thiserror::Error;

use crate::ast::Span;

/// Errors reported by scope resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Early error detected while validating the scope tree
    #[error("Early error at {location}: {message}")]
    EarlyError {
        /// Error message
        message: String,
        /// Source location
        location: String,
    },

    /// Internal resolver error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Too many registers in one function
    #[error("Too many registers (max 65535)")]
    TooManyRegisters,

    /// Too many environment cells in one scope
    #[error("Too many environment cells (max 65535)")]
    TooManyCells,
}

impl CompileError {
    /// Create an early error
    pub fn early_error(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::EarlyError {
            message: message.into(),
            location: format!("{}:{}", line, column),
        }
    }

    /// Create an early error located at `span`
    pub fn early_error_at(message: impl Into<String>, span: Span) -> Self {
        Self::early_error(message, span.line, span.column)
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for resolution
pub type CompileResult<T> = Result<T, CompileError>;
