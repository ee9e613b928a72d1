//! # Otter VM Scope
//!
//! Lexical scope resolution for the Otter VM.
//!
//! ## Pipeline
//!
//! 1. Walk the parser's [`ast`] once, building a [`ScopeTree`]
//! 2. Connect references to declarations, tracking captures
//! 3. Validate early errors over the finished tree
//! 4. Assign every declaration a register, a cell or global storage

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod ast;
pub mod early_errors;
pub mod error;
pub mod resolution;
pub mod resolver;
pub mod scope;

pub use error::{CompileError, CompileResult};
pub use resolution::{
    DeclarationInfo, FunctionLayout, ReferenceTarget, Resolution, ScopeLayout, Storage,
};
pub use resolver::{Resolver, ResolverConfig};
pub use scope::{DeclarationMode, ScopeTree};
