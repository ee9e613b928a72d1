//! VM runtime - the main entry point
//!
//! The runtime owns the configuration and creates execution contexts.

use std::sync::Arc;

use otter_vm_bytecode::{Function, MAX_POLYMORPHIC_ENTRIES};

use crate::context::VmContext;
use crate::error::VmResult;
use crate::interpreter::Interpreter;
use crate::value::Value;

/// The VM runtime
///
/// This is the main entry point for executing bytecode.
/// It is `Send + Sync` and can be shared across threads; each execution
/// gets its own [`VmContext`].
#[derive(Debug, Default)]
pub struct VmRuntime {
    /// Runtime configuration
    config: RuntimeConfig,
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum call depth before a stack overflow is raised
    pub max_stack_depth: usize,
    /// Maximum nesting of activations that re-enter the interpreter from
    /// Rust (host functions, generator resumption, iteration)
    pub max_reentry_depth: usize,
    /// Consult and update property inline caches
    pub inline_caches: bool,
    /// Record operand type feedback
    pub type_feedback: bool,
    /// Shapes a property cache tracks before going megamorphic
    pub polymorphic_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 1000,
            max_reentry_depth: 32,
            inline_caches: true,
            type_feedback: true,
            polymorphic_limit: MAX_POLYMORPHIC_ENTRIES,
        }
    }
}

impl RuntimeConfig {
    /// Set the maximum call depth
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    /// Set the maximum re-entrant nesting from host code
    pub fn with_max_reentry_depth(mut self, depth: usize) -> Self {
        self.max_reentry_depth = depth;
        self
    }

    /// Enable or disable inline caches
    pub fn with_inline_caches(mut self, enabled: bool) -> Self {
        self.inline_caches = enabled;
        self
    }

    /// Enable or disable type feedback
    pub fn with_type_feedback(mut self, enabled: bool) -> Self {
        self.type_feedback = enabled;
        self
    }

    /// Set the polymorphic cache limit (clamped to the cache capacity)
    pub fn with_polymorphic_limit(mut self, limit: usize) -> Self {
        self.polymorphic_limit = limit.clamp(1, MAX_POLYMORPHIC_ENTRIES);
        self
    }
}

impl VmRuntime {
    /// Create a new runtime with default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Create a new execution context
    pub fn create_context(&self) -> VmContext {
        VmContext::new(self.config.clone())
    }

    /// Run a script in a fresh context
    pub fn execute(&self, script: &Arc<Function>) -> VmResult<Value> {
        let mut interpreter = Interpreter::with_context(self.create_context());
        interpreter.run(script, Value::undefined(), &[])
    }

    /// Get runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}
