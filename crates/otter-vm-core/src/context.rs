//! VM execution context
//!
//! The context holds state shared by every activation of one script
//! execution: the global object, top-level lexical bindings, the
//! environment registry and the interrupt flag.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use otter_vm_bytecode::{Function, RESERVED_REGISTERS, Register};

use crate::environment::{Environment, EnvironmentRegistry};
use crate::error::{VmError, VmResult};
use crate::generator;
use crate::object::{JsObject, PropertyKey};
use crate::runtime::RuntimeConfig;
use crate::value::Value;

/// One activation: register file, accumulator and program counter
#[derive(Debug)]
pub struct CallFrame {
    /// Function being executed
    pub function: Arc<Function>,
    /// Program counter (instruction index)
    pub pc: usize,
    /// Accumulator
    pub acc: Value,
    /// Register file (`register_count` entries)
    pub registers: Vec<Value>,
    /// Innermost environment block
    pub env: Option<Arc<Environment>>,
    /// Blocks pushed since function entry
    pub env_depth: u16,
    /// Actual arguments, for `CreateArguments`
    pub arguments: Vec<Value>,
    /// The function value being run
    pub callee: Value,
    /// Mapped `arguments` object whose elements alias the leading parameters
    mapped_arguments: Option<Arc<JsObject>>,
    /// Parameters aliased by `mapped_arguments`
    mapped_count: usize,
}

impl CallFrame {
    /// Create a frame with every register undefined
    pub fn new(function: Arc<Function>, arguments: Vec<Value>, callee: Value) -> Self {
        let count = (function.register_count.max(RESERVED_REGISTERS)) as usize;
        Self {
            function,
            pc: 0,
            acc: Value::undefined(),
            registers: vec![Value::undefined(); count],
            env: None,
            env_depth: 0,
            arguments,
            callee,
            mapped_arguments: None,
            mapped_count: 0,
        }
    }

    /// Enter `env` as the innermost block
    pub fn push_environment(&mut self, env: Arc<Environment>) -> VmResult<()> {
        self.env_depth = self
            .env_depth
            .checked_add(1)
            .ok_or_else(|| VmError::internal("environment depth overflow"))?;
        self.env = Some(env);
        Ok(())
    }

    /// Alias the parameters that received an argument with the elements of
    /// a mapped `arguments` object. Deleting an element ends its aliasing.
    pub fn map_arguments(&mut self, arguments: Arc<JsObject>) {
        self.mapped_count = self.arguments.len().min(self.function.param_count as usize);
        self.mapped_arguments = Some(arguments);
    }

    /// Mapped element key backing `register`, if any
    fn mapped_element(&self, register: Register) -> Option<(&JsObject, PropertyKey)> {
        let arguments = self.mapped_arguments.as_deref()?;
        let index = (register.index() as usize).checked_sub(RESERVED_REGISTERS as usize)?;
        let key = PropertyKey::Index(index as u32);
        (index < self.mapped_count && arguments.has_own(&key)).then_some((arguments, key))
    }

    /// Read a register
    #[inline]
    pub fn register(&self, register: Register) -> VmResult<Value> {
        let value = self
            .registers
            .get(register.index() as usize)
            .ok_or_else(|| VmError::internal(format!("register {} out of range", register)))?;
        if let Some((arguments, key)) = self.mapped_element(register) {
            if let Some(mapped) = arguments.get_own(&key) {
                return Ok(mapped);
            }
        }
        Ok(value.clone())
    }

    /// Write a register
    #[inline]
    pub fn set_register(&mut self, register: Register, value: Value) -> VmResult<()> {
        if let Some((arguments, key)) = self.mapped_element(register) {
            arguments.set(key, value.clone());
        }
        match self.registers.get_mut(register.index() as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::internal(format!(
                "register {} out of range",
                register
            ))),
        }
    }

    /// Copy of `count` consecutive registers starting at `first`
    pub fn register_range(&self, first: Register, count: u16) -> VmResult<Vec<Value>> {
        let start = first.index() as usize;
        let end = start + count as usize;
        if end > self.registers.len() {
            return Err(VmError::internal(format!(
                "register range {}+{} out of range",
                first, count
            )));
        }
        (start..end)
            .map(|index| self.register(Register(index as u16)))
            .collect()
    }
}

/// A top-level `let`/`const` binding
#[derive(Debug, Clone)]
pub struct GlobalLexical {
    /// Current value (hole while uninitialized)
    pub value: Value,
    /// False for `const`
    pub mutable: bool,
}

/// VM execution context
///
/// Holds execution state for a single "thread" of execution.
pub struct VmContext {
    config: RuntimeConfig,
    /// Global object
    global: Arc<JsObject>,
    /// Declarative part of the global scope
    lexicals: FxHashMap<Arc<str>, GlobalLexical>,
    /// Every environment block allocated by this context
    environments: EnvironmentRegistry,
    /// Prototype of generator objects (`next`, `return`, `throw`)
    generator_prototype: Arc<JsObject>,
    /// Interrupt flag for timeout/cancellation support
    interrupt_flag: Arc<AtomicBool>,
}

impl VmContext {
    /// Create a new context with a fresh global object
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            global: Arc::new(JsObject::new(None)),
            lexicals: FxHashMap::default(),
            environments: EnvironmentRegistry::new(),
            generator_prototype: generator::generator_prototype(),
            interrupt_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get the interrupt flag for external timeout/cancellation
    ///
    /// Call `flag.store(true, Ordering::Relaxed)` to interrupt execution.
    /// The VM checks this flag at calls and backward jumps.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_flag)
    }

    /// Check if execution was interrupted
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::Relaxed)
    }

    /// Request interruption of execution
    pub fn interrupt(&self) {
        self.interrupt_flag.store(true, Ordering::Relaxed);
    }

    /// Clear the interrupt flag
    pub fn clear_interrupt(&self) {
        self.interrupt_flag.store(false, Ordering::Relaxed);
    }

    /// Get global object
    pub fn global(&self) -> &Arc<JsObject> {
        &self.global
    }

    /// Get global variable (lexical bindings first, then the global object)
    pub fn get_global(&self, name: &str) -> Option<Value> {
        match self.lexicals.get(name) {
            Some(binding) => Some(binding.value.clone()),
            None => self.global.get(&PropertyKey::string(name)),
        }
    }

    /// Set a property of the global object
    pub fn set_global(&self, name: &str, value: Value) {
        self.global.set(PropertyKey::string(name), value);
    }

    /// Top-level lexical binding
    pub fn lexical(&self, name: &str) -> Option<&GlobalLexical> {
        self.lexicals.get(name)
    }

    /// Mutable top-level lexical binding
    pub fn lexical_mut(&mut self, name: &str) -> Option<&mut GlobalLexical> {
        self.lexicals.get_mut(name)
    }

    /// Install a top-level lexical binding
    pub fn declare_lexical(&mut self, name: Arc<str>, value: Value, mutable: bool) {
        self.lexicals.insert(name, GlobalLexical { value, mutable });
    }

    /// Prototype shared by generator objects
    pub fn generator_prototype(&self) -> &Arc<JsObject> {
        &self.generator_prototype
    }

    /// Allocate an environment block tracked by this context
    pub fn allocate_environment(
        &self,
        size: usize,
        parent: Option<Arc<Environment>>,
    ) -> Arc<Environment> {
        self.environments.allocate(size, parent)
    }

    /// Environment registry
    pub fn environments(&self) -> &EnvironmentRegistry {
        &self.environments
    }
}

impl Default for VmContext {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Drop for VmContext {
    fn drop(&mut self) {
        self.lexicals.clear();
        self.environments.clear_all();
    }
}
