//! Constant pool for function descriptors

use std::sync::Arc;

use crate::function::Function;

/// A constant value in the constant pool
#[derive(Debug, Clone)]
pub enum Constant {
    /// 64-bit floating point number
    Number(f64),
    /// String value
    String(Arc<str>),
    /// BigInt value (decimal digits, optional leading `-`)
    BigInt(Box<str>),
    /// Nested function descriptor (closure template)
    Function(Arc<Function>),
}

impl Constant {
    /// Create a number constant
    #[inline]
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a string constant
    #[inline]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    /// Create a BigInt constant
    #[inline]
    pub fn bigint(s: impl Into<Box<str>>) -> Self {
        Self::BigInt(s.into())
    }

    /// Create a nested function constant
    #[inline]
    pub fn function(function: Function) -> Self {
        Self::Function(Arc::new(function))
    }

    /// Get as number if this is a number constant
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string if this is a string constant
    #[inline]
    pub fn as_string(&self) -> Option<&Arc<str>> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as function descriptor if this is a function constant
    #[inline]
    pub fn as_function(&self) -> Option<&Arc<Function>> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Deduplication equality. Numbers compare bitwise so `0` and `-0` stay
    /// distinct; functions compare by identity.
    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Constant pool with deduplication
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    constants: Vec<Constant>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self {
            constants: Vec::new(),
        }
    }

    /// Add a constant to the pool, returns its index
    ///
    /// Deduplicates identical constants to save space.
    pub fn add(&mut self, constant: Constant) -> u32 {
        if let Some(idx) = self.constants.iter().position(|c| c.same_as(&constant)) {
            return idx as u32;
        }

        let idx = self.constants.len() as u32;
        self.constants.push(constant);
        idx
    }

    /// Add a number constant
    #[inline]
    pub fn add_number(&mut self, n: f64) -> u32 {
        self.add(Constant::number(n))
    }

    /// Add a string constant
    #[inline]
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.add(Constant::string(s))
    }

    /// Add a nested function descriptor
    #[inline]
    pub fn add_function(&mut self, function: Function) -> u32 {
        self.add(Constant::function(function))
    }

    /// Get a constant by index
    #[inline]
    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Number of constants in the pool
    #[inline]
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Check if the pool is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Iterate over constants
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }
}
