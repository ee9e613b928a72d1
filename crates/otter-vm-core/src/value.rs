//! JavaScript values with NaN-boxing
//!
//! NaN-boxing encodes JS values in 64 bits using the IEEE 754 NaN space.
//! Primitives live entirely in the bits; heap values additionally carry an
//! owning reference so the allocation stays alive while the value does.
//!
//! ## Encoding Scheme
//!
//! ```text
//! Regular doubles: When exponent != 0x7FF (NaN)
//! NaN-boxed values: When exponent == 0x7FF and the quiet bit is set
//!
//! - Double:     stored directly (except NaN)
//! - NaN:        0x7FFA_0000_0000_0000 (canonical NaN, distinct from undefined)
//! - Integer:    0x7FF8_0001_XXXX_XXXX (32-bit signed in lower bits)
//! - Pointer:    0x7FFC_XXXX_XXXX_XXXX (48-bit address, identity only)
//! - Undefined:  0x7FF8_0000_0000_0000
//! - Null:       0x7FF8_0000_0000_0001
//! - True:       0x7FF8_0000_0000_0002
//! - False:      0x7FF8_0000_0000_0003
//! - Hole:       0x7FF8_0000_0000_0004 (uninitialized lexical binding)
//! ```

use std::sync::Arc;

use num_bigint::BigInt;
use otter_vm_bytecode::{Function, NumericRange, TypeSummary};

use crate::environment::Environment;
use crate::error::VmResult;
use crate::generator::JsGenerator;
use crate::interpreter::Interpreter;
use crate::object::{JsObject, PropertyKey};

const QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const TAG_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;
const TAG_NULL: u64 = 0x7FF8_0000_0000_0001;
const TAG_TRUE: u64 = 0x7FF8_0000_0000_0002;
const TAG_FALSE: u64 = 0x7FF8_0000_0000_0003;
const TAG_HOLE: u64 = 0x7FF8_0000_0000_0004;
const TAG_NAN: u64 = 0x7FFA_0000_0000_0000;
const TAG_INT32: u64 = 0x7FF8_0001_0000_0000;
const TAG_POINTER: u64 = 0x7FFC_0000_0000_0000;

#[inline]
fn pointer_bits<T: ?Sized>(ptr: *const T) -> u64 {
    TAG_POINTER | ((ptr as *const u8 as usize as u64) & PAYLOAD_MASK)
}

/// A JavaScript value using NaN-boxing for efficient storage
///
/// `Send + Sync` because all heap-allocated data is behind `Arc`.
#[derive(Clone)]
pub struct Value {
    bits: u64,
    heap_ref: Option<HeapRef>,
}

/// Host function signature. Receives the interpreter (for re-entrant
/// calls), the receiver and the argument list.
pub type NativeFn = Arc<dyn Fn(&mut Interpreter, &Value, &[Value]) -> VmResult<Value> + Send + Sync>;

/// Reference to heap-allocated data
#[derive(Clone)]
pub enum HeapRef {
    /// String value
    String(Arc<str>),
    /// BigInt value
    BigInt(Arc<BigInt>),
    /// Ordinary object or array
    Object(Arc<JsObject>),
    /// Bytecode closure
    Function(Arc<Closure>),
    /// Host function
    NativeFunction(Arc<NativeFunctionObject>),
    /// Generator object
    Generator(Arc<JsGenerator>),
}

impl std::fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeapRef::String(s) => f.debug_tuple("String").field(s).finish(),
            HeapRef::BigInt(b) => f.debug_tuple("BigInt").field(b).finish(),
            HeapRef::Object(o) => f.debug_tuple("Object").field(o).finish(),
            HeapRef::Function(c) => f.debug_tuple("Function").field(c).finish(),
            HeapRef::NativeFunction(n) => f.debug_tuple("NativeFunction").field(&n.name).finish(),
            HeapRef::Generator(g) => f.debug_tuple("Generator").field(g).finish(),
        }
    }
}

/// A function descriptor bound to the environment chain it was created in
pub struct Closure {
    /// Compiled body
    pub function: Arc<Function>,
    /// Captured environment chain (`None` when created outside any block)
    pub env: Option<Arc<Environment>>,
    /// Function object for properties like `.prototype`
    pub object: Arc<JsObject>,
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.function.display_name())
            .field("has_env", &self.env.is_some())
            .finish()
    }
}

/// A host function with an attached object for properties
pub struct NativeFunctionObject {
    /// Function name (for diagnostics)
    pub name: String,
    /// The native function handler
    pub func: NativeFn,
    /// Attached object for properties
    pub object: Arc<JsObject>,
    /// Accepts `new`
    pub constructor: bool,
}

impl Value {
    /// Create undefined value
    #[inline]
    pub const fn undefined() -> Self {
        Self {
            bits: TAG_UNDEFINED,
            heap_ref: None,
        }
    }

    /// Create null value
    #[inline]
    pub const fn null() -> Self {
        Self {
            bits: TAG_NULL,
            heap_ref: None,
        }
    }

    /// The marker stored in lexical bindings before initialization
    #[inline]
    pub const fn hole() -> Self {
        Self {
            bits: TAG_HOLE,
            heap_ref: None,
        }
    }

    /// Create boolean value
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self {
            bits: if b { TAG_TRUE } else { TAG_FALSE },
            heap_ref: None,
        }
    }

    /// Create 32-bit integer value
    #[inline]
    pub fn int32(n: i32) -> Self {
        Self {
            bits: TAG_INT32 | (n as u32 as u64),
            heap_ref: None,
        }
    }

    /// Create number (f64) value
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            return Self::nan();
        }

        // Integral values in i32 range are stored as int32, except -0
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && (n != 0.0 || (1.0_f64 / n).is_sign_positive())
        {
            return Self::int32(n as i32);
        }

        Self {
            bits: n.to_bits(),
            heap_ref: None,
        }
    }

    /// Create NaN value explicitly
    #[inline]
    pub const fn nan() -> Self {
        Self {
            bits: TAG_NAN,
            heap_ref: None,
        }
    }

    /// Create string value
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        let s: Arc<str> = s.into();
        Self {
            bits: pointer_bits(Arc::as_ptr(&s)),
            heap_ref: Some(HeapRef::String(s)),
        }
    }

    /// Create BigInt value
    pub fn bigint(n: BigInt) -> Self {
        let n = Arc::new(n);
        Self {
            bits: pointer_bits(Arc::as_ptr(&n)),
            heap_ref: Some(HeapRef::BigInt(n)),
        }
    }

    /// Create object value
    pub fn object(obj: Arc<JsObject>) -> Self {
        Self {
            bits: pointer_bits(Arc::as_ptr(&obj)),
            heap_ref: Some(HeapRef::Object(obj)),
        }
    }

    /// Create function value
    pub fn function(closure: Arc<Closure>) -> Self {
        Self {
            bits: pointer_bits(Arc::as_ptr(&closure)),
            heap_ref: Some(HeapRef::Function(closure)),
        }
    }

    /// Create generator value
    pub fn generator(generator: Arc<JsGenerator>) -> Self {
        Self {
            bits: pointer_bits(Arc::as_ptr(&generator)),
            heap_ref: Some(HeapRef::Generator(generator)),
        }
    }

    /// Create a host function value
    pub fn native_function<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Interpreter, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self::native(name.into(), Arc::new(f), false)
    }

    /// Create a host function value usable with `new`
    pub fn native_constructor<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Interpreter, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self::native(name.into(), Arc::new(f), true)
    }

    fn native(name: String, func: NativeFn, constructor: bool) -> Self {
        let object = Arc::new(JsObject::new(None));
        object.set(PropertyKey::string("name"), Value::string(name.as_str()));
        if constructor {
            object.set(
                PropertyKey::string("prototype"),
                Value::object(Arc::new(JsObject::new(None))),
            );
        }
        let native = Arc::new(NativeFunctionObject {
            name,
            func,
            object,
            constructor,
        });
        Self {
            bits: pointer_bits(Arc::as_ptr(&native)),
            heap_ref: Some(HeapRef::NativeFunction(native)),
        }
    }

    /// Check if value is undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.bits == TAG_UNDEFINED
    }

    /// Check if value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.bits == TAG_NULL
    }

    /// Check if value is null or undefined
    #[inline]
    pub fn is_nullish(&self) -> bool {
        self.bits == TAG_UNDEFINED || self.bits == TAG_NULL
    }

    /// Check if value is the uninitialized-binding marker
    #[inline]
    pub fn is_hole(&self) -> bool {
        self.bits == TAG_HOLE
    }

    /// Check if value is a boolean
    #[inline]
    pub fn is_boolean(&self) -> bool {
        self.bits == TAG_TRUE || self.bits == TAG_FALSE
    }

    /// Check if value is an integer
    #[inline]
    pub fn is_int32(&self) -> bool {
        (self.bits & 0xFFFF_FFFF_0000_0000) == TAG_INT32
    }

    /// Check if value is NaN
    #[inline]
    pub fn is_nan(&self) -> bool {
        self.bits == TAG_NAN
    }

    /// Check if value is a number (including int32 and NaN)
    #[inline]
    pub fn is_number(&self) -> bool {
        self.is_int32() || self.is_nan() || !self.is_nan_boxed()
    }

    /// Check if value is a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::String(_)))
    }

    /// Check if value is a BigInt
    #[inline]
    pub fn is_bigint(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::BigInt(_)))
    }

    /// Check if value is an object (includes functions, arrays and generators)
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(
            &self.heap_ref,
            Some(
                HeapRef::Object(_)
                    | HeapRef::Function(_)
                    | HeapRef::NativeFunction(_)
                    | HeapRef::Generator(_)
            )
        )
    }

    /// Check if value can be called
    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(
            &self.heap_ref,
            Some(HeapRef::Function(_) | HeapRef::NativeFunction(_))
        )
    }

    /// Check if value is a generator object
    #[inline]
    pub fn is_generator(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::Generator(_)))
    }

    #[inline]
    fn is_nan_boxed(&self) -> bool {
        (self.bits & QUIET_NAN) == QUIET_NAN
    }

    /// Get as boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self.bits {
            TAG_TRUE => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        }
    }

    /// Get as 32-bit integer
    pub fn as_int32(&self) -> Option<i32> {
        if self.is_int32() {
            Some((self.bits & 0xFFFF_FFFF) as i32)
        } else {
            None
        }
    }

    /// Get as number (f64)
    pub fn as_number(&self) -> Option<f64> {
        if self.is_int32() {
            Some((self.bits & 0xFFFF_FFFF) as i32 as f64)
        } else if self.bits == TAG_NAN {
            Some(f64::NAN)
        } else if !self.is_nan_boxed() {
            Some(f64::from_bits(self.bits))
        } else {
            None
        }
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&Arc<str>> {
        match &self.heap_ref {
            Some(HeapRef::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Get as BigInt
    pub fn as_bigint(&self) -> Option<&BigInt> {
        match &self.heap_ref {
            Some(HeapRef::BigInt(b)) => Some(b),
            _ => None,
        }
    }

    /// Get as ordinary object or array
    pub fn as_object(&self) -> Option<&Arc<JsObject>> {
        match &self.heap_ref {
            Some(HeapRef::Object(o)) => Some(o),
            _ => None,
        }
    }

    /// Property storage of any object-like value (functions and generators
    /// included)
    pub fn property_holder(&self) -> Option<&Arc<JsObject>> {
        match &self.heap_ref {
            Some(HeapRef::Object(o)) => Some(o),
            Some(HeapRef::Function(c)) => Some(&c.object),
            Some(HeapRef::NativeFunction(n)) => Some(&n.object),
            Some(HeapRef::Generator(g)) => Some(g.object()),
            _ => None,
        }
    }

    /// Get as bytecode closure
    pub fn as_function(&self) -> Option<&Arc<Closure>> {
        match &self.heap_ref {
            Some(HeapRef::Function(c)) => Some(c),
            _ => None,
        }
    }

    /// Get as host function
    pub fn as_native_function(&self) -> Option<&Arc<NativeFunctionObject>> {
        match &self.heap_ref {
            Some(HeapRef::NativeFunction(n)) => Some(n),
            _ => None,
        }
    }

    /// Get as generator
    pub fn as_generator(&self) -> Option<&Arc<JsGenerator>> {
        match &self.heap_ref {
            Some(HeapRef::Generator(g)) => Some(g),
            _ => None,
        }
    }

    /// Get heap reference
    pub fn heap_ref(&self) -> &Option<HeapRef> {
        &self.heap_ref
    }

    /// Identity comparison (same bits, same allocation)
    pub fn same_identity(&self, other: &Value) -> bool {
        self.bits == other.bits
    }

    /// Convert to boolean (ToBoolean)
    pub fn to_boolean(&self) -> bool {
        match self.bits {
            TAG_UNDEFINED | TAG_NULL | TAG_FALSE | TAG_NAN | TAG_HOLE => false,
            TAG_TRUE => true,
            _ if self.is_int32() => self.bits & 0xFFFF_FFFF != 0,
            _ if !self.is_nan_boxed() => {
                let n = f64::from_bits(self.bits);
                !n.is_nan() && n != 0.0
            }
            _ => match &self.heap_ref {
                Some(HeapRef::String(s)) => !s.is_empty(),
                Some(HeapRef::BigInt(b)) => b.sign() != num_bigint::Sign::NoSign,
                _ => true,
            },
        }
    }

    /// Get the type name (for typeof)
    pub fn type_of(&self) -> &'static str {
        match self.bits {
            TAG_UNDEFINED | TAG_HOLE => "undefined",
            TAG_NULL => "object",
            TAG_TRUE | TAG_FALSE => "boolean",
            TAG_NAN => "number",
            _ if self.is_int32() || !self.is_nan_boxed() => "number",
            _ => match &self.heap_ref {
                Some(HeapRef::String(_)) => "string",
                Some(HeapRef::BigInt(_)) => "bigint",
                Some(HeapRef::Function(_) | HeapRef::NativeFunction(_)) => "function",
                Some(HeapRef::Object(_) | HeapRef::Generator(_)) => "object",
                None => "undefined",
            },
        }
    }

    /// Operand type as seen by operation feedback
    pub fn type_summary(&self) -> TypeSummary {
        match self.bits {
            TAG_UNDEFINED | TAG_NULL | TAG_HOLE => TypeSummary::Oddball,
            TAG_TRUE | TAG_FALSE => TypeSummary::Boolean,
            _ if self.is_int32() => TypeSummary::Numeric(NumericRange::SignedSmall),
            _ if self.is_number() => TypeSummary::Numeric(NumericRange::Number),
            _ => match &self.heap_ref {
                Some(HeapRef::String(_)) => TypeSummary::String,
                Some(HeapRef::BigInt(_)) => TypeSummary::BigInt,
                Some(_) => TypeSummary::Object,
                None => TypeSummary::Any,
            },
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bits {
            TAG_UNDEFINED => write!(f, "undefined"),
            TAG_NULL => write!(f, "null"),
            TAG_TRUE => write!(f, "true"),
            TAG_FALSE => write!(f, "false"),
            TAG_HOLE => write!(f, "<hole>"),
            TAG_NAN => write!(f, "NaN"),
            _ if self.is_int32() => write!(f, "{}", (self.bits & 0xFFFF_FFFF) as i32),
            _ if !self.is_nan_boxed() => write!(f, "{}", f64::from_bits(self.bits)),
            _ => match &self.heap_ref {
                Some(HeapRef::String(s)) => write!(f, "{:?}", s),
                Some(HeapRef::BigInt(b)) => write!(f, "{}n", b),
                Some(HeapRef::Object(o)) if o.is_array() => write!(f, "[object Array]"),
                Some(HeapRef::Object(_)) => write!(f, "[object Object]"),
                Some(HeapRef::Function(c)) => write!(f, "[Function: {}]", c.function.display_name()),
                Some(HeapRef::NativeFunction(n)) => write!(f, "[Function: {}]", n.name),
                Some(HeapRef::Generator(_)) => write!(f, "[object Generator]"),
                None => write!(f, "<unknown>"),
            },
        }
    }
}

impl PartialEq for Value {
    /// Strict equality (`===`)
    fn eq(&self, other: &Self) -> bool {
        // NaN != NaN (IEEE 754)
        if self.bits == TAG_NAN || other.bits == TAG_NAN {
            return false;
        }

        if self.bits == other.bits {
            return true;
        }

        // +0 === -0
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a == b;
        }

        if let (Some(a), Some(b)) = (self.as_string(), other.as_string()) {
            return a == b;
        }

        if let (Some(a), Some(b)) = (self.as_bigint(), other.as_bigint()) {
            return a == b;
        }

        false
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::boolean(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::int32(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}
