//! Value conversions
//!
//! The abstract operations the interpreter needs (`ToNumber`, `ToNumeric`,
//! `ToString`, `ToInt32`, `ToPropertyKey`), plus the `FromValue` /
//! `IntoValue` traits host functions use to marshal their parameters.
//!
//! Objects convert through a fixed primitive form (arrays join their
//! elements, functions print as native code, everything else is
//! `[object Object]`); user-defined `valueOf`/`toString` are not consulted.

use std::sync::Arc;

use num_bigint::BigInt;

use crate::error::{VmError, VmResult};
use crate::object::{JsObject, PropertyKey};
use crate::value::{HeapRef, Value};

/// Result of `ToNumeric`
#[derive(Debug, Clone, PartialEq)]
pub enum Numeric {
    /// An IEEE double
    Number(f64),
    /// An arbitrary-precision integer
    BigInt(BigInt),
}

/// `ToNumber`
pub fn to_number(value: &Value) -> VmResult<f64> {
    if let Some(n) = value.as_number() {
        return Ok(n);
    }
    if value.is_undefined() || value.is_hole() {
        return Ok(f64::NAN);
    }
    if value.is_null() {
        return Ok(0.0);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(if b { 1.0 } else { 0.0 });
    }
    if let Some(s) = value.as_string() {
        return Ok(string_to_number(s));
    }
    if value.is_bigint() {
        return Err(VmError::type_error("Cannot convert a BigInt value to a number"));
    }
    Ok(string_to_number(&to_string(value)))
}

/// `ToNumeric`: numbers stay numbers, BigInts stay BigInts
pub fn to_numeric(value: &Value) -> VmResult<Numeric> {
    match value.as_bigint() {
        Some(b) => Ok(Numeric::BigInt(b.clone())),
        None => to_number(value).map(Numeric::Number),
    }
}

/// Parse a string per `StringToNumber`
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let radix = |prefix_len: usize, radix: u32| -> f64 {
        let digits = &trimmed[prefix_len..];
        if digits.is_empty() {
            return f64::NAN;
        }
        let mut acc = 0.0_f64;
        for c in digits.chars() {
            match c.to_digit(radix) {
                Some(d) => acc = acc * radix as f64 + d as f64,
                None => return f64::NAN,
            }
        }
        acc
    };

    let lower = trimmed.get(..2).map(str::to_ascii_lowercase);
    match lower.as_deref() {
        Some("0x") => return radix(2, 16),
        Some("0o") => return radix(2, 8),
        Some("0b") => return radix(2, 2),
        _ => {}
    }

    let unsigned = trimmed
        .strip_prefix(['+', '-'])
        .unwrap_or(trimmed);
    if unsigned == "Infinity" {
        return if trimmed.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    // Rust also accepts "inf" and "nan", which JS does not
    let well_formed = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !well_formed {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// `Number::toString` with radix 10
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n < 0.0 {
        return format!("-{}", number_to_string(-n));
    }

    // Shortest round-trip digits and decimal exponent
    let formatted = format!("{:e}", n);
    let (mantissa, exponent) = formatted.split_once('e').unwrap_or((formatted.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let k = digits.len() as i32;
    let point = exponent + 1;

    if k <= point && point <= 21 {
        format!("{}{}", digits, "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{}.{}", int, frac)
    } else if -6 < point && point <= 0 {
        format!("0.{}{}", "0".repeat((-point) as usize), digits)
    } else {
        let e = point - 1;
        let sign = if e >= 0 { '+' } else { '-' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{}e{}{}", first, sign, e.abs())
        } else {
            format!("{}.{}e{}{}", first, rest, sign, e.abs())
        }
    }
}

/// `ToString`
pub fn to_string(value: &Value) -> Arc<str> {
    if let Some(s) = value.as_string() {
        return Arc::clone(s);
    }
    if value.is_undefined() || value.is_hole() {
        return Arc::from("undefined");
    }
    if value.is_null() {
        return Arc::from("null");
    }
    if let Some(b) = value.as_boolean() {
        return Arc::from(if b { "true" } else { "false" });
    }
    if let Some(n) = value.as_int32() {
        return Arc::from(n.to_string());
    }
    if let Some(n) = value.as_number() {
        return Arc::from(number_to_string(n));
    }
    match value.heap_ref() {
        Some(HeapRef::BigInt(b)) => Arc::from(b.to_string()),
        Some(HeapRef::Object(o)) if o.is_array() => Arc::from(join_elements(o)),
        Some(HeapRef::Function(c)) => Arc::from(format!(
            "function {}() {{ [native code] }}",
            c.function.name.as_deref().unwrap_or("")
        )),
        Some(HeapRef::NativeFunction(n)) => {
            Arc::from(format!("function {}() {{ [native code] }}", n.name))
        }
        Some(HeapRef::Generator(_)) => Arc::from("[object Generator]"),
        _ => Arc::from("[object Object]"),
    }
}

fn join_elements(array: &JsObject) -> String {
    array
        .elements()
        .iter()
        .map(|v| {
            if v.is_nullish() {
                String::new()
            } else {
                to_string(v).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// `ToPropertyKey`
pub fn to_property_key(value: &Value) -> PropertyKey {
    if let Some(i) = value.as_int32() {
        if i >= 0 {
            return PropertyKey::Index(i as u32);
        }
    }
    match value.as_string() {
        Some(s) => PropertyKey::from_shared(Arc::clone(s)),
        None => PropertyKey::from_shared(to_string(value)),
    }
}

/// ES2023 ToInt32 abstract operation.
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// ES2023 ToUint32 abstract operation.
pub fn to_uint32(n: f64) -> u32 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// Parse the decimal text of a BigInt literal
pub fn parse_bigint(text: &str) -> VmResult<BigInt> {
    text.parse::<BigInt>()
        .map_err(|_| VmError::syntax_error(format!("Cannot convert {} to a BigInt", text)))
}

/// Convert a JS `Value` into a Rust type.
///
/// Used by host functions for parameter conversion.
pub trait FromValue: Sized {
    /// Convert from a JS Value, returning VmError on type mismatch.
    fn from_value(value: &Value) -> Result<Self, VmError>;
}

/// Convert a Rust type into a JS `Value`.
pub trait IntoValue {
    /// Convert into a JS Value.
    fn into_value(self) -> Value;
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, VmError> {
        to_number(value)
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, VmError> {
        match value.as_int32() {
            Some(n) => Ok(n),
            None => to_number(value).map(to_int32),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, VmError> {
        Ok(value.to_boolean())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, VmError> {
        Ok(to_string(value).to_string())
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, VmError> {
        Ok(value.clone())
    }
}

impl FromValue for Arc<JsObject> {
    fn from_value(value: &Value) -> Result<Self, VmError> {
        value
            .as_object()
            .cloned()
            .ok_or_else(|| VmError::type_error("Expected an object"))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, VmError> {
        if value.is_nullish() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::number(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::int32(self)
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::boolean(self)
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::string(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::string(self)
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::undefined()
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::undefined(),
        }
    }
}
