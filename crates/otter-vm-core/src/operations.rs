//! Arithmetic, equality and relational operators on values

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive, Zero};

use crate::convert::{Numeric, parse_bigint, to_int32, to_numeric, to_string, to_uint32};
use crate::error::{VmError, VmResult};
use crate::value::Value;

/// Binary arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Exp,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
}

/// Unary numeric operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `~x`
    BitNot,
    /// `x + 1`
    Inc,
    /// `x - 1`
    Dec,
}

/// `ToPrimitive`: objects become their string form
pub fn to_primitive(value: &Value) -> Value {
    if value.is_object() {
        Value::string(to_string(value))
    } else {
        value.clone()
    }
}

/// Evaluate `lhs op rhs`
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    if op == BinaryOp::Add {
        if let (Some(a), Some(b)) = (lhs.as_int32(), rhs.as_int32()) {
            return Ok(match a.checked_add(b) {
                Some(sum) => Value::int32(sum),
                None => Value::number(a as f64 + b as f64),
            });
        }
        let lhs = to_primitive(lhs);
        let rhs = to_primitive(rhs);
        if lhs.is_string() || rhs.is_string() {
            let mut joined = String::from(&*to_string(&lhs));
            joined.push_str(&to_string(&rhs));
            return Ok(Value::string(joined));
        }
        return numeric_binary(op, &lhs, &rhs);
    }
    numeric_binary(op, lhs, rhs)
}

fn numeric_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    match (to_numeric(lhs)?, to_numeric(rhs)?) {
        (Numeric::Number(a), Numeric::Number(b)) => Ok(number_binary(op, a, b)),
        (Numeric::BigInt(a), Numeric::BigInt(b)) => bigint_binary(op, &a, &b).map(Value::bigint),
        _ => Err(VmError::type_error(
            "Cannot mix BigInt and other types, use explicit conversions",
        )),
    }
}

fn number_binary(op: BinaryOp, a: f64, b: f64) -> Value {
    match op {
        BinaryOp::Add => Value::number(a + b),
        BinaryOp::Sub => Value::number(a - b),
        BinaryOp::Mul => Value::number(a * b),
        BinaryOp::Div => Value::number(a / b),
        BinaryOp::Mod => Value::number(a % b),
        BinaryOp::Exp => Value::number(js_pow(a, b)),
        BinaryOp::BitAnd => Value::int32(to_int32(a) & to_int32(b)),
        BinaryOp::BitOr => Value::int32(to_int32(a) | to_int32(b)),
        BinaryOp::BitXor => Value::int32(to_int32(a) ^ to_int32(b)),
        BinaryOp::Shl => Value::int32(to_int32(a).wrapping_shl(to_uint32(b) & 31)),
        BinaryOp::Shr => Value::int32(to_int32(a) >> (to_uint32(b) & 31)),
        BinaryOp::Ushr => Value::number((to_uint32(a) >> (to_uint32(b) & 31)) as f64),
    }
}

fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

fn bigint_binary(op: BinaryOp, a: &BigInt, b: &BigInt) -> VmResult<BigInt> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b.is_zero() => {
            return Err(VmError::range_error("Division by zero"));
        }
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        BinaryOp::Exp => {
            if b.sign() == num_bigint::Sign::Minus {
                return Err(VmError::range_error("Exponent must be non-negative"));
            }
            let exponent = b
                .to_u32()
                .ok_or_else(|| VmError::range_error("Maximum BigInt size exceeded"))?;
            a.pow(exponent)
        }
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::Shl => bigint_shift(a, b, false)?,
        BinaryOp::Shr => bigint_shift(a, b, true)?,
        BinaryOp::Ushr => {
            return Err(VmError::type_error(
                "BigInts have no unsigned right shift, use >> instead",
            ));
        }
    })
}

fn bigint_shift(a: &BigInt, by: &BigInt, right: bool) -> VmResult<BigInt> {
    const MAX_SHIFT: i64 = 1 << 30;
    let mut amount = by
        .to_i64()
        .ok_or_else(|| VmError::range_error("Maximum BigInt size exceeded"))?;
    if right {
        amount = amount
            .checked_neg()
            .ok_or_else(|| VmError::range_error("Maximum BigInt size exceeded"))?;
    }
    if amount > MAX_SHIFT {
        return Err(VmError::range_error("Maximum BigInt size exceeded"));
    }
    Ok(if amount >= 0 {
        a << (amount as usize)
    } else {
        a >> (amount.unsigned_abs().min(MAX_SHIFT as u64 * 2) as usize)
    })
}

/// Evaluate a unary numeric operator
pub fn unary(op: UnaryOp, value: &Value) -> VmResult<Value> {
    Ok(match to_numeric(value)? {
        Numeric::BigInt(b) => Value::bigint(match op {
            UnaryOp::Negate => -b,
            UnaryOp::BitNot => !b,
            UnaryOp::Inc => b + 1u32,
            UnaryOp::Dec => b - 1u32,
        }),
        Numeric::Number(n) => match op {
            UnaryOp::Negate => Value::number(-n),
            UnaryOp::BitNot => Value::int32(!to_int32(n)),
            UnaryOp::Inc => Value::number(n + 1.0),
            UnaryOp::Dec => Value::number(n - 1.0),
        },
    })
}

/// `ToNumeric` as a value
pub fn numeric_value(value: &Value) -> VmResult<Value> {
    Ok(match to_numeric(value)? {
        Numeric::Number(n) => Value::number(n),
        Numeric::BigInt(b) => Value::bigint(b),
    })
}

/// Strict equality (`===`)
pub fn strictly_equal(lhs: &Value, rhs: &Value) -> bool {
    lhs == rhs
}

/// Loose equality (`==`)
pub fn loosely_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_nullish() || rhs.is_nullish() {
        return lhs.is_nullish() && rhs.is_nullish();
    }
    if lhs.is_object() && rhs.is_object() {
        return lhs.same_identity(rhs);
    }
    if lhs.type_of() == rhs.type_of() {
        return lhs == rhs;
    }
    if lhs.is_object() {
        return loosely_equal(&to_primitive(lhs), rhs);
    }
    if rhs.is_object() {
        return loosely_equal(lhs, &to_primitive(rhs));
    }
    if let Some(b) = lhs.as_boolean() {
        return loosely_equal(&Value::int32(i32::from(b)), rhs);
    }
    if let Some(b) = rhs.as_boolean() {
        return loosely_equal(lhs, &Value::int32(i32::from(b)));
    }

    match (lhs.as_bigint(), rhs.as_bigint()) {
        (Some(a), None) => bigint_loosely_equals(a, rhs),
        (None, Some(b)) => bigint_loosely_equals(b, lhs),
        _ => {
            // number vs string
            let a = crate::convert::to_number(lhs).unwrap_or(f64::NAN);
            let b = crate::convert::to_number(rhs).unwrap_or(f64::NAN);
            a == b
        }
    }
}

fn bigint_loosely_equals(a: &BigInt, other: &Value) -> bool {
    if let Some(s) = other.as_string() {
        return parse_bigint(s.trim()).is_ok_and(|b| &b == a);
    }
    match other.as_number() {
        Some(n) => compare_bigint_number(a, n) == Some(Ordering::Equal),
        None => false,
    }
}

fn compare_bigint_number(a: &BigInt, n: f64) -> Option<Ordering> {
    if n.is_nan() {
        return None;
    }
    if n == f64::INFINITY {
        return Some(Ordering::Less);
    }
    if n == f64::NEG_INFINITY {
        return Some(Ordering::Greater);
    }
    let floor = n.floor();
    let whole = BigInt::from_f64(floor)?;
    Some(match a.cmp(&whole) {
        Ordering::Equal if n > floor => Ordering::Less,
        ordering => ordering,
    })
}

/// Abstract relational comparison. `None` when either side is NaN.
pub fn compare(lhs: &Value, rhs: &Value) -> VmResult<Option<Ordering>> {
    let lhs = to_primitive(lhs);
    let rhs = to_primitive(rhs);
    if let (Some(a), Some(b)) = (lhs.as_string(), rhs.as_string()) {
        return Ok(Some(a.encode_utf16().cmp(b.encode_utf16())));
    }
    Ok(match (to_numeric(&lhs)?, to_numeric(&rhs)?) {
        (Numeric::Number(a), Numeric::Number(b)) => a.partial_cmp(&b),
        (Numeric::BigInt(a), Numeric::BigInt(b)) => Some(a.cmp(&b)),
        (Numeric::BigInt(a), Numeric::Number(b)) => compare_bigint_number(&a, b),
        (Numeric::Number(a), Numeric::BigInt(b)) => {
            compare_bigint_number(&b, a).map(Ordering::reverse)
        }
    })
}
