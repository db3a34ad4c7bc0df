//! Operators, comparisons and subscripts.

use crate::error::{InterpError, InterpResult};
use crate::value::Value;
use shroud_parser::ast::{BinOp, CmpOp, UnaryOp};
use std::cmp::Ordering;

/// A number promoted to a common representation.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i128),
    Float(f64),
    Complex(f64, f64),
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(i128::from(*b))),
        Value::Int(v) => Some(Num::Int(*v)),
        Value::Float(v) => Some(Num::Float(*v)),
        Value::Complex(re, im) => Some(Num::Complex(*re, *im)),
        _ => None,
    }
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) | Self::Complex(v, _) => v,
        }
    }

    fn as_complex(self) -> (f64, f64) {
        match self {
            Self::Complex(re, im) => (re, im),
            other => (other.as_f64(), 0.0),
        }
    }
}

fn overflow() -> InterpError {
    InterpError::Overflow {
        message: "integer result too large".into(),
    }
}

fn unsupported_operands(op: &str, left: &Value, right: &Value) -> InterpError {
    InterpError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

/// `left <op> right`
pub fn binary(left: &Value, op: BinOp, right: &Value) -> InterpResult<Value> {
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        match op {
            BinOp::BitAnd => return Ok(Value::Bool(*a & *b)),
            BinOp::BitOr => return Ok(Value::Bool(*a | *b)),
            BinOp::BitXor => return Ok(Value::Bool(*a ^ *b)),
            _ => {}
        }
    }
    match (num(left), num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => int_op(a, op, b).map_err(|e| match e {
            InterpError::TypeError { .. } => unsupported_operands(op.symbol(), left, right),
            other => other,
        }),
        (Some(a @ Num::Complex(..)), Some(b)) | (Some(a), Some(b @ Num::Complex(..))) => {
            complex_op(a.as_complex(), op, b.as_complex())
                .map_err(|e| with_operands(e, op, left, right))
        }
        (Some(a), Some(b)) => {
            float_op(a.as_f64(), op, b.as_f64()).map_err(|e| with_operands(e, op, left, right))
        }
        _ => sequence_op(left, op, right),
    }
}

fn with_operands(error: InterpError, op: BinOp, left: &Value, right: &Value) -> InterpError {
    match error {
        InterpError::TypeError { .. } => unsupported_operands(op.symbol(), left, right),
        other => other,
    }
}

/// Floor division rounding toward negative infinity.
fn floor_div(a: i128, b: i128) -> InterpResult<i128> {
    if b == 0 {
        return Err(InterpError::ZeroDivision);
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    Ok(if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q })
}

fn floor_mod(a: i128, b: i128) -> InterpResult<i128> {
    if b == 0 {
        return Err(InterpError::ZeroDivision);
    }
    let r = a.checked_rem(b).unwrap_or(0);
    Ok(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn int_op(a: i128, op: BinOp, b: i128) -> InterpResult<Value> {
    let v = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mult => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(InterpError::ZeroDivision);
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => floor_div(a, b)?,
        BinOp::Mod => floor_mod(a, b)?,
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(InterpError::ZeroDivision);
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::LShift => {
            if b < 0 {
                return Err(InterpError::value_error("negative shift count"));
            }
            if a == 0 {
                0
            } else {
                let shift = u32::try_from(b).ok().filter(|s| *s < 127).ok_or_else(overflow)?;
                let v = a << shift;
                if v >> shift != a {
                    return Err(overflow());
                }
                v
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(InterpError::value_error("negative shift count"));
            }
            a >> b.min(127)
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::MatMult => return Err(InterpError::type_error("@")),
    };
    Ok(Value::Int(v))
}

fn float_op(a: f64, op: BinOp, b: f64) -> InterpResult<Value> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mult => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(InterpError::ZeroDivision);
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(InterpError::ZeroDivision);
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(InterpError::ZeroDivision);
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(InterpError::ZeroDivision);
            }
            if a < 0.0 && b.fract() != 0.0 {
                let (re, im) = complex_pow((a, 0.0), (b, 0.0));
                return Ok(Value::Complex(re, im));
            }
            a.powf(b)
        }
        _ => return Err(InterpError::type_error("float operands")),
    };
    Ok(Value::Float(v))
}

fn complex_pow(base: (f64, f64), exp: (f64, f64)) -> (f64, f64) {
    if base == (0.0, 0.0) {
        return if exp == (0.0, 0.0) { (1.0, 0.0) } else { (0.0, 0.0) };
    }
    let modulus = base.0.hypot(base.1);
    let arg = base.1.atan2(base.0);
    let log_re = modulus.ln();
    let re = exp.0 * log_re - exp.1 * arg;
    let im = exp.1 * log_re + exp.0 * arg;
    let scale = re.exp();
    (scale * im.cos(), scale * im.sin())
}

fn complex_op(a: (f64, f64), op: BinOp, b: (f64, f64)) -> InterpResult<Value> {
    let (re, im) = match op {
        BinOp::Add => (a.0 + b.0, a.1 + b.1),
        BinOp::Sub => (a.0 - b.0, a.1 - b.1),
        BinOp::Mult => (a.0 * b.0 - a.1 * b.1, a.0 * b.1 + a.1 * b.0),
        BinOp::Div => {
            let denom = b.0 * b.0 + b.1 * b.1;
            if denom == 0.0 {
                return Err(InterpError::ZeroDivision);
            }
            (
                (a.0 * b.0 + a.1 * b.1) / denom,
                (a.1 * b.0 - a.0 * b.1) / denom,
            )
        }
        BinOp::Pow => complex_pow(a, b),
        _ => return Err(InterpError::type_error("complex operands")),
    };
    Ok(Value::Complex(re, im))
}

fn repeat<T: Clone>(items: &[T], count: &Value) -> InterpResult<Vec<T>> {
    let n = count.as_int()?;
    let n = usize::try_from(n.max(0)).map_err(|_| overflow())?;
    Ok(std::iter::repeat(items).take(n).flatten().cloned().collect())
}

fn sequence_op(left: &Value, op: BinOp, right: &Value) -> InterpResult<Value> {
    let out = match (left, op, right) {
        (Value::Str(a), BinOp::Add, Value::Str(b)) => Value::Str(format!("{a}{b}")),
        (Value::Bytes(a), BinOp::Add, Value::Bytes(b)) => Value::Bytes([a.as_slice(), b.as_slice()].concat()),
        (Value::List(a), BinOp::Add, Value::List(b)) => Value::List([a.as_slice(), b.as_slice()].concat()),
        (Value::Tuple(a), BinOp::Add, Value::Tuple(b)) => Value::Tuple([a.as_slice(), b.as_slice()].concat()),
        (Value::Str(s), BinOp::Mult, n) | (n, BinOp::Mult, Value::Str(s)) if n.is_number() => {
            let chars: Vec<char> = s.chars().collect();
            Value::Str(repeat(&chars, n)?.into_iter().collect())
        }
        (Value::Bytes(b), BinOp::Mult, n) | (n, BinOp::Mult, Value::Bytes(b)) if n.is_number() => {
            Value::Bytes(repeat(b, n)?)
        }
        (Value::List(items), BinOp::Mult, n) | (n, BinOp::Mult, Value::List(items)) if n.is_number() => {
            Value::List(repeat(items, n)?)
        }
        (Value::Tuple(items), BinOp::Mult, n) | (n, BinOp::Mult, Value::Tuple(items)) if n.is_number() => {
            Value::Tuple(repeat(items, n)?)
        }
        (Value::Set(a), BinOp::BitOr, Value::Set(b)) => {
            Value::Set(dedup(a.iter().chain(b).cloned().collect()))
        }
        (Value::Set(a), BinOp::BitAnd, Value::Set(b)) => {
            Value::Set(a.iter().filter(|v| contains(b, v)).cloned().collect())
        }
        (Value::Set(a), BinOp::Sub, Value::Set(b)) => {
            Value::Set(a.iter().filter(|v| !contains(b, v)).cloned().collect())
        }
        (Value::Dict(a), BinOp::BitOr, Value::Dict(b)) => {
            let mut items = a.clone();
            for (k, v) in b {
                dict_insert(&mut items, k.clone(), v.clone());
            }
            Value::Dict(items)
        }
        _ => return Err(unsupported_operands(op.symbol(), left, right)),
    };
    Ok(out)
}

/// `<op> operand` for the arithmetic unary operators.
pub fn unary(op: UnaryOp, operand: &Value) -> InterpResult<Value> {
    let symbol = match op {
        UnaryOp::Invert => "~",
        UnaryOp::Not => "not",
        UnaryOp::UAdd => "+",
        UnaryOp::USub => "-",
    };
    let bad = || {
        InterpError::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            operand.type_name()
        ))
    };
    match (op, num(operand)) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!operand.truthy())),
        (UnaryOp::UAdd, Some(Num::Int(v))) => Ok(Value::Int(v)),
        (UnaryOp::UAdd, Some(Num::Float(v))) => Ok(Value::Float(v)),
        (UnaryOp::UAdd, Some(Num::Complex(re, im))) => Ok(Value::Complex(re, im)),
        (UnaryOp::USub, Some(Num::Int(v))) => v.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::USub, Some(Num::Float(v))) => Ok(Value::Float(-v)),
        (UnaryOp::USub, Some(Num::Complex(re, im))) => Ok(Value::Complex(-re, -im)),
        (UnaryOp::Invert, Some(Num::Int(v))) => Ok(Value::Int(!v)),
        _ => Err(bad()),
    }
}

// =============================================================================
// Comparisons
// =============================================================================

/// Python `==`: numbers compare by value across types.
#[must_use]
pub fn py_eq(left: &Value, right: &Value) -> bool {
    match (num(left), num(right)) {
        (Some(a), Some(b)) => match (a, b) {
            (Num::Int(a), Num::Int(b)) => a == b,
            (Num::Complex(..), _) | (_, Num::Complex(..)) => a.as_complex() == b.as_complex(),
            _ => a.as_f64() == b.as_f64(),
        },
        _ => match (left, right) {
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| py_eq(x, y))
            }
            (Value::Set(a), Value::Set(b)) => a.len() == b.len() && a.iter().all(|v| contains(b, v)),
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| dict_get(b, k).is_some_and(|other| py_eq(v, other)))
            }
            _ => left == right,
        },
    }
}

/// Ordering for `<` and friends, `None` when the types do not order.
fn py_cmp(left: &Value, right: &Value) -> InterpResult<Ordering> {
    let unorderable = || {
        InterpError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))
    };
    match (num(left), num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(a.cmp(&b)),
        (Some(Num::Complex(..)), _) | (_, Some(Num::Complex(..))) => Err(unorderable()),
        (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()).ok_or_else(unorderable),
        _ => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b) {
                    if !py_eq(x, y) {
                        return py_cmp(x, y);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(unorderable()),
        },
    }
}

/// Sort comparator over Python ordering.
pub fn sort_order(left: &Value, right: &Value) -> InterpResult<Ordering> {
    py_cmp(left, right)
}

fn contains(items: &[Value], needle: &Value) -> bool {
    items.iter().any(|item| py_eq(item, needle))
}

fn membership(needle: &Value, haystack: &Value) -> InterpResult<bool> {
    match haystack {
        Value::Str(s) => Ok(s.contains(needle.as_str()?)),
        Value::Bytes(b) => match needle {
            Value::Bytes(sub) => Ok(sub.is_empty() || b.windows(sub.len()).any(|w| w == sub.as_slice())),
            other => {
                let byte = other.as_int()?;
                Ok(b.iter().any(|x| i128::from(*x) == byte))
            }
        },
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => Ok(contains(items, needle)),
        Value::Dict(items) => Ok(dict_get(items, needle).is_some()),
        Value::Iter(queue) => {
            let mut queue = queue.borrow_mut();
            while let Some(item) = queue.pop_front() {
                if py_eq(&item, needle) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(InterpError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => left == right,
    }
}

/// One link of a comparison chain.
pub fn compare(left: &Value, op: CmpOp, right: &Value) -> InterpResult<bool> {
    Ok(match op {
        CmpOp::Eq => py_eq(left, right),
        CmpOp::NotEq => !py_eq(left, right),
        CmpOp::Lt => py_cmp(left, right)? == Ordering::Less,
        CmpOp::LtE => py_cmp(left, right)? != Ordering::Greater,
        CmpOp::Gt => py_cmp(left, right)? == Ordering::Greater,
        CmpOp::GtE => py_cmp(left, right)? != Ordering::Less,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
        CmpOp::In => membership(left, right)?,
        CmpOp::NotIn => !membership(left, right)?,
    })
}

// =============================================================================
// Containers
// =============================================================================

/// Drop later duplicates, keeping first-seen order.
#[must_use]
pub fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !contains(&out, &item) {
            out.push(item);
        }
    }
    out
}

/// Look `key` up in dict items.
#[must_use]
pub fn dict_get<'a>(items: &'a [(Value, Value)], key: &Value) -> Option<&'a Value> {
    items.iter().find(|(k, _)| py_eq(k, key)).map(|(_, v)| v)
}

/// Insert or replace `key`, keeping the original insertion position.
pub fn dict_insert(items: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match items.iter_mut().find(|(k, _)| py_eq(k, &key)) {
        Some((_, slot)) => *slot = value,
        None => items.push((key, value)),
    }
}

/// The subscript key for `lower:upper:step`.
#[must_use]
pub fn slice_key(lower: Value, upper: Value, step: Value) -> Value {
    Value::Slice(Box::new([lower, upper, step]))
}

fn bound(value: &Value) -> InterpResult<Option<i128>> {
    match value {
        Value::None => Ok(None),
        other => other.as_int().map(Some),
    }
}

/// Indices a slice selects from a sequence of `len` items.
fn slice_indices(bounds: &[Value; 3], len: usize) -> InterpResult<Vec<usize>> {
    let len = len as i128;
    let step = bound(&bounds[2])?.unwrap_or(1);
    if step == 0 {
        return Err(InterpError::value_error("slice step cannot be zero"));
    }
    let clamp = |v: Option<i128>, default: i128, low: i128, high: i128| match v {
        None => default,
        Some(v) if v < 0 => (v + len).max(low),
        Some(v) => v.min(high),
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = clamp(bound(&bounds[0])?, 0, 0, len);
        let stop = clamp(bound(&bounds[1])?, len, 0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = clamp(bound(&bounds[0])?, len - 1, -1, len - 1);
        let stop = clamp(bound(&bounds[1])?, -1, -1, len - 1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

/// `(start, stop)` of a step-less slice, clamped to `0..=len`.
fn contiguous(bounds: &[Value; 3], len: usize) -> InterpResult<(usize, usize)> {
    let resolve = |v: Option<i128>, default: usize| match v {
        None => default,
        Some(v) if v < 0 => usize::try_from(v + len as i128).unwrap_or(0),
        Some(v) => usize::try_from(v).map_or(len, |v| v.min(len)),
    };
    let start = resolve(bound(&bounds[0])?, 0);
    let stop = resolve(bound(&bounds[1])?, len).max(start);
    Ok((start, stop))
}

fn index(key: &Value, len: usize, type_name: &str) -> InterpResult<usize> {
    let i = key.as_int().map_err(|_| {
        InterpError::type_error(format!(
            "{type_name} indices must be integers or slices, not {}",
            key.type_name()
        ))
    })?;
    let resolved = if i < 0 { i + len as i128 } else { i };
    if resolved < 0 || resolved >= len as i128 {
        return Err(InterpError::IndexError {
            type_name: type_name.to_string(),
        });
    }
    Ok(resolved as usize)
}

fn pick<T: Clone>(items: &[T], bounds: &[Value; 3]) -> InterpResult<Vec<T>> {
    Ok(slice_indices(bounds, items.len())?
        .into_iter()
        .map(|i| items[i].clone())
        .collect())
}

/// `container[key]`
pub fn get_item(container: &Value, key: &Value) -> InterpResult<Value> {
    match (container, key) {
        (Value::Dict(items), key) => dict_get(items, key).cloned().ok_or_else(|| InterpError::KeyError {
            key: key.repr(),
        }),
        (Value::List(items), Value::Slice(bounds)) => Ok(Value::List(pick(items, bounds)?)),
        (Value::Tuple(items), Value::Slice(bounds)) => Ok(Value::Tuple(pick(items, bounds)?)),
        (Value::Str(s), Value::Slice(bounds)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(pick(&chars, bounds)?.into_iter().collect()))
        }
        (Value::Bytes(b), Value::Slice(bounds)) => Ok(Value::Bytes(pick(b, bounds)?)),
        (Value::List(items), key) => Ok(items[index(key, items.len(), "list")?].clone()),
        (Value::Tuple(items), key) => Ok(items[index(key, items.len(), "tuple")?].clone()),
        (Value::Str(s), key) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(chars[index(key, chars.len(), "string")?].to_string()))
        }
        (Value::Bytes(b), key) => Ok(Value::Int(i128::from(b[index(key, b.len(), "bytes")?]))),
        (other, _) => Err(InterpError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `container[key] = value`
pub fn set_item(container: &mut Value, key: Value, value: Value) -> InterpResult<()> {
    match container {
        Value::Dict(items) => dict_insert(items, key, value),
        Value::List(items) => match &key {
            Value::Slice(bounds) => {
                if !matches!(bounds[2], Value::None) {
                    return Err(InterpError::unsupported("extended slice assignment"));
                }
                let (start, end) = contiguous(bounds, items.len())?;
                let replacement = match value {
                    Value::List(v) | Value::Tuple(v) => v,
                    other => {
                        return Err(InterpError::type_error(format!(
                            "can only assign an iterable, not {}",
                            other.type_name()
                        )));
                    }
                };
                items.splice(start..end, replacement);
            }
            _ => {
                let i = index(&key, items.len(), "list")?;
                items[i] = value;
            }
        },
        other => {
            return Err(InterpError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            )));
        }
    }
    Ok(())
}

/// `del container[key]`
pub fn del_item(container: &mut Value, key: &Value) -> InterpResult<()> {
    match container {
        Value::Dict(items) => {
            let position = items
                .iter()
                .position(|(k, _)| py_eq(k, key))
                .ok_or_else(|| InterpError::KeyError { key: key.repr() })?;
            items.remove(position);
        }
        Value::List(items) => match key {
            Value::Slice(bounds) => {
                let mut doomed = slice_indices(bounds, items.len())?;
                doomed.sort_unstable();
                for i in doomed.into_iter().rev() {
                    items.remove(i);
                }
            }
            _ => {
                let i = index(key, items.len(), "list")?;
                items.remove(i);
            }
        },
        other => {
            return Err(InterpError::type_error(format!(
                "'{}' object does not support item deletion",
                other.type_name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn int(v: i128) -> Value {
        Value::Int(v)
    }

    #[rstest]
    #[case(int(7), BinOp::FloorDiv, int(-2), int(-4))]
    #[case(int(-7), BinOp::Mod, int(3), int(2))]
    #[case(int(7), BinOp::Mod, int(-3), int(-2))]
    #[case(int(2), BinOp::Pow, int(10), int(1024))]
    #[case(int(1), BinOp::LShift, int(100), int(1 << 100))]
    #[case(int(-1), BinOp::RShift, int(500), int(-1))]
    #[case(Value::Bool(true), BinOp::RShift, Value::Bool(true), int(0))]
    #[case(Value::Bool(true), BinOp::BitOr, Value::Bool(false), Value::Bool(true))]
    #[case(Value::Bool(true), BinOp::Add, Value::Bool(true), int(2))]
    #[case(int(1), BinOp::Div, int(2), Value::Float(0.5))]
    #[case(Value::Float(-7.5), BinOp::Mod, int(2), Value::Float(0.5))]
    #[case(Value::Str("ab".into()), BinOp::Mult, int(2), Value::Str("abab".into()))]
    #[case(Value::List(vec![int(1), int(2)]), BinOp::Mult, int(2), Value::List(vec![int(1), int(2), int(1), int(2)]))]
    #[case(int(3), BinOp::Mult, Value::Bytes(b"a".to_vec()), Value::Bytes(b"aaa".to_vec()))]
    #[case(Value::List(vec![int(1)]), BinOp::Add, Value::List(vec![int(2)]), Value::List(vec![int(1), int(2)]))]
    fn test_binary(#[case] left: Value, #[case] op: BinOp, #[case] right: Value, #[case] expected: Value) {
        assert_eq!(binary(&left, op, &right).unwrap(), expected);
    }

    #[test]
    fn test_complex_arithmetic() {
        let sum = binary(&Value::Float(3.0), BinOp::Add, &Value::Complex(0.0, 4.0)).unwrap();
        assert_eq!(sum, Value::Complex(3.0, 4.0));
        let product = binary(&Value::Complex(0.0, 1.0), BinOp::Mult, &Value::Complex(0.0, 1.0)).unwrap();
        assert_eq!(product, Value::Complex(-1.0, 0.0));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(binary(&int(1), BinOp::FloorDiv, &int(0)), Err(InterpError::ZeroDivision));
        assert!(matches!(binary(&int(i128::MAX), BinOp::Add, &int(1)), Err(InterpError::Overflow { .. })));
        assert!(matches!(binary(&int(1), BinOp::LShift, &int(127)), Err(InterpError::Overflow { .. })));
        assert!(matches!(
            binary(&Value::Str("a".into()), BinOp::Add, &int(1)),
            Err(InterpError::TypeError { .. })
        ));
    }

    #[test]
    fn test_unary_promotes_bool() {
        assert_eq!(unary(UnaryOp::USub, &Value::Bool(true)).unwrap(), int(-1));
        assert_eq!(unary(UnaryOp::UAdd, &Value::Bool(true)).unwrap(), int(1));
        assert_eq!(unary(UnaryOp::Invert, &int(0)).unwrap(), int(-1));
    }

    #[test]
    fn test_equality_across_numbers() {
        assert!(py_eq(&int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &int(1)));
        assert!(py_eq(&Value::Tuple(vec![int(1)]), &Value::Tuple(vec![Value::Float(1.0)])));
        assert!(!py_eq(&Value::Tuple(vec![int(1)]), &Value::List(vec![int(1)])));
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(&int(1), CmpOp::Lt, &Value::Float(1.5)).unwrap());
        assert!(compare(&Value::Str("a".into()), CmpOp::In, &Value::Str("cat".into())).unwrap());
        assert!(compare(&int(2), CmpOp::NotIn, &Value::List(vec![int(1)])).unwrap());
        assert!(compare(&Value::None, CmpOp::Is, &Value::None).unwrap());
        assert!(compare(&Value::Str("a".into()), CmpOp::Lt, &int(1)).is_err());
    }

    #[rstest]
    #[case(Value::None, Value::None, Value::None, vec![0, 1, 2, 3, 4])]
    #[case(int(1), int(3), Value::None, vec![1, 2])]
    #[case(int(-2), Value::None, Value::None, vec![3, 4])]
    #[case(Value::None, Value::None, int(-1), vec![4, 3, 2, 1, 0])]
    #[case(Value::None, Value::None, int(2), vec![0, 2, 4])]
    #[case(int(10), int(20), Value::None, vec![])]
    fn test_slices(#[case] lower: Value, #[case] upper: Value, #[case] step: Value, #[case] expected: Vec<i128>) {
        let list = Value::List((0..5).map(int).collect());
        let got = get_item(&list, &slice_key(lower, upper, step)).unwrap();
        assert_eq!(got, Value::List(expected.into_iter().map(int).collect()));
    }

    #[test]
    fn test_item_access() {
        let list = Value::List(vec![int(1), int(2)]);
        assert_eq!(get_item(&list, &int(-1)).unwrap(), int(2));
        assert!(matches!(get_item(&list, &int(2)), Err(InterpError::IndexError { .. })));
        assert_eq!(get_item(&Value::Bytes(vec![9]), &int(0)).unwrap(), int(9));
        let dict = Value::Dict(vec![(int(1), Value::Str("one".into()))]);
        assert_eq!(get_item(&dict, &Value::Float(1.0)).unwrap(), Value::Str("one".into()));
        assert!(matches!(get_item(&dict, &int(2)), Err(InterpError::KeyError { .. })));
    }

    #[test]
    fn test_slice_assignment() {
        let mut list = Value::List((0..4).map(int).collect());
        set_item(&mut list, slice_key(int(1), int(3), Value::None), Value::List(vec![int(9)])).unwrap();
        assert_eq!(list, Value::List(vec![int(0), int(9), int(3)]));
        del_item(&mut list, &int(0)).unwrap();
        assert_eq!(list, Value::List(vec![int(9), int(3)]));
    }
}
