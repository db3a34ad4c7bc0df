//! Builtin functions.

use super::{Args, ascii, get_attr, namespace, set_attr};
use crate::error::{InterpError, InterpResult};
use crate::eval::Interpreter;
use crate::ops::{self, sort_order};
use crate::value::Value;
use shroud_parser::ast::{BinOp, CmpOp};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

/// Builtin function names.
pub(super) const NAMES: &[&str] = &[
    "__import__",
    "abs",
    "all",
    "any",
    "ascii",
    "bin",
    "callable",
    "chr",
    "divmod",
    "enumerate",
    "filter",
    "format",
    "getattr",
    "hasattr",
    "hex",
    "isinstance",
    "iter",
    "len",
    "map",
    "max",
    "min",
    "next",
    "oct",
    "ord",
    "pow",
    "print",
    "repr",
    "reversed",
    "round",
    "setattr",
    "sorted",
    "sum",
    "type",
    "zip",
];

/// Largest `range` materialised.
const MAX_RANGE: i128 = 10_000_000;

fn iterator(items: impl IntoIterator<Item = Value>) -> Value {
    Value::Iter(Rc::new(RefCell::new(items.into_iter().collect::<VecDeque<_>>())))
}

/// Call builtin function or type constructor `name`.
pub(super) fn call(interp: &mut Interpreter, name: &str, mut args: Args<'_>) -> InterpResult<Value> {
    let value = match name {
        "print" => {
            let sep = args.keyword("sep").map_or(" ".into(), |v| v.to_str());
            let end = args.keyword("end").map_or("\n".into(), |v| v.to_str());
            let text: Vec<String> = args.positional().iter().map(Value::to_str).collect();
            interp.write(&text.join(&sep));
            interp.write(&end);
            Value::None
        }
        "len" => {
            args.arity(1, 1)?;
            let n = match &args.required(0)? {
                Value::Str(s) => s.chars().count(),
                Value::Bytes(b) => b.len(),
                Value::List(items) | Value::Tuple(items) | Value::Set(items) => items.len(),
                Value::Dict(items) => items.len(),
                other => {
                    return Err(InterpError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Value::Int(n as i128)
        }
        "chr" => {
            args.arity(1, 1)?;
            let code = args.required(0)?.as_int()?;
            let c = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| InterpError::value_error("chr() arg not in range(0x110000)"))?;
            Value::Str(c.to_string())
        }
        "ord" => {
            args.arity(1, 1)?;
            match args.required(0)? {
                Value::Str(s) if s.chars().count() == 1 => Value::Int(i128::from(s.chars().next().map_or(0, u32::from))),
                Value::Bytes(b) if b.len() == 1 => Value::Int(i128::from(b[0])),
                other => {
                    return Err(InterpError::type_error(format!(
                        "ord() expected a character, but got {}",
                        other.repr()
                    )));
                }
            }
        }
        "int" => {
            args.arity(0, 2)?;
            let base = args.take(1, "base");
            match args.positional().first() {
                None => Value::Int(0),
                Some(value) => Value::Int(to_int(value, base.as_ref())?),
            }
        }
        "float" => {
            args.arity(0, 1)?;
            match args.positional().first() {
                None => Value::Float(0.0),
                Some(value) => Value::Float(to_float(value)?),
            }
        }
        "complex" => {
            args.arity(0, 2)?;
            let part = |v: Option<&Value>| v.map_or(Ok(0.0), to_float);
            Value::Complex(part(args.positional().first())?, part(args.positional().get(1))?)
        }
        "str" => {
            args.arity(0, 3)?;
            match (args.positional().first(), args.positional().get(1)) {
                (None, _) => Value::Str(String::new()),
                (Some(Value::Bytes(b)), Some(_)) => Value::Str(decode(b)?),
                (Some(value), _) => Value::Str(value.to_str()),
            }
        }
        "repr" => {
            args.arity(1, 1)?;
            Value::Str(args.required(0)?.repr())
        }
        "ascii" => {
            args.arity(1, 1)?;
            Value::Str(ascii(&args.required(0)?))
        }
        "bool" => {
            args.arity(0, 1)?;
            Value::Bool(args.positional().first().is_some_and(Value::truthy))
        }
        "bytes" => {
            args.arity(0, 3)?;
            match args.positional().first().cloned() {
                None => Value::Bytes(Vec::new()),
                Some(Value::Str(s)) => {
                    let encoding = args.take(1, "encoding").ok_or_else(|| {
                        InterpError::type_error("string argument without an encoding")
                    })?;
                    Value::Bytes(encode(&s, encoding.as_str()?)?)
                }
                Some(Value::Int(n)) => Value::Bytes(vec![0; usize::try_from(n).map_err(|_| InterpError::value_error("negative count"))?]),
                Some(other) => Value::Bytes(byte_values(interp, &other)?),
            }
        }
        "list" => Value::List(optional_items(interp, &args)?),
        "tuple" => Value::Tuple(optional_items(interp, &args)?),
        "set" => Value::Set(ops::dedup(optional_items(interp, &args)?)),
        "dict" => {
            let mut items = Vec::new();
            if let Some(source) = args.positional().first().cloned() {
                match source {
                    Value::Dict(pairs) => items = pairs,
                    other => {
                        for pair in interp.iterate(&other)? {
                            let pair = interp.iterate(&pair)?;
                            let [key, value]: [Value; 2] = pair.try_into().map_err(|_| {
                                InterpError::value_error("dictionary update sequence element has wrong length")
                            })?;
                            ops::dict_insert(&mut items, key, value);
                        }
                    }
                }
            }
            for (key, value) in args.into_keywords() {
                ops::dict_insert(&mut items, Value::Str(key), value);
            }
            return Ok(Value::Dict(items));
        }
        "object" => {
            args.arity(0, 0)?;
            namespace(Vec::new())
        }
        "range" => {
            args.arity(1, 3)?;
            let ints: Vec<i128> = args
                .positional()
                .iter()
                .map(Value::as_int)
                .collect::<InterpResult<_>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("arity checked"),
            };
            Value::List(range(start, stop, step)?)
        }
        "map" => {
            let func = args.required(0)?;
            let sources = sources(interp, &args.positional()[1..])?;
            let mut out = Vec::new();
            while let Some(row) = pull_row(&sources) {
                out.push(interp.call(&func, row, Vec::new())?);
            }
            iterator(out)
        }
        "zip" => {
            let sources = sources(interp, args.positional())?;
            let mut out = Vec::new();
            if !sources.is_empty() {
                while let Some(row) = pull_row(&sources) {
                    out.push(Value::Tuple(row));
                }
            }
            iterator(out)
        }
        "iter" => {
            args.arity(1, 1)?;
            Value::Iter(interp.to_iter(&args.required(0)?)?)
        }
        "next" => {
            args.arity(1, 2)?;
            let next = match args.required(0)? {
                Value::Iter(queue) => queue.borrow_mut().pop_front(),
                other => {
                    return Err(InterpError::type_error(format!(
                        "'{}' object is not an iterator",
                        other.type_name()
                    )));
                }
            };
            match (next, args.positional().get(1)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(InterpError::Raised {
                        kind: "StopIteration".into(),
                        message: String::new(),
                        bases: super::exception_bases("StopIteration"),
                    });
                }
            }
        }
        "abs" => {
            args.arity(1, 1)?;
            match args.required(0)? {
                Value::Bool(b) => Value::Int(i128::from(b)),
                Value::Int(v) => Value::Int(v.checked_abs().ok_or_else(|| InterpError::Overflow {
                    message: "integer result too large".into(),
                })?),
                Value::Float(v) => Value::Float(v.abs()),
                Value::Complex(re, im) => Value::Float(re.hypot(im)),
                other => {
                    return Err(InterpError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    )));
                }
            }
        }
        "round" => {
            args.arity(1, 2)?;
            let digits = args.take(1, "ndigits").filter(|d| *d != Value::None);
            round(&args.required(0)?, digits.as_ref())?
        }
        "setattr" => {
            args.arity(3, 3)?;
            let name = args.required(1)?;
            set_attr(&args.required(0)?, name.as_str()?, args.required(2)?)?;
            Value::None
        }
        "getattr" => {
            args.arity(2, 3)?;
            let name = args.required(1)?;
            match (get_attr(&args.required(0)?, name.as_str()?), args.positional().get(2)) {
                (Ok(value), _) => value,
                (Err(InterpError::AttributeError { .. }), Some(default)) => default.clone(),
                (Err(error), _) => return Err(error),
            }
        }
        "hasattr" => {
            args.arity(2, 2)?;
            let name = args.required(1)?;
            Value::Bool(get_attr(&args.required(0)?, name.as_str()?).is_ok())
        }
        "enumerate" => {
            args.arity(1, 2)?;
            let start = args.take(1, "start").map_or(Ok(0), |v| v.as_int())?;
            let items = interp.iterate(&args.required(0)?)?;
            iterator(
                items
                    .into_iter()
                    .zip(start..)
                    .map(|(item, i)| Value::Tuple(vec![Value::Int(i), item])),
            )
        }
        "sum" => {
            args.arity(1, 2)?;
            let start = args.take(1, "start").unwrap_or(Value::Int(0));
            let items = interp.iterate(&args.required(0)?)?;
            items
                .iter()
                .try_fold(start, |acc, item| ops::binary(&acc, BinOp::Add, item))?
        }
        "min" | "max" => return extreme(interp, name == "max", args),
        "sorted" => {
            args.arity(1, 1)?;
            let key = args.keyword("key").filter(|k| *k != Value::None);
            let reverse = args.keyword("reverse").is_some_and(|r| r.truthy());
            let items = interp.iterate(&args.required(0)?)?;
            args.finish()?;
            return Ok(Value::List(sort_values(interp, items, key.as_ref(), reverse)?));
        }
        "reversed" => {
            args.arity(1, 1)?;
            let mut items = interp.iterate(&args.required(0)?)?;
            items.reverse();
            iterator(items)
        }
        "any" | "all" => {
            args.arity(1, 1)?;
            let items = interp.iterate(&args.required(0)?)?;
            Value::Bool(if name == "any" {
                items.iter().any(Value::truthy)
            } else {
                items.iter().all(Value::truthy)
            })
        }
        "filter" => {
            args.arity(2, 2)?;
            let func = args.required(0)?;
            let mut kept = Vec::new();
            for item in interp.iterate(&args.required(1)?)? {
                let keep = match &func {
                    Value::None => item.truthy(),
                    f => interp.call(f, vec![item.clone()], Vec::new())?.truthy(),
                };
                if keep {
                    kept.push(item);
                }
            }
            iterator(kept)
        }
        "isinstance" => {
            args.arity(2, 2)?;
            Value::Bool(isinstance(&args.required(0)?, &args.required(1)?))
        }
        "callable" => {
            args.arity(1, 1)?;
            Value::Bool(matches!(
                args.required(0)?,
                Value::Builtin(_)
                    | Value::Method(..)
                    | Value::Function(_)
                    | Value::BoundMethod(..)
                    | Value::Class(_)
            ))
        }
        "divmod" => {
            args.arity(2, 2)?;
            let (a, b) = (args.required(0)?, args.required(1)?);
            Value::Tuple(vec![
                ops::binary(&a, BinOp::FloorDiv, &b)?,
                ops::binary(&a, BinOp::Mod, &b)?,
            ])
        }
        "pow" => {
            args.arity(2, 3)?;
            let (base, exp) = (args.required(0)?, args.required(1)?);
            match args.positional().get(2) {
                None => ops::binary(&base, BinOp::Pow, &exp)?,
                Some(modulus) => Value::Int(mod_pow(base.as_int()?, exp.as_int()?, modulus.as_int()?)?),
            }
        }
        "hex" | "oct" | "bin" => {
            args.arity(1, 1)?;
            let v = args.required(0)?.as_int()?;
            let sign = if v < 0 { "-" } else { "" };
            let m = v.unsigned_abs();
            Value::Str(match name {
                "hex" => format!("{sign}0x{m:x}"),
                "oct" => format!("{sign}0o{m:o}"),
                _ => format!("{sign}0b{m:b}"),
            })
        }
        "format" => {
            args.arity(1, 2)?;
            let spec = args.positional().get(1).map_or(Ok(String::new()), |s| s.as_str().map(str::to_string))?;
            Value::Str(crate::format::format_value(&args.required(0)?, &spec)?)
        }
        "type" => {
            args.arity(1, 1)?;
            match args.required(0)? {
                Value::Object(object) => match &object.class {
                    Some(class) => Value::Class(Rc::clone(class)),
                    None => Value::Builtin("types.SimpleNamespace".into()),
                },
                other => Value::Builtin(other.type_name().to_string()),
            }
        }
        "__import__" => {
            let module = args.required(0)?;
            return super::import_module(module.as_str()?);
        }
        other => return Err(InterpError::unsupported(format!("builtin {other}()"))),
    };
    args.finish()?;
    Ok(value)
}

fn optional_items(interp: &mut Interpreter, args: &Args<'_>) -> InterpResult<Vec<Value>> {
    args.arity(0, 1)?;
    match args.positional().first() {
        Some(source) => interp.iterate(source),
        None => Ok(Vec::new()),
    }
}

fn range(start: i128, stop: i128, step: i128) -> InterpResult<Vec<Value>> {
    if step == 0 {
        return Err(InterpError::value_error("range() arg 3 must not be zero"));
    }
    let len = if step > 0 {
        (stop - start + step - 1) / step
    } else {
        (start - stop - step - 1) / -step
    };
    if len > MAX_RANGE {
        return Err(InterpError::unsupported("range this large"));
    }
    Ok((0..len.max(0)).map(|i| Value::Int(start + i * step)).collect())
}

/// Iterators over each of `values`.
fn sources(interp: &mut Interpreter, values: &[Value]) -> InterpResult<Vec<Rc<RefCell<VecDeque<Value>>>>> {
    values.iter().map(|v| interp.to_iter(v)).collect()
}

/// One item from each source in turn, stopping at the first exhausted.
/// Sources may be the same iterator.
fn pull_row(sources: &[Rc<RefCell<VecDeque<Value>>>]) -> Option<Vec<Value>> {
    let mut row = Vec::with_capacity(sources.len());
    for source in sources {
        row.push(source.borrow_mut().pop_front()?);
    }
    Some(row)
}

fn parse_int(text: &str, base: u32) -> Option<i128> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let lower = digits.to_ascii_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &digits[2..]),
        (0 | 8, Some("0o")) => (8, &digits[2..]),
        (0 | 2, Some("0b")) => (2, &digits[2..]),
        (0, _) if digits.len() > 1 && digits.starts_with('0') => {
            return digits.chars().all(|c| c == '0').then_some(0);
        }
        (0, _) => (10, digits),
        (base, _) => (base, digits),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, base).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// `int(value, base)`
fn to_int(value: &Value, base: Option<&Value>) -> InterpResult<i128> {
    let invalid = |text: &str, base: u32| {
        InterpError::value_error(format!("invalid literal for int() with base {base}: {}", Value::Str(text.into()).repr()))
    };
    match (value, base) {
        (Value::Str(s), base) => {
            let base = match base {
                Some(b) => u32::try_from(b.as_int()?).map_err(|_| InterpError::value_error("int() base must be >= 2 and <= 36, or 0"))?,
                None => 10,
            };
            if base == 1 || base > 36 {
                return Err(InterpError::value_error("int() base must be >= 2 and <= 36, or 0"));
            }
            parse_int(s, base).ok_or_else(|| invalid(s, base))
        }
        (Value::Bytes(b), base) => {
            let text = String::from_utf8_lossy(b).into_owned();
            to_int(&Value::Str(text), base)
        }
        (_, Some(_)) => Err(InterpError::type_error("int() can't convert non-string with explicit base")),
        (Value::Bool(_) | Value::Int(_), None) => value.as_int(),
        (Value::Float(v), None) => {
            if v.is_nan() {
                return Err(InterpError::value_error("cannot convert float NaN to integer"));
            }
            if v.is_infinite() || v.abs() >= 1.7e38 {
                return Err(InterpError::Overflow {
                    message: "cannot convert float infinity to integer".into(),
                });
            }
            Ok(v.trunc() as i128)
        }
        (other, None) => Err(InterpError::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> InterpResult<f64> {
    match value {
        Value::Bool(_) | Value::Int(_) => Ok(value.as_int()? as f64),
        Value::Float(v) => Ok(*v),
        Value::Str(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
            cleaned.parse::<f64>().map_err(|_| {
                InterpError::value_error(format!("could not convert string to float: {}", value.repr()))
            })
        }
        other => Err(InterpError::type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

/// `round(value[, digits])`
fn round(value: &Value, digits: Option<&Value>) -> InterpResult<Value> {
    match (value, digits) {
        (Value::Bool(_) | Value::Int(_), None) => Ok(Value::Int(value.as_int()?)),
        (Value::Bool(_) | Value::Int(_), Some(digits)) => {
            let digits = digits.as_int()?;
            if digits >= 0 {
                return Ok(Value::Int(value.as_int()?));
            }
            let factor = 10i128
                .checked_pow(u32::try_from(-digits).unwrap_or(u32::MAX))
                .ok_or_else(|| InterpError::Overflow {
                    message: "rounding factor too large".into(),
                })?;
            let v = value.as_int()?;
            let rounded = ((v as f64 / factor as f64).round_ties_even() as i128) * factor;
            Ok(Value::Int(rounded))
        }
        (Value::Float(v), None) => {
            if !v.is_finite() {
                return Err(InterpError::value_error("cannot round a non-finite float to an integer"));
            }
            Ok(Value::Int(v.round_ties_even() as i128))
        }
        (Value::Float(v), Some(digits)) => {
            let digits = i32::try_from(digits.as_int()?).unwrap_or(i32::MAX);
            let factor = 10f64.powi(digits);
            Ok(Value::Float((v * factor).round_ties_even() / factor))
        }
        (other, _) => Err(InterpError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn mod_pow(base: i128, exp: i128, modulus: i128) -> InterpResult<i128> {
    if modulus == 0 {
        return Err(InterpError::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(InterpError::unsupported("modular inverse"));
    }
    let m = modulus.abs();
    let mut result: i128 = 1 % m;
    let mut b = base.rem_euclid(m);
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = result.checked_mul(b).ok_or_else(|| InterpError::Overflow {
                message: "modulus too large".into(),
            })? % m;
        }
        b = b.checked_mul(b).ok_or_else(|| InterpError::Overflow {
            message: "modulus too large".into(),
        })? % m;
        e >>= 1;
    }
    Ok(if modulus < 0 && result != 0 { result + modulus } else { result })
}

/// Bytes of a `bytes()` source iterable.
pub(super) fn byte_values(interp: &mut Interpreter, source: &Value) -> InterpResult<Vec<u8>> {
    interp
        .iterate(source)?
        .iter()
        .map(|v| {
            u8::try_from(v.as_int()?).map_err(|_| InterpError::value_error("bytes must be in range(0, 256)"))
        })
        .collect()
}

/// `str.encode(encoding)`
pub(super) fn encode(text: &str, encoding: &str) -> InterpResult<Vec<u8>> {
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => Ok(text.as_bytes().to_vec()),
        "ascii" | "latin-1" | "latin1" | "iso-8859-1" => {
            let limit = if encoding.eq_ignore_ascii_case("ascii") { 0x7f } else { 0xff };
            text.chars()
                .map(|c| {
                    u8::try_from(u32::from(c))
                        .ok()
                        .filter(|b| u32::from(*b) <= limit)
                        .ok_or_else(|| InterpError::Raised {
                            kind: "UnicodeEncodeError".into(),
                            message: format!("'{encoding}' codec can't encode character {}", ascii(&Value::Str(c.to_string()))),
                            bases: std::iter::once("ValueError".to_string())
                                .chain(super::exception_bases("ValueError"))
                                .collect(),
                        })
                })
                .collect()
        }
        other => Err(InterpError::unsupported(format!("encoding {other}"))),
    }
}

/// `bytes.decode()` as UTF-8.
pub(super) fn decode(bytes: &[u8]) -> InterpResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| InterpError::Raised {
        kind: "UnicodeDecodeError".into(),
        message: format!("'utf-8' codec can't decode byte at position {}", e.utf8_error().valid_up_to()),
        bases: super::exception_bases("UnicodeDecodeError"),
    })
}

/// `sorted(items, key=key, reverse=reverse)`
pub(super) fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> InterpResult<Vec<Value>> {
    let keys = match key {
        Some(key) => items
            .iter()
            .map(|item| interp.call(key, vec![item.clone()], Vec::new()))
            .collect::<InterpResult<Vec<_>>>()?,
        None => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| {
        let (a, b) = if reverse { (b, a) } else { (a, b) };
        sort_order(&keys[a], &keys[b]).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    if let Some(error) = failure {
        return Err(error);
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn extreme(interp: &mut Interpreter, max: bool, mut args: Args<'_>) -> InterpResult<Value> {
    let key = args.keyword("key").filter(|k| *k != Value::None);
    let default = args.keyword("default");
    let items = match args.len() {
        0 => return Err(InterpError::type_error("expected at least 1 argument, got 0")),
        1 => interp.iterate(&args.required(0)?)?,
        _ => args.positional().to_vec(),
    };
    args.finish()?;
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(key) => interp.call(key, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((_, best_key)) => {
                let op = if max { CmpOp::Gt } else { CmpOp::Lt };
                ops::compare(&k, op, best_key)?
            }
        };
        if better {
            best = Some((item, k));
        }
    }
    match (best, default) {
        (Some((item, _)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(InterpError::value_error(format!(
            "{}() arg is an empty sequence",
            if max { "max" } else { "min" }
        ))),
    }
}

/// `isinstance(value, class)` for builtin and user classes.
pub fn isinstance(value: &Value, class: &Value) -> bool {
    match class {
        Value::Tuple(options) => options.iter().any(|c| isinstance(value, c)),
        Value::Class(class) => match value {
            Value::Object(object) => object
                .class
                .as_ref()
                .is_some_and(|c| Rc::ptr_eq(c, class) || c.is_subclass_of(&class.name)),
            _ => false,
        },
        Value::Builtin(name) => match name.as_str() {
            "object" => true,
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            name => value.type_name() == name,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn eval(src: &str) -> Value {
        Interpreter::new().eval_source(src).unwrap()
    }

    #[rstest]
    #[case("int('070')", Value::Int(70))]
    #[case("int(' -12 ')", Value::Int(-12))]
    #[case("int('ff', 16)", Value::Int(255))]
    #[case("int('0x1f', 0)", Value::Int(31))]
    #[case("int(-2.7)", Value::Int(-2))]
    #[case("int(True)", Value::Int(1))]
    #[case("float('1.5')", Value::Float(1.5))]
    #[case("round(2.5)", Value::Int(2))]
    #[case("round(3.5)", Value::Int(4))]
    #[case("round(2.675, 1)", Value::Float(2.7))]
    #[case("abs(3 + 4j)", Value::Float(5.0))]
    #[case("len('h\u{e9}')", Value::Int(2))]
    #[case("chr(233)", Value::Str("\u{e9}".into()))]
    #[case("ord(b'a')", Value::Int(97))]
    #[case("hex(-255)", Value::Str("-0xff".into()))]
    #[case("divmod(-7, 2)", Value::Tuple(vec![Value::Int(-4), Value::Int(1)]))]
    #[case("pow(3, 4, 5)", Value::Int(1))]
    #[case("sum([1, 2, 3], 10)", Value::Int(16))]
    #[case("max([3, 9, 2])", Value::Int(9))]
    #[case("min('bca')", Value::Str("a".into()))]
    #[case("max([], default=0)", Value::Int(0))]
    #[case("sorted([3, 1, 2], reverse=True)", Value::List(vec![Value::Int(3), Value::Int(2), Value::Int(1)]))]
    #[case("list(reversed('ab'))", Value::List(vec![Value::Str("b".into()), Value::Str("a".into())]))]
    #[case("bytes([104, 105])", Value::Bytes(b"hi".to_vec()))]
    #[case("bytes('h\u{e9}', 'utf8')", Value::Bytes("h\u{e9}".as_bytes().to_vec()))]
    #[case("str(b'hi', 'utf8')", Value::Str("hi".into()))]
    #[case("ascii('\u{e9}')", Value::Str("'\\xe9'".into()))]
    #[case("isinstance(True, int)", Value::Bool(true))]
    #[case("any([0, ''])", Value::Bool(false))]
    #[case("list(range(5, 0, -2))", Value::List(vec![Value::Int(5), Value::Int(3), Value::Int(1)]))]
    #[case("list(range(0))", Value::List(vec![]))]
    fn test_builtins(#[case] src: &str, #[case] expected: Value) {
        assert_eq!(eval(src), expected);
    }

    #[test]
    fn test_zip_shares_one_iterator() {
        assert_eq!(
            eval("list(map(''.join, zip(*[iter('abcdef')] * 3)))"),
            Value::List(vec![Value::Str("abc".into()), Value::Str("def".into())])
        );
    }

    #[test]
    fn test_map_with_several_iterables() {
        assert_eq!(
            eval("list(map(lambda a, b: a * b, [1, 2, 3], range(10)))"),
            Value::List(vec![Value::Int(0), Value::Int(2), Value::Int(6)])
        );
    }

    #[test]
    fn test_next_and_enumerate() {
        assert_eq!(
            eval("list(enumerate('ab', 1))"),
            Value::List(vec![
                Value::Tuple(vec![Value::Int(1), Value::Str("a".into())]),
                Value::Tuple(vec![Value::Int(2), Value::Str("b".into())]),
            ])
        );
        assert_eq!(eval("next(iter([]), 'd')"), Value::Str("d".into()));
        let err = Interpreter::new().eval_source("next(iter([]))").unwrap_err();
        assert_eq!(err.kind_name(), "StopIteration");
    }

    #[rstest]
    #[case("int('x')")]
    #[case("int('08', 0)")]
    #[case("chr(-1)")]
    #[case("bytes([256])")]
    #[case("len(5)")]
    #[case("print(nope=1)")]
    fn test_errors(#[case] src: &str) {
        assert!(Interpreter::new().eval_source(src).is_err());
    }

    #[test]
    fn test_sorted_with_key_is_stable() {
        assert_eq!(
            eval("sorted(['bb', 'a', 'cc', 'd'], key=len)"),
            Value::List(vec![
                Value::Str("a".into()),
                Value::Str("d".into()),
                Value::Str("bb".into()),
                Value::Str("cc".into()),
            ])
        );
    }
}
