//! Methods of builtin types.
//!
//! Container values are plain data, so methods that change their receiver
//! run through [`call_mutator`] and the evaluator stores the receiver back
//! into the expression it came from.

use super::Args;
use super::functions::{byte_values, decode, encode, sort_values};
use crate::error::{InterpError, InterpResult};
use crate::eval::Interpreter;
use crate::format::format_str;
use crate::ops::{self, py_eq};
use crate::value::Value;

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "encode", "endswith", "find", "format", "index", "isalnum",
    "isalpha", "isdigit", "isspace", "join", "ljust", "lower", "lstrip", "partition", "replace",
    "rjust", "rstrip", "split", "splitlines", "startswith", "strip", "title", "upper", "zfill",
];
const BYTES_METHODS: &[&str] = &["count", "decode", "endswith", "hex", "join", "startswith"];
const INT_METHODS: &[&str] = &["bit_length", "to_bytes"];
const SEQUENCE_METHODS: &[&str] = &["copy", "count", "index"];
const LIST_MUTATORS: &[&str] = &["append", "clear", "extend", "insert", "pop", "remove", "reverse", "sort"];
const DICT_METHODS: &[&str] = &["copy", "get", "items", "keys", "values"];
const DICT_MUTATORS: &[&str] = &["clear", "pop", "popitem", "setdefault", "update"];
const SET_METHODS: &[&str] = &["copy", "difference", "intersection", "union"];
const SET_MUTATORS: &[&str] = &["add", "clear", "discard", "pop", "remove", "update"];

/// Whether `value` has a builtin method `name`.
#[must_use]
pub fn has_method(value: &Value, name: &str) -> bool {
    let tables: &[&[&str]] = match value {
        Value::Str(_) => &[STR_METHODS],
        Value::Bytes(_) => &[BYTES_METHODS],
        Value::Int(_) | Value::Bool(_) => &[INT_METHODS],
        Value::Float(_) => &[&["is_integer"]],
        Value::Complex(..) => &[&["conjugate"]],
        Value::List(_) => &[SEQUENCE_METHODS, LIST_MUTATORS],
        Value::Tuple(_) => &[&["count", "index"]],
        Value::Dict(_) => &[DICT_METHODS, DICT_MUTATORS],
        Value::Set(_) => &[SET_METHODS, SET_MUTATORS],
        _ => &[],
    };
    tables.iter().any(|table| table.contains(&name))
}

/// Whether `value.name(...)` changes `value`.
#[must_use]
pub fn mutates(value: &Value, name: &str) -> bool {
    match value {
        Value::List(_) => LIST_MUTATORS.contains(&name),
        Value::Dict(_) => DICT_MUTATORS.contains(&name),
        Value::Set(_) => SET_MUTATORS.contains(&name),
        _ => false,
    }
}

/// `receiver.name(*args, **kwargs)` for a method that leaves `receiver` alone.
/// Mutating methods run on a copy.
pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> InterpResult<Value> {
    if mutates(receiver, name) {
        let mut copy = receiver.clone();
        return call_mutator(interp, &mut copy, name, args, kwargs);
    }
    let qualified = format!("{}.{name}", receiver.type_name());
    let mut args = Args::new(&qualified, args, kwargs);
    let value = match receiver {
        Value::Str(s) => str_method(interp, s, name, &mut args)?,
        Value::Bytes(b) => bytes_method(interp, b, name, &mut args)?,
        Value::Int(_) | Value::Bool(_) => int_method(receiver.as_int()?, name, &mut args)?,
        Value::Float(v) if name == "is_integer" => {
            args.arity(0, 0)?;
            Value::Bool(v.is_finite() && v.fract() == 0.0)
        }
        Value::Complex(re, im) if name == "conjugate" => {
            args.arity(0, 0)?;
            Value::Complex(*re, -im)
        }
        Value::List(items) | Value::Tuple(items) => sequence_method(receiver, items, name, &args)?,
        Value::Dict(items) => match name {
            "get" => {
                args.arity(1, 2)?;
                let key = args.required(0)?;
                ops::dict_get(items, &key)
                    .cloned()
                    .unwrap_or_else(|| args.positional().get(1).cloned().unwrap_or(Value::None))
            }
            "keys" => Value::List(items.iter().map(|(k, _)| k.clone()).collect()),
            "values" => Value::List(items.iter().map(|(_, v)| v.clone()).collect()),
            "items" => Value::List(
                items
                    .iter()
                    .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            "copy" => receiver.clone(),
            _ => return Err(InterpError::attribute("dict", name)),
        },
        Value::Set(items) => {
            let others = args
                .positional()
                .iter()
                .map(|other| interp.iterate(other))
                .collect::<InterpResult<Vec<_>>>()?;
            let contains = |set: &[Value], item: &Value| set.iter().any(|x| py_eq(x, item));
            match name {
                "copy" => receiver.clone(),
                "union" => Value::Set(ops::dedup(
                    items.iter().cloned().chain(others.into_iter().flatten()).collect(),
                )),
                "intersection" => Value::Set(
                    items
                        .iter()
                        .filter(|item| others.iter().all(|other| contains(other, item)))
                        .cloned()
                        .collect(),
                ),
                "difference" => Value::Set(
                    items
                        .iter()
                        .filter(|item| !others.iter().any(|other| contains(other, item)))
                        .cloned()
                        .collect(),
                ),
                _ => return Err(InterpError::attribute("set", name)),
            }
        }
        Value::Class(class) if name == "mro" => {
            args.arity(0, 0)?;
            let mut order = vec![receiver.clone()];
            order.extend(class.mro.iter().cloned());
            order.push(Value::Builtin("object".into()));
            Value::List(order)
        }
        other => return Err(InterpError::attribute(other.type_name(), name)),
    };
    args.finish()?;
    Ok(value)
}

/// `owner.member(...)` called through the type, as in `int.from_bytes(b)` or
/// `str.upper(s)`.
pub(super) fn call_unbound(
    interp: &mut Interpreter,
    owner: &str,
    member: &str,
    mut args: Args<'_>,
) -> InterpResult<Value> {
    if (owner, member) == ("int", "from_bytes") {
        args.arity(1, 2)?;
        let source = args.required(0)?;
        let order = args.take(1, "byteorder").unwrap_or_else(|| Value::Str("big".into()));
        let signed = args.keyword("signed").is_some_and(|s| s.truthy());
        let bytes = match &source {
            Value::Bytes(b) => b.clone(),
            other => byte_values(interp, other)?,
        };
        let value = from_bytes(&bytes, order.as_str()?, signed)?;
        args.finish()?;
        return Ok(Value::Int(value));
    }
    let receiver = args.required(0)?;
    if receiver.type_name() != owner {
        return Err(InterpError::type_error(format!(
            "descriptor '{member}' for '{owner}' objects doesn't apply to a '{}' object",
            receiver.type_name()
        )));
    }
    let rest = args.positional()[1..].to_vec();
    call_method(interp, &receiver, member, rest, args.into_keywords())
}

/// Run a method that changes `receiver` in place.
pub fn call_mutator(
    interp: &mut Interpreter,
    receiver: &mut Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> InterpResult<Value> {
    let qualified = format!("{}.{name}", receiver.type_name());
    let mut args = Args::new(&qualified, args, kwargs);
    let result = match receiver {
        Value::List(items) => list_mutator(interp, items, name, &mut args)?,
        Value::Dict(items) => dict_mutator(interp, items, name, &mut args)?,
        Value::Set(items) => set_mutator(interp, items, name, &args)?,
        other => return Err(InterpError::attribute(other.type_name(), name)),
    };
    args.finish()?;
    Ok(result)
}

// =============================================================================
// str and bytes
// =============================================================================

fn str_method(interp: &mut Interpreter, s: &str, name: &str, args: &mut Args<'_>) -> InterpResult<Value> {
    let value = match name {
        "join" => {
            args.arity(1, 1)?;
            let parts = interp
                .iterate(&args.required(0)?)?
                .iter()
                .map(|part| match part {
                    Value::Str(p) => Ok(p.clone()),
                    other => Err(InterpError::type_error(format!(
                        "sequence item: expected str instance, {} found",
                        other.type_name()
                    ))),
                })
                .collect::<InterpResult<Vec<_>>>()?;
            Value::Str(parts.join(s))
        }
        "format" => {
            let keywords = args.take_keywords();
            Value::Str(format_str(s, args.positional(), &keywords)?)
        }
        "encode" => {
            args.arity(0, 2)?;
            let encoding = args.take(0, "encoding").unwrap_or_else(|| Value::Str("utf-8".into()));
            args.keyword("errors");
            Value::Bytes(encode(s, encoding.as_str()?)?)
        }
        "upper" => Value::Str(s.to_uppercase()),
        "lower" => Value::Str(s.to_lowercase()),
        "title" => Value::Str(title(s)),
        "capitalize" => {
            let mut chars = s.chars();
            Value::Str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }
        "strip" | "lstrip" | "rstrip" => {
            args.arity(0, 1)?;
            let chars = optional_text(args, 0)?;
            let matches = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(c));
            Value::Str(
                match name {
                    "strip" => s.trim_matches(matches),
                    "lstrip" => s.trim_start_matches(matches),
                    _ => s.trim_end_matches(matches),
                }
                .to_string(),
            )
        }
        "replace" => {
            args.arity(2, 3)?;
            let (old, new) = (args.required(0)?, args.required(1)?);
            let (old, new) = (old.as_str()?, new.as_str()?);
            let count = args.take(2, "count").map_or(Ok(-1), |c| c.as_int())?;
            Value::Str(match usize::try_from(count) {
                Ok(n) => s.replacen(old, new, n),
                Err(_) => s.replace(old, new),
            })
        }
        "split" => {
            args.arity(0, 2)?;
            let sep = args.take(0, "sep").filter(|v| *v != Value::None);
            let limit = args.take(1, "maxsplit").map_or(Ok(-1), |m| m.as_int())?;
            let limit = usize::try_from(limit).ok();
            let parts: Vec<Value> = match &sep {
                Some(sep) => {
                    let sep = sep.as_str()?;
                    if sep.is_empty() {
                        return Err(InterpError::value_error("empty separator"));
                    }
                    match limit {
                        Some(n) => s.splitn(n + 1, sep).map(|p| Value::Str(p.into())).collect(),
                        None => s.split(sep).map(|p| Value::Str(p.into())).collect(),
                    }
                }
                None => split_whitespace(s, limit),
            };
            Value::List(parts)
        }
        "splitlines" => Value::List(s.lines().map(|l| Value::Str(l.into())).collect()),
        "startswith" | "endswith" => {
            args.arity(1, 1)?;
            let candidates = match args.required(0)? {
                Value::Tuple(options) => options,
                single => vec![single],
            };
            let mut hit = false;
            for candidate in &candidates {
                let candidate = candidate.as_str()?;
                hit |= if name == "startswith" {
                    s.starts_with(candidate)
                } else {
                    s.ends_with(candidate)
                };
            }
            Value::Bool(hit)
        }
        "find" | "index" => {
            args.arity(1, 1)?;
            let needle = args.required(0)?;
            match s.find(needle.as_str()?) {
                Some(at) => Value::Int(s[..at].chars().count() as i128),
                None if name == "find" => Value::Int(-1),
                None => return Err(InterpError::value_error("substring not found")),
            }
        }
        "count" => {
            args.arity(1, 1)?;
            let needle = args.required(0)?;
            let needle = needle.as_str()?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Value::Int(n as i128)
        }
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
        "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
        "zfill" => {
            args.arity(1, 1)?;
            let width = usize::try_from(args.required(0)?.as_int()?).unwrap_or(0);
            let len = s.chars().count();
            let (sign, digits) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s),
            };
            Value::Str(format!("{sign}{}{digits}", "0".repeat(width.saturating_sub(len))))
        }
        "center" | "ljust" | "rjust" => {
            args.arity(1, 2)?;
            let width = usize::try_from(args.required(0)?.as_int()?).unwrap_or(0);
            let fill = optional_text(args, 1)?.and_then(|f| f.chars().next()).unwrap_or(' ');
            let gap = width.saturating_sub(s.chars().count());
            let (left, right) = match name {
                "ljust" => (0, gap),
                "rjust" => (gap, 0),
                _ => {
                    let left = gap / 2 + (gap & width & 1);
                    (left, gap - left)
                }
            };
            let pad = |n: usize| fill.to_string().repeat(n);
            Value::Str(format!("{}{s}{}", pad(left), pad(right)))
        }
        "partition" => {
            args.arity(1, 1)?;
            let sep = args.required(0)?;
            let sep = sep.as_str()?;
            let parts = match s.split_once(sep) {
                Some((head, tail)) => [head, sep, tail],
                None => [s, "", ""],
            };
            Value::Tuple(parts.iter().map(|p| Value::Str((*p).into())).collect())
        }
        _ => return Err(InterpError::attribute("str", name)),
    };
    Ok(value)
}

fn optional_text(args: &Args<'_>, i: usize) -> InterpResult<Option<String>> {
    match args.positional().get(i) {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(v.as_str()?.to_string())),
    }
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn split_whitespace(s: &str, limit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if limit.is_some_and(|n| parts.len() == n) {
            parts.push(Value::Str(rest.to_string()));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(Value::Str(rest[..end].to_string()));
        rest = rest[end..].trim_start();
    }
    parts
}

fn bytes_method(interp: &mut Interpreter, b: &[u8], name: &str, args: &mut Args<'_>) -> InterpResult<Value> {
    let bytes_arg = |v: Value| match v {
        Value::Bytes(b) => Ok(b),
        other => Err(InterpError::type_error(format!(
            "a bytes-like object is required, not '{}'",
            other.type_name()
        ))),
    };
    let value = match name {
        "decode" => {
            args.arity(0, 2)?;
            if let Some(encoding) = args.take(0, "encoding") {
                let encoding = encoding.as_str()?.to_ascii_lowercase().replace('_', "-");
                if matches!(encoding.as_str(), "latin-1" | "latin1" | "iso-8859-1") {
                    args.keyword("errors");
                    return Ok(Value::Str(b.iter().map(|&byte| char::from(byte)).collect()));
                }
                if !matches!(encoding.as_str(), "utf-8" | "utf8" | "ascii") {
                    return Err(InterpError::unsupported(format!("encoding {encoding}")));
                }
            }
            args.keyword("errors");
            Value::Str(decode(b)?)
        }
        "hex" => Value::Str(b.iter().map(|byte| format!("{byte:02x}")).collect()),
        "join" => {
            args.arity(1, 1)?;
            let parts = interp
                .iterate(&args.required(0)?)?
                .into_iter()
                .map(bytes_arg)
                .collect::<InterpResult<Vec<_>>>()?;
            Value::Bytes(parts.join(b))
        }
        "startswith" | "endswith" => {
            args.arity(1, 1)?;
            let affix = bytes_arg(args.required(0)?)?;
            Value::Bool(if name == "startswith" {
                b.starts_with(&affix)
            } else {
                b.ends_with(&affix)
            })
        }
        "count" => {
            args.arity(1, 1)?;
            let needle = bytes_arg(args.required(0)?)?;
            let n = if needle.is_empty() {
                b.len() + 1
            } else {
                let mut n = 0;
                let mut at = 0;
                while at + needle.len() <= b.len() {
                    if b[at..].starts_with(&needle) {
                        n += 1;
                        at += needle.len();
                    } else {
                        at += 1;
                    }
                }
                n
            };
            Value::Int(n as i128)
        }
        _ => return Err(InterpError::attribute("bytes", name)),
    };
    Ok(value)
}

// =============================================================================
// Numbers
// =============================================================================

fn int_method(v: i128, name: &str, args: &mut Args<'_>) -> InterpResult<Value> {
    match name {
        "bit_length" => {
            args.arity(0, 0)?;
            Ok(Value::Int(i128::from(128 - v.unsigned_abs().leading_zeros())))
        }
        "to_bytes" => {
            args.arity(0, 2)?;
            let length = args.take(0, "length").map_or(Ok(1), |l| l.as_int())?;
            let order = args.take(1, "byteorder").unwrap_or_else(|| Value::Str("big".into()));
            let signed = args.keyword("signed").is_some_and(|s| s.truthy());
            Ok(Value::Bytes(to_bytes(v, length, order.as_str()?, signed)?))
        }
        _ => Err(InterpError::attribute("int", name)),
    }
}

fn little_endian(order: &str) -> InterpResult<bool> {
    match order {
        "big" => Ok(false),
        "little" => Ok(true),
        _ => Err(InterpError::value_error("byteorder must be either 'little' or 'big'")),
    }
}

/// `int.from_bytes(bytes, order, signed=signed)`
fn from_bytes(bytes: &[u8], order: &str, signed: bool) -> InterpResult<i128> {
    let little = little_endian(order)?;
    if bytes.len() > 16 {
        return Err(InterpError::Overflow {
            message: "int too large to convert".into(),
        });
    }
    let mut buf = [0u8; 16];
    let negative = signed && {
        let top = if little { bytes.last() } else { bytes.first() };
        top.is_some_and(|b| b & 0x80 != 0)
    };
    if negative {
        buf = [0xff; 16];
    }
    if little {
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(i128::from_le_bytes(buf))
    } else {
        buf[16 - bytes.len()..].copy_from_slice(bytes);
        Ok(i128::from_be_bytes(buf))
    }
}

fn to_bytes(v: i128, length: i128, order: &str, signed: bool) -> InterpResult<Vec<u8>> {
    let little = little_endian(order)?;
    let length = usize::try_from(length).map_err(|_| InterpError::value_error("length argument must be non-negative"))?;
    let overflow = || InterpError::Overflow {
        message: "int too big to convert".into(),
    };
    if v < 0 && !signed {
        return Err(InterpError::Overflow {
            message: "can't convert negative int to unsigned".into(),
        });
    }
    let full = v.to_be_bytes();
    let fill = if v < 0 { 0xff } else { 0 };
    let keep = length.min(16);
    let (dropped, kept) = full.split_at(16 - keep);
    let sign_ok = !signed || kept.first().map_or(v == 0, |b| (b & 0x80 != 0) == (v < 0));
    if dropped.iter().any(|b| *b != fill) || !sign_ok {
        return Err(overflow());
    }
    let mut out = vec![fill; length - keep];
    out.extend_from_slice(kept);
    if little {
        out.reverse();
    }
    Ok(out)
}

// =============================================================================
// Containers
// =============================================================================

fn sequence_method(receiver: &Value, items: &[Value], name: &str, args: &Args<'_>) -> InterpResult<Value> {
    match name {
        "copy" if matches!(receiver, Value::List(_)) => Ok(receiver.clone()),
        "count" => {
            args.arity(1, 1)?;
            let needle = args.required(0)?;
            Ok(Value::Int(items.iter().filter(|x| py_eq(x, &needle)).count() as i128))
        }
        "index" => {
            args.arity(1, 1)?;
            let needle = args.required(0)?;
            items
                .iter()
                .position(|x| py_eq(x, &needle))
                .map(|i| Value::Int(i as i128))
                .ok_or_else(|| InterpError::value_error(format!("{} is not in {}", needle.repr(), receiver.type_name())))
        }
        _ => Err(InterpError::attribute(receiver.type_name(), name)),
    }
}

fn list_mutator(
    interp: &mut Interpreter,
    items: &mut Vec<Value>,
    name: &str,
    args: &mut Args<'_>,
) -> InterpResult<Value> {
    let index = |i: i128, len: usize| -> Option<usize> {
        let i = if i < 0 { i + len as i128 } else { i };
        usize::try_from(i).ok().filter(|i| *i < len)
    };
    match name {
        "append" => {
            args.arity(1, 1)?;
            items.push(args.required(0)?);
        }
        "extend" => {
            args.arity(1, 1)?;
            let more = interp.iterate(&args.required(0)?)?;
            items.extend(more);
        }
        "insert" => {
            args.arity(2, 2)?;
            let at = args.required(0)?.as_int()?;
            let len = items.len() as i128;
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            items.insert(at as usize, args.required(1)?);
        }
        "pop" => {
            args.arity(0, 1)?;
            if items.is_empty() {
                return Err(InterpError::IndexError {
                    type_name: "pop from empty list".into(),
                });
            }
            let at = args.positional().first().map_or(Ok(-1), Value::as_int)?;
            let at = index(at, items.len()).ok_or_else(|| InterpError::IndexError {
                type_name: "pop index".into(),
            })?;
            return Ok(items.remove(at));
        }
        "remove" => {
            args.arity(1, 1)?;
            let needle = args.required(0)?;
            let at = items
                .iter()
                .position(|x| py_eq(x, &needle))
                .ok_or_else(|| InterpError::value_error("list.remove(x): x not in list"))?;
            items.remove(at);
        }
        "clear" => items.clear(),
        "reverse" => items.reverse(),
        "sort" => {
            args.arity(0, 0)?;
            let key = args.keyword("key").filter(|k| *k != Value::None);
            let reverse = args.keyword("reverse").is_some_and(|r| r.truthy());
            *items = sort_values(interp, std::mem::take(items), key.as_ref(), reverse)?;
        }
        _ => return Err(InterpError::attribute("list", name)),
    }
    Ok(Value::None)
}

fn dict_mutator(
    interp: &mut Interpreter,
    items: &mut Vec<(Value, Value)>,
    name: &str,
    args: &mut Args<'_>,
) -> InterpResult<Value> {
    let missing = |key: &Value| InterpError::KeyError { key: key.repr() };
    match name {
        "update" => {
            args.arity(0, 1)?;
            if let Some(source) = args.positional().first().cloned() {
                let pairs = match source {
                    Value::Dict(pairs) => pairs,
                    other => interp
                        .iterate(&other)?
                        .iter()
                        .map(|pair| {
                            let pair = interp.iterate(pair)?;
                            <[Value; 2]>::try_from(pair)
                                .map(|[k, v]| (k, v))
                                .map_err(|_| InterpError::value_error("dictionary update sequence element has wrong length"))
                        })
                        .collect::<InterpResult<Vec<_>>>()?,
                };
                for (key, value) in pairs {
                    ops::dict_insert(items, key, value);
                }
            }
            for (key, value) in args.take_keywords() {
                ops::dict_insert(items, Value::Str(key), value);
            }
            Ok(Value::None)
        }
        "pop" => {
            args.arity(1, 2)?;
            let key = args.required(0)?;
            match items.iter().position(|(k, _)| py_eq(k, &key)) {
                Some(at) => Ok(items.remove(at).1),
                None => args.positional().get(1).cloned().ok_or_else(|| missing(&key)),
            }
        }
        "setdefault" => {
            args.arity(1, 2)?;
            let key = args.required(0)?;
            if let Some(found) = ops::dict_get(items, &key) {
                return Ok(found.clone());
            }
            let default = args.positional().get(1).cloned().unwrap_or(Value::None);
            items.push((key, default.clone()));
            Ok(default)
        }
        "popitem" => {
            args.arity(0, 0)?;
            let (key, value) = items.pop().ok_or_else(|| InterpError::KeyError {
                key: "'popitem(): dictionary is empty'".into(),
            })?;
            Ok(Value::Tuple(vec![key, value]))
        }
        "clear" => {
            items.clear();
            Ok(Value::None)
        }
        _ => Err(InterpError::attribute("dict", name)),
    }
}

fn set_mutator(interp: &mut Interpreter, items: &mut Vec<Value>, name: &str, args: &Args<'_>) -> InterpResult<Value> {
    let position = |items: &[Value], needle: &Value| items.iter().position(|x| py_eq(x, needle));
    match name {
        "add" => {
            args.arity(1, 1)?;
            let item = args.required(0)?;
            if position(items, &item).is_none() {
                items.push(item);
            }
        }
        "update" => {
            for source in args.positional() {
                for item in interp.iterate(source)? {
                    if position(items, &item).is_none() {
                        items.push(item);
                    }
                }
            }
        }
        "discard" | "remove" => {
            args.arity(1, 1)?;
            let item = args.required(0)?;
            match position(items, &item) {
                Some(at) => {
                    items.remove(at);
                }
                None if name == "remove" => return Err(InterpError::KeyError { key: item.repr() }),
                None => {}
            }
        }
        "pop" => {
            args.arity(0, 0)?;
            if items.is_empty() {
                return Err(InterpError::KeyError {
                    key: "'pop from an empty set'".into(),
                });
            }
            return Ok(items.remove(0));
        }
        "clear" => items.clear(),
        _ => return Err(InterpError::attribute("set", name)),
    }
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn eval(src: &str) -> Value {
        Interpreter::new().eval_source(src).unwrap()
    }

    fn s(text: &str) -> Value {
        Value::Str(text.into())
    }

    #[rstest]
    #[case("'-'.join(['a', 'b'])", s("a-b"))]
    #[case("'{:>3}|{!r}'.format(7, 'q')", s("  7|'q'"))]
    #[case("'{a}{0}'.format(1, a=2)", s("21"))]
    #[case("'  x y  '.strip()", s("x y"))]
    #[case("'xxhixx'.strip('x')", s("hi"))]
    #[case("'a,b,c'.split(',', 1)", Value::List(vec![s("a"), s("b,c")]))]
    #[case("' a  b '.split()", Value::List(vec![s("a"), s("b")]))]
    #[case("'aaa'.replace('a', 'b', 2)", s("bba"))]
    #[case("'hello'.find('l')", Value::Int(2))]
    #[case("'hello'.find('z')", Value::Int(-1))]
    #[case("'-5'.zfill(4)", s("-005"))]
    #[case("'ab'.center(5, '*')", s("**ab*"))]
    #[case("'hello world'.title()", s("Hello World"))]
    #[case("'file.py'.endswith(('.txt', '.py'))", Value::Bool(true))]
    #[case("'a=b'.partition('=')", Value::Tuple(vec![s("a"), s("="), s("b")]))]
    #[case("'h\u{e9}'.encode()", Value::Bytes("h\u{e9}".as_bytes().to_vec()))]
    #[case("b'hi'.decode('utf-8')", s("hi"))]
    #[case("b'\\xff'.hex()", s("ff"))]
    #[case("str.upper('a')", s("A"))]
    #[case("(255).bit_length()", Value::Int(8))]
    #[case("(1.0).is_integer()", Value::Bool(true))]
    #[case("[1, 2, 1].count(1)", Value::Int(2))]
    #[case("(1, 2).index(2)", Value::Int(1))]
    #[case("{'a': 1}.get('b', 0)", Value::Int(0))]
    #[case("list({'a': 1}.items())", Value::List(vec![Value::Tuple(vec![s("a"), Value::Int(1)])]))]
    fn test_pure_methods(#[case] src: &str, #[case] expected: Value) {
        assert_eq!(eval(src), expected);
    }

    #[rstest]
    #[case("int.from_bytes(b'\\x01\\x00', 'big')", 256)]
    #[case("int.from_bytes(b'\\x01\\x00', 'little')", 1)]
    #[case("int.from_bytes(b'\\xff', 'big', signed=True)", -1)]
    #[case("int.from_bytes([1, 2], byteorder='big')", 258)]
    #[case("int.from_bytes(b'', 'big')", 0)]
    fn test_from_bytes(#[case] src: &str, #[case] expected: i128) {
        assert_eq!(eval(src), Value::Int(expected));
    }

    #[test]
    fn test_to_bytes() {
        assert_eq!(eval("(258).to_bytes(2, 'big')"), Value::Bytes(vec![1, 2]));
        assert_eq!(eval("(258).to_bytes(3, 'little')"), Value::Bytes(vec![2, 1, 0]));
        assert_eq!(eval("(-1).to_bytes(2, 'big', signed=True)"), Value::Bytes(vec![0xff, 0xff]));
        assert!(Interpreter::new().eval_source("(256).to_bytes(1, 'big')").is_err());
        assert!(Interpreter::new().eval_source("(128).to_bytes(1, 'big', signed=True)").is_err());
    }

    #[test]
    fn test_mutators_write_back() {
        let interp = Interpreter::run_source(
            "xs = [3, 1]\nxs.append(2)\nxs.sort()\nlast = xs.pop()\n\
             d = {}\nd.update(a=1)\nd.setdefault('b', 2)\n\
             s = set()\ns.add(1)\ns.add(1)\ns.discard(5)\n",
        )
        .unwrap();
        assert_eq!(interp.global("xs"), Some(&Value::List(vec![Value::Int(1), Value::Int(2)])));
        assert_eq!(interp.global("last"), Some(&Value::Int(3)));
        assert_eq!(
            interp.global("d"),
            Some(&Value::Dict(vec![(s("a"), Value::Int(1)), (s("b"), Value::Int(2))]))
        );
        assert_eq!(interp.global("s"), Some(&Value::Set(vec![Value::Int(1)])));
    }

    #[test]
    fn test_bound_mutator_acts_on_copy() {
        let interp = Interpreter::run_source("xs = [1]\nadd = xs.append\nadd(2)\n").unwrap();
        assert_eq!(interp.global("xs"), Some(&Value::List(vec![Value::Int(1)])));
    }

    #[rstest]
    #[case("[].pop()")]
    #[case("[1].remove(2)")]
    #[case("{}.pop('k')")]
    #[case("b'\\xff'.decode()")]
    #[case("'x'.nope()")]
    #[case("str.upper(1)")]
    fn test_method_errors(#[case] src: &str) {
        assert!(Interpreter::new().eval_source(src).is_err());
    }
}
