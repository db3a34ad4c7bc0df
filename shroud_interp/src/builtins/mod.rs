//! Builtin functions, methods of builtin types, and the few standard
//! modules obfuscated programs reach for.
//!
//! Builtins are plain names: `Value::Builtin("len")`, or a dotted name for
//! module members and unbound type methods (`base64.b64decode`,
//! `int.from_bytes`). Dispatch is by string match.

mod functions;
mod methods;
mod modules;

use crate::error::{InterpError, InterpResult};
use crate::eval::Interpreter;
use crate::value::{Class, Object, Value};
use rustc_hash::FxHashMap;
use std::rc::Rc;

pub use functions::isinstance;
pub use methods::{call_method, call_mutator, mutates};
pub use modules::{import_module, module_attr};

/// Names of builtin types, callable as constructors.
const TYPES: &[&str] = &[
    "bool", "bytes", "complex", "dict", "float", "int", "list", "object", "range", "set", "str",
    "tuple",
];

/// Builtin exception classes.
const EXCEPTIONS: &[&str] = &[
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "BaseException",
    "Exception",
    "IndexError",
    "KeyError",
    "LookupError",
    "NameError",
    "NotImplementedError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "StopIteration",
    "TypeError",
    "UnicodeDecodeError",
    "ValueError",
    "ZeroDivisionError",
];

/// The builtin bound to `name`, if any.
#[must_use]
pub fn builtin(name: &str) -> Option<Value> {
    let known = TYPES.contains(&name) || EXCEPTIONS.contains(&name) || functions::NAMES.contains(&name);
    known.then(|| Value::Builtin(name.to_string()))
}

/// Ancestors of a builtin exception class, nearest first.
#[must_use]
pub fn exception_bases(name: &str) -> Vec<String> {
    let chain: &[&str] = match name {
        "BaseException" => &[],
        "Exception" => &["BaseException"],
        "ZeroDivisionError" | "OverflowError" => &["ArithmeticError", "Exception", "BaseException"],
        "IndexError" | "KeyError" => &["LookupError", "Exception", "BaseException"],
        "UnicodeDecodeError" => &["ValueError", "Exception", "BaseException"],
        "RecursionError" | "NotImplementedError" => &["RuntimeError", "Exception", "BaseException"],
        name if EXCEPTIONS.contains(&name) => &["Exception", "BaseException"],
        _ => &[],
    };
    chain.iter().map(|s| (*s).to_string()).collect()
}

/// A new exception instance.
fn exception(name: &str, bases: Vec<String>, args: Vec<Value>) -> Value {
    let object = Object::instance(Rc::new(Class::new(name, bases)));
    object.attrs.borrow_mut().insert("args".into(), Value::Tuple(args));
    Value::Object(Rc::new(object))
}

/// The object an `except ... as e` clause binds for `error`.
#[must_use]
pub fn exception_object(error: &InterpError) -> Value {
    let kind = error.kind_name().to_string();
    let (message, bases) = match error {
        InterpError::Raised { message, bases, .. } => (message.clone(), bases.clone()),
        other => {
            let text = other.to_string();
            let message = text
                .strip_prefix(&format!("{kind}: "))
                .map_or(text.clone(), str::to_string);
            (message, exception_bases(&kind))
        }
    };
    let args = if message.is_empty() { Vec::new() } else { vec![Value::Str(message)] };
    exception(&kind, bases, args)
}

/// `ascii(value)`: `repr` with non-ASCII characters escaped.
#[must_use]
pub fn ascii(value: &Value) -> String {
    let mut out = String::new();
    for c in value.repr().chars() {
        let code = c as u32;
        match code {
            0..=0x7f => out.push(c),
            0x80..=0xff => out.push_str(&format!("\\x{code:02x}")),
            0x100..=0xffff => out.push_str(&format!("\\u{code:04x}")),
            _ => out.push_str(&format!("\\U{code:08x}")),
        }
    }
    out
}

// =============================================================================
// Attributes
// =============================================================================

/// `value.attr`
pub fn get_attr(value: &Value, attr: &str) -> InterpResult<Value> {
    let missing = || InterpError::attribute(value.type_name(), attr);
    match value {
        Value::Object(object) => {
            if let Some(found) = object.attrs.borrow().get(attr) {
                return Ok(found.clone());
            }
            let class = object.class.as_ref().ok_or_else(missing)?;
            if attr == "__class__" {
                return Ok(Value::Class(Rc::clone(class)));
            }
            match class.attrs.borrow().get(attr) {
                Some(Value::Function(function)) => {
                    Ok(Value::BoundMethod(Box::new(value.clone()), Rc::clone(function)))
                }
                Some(found) => Ok(found.clone()),
                None => Err(missing()),
            }
        }
        Value::Class(class) => match attr {
            "__name__" => Ok(Value::Str(class.name.clone())),
            "mro" if !class.attrs.borrow().contains_key(attr) => {
                Ok(Value::Method(Box::new(value.clone()), attr.into()))
            }
            _ => class.attrs.borrow().get(attr).cloned().ok_or_else(missing),
        },
        Value::Module(module) => module_attr(module, attr),
        Value::Builtin(name) if attr == "__name__" => Ok(Value::Str(name.clone())),
        Value::Builtin(name) if TYPES.contains(&name.as_str()) => {
            Ok(Value::Builtin(format!("{name}.{attr}")))
        }
        Value::Function(function) if attr == "__name__" => Ok(Value::Str(function.name.clone())),
        Value::Function(_) if attr == "__code__" => Err(InterpError::unsupported("code objects")),
        Value::Complex(re, im) => match attr {
            "real" => Ok(Value::Float(*re)),
            "imag" => Ok(Value::Float(*im)),
            _ if methods::has_method(value, attr) => Ok(Value::Method(Box::new(value.clone()), attr.into())),
            _ => Err(missing()),
        },
        Value::Float(v) if attr == "real" => Ok(Value::Float(*v)),
        Value::Float(_) if attr == "imag" => Ok(Value::Float(0.0)),
        _ if methods::has_method(value, attr) => Ok(Value::Method(Box::new(value.clone()), attr.into())),
        _ => Err(missing()),
    }
}

/// `value.attr = new`
pub fn set_attr(value: &Value, attr: &str, new: Value) -> InterpResult<()> {
    match value {
        Value::Object(object) => {
            object.attrs.borrow_mut().insert(attr.to_string(), new);
            Ok(())
        }
        Value::Class(class) => {
            class.attrs.borrow_mut().insert(attr.to_string(), new);
            Ok(())
        }
        other => Err(InterpError::attribute(other.type_name(), attr)),
    }
}

/// `del value.attr`
pub fn del_attr(value: &Value, attr: &str) -> InterpResult<()> {
    let removed = match value {
        Value::Object(object) => object.attrs.borrow_mut().remove(attr),
        Value::Class(class) => class.attrs.borrow_mut().remove(attr),
        _ => None,
    };
    removed
        .map(|_| ())
        .ok_or_else(|| InterpError::attribute(value.type_name(), attr))
}

// =============================================================================
// Calls
// =============================================================================

/// Evaluated call arguments with checked access.
pub(crate) struct Args<'n> {
    name: &'n str,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl<'n> Args<'n> {
    pub(crate) fn new(name: &'n str, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            name,
            positional,
            keywords,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.positional.len()
    }

    /// Fail unless between `min` and `max` positional arguments were given.
    pub(crate) fn arity(&self, min: usize, max: usize) -> InterpResult<()> {
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max { min.to_string() } else { format!("{min} to {max}") };
            return Err(InterpError::type_error(format!(
                "{}() takes {expected} arguments ({n} given)",
                self.name
            )));
        }
        Ok(())
    }

    /// Positional argument `i`, or keyword `keyword`.
    pub(crate) fn take(&mut self, i: usize, keyword: &str) -> Option<Value> {
        match self.keyword(keyword) {
            Some(value) => Some(value),
            None => self.positional.get(i).cloned(),
        }
    }

    /// Required positional argument `i`.
    pub(crate) fn required(&self, i: usize) -> InterpResult<Value> {
        self.positional.get(i).cloned().ok_or_else(|| {
            InterpError::type_error(format!("{}() missing required argument {}", self.name, i + 1))
        })
    }

    /// Remove and return keyword `name`.
    pub(crate) fn keyword(&mut self, name: &str) -> Option<Value> {
        let position = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(position).1)
    }

    /// All positional arguments.
    pub(crate) fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Fail on any keyword not consumed.
    pub(crate) fn finish(self) -> InterpResult<()> {
        match self.keywords.first() {
            Some((key, _)) => Err(InterpError::type_error(format!(
                "{}() got an unexpected keyword argument '{key}'",
                self.name
            ))),
            None => Ok(()),
        }
    }

    /// Remove and return every remaining keyword.
    pub(crate) fn take_keywords(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.keywords)
    }

    /// Remaining keywords, consumed.
    pub(crate) fn into_keywords(self) -> Vec<(String, Value)> {
        self.keywords
    }
}

/// Call the builtin `name`.
pub fn call_builtin(
    interp: &mut Interpreter,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> InterpResult<Value> {
    if let Some((owner, member)) = name.split_once('.') {
        if TYPES.contains(&owner) {
            return methods::call_unbound(interp, owner, member, Args::new(name, args, kwargs));
        }
        return modules::call(interp, owner, member, Args::new(name, args, kwargs));
    }
    if EXCEPTIONS.contains(&name) {
        return Ok(exception(name, exception_bases(name), args));
    }
    functions::call(interp, name, Args::new(name, args, kwargs))
}

/// `SimpleNamespace`-style object from keyword arguments.
pub(crate) fn namespace(keywords: Vec<(String, Value)>) -> Value {
    let attrs: FxHashMap<String, Value> = keywords.into_iter().collect();
    Value::Object(Rc::new(Object::namespace(attrs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_object_message() {
        let object = exception_object(&InterpError::ZeroDivision);
        assert_eq!(object.to_str(), "division by zero");
        assert_eq!(object.repr(), "ZeroDivisionError('division by zero')");
        let object = exception_object(&InterpError::KeyError { key: "'k'".into() });
        assert_eq!(object.to_str(), "'k'");
    }

    #[test]
    fn test_ascii_escapes() {
        assert_eq!(ascii(&Value::Str("caf\u{e9}\u{1F600}".into())), "'caf\\xe9\\U0001f600'");
        assert_eq!(ascii(&Value::Int(3)), "3");
    }

    #[test]
    fn test_attributes() {
        let object = namespace(vec![("a".into(), Value::Int(1))]);
        assert_eq!(get_attr(&object, "a").unwrap(), Value::Int(1));
        set_attr(&object, "b", Value::Int(2)).unwrap();
        assert_eq!(get_attr(&object, "b").unwrap(), Value::Int(2));
        del_attr(&object, "a").unwrap();
        assert!(get_attr(&object, "a").is_err());
        assert!(set_attr(&Value::Int(1), "x", Value::None).is_err());
        assert_eq!(
            get_attr(&Value::Builtin("int".into()), "from_bytes").unwrap(),
            Value::Builtin("int.from_bytes".into())
        );
        assert_eq!(
            get_attr(&Value::Str(String::new()), "join").unwrap(),
            Value::Method(Box::new(Value::Str(String::new())), "join".into())
        );
    }
}
