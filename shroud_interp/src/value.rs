//! Runtime values.
//!
//! Scalars, strings, lists and tuples are plain Rust values compared
//! structurally, so tests can build the expected result directly
//! (`Value::List(vec![Value::Int(1)])`). Lists are copied on assignment.
//! Iterators, functions, classes and objects are shared and compare by
//! identity.

use crate::error::{InterpError, InterpResult};
use rustc_hash::FxHashMap;
use shroud_compiler::repr::float_repr;
use shroud_parser::ast::{Expr, Stmt};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A Python value.
#[derive(Clone)]
pub enum Value {
    /// `None`
    None,
    /// `...`
    Ellipsis,
    /// `bool`
    Bool(bool),
    /// `int`, limited to 128 bits.
    Int(i128),
    /// `float`
    Float(f64),
    /// `complex`, as (real, imaginary).
    Complex(f64, f64),
    /// `str`
    Str(String),
    /// `bytes`
    Bytes(Vec<u8>),
    /// `list`
    List(Vec<Value>),
    /// `tuple`
    Tuple(Vec<Value>),
    /// `set`, without duplicates, in insertion order.
    Set(Vec<Value>),
    /// A `lower:upper:step` subscript.
    Slice(Box<[Value; 3]>),
    /// `dict`, in insertion order.
    Dict(Vec<(Value, Value)>),
    /// A one-shot iterator; copies share their position.
    Iter(Rc<RefCell<VecDeque<Value>>>),
    /// An imported module, by name.
    Module(String),
    /// A builtin function, by qualified name (`len`, `base64.b64decode`).
    Builtin(String),
    /// A builtin method bound to its receiver (`''.join`).
    Method(Box<Value>, String),
    /// A user function or lambda.
    Function(Rc<Function>),
    /// A user function bound to an instance.
    BoundMethod(Box<Value>, Rc<Function>),
    /// A user class.
    Class(Rc<Class>),
    /// An instance of a user class or a `SimpleNamespace`.
    Object(Rc<Object>),
}

/// Body of a callable.
#[derive(Clone)]
pub enum Body {
    /// A `def` body.
    Block(Vec<Stmt>),
    /// A lambda expression.
    Expr(Expr),
}

/// How a parameter binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Positional or keyword.
    Positional,
    /// Positional only.
    PositionalOnly,
    /// `*args`
    VarArgs,
    /// Keyword only.
    KeywordOnly,
    /// `**kwargs`
    VarKeywords,
}

/// A parameter with its evaluated default.
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Binding kind.
    pub kind: ParamKind,
    /// Default value, evaluated at definition time.
    pub default: Option<Value>,
}

/// A user-defined callable.
pub struct Function {
    /// `__name__`
    pub name: String,
    /// Parameters in declaration order.
    pub params: Vec<Param>,
    /// Code to run.
    pub body: Body,
    /// Scope the function was defined in.
    pub closure: Rc<crate::scope::Scope>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// A user class: a name and its namespace.
#[derive(Debug)]
pub struct Class {
    /// `__name__`
    pub name: String,
    /// Names of every ancestor, nearest first.
    pub bases: Vec<String>,
    /// Ancestors in method resolution order, `object` left out.
    pub mro: Vec<Value>,
    /// Class attributes, methods included.
    pub attrs: RefCell<FxHashMap<String, Value>>,
}

impl Class {
    /// A class with no attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, bases: Vec<String>) -> Self {
        Self {
            name: name.into(),
            bases,
            mro: Vec::new(),
            attrs: RefCell::default(),
        }
    }

    /// Whether this class is `name` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, name: &str) -> bool {
        self.name == name || self.bases.iter().any(|b| b == name)
    }

    /// Whether instances can be raised.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        self.is_subclass_of("BaseException")
    }
}

/// An instance.
#[derive(Debug)]
pub struct Object {
    /// The class, `None` for namespaces.
    pub class: Option<Rc<Class>>,
    /// Instance attributes.
    pub attrs: RefCell<FxHashMap<String, Value>>,
}

impl Object {
    /// A fresh instance of `class`.
    #[must_use]
    pub fn instance(class: Rc<Class>) -> Self {
        Self {
            class: Some(class),
            attrs: RefCell::default(),
        }
    }

    /// The exception class, if this object is an exception.
    #[must_use]
    pub fn exception_class(&self) -> Option<&Rc<Class>> {
        self.class.as_ref().filter(|c| c.is_exception())
    }

    /// `str(exc)`: the single argument, or the argument tuple.
    #[must_use]
    pub fn exception_message(&self) -> String {
        match self.attrs.borrow().get("args") {
            Some(Value::Tuple(args)) if args.is_empty() => String::new(),
            Some(Value::Tuple(args)) if args.len() == 1 => args[0].to_str(),
            Some(other) => other.to_str(),
            None => String::new(),
        }
    }

    /// A namespace object holding `attrs`.
    #[must_use]
    pub fn namespace(attrs: FxHashMap<String, Value>) -> Self {
        Self {
            class: None,
            attrs: RefCell::new(attrs),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::{
            Bool, BoundMethod, Builtin, Bytes, Class, Complex, Dict, Float, Function, Int, Iter,
            List, Method, Module, Object, Set, Slice, Str, Tuple,
        };
        match (self, other) {
            (Self::None, Self::None) | (Self::Ellipsis, Self::Ellipsis) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Complex(a, b), Complex(c, d)) => a == c && b == d,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (List(a), List(b)) | (Tuple(a), Tuple(b)) => a == b,
            (Dict(a), Dict(b)) => a == b,
            (Set(a), Set(b)) => a.len() == b.len() && a.iter().all(|v| b.contains(v)),
            (Slice(a), Slice(b)) => a == b,
            (Iter(a), Iter(b)) => Rc::ptr_eq(a, b),
            (Module(a), Module(b)) | (Builtin(a), Builtin(b)) => a == b,
            (Method(a, m), Method(b, n)) => a == b && m == n,
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            (BoundMethod(a, f), BoundMethod(b, g)) => a == b && Rc::ptr_eq(f, g),
            (Class(a), Class(b)) => Rc::ptr_eq(a, b),
            (Object(a), Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl Value {
    /// Python type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Complex(..) => "complex",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Set(_) => "set",
            Self::Slice(_) => "slice",
            Self::Dict(_) => "dict",
            Self::Iter(_) => "iterator",
            Self::Module(_) => "module",
            Self::Builtin(_) | Self::Method(..) => "builtin_function_or_method",
            Self::Function(_) => "function",
            Self::BoundMethod(..) => "method",
            Self::Class(_) => "type",
            Self::Object(o) => o.class.as_ref().map_or("types.SimpleNamespace", |c| c.name.as_str()),
        }
    }

    /// Python truthiness.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Complex(re, im) => *re != 0.0 || *im != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) | Self::Tuple(items) | Self::Set(items) => !items.is_empty(),
            Self::Dict(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// The value as an integer, with `bool` promoted.
    pub fn as_int(&self) -> InterpResult<i128> {
        match self {
            Self::Bool(b) => Ok(i128::from(*b)),
            Self::Int(v) => Ok(*v),
            other => Err(InterpError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
        }
    }

    /// The value as a string slice.
    pub fn as_str(&self) -> InterpResult<&str> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(InterpError::type_error(format!(
                "expected str, got {}",
                other.type_name()
            ))),
        }
    }

    /// Whether the value is a number (`bool`, `int`, `float`, `complex`).
    #[must_use]
    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Complex(..))
    }

    /// `repr(value)`
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::None => "None".into(),
            Self::Ellipsis => "Ellipsis".into(),
            Self::Bool(true) => "True".into(),
            Self::Bool(false) => "False".into(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => float_repr(*v),
            Self::Complex(re, im) => complex_repr(*re, *im),
            Self::Str(s) => str_repr(s, false),
            Self::Bytes(b) => shroud_parser::unparse::repr_bytes(b),
            Self::List(items) => format!("[{}]", join_reprs(items)),
            Self::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Self::Tuple(items) => format!("({})", join_reprs(items)),
            Self::Set(items) if items.is_empty() => "set()".into(),
            Self::Set(items) => format!("{{{}}}", join_reprs(items)),
            Self::Slice(bounds) => format!("slice({})", join_reprs(&bounds[..])),
            Self::Dict(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Iter(_) => "<iterator>".into(),
            Self::Module(name) => format!("<module '{name}'>"),
            Self::Builtin(name) => format!("<built-in function {name}>"),
            Self::Method(_, name) => format!("<built-in method {name}>"),
            Self::Function(func) | Self::BoundMethod(_, func) => format!("{func:?}"),
            Self::Class(class) => format!("<class '{}'>", class.name),
            Self::Object(object) => match &object.class {
                Some(class) if class.is_exception() => {
                    let args = object.attrs.borrow().get("args").map_or("()".into(), Value::repr);
                    let args = args.strip_suffix(",)").map_or(args.clone(), |a| format!("{a})"));
                    format!("{}{args}", class.name)
                }
                Some(class) => format!("<{} object>", class.name),
                None => {
                    let attrs = object.attrs.borrow();
                    let mut parts: Vec<String> = attrs
                        .iter()
                        .map(|(k, v)| format!("{k}={}", v.repr()))
                        .collect();
                    parts.sort();
                    format!("namespace({})", parts.join(", "))
                }
            },
        }
    }

    /// `str(value)`
    #[must_use]
    pub fn to_str(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Object(object) if object.exception_class().is_some() => object.exception_message(),
            other => other.repr(),
        }
    }
}

fn join_reprs(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

fn complex_repr(re: f64, im: f64) -> String {
    let part = |v: f64| {
        let s = float_repr(v);
        s.strip_suffix(".0").map_or(s.clone(), str::to_string)
    };
    if re == 0.0 && re.is_sign_positive() {
        format!("{}j", part(im))
    } else {
        let sign = if im < 0.0 || (im == 0.0 && im.is_sign_negative()) { "-" } else { "+" };
        format!("({}{sign}{}j)", part(re), part(im.abs()))
    }
}

/// `repr(str)`; with `ascii` set, non-ASCII characters are escaped as
/// `ascii()` does.
#[must_use]
pub fn str_repr(s: &str, ascii: bool) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if ascii && !c.is_ascii() => {
                let code = c as u32;
                if code <= 0xff {
                    out.push_str(&format!("\\x{code:02x}"));
                } else if code <= 0xffff {
                    out.push_str(&format!("\\u{code:04x}"));
                } else {
                    out.push_str(&format!("\\U{code:08x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("q", false, "'q'")]
    #[case("it's", false, "\"it's\"")]
    #[case("a\"b'c", false, "'a\"b\\'c'")]
    #[case("caf\u{e9}", false, "'caf\u{e9}'")]
    #[case("caf\u{e9}", true, "'caf\\xe9'")]
    #[case("\u{1F600}", true, "'\\U0001f600'")]
    #[case("tab\t", false, "'tab\\t'")]
    fn test_str_repr(#[case] s: &str, #[case] ascii: bool, #[case] expected: &str) {
        assert_eq!(str_repr(s, ascii), expected);
    }

    #[rstest]
    #[case(Value::Tuple(vec![Value::Int(1)]), "(1,)")]
    #[case(Value::List(vec![Value::None, Value::Bool(true)]), "[None, True]")]
    #[case(Value::Float(1.5), "1.5")]
    #[case(Value::Complex(0.0, 2.0), "2j")]
    #[case(Value::Complex(1.0, -2.0), "(1-2j)")]
    fn test_repr(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(value.repr(), expected);
    }

    #[test]
    fn test_equality_is_structural_for_data() {
        assert_eq!(Value::Int(1), Value::Int(1));
        assert_ne!(Value::Int(1), Value::Bool(true));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        let it = Value::Iter(Rc::default());
        assert_eq!(it.clone(), it);
        assert_ne!(it, Value::Iter(Rc::default()));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::List(vec![Value::None]).truthy());
        assert!(!Value::Float(0.0).truthy());
        assert!(Value::Module("os".into()).truthy());
    }
}
