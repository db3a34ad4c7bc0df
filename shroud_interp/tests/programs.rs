//! Whole-program tests for the evaluator.
//!
//! Each test runs a small program of the kind the obfuscation passes emit
//! and checks its module globals or printed output.

use shroud_interp::{Interpreter, Value};

// =============================================================================
// Test Infrastructure
// =============================================================================

fn run(source: &str) -> Interpreter {
    match Interpreter::run_source(source) {
        Ok(interp) => interp,
        Err(e) => panic!("program failed: {e}\n{source}"),
    }
}

fn global(source: &str, name: &str) -> Value {
    run(source)
        .global(name)
        .cloned()
        .unwrap_or_else(|| panic!("{name} not bound"))
}

// =============================================================================
// Decoders
// =============================================================================

#[test]
fn test_triplet_decoder() {
    let source = "\
s = [0, 104, 1, 0, 210, 2]
v = ''.join(map(lambda t: chr(int.from_bytes(bytes(t[:2]), 'big') // t[2]), zip(*[iter(s)] * 3)))
";
    assert_eq!(global(source, "v"), Value::Str("hi".into()));
}

#[test]
fn test_base64_zlib_decoder() {
    let source = "\
data = __import__('zlib').compress('print(1)'.encode())
blob = __import__('base64').b64encode(data)
v = __import__('zlib').decompress(__import__('base64').b64decode(blob)).decode()
";
    assert_eq!(global(source, "v"), Value::Str("print(1)".into()));
}

#[test]
fn test_xor_table_decoder() {
    let source = "\
T = [3, 7]
enc = [ord(c) ^ T[i % len(T)] for i, c in enumerate('key')]
v = ''.join([chr(x ^ T[i % len(T)]) for i, x in enumerate(enc)])
";
    assert_eq!(global(source, "v"), Value::Str("key".into()));
}

#[test]
fn test_bool_arithmetic() {
    assert_eq!(global("v = (True >> True) + (- +True)\n", "v"), Value::Int(-1));
    assert_eq!(global("v = (not False) << 3 != 1 << 3\n", "v"), Value::Bool(false));
}

// =============================================================================
// Semantics the renamer must keep
// =============================================================================

#[test]
fn test_scoping_program() {
    let source = "\
total = 0

def add(n):
    global total
    total += n

for i in range(4):
    add(i)

class Box:
    def __init__(self, value):
        self.value = value

    def doubled(self):
        return self.value * 2

def counter():
    count = 0
    def bump():
        nonlocal count
        count += 1
        return count
    bump()
    return bump()

evens = [x for x in range(6) if x % 2 == 0]
v = (total, Box(5).doubled(), counter(), evens, (lambda a, b=2: a * b)(4))
";
    assert_eq!(
        global(source, "v"),
        Value::Tuple(vec![
            Value::Int(6),
            Value::Int(10),
            Value::Int(2),
            Value::List(vec![Value::Int(0), Value::Int(2), Value::Int(4)]),
            Value::Int(8),
        ])
    );
}

#[test]
fn test_keyword_arguments_and_defaults() {
    let source = "\
def f(a, /, b, *args, c=3, **kw):
    return [a, b, list(args), c, sorted(kw.items())]

v = f(1, b=2, c=4, z=9)
";
    assert_eq!(
        global(source, "v"),
        Value::List(vec![
            Value::Int(1),
            Value::Int(2),
            Value::List(vec![]),
            Value::Int(4),
            Value::List(vec![Value::Tuple(vec![Value::Str("z".into()), Value::Int(9)])]),
        ])
    );
}

#[test]
fn test_exceptions_cross_functions() {
    let source = "\
class Oops(ValueError):
    pass

def risky(n):
    if n > 2:
        raise Oops('big')
    return n

out = []
for n in range(5):
    try:
        out.append(risky(n))
    except ValueError as e:
        out.append(str(e))
    finally:
        out.append('.')
";
    let interp = run(source);
    let out = interp.global("out").cloned();
    let expected: Vec<Value> = [
        Value::Int(0),
        Value::Int(1),
        Value::Int(2),
        Value::Str("big".into()),
        Value::Str("big".into()),
    ]
    .into_iter()
    .flat_map(|v| [v, Value::Str(".".into())])
    .collect();
    assert_eq!(out, Some(Value::List(expected)));
}

#[test]
fn test_print_and_fstrings() {
    let source = "\
name = 'q'
n = 7
print(f'<{n:>3}|{name!r}|{{}}>')
print('{:>3}'.format(n), end='!')
";
    assert_eq!(run(source).output(), "<  7|'q'|{}>\n  7!");
}

#[test]
fn test_setattr_namespace() {
    let source = "\
import types
ns = types.SimpleNamespace()
setattr(ns, 'x', 3)
ns.y = ns.x + 1
v = (ns.x, getattr(ns, 'y'), hasattr(ns, 'z'))
";
    assert_eq!(
        global(source, "v"),
        Value::Tuple(vec![Value::Int(3), Value::Int(4), Value::Bool(false)])
    );
}

#[test]
fn test_uncaught_error_surfaces() {
    let err = Interpreter::run_source("x = {}\ny = x['missing']\n").unwrap_err();
    assert_eq!(err.kind_name(), "KeyError");
}

// =============================================================================
// Match Statements
// =============================================================================

#[test]
fn test_match_binds_captures() {
    let source = "\
class Point:
    __match_args__ = ('x', 'y')
    def __init__(self, x, y):
        self.x = x
        self.y = y

def describe(subject):
    match subject:
        case None | True:
            return 'flag'
        case [first, *rest] if first > 0:
            return ('seq', first, rest)
        case {'k': value, **others}:
            return ('map', value, len(others))
        case Point(0, y=height):
            return ('axis', height)
        case str(text) as whole:
            return text + whole
        case _:
            return 'other'

v = [describe(None), describe([3, 4, 5]), describe([-1]), describe({'k': 1, 'j': 2}),
     describe(Point(0, 7)), describe('ab')]
";
    let seq = Value::Tuple(vec![
        Value::Str("seq".into()),
        Value::Int(3),
        Value::List(vec![Value::Int(4), Value::Int(5)]),
    ]);
    assert_eq!(
        global(source, "v"),
        Value::List(vec![
            Value::Str("flag".into()),
            seq,
            Value::Str("other".into()),
            Value::Tuple(vec![Value::Str("map".into()), Value::Int(1), Value::Int(1)]),
            Value::Tuple(vec![Value::Str("axis".into()), Value::Int(7)]),
            Value::Str("abab".into()),
        ])
    );
}

#[test]
fn test_match_without_a_hit_falls_through() {
    let source = "\
v = 0
match (1, 2):
    case (a,):
        v = a
    case (1, 3):
        v = 13
";
    assert_eq!(global(source, "v"), Value::Int(0));
}
