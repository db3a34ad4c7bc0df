//! Serialization of compiled units and the `repr` rendering the encrypted
//! launcher keys on.

use proptest::prelude::*;
use shroud_compiler::repr::{float_repr, str_repr};
use shroud_compiler::{Constant, compile_module, marshal, py_repr};
use shroud_parser::parse;

fn compile(source: &str) -> shroud_compiler::CodeUnit {
    let module = parse(source).expect("Failed to parse");
    compile_module(&module, "m.py").expect("Failed to compile")
}

#[test]
fn test_dumps_module_header() {
    let code = compile("def f(x):\n    return x * 2\n");
    let data = marshal::dumps(&code).unwrap();
    assert_eq!(data[0], b'c');
    // argcount, posonly, kwonly of the module unit
    assert_eq!(&data[1..13], &[0; 12]);
    let stacksize = i32::from_le_bytes(data[13..17].try_into().unwrap());
    assert_eq!(stacksize as u32, code.stacksize);
    // nested code object is serialized inline
    assert!(data[1..].contains(&b'c'));
}

#[test]
fn test_dumps_is_deterministic() {
    let source = "import os\nfor i in range(3):\n    print(i, os.sep)\n";
    let a = marshal::dumps(&compile(source)).unwrap();
    let b = marshal::dumps(&compile(source)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_repr_of_code_parts() {
    let code = compile("x = (1, 'a', None, 2.5, b'\\x01')\n");
    let rendered: Vec<String> = code.consts.iter().map(py_repr).collect();
    for expected in ["1", "'a'", "None", "2.5", "b'\\x01'"] {
        assert!(rendered.iter().any(|r| r == expected), "{expected} missing from {rendered:?}");
    }
    assert_eq!(py_repr(&Constant::Str("it's".into())), "\"it's\"");
}

proptest! {
    #[test]
    fn prop_float_repr_round_trips(v in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        let text = float_repr(v);
        prop_assert_eq!(text.parse::<f64>().unwrap(), v);
        prop_assert!(text.contains('.') || text.contains('e'));
    }

    #[test]
    fn prop_str_repr_is_quoted(s in "\\PC*") {
        let text = str_repr(&s);
        prop_assert!(text.len() >= 2);
        let quote = text.chars().next().unwrap();
        prop_assert!(quote == '\'' || quote == '"');
        prop_assert!(text.ends_with(quote));
    }
}
