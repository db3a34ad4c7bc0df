//! Compilation tests over whole programs.
//!
//! Covers statement forms end to end:
//! - Functions, closures and generators
//! - Exception handling and `with`
//! - Loops with `break`, `continue` and `else`
//! - Imports and star unpacking
//! - Unsupported constructs rejected with a compile error

use shroud_compiler::{CodeFlags, CodeUnit, Constant, Opcode, compile_module, decode_table};
use shroud_parser::parse;

// ============================================================================
// Test Utilities
// ============================================================================

/// Helper to compile source code and return the module unit.
fn compile(source: &str) -> CodeUnit {
    let module = parse(source).expect("Failed to parse");
    compile_module(&module, "test.py").expect("Failed to compile")
}

fn compile_err(source: &str) -> String {
    let module = parse(source).expect("Failed to parse");
    compile_module(&module, "test.py")
        .expect_err("expected a compile error")
        .to_string()
}

/// Decoded opcodes, skipping inline caches.
fn opcodes(code: &CodeUnit) -> Vec<Opcode> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < code.code.len() {
        let op = Opcode::from_u8(code.code[i]).expect("unknown opcode");
        out.push(op);
        i += 2 + 2 * op.cache_entries();
    }
    out
}

fn count_opcodes(code: &CodeUnit, opcode: Opcode) -> usize {
    opcodes(code).iter().filter(|op| **op == opcode).count()
}

fn has_opcode(code: &CodeUnit, opcode: Opcode) -> bool {
    count_opcodes(code, opcode) > 0
}

/// The first nested unit with the given name.
fn unit<'a>(code: &'a CodeUnit, name: &str) -> &'a CodeUnit {
    code.nested()
        .into_iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no unit named {name}"))
}

// ============================================================================
// Functions
// ============================================================================

#[test]
fn test_function_docstring_is_first_const() {
    let code = compile("def f():\n    '''doc'''\n    return 1\n");
    let f = unit(&code, "f");
    assert_eq!(f.consts[0], Constant::Str("doc".into()));
    assert!(has_opcode(f, Opcode::ReturnValue));
}

#[test]
fn test_defaults_and_annotations() {
    let code = compile("def f(a: int, b=2, *, c=3) -> str:\n    return a\n");
    assert!(has_opcode(&code, Opcode::BuildMap));
    assert_eq!(count_opcodes(&code, Opcode::BuildTuple), 2);
    let f = unit(&code, "f");
    assert_eq!(f.argcount, 2);
    assert_eq!(f.kwonlyargcount, 1);
}

#[test]
fn test_decorators_are_called_after_definition() {
    let code = compile("@d1\n@d2\ndef f():\n    pass\n");
    assert_eq!(count_opcodes(&code, Opcode::Call), 2);
    let ops = opcodes(&code);
    let make = ops.iter().position(|op| *op == Opcode::MakeFunction).unwrap();
    let store = ops.iter().position(|op| *op == Opcode::StoreName).unwrap();
    assert!(make < store);
}

#[test]
fn test_nonlocal_uses_deref() {
    let code = compile(
        "def outer():\n    n = 0\n    def inc():\n        nonlocal n\n        n += 1\n    return inc\n",
    );
    let inc = unit(&code, "inc");
    assert!(has_opcode(inc, Opcode::LoadDeref));
    assert!(has_opcode(inc, Opcode::StoreDeref));
    assert_eq!(inc.qualname, "outer.<locals>.inc");
}

#[test]
fn test_global_in_function() {
    let code = compile("def f():\n    global g\n    g = 1\n    return h\n");
    let f = unit(&code, "f");
    assert!(has_opcode(f, Opcode::StoreGlobal));
    assert!(has_opcode(f, Opcode::LoadGlobal));
    assert!(!has_opcode(f, Opcode::StoreFast));
}

#[test]
fn test_lambda_and_generator_expression() {
    let code = compile("f = lambda x: x + 1\ng = (y * 2 for y in range(3))\n");
    let lambda = unit(&code, "<lambda>");
    assert_eq!(lambda.consts[0], Constant::None);
    let genexpr = unit(&code, "<genexpr>");
    assert!(genexpr.flags.contains(CodeFlags::GENERATOR));
    assert!(has_opcode(genexpr, Opcode::YieldValue));
}

#[test]
fn test_dict_and_set_comprehensions() {
    let code = compile("d = {k: v for k, v in items}\ns = {x for x in xs}\n");
    assert!(has_opcode(unit(&code, "<dictcomp>"), Opcode::MapAdd));
    assert!(has_opcode(unit(&code, "<setcomp>"), Opcode::SetAdd));
}

// ============================================================================
// Exceptions and Context Managers
// ============================================================================

#[test]
fn test_try_finally_duplicates_final_body() {
    let code = compile("try:\n    a()\nfinally:\n    b()\n");
    // normal path and exceptional path
    assert_eq!(count_opcodes(&code, Opcode::PushNull), 3);
    assert!(has_opcode(&code, Opcode::PushExcInfo));
    let entries = decode_table(&code.exceptiontable).unwrap();
    assert!(entries.iter().any(|e| e.depth == 0 && !e.lasti));
    assert!(entries.iter().any(|e| e.depth == 1 && e.lasti));
}

#[test]
fn test_return_in_finally_protected_body() {
    let code = compile("def f():\n    try:\n        return g()\n    finally:\n        h()\n");
    let f = unit(&code, "f");
    // inlined on return, on the normal path and on the exceptional path
    assert_eq!(count_opcodes(f, Opcode::LoadGlobal), 4);
}

#[test]
fn test_nested_with() {
    let code = compile("with a as x, b as y:\n    pass\n");
    assert_eq!(count_opcodes(&code, Opcode::BeforeWith), 2);
    assert_eq!(count_opcodes(&code, Opcode::WithExceptStart), 2);
    let entries = decode_table(&code.exceptiontable).unwrap();
    let depths: Vec<u32> = entries.iter().map(|e| e.depth).collect();
    assert!(depths.contains(&2));
    assert!(depths.contains(&4));
}

#[test]
fn test_bare_except_must_be_last() {
    let message = compile_err("try:\n    pass\nexcept:\n    pass\nexcept ValueError:\n    pass\n");
    assert!(message.contains("must be last"));
}

#[test]
fn test_raise_and_assert() {
    let code = compile("assert x, 'boom'\nraise ValueError('v') from None\n");
    assert!(has_opcode(&code, Opcode::LoadAssertionError));
    let ops = opcodes(&code);
    assert_eq!(ops.iter().filter(|op| **op == Opcode::RaiseVarargs).count(), 2);
}

// ============================================================================
// Loops
// ============================================================================

#[test]
fn test_break_in_for_pops_iterator() {
    let code = compile("for x in xs:\n    if x:\n        break\nelse:\n    y = 1\n");
    let ops = opcodes(&code);
    let jumps = ops
        .windows(2)
        .filter(|w| w[0] == Opcode::PopTop && w[1] == Opcode::JumpForward)
        .count();
    assert!(jumps >= 1);
    assert!(has_opcode(&code, Opcode::JumpBackward));
}

#[test]
fn test_continue_in_while() {
    let code = compile("while x:\n    if y:\n        continue\n    z()\n");
    assert!(count_opcodes(&code, Opcode::JumpBackward) >= 2);
}

#[test]
fn test_break_inside_with_calls_exit() {
    let code = compile("for x in xs:\n    with m:\n        break\n");
    // normal exit and unwinding exit both call __exit__(None, None, None)
    assert_eq!(count_opcodes(&code, Opcode::Precall), 2);
}

// ============================================================================
// Imports and Assignment Forms
// ============================================================================

#[test]
fn test_import_forms() {
    let code = compile("import os.path as p\nfrom . import a as b\nfrom m import *\n");
    assert!(has_opcode(&code, Opcode::ImportStar));
    assert_eq!(count_opcodes(&code, Opcode::ImportName), 3);
    assert!(code.consts.contains(&Constant::Int(1)));
    assert!(code.names.iter().any(|n| n == "path"));
}

#[test]
fn test_star_unpacking_target() {
    let code = compile("a, *b, c = xs\n");
    let ops = opcodes(&code);
    let index = ops.iter().position(|op| *op == Opcode::UnpackEx).unwrap();
    // one before, one after: 0x101 needs a prefix
    assert_eq!(ops[index - 1], Opcode::ExtendedArg);
    assert_eq!(code.code[index * 2 + 1], 1);
}

#[test]
fn test_augmented_subscript() {
    let code = compile("d[k] += 1\n");
    assert!(has_opcode(&code, Opcode::BinarySubscr));
    assert!(has_opcode(&code, Opcode::StoreSubscr));
    assert_eq!(count_opcodes(&code, Opcode::Swap), 2);
}

#[test]
fn test_fstring_lowering() {
    let code = compile("s = f'{a!r:>{w}} and {b}'\n");
    assert_eq!(count_opcodes(&code, Opcode::FormatValue), 3);
    assert!(has_opcode(&code, Opcode::BuildString));
}

// ============================================================================
// Classes and Delegating Generators
// ============================================================================

#[test]
fn test_super_stores_class_cell() {
    let code = compile("class C(B):\n    def m(self):\n        return super().m()\n");
    let class = unit(&code, "C");
    assert_eq!(class.cellvars, ["__class__"]);
    assert!(class.names.iter().any(|n| n == "__classcell__"));
    let ops = opcodes(class);
    assert_eq!(&ops[..2], &[Opcode::MakeCell, Opcode::Resume]);
    assert_eq!(
        &ops[ops.len() - 4..],
        &[Opcode::LoadClosure, Opcode::Copy, Opcode::StoreName, Opcode::ReturnValue]
    );

    let method = unit(&code, "m");
    assert_eq!(method.freevars, ["__class__"]);
    assert_eq!(opcodes(method)[0], Opcode::CopyFreeVars);
}

#[test]
fn test_class_without_super_returns_none() {
    let code = compile("class C:\n    def m(self):\n        return 1\n");
    let class = unit(&code, "C");
    assert!(class.cellvars.is_empty());
    assert!(!class.names.iter().any(|n| n == "__classcell__"));
}

#[test]
fn test_class_body_reads_enclosing_function() {
    let code = compile("def f():\n    x = 1\n    class C:\n        y = x\n    return C\n");
    let class = unit(&code, "C");
    assert_eq!(class.freevars, ["x"]);
    assert!(has_opcode(class, Opcode::LoadClassderef));
    assert!(has_opcode(class, Opcode::CopyFreeVars));
    assert!(has_opcode(unit(&code, "f"), Opcode::LoadClosure));
}

#[test]
fn test_yield_from_delegates() {
    let code = compile("def f(xs):\n    r = yield from xs\n    return r\n");
    let f = unit(&code, "f");
    assert!(f.flags.contains(CodeFlags::GENERATOR));
    let ops = opcodes(f);
    let at = ops
        .iter()
        .position(|op| *op == Opcode::GetYieldFromIter)
        .expect("GET_YIELD_FROM_ITER");
    assert_eq!(
        &ops[at..at + 6],
        &[
            Opcode::GetYieldFromIter,
            Opcode::LoadConst,
            Opcode::Send,
            Opcode::YieldValue,
            Opcode::Resume,
            Opcode::JumpBackwardNoInterrupt,
        ]
    );
    assert_eq!(ops[at + 6], Opcode::StoreFast);
}

// ============================================================================
// Unsupported Constructs
// ============================================================================

#[test]
fn test_async_function_rejected() {
    let message = compile_err("async def f():\n    await g()\n");
    assert!(!message.is_empty());
}

#[test]
fn test_match_and_except_star_rejected() {
    let message = compile_err("x = 1\nmatch x:\n    case 1:\n        pass\n");
    assert!(message.contains("match"));
    let module = parse("try:\n    f()\nexcept* ValueError:\n    pass\n").expect("Failed to parse");
    let err = compile_module(&module, "test.py").expect_err("expected a compile error");
    assert_eq!(err.span().map(|s| s.line()), Some(1));
}

#[test]
fn test_yield_from_outside_function_rejected() {
    let message = compile_err("yield from g()\n");
    assert!(message.contains("yield from"));
}
