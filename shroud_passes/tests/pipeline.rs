//! End-to-end pipeline tests: several passes together, single and batch.
//!
//! Behaviour is checked by running the program before and after through
//! the evaluator and comparing what it prints. Printed output survives the
//! renamer, module globals do not.

use rstest::rstest;
use shroud_core::{Config, ShroudError};
use shroud_interp::Interpreter;
use shroud_parser::{parse, unparse};
use shroud_passes::{Pipeline, serialize_all};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// Every pass whose output the evaluator can run.
const RUNNABLE_PASSES: &[&str] = &[
    "logic",
    "type_hints",
    "type_alias",
    "fstrings",
    "string_collector",
    "strings",
    "floats",
    "numeric",
    "renamer",
    "attrib_set",
];

fn config_with(passes: &[&str]) -> Config {
    let mut config = Config::new();
    for pass in passes {
        config.enable(pass);
    }
    config
}

fn obfuscate(source: &str, passes: &[&str], seed: u64) -> String {
    let mut pipeline = Pipeline::new(config_with(passes)).with_seed(seed);
    let tree = pipeline.run_single(parse(source).unwrap(), "/proj/app.py").unwrap();
    unparse(&tree)
}

fn printed(source: &str) -> String {
    match Interpreter::run_source(source) {
        Ok(interp) => interp.output().to_string(),
        Err(e) => panic!("program failed: {e}\n{source}"),
    }
}

// =============================================================================
// Behaviour
// =============================================================================

const ARITHMETIC: &str = "\
def mix(a: int, b: float = 0.25) -> float:
    return a * 3 + b - 1.5

print(mix(4), mix(10, b=2.0), 7 // 2, -7 % 3)
";

const STRINGS: &str = "\
greeting = 'hello'
name = 'w\u{f6}rld'
print(f'{greeting}, {name!r:>10}!', greeting.upper(), b'raw'.hex())
";

const CONTROL_FLOW: &str = "\
total = 0
for i in range(10):
    if i % 2 == 0 and not i == 4:
        total += i
    elif i > 7 or i == 1:
        total -= 1
print(total, [x * x for x in range(5) if x != 3])
";

const CLASSES: &str = "\
class Counter:
    def __init__(self, start):
        self.count = start

    def bump(self, by=1):
        self.count += by
        return self.count

c = Counter(5)
c.bump()
c.label = 'done'
print(c.bump(by=3), c.label)
";

const CLOSURES: &str = "\
def make(step):
    seen = []
    def add(n):
        nonlocal step
        step += 1
        seen.append(n * step)
        return seen
    return add

add = make(1)
add(1)
print(add(2), (lambda q: q - 1)(3))
";

const EXCEPTIONS: &str = "\
def safe_div(a, b):
    try:
        return a / b
    except ZeroDivisionError as e:
        return str(e)
    finally:
        print('checked', a, b)

print(safe_div(1, 4), safe_div(1, 0))
";

const BUILTIN_TYPES: &str = "\
words = list(map(str, filter(lambda n: n % 2, range(7))))
print(words, int('12') + 1, float(3), bytes([104, 105]), isinstance('x', str))
";

#[rstest]
fn test_behaviour_is_preserved(
    #[values(ARITHMETIC, STRINGS, CONTROL_FLOW, CLASSES, CLOSURES, EXCEPTIONS, BUILTIN_TYPES)]
    program: &str,
    #[values(1, 7, 42)] seed: u64,
) {
    let expected = printed(program);
    let out = obfuscate(program, RUNNABLE_PASSES, seed);
    assert_eq!(printed(&out), expected, "seed {seed}, output:\n{out}");
}

#[test]
fn test_seed_makes_runs_reproducible() {
    let first = obfuscate(ARITHMETIC, RUNNABLE_PASSES, 99);
    let second = obfuscate(ARITHMETIC, RUNNABLE_PASSES, 99);
    assert_eq!(first, second);
}

#[test]
fn test_output_parses_back() {
    let mut pipeline = Pipeline::new(config_with(RUNNABLE_PASSES)).with_seed(5);
    let files = vec!["/proj/app.py".to_string()];
    let mut trees = vec![parse(CLASSES).unwrap()];
    pipeline.run_batch(&mut trees, &files).unwrap();
    let sources = serialize_all(&trees, &files).unwrap();
    assert!(parse(&sources[0]).is_ok());
}

// =============================================================================
// Deterministic passes
// =============================================================================

#[test]
fn test_deterministic_passes_snapshot() {
    let source = "\
def greet(name: str, times: int = 2) -> str:
    label = f'{name}!'
    return label * times

message: str = greet('hi')
";
    let out = obfuscate(source, &["type_hints", "fstrings", "renamer"], 0);
    insta::assert_snapshot!(out, @r"
    def method0(arg0, arg1=2):
        var0 = '{}!'.format(arg0)
        return var0 * arg1
    var1 = method0('hi')
    ");
}

// =============================================================================
// Options
// =============================================================================

#[test]
fn test_nothing_enabled_is_an_error() {
    let mut pipeline = Pipeline::new(Config::new());
    let err = pipeline.run_single(parse("x = 1\n").unwrap(), "/a.py").unwrap_err();
    assert_eq!(err, ShroudError::NothingToDo);
}

#[test]
fn test_unknown_option_leaves_tree_untouched() {
    let mut config = config_with(&["numeric"]);
    config.set_raw("numeric.no_such_option", "1");
    let mut pipeline = Pipeline::new(config);
    let mut trees = vec![parse("x = 5\n").unwrap()];
    let files = vec!["/a.py".to_string()];
    let err = pipeline.run_batch(&mut trees, &files).unwrap_err();
    assert!(matches!(err, ShroudError::UnknownOption { .. }), "{err}");
    assert_eq!(unparse(&trees[0]), "x = 5\n");
}

#[test]
fn test_every_pass_is_listed() {
    let pipeline = Pipeline::new(Config::new());
    let names: Vec<&str> = pipeline.describe().map(|(name, _, _)| name).collect();
    assert_eq!(
        names,
        [
            "logic",
            "type_hints",
            "type_alias",
            "fstrings",
            "string_collector",
            "strings",
            "floats",
            "numeric",
            "renamer",
            "attrib_set",
            "code_units",
            "unicode_names",
        ]
    );
}

// =============================================================================
// Batch
// =============================================================================

/// The name after `def ` in `source`.
fn defined_name(source: &str) -> &str {
    let start = source.find("def ").map(|i| i + 4).unwrap();
    let end = source[start..].find('(').unwrap() + start;
    &source[start..end]
}

#[test]
fn test_batch_renames_across_files() {
    let files = vec!["/proj/main.py".to_string(), "/proj/util.py".to_string()];
    let mut trees = vec![
        parse("import util\nfrom util import helper\nprint(helper(), util.helper())\n").unwrap(),
        parse("def helper():\n    return 3\n").unwrap(),
    ];
    let mut pipeline = Pipeline::new(config_with(&["renamer"])).with_seed(3);
    pipeline.run_batch(&mut trees, &files).unwrap();

    let main = unparse(&trees[0]);
    let util = unparse(&trees[1]);
    let renamed = defined_name(&util);
    assert_ne!(renamed, "helper");
    assert!(!main.contains("helper"), "{main}");
    assert!(main.contains(&format!("import {renamed}")), "{main}");
    assert!(main.contains(&format!(".{renamed}()")), "{main}");
}

#[rstest]
fn test_batch_rename_ignores_file_order(#[values(false, true)] importer_first: bool) {
    let importer = ("/proj/main.py", "from util import helper\nprint(helper())\n");
    let defining = ("/proj/util.py", "def helper():\n    return 3\n");
    let order = if importer_first { [importer, defining] } else { [defining, importer] };
    let files: Vec<String> = order.iter().map(|(file, _)| (*file).to_string()).collect();
    let mut trees: Vec<_> = order.iter().map(|(_, src)| parse(src).unwrap()).collect();
    Pipeline::new(config_with(&["renamer"]))
        .with_seed(11)
        .run_batch(&mut trees, &files)
        .unwrap();

    let (main, util) = if importer_first { (0, 1) } else { (1, 0) };
    let main = unparse(&trees[main]);
    let util = unparse(&trees[util]);
    assert!(main.starts_with(&format!("from util import {} as ", defined_name(&util))), "{main}");
}

/// `importer` with its `from a import` lines turned into plain aliases and
/// appended to `defining`, so one program runs both modules.
fn link_star_importer(defining: &str, importer: &str) -> String {
    let mut program = defining.to_string();
    for line in importer.lines() {
        match line.strip_prefix("from a import ") {
            Some("*") => {}
            Some(names) => {
                for alias in names.split(", ") {
                    let (exported, local) = alias.split_once(" as ").unwrap();
                    program.push_str(&format!("{local} = {exported}\n"));
                }
            }
            None => {
                program.push_str(line);
                program.push('\n');
            }
        }
    }
    program
}

#[test]
fn test_star_import_restores_only_module_attributes() {
    let files = vec!["/p/a.py".to_string(), "/p/b.py".to_string()];
    let defining = "def f(a, scale=3):\n    return a * scale\nlimit = 4\n";
    let importer = "from a import *\nprint(f(limit), f(1, 2))\n";
    let mut trees = vec![parse(defining).unwrap(), parse(importer).unwrap()];
    Pipeline::new(config_with(&["renamer"]))
        .with_seed(5)
        .run_batch(&mut trees, &files)
        .unwrap();

    let defining_out = unparse(&trees[0]);
    let importer_out = unparse(&trees[1]);
    let module = Interpreter::run_source(&defining_out).unwrap();
    let companion = importer_out.lines().nth(1).unwrap();
    for alias in companion.strip_prefix("from a import ").unwrap().split(", ") {
        let (exported, _) = alias.split_once(" as ").unwrap();
        assert!(module.global(exported).is_some(), "{exported} is not defined by:\n{defining_out}");
    }

    let expected = printed(&link_star_importer(defining, importer));
    assert_eq!(expected, "12 2\n");
    assert_eq!(printed(&link_star_importer(&defining_out, &importer_out)), expected);
}

#[test]
fn test_single_mode_leaves_imports_alone() {
    let out = obfuscate("from util import helper\nhelper()\n", &["renamer"], 3);
    assert!(out.starts_with("from util import helper as "), "{out}");
}
