//! Scope-aware renaming of variables, functions, classes and parameters.
//!
//! Renaming runs in two traversals over the same [`walker::SymbolWalker`]:
//!
//! 1. [`generator::MappingGenerator`] records a replacement for every
//!    binding site in a [`scope::MappingTable`] keyed by scope path
//! 2. [`applicator::MappingApplicator`] rewrites every binding and
//!    reference through the most specific applicable mapping
//!
//! In batch runs the file's module-level renames are then pushed into every
//! sibling that imports it ([`cross_file`]).
//!
//! Names bound directly in a class body, and methods with their parameters,
//! keep their spelling: they are reached through attribute access, which
//! cannot be resolved statically.

pub mod applicator;
pub mod cross_file;
pub mod generator;
pub mod scope;
pub mod walker;

use crate::{Pass, PassContext};
use applicator::MappingApplicator;
use generator::{MappingGenerator, NameGenerator, NameTemplate, collect_identifiers};
use scope::MappingTable;
use shroud_core::{OptionSpec, ShroudResult};
use shroud_parser::visit::walk_module_mut;
use std::path::Path;
use tracing::debug;
use walker::SymbolWalker;

/// Default name template.
pub const DEFAULT_TEMPLATE: &str = "{kind}{kind_counter}";

/// The `renamer` pass.
///
/// Holds the run's [`NameGenerator`], so replacements stay unique across
/// every file the pass sees.
#[derive(Debug, Default)]
pub struct Renamer {
    names: NameGenerator,
}

impl Pass for Renamer {
    fn name(&self) -> &'static str {
        "renamer"
    }

    fn description(&self) -> &'static str {
        "Renames all members (methods, classes, fields, args)"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::new(
            "name_format",
            "Template for new names: {kind}, {counter}, {kind_counter}, {random:N}",
            DEFAULT_TEMPLATE,
        )]
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        let template = NameTemplate::parse(ctx.options.str("name_format")?)?;
        let mut table = MappingTable::new();
        let names = &mut self.names;
        ctx.replace_tree(|tree, ctx| {
            let taken = collect_identifiers(&tree);
            let mut generate = SymbolWalker::new(MappingGenerator::new(&template, names, &taken, ctx.rng));
            let tree = walk_module_mut(&mut generate, tree)?;
            table = generate.into_sites().into_table();

            let mut apply = SymbolWalker::new(MappingApplicator::new(&table));
            let tree = walk_module_mut(&mut apply, tree)?;
            debug!(
                file = ctx.file(),
                mappings = table.len(),
                rewrites = apply.into_sites().rewrites(),
                "renamed symbols"
            );
            Ok(tree)
        })?;

        if ctx.is_batch() {
            propagate(ctx, &table)?;
        }
        Ok(())
    }
}

/// Number of path components, for picking the batch root.
fn depth(file: &str) -> usize {
    Path::new(file).components().count()
}

/// Push the current file's module-level renames into its siblings.
fn propagate(ctx: &mut PassContext<'_>, table: &MappingTable) -> ShroudResult<()> {
    let mappings = table.module_level();
    if mappings.is_empty() {
        return Ok(());
    }
    let Some(files) = ctx.all_files() else {
        return Ok(());
    };
    // The first of the shallowest files.
    let root = files
        .iter()
        .reduce(|best, f| if depth(f) < depth(best) { f } else { best })
        .cloned()
        .unwrap_or_default();
    let this = ctx.file().to_string();

    for (that, tree) in ctx.siblings_mut() {
        let rewritten = cross_file::rewrite_sibling(std::mem::take(tree), &mappings, &this, that, &root)?;
        *tree = rewritten;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shroud_core::{Config, Diagnostics, Rng};
    use shroud_interp::{Interpreter, Value};
    use shroud_parser::{parse, unparse};

    fn rename_with(src: &str, template: &str) -> String {
        let mut config = Config::new();
        config.enable("renamer").set("renamer.name_format", template);
        let options = config.resolve("renamer", &Renamer::default().options()).unwrap();
        let mut trees = vec![parse(src).unwrap()];
        let files = vec!["/t.py".to_string()];
        let mut rng = Rng::seeded(3);
        let mut diags = Diagnostics::new();
        let mut ctx = PassContext::new(&mut trees, &files, 0, false, &options, &mut rng, &mut diags);
        Renamer::default().transform(&mut ctx).unwrap();
        unparse(&trees[0])
    }

    fn rename(src: &str) -> String {
        rename_with(src, DEFAULT_TEMPLATE)
    }

    #[rstest]
    #[case("x = 1\ny = x + 1\n", "var0 = 1\nvar1 = var0 + 1\n")]
    #[case(
        "def f(a, b=2):\n    c = a + b\n    return c\nf(1)\n",
        "def method0(arg0, arg1=2):\n    var0 = arg0 + arg1\n    return var0\nmethod0(1)\n"
    )]
    #[case("import os\nos.getcwd()\n", "import os as var0\nvar0.getcwd()\n")]
    #[case("import os.path\nos.path.join\n", "import os.path\nos.path.join\n")]
    #[case("from m import a as b\nb()\n", "from m import a as var0\nvar0()\n")]
    #[case("print(len([]))\n", "print(len([]))\n")]
    #[case("__all__ = []\n", "__all__ = []\n")]
    fn test_rename(#[case] src: &str, #[case] expected: &str) {
        assert_eq!(rename(src), expected);
    }

    #[test]
    fn test_keyword_arguments_follow_parameters() {
        let out = rename("def f(a):\n    return a\nv = f(a=1)\n");
        assert_eq!(out, "def method0(arg0):\n    return arg0\nvar0 = method0(arg0=1)\n");
    }

    #[test]
    fn test_class_members_keep_their_names() {
        let out = rename(
            "class C:\n    size = 1\n    def grow(self, by):\n        self.size += by\nc = C()\nc.grow(by=2)\n",
        );
        assert_eq!(
            out,
            "class class0:\n    size = 1\n    def grow(self, by):\n        self.size += by\nvar0 = class0()\nvar0.grow(by=2)\n"
        );
    }

    #[test]
    fn test_global_shares_module_name() {
        let out = rename("n = 0\ndef bump():\n    global n\n    n = n + 1\n");
        assert_eq!(
            out,
            "var0 = 0\ndef method0():\n    global var0\n    var0 = var0 + 1\n"
        );
    }

    #[test]
    fn test_global_without_module_binding() {
        let out = rename("def set_it():\n    global late\n    late = 1\nset_it()\nv = late\n");
        assert_eq!(
            out,
            "def method0():\n    global var0\n    var0 = 1\nmethod0()\nvar1 = var0\n"
        );
    }

    #[test]
    fn test_nonlocal_shares_enclosing_name() {
        let out = rename(
            "def outer():\n    n = 0\n    def inner():\n        nonlocal n\n        n = 1\n    inner()\n    return n\n",
        );
        assert_eq!(
            out,
            "def method0():\n    var0 = 0\n    def method1():\n        nonlocal var0\n        var0 = 1\n    method1()\n    return var0\n"
        );
    }

    #[test]
    fn test_comprehension_first_iterable_is_outside() {
        let out = rename("x = [1]\ny = [x for x in x]\n");
        assert_eq!(out, "var0 = [1]\nvar2 = [var1 for var1 in var0]\n");
    }

    #[test]
    fn test_lambda_parameters() {
        let out = rename("f = lambda a: a * 2\n");
        assert_eq!(out, "var0 = lambda arg0: arg0 * 2\n");
    }

    #[test]
    fn test_existing_names_are_never_reused() {
        let out = rename("var0 = 1\nx = var0\n");
        assert!(out.starts_with("var1 = 1\nvar2 = var1\n"), "{out}");
    }

    #[test]
    fn test_counter_template() {
        assert_eq!(rename_with("a = 1\nb = a\n", "_{counter}"), "_0 = 1\n_1 = _0\n");
    }

    #[test]
    fn test_match_captures_are_renamed() {
        let src = "\
def classify(p):
    match p:
        case [head, *tail]:
            return head + len(tail)
        case {'k': found, **extra}:
            return found + len(extra)
        case int(n) as whole if n > 1:
            return whole * 2
    return 0
v = [classify([5, 1, 1]), classify({'k': 9}), classify(4), classify(1)]
";
        let out = rename(src);
        assert!(
            out.contains("case [var0, *var1]:\n            return var0 + len(var1)"),
            "{out}"
        );
        assert!(out.contains("case {'k': var2, **var3}:"), "{out}");
        assert!(out.contains("case int(var4) as var5 if var4 > 1:"), "{out}");
        let after = Interpreter::run_source(&out).unwrap();
        assert_eq!(
            after.global("var6"),
            Some(&Value::List(vec![Value::Int(7), Value::Int(9), Value::Int(8), Value::Int(0)]))
        );
    }

    #[test]
    fn test_behaviour_is_preserved() {
        let src = "\
total = 0
def add(values, scale=1):
    global total
    for v in values:
        total = total + v * scale
    return total
class Box:
    def __init__(self, item):
        self.item = item
    def get(self):
        return self.item
def counter():
    count = 0
    def step():
        nonlocal count
        count += 1
        return count
    return step
step = counter()
step()
squares = [n * n for n in range(4) if n]
v = (add([1, 2], scale=2), Box(5).get(), step(), squares, (lambda q: q + 1)(1))
";
        let out = rename(src);
        let before = Interpreter::run_source(src).unwrap();
        let after = Interpreter::run_source(&out).unwrap();
        let expected = before.global("v").cloned().unwrap();
        assert_eq!(
            expected,
            Value::Tuple(vec![
                Value::Int(6),
                Value::Int(5),
                Value::Int(2),
                Value::List(vec![Value::Int(1), Value::Int(4), Value::Int(9)]),
                Value::Int(2),
            ])
        );
        let renamed = out
            .lines()
            .find_map(|l| l.split_once(" = (").map(|(name, _)| name.to_string()))
            .unwrap();
        assert_eq!(after.global(&renamed), Some(&expected), "{out}");
    }
}
