//! Builtin types reached through chains of empty subclasses.
//!
//! Every load of an aliased builtin becomes `Alias.mro()[depth]`, where
//! `Alias` ends a chain of `depth` empty classes rooted at the builtin. A
//! fresh chain is made per load, and all chains are defined at the top of
//! the module, interleaved layer by layer so no chain reads as one block.

use crate::util::{insert_prologue, random_identifier};
use crate::{Pass, PassContext};
use rustc_hash::FxHashSet;
use shroud_core::{OptionDomain, OptionSpec, OptionValue, Rng, ShroudResult};
use shroud_parser::ast::{
    Alias, Arg, ExceptHandler, Expr, ExprContext, ExprKind, Module, Pattern, Stmt, StmtKind,
};
use shroud_parser::visit::{
    Transformer, Visitor, walk_expr, walk_expr_mut, walk_module, walk_module_mut, walk_stmt,
};
use tracing::debug;

/// Builtins that can be subclassed. `bool` and `range` are final.
const ALIASABLE: &[&str] = &[
    "bytes", "complex", "dict", "filter", "float", "int", "list", "map", "set", "str", "tuple",
];

const DEFAULT_CLASSES: &[&str] = &["str", "int", "float", "filter", "bytes", "map"];

/// Length of generated class names.
const NAME_LEN: usize = 32;

/// Chain length bounds.
const MIN_DEPTH: i64 = 5;
const MAX_DEPTH: i64 = 10;

/// The `type_alias` pass.
pub struct TypeAlias;

impl Pass for TypeAlias {
    fn name(&self) -> &'static str {
        "type_alias"
    }

    fn description(&self) -> &'static str {
        "Reaches builtin types through chains of alias classes"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::new(
                "classes_to_alias",
                "Builtin types to reach through alias classes",
                OptionValue::List(DEFAULT_CLASSES.iter().map(|c| (*c).to_string()).collect()),
            )
            .with_domain(OptionDomain::SubsetOf(ALIASABLE)),
        ]
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        let wanted = ctx.options.list("classes_to_alias")?.to_vec();
        ctx.replace_tree(|tree, ctx| {
            let bound = bound_names(&tree);
            let mut aliaser = Aliaser {
                targets: wanted.into_iter().filter(|t| !bound.contains(t)).collect(),
                rng: ctx.rng,
                chains: Vec::new(),
            };
            let mut tree = walk_module_mut(&mut aliaser, tree)?;
            debug!(loads = aliaser.chains.len(), "aliased builtin types");
            insert_prologue(&mut tree.body, interleave(aliaser.chains));
            Ok(tree)
        })
    }
}

struct Aliaser<'r> {
    targets: Vec<String>,
    rng: &'r mut Rng,
    /// One chain of class definitions per rewritten load, root first.
    chains: Vec<Vec<Stmt>>,
}

impl Aliaser<'_> {
    /// Define `depth` classes, each deriving from the one before and the
    /// first from `target`. Returns the last name.
    fn chain(&mut self, target: &str, depth: i64) -> String {
        let mut base = target.to_string();
        let mut chain = Vec::new();
        for _ in 0..depth {
            let name = random_identifier(self.rng, NAME_LEN);
            chain.push(empty_class(&name, &base));
            base = name;
        }
        self.chains.push(chain);
        base
    }
}

impl Transformer for Aliaser<'_> {
    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        match &expr.kind {
            ExprKind::Name {
                id,
                ctx: ExprContext::Load,
            } if self.targets.contains(id) => {
                let depth = self.rng.range_inclusive(MIN_DEPTH, MAX_DEPTH);
                let alias = self.chain(id, depth);
                let mro = Expr::call(Expr::attr(Expr::name(alias), "mro"), Vec::new());
                let mut lookup = Expr::subscript(mro, Expr::int(depth));
                lookup.span = expr.span;
                Ok(lookup)
            }
            _ => walk_expr_mut(self, expr),
        }
    }
}

/// `class name(base): ...`
fn empty_class(name: &str, base: &str) -> Stmt {
    Stmt::synthetic(StmtKind::ClassDef {
        name: name.to_string(),
        bases: vec![Expr::name(base)],
        keywords: Vec::new(),
        body: vec![Stmt::expr(Expr::synthetic(ExprKind::Ellipsis))],
        decorator_list: Vec::new(),
    })
}

/// Layer `i` of every chain, then layer `i + 1`, keeping each chain's
/// definitions in dependency order.
fn interleave(chains: Vec<Vec<Stmt>>) -> Vec<Stmt> {
    let mut chains: Vec<_> = chains.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::new();
    loop {
        let before = out.len();
        out.extend(chains.iter_mut().filter_map(Iterator::next));
        if out.len() == before {
            return out;
        }
    }
}

/// Names bound anywhere in `module`. A builtin rebound in any scope keeps
/// its spelling everywhere.
fn bound_names(module: &Module) -> FxHashSet<String> {
    let mut bindings = Bindings::default();
    walk_module(&mut bindings, module);
    bindings.names
}

#[derive(Default)]
struct Bindings {
    names: FxHashSet<String>,
}

impl Visitor for Bindings {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let StmtKind::FunctionDef { name, .. } | StmtKind::ClassDef { name, .. } = &stmt.kind {
            self.names.insert(name.clone());
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Name { id, ctx } = &expr.kind {
            if *ctx != ExprContext::Load {
                self.names.insert(id.clone());
            }
        }
        walk_expr(self, expr);
    }

    fn visit_arg(&mut self, arg: &Arg) {
        self.names.insert(arg.arg.clone());
    }

    fn visit_alias(&mut self, alias: &Alias) {
        let bound = alias
            .asname
            .as_deref()
            .unwrap_or_else(|| alias.name.split('.').next().unwrap_or(&alias.name));
        self.names.insert(bound.to_string());
    }

    fn visit_except_handler(&mut self, handler: &ExceptHandler) {
        if let Some(name) = &handler.name {
            self.names.insert(name.clone());
        }
        self.visit_body(&handler.body);
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        self.names.extend(pattern.captures().into_iter().map(str::to_string));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::{Config, Diagnostics, ShroudError};
    use shroud_interp::Interpreter;
    use shroud_parser::{parse, unparse};

    fn run_with(src: &str, classes: Option<&str>) -> ShroudResult<String> {
        let mut config = Config::new();
        config.enable("type_alias");
        if let Some(classes) = classes {
            config.set_raw("type_alias.classes_to_alias", classes);
        }
        let options = config.resolve("type_alias", &TypeAlias.options())?;
        let mut trees = vec![parse(src).unwrap()];
        let files = vec!["/t.py".to_string()];
        let mut rng = Rng::seeded(11);
        let mut diags = Diagnostics::new();
        let mut ctx = PassContext::new(&mut trees, &files, 0, false, &options, &mut rng, &mut diags);
        TypeAlias.transform(&mut ctx)?;
        Ok(unparse(&trees[0]))
    }

    fn run(src: &str) -> String {
        run_with(src, None).unwrap()
    }

    fn class_count(out: &str) -> usize {
        out.lines().filter(|l| l.starts_with("class ")).count()
    }

    #[test]
    fn test_load_becomes_mro_lookup() {
        let out = run("v = str(5)\n");
        let depth = class_count(&out);
        assert!((5..=10).contains(&depth), "{out}");
        let last = out.lines().last().unwrap();
        assert!(last.starts_with("v = "), "{out}");
        assert!(last.ends_with(&format!(".mro()[{depth}](5)")), "{out}");
    }

    #[test]
    fn test_each_load_gets_its_own_chain() {
        let out = run("a = int('1')\nb = int('2')\n");
        let roots = out.lines().filter(|l| l.ends_with("(int):")).count();
        assert_eq!(roots, 2, "{out}");
        // Both roots come first: chains are interleaved layer by layer.
        let classes: Vec<&str> = out.lines().filter(|l| l.starts_with("class ")).collect();
        assert!(classes[0].ends_with("(int):") && classes[1].ends_with("(int):"), "{out}");
    }

    #[test]
    fn test_rebound_builtins_are_left_alone() {
        let out = run("def f(str):\n    return str\nv = (f(1), int('3'))\n");
        assert!(out.contains("return str\n"), "{out}");
        assert!(!out.contains("int('3')"), "{out}");
    }

    #[test]
    fn test_only_listed_classes() {
        let out = run_with("v = (str(1), float(2))\n", Some("float")).unwrap();
        assert!(out.contains("(str(1), "), "{out}");
        assert!(!out.contains("float(2)"), "{out}");
    }

    #[test]
    fn test_final_types_are_rejected() {
        let err = run_with("v = 1\n", Some("str,bool")).unwrap_err();
        assert!(matches!(err, ShroudError::InvalidOption { .. }), "{err}");
    }

    #[test]
    fn test_future_imports_stay_first() {
        let out = run("from __future__ import annotations\nv = int\n");
        assert!(out.starts_with("from __future__ import annotations\nclass "), "{out}");
    }

    #[test]
    fn test_behaviour() {
        let src = "\
def total(xs):
    return sum(map(int, filter(str.isdigit, xs)))
v = (total(['1', 'x', '22']), str(3) + 'a', float('1.5'), bytes([65, 66]), isinstance(4, int))
";
        let before = Interpreter::run_source(src).unwrap();
        let after = Interpreter::run_source(&run(src)).unwrap();
        assert_eq!(after.global("v"), before.global("v"));
        assert!(after.global("v").is_some());
    }

    #[test]
    fn test_interleave_keeps_dependency_order() {
        let chains = vec![
            vec![empty_class("a1", "int"), empty_class("a2", "a1")],
            vec![empty_class("b1", "str")],
        ];
        let out = unparse(&Module::new(interleave(chains)));
        assert_eq!(
            out,
            "class a1(int):\n    ...\nclass b1(str):\n    ...\nclass a2(a1):\n    ...\n"
        );
    }
}
