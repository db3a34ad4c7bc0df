//! Moves every string literal into one module-level list.
//!
//! Literals become `L[i]` lookups, or a sum of lookups when `sample_size`
//! splits them into chunks. Identical chunks share a slot. Class and
//! function docstrings are dropped first so they do not bloat the list.

use crate::util::{assign, formatted, has_docstring, insert_prologue, rnd_name};
use crate::{Pass, PassContext};
use shroud_core::{Diagnostics, OptionDomain, OptionSpec, ShroudResult};
use shroud_parser::ast::{BinOp, Expr, ExprKind, Stmt, StmtKind};
use shroud_parser::visit::{Transformer, walk_expr_mut, walk_module_mut, walk_stmt_mut};
use rustc_hash::FxHashMap;

/// The `string_collector` pass.
pub struct StringCollector;

impl Pass for StringCollector {
    fn name(&self) -> &'static str {
        "string_collector"
    }

    fn description(&self) -> &'static str {
        "Collects all strings into a list"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::new(
                "sample_size",
                "How many characters to store in one list element; -1 stores whole strings",
                -1i64,
            )
            .with_domain(OptionDomain::Range(-1, i64::MAX)),
            OptionSpec::new("max_samples", "Most elements one string may be split into", 512i64)
                .with_domain(OptionDomain::Range(1, i64::MAX)),
        ]
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        let sample_size = match ctx.options.int("sample_size")? {
            n if n <= 0 => None,
            n => Some(usize::try_from(n).unwrap_or(usize::MAX)),
        };
        let max_samples = usize::try_from(ctx.options.int("max_samples")?).unwrap_or(usize::MAX);
        let file = ctx.file().to_string();
        ctx.replace_tree(|tree, ctx| {
            let mut collector = Collector {
                list_name: rnd_name(ctx.rng),
                collected: Vec::new(),
                index: FxHashMap::default(),
                sample_size,
                max_samples,
                in_literal: false,
                diags: ctx.diags,
                file: &file,
            };
            let mut tree = walk_module_mut(&mut collector, tree)?;
            let list = Expr::synthetic(ExprKind::List(
                collector.collected.into_iter().map(Expr::str).collect(),
            ));
            insert_prologue(&mut tree.body, [assign(&collector.list_name, list)]);
            Ok(tree)
        })
    }
}

struct Collector<'a> {
    list_name: String,
    collected: Vec<String>,
    index: FxHashMap<String, usize>,
    sample_size: Option<usize>,
    max_samples: usize,
    in_literal: bool,
    diags: &'a mut Diagnostics,
    file: &'a str,
}

impl Collector<'_> {
    fn slot(&mut self, chunk: String) -> usize {
        if let Some(&i) = self.index.get(&chunk) {
            return i;
        }
        let i = self.collected.len();
        self.index.insert(chunk.clone(), i);
        self.collected.push(chunk);
        i
    }

    fn lookup(&self, slot: usize) -> Expr {
        Expr::subscript(Expr::name(&self.list_name), Expr::int(slot as i64))
    }
}

/// `text` split into runs of at most `size` characters. Empty text yields
/// one empty chunk.
fn chunks(text: &str, size: Option<usize>) -> Vec<String> {
    let Some(size) = size else {
        return vec![text.to_string()];
    };
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

impl Transformer for Collector<'_> {
    fn visit_stmt(&mut self, mut stmt: Stmt) -> ShroudResult<Stmt> {
        if let StmtKind::FunctionDef { body, .. } | StmtKind::ClassDef { body, .. } = &mut stmt.kind
            && has_docstring(body)
        {
            body.remove(0);
            if body.is_empty() {
                body.push(Stmt::new(StmtKind::Pass, stmt.span));
            }
        }
        walk_stmt_mut(self, stmt)
    }

    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        match expr.kind {
            ExprKind::JoinedStr(_) => {
                let saved = self.in_literal;
                self.in_literal = true;
                let out = walk_expr_mut(self, expr);
                self.in_literal = saved;
                out
            }
            ExprKind::FormattedValue { .. } => {
                let saved = self.in_literal;
                self.in_literal = false;
                let out = walk_expr_mut(self, expr);
                self.in_literal = saved;
                out
            }
            ExprKind::String(text) => {
                let parts = chunks(&text, self.sample_size);
                if parts.len() > self.max_samples {
                    self.diags.warn(
                        self.file,
                        expr.span,
                        format!(
                            "Would need {} samples, {} is max",
                            parts.len(),
                            self.max_samples
                        ),
                    );
                    return Ok(Expr::new(ExprKind::String(text), expr.span));
                }
                let mut terms = parts.into_iter().map(|p| {
                    let slot = self.slot(p);
                    self.lookup(slot)
                });
                let first = terms.next().unwrap_or_else(|| Expr::str(""));
                let mut out = terms.fold(first, |acc, t| Expr::binop(acc, BinOp::Add, t));
                out.span = expr.span;
                Ok(if self.in_literal { formatted(out) } else { out })
            }
            kind => walk_expr_mut(self, Expr::new(kind, expr.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shroud_core::{Config, Rng};
    use shroud_interp::{Interpreter, Value};
    use shroud_parser::{parse, unparse};

    fn run(src: &str, sample_size: i64, max_samples: i64) -> (String, Diagnostics) {
        let mut config = Config::new();
        config
            .enable("string_collector")
            .set("string_collector.sample_size", sample_size)
            .set("string_collector.max_samples", max_samples);
        let options = config
            .resolve("string_collector", &StringCollector.options())
            .unwrap();
        let mut trees = vec![parse(src).unwrap()];
        let files = vec!["/c.py".to_string()];
        let mut rng = Rng::seeded(5);
        let mut diags = Diagnostics::new();
        let mut ctx = PassContext::new(&mut trees, &files, 0, false, &options, &mut rng, &mut diags);
        StringCollector.transform(&mut ctx).unwrap();
        (unparse(&trees[0]), diags)
    }

    fn value_of(src: &str) -> Value {
        Interpreter::run_source(src).unwrap().global("v").cloned().unwrap()
    }

    #[rstest]
    #[case(-1)]
    #[case(1)]
    #[case(3)]
    fn test_values_survive(#[case] sample_size: i64) {
        let (out, _) = run("v = 'hello' + '' + 'h\u{e9}llo'\n", sample_size, 512);
        assert_eq!(value_of(&out), Value::Str("hello".to_string() + "h\u{e9}llo"));
    }

    #[test]
    fn test_list_comes_first_and_dedups() {
        let (out, _) = run("a = 'x'\nb = 'x'\n", -1, 512);
        let first = out.lines().next().unwrap();
        assert!(first.ends_with(" = ['x']"), "{out}");
    }

    #[test]
    fn test_chunks_share_slots() {
        assert_eq!(chunks("abab", Some(2)), ["ab", "ab"]);
        assert_eq!(chunks("", Some(2)), [""]);
        assert_eq!(chunks("a b c", None), ["a b c"]);
        let (out, _) = run("v = 'abab'\n", 2, 512);
        assert!(out.lines().next().unwrap().ends_with(" = ['ab']"), "{out}");
    }

    #[test]
    fn test_too_many_samples_warns() {
        let (out, diags) = run("v = 'abcdef'\n", 1, 3);
        assert!(out.contains("'abcdef'"));
        assert_eq!(diags.warnings()[0].message, "Would need 6 samples, 3 is max");
    }

    #[test]
    fn test_docstrings_dropped() {
        let (out, _) = run("def f():\n    'doc'\nclass C:\n    'doc'\n    x = 1\n", -1, 512);
        assert!(!out.contains("doc"), "{out}");
        assert!(out.contains("def f():\n    pass"), "{out}");
    }

    #[test]
    fn test_fstring_literals_become_fields() {
        let (out, _) = run("n = 2\nv = f'n={n}'\n", -1, 512);
        assert_eq!(value_of(&out), Value::Str("n=2".into()));
    }
}
