//! Propagating module-level renames into the other files of a batch.
//!
//! After a file is renamed, every sibling is scanned once, top to bottom,
//! for the ways it can reach that file's names:
//!
//! - `from <module> import name [as alias]` (and `*`)
//! - attribute chains through names known to hold the module, where a name
//!   becomes known through `import <module> [as x]`, `x = __import__(...)`
//!   or `x = <known name>`, and stops being known when anything else is
//!   assigned to it
//!
//! The scan ignores scopes and control flow.

use shroud_core::ShroudResult;
use shroud_parser::ast::{Alias, Expr, ExprKind, Stmt, StmtKind};
use shroud_parser::visit::{Transformer, walk_expr_mut, walk_stmt_mut};
use rustc_hash::FxHashMap;
use std::path::{Component, Path};
use tracing::debug;

/// The module name `from` would use to import `to`.
///
/// Files below the common directory of the two become relative imports with
/// one leading dot per level plus one; `__init__.py` names its package.
#[must_use]
pub fn compute_import_path(from: &str, to: &str) -> String {
    let parts = |p: &str| -> Vec<String> {
        Path::new(p)
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    };
    let from = parts(from);
    let mut to = parts(to);
    let common = from
        .iter()
        .zip(&to)
        .take(from.len().min(to.len()).saturating_sub(1))
        .take_while(|(a, b)| a == b)
        .count();

    let extra_levels = from.len() - common - 1;
    let mut out = if extra_levels > 0 {
        ".".repeat(extra_levels + 1)
    } else {
        String::new()
    };
    if to.last().is_some_and(|f| f == "__init__.py") {
        to.pop();
    }
    let module = to[common.min(to.len())..].join(".");
    out.push_str(module.strip_suffix(".py").unwrap_or(&module));
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// Every spelling under which the file `from` may import the file `to`.
#[must_use]
pub fn import_names(from: &str, to: &str) -> Vec<String> {
    let path = compute_import_path(from, to);
    if path.starts_with('.') {
        vec![path]
    } else {
        let relative = format!(".{path}");
        vec![path, relative]
    }
}

/// Dotted spelling of a name or attribute chain.
fn dotted(expr: &Expr) -> Option<Vec<&str>> {
    match &expr.kind {
        ExprKind::Name { id, .. } => Some(vec![id.as_str()]),
        ExprKind::Attribute { value, attr } => {
            let mut parts = dotted(value)?;
            parts.push(attr);
            Some(parts)
        }
        _ => None,
    }
}

fn chain(parts: &[String], template: &Expr) -> Expr {
    let mut expr = Expr::new(
        ExprKind::Name {
            id: parts[0].clone(),
            ctx: shroud_parser::ExprContext::Load,
        },
        template.span,
    );
    for part in &parts[1..] {
        expr = Expr::new(
            ExprKind::Attribute {
                value: Box::new(expr),
                attr: part.clone(),
            },
            template.span,
        );
    }
    expr
}

/// Rewrites one sibling tree against one renamed module.
pub struct CrossFileRewriter<'a> {
    mappings: &'a FxHashMap<String, String>,
    modules: Vec<String>,
    aliases: Vec<Vec<String>>,
    rewrites: usize,
}

impl<'a> CrossFileRewriter<'a> {
    /// A rewriter for imports of any of `modules`.
    #[must_use]
    pub fn new(mappings: &'a FxHashMap<String, String>, modules: Vec<String>) -> Self {
        Self {
            mappings,
            modules,
            aliases: Vec::new(),
            rewrites: 0,
        }
    }

    /// Sites rewritten so far.
    #[must_use]
    pub const fn rewrites(&self) -> usize {
        self.rewrites
    }

    fn is_module(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m == name)
    }

    fn track(&mut self, parts: Vec<String>) {
        if !self.aliases.contains(&parts) {
            self.aliases.push(parts);
        }
    }

    fn untrack(&mut self, parts: &[String]) {
        self.aliases.retain(|a| a != parts);
    }

    /// `from <module> import …` with its names mapped; a star import gets
    /// a companion import that restores the original spellings.
    fn import_from(&mut self, names: Vec<Alias>) -> (Vec<Alias>, Option<Vec<Alias>>) {
        if let [star] = names.as_slice()
            && star.name == "*"
        {
            let mut restored: Vec<(&String, &String)> = self.mappings.iter().collect();
            restored.sort();
            let companions = restored
                .into_iter()
                .map(|(old, new)| Alias {
                    name: new.clone(),
                    asname: Some(old.clone()),
                    span: star.span,
                })
                .collect::<Vec<_>>();
            self.rewrites += companions.len();
            return (names, (!companions.is_empty()).then_some(companions));
        }
        let names = names
            .into_iter()
            .map(|mut alias| {
                if let Some(new) = self.mappings.get(&alias.name) {
                    alias.asname = alias.asname.or_else(|| Some(alias.name.clone()));
                    alias.name = new.clone();
                    self.rewrites += 1;
                }
                alias
            })
            .collect();
        (names, None)
    }

    /// Update tracked names for `targets = value`.
    fn assignment(&mut self, targets: &[Expr], value: &Expr) {
        let imports_module = matches!(
            &value.kind,
            ExprKind::Call { func, args, .. }
                if func.as_name() == Some("__import__")
                    && matches!(args.first().map(|a| &a.kind), Some(ExprKind::String(m)) if self.is_module(m))
        );
        let copies_alias = dotted(value).is_some_and(|parts| {
            self.aliases
                .iter()
                .any(|a| a.iter().map(String::as_str).eq(parts.iter().copied()))
        });
        for target in targets {
            let Some(parts) = dotted(target) else {
                continue;
            };
            let parts: Vec<String> = parts.into_iter().map(str::to_string).collect();
            if imports_module || copies_alias {
                self.track(parts);
            } else {
                self.untrack(&parts);
            }
        }
    }

    /// Map the first name after a tracked module prefix.
    fn remap_chain(&mut self, expr: &Expr) -> Option<Expr> {
        let parts: Vec<String> = dotted(expr)?.into_iter().map(str::to_string).collect();
        let prefix = self
            .aliases
            .iter()
            .filter(|a| a.len() < parts.len() && parts.starts_with(a))
            .map(Vec::len)
            .max()?;
        let new = self.mappings.get(&parts[prefix])?;
        let mut parts = parts;
        parts[prefix] = new.clone();
        self.rewrites += 1;
        Some(chain(&parts, expr))
    }
}

impl Transformer for CrossFileRewriter<'_> {
    fn visit_body(&mut self, body: Vec<Stmt>) -> ShroudResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            let span = stmt.span;
            match stmt.kind {
                StmtKind::ImportFrom {
                    module,
                    names,
                    level,
                } => {
                    let resolved = format!(
                        "{}{}",
                        ".".repeat(level as usize),
                        module.as_deref().unwrap_or_default()
                    );
                    if self.is_module(&resolved) {
                        let (names, companions) = self.import_from(names);
                        out.push(Stmt::new(
                            StmtKind::ImportFrom {
                                module: module.clone(),
                                names,
                                level,
                            },
                            span,
                        ));
                        if let Some(names) = companions {
                            out.push(Stmt::new(StmtKind::ImportFrom { module, names, level }, span));
                        }
                    } else {
                        out.push(Stmt::new(StmtKind::ImportFrom { module, names, level }, span));
                    }
                }
                kind => out.push(self.visit_stmt(Stmt::new(kind, span))?),
            }
        }
        Ok(out)
    }

    fn visit_stmt(&mut self, stmt: Stmt) -> ShroudResult<Stmt> {
        match &stmt.kind {
            StmtKind::Import(names) => {
                for alias in names {
                    if self.is_module(&alias.name) {
                        let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                        self.track(bound.split('.').map(str::to_string).collect());
                    }
                }
                Ok(stmt)
            }
            StmtKind::Assign { targets, value } => {
                self.assignment(targets, value);
                walk_stmt_mut(self, stmt)
            }
            _ => walk_stmt_mut(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        if matches!(expr.kind, ExprKind::Attribute { .. })
            && let Some(rewritten) = self.remap_chain(&expr)
        {
            return Ok(rewritten);
        }
        walk_expr_mut(self, expr)
    }
}

/// Rewrite `tree` (the file `that`) for the module-level renames of the
/// file `this`. `root` is the batch's shallowest file.
pub fn rewrite_sibling(
    tree: shroud_parser::ast::Module,
    mappings: &FxHashMap<String, String>,
    this: &str,
    that: &str,
    root: &str,
) -> ShroudResult<shroud_parser::ast::Module> {
    let mut modules = import_names(that, this);
    for name in import_names(root, this) {
        if !modules.contains(&name) {
            modules.push(name);
        }
    }
    let mut rewriter = CrossFileRewriter::new(mappings, modules);
    let tree = shroud_parser::visit::walk_module_mut(&mut rewriter, tree)?;
    debug!(file = that, from = this, rewrites = rewriter.rewrites(), "cross-file renames");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shroud_parser::{parse, unparse};

    #[rstest]
    #[case("/p/b.py", "/p/a.py", "a")]
    #[case("/p/b.py", "/p/sub/a.py", "sub.a")]
    #[case("/p/b.py", "/p/sub/__init__.py", "sub")]
    #[case("/p/sub/b.py", "/p/a.py", "..a")]
    #[case("/p/x/y/b.py", "/p/a.py", "...a")]
    #[case("/p/sub/b.py", "/p/__init__.py", "..")]
    #[case("/p/b.py", "/p/__init__.py", ".")]
    fn test_compute_import_path(#[case] from: &str, #[case] to: &str, #[case] expected: &str) {
        assert_eq!(compute_import_path(from, to), expected);
    }

    #[test]
    fn test_import_names_add_relative_form() {
        assert_eq!(import_names("/p/b.py", "/p/a.py"), ["a", ".a"]);
        assert_eq!(import_names("/p/sub/b.py", "/p/a.py"), ["..a"]);
    }

    fn rewrite(src: &str) -> String {
        let mappings: FxHashMap<String, String> = [("helper", "method0"), ("value", "var0")]
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let tree = rewrite_sibling(parse(src).unwrap(), &mappings, "/p/a.py", "/p/b.py", "/p/b.py").unwrap();
        unparse(&tree)
    }

    #[rstest]
    #[case("from a import helper\n", "from a import method0 as helper\n")]
    #[case("from .a import helper as h, other\n", "from .a import method0 as h, other\n")]
    #[case("from c import helper\n", "from c import helper\n")]
    #[case(
        "from a import *\n",
        "from a import *\nfrom a import method0 as helper, var0 as value\n"
    )]
    #[case("import a\na.helper(a.value.real)\n", "import a\na.method0(a.var0.real)\n")]
    #[case("import a as m\nm.helper()\n", "import a as m\nm.method0()\n")]
    #[case("m = __import__('a')\nm.helper()\n", "m = __import__('a')\nm.method0()\n")]
    #[case("import a\nm = a\nm.helper()\n", "import a\nm = a\nm.method0()\n")]
    #[case("import a\na = 1\na.helper()\n", "import a\na = 1\na.helper()\n")]
    #[case("import a\nb.helper()\n", "import a\nb.helper()\n")]
    fn test_rewrite_sibling(#[case] src: &str, #[case] expected: &str) {
        assert_eq!(rewrite(src), expected);
    }
}
