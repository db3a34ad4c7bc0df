//! The scope-tracking traversal shared by both renaming phases.
//!
//! The walker owns the scope stack and decides, for every node, which scope
//! it is evaluated in: decorators, defaults, annotations and a
//! comprehension's first iterable belong to the enclosing scope. Binding
//! and reference sites are reported to a [`SymbolSites`] implementation,
//! which may return a replacement spelling.

use super::scope::ScopeStack;
use shroud_core::ShroudResult;
use shroud_parser::ast::{
    Alias, Arguments, Comprehension, ExceptHandler, Expr, ExprContext, ExprKind, Keyword, Pattern,
    PatternKind, Stmt, StmtKind,
};
use shroud_parser::visit::{Transformer, walk_expr_mut, walk_pattern_mut, walk_stmt_mut};

/// What kind of binding a name site is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site<'a> {
    /// Assignment, loop, `with`, walrus, `except` targets and `case` captures.
    Variable,
    /// A `def` name.
    Function,
    /// A `class` name.
    Class,
    /// A parameter; `function` is the name of the enclosing `def`, `None`
    /// for lambdas.
    Parameter {
        /// Name of the function declaring it.
        function: Option<&'a str>,
    },
    /// An `import` or `from … import` alias.
    Import,
}

/// Callbacks for binding and reference sites. Each returns the new
/// spelling, or `None` to leave the site as written.
pub trait SymbolSites {
    /// `name` is bound at `path`.
    fn bind(&mut self, path: &[String], site: Site<'_>, name: &str) -> ShroudResult<Option<String>>;

    /// `name` is read or deleted at `path`.
    fn reference(&mut self, path: &[String], name: &str) -> Option<String>;

    /// Keyword argument `arg` in a call of the plain name `function`.
    fn keyword(&mut self, path: &[String], function: &str, arg: &str) -> Option<String>;

    /// `global name` at `path`.
    fn declare_global(&mut self, path: &[String], name: &str) -> ShroudResult<Option<String>>;

    /// `nonlocal name` at `path`.
    fn declare_nonlocal(&mut self, path: &[String], name: &str) -> ShroudResult<Option<String>>;
}

/// Tree transformer driving a [`SymbolSites`] implementation.
pub struct SymbolWalker<S> {
    sites: S,
    scope: ScopeStack,
}

impl<S: SymbolSites> SymbolWalker<S> {
    /// A walker at module level.
    pub fn new(sites: S) -> Self {
        Self {
            sites,
            scope: ScopeStack::new(),
        }
    }

    /// Give back the callbacks.
    pub fn into_sites(self) -> S {
        self.sites
    }

    fn bind(&mut self, site: Site<'_>, name: String) -> ShroudResult<String> {
        Ok(self
            .sites
            .bind(self.scope.path(), site, &name)?
            .unwrap_or(name))
    }

    /// Defaults and annotations, evaluated where the function is defined.
    fn outer_arguments(&mut self, mut args: Arguments) -> ShroudResult<Arguments> {
        args.defaults = args
            .defaults
            .into_iter()
            .map(|d| self.visit_expr(d))
            .collect::<ShroudResult<_>>()?;
        args.kw_defaults = args
            .kw_defaults
            .into_iter()
            .map(|d| d.map(|d| self.visit_expr(d)).transpose())
            .collect::<ShroudResult<_>>()?;
        for arg in args.all_args_mut() {
            if let Some(annotation) = arg.annotation.take() {
                arg.annotation = Some(Box::new(self.visit_expr(*annotation)?));
            }
        }
        Ok(args)
    }

    /// Parameter names, bound inside the function scope.
    fn bind_parameters(&mut self, mut args: Arguments, function: Option<&str>) -> ShroudResult<Arguments> {
        for arg in args.all_args_mut() {
            let name = std::mem::take(&mut arg.arg);
            arg.arg = self.bind(Site::Parameter { function }, name)?;
        }
        Ok(args)
    }

    fn aliases(&mut self, names: Vec<Alias>, from: bool) -> ShroudResult<Vec<Alias>> {
        names
            .into_iter()
            .map(|mut alias| {
                // `import a.b` binds `a` to the package; dotted imports
                // without an alias are left alone.
                let skip = alias.name == "*" || (!from && alias.asname.is_none() && alias.name.contains('.'));
                if !skip {
                    let bound = alias.asname.clone().unwrap_or_else(|| alias.name.clone());
                    let new = self.bind(Site::Import, bound.clone())?;
                    if new != bound || alias.asname.is_some() {
                        alias.asname = Some(new);
                    }
                }
                Ok(alias)
            })
            .collect()
    }

    fn declarations(
        &mut self,
        names: Vec<String>,
        global: bool,
    ) -> ShroudResult<Vec<String>> {
        names
            .into_iter()
            .map(|name| {
                let path = self.scope.path();
                let new = if global {
                    self.sites.declare_global(path, &name)?
                } else {
                    self.sites.declare_nonlocal(path, &name)?
                };
                Ok(new.unwrap_or(name))
            })
            .collect()
    }

    /// A comprehension: the first iterable outside, everything else in a
    /// fresh scope labelled `label`.
    fn comprehension<T>(
        &mut self,
        label: &str,
        generators: Vec<Comprehension>,
        inner: impl FnOnce(&mut Self) -> ShroudResult<T>,
    ) -> ShroudResult<(Vec<Comprehension>, T)> {
        let mut generators = generators.into_iter();
        let Some(first) = generators.next() else {
            self.scope.push_anonymous(label);
            let out = inner(self);
            self.scope.pop();
            return Ok((Vec::new(), out?));
        };
        let first_iter = self.visit_expr(first.iter)?;

        self.scope.push_anonymous(label);
        let result = (|| -> ShroudResult<(Vec<Comprehension>, T)> {
            let mut out = vec![Comprehension {
                target: self.visit_expr(first.target)?,
                iter: first_iter,
                ifs: first
                    .ifs
                    .into_iter()
                    .map(|e| self.visit_expr(e))
                    .collect::<ShroudResult<_>>()?,
                is_async: first.is_async,
            }];
            for generator in generators {
                out.push(self.visit_comprehension(generator)?);
            }
            Ok((out, inner(self)?))
        })();
        self.scope.pop();
        result
    }
}

impl<S: SymbolSites> Transformer for SymbolWalker<S> {
    fn visit_stmt(&mut self, stmt: Stmt) -> ShroudResult<Stmt> {
        let span = stmt.span;
        let kind = match stmt.kind {
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
                returns,
                is_async,
            } => {
                let decorator_list = self.visit_body_exprs(decorator_list)?;
                let args = self.outer_arguments(*args)?;
                let returns = returns
                    .map(|r| self.visit_expr(*r).map(Box::new))
                    .transpose()?;
                let new_name = self.bind(Site::Function, name.clone())?;

                self.scope.push_function(&name);
                let inner = self
                    .bind_parameters(args, Some(&name))
                    .and_then(|args| Ok((args, self.visit_body(body)?)));
                self.scope.pop();
                let (args, body) = inner?;

                StmtKind::FunctionDef {
                    name: new_name,
                    args: Box::new(args),
                    body,
                    decorator_list,
                    returns,
                    is_async,
                }
            }
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorator_list,
            } => {
                let decorator_list = self.visit_body_exprs(decorator_list)?;
                let bases = self.visit_body_exprs(bases)?;
                let keywords = keywords
                    .into_iter()
                    .map(|k| self.visit_keyword(k))
                    .collect::<ShroudResult<_>>()?;
                let new_name = self.bind(Site::Class, name.clone())?;

                self.scope.push_class(&name);
                let body = self.visit_body(body);
                self.scope.pop();

                StmtKind::ClassDef {
                    name: new_name,
                    bases,
                    keywords,
                    body: body?,
                    decorator_list,
                }
            }
            StmtKind::Import(names) => StmtKind::Import(self.aliases(names, false)?),
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => {
                let names = if module.as_deref() == Some("__future__") {
                    names
                } else {
                    self.aliases(names, true)?
                };
                StmtKind::ImportFrom {
                    module,
                    names,
                    level,
                }
            }
            StmtKind::Global(names) => StmtKind::Global(self.declarations(names, true)?),
            StmtKind::Nonlocal(names) => StmtKind::Nonlocal(self.declarations(names, false)?),
            kind => return walk_stmt_mut(self, Stmt::new(kind, span)),
        };
        Ok(Stmt::new(kind, span))
    }

    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        let span = expr.span;
        let kind = match expr.kind {
            ExprKind::Name { id, ctx } => {
                let id = match ctx {
                    ExprContext::Store => self.bind(Site::Variable, id)?,
                    ExprContext::Load | ExprContext::Del => self
                        .sites
                        .reference(self.scope.path(), &id)
                        .unwrap_or(id),
                };
                ExprKind::Name { id, ctx }
            }
            ExprKind::NamedExpr { target, value } => {
                let value = self.visit_expr(*value)?;
                let Expr {
                    kind: target,
                    span: target_span,
                } = *target;
                let target = match target {
                    ExprKind::Name { id, ctx } => {
                        let new = self
                            .sites
                            .bind(self.scope.binding_path(), Site::Variable, &id)?
                            .unwrap_or(id);
                        Expr::new(ExprKind::Name { id: new, ctx }, target_span)
                    }
                    kind => self.visit_expr(Expr::new(kind, target_span))?,
                };
                ExprKind::NamedExpr {
                    target: Box::new(target),
                    value: Box::new(value),
                }
            }
            ExprKind::Lambda { args, body } => {
                let args = self.outer_arguments(*args)?;
                self.scope.push_anonymous("mt_<lambda>");
                let inner = self
                    .bind_parameters(args, None)
                    .and_then(|args| Ok((args, self.visit_expr(*body)?)));
                self.scope.pop();
                let (args, body) = inner?;
                ExprKind::Lambda {
                    args: Box::new(args),
                    body: Box::new(body),
                }
            }
            ExprKind::ListComp { elt, generators } => {
                let (generators, elt) = self.comprehension("sp_lc", generators, |w| w.visit_expr(*elt))?;
                ExprKind::ListComp {
                    elt: Box::new(elt),
                    generators,
                }
            }
            ExprKind::SetComp { elt, generators } => {
                let (generators, elt) = self.comprehension("sp_sc", generators, |w| w.visit_expr(*elt))?;
                ExprKind::SetComp {
                    elt: Box::new(elt),
                    generators,
                }
            }
            ExprKind::GeneratorExp { elt, generators } => {
                let (generators, elt) = self.comprehension("sp_ge", generators, |w| w.visit_expr(*elt))?;
                ExprKind::GeneratorExp {
                    elt: Box::new(elt),
                    generators,
                }
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let (generators, (key, value)) = self.comprehension("sp_dc", generators, |w| {
                    Ok((w.visit_expr(*key)?, w.visit_expr(*value)?))
                })?;
                ExprKind::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    generators,
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                // Keywords resolve against the callee's original name.
                let keywords: Vec<Keyword> = match func.as_name() {
                    Some(function) => keywords
                        .into_iter()
                        .map(|mut k| {
                            if let Some(arg) = &k.arg
                                && let Some(new) = self.sites.keyword(self.scope.path(), function, arg)
                            {
                                k.arg = Some(new);
                            }
                            k
                        })
                        .collect(),
                    None => keywords,
                };
                let func = self.visit_expr(*func)?;
                let args = self.visit_body_exprs(args)?;
                let keywords = keywords
                    .into_iter()
                    .map(|k| self.visit_keyword(k))
                    .collect::<ShroudResult<_>>()?;
                ExprKind::Call {
                    func: Box::new(func),
                    args,
                    keywords,
                }
            }
            kind => return walk_expr_mut(self, Expr::new(kind, span)),
        };
        Ok(Expr::new(kind, span))
    }

    fn visit_except_handler(&mut self, handler: ExceptHandler) -> ShroudResult<ExceptHandler> {
        let typ = handler
            .typ
            .map(|t| self.visit_expr(*t).map(Box::new))
            .transpose()?;
        let name = handler
            .name
            .map(|n| self.bind(Site::Variable, n))
            .transpose()?;
        Ok(ExceptHandler {
            typ,
            name,
            body: self.visit_body(handler.body)?,
            span: handler.span,
        })
    }

    fn visit_pattern(&mut self, pattern: Pattern) -> ShroudResult<Pattern> {
        // Sub-patterns first, so captures are numbered in source order.
        let Pattern { kind, span } = walk_pattern_mut(self, pattern)?;
        let kind = match kind {
            PatternKind::Star(Some(name)) => PatternKind::Star(Some(self.bind(Site::Variable, name)?)),
            PatternKind::As { pattern, name } => PatternKind::As {
                pattern,
                name: name.map(|n| self.bind(Site::Variable, n)).transpose()?,
            },
            PatternKind::Mapping {
                keys,
                patterns,
                rest,
            } => PatternKind::Mapping {
                keys,
                patterns,
                rest: rest.map(|n| self.bind(Site::Variable, n)).transpose()?,
            },
            kind => kind,
        };
        Ok(Pattern::new(kind, span))
    }
}

impl<S: SymbolSites> SymbolWalker<S> {
    fn visit_body_exprs(&mut self, exprs: Vec<Expr>) -> ShroudResult<Vec<Expr>> {
        exprs.into_iter().map(|e| self.visit_expr(e)).collect()
    }
}
