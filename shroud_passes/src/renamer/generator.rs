//! Fresh names and the mapping-generation traversal.

use super::scope::{MappingTable, in_class_body, under_class};
use super::walker::{Site, SymbolSites};
use shroud_core::{Rng, ShroudError, ShroudResult};
use shroud_parser::ast::{
    Alias, Arg, Expr, ExprKind, Keyword, Module, Pattern, PatternKind, Stmt, StmtKind,
};
use shroud_parser::visit::{Visitor, walk_expr, walk_module, walk_pattern, walk_stmt};
use crate::util::random_identifier;
use rustc_hash::{FxHashMap, FxHashSet};

/// Option key of the name template.
pub const TEMPLATE_OPTION: &str = "renamer.name_format";

/// Attempts at finding an unused name before the template is rejected.
const MAX_ATTEMPTS: usize = 1000;

/// What a generated name stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// Function or lambda definitions.
    Method,
    /// Variables and import aliases.
    Var,
    /// Parameters.
    Arg,
    /// Classes.
    Class,
}

impl SymbolKind {
    /// Name used by the `{kind}` token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Var => "var",
            Self::Arg => "arg",
            Self::Class => "class",
        }
    }
}

// =============================================================================
// Name Template
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Kind,
    Counter,
    KindCounter,
    Random(usize),
}

/// A parsed name template.
///
/// Tokens: `{kind}`, `{counter}` (names generated so far in the run),
/// `{kind_counter}` (names of this kind so far) and `{random:N}` (a random
/// identifier of `N` characters). `{{` and `}}` are literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    parts: Vec<Part>,
}

impl NameTemplate {
    /// Parse a template string.
    pub fn parse(src: &str) -> ShroudResult<Self> {
        let invalid = |msg: String| ShroudError::invalid_option(TEMPLATE_OPTION, msg);
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut chars = src.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let token: String = chars.by_ref().take_while(|c| *c != '}').collect();
                    if !text.is_empty() {
                        parts.push(Part::Text(std::mem::take(&mut text)));
                    }
                    parts.push(match token.split_once(':') {
                        None if token == "kind" => Part::Kind,
                        None if token == "counter" => Part::Counter,
                        None if token == "kind_counter" => Part::KindCounter,
                        Some(("random", len)) => match len.parse::<usize>() {
                            Ok(n) if n > 0 => Part::Random(n),
                            _ => return Err(invalid(format!("bad random length '{len}'"))),
                        },
                        _ => return Err(invalid(format!("unknown token '{{{token}}}'"))),
                    });
                }
                '}' => return Err(invalid("unmatched '}'".to_string())),
                c => text.push(c),
            }
        }
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        Ok(Self { parts })
    }

    fn render(&self, kind: SymbolKind, counter: u64, kind_counter: u64, rng: &mut Rng) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Kind => out.push_str(kind.as_str()),
                Part::Counter => out.push_str(&counter.to_string()),
                Part::KindCounter => out.push_str(&kind_counter.to_string()),
                Part::Random(n) => out.push_str(&random_identifier(rng, *n)),
            }
        }
        out
    }
}

/// Whether `name` can be written as a Python identifier.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
        && shroud_parser::Keyword::from_str(name).is_none()
}

/// Issues fresh names for one run.
///
/// Counters and issued names persist across every file of the run, so two
/// files never receive the same replacement.
#[derive(Debug, Default)]
pub struct NameGenerator {
    counter: u64,
    per_kind: FxHashMap<SymbolKind, u64>,
    issued: FxHashSet<String>,
}

impl NameGenerator {
    /// A generator with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A name rendered from `template` that is a valid identifier, was not
    /// issued before, and does not occur in `taken`.
    pub fn fresh(
        &mut self,
        template: &NameTemplate,
        kind: SymbolKind,
        taken: &FxHashSet<String>,
        rng: &mut Rng,
    ) -> ShroudResult<String> {
        for _ in 0..MAX_ATTEMPTS {
            let counter = self.counter;
            self.counter += 1;
            let slot = self.per_kind.entry(kind).or_insert(0);
            let kind_counter = *slot;
            *slot += 1;

            let name = template.render(kind, counter, kind_counter, rng);
            if is_identifier(&name) && !taken.contains(&name) && self.issued.insert(name.clone()) {
                return Ok(name);
            }
        }
        Err(ShroudError::invalid_option(
            TEMPLATE_OPTION,
            "template does not produce fresh identifiers",
        ))
    }
}

// =============================================================================
// Identifier Census
// =============================================================================

/// Every identifier spelled anywhere in `module`.
#[must_use]
pub fn collect_identifiers(module: &Module) -> FxHashSet<String> {
    let mut census = Census::default();
    walk_module(&mut census, module);
    census.names
}

#[derive(Default)]
struct Census {
    names: FxHashSet<String>,
}

impl Visitor for Census {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef { name, .. } | StmtKind::ClassDef { name, .. } => {
                self.names.insert(name.clone());
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                self.names.extend(names.iter().cloned());
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Name { id, .. } => {
                self.names.insert(id.clone());
            }
            ExprKind::Attribute { attr, .. } => {
                self.names.insert(attr.clone());
            }
            _ => {}
        }
        walk_expr(self, expr);
    }

    fn visit_arg(&mut self, arg: &Arg) {
        self.names.insert(arg.arg.clone());
        if let Some(annotation) = &arg.annotation {
            self.visit_expr(annotation);
        }
    }

    fn visit_keyword(&mut self, keyword: &Keyword) {
        if let Some(arg) = &keyword.arg {
            self.names.insert(arg.clone());
        }
        self.visit_expr(&keyword.value);
    }

    fn visit_alias(&mut self, alias: &Alias) {
        self.names.extend(alias.name.split('.').map(str::to_string));
        if let Some(asname) = &alias.asname {
            self.names.insert(asname.clone());
        }
    }

    fn visit_except_handler(&mut self, handler: &shroud_parser::ast::ExceptHandler) {
        if let Some(name) = &handler.name {
            self.names.insert(name.clone());
        }
        if let Some(typ) = &handler.typ {
            self.visit_expr(typ);
        }
        self.visit_body(&handler.body);
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        match &pattern.kind {
            PatternKind::Star(Some(name))
            | PatternKind::As {
                name: Some(name), ..
            }
            | PatternKind::Mapping {
                rest: Some(name), ..
            } => {
                self.names.insert(name.clone());
            }
            PatternKind::Class { kwd_attrs, .. } => self.names.extend(kwd_attrs.iter().cloned()),
            _ => {}
        }
        walk_pattern(self, pattern);
    }
}

// =============================================================================
// Mapping Generator
// =============================================================================

/// Names that keep their spelling wherever they are bound.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name == "self" || (name.len() > 4 && name.starts_with("__") && name.ends_with("__"))
}

/// First traversal: records a replacement for every binding site.
pub struct MappingGenerator<'a> {
    template: &'a NameTemplate,
    names: &'a mut NameGenerator,
    taken: &'a FxHashSet<String>,
    rng: &'a mut Rng,
    table: MappingTable,
}

impl<'a> MappingGenerator<'a> {
    /// A generator drawing names from `names`, avoiding `taken`.
    pub fn new(
        template: &'a NameTemplate,
        names: &'a mut NameGenerator,
        taken: &'a FxHashSet<String>,
        rng: &'a mut Rng,
    ) -> Self {
        Self {
            template,
            names,
            taken,
            rng,
            table: MappingTable::new(),
        }
    }

    /// The recorded mappings.
    #[must_use]
    pub fn into_table(self) -> MappingTable {
        self.table
    }

    fn fresh(&mut self, kind: SymbolKind) -> ShroudResult<String> {
        self.names.fresh(self.template, kind, self.taken, self.rng)
    }

    /// Record a fresh name for `name` at `path` unless one exists.
    fn record(&mut self, path: &[String], name: &str, kind: SymbolKind) -> ShroudResult<String> {
        if let Some(existing) = self.table.get(path, name) {
            return Ok(existing.new.clone());
        }
        let new = self.fresh(kind)?;
        Ok(self.table.insert_if_absent(path, name, new, false).to_string())
    }

    fn keep(&mut self, path: &[String], name: &str, exact: bool) {
        self.table.insert_if_absent(path, name, name.to_string(), exact);
    }

    /// Definitions (`def`, `class`, imports) follow the same policy: names
    /// directly in a class body are attributes, and anything nested in a
    /// class is left alone so attribute access keeps working.
    fn definition(&mut self, path: &[String], name: &str, kind: SymbolKind) -> ShroudResult<()> {
        if is_reserved(name) {
            return Ok(());
        }
        if in_class_body(path) {
            self.keep(path, name, true);
        } else if under_class(path) && kind != SymbolKind::Var {
            self.keep(path, name, false);
        } else {
            self.record(path, name, kind)?;
        }
        Ok(())
    }
}

impl SymbolSites for MappingGenerator<'_> {
    fn bind(&mut self, path: &[String], site: Site<'_>, name: &str) -> ShroudResult<Option<String>> {
        match site {
            Site::Variable | Site::Import => self.definition(path, name, SymbolKind::Var)?,
            Site::Function => self.definition(path, name, SymbolKind::Method)?,
            Site::Class => self.definition(path, name, SymbolKind::Class)?,
            Site::Parameter { function } => {
                if is_reserved(name) {
                    return Ok(None);
                }
                let parent = &path[..path.len().saturating_sub(1)];
                if under_class(parent) {
                    // Keyword call sites of methods cannot be resolved.
                    self.keep(path, name, false);
                } else {
                    let new = self.record(path, name, SymbolKind::Arg)?;
                    if let Some(function) = function {
                        let key = keyword_key(function, name);
                        self.table.insert_keyword(parent, &key, new);
                    }
                }
            }
        }
        Ok(None)
    }

    fn reference(&mut self, _path: &[String], _name: &str) -> Option<String> {
        None
    }

    fn keyword(&mut self, _path: &[String], _function: &str, _arg: &str) -> Option<String> {
        None
    }

    fn declare_global(&mut self, path: &[String], name: &str) -> ShroudResult<Option<String>> {
        if path.is_empty() || is_reserved(name) {
            return Ok(None);
        }
        let existing = self
            .table
            .get(&[], name)
            .filter(|m| !m.exact)
            .map(|m| m.new.clone());
        let module = match existing {
            Some(module) => module,
            None => self.record(&[], name, SymbolKind::Var)?,
        };
        self.table.insert_if_absent(path, name, module, false);
        Ok(None)
    }

    fn declare_nonlocal(&mut self, path: &[String], name: &str) -> ShroudResult<Option<String>> {
        let parent = &path[..path.len().saturating_sub(1)];
        let outer = self
            .table
            .lookup(parent, name)
            .unwrap_or(name)
            .to_string();
        self.table.insert_if_absent(path, name, outer, false);
        Ok(None)
    }
}

/// Secondary key under which a parameter's replacement is recorded, so
/// keyword arguments at call sites can follow it.
#[must_use]
pub fn keyword_key(function: &str, param: &str) -> String {
    format!("{}{function}_arg_{param}", super::scope::FUNCTION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shroud_parser::parse;

    #[rstest]
    #[case("{kind}{kind_counter}", &["var0", "var1", "arg0"])]
    #[case("x_{counter}", &["x_0", "x_1", "x_2"])]
    #[case("{{{kind}}}{counter}", &["{var}0", "{var}1", "{arg}2"])]
    fn test_template_render(#[case] src: &str, #[case] expected: &[&str]) {
        let template = NameTemplate::parse(src).unwrap();
        let mut rng = Rng::seeded(1);
        let kinds = [SymbolKind::Var, SymbolKind::Var, SymbolKind::Arg];
        let out: Vec<String> = kinds
            .iter()
            .enumerate()
            .map(|(i, k)| template.render(*k, i as u64, if i == 2 { 0 } else { i as u64 }, &mut rng))
            .collect();
        assert_eq!(out, expected);
    }

    #[rstest]
    #[case("{nope}")]
    #[case("{random:0}")]
    #[case("{random:x}")]
    #[case("a}")]
    fn test_bad_templates(#[case] src: &str) {
        let err = NameTemplate::parse(src).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_fresh_skips_taken_and_issued() {
        let template = NameTemplate::parse("{kind}{kind_counter}").unwrap();
        let mut names = NameGenerator::new();
        let mut rng = Rng::seeded(1);
        let taken: FxHashSet<String> = ["var0".to_string()].into_iter().collect();
        let a = names.fresh(&template, SymbolKind::Var, &taken, &mut rng).unwrap();
        let b = names.fresh(&template, SymbolKind::Var, &taken, &mut rng).unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("var1", "var2"));
    }

    #[test]
    fn test_constant_template_is_rejected() {
        let template = NameTemplate::parse("same").unwrap();
        let mut names = NameGenerator::new();
        let mut rng = Rng::seeded(1);
        let taken = FxHashSet::default();
        assert!(names.fresh(&template, SymbolKind::Var, &taken, &mut rng).is_ok());
        assert!(names.fresh(&template, SymbolKind::Var, &taken, &mut rng).is_err());
    }

    #[test]
    fn test_random_names_are_identifiers() {
        let template = NameTemplate::parse("{random:12}").unwrap();
        let mut names = NameGenerator::new();
        let mut rng = Rng::seeded(4);
        let taken = FxHashSet::default();
        for _ in 0..50 {
            let name = names.fresh(&template, SymbolKind::Class, &taken, &mut rng).unwrap();
            assert_eq!(name.chars().count(), 12);
            assert!(is_identifier(&name));
        }
    }

    #[rstest]
    #[case("abc", true)]
    #[case("_1", true)]
    #[case("1a", false)]
    #[case("", false)]
    #[case("class", false)]
    #[case("None", false)]
    #[case("a-b", false)]
    fn test_is_identifier(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_identifier(name), expected);
    }

    #[test]
    fn test_census() {
        let module = parse("import os.path as p\ndef f(a, *, b=c):\n    global g\n    return o.attr(k=1)\n").unwrap();
        let names = collect_identifiers(&module);
        for n in ["os", "path", "p", "f", "a", "b", "c", "g", "o", "attr", "k"] {
            assert!(names.contains(n), "{n}");
        }
    }

    #[test]
    fn test_reserved() {
        assert!(is_reserved("self"));
        assert!(is_reserved("__init__"));
        assert!(!is_reserved("__x"));
        assert!(!is_reserved("____"));
    }
}
