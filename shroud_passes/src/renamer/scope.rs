//! Scope paths and the symbol mapping table.
//!
//! A scope path is the stack of labels for the definitions enclosing a
//! node: `mt_<name>` for functions, `cl_<name>` for classes, and numbered
//! labels for lambdas (`mt_<lambda>N`) and comprehensions (`sp_lcN`,
//! `sp_scN`, `sp_dcN`, `sp_geN`). Both renaming traversals derive the same
//! labels in the same order, so a path recorded in one resolves in the
//! other.

use rustc_hash::FxHashMap;

/// Prefix of function labels.
pub const FUNCTION: &str = "mt_";
/// Prefix of class labels.
pub const CLASS: &str = "cl_";
/// Prefix of comprehension labels.
pub const COMPREHENSION: &str = "sp_";

/// Whether `path` ends directly inside a class body.
#[must_use]
pub fn in_class_body(path: &[String]) -> bool {
    path.last().is_some_and(|l| l.starts_with(CLASS))
}

/// Whether any enclosing scope of `path` is a class.
#[must_use]
pub fn under_class(path: &[String]) -> bool {
    path.iter().any(|l| l.starts_with(CLASS))
}

// =============================================================================
// Scope Stack
// =============================================================================

/// The scope path at the current traversal position.
#[derive(Debug, Default)]
pub struct ScopeStack {
    labels: Vec<String>,
    anonymous: usize,
}

impl ScopeStack {
    /// An empty (module-level) stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current path, outermost first.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.labels
    }

    /// The path without trailing comprehension scopes: where an
    /// assignment expression inside a comprehension binds.
    #[must_use]
    pub fn binding_path(&self) -> &[String] {
        let keep = self
            .labels
            .iter()
            .rposition(|l| !l.starts_with(COMPREHENSION))
            .map_or(0, |i| i + 1);
        &self.labels[..keep]
    }

    /// Enter a function body.
    pub fn push_function(&mut self, name: &str) {
        self.labels.push(format!("{FUNCTION}{name}"));
    }

    /// Enter a class body.
    pub fn push_class(&mut self, name: &str) {
        self.labels.push(format!("{CLASS}{name}"));
    }

    /// Enter an unnamed scope. Labels are numbered in visit order.
    pub fn push_anonymous(&mut self, prefix: &str) {
        let n = self.anonymous;
        self.anonymous += 1;
        self.labels.push(format!("{prefix}{n}"));
    }

    /// Leave the innermost scope.
    pub fn pop(&mut self) -> Option<String> {
        self.labels.pop()
    }
}

// =============================================================================
// Mapping Table
// =============================================================================

/// One recorded replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Scope path the binding was recorded at.
    pub path: Vec<String>,
    /// Whether the mapping applies only at exactly `path` rather than at
    /// `path` and everything nested below it. Class bodies use this: their
    /// names are invisible to the methods they contain.
    pub exact: bool,
    /// Replacement symbol.
    pub new: String,
}

impl Mapping {
    fn applies_at(&self, path: &[String]) -> bool {
        if self.exact {
            self.path == path
        } else {
            path.starts_with(&self.path)
        }
    }
}

/// Map from (scope path, symbol) to a replacement symbol.
///
/// Keyword-argument keys live apart from symbols: they name parameters,
/// never module attributes.
#[derive(Debug, Default)]
pub struct MappingTable {
    by_symbol: FxHashMap<String, Vec<Mapping>>,
    keywords: FxHashMap<String, Vec<Mapping>>,
}

fn most_specific<'m>(entries: Option<&'m Vec<Mapping>>, path: &[String]) -> Option<&'m str> {
    entries?
        .iter()
        .filter(|m| m.applies_at(path))
        .max_by_key(|m| (m.path.len(), m.exact))
        .map(|m| m.new.as_str())
}

impl MappingTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The mapping recorded for exactly this path and symbol.
    #[must_use]
    pub fn get(&self, path: &[String], symbol: &str) -> Option<&Mapping> {
        self.by_symbol
            .get(symbol)?
            .iter()
            .find(|m| m.path == path)
    }

    /// Whether anything is recorded for exactly this path and symbol.
    #[must_use]
    pub fn contains(&self, path: &[String], symbol: &str) -> bool {
        self.get(path, symbol).is_some()
    }

    /// Record a replacement unless one already exists for the pair.
    /// Returns the replacement in effect.
    pub fn insert_if_absent(&mut self, path: &[String], symbol: &str, new: String, exact: bool) -> &str {
        let entries = self.by_symbol.entry(symbol.to_string()).or_default();
        let index = match entries.iter().position(|m| m.path == path) {
            Some(i) => i,
            None => {
                entries.push(Mapping {
                    path: path.to_vec(),
                    exact,
                    new,
                });
                entries.len() - 1
            }
        };
        &entries[index].new
    }

    /// Resolve `symbol` as seen from `path`: the applicable mapping with
    /// the longest path wins, an exact one winning a tie.
    #[must_use]
    pub fn lookup(&self, path: &[String], symbol: &str) -> Option<&str> {
        most_specific(self.by_symbol.get(symbol), path)
    }

    /// Record the replacement a keyword argument named by `key` takes at
    /// call sites under `path`.
    pub fn insert_keyword(&mut self, path: &[String], key: &str, new: String) {
        let entries = self.keywords.entry(key.to_string()).or_default();
        if !entries.iter().any(|m| m.path == path) {
            entries.push(Mapping {
                path: path.to_vec(),
                exact: false,
                new,
            });
        }
    }

    /// Resolve a keyword-argument key as seen from `path`.
    #[must_use]
    pub fn lookup_keyword(&self, path: &[String], key: &str) -> Option<&str> {
        most_specific(self.keywords.get(key), path)
    }

    /// Module-level renames (empty path, not exact, symbol changed).
    #[must_use]
    pub fn module_level(&self) -> FxHashMap<String, String> {
        self.by_symbol
            .iter()
            .filter_map(|(symbol, entries)| {
                entries
                    .iter()
                    .find(|m| m.path.is_empty() && !m.exact && m.new != *symbol)
                    .map(|m| (symbol.clone(), m.new.clone()))
            })
            .collect()
    }

    /// Number of recorded mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_symbol.values().chain(self.keywords.values()).map(Vec::len).sum()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_most_specific_prefix_wins() {
        let mut table = MappingTable::new();
        table.insert_if_absent(&path(&[]), "x", "a".into(), false);
        table.insert_if_absent(&path(&["mt_f"]), "x", "b".into(), false);
        table.insert_if_absent(&path(&["mt_f", "cl_C"]), "x", "c".into(), false);
        assert_eq!(table.lookup(&path(&["mt_f", "cl_C", "mt_g"]), "x"), Some("c"));
        assert_eq!(table.lookup(&path(&["mt_f", "mt_h"]), "x"), Some("b"));
        assert_eq!(table.lookup(&path(&["mt_k"]), "x"), Some("a"));
        assert_eq!(table.lookup(&path(&[]), "y"), None);
    }

    #[test]
    fn test_exact_mappings_do_not_reach_nested_scopes() {
        let mut table = MappingTable::new();
        table.insert_if_absent(&path(&[]), "x", "var0".into(), false);
        table.insert_if_absent(&path(&["cl_C"]), "x", "x".into(), true);
        assert_eq!(table.lookup(&path(&["cl_C"]), "x"), Some("x"));
        assert_eq!(table.lookup(&path(&["cl_C", "mt_m"]), "x"), Some("var0"));
    }

    #[test]
    fn test_first_insert_wins() {
        let mut table = MappingTable::new();
        assert_eq!(table.insert_if_absent(&[], "x", "one".into(), false), "one");
        assert_eq!(table.insert_if_absent(&[], "x", "two".into(), false), "one");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_module_level_skips_identity_and_nested() {
        let mut table = MappingTable::new();
        table.insert_if_absent(&[], "a", "var0".into(), false);
        table.insert_if_absent(&[], "b", "b".into(), false);
        table.insert_if_absent(&path(&["mt_f"]), "c", "var1".into(), false);
        table.insert_keyword(&[], "mt_f_arg_p", "arg0".into());
        let module = table.module_level();
        assert_eq!(module.len(), 1);
        assert_eq!(module["a"], "var0");
        assert_eq!(table.lookup_keyword(&path(&["mt_g"]), "mt_f_arg_p"), Some("arg0"));
        assert_eq!(table.lookup(&[], "mt_f_arg_p"), None);
    }

    #[test]
    fn test_scope_labels() {
        let mut scope = ScopeStack::new();
        scope.push_function("f");
        scope.push_class("C");
        assert!(in_class_body(scope.path()));
        scope.push_anonymous("sp_lc");
        scope.push_anonymous("sp_ge");
        assert_eq!(scope.path(), ["mt_f", "cl_C", "sp_lc0", "sp_ge1"]);
        assert_eq!(scope.binding_path(), ["mt_f", "cl_C"]);
        assert!(under_class(scope.path()));
        assert!(!in_class_body(scope.path()));
        scope.pop();
        scope.pop();
        scope.push_anonymous("mt_<lambda>");
        assert_eq!(scope.pop().as_deref(), Some("mt_<lambda>2"));
    }
}
