//! Lexical scopes.
//!
//! Scopes form a parent chain from the innermost function or comprehension
//! out to the module. Class bodies sit in the chain while their body runs
//! but are skipped by lookups from nested functions, as in Python.

use crate::error::{InterpError, InterpResult};
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use shroud_parser::ast::{Stmt, StmtKind};
use std::cell::RefCell;
use std::rc::Rc;

/// What opened a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The module namespace.
    Module,
    /// A function or lambda call.
    Function,
    /// A class body.
    Class,
    /// A comprehension.
    Comprehension,
}

/// One namespace in the chain.
#[derive(Debug)]
pub struct Scope {
    /// What opened this scope.
    pub kind: ScopeKind,
    vars: RefCell<FxHashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
    globals: FxHashSet<String>,
    nonlocals: FxHashSet<String>,
}

impl Scope {
    /// A fresh module scope.
    #[must_use]
    pub fn module() -> Rc<Self> {
        Rc::new(Self {
            kind: ScopeKind::Module,
            vars: RefCell::default(),
            parent: None,
            globals: FxHashSet::default(),
            nonlocals: FxHashSet::default(),
        })
    }

    /// A child scope of `parent`. `body` is scanned for `global` and
    /// `nonlocal` declarations.
    #[must_use]
    pub fn child(parent: &Rc<Self>, kind: ScopeKind, body: &[Stmt]) -> Rc<Self> {
        let mut globals = FxHashSet::default();
        let mut nonlocals = FxHashSet::default();
        collect_declarations(body, &mut globals, &mut nonlocals);
        Rc::new(Self {
            kind,
            vars: RefCell::default(),
            parent: Some(Rc::clone(parent)),
            globals,
            nonlocals,
        })
    }

    fn root(self: &Rc<Self>) -> Rc<Self> {
        let mut scope = Rc::clone(self);
        while let Some(parent) = scope.parent.clone() {
            scope = parent;
        }
        scope
    }

    /// The scope a `def` inside this one closes over: class bodies are
    /// not visible from their methods.
    #[must_use]
    pub fn closure_for_def(self: &Rc<Self>) -> Rc<Self> {
        match (&self.kind, &self.parent) {
            (ScopeKind::Class, Some(parent)) => Rc::clone(parent),
            _ => Rc::clone(self),
        }
    }

    /// Bind `name` following `global`/`nonlocal` declarations.
    pub fn assign(self: &Rc<Self>, name: &str, value: Value) {
        self.target(name).vars.borrow_mut().insert(name.to_string(), value);
    }

    /// Store `value` in the scope `name` currently resolves to. Used to put
    /// a changed container back where it was read from.
    pub fn rebind(self: &Rc<Self>, name: &str, value: Value) {
        if self.globals.contains(name) {
            self.root().vars.borrow_mut().insert(name.to_string(), value);
            return;
        }
        let mut scope = Some(Rc::clone(self));
        let mut first = true;
        while let Some(current) = scope {
            if (first || current.kind != ScopeKind::Class) && current.vars.borrow().contains_key(name) {
                current.vars.borrow_mut().insert(name.to_string(), value);
                return;
            }
            first = false;
            scope = current.parent.clone();
        }
        self.assign(name, value);
    }

    /// Bind `name` in the nearest scope that is not a comprehension, as
    /// `:=` does.
    pub fn assign_walrus(self: &Rc<Self>, name: &str, value: Value) {
        let mut scope = Rc::clone(self);
        while scope.kind == ScopeKind::Comprehension {
            match scope.parent.clone() {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        scope.assign(name, value);
    }

    /// Unbind `name`.
    pub fn delete(self: &Rc<Self>, name: &str) -> InterpResult<()> {
        self.target(name)
            .vars
            .borrow_mut()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| InterpError::NameError {
                name: name.to_string(),
            })
    }

    fn target(self: &Rc<Self>, name: &str) -> Rc<Self> {
        if self.globals.contains(name) {
            return self.root();
        }
        if self.nonlocals.contains(name) {
            let mut scope = self.parent.clone();
            while let Some(candidate) = scope {
                if candidate.kind != ScopeKind::Class && candidate.vars.borrow().contains_key(name) {
                    return candidate;
                }
                scope = candidate.parent.clone();
            }
        }
        Rc::clone(self)
    }

    /// Look `name` up through the chain. `None` means the caller should
    /// try the builtins.
    #[must_use]
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        if self.globals.contains(name) {
            return self.root().vars.borrow().get(name).cloned();
        }
        let mut scope = Some(Rc::clone(self));
        let mut first = true;
        while let Some(current) = scope {
            if first || current.kind != ScopeKind::Class {
                if let Some(value) = current.vars.borrow().get(name) {
                    return Some(value.clone());
                }
            }
            first = false;
            scope = current.parent.clone();
        }
        None
    }

    /// A copy of this scope's own bindings.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, Value> {
        self.vars.borrow().clone()
    }
}

fn collect_declarations(
    body: &[Stmt],
    globals: &mut FxHashSet<String>,
    nonlocals: &mut FxHashSet<String>,
) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => nonlocals.extend(names.iter().cloned()),
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => {
                collect_declarations(body, globals, nonlocals);
                collect_declarations(orelse, globals, nonlocals);
            }
            StmtKind::With { body, .. } => collect_declarations(body, globals, nonlocals),
            StmtKind::Match { cases, .. } => {
                for case in cases {
                    collect_declarations(&case.body, globals, nonlocals);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            }
            | StmtKind::TryStar {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_declarations(body, globals, nonlocals);
                for handler in handlers {
                    collect_declarations(&handler.body, globals, nonlocals);
                }
                collect_declarations(orelse, globals, nonlocals);
                collect_declarations(finalbody, globals, nonlocals);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_parser::parse;

    #[test]
    fn test_global_declaration_writes_module() {
        let module = Scope::module();
        let body = parse("global g\n").unwrap().body;
        let func = Scope::child(&module, ScopeKind::Function, &body);
        func.assign("g", Value::Int(1));
        func.assign("l", Value::Int(2));
        assert_eq!(module.lookup("g"), Some(Value::Int(1)));
        assert_eq!(module.lookup("l"), None);
        assert_eq!(func.lookup("l"), Some(Value::Int(2)));
    }

    #[test]
    fn test_class_scope_hidden_from_methods() {
        let module = Scope::module();
        let class = Scope::child(&module, ScopeKind::Class, &[]);
        class.assign("x", Value::Int(1));
        assert_eq!(class.lookup("x"), Some(Value::Int(1)));
        let method = Scope::child(&class.closure_for_def(), ScopeKind::Function, &[]);
        assert_eq!(method.lookup("x"), None);
    }

    #[test]
    fn test_walrus_escapes_comprehension() {
        let module = Scope::module();
        let comp = Scope::child(&module, ScopeKind::Comprehension, &[]);
        comp.assign_walrus("w", Value::Int(3));
        assert_eq!(module.lookup("w"), Some(Value::Int(3)));
    }
}
