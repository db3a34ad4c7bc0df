//! Second traversal: rewrites binding and reference sites from the table.

use super::generator::keyword_key;
use super::scope::MappingTable;
use super::walker::{Site, SymbolSites};
use shroud_core::ShroudResult;

/// Resolves every site through longest-prefix lookup in a finished table.
pub struct MappingApplicator<'a> {
    table: &'a MappingTable,
    rewrites: usize,
}

impl<'a> MappingApplicator<'a> {
    /// An applicator over `table`.
    #[must_use]
    pub fn new(table: &'a MappingTable) -> Self {
        Self { table, rewrites: 0 }
    }

    /// Sites whose spelling changed.
    #[must_use]
    pub const fn rewrites(&self) -> usize {
        self.rewrites
    }

    fn resolve(&mut self, path: &[String], name: &str) -> Option<String> {
        let new = self.table.lookup(path, name).filter(|new| *new != name)?;
        self.rewrites += 1;
        Some(new.to_string())
    }

    fn resolve_keyword(&mut self, path: &[String], function: &str, arg: &str) -> Option<String> {
        let new = self
            .table
            .lookup_keyword(path, &keyword_key(function, arg))
            .filter(|new| *new != arg)?;
        self.rewrites += 1;
        Some(new.to_string())
    }
}

impl SymbolSites for MappingApplicator<'_> {
    fn bind(&mut self, path: &[String], _site: Site<'_>, name: &str) -> ShroudResult<Option<String>> {
        Ok(self.resolve(path, name))
    }

    fn reference(&mut self, path: &[String], name: &str) -> Option<String> {
        self.resolve(path, name)
    }

    fn keyword(&mut self, path: &[String], function: &str, arg: &str) -> Option<String> {
        self.resolve_keyword(path, function, arg)
    }

    fn declare_global(&mut self, path: &[String], name: &str) -> ShroudResult<Option<String>> {
        Ok(self.resolve(path, name))
    }

    fn declare_nonlocal(&mut self, path: &[String], name: &str) -> ShroudResult<Option<String>> {
        Ok(self.resolve(path, name))
    }
}
