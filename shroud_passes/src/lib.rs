//! Obfuscation passes for shroud.
//!
//! A run takes one or more parsed modules through an ordered list of
//! enabled passes:
//!
//! ```text
//! Modules → logic → type_hints → type_alias → fstrings → … → renamer → code_units → Modules
//! ```
//!
//! Passes run pass-major: every module goes through pass N before any
//! module enters pass N+1, so a pass that reads sibling modules (the
//! renamer's cross-file step) sees them all at the same stage.
//!
//! # Key Types
//!
//! - [`Pass`] - one named, option-configurable tree rewrite
//! - [`PassContext`] - the tree under rewrite plus its siblings, the run's
//!   random source and diagnostics
//! - [`Pipeline`] - option validation, ordering, and the batch/single entry
//!   points
//!
//! # Example
//!
//! ```
//! use shroud_core::Config;
//! use shroud_passes::Pipeline;
//!
//! let mut config = Config::new();
//! config.enable("numeric");
//! let mut pipeline = Pipeline::new(config).with_seed(7);
//! let module = shroud_parser::parse("x = 5\n").unwrap();
//! let out = pipeline.run_single(module, "/src/demo.py").unwrap();
//! assert!(!shroud_parser::unparse(&out).contains('5'));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod code_units;
pub mod passes;
pub mod pipeline;
pub mod renamer;
pub mod util;

pub use pipeline::{Pipeline, default_passes, serialize_all};

use shroud_core::{Diagnostics, OptionSpec, PassOptions, Rng, ShroudResult};
use shroud_parser::ast::Module;
use std::path::{Path, PathBuf};

// =============================================================================
// Pass Trait
// =============================================================================

/// A single tree rewrite.
pub trait Pass {
    /// Unique name; also the option namespace (`{name}.{option}`).
    fn name(&self) -> &'static str;

    /// One-line description.
    fn description(&self) -> &'static str;

    /// Options this pass declares besides the implicit `enabled`.
    fn options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    /// Rewrite the current tree of `ctx`.
    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()>;

    /// Called once after every tree was written to `out_dir`. Returns the
    /// resulting file list.
    fn post_process(&mut self, _out_dir: &Path, files: Vec<PathBuf>) -> ShroudResult<Vec<PathBuf>> {
        Ok(files)
    }
}

// =============================================================================
// Pass Context
// =============================================================================

/// Everything a pass sees while rewriting one tree.
pub struct PassContext<'a> {
    trees: &'a mut [Module],
    files: &'a [String],
    current: usize,
    batch: bool,
    /// Validated options of the running pass.
    pub options: &'a PassOptions,
    /// The run's random source.
    pub rng: &'a mut Rng,
    /// The run's warning collector.
    pub diags: &'a mut Diagnostics,
}

impl<'a> PassContext<'a> {
    /// Context for tree `current` of a batch. Single-file runs pass a
    /// one-element batch with `batch = false`.
    pub fn new(
        trees: &'a mut [Module],
        files: &'a [String],
        current: usize,
        batch: bool,
        options: &'a PassOptions,
        rng: &'a mut Rng,
        diags: &'a mut Diagnostics,
    ) -> Self {
        Self {
            trees,
            files,
            current,
            batch,
            options,
            rng,
            diags,
        }
    }

    /// Source identifier of the current tree.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.files[self.current]
    }

    /// The current tree.
    pub fn tree_mut(&mut self) -> &mut Module {
        &mut self.trees[self.current]
    }

    /// Take the current tree out, leaving an empty module in its place.
    pub fn take_tree(&mut self) -> Module {
        std::mem::take(&mut self.trees[self.current])
    }

    /// Put a (possibly new) tree back in the current slot.
    pub fn set_tree(&mut self, tree: Module) {
        self.trees[self.current] = tree;
    }

    /// Rebuild the current tree through `f`.
    pub fn replace_tree(
        &mut self,
        f: impl FnOnce(Module, &mut Self) -> ShroudResult<Module>,
    ) -> ShroudResult<()> {
        let tree = self.take_tree();
        let tree = f(tree, self)?;
        self.set_tree(tree);
        Ok(())
    }

    /// Whether the run processes several files together.
    #[must_use]
    pub const fn is_batch(&self) -> bool {
        self.batch
    }

    /// Identifiers of every tree in the batch, or `None` in single-file mode.
    #[must_use]
    pub fn all_files(&self) -> Option<&[String]> {
        self.batch.then_some(self.files)
    }

    /// Every tree except the current one, with its identifier. Empty in
    /// single-file mode.
    pub fn siblings_mut(&mut self) -> impl Iterator<Item = (&str, &mut Module)> {
        let current = self.current;
        let batch = self.batch;
        self.files
            .iter()
            .map(String::as_str)
            .zip(self.trees.iter_mut())
            .enumerate()
            .filter(move |(i, _)| batch && *i != current)
            .map(|(_, pair)| pair)
    }
}
