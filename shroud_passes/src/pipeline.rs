//! The pass pipeline.
//!
//! Option handling happens before anything is rewritten: unknown keys and
//! out-of-domain values fail the run with the trees untouched. Enabled
//! passes then run in registration order, pass-major over the batch, and
//! missing locations are repaired after every step.

use crate::code_units::CodeUnits;
use crate::passes::{
    AttribSet, Floats, Fstrings, Logic, Numeric, StringCollector, Strings, TypeAlias, TypeHints,
    UnicodeNames,
};
use crate::renamer::Renamer;
use crate::{Pass, PassContext};
use shroud_core::{Config, Diagnostics, OptionSpec, PassOptions, Rng, ShroudError, ShroudResult};
use shroud_parser::ast::Module;
use shroud_parser::{fix_missing_locations, parse, unparse};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Every pass in its default order.
#[must_use]
pub fn default_passes() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(Logic),
        Box::new(TypeHints),
        Box::new(TypeAlias),
        Box::new(Fstrings),
        Box::new(StringCollector),
        Box::new(Strings),
        Box::new(Floats),
        Box::new(Numeric),
        Box::new(Renamer::default()),
        Box::new(AttribSet),
        Box::new(CodeUnits),
        Box::new(UnicodeNames),
    ]
}

/// Runs enabled passes over one or more trees.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
    config: Config,
    rng: Rng,
    diags: Diagnostics,
}

impl Pipeline {
    /// A pipeline over [`default_passes`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_passes(default_passes(), config)
    }

    /// A pipeline over an explicit pass list, run in the given order.
    #[must_use]
    pub fn with_passes(passes: Vec<Box<dyn Pass>>, config: Config) -> Self {
        Self {
            passes,
            config,
            rng: Rng::from_entropy(),
            diags: Diagnostics::new(),
        }
    }

    /// Fix the random seed so runs are reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Rng::seeded(seed);
        self
    }

    /// Registered passes with their declared options, in run order.
    pub fn describe(&self) -> impl Iterator<Item = (&'static str, &'static str, Vec<OptionSpec>)> + '_ {
        self.passes
            .iter()
            .map(|p| (p.name(), p.description(), p.options()))
    }

    /// Warnings raised so far.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diags
    }

    /// Validate the configuration and resolve the options of every enabled
    /// pass, by pass index.
    fn resolve(&self) -> ShroudResult<Vec<(usize, PassOptions)>> {
        let specs: Vec<(&'static str, Vec<OptionSpec>)> =
            self.passes.iter().map(|p| (p.name(), p.options())).collect();
        self.config
            .reject_unknown(specs.iter().map(|(name, s)| (*name, s.as_slice())))?;

        let mut enabled = Vec::new();
        for (i, (name, specs)) in specs.iter().enumerate() {
            let options = self.config.resolve(name, specs)?;
            if options.enabled() {
                enabled.push((i, options));
            }
        }
        if enabled.is_empty() {
            return Err(ShroudError::NothingToDo);
        }
        Ok(enabled)
    }

    /// Run every enabled pass over a batch of trees. `files[i]` identifies
    /// `trees[i]` for the whole run.
    pub fn run_batch(&mut self, trees: &mut [Module], files: &[String]) -> ShroudResult<()> {
        self.run(trees, files, true)
    }

    /// Run every enabled pass over a single tree.
    pub fn run_single(&mut self, tree: Module, file: &str) -> ShroudResult<Module> {
        let mut trees = [tree];
        let files = [file.to_string()];
        self.run(&mut trees, &files, false)?;
        let [tree] = trees;
        Ok(tree)
    }

    fn run(&mut self, trees: &mut [Module], files: &[String], batch: bool) -> ShroudResult<()> {
        if trees.len() != files.len() {
            return Err(ShroudError::internal(format!(
                "{} trees but {} identifiers",
                trees.len(),
                files.len()
            )));
        }
        let enabled = self.resolve()?;
        info!(
            passes = enabled.len(),
            files = trees.len(),
            "starting obfuscation run"
        );

        for (index, options) in &enabled {
            let pass = &mut self.passes[*index];
            debug!(pass = pass.name(), "running pass");
            for current in 0..trees.len() {
                let mut ctx = PassContext::new(
                    trees,
                    files,
                    current,
                    batch,
                    options,
                    &mut self.rng,
                    &mut self.diags,
                );
                pass.transform(&mut ctx)?;
            }
            for tree in trees.iter_mut() {
                *tree = fix_missing_locations(std::mem::take(tree))?;
            }
        }
        Ok(())
    }

    /// Give every enabled pass its post-processing call over the written
    /// files.
    pub fn post_process(&mut self, out_dir: &Path, files: Vec<PathBuf>) -> ShroudResult<Vec<PathBuf>> {
        let enabled = self.resolve()?;
        let mut files = files;
        for (index, _) in enabled {
            files = self.passes[index].post_process(out_dir, files)?;
        }
        Ok(files)
    }
}

/// Render every tree to source, checking that each result parses back.
/// Nothing is returned unless every tree serializes.
pub fn serialize_all(trees: &[Module], files: &[String]) -> ShroudResult<Vec<String>> {
    trees
        .iter()
        .zip(files)
        .map(|(tree, file)| {
            let source = unparse(tree);
            parse(&source).map_err(|e| ShroudError::serialize(file.as_str(), e.to_string()))?;
            Ok(source)
        })
        .collect()
}
