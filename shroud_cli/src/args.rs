//! Command-line arguments.

use clap::{ArgAction, Parser};
use shroud_core::{Config, ShroudResult};
use std::path::PathBuf;

/// Shroud - rewrite Python programs into an equivalent, obscured form
#[derive(Parser, Debug, Default)]
#[command(name = "shroud")]
#[command(author, version, about, long_about = None)]
pub struct ShroudArgs {
    /// Python files to obfuscate. Several files are renamed together so
    /// imports between them keep working.
    #[arg(required_unless_present = "list_passes")]
    pub inputs: Vec<PathBuf>,

    /// Output file for a single input, output directory for several
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Enable a pass (repeatable)
    #[arg(short = 'p', long = "pass", value_name = "PASS")]
    pub passes: Vec<String>,

    /// Set a pass option (repeatable)
    #[arg(short = 'O', long = "option", value_name = "PASS.OPTION=VALUE")]
    pub options: Vec<String>,

    /// Seed the random source so output is reproducible
    #[arg(long)]
    pub seed: Option<u64>,

    /// Overwrite existing output files
    #[arg(short, long)]
    pub force: bool,

    /// List every pass with its options and exit
    #[arg(long)]
    pub list_passes: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl ShroudArgs {
    /// The pass configuration the flags describe. `--pass x` is shorthand
    /// for `--option x.enabled=true`.
    pub fn config(&self) -> ShroudResult<Config> {
        let mut config = Config::new();
        for pass in &self.passes {
            config.enable(pass);
        }
        for assignment in &self.options {
            config.apply_assignment(assignment)?;
        }
        Ok(config)
    }

    /// Default log filter for the verbosity level.
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::ShroudError;

    fn parse(args: &[&str]) -> ShroudArgs {
        ShroudArgs::try_parse_from(std::iter::once("shroud").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags() {
        let args = parse(&["a.py", "b.py", "-o", "out", "-p", "numeric", "-O", "renamer.enabled=true", "--seed", "9", "-vv"]);
        assert_eq!(args.inputs, vec![PathBuf::from("a.py"), PathBuf::from("b.py")]);
        assert_eq!(args.output, Some(PathBuf::from("out")));
        assert_eq!(args.passes, vec!["numeric"]);
        assert_eq!(args.seed, Some(9));
        assert_eq!(args.log_level(), "debug");
    }

    #[test]
    fn test_inputs_required_unless_listing() {
        let argv = ["shroud"];
        assert!(ShroudArgs::try_parse_from(argv).is_err());
        assert!(parse(&["--list-passes"]).list_passes);
    }

    #[test]
    fn test_config_rejects_malformed_assignment() {
        let args = parse(&["a.py", "-O", "no_equals_sign"]);
        assert!(matches!(args.config(), Err(ShroudError::InvalidOption { .. })));
    }
}
