//! Shroud: rewrite Python programs into a behaviourally equivalent but
//! obscured form.
//!
//! Command-line entry point. Reads the input files, runs the enabled
//! passes over them, and writes the results.

mod args;
mod error;
mod pipeline;

use args::ShroudArgs;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = match ShroudArgs::try_parse() {
        Ok(a) => a,
        Err(e) => {
            // Help and version requests land here too.
            let code = if e.use_stderr() { error::EXIT_USAGE_ERROR } else { error::EXIT_SUCCESS };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SHROUD_LOG").unwrap_or_else(|_| EnvFilter::new(args.log_level())),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if args.list_passes {
        return pipeline::list_passes();
    }
    pipeline::run(&args)
}
