//! Obfuscation run: read → parse → passes → serialize → write → post-process.

use crate::args::ShroudArgs;
use crate::error;
use shroud_core::{ShroudError, ShroudResult};
use shroud_passes::{Pipeline, serialize_all};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

/// Directory batch output goes to when `--output` is not given.
const DEFAULT_OUT_DIR: &str = "shroud_out";

// =============================================================================
// Public Entry Points
// =============================================================================

/// Print every pass with its options.
pub fn list_passes() -> ExitCode {
    let pipeline = Pipeline::new(shroud_core::Config::new());
    for (name, description, options) in pipeline.describe() {
        println!("{name}: {description}");
        for option in options {
            println!("    {name}.{} = {}  ({})", option.name, option.default, option.description);
        }
    }
    ExitCode::from(error::EXIT_SUCCESS)
}

/// Obfuscate the inputs named in `args` and write the results.
pub fn run(args: &ShroudArgs) -> ExitCode {
    let inputs = match read_inputs(&args.inputs) {
        Ok(inputs) => inputs,
        Err(e) => return error::report(&e, None, ""),
    };

    let mut trees = Vec::with_capacity(inputs.len());
    for input in &inputs {
        match shroud_parser::parse(&input.source) {
            Ok(tree) => trees.push(tree),
            Err(e) => return error::report(&e, Some(&input.source), &input.display),
        }
    }

    let config = match args.config() {
        Ok(config) => config,
        Err(e) => return error::report(&e, None, ""),
    };
    let mut pipeline = Pipeline::new(config);
    if let Some(seed) = args.seed {
        pipeline = pipeline.with_seed(seed);
    }

    let files: Vec<String> = inputs.iter().map(|i| i.id.clone()).collect();
    let result = if trees.len() == 1 {
        let tree = std::mem::take(&mut trees[0]);
        pipeline.run_single(tree, &files[0]).map(|tree| trees[0] = tree)
    } else {
        pipeline.run_batch(&mut trees, &files)
    };
    let warnings = pipeline.diagnostics().warnings().len();
    if warnings > 0 {
        info!(warnings, "passes raised warnings");
    }
    if let Err(e) = result {
        return report_for(&e, &inputs);
    }

    match write_outputs(args, &inputs, &trees, &files, &mut pipeline) {
        Ok(written) => {
            for path in &written {
                info!(path = %path.display(), "wrote");
            }
            ExitCode::from(error::EXIT_SUCCESS)
        }
        Err(e) => report_for(&e, &inputs),
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// One input file.
struct Input {
    /// The path as given, for messages.
    display: String,
    /// Absolute path, used as the tree's identifier.
    id: String,
    /// Path relative to the batch root, used to place the output.
    relative: PathBuf,
    source: String,
}

fn read_inputs(paths: &[PathBuf]) -> ShroudResult<Vec<Input>> {
    let mut absolute: Vec<PathBuf> = Vec::with_capacity(paths.len());
    let mut given = Vec::with_capacity(paths.len());
    for path in paths {
        let full = path
            .canonicalize()
            .map_err(|e| ShroudError::io(path.display().to_string(), &e))?;
        if absolute.contains(&full) {
            warn!(path = %path.display(), "input given twice; ignoring the repeat");
            continue;
        }
        absolute.push(full);
        given.push(path);
    }
    let root = common_root(&absolute);
    absolute
        .iter()
        .zip(given)
        .map(|(full, given)| {
            let source = std::fs::read_to_string(full)
                .map_err(|e| ShroudError::io(given.display().to_string(), &e))?;
            Ok(Input {
                display: given.display().to_string(),
                id: full.to_string_lossy().into_owned(),
                relative: full.strip_prefix(&root).unwrap_or(full).to_path_buf(),
                source,
            })
        })
        .collect()
}

/// Deepest directory containing every path.
fn common_root(paths: &[PathBuf]) -> PathBuf {
    let mut root = match paths.first().and_then(|p| p.parent()) {
        Some(parent) => parent.to_path_buf(),
        None => return PathBuf::new(),
    };
    for path in &paths[1..] {
        while !path.starts_with(&root) {
            if !root.pop() {
                return PathBuf::new();
            }
        }
    }
    root
}

fn report_for(err: &ShroudError, inputs: &[Input]) -> ExitCode {
    let input = match err {
        ShroudError::InvalidInput { file, .. } | ShroudError::SerializeError { file, .. } => {
            inputs.iter().find(|i| &i.id == file)
        }
        _ => None,
    };
    match input {
        Some(input) => error::report(err, Some(&input.source), &input.display),
        None => error::report(err, None, ""),
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Output path of every input: the `--output` file for a single input,
/// otherwise the input's place under the output directory.
fn output_paths(args: &ShroudArgs, inputs: &[Input]) -> (PathBuf, Vec<PathBuf>) {
    if let [input] = inputs
        && args.output.as_ref().is_none_or(|o| !o.is_dir())
    {
        let file = args.output.clone().unwrap_or_else(|| {
            let id = Path::new(&input.id);
            let stem = id.file_stem().map_or_else(String::new, |s| s.to_string_lossy().into_owned());
            id.with_file_name(format!("{stem}_obf.py"))
        });
        let dir = file.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        return (dir, vec![file]);
    }
    let dir = args.output.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));
    let files = inputs.iter().map(|i| dir.join(&i.relative)).collect();
    (dir, files)
}

fn write_outputs(
    args: &ShroudArgs,
    inputs: &[Input],
    trees: &[shroud_parser::ast::Module],
    files: &[String],
    pipeline: &mut Pipeline,
) -> ShroudResult<Vec<PathBuf>> {
    let (out_dir, paths) = output_paths(args, inputs);
    if !args.force
        && let Some(existing) = paths.iter().find(|p| p.exists())
    {
        return Err(ShroudError::Io {
            path: existing.display().to_string(),
            message: "output exists; pass --force to overwrite".into(),
        });
    }

    // Serialize everything before touching the file system.
    let sources = serialize_all(trees, files)?;
    for (path, source) in paths.iter().zip(&sources) {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ShroudError::io(parent.display().to_string(), &e))?;
        }
        std::fs::write(path, source).map_err(|e| ShroudError::io(path.display().to_string(), &e))?;
    }
    pipeline.post_process(&out_dir, paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_root() {
        let paths = [PathBuf::from("/a/b/c.py"), PathBuf::from("/a/d/e.py"), PathBuf::from("/a/b/f/g.py")];
        assert_eq!(common_root(&paths), PathBuf::from("/a"));
        assert_eq!(common_root(&paths[..1]), PathBuf::from("/a/b"));
        assert_eq!(common_root(&[]), PathBuf::new());
    }

    fn input(id: &str, relative: &str) -> Input {
        Input {
            display: id.into(),
            id: id.into(),
            relative: relative.into(),
            source: String::new(),
        }
    }

    #[test]
    fn test_single_output_defaults_next_to_input() {
        let args = ShroudArgs::default();
        let (dir, files) = output_paths(&args, &[input("/src/app.py", "app.py")]);
        assert_eq!(dir, PathBuf::from("/src"));
        assert_eq!(files, vec![PathBuf::from("/src/app_obf.py")]);
    }

    #[test]
    fn test_batch_output_keeps_layout() {
        let args = ShroudArgs {
            output: Some(PathBuf::from("/out")),
            ..ShroudArgs::default()
        };
        let inputs = [input("/src/main.py", "main.py"), input("/src/pkg/util.py", "pkg/util.py")];
        let (dir, files) = output_paths(&args, &inputs);
        assert_eq!(dir, PathBuf::from("/out"));
        assert_eq!(files, vec![PathBuf::from("/out/main.py"), PathBuf::from("/out/pkg/util.py")]);
    }
}
