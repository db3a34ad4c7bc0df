//! End-to-end tests for the `shroud` binary.

use shroud_interp::Interpreter;
use std::path::Path;
use std::process::{Command, Output};

// =============================================================================
// Test Infrastructure
// =============================================================================

fn shroud(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shroud"))
        .args(args)
        .current_dir(cwd)
        .env_remove("SHROUD_LOG")
        .output()
        .expect("binary runs")
}

fn printed(source: &str) -> String {
    Interpreter::run_source(source).unwrap().output().to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_single_file_keeps_behaviour() {
    let dir = tempfile::tempdir().unwrap();
    let program = "def area(w, h):\n    return w * h\n\nprint(area(6, 7) + 0.5)\n";
    std::fs::write(dir.path().join("app.py"), program).unwrap();

    let out = shroud(
        &["app.py", "-p", "numeric", "-p", "floats", "-p", "renamer", "--seed", "1"],
        dir.path(),
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let written = std::fs::read_to_string(dir.path().join("app_obf.py")).unwrap();
    assert!(!written.contains("area"));
    assert_eq!(printed(&written), "42.5\n");
}

#[test]
fn test_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
    std::fs::write(dir.path().join("out.py"), "keep\n").unwrap();

    let out = shroud(&["a.py", "-o", "out.py", "-p", "numeric"], dir.path());
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(std::fs::read_to_string(dir.path().join("out.py")).unwrap(), "keep\n");

    let out = shroud(&["a.py", "-o", "out.py", "-p", "numeric", "--force"], dir.path());
    assert!(out.status.success());
}

#[test]
fn test_batch_writes_tree_under_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("pkg")).unwrap();
    std::fs::write(dir.path().join("main.py"), "from pkg.util import helper\nv = helper()\n").unwrap();
    std::fs::write(dir.path().join("pkg/util.py"), "def helper():\n    return 3\n").unwrap();

    let out = shroud(&["main.py", "pkg/util.py", "-o", "out", "-p", "renamer"], dir.path());
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(dir.path().join("out/main.py").is_file());
    let util = std::fs::read_to_string(dir.path().join("out/pkg/util.py")).unwrap();
    assert!(!util.contains("helper"));
    let main = std::fs::read_to_string(dir.path().join("out/main.py")).unwrap();
    assert!(!main.contains("helper"));
}

#[test]
fn test_usage_errors() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

    // No pass enabled.
    assert_eq!(shroud(&["a.py"], dir.path()).status.code(), Some(2));
    // Unknown option.
    assert_eq!(shroud(&["a.py", "-O", "numeric.nope=1"], dir.path()).status.code(), Some(2));
    // Missing input.
    assert_eq!(shroud(&["missing.py", "-p", "numeric"], dir.path()).status.code(), Some(2));
}

#[test]
fn test_syntax_error_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.py"), "x = (1,\n").unwrap();

    let out = shroud(&["bad.py", "-p", "numeric"], dir.path());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("SyntaxError"), "{stderr}");
}

#[test]
fn test_list_passes() {
    let dir = tempfile::tempdir().unwrap();
    let out = shroud(&["--list-passes"], dir.path());
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for pass in ["renamer", "numeric", "strings", "code_units"] {
        assert!(stdout.contains(pass), "{pass} missing from:\n{stdout}");
    }
}
