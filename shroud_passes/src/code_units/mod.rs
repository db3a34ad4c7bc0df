//! The `code_units` pass: the module rebuilt from raw code units.
//!
//! The tree is compiled to 3.11 code units. Every unit, innermost first,
//! gets a builder routine (see [`builder`]); the output module defines the
//! code-type donor `b`, the builders, and runs `exec(<top builder>())`.
//!
//! With `encrypt` set the compiled module is marshalled and encrypted
//! instead ([`encrypt`]), and only the small decrypting loader goes through
//! the builders.

pub mod builder;
pub mod encrypt;

use crate::util::rnd_name;
use crate::{Pass, PassContext};
use builder::{BuilderNames, TYPE_DONOR, function};
use shroud_compiler::{CodeUnit, compile_module, marshal};
use shroud_core::{OptionSpec, OptionValue, Rng, ShroudError, ShroudResult, Span, TARGET_PYTHON_VERSION};
use shroud_parser::ast::{Module, Stmt, StmtKind};
use tracing::debug;

/// The `code_units` pass.
pub struct CodeUnits;

impl Pass for CodeUnits {
    fn name(&self) -> &'static str {
        "code_units"
    }

    fn description(&self) -> &'static str {
        "Rebuilds the program from dynamically constructed code units (Python 3.11 only)"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::new(
                "target_version",
                "Python version the output runs on; other versions skip this pass",
                OptionValue::Str(target_version()),
            ),
            OptionSpec::new(
                "encrypt",
                "Encrypt the marshalled module, keyed on a decoy function",
                false,
            ),
        ]
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        let wanted = ctx.options.str("target_version")?;
        if wanted != target_version() {
            ctx.diags.warn_simple(
                "code_units",
                format!("Python {} is required to use this pass, skipping", target_version()),
            );
            return Ok(());
        }
        let encrypted = ctx.options.bool("encrypt")?;
        let top = match compile_module(ctx.tree_mut(), "") {
            Ok(top) => top,
            Err(ShroudError::CompileError { message, span }) => {
                let file = ctx.file().to_string();
                ctx.diags.warn(
                    &file,
                    span.unwrap_or_else(Span::dummy),
                    format!("{message}, leaving this file unchanged"),
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let tree = if encrypted {
            encrypted_launcher(&top, ctx.rng)?
        } else {
            Module::new(launcher(&top, vec![donor()], ctx.rng)?)
        };
        ctx.set_tree(tree);
        Ok(())
    }
}

fn target_version() -> String {
    let (major, minor) = TARGET_PYTHON_VERSION;
    format!("{major}.{minor}")
}

/// `def b(): pass`
fn donor() -> Stmt {
    function(TYPE_DONOR, vec![Stmt::synthetic(StmtKind::Pass)])
}

/// `prefix`, a builder per unit of `top` (nested units first), and the
/// `exec` of the top builder.
pub fn launcher(top: &CodeUnit, prefix: Vec<Stmt>, rng: &mut Rng) -> ShroudResult<Vec<Stmt>> {
    let nested = top.nested();
    let mut names = BuilderNames::new();
    for unit in &nested {
        names.insert(unit, rnd_name(rng));
    }
    let main = rnd_name(rng);
    names.insert(top, main.clone());

    let mut body = prefix;
    for unit in nested.iter().copied().chain([top]) {
        let name = names
            .get(unit)
            .map(str::to_string)
            .unwrap_or_else(|| main.clone());
        body.push(names.builder(&name, unit, rng)?);
    }
    body.push(encrypt::launch(&main));
    debug!(units = nested.len() + 1, "built code-unit launcher");
    Ok(body)
}

/// The decoy, then the builders of a loader that decrypts `top`.
fn encrypted_launcher(top: &CodeUnit, rng: &mut Rng) -> ShroudResult<Module> {
    let payload = marshal::dumps(top)?;
    let decoy = encrypt::decoy(rng);
    let loader = encrypt::encrypt(&payload, &decoy, rng)?;
    let loader = compile_module(&loader, "")?;
    debug!(bytes = payload.len(), "encrypted module");
    Ok(Module::new(launcher(&loader, vec![decoy], rng)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::{Config, Diagnostics};
    use shroud_parser::{parse, unparse};

    fn run(src: &str, options: &[(&str, OptionValue)]) -> (String, Diagnostics) {
        let mut config = Config::new();
        config.enable("code_units");
        for (key, value) in options {
            config.set(format!("code_units.{key}"), value.clone());
        }
        let options = config.resolve("code_units", &CodeUnits.options()).unwrap();
        let mut trees = vec![parse(src).unwrap()];
        let files = vec!["/t.py".to_string()];
        let mut rng = Rng::seeded(11);
        let mut diags = Diagnostics::new();
        let mut ctx = PassContext::new(&mut trees, &files, 0, false, &options, &mut rng, &mut diags);
        CodeUnits.transform(&mut ctx).unwrap();
        (unparse(&trees[0]), diags)
    }

    #[test]
    fn test_module_layout() {
        let (out, diags) = run("def f(x):\n    return [y for y in x]\nprint(f([1]))\n", &[]);
        assert!(diags.is_empty());
        assert!(out.starts_with("def b():\n    pass\n"), "{out}");
        let builders = out.lines().filter(|l| l.starts_with("def ")).count();
        // donor, listcomp, f, module
        assert_eq!(builders, 4, "{out}");
        let last = out.lines().last().unwrap();
        assert!(last.starts_with("exec(") && last.ends_with("())"), "{out}");
        assert!(!out.contains("return [y for y in x]"));
        assert!(parse(&out).is_ok());
    }

    #[test]
    fn test_top_builder_comes_last() {
        let (out, _) = run("def f():\n    def g():\n        pass\n", &[]);
        let main = out
            .lines()
            .last()
            .and_then(|l| l.strip_prefix("exec(")?.strip_suffix("())"))
            .unwrap();
        let defs: Vec<&str> = out
            .lines()
            .filter_map(|l| l.strip_prefix("def ")?.strip_suffix("():"))
            .collect();
        assert_eq!(defs.len(), 4, "{out}");
        assert_eq!(defs.last(), Some(&main));
    }

    #[test]
    fn test_version_mismatch_skips_with_warning() {
        let (out, diags) = run("x = 1\n", &[("target_version", OptionValue::Str("3.12".into()))]);
        assert_eq!(out, "x = 1\n");
        assert_eq!(diags.warnings().len(), 1);
        assert!(diags.warnings()[0].message.contains("3.11"));
    }

    #[test]
    fn test_unsupported_construct_skips_with_location() {
        let src = "x = 1\n\nasync def f():\n    pass\n";
        let (out, diags) = run(src, &[]);
        assert_eq!(out, src);
        let warnings = diags.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].file, "/t.py");
        assert_eq!(warnings[0].line, 3);
        assert!(warnings[0].message.contains("async"), "{}", warnings[0].message);
    }

    #[test]
    fn test_super_and_yield_from_compile() {
        let src = "class A:\n    def m(self):\n        yield from [1]\nclass B(A):\n    def m(self):\n        return super().m()\n";
        let (out, diags) = run(src, &[]);
        assert!(diags.is_empty());
        assert!(out.lines().last().unwrap().starts_with("exec("));
    }

    #[test]
    fn test_encrypted_layout() {
        let (out, _) = run("print('secret')\n", &[("encrypt", OptionValue::Bool(true))]);
        assert!(out.starts_with("def b():\n    print(\"what'cha looking for?\")\n"), "{out}");
        assert!(!out.contains("secret"));
        assert!(out.lines().last().unwrap().starts_with("exec("));
    }
}
