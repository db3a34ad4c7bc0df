//! String and bytes literal obfuscation.
//!
//! Modes:
//!
//! - `b64zlib`: base64 of the UTF-8 text, zlib-compressed at level 9,
//!   reversed at run time. Inside f-strings the compression step is
//!   skipped so the literal stays escape-free.
//! - `chararray`: the code points as a list, joined back with `chr`.
//! - `xortable`: each code point XORed with an entry of a per-module table
//!   of random 16-bit values, looked up through a shuffled chain of
//!   conditional expressions ending in a decoy value.
//!
//! Literal parts of f-strings are rewritten into replacement fields.

use crate::util::{formatted, import_call, insert_prologue, list_comp, rnd_name};
use crate::{Pass, PassContext};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use shroud_core::{Diagnostics, OptionDomain, OptionSpec, Rng, ShroudError, ShroudResult, Span};
use shroud_parser::ast::{BinOp, CmpOp, Expr, ExprKind};
use shroud_parser::visit::{Transformer, walk_expr_mut, walk_module_mut};
use std::io::Write;

const MODES: &[&str] = &["b64zlib", "chararray", "xortable"];

/// Number of entries in the XOR table.
const TABLE_LEN: usize = 64;

/// Longest literal the XOR-table mode rewrites.
pub const XOR_MAX_LEN: usize = 250;

/// The `strings` pass.
pub struct Strings;

impl Pass for Strings {
    fn name(&self) -> &'static str {
        "strings"
    }

    fn description(&self) -> &'static str {
        "Encodes string and bytes literals"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::new(
                "mode",
                "How to encode literals: b64zlib, chararray or xortable",
                "b64zlib",
            )
            .with_domain(OptionDomain::OneOf(MODES)),
        ]
    }

    fn transform(&mut self, ctx: &mut PassContext<'_>) -> ShroudResult<()> {
        let mode = match ctx.options.str("mode")? {
            "chararray" => Mode::CharArray,
            "xortable" => Mode::XorTable,
            _ => Mode::Base64,
        };
        let file = ctx.file().to_string();
        ctx.replace_tree(|tree, ctx| {
            let table = (mode == Mode::XorTable).then(|| XorTable::generate(ctx.rng));
            let mut rewriter = StringRewriter {
                mode,
                table: table.as_ref(),
                rng: ctx.rng,
                diags: ctx.diags,
                file: &file,
                in_literal: false,
                in_fstring: false,
            };
            let mut tree = walk_module_mut(&mut rewriter, tree)?;
            if let Some(table) = table {
                insert_prologue(&mut tree.body, [table.definition()]);
            }
            Ok(tree)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Base64,
    CharArray,
    XorTable,
}

/// A literal's payload: text or raw bytes.
enum Literal<'a> {
    Text(&'a str),
    Raw(&'a [u8]),
}

impl Literal<'_> {
    fn units(&self) -> Vec<u32> {
        match self {
            Literal::Text(s) => s.chars().map(u32::from).collect(),
            Literal::Raw(b) => b.iter().copied().map(u32::from).collect(),
        }
    }

    /// Wrap a list of code units back into the literal's type.
    fn rebuild(&self, units: Expr) -> Expr {
        match self {
            Literal::Text(_) => Expr::call(Expr::attr(Expr::str(""), "join"), vec![units]),
            Literal::Raw(_) => Expr::call(Expr::name("bytes"), vec![units]),
        }
    }
}

// =============================================================================
// XOR table
// =============================================================================

/// The per-module key table.
pub struct XorTable {
    name: String,
    values: Vec<u16>,
}

impl XorTable {
    fn generate(rng: &mut Rng) -> Self {
        Self {
            name: rnd_name(rng),
            values: (0..TABLE_LEN)
                .map(|_| rng.range_inclusive(1, 0xFFFF) as u16)
                .collect(),
        }
    }

    fn definition(&self) -> shroud_parser::ast::Stmt {
        crate::util::assign(
            &self.name,
            Expr::synthetic(ExprKind::List(
                self.values.iter().map(|v| Expr::int(i64::from(*v))).collect(),
            )),
        )
    }

    fn key(&self, i: usize) -> u32 {
        u32::from(self.values[i % self.values.len()])
    }
}

// =============================================================================
// Rewriter
// =============================================================================

struct StringRewriter<'a, 'r> {
    mode: Mode,
    table: Option<&'a XorTable>,
    rng: &'r mut Rng,
    diags: &'r mut Diagnostics,
    file: &'a str,
    /// Directly inside an f-string's literal text.
    in_literal: bool,
    /// Anywhere inside an f-string, holes included.
    in_fstring: bool,
}

impl Transformer for StringRewriter<'_, '_> {
    fn visit_expr(&mut self, expr: Expr) -> ShroudResult<Expr> {
        match &expr.kind {
            ExprKind::JoinedStr(_) => {
                let saved = (self.in_literal, self.in_fstring);
                self.in_literal = true;
                self.in_fstring = true;
                let out = walk_expr_mut(self, expr);
                (self.in_literal, self.in_fstring) = saved;
                out
            }
            ExprKind::FormattedValue { .. } => {
                let saved = self.in_literal;
                self.in_literal = false;
                let out = walk_expr_mut(self, expr);
                self.in_literal = saved;
                out
            }
            ExprKind::String(s) => {
                let encoded = self.encode(&Literal::Text(s), expr.span)?;
                Ok(self.finish(expr, encoded))
            }
            ExprKind::Bytes(b) => {
                let encoded = self.encode(&Literal::Raw(b), expr.span)?;
                Ok(self.finish(expr, encoded))
            }
            _ => walk_expr_mut(self, expr),
        }
    }
}

impl StringRewriter<'_, '_> {
    fn finish(&self, original: Expr, encoded: Option<Expr>) -> Expr {
        match encoded {
            Some(mut out) => {
                out.span = original.span;
                if self.in_literal { formatted(out) } else { out }
            }
            None => original,
        }
    }

    fn encode(&mut self, literal: &Literal<'_>, span: Span) -> ShroudResult<Option<Expr>> {
        Ok(match self.mode {
            Mode::Base64 => Some(base64_expr(literal, !self.in_fstring, self.file)?),
            Mode::CharArray => Some(char_array_expr(literal)),
            Mode::XorTable => {
                let len = literal.units().len();
                if len == 0 {
                    None
                } else if len > XOR_MAX_LEN {
                    self.diags.warn(
                        self.file,
                        span,
                        format!(
                            "String too big to obfuscate properly using xor table ({len} > {XOR_MAX_LEN})"
                        ),
                    );
                    None
                } else {
                    let table = self
                        .table
                        .ok_or_else(|| ShroudError::internal("xor table missing"))?;
                    Some(xor_expr(literal, table, self.rng))
                }
            }
        })
    }
}

fn base64_expr(literal: &Literal<'_>, compress: bool, file: &str) -> ShroudResult<Expr> {
    let raw = match literal {
        Literal::Text(s) => s.as_bytes(),
        Literal::Raw(b) => b,
    };
    let encoded = STANDARD.encode(raw).into_bytes();
    let payload = if compress {
        let mut z = ZlibEncoder::new(Vec::new(), Compression::best());
        z.write_all(&encoded)
            .and_then(|()| z.finish())
            .map(|bytes| {
                Expr::call(
                    Expr::attr(import_call("zlib"), "decompress"),
                    vec![Expr::synthetic(ExprKind::Bytes(bytes))],
                )
            })
            .map_err(|e| ShroudError::io(file, &e))?
    } else {
        Expr::synthetic(ExprKind::Bytes(encoded))
    };
    let decoded = Expr::call(Expr::attr(import_call("base64"), "b64decode"), vec![payload]);
    Ok(match literal {
        Literal::Text(_) => Expr::call(Expr::attr(decoded, "decode"), Vec::new()),
        Literal::Raw(_) => decoded,
    })
}

fn int_list(units: impl IntoIterator<Item = u32>) -> Expr {
    Expr::synthetic(ExprKind::List(
        units.into_iter().map(|u| Expr::int(i64::from(u))).collect(),
    ))
}

fn char_array_expr(literal: &Literal<'_>) -> Expr {
    let units = int_list(literal.units());
    match literal {
        Literal::Text(_) => literal.rebuild(list_comp(
            Expr::call(Expr::name("chr"), vec![Expr::name("x")]),
            "x",
            units,
        )),
        Literal::Raw(_) => literal.rebuild(units),
    }
}

fn eq_test(name: &str, value: i64) -> Expr {
    Expr::synthetic(ExprKind::Compare {
        left: Box::new(Expr::name(name)),
        ops: vec![CmpOp::Eq],
        comparators: vec![Expr::int(value)],
    })
}

fn xor_expr(literal: &Literal<'_>, table: &XorTable, rng: &mut Rng) -> Expr {
    let units = literal.units();
    let mut positions: Vec<(u32, usize)> = units
        .iter()
        .enumerate()
        .map(|(i, u)| (u ^ table.key(i), i))
        .collect();
    rng.shuffle(&mut positions);

    // (enc_n if i == n else (... else decoy))
    let decoy = Expr::int(rng.range_inclusive(0, 0xFFFF));
    let lookup = positions.iter().fold(decoy, |orelse, (enc, i)| {
        Expr::synthetic(ExprKind::IfExp {
            test: Box::new(eq_test("i", *i as i64)),
            body: Box::new(Expr::int(i64::from(*enc))),
            orelse: Box::new(orelse),
        })
    });
    // table[i % len(table)]
    let key = Expr::subscript(
        Expr::name(&table.name),
        Expr::binop(
            Expr::name("i"),
            BinOp::Mod,
            Expr::call(Expr::name("len"), vec![Expr::name(&table.name)]),
        ),
    );
    let mut unit = Expr::binop(lookup, BinOp::BitXor, key);
    if matches!(literal, Literal::Text(_)) {
        unit = Expr::call(Expr::name("chr"), vec![unit]);
    }
    let range = Expr::call(Expr::name("range"), vec![Expr::int(units.len() as i64)]);
    literal.rebuild(list_comp(unit, "i", range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PassContext;
    use rstest::rstest;
    use shroud_core::{Config, OptionValue};
    use shroud_interp::{Interpreter, Value};
    use shroud_parser::{parse, unparse, unparse_expr};

    fn run(src: &str, mode: &str) -> (String, Diagnostics) {
        let mut config = Config::new();
        config.enable("strings").set("strings.mode", OptionValue::Str(mode.into()));
        let options = config.resolve("strings", &Strings.options()).unwrap();
        let mut trees = vec![parse(src).unwrap()];
        let files = vec!["/t.py".to_string()];
        let mut rng = Rng::seeded(9);
        let mut diags = Diagnostics::new();
        let mut ctx = PassContext::new(&mut trees, &files, 0, false, &options, &mut rng, &mut diags);
        Strings.transform(&mut ctx).unwrap();
        (unparse(&trees[0]), diags)
    }

    fn value_of(src: &str) -> Value {
        let interp = Interpreter::run_source(src).unwrap();
        interp.global("v").cloned().unwrap()
    }

    #[rstest]
    #[case("b64zlib")]
    #[case("chararray")]
    #[case("xortable")]
    fn test_text_round_trips(
        #[case] mode: &str,
        #[values("", "hello", "caf\u{e9} \u{1F600}", "quote's \"both\"\n")] text: &str,
    ) {
        let src = format!("v = {}\n", shroud_parser::unparse::repr_str(text));
        let (out, _) = run(&src, mode);
        assert_eq!(value_of(&out), Value::Str(text.to_string()), "{out}");
    }

    #[rstest]
    #[case("b64zlib")]
    #[case("chararray")]
    #[case("xortable")]
    fn test_bytes_round_trip(#[case] mode: &str) {
        let (out, _) = run("v = b'\\x00\\xffab'\n", mode);
        assert_eq!(value_of(&out), Value::Bytes(vec![0, 0xff, b'a', b'b']), "{out}");
    }

    #[test]
    fn test_no_plain_text_left() {
        for mode in MODES {
            let (out, _) = run("v = 'secret'\n", mode);
            assert!(!out.contains("secret"), "{mode}: {out}");
        }
    }

    #[test]
    fn test_xor_table_after_future_imports() {
        let (out, _) = run("from __future__ import annotations\nv = 'ab'\n", "xortable");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "from __future__ import annotations");
        assert!(lines[1].ends_with(']'), "{out}");
        assert_eq!(lines[1].matches(',').count(), TABLE_LEN - 1);
    }

    #[test]
    fn test_xor_oversized_literal_warns() {
        let long = "x".repeat(XOR_MAX_LEN + 1);
        let (out, diags) = run(&format!("v = '{long}'\n"), "xortable");
        assert!(out.contains(&long));
        let w = &diags.warnings()[0];
        assert_eq!((w.file.as_str(), w.line, w.col), ("/t.py", 1, 4));
        assert!(w.message.contains("251 > 250"));
    }

    #[test]
    fn test_fstring_literal_parts_become_fields() {
        let (out, _) = run("n = 3\nv = f'n={n}!'\n", "b64zlib");
        assert!(!out.contains("zlib"), "{out}");
        let reparsed = parse(&out).unwrap();
        assert!(unparse(&reparsed).starts_with("n = 3\nv = f"));
        assert_eq!(value_of(&out), Value::Str("n=3!".into()));
    }

    #[test]
    fn test_fstring_xortable() {
        let (out, _) = run("n = 3\nv = f'n={n}!'\n", "xortable");
        assert_eq!(value_of(&out), Value::Str("n=3!".into()));
    }

    #[test]
    fn test_char_array_shape() {
        let expr = char_array_expr(&Literal::Text("hi"));
        assert_eq!(unparse_expr(&expr), "''.join([chr(x) for x in [104, 105]])");
        let expr = char_array_expr(&Literal::Raw(b"hi"));
        assert_eq!(unparse_expr(&expr), "bytes([104, 105])");
    }

    #[test]
    fn test_xor_decoy_keeps_every_position() {
        let mut rng = Rng::seeded(4);
        let table = XorTable::generate(&mut rng);
        let expr = xor_expr(&Literal::Text("abc"), &table, &mut rng);
        let text = unparse_expr(&expr);
        for i in 0..3 {
            assert!(text.contains(&format!("i == {i}")), "{text}");
        }
        let defs = unparse(&shroud_parser::ast::Module::new(vec![table.definition()]));
        let program = format!("{defs}v = {text}\n");
        assert_eq!(value_of(&program), Value::Str("abc".into()));
    }
}
