//! Encrypted launcher.
//!
//! The marshalled module is XORed with an MD5 counter keystream. The key is
//! the MD5 of `repr()` of the decoy function's code, constants, names and
//! local names, joined, so it is never written out: the loader recomputes
//! it from `b.__code__` when it first runs.

use super::builder::{TYPE_DONOR, function};
use crate::util::rnd_name;
use shroud_compiler::repr::{py_repr, str_repr};
use shroud_compiler::{CodeUnit, compile_module};
use shroud_core::{Rng, ShroudError, ShroudResult};
use shroud_parser::ast::{Expr, Module, Stmt};
use shroud_parser::parse;
use shroud_parser::unparse::repr_bytes;

/// Message printed when the decoy is called on its own.
pub const DECOY_MESSAGE: &str = "what'cha looking for?";

/// Keystream block size (one MD5 digest).
const BLOCK: usize = 16;

/// The decoy `def b()`: a print and a few throwaway assignments, whose
/// compiled form keys the cipher.
pub fn decoy(rng: &mut Rng) -> Stmt {
    let mut body = vec![Stmt::expr(Expr::call(
        Expr::name("print"),
        vec![Expr::str(DECOY_MESSAGE)],
    ))];
    for _ in 0..rng.range_inclusive(3, 5) {
        let targets = (0..rng.range_inclusive(3, 5))
            .map(|_| Expr::store(rnd_name(rng)))
            .collect();
        let value = Expr::int(rng.range_inclusive(0, 65535));
        body.push(Stmt::synthetic(shroud_parser::ast::StmtKind::Assign {
            targets,
            value: Box::new(value),
        }));
    }
    function(TYPE_DONOR, body)
}

/// The text the key is hashed from, as
/// `''.join(map(repr, [co_code, *co_consts, *co_names, *co_varnames]))`
/// evaluates for `unit`.
#[must_use]
pub fn key_material(unit: &CodeUnit) -> String {
    let mut out = repr_bytes(&unit.code_without_caches());
    for constant in &unit.consts {
        out.push_str(&py_repr(constant));
    }
    for name in unit.names.iter().chain(&unit.varnames) {
        out.push_str(&str_repr(name));
    }
    out
}

/// The key for the decoy `def` in `decoy`.
pub fn derive_key(decoy: &Stmt) -> ShroudResult<[u8; 16]> {
    let module = Module::new(vec![decoy.clone()]);
    let top = compile_module(&module, "")?;
    let unit = top
        .nested()
        .into_iter()
        .next()
        .ok_or_else(|| ShroudError::internal("decoy compiled without a code unit"))?;
    Ok(md5::compute(key_material(unit).as_bytes()).0)
}

/// XOR `data` with the keystream `md5(key + le32(i // 16))[i % 16]`.
/// Applying it twice gives back `data`.
#[must_use]
pub fn apply_keystream(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (block, chunk) in data.chunks(BLOCK).enumerate() {
        let mut seed = key.to_vec();
        seed.extend_from_slice(&(block as u32).to_le_bytes());
        let stream = md5::compute(&seed).0;
        out.extend(chunk.iter().zip(stream).map(|(b, k)| b ^ k));
    }
    out
}

/// Module source that decrypts and executes `ciphertext`.
pub fn loader(ciphertext: &[u8], rng: &mut Rng) -> ShroudResult<Module> {
    let key = rnd_name(rng);
    let code = format!("{TYPE_DONOR}.__code__");
    let source = format!(
        "{key} = __import__('hashlib').md5(''.join(map(repr, [{code}.co_code, *{code}.co_consts, \
         *{code}.co_names, *{code}.co_varnames])).encode('utf8')).digest()\n\
         exec(__import__('marshal').loads(bytes([c ^ __import__('hashlib').md5({key} + (i // {BLOCK})\
         .to_bytes(4, 'little')).digest()[i % {BLOCK}] for i, c in enumerate({ct})])))\n",
        ct = repr_bytes(ciphertext),
    );
    parse(&source)
}

/// `exec(name())`
pub fn launch(name: &str) -> Stmt {
    Stmt::expr(Expr::call(
        Expr::name("exec"),
        vec![Expr::call(Expr::name(name), Vec::new())],
    ))
}

/// Encrypt `payload` under the key of `decoy`, returning the loader.
pub fn encrypt(payload: &[u8], decoy: &Stmt, rng: &mut Rng) -> ShroudResult<Module> {
    let key = derive_key(decoy)?;
    loader(&apply_keystream(&key, payload), rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_parser::{unparse, unparse_stmt};

    #[test]
    fn test_keystream_is_an_involution() {
        let key = [7u8; 16];
        let data: Vec<u8> = (0..=255).collect();
        let encrypted = apply_keystream(&key, &data);
        assert_ne!(encrypted, data);
        assert_eq!(apply_keystream(&key, &encrypted), data);
    }

    #[test]
    fn test_keystream_blocks_differ() {
        let encrypted = apply_keystream(&[1u8; 16], &[0u8; 32]);
        assert_ne!(encrypted[..16], encrypted[16..]);
    }

    #[test]
    fn test_decoy_shape() {
        let src = unparse_stmt(&decoy(&mut Rng::seeded(2)));
        assert!(src.starts_with("def b():\n    print(\"what'cha looking for?\")\n"), "{src}");
        let assigns = src.lines().skip(2).count();
        assert!((3..=5).contains(&assigns), "{src}");
    }

    #[test]
    fn test_key_depends_on_decoy() {
        let a = derive_key(&decoy(&mut Rng::seeded(1))).unwrap();
        let b = derive_key(&decoy(&mut Rng::seeded(2))).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, derive_key(&decoy(&mut Rng::seeded(1))).unwrap());
    }

    #[test]
    fn test_loader_recomputes_key() {
        let module = loader(&[1, 2, 3], &mut Rng::seeded(5)).unwrap();
        let src = unparse(&module);
        assert!(src.contains("b.__code__.co_varnames"), "{src}");
        assert!(src.contains("__import__('marshal').loads"), "{src}");
        assert!(src.contains("b'\\x01\\x02\\x03'"), "{src}");
    }

    /// `''.join(map(repr, ...))` over `b.__code__` as CPython 3.11 compiles
    /// `DECOY_SOURCE`.
    const DECOY_SOURCE: &str = "def b():\n    print(\"what'cha looking for?\")\n    aa = bb = 7\n";
    const DECOY_MATERIAL: &str = concat!(
        r"b'\x97\x00t\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00",
        r"d\x01\xa6\x01\x00\x00\xab\x01\x00\x00\x00\x00\x00\x00\x00\x00",
        r"\x01\x00d\x02x\x01}\x00}\x01d\x00S\x00'",
        "None\"what'cha looking for?\"7'print''aa''bb'",
    );

    #[test]
    fn test_key_material_matches_interpreter() {
        let module = parse(DECOY_SOURCE).unwrap();
        let top = compile_module(&module, "").unwrap();
        assert_eq!(key_material(top.nested()[0]), DECOY_MATERIAL);
    }

    #[test]
    fn test_ciphertext_decrypts_under_interpreter_key() {
        let decoy = parse(DECOY_SOURCE).unwrap().body.remove(0);
        let payload = shroud_compiler::marshal::dumps(
            &compile_module(&parse("x = 1\n").unwrap(), "<shroud>").unwrap(),
        )
        .unwrap();
        let ciphertext = apply_keystream(&derive_key(&decoy).unwrap(), &payload);
        let key = md5::compute(DECOY_MATERIAL.as_bytes()).0;
        assert_eq!(apply_keystream(&key, &ciphertext), payload);
    }

    #[test]
    fn test_key_material_uses_reprs() {
        let decoy = decoy(&mut Rng::seeded(3));
        let module = Module::new(vec![decoy]);
        let top = compile_module(&module, "").unwrap();
        let material = key_material(top.nested()[0]);
        assert!(material.starts_with("b'"), "{material}");
        assert!(material.contains("\"what'cha looking for?\""), "{material}");
        assert!(material.contains("'print'"), "{material}");
    }
}
