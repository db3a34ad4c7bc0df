//! The packed code unit and its constant values.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// `co_flags` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CodeFlags(u32);

impl CodeFlags {
    /// No flags (module and class bodies).
    pub const NONE: CodeFlags = CodeFlags(0);
    /// Locals live in fast slots.
    pub const OPTIMIZED: CodeFlags = CodeFlags(0x01);
    /// A fresh locals dict per call.
    pub const NEWLOCALS: CodeFlags = CodeFlags(0x02);
    /// Takes `*args`.
    pub const VARARGS: CodeFlags = CodeFlags(0x04);
    /// Takes `**kwargs`.
    pub const VARKEYWORDS: CodeFlags = CodeFlags(0x08);
    /// Nested inside another function.
    pub const NESTED: CodeFlags = CodeFlags(0x10);
    /// Generator function.
    pub const GENERATOR: CodeFlags = CodeFlags(0x20);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: CodeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        CodeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CodeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A value in a code unit's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Small integer.
    Int(i64),
    /// Integer outside `i64`, as signed decimal digits.
    BigInt(String),
    /// Float.
    Float(f64),
    /// Complex number.
    Complex {
        /// Real part.
        real: f64,
        /// Imaginary part.
        imag: f64,
    },
    /// `str`
    Str(String),
    /// `bytes`
    Bytes(Vec<u8>),
    /// `...`
    Ellipsis,
    /// Tuple of constants.
    Tuple(Vec<Constant>),
    /// A nested code unit (function, class body, comprehension).
    Code(Box<CodeUnit>),
}

/// Identity of a constant for pool deduplication.
///
/// Values that compare equal in Python but differ in type or sign
/// (`1`, `1.0`, `True`, `0.0`, `-0.0`) get distinct keys. Code units are
/// never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstKey {
    /// `None`
    None,
    /// `bool`
    Bool(bool),
    /// `int`
    Int(i64),
    /// Big `int`
    BigInt(String),
    /// `float`, by bit pattern.
    Float(u64),
    /// `complex`, by bit patterns.
    Complex(u64, u64),
    /// `str`
    Str(String),
    /// `bytes`
    Bytes(Vec<u8>),
    /// `...`
    Ellipsis,
    /// `tuple`
    Tuple(Vec<ConstKey>),
}

impl Constant {
    /// Deduplication key, or `None` for values that are never shared.
    #[must_use]
    pub fn key(&self) -> Option<ConstKey> {
        Some(match self {
            Self::None => ConstKey::None,
            Self::Bool(b) => ConstKey::Bool(*b),
            Self::Int(v) => ConstKey::Int(*v),
            Self::BigInt(s) => ConstKey::BigInt(s.clone()),
            Self::Float(v) => ConstKey::Float(v.to_bits()),
            Self::Complex { real, imag } => ConstKey::Complex(real.to_bits(), imag.to_bits()),
            Self::Str(s) => ConstKey::Str(s.clone()),
            Self::Bytes(b) => ConstKey::Bytes(b.clone()),
            Self::Ellipsis => ConstKey::Ellipsis,
            Self::Tuple(items) => {
                ConstKey::Tuple(items.iter().map(Self::key).collect::<Option<_>>()?)
            }
            Self::Code(_) => return None,
        })
    }

    /// Nested code unit, if this is one.
    #[must_use]
    pub fn as_code(&self) -> Option<&CodeUnit> {
        match self {
            Self::Code(code) => Some(code),
            _ => None,
        }
    }
}

/// A packed, immutable code unit: the eighteen arguments of the 3.11 code
/// constructor, in constructor order.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    /// Positional parameter count (including positional-only).
    pub argcount: u32,
    /// Positional-only parameter count.
    pub posonlyargcount: u32,
    /// Keyword-only parameter count.
    pub kwonlyargcount: u32,
    /// Number of local variables (`len(varnames)`).
    pub nlocals: u32,
    /// Maximum evaluation stack depth.
    pub stacksize: u32,
    /// `co_flags`
    pub flags: CodeFlags,
    /// Instruction stream, inline caches included.
    pub code: Vec<u8>,
    /// Constant pool.
    pub consts: Vec<Constant>,
    /// Global, attribute and import names.
    pub names: Vec<String>,
    /// Local variable names, parameters first.
    pub varnames: Vec<String>,
    /// Source file name.
    pub filename: String,
    /// Short name.
    pub name: String,
    /// Dotted qualified name.
    pub qualname: String,
    /// First source line.
    pub firstlineno: u32,
    /// Location table.
    pub linetable: Vec<u8>,
    /// Encoded exception table.
    pub exceptiontable: Vec<u8>,
    /// Names captured from enclosing scopes.
    pub freevars: Vec<String>,
    /// Locals captured by nested scopes.
    pub cellvars: Vec<String>,
}

impl CodeUnit {
    /// Number of constructor arguments.
    pub const FIELD_COUNT: usize = 18;

    /// Nested code units reachable through the constant pool, innermost
    /// first. `self` is not included.
    #[must_use]
    pub fn nested(&self) -> Vec<&CodeUnit> {
        fn collect<'a>(consts: &'a [Constant], out: &mut Vec<&'a CodeUnit>) {
            for c in consts {
                match c {
                    Constant::Code(code) => {
                        collect(&code.consts, out);
                        out.push(code);
                    }
                    Constant::Tuple(items) => collect(items, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.consts, &mut out);
        out
    }

    /// The slot layout the interpreter builds from `varnames`, `cellvars`
    /// and `freevars`: locals first, then cells that are not also locals,
    /// then free variables.
    #[must_use]
    pub fn localsplus(&self) -> Vec<(&str, u8)> {
        const LOCAL: u8 = 0x20;
        const CELL: u8 = 0x40;
        const FREE: u8 = 0x80;
        let mut slots: Vec<(&str, u8)> = self.varnames.iter().map(|n| (n.as_str(), LOCAL)).collect();
        for cell in &self.cellvars {
            match slots.iter_mut().find(|slot| slot.0 == cell.as_str()) {
                Some(slot) => slot.1 |= CELL,
                None => slots.push((cell.as_str(), CELL)),
            }
        }
        slots.extend(self.freevars.iter().map(|n| (n.as_str(), FREE)));
        slots
    }

    /// Instruction stream with every inline cache entry zeroed, as the
    /// interpreter reports it through `co_code`.
    #[must_use]
    pub fn code_without_caches(&self) -> Vec<u8> {
        let mut out = self.code.clone();
        let mut i = 0;
        while i + 1 < out.len() {
            let caches = super::Opcode::from_u8(out[i]).map_or(0, |op| op.cache_entries());
            for c in 0..caches {
                let at = i + 2 + 2 * c;
                if at + 1 < out.len() {
                    out[at] = 0;
                    out[at + 1] = 0;
                }
            }
            i += 2 + 2 * caches;
        }
        out
    }
}

impl fmt::Display for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "<code {} args={} locals={} stack={} flags={:#x}>",
            self.qualname,
            self.argcount,
            self.nlocals,
            self.stacksize,
            self.flags.bits()
        )?;
        let mut i = 0;
        while i + 1 < self.code.len() {
            let byte = self.code[i];
            let arg = self.code[i + 1];
            match super::Opcode::from_u8(byte) {
                Some(op) => {
                    write!(f, "{i:>6} {op}")?;
                    if op.has_arg() {
                        write!(f, " {arg}")?;
                    }
                    writeln!(f)?;
                    i += 2 + 2 * op.cache_entries();
                }
                None => {
                    writeln!(f, "{i:>6} <{byte}> {arg}")?;
                    i += 2;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_keys_distinguish_types() {
        assert_ne!(Constant::Int(1).key(), Constant::Bool(true).key());
        assert_ne!(Constant::Float(0.0).key(), Constant::Float(-0.0).key());
        assert_ne!(Constant::Int(1).key(), Constant::Float(1.0).key());
        assert_eq!(
            Constant::Tuple(vec![Constant::Str("a".into())]).key(),
            Constant::Tuple(vec![Constant::Str("a".into())]).key()
        );
    }

    #[test]
    fn test_flags_compose() {
        let flags = CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
        assert_eq!(flags.bits(), 3);
        assert!(flags.contains(CodeFlags::OPTIMIZED));
        assert!(!flags.contains(CodeFlags::GENERATOR));
    }
}
