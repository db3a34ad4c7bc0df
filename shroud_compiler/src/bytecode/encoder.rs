//! Raw instruction encoder.
//!
//! The [`Encoder`] turns `(opcode, argument)` pairs into the 3.11 byte
//! stream, keeps the three deduplicating pools (constants, names, locals)
//! and collects exception table entries. It knows nothing about labels or
//! control flow: jump arguments arrive already resolved.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──emit/add──▶ Recording ──pack──▶ Packed
//! ```
//!
//! Once packed, every further call fails.

use super::code_unit::{CodeFlags, CodeUnit, ConstKey, Constant};
use super::exception_table::{ExceptionEntry, encode_table};
use super::opcode::Opcode;
use rustc_hash::FxHashMap;
use shroud_core::{ShroudError, ShroudResult};
use std::hash::Hash;

/// Encoder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Nothing recorded yet.
    Idle,
    /// Instructions or pool entries have been recorded.
    Recording,
    /// The code unit was produced; the encoder is frozen.
    Packed,
}

/// An append-only pool that hands out the existing index for a repeated
/// value.
#[derive(Debug, Clone)]
pub struct Pool<K, V> {
    values: Vec<V>,
    index: FxHashMap<K, u32>,
}

impl<K: Eq + Hash, V> Default for Pool<K, V> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<K: Eq + Hash, V> Pool<K, V> {
    /// Insert `value` under `key` unless the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> u32 {
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.values.len() as u32;
        self.values.push(value);
        self.index.insert(key, i);
        i
    }

    /// Append `value` without deduplication.
    pub fn push_unique(&mut self, value: V) -> u32 {
        let i = self.values.len() as u32;
        self.values.push(value);
        i
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn values(&self) -> &[V] {
        &self.values
    }

    fn into_values(self) -> Vec<V> {
        self.values
    }
}

/// Everything about a code unit that is not produced by the encoder.
#[derive(Debug, Clone, Default)]
pub struct CodeHeader {
    /// Positional parameter count.
    pub argcount: u32,
    /// Positional-only parameter count.
    pub posonlyargcount: u32,
    /// Keyword-only parameter count.
    pub kwonlyargcount: u32,
    /// Maximum stack depth.
    pub stacksize: u32,
    /// `co_flags`
    pub flags: CodeFlags,
    /// Source file name.
    pub filename: String,
    /// Short name.
    pub name: String,
    /// Qualified name.
    pub qualname: String,
    /// First source line.
    pub firstlineno: u32,
    /// Location table.
    pub linetable: Vec<u8>,
    /// Free variable names.
    pub freevars: Vec<String>,
    /// Cell variable names.
    pub cellvars: Vec<String>,
}

/// Instruction stream and pool builder.
#[derive(Debug)]
pub struct Encoder {
    state: EncoderState,
    code: Vec<u8>,
    consts: Pool<ConstKey, Constant>,
    names: Pool<String, String>,
    varnames: Pool<String, String>,
    exceptions: Vec<ExceptionEntry>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// Create an idle encoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EncoderState::Idle,
            code: Vec::new(),
            consts: Pool::default(),
            names: Pool::default(),
            varnames: Pool::default(),
            exceptions: Vec::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EncoderState {
        self.state
    }

    fn record(&mut self) -> ShroudResult<()> {
        match self.state {
            EncoderState::Packed => Err(ShroudError::internal("encoder used after pack")),
            _ => {
                self.state = EncoderState::Recording;
                Ok(())
            }
        }
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    /// Byte offset of the next instruction.
    #[inline]
    #[must_use]
    pub fn current_offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Encoded size in bytes of an instruction, prefixes and caches included.
    #[must_use]
    pub fn instruction_size(op: Opcode, arg: u32) -> u32 {
        2 * (extended_arg_count(arg) + 1 + op.cache_entries() as u32)
    }

    /// Append one instruction and return its byte offset (the offset of its
    /// first `EXTENDED_ARG` prefix, if any).
    pub fn emit(&mut self, op: Opcode, arg: u32) -> ShroudResult<u32> {
        self.emit_raw(op.as_u8(), arg, op.cache_entries())
    }

    /// Append an instruction by raw opcode byte with an explicit cache
    /// count.
    pub fn emit_raw(&mut self, opcode: u8, arg: u32, caches: usize) -> ShroudResult<u32> {
        self.record()?;
        let offset = self.current_offset();
        let prefixes = extended_arg_count(arg);
        for i in (1..=prefixes).rev() {
            self.code.push(Opcode::ExtendedArg.as_u8());
            self.code.push((arg >> (8 * i)) as u8);
        }
        self.code.push(opcode);
        self.code.push(arg as u8);
        self.code.resize(self.code.len() + 2 * caches, 0);
        Ok(offset)
    }

    // =========================================================================
    // Pools
    // =========================================================================

    /// Index of `value` in the constant pool.
    pub fn add_const(&mut self, value: Constant) -> ShroudResult<u32> {
        self.record()?;
        Ok(match value.key() {
            Some(key) => self.consts.insert(key, value),
            None => self.consts.push_unique(value),
        })
    }

    /// Index of `name` in the name pool.
    pub fn add_name(&mut self, name: &str) -> ShroudResult<u32> {
        self.record()?;
        Ok(self.names.insert(name.to_string(), name.to_string()))
    }

    /// Index of `name` in the local pool.
    pub fn add_varname(&mut self, name: &str) -> ShroudResult<u32> {
        self.record()?;
        Ok(self.varnames.insert(name.to_string(), name.to_string()))
    }

    /// The constant pool so far.
    #[must_use]
    pub fn consts(&self) -> &[Constant] {
        self.consts.values()
    }

    /// The name pool so far.
    #[must_use]
    pub fn names(&self) -> &[String] {
        self.names.values()
    }

    /// The local pool so far.
    #[must_use]
    pub fn varnames(&self) -> &[String] {
        self.varnames.values()
    }

    // =========================================================================
    // Exception table
    // =========================================================================

    /// Record a handler for the byte range `[start, end)`.
    pub fn add_exception_entry(
        &mut self,
        start: u32,
        end: u32,
        target: u32,
        depth: u32,
        lasti: bool,
    ) -> ShroudResult<()> {
        self.record()?;
        let entry = ExceptionEntry::new(start, end, target, depth, lasti)?;
        if entry.length > 0 {
            self.exceptions.push(entry);
        }
        Ok(())
    }

    /// Protect everything `body` emits with a handler placed right after it.
    ///
    /// The handler target is the offset at which `body` stops; the caller
    /// must emit the handler next. Use [`Encoder::add_exception_entry`] for
    /// any other layout.
    pub fn protected<R>(
        &mut self,
        depth: u32,
        lasti: bool,
        body: impl FnOnce(&mut Self) -> ShroudResult<R>,
    ) -> ShroudResult<R> {
        self.record()?;
        let start = self.current_offset();
        let result = body(self)?;
        let end = self.current_offset();
        self.add_exception_entry(start, end, end, depth, lasti)?;
        Ok(result)
    }

    // =========================================================================
    // Packing
    // =========================================================================

    /// Freeze the encoder and produce the code unit.
    pub fn pack(&mut self, header: CodeHeader) -> ShroudResult<CodeUnit> {
        if self.state == EncoderState::Packed {
            return Err(ShroudError::internal("encoder packed twice"));
        }
        self.state = EncoderState::Packed;

        let mut exceptions = std::mem::take(&mut self.exceptions);
        exceptions.sort_by_key(|e| e.start);
        let varnames = std::mem::take(&mut self.varnames).into_values();

        Ok(CodeUnit {
            argcount: header.argcount,
            posonlyargcount: header.posonlyargcount,
            kwonlyargcount: header.kwonlyargcount,
            nlocals: varnames.len() as u32,
            stacksize: header.stacksize,
            flags: header.flags,
            code: std::mem::take(&mut self.code),
            consts: std::mem::take(&mut self.consts).into_values(),
            names: std::mem::take(&mut self.names).into_values(),
            varnames,
            filename: header.filename,
            name: header.name,
            qualname: header.qualname,
            firstlineno: header.firstlineno,
            linetable: header.linetable,
            exceptiontable: encode_table(&exceptions),
            freevars: header.freevars,
            cellvars: header.cellvars,
        })
    }
}

/// Number of `EXTENDED_ARG` prefixes needed for `arg`.
#[inline]
#[must_use]
pub const fn extended_arg_count(arg: u32) -> u32 {
    match arg {
        0..=0xFF => 0,
        0x100..=0xFFFF => 1,
        0x1_0000..=0xFF_FFFF => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut enc = Encoder::new();
        assert_eq!(enc.state(), EncoderState::Idle);
        enc.emit(Opcode::Nop, 0).unwrap();
        assert_eq!(enc.state(), EncoderState::Recording);
        enc.pack(CodeHeader::default()).unwrap();
        assert_eq!(enc.state(), EncoderState::Packed);
        assert!(enc.emit(Opcode::Nop, 0).is_err());
        assert!(enc.add_name("x").is_err());
        assert!(enc.pack(CodeHeader::default()).is_err());
    }

    #[test]
    fn test_extended_arg_prefixes() {
        let mut enc = Encoder::new();
        enc.emit(Opcode::LoadConst, 0x01_0203).unwrap();
        assert_eq!(
            enc.code,
            [144, 0x01, 144, 0x02, Opcode::LoadConst.as_u8(), 0x03]
        );
    }

    #[rstest::rstest]
    #[case(Opcode::Nop)]
    #[case(Opcode::BinaryOp)]
    #[case(Opcode::CompareOp)]
    #[case(Opcode::LoadGlobal)]
    #[case(Opcode::LoadMethod)]
    fn test_instruction_size_includes_caches(#[case] op: Opcode) {
        let mut enc = Encoder::new();
        enc.emit(op, 1).unwrap();
        assert_eq!(enc.code.len(), 2 + 2 * op.cache_entries());
    }

    #[test]
    fn test_caches_are_zeroed() {
        let mut enc = Encoder::new();
        enc.emit(Opcode::BinaryOp, 0).unwrap();
        assert_eq!(enc.code, [122, 0, 0, 0]);
    }

    #[test]
    fn test_pools_dedup() {
        let mut enc = Encoder::new();
        let a = enc.add_const(Constant::Str("x".into())).unwrap();
        let b = enc.add_const(Constant::Int(1)).unwrap();
        let c = enc.add_const(Constant::Str("x".into())).unwrap();
        assert_eq!((a, b, c), (0, 1, 0));
        assert_eq!(enc.consts().len(), 2);
        assert_eq!(enc.add_name("n").unwrap(), enc.add_name("n").unwrap());
        assert_eq!(enc.add_varname("v").unwrap(), 0);
    }

    #[test]
    fn test_protected_block_targets_following_offset() {
        let mut enc = Encoder::new();
        enc.emit(Opcode::Nop, 0).unwrap();
        enc.protected(0, false, |e| {
            e.emit(Opcode::LoadConst, 0)?;
            e.emit(Opcode::PopTop, 0)
        })
        .unwrap();
        let code = enc.pack(CodeHeader::default()).unwrap();
        let entries = super::super::exception_table::decode_table(&code.exceptiontable).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start, 2);
        assert_eq!(entries[0].length, 4);
        assert_eq!(entries[0].target, 6);
    }
}
