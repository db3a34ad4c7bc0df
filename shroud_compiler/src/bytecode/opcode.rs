//! CPython 3.11 opcode table.
//!
//! Numbers, inline cache counts and stack effects are those of the 3.11
//! interpreter. An instruction occupies one code unit (`opcode`, `oparg`)
//! followed by [`Opcode::cache_entries`] zeroed code units.

use std::fmt;

/// Opcodes of the 3.11 bytecode format that the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // =========================================================================
    // No argument (< 90)
    // =========================================================================
    /// Inline cache filler.
    Cache = 0,
    /// Discard TOS.
    PopTop = 1,
    /// Push the NULL sentinel used by calls.
    PushNull = 2,
    /// Do nothing.
    Nop = 9,
    /// `+TOS`
    UnaryPositive = 10,
    /// `-TOS`
    UnaryNegative = 11,
    /// `not TOS`
    UnaryNot = 12,
    /// `~TOS`
    UnaryInvert = 15,
    /// `TOS1[TOS]`
    BinarySubscr = 25,
    /// Save the current exception and push the new one.
    PushExcInfo = 35,
    /// Exception-type match for `except`.
    CheckExcMatch = 36,
    /// Call `__exit__` with the active exception.
    WithExceptStart = 49,
    /// Enter a context manager.
    BeforeWith = 53,
    /// `TOS1[TOS] = TOS2`
    StoreSubscr = 60,
    /// `del TOS1[TOS]`
    DeleteSubscr = 61,
    /// `iter(TOS)`
    GetIter = 68,
    /// Iterator for `yield from`; generators pass through unchanged.
    GetYieldFromIter = 69,
    /// Push `builtins.__build_class__`.
    LoadBuildClass = 71,
    /// Push `AssertionError`.
    LoadAssertionError = 74,
    /// Create a generator from the current frame.
    ReturnGenerator = 75,
    /// Convert the list at TOS to a tuple.
    ListToTuple = 82,
    /// Return TOS.
    ReturnValue = 83,
    /// `from TOS import *`
    ImportStar = 84,
    /// Yield TOS.
    YieldValue = 86,
    /// Restore the exception saved by `PUSH_EXC_INFO`.
    PopExcept = 89,

    // =========================================================================
    // With argument (>= 90)
    // =========================================================================
    /// `names[arg] = TOS` in the namespace.
    StoreName = 90,
    /// `del names[arg]` in the namespace.
    DeleteName = 91,
    /// Unpack TOS into `arg` values.
    UnpackSequence = 92,
    /// Advance the iterator at TOS or jump forward when exhausted.
    ForIter = 93,
    /// Unpack with a starred target: low byte before, high byte after.
    UnpackEx = 94,
    /// `TOS.names[arg] = TOS1`
    StoreAttr = 95,
    /// `del TOS.names[arg]`
    DeleteAttr = 96,
    /// `global names[arg] = TOS`
    StoreGlobal = 97,
    /// `del global names[arg]`
    DeleteGlobal = 98,
    /// Swap TOS with the item `arg` deep.
    Swap = 99,
    /// Push `consts[arg]`.
    LoadConst = 100,
    /// Push `names[arg]` from the namespace.
    LoadName = 101,
    /// Build a tuple from `arg` items.
    BuildTuple = 102,
    /// Build a list from `arg` items.
    BuildList = 103,
    /// Build a set from `arg` items.
    BuildSet = 104,
    /// Build a dict from `arg` key/value pairs.
    BuildMap = 105,
    /// `TOS.names[arg]`
    LoadAttr = 106,
    /// Rich comparison.
    CompareOp = 107,
    /// `__import__(names[arg], ...)`
    ImportName = 108,
    /// `TOS.names[arg]` for `from ... import`.
    ImportFrom = 109,
    /// Relative forward jump.
    JumpForward = 110,
    /// Jump forward keeping TOS if false, else pop.
    JumpIfFalseOrPop = 111,
    /// Jump forward keeping TOS if true, else pop.
    JumpIfTrueOrPop = 112,
    /// Pop TOS and jump forward if false.
    PopJumpForwardIfFalse = 114,
    /// Pop TOS and jump forward if true.
    PopJumpForwardIfTrue = 115,
    /// Push global `names[arg >> 1]`, with a NULL first if `arg & 1`.
    LoadGlobal = 116,
    /// `is` / `is not`
    IsOp = 117,
    /// `in` / `not in`
    ContainsOp = 118,
    /// Re-raise TOS.
    Reraise = 119,
    /// Push a copy of the item `arg` deep.
    Copy = 120,
    /// Binary or in-place arithmetic.
    BinaryOp = 122,
    /// Send TOS into the subiterator at TOS1; jump forward when it returns.
    Send = 123,
    /// Push local `varnames[arg]`.
    LoadFast = 124,
    /// Store local `varnames[arg]`.
    StoreFast = 125,
    /// Delete local `varnames[arg]`.
    DeleteFast = 126,
    /// Pop TOS and jump forward if not None.
    PopJumpForwardIfNotNone = 128,
    /// Pop TOS and jump forward if None.
    PopJumpForwardIfNone = 129,
    /// `raise` with `arg` operands.
    RaiseVarargs = 130,
    /// Build a function from the code at TOS.
    MakeFunction = 132,
    /// Build a slice from 2 or 3 items.
    BuildSlice = 133,
    /// Backward jump that skips the eval-breaker check.
    JumpBackwardNoInterrupt = 134,
    /// Turn local `arg` into a cell.
    MakeCell = 135,
    /// Push the cell in slot `arg`.
    LoadClosure = 136,
    /// Push the contents of the cell in slot `arg`.
    LoadDeref = 137,
    /// Store into the cell in slot `arg`.
    StoreDeref = 138,
    /// Empty the cell in slot `arg`.
    DeleteDeref = 139,
    /// Relative backward jump.
    JumpBackward = 140,
    /// Call with unpacked positional (and keyword) arguments.
    CallFunctionEx = 142,
    /// Argument prefix.
    ExtendedArg = 144,
    /// `list.append` into the list `arg` deep.
    ListAppend = 145,
    /// `set.add` into the set `arg` deep.
    SetAdd = 146,
    /// `dict[TOS1] = TOS` into the dict `arg` deep.
    MapAdd = 147,
    /// Class-body load that checks the namespace before the cell in slot `arg`.
    LoadClassderef = 148,
    /// Copy the closure's free variables into the frame.
    CopyFreeVars = 149,
    /// Frame entry and resumption point.
    Resume = 151,
    /// `format(value, spec)` with an optional conversion.
    FormatValue = 155,
    /// Build a dict with constant keys from a tuple at TOS.
    BuildConstKeyMap = 156,
    /// Concatenate `arg` strings.
    BuildString = 157,
    /// Push an unbound method and its receiver.
    LoadMethod = 160,
    /// `list.extend`
    ListExtend = 162,
    /// `set.update`
    SetUpdate = 163,
    /// Merge keyword arguments.
    DictMerge = 164,
    /// `dict.update`
    DictUpdate = 165,
    /// Prepare a call with `arg` arguments.
    Precall = 166,
    /// Call with `arg` arguments.
    Call = 171,
    /// Keyword names for the next call.
    KwNames = 172,
    /// Pop TOS and jump backward if not None.
    PopJumpBackwardIfNotNone = 173,
    /// Pop TOS and jump backward if None.
    PopJumpBackwardIfNone = 174,
    /// Pop TOS and jump backward if false.
    PopJumpBackwardIfFalse = 175,
    /// Pop TOS and jump backward if true.
    PopJumpBackwardIfTrue = 176,
}

/// First opcode that takes an argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// `BINARY_OP` argument values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum BinaryOpArg {
    Add = 0,
    And = 1,
    FloorDivide = 2,
    Lshift = 3,
    MatrixMultiply = 4,
    Multiply = 5,
    Remainder = 6,
    Or = 7,
    Power = 8,
    Rshift = 9,
    Subtract = 10,
    TrueDivide = 11,
    Xor = 12,
}

impl BinaryOpArg {
    /// Offset that turns an operator into its in-place form.
    pub const INPLACE: u32 = 13;
}

/// `COMPARE_OP` argument values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum CompareOpArg {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

/// `MAKE_FUNCTION` flag bits.
pub mod make_function {
    /// A tuple of positional defaults is on the stack.
    pub const DEFAULTS: u32 = 0x01;
    /// A dict of keyword-only defaults is on the stack.
    pub const KWDEFAULTS: u32 = 0x02;
    /// A tuple of annotations is on the stack.
    pub const ANNOTATIONS: u32 = 0x04;
    /// A tuple of closure cells is on the stack.
    pub const CLOSURE: u32 = 0x08;
}

impl Opcode {
    /// Decode a raw opcode byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        use Opcode::*;
        Some(match value {
            0 => Cache,
            1 => PopTop,
            2 => PushNull,
            9 => Nop,
            10 => UnaryPositive,
            11 => UnaryNegative,
            12 => UnaryNot,
            15 => UnaryInvert,
            25 => BinarySubscr,
            35 => PushExcInfo,
            36 => CheckExcMatch,
            49 => WithExceptStart,
            53 => BeforeWith,
            60 => StoreSubscr,
            61 => DeleteSubscr,
            68 => GetIter,
            69 => GetYieldFromIter,
            71 => LoadBuildClass,
            74 => LoadAssertionError,
            75 => ReturnGenerator,
            82 => ListToTuple,
            83 => ReturnValue,
            84 => ImportStar,
            86 => YieldValue,
            89 => PopExcept,
            90 => StoreName,
            91 => DeleteName,
            92 => UnpackSequence,
            93 => ForIter,
            94 => UnpackEx,
            95 => StoreAttr,
            96 => DeleteAttr,
            97 => StoreGlobal,
            98 => DeleteGlobal,
            99 => Swap,
            100 => LoadConst,
            101 => LoadName,
            102 => BuildTuple,
            103 => BuildList,
            104 => BuildSet,
            105 => BuildMap,
            106 => LoadAttr,
            107 => CompareOp,
            108 => ImportName,
            109 => ImportFrom,
            110 => JumpForward,
            111 => JumpIfFalseOrPop,
            112 => JumpIfTrueOrPop,
            114 => PopJumpForwardIfFalse,
            115 => PopJumpForwardIfTrue,
            116 => LoadGlobal,
            117 => IsOp,
            118 => ContainsOp,
            119 => Reraise,
            120 => Copy,
            122 => BinaryOp,
            123 => Send,
            124 => LoadFast,
            125 => StoreFast,
            126 => DeleteFast,
            128 => PopJumpForwardIfNotNone,
            129 => PopJumpForwardIfNone,
            130 => RaiseVarargs,
            132 => MakeFunction,
            133 => BuildSlice,
            134 => JumpBackwardNoInterrupt,
            135 => MakeCell,
            136 => LoadClosure,
            137 => LoadDeref,
            138 => StoreDeref,
            139 => DeleteDeref,
            140 => JumpBackward,
            142 => CallFunctionEx,
            144 => ExtendedArg,
            145 => ListAppend,
            146 => SetAdd,
            147 => MapAdd,
            148 => LoadClassderef,
            149 => CopyFreeVars,
            151 => Resume,
            155 => FormatValue,
            156 => BuildConstKeyMap,
            157 => BuildString,
            160 => LoadMethod,
            162 => ListExtend,
            163 => SetUpdate,
            164 => DictMerge,
            165 => DictUpdate,
            166 => Precall,
            171 => Call,
            172 => KwNames,
            173 => PopJumpBackwardIfNotNone,
            174 => PopJumpBackwardIfNone,
            175 => PopJumpBackwardIfFalse,
            176 => PopJumpBackwardIfTrue,
            _ => return None,
        })
    }

    /// Raw opcode byte.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the argument byte is meaningful.
    #[inline]
    #[must_use]
    pub const fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// Number of inline cache code units following the instruction.
    #[must_use]
    pub const fn cache_entries(self) -> usize {
        match self {
            Self::BinarySubscr => 4,
            Self::StoreSubscr => 1,
            Self::UnpackSequence => 1,
            Self::StoreAttr => 4,
            Self::LoadAttr => 4,
            Self::CompareOp => 2,
            Self::LoadGlobal => 5,
            Self::BinaryOp => 1,
            Self::LoadMethod => 10,
            Self::Precall => 1,
            Self::Call => 4,
            _ => 0,
        }
    }

    /// Whether the argument is a relative jump distance.
    #[must_use]
    pub const fn is_jump(self) -> bool {
        self.is_forward_jump() || self.is_backward_jump()
    }

    /// Jumps whose distance counts forward from the next instruction.
    #[must_use]
    pub const fn is_forward_jump(self) -> bool {
        matches!(
            self,
            Self::JumpForward
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::PopJumpForwardIfFalse
                | Self::PopJumpForwardIfTrue
                | Self::PopJumpForwardIfNotNone
                | Self::PopJumpForwardIfNone
                | Self::ForIter
                | Self::Send
        )
    }

    /// Jumps whose distance counts backward from the next instruction.
    #[must_use]
    pub const fn is_backward_jump(self) -> bool {
        matches!(
            self,
            Self::JumpBackward
                | Self::JumpBackwardNoInterrupt
                | Self::PopJumpBackwardIfNotNone
                | Self::PopJumpBackwardIfNone
                | Self::PopJumpBackwardIfFalse
                | Self::PopJumpBackwardIfTrue
        )
    }

    /// The same conditional jump in the other direction.
    #[must_use]
    pub const fn reversed_direction(self) -> Self {
        match self {
            Self::JumpForward => Self::JumpBackward,
            Self::JumpBackward => Self::JumpForward,
            Self::PopJumpForwardIfFalse => Self::PopJumpBackwardIfFalse,
            Self::PopJumpBackwardIfFalse => Self::PopJumpForwardIfFalse,
            Self::PopJumpForwardIfTrue => Self::PopJumpBackwardIfTrue,
            Self::PopJumpBackwardIfTrue => Self::PopJumpForwardIfTrue,
            Self::PopJumpForwardIfNone => Self::PopJumpBackwardIfNone,
            Self::PopJumpBackwardIfNone => Self::PopJumpForwardIfNone,
            Self::PopJumpForwardIfNotNone => Self::PopJumpBackwardIfNotNone,
            Self::PopJumpBackwardIfNotNone => Self::PopJumpForwardIfNotNone,
            other => other,
        }
    }

    /// Whether control never falls through to the next instruction.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::JumpForward
                | Self::JumpBackward
                | Self::JumpBackwardNoInterrupt
                | Self::ReturnValue
                | Self::RaiseVarargs
                | Self::Reraise
        )
    }

    /// Net stack effect. `jump` selects the effect along the branch edge of
    /// a conditional jump.
    #[must_use]
    pub fn stack_effect(self, arg: u32, jump: bool) -> i32 {
        let arg_i = arg as i32;
        match self {
            Self::Cache
            | Self::Nop
            | Self::Resume
            | Self::ExtendedArg
            | Self::UnaryPositive
            | Self::UnaryNegative
            | Self::UnaryNot
            | Self::UnaryInvert
            | Self::GetIter
            | Self::GetYieldFromIter
            | Self::LoadAttr
            | Self::CheckExcMatch
            | Self::YieldValue
            | Self::ListToTuple
            | Self::DeleteName
            | Self::DeleteGlobal
            | Self::DeleteFast
            | Self::DeleteDeref
            | Self::MakeCell
            | Self::CopyFreeVars
            | Self::Swap
            | Self::KwNames
            | Self::JumpForward
            | Self::JumpBackward
            | Self::JumpBackwardNoInterrupt => 0,

            Self::PopTop
            | Self::ReturnValue
            | Self::ImportStar
            | Self::PopExcept
            | Self::StoreName
            | Self::StoreGlobal
            | Self::StoreFast
            | Self::StoreDeref
            | Self::BinaryOp
            | Self::BinarySubscr
            | Self::CompareOp
            | Self::IsOp
            | Self::ContainsOp
            | Self::ImportName
            | Self::DeleteAttr
            | Self::Reraise
            | Self::ListAppend
            | Self::SetAdd
            | Self::ListExtend
            | Self::SetUpdate
            | Self::DictMerge
            | Self::DictUpdate
            | Self::Call
            | Self::PopJumpForwardIfFalse
            | Self::PopJumpForwardIfTrue
            | Self::PopJumpForwardIfNone
            | Self::PopJumpForwardIfNotNone
            | Self::PopJumpBackwardIfFalse
            | Self::PopJumpBackwardIfTrue
            | Self::PopJumpBackwardIfNone
            | Self::PopJumpBackwardIfNotNone => -1,

            Self::PushNull
            | Self::LoadConst
            | Self::LoadName
            | Self::LoadFast
            | Self::LoadClosure
            | Self::LoadDeref
            | Self::LoadClassderef
            | Self::LoadBuildClass
            | Self::LoadAssertionError
            | Self::LoadMethod
            | Self::ImportFrom
            | Self::PushExcInfo
            | Self::WithExceptStart
            | Self::BeforeWith
            | Self::Copy
            | Self::ReturnGenerator => 1,

            Self::StoreSubscr => -3,
            Self::DeleteSubscr | Self::StoreAttr | Self::MapAdd => -2,
            Self::UnpackSequence => arg_i - 1,
            Self::UnpackEx => (arg_i & 0xFF) + (arg_i >> 8),
            Self::ForIter => {
                if jump {
                    -1
                } else {
                    1
                }
            }
            Self::BuildTuple | Self::BuildList | Self::BuildSet | Self::BuildString => 1 - arg_i,
            Self::BuildMap => 1 - 2 * arg_i,
            Self::BuildConstKeyMap => -arg_i,
            Self::Send => {
                if jump {
                    -1
                } else {
                    0
                }
            }
            Self::JumpIfFalseOrPop | Self::JumpIfTrueOrPop => {
                if jump {
                    0
                } else {
                    -1
                }
            }
            Self::LoadGlobal => 1 + (arg_i & 1),
            Self::RaiseVarargs => -arg_i,
            Self::Precall => -arg_i,
            Self::CallFunctionEx => -2 - (arg_i & 1),
            Self::MakeFunction => -((arg & 0x0F).count_ones() as i32),
            Self::BuildSlice => {
                if arg == 3 {
                    -2
                } else {
                    -1
                }
            }
            Self::FormatValue => {
                if arg & 0x04 != 0 {
                    -1
                } else {
                    0
                }
            }
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = format!("{self:?}");
        let mut out = String::with_capacity(name.len() + 4);
        for (i, c) in name.chars().enumerate() {
            if c.is_ascii_uppercase() && i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_uppercase());
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_round_trip() {
        for byte in 0..=255u8 {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op.as_u8(), byte);
            }
        }
        assert_eq!(Opcode::from_u8(3), None);
    }

    #[test]
    fn test_cache_counts() {
        assert_eq!(Opcode::LoadGlobal.cache_entries(), 5);
        assert_eq!(Opcode::Call.cache_entries(), 4);
        assert_eq!(Opcode::ForIter.cache_entries(), 0);
        assert_eq!(Opcode::LoadConst.cache_entries(), 0);
    }

    #[test]
    fn test_has_arg_boundary() {
        assert!(!Opcode::PopExcept.has_arg());
        assert!(Opcode::StoreName.has_arg());
    }

    #[test]
    fn test_call_sequence_is_balanced() {
        // PUSH_NULL, func, 2 args, PRECALL 2, CALL 2 leaves one result
        let total = Opcode::PushNull.stack_effect(0, false)
            + Opcode::LoadName.stack_effect(0, false)
            + 2 * Opcode::LoadConst.stack_effect(0, false)
            + Opcode::Precall.stack_effect(2, false)
            + Opcode::Call.stack_effect(2, false);
        assert_eq!(total, 1);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(Opcode::PopJumpForwardIfFalse.to_string(), "POP_JUMP_FORWARD_IF_FALSE");
        assert_eq!(Opcode::LoadConst.to_string(), "LOAD_CONST");
    }
}
