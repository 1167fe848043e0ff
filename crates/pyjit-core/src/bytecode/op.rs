//! Opcode table: the subset of interpreter bytecode this core reasons
//! about, its static stack effect, and the unboxing whitelist.
//!
//! spec.md's Open Question #1 leaves `supportsUnboxing(opcode)` and
//! `supportsEscaping(kind)` as parameters rather than guessed values; both
//! are implemented here as small `const` tables so call sites read them as
//! data, not as embedded policy.

use strum::{Display, EnumIter};

use crate::value::Kind;

/// A bytecode opcode. `oparg` width and meaning are opcode-specific and
/// decoded by [`crate::bytecode::instruction`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[repr(u8)]
pub enum Opcode {
    ExtendedArg = 0,

    LoadConst = 1,
    LoadFast = 2,
    StoreFast = 3,
    LoadGlobal = 4,
    DeleteFast = 5,

    BinaryAdd = 6,
    BinarySubtract = 7,
    BinaryMultiply = 8,
    BinaryTrueDivide = 9,
    BinaryFloorDivide = 10,
    BinaryModulo = 11,
    BinaryPower = 12,
    BinaryLshift = 13,
    BinaryRshift = 14,
    BinaryAnd = 15,
    BinaryOr = 16,
    BinaryXor = 17,
    BinarySubscr = 18,

    UnaryNegative = 19,
    UnaryPositive = 20,
    UnaryNot = 21,
    UnaryInvert = 22,

    CompareOp = 23,
    ContainsOp = 24,

    BuildList = 25,
    BuildTuple = 26,
    BuildSet = 27,
    BuildMap = 28,
    ListExtend = 29,
    DictUpdate = 30,
    BuildSlice = 31,

    GetIter = 32,
    ForIter = 33,

    CallFunction = 34,
    ImportFrom = 35,

    JumpAbsolute = 36,
    JumpIfFalse = 37,
    JumpIfTrue = 38,
    PopJumpIfFalse = 39,
    PopJumpIfTrue = 40,

    SetupFinally = 41,
    SetupExcept = 42,
    PopBlock = 43,
    BreakLoop = 44,
    ContinueLoop = 45,
    RaiseVarargs = 46,
    LoadAssertionError = 47,

    PopTop = 48,
    DupTop = 49,
    RotTwo = 50,

    ReturnValue = 51,
}

impl Opcode {
    /// Net stack effect (pushed minus popped) for opcodes whose effect is
    /// fixed regardless of `oparg`. Variable-effect opcodes (most `BUILD_*`,
    /// `CALL_FUNCTION`, `RAISE_VARARGS`) return `None`; their effect
    /// depends on `oparg` and is computed by the analyser at the use site.
    #[must_use]
    pub const fn stack_effect(self) -> Option<i32> {
        use Opcode::{
            BinaryAdd, BinaryAnd, BinaryFloorDivide, BinaryLshift, BinaryModulo, BinaryMultiply, BinaryOr,
            BinaryPower, BinaryRshift, BinarySubscr, BinarySubtract, BinaryTrueDivide, BinaryXor, CompareOp,
            ContainsOp, DeleteFast, DupTop, ExtendedArg, JumpAbsolute, LoadAssertionError, LoadConst, LoadFast,
            LoadGlobal, PopBlock, PopJumpIfFalse, PopJumpIfTrue, PopTop, ReturnValue, RotTwo, StoreFast,
            UnaryInvert, UnaryNegative, UnaryNot, UnaryPositive,
        };
        Some(match self {
            ExtendedArg | PopBlock => 0,
            LoadConst | LoadFast | LoadGlobal | LoadAssertionError | DupTop => 1,
            StoreFast | PopTop | DeleteFast => -1,
            BinaryAdd | BinarySubtract | BinaryMultiply | BinaryTrueDivide | BinaryFloorDivide | BinaryModulo
            | BinaryPower | BinaryLshift | BinaryRshift | BinaryAnd | BinaryOr | BinaryXor | BinarySubscr
            | CompareOp | ContainsOp => -1,
            UnaryNegative | UnaryPositive | UnaryNot | UnaryInvert => 0,
            JumpAbsolute | RotTwo => 0,
            PopJumpIfFalse | PopJumpIfTrue => -1,
            ReturnValue => -1,
            _ => return None,
        })
    }

    /// Whether this opcode may, in principle, operate on unboxed machine
    /// values (subject to the instruction graph's edge-kind checks).
    /// `LOAD_FAST`/`STORE_FAST` are deliberately excluded per spec §4.3
    /// ("excluding LOAD_FAST/STORE_FAST, deferred"). `UnaryPositive` is
    /// excluded too: it has no `MachineOp` counterpart (Python `+x` is a
    /// `__pos__` dispatch, not a fixed-width machine operation), so the
    /// driver always routes it through the boxed `UnaryOp` helper, the same
    /// as `UnaryNot`.
    #[must_use]
    pub const fn supports_unboxing(self) -> bool {
        matches!(
            self,
            Self::BinaryAdd
                | Self::BinarySubtract
                | Self::BinaryMultiply
                | Self::BinaryFloorDivide
                | Self::BinaryModulo
                | Self::BinaryPower
                | Self::BinaryLshift
                | Self::BinaryRshift
                | Self::BinaryAnd
                | Self::BinaryOr
                | Self::BinaryXor
                | Self::UnaryNegative
                | Self::UnaryInvert
                | Self::CompareOp
                | Self::LoadConst
        )
    }

    /// Whether this opcode introduces or must reconcile a block-stack
    /// entry; used by the driver to thread block-stack discipline.
    #[must_use]
    pub const fn is_block_opcode(self) -> bool {
        matches!(self, Self::SetupFinally | Self::SetupExcept | Self::PopBlock)
    }

    #[must_use]
    pub const fn is_unconditional_branch(self) -> bool {
        matches!(self, Self::JumpAbsolute | Self::ReturnValue | Self::RaiseVarargs | Self::BreakLoop | Self::ContinueLoop)
    }

    #[must_use]
    pub const fn is_conditional_branch(self) -> bool {
        matches!(self, Self::JumpIfFalse | Self::JumpIfTrue | Self::PopJumpIfFalse | Self::PopJumpIfTrue)
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::ExtendedArg,
            1 => Self::LoadConst,
            2 => Self::LoadFast,
            3 => Self::StoreFast,
            4 => Self::LoadGlobal,
            5 => Self::DeleteFast,
            6 => Self::BinaryAdd,
            7 => Self::BinarySubtract,
            8 => Self::BinaryMultiply,
            9 => Self::BinaryTrueDivide,
            10 => Self::BinaryFloorDivide,
            11 => Self::BinaryModulo,
            12 => Self::BinaryPower,
            13 => Self::BinaryLshift,
            14 => Self::BinaryRshift,
            15 => Self::BinaryAnd,
            16 => Self::BinaryOr,
            17 => Self::BinaryXor,
            18 => Self::BinarySubscr,
            19 => Self::UnaryNegative,
            20 => Self::UnaryPositive,
            21 => Self::UnaryNot,
            22 => Self::UnaryInvert,
            23 => Self::CompareOp,
            24 => Self::ContainsOp,
            25 => Self::BuildList,
            26 => Self::BuildTuple,
            27 => Self::BuildSet,
            28 => Self::BuildMap,
            29 => Self::ListExtend,
            30 => Self::DictUpdate,
            31 => Self::BuildSlice,
            32 => Self::GetIter,
            33 => Self::ForIter,
            34 => Self::CallFunction,
            35 => Self::ImportFrom,
            36 => Self::JumpAbsolute,
            37 => Self::JumpIfFalse,
            38 => Self::JumpIfTrue,
            39 => Self::PopJumpIfFalse,
            40 => Self::PopJumpIfTrue,
            41 => Self::SetupFinally,
            42 => Self::SetupExcept,
            43 => Self::PopBlock,
            44 => Self::BreakLoop,
            45 => Self::ContinueLoop,
            46 => Self::RaiseVarargs,
            47 => Self::LoadAssertionError,
            48 => Self::PopTop,
            49 => Self::DupTop,
            50 => Self::RotTwo,
            51 => Self::ReturnValue,
            _ => return None,
        })
    }
}

/// Whether values of `kind` may flow through an unboxed edge.
///
/// `Int`, `Float`, and `Bool` are the only kinds with a fixed-width machine
/// representation cheap enough to pass around unboxed; everything else
/// (including `Any`, since its runtime kind isn't known until the
/// operation actually runs) must stay boxed.
#[must_use]
pub const fn supports_escaping(kind: Kind) -> bool {
    matches!(kind, Kind::Int | Kind::Float | Kind::Bool)
}
