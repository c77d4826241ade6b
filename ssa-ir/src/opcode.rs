//! The opcode enumeration.
//!
//! A real front end's opcode table is out of scope (spec §1): we don't model
//! target-specific lowering, nor a full instruction set. What's here is the
//! subset needed to drive SCCP's fold table, CSE's equivalence test, and
//! LICM's "speculatively safe to execute" predicate, covering the categories
//! the spec calls out: arithmetic, bitwise, comparisons, conversions, memory
//! ops, phi, constants, and control/marker ops.

/// Properties of an opcode consulted by more than one pass.
///
/// `PartialOrd`/`Ord` give CSE a cheap, deterministic sort key (spec §4.4)
/// over declaration order; the ordering itself carries no semantic meaning
/// beyond "stable and total".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opcode {
    /// A function parameter; defined in the entry block, takes no arguments.
    Param,
    /// SSA merge point; arity always equals the owning block's predecessor
    /// count.
    Phi,

    // -- arithmetic --
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    ModS,
    ModU,
    Neg,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FNeg,

    // -- bitwise --
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Not,

    // -- boolean / short-circuit logic --
    AndB,
    OrB,
    NotB,

    // -- comparisons --
    CmpEq,
    CmpNeq,
    CmpLtS,
    CmpLeS,
    CmpGtS,
    CmpGeS,
    CmpLtU,
    CmpLeU,
    CmpGtU,
    CmpGeU,
    FCmpEq,
    FCmpNeq,
    FCmpLt,
    FCmpLe,
    FCmpGt,
    FCmpGe,

    // -- conversions --
    Trunc,
    SignExt,
    ZeroExt,
    Cvt32Fto64F,
    Cvt64Fto32F,
    CvtIntToFloat,
    CvtFloatToInt,

    // -- memory (opaque, conservative) --
    Load,
    Store,
    NilCheck,
    Call,

    // -- constants --
    ConstBool,
    Const8,
    Const16,
    Const32,
    Const64,
    Const32F,
    Const64F,

    // -- control/marker --
    /// Produces a 2-tuple; `Select0`/`Select1` project out of it.
    MakePair,
    Select0,
    Select1,
    /// A pass-through copy of its single argument, used to replace a value
    /// whose uses have been rewritten to something else.
    Copy,
    /// A no-op marker left behind by hoisting when a void-typed value is
    /// absorbed into a class; always dead.
    Invalid,
    /// Marks a value as observably live without otherwise using it; never
    /// dead-code-eliminated.
    KeepAlive,
}

impl Opcode {
    pub fn is_phi(self) -> bool {
        matches!(self, Opcode::Phi)
    }

    pub fn is_const(self) -> bool {
        matches!(
            self,
            Opcode::ConstBool
                | Opcode::Const8
                | Opcode::Const16
                | Opcode::Const32
                | Opcode::Const64
                | Opcode::Const32F
                | Opcode::Const64F
        )
    }

    /// Binary ops whose operand order doesn't affect the result, so CSE can
    /// canonicalize argument order before comparing.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Mul
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::AndB
                | Opcode::OrB
                | Opcode::FAdd
                | Opcode::FMul
                | Opcode::CmpEq
                | Opcode::CmpNeq
                | Opcode::FCmpEq
                | Opcode::FCmpNeq
        )
    }

    /// True for opcodes that read or write the memory chain, and are
    /// therefore never CSE'd, hoisted, or sunk across blocks.
    pub fn is_memory_op(self) -> bool {
        matches!(self, Opcode::Load | Opcode::Store | Opcode::NilCheck | Opcode::Call)
    }

    pub fn is_call(self) -> bool {
        matches!(self, Opcode::Call)
    }

    /// "Speculatively safe to execute" per LICM's invariance rule 4.5(a):
    /// pure arithmetic/bitwise/compare/conversion/boolean/constant/tuple
    /// projection, plus floating point arithmetic. Division/modulo need an
    /// additional nonzero-constant-divisor check, done by the caller.
    pub fn is_speculatively_safe(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Add | Sub
                | Mul
                | Neg
                | And
                | Or
                | Xor
                | Shl
                | ShrS
                | ShrU
                | Not
                | AndB
                | OrB
                | NotB
                | CmpEq
                | CmpNeq
                | CmpLtS
                | CmpLeS
                | CmpGtS
                | CmpGeS
                | CmpLtU
                | CmpLeU
                | CmpGtU
                | CmpGeU
                | FCmpEq
                | FCmpNeq
                | FCmpLt
                | FCmpLe
                | FCmpGt
                | FCmpGe
                | Trunc
                | SignExt
                | ZeroExt
                | Cvt32Fto64F
                | Cvt64Fto32F
                | CvtIntToFloat
                | CvtFloatToInt
                | FAdd
                | FSub
                | FMul
                | FDiv
                | FNeg
                | Select0
                | Select1
                | MakePair
                | ConstBool
                | Const8
                | Const16
                | Const32
                | Const64
                | Const32F
                | Const64F
        )
    }

    /// Integer division/modulo opcodes, which are speculatively safe only
    /// when the divisor is a nonzero constant (checked by the caller using
    /// the argument's lattice/constant status, not by this predicate alone).
    pub fn is_integer_div_or_mod(self) -> bool {
        matches!(self, Opcode::DivS | Opcode::DivU | Opcode::ModS | Opcode::ModU)
    }

    pub fn num_fixed_args(self) -> Option<usize> {
        use Opcode::*;
        match self {
            Param | ConstBool | Const8 | Const16 | Const32 | Const64 | Const32F | Const64F
            | Invalid => Some(0),
            Neg | FNeg | Not | NotB | Trunc | SignExt | ZeroExt | Cvt32Fto64F | Cvt64Fto32F
            | CvtIntToFloat | CvtFloatToInt | Copy | KeepAlive | Select0 | Select1 | Load => {
                Some(1)
            }
            Add | Sub | Mul | DivS | DivU | ModS | ModU | FAdd | FSub | FMul | FDiv | And | Or
            | Xor | Shl | ShrS | ShrU | AndB | OrB | CmpEq | CmpNeq | CmpLtS | CmpLeS | CmpGtS
            | CmpGeS | CmpLtU | CmpLeU | CmpGtU | CmpGeU | FCmpEq | FCmpNeq | FCmpLt | FCmpLe
            | FCmpGt | FCmpGe | MakePair | NilCheck => Some(2),
            Store => Some(3),
            Phi | Call => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commutativity_is_limited_to_symmetric_ops() {
        assert!(Opcode::Add.is_commutative());
        assert!(!Opcode::Sub.is_commutative());
        assert!(!Opcode::DivS.is_commutative());
    }

    #[test]
    fn memory_ops_are_excluded_from_speculative_safety() {
        assert!(!Opcode::Load.is_speculatively_safe());
        assert!(!Opcode::Store.is_speculatively_safe());
        assert!(Opcode::Add.is_speculatively_safe());
    }

    #[test]
    fn div_mod_need_extra_checks_but_are_not_unconditionally_safe() {
        assert!(!Opcode::DivS.is_speculatively_safe());
        assert!(Opcode::DivS.is_integer_div_or_mod());
    }
}
