use std::rc::Rc;

use smallvec::SmallVec;

use crate::{block::Block, entity_id, opcode::Opcode, ty::Type};

entity_id! {
    /// A stable numeric id identifying a [`Value`] within its owning
    /// [`Function`](crate::function::Function).
    pub struct ValueId;
}

/// The opaque, reference-comparable payload an opcode may carry in addition
/// to its `AuxInt` (e.g. a symbol name). Compared and hashed by identity of
/// the interned string, not its contents, matching the spec's description of
/// Aux as "opaque opaque-comparable".
#[derive(Debug, Clone, Default)]
pub enum Aux {
    #[default]
    None,
    Sym(Rc<str>),
}

impl PartialEq for Aux {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Aux::None, Aux::None) => true,
            (Aux::Sym(a), Aux::Sym(b)) => Rc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}
impl Eq for Aux {}

impl std::hash::Hash for Aux {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Aux::None => 0u8.hash(state),
            Aux::Sym(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

/// A single SSA value: an operation, its operands, and the metadata the
/// passes in this crate need (constant payload, owning block, source line).
#[derive(Debug, Clone)]
pub struct Value {
    pub opcode: Opcode,
    pub ty: Type,
    /// 64-bit payload used for constant values, field offsets, etc.
    pub aux_int: i64,
    pub aux: Aux,
    pub args: SmallVec<[ValueId; 2]>,
    pub block: Block,
    pub line: u32,
}

impl Value {
    pub fn new(opcode: Opcode, ty: Type, block: Block) -> Self {
        Self {
            opcode,
            ty,
            aux_int: 0,
            aux: Aux::None,
            args: SmallVec::new(),
            block,
            line: 0,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = ValueId>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn with_aux_int(mut self, aux_int: i64) -> Self {
        self.aux_int = aux_int;
        self
    }

    pub fn with_aux(mut self, aux: Aux) -> Self {
        self.aux = aux;
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// Resets this value in place to a new opcode/type, clearing its
    /// operands and aux payload. Used by CSE+hoist to turn an absorbed value
    /// into a `Copy`, and by SCCP to turn a folded expression into a typed
    /// constant. Preserves the value's id, so existing uses remain valid.
    pub fn reset(&mut self, opcode: Opcode, ty: Type) {
        self.opcode = opcode;
        self.ty = ty;
        self.aux_int = 0;
        self.aux = Aux::None;
        self.args.clear();
    }
}
