//! A concrete SSA intermediate representation: values, basic blocks, and
//! the supporting dominance/loop/verification services the `ssa-opt` passes
//! are built on.
//!
//! Grounded on the data model and module layout of the teacher's `hir`
//! crate (entity storage, dominance, loop nest, pass scaffolding), with the
//! teacher's generic MLIR-style operation/region/dialect machinery replaced
//! by a concrete `Value`/`Block`/`Function` triple matching this repo's
//! fixed opcode set — see `DESIGN.md` for why.

pub mod block;
pub mod dominance;
pub mod entity;
pub mod function;
pub mod loops;
pub mod opcode;
pub mod pass;
pub mod sparse_set;
pub mod ty;
pub mod value;
pub mod verify;

pub use block::{Block, BlockData, BlockKind, Edge};
pub use dominance::Dominance;
pub use entity::{EntityRef, PrimaryMap, SecondaryMap};
pub use function::Function;
pub use loops::{LoopData, LoopId, LoopNest};
pub use opcode::Opcode;
pub use pass::{ChangeResult, FunctionPass, PassConfig, Stats};
pub use sparse_set::SparseSet;
pub use ty::Type;
pub use value::{Aux, Value, ValueId};
pub use verify::PassError;
