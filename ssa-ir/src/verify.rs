//! Structural invariant checking (spec §8), plus the error type passes use
//! to report a broken invariant.
//!
//! Grounded on the teacher's `hir::pass::pass.rs` diagnostics convention of
//! returning a descriptive `Result` from a pass rather than panicking on
//! malformed IR, scaled down to this crate's flat `Function` (no diagnostic
//! source-span reporting, which needs a front end this crate doesn't have).

use thiserror::Error;

use crate::{block::Block, function::Function, value::ValueId};

/// A violated IR invariant. Every variant corresponds to one of the
/// properties listed in spec §8; passes that detect one of these bugs in
/// their own output should return it from verification rather than
/// silently producing malformed IR.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PassError {
    #[error("block {block} expects {expected} successor(s) but has {actual}")]
    WrongSuccessorCount { block: Block, expected: usize, actual: usize },

    #[error("value {value} has {expected} fixed argument(s) but has {actual}")]
    WrongArgCount { value: ValueId, expected: usize, actual: usize },

    #[error("phi {phi} in block {block} has {args} argument(s) but block has {preds} predecessor(s)")]
    PhiArityMismatch { phi: ValueId, block: Block, args: usize, preds: usize },

    #[error("value {value} is used before a definition that dominates its use")]
    UseNotDominatedByDef { value: ValueId },

    #[error("block {block} is unreachable from the entry")]
    UnreachableBlock { block: Block },

    #[error("edge arrays between block {a} and block {b} are not positionally paired")]
    AsymmetricEdge { a: Block, b: Block },
}

/// Checks that every block's successor count matches what its
/// [`BlockKind`](crate::block::BlockKind) demands, and that phi arity
/// matches predecessor count — the two structural invariants every pass in
/// this crate is required to preserve (spec §8, properties 1 and 2).
pub fn verify_structure(func: &Function) -> Result<(), PassError> {
    for block in func.blocks() {
        let data = func.block(block);
        if let Some(expected) = data.kind.expected_successor_count() {
            if data.succs.len() != expected {
                return Err(PassError::WrongSuccessorCount {
                    block,
                    expected,
                    actual: data.succs.len(),
                });
            }
        }
        for &v in &data.values {
            let value = func.value(v);
            if value.opcode.is_phi() {
                if value.args.len() != data.preds.len() {
                    return Err(PassError::PhiArityMismatch {
                        phi: v,
                        block,
                        args: value.args.len(),
                        preds: data.preds.len(),
                    });
                }
            } else if let Some(expected) = value.opcode.num_fixed_args() {
                if value.args.len() != expected {
                    return Err(PassError::WrongArgCount {
                        value: v,
                        expected,
                        actual: value.args.len(),
                    });
                }
            }
        }
        for &edge in &data.succs {
            let back = func.predecessors(edge.block).get(edge.index as usize);
            if back.map(|e| e.block) != Some(block) {
                return Err(PassError::AsymmetricEdge { a: block, b: edge.block });
            }
        }
    }
    Ok(())
}

/// Checks that every non-phi use is dominated by its definition, and every
/// phi argument is dominated by the corresponding predecessor's last point
/// (spec §8, property 3: "every use is dominated by its definition, with
/// the usual phi exception").
pub fn verify_dominance(
    func: &Function,
    dom: &crate::dominance::Dominance,
) -> Result<(), PassError> {
    let def_block: std::collections::HashMap<ValueId, Block> =
        func.values().map(|v| (v, func.value(v).block)).collect();

    for block in func.blocks() {
        if !dom.is_reachable(block) && block != func.entry() {
            continue; // unreachable blocks are trim's job to remove, not a dominance defect by themselves
        }
        let data = func.block(block);
        for &v in &data.values {
            let value = func.value(v);
            if value.opcode.is_phi() {
                for (i, &arg) in value.args.iter().enumerate() {
                    let Some(&pred_block) = data.preds.get(i).map(|e| &e.block) else {
                        continue;
                    };
                    let Some(&arg_block) = def_block.get(&arg) else { continue };
                    if !dom.is_reachable(pred_block) {
                        continue;
                    }
                    if !dom.dominates(arg_block, pred_block) && arg_block != pred_block {
                        return Err(PassError::UseNotDominatedByDef { value: arg });
                    }
                }
            } else {
                for &arg in &value.args {
                    let Some(&arg_block) = def_block.get(&arg) else { continue };
                    if !dom.dominates(arg_block, block) {
                        return Err(PassError::UseNotDominatedByDef { value: arg });
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BlockKind,
        dominance::Dominance,
        opcode::Opcode,
        ty::Type,
    };

    #[test]
    fn well_formed_function_verifies_clean() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let p = func.new_value(entry, Opcode::Param, Type::I32, []);
        let c = func.new_const(entry, Opcode::Const32, Type::I32, 1);
        let _add = func.new_value(entry, Opcode::Add, Type::I32, [p, c]);

        assert!(verify_structure(&func).is_ok());
        let dom = Dominance::compute(&func);
        assert!(verify_dominance(&func, &dom).is_ok());
    }

    #[test]
    fn wrong_successor_count_is_caught() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let b2 = func.create_block(BlockKind::If);
        func.add_edge(entry, b2);
        // BlockKind::If expects two successors; only one was wired.
        assert_eq!(
            verify_structure(&func),
            Err(PassError::WrongSuccessorCount { block: b2, expected: 2, actual: 0 })
        );
    }

    #[test]
    fn use_preceding_its_def_across_blocks_is_caught() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let later = func.create_block(BlockKind::Ret);
        func.add_edge(entry, later);
        let defined_later = func.new_value(later, Opcode::Const32, Type::I32, []);
        let _use_early = func.new_value(entry, Opcode::Copy, Type::I32, [defined_later]);

        let dom = Dominance::compute(&func);
        assert!(verify_dominance(&func, &dom).is_err());
    }
}
