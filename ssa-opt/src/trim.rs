//! Basic-block trimming (spec §4.2): delete blocks that carry no code
//! beyond an unconditional jump, merging their phis into the successor
//! they jump to.
//!
//! Grounded on the teacher's `hir-transform::canonicalization` block-folding
//! pass (same "absorb an empty successor, rewire the phis" shape), adapted
//! here to the concrete `BlockKind::Plain` / phi representation this crate
//! uses instead of the teacher's generic MLIR block-argument model.

use ssa_ir::{Block, BlockKind, ChangeResult, Edge, Function, FunctionPass, Opcode, PassConfig, Stats, ValueId};

pub struct Trim;

impl FunctionPass for Trim {
    const NAME: &'static str = "trim";

    fn run(func: &mut Function, config: &PassConfig) -> ChangeResult {
        let mut stats = Stats::new(Self::NAME);
        let mut changed = ChangeResult::Unchanged;

        loop {
            let Some((b, s)) = find_candidate(func) else { break };
            log::trace!("trim: folding {b} into {s}");
            fold_block(func, b, s);
            stats.incr("TRIM FOLDED");
            changed = ChangeResult::Changed;
        }

        if config.debug >= 1 && changed.changed() {
            log::debug!("trim: folded {} block(s)", stats.get("TRIM FOLDED"));
        }
        stats.report(config);
        changed
    }
}

/// A block carries no code beyond its jump if every value it owns is a phi
/// or a `KeepAlive` marker (spec §4.2's open question, resolved in favor of
/// accepting `KeepAlive` — see DESIGN.md).
fn has_no_code(func: &Function, block: Block) -> bool {
    func.block(block)
        .values
        .iter()
        .all(|&v| matches!(func.value(v).opcode, Opcode::Phi | Opcode::KeepAlive))
}

fn find_candidate(func: &Function) -> Option<(Block, Block)> {
    let entry = func.entry();
    for block in func.blocks() {
        if block == entry {
            continue;
        }
        let data = func.block(block);
        if data.kind != BlockKind::Plain {
            continue;
        }
        let s = data.succs[0].block;
        if s == block {
            continue; // self-loop
        }
        if has_no_code(func, block) {
            return Some((block, s));
        }
    }
    None
}

/// Absorbs `b` into `s`, merging b's phis into s's and performing the CFG
/// surgery described in spec §4.2.
fn fold_block(func: &mut Function, b: Block, s: Block) {
    let idx = func
        .predecessors(s)
        .iter()
        .position(|e| e.block == b)
        .expect("b must be a predecessor of s to be folded into it");

    let b_preds: Vec<Edge> = func.predecessors(b).to_vec();
    let b_phis: Vec<ValueId> =
        func.block(b).values.iter().copied().filter(|&v| func.value(v).opcode.is_phi()).collect();

    let mut consumed: Vec<ValueId> = Vec::new();
    let s_phis: Vec<ValueId> =
        func.block(s).values.iter().copied().filter(|&v| func.value(v).opcode.is_phi()).collect();

    for phi in s_phis {
        let v_i = func.value(phi).args[idx];
        let replacement: Vec<ValueId> = if func.value(v_i).block == b && func.value(v_i).opcode.is_phi()
        {
            consumed.push(v_i);
            func.value(v_i).args.to_vec()
        } else {
            std::iter::repeat_n(v_i, b_preds.len()).collect()
        };
        let mut new_args = func.value(phi).args.to_vec();
        new_args.splice(idx..idx + 1, replacement);
        func.value_mut(phi).args = new_args.into();
    }

    // Phis in b with no consumer among s's phis are, at this stage, only
    // present for liveness (spec §4.2's acknowledged shortcut): forward
    // every one of their uses to their first argument.
    for &phi in &b_phis {
        if !consumed.contains(&phi) {
            let first_arg = func.value(phi).args[0];
            func.replace_all_uses(phi, first_arg);
        }
    }

    // `KeepAlive` markers in b have nowhere else to execute once b is gone;
    // move them into s, right after its phis, so they stay observably live.
    let keepalives: Vec<ValueId> = func
        .block(b)
        .values
        .iter()
        .copied()
        .filter(|&v| func.value(v).opcode == Opcode::KeepAlive)
        .collect();
    for v in keepalives {
        func.move_value_to_block(v, s);
        let current = func.block(s).values.iter().position(|&x| x == v).unwrap();
        let moved = func.block_mut(s).values.remove(current);
        let insert_at = func
            .block(s)
            .values
            .iter()
            .position(|&x| !func.value(x).opcode.is_phi())
            .unwrap_or(func.block(s).values.len());
        func.block_mut(s).values.insert(insert_at, moved);
    }

    // CFG surgery: redirect b's own predecessors to jump straight to s,
    // then splice them into s's predecessor list where b used to be.
    func.redirect_predecessor_edges(b, s);
    let mut new_preds: Vec<Edge> = func.predecessors(s).to_vec();
    new_preds.splice(idx..idx + 1, b_preds.iter().copied());
    func.block_mut(s).preds = new_preds.into();
    func.resync_predecessor_indices(s);

    func.remove_block(b);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssa_ir::Type;

    /// Spec §8 scenario 1 (BST search trim), reduced to its essential
    /// shape: b1 and b19 both jump into b4, which holds a single phi and
    /// falls through unconditionally to b2; b2 has its own phi merging b1
    /// and b4. After trim, b4 disappears and b2's phi gains b4's incoming
    /// edges directly.
    #[test]
    fn single_phi_block_is_folded_into_its_successor() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let b1 = func.create_block(BlockKind::Plain);
        let b19 = func.create_block(BlockKind::Plain);
        let b4 = func.create_block(BlockKind::Plain);
        let b2 = func.create_block(BlockKind::Ret);

        func.add_edge(entry, b1);
        func.add_edge(entry, b19);
        func.add_edge(b1, b2);
        func.add_edge(b19, b4);
        func.add_edge(b4, b2);

        let v34 = func.new_const(b1, Opcode::Const32, Type::I32, 34);
        let v42 = func.new_const(b19, Opcode::Const32, Type::I32, 42);
        let v68 = func.new_value(b4, Opcode::Phi, Type::I32, [v42]);
        let v8 = func.new_value(b2, Opcode::Phi, Type::I32, [v34, v68]);
        func.set_control(b2, Some(v8));

        let config = PassConfig::new();
        let changed = Trim::run(&mut func, &config);
        assert!(changed.changed());

        assert_eq!(func.block(b4).kind, BlockKind::Exit);
        assert_eq!(func.predecessors(b2).len(), 2);
        assert_eq!(func.value(v8).args.as_slice(), &[v34, v42]);
    }

    #[test]
    fn entry_block_is_never_trimmed() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let ret = func.create_block(BlockKind::Ret);
        func.add_edge(entry, ret);

        let config = PassConfig::new();
        let changed = Trim::run(&mut func, &config);
        assert!(!changed.changed());
        assert_eq!(func.num_blocks(), 2);
    }

    #[test]
    fn block_with_real_code_is_not_trimmed() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let mid = func.create_block(BlockKind::Plain);
        let ret = func.create_block(BlockKind::Ret);
        func.add_edge(entry, mid);
        func.add_edge(mid, ret);
        let _c = func.new_const(mid, Opcode::Const32, Type::I32, 1);

        let config = PassConfig::new();
        let changed = Trim::run(&mut func, &config);
        assert!(!changed.changed());
    }

    #[test]
    fn single_predecessor_successor_folds_without_extra_phi_args() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let mid = func.create_block(BlockKind::Plain);
        let ret = func.create_block(BlockKind::Ret);
        func.add_edge(entry, mid);
        func.add_edge(mid, ret);

        let config = PassConfig::new();
        let changed = Trim::run(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.num_blocks() - 1, 1); // ret remains, mid tombstoned
        assert_eq!(func.predecessors(ret).len(), 1);
        assert_eq!(func.predecessors(ret)[0].block, entry);
    }
}
