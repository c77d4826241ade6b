//! Loop-Invariant Code Motion (spec §4.5): sink loop-invariant, speculatively
//! safe values out to their loop's preheader, outermost loop first so an
//! outer hoist can itself become available to an inner loop's invariance
//! check.
//!
//! Grounded on the shape of the teacher's `hir-analysis::analyses::loops`
//! loop-nest model (header/exits/`containsCall`) and the preheader/hoisting
//! rewrite in `dialects/hir/src/canonicalization/
//! remove_loop_invariant_args_from_before_block.rs`, adapted to this crate's
//! concrete opcode/type model and per-value (rather than per-block-argument)
//! granularity.

use rustc_hash::FxHashMap;

use ssa_ir::{
    Block, BlockKind, ChangeResult, Dominance, Function, FunctionPass, LoopId, LoopNest, Opcode,
    PassConfig, Stats, ValueId,
};

pub struct Licm;

impl FunctionPass for Licm {
    const NAME: &'static str = "licm";

    fn run(func: &mut Function, config: &PassConfig) -> ChangeResult {
        let mut stats = Stats::new(Self::NAME);
        let dom = Dominance::compute(func);
        let mut nest = LoopNest::compute(func, &dom);
        let mut changed = ChangeResult::Unchanged;

        for id in outermost_first(&nest) {
            if nest.get(id).contains_call {
                log::trace!("licm: skipping {id}, contains a call");
                continue;
            }
            let Some(preheader) = find_preheader(func, &dom, &nest, id) else {
                stats.incr("LICM NOPREHDR");
                continue;
            };
            nest.get_mut(id).preheader = Some(preheader);

            let mut memo: FxHashMap<ValueId, bool> = FxHashMap::default();
            let moved = hoist_loop(func, &dom, &nest, id, preheader, &mut memo, &mut stats);
            if moved {
                changed = ChangeResult::Changed;
            }
        }

        if config.debug >= 1 && changed.changed() {
            log::debug!("licm: moved {} value(s)", stats.get("LICM MOVES"));
        }
        stats.report(config);
        changed
    }
}

/// Loops in an order where every parent precedes its children (spec §4.5's
/// "outermost first", so a value hoisted out of an outer loop is already
/// outside the inner one by the time the inner loop's own pass runs).
fn outermost_first(nest: &LoopNest) -> Vec<LoopId> {
    let mut order: Vec<LoopId> = nest.ids().collect();
    order.sort_by_key(|&id| depth(nest, id));
    order
}

fn depth(nest: &LoopNest, id: LoopId) -> u32 {
    let mut d = 0;
    let mut cur = nest.get(id).parent;
    while let Some(p) = cur {
        d += 1;
        cur = nest.get(p).parent;
    }
    d
}

/// A loop has a usable preheader iff its header has exactly one predecessor
/// not dominated by the header itself (i.e. not a back edge); that
/// predecessor is the preheader. Otherwise (multiple outside predecessors,
/// an irreducible entry) LICM gives up on this loop rather than inserting
/// one, per spec §4.5's stated non-goal.
fn find_preheader(func: &Function, dom: &Dominance, nest: &LoopNest, id: LoopId) -> Option<Block> {
    let header = nest.get(id).header;
    let outside: Vec<Block> = func
        .predecessors(header)
        .iter()
        .map(|e| e.block)
        .filter(|&p| !dom.dominates(header, p))
        .collect();
    match outside.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

/// A value is safe to hoist if its opcode is in the speculatively-safe set
/// (spec §4.5(a)) — with integer div/mod additionally requiring a known
/// nonzero constant divisor — or, failing that, its block dominates every
/// non-`Exit` loop exit (spec §4.5(b): it is definitely executed on every
/// iteration, so moving it earlier cannot introduce an execution that was
/// absent). It is never a phi, a memory-chain value, or the block's own
/// control value (the thing the branch decision itself depends on —
/// hoisting it would change which iterations execute).
///
/// Operand invariance is not this function's job: `is_loop_invariant`
/// already walks `v`'s arguments after calling this, so checking them here
/// too would make div/mod recurse into itself forever.
fn can_hoist(func: &Function, dom: &Dominance, nest: &LoopNest, candidate_loop: LoopId, v: ValueId) -> bool {
    let value = func.value(v);
    if value.opcode.is_phi() || value.ty.is_memory() || value.opcode.is_memory_op() {
        return false;
    }
    if func.block(value.block).control == Some(v) {
        return false;
    }
    if value.opcode.is_integer_div_or_mod() {
        let divisor = value.args[1];
        let dv = func.value(divisor);
        return dv.opcode.is_const() && dv.aux_int != 0;
    }
    if value.opcode.is_speculatively_safe() {
        return true;
    }
    dominates_every_loop_exit(func, dom, nest, candidate_loop, value.block)
}

/// Rule 4.5(b): `block` is definitely reached on every pass through the
/// loop iff it dominates every exit the loop can leave through, ignoring
/// `Exit`-kind blocks (those are dead ends a function never actually
/// returns through, so domination over them is vacuous).
fn dominates_every_loop_exit(
    func: &Function,
    dom: &Dominance,
    nest: &LoopNest,
    candidate_loop: LoopId,
    block: Block,
) -> bool {
    nest.get(candidate_loop)
        .exits
        .iter()
        .filter(|&&exit| func.block(exit).kind != BlockKind::Exit)
        .all(|&exit| dom.dominates(block, exit))
}

/// Whether every argument of `v` is defined outside `candidate_loop`'s body,
/// recursively treating an argument that is itself invariant (and will be
/// hoisted) as outside too. Memoized per loop since the same value can be an
/// argument of many candidates.
fn is_loop_invariant(
    func: &Function,
    dom: &Dominance,
    nest: &LoopNest,
    candidate_loop: LoopId,
    v: ValueId,
    memo: &mut FxHashMap<ValueId, bool>,
) -> bool {
    if let Some(&cached) = memo.get(&v) {
        return cached;
    }
    let value = func.value(v);
    let result = if nest.is_loop_invariant_block(candidate_loop, value.block) {
        true
    } else if !can_hoist(func, dom, nest, candidate_loop, v) {
        false
    } else {
        value.args.iter().all(|&a| is_loop_invariant(func, dom, nest, candidate_loop, a, memo))
    };
    memo.insert(v, result);
    result
}

/// Hoists every loop-invariant value to `preheader`, moving them in
/// dominator-preorder of their owning block (with each block's own values
/// kept in program order) rather than the loop nest's raw body order, which
/// can put a back-edge source's values ahead of a block it's dominated by.
/// Appending in that order preserves "def before use" among the values
/// landing in the same preheader, matching the move's stated ordering
/// guarantee (spec §4.5's "ordering of moved values is preserved"). A single
/// forward sweep suffices: re-checking invariance as values get hoisted
/// within the same pass means repeated sweeps converge, matching the
/// teacher's fixed-point loop.
fn hoist_loop(
    func: &mut Function,
    dom: &Dominance,
    nest: &LoopNest,
    loop_id: LoopId,
    preheader: Block,
    memo: &mut FxHashMap<ValueId, bool>,
    stats: &mut Stats,
) -> bool {
    let mut blocks: Vec<Block> = nest.get(loop_id).body.clone();
    blocks.sort_by_key(|&b| dom.preorder(b));

    let mut changed = false;
    loop {
        let mut moved_this_pass = false;
        let candidates: Vec<ValueId> =
            blocks.iter().flat_map(|&b| func.block(b).values.iter().copied()).collect();

        for v in candidates {
            if func.value(v).block == preheader {
                continue; // already hoisted by an earlier pass
            }
            if nest.is_loop_invariant_block(loop_id, func.value(v).block) {
                continue; // already outside the loop body, nothing to move
            }
            if !can_hoist(func, dom, nest, loop_id, v) {
                continue;
            }
            memo.clear();
            if !is_loop_invariant(func, dom, nest, loop_id, v, memo) {
                continue;
            }
            log::trace!("licm: hoisting {v} to {preheader}");
            func.move_value_to_block(v, preheader);
            stats.incr("LICM MOVES");
            moved_this_pass = true;
            changed = true;
        }
        if !moved_this_pass {
            break;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssa_ir::Type;

    /// Spec §8 scenario 5: a `Load` inside the loop body must never be
    /// hoisted, even though it takes no arguments and looks "invariant" by
    /// a naive use-count check — it's a memory op.
    #[test]
    fn memory_read_is_never_hoisted() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let header = func.create_block(BlockKind::If);
        let exit = func.create_block(BlockKind::Ret);
        func.add_edge(entry, header);

        let load = func.new_value(header, Opcode::Load, Type::I32, []);
        let cond = func.new_value(header, Opcode::Param, Type::Bool, []);
        func.set_control(header, Some(cond));
        func.add_edge(header, header);
        func.add_edge(header, exit);

        let config = PassConfig::new();
        Licm::run(&mut func, &config);
        assert_eq!(func.value(load).block, header);
    }

    /// Spec §8 scenario 6: pure arithmetic over two loop-invariant values
    /// moves to the single preheader predecessor of the header.
    #[test]
    fn pure_arithmetic_over_invariants_is_hoisted_to_the_preheader() {
        crate::init_test_logger();
        let mut func = Function::new("f");
        let entry = func.entry();
        let a = func.new_const(entry, Opcode::Const32, Type::I32, 3);
        let b = func.new_const(entry, Opcode::Const32, Type::I32, 4);

        let header = func.create_block(BlockKind::If);
        let exit = func.create_block(BlockKind::Ret);
        func.add_edge(entry, header);

        let sum = func.new_value(header, Opcode::Add, Type::I32, [a, b]);
        let cond = func.new_value(header, Opcode::CmpGtS, Type::Bool, [sum, a]);
        func.set_control(header, Some(cond));
        func.add_edge(header, header);
        func.add_edge(header, exit);

        let config = PassConfig::new();
        let changed = Licm::run(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.value(sum).block, entry);
    }

    /// A loop whose header has two distinct non-back-edge predecessors has
    /// no single preheader; LICM must abort rather than guess or insert one
    /// (spec §4.5's stated non-goal).
    #[test]
    fn irreducible_entry_blocks_all_hoisting() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let side = func.create_block(BlockKind::Plain);
        let header = func.create_block(BlockKind::If);
        let exit = func.create_block(BlockKind::Ret);
        func.add_edge(entry, header);
        func.add_edge(entry, side);
        func.add_edge(side, header);

        let a = func.new_const(entry, Opcode::Const32, Type::I32, 1);
        let b = func.new_const(entry, Opcode::Const32, Type::I32, 2);
        let sum = func.new_value(header, Opcode::Add, Type::I32, [a, b]);
        let cond = func.new_value(header, Opcode::CmpGtS, Type::Bool, [sum, a]);
        func.set_control(header, Some(cond));
        func.add_edge(header, header);
        func.add_edge(header, exit);

        let config = PassConfig::new();
        let changed = Licm::run(&mut func, &config);
        assert!(!changed.changed());
        assert_eq!(func.value(sum).block, header);
    }

    /// Division by a loop-invariant nonzero constant must hoist cleanly, not
    /// recurse forever: `can_hoist`'s div/mod branch used to re-enter
    /// `is_loop_invariant` on the very value it was being asked about.
    #[test]
    fn div_by_loop_invariant_nonzero_constant_does_not_recurse_forever() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let x = func.new_const(entry, Opcode::Const32, Type::I32, 10);
        let two = func.new_const(entry, Opcode::Const32, Type::I32, 2);

        let header = func.create_block(BlockKind::If);
        let exit = func.create_block(BlockKind::Ret);
        func.add_edge(entry, header);

        let q = func.new_value(header, Opcode::DivS, Type::I32, [x, two]);
        let cond = func.new_value(header, Opcode::CmpGtS, Type::Bool, [q, two]);
        func.set_control(header, Some(cond));
        func.add_edge(header, header);
        func.add_edge(header, exit);

        let config = PassConfig::new();
        let changed = Licm::run(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.value(q).block, entry);
    }

    /// A value whose only argument is a later value in the same loop, in a
    /// block the loop nest's raw body order visits *before* that argument's
    /// block, must still be hoisted after it in the preheader: hoisting in
    /// body order rather than dominator order used to append the use ahead
    /// of its def.
    #[test]
    fn invariants_are_hoisted_in_dependency_order_even_when_body_order_disagrees() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let c1 = func.new_const(entry, Opcode::Const32, Type::I32, 3);
        let c2 = func.new_const(entry, Opcode::Const32, Type::I32, 4);

        let header = func.create_block(BlockKind::If);
        let x = func.create_block(BlockKind::Plain);
        let y = func.create_block(BlockKind::Plain);
        let exit = func.create_block(BlockKind::Ret);
        func.add_edge(entry, header);
        let cond = func.new_value(header, Opcode::Param, Type::Bool, []);
        func.set_control(header, Some(cond));
        func.add_edge(header, x);
        func.add_edge(header, exit);
        func.add_edge(x, y);
        func.add_edge(y, header); // back edge: natural_loop_body visits y before x

        let a = func.new_value(x, Opcode::Add, Type::I32, [c1, c2]);
        let v = func.new_value(y, Opcode::Add, Type::I32, [a, c1]);

        let config = PassConfig::new();
        let changed = Licm::run(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.value(a).block, entry);
        assert_eq!(func.value(v).block, entry);

        let pos_a = func.block(entry).values.iter().position(|&id| id == a).unwrap();
        let pos_v = func.block(entry).values.iter().position(|&id| id == v).unwrap();
        assert!(pos_a < pos_v, "a's definition must land before v's use of it");
    }

    /// Spec §4.5(b): a value need not be "speculatively safe" to hoist if
    /// its block dominates every non-`Exit` loop exit, i.e. it runs on
    /// every iteration regardless of which way the branch goes. `Copy` is
    /// not in the speculatively-safe set, so this only passes via rule (b).
    #[test]
    fn value_dominating_every_exit_hoists_via_the_always_executed_rule() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let c = func.new_const(entry, Opcode::Const32, Type::I32, 7);

        let header = func.create_block(BlockKind::If);
        let exit = func.create_block(BlockKind::Ret);
        func.add_edge(entry, header);

        let copy = func.new_value(header, Opcode::Copy, Type::I32, [c]);
        let cond = func.new_value(header, Opcode::CmpGtS, Type::Bool, [copy, c]);
        func.set_control(header, Some(cond));
        func.add_edge(header, header);
        func.add_edge(header, exit);

        let config = PassConfig::new();
        let changed = Licm::run(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.value(copy).block, entry);
    }
}
