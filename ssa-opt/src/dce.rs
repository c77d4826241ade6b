//! Dead code elimination and φ-elimination (spec §4.7, ambient supplement).
//!
//! Not one of the four named passes, but invoked between SCCP and CSE+hoist
//! and again after CSE+hoist's rewrites, since hoisting routinely leaves
//! behind `Copy`/`Invalid` husks that need sweeping up. A pure use-count
//! fixed point plus the narrow trivial-φ simplification named in the spec;
//! no folding, no dominance reasoning.
//!
//! Grounded on the teacher's `hir::ir::region::transforms::dce` liveness
//! fixed-point loop, scaled down from its op/region liveness lattice to a
//! flat per-value use-count sweep over this crate's concrete IR.

use rustc_hash::FxHashMap;

use ssa_ir::{Block, ChangeResult, Function, FunctionPass, Opcode, PassConfig, Stats, ValueId};

pub struct Dce;

impl FunctionPass for Dce {
    const NAME: &'static str = "dce";

    fn run(func: &mut Function, config: &PassConfig) -> ChangeResult {
        let mut stats = Stats::new(Self::NAME);
        let mut changed = ChangeResult::Unchanged;

        loop {
            let removed_invalid = remove_invalid_markers(func, &mut stats);
            let removed_dead = remove_dead_values(func, &mut stats);
            let simplified = simplify_trivial_phis(func);
            if !removed_invalid && !removed_dead && !simplified {
                break;
            }
            changed = ChangeResult::Changed;
        }

        stats.report(config);
        changed
    }
}

/// A value's opcode can never be considered dead by use-count alone: memory
/// ops and calls carry a side effect the use-def graph doesn't model, and
/// `KeepAlive` exists specifically to keep something observably live.
fn is_side_effecting(opcode: Opcode) -> bool {
    opcode.is_memory_op() || opcode == Opcode::KeepAlive
}

/// Number of times each value is referenced as an argument or as a block's
/// control value, across the whole function. A value absent from the map (or
/// mapped to 0) has no uses left.
fn use_counts(func: &Function) -> FxHashMap<ValueId, u32> {
    let mut counts = FxHashMap::default();
    for block in func.blocks() {
        let data = func.block(block);
        for &v in &data.values {
            for &arg in &func.value(v).args {
                *counts.entry(arg).or_insert(0) += 1;
            }
        }
        if let Some(c) = data.control {
            *counts.entry(c).or_insert(0) += 1;
        }
    }
    counts
}

/// `Invalid` markers left behind by CSE+hoist (§4.4's void-typed absorption
/// case) are always dead, whatever their use count, since nothing can
/// meaningfully read a void value. Removed first so their args' use counts
/// drop before the general sweep below.
fn remove_invalid_markers(func: &mut Function, stats: &mut Stats) -> bool {
    let blocks: Vec<Block> = func.blocks().collect();
    let mut changed = false;
    for block in blocks {
        let dead: Vec<ValueId> = func
            .block(block)
            .values
            .iter()
            .copied()
            .filter(|&v| func.value(v).opcode == Opcode::Invalid)
            .collect();
        if dead.is_empty() {
            continue;
        }
        func.block_mut(block).values.retain(|v| !dead.contains(v));
        for _ in &dead {
            stats.incr("DCE REMOVED");
        }
        changed = true;
    }
    changed
}

fn remove_dead_values(func: &mut Function, stats: &mut Stats) -> bool {
    let counts = use_counts(func);
    let blocks: Vec<Block> = func.blocks().collect();
    let mut changed = false;
    for block in blocks {
        let dead: Vec<ValueId> = func
            .block(block)
            .values
            .iter()
            .copied()
            .filter(|&v| {
                let opcode = func.value(v).opcode;
                !is_side_effecting(opcode) && counts.get(&v).copied().unwrap_or(0) == 0
            })
            .collect();
        if dead.is_empty() {
            continue;
        }
        log::trace!("dce: removing {} dead value(s) from {block}", dead.len());
        func.block_mut(block).values.retain(|v| !dead.contains(v));
        for _ in &dead {
            stats.incr("DCE REMOVED");
        }
        changed = true;
    }
    changed
}

/// A φ reduces to a `Copy` when, ignoring its own id, it has at most one
/// distinct argument left — either because every incoming value is the same,
/// or because its block now has a single predecessor. Consumers were already
/// pointed at the right value by whatever trimmed the predecessor (trim
/// itself, or an earlier round of this same simplification); this just turns
/// the φ into the `Copy` that the general sweep above can then erase once
/// its new single argument makes it unused.
fn simplify_trivial_phis(func: &mut Function) -> bool {
    let blocks: Vec<Block> = func.blocks().collect();
    let mut changed = false;
    for block in blocks {
        let phis: Vec<ValueId> = func
            .block(block)
            .values
            .iter()
            .copied()
            .filter(|&v| func.value(v).opcode.is_phi())
            .collect();
        for phi in phis {
            let args = func.value(phi).args.clone();
            let mut distinct: Vec<ValueId> = Vec::new();
            for &a in &args {
                if a != phi && !distinct.contains(&a) {
                    distinct.push(a);
                }
            }
            let Some(&replacement) = distinct.first() else { continue };
            if distinct.len() > 1 {
                continue;
            }
            log::trace!("dce: simplifying trivial phi {phi} in {block} to copy of {replacement}");
            func.replace_all_uses(phi, replacement);
            let phi_ty = func.value(phi).ty.clone();
            func.reset_value(phi, Opcode::Copy, phi_ty);
            func.value_mut(phi).args.push(replacement);
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use ssa_ir::{BlockKind, Type};

    use super::*;

    #[test]
    fn unused_pure_value_is_removed() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let _dead = func.new_const(entry, Opcode::Const32, Type::I32, 7);
        let live = func.new_const(entry, Opcode::Const32, Type::I32, 9);
        func.set_control(entry, Some(live));
        let ret = func.create_block(BlockKind::Ret);
        func.add_edge(entry, ret);

        let config = PassConfig::new();
        let changed = Dce::run(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.block(entry).values.as_slice(), &[live]);
    }

    #[test]
    fn keepalive_and_memory_ops_survive_with_zero_uses() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let c = func.new_const(entry, Opcode::Const32, Type::I32, 1);
        let _keepalive = func.new_value(entry, Opcode::KeepAlive, Type::Invalid, [c]);
        let _mem = func.new_value(entry, Opcode::Load, Type::I32, []);

        let config = PassConfig::new();
        Dce::run(&mut func, &config);
        assert_eq!(func.block(entry).values.len(), 3);
    }

    #[test]
    fn invalid_marker_is_always_removed() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let c = func.new_const(entry, Opcode::Const32, Type::I32, 1);
        let v = func.new_value(entry, Opcode::Invalid, Type::Invalid, []);
        func.set_control(entry, Some(c));

        let config = PassConfig::new();
        let changed = Dce::run(&mut func, &config);
        assert!(changed.changed());
        assert!(!func.block(entry).values.contains(&v));
    }

    #[test]
    fn single_predecessor_phi_becomes_copy_then_is_removed_if_unused() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let mid = func.create_block(BlockKind::Ret);
        func.add_edge(entry, mid);
        let c = func.new_const(entry, Opcode::Const32, Type::I32, 5);
        let phi = func.new_value(mid, Opcode::Phi, Type::I32, [c]);
        func.set_control(mid, Some(phi));

        let config = PassConfig::new();
        let changed = Dce::run(&mut func, &config);
        assert!(changed.changed());
        // phi had one use (the block's control value), so it survives as a
        // Copy rather than being swept, and the control value now points
        // straight at the constant.
        assert_eq!(func.block(mid).control, Some(c));
    }
}
