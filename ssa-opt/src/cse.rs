//! Common Subexpression Elimination with value hoisting (spec §4.4):
//! structural equivalence partitioning, dominance-based replacement of
//! members that already share a dominance relationship, and hoisting of
//! the survivors to a common anticipated dominator when they don't.
//!
//! Grounded on the teacher's `hir-analysis` value-numbering pass (partition
//! refinement over a sorted candidate list, domorder-driven replacement),
//! adapted to this crate's concrete `Value`/`Block` graph and extended with
//! the anticipated-expression hoisting step the teacher's own pass doesn't
//! need (its IR has no redundant-but-non-dominating diamond case to chase).

use rustc_hash::{FxHashMap, FxHashSet};

use ssa_ir::{
    Aux, Block, ChangeResult, Dominance, Function, FunctionPass, Opcode, PassConfig, SecondaryMap,
    Stats, Type, ValueId,
};

pub struct Cse;

impl FunctionPass for Cse {
    const NAME: &'static str = "cse";

    fn run(func: &mut Function, config: &PassConfig) -> ChangeResult {
        let mut stats = Stats::new(Self::NAME);
        let dom = Dominance::compute(func);

        canonicalize_commutative(func);
        let (classes, value_class) = partition(func);
        let (mut changed, replaced) = replace_by_dominance(func, &dom, &classes, &mut stats);

        if hoist(func, &dom, &classes, &value_class, &replaced, &mut stats) {
            changed = ChangeResult::Changed;
        }

        if config.debug >= 1 && changed.changed() {
            log::debug!(
                "cse: {} rewrite(s), {} hoist(s)",
                stats.get("CSE REWRITES"),
                stats.get("CSE HOISTED")
            );
        }
        stats.report(config);
        changed
    }
}

/// A stable key for an argument's equivalence status used while refining
/// classes: either the class id it currently belongs to, or (for a
/// singleton/unclassed argument) its own id, so two distinct unclassed
/// values never compare equal to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ArgKey {
    Class(u32),
    Singleton(ValueId),
}

/// Normalizes commutative binary ops so `args[0].id <= args[1].id` before
/// any comparison happens, per spec §4.4.
fn canonicalize_commutative(func: &mut Function) {
    let values: Vec<ValueId> = func.values().collect();
    for v in values {
        if !func.value(v).opcode.is_commutative() {
            continue;
        }
        let args = func.value(v).args.clone();
        if args.len() == 2 && args[0] > args[1] {
            func.set_arg(v, 0, args[1]);
            func.set_arg(v, 1, args[0]);
        }
    }
}

/// Assigns a small dense integer to each distinct `Aux` payload seen in the
/// function, used as a sort key component (spec §4.4's "aux id").
fn assign_aux_ids(func: &Function) -> FxHashMap<ValueId, u32> {
    let mut seen: Vec<Aux> = Vec::new();
    let mut ids = FxHashMap::default();
    for v in func.values() {
        let aux = func.value(v).aux.clone();
        let id = match seen.iter().position(|a| *a == aux) {
            Some(i) => i as u32,
            None => {
                seen.push(aux);
                (seen.len() - 1) as u32
            }
        };
        ids.insert(v, id);
    }
    ids
}

type CoarseKey = (Opcode, i64, usize, Type, u32, Option<Block>);

/// The coarse-partition key: opcode, AuxInt, arg count, type, aux id, and
/// (for phis only) owning block, per spec §4.4's equivalence definition.
fn coarse_key(func: &Function, aux_ids: &FxHashMap<ValueId, u32>, v: ValueId) -> CoarseKey {
    let val = func.value(v);
    let phi_block = val.opcode.is_phi().then_some(val.block);
    (val.opcode, val.aux_int, val.args.len(), val.ty.clone(), *aux_ids.get(&v).unwrap(), phi_block)
}

/// Builds the initial equivalence partition and refines it to a fixed
/// point. Returns the class table (indexed by class id) and a per-value
/// lookup of its class, or `None` for memory/Param values and singletons.
fn partition(func: &Function) -> (Vec<Vec<ValueId>>, SecondaryMap<ValueId, Option<u32>>) {
    let aux_ids = assign_aux_ids(func);
    // Memory values never participate (spec §3); Param values have no
    // equivalence semantics here (distinct parameters would otherwise look
    // coarse-equal, since this IR carries no per-parameter AuxInt).
    let mut candidates: Vec<ValueId> = func
        .values()
        .filter(|&v| {
            let val = func.value(v);
            !val.ty.is_memory() && !val.opcode.is_memory_op() && val.opcode != Opcode::Param
        })
        .collect();
    candidates.sort_by(|&a, &b| {
        coarse_key(func, &aux_ids, a).cmp(&coarse_key(func, &aux_ids, b)).then(a.cmp(&b))
    });

    let mut classes: Vec<Vec<ValueId>> = Vec::new();
    let mut value_class: SecondaryMap<ValueId, Option<u32>> = SecondaryMap::new();

    let mut i = 0;
    while i < candidates.len() {
        let mut j = i + 1;
        while j < candidates.len()
            && coarse_key(func, &aux_ids, candidates[i]) == coarse_key(func, &aux_ids, candidates[j])
        {
            j += 1;
        }
        if j - i > 1 {
            let id = classes.len() as u32;
            let group = candidates[i..j].to_vec();
            for &v in &group {
                value_class.set(v, Some(id));
            }
            classes.push(group);
        } else {
            value_class.set(candidates[i], None);
        }
        i = j;
    }

    refine(func, &mut classes, &mut value_class);
    (classes, value_class)
}

fn arg_key(value_class: &SecondaryMap<ValueId, Option<u32>>, arg: ValueId) -> ArgKey {
    match *value_class.get(arg) {
        Some(c) => ArgKey::Class(c),
        None => ArgKey::Singleton(arg),
    }
}

fn arg_keys(func: &Function, value_class: &SecondaryMap<ValueId, Option<u32>>, v: ValueId) -> Vec<ArgKey> {
    func.value(v).args.iter().map(|&a| arg_key(value_class, a)).collect()
}

/// Iterates every class by index (spec §4.4's "index-driven loop, not range
/// capture": `classes` grows as splits append new sub-classes, so a
/// captured slice would miss them) until a full sweep makes no further
/// split.
fn refine(func: &Function, classes: &mut Vec<Vec<ValueId>>, value_class: &mut SecondaryMap<ValueId, Option<u32>>) {
    loop {
        let mut changed = false;
        let mut i = 0;
        while i < classes.len() {
            if classes[i].len() > 1 && try_split(func, value_class, classes, i as u32) {
                changed = true;
            }
            i += 1;
        }
        if !changed {
            break;
        }
    }
}

/// Splits class `cid` wherever two members' positional argument classes
/// differ, demoting singleton remainders to `None`. Returns whether a split
/// happened.
fn try_split(
    func: &Function,
    value_class: &mut SecondaryMap<ValueId, Option<u32>>,
    classes: &mut Vec<Vec<ValueId>>,
    cid: u32,
) -> bool {
    let mut members = classes[cid as usize].clone();
    members.sort_by(|&a, &b| arg_keys(func, value_class, a).cmp(&arg_keys(func, value_class, b)));

    let mut groups: Vec<Vec<ValueId>> = Vec::new();
    for v in members {
        match groups.last() {
            Some(last) if arg_keys(func, value_class, last[0]) == arg_keys(func, value_class, v) => {
                groups.last_mut().unwrap().push(v);
            }
            _ => groups.push(vec![v]),
        }
    }
    if groups.len() <= 1 {
        return false;
    }

    classes[cid as usize] = groups[0].clone();
    if groups[0].len() <= 1 {
        for &v in &groups[0] {
            value_class.set(v, None);
        }
    }
    for g in &groups[1..] {
        if g.len() > 1 {
            let new_id = classes.len() as u32;
            for &v in g {
                value_class.set(v, Some(new_id));
            }
            classes.push(g.clone());
        } else {
            for &v in g {
                value_class.set(v, None);
            }
        }
    }
    true
}

/// Replaces every argument reference to `old` with `new`, and the control
/// value of any block pointing at `old`, except when that block's control
/// is itself a `NilCheck` (spec §4.4: left alone, "handled by a separate
/// nil-check pass" outside this crate's scope).
fn apply_rewrite(func: &mut Function, old: ValueId, new: ValueId) {
    if old == new {
        return;
    }
    for id in func.values().collect::<Vec<_>>() {
        for arg in func.value_mut(id).args.iter_mut() {
            if *arg == old {
                *arg = new;
            }
        }
    }
    for block in func.blocks().collect::<Vec<_>>() {
        if let Some(ctrl) = func.block(block).control {
            if ctrl == old && func.value(ctrl).opcode != Opcode::NilCheck {
                func.set_control(block, Some(new));
            }
        }
    }
}

/// Walks each class in domorder, merging later members into earlier ones
/// whenever the earlier one dominates (spec §4.4's dominance-based
/// replacement). Returns the set of values that got rewritten away.
fn replace_by_dominance(
    func: &mut Function,
    dom: &Dominance,
    classes: &[Vec<ValueId>],
    stats: &mut Stats,
) -> (ChangeResult, FxHashSet<ValueId>) {
    let mut changed = ChangeResult::Unchanged;
    let mut replaced: FxHashSet<ValueId> = FxHashSet::default();

    for members in classes {
        if members.len() < 2 {
            continue;
        }
        let mut order = members.clone();
        order.sort_by_key(|&v| dom.preorder(func.value(v).block));

        for i in 0..order.len() {
            let v = order[i];
            if replaced.contains(&v) {
                continue;
            }
            for &w in &order[i + 1..] {
                if replaced.contains(&w) {
                    continue;
                }
                if dom.dominates(func.value(v).block, func.value(w).block) {
                    log::trace!("cse: rewriting {w} to {v}");
                    apply_rewrite(func, w, v);
                    replaced.insert(w);
                    stats.incr("CSE REWRITES");
                    changed = ChangeResult::Changed;
                } else {
                    // later members can't be dominated by v either once the
                    // domorder sort breaks here.
                    break;
                }
            }
        }
    }
    (changed, replaced)
}

/// Per-block anticipated-expression sets, keyed by class id. Only classes
/// with more than one member are tracked (spec §4.4: "classes of size 1 are
/// excluded, nothing to save").
fn compute_anticipated(
    func: &Function,
    value_class: &SecondaryMap<ValueId, Option<u32>>,
    class_sizes: &[usize],
) -> FxHashMap<Block, FxHashSet<u32>> {
    let order = func.reverse_postorder();
    let mut ant_in: FxHashMap<Block, FxHashSet<u32>> =
        order.iter().map(|&b| (b, FxHashSet::default())).collect();
    let mut ant_out: FxHashMap<Block, FxHashSet<u32>> =
        order.iter().map(|&b| (b, FxHashSet::default())).collect();

    loop {
        let mut changed = false;
        for &b in &order {
            let own: FxHashSet<u32> = func
                .block(b)
                .values
                .iter()
                .filter_map(|&v| *value_class.get(v))
                .filter(|&c| class_sizes[c as usize] > 1)
                .collect();

            let succs = func.successors(b);
            let out: FxHashSet<u32> = if succs.is_empty() {
                FxHashSet::default()
            } else {
                let mut iter = succs.iter().map(|e| ant_in[&e.block].clone());
                let first = iter.next().unwrap();
                iter.fold(first, |acc, s| acc.intersection(&s).copied().collect())
            };
            let new_in: FxHashSet<u32> = out.union(&own).copied().collect();

            if ant_out[&b] != out {
                ant_out.insert(b, out);
                changed = true;
            }
            if ant_in[&b] != new_in {
                ant_in.insert(b, new_in);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    ant_out
}

/// Shared read-only context threaded through the recursive hoisting walk.
struct HoistCtx<'a> {
    dom: &'a Dominance,
    classes: &'a [Vec<ValueId>],
    value_class: &'a SecondaryMap<ValueId, Option<u32>>,
    replaced: &'a FxHashSet<ValueId>,
    ant_out: &'a FxHashMap<Block, FxHashSet<u32>>,
}

/// Hoists surviving multi-member classes to a common anticipated dominator
/// (spec §4.4). Returns whether any hoist occurred.
fn hoist(
    func: &mut Function,
    dom: &Dominance,
    classes: &[Vec<ValueId>],
    value_class: &SecondaryMap<ValueId, Option<u32>>,
    replaced: &FxHashSet<ValueId>,
    stats: &mut Stats,
) -> bool {
    let class_sizes: Vec<usize> = classes.iter().map(Vec::len).collect();
    let ant_out = compute_anticipated(func, value_class, &class_sizes);
    let ctx = HoistCtx { dom, classes, value_class, replaced, ant_out: &ant_out };

    let mut done: FxHashSet<u32> = FxHashSet::default();
    let mut did_hoist = false;
    for cid in 0..classes.len() as u32 {
        hoist_class(func, &ctx, cid, &mut done, stats, &mut did_hoist);
    }
    did_hoist
}

/// Hoists dependencies (argument classes) before class `cid` itself, per
/// spec §4.4's "hoist dependencies first".
fn hoist_class(
    func: &mut Function,
    ctx: &HoistCtx,
    cid: u32,
    done: &mut FxHashSet<u32>,
    stats: &mut Stats,
    did_hoist: &mut bool,
) {
    if !done.insert(cid) {
        return;
    }
    let members: Vec<ValueId> =
        ctx.classes[cid as usize].iter().copied().filter(|v| !ctx.replaced.contains(v)).collect();
    if members.len() < 2 {
        return;
    }

    let dep_classes: Vec<u32> = members
        .iter()
        .flat_map(|&v| {
            func.value(v).args.iter().filter_map(|&a| *ctx.value_class.get(a)).collect::<Vec<_>>()
        })
        .collect();
    for dep in dep_classes {
        hoist_class(func, ctx, dep, done, stats, did_hoist);
    }

    let candidates = select_destinations(func, ctx, cid, &members);
    if candidates.is_empty() {
        return;
    }

    let mut groups: FxHashMap<Block, Vec<ValueId>> = FxHashMap::default();
    for &v in &members {
        let block = func.value(v).block;
        if let Some(&dest) = candidates.iter().find(|&&c| ctx.dom.dominates(c, block)) {
            groups.entry(dest).or_default().push(v);
        }
    }

    for (dest, absorbed) in groups {
        if absorbed.len() < 2 {
            continue; // no code-size win, spec §4.4
        }
        let Some(new_value) = emit_hoisted(func, ctx, dest, absorbed[0]) else { continue };
        log::trace!("cse: hoisting class {cid} to {dest} as {new_value}, absorbing {} member(s)", absorbed.len());
        for &v in &absorbed {
            absorb_member(func, v, new_value);
            stats.incr("CSE HOISTED");
        }
        *did_hoist = true;
    }
}

/// Finds the candidate destinations for class `cid`: the single
/// predecessor of any member's block, provided the class is anticipated on
/// that predecessor's exit (spec §4.4's hoist-destination selection).
fn select_destinations(func: &Function, ctx: &HoistCtx, cid: u32, members: &[ValueId]) -> Vec<Block> {
    let mut candidates: Vec<Block> = Vec::new();
    for &v in members {
        let block = func.value(v).block;
        let preds = func.predecessors(block);
        if preds.len() != 1 {
            continue;
        }
        let p = preds[0].block;
        if ctx.ant_out.get(&p).is_some_and(|s| s.contains(&cid)) {
            add_hoist_candidate(ctx.dom, &mut candidates, p);
        }
    }
    candidates
}

/// Keeps only maximal (least-dominated) candidates: a new candidate
/// dominated by an existing one is redundant; a new candidate that
/// dominates existing ones supersedes them.
fn add_hoist_candidate(dom: &Dominance, candidates: &mut Vec<Block>, p: Block) {
    if candidates.iter().any(|&c| dom.dominates(c, p)) {
        return;
    }
    candidates.retain(|&c| !dom.dominates(p, c));
    candidates.push(p);
}

/// Creates the hoisted representative in `dest`, copying `template`'s
/// shape and resolving each argument to something available at `dest`'s
/// exit. Returns `None` (skip this hoist) if any argument has no available
/// equivalent, per spec §4.4's operand-availability safety condition.
fn emit_hoisted(func: &mut Function, ctx: &HoistCtx, dest: Block, template: ValueId) -> Option<ValueId> {
    let (opcode, ty, aux_int, aux, orig_args) = {
        let val = func.value(template);
        (val.opcode, val.ty.clone(), val.aux_int, val.aux.clone(), val.args.clone())
    };
    let mut new_args = Vec::with_capacity(orig_args.len());
    for &a in orig_args.iter() {
        new_args.push(available_arg(func, ctx, a, dest)?);
    }
    let new_value = func.new_value(dest, opcode, ty, new_args);
    func.set_aux_int(new_value, aux_int);
    func.set_aux(new_value, aux);
    Some(new_value)
}

/// An argument is available at `dest`'s exit if its own defining block
/// dominates-or-equals `dest`; otherwise search its equivalence class for a
/// member that is (spec §4.4's operand-availability rule).
fn available_arg(func: &Function, ctx: &HoistCtx, arg: ValueId, dest: Block) -> Option<ValueId> {
    if ctx.dom.dominates(func.value(arg).block, dest) {
        return Some(arg);
    }
    if let Some(c) = *ctx.value_class.get(arg) {
        for &m in &ctx.classes[c as usize] {
            if ctx.dom.dominates(func.value(m).block, dest) {
                return Some(m);
            }
        }
    }
    None
}

/// Absorbs `v` into the hoisted representative: a void-typed member becomes
/// an `Invalid` no-op, anything else becomes a `Copy` of the new value
/// (spec §4.4).
fn absorb_member(func: &mut Function, v: ValueId, new_value: ValueId) {
    if v == new_value {
        return;
    }
    if func.value(v).ty.is_void() {
        func.reset_value(v, Opcode::Invalid, Type::Invalid);
    } else {
        let ty = func.value(v).ty.clone();
        func.reset_value(v, Opcode::Copy, ty);
        func.add_arg(v, new_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssa_ir::BlockKind;

    #[test]
    fn dominating_duplicate_is_rewritten_to_the_earlier_one() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let a = func.new_value(entry, Opcode::Param, Type::I32, []);
        let b = func.new_value(entry, Opcode::Param, Type::I32, []);
        let add1 = func.new_value(entry, Opcode::Add, Type::I32, [a, b]);

        let ret = func.create_block(BlockKind::Ret);
        func.add_edge(entry, ret);
        // Commutative argument order differs but canonicalizes the same.
        let add2 = func.new_value(ret, Opcode::Add, Type::I32, [b, a]);
        func.set_control(ret, Some(add2));

        let config = PassConfig::new();
        let changed = Cse::run(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.block(ret).control, Some(add1));
    }

    /// Spec §8 scenario 4: a diamond CFG where both branches compute `a + b`
    /// with identical operands. Direct CSE can't merge them (neither branch
    /// dominates the other), so hoisting must move the addition to the
    /// split block, the single predecessor of both branches where the
    /// class is anticipated on exit.
    #[test]
    fn diamond_duplicate_computation_is_hoisted_to_the_split_block() {
        crate::init_test_logger();
        let mut func = Function::new("f");
        let entry = func.entry();
        let a = func.new_value(entry, Opcode::Param, Type::I32, []);
        let b = func.new_value(entry, Opcode::Param, Type::I32, []);

        let split = func.create_block(BlockKind::If);
        func.add_edge(entry, split);
        let cond = func.new_value(split, Opcode::Param, Type::Bool, []);
        func.set_control(split, Some(cond));

        let then_b = func.create_block(BlockKind::Plain);
        let else_b = func.create_block(BlockKind::Plain);
        func.add_edge(split, then_b);
        func.add_edge(split, else_b);

        let then_add = func.new_value(then_b, Opcode::Add, Type::I32, [a, b]);
        let else_add = func.new_value(else_b, Opcode::Add, Type::I32, [a, b]);

        let join = func.create_block(BlockKind::Ret);
        func.add_edge(then_b, join);
        func.add_edge(else_b, join);
        let phi = func.new_value(join, Opcode::Phi, Type::I32, [then_add, else_add]);
        func.set_control(join, Some(phi));

        let config = PassConfig::new();
        let changed = Cse::run(&mut func, &config);
        assert!(changed.changed());

        let hoisted = func
            .block(split)
            .values
            .iter()
            .copied()
            .find(|&v| func.value(v).opcode == Opcode::Add)
            .expect("hoisted add must land in the split block");
        assert_eq!(func.value(hoisted).args.as_slice(), &[a, b]);
        assert_eq!(func.value(then_add).opcode, Opcode::Copy);
        assert_eq!(func.value(then_add).args.as_slice(), &[hoisted]);
        assert_eq!(func.value(else_add).opcode, Opcode::Copy);
        assert_eq!(func.value(else_add).args.as_slice(), &[hoisted]);
    }

    #[test]
    fn memory_values_are_never_merged() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let load1 = func.new_value(entry, Opcode::Load, Type::I32, []);
        let load2 = func.new_value(entry, Opcode::Load, Type::I32, []);

        let config = PassConfig::new();
        Cse::run(&mut func, &config);
        assert_ne!(load1, load2);
        assert_eq!(func.value(load1).opcode, Opcode::Load);
        assert_eq!(func.value(load2).opcode, Opcode::Load);
    }

    #[test]
    fn distinct_parameters_are_never_merged() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let p0 = func.new_value(entry, Opcode::Param, Type::I32, []);
        let p1 = func.new_value(entry, Opcode::Param, Type::I32, []);
        let ret = func.create_block(BlockKind::Ret);
        func.add_edge(entry, ret);
        let sum = func.new_value(ret, Opcode::Add, Type::I32, [p0, p1]);
        func.set_control(ret, Some(sum));

        let config = PassConfig::new();
        Cse::run(&mut func, &config);
        assert_eq!(func.value(sum).args.as_slice(), &[p0, p1]);
    }
}
