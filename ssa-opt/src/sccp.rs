//! Sparse Conditional Constant Propagation (spec §4.3): the Wegman-Zadeck
//! algorithm over a three-element lattice `{Top, Const(bits), Bottom}`, with
//! an executable-edge set driving which control-flow paths are even
//! considered reachable.
//!
//! Grounded on the teacher's `hir-analysis` sparse dataflow solver shape
//! (reverse use/control indices, two worklists, monotone lattice), adapted
//! from its generic `Operation`/block-argument model to this crate's
//! concrete `Value`/`Block` graph.

use bitvec::{bitvec, vec::BitVec};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use ssa_ir::{
    Block, BlockKind, ChangeResult, EntityRef, Function, FunctionPass, Opcode, PassConfig,
    SecondaryMap, SparseSet, Stats, Type, ValueId,
};

pub struct Sccp;

impl FunctionPass for Sccp {
    const NAME: &'static str = "sccp";

    fn run(func: &mut Function, config: &PassConfig) -> ChangeResult {
        let mut stats = Stats::new(Self::NAME);
        let mut solver = Solver::new(func);
        solver.run(func);
        let changed = finalize(func, &solver.cells, &mut stats);

        if config.debug >= 1 && changed.changed() {
            log::debug!("sccp: folded {} value(s)", stats.get("SCCP FOLDED"));
        }
        stats.report(config);
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatticeKind {
    Top,
    Const,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LatticeCell {
    kind: LatticeKind,
    bits: i64,
}

impl LatticeCell {
    fn top() -> Self {
        Self { kind: LatticeKind::Top, bits: 0 }
    }

    fn bottom() -> Self {
        Self { kind: LatticeKind::Bottom, bits: 0 }
    }

    fn constant(bits: i64) -> Self {
        Self { kind: LatticeKind::Const, bits }
    }
}

impl Default for LatticeCell {
    fn default() -> Self {
        Self::top()
    }
}

/// TOP ⊏ CONST(x) ⊏ BOTTOM; two differing constants meet to BOTTOM.
fn meet(a: LatticeCell, b: LatticeCell) -> LatticeCell {
    use LatticeKind::*;
    match (a.kind, b.kind) {
        (Top, _) => b,
        (_, Top) => a,
        (Const, Const) if a.bits == b.bits => a,
        _ => LatticeCell::bottom(),
    }
}

/// The solver's mutable state: lattice cells, the executable-edge set, and
/// the two worklists (spec §4.3's FlowList/SSAList).
///
/// `block_executable` is a `BitVec` rather than a `HashSet<Block>`: the
/// block count is fixed once the solver is built (no pass here adds
/// blocks), so a dense bitset sized up front is the natural fit, matching
/// the pack's own dataflow-visited-set idiom.
struct Solver {
    cells: SecondaryMap<ValueId, LatticeCell>,
    executable_edges: FxHashSet<(Block, Block)>,
    block_executable: BitVec,
    uses: FxHashMap<ValueId, Vec<ValueId>>,
    ctl: FxHashMap<ValueId, Vec<Block>>,
    flow_list: Vec<(Block, Block)>,
    ssa_list: SparseSet<ValueId>,
}

impl Solver {
    fn new(func: &Function) -> Self {
        let (uses, ctl) = build_reverse_indices(func);
        let mut solver = Self {
            cells: SecondaryMap::new(),
            executable_edges: FxHashSet::default(),
            block_executable: bitvec![0; func.num_blocks()],
            uses,
            ctl,
            flow_list: Vec::new(),
            ssa_list: SparseSet::new(),
        };
        let entry = func.entry();
        solver.block_executable.set(entry.index(), true);
        solver.activate_block(func, entry);
        solver
    }

    /// Marks `block` executable, returning whether it was the first time.
    fn mark_block_executable(&mut self, block: Block) -> bool {
        let idx = block.index();
        if self.block_executable[idx] {
            false
        } else {
            self.block_executable.set(idx, true);
            true
        }
    }

    /// Drains FlowList preferentially over SSAList, as specified.
    fn run(&mut self, func: &Function) {
        loop {
            if let Some((from, to)) = self.flow_list.pop() {
                if self.executable_edges.contains(&(from, to)) {
                    continue;
                }
                self.executable_edges.insert((from, to));
                let first_time = self.mark_block_executable(to);

                let phis: Vec<ValueId> = func
                    .block(to)
                    .values
                    .iter()
                    .copied()
                    .filter(|&v| func.value(v).opcode.is_phi())
                    .collect();
                for phi in phis {
                    self.visit_phi(func, phi);
                }
                if first_time {
                    self.activate_block(func, to);
                }
            } else if let Some(v) = self.ssa_list.pop() {
                if func.value(v).opcode.is_phi() {
                    self.visit_phi(func, v);
                } else if self.block_executable[func.value(v).block.index()] {
                    self.visit_expr(func, v);
                }
            } else {
                break;
            }
        }
    }

    /// Evaluates every non-phi value in `block` once (it is visited only the
    /// first time the block becomes executable) and, for `Plain`/`First`
    /// blocks, unconditionally queues the fallthrough edge.
    fn activate_block(&mut self, func: &Function, block: Block) {
        let non_phis: Vec<ValueId> = func
            .block(block)
            .values
            .iter()
            .copied()
            .filter(|&v| !func.value(v).opcode.is_phi())
            .collect();
        for v in non_phis {
            self.visit_expr(func, v);
        }
        let data = func.block(block);
        if matches!(data.kind, BlockKind::Plain | BlockKind::First) {
            if let Some(succ) = data.succs.first() {
                self.flow_list.push((block, succ.block));
            }
        }
    }

    fn visit_phi(&mut self, func: &Function, v: ValueId) {
        let value = func.value(v);
        let block = value.block;
        let preds = func.predecessors(block);
        let mut acc = LatticeCell::top();
        for (i, &arg) in value.args.iter().enumerate() {
            let Some(pred) = preds.get(i) else { continue };
            if self.executable_edges.contains(&(pred.block, block)) {
                acc = meet(acc, *self.cells.get(arg));
            }
        }
        self.set_cell(func, v, acc);
    }

    fn visit_expr(&mut self, func: &Function, v: ValueId) {
        let value = func.value(v);
        let cell =
            if value.opcode.is_const() { LatticeCell::constant(value.aux_int) } else { self.eval_expr(func, v) };
        self.set_cell(func, v, cell);
    }

    fn eval_expr(&self, func: &Function, v: ValueId) -> LatticeCell {
        let value = func.value(v);
        let opcode = value.opcode;
        let arg_cells: SmallVec<[LatticeCell; 2]> =
            value.args.iter().map(|&a| *self.cells.get(a)).collect();
        match opcode {
            Opcode::AndB => general_bool(&arg_cells, false),
            Opcode::OrB => general_bool(&arg_cells, true),
            Opcode::DivS | Opcode::DivU | Opcode::ModS | Opcode::ModU => {
                general_div_mod(opcode, &arg_cells)
            }
            _ if is_opaque(opcode) => LatticeCell::bottom(),
            _ => {
                if arg_cells.iter().any(|c| c.kind == LatticeKind::Bottom) {
                    LatticeCell::bottom()
                } else if arg_cells.iter().any(|c| c.kind == LatticeKind::Top) {
                    LatticeCell::top()
                } else {
                    let bits: SmallVec<[i64; 2]> = arg_cells.iter().map(|c| c.bits).collect();
                    let arg_tys: SmallVec<[&Type; 2]> =
                        value.args.iter().map(|&a| &func.value(a).ty).collect();
                    simple_fold(opcode, &value.ty, &arg_tys, &bits)
                }
            }
        }
    }

    fn set_cell(&mut self, func: &Function, v: ValueId, new: LatticeCell) {
        let old = *self.cells.get(v);
        if old == new {
            return;
        }
        self.cells.set(v, new);
        self.propagate(func, v, new);
    }

    fn propagate(&mut self, func: &Function, v: ValueId, new: LatticeCell) {
        if let Some(users) = self.uses.get(&v).cloned() {
            for u in users {
                self.ssa_list.insert(u);
            }
        }
        if new.kind == LatticeKind::Top {
            return;
        }
        let Some(blocks) = self.ctl.get(&v).cloned() else { return };
        for block in blocks {
            let succs = func.successors(block);
            match new.kind {
                LatticeKind::Bottom => {
                    for &s in succs {
                        self.flow_list.push((block, s.block));
                    }
                }
                LatticeKind::Const => {
                    let idx = if new.bits != 0 { 0 } else { 1 };
                    if let Some(s) = succs.get(idx) {
                        self.flow_list.push((block, s.block));
                    }
                }
                LatticeKind::Top => unreachable!("guarded above"),
            }
        }
    }
}

fn build_reverse_indices(
    func: &Function,
) -> (FxHashMap<ValueId, Vec<ValueId>>, FxHashMap<ValueId, Vec<Block>>) {
    let mut uses: FxHashMap<ValueId, Vec<ValueId>> = FxHashMap::default();
    let mut ctl: FxHashMap<ValueId, Vec<Block>> = FxHashMap::default();
    for block in func.blocks() {
        let data = func.block(block);
        for &v in &data.values {
            for &arg in &func.value(v).args {
                uses.entry(arg).or_default().push(v);
            }
        }
        if let Some(c) = data.control {
            ctl.entry(c).or_default().push(block);
        }
    }
    (uses, ctl)
}

/// Opcodes the fold table can never resolve regardless of operand
/// constantness: memory ops and calls carry effects outside the lattice,
/// `Param` is externally supplied, `KeepAlive`/`Invalid` are markers, and
/// tuple producers/projections aren't representable as a single `i64`.
fn is_opaque(opcode: Opcode) -> bool {
    opcode.is_memory_op()
        || matches!(
            opcode,
            Opcode::Param | Opcode::KeepAlive | Opcode::Invalid | Opcode::MakePair | Opcode::Select0 | Opcode::Select1
        )
}

/// Short-circuit boolean AND/OR: a dominant operand (0 for AND, 1 for OR)
/// forces the result even if the other operand is unresolved or non-const.
fn general_bool(args: &[LatticeCell], is_or: bool) -> LatticeCell {
    let dominant: i64 = if is_or { 1 } else { 0 };
    if args.iter().any(|c| c.kind == LatticeKind::Const && c.bits == dominant) {
        return LatticeCell::constant(dominant);
    }
    if args.iter().any(|c| c.kind == LatticeKind::Bottom) {
        return LatticeCell::bottom();
    }
    if args[0].kind == LatticeKind::Const && args[1].kind == LatticeKind::Const {
        let either = if is_or { args[0].bits | args[1].bits } else { args[0].bits & args[1].bits };
        return LatticeCell::constant((either != 0) as i64);
    }
    LatticeCell::top()
}

/// Division/modulo fold to BOTTOM (never TOP) when the divisor is a known
/// constant zero, preserving the runtime trap rather than picking a value.
fn general_div_mod(opcode: Opcode, args: &[LatticeCell]) -> LatticeCell {
    let divisor = args[1];
    if divisor.kind == LatticeKind::Const && divisor.bits == 0 {
        return LatticeCell::bottom();
    }
    if args[0].kind == LatticeKind::Bottom || divisor.kind == LatticeKind::Bottom {
        return LatticeCell::bottom();
    }
    if args[0].kind == LatticeKind::Top || divisor.kind == LatticeKind::Top {
        return LatticeCell::top();
    }
    let (n, d) = (args[0].bits, divisor.bits);
    let result = match opcode {
        Opcode::DivS => n.wrapping_div(d),
        Opcode::DivU => ((n as u64) / (d as u64)) as i64,
        Opcode::ModS => n.wrapping_rem(d),
        Opcode::ModU => ((n as u64) % (d as u64)) as i64,
        _ => unreachable!("only called for integer div/mod opcodes"),
    };
    LatticeCell::constant(result)
}

fn truncate_int(value: i64, ty: &Type) -> i64 {
    let bits = ty.size();
    if bits == 0 || bits >= 64 {
        return value;
    }
    let mask = (1i64 << bits) - 1;
    let masked = value & mask;
    if ty.is_signed() && (masked & (1i64 << (bits - 1))) != 0 {
        masked | !mask
    } else {
        masked
    }
}

fn sign_extend(value: i64, from: &Type) -> i64 {
    let bits = from.size();
    if bits == 0 || bits >= 64 {
        return value;
    }
    let mask = (1i64 << bits) - 1;
    let masked = value & mask;
    if masked & (1i64 << (bits - 1)) != 0 { masked | !mask } else { masked }
}

fn zero_extend(value: i64, from: &Type) -> i64 {
    let bits = from.size();
    if bits == 0 || bits >= 64 {
        return value;
    }
    value & ((1i64 << bits) - 1)
}

fn fold_f(ty: &Type, a: i64, b: i64, op: impl Fn(f64, f64) -> f64) -> i64 {
    if ty.size() == 32 {
        let (af, bf) = (f32::from_bits(a as u32) as f64, f32::from_bits(b as u32) as f64);
        (op(af, bf) as f32).to_bits() as i64
    } else {
        let (af, bf) = (f64::from_bits(a as u64), f64::from_bits(b as u64));
        op(af, bf).to_bits() as i64
    }
}

fn fold_fu(ty: &Type, a: i64, op: impl Fn(f64) -> f64) -> i64 {
    if ty.size() == 32 {
        (op(f32::from_bits(a as u32) as f64) as f32).to_bits() as i64
    } else {
        op(f64::from_bits(a as u64)).to_bits() as i64
    }
}

fn fold_fcmp(ty: &Type, a: i64, b: i64, op: impl Fn(f64, f64) -> bool) -> i64 {
    let (af, bf) = if ty.size() == 32 {
        (f32::from_bits(a as u32) as f64, f32::from_bits(b as u32) as f64)
    } else {
        (f64::from_bits(a as u64), f64::from_bits(b as u64))
    };
    op(af, bf) as i64
}

/// `OpCvt32Fto64F` and `OpCvt64Fto32F` get their own correctly-named
/// functions (no shared typo-prone helper).
fn fold_cvt32_fto64_f(bits: i64) -> i64 {
    (f32::from_bits(bits as u32) as f64).to_bits() as i64
}

fn fold_cvt64_fto32_f(bits: i64) -> i64 {
    (f64::from_bits(bits as u64) as f32).to_bits() as i64
}

fn fold_cvt_int_to_float(bits: i64, from: &Type, to: &Type) -> i64 {
    let signed = from.is_signed();
    if to.size() == 32 {
        let f = if signed { bits as f32 } else { (bits as u64) as f32 };
        f.to_bits() as i64
    } else {
        let f = if signed { bits as f64 } else { (bits as u64) as f64 };
        f.to_bits() as i64
    }
}

fn fold_cvt_float_to_int(bits: i64, from: &Type, to: &Type) -> i64 {
    let value = if from.size() == 32 {
        f32::from_bits(bits as u32) as f64
    } else {
        f64::from_bits(bits as u64)
    };
    let truncated = value.trunc();
    let raw = if to.is_signed() { truncated as i64 } else { (truncated as u64) as i64 };
    truncate_int(raw, to)
}

/// All-constant-required folds: integer/float arithmetic, comparisons, and
/// conversions. Called only once every argument's cell is already CONST.
fn simple_fold(opcode: Opcode, result_ty: &Type, arg_tys: &[&Type], bits: &[i64]) -> LatticeCell {
    let result = match opcode {
        Opcode::Copy => bits[0],
        Opcode::Add => truncate_int(bits[0].wrapping_add(bits[1]), result_ty),
        Opcode::Sub => truncate_int(bits[0].wrapping_sub(bits[1]), result_ty),
        Opcode::Mul => truncate_int(bits[0].wrapping_mul(bits[1]), result_ty),
        Opcode::Neg => truncate_int(bits[0].wrapping_neg(), result_ty),
        Opcode::And => bits[0] & bits[1],
        Opcode::Or => bits[0] | bits[1],
        Opcode::Xor => bits[0] ^ bits[1],
        Opcode::Not => truncate_int(!bits[0], result_ty),
        Opcode::Shl => truncate_int(bits[0].wrapping_shl(bits[1] as u32), result_ty),
        Opcode::ShrS => truncate_int(bits[0].wrapping_shr(bits[1] as u32), result_ty),
        Opcode::ShrU => {
            truncate_int(((bits[0] as u64).wrapping_shr(bits[1] as u32)) as i64, result_ty)
        }
        Opcode::NotB => (bits[0] == 0) as i64,
        Opcode::CmpEq => (bits[0] == bits[1]) as i64,
        Opcode::CmpNeq => (bits[0] != bits[1]) as i64,
        Opcode::CmpLtS => (bits[0] < bits[1]) as i64,
        Opcode::CmpLeS => (bits[0] <= bits[1]) as i64,
        Opcode::CmpGtS => (bits[0] > bits[1]) as i64,
        Opcode::CmpGeS => (bits[0] >= bits[1]) as i64,
        Opcode::CmpLtU => ((bits[0] as u64) < (bits[1] as u64)) as i64,
        Opcode::CmpLeU => ((bits[0] as u64) <= (bits[1] as u64)) as i64,
        Opcode::CmpGtU => ((bits[0] as u64) > (bits[1] as u64)) as i64,
        Opcode::CmpGeU => ((bits[0] as u64) >= (bits[1] as u64)) as i64,
        Opcode::Trunc => truncate_int(bits[0], result_ty),
        Opcode::SignExt => truncate_int(sign_extend(bits[0], arg_tys[0]), result_ty),
        Opcode::ZeroExt => truncate_int(zero_extend(bits[0], arg_tys[0]), result_ty),
        Opcode::Cvt32Fto64F => fold_cvt32_fto64_f(bits[0]),
        Opcode::Cvt64Fto32F => fold_cvt64_fto32_f(bits[0]),
        Opcode::CvtIntToFloat => fold_cvt_int_to_float(bits[0], arg_tys[0], result_ty),
        Opcode::CvtFloatToInt => fold_cvt_float_to_int(bits[0], arg_tys[0], result_ty),
        Opcode::FAdd => fold_f(result_ty, bits[0], bits[1], |a, b| a + b),
        Opcode::FSub => fold_f(result_ty, bits[0], bits[1], |a, b| a - b),
        Opcode::FMul => fold_f(result_ty, bits[0], bits[1], |a, b| a * b),
        Opcode::FDiv => fold_f(result_ty, bits[0], bits[1], |a, b| a / b),
        Opcode::FNeg => fold_fu(result_ty, bits[0], |a| -a),
        Opcode::FCmpEq => fold_fcmp(arg_tys[0], bits[0], bits[1], |a, b| a == b),
        Opcode::FCmpNeq => fold_fcmp(arg_tys[0], bits[0], bits[1], |a, b| a != b),
        Opcode::FCmpLt => fold_fcmp(arg_tys[0], bits[0], bits[1], |a, b| a < b),
        Opcode::FCmpLe => fold_fcmp(arg_tys[0], bits[0], bits[1], |a, b| a <= b),
        Opcode::FCmpGt => fold_fcmp(arg_tys[0], bits[0], bits[1], |a, b| a > b),
        Opcode::FCmpGe => fold_fcmp(arg_tys[0], bits[0], bits[1], |a, b| a >= b),
        _ => return LatticeCell::bottom(),
    };
    LatticeCell::constant(result)
}

fn const_opcode_for(ty: &Type) -> Option<Opcode> {
    match ty {
        Type::Bool => Some(Opcode::ConstBool),
        Type::I8 | Type::U8 => Some(Opcode::Const8),
        Type::I16 | Type::U16 => Some(Opcode::Const16),
        Type::I32 | Type::U32 => Some(Opcode::Const32),
        Type::I64 | Type::U64 => Some(Opcode::Const64),
        Type::F32 => Some(Opcode::Const32F),
        Type::F64 => Some(Opcode::Const64F),
        Type::Invalid | Type::Memory | Type::Tuple(_) => None,
    }
}

/// Rewrites every CONST-lattice value that isn't already a typed constant
/// opcode, clearing its argument list. Memory values and opaque ops are
/// never CONST, so they're untouched by construction.
fn finalize(
    func: &mut Function,
    cells: &SecondaryMap<ValueId, LatticeCell>,
    stats: &mut Stats,
) -> ChangeResult {
    let mut changed = ChangeResult::Unchanged;
    let values: Vec<ValueId> = func.values().collect();
    for v in values {
        let cell = *cells.get(v);
        if cell.kind != LatticeKind::Const {
            continue;
        }
        let (opcode, ty) = {
            let value = func.value(v);
            (value.opcode, value.ty.clone())
        };
        if opcode.is_const() {
            continue;
        }
        let Some(new_opcode) = const_opcode_for(&ty) else { continue };
        func.reset_value(v, new_opcode, ty);
        func.set_aux_int(v, cell.bits);
        stats.incr("SCCP FOLDED");
        changed = ChangeResult::Changed;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_add_folds_to_typed_constant() {
        crate::init_test_logger();
        let mut func = Function::new("f");
        let entry = func.entry();
        let a = func.new_const(entry, Opcode::Const32, Type::I32, 3);
        let b = func.new_const(entry, Opcode::Const32, Type::I32, 4);
        let add = func.new_value(entry, Opcode::Add, Type::I32, [a, b]);

        let config = PassConfig::new();
        let changed = Sccp::run(&mut func, &config);
        assert!(changed.changed());
        assert_eq!(func.value(add).opcode, Opcode::Const32);
        assert_eq!(func.value(add).aux_int, 7);
    }

    #[test]
    fn division_by_constant_zero_is_never_folded() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let n = func.new_const(entry, Opcode::Const32, Type::I32, 10);
        let zero = func.new_const(entry, Opcode::Const32, Type::I32, 0);
        let div = func.new_value(entry, Opcode::DivS, Type::I32, [n, zero]);

        let config = PassConfig::new();
        Sccp::run(&mut func, &config);
        assert_eq!(func.value(div).opcode, Opcode::DivS);
    }

    #[test]
    fn and_with_false_operand_folds_even_if_other_operand_is_unknown() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let param = func.new_value(entry, Opcode::Param, Type::Bool, []);
        let f = func.new_const(entry, Opcode::ConstBool, Type::Bool, 0);
        let and = func.new_value(entry, Opcode::AndB, Type::Bool, [param, f]);

        let config = PassConfig::new();
        Sccp::run(&mut func, &config);
        assert_eq!(func.value(and).opcode, Opcode::ConstBool);
        assert_eq!(func.value(and).aux_int, 0);
    }

    #[test]
    fn phi_only_merges_executable_incoming_edges() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let cond = func.create_block(BlockKind::If);
        let then_b = func.create_block(BlockKind::Plain);
        let else_b = func.create_block(BlockKind::Plain);
        let join = func.create_block(BlockKind::Ret);

        func.add_edge(entry, cond);
        func.add_edge(cond, then_b); // index 0: taken when true
        func.add_edge(cond, else_b); // index 1: taken when false
        func.add_edge(then_b, join);
        func.add_edge(else_b, join);

        let truth = func.new_const(cond, Opcode::ConstBool, Type::Bool, 1);
        func.set_control(cond, Some(truth));

        let then_val = func.new_const(then_b, Opcode::Const32, Type::I32, 10);
        let else_val = func.new_const(else_b, Opcode::Const32, Type::I32, 20);
        let phi = func.new_value(join, Opcode::Phi, Type::I32, [then_val, else_val]);
        func.set_control(join, Some(phi));

        let config = PassConfig::new();
        Sccp::run(&mut func, &config);
        assert_eq!(func.value(phi).opcode, Opcode::Const32);
        assert_eq!(func.value(phi).aux_int, 10);
    }
}
