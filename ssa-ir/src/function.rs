use std::fmt;

use crate::{
    block::{Block, BlockData, BlockKind, Edge},
    entity::PrimaryMap,
    opcode::Opcode,
    ty::Type,
    value::{Aux, Value, ValueId},
};

/// A named container owning a function's blocks and values, plus its entry
/// block (spec §3). All passes in this crate mutate a `Function` in place
/// through the primitives defined here; none of them own or free IR storage
/// directly.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    blocks: PrimaryMap<Block, BlockData>,
    values: PrimaryMap<ValueId, Value>,
    entry: Block,
}

impl Function {
    /// Creates a function with a single entry block of kind `First`.
    pub fn new(name: impl Into<String>) -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BlockData::new(BlockKind::First));
        Self { name: name.into(), blocks, values: PrimaryMap::new(), entry }
    }

    pub fn entry(&self) -> Block {
        self.entry
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn block(&self, id: Block) -> &BlockData {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: Block) -> &mut BlockData {
        &mut self.blocks[id]
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.keys()
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id]
    }

    pub fn values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.values.keys()
    }

    pub fn successors(&self, block: Block) -> &[Edge] {
        &self.blocks[block].succs
    }

    pub fn predecessors(&self, block: Block) -> &[Edge] {
        &self.blocks[block].preds
    }

    // ---- block mutation ----

    /// Creates a new, unwired block of the given kind.
    pub fn create_block(&mut self, kind: BlockKind) -> Block {
        self.blocks.push(BlockData::new(kind))
    }

    /// Adds a control-flow edge `from -> to`, keeping `preds`/`succs`
    /// positionally paired as required by spec §3's edge invariant.
    pub fn add_edge(&mut self, from: Block, to: Block) {
        let succ_index = self.blocks[from].succs.len() as u32;
        let pred_index = self.blocks[to].preds.len() as u32;
        self.blocks[from].succs.push(Edge { block: to, index: pred_index });
        self.blocks[to].preds.push(Edge { block: from, index: succ_index });
    }

    pub fn set_control(&mut self, block: Block, control: Option<ValueId>) {
        self.blocks[block].control = control;
    }

    // ---- value mutation ----

    /// Creates a new value owned by `block`, appended at the end of its
    /// value list.
    pub fn new_value(
        &mut self,
        block: Block,
        opcode: Opcode,
        ty: Type,
        args: impl IntoIterator<Item = ValueId>,
    ) -> ValueId {
        let value = Value::new(opcode, ty, block).with_args(args);
        let id = self.values.push(value);
        self.blocks[block].values.push(id);
        id
    }

    /// Like [`new_value`](Self::new_value), but inserted at the front of
    /// `block`'s value list (used to keep phis first).
    pub fn new_value_at_front(
        &mut self,
        block: Block,
        opcode: Opcode,
        ty: Type,
        args: impl IntoIterator<Item = ValueId>,
    ) -> ValueId {
        let value = Value::new(opcode, ty, block).with_args(args);
        let id = self.values.push(value);
        self.blocks[block].values.insert(0, id);
        id
    }

    pub fn new_const(&mut self, block: Block, opcode: Opcode, ty: Type, aux_int: i64) -> ValueId {
        let id = self.new_value(block, opcode, ty, []);
        self.values[id].aux_int = aux_int;
        id
    }

    /// Resets `value` to a new opcode/type in place (see
    /// [`Value::reset`]), preserving its id so existing uses remain valid.
    pub fn reset_value(&mut self, value: ValueId, opcode: Opcode, ty: Type) {
        self.values[value].reset(opcode, ty);
    }

    pub fn set_arg(&mut self, value: ValueId, index: usize, new_arg: ValueId) {
        self.values[value].args[index] = new_arg;
    }

    pub fn add_arg(&mut self, value: ValueId, new_arg: ValueId) {
        self.values[value].args.push(new_arg);
    }

    pub fn set_aux_int(&mut self, value: ValueId, aux_int: i64) {
        self.values[value].aux_int = aux_int;
    }

    pub fn set_aux(&mut self, value: ValueId, aux: Aux) {
        self.values[value].aux = aux;
    }

    /// Moves `value` from its current block to the end of `dest`'s value
    /// list, updating its owning-block pointer. Used by LICM to hoist
    /// invariants to a pre-header.
    pub fn move_value_to_block(&mut self, value: ValueId, dest: Block) {
        let source = self.values[value].block;
        if source == dest {
            return;
        }
        self.blocks[source].values.retain(|&v| v != value);
        self.blocks[dest].values.push(value);
        self.values[value].block = dest;
    }

    /// Inserts `value` immediately before `dest`'s terminator-adjacent
    /// position, i.e. at the end of `dest`, without removing it from its
    /// previous block. Used when hoisting creates a *new* value directly in
    /// the destination block.
    pub fn append_existing_value(&mut self, dest: Block, value: ValueId) {
        self.blocks[dest].values.push(value);
    }

    /// Removes `block` from the function entirely. Callers are responsible
    /// for having already rewired its edges and absorbed/rewritten its
    /// values; this just drops the now-unreachable `BlockData`.
    ///
    /// Block ids below the removed one are unaffected; the removed id is
    /// simply left as an unreachable tombstone in the backing `PrimaryMap`
    /// (blocks are small and function lifetimes are short, so we don't
    /// bother compacting ids).
    pub fn remove_block(&mut self, block: Block) {
        self.blocks[block] = BlockData::new(BlockKind::Exit);
        self.blocks[block].values.clear();
    }

    /// Replaces every occurrence of `old` as an argument or block control
    /// value, function-wide, with `new`. Used by trim's phi-padding (a
    /// phi with no surviving consumer is forwarded to its first argument)
    /// and by CSE's dominance-based rewrite.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        for id in self.values.keys().collect::<Vec<_>>() {
            for arg in self.values[id].args.iter_mut() {
                if *arg == old {
                    *arg = new;
                }
            }
        }
        for block in self.blocks.keys().collect::<Vec<_>>() {
            if self.blocks[block].control == Some(old) {
                self.blocks[block].control = Some(new);
            }
        }
    }

    /// Recomputes the `index` field of every predecessor edge's paired
    /// successor entry so it matches `block`'s *current* predecessor
    /// positions (spec §3's edge invariant). Needed after `block`'s
    /// `preds` list is spliced in place, since the position of every
    /// surviving predecessor edge may have shifted.
    pub fn resync_predecessor_indices(&mut self, block: Block) {
        let preds = self.blocks[block].preds.clone();
        for (position, edge) in preds.iter().enumerate() {
            self.blocks[edge.block].succs[edge.index as usize].index = position as u32;
        }
    }

    /// Rewrites every successor edge in `from`'s predecessor list pointing
    /// at `old` to point at `new` instead, and returns the list of
    /// predecessors that were rewired (used by trim to redirect jumps to a
    /// deleted block's successor).
    pub fn redirect_predecessor_edges(&mut self, old: Block, new: Block) -> Vec<Block> {
        let preds: Vec<Edge> = self.blocks[old].preds.to_vec();
        let mut rewired = Vec::with_capacity(preds.len());
        for edge in preds {
            let p = edge.block;
            if let Some(succ) = self.blocks[p].succs.get_mut(edge.index as usize) {
                succ.block = new;
            }
            rewired.push(p);
        }
        rewired
    }

    /// A reverse postorder traversal of reachable blocks from the entry,
    /// satisfying spec §4.6's "Postorder produces a reverse-postorder
    /// sequence over blocks" contract.
    pub fn reverse_postorder(&self) -> Vec<Block> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<(Block, usize)> = vec![(self.entry, 0)];
        visited[self.entry.index()] = true;
        while let Some((block, next_succ)) = stack.last_mut() {
            let succs = &self.blocks[*block].succs;
            if *next_succ < succs.len() {
                let target = succs[*next_succ].block;
                *next_succ += 1;
                if !visited[target.index()] {
                    visited[target.index()] = true;
                    stack.push((target, 0));
                }
            } else {
                postorder.push(*block);
                stack.pop();
            }
        }
        postorder.reverse();
        postorder
    }

    /// All values whose owning block is reachable from the entry, in block
    /// order then in-block order — i.e. a valid "some use dominates this
    /// def" visitation order for acyclic dataflow.
    pub fn reachable_values(&self) -> Vec<ValueId> {
        self.reverse_postorder()
            .into_iter()
            .flat_map(|b| self.blocks[b].values.iter().copied())
            .collect()
    }
}

impl fmt::Display for Function {
    /// A minimal textual dump, useful in tests and `debug >= 2` traces. Not a
    /// full IR printer (out of scope, spec §1).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {}() {{", self.name)?;
        for block in self.blocks.keys() {
            let data = &self.blocks[block];
            writeln!(f, "{block}: ; kind={:?} preds={:?}", data.kind, data.preds)?;
            for &v in &data.values {
                let value = &self.values[v];
                write!(f, "  {v} = {:?}", value.opcode)?;
                if !value.args.is_empty() {
                    write!(f, " {:?}", value.args.as_slice())?;
                }
                if value.opcode.is_const() {
                    write!(f, " #{}", value.aux_int)?;
                }
                writeln!(f)?;
            }
            if let Some(control) = data.control {
                writeln!(f, "  ctrl = {control}")?;
            }
            writeln!(f, "  -> {:?}", data.succs)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;

    #[test]
    fn edges_stay_positionally_paired() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let b2 = func.create_block(BlockKind::Ret);
        func.add_edge(entry, b2);

        let succ = func.successors(entry)[0];
        assert_eq!(succ.block, b2);
        let pred = func.predecessors(b2)[succ.index as usize];
        assert_eq!(pred.block, entry);
    }

    #[test]
    fn reverse_postorder_visits_entry_first() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let b2 = func.create_block(BlockKind::Ret);
        func.add_edge(entry, b2);
        let rpo = func.reverse_postorder();
        assert_eq!(rpo[0], entry);
        assert_eq!(rpo[1], b2);
    }
}
