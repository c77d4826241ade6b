//! Natural loop nest construction (spec §4.6), used by LICM to find
//! preheaders and loop bodies, and by CSE+hoist to judge "control dominates
//! every loop exit" hoisting candidates.
//!
//! Grounded on the shape of the teacher's `hir-analysis::analyses::loops`
//! module (header/children/outer/contains-call API), rebuilt here over
//! concrete back-edge detection instead of the teacher's generic dataflow
//! loop-tree analysis.

use bitvec::{bitvec, vec::BitVec};

use crate::{
    block::Block,
    dominance::Dominance,
    entity::{EntityRef, SecondaryMap},
    entity_id,
    function::Function,
};

entity_id! {
    /// A stable id for one natural loop within a function's loop nest.
    pub struct LoopId;
}

/// One natural loop: a header, the back-edge source blocks, the set of
/// blocks in its body, its exits, an optional parent, and (once assigned by
/// LICM) a preheader.
#[derive(Debug, Clone)]
pub struct LoopData {
    pub header: Block,
    pub body: Vec<Block>,
    pub exits: Vec<Block>,
    pub parent: Option<LoopId>,
    pub children: Vec<LoopId>,
    pub preheader: Option<Block>,
    pub contains_call: bool,
}

/// The loop-nest forest of a function: zero or more top-level natural
/// loops, each possibly containing nested loops.
#[derive(Debug, Clone)]
pub struct LoopNest {
    loops: Vec<LoopData>,
    /// Maps each block to the innermost loop containing it, if any
    /// (the teacher calls this table `b2l`).
    block_to_loop: SecondaryMap<Block, Option<LoopId>>,
}

impl LoopNest {
    pub fn compute(func: &Function, dom: &Dominance) -> Self {
        let rpo = func.reverse_postorder();
        let mut headers: Vec<(Block, Vec<Block>)> = Vec::new();

        for &b in &rpo {
            let mut back_edge_sources = Vec::new();
            for edge in func.predecessors(b) {
                let p = edge.block;
                if dom.is_reachable(p) && dom.dominates(b, p) {
                    back_edge_sources.push(p);
                }
            }
            if !back_edge_sources.is_empty() {
                headers.push((b, back_edge_sources));
            }
        }

        let mut loops = Vec::with_capacity(headers.len());
        let mut block_to_loop: SecondaryMap<Block, Option<LoopId>> = SecondaryMap::new();

        for (header, sources) in &headers {
            let body = natural_loop_body(func, *header, sources);
            let id = LoopId::new(loops.len());
            for &b in &body {
                // A block nested in multiple natural loops (shared headers
                // aside) belongs to the loop whose header it's furthest
                // from needing to escape; since we process headers in RPO,
                // the first assignment is the outermost and later
                // assignments (from nested headers processed later) refine
                // it to the innermost.
                block_to_loop.set(b, Some(id));
            }
            let contains_call = body.iter().any(|&b| {
                func.block(b).values.iter().any(|&v| func.value(v).opcode.is_call())
            });
            loops.push(LoopData {
                header: *header,
                body,
                exits: Vec::new(),
                parent: None,
                children: Vec::new(),
                preheader: None,
                contains_call,
            });
        }

        let mut nest = Self { loops, block_to_loop };
        nest.link_parents();
        nest.compute_exits(func);
        nest
    }

    fn link_parents(&mut self) {
        // A loop B is nested in loop A iff A's body is a strict superset of
        // B's body (true for natural loops sharing no header). Among all
        // enclosing loops pick the smallest (innermost) as the parent.
        let n = self.loops.len();
        for i in 0..n {
            let mut best: Option<(usize, usize)> = None; // (index, body len)
            for j in 0..n {
                if i == j {
                    continue;
                }
                if self.loops[j].body.len() > self.loops[i].body.len()
                    && self.loops[i].body.iter().all(|b| self.loops[j].body.contains(b))
                {
                    if best.is_none_or(|(_, len)| self.loops[j].body.len() < len) {
                        best = Some((j, self.loops[j].body.len()));
                    }
                }
            }
            if let Some((parent_idx, _)) = best {
                self.loops[i].parent = Some(LoopId::new(parent_idx));
            }
        }
        for i in 0..n {
            if let Some(parent) = self.loops[i].parent {
                self.loops[parent.index()].children.push(LoopId::new(i));
            }
        }
    }

    fn compute_exits(&mut self, func: &Function) {
        for lp in &mut self.loops {
            let mut exits = Vec::new();
            for &b in &lp.body {
                for edge in func.successors(b) {
                    if !lp.body.contains(&edge.block) {
                        exits.push(edge.block);
                    }
                }
            }
            exits.sort_by_key(|b| b.index());
            exits.dedup();
            lp.exits = exits;
        }
    }

    pub fn get(&self, id: LoopId) -> &LoopData {
        &self.loops[id.index()]
    }

    pub fn get_mut(&mut self, id: LoopId) -> &mut LoopData {
        &mut self.loops[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = LoopId> {
        (0..self.loops.len()).map(LoopId::new)
    }

    pub fn innermost_loop(&self, block: Block) -> Option<LoopId> {
        *self.block_to_loop.get(block)
    }

    pub fn is_loop_invariant_block(&self, candidate_loop: LoopId, block: Block) -> bool {
        !self.get(candidate_loop).body.contains(&block)
    }
}

/// Standard natural-loop-body discovery: start from the header and each
/// back-edge source, and walk predecessors backward until every reachable
/// block not already in the body (other than the header) has been added.
///
/// Membership is tracked in a `BitVec` rather than a linear `Vec::contains`
/// scan, the way the pack's own loop-detection code tracks DFS `visited`/
/// `in_stack` sets over a dense block-id space.
fn natural_loop_body(func: &Function, header: Block, sources: &[Block]) -> Vec<Block> {
    let mut in_body: BitVec = bitvec![0; func.num_blocks()];
    let mut body = vec![header];
    in_body.set(header.index(), true);

    let mut worklist: Vec<Block> = Vec::new();
    for &s in sources {
        if !in_body[s.index()] {
            in_body.set(s.index(), true);
            body.push(s);
            worklist.push(s);
        }
    }
    while let Some(b) = worklist.pop() {
        for edge in func.predecessors(b) {
            let p = edge.block;
            if !in_body[p.index()] {
                in_body.set(p.index(), true);
                body.push(p);
                worklist.push(p);
            }
        }
    }
    body
}
