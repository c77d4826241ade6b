//! Dominator tree computation (spec §4.6).
//!
//! The teacher's `hir::ir::dominance` builds a full semi-NCA dominator tree
//! with dominance frontiers, sized for a general-purpose MLIR-style region
//! nest. None of the passes here need dominance frontiers, so this module
//! instead uses the simpler iterative Cooper/Harvey/Kennedy algorithm
//! ("A Simple, Fast Dominance Algorithm"), which converges to the same tree
//! on reducible CFGs in a handful of reverse-postorder passes. See
//! `DESIGN.md` for the tradeoff.

use crate::{block::Block, entity::SecondaryMap, function::Function};

/// The dominator tree of a function's reachable blocks, plus a preorder
/// numbering (`domorder`) that turns `dominates` into an O(1) range check.
#[derive(Debug, Clone)]
pub struct Dominance {
    idom: SecondaryMap<Block, Option<Block>>,
    rpo_index: SecondaryMap<Block, Option<u32>>,
    /// Preorder-in, preorder-out pair over the dominator tree: `a` dominates
    /// `b` iff `domorder[a].0 <= domorder[b].0 < domorder[a].1`.
    domorder: SecondaryMap<Block, (u32, u32)>,
    entry: Block,
}

impl Dominance {
    pub fn compute(func: &Function) -> Self {
        let rpo = func.reverse_postorder();
        let mut rpo_index: SecondaryMap<Block, Option<u32>> = SecondaryMap::new();
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index.set(b, Some(i as u32));
        }

        let entry = func.entry();
        let mut idom: SecondaryMap<Block, Option<Block>> = SecondaryMap::new();
        idom.set(entry, Some(entry));

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for edge in func.predecessors(b) {
                    let p = edge.block;
                    if idom.get(p).is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &rpo_index, cur, p),
                    });
                }
                if idom.get(b) != &new_idom {
                    idom.set(b, new_idom);
                    changed = true;
                }
            }
        }
        // The entry's self-loop is an implementation artifact, not a real
        // dominance relationship; clear it so `immediate_dominator(entry)`
        // reports `None` as callers expect for the root.
        idom.set(entry, None);

        let mut dom = Self {
            idom,
            rpo_index,
            domorder: SecondaryMap::new(),
            entry,
        };
        dom.number_tree(func);
        dom
    }

    fn children_of(&self, func: &Function, parent: Block) -> Vec<Block> {
        func.reverse_postorder()
            .into_iter()
            .filter(|&b| b != self.entry && self.idom.get(b) == &Some(parent))
            .collect()
    }

    fn number_tree(&mut self, func: &Function) {
        let mut counter = 0u32;
        let mut stack = vec![(self.entry, false)];
        while let Some((block, expanded)) = stack.pop() {
            if expanded {
                let start = self.domorder.get(block).0;
                self.domorder.set(block, (start, counter));
                continue;
            }
            let start = counter;
            counter += 1;
            self.domorder.set(block, (start, start));
            stack.push((block, true));
            for child in self.children_of(func, block) {
                stack.push((child, false));
            }
        }
    }

    pub fn immediate_dominator(&self, block: Block) -> Option<Block> {
        *self.idom.get(block)
    }

    /// `true` iff `a` dominates `b` (reflexively: every block dominates
    /// itself).
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        let (a_in, a_out) = *self.domorder.get(a);
        let (b_in, _) = *self.domorder.get(b);
        a_in <= b_in && b_in <= a_out
    }

    pub fn strictly_dominates(&self, a: Block, b: Block) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.rpo_index.get(block).is_some()
    }

    /// Preorder-in number over the dominator tree (spec §4.6's `domorder`):
    /// a cheap, deterministic sort key so CSE can order equivalence-class
    /// members without repeatedly walking the tree.
    pub fn preorder(&self, block: Block) -> u32 {
        self.domorder.get(block).0
    }
}

fn intersect(
    idom: &SecondaryMap<Block, Option<Block>>,
    rpo_index: &SecondaryMap<Block, Option<u32>>,
    mut a: Block,
    mut b: Block,
) -> Block {
    loop {
        let ra = rpo_index.get(a).expect("block must be reachable to have an rpo index");
        let rb = rpo_index.get(b).expect("block must be reachable to have an rpo index");
        match ra.cmp(rb) {
            std::cmp::Ordering::Greater => {
                a = idom.get(a).expect("walked above the root while intersecting");
            }
            std::cmp::Ordering::Less => {
                b = idom.get(b).expect("walked above the root while intersecting");
            }
            std::cmp::Ordering::Equal => return a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;

    #[test]
    fn diamond_cfg_idom_is_the_split_block() {
        // entry -> (then | els) -> join
        let mut func = Function::new("f");
        let entry = func.entry();
        let then_b = func.create_block(BlockKind::Plain);
        let els_b = func.create_block(BlockKind::Plain);
        let join = func.create_block(BlockKind::Ret);
        func.add_edge(entry, then_b);
        func.add_edge(entry, els_b);
        func.add_edge(then_b, join);
        func.add_edge(els_b, join);

        let dom = Dominance::compute(&func);
        assert_eq!(dom.immediate_dominator(then_b), Some(entry));
        assert_eq!(dom.immediate_dominator(els_b), Some(entry));
        assert_eq!(dom.immediate_dominator(join), Some(entry));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(then_b, join));
    }

    #[test]
    fn linear_chain_is_fully_ordered() {
        let mut func = Function::new("f");
        let entry = func.entry();
        let b2 = func.create_block(BlockKind::Plain);
        let b3 = func.create_block(BlockKind::Ret);
        func.add_edge(entry, b2);
        func.add_edge(b2, b3);

        let dom = Dominance::compute(&func);
        assert!(dom.strictly_dominates(entry, b3));
        assert!(dom.strictly_dominates(b2, b3));
        assert!(!dom.strictly_dominates(b3, entry));
    }
}
