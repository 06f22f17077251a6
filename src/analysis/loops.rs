//! Nested loop forest with headers, back edges, and exiting edges
//! (spec.md 4.6), built from the reachable-block set via recursive SCC
//! decomposition.

use std::collections::HashSet;

use crate::analysis::dominator::Dominators;
use crate::analysis::scc::{compute_sccs, nontrivial_sccs};
use crate::function::Function;
use crate::value::BlockId;

#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub blocks: HashSet<BlockId>,
    pub back_edge_sources: Vec<BlockId>,
    /// `(from_inside, to_outside)` pairs.
    pub exiting_edges: Vec<(BlockId, BlockId)>,
    pub sub_loops: Vec<Loop>,
}

impl Loop {
    pub fn contains(&self, b: BlockId) -> bool {
        self.blocks.contains(&b)
    }

    pub fn single_back_edge(&self) -> Option<BlockId> {
        match self.back_edge_sources.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn single_exit_target(&self) -> Option<BlockId> {
        let mut targets: Vec<BlockId> = self.exiting_edges.iter().map(|(_, t)| *t).collect();
        targets.sort_by_key(|b| b.0);
        targets.dedup();
        match targets.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn preheader(&self, f: &Function) -> Option<BlockId> {
        let preds: Vec<BlockId> = f.predecessors(self.header).into_iter().filter(|p| !self.contains(*p)).collect();
        match preds.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn all_blocks(&self) -> Vec<BlockId> {
        let mut out: Vec<BlockId> = self.blocks.iter().copied().collect();
        out.sort_by_key(|b| b.0);
        out
    }
}

pub struct LoopForest {
    pub top_level: Vec<Loop>,
}

impl LoopForest {
    pub fn compute(f: &Function, dominators: &Dominators) -> Self {
        let reachable: HashSet<BlockId> = f.block_order().iter().copied().filter(|&b| dominators.is_reachable(b)).collect();
        let sccs = nontrivial_sccs(f, compute_sccs(f, &reachable));

        let top_level = sccs
            .into_iter()
            .filter_map(|scc| build_loop(f, dominators, scc.into_iter().collect()))
            .collect();

        LoopForest { top_level }
    }

    pub fn find_innermost(&self, b: BlockId) -> Option<&Loop> {
        fn search(loops: &[Loop], b: BlockId) -> Option<&Loop> {
            for l in loops {
                if l.contains(b) {
                    if let Some(inner) = search(&l.sub_loops, b) {
                        return Some(inner);
                    }
                    return Some(l);
                }
            }
            None
        }
        search(&self.top_level, b)
    }

    pub fn all_loops(&self) -> Vec<&Loop> {
        fn collect<'a>(loops: &'a [Loop], out: &mut Vec<&'a Loop>) {
            for l in loops {
                out.push(l);
                collect(&l.sub_loops, out);
            }
        }
        let mut out = Vec::new();
        collect(&self.top_level, &mut out);
        out
    }
}

/// Builds one loop from an SCC: finds the header, separates exiting/back
/// edges, and recurses into the remainder after removing the header
/// (spec.md 4.6 steps 1-4).
fn build_loop(f: &Function, dominators: &Dominators, scc: HashSet<BlockId>) -> Option<Loop> {
    // Step 1: header candidate -- any SCC member, walked up the dominator
    // tree while still inside the SCC.
    let mut header = *scc.iter().min_by_key(|b| b.0).unwrap();
    loop {
        match dominators.immediate_dominator(header) {
            Some(idom) if scc.contains(&idom) => header = idom,
            _ => break,
        }
    }

    // Step 2: verify every non-header block's predecessors are inside the
    // SCC; collect exiting and back edges.
    let mut back_edge_sources = Vec::new();
    let mut exiting_edges = Vec::new();
    let mut candidate_non_header_back_edges = Vec::new();

    for &b in &scc {
        if b != header {
            for p in f.predecessors(b) {
                if !scc.contains(&p) {
                    // A non-header member reached from outside the SCC:
                    // the SCC computation already guarantees strong
                    // connectivity, so this indicates entry through a
                    // block that isn't the chosen header -- reject.
                    return None;
                }
            }
        }
        for s in f.successors(b) {
            if scc.contains(&s) {
                if s == header {
                    back_edge_sources.push(b);
                } else if dominators.dominates(s, b) {
                    candidate_non_header_back_edges.push((b, s));
                }
            } else {
                exiting_edges.push((b, s));
            }
        }
    }

    // Step 3: recurse into the remainder (SCC minus header).
    let remainder: HashSet<BlockId> = scc.iter().copied().filter(|&b| b != header).collect();
    let sub_sccs = nontrivial_sccs(f, compute_sccs(f, &remainder));
    let sub_loops: Vec<Loop> = sub_sccs.into_iter().filter_map(|s| build_loop(f, dominators, s.into_iter().collect())).collect();

    // Step 4: reject (flatten) if a candidate non-header back edge isn't a
    // back edge of some sub-loop, or a sub-loop exits outside this loop.
    for (from, to) in &candidate_non_header_back_edges {
        let belongs = sub_loops.iter().any(|sl| sl.contains(*to) && sl.back_edge_sources.contains(from));
        if !belongs {
            return None;
        }
    }
    for sl in &sub_loops {
        for (_, target) in &sl.exiting_edges {
            if !scc.contains(target) {
                return None;
            }
        }
    }

    Some(Loop { header, blocks: scc, back_edge_sources, exiting_edges, sub_loops })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::value::ValueRef;

    #[test]
    fn single_loop_detected() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let header = f.create_block();
        let exit = f.create_block();

        let br = f.make_branch(header);
        f.push_back(entry, br);
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let cbr = f.make_cond_branch(one, header, exit);
        f.push_back(header, cbr);
        let ret = f.make_ret(None);
        f.push_back(exit, ret);

        let doms = Dominators::compute(&f);
        let forest = LoopForest::compute(&f, &doms);
        assert_eq!(forest.top_level.len(), 1);
        assert_eq!(forest.top_level[0].header, header);
        assert_eq!(forest.top_level[0].single_exit_target(), Some(exit));
        assert_eq!(forest.top_level[0].preheader(&f), Some(entry));
    }
}
