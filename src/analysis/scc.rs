//! Tarjan's strongly-connected-components algorithm over a block set
//! (spec.md 4.6).

use std::collections::{HashMap, HashSet};

use crate::function::Function;
use crate::value::BlockId;

pub struct TarjanState {
    index_counter: usize,
    stack: Vec<BlockId>,
    on_stack: HashSet<BlockId>,
    indices: HashMap<BlockId, usize>,
    low_links: HashMap<BlockId, usize>,
    sccs: Vec<Vec<BlockId>>,
}

/// Computes SCCs of the induced subgraph on `blocks` only (edges leaving
/// `blocks` are ignored), following successors restricted to the set.
pub fn compute_sccs(f: &Function, blocks: &HashSet<BlockId>) -> Vec<Vec<BlockId>> {
    let mut state = TarjanState {
        index_counter: 0,
        stack: Vec::new(),
        on_stack: HashSet::new(),
        indices: HashMap::new(),
        low_links: HashMap::new(),
        sccs: Vec::new(),
    };

    let mut ordered: Vec<BlockId> = blocks.iter().copied().collect();
    ordered.sort_by_key(|b| b.0);

    for b in ordered {
        if !state.indices.contains_key(&b) {
            strong_connect(f, b, blocks, &mut state);
        }
    }

    state.sccs
}

fn strong_connect(f: &Function, v: BlockId, blocks: &HashSet<BlockId>, state: &mut TarjanState) {
    state.indices.insert(v, state.index_counter);
    state.low_links.insert(v, state.index_counter);
    state.index_counter += 1;
    state.stack.push(v);
    state.on_stack.insert(v);

    let mut successors: Vec<BlockId> = f.successors(v).into_iter().filter(|s| blocks.contains(s)).collect();
    successors.sort_by_key(|b| b.0);

    for w in successors {
        if !state.indices.contains_key(&w) {
            strong_connect(f, w, blocks, state);
            let low_w = state.low_links[&w];
            let low_v = state.low_links[&v];
            state.low_links.insert(v, low_v.min(low_w));
        } else if state.on_stack.contains(&w) {
            let idx_w = state.indices[&w];
            let low_v = state.low_links[&v];
            state.low_links.insert(v, low_v.min(idx_w));
        }
    }

    if state.low_links[&v] == state.indices[&v] {
        let mut component = Vec::new();
        loop {
            let w = state.stack.pop().unwrap();
            state.on_stack.remove(&w);
            component.push(w);
            if w == v {
                break;
            }
        }
        state.sccs.push(component);
    }
}

/// Drops singleton components with no self-edge -- these are not
/// cycles, just ordinary blocks.
pub fn nontrivial_sccs(f: &Function, sccs: Vec<Vec<BlockId>>) -> Vec<Vec<BlockId>> {
    sccs.into_iter()
        .filter(|scc| {
            if scc.len() > 1 {
                true
            } else {
                let b = scc[0];
                f.successors(b).contains(&b)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::value::ValueRef;

    #[test]
    fn simple_loop_is_one_scc() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let header = f.create_block();
        let exit = f.create_block();

        let br_to_header = f.make_branch(header);
        f.push_back(entry, br_to_header);

        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let cbr = f.make_cond_branch(one, header, exit);
        f.push_back(header, cbr);

        let ret = f.make_ret(None);
        f.push_back(exit, ret);

        let blocks: HashSet<BlockId> = [entry, header, exit].into_iter().collect();
        let sccs = compute_sccs(&f, &blocks);
        let nontrivial = nontrivial_sccs(&f, sccs);
        assert_eq!(nontrivial.len(), 1);
        assert_eq!(nontrivial[0], vec![header]);
    }
}
