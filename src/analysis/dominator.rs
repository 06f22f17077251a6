//! Cooper-Harvey-Kennedy iterative dominator tree (spec.md 4.5).

use std::collections::HashMap;

use crate::function::Function;
use crate::value::BlockId;

pub struct Dominators {
    /// `block -> immediate dominator`. The entry block has no entry; a
    /// block absent from this map (and not the entry) is dead/unreachable.
    idom: HashMap<BlockId, BlockId>,
    post_order: Vec<BlockId>,
    post_order_index: HashMap<BlockId, usize>,
    entry: BlockId,
}

impl Dominators {
    pub fn compute(f: &Function) -> Self {
        let entry = f.entry_block().expect("cannot compute dominators of an extern function");

        let mut post_order = Vec::new();
        let mut visited = std::collections::HashSet::new();
        Self::dfs_post_order(f, entry, &mut visited, &mut post_order);

        let mut post_order_index = HashMap::new();
        for (i, &b) in post_order.iter().enumerate() {
            post_order_index.insert(b, i);
        }

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);

        let reverse_post_order: Vec<BlockId> = post_order.iter().rev().copied().collect();

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &reverse_post_order {
                if b == entry {
                    continue;
                }
                let preds: Vec<BlockId> =
                    f.predecessors(b).into_iter().filter(|p| idom.contains_key(p)).collect();
                let Some((&first, rest)) = preds.split_first() else { continue };

                let mut new_idom = first;
                for &p in rest {
                    new_idom = Self::intersect(&idom, &post_order_index, new_idom, p);
                }

                if idom.get(&b) != Some(&new_idom) {
                    idom.insert(b, new_idom);
                    changed = true;
                }
            }
        }

        idom.remove(&entry);

        Dominators { idom, post_order, post_order_index, entry }
    }

    fn dfs_post_order(
        f: &Function,
        b: BlockId,
        visited: &mut std::collections::HashSet<BlockId>,
        out: &mut Vec<BlockId>,
    ) {
        if !visited.insert(b) {
            return;
        }
        for s in f.successors(b) {
            Self::dfs_post_order(f, s, visited, out);
        }
        out.push(b);
    }

    fn intersect(
        idom: &HashMap<BlockId, BlockId>,
        post_order_index: &HashMap<BlockId, usize>,
        mut a: BlockId,
        mut b: BlockId,
    ) -> BlockId {
        while a != b {
            while post_order_index[&a] < post_order_index[&b] {
                a = idom[&a];
            }
            while post_order_index[&b] < post_order_index[&a] {
                b = idom[&b];
            }
        }
        a
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        b == self.entry || self.idom.contains_key(&b)
    }

    /// Reachable blocks in post-order (entry last).
    pub fn post_order(&self) -> &[BlockId] {
        &self.post_order
    }

    pub fn immediate_dominator(&self, b: BlockId) -> Option<BlockId> {
        if b == self.entry {
            None
        } else {
            self.idom.get(&b).copied()
        }
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            if cur == self.entry {
                return false;
            }
            cur = self.idom[&cur];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::IntPredicate;
    use crate::value::ValueRef;

    #[test]
    fn diamond_dominators() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let b1 = f.create_block();
        let b2 = f.create_block();
        let join = f.create_block();

        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let zero = crate::value::ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 0));
        let cmp = f.make_int_compare(p0, IntPredicate::Equal, zero);
        let cmp_id = f.push_back(entry, cmp);
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), b1, b2);
        f.push_back(entry, cbr);

        let br1 = f.make_branch(join);
        f.push_back(b1, br1);
        let br2 = f.make_branch(join);
        f.push_back(b2, br2);
        let ret = f.make_ret(Some(p0));
        f.push_back(join, ret);

        let doms = Dominators::compute(&f);
        assert_eq!(doms.immediate_dominator(join), Some(entry));
        assert_eq!(doms.immediate_dominator(b1), Some(entry));
        assert!(doms.dominates(entry, join));
        assert!(!doms.dominates(b1, join));
    }
}
