//! Path enumeration between dominator-related blocks, with a cache keyed by
//! the query (spec.md 4.8).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::analysis::dominator::Dominators;
use crate::function::Function;
use crate::value::BlockId;

/// Enumerates the blocks reachable from `from` without passing through
/// `dom` again, up to (and including) `to`. Used to answer "is this path
/// clear of aliasing stores" queries without materializing every path.
pub fn get_blocks_inbetween(f: &Function, from: BlockId, to: BlockId) -> HashSet<BlockId> {
    let mut visited = HashSet::new();
    let mut stack = vec![from];
    visited.insert(from);
    while let Some(b) = stack.pop() {
        if b == to {
            continue;
        }
        for s in f.successors(b) {
            if visited.insert(s) {
                stack.push(s);
            }
        }
    }
    visited
}

/// All blocks on some path from `dominator` to `target`, inclusive, given
/// that `dominator` is known to dominate `target`. Walks backward from
/// `target` along predecessors, stopping at `dominator`.
pub fn get_blocks_from_dominator_to_target(f: &Function, dominator: BlockId, target: BlockId) -> HashSet<BlockId> {
    let mut visited = HashSet::new();
    let mut stack = vec![target];
    visited.insert(target);
    while let Some(b) = stack.pop() {
        if b == dominator {
            continue;
        }
        for p in f.predecessors(b) {
            if visited.insert(p) {
                stack.push(p);
            }
        }
    }
    visited
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PathQuery {
    from: BlockId,
    to: BlockId,
}

/// Answers "does every path from `from` to `to` avoid a given block set"
/// style queries, memoizing the block sets per `(from, to)` pair so passes
/// that re-check the same dominance-bounded region repeatedly (LICM, known
/// loads) don't re-walk the CFG each time.
pub struct PathValidator<'a> {
    f: &'a Function,
    dominators: &'a Dominators,
    cache: RefCell<HashMap<PathQuery, HashSet<BlockId>>>,
}

impl<'a> PathValidator<'a> {
    pub fn new(f: &'a Function, dominators: &'a Dominators) -> Self {
        PathValidator { f, dominators, cache: RefCell::new(HashMap::new()) }
    }

    fn blocks_between(&self, from: BlockId, to: BlockId) -> HashSet<BlockId> {
        let key = PathQuery { from, to };
        if let Some(cached) = self.cache.borrow().get(&key) {
            return cached.clone();
        }
        let computed = get_blocks_inbetween(self.f, from, to);
        self.cache.borrow_mut().insert(key, computed.clone());
        computed
    }

    /// Whether every path from `from` to `to` (with `from` dominating `to`,
    /// or `from == to`) passes only through blocks for which `predicate`
    /// holds -- used e.g. to check no intervening store can alias a given
    /// pointer.
    pub fn all_blocks_between_satisfy(&self, from: BlockId, to: BlockId, mut predicate: impl FnMut(BlockId) -> bool) -> bool {
        if !self.dominators.dominates(from, to) && from != to {
            return false;
        }
        self.blocks_between(from, to).into_iter().all(|b| predicate(b))
    }

    pub fn invalidate(&self) {
        self.cache.borrow_mut().clear();
    }
}
