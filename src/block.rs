//! Basic blocks: an ordered instruction list with exactly one terminator,
//! placed last (spec.md 3.5). Predecessor
//! bookkeeping is derived on demand from branch/cond-branch users rather
//! than maintained incrementally, matching `Block::get_predecessors`.

use crate::value::{InstrId, UseList};

#[derive(Debug, Clone)]
pub struct BlockData {
    pub instructions: Vec<InstrId>,
    pub is_entry: bool,
    pub display_index: u32,
    pub uses: UseList,
}

impl BlockData {
    pub fn new() -> Self {
        Self { instructions: Vec::new(), is_entry: false, display_index: 0, uses: UseList::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn terminator(&self) -> Option<InstrId> {
        self.instructions.last().copied()
    }
}

impl Default for BlockData {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    Bfs,
    Dfs,
}
