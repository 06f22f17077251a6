//! The value hierarchy: a closed tagged sum over `Constant`, `Undef`,
//! `Parameter`, `Block`, `Function`, and `Instruction` operands (spec.md
//! 3.2), plus the use-list bookkeeping that backs it (spec.md 3.3 / 4.2).
//!
//! Every kind that can appear as the left-hand side of a use
//! (`Parameter`, `Block`, `Instruction` -- all scoped to one `Function`)
//! carries a `Vec<Use>` use list directly on their arena slot;
//! `Constant`/`Undef`/`Function` are global/cross-function leaves that are
//! never the target of `replace_uses` in this pass catalogue, so they are
//! tracked for identity only (see DESIGN.md).

use crate::context::{ConstId, UndefId};
use crate::function::FuncId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

/// An operand: a reference to any value in the closed hierarchy. Dispatch
/// over this enum is a `match`, not virtual dispatch, per spec.md 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    Const(ConstId),
    Undef(UndefId),
    Param(ParamId),
    Block(BlockId),
    Func(FuncId),
    Instr(InstrId),
}

impl ValueRef {
    pub fn as_block(self) -> Option<BlockId> {
        match self {
            ValueRef::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_instr(self) -> Option<InstrId> {
        match self {
            ValueRef::Instr(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_func(self) -> Option<FuncId> {
        match self {
            ValueRef::Func(f) => Some(f),
            _ => None,
        }
    }

    /// Whether this value kind maintains a live use list in this crate (see
    /// module doc).
    pub fn has_use_list(self) -> bool {
        matches!(self, ValueRef::Param(_) | ValueRef::Block(_) | ValueRef::Instr(_))
    }
}

/// One use: instruction `user` references the owning value through operand
/// slot `operand_index`. Stored as a
/// plain entry in a `Vec` rather than threaded into an intrusive linked
/// list -- arena handles make removal-by-value cheap enough without needing
/// the doubly-linked-list machinery the original uses for O(1) unlink from
/// an unknown position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: InstrId,
    pub operand_index: u32,
}

/// Use-list storage, embedded directly in `ParamData`/`BlockData`/`InstData`.
#[derive(Debug, Clone, Default)]
pub struct UseList {
    uses: Vec<Use>,
}

impl UseList {
    pub fn new() -> Self {
        Self { uses: Vec::new() }
    }

    pub fn add(&mut self, user: InstrId, operand_index: u32) {
        debug_assert!(
            !self.uses.iter().any(|u| u.user == user && u.operand_index == operand_index),
            "use already linked"
        );
        self.uses.push(Use { user, operand_index });
    }

    pub fn remove(&mut self, user: InstrId, operand_index: u32) {
        let pos = self
            .uses
            .iter()
            .position(|u| u.user == user && u.operand_index == operand_index)
            .expect("removing a use that isn't linked");
        self.uses.remove(pos);
    }

    pub fn len(&self) -> usize {
        self.uses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Use> + '_ {
        self.uses.iter().copied()
    }

    /// Users with duplicate operand indices collapsed -- the set of
    /// distinct instructions that use this value at all.
    pub fn users(&self) -> impl Iterator<Item = InstrId> + '_ {
        let mut seen = Vec::new();
        self.uses.iter().filter_map(move |u| {
            if seen.contains(&u.user) {
                None
            } else {
                seen.push(u.user);
                Some(u.user)
            }
        })
    }

    /// Snapshot of current uses, safe to iterate while mutating the live
    /// list -- "capture next, then step" (spec.md 3.3) reduces, for a
    /// `Vec`-backed list, to simply cloning before mutating.
    pub fn snapshot(&self) -> Vec<Use> {
        self.uses.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_empties_list() {
        let mut uses = UseList::new();
        uses.add(InstrId(0), 0);
        uses.add(InstrId(1), 0);
        assert_eq!(uses.len(), 2);
        uses.remove(InstrId(0), 0);
        assert_eq!(uses.len(), 1);
    }

    #[test]
    fn users_deduplicates() {
        let mut uses = UseList::new();
        uses.add(InstrId(0), 0);
        uses.add(InstrId(0), 1);
        let users: Vec<_> = uses.users().collect();
        assert_eq!(users, vec![InstrId(0)]);
    }
}
