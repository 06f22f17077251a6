//! Analysis passes over a `Function`: dominance, loop structure, pointer
//! aliasing, and path enumeration (spec.md 4.5-4.8). Every analysis here is
//! an immutable snapshot -- mutating the function invalidates it; nothing
//! in this module re-subscribes to edits.

pub mod alias;
pub mod dominator;
pub mod loops;
pub mod paths;
pub mod scc;

pub use alias::{AccessMode, AliasResult, PointerAliasing};
pub use dominator::Dominators;
pub use loops::{Loop, LoopForest};
pub use paths::PathValidator;
