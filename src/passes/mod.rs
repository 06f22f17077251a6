//! The pass catalogue (spec.md 4.9). Every pass exposes `run(...) -> bool`,
//! true iff it mutated anything -- the signature `PassManager` (in
//! `pipeline.rs`) dispatches on.

pub mod block_invariant;
pub mod cfg_simplify;
pub mod cond_flatten;
pub mod const_fold;
pub mod dead_block_elim;
pub mod dedup;
pub mod dse;
pub mod global_reorder;
pub mod inline;
pub mod known_bits;
pub mod licm;
pub mod load_elim;
pub mod loop_mem_extract;
pub mod loop_rotate;
pub mod loop_unroll;
pub mod mem2ssa;
pub mod phi_minimize;
pub mod phi_to_memory;
pub mod simplify;
