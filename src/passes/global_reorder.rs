//! Global reordering (spec.md 4.9.13): sink a pure, non-Load instruction
//! whose users are all outside its own block and outside loops to just
//! before the user that minimizes scanned instructions on paths to the
//! other users.

use crate::analysis::{Dominators, LoopForest};
use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{InstrId, ValueRef};

fn is_movable(f: &Function, id: InstrId) -> bool {
    let data = f.inst(id);
    !matches!(data.opcode, Opcode::Load | Opcode::Phi) && !data.opcode.is_volatile()
}

pub fn run(f: &mut Function) -> bool {
    let dominators = Dominators::compute(f);
    let loops = LoopForest::compute(f, &dominators);
    let mut changed = false;

    let candidates: Vec<InstrId> = f
        .all_instruction_ids()
        .into_iter()
        .filter(|&id| is_movable(f, id))
        .filter(|&id| loops.find_innermost(f.inst(id).block).is_none())
        .collect();

    for inst in candidates {
        let owner = f.inst(inst).block;
        let users: Vec<InstrId> = f.inst(inst).uses.users().collect();
        if users.is_empty() {
            continue;
        }
        if users.iter().any(|&u| f.inst(u).block == owner || f.inst(u).opcode == Opcode::Phi) {
            continue;
        }
        if users.iter().any(|&u| loops.find_innermost(f.inst(u).block).is_some()) {
            continue;
        }
        if !users.iter().all(|&u| dominators.dominates(owner, f.inst(u).block)) {
            continue;
        }

        let Some(&best_user) = users.iter().min_by_key(|&&u| total_scan_cost(f, &users, u)) else { continue };

        f.unlink_instruction(inst);
        f.reinsert_before(inst, best_user);
        changed = true;
    }
    changed
}

/// Sum over every user `u` of the number of instructions between
/// `candidate` and `u` along the straight-line block path -- approximates
/// "instructions scanned along all paths to all other users" for the
/// common case where users share a dominator chain.
fn total_scan_cost(f: &Function, users: &[InstrId], candidate: InstrId) -> usize {
    let candidate_block = f.inst(candidate).block;
    let candidate_pos = f.block(candidate_block).instructions.iter().position(|&i| i == candidate).unwrap();
    let mut total = 0usize;
    for &u in users {
        let ub = f.inst(u).block;
        if ub == candidate_block {
            let up = f.block(ub).instructions.iter().position(|&i| i == u).unwrap();
            total += up.abs_diff(candidate_pos);
        } else {
            total += f.block(ub).instructions.len();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::BinaryOp;

    #[test]
    fn sinks_single_use_to_its_user_block() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let next = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let add = f.make_binary(p0, BinaryOp::Add, one);
        let add_id = f.push_back(entry, add);
        let br = f.make_branch(next);
        f.push_back(entry, br);
        let ret = f.make_ret(Some(ValueRef::Instr(add_id)));
        f.push_back(next, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(add_id).block, next);
    }
}
