//! Conditional flattening (spec.md 4.9.12): a triangle or diamond over a
//! `CondBranch` -- where each arm is either the join block directly or a
//! single-predecessor, single-successor block of pure instructions -- is
//! flattened into straight-line code, with the join's Phis replaced by
//! `Select`.

use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{BlockId, InstrId, ValueRef};

/// Whether `block` is a pure pass-through arm from `from`: no Phi, no
/// memory or call effects, exactly one predecessor (`from`) and an
/// unconditional branch out.
fn is_pure_arm(f: &Function, from: BlockId, block: BlockId) -> bool {
    if f.predecessors(block) != vec![from] {
        return false;
    }
    let Some(term) = f.block(block).terminator() else { return false };
    if f.inst(term).opcode != Opcode::Branch {
        return false;
    }
    f.block(block).instructions[..f.block(block).instructions.len() - 1].iter().all(|&i| {
        !matches!(f.inst(i).opcode, Opcode::Phi | Opcode::Load | Opcode::Store | Opcode::Call | Opcode::StackAlloc)
    })
}

/// Resolves one arm of the branch: `Some(None)` for a direct triangle edge
/// (the arm block itself is the join, origin is `from`), `Some(Some(arm))`
/// for a diamond arm block to hoist, `None` if this isn't a flattenable arm.
fn resolve_arm(f: &Function, from: BlockId, candidate: BlockId, join_hint: Option<BlockId>) -> Option<(BlockId, Option<BlockId>)> {
    if let Some(join) = join_hint {
        if candidate == join {
            return Some((join, None));
        }
    }
    if is_pure_arm(f, from, candidate) {
        let succs = f.successors(candidate);
        if succs.len() == 1 {
            return Some((succs[0], Some(candidate)));
        }
    }
    if join_hint.is_none() {
        return Some((candidate, None));
    }
    None
}

pub fn run(f: &mut Function) -> bool {
    let mut changed = false;
    'outer: for &entry_b in f.block_order().to_vec().iter() {
        if !f.block_order().contains(&entry_b) {
            continue;
        }
        let Some(term) = f.block(entry_b).terminator() else { continue };
        if f.inst(term).opcode != Opcode::CondBranch {
            continue;
        }
        let cond = f.inst(term).operands[0];
        let targets = f.inst(term).targets();
        let (t_raw, e_raw) = (targets[0], targets[1]);
        if t_raw == e_raw {
            continue;
        }

        let Some((join_t, t_arm)) = resolve_arm(f, entry_b, t_raw, None) else { continue };
        let Some((join_e, e_arm)) = resolve_arm(f, entry_b, e_raw, Some(join_t)) else { continue };
        if join_t != join_e || join_t == entry_b {
            continue;
        }
        let join = join_t;

        let t_origin = t_arm.unwrap_or(entry_b);
        let e_origin = e_arm.unwrap_or(entry_b);
        if t_origin == e_origin {
            continue;
        }
        let expected_preds: std::collections::HashSet<BlockId> = [t_origin, e_origin].into_iter().collect();
        let actual_preds: std::collections::HashSet<BlockId> = f.predecessors(join).into_iter().collect();
        if actual_preds != expected_preds {
            continue 'outer;
        }

        let movable_count: usize = [t_arm, e_arm]
            .into_iter()
            .flatten()
            .map(|arm| f.block(arm).instructions.len() - 1)
            .sum();
        if movable_count >= 4 {
            continue;
        }

        for arm in [t_arm, e_arm].into_iter().flatten() {
            let insts: Vec<InstrId> = f.block(arm).instructions[..f.block(arm).instructions.len() - 1].to_vec();
            for inst in insts {
                f.unlink_instruction(inst);
                f.reinsert_before(inst, term);
            }
        }

        for phi in f.block(join).instructions.clone() {
            if f.inst(phi).opcode != Opcode::Phi {
                continue;
            }
            let count = f.inst(phi).phi_incoming_count();
            let mut t_value = None;
            let mut e_value = None;
            for i in 0..count {
                let (b, v) = f.inst(phi).phi_incoming(i);
                if b == t_origin {
                    t_value = Some(v);
                } else if b == e_origin {
                    e_value = Some(v);
                }
            }
            let (Some(tv), Some(ev)) = (t_value, e_value) else { continue };
            let select = f.make_select(cond, tv, ev);
            let select_id = f.insert_before(term, select);
            f.replace_uses(ValueRef::Instr(phi), ValueRef::Instr(select_id));
            f.destroy_instruction(phi);
        }

        f.destroy_instruction(term);
        let branch = f.make_branch(join);
        f.push_back(entry_b, branch);

        for arm in [t_arm, e_arm].into_iter().flatten() {
            f.remove_incoming_block_from_phis(join, arm, true);
            let arm_term = f.block(arm).terminator().expect("arm still has its branch");
            f.destroy_instruction(arm_term);
            f.clear_block(arm);
            f.destroy_block(arm);
        }

        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::IntPredicate;

    #[test]
    fn flattens_diamond_into_select() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let t = f.create_block();
        let e = f.create_block();
        let join = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));

        let cmp = f.make_int_compare(p0, IntPredicate::Equal, p0);
        let cmp_id = f.push_back(entry, cmp);
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), t, e);
        f.push_back(entry, cbr);

        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let two = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 2));
        let add = f.make_binary(p0, crate::instr::BinaryOp::Add, one);
        let add_id = f.push_back(t, add);
        let br_t = f.make_branch(join);
        f.push_back(t, br_t);
        let br_e = f.make_branch(join);
        f.push_back(e, br_e);

        let phi = f.make_phi(i32_ty, vec![(t, ValueRef::Instr(add_id)), (e, two)]);
        let phi_id = f.push_back(join, phi);
        let ret = f.make_ret(Some(ValueRef::Instr(phi_id)));
        let ret_id = f.push_back(join, ret);

        assert!(run(&mut f));
        assert_eq!(f.block_order().len(), 2);
        assert_eq!(f.inst(f.block(join).instructions[0]).opcode, Opcode::Ret);
        let ValueRef::Instr(_) = f.inst(ret_id).operands[0] else { panic!("expected select/add value") };
    }

    #[test]
    fn flattens_triangle_into_select() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let t = f.create_block();
        let join = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));

        let cmp = f.make_int_compare(p0, IntPredicate::Equal, p0);
        let cmp_id = f.push_back(entry, cmp);
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), t, join);
        f.push_back(entry, cbr);

        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let br_t = f.make_branch(join);
        f.push_back(t, br_t);

        let phi = f.make_phi(i32_ty, vec![(t, one), (entry, p0)]);
        let phi_id = f.push_back(join, phi);
        let ret = f.make_ret(Some(ValueRef::Instr(phi_id)));
        f.push_back(join, ret);

        assert!(run(&mut f));
        assert_eq!(f.block_order().len(), 2);
        assert_eq!(f.inst(f.block(join).instructions[0]).opcode, Opcode::Select);
    }
}
