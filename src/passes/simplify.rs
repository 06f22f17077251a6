//! General simplification (spec.md 4.9.2): algebraic identities and Phi
//! collapsing.

use crate::function::Function;
use crate::instr::{BinaryOp, Opcode};
use crate::value::{InstrId, ValueRef};

fn as_const_bits(f: &Function, v: ValueRef) -> Option<u64> {
    match v {
        ValueRef::Const(c) => Some(f.context().borrow().constant_data(c).bits),
        _ => None,
    }
}

fn power_of_two(bits: u64) -> Option<u32> {
    if bits != 0 && bits & (bits - 1) == 0 {
        Some(bits.trailing_zeros())
    } else {
        None
    }
}

pub fn run(f: &mut Function) -> bool {
    let mut changed = false;
    for id in f.all_instruction_ids() {
        if simplify_one(f, id) {
            changed = true;
        }
    }
    changed
}

fn simplify_one(f: &mut Function, id: InstrId) -> bool {
    let data = f.inst(id).clone();
    match data.opcode {
        Opcode::Binary(op) => simplify_binary(f, id, op, data.operands[0], data.operands[1]),
        Opcode::Phi => simplify_phi(f, id),
        Opcode::CondBranch => simplify_cond_branch(f, id, data.operands[1], data.operands[2]),
        _ => false,
    }
}

/// A `CondBranch` whose two targets are the same block carries no
/// information; collapse it into an unconditional `Branch` and dedup the
/// target's Phi incoming entries for this predecessor (spec.md 9).
fn simplify_cond_branch(f: &mut Function, id: InstrId, t: ValueRef, e: ValueRef) -> bool {
    let (Some(t_block), Some(e_block)) = (t.as_block(), e.as_block()) else { return false };
    if t_block != e_block {
        return false;
    }
    let block = f.inst(id).block;
    f.destroy_instruction(id);
    let branch = f.make_branch(t_block);
    f.push_back(block, branch);

    let target_insts: Vec<InstrId> = f.block(t_block).instructions.clone();
    for inst in target_insts {
        if f.inst(inst).opcode == Opcode::Phi {
            f.dedup_phi_incoming(inst);
        }
    }
    true
}

fn simplify_binary(f: &mut Function, id: InstrId, op: BinaryOp, lhs: ValueRef, rhs: ValueRef) -> bool {
    let zero_ty = f.value_type(lhs);
    let zero = as_const_bits(f, rhs).map(|b| b == 0).unwrap_or(false);
    let one = as_const_bits(f, rhs).map(|b| b == 1).unwrap_or(false);

    match op {
        BinaryOp::Sub if lhs == rhs => {
            let c = f.context().borrow_mut().get_constant(zero_ty, 0);
            replace(f, id, ValueRef::Const(c));
            true
        }
        BinaryOp::Add if zero => {
            replace(f, id, lhs);
            true
        }
        BinaryOp::Mul if zero => {
            let c = f.context().borrow_mut().get_constant(zero_ty, 0);
            replace(f, id, ValueRef::Const(c));
            true
        }
        BinaryOp::Mul if one => {
            replace(f, id, lhs);
            true
        }
        BinaryOp::Mul => {
            let Some(rhs_bits) = as_const_bits(f, rhs) else { return false };
            let Some(shift) = power_of_two(rhs_bits) else { return false };
            let shift_const = f.context().borrow_mut().get_constant(zero_ty, shift as u64);
            let shl = f.make_binary(lhs, BinaryOp::Shl, ValueRef::Const(shift_const));
            let new_id = f.insert_before(id, shl);
            replace(f, id, ValueRef::Instr(new_id));
            true
        }
        _ => false,
    }
}

fn replace(f: &mut Function, id: InstrId, value: ValueRef) {
    f.replace_uses(ValueRef::Instr(id), value);
    f.destroy_instruction(id);
}

fn simplify_phi(f: &mut Function, id: InstrId) -> bool {
    let data = f.inst(id);
    if data.opcode != Opcode::Phi {
        return false;
    }
    let count = data.phi_incoming_count();
    if count == 0 {
        if f.inst(id).uses.is_empty() {
            f.destroy_instruction(id);
            return true;
        }
        return false;
    }
    let first = data.phi_incoming(0).1;
    let all_same = (1..count).all(|i| f.inst(id).phi_incoming(i).1 == first) && first != ValueRef::Instr(id);
    if all_same {
        replace(f, id, first);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn mul_by_zero_folds() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let zero = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 0));
        let mul = f.make_binary(p0, BinaryOp::Mul, zero);
        let mul_id = f.push_back(entry, mul);
        let ret = f.make_ret(Some(ValueRef::Instr(mul_id)));
        f.push_back(entry, ret);

        assert!(run(&mut f));
        let ValueRef::Const(c) = f.inst(f.block(entry).instructions[0]).operands[0] else { panic!() };
        assert_eq!(ctx.borrow().constant_data(c).bits, 0);
    }

    #[test]
    fn single_incoming_phi_collapses() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let target = f.create_block();
        let br = f.make_branch(target);
        f.push_back(entry, br);
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let phi = f.make_phi(i32_ty, vec![(entry, p0)]);
        let phi_id = f.push_back(target, phi);
        let ret = f.make_ret(Some(ValueRef::Instr(phi_id)));
        f.push_back(target, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(f.block(target).instructions[0]).operands[0], p0);
    }

    #[test]
    fn equal_target_cond_branch_collapses_and_dedups_phi() {
        use crate::instr::IntPredicate;

        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty, i32_ty]);
        let entry = f.create_block();
        let other = f.create_block();
        let target = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let p1 = ValueRef::Param(crate::value::ParamId(1));

        let cmp = f.make_int_compare(p0, IntPredicate::Equal, p0);
        let cmp_id = f.push_back(entry, cmp);
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), target, target);
        f.push_back(entry, cbr);

        let br_other = f.make_branch(target);
        f.push_back(other, br_other);

        // Two incoming pairs for `entry` (one per CondBranch arm) plus one
        // for `other`; dedup should collapse the `entry` pair down to one
        // without touching the distinct `other` pair.
        let phi = f.make_phi(i32_ty, vec![(entry, p0), (entry, p0), (other, p1)]);
        let phi_id = f.push_back(target, phi);
        let ret = f.make_ret(Some(ValueRef::Instr(phi_id)));
        f.push_back(target, ret);

        assert!(run(&mut f));
        let term = *f.block(entry).instructions.last().unwrap();
        assert_eq!(f.inst(term).opcode, Opcode::Branch);
        assert_eq!(f.inst(phi_id).phi_incoming_count(), 2);
    }
}
