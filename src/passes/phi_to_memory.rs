//! Phi-to-memory lowering (spec.md 4.9.11): replace every Phi with a
//! dedicated stack slot, a Store on each incoming edge, and a Load at the
//! Phi's original position -- the inverse of memory-to-SSA, for targets
//! that cannot express block arguments directly.

use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{InstrId, ValueRef};

pub fn run(f: &mut Function) -> bool {
    let phis: Vec<InstrId> =
        f.all_instruction_ids().into_iter().filter(|&id| f.inst(id).opcode == Opcode::Phi).collect();
    if phis.is_empty() {
        return false;
    }

    let Some(entry) = f.entry_block() else { return false };
    for phi in phis {
        lower_one(f, entry, phi);
    }
    true
}

fn lower_one(f: &mut Function, entry: crate::value::BlockId, phi: InstrId) {
    let ty = f.inst(phi).ty;
    let alloc = f.make_stack_alloc(ty, 1);
    let alloc_id = match f.block(entry).instructions.first().copied() {
        Some(first) => f.insert_before(first, alloc),
        None => f.push_back(entry, alloc),
    };
    let addr = ValueRef::Instr(alloc_id);

    let count = f.inst(phi).phi_incoming_count();
    for i in 0..count {
        let (pred, value) = f.inst(phi).phi_incoming(i);
        let store = f.make_store(addr, value);
        match f.block(pred).terminator() {
            Some(term) => {
                f.insert_before(term, store);
            }
            None => {
                f.push_back(pred, store);
            }
        }
    }

    let load = f.make_load(addr);
    let load_id = f.insert_before(phi, load);
    f.replace_uses(ValueRef::Instr(phi), ValueRef::Instr(load_id));
    f.destroy_instruction(phi);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn lowers_diamond_phi_to_stack_slot() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let t = f.create_block();
        let e = f.create_block();
        let join = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));

        let cmp = f.make_int_compare(p0, crate::instr::IntPredicate::Equal, p0);
        let cmp_id = f.push_back(entry, cmp);
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), t, e);
        f.push_back(entry, cbr);

        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let two = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 2));
        let br_t = f.make_branch(join);
        f.push_back(t, br_t);
        let br_e = f.make_branch(join);
        f.push_back(e, br_e);

        let phi = f.make_phi(i32_ty, vec![(t, one), (e, two)]);
        let phi_id = f.push_back(join, phi);
        let ret = f.make_ret(Some(ValueRef::Instr(phi_id)));
        let ret_id = f.push_back(join, ret);

        assert!(run(&mut f));
        assert!(matches!(f.inst(ret_id).operands[0], ValueRef::Instr(_)));
        assert_eq!(f.block(t).instructions.len(), 2);
        assert_eq!(f.block(e).instructions.len(), 2);
    }
}
