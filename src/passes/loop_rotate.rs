//! Loop rotation (spec.md 4.9.15): rewrite `while (c) { body }` into
//! `if (c) { do { body } while (c); }` by cloning the header into a latch
//! block that becomes the sole back edge's target.

use std::collections::HashMap;

use crate::analysis::{Dominators, LoopForest};
use crate::function::Function;
use crate::instr::{InstData, Opcode};
use crate::value::{BlockId, InstrId, ValueRef};

pub fn run(f: &mut Function) -> bool {
    let dominators = Dominators::compute(f);
    let loops = LoopForest::compute(f, &dominators);
    let candidates: Vec<BlockId> = loops.all_loops().iter().map(|l| l.header).collect();

    let mut changed = false;
    for header in candidates {
        if try_rotate(f, header) {
            changed = true;
        }
    }
    changed
}

fn try_rotate(f: &mut Function, header: BlockId) -> bool {
    let dominators = Dominators::compute(f);
    let loops = LoopForest::compute(f, &dominators);
    let Some(lp) = loops.find_innermost(header) else { return false };
    if lp.header != header {
        return false;
    }
    let Some(back_edge_source) = lp.single_back_edge() else { return false };
    let Some(exit) = lp.single_exit_target() else { return false };

    let Some(term) = f.block(header).terminator() else { return false };
    if f.inst(term).opcode != Opcode::CondBranch {
        return false;
    }
    let cond = f.inst(term).operands[0];
    let targets = f.inst(term).targets();
    let (t, e) = (targets[0], targets[1]);
    let (body_target, exit_target) = if t != exit && e == exit {
        (t, e)
    } else if e != exit && t == exit {
        (e, t)
    } else {
        return false;
    };
    if !lp.blocks.contains(&body_target) {
        return false;
    }

    // Phi-collapse map: header phi -> its incoming value from the back edge.
    let header_phis: Vec<InstrId> =
        f.block(header).instructions.iter().copied().filter(|&i| f.inst(i).opcode == Opcode::Phi).collect();
    let mut remap: HashMap<InstrId, ValueRef> = HashMap::new();
    for &phi in &header_phis {
        let count = f.inst(phi).phi_incoming_count();
        let mut backedge_value = None;
        for i in 0..count {
            let (blk, val) = f.inst(phi).phi_incoming(i);
            if blk == back_edge_source {
                backedge_value = Some(val);
            }
        }
        let Some(v) = backedge_value else { return false };
        remap.insert(phi, v);
    }

    let latch = f.create_block();
    let body_chain: Vec<InstrId> = f
        .block(header)
        .instructions
        .iter()
        .copied()
        .filter(|&i| f.inst(i).opcode != Opcode::Phi && i != term)
        .collect();
    for inst in body_chain {
        let Some(cloned) = clone_instr(f, inst, &remap) else { return false };
        let new_id = f.push_back(latch, cloned);
        remap.insert(inst, ValueRef::Instr(new_id));
    }
    let new_cond = remap_value(cond, &remap);
    let latch_cbr = f.make_cond_branch(new_cond, body_target, exit_target);
    f.push_back(latch, latch_cbr);

    let back_term = f.block(back_edge_source).terminator().expect("back edge source has a terminator");
    retarget_terminator(f, back_term, header, latch);
    f.on_removed_branch_to(back_edge_source, header, false);

    for &phi in f.block(body_target).instructions.clone().iter() {
        if f.inst(phi).opcode != Opcode::Phi {
            continue;
        }
        let count = f.inst(phi).phi_incoming_count();
        let mut value_from_header = None;
        for i in 0..count {
            let (blk, val) = f.inst(phi).phi_incoming(i);
            if blk == header {
                value_from_header = Some(val);
            }
        }
        if let Some(v) = value_from_header {
            let latch_value = remap_value(v, &remap);
            f.add_incoming(phi, latch, latch_value);
        }
    }
    for &phi in f.block(exit_target).instructions.clone().iter() {
        if f.inst(phi).opcode != Opcode::Phi {
            continue;
        }
        let count = f.inst(phi).phi_incoming_count();
        let mut value_from_header = None;
        for i in 0..count {
            let (blk, val) = f.inst(phi).phi_incoming(i);
            if blk == header {
                value_from_header = Some(val);
            }
        }
        if let Some(v) = value_from_header {
            let latch_value = remap_value(v, &remap);
            f.add_incoming(phi, latch, latch_value);
        }
    }

    true
}

fn retarget_terminator(f: &mut Function, term: InstrId, from: BlockId, to: BlockId) {
    let data = f.inst(term);
    match data.opcode {
        Opcode::Branch => {
            f.set_operand(term, 0, ValueRef::Block(to));
        }
        Opcode::CondBranch => {
            if f.inst(term).operands[1] == ValueRef::Block(from) {
                f.set_operand(term, 1, ValueRef::Block(to));
            }
            if f.inst(term).operands[2] == ValueRef::Block(from) {
                f.set_operand(term, 2, ValueRef::Block(to));
            }
        }
        _ => {}
    }
}

fn remap_value(v: ValueRef, remap: &HashMap<InstrId, ValueRef>) -> ValueRef {
    match v {
        ValueRef::Instr(id) => remap.get(&id).copied().unwrap_or(v),
        other => other,
    }
}

fn clone_instr(f: &Function, id: InstrId, remap: &HashMap<InstrId, ValueRef>) -> Option<InstData> {
    let data = f.inst(id);
    let ops: Vec<ValueRef> = data.operands.iter().map(|&o| remap_value(o, remap)).collect();
    match data.opcode {
        Opcode::Unary(op) => Some(f.make_unary(op, ops[0])),
        Opcode::Binary(op) => Some(f.make_binary(ops[0], op, ops[1])),
        Opcode::IntCompare(pred) => Some(f.make_int_compare(ops[0], pred, ops[1])),
        Opcode::Cast(kind) => Some(f.make_cast(kind, ops[0], data.ty)),
        Opcode::Offset => Some(f.make_offset(ops[0], ops[1])),
        Opcode::Select => Some(f.make_select(ops[0], ops[1], ops[2])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::{BinaryOp, IntPredicate};

    #[test]
    fn rotates_simple_counted_loop() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let header = f.create_block();
        let body = f.create_block();
        let exit = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let zero = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 0));
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let limit = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 10));

        let br = f.make_branch(header);
        f.push_back(entry, br);

        let phi = f.make_phi(i32_ty, vec![(entry, zero)]);
        let phi_id = f.push_back(header, phi);
        let cmp = f.make_int_compare(ValueRef::Instr(phi_id), IntPredicate::Less, limit);
        let cmp_id = f.push_back(header, cmp);
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), body, exit);
        f.push_back(header, cbr);

        let inc = f.make_binary(ValueRef::Instr(phi_id), BinaryOp::Add, one);
        let inc_id = f.push_back(body, inc);
        let back = f.make_branch(header);
        f.push_back(body, back);
        f.add_incoming(phi_id, body, ValueRef::Instr(inc_id));

        let ret = f.make_ret(Some(p0));
        f.push_back(exit, ret);

        assert!(try_rotate(&mut f, header));
        assert_eq!(f.block_order().len(), 5);
        let back_term = f.block(body).terminator().unwrap();
        assert_ne!(f.inst(back_term).targets()[0], header);
    }
}
