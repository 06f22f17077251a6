//! Loop unrolling (spec.md 4.9.16): for a loop whose exit condition can be
//! traced, through Phis rooted in the header with constant/undef
//! first-iteration values and a chain of Unary/Binary/Cast instructions, to
//! a compile-time-known trip count (interpreted up to 12 iterations using
//! the semantics of `const_fold`), clone the loop body that many times and
//! thread the back edges through the clones.
//!
//! Scoped to single-block loops (header is its own sole back-edge source):
//! the common counted-loop shape. Multi-block loop bodies are left alone.

use std::collections::HashMap;

use crate::analysis::{Dominators, LoopForest};
use crate::function::Function;
use crate::instr::{InstData, Opcode};
use crate::passes::const_fold::{as_const_bits, eval_binary, eval_cast, eval_compare, eval_unary};
use crate::types::TypeKind;
use crate::value::{BlockId, InstrId, ValueRef};

const MAX_ITERATIONS: usize = 12;

pub fn run(f: &mut Function) -> bool {
    let dominators = Dominators::compute(f);
    let loops = LoopForest::compute(f, &dominators);
    let headers: Vec<BlockId> = loops.all_loops().iter().map(|l| l.header).collect();

    let mut changed = false;
    for header in headers {
        if try_unroll(f, header) {
            changed = true;
        }
    }
    changed
}

fn try_unroll(f: &mut Function, header: BlockId) -> bool {
    let dominators = Dominators::compute(f);
    let loops = LoopForest::compute(f, &dominators);
    let Some(lp) = loops.find_innermost(header) else { return false };
    if lp.header != header || lp.blocks.len() != 1 {
        return false;
    }
    let Some(back_edge_source) = lp.single_back_edge() else { return false };
    if back_edge_source != header {
        return false;
    }
    let Some(exit) = lp.single_exit_target() else { return false };
    if lp.exiting_edges.len() != 1 {
        return false;
    }

    let Some(term) = f.block(header).terminator() else { return false };
    if f.inst(term).opcode != Opcode::CondBranch {
        return false;
    }
    let targets = f.inst(term).targets();
    let (continue_target, exit_target) = if targets[0] == header && targets[1] == exit {
        (header, exit)
    } else if targets[1] == header && targets[0] == exit {
        (header, exit)
    } else {
        return false;
    };
    let _ = continue_target;
    let cond = f.inst(term).operands[0];
    let ValueRef::Instr(cmp_id) = cond else { return false };
    let pred = match f.inst(cmp_id).opcode {
        Opcode::IntCompare(p) => p,
        _ => return false,
    };
    let (lhs, rhs) = (f.inst(cmp_id).operands[0], f.inst(cmp_id).operands[1]);

    let header_phis: Vec<InstrId> =
        f.block(header).instructions.iter().copied().filter(|&i| f.inst(i).opcode == Opcode::Phi).collect();

    // `perform_unroll` only rewires the one Phi driving the trip count; any
    // other loop-carried Phi in the header would be left with a dangling
    // self edge once the back edge is rewritten, so require exactly one.
    if header_phis.len() != 1 {
        return false;
    }
    let phi = header_phis[0];
    let Some((init_bits, kind, update_val)) = induction_shape(f, phi, header) else { return false };
    let Some(trip_count) = simulate(f, phi, lhs, rhs, pred, kind, init_bits, update_val) else { return false };
    if trip_count < 1 {
        return false;
    }
    perform_unroll(f, header, exit, phi, kind, init_bits, update_val, trip_count);
    true
}

/// Returns `(init_bits, kind, update_value)` if `phi` is rooted at `header`
/// with a constant/undef first-iteration value and a back-edge value from
/// `header` itself (the single-block loop's self edge).
fn induction_shape(f: &Function, phi: InstrId, header: BlockId) -> Option<(u64, TypeKind, ValueRef)> {
    let count = f.inst(phi).phi_incoming_count();
    let mut outside = None;
    let mut update = None;
    for i in 0..count {
        let (blk, val) = f.inst(phi).phi_incoming(i);
        if blk == header {
            update = Some(val);
        } else {
            outside = Some(val);
        }
    }
    let update_val = update?;
    let kind = f.context().borrow().type_kind(f.inst(phi).ty);
    let init_bits = match outside? {
        ValueRef::Const(c) => f.context().borrow().constant_data(c).bits,
        ValueRef::Undef(_) => 0,
        _ => return None,
    };
    Some((init_bits, kind, update_val))
}

/// Traces `v` to a concrete bit pattern given the induction phi's current
/// value for this iteration, walking Unary/Binary/Cast chains rooted at
/// `phi`. Returns `None` if `v` depends on anything else that varies.
fn trace(f: &Function, phi: InstrId, phi_bits: u64, phi_kind: TypeKind, v: ValueRef) -> Option<(u64, TypeKind)> {
    if let ValueRef::Instr(id) = v {
        if id == phi {
            return Some((phi_bits, phi_kind));
        }
    }
    if let Some(bits_kind) = as_const_bits(f, v) {
        return Some(bits_kind);
    }
    let ValueRef::Instr(id) = v else { return None };
    let data = f.inst(id);
    match data.opcode {
        Opcode::Unary(op) => {
            let (bits, kind) = trace(f, phi, phi_bits, phi_kind, data.operands[0])?;
            Some((eval_unary(op, kind, bits), kind))
        }
        Opcode::Binary(op) => {
            let (l, kind) = trace(f, phi, phi_bits, phi_kind, data.operands[0])?;
            let (r, _) = trace(f, phi, phi_bits, phi_kind, data.operands[1])?;
            eval_binary(op, kind, l, r).map(|bits| (bits, kind))
        }
        Opcode::Cast(kind_op) => {
            let from_ty = f.value_type(data.operands[0]);
            let from_kind = f.type_kind(from_ty);
            let to_kind = f.type_kind(data.ty);
            let (bits, _) = trace(f, phi, phi_bits, phi_kind, data.operands[0])?;
            Some((eval_cast(kind_op, from_kind, to_kind, bits), to_kind))
        }
        _ => None,
    }
}

/// Runs the loop symbolically for up to `MAX_ITERATIONS`, returning the
/// number of iterations whose body executes before the compare's outcome
/// flips, or `None` if it never flips within the budget.
fn simulate(
    f: &Function,
    phi: InstrId,
    lhs: ValueRef,
    rhs: ValueRef,
    pred: crate::instr::IntPredicate,
    kind: TypeKind,
    init_bits: u64,
    update_val: ValueRef,
) -> Option<usize> {
    let mut bits = init_bits;
    let mut first_outcome = None;
    for iter in 0..MAX_ITERATIONS {
        let (l, lk) = trace(f, phi, bits, kind, lhs)?;
        let (r, _) = trace(f, phi, bits, kind, rhs)?;
        let outcome = eval_compare(pred, lk, l, r);
        match first_outcome {
            None => first_outcome = Some(outcome),
            Some(first) if outcome != first => return Some(iter),
            _ => {}
        }
        let (next_bits, _) = trace(f, phi, bits, kind, update_val)?;
        bits = next_bits;
    }
    None
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
        Opcode::Load => Some(f.make_load(ops[0])),
        Opcode::Store => Some(f.make_store(ops[0], ops[1])),
        _ => None,
    }
}

fn remap_value(v: ValueRef, remap: &HashMap<InstrId, ValueRef>) -> ValueRef {
    match v {
        ValueRef::Instr(id) => remap.get(&id).copied().unwrap_or(v),
        other => other,
    }
}

#[allow(clippy::too_many_arguments)]
fn perform_unroll(
    f: &mut Function,
    header: BlockId,
    exit: BlockId,
    phi: InstrId,
    kind: TypeKind,
    init_bits: u64,
    update_val: ValueRef,
    trip_count: usize,
) {
    // Recompute each iteration's induction bits.
    let mut bits_per_iter = vec![init_bits];
    let mut bits = init_bits;
    for _ in 1..trip_count {
        let Some((next, _)) = trace(f, phi, bits, kind, update_val) else { return };
        bits_per_iter.push(next);
        bits = next;
    }

    let other_instrs: Vec<InstrId> = {
        let term = f.block(header).terminator().unwrap();
        f.block(header).instructions.iter().copied().filter(|&i| f.inst(i).opcode != Opcode::Phi && i != term).collect()
    };

    f.on_removed_branch_to(header, header, false);

    let mut blocks = vec![header];
    let mut clone_maps: Vec<HashMap<InstrId, ValueRef>> = vec![HashMap::new()];
    for i in 1..trip_count {
        let new_block = f.create_block();
        let mut remap: HashMap<InstrId, ValueRef> = HashMap::new();
        let c = f.context().borrow_mut().get_constant(f.inst(phi).ty, bits_per_iter[i]);
        remap.insert(phi, ValueRef::Const(c));
        for &inst in &other_instrs {
            let Some(cloned) = clone_instr(f, inst, &remap) else { continue };
            let new_id = f.push_back(new_block, cloned);
            remap.insert(inst, ValueRef::Instr(new_id));
        }
        blocks.push(new_block);
        clone_maps.push(remap);
    }

    let last_block = *blocks.last().unwrap();
    let last_map = clone_maps.last().unwrap().clone();

    for (i, &b) in blocks.iter().enumerate() {
        let target = if i + 1 < blocks.len() { blocks[i + 1] } else { exit };
        if i == 0 {
            let old_term = f.block(header).terminator().unwrap();
            f.destroy_instruction(old_term);
        }
        let branch = f.make_branch(target);
        f.push_back(b, branch);
    }

    if last_block != header {
        for &phi_at_exit in f.block(exit).instructions.clone().iter() {
            if f.inst(phi_at_exit).opcode != Opcode::Phi {
                continue;
            }
            let count = f.inst(phi_at_exit).phi_incoming_count();
            let mut value_from_header = None;
            for i in 0..count {
                let (blk, val) = f.inst(phi_at_exit).phi_incoming(i);
                if blk == header {
                    value_from_header = Some(val);
                }
            }
            if let Some(v) = value_from_header {
                let remapped = remap_value(v, &last_map);
                f.remove_incoming(phi_at_exit, header);
                f.add_incoming(phi_at_exit, last_block, remapped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::{BinaryOp, IntPredicate};

    #[test]
    fn unrolls_small_counted_loop() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let header = f.create_block();
        let exit = f.create_block();
        let zero = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 0));
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let limit = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 3));

        let br = f.make_branch(header);
        f.push_back(entry, br);

        let phi = f.make_phi(i32_ty, vec![(entry, zero)]);
        let phi_id = f.push_back(header, phi);
        let inc = f.make_binary(ValueRef::Instr(phi_id), BinaryOp::Add, one);
        let inc_id = f.push_back(header, inc);
        f.add_incoming(phi_id, header, ValueRef::Instr(inc_id));
        let cmp = f.make_int_compare(ValueRef::Instr(phi_id), IntPredicate::LtU, limit);
        let cmp_id = f.push_back(header, cmp);
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), header, exit);
        f.push_back(header, cbr);

        let ret = f.make_ret(None);
        f.push_back(exit, ret);

        assert!(run(&mut f));
        assert!(f.block_order().len() > 3);
    }
}
