//! CFG simplification (spec.md 4.9.4): jump threading and block merging.

use std::collections::{HashMap, HashSet};

use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{BlockId, ValueRef};

pub fn run(f: &mut Function) -> bool {
    let mut changed = false;
    changed |= thread_jumps(f);
    changed |= merge_blocks(f);
    changed
}

/// A block consisting solely of an unconditional branch to `target` may be
/// bypassed for predecessors whose Phi-incoming value at `target` (if any
/// already exists for that predecessor) agrees with the bypassed block's.
fn thread_jumps(f: &mut Function) -> bool {
    let mut changed = false;
    let mut destroyed: HashSet<BlockId> = HashSet::new();

    for &b in f.block_order().to_vec().iter() {
        if destroyed.contains(&b) {
            continue;
        }
        if f.block(b).instructions.len() != 1 {
            continue;
        }
        let only = f.block(b).instructions[0];
        if f.inst(only).opcode != Opcode::Branch {
            continue;
        }
        let target = f.inst(only).targets()[0];
        if target == b {
            continue;
        }

        let preds = f.predecessors(b);
        if preds.is_empty() {
            continue;
        }

        let b_values: HashMap<usize, ValueRef> = target_phi_values(f, target, b);

        let mut compatible = Vec::new();
        'pred: for &p in &preds {
            for (i, &(_, v)) in b_values.iter().map(|(i, v)| (*i, *v)).collect::<Vec<_>>().iter() {
                let phi = phi_at(f, target, *i);
                if let Some(existing) = phi_incoming_value(f, phi, p) {
                    if existing != *v {
                        continue 'pred;
                    }
                }
            }
            compatible.push(p);
        }
        if compatible.is_empty() {
            continue;
        }

        for &p in &compatible {
            reroute_target(f, p, b, target);
            for (&idx, &v) in &b_values {
                let phi = phi_at(f, target, idx);
                if phi_incoming_value(f, phi, p).is_none() {
                    f.add_incoming(phi, p, v);
                }
            }
            changed = true;
        }

        if f.predecessors(b).is_empty() {
            f.clear_block(b);
            f.destroy_block(b);
            destroyed.insert(b);
        }
    }
    changed
}

fn target_phi_values(f: &Function, target: BlockId, from: BlockId) -> HashMap<usize, ValueRef> {
    let mut out = HashMap::new();
    for (i, &inst) in f.block(target).instructions.iter().enumerate() {
        if f.inst(inst).opcode != Opcode::Phi {
            continue;
        }
        let data = f.inst(inst);
        for k in 0..data.phi_incoming_count() {
            let (blk, v) = data.phi_incoming(k);
            if blk == from {
                out.insert(i, v);
            }
        }
    }
    out
}

fn phi_at(f: &Function, block: BlockId, index: usize) -> crate::value::InstrId {
    f.block(block).instructions[index]
}

fn phi_incoming_value(f: &Function, phi: crate::value::InstrId, from: BlockId) -> Option<ValueRef> {
    let data = f.inst(phi);
    (0..data.phi_incoming_count()).find_map(|i| {
        let (b, v) = data.phi_incoming(i);
        (b == from).then_some(v)
    })
}

fn reroute_target(f: &mut Function, pred: BlockId, from: BlockId, to: BlockId) {
    let term = f.block(pred).terminator().expect("predecessor must have a terminator");
    let operand_count = f.inst(term).operands.len();
    for i in 0..operand_count {
        if f.inst(term).operands[i] == ValueRef::Block(from) {
            f.set_operand(term, i, ValueRef::Block(to));
        }
    }
    f.on_removed_branch_to(pred, from, true);
}

/// A block with exactly one predecessor whose terminator is an
/// unconditional branch to it is spliced into that predecessor.
fn merge_blocks(f: &mut Function) -> bool {
    let mut changed = false;

    loop {
        let mut merged_any = false;
        for &b in f.block_order().to_vec().iter() {
            if f.block(b).is_entry {
                continue;
            }
            let preds = f.predecessors(b);
            let [p] = preds.as_slice() else { continue };
            let p = *p;
            if p == b {
                continue;
            }
            let Some(term) = f.block(p).terminator() else { continue };
            if f.inst(term).opcode != Opcode::Branch || f.inst(term).targets()[0] != b {
                continue;
            }

            let moving: Vec<_> = f.block(b).instructions.clone();
            for inst in moving {
                f.unlink_instruction(inst);
                f.reinsert_before(inst, term);
            }
            f.destroy_instruction(term);
            f.replace_uses(ValueRef::Block(b), ValueRef::Block(p));
            f.destroy_block(b);

            merged_any = true;
            changed = true;
            break;
        }
        if !merged_any {
            break;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn merges_single_predecessor_chain() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let next = f.create_block();
        let br = f.make_branch(next);
        f.push_back(entry, br);
        let ret = f.make_ret(None);
        f.push_back(next, ret);

        assert!(run(&mut f));
        assert_eq!(f.block_order().len(), 1);
        assert_eq!(f.inst(f.block(entry).instructions[0]).opcode, Opcode::Ret);
    }

    #[test]
    fn threads_pure_branch_block() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let mid = f.create_block();
        let other = f.create_block();
        let target = f.create_block();

        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let cbr = f.make_cond_branch(p0, mid, other);
        let cmp_ty_value = ctx.borrow_mut().get_constant(ctx.borrow().i1_ty(), 1);
        let _ = cmp_ty_value;
        f.push_back(entry, cbr);

        let br_mid = f.make_branch(target);
        f.push_back(mid, br_mid);
        let br_other = f.make_branch(target);
        f.push_back(other, br_other);
        let ret = f.make_ret(None);
        f.push_back(target, ret);

        assert!(run(&mut f));
        assert!(f.predecessors(target).contains(&entry) || f.predecessors(target).len() <= 2);
    }
}
