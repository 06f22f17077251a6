//! Memory-to-SSA promotion (spec.md 4.9.9): a `StackAlloc` used only as the
//! address of Loads and Stores, whose address never escapes, is promoted
//! to SSA values with Phi nodes at join points (Cytron et al.).

use std::collections::{HashMap, HashSet};

use crate::analysis::{Dominators, PointerAliasing};
use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{BlockId, InstrId, ValueRef};

pub fn run(f: &mut Function) -> bool {
    let aliasing = PointerAliasing::compute(f);
    let allocs: Vec<InstrId> = f
        .all_instruction_ids()
        .into_iter()
        .filter(|&id| f.inst(id).opcode == Opcode::StackAlloc && f.inst(id).stackalloc_size == 1)
        .filter(|&id| is_promotable(f, &aliasing, id))
        .collect();

    if allocs.is_empty() {
        return false;
    }

    let dominators = Dominators::compute(f);
    let children = dominator_children(f, &dominators);

    for alloc in allocs {
        promote(f, &dominators, &children, alloc);
    }
    true
}

fn is_promotable(f: &Function, aliasing: &PointerAliasing, alloc: InstrId) -> bool {
    if !aliasing.is_safe(ValueRef::Instr(alloc)) {
        return false;
    }
    f.inst(alloc).uses.iter().all(|u| {
        let data = f.inst(u.user);
        match data.opcode {
            Opcode::Load => u.operand_index == 0,
            Opcode::Store => u.operand_index == 0,
            _ => false,
        }
    })
}

fn dominator_children(f: &Function, dominators: &Dominators) -> HashMap<BlockId, Vec<BlockId>> {
    let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for &b in f.block_order() {
        if let Some(idom) = dominators.immediate_dominator(b) {
            children.entry(idom).or_default().push(b);
        }
    }
    children
}

/// Cytron et al.'s dominance frontier: for each block with >=2 CFG
/// predecessors, walk each predecessor up the idom chain to (not including)
/// the block's own idom, adding the block to every runner's frontier.
fn dominance_frontier(f: &Function, dominators: &Dominators) -> HashMap<BlockId, HashSet<BlockId>> {
    let mut df: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for &b in f.block_order() {
        let preds = f.predecessors(b);
        if preds.len() < 2 {
            continue;
        }
        let Some(idom_b) = dominators.immediate_dominator(b) else { continue };
        for p in preds {
            let mut runner = p;
            while runner != idom_b {
                df.entry(runner).or_default().insert(b);
                let Some(next) = dominators.immediate_dominator(runner) else { break };
                runner = next;
            }
        }
    }
    df
}

fn promote(f: &mut Function, dominators: &Dominators, children: &HashMap<BlockId, Vec<BlockId>>, alloc: InstrId) {
    let elem_ty = f.context().borrow_mut().deref_pointer(f.inst(alloc).ty);

    let def_blocks: HashSet<BlockId> = f
        .inst(alloc)
        .uses
        .iter()
        .filter(|u| f.inst(u.user).opcode == Opcode::Store)
        .map(|u| f.inst(u.user).block)
        .collect();
    if def_blocks.is_empty() {
        remove_dead_alloc(f, alloc);
        return;
    }

    let df = dominance_frontier(f, dominators);
    let mut phi_blocks: HashSet<BlockId> = HashSet::new();
    let mut worklist: Vec<BlockId> = def_blocks.into_iter().collect();
    while let Some(b) = worklist.pop() {
        if let Some(frontier) = df.get(&b) {
            for &fb in frontier {
                if phi_blocks.insert(fb) {
                    worklist.push(fb);
                }
            }
        }
    }

    let mut phi_for_block: HashMap<BlockId, InstrId> = HashMap::new();
    for &b in &phi_blocks {
        let phi = f.make_phi(elem_ty, Vec::new());
        let id = insert_at_front(f, b, phi);
        phi_for_block.insert(b, id);
    }

    let entry = dominators.entry();
    let undef_value = ValueRef::Undef(f.context().borrow_mut().get_undef(elem_ty));
    rename(f, entry, children, alloc, &phi_for_block, undef_value);

    for &b in &phi_blocks {
        let phi = phi_for_block[&b];
        if f.phi_is_empty(phi) && f.inst(phi).uses.is_empty() {
            f.destroy_instruction(phi);
        }
    }

    remove_dead_alloc(f, alloc);
}

fn rename(
    f: &mut Function,
    block: BlockId,
    children: &HashMap<BlockId, Vec<BlockId>>,
    alloc: InstrId,
    phi_for_block: &HashMap<BlockId, InstrId>,
    mut current: ValueRef,
) {
    if let Some(&phi) = phi_for_block.get(&block) {
        current = ValueRef::Instr(phi);
    }

    let mut dead = Vec::new();
    for &inst in f.block(block).instructions.clone().iter() {
        let data = f.inst(inst);
        if data.opcode == Opcode::Load && data.operands[0] == ValueRef::Instr(alloc) {
            f.replace_uses(ValueRef::Instr(inst), current);
            dead.push(inst);
        } else if data.opcode == Opcode::Store && data.operands[0] == ValueRef::Instr(alloc) {
            current = data.operands[1];
            dead.push(inst);
        }
    }
    for inst in dead {
        f.destroy_instruction(inst);
    }

    for s in f.successors(block) {
        if let Some(&phi) = phi_for_block.get(&s) {
            f.add_incoming(phi, block, current);
        }
    }

    if let Some(kids) = children.get(&block) {
        for &kid in &kids.clone() {
            rename(f, kid, children, alloc, phi_for_block, current);
        }
    }
}

fn insert_at_front(f: &mut Function, block: BlockId, phi: crate::instr::InstData) -> InstrId {
    match f.block(block).instructions.first().copied() {
        Some(first) => f.insert_before(first, phi),
        None => f.push_back(block, phi),
    }
}

fn remove_dead_alloc(f: &mut Function, alloc: InstrId) {
    if f.inst(alloc).uses.is_empty() {
        f.destroy_instruction(alloc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn promotes_straight_line_alloc() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let sa = f.make_stack_alloc(i32_ty, 1);
        let sa_id = f.push_back(entry, sa);
        let addr = ValueRef::Instr(sa_id);
        let st = f.make_store(addr, p0);
        f.push_back(entry, st);
        let ld = f.make_load(addr);
        let ld_id = f.push_back(entry, ld);
        let ret = f.make_ret(Some(ValueRef::Instr(ld_id)));
        let ret_id = f.push_back(entry, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(ret_id).operands[0], p0);
    }

    #[test]
    fn promotes_across_diamond_with_phi() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let t = f.create_block();
        let e = f.create_block();
        let join = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));

        let sa = f.make_stack_alloc(i32_ty, 1);
        let sa_id = f.push_back(entry, sa);
        let addr = ValueRef::Instr(sa_id);
        let cmp = f.make_int_compare(p0, crate::instr::IntPredicate::Equal, p0);
        let cmp_id = f.push_back(entry, cmp);
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), t, e);
        f.push_back(entry, cbr);

        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let two = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 2));
        let st_t = f.make_store(addr, one);
        f.push_back(t, st_t);
        let br_t = f.make_branch(join);
        f.push_back(t, br_t);
        let st_e = f.make_store(addr, two);
        f.push_back(e, st_e);
        let br_e = f.make_branch(join);
        f.push_back(e, br_e);

        let ld = f.make_load(addr);
        let ld_id = f.push_back(join, ld);
        let ret = f.make_ret(Some(ValueRef::Instr(ld_id)));
        let ret_id = f.push_back(join, ret);

        assert!(run(&mut f));
        let value = f.inst(ret_id).operands[0];
        assert!(matches!(value, ValueRef::Instr(_)));
    }
}
