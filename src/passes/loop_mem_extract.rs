//! Loop memory extraction (spec.md 4.9.17): for a loop-invariant pointer
//! accessed unconditionally every iteration, cache it in a preheader
//! stackalloc for the loop's duration instead of touching real memory each
//! time, reloading/storing around any Call that may alias it and writing
//! the final value back on exit.
//!
//! Scoped to single-block loops, where every header instruction executes
//! unconditionally on every iteration by construction.

use std::collections::HashMap;

use crate::analysis::{AccessMode, AliasResult, Dominators, LoopForest, PointerAliasing};
use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{BlockId, InstrId, ValueRef};

pub fn run(f: &mut Function) -> bool {
    let dominators = Dominators::compute(f);
    let loops = LoopForest::compute(f, &dominators);
    let headers: Vec<BlockId> = loops.all_loops().iter().filter(|l| l.blocks.len() == 1).map(|l| l.header).collect();

    let mut changed = false;
    for header in headers {
        if process(f, header) {
            changed = true;
        }
    }
    changed
}

fn process(f: &mut Function, header: BlockId) -> bool {
    let dominators = Dominators::compute(f);
    let loops = LoopForest::compute(f, &dominators);
    let Some(lp) = loops.find_innermost(header) else { return false };
    if lp.header != header || lp.blocks.len() != 1 {
        return false;
    }
    let Some(exit) = lp.single_exit_target() else { return false };
    let Some(preheader) = lp.preheader(f) else { return false };

    let aliasing = PointerAliasing::compute(f);
    let mut counts: HashMap<ValueRef, usize> = HashMap::new();
    for &inst in f.block(header).instructions.clone().iter() {
        let data = f.inst(inst);
        let addr = match data.opcode {
            Opcode::Load => Some(data.operands[0]),
            Opcode::Store => Some(data.operands[0]),
            _ => None,
        };
        let Some(addr) = addr else { continue };
        if !is_invariant_address(f, header, addr) {
            continue;
        }
        *counts.entry(addr).or_insert(0) += 1;
    }
    let mut ordered: Vec<(ValueRef, usize)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1));

    let mut rewritten: Vec<ValueRef> = Vec::new();
    let mut changed = false;
    for (addr, _) in ordered {
        if rewritten.iter().any(|&r| aliasing.can_alias(f, addr, r) != AliasResult::Never) {
            continue;
        }
        if extract_one(f, header, exit, preheader, addr, &aliasing) {
            rewritten.push(addr);
            changed = true;
        }
    }
    changed
}

fn is_invariant_address(f: &Function, header: BlockId, addr: ValueRef) -> bool {
    match addr {
        ValueRef::Instr(id) => f.inst(id).block != header,
        ValueRef::Param(_) | ValueRef::Const(_) | ValueRef::Func(_) => true,
        _ => false,
    }
}

fn extract_one(f: &mut Function, header: BlockId, exit: BlockId, preheader: BlockId, addr: ValueRef, aliasing: &PointerAliasing) -> bool {
    let Some(ty) = value_type_for(f, header, addr) else { return false };

    let slot = f.make_stack_alloc(ty, 1);
    let slot_id = match f.block(preheader).instructions.first().copied() {
        Some(first) => f.insert_before(first, slot),
        None => f.push_back(preheader, slot),
    };
    let slot_addr = ValueRef::Instr(slot_id);

    let preheader_term = f.block(preheader).terminator().expect("preheader has a terminator");
    let initial_load = f.make_load(addr);
    let initial_load_id = f.insert_before(preheader_term, initial_load);
    let initial_store = f.make_store(slot_addr, ValueRef::Instr(initial_load_id));
    f.insert_before(preheader_term, initial_store);

    for &inst in f.block(header).instructions.clone().iter() {
        let opcode = f.inst(inst).opcode;
        match opcode {
            Opcode::Load if f.inst(inst).operands[0] == addr => {
                f.set_operand(inst, 0, slot_addr);
            }
            Opcode::Store if f.inst(inst).operands[0] == addr => {
                f.set_operand(inst, 0, slot_addr);
            }
            Opcode::Call => {
                let reads = aliasing.can_instruction_access(f, inst, addr, AccessMode::Read) != AliasResult::Never;
                let writes = aliasing.can_instruction_access(f, inst, addr, AccessMode::Write) != AliasResult::Never;
                if reads || writes {
                    let cached = f.make_load(slot_addr);
                    let cached_id = f.insert_before(inst, cached);
                    let writeback = f.make_store(addr, ValueRef::Instr(cached_id));
                    f.insert_before(inst, writeback);

                    let next: Option<InstrId> = f.block(header).instructions.iter().copied().skip_while(|&i| i != inst).nth(1);
                    let reload = f.make_load(addr);
                    let reload_id = match next {
                        Some(n) => f.insert_before(n, reload),
                        None => f.push_back(header, reload),
                    };
                    let recache = f.make_store(slot_addr, ValueRef::Instr(reload_id));
                    match next {
                        Some(n) => {
                            f.insert_before(n, recache);
                        }
                        None => {
                            f.push_back(header, recache);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let term = f.block(header).terminator().expect("header has a terminator");
    if f.inst(term).opcode == Opcode::CondBranch {
        let targets = f.inst(term).targets();
        let exit_idx = if targets[0] == exit {
            Some(1)
        } else if targets[1] == exit {
            Some(2)
        } else {
            None
        };
        let Some(operand_idx) = exit_idx else { return true };

        let stub = f.create_block();
        let final_load = f.make_load(slot_addr);
        let final_load_id = f.push_back(stub, final_load);
        let final_store = f.make_store(addr, ValueRef::Instr(final_load_id));
        f.push_back(stub, final_store);
        let branch = f.make_branch(exit);
        f.push_back(stub, branch);

        f.set_operand(term, operand_idx, ValueRef::Block(stub));
        for &phi in f.block(exit).instructions.clone().iter() {
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
                f.remove_incoming(phi, header);
                f.add_incoming(phi, stub, v);
            }
        }
    }
    true
}

fn value_type_for(f: &Function, header: BlockId, addr: ValueRef) -> Option<crate::types::TypeId> {
    for &inst in &f.block(header).instructions {
        let data = f.inst(inst);
        match data.opcode {
            Opcode::Load if data.operands[0] == addr => return Some(data.ty),
            Opcode::Store if data.operands[0] == addr => return Some(f.value_type(data.operands[1])),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::{BinaryOp, IntPredicate};

    #[test]
    fn extracts_invariant_pointer_into_preheader_slot() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let ptr_ty = ctx.borrow_mut().pointer_type(i32_ty, 1);
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[ptr_ty]);
        let entry = f.create_block();
        let header = f.create_block();
        let exit = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let zero = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 0));
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let limit = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 10));

        let br = f.make_branch(header);
        f.push_back(entry, br);

        let phi = f.make_phi(i32_ty, vec![(entry, zero)]);
        let phi_id = f.push_back(header, phi);
        let load = f.make_load(p0);
        let load_id = f.push_back(header, load);
        let add = f.make_binary(ValueRef::Instr(load_id), BinaryOp::Add, one);
        let add_id = f.push_back(header, add);
        let store = f.make_store(p0, ValueRef::Instr(add_id));
        f.push_back(header, store);
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
        assert!(f.block(header).instructions.iter().all(|&i| {
            let d = f.inst(i);
            !matches!(d.opcode, Opcode::Load | Opcode::Store) || d.operands[0] != p0
        }));
    }
}
