//! Dead store elimination, block-local (spec.md 4.9.6): a store overwritten
//! by a later store to the same address, with no intervening read, is
//! removed.

use crate::analysis::alias::{AccessMode, AliasResult, PointerAliasing};
use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{InstrId, ValueRef};

pub fn run(f: &mut Function) -> bool {
    let aliasing = PointerAliasing::compute(f);
    let mut dead = Vec::new();

    for &block in f.block_order().to_vec().iter() {
        let mut candidates: Vec<(InstrId, ValueRef)> = Vec::new();
        for &inst in f.block(block).instructions.clone().iter() {
            match f.inst(inst).opcode {
                Opcode::Store => {
                    let addr = f.inst(inst).operands[0];
                    let mut kept = Vec::new();
                    for (prev, prev_addr) in candidates.drain(..) {
                        match aliasing.can_alias(f, prev_addr, addr) {
                            AliasResult::Always => dead.push(prev),
                            AliasResult::Never => kept.push((prev, prev_addr)),
                            AliasResult::May => {}
                        }
                    }
                    candidates = kept;
                    candidates.push((inst, addr));
                }
                Opcode::Load | Opcode::Call => {
                    candidates.retain(|&(prev, prev_addr)| {
                        aliasing.can_instruction_access(f, inst, prev_addr, AccessMode::Read) == AliasResult::Never
                    });
                }
                _ => {}
            }
        }
    }

    if dead.is_empty() {
        return false;
    }
    for id in dead {
        f.destroy_instruction(id);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn kills_overwritten_store() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let sa = f.make_stack_alloc(i32_ty, 1);
        let sa_id = f.push_back(entry, sa);
        let addr = ValueRef::Instr(sa_id);
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let two = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 2));
        let st1 = f.make_store(addr, one);
        let st1_id = f.push_back(entry, st1);
        let st2 = f.make_store(addr, two);
        f.push_back(entry, st2);
        let ret = f.make_ret(None);
        f.push_back(entry, ret);

        assert!(run(&mut f));
        assert!(!f.block(entry).instructions.contains(&st1_id));
    }

    #[test]
    fn keeps_store_read_in_between() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let sa = f.make_stack_alloc(i32_ty, 1);
        let sa_id = f.push_back(entry, sa);
        let addr = ValueRef::Instr(sa_id);
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let two = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 2));
        let st1 = f.make_store(addr, one);
        let st1_id = f.push_back(entry, st1);
        let load = f.make_load(addr);
        let load_id = f.push_back(entry, load);
        let st2 = f.make_store(addr, two);
        f.push_back(entry, st2);
        let ret = f.make_ret(Some(ValueRef::Instr(load_id)));
        f.push_back(entry, ret);

        assert!(!run(&mut f));
        assert!(f.block(entry).instructions.contains(&st1_id));
    }
}
