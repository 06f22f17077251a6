//! Known-load elimination, local and global (spec.md 4.9.7): a load whose
//! value is already known -- from an earlier store or load to the same
//! address reaching it on every path, with no intervening write -- is
//! replaced by that value.

use std::collections::HashMap;

use crate::analysis::alias::{AccessMode, AliasResult, PointerAliasing};
use crate::analysis::{Dominators, PathValidator};
use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{InstrId, ValueRef};

pub fn run(f: &mut Function) -> bool {
    let aliasing = PointerAliasing::compute(f);
    let mut changed = local_pass(f, &aliasing);
    changed |= global_pass(f, &aliasing);
    changed
}

fn local_pass(f: &mut Function, aliasing: &PointerAliasing) -> bool {
    let mut dead = Vec::new();

    for &block in f.block_order().to_vec().iter() {
        let mut known: Vec<(ValueRef, ValueRef)> = Vec::new();
        for &inst in f.block(block).instructions.clone().iter() {
            match f.inst(inst).opcode {
                Opcode::Store => {
                    let addr = f.inst(inst).operands[0];
                    let value = f.inst(inst).operands[1];
                    known.retain(|&(a, _)| aliasing.can_alias(f, a, addr) == AliasResult::Never);
                    known.push((addr, value));
                }
                Opcode::Load => {
                    let addr = f.inst(inst).operands[0];
                    if let Some(&(_, value)) =
                        known.iter().find(|&&(a, _)| aliasing.can_alias(f, a, addr) == AliasResult::Always)
                    {
                        f.replace_uses(ValueRef::Instr(inst), value);
                        dead.push(inst);
                    } else {
                        known.retain(|&(a, _)| aliasing.can_alias(f, a, addr) == AliasResult::Never);
                        known.push((addr, ValueRef::Instr(inst)));
                    }
                }
                Opcode::Call => {
                    known.retain(|&(a, _)| {
                        aliasing.can_instruction_access(f, inst, a, AccessMode::Read) == AliasResult::Never
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

/// Finds a dominating Store/Load to the same address reaching `load`
/// through a write-free path.
fn global_pass(f: &mut Function, aliasing: &PointerAliasing) -> bool {
    let dominators = Dominators::compute(f);
    let validator = PathValidator::new(f, &dominators);

    let defs: Vec<(InstrId, crate::value::BlockId, usize, ValueRef, ValueRef)> = collect_defs(f);
    let mut replacements: HashMap<InstrId, ValueRef> = HashMap::new();

    for &load in f.all_instruction_ids().iter() {
        if f.inst(load).opcode != Opcode::Load {
            continue;
        }
        let load_block = f.inst(load).block;
        let load_idx = f.block(load_block).instructions.iter().position(|&i| i == load).unwrap();
        let load_addr = f.inst(load).operands[0];

        for &(def, def_block, def_idx, def_addr, def_value) in &defs {
            if def == load {
                continue;
            }
            if aliasing.can_alias(f, def_addr, load_addr) != AliasResult::Always {
                continue;
            }
            if !dominators.dominates(def_block, load_block) {
                continue;
            }
            if def_block == load_block && def_idx >= load_idx {
                continue;
            }
            if !path_is_write_free(f, aliasing, &validator, def_block, def_idx, load_block, load_idx, load_addr) {
                continue;
            }
            replacements.insert(load, def_value);
            break;
        }
    }

    if replacements.is_empty() {
        return false;
    }
    for (load, value) in replacements {
        f.replace_uses(ValueRef::Instr(load), value);
        f.destroy_instruction(load);
    }
    true
}

fn collect_defs(f: &Function) -> Vec<(InstrId, crate::value::BlockId, usize, ValueRef, ValueRef)> {
    let mut out = Vec::new();
    for &block in f.block_order() {
        for (idx, &inst) in f.block(block).instructions.iter().enumerate() {
            match f.inst(inst).opcode {
                Opcode::Store => {
                    let addr = f.inst(inst).operands[0];
                    let value = f.inst(inst).operands[1];
                    out.push((inst, block, idx, addr, value));
                }
                Opcode::Load => {
                    let addr = f.inst(inst).operands[0];
                    out.push((inst, block, idx, addr, ValueRef::Instr(inst)));
                }
                _ => {}
            }
        }
    }
    out
}

fn path_is_write_free(
    f: &Function,
    aliasing: &PointerAliasing,
    validator: &PathValidator<'_>,
    def_block: crate::value::BlockId,
    def_idx: usize,
    load_block: crate::value::BlockId,
    load_idx: usize,
    addr: ValueRef,
) -> bool {
    validator.all_blocks_between_satisfy(def_block, load_block, |b| {
        if b == def_block && b == load_block {
            !aliasing.range_may_access(f, b, def_idx + 1, load_idx, addr, AccessMode::Write)
        } else if b == def_block {
            !aliasing.range_may_access(f, b, def_idx + 1, f.block(b).instructions.len(), addr, AccessMode::Write)
        } else if b == load_block {
            !aliasing.range_may_access(f, b, 0, load_idx, addr, AccessMode::Write)
        } else {
            !aliasing.range_may_access(f, b, 0, f.block(b).instructions.len(), addr, AccessMode::Write)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn local_load_after_store_reuses_value() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let sa = f.make_stack_alloc(i32_ty, 1);
        let sa_id = f.push_back(entry, sa);
        let addr = ValueRef::Instr(sa_id);
        let val = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 7));
        let st = f.make_store(addr, val);
        f.push_back(entry, st);
        let ld = f.make_load(addr);
        let ld_id = f.push_back(entry, ld);
        let ret = f.make_ret(Some(ValueRef::Instr(ld_id)));
        let ret_id = f.push_back(entry, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(ret_id).operands[0], val);
    }

    #[test]
    fn global_load_across_dominating_block_reuses_value() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let next = f.create_block();
        let sa = f.make_stack_alloc(i32_ty, 1);
        let sa_id = f.push_back(entry, sa);
        let addr = ValueRef::Instr(sa_id);
        let val = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 9));
        let st = f.make_store(addr, val);
        f.push_back(entry, st);
        let br = f.make_branch(next);
        f.push_back(entry, br);

        let ld = f.make_load(addr);
        let ld_id = f.push_back(next, ld);
        let ret = f.make_ret(Some(ValueRef::Instr(ld_id)));
        let ret_id = f.push_back(next, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(ret_id).operands[0], val);
    }
}
