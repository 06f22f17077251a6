//! Call inlining (spec.md 4.9.19): split the call's block at the call,
//! clone the callee's blocks and instructions into the caller, remap
//! parameters to arguments, rewrite callee `Ret`s into branches to the
//! split continuation (merged with a Phi if more than one block returns
//! a value), and remove the original call.
//!
//! Operates at module scope, since a single function's `&mut` borrow
//! can't simultaneously read a callee and mutate a caller. Self-calls
//! and calls into a function that (transitively, through one level)
//! calls back into the caller are left alone to avoid inlining
//! recursion; so is any callee over `MAX_CALLEE_BLOCKS` blocks.

use std::collections::HashMap;

use crate::function::{FuncId, Function};
use crate::instr::{InstData, Opcode};
use crate::module::Module;
use crate::value::{BlockId, InstrId, ParamId, ValueRef};

const MAX_CALLEE_BLOCKS: usize = 32;
const MAX_INLINES: usize = 256;

pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    let mut budget = MAX_INLINES;
    while budget > 0 {
        budget -= 1;
        let Some((caller, call_id, callee)) = find_candidate(module) else { break };
        inline_one(module, caller, callee, call_id);
        changed = true;
    }
    changed
}

fn find_candidate(module: &Module) -> Option<(FuncId, InstrId, FuncId)> {
    for caller in module.local_function_ids() {
        let f = module.function(caller);
        for &block in f.block_order() {
            for &inst in &f.block(block).instructions {
                let data = f.inst(inst);
                if data.opcode != Opcode::Call {
                    continue;
                }
                let Some(callee) = data.callee() else { continue };
                if callee == caller {
                    continue;
                }
                if module.function(callee).is_extern() {
                    continue;
                }
                let callee_f = module.function(callee);
                if callee_f.block_order().len() > MAX_CALLEE_BLOCKS {
                    continue;
                }
                if calls_function(callee_f, caller) {
                    continue;
                }
                return Some((caller, inst, callee));
            }
        }
    }
    None
}

fn calls_function(f: &Function, target: FuncId) -> bool {
    for &block in f.block_order() {
        for &inst in &f.block(block).instructions {
            if f.inst(inst).callee() == Some(target) {
                return true;
            }
        }
    }
    false
}

/// A callee instruction cloned ahead of time, read-only, before any
/// caller mutation starts.
struct ClonedBlock {
    phis: Vec<(InstrId, InstData)>,
    body: Vec<(InstrId, InstData)>,
    terminator: (InstrId, InstData),
}

fn inline_one(module: &mut Module, caller: FuncId, callee: FuncId, call_id: InstrId) {
    let (param_types, blocks, entry) = {
        let callee_f = module.function(callee);
        let param_types: Vec<_> = callee_f.param_ids().map(|p| callee_f.param(p).ty).collect();
        let mut blocks = Vec::new();
        for &b in callee_f.block_order() {
            let mut phis = Vec::new();
            let mut body = Vec::new();
            let mut terminator = None;
            for &inst in &callee_f.block(b).instructions {
                let data = callee_f.inst(inst).clone();
                if data.opcode == Opcode::Phi {
                    phis.push((inst, data));
                } else if data.opcode.is_terminator() {
                    terminator = Some((inst, data));
                } else {
                    body.push((inst, data));
                }
            }
            blocks.push((b, ClonedBlock { phis, body, terminator: terminator.expect("block has a terminator") }));
        }
        let entry = callee_f.entry_block().expect("callee has an entry block");
        (param_types, blocks, entry)
    };

    let f = module.function_mut(caller);
    let call_block = f.inst(call_id).block;
    let call_ty = f.inst(call_id).ty;
    let is_void = f.type_kind(call_ty).is_void();
    let arguments: Vec<ValueRef> = f.inst(call_id).arguments().to_vec();

    let mut param_map: HashMap<ParamId, ValueRef> = HashMap::new();
    for (i, _) in param_types.iter().enumerate() {
        param_map.insert(ParamId(i as u32), arguments[i]);
    }

    // Split call_block: everything at and after the call moves into a
    // fresh continuation block, anchored behind a throwaway branch so
    // `reinsert_before` has something to target in the still-empty block.
    let cont = f.create_block();
    let placeholder_data = f.make_branch(cont);
    let placeholder = f.push_back(cont, placeholder_data);
    let tail: Vec<InstrId> = {
        let insts = &f.block(call_block).instructions;
        let pos = insts.iter().position(|&i| i == call_id).unwrap();
        insts[pos..].to_vec()
    };
    for &inst in &tail {
        f.unlink_instruction(inst);
        f.reinsert_before(inst, placeholder);
    }
    f.unlink_instruction(placeholder);
    f.destroy_instruction(placeholder);

    // `call_id` itself moved into `cont` as part of the tail; its uses
    // are replaced and it is destroyed once the merged return value is
    // known, at the end of this function.

    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    block_map.insert(entry, call_block);
    for &(b, _) in &blocks {
        if b == entry {
            continue;
        }
        block_map.insert(b, f.create_block());
    }

    let mut value_map: HashMap<InstrId, ValueRef> = HashMap::new();

    // Pass 1: phis (empty incoming for now -- filled once every value is
    // mapped) and ordinary body instructions, in callee block order.
    for &(b, ref cb) in &blocks {
        let target = block_map[&b];
        for &(old_id, ref data) in &cb.phis {
            let phi = f.make_phi(data.ty, Vec::new());
            let new_id = f.push_back(target, phi);
            value_map.insert(old_id, ValueRef::Instr(new_id));
        }
        for &(old_id, ref data) in &cb.body {
            let remapped = remap_instr(f, data, &param_map, &value_map, &block_map);
            let new_id = f.push_back(target, remapped);
            value_map.insert(old_id, ValueRef::Instr(new_id));
        }
    }

    // Pass 2: phi incoming pairs, now that every callee value has a home.
    for &(b, ref cb) in &blocks {
        let target = block_map[&b];
        for &(old_id, ref data) in &cb.phis {
            let new_id = match value_map[&old_id] {
                ValueRef::Instr(id) => id,
                _ => unreachable!(),
            };
            let count = data.operands.len() / 2;
            for k in 0..count {
                let old_block = data.operands[k * 2].as_block().unwrap();
                let old_value = data.operands[k * 2 + 1];
                let new_block = block_map[&old_block];
                let new_value = remap_value(old_value, &param_map, &value_map);
                f.add_incoming(new_id, new_block, new_value);
            }
        }
    }

    // Pass 3: terminators. Branch/CondBranch remap targets through
    // `block_map`; Ret becomes a branch to `cont`, recording the
    // returned value (if any) for the merge Phi.
    let mut returns: Vec<(BlockId, ValueRef)> = Vec::new();
    for &(b, ref cb) in &blocks {
        let target = block_map[&b];
        let (_, ref data) = cb.terminator;
        match data.opcode {
            Opcode::Branch => {
                let dest = block_map[&data.operands[0].as_block().unwrap()];
                let br = f.make_branch(dest);
                f.push_back(target, br);
            }
            Opcode::CondBranch => {
                let cond = remap_value(data.operands[0], &param_map, &value_map);
                let t = block_map[&data.operands[1].as_block().unwrap()];
                let e = block_map[&data.operands[2].as_block().unwrap()];
                let cbr = f.make_cond_branch(cond, t, e);
                f.push_back(target, cbr);
            }
            Opcode::Ret => {
                if let Some(&v) = data.operands.first() {
                    let remapped = remap_value(v, &param_map, &value_map);
                    returns.push((target, remapped));
                }
                let br = f.make_branch(cont);
                f.push_back(target, br);
            }
            _ => unreachable!("callee terminator must be Branch, CondBranch, or Ret"),
        }
    }

    let final_value = if is_void {
        None
    } else if returns.len() == 1 {
        Some(returns[0].1)
    } else if returns.is_empty() {
        None
    } else {
        let ty = f.inst(call_id).ty;
        let phi = f.make_phi(ty, Vec::new());
        let first = f.block(cont).instructions[0];
        let phi_id = f.insert_before(first, phi);
        for &(block, value) in &returns {
            f.add_incoming(phi_id, block, value);
        }
        Some(ValueRef::Instr(phi_id))
    };

    if let Some(v) = final_value {
        f.replace_uses(ValueRef::Instr(call_id), v);
    }
    f.destroy_instruction(call_id);
}

fn remap_value(v: ValueRef, param_map: &HashMap<ParamId, ValueRef>, value_map: &HashMap<InstrId, ValueRef>) -> ValueRef {
    match v {
        ValueRef::Param(p) => param_map.get(&p).copied().unwrap_or(v),
        ValueRef::Instr(i) => value_map.get(&i).copied().unwrap_or(v),
        other => other,
    }
}

fn remap_instr(
    f: &mut Function,
    data: &InstData,
    param_map: &HashMap<ParamId, ValueRef>,
    value_map: &HashMap<InstrId, ValueRef>,
    block_map: &HashMap<BlockId, BlockId>,
) -> InstData {
    let ops: Vec<ValueRef> = data.operands.iter().map(|&o| remap_value(o, param_map, value_map)).collect();
    match data.opcode {
        Opcode::Unary(op) => f.make_unary(op, ops[0]),
        Opcode::Binary(op) => f.make_binary(ops[0], op, ops[1]),
        Opcode::IntCompare(pred) => f.make_int_compare(ops[0], pred, ops[1]),
        Opcode::Cast(kind) => f.make_cast(kind, ops[0], data.ty),
        Opcode::Offset => f.make_offset(ops[0], ops[1]),
        Opcode::Select => f.make_select(ops[0], ops[1], ops[2]),
        Opcode::Load => f.make_load(ops[0]),
        Opcode::Store => f.make_store(ops[0], ops[1]),
        Opcode::StackAlloc => {
            let element_ty = f.context().borrow_mut().deref_pointer(data.ty);
            f.make_stack_alloc(element_ty, data.stackalloc_size)
        }
        Opcode::Call => {
            let callee = data.callee().expect("call instruction has a callee");
            f.make_call(callee, data.ty, ops[1..].to_vec())
        }
        _ => unreachable!("{:?} is a terminator or phi, handled separately", data.opcode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::BinaryOp;

    #[test]
    fn inlines_single_block_callee() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut m = Module::new(ctx.clone());

        let callee = m.create_function("add_one", i32_ty, &[i32_ty]).unwrap();
        {
            let f = m.function_mut(callee);
            let entry = f.create_block();
            let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
            let p0 = ValueRef::Param(ParamId(0));
            let add = f.make_binary(p0, BinaryOp::Add, one);
            let add_id = f.push_back(entry, add);
            let ret = f.make_ret(Some(ValueRef::Instr(add_id)));
            f.push_back(entry, ret);
        }

        let caller = m.create_function("main", i32_ty, &[i32_ty]).unwrap();
        let call_id;
        {
            let f = m.function_mut(caller);
            let entry = f.create_block();
            let p0 = ValueRef::Param(ParamId(0));
            let call = f.make_call(callee, i32_ty, vec![p0]);
            call_id = f.push_back(entry, call);
            let ret = f.make_ret(Some(ValueRef::Instr(call_id)));
            f.push_back(entry, ret);
        }
        let _ = call_id;

        assert!(run(&mut m));
        let f = m.function(caller);
        assert_eq!(f.block_order().len(), 2);
        for &b in f.block_order() {
            for &inst in &f.block(b).instructions {
                assert_ne!(f.inst(inst).opcode, Opcode::Call);
            }
        }
    }

    #[test]
    fn does_not_inline_self_recursive_calls() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut m = Module::new(ctx.clone());
        let f_id = m.create_function("f", i32_ty, &[i32_ty]).unwrap();
        {
            let f = m.function_mut(f_id);
            let entry = f.create_block();
            let p0 = ValueRef::Param(ParamId(0));
            let call = f.make_call(f_id, i32_ty, vec![p0]);
            let call_id = f.push_back(entry, call);
            let ret = f.make_ret(Some(ValueRef::Instr(call_id)));
            f.push_back(entry, ret);
        }
        assert!(!run(&mut m));
    }
}
