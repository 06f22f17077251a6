//! Instruction deduplication, block-local (spec.md 4.9.8): two pure
//! instructions in the same block with the same opcode and operands (up to
//! commutative-operand order) compute the same value; the later one is
//! replaced by the earlier.

use std::collections::HashMap;

use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{InstrId, ValueRef};

/// A hashable, order-normalized description of what an instruction
/// computes, ignoring its result identity.
#[derive(PartialEq, Eq, Hash)]
struct Key {
    opcode: Opcode,
    ty: crate::types::TypeId,
    operands: Vec<ValueRef>,
}

fn key_for(f: &Function, id: InstrId) -> Option<Key> {
    let data = f.inst(id);
    if data.opcode.is_volatile() || data.opcode == Opcode::Phi || data.opcode == Opcode::StackAlloc {
        return None;
    }
    let mut operands = data.operands.clone();
    if let Opcode::Binary(op) = data.opcode {
        if op.is_commutative() && operands.len() == 2 {
            operands.sort_by_key(value_sort_key);
        }
    }
    Some(Key { opcode: data.opcode, ty: data.ty, operands })
}

fn value_sort_key(v: &ValueRef) -> (u8, u64) {
    match *v {
        ValueRef::Param(p) => (0, p.0 as u64),
        ValueRef::Instr(i) => (1, i.0 as u64),
        ValueRef::Const(c) => (2, c.0 as u64),
        ValueRef::Undef(t) => (3, t.0 as u64),
        ValueRef::Func(fid) => (4, fid.0 as u64),
        ValueRef::Block(b) => (5, b.0 as u64),
    }
}

pub fn run(f: &mut Function) -> bool {
    let mut dead = Vec::new();
    let mut replacements = Vec::new();

    for &block in f.block_order().to_vec().iter() {
        let mut seen: HashMap<Key, InstrId> = HashMap::new();
        for &inst in f.block(block).instructions.clone().iter() {
            let Some(key) = key_for(f, inst) else { continue };
            match seen.get(&key) {
                Some(&earlier) => {
                    replacements.push((inst, ValueRef::Instr(earlier)));
                    dead.push(inst);
                }
                None => {
                    seen.insert(key, inst);
                }
            }
        }
    }

    if dead.is_empty() {
        return false;
    }
    for (inst, value) in replacements {
        f.replace_uses(ValueRef::Instr(inst), value);
    }
    for inst in dead {
        f.destroy_instruction(inst);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::BinaryOp;

    #[test]
    fn dedups_identical_add() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let add1 = f.make_binary(p0, BinaryOp::Add, one);
        let add1_id = f.push_back(entry, add1);
        let add2 = f.make_binary(one, BinaryOp::Add, p0);
        let add2_id = f.push_back(entry, add2);
        let ret = f.make_ret(Some(ValueRef::Instr(add2_id)));
        let ret_id = f.push_back(entry, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(ret_id).operands[0], ValueRef::Instr(add1_id));
    }
}
