//! Constant propagation (spec.md 4.9.1): evaluate arithmetic, compares,
//! selects, and casts over constant operands; rewrite a `CondBranch` with a
//! constant condition into an unconditional `Branch`.

use crate::function::Function;
use crate::instr::{BinaryOp, CastKind, IntPredicate, Opcode, UnaryOp};
use crate::types::TypeKind;
use crate::value::{InstrId, ValueRef};

pub(crate) fn as_const_bits(f: &Function, v: ValueRef) -> Option<(u64, TypeKind)> {
    match v {
        ValueRef::Const(c) => {
            let data = f.context().borrow().constant_data(c);
            Some((data.bits, f.context().borrow().type_kind(data.ty)))
        }
        _ => None,
    }
}

pub(crate) fn eval_unary(op: UnaryOp, kind: TypeKind, bits: u64) -> u64 {
    let mask = kind.bit_mask();
    match op {
        UnaryOp::Neg => (0u64.wrapping_sub(bits)) & mask,
        UnaryOp::Not => (!bits) & mask,
    }
}

pub(crate) fn sign_extend_to_i64(bits: u64, kind: TypeKind) -> i64 {
    let width = kind.bit_size();
    if width == 64 {
        bits as i64
    } else {
        let sign_bit = 1u64 << (width - 1);
        if bits & sign_bit != 0 {
            (bits | !kind.bit_mask()) as i64
        } else {
            bits as i64
        }
    }
}

pub(crate) fn eval_binary(op: BinaryOp, kind: TypeKind, lhs: u64, rhs: u64) -> Option<u64> {
    let mask = kind.bit_mask();
    let signed_result = |v: i64| (v as u64) & mask;
    Some(match op {
        BinaryOp::Add => lhs.wrapping_add(rhs) & mask,
        BinaryOp::Sub => lhs.wrapping_sub(rhs) & mask,
        BinaryOp::Mul => lhs.wrapping_mul(rhs) & mask,
        BinaryOp::DivU => {
            if rhs == 0 {
                return None;
            }
            (lhs / rhs) & mask
        }
        BinaryOp::DivS => {
            let (a, b) = (sign_extend_to_i64(lhs, kind), sign_extend_to_i64(rhs, kind));
            if b == 0 {
                return None;
            }
            signed_result(a.wrapping_div(b))
        }
        BinaryOp::ModU => {
            if rhs == 0 {
                return None;
            }
            (lhs % rhs) & mask
        }
        BinaryOp::ModS => {
            let (a, b) = (sign_extend_to_i64(lhs, kind), sign_extend_to_i64(rhs, kind));
            if b == 0 {
                return None;
            }
            signed_result(a.wrapping_rem(b))
        }
        BinaryOp::Shr => {
            if rhs >= kind.bit_size() as u64 {
                0
            } else {
                (lhs >> rhs) & mask
            }
        }
        BinaryOp::Shl => {
            if rhs >= kind.bit_size() as u64 {
                0
            } else {
                (lhs << rhs) & mask
            }
        }
        BinaryOp::Sar => {
            let a = sign_extend_to_i64(lhs, kind);
            let shift = rhs.min(63) as u32;
            signed_result(a >> shift)
        }
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
        BinaryOp::Xor => lhs ^ rhs,
    })
}

pub(crate) fn eval_compare(pred: IntPredicate, kind: TypeKind, lhs: u64, rhs: u64) -> bool {
    if pred.is_signed() {
        let (a, b) = (sign_extend_to_i64(lhs, kind), sign_extend_to_i64(rhs, kind));
        match pred {
            IntPredicate::GtS => a > b,
            IntPredicate::GteS => a >= b,
            IntPredicate::LtS => a < b,
            IntPredicate::LteS => a <= b,
            _ => unreachable!(),
        }
    } else {
        match pred {
            IntPredicate::Equal => lhs == rhs,
            IntPredicate::NotEqual => lhs != rhs,
            IntPredicate::GtU => lhs > rhs,
            IntPredicate::GteU => lhs >= rhs,
            IntPredicate::LtU => lhs < rhs,
            IntPredicate::LteU => lhs <= rhs,
            _ => unreachable!(),
        }
    }
}

pub(crate) fn eval_cast(kind: CastKind, from: TypeKind, to: TypeKind, bits: u64) -> u64 {
    match kind {
        CastKind::Bitcast => bits & to.bit_mask(),
        CastKind::Truncate | CastKind::ZeroExtend => bits & to.bit_mask(),
        CastKind::SignExtend => (sign_extend_to_i64(bits, from) as u64) & to.bit_mask(),
    }
}

/// Folds every foldable instruction in `f`; returns whether anything changed.
pub fn run(f: &mut Function) -> bool {
    let mut changed = false;
    for id in f.all_instruction_ids() {
        if fold_one(f, id) {
            changed = true;
        }
    }
    changed
}

fn fold_one(f: &mut Function, id: InstrId) -> bool {
    let data = f.inst(id).clone();
    let folded: Option<(u64, crate::types::TypeId)> = match data.opcode {
        Opcode::Unary(op) => {
            as_const_bits(f, data.operands[0]).map(|(bits, kind)| (eval_unary(op, kind, bits), data.ty))
        }
        Opcode::Binary(op) => {
            let (Some((l, kind)), Some((r, _))) = (as_const_bits(f, data.operands[0]), as_const_bits(f, data.operands[1])) else {
                return false;
            };
            eval_binary(op, kind, l, r).map(|v| (v, data.ty))
        }
        Opcode::IntCompare(pred) => {
            let (Some((l, kind)), Some((r, _))) = (as_const_bits(f, data.operands[0]), as_const_bits(f, data.operands[1])) else {
                return false;
            };
            Some((eval_compare(pred, kind, l, r) as u64, data.ty))
        }
        Opcode::Cast(kind_op) => {
            let from_ty = f.value_type(data.operands[0]);
            let from_kind = f.type_kind(from_ty);
            let to_kind = f.type_kind(data.ty);
            as_const_bits(f, data.operands[0]).map(|(bits, _)| (eval_cast(kind_op, from_kind, to_kind, bits), data.ty))
        }
        Opcode::Select => {
            let cond = as_const_bits(f, data.operands[0]);
            match cond {
                Some((c, _)) => {
                    let chosen = if c != 0 { data.operands[1] } else { data.operands[2] };
                    replace_with_value(f, id, chosen);
                    return true;
                }
                None => return false,
            }
        }
        Opcode::CondBranch => return fold_cond_branch(f, id, &data),
        _ => return false,
    };

    let Some((bits, ty)) = folded else { return false };
    let c = f.context().borrow_mut().get_constant(ty, bits);
    replace_with_value(f, id, ValueRef::Const(c));
    true
}

fn replace_with_value(f: &mut Function, id: InstrId, value: ValueRef) {
    f.replace_uses(ValueRef::Instr(id), value);
    f.destroy_instruction(id);
}

fn fold_cond_branch(f: &mut Function, id: InstrId, data: &crate::instr::InstData) -> bool {
    let Some((cond, _)) = as_const_bits(f, data.operands[0]) else { return false };
    let taken = data.targets()[if cond != 0 { 0 } else { 1 }];
    let dropped = data.targets()[if cond != 0 { 1 } else { 0 }];
    let block = f.inst(id).block;
    f.destroy_instruction(id);
    let branch = f.make_branch(taken);
    f.push_back(block, branch);
    f.on_removed_branch_to(block, dropped, true);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::value::ParamId;

    #[test]
    fn folds_constant_add() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let two = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 2));
        let three = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 3));
        let add = f.make_binary(two, BinaryOp::Add, three);
        let add_id = f.push_back(entry, add);
        let ret = f.make_ret(Some(ValueRef::Instr(add_id)));
        f.push_back(entry, ret);

        assert!(run(&mut f));
        let ret_inst = f.block(entry).instructions[0];
        let ValueRef::Const(c) = f.inst(ret_inst).operands[0] else { panic!("expected constant") };
        assert_eq!(ctx.borrow().constant_data(c).bits, 5);
    }

    #[test]
    fn rewrites_constant_cond_branch() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let t = f.create_block();
        let e = f.create_block();
        let one = ValueRef::Const(ctx.borrow_mut().get_constant(ctx.borrow().i1_ty(), 1));
        let cbr = f.make_cond_branch(one, t, e);
        f.push_back(entry, cbr);
        let ret_t = f.make_ret(None);
        f.push_back(t, ret_t);
        let ret_e = f.make_ret(None);
        f.push_back(e, ret_e);
        let _ = ParamId(0);

        assert!(run(&mut f));
        let term = f.block(entry).terminator().unwrap();
        assert_eq!(f.inst(term).opcode, Opcode::Branch);
    }
}
