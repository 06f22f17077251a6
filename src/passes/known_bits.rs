//! Known-bits optimization (spec.md 4.9.18): forward-propagate a
//! `(mask, value)` lattice per value -- `mask` marks known bits, `value`
//! gives their settings -- and fold values, compares, and redundant
//! AND/OR operands once the lattice pins them down.

use std::collections::HashMap;

use crate::function::Function;
use crate::instr::{BinaryOp, CastKind, IntPredicate, Opcode, UnaryOp};
use crate::passes::const_fold::{as_const_bits, eval_compare};
use crate::types::TypeKind;
use crate::value::{InstrId, ValueRef};

#[derive(Clone, Copy, PartialEq, Eq)]
struct Lattice {
    mask: u64,
    value: u64,
}

impl Lattice {
    fn unknown() -> Self {
        Lattice { mask: 0, value: 0 }
    }

    fn known(kind: TypeKind, bits: u64) -> Self {
        Lattice { mask: kind.bit_mask(), value: bits & kind.bit_mask() }
    }

    fn is_fully_known(&self, kind: TypeKind) -> bool {
        self.mask == kind.bit_mask()
    }
}

pub fn run(f: &mut Function) -> bool {
    let lattice = compute_fixpoint(f);
    apply(f, &lattice)
}

fn operand_lattice(f: &Function, table: &HashMap<InstrId, Lattice>, v: ValueRef) -> (Lattice, TypeKind) {
    let kind = f.type_kind(f.value_type(v));
    if let Some((bits, k)) = as_const_bits(f, v) {
        return (Lattice::known(k, bits), k);
    }
    match v {
        ValueRef::Instr(id) => (table.get(&id).copied().unwrap_or(Lattice::unknown()), kind),
        _ => (Lattice::unknown(), kind),
    }
}

fn compute_fixpoint(f: &Function) -> HashMap<InstrId, Lattice> {
    let mut table: HashMap<InstrId, Lattice> = HashMap::new();
    let ids = f.all_instruction_ids();
    let mut changed = true;
    while changed {
        changed = false;
        for &id in &ids {
            let new = transfer(f, &table, id);
            if table.get(&id).copied() != Some(new) {
                table.insert(id, new);
                changed = true;
            }
        }
    }
    table
}

fn transfer(f: &Function, table: &HashMap<InstrId, Lattice>, id: InstrId) -> Lattice {
    let data = f.inst(id);
    let kind = f.type_kind(data.ty);
    match data.opcode {
        Opcode::Unary(UnaryOp::Not) => {
            let (a, _) = operand_lattice(f, table, data.operands[0]);
            Lattice { mask: a.mask, value: (!a.value) & a.mask }
        }
        Opcode::Unary(UnaryOp::Neg) => {
            let (a, _) = operand_lattice(f, table, data.operands[0]);
            let not_a = Lattice { mask: a.mask, value: (!a.value) & a.mask };
            ripple_add(not_a, Lattice::known(kind, 1), kind)
        }
        Opcode::Binary(op) => {
            let (a, _) = operand_lattice(f, table, data.operands[0]);
            let (b, _) = operand_lattice(f, table, data.operands[1]);
            binary_lattice(op, kind, a, b)
        }
        Opcode::Cast(kind_op) => {
            let from_ty = f.value_type(data.operands[0]);
            let from_kind = f.type_kind(from_ty);
            let (a, _) = operand_lattice(f, table, data.operands[0]);
            cast_lattice(kind_op, from_kind, kind, a)
        }
        Opcode::Select => {
            let (cond, _) = operand_lattice(f, table, data.operands[0]);
            if cond.mask == TypeKind::I1.bit_mask() {
                let idx = if cond.value != 0 { 1 } else { 2 };
                operand_lattice(f, table, data.operands[idx]).0
            } else {
                let (t, _) = operand_lattice(f, table, data.operands[1]);
                let (e, _) = operand_lattice(f, table, data.operands[2]);
                meet(t, e)
            }
        }
        Opcode::Phi => {
            let count = data.phi_incoming_count();
            let mut acc: Option<Lattice> = None;
            for i in 0..count {
                let (_, val) = data.phi_incoming(i);
                let (l, _) = operand_lattice(f, table, val);
                acc = Some(match acc {
                    None => l,
                    Some(prev) => meet(prev, l),
                });
            }
            acc.unwrap_or(Lattice::unknown())
        }
        _ => Lattice::unknown(),
    }
}

fn meet(a: Lattice, b: Lattice) -> Lattice {
    let agree = a.mask & b.mask & !(a.value ^ b.value);
    Lattice { mask: agree, value: a.value & agree }
}

fn ripple_add(a: Lattice, b: Lattice, kind: TypeKind) -> Lattice {
    let width = kind.bit_size();
    let mut mask = 0u64;
    let mut value = 0u64;
    let mut carry = 0u64;
    for i in 0..width {
        let bit_a_known = (a.mask >> i) & 1 == 1;
        let bit_b_known = (b.mask >> i) & 1 == 1;
        if !bit_a_known || !bit_b_known {
            break;
        }
        let bit_a = (a.value >> i) & 1;
        let bit_b = (b.value >> i) & 1;
        let sum = bit_a + bit_b + carry;
        let result_bit = sum & 1;
        carry = sum >> 1;
        mask |= 1 << i;
        value |= result_bit << i;
    }
    Lattice { mask: mask & kind.bit_mask(), value: value & kind.bit_mask() }
}

fn binary_lattice(op: BinaryOp, kind: TypeKind, a: Lattice, b: Lattice) -> Lattice {
    let width = kind.bit_size();
    match op {
        BinaryOp::Add => ripple_add(a, b, kind),
        BinaryOp::Sub => {
            let not_b = Lattice { mask: b.mask, value: (!b.value) & b.mask };
            ripple_add(a, ripple_add(not_b, Lattice::known(kind, 1), kind), kind)
        }
        BinaryOp::And => {
            let mut mask = 0u64;
            let mut value = 0u64;
            for i in 0..width {
                let ak = (a.mask >> i) & 1 == 1;
                let bk = (b.mask >> i) & 1 == 1;
                let av = (a.value >> i) & 1;
                let bv = (b.value >> i) & 1;
                let (known, bit) = if ak && bk {
                    (true, av & bv)
                } else if ak && av == 0 {
                    (true, 0)
                } else if bk && bv == 0 {
                    (true, 0)
                } else {
                    (false, 0)
                };
                if known {
                    mask |= 1 << i;
                    value |= bit << i;
                }
            }
            Lattice { mask, value }
        }
        BinaryOp::Or => {
            let mut mask = 0u64;
            let mut value = 0u64;
            for i in 0..width {
                let ak = (a.mask >> i) & 1 == 1;
                let bk = (b.mask >> i) & 1 == 1;
                let av = (a.value >> i) & 1;
                let bv = (b.value >> i) & 1;
                let (known, bit) = if ak && bk {
                    (true, av | bv)
                } else if ak && av == 1 {
                    (true, 1)
                } else if bk && bv == 1 {
                    (true, 1)
                } else {
                    (false, 0)
                };
                if known {
                    mask |= 1 << i;
                    value |= bit << i;
                }
            }
            Lattice { mask, value }
        }
        BinaryOp::Xor => {
            let agree = a.mask & b.mask;
            Lattice { mask: agree, value: (a.value ^ b.value) & agree }
        }
        BinaryOp::Shl => {
            if b.mask != kind.bit_mask() {
                return Lattice::unknown();
            }
            let shift = b.value.min(width as u64) as u32;
            if shift >= width {
                return Lattice::known(kind, 0);
            }
            let low_known_zero = (1u64 << shift) - 1;
            Lattice { mask: ((a.mask << shift) | low_known_zero) & kind.bit_mask(), value: (a.value << shift) & kind.bit_mask() }
        }
        BinaryOp::Shr => {
            if b.mask != kind.bit_mask() {
                return Lattice::unknown();
            }
            let shift = b.value.min(width as u64) as u32;
            if shift >= width {
                return Lattice::known(kind, 0);
            }
            let high_known_zero = if shift == 0 { 0 } else { !((1u64 << (width - shift)) - 1) & kind.bit_mask() };
            Lattice { mask: ((a.mask >> shift) | high_known_zero) & kind.bit_mask(), value: (a.value >> shift) & kind.bit_mask() }
        }
        _ => Lattice::unknown(),
    }
}

fn cast_lattice(kind_op: CastKind, from: TypeKind, to: TypeKind, a: Lattice) -> Lattice {
    match kind_op {
        CastKind::Bitcast => Lattice { mask: a.mask & to.bit_mask(), value: a.value & to.bit_mask() },
        CastKind::Truncate => Lattice { mask: a.mask & to.bit_mask(), value: a.value & to.bit_mask() },
        CastKind::ZeroExtend => {
            let extra = to.bit_mask() & !from.bit_mask();
            Lattice { mask: a.mask | extra, value: a.value }
        }
        CastKind::SignExtend => {
            let sign_bit_pos = from.bit_size() - 1;
            let sign_known = (a.mask >> sign_bit_pos) & 1 == 1;
            if !sign_known {
                return Lattice { mask: a.mask, value: a.value };
            }
            let sign_bit = (a.value >> sign_bit_pos) & 1;
            let extra = to.bit_mask() & !from.bit_mask();
            let extra_value = if sign_bit == 1 { extra } else { 0 };
            Lattice { mask: a.mask | extra, value: a.value | extra_value }
        }
    }
}

fn apply(f: &mut Function, table: &HashMap<InstrId, Lattice>) -> bool {
    let mut to_const: Vec<(InstrId, u64, crate::types::TypeId)> = Vec::new();
    let mut to_forward: Vec<(InstrId, ValueRef)> = Vec::new();

    for &id in &f.all_instruction_ids() {
        let data = f.inst(id);
        let kind = f.type_kind(data.ty);
        match data.opcode {
            Opcode::IntCompare(pred) => {
                let (a, ak) = operand_lattice(f, table, data.operands[0]);
                let (b, _) = operand_lattice(f, table, data.operands[1]);
                if a.is_fully_known(ak) && b.is_fully_known(ak) {
                    let result = eval_compare(pred, ak, a.value, b.value);
                    to_const.push((id, result as u64, data.ty));
                }
            }
            Opcode::Binary(BinaryOp::And) => {
                let (a, ak) = operand_lattice(f, table, data.operands[0]);
                let (b, _) = operand_lattice(f, table, data.operands[1]);
                if b.is_fully_known(kind) && b.value == kind.bit_mask() {
                    to_forward.push((id, data.operands[0]));
                } else if a.is_fully_known(ak) && a.value == kind.bit_mask() {
                    to_forward.push((id, data.operands[1]));
                }
            }
            Opcode::Binary(BinaryOp::Or) => {
                let (a, ak) = operand_lattice(f, table, data.operands[0]);
                let (b, _) = operand_lattice(f, table, data.operands[1]);
                if b.is_fully_known(kind) && b.value == 0 {
                    to_forward.push((id, data.operands[0]));
                } else if a.is_fully_known(ak) && a.value == 0 {
                    to_forward.push((id, data.operands[1]));
                }
            }
            Opcode::Unary(_) | Opcode::Binary(_) | Opcode::Cast(_) | Opcode::Select => {
                if !kind.is_void() {
                    if let Some(&l) = table.get(&id) {
                        if l.is_fully_known(kind) {
                            to_const.push((id, l.value, data.ty));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let mut changed = false;
    for (id, value) in to_forward {
        f.replace_uses(ValueRef::Instr(id), value);
        f.destroy_instruction(id);
        changed = true;
    }
    for (id, bits, ty) in to_const {
        let c = f.context().borrow_mut().get_constant(ty, bits);
        f.replace_uses(ValueRef::Instr(id), ValueRef::Const(c));
        f.destroy_instruction(id);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn folds_and_with_all_ones_mask() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let all_ones = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 0xFFFF_FFFF));
        let and = f.make_binary(p0, BinaryOp::And, all_ones);
        let and_id = f.push_back(entry, and);
        let ret = f.make_ret(Some(ValueRef::Instr(and_id)));
        let ret_id = f.push_back(entry, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(ret_id).operands[0], p0);
    }

    #[test]
    fn resolves_compare_over_constants_through_xor() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let a = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 5));
        let b = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 5));
        let xor = f.make_binary(a, BinaryOp::Xor, b);
        let xor_id = f.push_back(entry, xor);
        let cmp = f.make_int_compare(ValueRef::Instr(xor_id), IntPredicate::Equal, a);
        let cmp_id = f.push_back(entry, cmp);
        let ret = f.make_ret(Some(ValueRef::Instr(cmp_id)));
        let ret_id = f.push_back(entry, ret);

        assert!(run(&mut f));
        let ValueRef::Const(_) = f.inst(ret_id).operands[0] else { panic!("expected folded constant") };
    }
}
