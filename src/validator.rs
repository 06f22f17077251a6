//! Function validator: dominator-based SSA checks plus the per-opcode
//! typing rules of spec.md 3.4/4.4.

use crate::analysis::dominator::Dominators;
use crate::context::Context;
use crate::error::ValidationError;
use crate::function::Function;
use crate::instr::{CastKind, Opcode};
use crate::types::TypeKind;
use crate::value::{BlockId, InstrId, ValueRef};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Accumulates every violation found in one validation run, tagged with
/// the owning function's name, and -- while checking a given block or
/// instruction -- that block/instruction too (spec.md 4.4: "errors
/// accumulate; the caller selects silent, print, or fatal").
struct ErrorSink {
    function: String,
    current_block: Option<BlockId>,
    current_instruction: Option<InstrId>,
    errors: Vec<ValidationError>,
}

impl ErrorSink {
    fn push(&mut self, message: String) {
        let mut err = ValidationError::new(self.function.clone(), message);
        if let Some(b) = self.current_block {
            err = err.in_block(format!("{b:?}"));
        }
        if let Some(i) = self.current_instruction {
            err = err.in_instruction(format!("{i:?}"));
        }
        self.errors.push(err);
    }
}

pub fn validate(f: &Function, context: &Rc<RefCell<Context>>) -> Result<(), Vec<ValidationError>> {
    let mut sink = ErrorSink { function: f.name.clone(), current_block: None, current_instruction: None, errors: Vec::new() };

    if f.is_extern() {
        return Ok(());
    }

    let dominators = Dominators::compute(f);

    for &block in f.block_order() {
        if !dominators.is_reachable(block) {
            continue;
        }
        check_block(f, context, &dominators, block, &mut sink);
    }

    if sink.errors.is_empty() {
        Ok(())
    } else {
        Err(sink.errors)
    }
}

fn check_block(
    f: &Function,
    context: &Rc<RefCell<Context>>,
    dominators: &Dominators,
    block: BlockId,
    errors: &mut ErrorSink,
) {
    errors.current_block = Some(block);
    errors.current_instruction = None;

    let data = f.block(block);

    if data.is_empty() {
        errors.push(format!("block {:?} is empty", block));
        return;
    }

    if data.is_entry && !f.predecessors(block).is_empty() {
        errors.push(format!("entry block {:?} has predecessors", block));
    }

    let predecessors: HashSet<BlockId> = f.predecessors(block).into_iter().collect();

    for (i, &inst) in data.instructions.iter().enumerate() {
        errors.current_instruction = Some(inst);
        let is_last = i + 1 == data.instructions.len();
        let opcode = f.inst(inst).opcode;
        if opcode.is_terminator() != is_last {
            errors.push(format!("instruction {:?} terminator placement invalid in block {:?}", inst, block));
        }
        check_instruction(f, context, dominators, inst, &predecessors, errors);
    }
    errors.current_instruction = None;
}

fn check_instruction(
    f: &Function,
    context: &Rc<RefCell<Context>>,
    dominators: &Dominators,
    inst: InstrId,
    predecessors: &HashSet<BlockId>,
    errors: &mut ErrorSink,
) {
    let data = f.inst(inst);

    for &operand in &data.operands {
        if !operand_context_matches(f, context, operand) {
            errors.push(format!("instruction {:?} has operand from a foreign context", inst));
        }
        if f.is_void_value(operand) {
            errors.push(format!("instruction {:?} uses a void-typed operand", inst));
        }
    }

    if data.opcode == Opcode::Phi {
        check_phi_incoming(f, dominators, inst, predecessors, errors);
    } else {
        for &operand in &data.operands {
            if let ValueRef::Instr(def) = operand {
                if !dominates_use(f, dominators, def, inst) {
                    errors.push(format!("operand {:?} of {:?} does not dominate its use", def, inst));
                }
            }
        }
    }

    check_typing(f, context, inst, errors);
}

fn operand_context_matches(f: &Function, context: &Rc<RefCell<Context>>, _v: ValueRef) -> bool {
    Rc::ptr_eq(context, &f.context())
}

fn dominates_use(f: &Function, dominators: &Dominators, def: InstrId, user: InstrId) -> bool {
    let def_block = f.inst(def).block;
    let user_block = f.inst(user).block;
    if def_block == user_block {
        let insts = &f.block(def_block).instructions;
        let def_pos = insts.iter().position(|&i| i == def).unwrap();
        let user_pos = insts.iter().position(|&i| i == user).unwrap();
        def_pos < user_pos
    } else {
        dominators.dominates(def_block, user_block)
    }
}

fn check_phi_incoming(
    f: &Function,
    dominators: &Dominators,
    phi: InstrId,
    predecessors: &HashSet<BlockId>,
    errors: &mut ErrorSink,
) {
    let data = f.inst(phi);
    let mut seen = HashSet::new();
    for i in 0..data.phi_incoming_count() {
        let (block, value) = data.phi_incoming(i);
        if !seen.insert(block) {
            errors.push(format!("phi {:?} has duplicate incoming block {:?}", phi, block));
        }
        if !predecessors.contains(&block) {
            errors.push(format!("phi {:?} has incoming block {:?} that is not a predecessor", phi, block));
        }
        if let ValueRef::Instr(def) = value {
            if def != phi && !dominators_end_of_block(f, dominators, def, block) {
                errors.push(format!("phi {:?} incoming value {:?} does not dominate the end of {:?}", phi, def, block));
            }
        }
    }
    if seen != *predecessors {
        errors.push(format!("phi {:?} incoming blocks do not match predecessor set", phi));
    }
}

fn dominators_end_of_block(f: &Function, dominators: &Dominators, def: InstrId, end_of: BlockId) -> bool {
    // A Phi incoming value from a dead predecessor carries no dominance
    // requirement at all, not just when it's defined in that predecessor.
    if !dominators.is_reachable(end_of) {
        return true;
    }
    let def_block = f.inst(def).block;
    if def_block == end_of {
        true
    } else {
        dominators.dominates(def_block, end_of)
    }
}

fn check_typing(f: &Function, _context: &Rc<RefCell<Context>>, inst: InstrId, errors: &mut ErrorSink) {
    let data = f.inst(inst);
    let kind_of = |v: ValueRef| f.type_kind(f.value_type(v));
    let ty_of = |v: ValueRef| f.value_type(v);

    match data.opcode {
        Opcode::Unary(_) => {
            let operand = data.operands[0];
            if ty_of(operand) != data.ty || !kind_of(operand).is_arithmetic() {
                errors.push(format!("{:?}: unary operand/result type mismatch", inst));
            }
        }
        Opcode::Binary(_) => {
            let (lhs, rhs) = (data.operands[0], data.operands[1]);
            if ty_of(lhs) != ty_of(rhs) || ty_of(lhs) != data.ty || !kind_of(lhs).is_arithmetic() {
                errors.push(format!("{:?}: binary operand/result type mismatch", inst));
            }
        }
        Opcode::IntCompare(_) => {
            let (lhs, rhs) = (data.operands[0], data.operands[1]);
            let k = kind_of(lhs);
            if ty_of(lhs) != ty_of(rhs) || !(k.is_integer() || k.is_pointer()) {
                errors.push(format!("{:?}: int-compare operand type mismatch", inst));
            }
            if f.type_kind(data.ty) != TypeKind::I1 {
                errors.push(format!("{:?}: int-compare must return i1", inst));
            }
        }
        Opcode::Load => {
            let addr = data.operands[0];
            if !kind_of(addr).is_pointer() {
                errors.push(format!("{:?}: load address must be a pointer", inst));
            } else {
                let result_kind = f.type_kind(data.ty);
                if !(result_kind.is_integer() || result_kind.is_pointer()) {
                    errors.push(format!("{:?}: load result must be integer or pointer", inst));
                }
            }
        }
        Opcode::Store => {
            let (addr, value) = (data.operands[0], data.operands[1]);
            match kind_of(addr) {
                TypeKind::Pointer { base, indirection } => {
                    let (expected_base, expected_indirection) = match kind_of(value) {
                        TypeKind::Pointer { base: vbase, indirection: vind } => (vbase, vind + 1),
                        _ => (ty_of(value), 1),
                    };
                    if base != expected_base || indirection != expected_indirection {
                        errors.push(format!("{:?}: store address type does not match ref(value)", inst));
                    }
                }
                _ => errors.push(format!("{:?}: store address must be a pointer", inst)),
            }
        }
        Opcode::Offset => {
            let (base, index) = (data.operands[0], data.operands[1]);
            if !kind_of(base).is_pointer() {
                errors.push(format!("{:?}: offset base must be a pointer", inst));
            }
            if !kind_of(index).is_integer() {
                errors.push(format!("{:?}: offset index must be an integer", inst));
            }
            if ty_of(base) != data.ty {
                errors.push(format!("{:?}: offset result type must match base type", inst));
            }
        }
        Opcode::Cast(kind) => {
            let value = data.operands[0];
            let from = kind_of(value);
            let to = f.type_kind(data.ty);
            match kind {
                CastKind::Bitcast => {
                    if from.bit_size() != to.bit_size() {
                        errors.push(format!("{:?}: bitcast must preserve bit size", inst));
                    }
                }
                CastKind::Truncate => {
                    if !(from.is_integer() && to.is_integer() && from.bit_size() > to.bit_size()) {
                        errors.push(format!("{:?}: truncate must shrink strictly between integers", inst));
                    }
                }
                CastKind::ZeroExtend | CastKind::SignExtend => {
                    if !(from.is_integer() && to.is_integer() && from.bit_size() < to.bit_size()) {
                        errors.push(format!("{:?}: extend must grow strictly between integers", inst));
                    }
                }
            }
        }
        Opcode::Select => {
            let (cond, t, fa) = (data.operands[0], data.operands[1], data.operands[2]);
            if f.type_kind(ty_of(cond)) != TypeKind::I1 {
                errors.push(format!("{:?}: select condition must be i1", inst));
            }
            if ty_of(t) != ty_of(fa) || ty_of(t) != data.ty {
                errors.push(format!("{:?}: select operand/result type mismatch", inst));
            }
        }
        Opcode::StackAlloc => {
            if !f.type_kind(data.ty).is_pointer() {
                errors.push(format!("{:?}: stackalloc must return a pointer", inst));
            }
        }
        Opcode::Phi => {
            for i in 0..data.phi_incoming_count() {
                let (_, value) = data.phi_incoming(i);
                if ty_of(value) != data.ty {
                    errors.push(format!("{:?}: phi incoming value type mismatch", inst));
                }
            }
        }
        Opcode::Branch | Opcode::CondBranch | Opcode::Ret | Opcode::Call => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::BinaryOp;

    #[test]
    fn well_formed_function_validates() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty, i32_ty]);
        let entry = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let p1 = ValueRef::Param(crate::value::ParamId(1));
        let add = f.make_binary(p0, BinaryOp::Add, p1);
        let add_id = f.push_back(entry, add);
        let ret = f.make_ret(Some(ValueRef::Instr(add_id)));
        f.push_back(entry, ret);

        assert!(validate(&f, &ctx).is_ok());
    }

    #[test]
    fn unreachable_block_is_skipped() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let ret = f.make_ret(None);
        f.push_back(entry, ret);
        // An unreachable block with no terminator would normally fail
        // validation, but since it's unreachable from entry it's skipped.
        let _dead = f.create_block();

        assert!(validate(&f, &ctx).is_ok());
    }
}
