//! Stateful instruction cursor with four insertion policies: block-front,
//! block-back, before-instruction, after-instruction, with optional
//! "follow" mode that walks the cursor forward with each insertion
//! (spec.md 4.3).

use crate::function::Function;
use crate::instr::{BinaryOp, CastKind, IntPredicate, UnaryOp};
use crate::types::TypeId;
use crate::value::{BlockId, InstrId, ValueRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertDestination {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy)]
enum InsertType {
    BlockFront(BlockId),
    BlockBack(BlockId),
    BeforeInstruction(InstrId),
    AfterInstruction(InstrId),
}

pub struct Inserter {
    insert_type: InsertType,
    follow: bool,
}

impl Inserter {
    pub fn at_block(block: BlockId, destination: InsertDestination) -> Self {
        let insert_type = match destination {
            InsertDestination::Front => InsertType::BlockFront(block),
            InsertDestination::Back => InsertType::BlockBack(block),
        };
        Inserter { insert_type, follow: false }
    }

    pub fn at_instruction(instruction: InstrId, destination: InsertDestination, follow: bool) -> Self {
        let insert_type = match destination {
            InsertDestination::Front => InsertType::BeforeInstruction(instruction),
            InsertDestination::Back => InsertType::AfterInstruction(instruction),
        };
        Inserter { insert_type, follow }
    }

    pub fn insertion_block(&self, f: &Function) -> BlockId {
        match self.insert_type {
            InsertType::BlockFront(b) | InsertType::BlockBack(b) => b,
            InsertType::BeforeInstruction(i) | InsertType::AfterInstruction(i) => f.inst(i).block,
        }
    }

    fn insert(&mut self, f: &mut Function, data: crate::instr::InstData) -> InstrId {
        let id = match self.insert_type {
            InsertType::BlockFront(b) => f.push_front(b, data),
            InsertType::BlockBack(b) => f.push_back(b, data),
            InsertType::BeforeInstruction(before) => f.insert_before(before, data),
            InsertType::AfterInstruction(after) => f.insert_after(after, data),
        };
        if self.follow {
            match self.insert_type {
                InsertType::BeforeInstruction(_) => self.insert_type = InsertType::BeforeInstruction(id),
                InsertType::AfterInstruction(_) => self.insert_type = InsertType::AfterInstruction(id),
                _ => {}
            }
        }
        id
    }

    pub fn unary(&mut self, f: &mut Function, op: UnaryOp, value: ValueRef) -> InstrId {
        let data = f.make_unary(op, value);
        self.insert(f, data)
    }

    pub fn binary(&mut self, f: &mut Function, lhs: ValueRef, op: BinaryOp, rhs: ValueRef) -> InstrId {
        let data = f.make_binary(lhs, op, rhs);
        self.insert(f, data)
    }

    pub fn int_compare(&mut self, f: &mut Function, lhs: ValueRef, pred: IntPredicate, rhs: ValueRef) -> InstrId {
        let data = f.make_int_compare(lhs, pred, rhs);
        self.insert(f, data)
    }

    pub fn load(&mut self, f: &mut Function, address: ValueRef) -> InstrId {
        let data = f.make_load(address);
        self.insert(f, data)
    }

    pub fn store(&mut self, f: &mut Function, address: ValueRef, value: ValueRef) -> InstrId {
        let data = f.make_store(address, value);
        self.insert(f, data)
    }

    pub fn call(&mut self, f: &mut Function, callee: crate::function::FuncId, return_type: TypeId, args: Vec<ValueRef>) -> InstrId {
        let data = f.make_call(callee, return_type, args);
        self.insert(f, data)
    }

    pub fn branch(&mut self, f: &mut Function, target: BlockId) -> InstrId {
        let data = f.make_branch(target);
        self.insert(f, data)
    }

    pub fn cond_branch(&mut self, f: &mut Function, condition: ValueRef, t: BlockId, fa: BlockId) -> InstrId {
        let data = f.make_cond_branch(condition, t, fa);
        self.insert(f, data)
    }

    pub fn stack_alloc(&mut self, f: &mut Function, element_type: TypeId, size: usize) -> InstrId {
        let data = f.make_stack_alloc(element_type, size);
        self.insert(f, data)
    }

    pub fn ret(&mut self, f: &mut Function, value: Option<ValueRef>) -> InstrId {
        let data = f.make_ret(value);
        self.insert(f, data)
    }

    pub fn offset(&mut self, f: &mut Function, base: ValueRef, index: ValueRef) -> InstrId {
        let data = f.make_offset(base, index);
        self.insert(f, data)
    }

    pub fn cast(&mut self, f: &mut Function, kind: CastKind, value: ValueRef, target_type: TypeId) -> InstrId {
        let data = f.make_cast(kind, value, target_type);
        self.insert(f, data)
    }

    pub fn select(&mut self, f: &mut Function, condition: ValueRef, t: ValueRef, fa: ValueRef) -> InstrId {
        let data = f.make_select(condition, t, fa);
        self.insert(f, data)
    }

    pub fn phi(&mut self, f: &mut Function, ty: TypeId, incoming: Vec<(BlockId, ValueRef)>) -> InstrId {
        let data = f.make_phi(ty, incoming);
        self.insert(f, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::function::Function;

    #[test]
    fn follow_mode_advances_cursor() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let b0 = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));

        let mut ins = Inserter::at_block(b0, InsertDestination::Back);
        let first = ins.unary(&mut f, UnaryOp::Neg, p0);

        let mut follow_ins = Inserter::at_instruction(first, InsertDestination::Back, true);
        let second = follow_ins.unary(&mut f, UnaryOp::Not, ValueRef::Instr(first));
        let third = follow_ins.unary(&mut f, UnaryOp::Neg, ValueRef::Instr(second));

        assert_eq!(f.block(b0).instructions, vec![first, second, third]);
    }
}
