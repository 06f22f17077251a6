//! `Function`: an ordered list of blocks (entry first), a return type, and a
//! fixed list of typed parameters (spec.md 3.5). Owns the per-function
//! arenas for parameters, blocks, and instructions, and the editing
//! operations (`set_operand`, `add_incoming`/`remove_incoming`, block and
//! instruction insertion/destruction) that keep use lists and predecessor
//! bookkeeping consistent.

use std::cell::RefCell;
use std::rc::Rc;

use crate::block::BlockData;
use crate::context::Context;
use crate::instr::{BinaryOp, CastKind, InstData, IntPredicate, Opcode, UnaryOp};
use crate::types::{TypeId, TypeKind};
use crate::value::{BlockId, InstrId, ParamId, ValueRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub(crate) u32);

#[derive(Debug, Clone)]
pub struct ParamData {
    pub ty: TypeId,
    pub display_index: u32,
    pub uses: crate::value::UseList,
}

pub struct Function {
    pub(crate) context: Rc<RefCell<Context>>,
    pub name: String,
    pub return_type: TypeId,
    pub params: Vec<ParamData>,
    /// `None` entries are tombstones for destroyed blocks; order of
    /// definition is `block_order`.
    blocks: Vec<Option<BlockData>>,
    block_order: Vec<BlockId>,
    insts: Vec<Option<InstData>>,
    next_value_index: u32,
    next_block_index: u32,
}

impl Function {
    pub fn new(
        context: Rc<RefCell<Context>>,
        name: impl Into<String>,
        return_type: TypeId,
        param_types: &[TypeId],
    ) -> Self {
        {
            let ctx = context.borrow();
            let rt = ctx.type_kind(return_type);
            assert!(
                rt.is_arithmetic_or_pointer() || rt.is_void(),
                "function return type must be arithmetic, pointer, or void"
            );
            for &t in param_types {
                assert!(
                    ctx.type_kind(t).is_arithmetic_or_pointer(),
                    "function parameter type must be arithmetic or pointer"
                );
            }
        }

        let mut f = Function {
            context: context.clone(),
            name: name.into(),
            return_type,
            params: Vec::new(),
            blocks: Vec::new(),
            block_order: Vec::new(),
            insts: Vec::new(),
            next_value_index: 0,
            next_block_index: 0,
        };

        for &t in param_types {
            let idx = f.allocate_value_index();
            f.params.push(ParamData { ty: t, display_index: idx, uses: crate::value::UseList::new() });
        }

        f
    }

    pub fn context(&self) -> Rc<RefCell<Context>> {
        self.context.clone()
    }

    fn allocate_value_index(&mut self) -> u32 {
        let i = self.next_value_index;
        self.next_value_index += 1;
        i
    }

    fn allocate_block_index(&mut self) -> u32 {
        let i = self.next_block_index;
        self.next_block_index += 1;
        i
    }

    pub fn is_extern(&self) -> bool {
        self.block_order.is_empty()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.block_order.first().copied()
    }

    pub fn block_order(&self) -> &[BlockId] {
        &self.block_order
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        self.blocks[id.0 as usize].as_ref().expect("use of destroyed block")
    }

    fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        self.blocks[id.0 as usize].as_mut().expect("use of destroyed block")
    }

    pub fn inst(&self, id: InstrId) -> &InstData {
        self.insts[id.0 as usize].as_ref().expect("use of destroyed instruction")
    }

    fn inst_mut(&mut self, id: InstrId) -> &mut InstData {
        self.insts[id.0 as usize].as_mut().expect("use of destroyed instruction")
    }

    pub fn param(&self, id: ParamId) -> &ParamData {
        &self.params[id.0 as usize]
    }

    pub fn param_ids(&self) -> impl Iterator<Item = ParamId> {
        (0..self.params.len() as u32).map(ParamId)
    }

    pub fn instruction_type(&self, id: InstrId) -> TypeId {
        self.inst(id).ty
    }

    pub fn is_void_value(&self, v: ValueRef) -> bool {
        let ty = match v {
            ValueRef::Const(c) => self.context.borrow().constant_data(c).ty,
            ValueRef::Undef(u) => self.context.borrow().undef_type(u),
            ValueRef::Param(p) => self.param(p).ty,
            ValueRef::Instr(i) => self.inst(i).ty,
            ValueRef::Block(_) => self.context.borrow().block_ty(),
            ValueRef::Func(_) => self.context.borrow().function_ty(),
        };
        self.context.borrow().type_kind(ty).is_void()
    }

    pub fn value_type(&self, v: ValueRef) -> TypeId {
        match v {
            ValueRef::Const(c) => self.context.borrow().constant_data(c).ty,
            ValueRef::Undef(u) => self.context.borrow().undef_type(u),
            ValueRef::Param(p) => self.param(p).ty,
            ValueRef::Instr(i) => self.inst(i).ty,
            ValueRef::Block(_) => self.context.borrow().block_ty(),
            ValueRef::Func(_) => self.context.borrow().function_ty(),
        }
    }

    // ---- block creation / ordering ----------------------------------

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BlockData::new()));
        let is_entry = self.block_order.is_empty();
        {
            let idx = self.allocate_block_index();
            let b = self.block_mut(id);
            b.is_entry = is_entry;
            b.display_index = idx;
        }
        self.block_order.push(id);
        id
    }

    pub fn reassign_display_indices(&mut self) {
        self.next_block_index = 0;
        self.next_value_index = 0;

        for p in 0..self.params.len() {
            let idx = self.allocate_value_index();
            self.params[p].display_index = idx;
        }

        let order = self.block_order.clone();
        for b in order {
            let idx = self.allocate_block_index();
            self.block_mut(b).display_index = idx;
            let insts = self.block(b).instructions.clone();
            for i in insts {
                if !self.is_void_value(ValueRef::Instr(i)) {
                    let vi = self.allocate_value_index();
                    self.inst_mut(i).display_index = vi;
                }
            }
        }
    }

    // ---- instruction insertion ---------------------------------------

    fn alloc_inst(&mut self, mut data: InstData, block: BlockId) -> InstrId {
        data.block = block;
        let id = InstrId(self.insts.len() as u32);
        if !self.context.borrow().type_kind(data.ty).is_void() {
            data.display_index = self.allocate_value_index();
        }
        self.insts.push(Some(data));
        for i in 0..self.inst(id).operands.len() {
            let v = self.inst(id).operands[i];
            self.link_use(v, id, i as u32);
        }
        id
    }

    fn link_use(&mut self, v: ValueRef, user: InstrId, idx: u32) {
        match v {
            ValueRef::Param(p) => self.params[p.0 as usize].uses.add(user, idx),
            ValueRef::Block(b) => self.block_mut(b).uses.add(user, idx),
            ValueRef::Instr(i) => self.inst_mut(i).uses.add(user, idx),
            ValueRef::Const(_) | ValueRef::Undef(_) | ValueRef::Func(_) => {}
        }
    }

    fn unlink_use(&mut self, v: ValueRef, user: InstrId, idx: u32) {
        match v {
            ValueRef::Param(p) => self.params[p.0 as usize].uses.remove(user, idx),
            ValueRef::Block(b) => self.block_mut(b).uses.remove(user, idx),
            ValueRef::Instr(i) => self.inst_mut(i).uses.remove(user, idx),
            ValueRef::Const(_) | ValueRef::Undef(_) | ValueRef::Func(_) => {}
        }
    }

    /// Sets operand `idx` of `user` to `new_value`; a no-op if unchanged.
    /// Unlinks the old use and links the new one (spec.md 3.3, 4.2).
    pub fn set_operand(&mut self, user: InstrId, idx: usize, new_value: ValueRef) {
        let old = self.inst(user).operands[idx];
        if old == new_value {
            return;
        }
        self.unlink_use(old, user, idx as u32);
        self.inst_mut(user).operands[idx] = new_value;
        self.link_use(new_value, user, idx as u32);
    }

    fn insert_at(&mut self, block: BlockId, at: usize, data: InstData) -> InstrId {
        let id = self.alloc_inst(data, block);
        self.block_mut(block).instructions.insert(at, id);
        id
    }

    pub fn push_front(&mut self, block: BlockId, data: InstData) -> InstrId {
        self.insert_at(block, 0, data)
    }

    pub fn push_back(&mut self, block: BlockId, data: InstData) -> InstrId {
        let pos = self.block(block).instructions.len();
        if let Some(&last) = self.block(block).instructions.last() {
            assert!(
                !self.inst(last).opcode.is_terminator(),
                "cannot insert after a block's terminator"
            );
        }
        self.insert_at(block, pos, data)
    }

    pub fn insert_before(&mut self, before: InstrId, data: InstData) -> InstrId {
        let block = self.inst(before).block;
        let pos = self.block(block).instructions.iter().position(|&i| i == before).unwrap();
        self.insert_at(block, pos, data)
    }

    pub fn insert_after(&mut self, after: InstrId, data: InstData) -> InstrId {
        let block = self.inst(after).block;
        let pos = self.block(block).instructions.iter().position(|&i| i == after).unwrap();
        self.insert_at(block, pos + 1, data)
    }

    /// Removes `id` from its block's order without destroying it -- used by
    /// passes that immediately reinsert the instruction elsewhere (global
    /// reordering, LICM).
    pub fn unlink_instruction(&mut self, id: InstrId) {
        let block = self.inst(id).block;
        let pos = self.block(block).instructions.iter().position(|&i| i == id).unwrap();
        self.block_mut(block).instructions.remove(pos);
    }

    pub fn reinsert_before(&mut self, id: InstrId, before: InstrId) {
        let block = self.inst(before).block;
        self.inst_mut(id).block = block;
        let pos = self.block(block).instructions.iter().position(|&i| i == before).unwrap();
        self.block_mut(block).instructions.insert(pos, id);
    }

    /// Destroys an instruction: replaces its uses with `undef` of its type
    /// first, then unlinks its own operands (spec.md 3.5).
    pub fn destroy_instruction(&mut self, id: InstrId) {
        if !self.inst(id).uses.is_empty() {
            let ty = self.inst(id).ty;
            let undef = self.context.borrow_mut().get_undef(ty);
            self.replace_uses(ValueRef::Instr(id), ValueRef::Undef(undef));
        }
        assert!(self.inst(id).uses.is_empty(), "destroying an instruction that still has users");
        let block = self.inst(id).block;
        let operand_count = self.inst(id).operands.len();
        for i in 0..operand_count {
            let v = self.inst(id).operands[i];
            self.unlink_use(v, id, i as u32);
        }
        self.inst_mut(id).operands.clear();
        let pos = self.block(block).instructions.iter().position(|&i| i == id).unwrap();
        self.block_mut(block).instructions.remove(pos);
        self.insts[id.0 as usize] = None;
    }

    /// Replaces every use of `from` with `to`, draining `from`'s use list.
    /// If `from` is a block, deduplicates Phi incoming pairs that collapse
    /// onto the same predecessor (spec.md 4.2).
    pub fn replace_uses(&mut self, from: ValueRef, to: ValueRef) {
        if from == to {
            return;
        }
        let snapshot = match from {
            ValueRef::Param(p) => self.params[p.0 as usize].uses.snapshot(),
            ValueRef::Block(b) => self.block(b).uses.snapshot(),
            ValueRef::Instr(i) => self.inst(i).uses.snapshot(),
            ValueRef::Const(_) | ValueRef::Undef(_) | ValueRef::Func(_) => Vec::new(),
        };

        let touched_blocks: Vec<InstrId> = snapshot.iter().map(|u| u.user).collect();
        for u in snapshot {
            self.set_operand(u.user, u.operand_index as usize, to);
        }

        if let ValueRef::Block(_new_block) = to {
            for user in touched_blocks {
                if self.inst(user).opcode == Opcode::Phi {
                    self.dedup_phi_incoming(user);
                }
            }
        }
    }

    /// Collapses duplicate `(block, value)` pairs in a Phi after a block
    /// merge; panics if two surviving entries for the same block disagree
    /// (spec.md 4.2).
    pub fn dedup_phi_incoming(&mut self, phi: InstrId) {
        let count = self.inst(phi).phi_incoming_count();
        let mut seen: Vec<(BlockId, ValueRef)> = Vec::new();
        let mut to_remove = Vec::new();
        for i in 0..count {
            let (b, v) = self.inst(phi).phi_incoming(i);
            if let Some(&(_, existing_v)) = seen.iter().find(|(sb, _)| *sb == b) {
                assert!(existing_v == v, "phi value isn't common for the same blocks");
                to_remove.push(b);
            } else {
                seen.push((b, v));
            }
        }
        for b in to_remove {
            self.remove_incoming(phi, b);
        }
    }

    // ---- Phi incoming management ---------------------------------------

    pub fn add_incoming(&mut self, phi: InstrId, block: BlockId, value: ValueRef) {
        let idx = self.inst(phi).operands.len() as u32;
        self.inst_mut(phi).operands.push(ValueRef::Block(block));
        self.inst_mut(phi).operands.push(value);
        self.link_use(ValueRef::Block(block), phi, idx);
        self.link_use(value, phi, idx + 1);
    }

    /// Compacts out every incoming pair for `block`, shifting subsequent
    /// pairs down and reindexing their uses (spec.md 4.2).
    pub fn remove_incoming(&mut self, phi: InstrId, block: BlockId) -> bool {
        let count = self.inst(phi).phi_incoming_count();
        let mut removed_any = false;
        let mut i = 0;
        while i < self.inst(phi).phi_incoming_count() {
            let (b, _) = self.inst(phi).phi_incoming(i);
            if b == block {
                self.remove_incoming_at(phi, i);
                removed_any = true;
            } else {
                i += 1;
            }
        }
        let _ = count;
        removed_any
    }

    fn remove_incoming_at(&mut self, phi: InstrId, i: usize) {
        let last = self.inst(phi).phi_incoming_count() - 1;
        let (b, v) = self.inst(phi).phi_incoming(i);
        self.unlink_use(ValueRef::Block(b), phi, i as u32 * 2);
        self.unlink_use(v, phi, i as u32 * 2 + 1);

        for j in i..last {
            let (nb, nv) = self.inst(phi).phi_incoming(j + 1);
            self.unlink_use(ValueRef::Block(nb), phi, (j + 1) as u32 * 2);
            self.unlink_use(nv, phi, (j + 1) as u32 * 2 + 1);
            self.inst_mut(phi).operands[j * 2] = ValueRef::Block(nb);
            self.inst_mut(phi).operands[j * 2 + 1] = nv;
            self.link_use(ValueRef::Block(nb), phi, j as u32 * 2);
            self.link_use(nv, phi, j as u32 * 2 + 1);
        }

        self.inst_mut(phi).operands.truncate(last * 2);
    }

    pub fn phi_is_empty(&self, phi: InstrId) -> bool {
        self.inst(phi).phi_incoming_count() == 0
    }

    // ---- block destruction ----------------------------------------------

    /// Removes `block` from all Phis that reference it as an incoming
    /// predecessor, optionally destroying Phis left with no incoming
    /// values.
    pub fn remove_incoming_block_from_phis(&mut self, owner: BlockId, incoming: BlockId, destroy_empty_phis: bool) {
        if self.block(owner).is_entry {
            return;
        }
        for inst in self.block(owner).instructions.clone() {
            if self.inst(inst).opcode == Opcode::Phi {
                let removed = self.remove_incoming(inst, incoming);
                if removed && destroy_empty_phis && self.phi_is_empty(inst) && self.inst(inst).uses.is_empty() {
                    self.destroy_instruction(inst);
                }
            }
        }
    }

    pub fn has_successor(&self, block: BlockId, successor: BlockId) -> bool {
        self.block(block).terminator().map(|t| self.inst(t).targets().contains(&successor)).unwrap_or(false)
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.block(block).terminator().map(|t| self.inst(t).targets()).unwrap_or_default()
    }

    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        let mut result = Vec::new();
        for &user in self.block(block).uses.users().collect::<Vec<_>>().iter() {
            let opcode = self.inst(user).opcode;
            if matches!(opcode, Opcode::Branch | Opcode::CondBranch) {
                result.push(self.inst(user).block);
            }
        }
        result
    }

    /// Call after a branch targeting `to` from `from` was removed (the
    /// CFG edge no longer exists): drops `from`'s Phi incoming entries in
    /// `to` if it is indeed no longer a successor.
    pub fn on_removed_branch_to(&mut self, from: BlockId, to: BlockId, destroy_empty_phis: bool) {
        if !self.has_successor(from, to) {
            self.remove_incoming_block_from_phis(to, from, destroy_empty_phis);
        }
    }

    pub fn clear_block(&mut self, block: BlockId) {
        while let Some(&last) = self.block(block).instructions.last() {
            assert!(self.inst(last).uses.is_empty(), "destroying non-empty block with referenced instruction");
            self.destroy_instruction(last);
        }
    }

    pub fn destroy_block(&mut self, block: BlockId) {
        assert!(self.block(block).is_empty(), "cannot destroy a non-empty block");
        assert!(self.block(block).uses.is_empty(), "cannot destroy a block that is still referenced");
        for inst in self.all_instruction_ids() {
            if self.inst(inst).opcode == Opcode::Phi {
                self.remove_incoming(inst, block);
            }
        }
        let pos = self.block_order.iter().position(|&b| b == block).unwrap();
        self.block_order.remove(pos);
        self.blocks[block.0 as usize] = None;
    }

    pub fn all_instruction_ids(&self) -> Vec<InstrId> {
        self.insts
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.as_ref().map(|_| InstrId(i as u32)))
            .collect()
    }

    pub fn destroy(mut self) {
        for b in self.block_order.clone() {
            self.clear_block(b);
        }
        while let Some(&b) = self.block_order.last() {
            self.destroy_block(b);
        }
    }

    // ---- instruction construction helpers (the inserter's targets) -----

    pub fn make_unary(&self, op: UnaryOp, value: ValueRef) -> InstData {
        let ty = self.value_type(value);
        InstData { opcode: Opcode::Unary(op), ty, operands: vec![value], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_binary(&self, lhs: ValueRef, op: BinaryOp, rhs: ValueRef) -> InstData {
        let ty = self.value_type(lhs);
        InstData { opcode: Opcode::Binary(op), ty, operands: vec![lhs, rhs], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_int_compare(&self, lhs: ValueRef, pred: IntPredicate, rhs: ValueRef) -> InstData {
        let ty = self.context.borrow().i1_ty();
        InstData { opcode: Opcode::IntCompare(pred), ty, operands: vec![lhs, rhs], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_load(&mut self, address: ValueRef) -> InstData {
        let addr_ty = self.value_type(address);
        let ty = self.context.borrow_mut().deref_pointer(addr_ty);
        InstData { opcode: Opcode::Load, ty, operands: vec![address], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_store(&self, address: ValueRef, value: ValueRef) -> InstData {
        let ty = self.context.borrow().void_ty();
        InstData { opcode: Opcode::Store, ty, operands: vec![address, value], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_call(&self, callee: FuncId, return_type: TypeId, arguments: Vec<ValueRef>) -> InstData {
        let mut operands = vec![ValueRef::Func(callee)];
        operands.extend(arguments);
        InstData { opcode: Opcode::Call, ty: return_type, operands, stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_branch(&self, target: BlockId) -> InstData {
        let ty = self.context.borrow().void_ty();
        InstData { opcode: Opcode::Branch, ty, operands: vec![ValueRef::Block(target)], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_cond_branch(&self, condition: ValueRef, true_target: BlockId, false_target: BlockId) -> InstData {
        let ty = self.context.borrow().void_ty();
        InstData {
            opcode: Opcode::CondBranch,
            ty,
            operands: vec![condition, ValueRef::Block(true_target), ValueRef::Block(false_target)],
            stackalloc_size: 0,
            block: BlockId(0),
            display_index: 0,
            uses: crate::value::UseList::new(),
        }
    }

    pub fn make_stack_alloc(&mut self, element_type: TypeId, size: usize) -> InstData {
        let ty = self.context.borrow_mut().ref_type(element_type, 1);
        InstData { opcode: Opcode::StackAlloc, ty, operands: vec![], stackalloc_size: size, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_ret(&self, value: Option<ValueRef>) -> InstData {
        let ty = self.context.borrow().void_ty();
        InstData { opcode: Opcode::Ret, ty, operands: value.into_iter().collect(), stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_offset(&self, base: ValueRef, index: ValueRef) -> InstData {
        let ty = self.value_type(base);
        InstData { opcode: Opcode::Offset, ty, operands: vec![base, index], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_cast(&self, kind: CastKind, value: ValueRef, target_type: TypeId) -> InstData {
        InstData { opcode: Opcode::Cast(kind), ty: target_type, operands: vec![value], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_select(&self, condition: ValueRef, true_value: ValueRef, false_value: ValueRef) -> InstData {
        let ty = self.value_type(true_value);
        InstData { opcode: Opcode::Select, ty, operands: vec![condition, true_value, false_value], stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn make_phi(&self, ty: TypeId, incoming: Vec<(BlockId, ValueRef)>) -> InstData {
        let mut operands = Vec::with_capacity(incoming.len() * 2);
        for (b, v) in incoming {
            operands.push(ValueRef::Block(b));
            operands.push(v);
        }
        InstData { opcode: Opcode::Phi, ty, operands, stackalloc_size: 0, block: BlockId(0), display_index: 0, uses: crate::value::UseList::new() }
    }

    pub fn type_kind(&self, ty: TypeId) -> TypeKind {
        self.context.borrow().type_kind(ty)
    }
}
