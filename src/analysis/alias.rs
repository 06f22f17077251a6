//! Pointer aliasing analysis: safety, origins, constant offsets, and the
//! `can_alias`/`can_instruction_access` queries (spec.md 4.7).

use std::collections::HashMap;

use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{InstrId, ValueRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    Never,
    May,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

pub struct PointerAliasing {
    safe: HashMap<ValueRef, bool>,
    origin: HashMap<ValueRef, ValueRef>,
    /// `value -> (canonical_base, constant_offset)`, populated only for
    /// Offset chains with a constant index.
    const_offset: HashMap<ValueRef, (ValueRef, i64)>,
}

impl PointerAliasing {
    pub fn compute(f: &Function) -> Self {
        let mut analysis = PointerAliasing { safe: HashMap::new(), origin: HashMap::new(), const_offset: HashMap::new() };
        analysis.compute_safety(f);
        analysis.compute_origins(f);
        analysis.compute_const_offsets(f);
        analysis
    }

    fn pointer_values(f: &Function) -> Vec<ValueRef> {
        let mut values = Vec::new();
        for id in f.param_ids() {
            values.push(ValueRef::Param(id));
        }
        for id in f.all_instruction_ids() {
            values.push(ValueRef::Instr(id));
        }
        values.into_iter().filter(|&v| f.type_kind(f.value_type(v)).is_pointer()).collect()
    }

    /// Reverse topological iteration: process users before producers are
    /// needed isn't quite right here -- instead this processes values in an
    /// order where a value's classification only depends on values already
    /// classified, by iterating until fixpoint (acceptable for the small,
    /// mostly-acyclic def/use chains pointers form; cycles only through
    /// Phi, handled by treating an unresolved incoming as unsafe until
    /// settled).
    fn compute_safety(&mut self, f: &Function) {
        let values = Self::pointer_values(f);
        let mut changed = true;
        while changed {
            changed = false;
            for &v in &values {
                let users: Vec<InstrId> = match v {
                    ValueRef::Param(p) => f.param(p).uses.users().collect(),
                    ValueRef::Instr(i) => f.inst(i).uses.users().collect(),
                    _ => Vec::new(),
                };
                let is_safe = users.iter().all(|&u| self.user_is_safe(f, u, v));
                let before = self.safe.get(&v).copied();
                if before != Some(is_safe) {
                    self.safe.insert(v, is_safe);
                    changed = true;
                }
            }
        }
    }

    fn user_is_safe(&self, f: &Function, user: InstrId, of: ValueRef) -> bool {
        let data = f.inst(user);
        match data.opcode {
            Opcode::Load | Opcode::Ret | Opcode::IntCompare(_) => true,
            Opcode::Store => data.operands[0] == of,
            Opcode::Offset => {
                data.operands[0] == of && self.safe.get(&ValueRef::Instr(user)).copied().unwrap_or(true)
            }
            Opcode::Phi => self.safe.get(&ValueRef::Instr(user)).copied().unwrap_or(true),
            _ => false,
        }
    }

    fn compute_origins(&mut self, f: &Function) {
        let values = Self::pointer_values(f);
        let mut changed = true;
        while changed {
            changed = false;
            for &v in &values {
                let origin = self.compute_origin_of(f, v);
                if self.origin.get(&v).copied() != Some(origin) {
                    self.origin.insert(v, origin);
                    changed = true;
                }
            }
        }
    }

    fn compute_origin_of(&self, f: &Function, v: ValueRef) -> ValueRef {
        let ValueRef::Instr(id) = v else { return v };
        let data = f.inst(id);
        match data.opcode {
            Opcode::Load | Opcode::Call | Opcode::Cast(_) | Opcode::StackAlloc => v,
            Opcode::Offset => self.origin.get(&data.operands[0]).copied().unwrap_or(data.operands[0]),
            Opcode::Select => {
                let a = self.origin.get(&data.operands[1]).copied().unwrap_or(data.operands[1]);
                let b = self.origin.get(&data.operands[2]).copied().unwrap_or(data.operands[2]);
                if a == b {
                    a
                } else if matches!(a, ValueRef::Undef(_)) {
                    b
                } else if matches!(b, ValueRef::Undef(_)) {
                    a
                } else {
                    v
                }
            }
            Opcode::Phi => {
                let mut common = None;
                for i in 0..data.phi_incoming_count() {
                    let (_, val) = data.phi_incoming(i);
                    let o = self.origin.get(&val).copied().unwrap_or(val);
                    if matches!(o, ValueRef::Undef(_)) {
                        continue;
                    }
                    match common {
                        None => common = Some(o),
                        Some(c) if c == o => {}
                        Some(_) => return v,
                    }
                }
                common.unwrap_or(v)
            }
            _ => v,
        }
    }

    fn compute_const_offsets(&mut self, f: &Function) {
        for id in f.all_instruction_ids() {
            let data = f.inst(id);
            if data.opcode != Opcode::Offset {
                continue;
            }
            let base = data.operands[0];
            let index = data.operands[1];
            let Some(idx_const) = Self::as_i64_constant(f, index) else { continue };

            let (canonical_base, base_offset) =
                self.const_offset.get(&base).copied().unwrap_or((base, 0));
            self.const_offset.insert(ValueRef::Instr(id), (canonical_base, base_offset + idx_const));
        }
    }

    fn as_i64_constant(f: &Function, v: ValueRef) -> Option<i64> {
        match v {
            ValueRef::Const(c) => {
                let data = f.context().borrow().constant_data(c);
                Some(data.bits as i64)
            }
            _ => None,
        }
    }

    pub fn is_safe(&self, v: ValueRef) -> bool {
        self.safe.get(&v).copied().unwrap_or(false)
    }

    pub fn origin_of(&self, v: ValueRef) -> ValueRef {
        self.origin.get(&v).copied().unwrap_or(v)
    }

    fn is_safe_stackalloc(&self, f: &Function, origin: ValueRef) -> bool {
        matches!(origin, ValueRef::Instr(i) if f.inst(i).opcode == Opcode::StackAlloc) && self.is_safe(origin)
    }

    /// `can_alias(p, q)` per the seven-rule ladder in spec.md 4.7.
    pub fn can_alias(&self, f: &Function, p: ValueRef, q: ValueRef) -> AliasResult {
        if matches!(p, ValueRef::Undef(_)) || matches!(q, ValueRef::Undef(_)) {
            return AliasResult::Never;
        }
        if p == q {
            return AliasResult::Always;
        }
        if let (Some(&(base_p, off_p)), Some(&(base_q, off_q))) =
            (self.const_offset.get(&p), self.const_offset.get(&q))
        {
            if base_p == base_q {
                return if off_p == off_q { AliasResult::Always } else { AliasResult::Never };
            }
        }

        let origin_p = self.origin_of(p);
        let origin_q = self.origin_of(q);
        if origin_p == origin_q {
            return AliasResult::May;
        }

        let p_stack = self.is_safe_stackalloc(f, origin_p);
        let q_stack = self.is_safe_stackalloc(f, origin_q);
        if p_stack && q_stack {
            return AliasResult::Never;
        }
        if p_stack || q_stack {
            return AliasResult::Never;
        }

        AliasResult::May
    }

    /// Whether `instr` may access `p` in `mode`.
    pub fn can_instruction_access(&self, f: &Function, instr: InstrId, p: ValueRef, mode: AccessMode) -> AliasResult {
        let data = f.inst(instr);
        match data.opcode {
            Opcode::Store => self.can_alias(f, data.operands[0], p),
            Opcode::Load => {
                if mode == AccessMode::Write {
                    AliasResult::Never
                } else {
                    self.can_alias(f, data.operands[0], p)
                }
            }
            Opcode::Call => {
                if data.arguments().is_empty() {
                    return AliasResult::Never;
                }
                let origin_p = self.origin_of(p);
                if self.is_safe_stackalloc(f, origin_p) {
                    let escapes = data.arguments().iter().any(|&a| self.origin_of(a) == origin_p);
                    if !escapes {
                        return AliasResult::Never;
                    }
                }
                AliasResult::May
            }
            _ => AliasResult::Never,
        }
    }

    /// Scans a straight-line range `[from, to)` within a single block for
    /// any instruction that may access `p` in `mode`.
    pub fn range_may_access(&self, f: &Function, block: crate::value::BlockId, from: usize, to: usize, p: ValueRef, mode: AccessMode) -> bool {
        let insts = &f.block(block).instructions;
        insts[from..to].iter().any(|&i| self.can_instruction_access(f, i, p, mode) != AliasResult::Never)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::Opcode;

    #[test]
    fn distinct_stackallocs_never_alias() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let sa1 = f.make_stack_alloc(i32_ty, 1);
        let sa1_id = f.push_back(entry, sa1);
        let sa2 = f.make_stack_alloc(i32_ty, 1);
        let sa2_id = f.push_back(entry, sa2);
        let ret = f.make_ret(None);
        f.push_back(entry, ret);

        let aliasing = PointerAliasing::compute(&f);
        assert_eq!(f.inst(sa1_id).opcode, Opcode::StackAlloc);
        let r = aliasing.can_alias(&f, ValueRef::Instr(sa1_id), ValueRef::Instr(sa2_id));
        assert_eq!(r, AliasResult::Never);
    }
}
