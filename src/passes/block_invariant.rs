//! Block-invariant propagation (spec.md 4.9.3): substitute an operand with
//! a value known equal to it on every path into a block, derived from an
//! `eq`/`ne` compare feeding the predecessor's `CondBranch`.

use std::collections::HashMap;

use crate::function::Function;
use crate::instr::{IntPredicate, Opcode};
use crate::value::{BlockId, InstrId, ValueRef};

/// The substitutions that hold unconditionally when control reaches
/// `block` via the edge from `pred`, derived from `pred`'s terminator.
fn edge_substitutions(f: &Function, pred: BlockId, block: BlockId) -> HashMap<ValueRef, ValueRef> {
    let mut subs = HashMap::new();
    let Some(term) = f.block(pred).terminator() else { return subs };
    if f.inst(term).opcode != Opcode::CondBranch {
        return subs;
    }
    let data = f.inst(term);
    let cond = data.operands[0];
    let (true_target, false_target) = (data.targets()[0], data.targets()[1]);

    let ValueRef::Instr(cond_id) = cond else { return subs };
    let cond_data = f.inst(cond_id);
    let Opcode::IntCompare(pred_kind) = cond_data.opcode else { return subs };
    if !matches!(pred_kind, IntPredicate::Equal | IntPredicate::NotEqual) {
        return subs;
    }

    let applies = match pred_kind {
        IntPredicate::Equal => block == true_target,
        IntPredicate::NotEqual => block == false_target,
        _ => unreachable!(),
    };
    if !applies {
        return subs;
    }

    let (a, b) = (cond_data.operands[0], cond_data.operands[1]);
    let (from, to) = if matches!(a, ValueRef::Const(_)) {
        (b, a)
    } else {
        (a, b)
    };
    if from != to {
        subs.insert(from, to);
    }
    subs
}

fn intersect(maps: Vec<HashMap<ValueRef, ValueRef>>) -> HashMap<ValueRef, ValueRef> {
    let mut iter = maps.into_iter();
    let Some(first) = iter.next() else { return HashMap::new() };
    iter.fold(first, |acc, m| acc.into_iter().filter(|(k, v)| m.get(k) == Some(v)).collect())
}

/// Propagates block-local substitutions in reachable-block DFS order;
/// returns whether any operand changed.
pub fn run(f: &mut Function) -> bool {
    let Some(entry) = f.entry_block() else { return false };
    let mut order = Vec::new();
    let mut visited = std::collections::HashSet::new();
    dfs(f, entry, &mut visited, &mut order);

    let mut changed = false;
    for block in order {
        if block == entry {
            continue;
        }
        let preds = f.predecessors(block);
        if preds.is_empty() {
            continue;
        }
        let maps: Vec<_> = preds.iter().map(|&p| edge_substitutions(f, p, block)).collect();
        let subs = intersect(maps);
        if subs.is_empty() {
            continue;
        }
        for &inst in &f.block(block).instructions.clone() {
            if f.inst(inst).opcode == Opcode::Phi {
                continue;
            }
            if apply_substitution(f, inst, &subs) {
                changed = true;
            }
        }
    }
    changed
}

fn apply_substitution(f: &mut Function, inst: InstrId, subs: &HashMap<ValueRef, ValueRef>) -> bool {
    let mut changed = false;
    let count = f.inst(inst).operands.len();
    for i in 0..count {
        let operand = f.inst(inst).operands[i];
        if let Some(&replacement) = subs.get(&operand) {
            f.set_operand(inst, i, replacement);
            changed = true;
        }
    }
    changed
}

fn dfs(f: &Function, b: BlockId, visited: &mut std::collections::HashSet<BlockId>, out: &mut Vec<BlockId>) {
    if !visited.insert(b) {
        return;
    }
    out.push(b);
    for s in f.successors(b) {
        dfs(f, s, visited, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::BinaryOp;

    #[test]
    fn equal_branch_substitutes_constant() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let t = f.create_block();

        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let zero = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 0));
        let cmp = f.make_int_compare(p0, IntPredicate::Equal, zero);
        let cmp_id = f.push_back(entry, cmp);
        let other_block = f.create_block();
        let cbr = f.make_cond_branch(ValueRef::Instr(cmp_id), t, other_block);
        f.push_back(entry, cbr);
        let ret0 = f.make_ret(None);
        f.push_back(other_block, ret0);

        let add = f.make_binary(p0, BinaryOp::Add, p0);
        let add_id = f.push_back(t, add);
        let ret = f.make_ret(Some(ValueRef::Instr(add_id)));
        f.push_back(t, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(add_id).operands[0], zero);
        assert_eq!(f.inst(add_id).operands[1], zero);
    }
}
