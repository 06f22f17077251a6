//! Phi minimization via SCC (spec.md 4.9.10): a strongly-connected group of
//! Phis that only reference each other and exactly one value from outside
//! the group is entirely trivial and collapses to that one value (Aycock &
//! Horspool's generalization of single-incoming-value collapse to cyclic
//! Phi references, e.g. a pair of loop-carried variables that merely
//! mirror each other).

use std::collections::{HashMap, HashSet};

use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{InstrId, ValueRef};

struct Tarjan {
    index_counter: usize,
    stack: Vec<InstrId>,
    on_stack: HashSet<InstrId>,
    indices: HashMap<InstrId, usize>,
    low_links: HashMap<InstrId, usize>,
    sccs: Vec<Vec<InstrId>>,
}

fn phi_successors(f: &Function, phi: InstrId, phis: &HashSet<InstrId>) -> Vec<InstrId> {
    let count = f.inst(phi).phi_incoming_count();
    let mut out = Vec::new();
    for i in 0..count {
        if let ValueRef::Instr(other) = f.inst(phi).phi_incoming(i).1 {
            if other != phi && phis.contains(&other) {
                out.push(other);
            }
        }
    }
    out
}

fn strong_connect(f: &Function, v: InstrId, phis: &HashSet<InstrId>, state: &mut Tarjan) {
    state.indices.insert(v, state.index_counter);
    state.low_links.insert(v, state.index_counter);
    state.index_counter += 1;
    state.stack.push(v);
    state.on_stack.insert(v);

    for w in phi_successors(f, v, phis) {
        if !state.indices.contains_key(&w) {
            strong_connect(f, w, phis, state);
            let low = state.low_links[&v].min(state.low_links[&w]);
            state.low_links.insert(v, low);
        } else if state.on_stack.contains(&w) {
            let low = state.low_links[&v].min(state.indices[&w]);
            state.low_links.insert(v, low);
        }
    }

    if state.low_links[&v] == state.indices[&v] {
        let mut component = Vec::new();
        loop {
            let w = state.stack.pop().unwrap();
            state.on_stack.remove(&w);
            component.push(w);
            if w == v {
                break;
            }
        }
        state.sccs.push(component);
    }
}

pub fn run(f: &mut Function) -> bool {
    let phis: HashSet<InstrId> =
        f.all_instruction_ids().into_iter().filter(|&id| f.inst(id).opcode == Opcode::Phi).collect();
    if phis.is_empty() {
        return false;
    }

    let mut state = Tarjan {
        index_counter: 0,
        stack: Vec::new(),
        on_stack: HashSet::new(),
        indices: HashMap::new(),
        low_links: HashMap::new(),
        sccs: Vec::new(),
    };
    let mut ordered: Vec<InstrId> = phis.iter().copied().collect();
    ordered.sort_by_key(|i| i.0);
    for &v in &ordered {
        if !state.indices.contains_key(&v) {
            strong_connect(f, v, &phis, &mut state);
        }
    }

    let mut changed = false;
    for scc in state.sccs {
        let scc_set: HashSet<InstrId> = scc.iter().copied().collect();
        let mut external: HashSet<ValueRef> = HashSet::new();
        for &phi in &scc {
            let count = f.inst(phi).phi_incoming_count();
            for i in 0..count {
                let value = f.inst(phi).phi_incoming(i).1;
                let is_internal = matches!(value, ValueRef::Instr(v) if scc_set.contains(&v));
                if !is_internal {
                    external.insert(value);
                }
            }
        }
        if external.len() != 1 {
            continue;
        }
        let replacement = *external.iter().next().unwrap();
        for &phi in &scc {
            f.replace_uses(ValueRef::Instr(phi), replacement);
        }
        for &phi in &scc {
            f.destroy_instruction(phi);
        }
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::value::BlockId;

    #[test]
    fn mutually_referential_phis_collapse() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let header = f.create_block();

        let p0 = ValueRef::Param(crate::value::ParamId(0));
        let br = f.make_branch(header);
        f.push_back(entry, br);

        let phi_a = f.make_phi(i32_ty, Vec::new());
        let phi_a_id = f.push_back(header, phi_a);
        let phi_b = f.make_phi(i32_ty, Vec::new());
        let phi_b_id = f.push_back(header, phi_b);

        f.add_incoming(phi_a_id, entry, p0);
        f.add_incoming(phi_a_id, header, ValueRef::Instr(phi_b_id));
        f.add_incoming(phi_b_id, entry, p0);
        f.add_incoming(phi_b_id, header, ValueRef::Instr(phi_a_id));

        let one = ValueRef::Const(ctx.borrow_mut().get_constant(ctx.borrow().i1_ty(), 1));
        let exit = f.create_block();
        let cbr = f.make_cond_branch(one, header, exit);
        f.push_back(header, cbr);
        let ret = f.make_ret(Some(ValueRef::Instr(phi_a_id)));
        let ret_id = f.push_back(exit, ret);
        let _ = BlockId(0);

        assert!(run(&mut f));
        assert_eq!(f.inst(ret_id).operands[0], p0);
    }
}
