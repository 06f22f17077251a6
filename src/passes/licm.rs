//! Loop-invariant code motion (spec.md 4.9.14): hoist instructions whose
//! operands are all defined outside the loop (or are themselves already
//! invariant) into the loop's preheader.

use std::collections::HashSet;

use crate::analysis::{Dominators, Loop, LoopForest};
use crate::function::Function;
use crate::instr::Opcode;
use crate::value::{BlockId, InstrId, ValueRef};

pub fn run(f: &mut Function) -> bool {
    let dominators = Dominators::compute(f);
    let loops = LoopForest::compute(f, &dominators);
    let mut ordered = loops.all_loops();
    ordered.reverse(); // approximate innermost-first

    let mut changed = false;
    for lp in ordered {
        if process_loop(f, lp) {
            changed = true;
        }
    }
    if changed {
        super::simplify::run(f);
    }
    changed
}

fn process_loop(f: &mut Function, lp: &Loop) -> bool {
    let Some(preheader) = lp.preheader(f) else { return false };
    let blocks = &lp.blocks;

    let mut invariant: HashSet<InstrId> = HashSet::new();
    loop {
        let mut progress = false;
        for &b in f.block_order() {
            if !blocks.contains(&b) {
                continue;
            }
            for &inst in f.block(b).instructions.clone().iter() {
                if invariant.contains(&inst) {
                    continue;
                }
                if is_invariant(f, blocks, &invariant, inst, b, lp.header) {
                    invariant.insert(inst);
                    progress = true;
                }
            }
        }
        if !progress {
            break;
        }
    }

    let Some(preheader_term) = f.block(preheader).terminator() else { return false };
    let mut moved = false;
    for &b in f.block_order().to_vec().iter() {
        if !blocks.contains(&b) {
            continue;
        }
        for &inst in f.block(b).instructions.clone().iter() {
            if invariant.contains(&inst) && f.inst(inst).opcode != Opcode::Phi {
                f.unlink_instruction(inst);
                f.reinsert_before(inst, preheader_term);
                moved = true;
            }
        }
    }
    moved
}

fn is_invariant(
    f: &Function,
    blocks: &HashSet<BlockId>,
    invariant: &HashSet<InstrId>,
    inst: InstrId,
    block: BlockId,
    header: BlockId,
) -> bool {
    let data = f.inst(inst);
    if data.opcode.is_volatile() || data.opcode == Opcode::Load {
        return false;
    }
    if data.opcode == Opcode::Phi {
        if block != header {
            return false;
        }
        let count = data.phi_incoming_count();
        for i in 0..count {
            let (blk, val) = data.phi_incoming(i);
            if val != ValueRef::Instr(inst) && blocks.contains(&blk) {
                return false;
            }
        }
        return true;
    }

    data.operands.iter().all(|&operand| match operand {
        ValueRef::Instr(other) => {
            if blocks.contains(&f.inst(other).block) { invariant.contains(&other) } else { true }
        }
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instr::BinaryOp;

    #[test]
    fn hoists_pure_computation_out_of_loop() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty]);
        let entry = f.create_block();
        let header = f.create_block();
        let exit = f.create_block();
        let p0 = ValueRef::Param(crate::value::ParamId(0));

        let br = f.make_branch(header);
        f.push_back(entry, br);

        let one = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 1));
        let add = f.make_binary(p0, BinaryOp::Add, one);
        let add_id = f.push_back(header, add);
        let cbr = f.make_cond_branch(one, header, exit);
        f.push_back(header, cbr);
        let ret = f.make_ret(Some(ValueRef::Instr(add_id)));
        f.push_back(exit, ret);

        assert!(run(&mut f));
        assert_eq!(f.inst(add_id).block, entry);
    }
}
