//! Dead block elimination (spec.md 4.9.5): remove blocks unreachable from
//! the entry block.

use std::collections::HashSet;

use crate::function::Function;
use crate::value::BlockId;

pub fn run(f: &mut Function) -> bool {
    let Some(entry) = f.entry_block() else { return false };
    let mut reachable = HashSet::new();
    let mut stack = vec![entry];
    while let Some(b) = stack.pop() {
        if !reachable.insert(b) {
            continue;
        }
        stack.extend(f.successors(b));
    }

    let dead: Vec<BlockId> = f.block_order().iter().copied().filter(|b| !reachable.contains(b)).collect();
    if dead.is_empty() {
        return false;
    }

    for &b in &dead {
        for &owner in f.block_order().to_vec().iter() {
            f.remove_incoming_block_from_phis(owner, b, true);
        }
    }
    for &b in &dead {
        f.clear_block(b);
        f.destroy_block(b);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn removes_unreachable_block() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[]);
        let entry = f.create_block();
        let unreachable = f.create_block();
        let ret = f.make_ret(None);
        f.push_back(entry, ret);
        let ret2 = f.make_ret(None);
        f.push_back(unreachable, ret2);

        assert!(run(&mut f));
        assert_eq!(f.block_order(), &[entry]);
    }
}
