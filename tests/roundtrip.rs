//! Property test: any program the builder can construct prints to IR
//! text that parses back into an equivalent program (spec.md 6.1) --
//! print -> parse -> print is idempotent.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use turboc_ir::builder::{InsertDestination, Inserter};
use turboc_ir::context::Context;
use turboc_ir::instr::BinaryOp;
use turboc_ir::module::Module;
use turboc_ir::parser::parse_module;
use turboc_ir::printer::print_module;
use turboc_ir::value::{ParamId, ValueRef};

#[derive(Debug, Clone, Copy)]
enum Op {
    Add(u8),
    Sub(u8),
    Mul(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u8>().prop_map(Op::Add),
        any::<u8>().prop_map(Op::Sub),
        any::<u8>().prop_map(Op::Mul),
    ]
}

fn build_module(ops: &[Op]) -> Module {
    let ctx = Context::new();
    let i32_ty = ctx.borrow().i32_ty();
    let mut module = Module::new(ctx.clone());
    let id = module.create_function("chain", i32_ty, &[i32_ty]).unwrap();
    let f = module.function_mut(id);
    let entry = f.create_block();
    let mut inserter = Inserter::at_block(entry, InsertDestination::Back);
    let mut acc = ValueRef::Param(ParamId(0));
    for op in ops {
        let (bin_op, n) = match *op {
            Op::Add(n) => (BinaryOp::Add, n),
            Op::Sub(n) => (BinaryOp::Sub, n),
            Op::Mul(n) => (BinaryOp::Mul, n),
        };
        let c = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, n as u64));
        let inst = inserter.binary(f, acc, bin_op, c);
        acc = ValueRef::Instr(inst);
    }
    inserter.ret(f, Some(acc));
    module
}

proptest! {
    #[test]
    fn print_parse_print_is_idempotent(ops in proptest::collection::vec(op_strategy(), 0..12)) {
        let module = build_module(&ops);
        let printed_once = print_module(&module);

        let ctx2 = Context::new();
        let reparsed = parse_module(&printed_once, &ctx2).unwrap();
        let printed_twice = print_module(&reparsed);

        assert_eq!(printed_once, printed_twice);
    }
}
