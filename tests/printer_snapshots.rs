//! Snapshot tests for the deterministic textual printer (spec.md 6.1):
//! pin the exact rendering of a few representative shapes so drift in
//! the format is caught in review.

use turboc_ir::context::Context;
use turboc_ir::function::Function;
use turboc_ir::instr::IntPredicate;
use turboc_ir::module::Module;
use turboc_ir::printer::print_module;
use turboc_ir::value::{ParamId, ValueRef};

#[test]
fn diamond_max_function() {
    let ctx = Context::new();
    let i32_ty = ctx.borrow().i32_ty();
    let mut module = Module::new(ctx.clone());
    let id = module.create_function("max", i32_ty, &[i32_ty, i32_ty]).unwrap();
    let f = module.function_mut(id);

    let entry = f.create_block();
    let on_true = f.create_block();
    let on_false = f.create_block();

    let a = ValueRef::Param(ParamId(0));
    let b = ValueRef::Param(ParamId(1));

    let cmp = f.make_int_compare(a, IntPredicate::LtS, b);
    let cmp_id = f.push_back(entry, cmp);
    let bcond = f.make_cond_branch(ValueRef::Instr(cmp_id), on_true, on_false);
    f.push_back(entry, bcond);

    let ret_b = f.make_ret(Some(b));
    f.push_back(on_true, ret_b);
    let ret_a = f.make_ret(Some(a));
    f.push_back(on_false, ret_a);

    let printed = print_module(&module);
    insta::assert_snapshot!(printed, @r###"
    i32 max(i32 v0, i32 v1) {
    entry:
      v2 = cmp slt i32 v0, v1
      bcond i1 v2, block_1, block_2
    block_1:
      ret i32 v1
    block_2:
      ret i32 v0
    }
    "###);
}

#[test]
fn extern_declaration_has_no_body() {
    let ctx = Context::new();
    let i32_ty = ctx.borrow().i32_ty();
    let mut module = Module::new(ctx.clone());
    module.create_function("puts", i32_ty, &[i32_ty]).unwrap();

    let printed = print_module(&module);
    insta::assert_snapshot!(printed, @"extern i32 puts(i32);
");
}
