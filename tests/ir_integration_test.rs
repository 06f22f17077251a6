//! End-to-end parse -> validate -> run-passes -> print tests over small
//! fixture programs, exercising the textual IR surface and the pass
//! pipeline end to end.

use pretty_assertions::assert_eq;
use turboc_ir::parser::parse_module;
use turboc_ir::pipeline::{PassManager, PassPipelineConfig};
use turboc_ir::printer::print_module;
use turboc_ir::validator;
use turboc_ir::Context;

const MAX_FUNCTION: &str = "
i32 max(i32 a, i32 b) {
entry:
  v0 = cmp slt i32 a, b
  bcond i1 v0, block_2, block_3
block_2:
  ret i32 b
block_3:
  ret i32 a
}
";

#[test]
fn parses_validates_and_prints_the_spec_example() {
    let ctx = Context::new();
    let module = parse_module(MAX_FUNCTION, &ctx).unwrap();
    let id = module.find_function("max").unwrap();
    validator::validate(module.function(id), &ctx).unwrap();

    let printed = print_module(&module);
    assert!(printed.contains("max"));
    assert!(printed.contains("bcond"));
}

#[test]
fn constant_condition_collapses_through_the_default_pipeline() {
    let source = "
i32 pick() {
entry:
  v0 = cmp eq i32 1, 1
  bcond i1 v0, block_2, block_3
block_2:
  ret i32 10
block_3:
  ret i32 20
}
";
    let ctx = Context::new();
    let mut module = parse_module(source, &ctx).unwrap();
    let id = module.find_function("pick").unwrap();

    let manager = PassManager::new(PassPipelineConfig::default());
    let changed = manager.run(&mut module).unwrap();
    assert!(changed);

    let f = module.function(id);
    validator::validate(f, &ctx).unwrap();
    // Folding the always-true branch should leave a single reachable
    // path returning the constant 10.
    assert_eq!(f.block_order().len(), 1);
}

#[test]
fn strict_mode_revalidates_after_every_pass() {
    let ctx = Context::new();
    let mut module = parse_module(MAX_FUNCTION, &ctx).unwrap();
    let manager = PassManager::new(PassPipelineConfig { strict: true, ..PassPipelineConfig::default() });
    assert!(manager.run(&mut module).is_ok());
}

#[test]
fn counted_loop_survives_the_full_pipeline() {
    let source = "
i32 sum_to(i32 n) {
entry:
  branch block_header
block_header:
  v0 = phi i32 [entry: 0, block_header: v2]
  v1 = phi i32 [entry: 0, block_header: v3]
  v2 = add i32 v0, v1
  v3 = add i32 v1, 1
  v4 = cmp slt i32 v3, n
  bcond i1 v4, block_header, block_exit
block_exit:
  ret i32 v2
}
";
    let ctx = Context::new();
    let mut module = parse_module(source, &ctx).unwrap();
    let id = module.find_function("sum_to").unwrap();

    let manager = PassManager::new(PassPipelineConfig { strict: true, ..PassPipelineConfig::default() });
    manager.run(&mut module).unwrap();

    validator::validate(module.function(id), &ctx).unwrap();
}
