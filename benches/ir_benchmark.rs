use criterion::{black_box, criterion_group, criterion_main, Criterion};
use turboc_ir::parser::parse_module;
use turboc_ir::pipeline::{PassManager, PassPipelineConfig};
use turboc_ir::Context;

fn benchmark_simple_program(c: &mut Criterion) {
    let source = r#"
i32 main() {
entry:
  v0 = add i32 42, 0
  ret i32 v0
}
"#;

    c.bench_function("parse_simple", |b| {
        b.iter(|| {
            let ctx = Context::new();
            parse_module(black_box(source), &ctx).unwrap()
        });
    });
}

fn benchmark_complex_program(c: &mut Criterion) {
    let mut source = String::new();
    for i in 0..50 {
        source.push_str(&format!(
            "i32 function_{i}(i32 x) {{\nentry:\n  v0 = mul i32 x, {i}\n  ret i32 v0\n}}\n"
        ));
    }
    source.push_str(
        "i32 main() {\nentry:\n  v0 = call i32 function_0(i32 42)\n  ret i32 v0\n}\n",
    );

    c.bench_function("parse_complex", |b| {
        b.iter(|| {
            let ctx = Context::new();
            parse_module(black_box(&source), &ctx).unwrap()
        });
    });
}

fn benchmark_optimization_passes(c: &mut Criterion) {
    let source = r#"
i32 compute() {
entry:
  v0 = add i32 10, 20
  v1 = mul i32 v0, 2
  v2 = sdiv i32 v1, 2
  ret i32 v2
}
"#;

    c.bench_function("pipeline_default", |b| {
        b.iter(|| {
            let ctx = Context::new();
            let mut module = parse_module(black_box(source), &ctx).unwrap();
            let manager = PassManager::new(PassPipelineConfig::default());
            manager.run(&mut module).unwrap();
        });
    });
}

fn benchmark_inlining(c: &mut Criterion) {
    let source = r#"
i32 add_one(i32 p) {
entry:
  v0 = add i32 p, 1
  ret i32 v0
}
i32 main() {
entry:
  v0 = call i32 add_one(i32 41)
  ret i32 v0
}
"#;

    c.bench_function("pipeline_with_inline", |b| {
        b.iter(|| {
            let ctx = Context::new();
            let mut module = parse_module(black_box(source), &ctx).unwrap();
            let manager = PassManager::new(PassPipelineConfig::default());
            manager.run(&mut module).unwrap();
        });
    });
}

criterion_group!(
    benches,
    benchmark_simple_program,
    benchmark_complex_program,
    benchmark_optimization_passes,
    benchmark_inlining
);
criterion_main!(benches);
