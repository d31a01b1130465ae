//! Reducer throughput benchmarks: interning cost as program size and
//! sub-expression sharing vary.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use voxlogica_core::ast::{Declaration, Expr, Literal, Program, SourceLocation};
use voxlogica_core::reduce;

fn loc() -> SourceLocation {
    SourceLocation::default()
}

fn chain_program(depth: u32) -> Program {
    let mut expr = Expr::Const(Literal::Int(0));
    for i in 0..depth {
        expr = Expr::App {
            function: "add".to_string(),
            args: vec![expr, Expr::Const(Literal::Int(i as i64))],
            location: loc(),
        };
    }
    Program {
        declarations: vec![Declaration::Print {
            label: "r".to_string(),
            value: expr,
        }],
    }
}

fn fan_out_program(width: u32) -> Program {
    let declarations = (0..width)
        .map(|i| Declaration::Print {
            label: format!("p{i}"),
            // every print shares the same sub-expression, so interning
            // should collapse them to a single node.
            value: Expr::App {
                function: "add".to_string(),
                args: vec![Expr::Const(Literal::Int(1)), Expr::Const(Literal::Int(2))],
                location: loc(),
            },
        })
        .collect();
    Program { declarations }
}

fn bench_chain_reduction(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_chain");
    for depth in [10u32, 100, 500] {
        let program = chain_program(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &program, |b, program| {
            b.iter(|| reduce(program, 4096).unwrap());
        });
    }
    group.finish();
}

fn bench_shared_subexpression_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_fan_out_shared");
    for width in [10u32, 100, 1_000] {
        let program = fan_out_program(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &program, |b, program| {
            b.iter(|| {
                let plan = reduce(program, 4096).unwrap();
                assert_eq!(plan.nodes.len(), 3);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain_reduction, bench_shared_subexpression_dedup);
criterion_main!(benches);
