//! Execution engine throughput benchmarks: worker-pool scaling and
//! `dask_map` expansion over varying sequence sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;
use voxlogica_core::engine::{Engine, EngineLimits, GoalSink, RunError};
use voxlogica_core::plan::{ClosureSpec, GoalSpec, NodeSpec};
use voxlogica_core::registry::{Kernel, PrimitiveRegistry, DEFAULT_NAMESPACE};
use voxlogica_core::store::{InMemoryBackend, ResultStore};
use voxlogica_core::{ast, WorkPlan};
use voxlogica_core::Value;

struct NullSink;
impl GoalSink for NullSink {
    fn print(&self, _label: &str, _value: &Value) {}
    fn save(&self, _path: &str, _value: &Value) -> Result<(), RunError> {
        Ok(())
    }
}

fn arithmetic_registry() -> Arc<PrimitiveRegistry> {
    Arc::new(
        PrimitiveRegistry::builder()
            .register(
                DEFAULT_NAMESPACE,
                "add",
                Kernel::new(|args| {
                    let left = match args.get("left") {
                        Some(Value::Int(i)) => *i,
                        _ => 0,
                    };
                    let right = match args.get("right") {
                        Some(Value::Int(i)) => *i,
                        _ => 0,
                    };
                    Ok(Value::Int(left + right))
                })
                .with_arg_names(vec!["left", "right"]),
            )
            .build(),
    )
}

fn wide_fan_out_plan(width: u32) -> (WorkPlan, Vec<voxlogica_core::NodeId>) {
    let mut plan = WorkPlan::new();
    let mut goals_nodes = Vec::new();
    for i in 0..width {
        let left = plan.intern(NodeSpec::Constant(Value::Int(i as i64))).unwrap();
        let right = plan.intern(NodeSpec::Constant(Value::Int(1))).unwrap();
        let mut args = BTreeMap::new();
        args.insert("0".to_string(), left);
        args.insert("1".to_string(), right);
        let sum = plan
            .intern(NodeSpec::Primitive {
                operator: "add".to_string(),
                args,
            })
            .unwrap();
        plan.goals.push(GoalSpec::Print {
            label: format!("p{i}"),
            node: sum.clone(),
        });
        goals_nodes.push(sum);
    }
    (plan, goals_nodes)
}

fn dask_map_plan(elements: u32) -> WorkPlan {
    let mut plan = WorkPlan::new();
    let items: Vec<Value> = (0..elements).map(|i| Value::Int(i as i64)).collect();
    let sequence = plan.intern(NodeSpec::Constant(Value::Sequence(items))).unwrap();
    let closure = plan
        .intern(NodeSpec::Closure(ClosureSpec {
            variable: "v".to_string(),
            body_expr_canonical: "v".to_string(),
            captured_env_digest: "none".to_string(),
            body: ast::Expr::Ident("v".to_string(), ast::SourceLocation::default()),
            captured_bindings: BTreeMap::new(),
        }))
        .unwrap();
    let mut args = BTreeMap::new();
    args.insert("0".to_string(), sequence);
    args.insert("1".to_string(), closure);
    let mapped = plan
        .intern(NodeSpec::Primitive {
            operator: "dask_map".to_string(),
            args,
        })
        .unwrap();
    plan.goals.push(GoalSpec::Print {
        label: "r".to_string(),
        node: mapped,
    });
    plan
}

fn bench_worker_pool_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_fan_out_workers");
    for workers in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| {
                let (plan, _) = wide_fan_out_plan(500);
                let store = Arc::new(ResultStore::open(Arc::new(InMemoryBackend::default())).unwrap());
                let engine = Engine::new(
                    plan,
                    arithmetic_registry(),
                    store,
                    EngineLimits::default(),
                    workers,
                    1024,
                )
                .unwrap();
                engine.run(&NullSink).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_dask_map_expansion(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_dask_map");
    for elements in [10u32, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(elements), &elements, |b, &elements| {
            b.iter(|| {
                let plan = dask_map_plan(elements);
                let store = Arc::new(ResultStore::open(Arc::new(InMemoryBackend::default())).unwrap());
                let engine = Engine::new(
                    plan,
                    arithmetic_registry(),
                    store,
                    EngineLimits::default(),
                    4,
                    1024,
                )
                .unwrap();
                engine.run(&NullSink).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_worker_pool_scaling, bench_dask_map_expansion);
criterion_main!(benches);
