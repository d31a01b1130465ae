//! # Execution engine
//!
//! Drives a [`WorkPlan`] to completion: resolves each node's dependencies,
//! dispatches primitive kernels through the [`PrimitiveRegistry`], expands
//! `dask_map` nodes per element as their sequence becomes available, and
//! fires goals in program order (§4.5). Grounded on the teacher crate's
//! rayon-based parallel dispatch, generalized from flat joins to recursive,
//! memoized DAG evaluation.
//!
//! Every node becomes "ready" for computation the instant something forces
//! it; [`ResultStore::claim`] is the ready-queue's dispatch point — it is
//! what guarantees a node is computed at most once even when several
//! parallel dependency chains converge on it at the same instant (§4.4,
//! §8).

pub mod cancellation;
pub mod limits;

pub use cancellation::{CancelToken, CancelledError};
pub use limits::{EngineLimits, ResourceError, ResourceTracker};

use crate::plan::{NodeId, NodeSpec, PlanError, WorkPlan};
use crate::reducer::{self, ReduceError};
use crate::registry::{KernelError, PrimitiveRegistry, RegistryError};
use crate::store::{ClaimOutcome, ResultStore};
use crate::value::Value;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Errors raised while running a plan (§7, `RunError`).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("dependency {missing} of node {node} failed: {cause}")]
    DependencyFailed {
        node: NodeId,
        missing: NodeId,
        cause: String,
    },
    #[error("closure node {0} does not carry a closure descriptor")]
    MalformedClosureNode(NodeId),
    #[error("dask_map sequence argument did not evaluate to a sequence (node {0})")]
    MapOverNonSequence(NodeId),
    #[error("goal sink error: {0}")]
    GoalSink(String),
}

/// Side effects for `print`/`save` goals (§3, §4.6).
///
/// The default [`LoggingGoalSink`] prints through `tracing` and saves via
/// the store's codec registry; callers embedding the engine may supply
/// their own (e.g. to route `save` into an application-specific sink).
pub trait GoalSink: Send + Sync {
    fn print(&self, label: &str, value: &Value);
    fn save(&self, path: &str, value: &Value) -> Result<(), RunError>;
}

/// Default sink: `print` logs at info level, `save` writes the value's
/// canonical-codec bytes to `path`.
pub struct LoggingGoalSink {
    codecs: crate::store::CodecRegistry,
}

impl Default for LoggingGoalSink {
    fn default() -> Self {
        LoggingGoalSink {
            codecs: crate::store::CodecRegistry::default(),
        }
    }
}

impl GoalSink for LoggingGoalSink {
    fn print(&self, label: &str, value: &Value) {
        tracing::info!(%label, %value, "print");
    }

    fn save(&self, path: &str, value: &Value) -> Result<(), RunError> {
        let codec = self.codecs.codec_for(value);
        let bytes = codec
            .encode(value)
            .map_err(|e| RunError::GoalSink(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| RunError::GoalSink(e.to_string()))?;
        tracing::info!(%path, "save");
        Ok(())
    }
}

/// Outcome of a completed run (§6).
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub nodes_succeeded: usize,
    pub nodes_failed: usize,
    pub goals_executed: usize,
    pub elapsed_ms: u64,
}

/// Drives a single [`WorkPlan`] to completion against a [`PrimitiveRegistry`]
/// and a [`ResultStore`] (§4.5).
pub struct Engine {
    plan: Mutex<WorkPlan>,
    registry: Arc<PrimitiveRegistry>,
    store: Arc<ResultStore>,
    tracker: ResourceTracker,
    cancel: CancelToken,
    recursion_limit: usize,
    pool: rayon::ThreadPool,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl Engine {
    pub fn new(
        plan: WorkPlan,
        registry: Arc<PrimitiveRegistry>,
        store: Arc<ResultStore>,
        limits: EngineLimits,
        workers: usize,
        recursion_limit: usize,
    ) -> Result<Self, RunError> {
        plan.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .expect("worker pool construction must succeed for a valid thread count");
        Ok(Engine {
            plan: Mutex::new(plan),
            registry,
            store,
            tracker: ResourceTracker::new(limits),
            cancel: CancelToken::new(limits.deadline_ms),
            recursion_limit,
            pool,
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }

    /// Request cancellation of an in-progress run (§6 `cancel()`).
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every goal in the plan to completion, in program order (§4.5, §3).
    pub fn run(&self, sink: &dyn GoalSink) -> Result<RunSummary, RunError> {
        let start = Instant::now();
        let goals = self.plan.lock().goals.clone();

        for goal in &goals {
            self.cancel.check()?;
            let value = self.pool.install(|| self.force(goal.node()))?;
            match goal {
                crate::plan::GoalSpec::Print { label, .. } => sink.print(label, &value),
                crate::plan::GoalSpec::Save { path, .. } => sink.save(path, &value)?,
            }
        }

        Ok(RunSummary {
            nodes_succeeded: self.succeeded.load(Ordering::Relaxed),
            nodes_failed: self.failed.load(Ordering::Relaxed),
            goals_executed: goals.len(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Look up a settled result without forcing computation (§6 `inspect`).
    pub fn inspect(&self, id: &NodeId) -> Option<crate::store::ResultRecord> {
        self.store.get(id)
    }

    /// Ensure `id`'s result is computed (claiming it if nobody else has),
    /// and return its value. This is the engine's core scheduling step:
    /// recursion over `force` IS the ready-queue, since a dependency only
    /// becomes eligible for work the moment a caller forces it (§4.5).
    fn force(&self, id: &NodeId) -> Result<Value, RunError> {
        self.cancel.check()?;
        match self.store.claim(id) {
            ClaimOutcome::AlreadySucceeded(value) => return Ok(value),
            ClaimOutcome::AlreadyFailed(message) => {
                return Err(RunError::DependencyFailed {
                    node: id.clone(),
                    missing: id.clone(),
                    cause: message,
                })
            }
            ClaimOutcome::AlreadyComputing => {
                let cancel = &self.cancel;
                return match self
                    .store
                    .await_result_cancellable(id, &|| cancel.is_cancelled())
                {
                    Some(crate::store::ResultRecord::Success(value)) => Ok(value),
                    Some(crate::store::ResultRecord::Failure(message)) => {
                        Err(RunError::DependencyFailed {
                            node: id.clone(),
                            missing: id.clone(),
                            cause: message,
                        })
                    }
                    // Cancelled while parked waiting on another worker's
                    // claim; `check()` recomputes and returns the error.
                    None => Err(self.cancel.check().unwrap_err().into()),
                }
            }
            ClaimOutcome::Claimed => {}
        }

        let result = self.compute(id);
        match &result {
            Ok(value) => {
                self.store.put_success(id, value.clone())?;
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.store.put_failure(id, e.to_string())?;
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn compute(&self, id: &NodeId) -> Result<Value, RunError> {
        let spec = self
            .plan
            .lock()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| RunError::Plan(PlanError::DanglingReference {
                node: id.clone(),
                missing: id.clone(),
            }))?;

        match spec {
            NodeSpec::Constant(value) => Ok(value),
            NodeSpec::Closure(closure) => Ok(Value::Closure(closure)),
            NodeSpec::Primitive { operator, args } if operator == "dask_map" => {
                self.compute_dask_map(id, &args)
            }
            NodeSpec::Primitive { operator, args } => self.compute_primitive(&operator, &args),
        }
    }

    fn compute_primitive(
        &self,
        operator: &str,
        args: &std::collections::BTreeMap<String, NodeId>,
    ) -> Result<Value, RunError> {
        let imported = self.plan.lock().imported_namespaces.clone();
        let resolution = self.registry.resolve(operator, &imported)?;
        if !resolution.ambiguous_with.is_empty() {
            tracing::warn!(
                operator,
                alternates = ?resolution.ambiguous_with,
                "ambiguous primitive resolution"
            );
        }

        let values: Result<Vec<(String, Value)>, RunError> = args
            .par_iter()
            .map(|(k, dep)| self.force(dep).map(|v| (k.clone(), v)))
            .collect();
        let values = values?;

        let mut call_args: HashMap<String, Value> = HashMap::with_capacity(values.len());
        for (key, value) in values {
            let mapped_key = key
                .parse::<usize>()
                .ok()
                .and_then(|i| resolution.kernel.arg_names.get(i))
                .map(|name| name.to_string())
                .unwrap_or(key);
            call_args.insert(mapped_key, value);
        }

        Ok(resolution.kernel.call(&call_args)?)
    }

    fn compute_dask_map(
        &self,
        id: &NodeId,
        args: &std::collections::BTreeMap<String, NodeId>,
    ) -> Result<Value, RunError> {
        let sequence_id = args
            .get("0")
            .ok_or_else(|| RunError::MapOverNonSequence(id.clone()))?;
        let closure_id = args
            .get("1")
            .ok_or_else(|| RunError::MalformedClosureNode(id.clone()))?;

        let sequence_value = self.force(sequence_id)?;
        let closure_value = self.force(closure_id)?;
        let closure = match closure_value {
            Value::Closure(c) => c,
            _ => return Err(RunError::MalformedClosureNode(closure_id.clone())),
        };

        let elements: Vec<Value> = match sequence_value {
            Value::Sequence(items) => items,
            other => vec![other],
        };

        let reserved = elements.len();
        self.tracker.reserve_map_elements(reserved)?;
        let result = (|| -> Result<Value, RunError> {
            let element_ids: Vec<NodeId> = elements
                .into_iter()
                .map(|element| {
                    let mut plan = self.plan.lock();
                    plan.intern(NodeSpec::Constant(element)).map_err(RunError::from)
                })
                .collect::<Result<_, _>>()?;

            let result_node_ids: Vec<NodeId> = element_ids
                .into_iter()
                .map(|element_id| {
                    let mut plan = self.plan.lock();
                    reducer::expand_closure_element(
                        &mut plan,
                        &closure,
                        element_id,
                        self.recursion_limit,
                    )
                    .map_err(RunError::from)
                })
                .collect::<Result<_, _>>()?;

            let values: Result<Vec<Value>, RunError> = result_node_ids
                .par_iter()
                .map(|node_id| self.force(node_id))
                .collect();
            Ok(Value::Sequence(values?))
        })();
        // Release exactly what was reserved above, regardless of whether the
        // expansion succeeded — an error partway through still leaves every
        // reserved slot occupied until released here.
        self.tracker.release_map_elements(reserved);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::NodeSpec;
    use crate::registry::Kernel;
    use crate::store::InMemoryBackend;
    use std::collections::BTreeMap;

    fn add_registry() -> Arc<PrimitiveRegistry> {
        Arc::new(
            PrimitiveRegistry::builder()
                .register(
                    crate::registry::DEFAULT_NAMESPACE,
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

    struct NullSink;
    impl GoalSink for NullSink {
        fn print(&self, _label: &str, _value: &Value) {}
        fn save(&self, _path: &str, _value: &Value) -> Result<(), RunError> {
            Ok(())
        }
    }

    #[test]
    fn running_a_simple_plan_produces_the_expected_sum() {
        let mut plan = WorkPlan::new();
        let two = plan.intern(NodeSpec::Constant(Value::Int(2))).unwrap();
        let three = plan.intern(NodeSpec::Constant(Value::Int(3))).unwrap();
        let mut primitive_args = BTreeMap::new();
        primitive_args.insert("0".to_string(), two);
        primitive_args.insert("1".to_string(), three);
        let sum = plan
            .intern(NodeSpec::Primitive {
                operator: "add".to_string(),
                args: primitive_args,
            })
            .unwrap();
        plan.goals.push(crate::plan::GoalSpec::Print {
            label: "r".to_string(),
            node: sum.clone(),
        });

        let store = Arc::new(ResultStore::open(Arc::new(InMemoryBackend::default())).unwrap());
        let engine = Engine::new(
            plan,
            add_registry(),
            store.clone(),
            EngineLimits::default(),
            2,
            1024,
        )
        .unwrap();
        let summary = engine.run(&NullSink).unwrap();
        assert_eq!(summary.goals_executed, 1);
        assert!(matches!(
            store.get(&sum),
            Some(crate::store::ResultRecord::Success(Value::Int(5)))
        ));
    }

    #[test]
    fn forcing_the_same_node_twice_computes_it_once() {
        let mut plan = WorkPlan::new();
        let constant = plan.intern(NodeSpec::Constant(Value::Int(9))).unwrap();
        plan.goals.push(crate::plan::GoalSpec::Print {
            label: "a".to_string(),
            node: constant.clone(),
        });
        plan.goals.push(crate::plan::GoalSpec::Print {
            label: "b".to_string(),
            node: constant,
        });

        let store = Arc::new(ResultStore::open(Arc::new(InMemoryBackend::default())).unwrap());
        let engine = Engine::new(
            plan,
            add_registry(),
            store,
            EngineLimits::default(),
            2,
            1024,
        )
        .unwrap();
        let summary = engine.run(&NullSink).unwrap();
        assert_eq!(summary.nodes_succeeded, 1);
        assert_eq!(summary.goals_executed, 2);
    }

    #[test]
    fn dask_map_expands_one_result_per_element() {
        let mut plan = WorkPlan::new();
        let sequence = plan
            .intern(NodeSpec::Constant(Value::Sequence(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
            ])))
            .unwrap();
        let closure = plan
            .intern(NodeSpec::Closure(crate::plan::ClosureSpec {
                variable: "v".to_string(),
                body_expr_canonical: "v".to_string(),
                captured_env_digest: "none".to_string(),
                body: crate::ast::Expr::Ident("v".to_string(), crate::ast::SourceLocation::default()),
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
        plan.goals.push(crate::plan::GoalSpec::Print {
            label: "r".to_string(),
            node: mapped.clone(),
        });

        let store = Arc::new(ResultStore::open(Arc::new(InMemoryBackend::default())).unwrap());
        let engine = Engine::new(
            plan,
            add_registry(),
            store.clone(),
            EngineLimits::default(),
            2,
            1024,
        )
        .unwrap();
        engine.run(&NullSink).unwrap();
        assert!(matches!(
            store.get(&mapped),
            Some(crate::store::ResultRecord::Success(Value::Sequence(ref items))) if items.len() == 3
        ));
    }

    #[test]
    fn cancelling_before_run_short_circuits() {
        let mut plan = WorkPlan::new();
        let constant = plan.intern(NodeSpec::Constant(Value::Int(1))).unwrap();
        plan.goals.push(crate::plan::GoalSpec::Print {
            label: "a".to_string(),
            node: constant,
        });
        let store = Arc::new(ResultStore::open(Arc::new(InMemoryBackend::default())).unwrap());
        let engine = Engine::new(
            plan,
            add_registry(),
            store,
            EngineLimits::default(),
            1,
            1024,
        )
        .unwrap();
        engine.cancel_handle().cancel();
        assert!(engine.run(&NullSink).is_err());
    }
}
