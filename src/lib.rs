//! # voxlogica-core
//!
//! The compiled-plan execution substrate for a VoxLogicA-2-style
//! declarative image-analysis engine: a symbolic reducer, a
//! content-addressed result store, and a dependency-driven execution
//! engine. This crate does not parse the spatial-logic DSL itself — it
//! consumes an already-parsed [`ast::Program`] and drives it to a result.
//!
//! ## Pipeline
//!
//! ```text
//! ast::Program
//!     |
//!     v
//! [reducer]   symbolic beta-reduction, content-addressed interning
//!     |
//!     v
//! plan::WorkPlan  (DAG of NodeId -> NodeSpec, plus ordered goals)
//!     |
//!     v
//! [engine]    dependency-driven parallel dispatch
//!     |              \
//!     v               v
//! store::ResultStore   registry::PrimitiveRegistry
//! (durable + ephemeral) (namespaced kernel lookup)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use voxlogica_core::{Config, Core};
//!
//! let config = Config::load()?;
//! let mut core = Core::new(config)?;
//! core.register_primitives(my_registry_builder);
//! let summary = core.run(program)?;
//! ```

pub mod ast;
pub mod config;
pub mod engine;
pub mod plan;
pub mod reducer;
pub mod registry;
pub mod store;
pub mod value;

pub use ast::{Declaration, Expr, Literal, Program, SourceLocation};
pub use config::Config;
pub use engine::{Engine, EngineLimits, GoalSink, LoggingGoalSink, RunError, RunSummary};
pub use plan::{ClosureSpec, GoalSpec, NodeId, NodeSpec, PlanError, WorkPlan};
pub use reducer::{reduce, ReduceError};
pub use registry::{Kernel, KernelError, PrimitiveRegistry, RegistryError};
pub use store::{ResultRecord, ResultStore, StoreError};
pub use value::{CanonicalizeError, OpaqueValue, Value};

use std::sync::Arc;

/// The aggregated error type surfaced by [`Core`]'s control surface (§7).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Minimal control surface gluing the reducer, store, registry, and engine
/// together for an embedding application (§6).
pub struct Core {
    config: Config,
    store: Arc<ResultStore>,
    registry: Arc<PrimitiveRegistry>,
    engine: Option<Arc<engine::Engine>>,
}

impl Core {
    /// Build a core against `config`, opening its configured durable-tier
    /// backend and starting with an empty primitive registry (§6).
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let backend: Arc<dyn store::StoreBackend> = if config.store.data_dir.as_os_str().is_empty()
        {
            Arc::new(store::InMemoryBackend::default())
        } else {
            Arc::new(store::FileBackend::open_with_compaction(
                &config.store.data_dir,
                config.store.sync_on_write,
                config.store.compaction_threshold,
            )?)
        };
        let store = Arc::new(ResultStore::open(backend)?);
        Ok(Core {
            config,
            store,
            registry: Arc::new(PrimitiveRegistry::builder().build()),
            engine: None,
        })
    }

    /// Replace the primitive registry (§4.2). Must be called before `run`.
    pub fn with_registry(mut self, registry: PrimitiveRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Reduce `program` into a plan and run it to completion (§6).
    pub fn run(&mut self, program: &Program, sink: &dyn GoalSink) -> Result<RunSummary, CoreError> {
        let plan = reduce(program, self.config.reducer.recursion_limit)?;
        let workers = if self.config.engine.workers == 0 {
            num_cpus::get()
        } else {
            self.config.engine.workers
        };
        let limits = EngineLimits {
            deadline_ms: self.config.engine.deadline_ms,
            max_inflight_map_elements: self.config.engine.max_inflight_map_elements,
        };
        let engine = Arc::new(engine::Engine::new(
            plan,
            self.registry.clone(),
            self.store.clone(),
            limits,
            workers,
            self.config.reducer.recursion_limit,
        )?);
        self.engine = Some(engine.clone());
        Ok(engine.run(sink)?)
    }

    /// Request cancellation of the currently-running plan, if any (§6).
    pub fn cancel(&self) {
        if let Some(engine) = &self.engine {
            engine.cancel_handle().cancel();
        }
    }

    /// Look up a settled result by its content address (§6).
    pub fn inspect(&self, id: &NodeId) -> Option<ResultRecord> {
        self.store.get(id)
    }
}
