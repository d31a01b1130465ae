//! # Plan IR & canonical hashing
//!
//! Data types for nodes, goals, closures and plans, plus the canonical
//! content-addressing scheme that gives every node a deterministic
//! [`NodeId`] (§3, §4.1).

mod canonical;

pub use canonical::{hash_node, to_canonical_string, PlanError};

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A 256-bit content address, hex-encoded (64 chars).
///
/// Two nodes have equal `NodeId`s iff their canonical serializations are
/// byte-identical (§3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a precomputed 64-hex-char digest. Only `hash_node`/`intern`
    /// should normally produce a `NodeId`; this is exposed for backends
    /// that round-trip IDs from storage.
    pub fn from_hex(hex: String) -> Self {
        NodeId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unevaluated lambda captured by a for-comprehension (§3, §4.3).
///
/// `body_expr_canonical` is the canonical textual form of the body AST
/// (not parsed back until `dask_map` expansion). `captured_env_digest` is
/// the hash of the sorted `[(name, NodeId)]` list of free variables the
/// body references, so closures with identical bodies but different
/// captures hash to distinct nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureSpec {
    pub variable: String,
    pub body_expr_canonical: String,
    pub captured_env_digest: String,
    /// The loop body's AST, carried so the engine can expand the
    /// comprehension per element (§4.5a) by substituting the loop variable
    /// and re-entering the reducer. Not part of the canonical hash input —
    /// `body_expr_canonical` already determines hash-distinctness for the
    /// body shape, so this field is purely a functional payload.
    pub body: crate::ast::Expr,
    /// The bindings captured from the enclosing environment at closure
    /// creation time (§4.3), resolved eagerly since `NodeId`s are already
    /// content-addressed values usable as-is by the per-element reduction.
    pub captured_bindings: BTreeMap<String, NodeId>,
}

impl Eq for ClosureSpec {}

/// A plan node (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeSpec {
    /// A literal scalar, string, boolean, or sequence of such.
    Constant(Value),
    /// A kernel invocation. `operator` is qualified (`ns.name`) or
    /// unqualified; resolution happens at execution time, not reduce time.
    Primitive {
        operator: String,
        args: BTreeMap<String, NodeId>,
    },
    /// An unevaluated for-comprehension body, expanded lazily by the engine
    /// (§4.5a). Canonicalizes like a constant carrying its descriptor,
    /// since it has no `NodeId` child edges of its own (see DESIGN.md).
    Closure(ClosureSpec),
}

/// An ordered side effect associated with a node's result (§3).
///
/// Goals are not content-addressed: two textually identical goals at
/// different program points both fire, in program order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GoalSpec {
    Print { label: String, node: NodeId },
    Save { path: String, node: NodeId },
}

impl GoalSpec {
    pub fn node(&self) -> &NodeId {
        match self {
            GoalSpec::Print { node, .. } => node,
            GoalSpec::Save { node, .. } => node,
        }
    }
}

/// The immutable, content-addressed DAG produced by the reducer and
/// consumed by the execution engine (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkPlan {
    pub nodes: BTreeMap<NodeId, NodeSpec>,
    pub goals: Vec<GoalSpec>,
    pub imported_namespaces: Vec<String>,
}

impl WorkPlan {
    pub fn new() -> Self {
        WorkPlan::default()
    }

    /// Compute the `NodeId` for `spec` and insert it into `nodes` if absent.
    /// Idempotent and pure in `spec`'s canonical form (§4.1 invariants i, ii).
    ///
    /// This is the ONLY sanctioned way to add a node to a plan — direct
    /// insertion into `nodes` bypasses the content-addressing contract and
    /// is forbidden by the reducer's own discipline (§4.1 invariant iii).
    pub fn intern(&mut self, spec: NodeSpec) -> Result<NodeId, PlanError> {
        let id = hash_node(&spec)?;
        self.nodes.entry(id.clone()).or_insert(spec);
        Ok(id)
    }

    /// Append a namespace to the import list, deduplicated, insertion-ordered.
    pub fn import_namespace(&mut self, ns: impl Into<String>) {
        let ns = ns.into();
        if !self.imported_namespaces.contains(&ns) {
            self.imported_namespaces.push(ns);
        }
    }

    /// Direct parents referenced in a node's `args` (§4.5 step 1).
    pub fn direct_dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        match self.nodes.get(id) {
            Some(NodeSpec::Primitive { args, .. }) => args.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Validate the plan's structural invariants (§3): every referenced
    /// `NodeId` exists, and the node graph is acyclic.
    pub fn validate(&self) -> Result<(), PlanError> {
        for (id, spec) in &self.nodes {
            if let NodeSpec::Primitive { args, .. } = spec {
                for dep in args.values() {
                    if !self.nodes.contains_key(dep) {
                        return Err(PlanError::DanglingReference {
                            node: id.clone(),
                            missing: dep.clone(),
                        });
                    }
                }
            }
        }
        for goal in &self.goals {
            if !self.nodes.contains_key(goal.node()) {
                return Err(PlanError::DanglingReference {
                    node: goal.node().clone(),
                    missing: goal.node().clone(),
                });
            }
        }
        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), PlanError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: std::collections::HashMap<&NodeId, Mark> = std::collections::HashMap::new();

        fn visit<'a>(
            id: &'a NodeId,
            plan: &'a WorkPlan,
            marks: &mut std::collections::HashMap<&'a NodeId, Mark>,
        ) -> Result<(), PlanError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(PlanError::CyclicPlan { node: id.clone() }),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(NodeSpec::Primitive { args, .. }) = plan.nodes.get(id) {
                for dep in args.values() {
                    visit(dep, plan, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for id in self.nodes.keys() {
            visit(id, self, &mut marks)?;
        }
        Ok(())
    }
}
