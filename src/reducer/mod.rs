//! # Reducer
//!
//! Turns a parsed [`Program`](crate::ast::Program) into a [`WorkPlan`] by
//! symbolic beta-reduction: every `let`-binding and function application is
//! resolved against an environment of name -> [`NodeId`] bindings, and every
//! distinct sub-expression is interned into the plan exactly once (§4.3).

use crate::ast::{self, Declaration, Expr, Literal, Program};
use crate::plan::{ClosureSpec, GoalSpec, NodeId, NodeSpec, PlanError, WorkPlan};
use crate::value::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Errors raised while reducing a program (§7, `ReduceError`).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReduceError {
    #[error("unbound identifier: {0}")]
    UnboundIdentifier(String),
    #[error("recursion depth exceeded (limit {limit}) while reducing near {context}")]
    RecursionDepthExceeded { limit: usize, context: String },
    #[error("invalid constant: {0}")]
    InvalidConstant(String),
    #[error("malformed closure: {0}")]
    MalformedClosure(String),
    #[error("function {name} expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[derive(Debug, Clone)]
struct FunctionDef {
    params: Vec<String>,
    body: Expr,
}

/// An immutable, lexically-scoped binding environment.
///
/// Frames are linked via `Rc` so that entering a `let`/function body/for
/// body is O(1) and never mutates an outer scope — exactly the shadowing
/// discipline §4.3 requires ("inner binding shadows outer for the body").
#[derive(Debug, Clone, Default)]
struct Environment {
    parent: Option<Rc<Environment>>,
    bindings: BTreeMap<String, NodeId>,
    functions: BTreeMap<String, Rc<FunctionDef>>,
}

impl Environment {
    fn lookup(&self, name: &str) -> Option<NodeId> {
        if let Some(id) = self.bindings.get(name) {
            return Some(id.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    fn lookup_function(&self, name: &str) -> Option<Rc<FunctionDef>> {
        if let Some(f) = self.functions.get(name) {
            return Some(f.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup_function(name))
    }

    fn child_with_binding(self: &Rc<Self>, name: String, id: NodeId) -> Rc<Environment> {
        let mut bindings = BTreeMap::new();
        bindings.insert(name, id);
        Rc::new(Environment {
            parent: Some(self.clone()),
            bindings,
            functions: BTreeMap::new(),
        })
    }

    fn child_with_function(self: &Rc<Self>, name: String, def: FunctionDef) -> Rc<Environment> {
        let mut functions = BTreeMap::new();
        functions.insert(name, Rc::new(def));
        Rc::new(Environment {
            parent: Some(self.clone()),
            bindings: BTreeMap::new(),
            functions,
        })
    }

    /// All (name, NodeId) pairs visible from this frame, used to compute a
    /// closure's capture digest (§4.3). Inner bindings shadow outer ones.
    fn visible_bindings(&self) -> BTreeMap<String, NodeId> {
        let mut out = match &self.parent {
            Some(p) => p.visible_bindings(),
            None => BTreeMap::new(),
        };
        for (k, v) in &self.bindings {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

struct Reducer {
    plan: WorkPlan,
    recursion_limit: usize,
}

impl Reducer {
    fn reduce_expr(
        &mut self,
        expr: &Expr,
        env: &Rc<Environment>,
        depth: usize,
    ) -> Result<NodeId, ReduceError> {
        if depth > self.recursion_limit {
            return Err(ReduceError::RecursionDepthExceeded {
                limit: self.recursion_limit,
                context: ast::render_expr(expr),
            });
        }
        match expr {
            Expr::Const(lit) => {
                let value = literal_to_value(lit);
                Ok(self.plan.intern(NodeSpec::Constant(value))?)
            }
            Expr::Ident(name, _loc) => env
                .lookup(name)
                .ok_or_else(|| ReduceError::UnboundIdentifier(name.clone())),
            Expr::Let { name, value, body } => {
                let value_id = self.reduce_expr(value, env, depth + 1)?;
                let inner_env = env.child_with_binding(name.clone(), value_id);
                self.reduce_expr(body, &inner_env, depth + 1)
            }
            Expr::For {
                variable,
                sequence,
                body,
            } => {
                let sequence_id = self.reduce_expr(sequence, env, depth + 1)?;
                let closure_id = self.intern_closure(variable, body, env)?;
                let mut args = BTreeMap::new();
                args.insert("0".to_string(), sequence_id);
                args.insert("1".to_string(), closure_id);
                Ok(self.plan.intern(NodeSpec::Primitive {
                    operator: "dask_map".to_string(),
                    args,
                })?)
            }
            Expr::App {
                function,
                args,
                location: _,
            } => self.reduce_application(function, args, env, depth),
        }
    }

    fn intern_closure(
        &mut self,
        variable: &str,
        body: &Expr,
        env: &Rc<Environment>,
    ) -> Result<NodeId, ReduceError> {
        let free = ast::free_identifiers(body);
        let visible = env.visible_bindings();
        // Captures are the free variables minus the loop variable itself,
        // resolved against the enclosing environment (§4.3).
        let mut captures: Vec<(String, NodeId)> = Vec::new();
        for name in &free {
            if name == variable {
                continue;
            }
            if let Some(id) = visible.get(name) {
                captures.push((name.clone(), id.clone()));
            }
            // Names unresolved here may be primitive/function names used
            // inside the body's App nodes; those are resolved when the
            // engine expands the closure per element, not at intern time.
        }
        captures.sort();
        let digest_input = captures
            .iter()
            .map(|(name, id)| format!("{name}={id}"))
            .collect::<Vec<_>>()
            .join(";");
        let captured_env_digest = blake3::hash(digest_input.as_bytes()).to_hex().to_string();

        let closure = ClosureSpec {
            variable: variable.to_string(),
            body_expr_canonical: ast::render_expr(body),
            captured_env_digest,
            body: body.clone(),
            captured_bindings: captures.into_iter().collect(),
        };
        Ok(self.plan.intern(NodeSpec::Closure(closure))?)
    }

    fn reduce_application(
        &mut self,
        function: &str,
        args: &[Expr],
        env: &Rc<Environment>,
        depth: usize,
    ) -> Result<NodeId, ReduceError> {
        if let Some(def) = env.lookup_function(function) {
            if def.params.len() != args.len() {
                return Err(ReduceError::ArityMismatch {
                    name: function.to_string(),
                    expected: def.params.len(),
                    actual: args.len(),
                });
            }
            // Beta-reduction: bind each parameter to the reduced argument's
            // NodeId, then reduce the body in that extended environment.
            // Memoized implicitly — identical argument NodeIds always
            // produce the same body reduction because `intern` is pure.
            let mut call_env = env.clone();
            for (param, arg) in def.params.iter().zip(args.iter()) {
                let arg_id = self.reduce_expr(arg, env, depth + 1)?;
                call_env = call_env.child_with_binding(param.clone(), arg_id);
            }
            return self.reduce_expr(&def.body, &call_env, depth + 1);
        }

        // Not a user-defined function: a primitive operator application.
        // Resolution against the namespace table happens at execution
        // time (§4.2); the reducer only records positional argument keys.
        let mut node_args = BTreeMap::new();
        for (i, arg) in args.iter().enumerate() {
            let arg_id = self.reduce_expr(arg, env, depth + 1)?;
            node_args.insert(i.to_string(), arg_id);
        }
        Ok(self.plan.intern(NodeSpec::Primitive {
            operator: function.to_string(),
            args: node_args,
        })?)
    }
}

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(x) => Value::Float(*x),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Reduce a full program into a [`WorkPlan`] (§4.3).
///
/// Declarations are processed in order: `import` extends the plan's
/// namespace list, `def` extends the function environment, `let` extends
/// the value environment, and `print`/`save` each intern their expression
/// and append a goal in program order (§3: "goals fire in program order").
pub fn reduce(program: &Program, recursion_limit: usize) -> Result<WorkPlan, ReduceError> {
    let mut reducer = Reducer {
        plan: WorkPlan::new(),
        recursion_limit,
    };
    let mut env = Rc::new(Environment::default());

    for decl in &program.declarations {
        match decl {
            Declaration::Import(ns) => {
                reducer.plan.import_namespace(ns.clone());
            }
            Declaration::Def { name, params, body } => {
                env = env.child_with_function(
                    name.clone(),
                    FunctionDef {
                        params: params.clone(),
                        body: body.clone(),
                    },
                );
            }
            Declaration::Let { name, value } => {
                let id = reducer.reduce_expr(value, &env, 0)?;
                env = env.child_with_binding(name.clone(), id);
            }
            Declaration::Print { label, value } => {
                let id = reducer.reduce_expr(value, &env, 0)?;
                reducer.plan.goals.push(GoalSpec::Print {
                    label: label.clone(),
                    node: id,
                });
            }
            Declaration::Save { path, value } => {
                let id = reducer.reduce_expr(value, &env, 0)?;
                reducer.plan.goals.push(GoalSpec::Save {
                    path: path.clone(),
                    node: id,
                });
            }
        }
    }

    reducer.plan.validate()?;
    Ok(reducer.plan)
}

/// Expand one element of a `dask_map` closure: bind the loop variable to
/// `element_id` and re-enter reduction of the closure's body against its
/// captured bindings (§4.5a). Called by the engine once per sequence
/// element, lazily, as each element becomes available.
///
/// Interning is idempotent (§4.1), so re-expanding the same closure against
/// the same element `NodeId` across repeated runs or retries always yields
/// the same result node.
pub fn expand_closure_element(
    plan: &mut WorkPlan,
    closure: &ClosureSpec,
    element_id: NodeId,
    recursion_limit: usize,
) -> Result<NodeId, ReduceError> {
    let mut reducer = Reducer {
        plan: std::mem::take(plan),
        recursion_limit,
    };
    let base_env = Rc::new(Environment {
        parent: None,
        bindings: closure.captured_bindings.clone(),
        functions: BTreeMap::new(),
    });
    let env = base_env.child_with_binding(closure.variable.clone(), element_id);
    let result = reducer.reduce_expr(&closure.body, &env, 0);
    *plan = reducer.plan;
    result
}
