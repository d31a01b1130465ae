//! # AST contract
//!
//! The core does not parse source text — the DSL grammar is an external
//! collaborator (§1, §6). This module defines the AST shape the reducer
//! consumes: whatever produces a parse tree for the VoxLogicA-2 DSL must
//! produce (or be adapted into) these types.

use serde::{Deserialize, Serialize};

/// A source location, carried through reduction for error messages (§4.3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

/// A literal constant as written in source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// An expression in the VoxLogicA-2 DSL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal constant.
    Const(Literal),
    /// An identifier lookup (§4.3).
    Ident(String, SourceLocation),
    /// Function application `f(e1, ..., en)` (§4.3). `f` may be a
    /// user-defined function name or an (unqualified or qualified)
    /// primitive operator name.
    App {
        function: String,
        args: Vec<Expr>,
        location: SourceLocation,
    },
    /// `let x = e1 in e2` (§4.3).
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    /// `for x in e1 do e2` (§4.3). Reduced into a `dask_map` primitive
    /// node over a lazily-expanded closure.
    For {
        variable: String,
        sequence: Box<Expr>,
        body: Box<Expr>,
    },
}

/// A top-level declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    /// `import "ns"` (§4.3).
    Import(String),
    /// `def f(p1, ..., pn) = body` (§4.3). Does not produce a node.
    Def {
        name: String,
        params: Vec<String>,
        body: Expr,
    },
    /// `let x = e1` at the top level, extending the environment for
    /// subsequent declarations.
    Let { name: String, value: Expr },
    /// `print label e` (§3).
    Print { label: String, value: Expr },
    /// `save path e` (§3).
    Save { path: String, value: Expr },
}

/// A complete parsed program: an ordered list of declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

/// Render an expression back to deterministic, parseable-equivalent text.
///
/// Used for two purposes that both require a stable textual form: (1) the
/// `body_expr_canonical` field of a `ClosureSpec` (§3, §4.3), and (2) the
/// free-variable digest computation, which needs to identify identifiers
/// inside the body without a full scope analysis pass (§4.3).
///
/// This is NOT the canonical plan-node JSON form (§4.1) — it is a
/// deterministic source-level rendering, only used as an opaque string
/// that two structurally-identical expressions produce identically.
pub fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Const(Literal::Bool(b)) => b.to_string(),
        Expr::Const(Literal::Int(i)) => i.to_string(),
        Expr::Const(Literal::Float(x)) => format!("{x:?}"),
        Expr::Const(Literal::String(s)) => format!("{s:?}"),
        Expr::Ident(name, _) => name.clone(),
        Expr::App { function, args, .. } => {
            let rendered_args: Vec<String> = args.iter().map(render_expr).collect();
            format!("{function}({})", rendered_args.join(","))
        }
        Expr::Let { name, value, body } => {
            format!("let {name}={} in {}", render_expr(value), render_expr(body))
        }
        Expr::For {
            variable,
            sequence,
            body,
        } => format!(
            "for {variable} in {} do {}",
            render_expr(sequence),
            render_expr(body)
        ),
    }
}

/// Collect the free identifiers referenced in `expr`, i.e. those not bound
/// by an enclosing `let` or `for` within the expression itself (§4.3, used
/// for the closure capture digest).
pub fn free_identifiers(expr: &Expr) -> std::collections::BTreeSet<String> {
    fn walk(expr: &Expr, bound: &mut Vec<String>, out: &mut std::collections::BTreeSet<String>) {
        match expr {
            Expr::Const(_) => {}
            Expr::Ident(name, _) => {
                if !bound.contains(name) {
                    out.insert(name.clone());
                }
            }
            Expr::App { args, .. } => {
                for arg in args {
                    walk(arg, bound, out);
                }
            }
            Expr::Let { name, value, body } => {
                walk(value, bound, out);
                bound.push(name.clone());
                walk(body, bound, out);
                bound.pop();
            }
            Expr::For {
                variable,
                sequence,
                body,
            } => {
                walk(sequence, bound, out);
                bound.push(variable.clone());
                walk(body, bound, out);
                bound.pop();
            }
        }
    }
    let mut bound = Vec::new();
    let mut out = std::collections::BTreeSet::new();
    walk(expr, &mut bound, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_identifiers_excludes_bound_variables() {
        let expr = Expr::Let {
            name: "x".to_string(),
            value: Box::new(Expr::Const(Literal::Int(1))),
            body: Box::new(Expr::App {
                function: "add".to_string(),
                args: vec![
                    Expr::Ident("x".to_string(), SourceLocation::default()),
                    Expr::Ident("y".to_string(), SourceLocation::default()),
                ],
                location: SourceLocation::default(),
            }),
        };
        let free = free_identifiers(&expr);
        assert!(free.contains("y"));
        assert!(!free.contains("x"));
    }

    #[test]
    fn render_expr_is_deterministic() {
        let expr = Expr::App {
            function: "add".to_string(),
            args: vec![Expr::Const(Literal::Int(2)), Expr::Const(Literal::Int(3))],
            location: SourceLocation::default(),
        };
        assert_eq!(render_expr(&expr), render_expr(&expr.clone()));
        assert_eq!(render_expr(&expr), "add(2,3)");
    }
}
