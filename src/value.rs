//! # Value Type System
//!
//! Dynamically-typed payload carried between the reducer, the store and
//! primitive kernels. Unlike a statically-typed tuple system, `Value` is the
//! single carrier for constants embedded in the plan, for kernel arguments,
//! and for kernel return values — kernels declare what variants they accept
//! and produce, and the engine enforces that boundary (§6).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically-typed value flowing through the plan.
///
/// `Opaque` is the escape hatch for kernel outputs that cannot or should not
/// be serialized (large arrays, image handles) — it never crosses the
/// durable-tier boundary (see `crate::store::codec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
    /// A serialized closure descriptor, carried as a constant (§3).
    Closure(crate::plan::ClosureSpec),
    /// A handle to non-serializable kernel state; ephemeral-tier only.
    #[serde(skip, default = "opaque_unreachable")]
    Opaque(std::sync::Arc<dyn OpaqueValue>),
}

/// Marker trait for opaque, non-serializable kernel payloads.
pub trait OpaqueValue: fmt::Debug + Send + Sync {}

/// Placeholder for the `#[serde(skip)]`'d `Opaque` field's deserialize path.
/// Never actually invoked: `BincodeCodec::encode` rejects `Value::Opaque`
/// before any bytes are produced, so no serialized form ever reaches here.
fn opaque_unreachable() -> std::sync::Arc<dyn OpaqueValue> {
    unreachable!("Value::Opaque is never encoded, so it can never be decoded")
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => a == b,
            (Value::Opaque(_), Value::Opaque(_)) => false,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Closure(_) => write!(f, "<closure>"),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

/// Error raised when a constant cannot be canonicalized (§4.1, `InvalidConstant`).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CanonicalizeError {
    #[error("value is not representable in canonical JSON: {0}")]
    NotRepresentable(String),
    #[error("float value is not finite: {0}")]
    NonFiniteFloat(f64),
}

/// Convert a `Value` into canonical JSON per RFC 8785: object keys sorted
/// lexicographically, no insignificant whitespace, floats in shortest
/// round-trip form, integers without an exponent.
///
/// We hand-roll this rather than relying on `serde_json`'s default map
/// ordering (insertion order) because the canonical form is an external
/// hashing contract (§4.1): byte-identical output is required across
/// processes and platforms.
pub fn to_canonical_json(value: &Value) -> Result<serde_json::Value, CanonicalizeError> {
    use serde_json::Value as J;
    Ok(match value {
        Value::Null => J::Null,
        Value::Bool(b) => J::Bool(*b),
        Value::Int(i) => J::Number((*i).into()),
        Value::Float(x) => {
            if !x.is_finite() {
                return Err(CanonicalizeError::NonFiniteFloat(*x));
            }
            serde_json::Number::from_f64(*x)
                .map(J::Number)
                .ok_or(CanonicalizeError::NonFiniteFloat(*x))?
        }
        Value::String(s) => J::String(s.clone()),
        Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(to_canonical_json(item)?);
            }
            J::Array(out)
        }
        Value::Closure(c) => {
            let mut map = BTreeMap::new();
            map.insert("variable".to_string(), J::String(c.variable.clone()));
            map.insert(
                "body_expr_canonical".to_string(),
                J::String(c.body_expr_canonical.clone()),
            );
            map.insert(
                "captured_env_digest".to_string(),
                J::String(c.captured_env_digest.clone()),
            );
            serde_json::to_value(map).map_err(|e| CanonicalizeError::NotRepresentable(e.to_string()))?
        }
        Value::Opaque(_) => {
            return Err(CanonicalizeError::NotRepresentable(
                "opaque values are not constants and cannot be canonicalized".to_string(),
            ))
        }
    })
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}
