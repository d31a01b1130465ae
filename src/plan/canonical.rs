//! Canonical serialization and content-addressed hashing (§4.1).
//!
//! The canonical form is an RFC 8785-flavored JSON Canonicalization Scheme:
//! object keys sorted lexicographically, no insignificant whitespace,
//! integers without an exponent, floats in IEEE-754 shortest round-trip
//! form. `serde_json`'s default `Map` is a `BTreeMap` (the `preserve_order`
//! feature is intentionally never enabled in this crate), so plain
//! `serde_json::to_string` already yields sorted keys; the only extra work
//! here is shaping each `NodeSpec` variant into its canonical object.

use super::{NodeId, NodeSpec};
use crate::value::{to_canonical_json, CanonicalizeError, Value};
use serde_json::{Map, Value as Json};

/// Errors raised while building or hashing a plan node.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    /// A constant could not be canonicalized (§4.1).
    #[error("invalid constant: {0}")]
    InvalidConstant(#[from] CanonicalizeError),
    /// A node referenced a `NodeId` not present in the plan (§3 invariant).
    #[error("node {node} references missing dependency {missing}")]
    DanglingReference { node: NodeId, missing: NodeId },
    /// The node graph contains a cycle (§3 invariant).
    #[error("plan contains a cycle reachable from {node}")]
    CyclicPlan { node: NodeId },
}

/// Render a `NodeSpec` to its canonical JSON text.
pub fn to_canonical_string(spec: &NodeSpec) -> Result<String, PlanError> {
    let json = to_canonical_object(spec)?;
    // serde_json::Value::Object defaults to a BTreeMap-backed Map (no
    // preserve_order feature), so this is already key-sorted; to_string
    // emits no insignificant whitespace.
    Ok(serde_json::to_string(&json).expect("canonical json value is always serializable"))
}

fn to_canonical_object(spec: &NodeSpec) -> Result<Json, PlanError> {
    Ok(match spec {
        NodeSpec::Constant(value) => {
            let mut map = Map::new();
            map.insert("constant".to_string(), to_canonical_json(value)?);
            Json::Object(map)
        }
        NodeSpec::Closure(closure) => {
            // A closure has no NodeId child edges (its captures are folded
            // into `captured_env_digest`), so it canonicalizes exactly like
            // a constant carrying its serialized descriptor (§3: "Constant
            // ... also the carrier for serialized closure descriptors").
            let mut map = Map::new();
            map.insert(
                "constant".to_string(),
                to_canonical_json(&Value::Closure(closure.clone()))?,
            );
            Json::Object(map)
        }
        NodeSpec::Primitive { operator, args } => {
            let mut args_map = Map::new();
            for (key, node_id) in args {
                args_map.insert(key.clone(), Json::String(node_id.as_str().to_string()));
            }
            let mut map = Map::new();
            map.insert("operator".to_string(), Json::String(operator.clone()));
            map.insert("args".to_string(), Json::Object(args_map));
            Json::Object(map)
        }
    })
}

/// Compute the deterministic [`NodeId`] for a node spec (§4.1).
///
/// Identical across processes and platforms for identical inputs: the hash
/// input is the canonical JSON byte string, hashed with BLAKE3 (256 bits,
/// hex-encoded to 64 characters).
pub fn hash_node(spec: &NodeSpec) -> Result<NodeId, PlanError> {
    let canonical = to_canonical_string(spec)?;
    let digest = blake3::hash(canonical.as_bytes());
    Ok(NodeId::from_hex(digest.to_hex().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn hash_is_stable_for_identical_spec() {
        let spec = NodeSpec::Constant(Value::Int(42));
        let a = hash_node(&spec).unwrap();
        let b = hash_node(&spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn canonical_string_has_no_whitespace() {
        let spec = NodeSpec::Constant(Value::String("hi".to_string()));
        let s = to_canonical_string(&spec).unwrap();
        assert!(!s.contains(' '));
        assert!(!s.contains('\n'));
    }

    #[test]
    fn primitive_arg_order_in_map_does_not_affect_hash() {
        let mut args_a = BTreeMap::new();
        args_a.insert("0".to_string(), NodeId::from_hex("a".repeat(64)));
        args_a.insert("1".to_string(), NodeId::from_hex("b".repeat(64)));

        let mut args_b = BTreeMap::new();
        args_b.insert("1".to_string(), NodeId::from_hex("b".repeat(64)));
        args_b.insert("0".to_string(), NodeId::from_hex("a".repeat(64)));

        let spec_a = NodeSpec::Primitive {
            operator: "add".to_string(),
            args: args_a,
        };
        let spec_b = NodeSpec::Primitive {
            operator: "add".to_string(),
            args: args_b,
        };
        assert_eq!(hash_node(&spec_a).unwrap(), hash_node(&spec_b).unwrap());
    }

    #[test]
    fn non_finite_constant_fails_to_hash() {
        let spec = NodeSpec::Constant(Value::Float(f64::INFINITY));
        assert!(hash_node(&spec).is_err());
    }

    #[test]
    fn closures_with_different_captures_hash_differently() {
        use crate::ast::{Expr, SourceLocation};
        use crate::plan::ClosureSpec;
        let body = Expr::Ident("x".to_string(), SourceLocation::default());
        let a = NodeSpec::Closure(ClosureSpec {
            variable: "x".to_string(),
            body_expr_canonical: "mul(x,x)".to_string(),
            captured_env_digest: "d1".to_string(),
            body: body.clone(),
            captured_bindings: BTreeMap::new(),
        });
        let b = NodeSpec::Closure(ClosureSpec {
            variable: "x".to_string(),
            body_expr_canonical: "mul(x,x)".to_string(),
            captured_env_digest: "d2".to_string(),
            body,
            captured_bindings: BTreeMap::new(),
        });
        assert_ne!(hash_node(&a).unwrap(), hash_node(&b).unwrap());
    }
}
