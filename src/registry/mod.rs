//! # Primitive registry
//!
//! Namespaced lookup of kernels, with deterministic resolution of
//! unqualified operator names (§4.2). Grounded on the teacher crate's
//! `Catalog` — a flat name-indexed lookup table populated once and
//! consulted by the reducer/engine — generalized to namespaces.

use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The reserved namespace consulted first for any unqualified name (§4.2).
pub const DEFAULT_NAMESPACE: &str = "default";

/// Errors raised while resolving a primitive operator (§7, `RegistryError`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("primitive not found: {0}")]
    PrimitiveNotFound(String),
}

/// Errors a kernel's `call` may raise (§7, `KernelError`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    #[error("argument type mismatch in {operator}: {detail}")]
    ArgumentTypeMismatch { operator: String, detail: String },
    #[error("argument count mismatch in {operator}: expected {expected}, got {actual}")]
    ArgumentCountMismatch {
        operator: String,
        expected: usize,
        actual: usize,
    },
    #[error("kernel panic in {operator}: {message}")]
    KernelPanic { operator: String, message: String },
}

/// A registered kernel implementation.
///
/// Kernels are pure from the engine's perspective: they consume resolved
/// argument values and return a value, never touching engine or store
/// state directly (§4.2).
pub struct Kernel {
    pub arity_hint: Option<usize>,
    /// Whether this kernel is I/O-heavy; recorded as a scheduling hint only
    /// — the engine treats effectful and pure kernels identically (§4.2).
    pub effectful: bool,
    /// Maps positional argument keys ("0", "1", ...) to the semantic names
    /// the kernel expects (§4.5b). Operators absent from this map (i.e. an
    /// empty table) receive positional keys unchanged.
    pub arg_names: Vec<&'static str>,
    call: Arc<dyn Fn(&HashMap<String, Value>) -> Result<Value, KernelError> + Send + Sync>,
}

impl Kernel {
    pub fn new(
        call: impl Fn(&HashMap<String, Value>) -> Result<Value, KernelError> + Send + Sync + 'static,
    ) -> Self {
        Kernel {
            arity_hint: None,
            effectful: false,
            arg_names: Vec::new(),
            call: Arc::new(call),
        }
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity_hint = Some(arity);
        self
    }

    pub fn effectful(mut self) -> Self {
        self.effectful = true;
        self
    }

    pub fn with_arg_names(mut self, names: Vec<&'static str>) -> Self {
        self.arg_names = names;
        self
    }

    pub fn call(&self, args: &HashMap<String, Value>) -> Result<Value, KernelError> {
        (self.call)(args)
    }
}

/// Namespaced lookup of kernels (§4.2).
///
/// Immutable after construction (§5): built once via [`PrimitiveRegistry::builder`]
/// then shared (read-only) across every worker in a run.
pub struct PrimitiveRegistry {
    // namespace -> (unqualified name -> kernel)
    namespaces: HashMap<String, HashMap<String, Arc<Kernel>>>,
}

/// A fully-qualified primitive name (`namespace.name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Builder for a [`PrimitiveRegistry`] (the only way to populate one).
#[derive(Default)]
pub struct PrimitiveRegistryBuilder {
    namespaces: HashMap<String, HashMap<String, Arc<Kernel>>>,
}

impl PrimitiveRegistryBuilder {
    pub fn register(mut self, namespace: &str, name: &str, kernel: Kernel) -> Self {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string(), Arc::new(kernel));
        self
    }

    pub fn build(self) -> PrimitiveRegistry {
        PrimitiveRegistry {
            namespaces: self.namespaces,
        }
    }
}

/// Outcome of resolving an operator name, including the winning namespace
/// and whether the resolution was ambiguous (§4.2).
pub struct Resolution {
    pub qualified: QualifiedName,
    pub kernel: Arc<Kernel>,
    pub ambiguous_with: Vec<String>,
}

impl PrimitiveRegistry {
    pub fn builder() -> PrimitiveRegistryBuilder {
        PrimitiveRegistryBuilder::default()
    }

    /// Resolve an operator name under the given imported namespaces.
    ///
    /// Qualified names (`ns.name`) bypass ordering entirely. Unqualified
    /// names are resolved in the fixed order of §4.2: `default`, then each
    /// imported namespace in declared order, then remaining registered
    /// namespaces lexicographically. First match wins; a match in a second
    /// explicitly-imported namespace is reported as `ambiguous_with` (a
    /// warning, never a hard error — §4.2).
    pub fn resolve(
        &self,
        operator_name: &str,
        imported_namespaces: &[String],
    ) -> Result<Resolution, RegistryError> {
        if let Some((ns, name)) = operator_name.split_once('.') {
            let kernel = self
                .namespaces
                .get(ns)
                .and_then(|ns_map| ns_map.get(name))
                .cloned()
                .ok_or_else(|| RegistryError::PrimitiveNotFound(operator_name.to_string()))?;
            return Ok(Resolution {
                qualified: QualifiedName {
                    namespace: ns.to_string(),
                    name: name.to_string(),
                },
                kernel,
                ambiguous_with: Vec::new(),
            });
        }

        let mut search_order: Vec<String> = vec![DEFAULT_NAMESPACE.to_string()];
        for ns in imported_namespaces {
            if !search_order.contains(ns) {
                search_order.push(ns.clone());
            }
        }
        let mut remaining: Vec<String> = self
            .namespaces
            .keys()
            .filter(|ns| !search_order.contains(ns))
            .cloned()
            .collect();
        remaining.sort();
        search_order.extend(remaining);

        let mut found: Option<(String, Arc<Kernel>)> = None;
        let mut ambiguous_with = Vec::new();
        let explicit_imports: Vec<&String> = imported_namespaces.iter().collect();

        for ns in &search_order {
            if let Some(kernel) = self
                .namespaces
                .get(ns)
                .and_then(|ns_map| ns_map.get(operator_name))
            {
                match &found {
                    None => found = Some((ns.clone(), kernel.clone())),
                    Some((first_ns, _)) => {
                        // Only two *explicitly imported* namespaces defining
                        // the same name produce an ambiguity warning (§4.2).
                        if explicit_imports.contains(&first_ns) && explicit_imports.contains(&ns) {
                            ambiguous_with.push(ns.clone());
                        }
                    }
                }
            }
        }

        let (winning_ns, kernel) = found
            .ok_or_else(|| RegistryError::PrimitiveNotFound(operator_name.to_string()))?;
        Ok(Resolution {
            qualified: QualifiedName {
                namespace: winning_ns,
                name: operator_name.to_string(),
            },
            kernel,
            ambiguous_with,
        })
    }

    pub fn list_primitives(&self) -> Vec<QualifiedName> {
        let mut out = Vec::new();
        for (ns, names) in &self.namespaces {
            for name in names.keys() {
                out.push(QualifiedName {
                    namespace: ns.clone(),
                    name: name.clone(),
                });
            }
        }
        out.sort_by(|a, b| (a.namespace.as_str(), a.name.as_str()).cmp(&(b.namespace.as_str(), b.name.as_str())));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_kernel() -> Kernel {
        Kernel::new(|args| {
            let left = match args.get("left").or_else(|| args.get("0")) {
                Some(Value::Int(i)) => *i,
                _ => {
                    return Err(KernelError::ArgumentTypeMismatch {
                        operator: "add".to_string(),
                        detail: "expected int".to_string(),
                    })
                }
            };
            let right = match args.get("right").or_else(|| args.get("1")) {
                Some(Value::Int(i)) => *i,
                _ => {
                    return Err(KernelError::ArgumentTypeMismatch {
                        operator: "add".to_string(),
                        detail: "expected int".to_string(),
                    })
                }
            };
            Ok(Value::Int(left + right))
        })
        .with_arity(2)
        .with_arg_names(vec!["left", "right"])
    }

    #[test]
    fn unqualified_resolution_prefers_default_namespace() {
        let registry = PrimitiveRegistry::builder()
            .register(DEFAULT_NAMESPACE, "add", add_kernel())
            .register("custom", "add", add_kernel())
            .build();
        let resolution = registry.resolve("add", &["custom".to_string()]).unwrap();
        assert_eq!(resolution.qualified.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn unqualified_resolution_falls_back_to_imported_namespace() {
        let registry = PrimitiveRegistry::builder()
            .register("img", "blur", add_kernel())
            .build();
        let resolution = registry.resolve("blur", &["img".to_string()]).unwrap();
        assert_eq!(resolution.qualified.namespace, "img");
    }

    #[test]
    fn unknown_primitive_fails() {
        let registry = PrimitiveRegistry::builder().build();
        assert!(matches!(
            registry.resolve("nope", &[]),
            Err(RegistryError::PrimitiveNotFound(_))
        ));
    }

    #[test]
    fn qualified_name_bypasses_ordering() {
        let registry = PrimitiveRegistry::builder()
            .register("a", "f", add_kernel())
            .register("b", "f", add_kernel())
            .build();
        let resolution = registry.resolve("b.f", &["a".to_string()]).unwrap();
        assert_eq!(resolution.qualified.namespace, "b");
    }

    #[test]
    fn two_explicit_imports_defining_same_name_are_ambiguous_but_not_fatal() {
        let registry = PrimitiveRegistry::builder()
            .register("a", "f", add_kernel())
            .register("b", "f", add_kernel())
            .build();
        let resolution = registry
            .resolve("f", &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(resolution.qualified.namespace, "a");
        assert_eq!(resolution.ambiguous_with, vec!["b".to_string()]);
    }
}
