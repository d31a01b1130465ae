//! Resource limits for an execution run (§5.1).
//!
//! Grounded on the teacher crate's `ResourceLimits`/`ResourceError`:
//! cooperative, atomic-counter-based checks rather than a hard sandbox —
//! the engine increments counters as it dispatches work and periodically
//! compares against configured ceilings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Errors raised when a configured resource ceiling is exceeded (§7,
/// part of `RunError`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("in-flight for-comprehension element limit exceeded: {actual} elements, limit {limit}")]
    InflightMapElementsExceeded { limit: usize, actual: usize },
}

/// Configured ceilings for one run (§5.1).
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    /// Wall-clock deadline in milliseconds; 0 means unbounded.
    pub deadline_ms: u64,
    /// Maximum number of `dask_map` element nodes inflight at once across
    /// the whole run; 0 means unbounded (§4.5a, §5.1).
    pub max_inflight_map_elements: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        EngineLimits {
            deadline_ms: 0,
            max_inflight_map_elements: 0,
        }
    }
}

/// Live counters tracked during a run, checked against [`EngineLimits`].
#[derive(Clone)]
pub struct ResourceTracker {
    limits: EngineLimits,
    inflight_map_elements: Arc<AtomicUsize>,
}

impl ResourceTracker {
    pub fn new(limits: EngineLimits) -> Self {
        ResourceTracker {
            limits,
            inflight_map_elements: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserve `count` additional inflight map elements, failing without
    /// mutating the counter if the ceiling would be exceeded.
    pub fn reserve_map_elements(&self, count: usize) -> Result<(), ResourceError> {
        if self.limits.max_inflight_map_elements == 0 {
            self.inflight_map_elements.fetch_add(count, Ordering::Relaxed);
            return Ok(());
        }
        loop {
            let current = self.inflight_map_elements.load(Ordering::Relaxed);
            let next = current + count;
            if next > self.limits.max_inflight_map_elements {
                return Err(ResourceError::InflightMapElementsExceeded {
                    limit: self.limits.max_inflight_map_elements,
                    actual: next,
                });
            }
            if self
                .inflight_map_elements
                .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    pub fn release_map_elements(&self, count: usize) {
        self.inflight_map_elements.fetch_sub(count, Ordering::Relaxed);
    }
}
