//! Cooperative cancellation for an in-flight run (§4.5, §5.1).
//!
//! Grounded on the teacher crate's `QueryTimeout`: an atomic flag shared
//! across worker threads, checked between node dispatches rather than
//! preempting a kernel mid-call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A run exceeded its deadline or was explicitly cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledError {
    pub elapsed_ms: u64,
    pub deadline_exceeded: bool,
}

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.deadline_exceeded {
            write!(f, "run cancelled after {}ms (deadline exceeded)", self.elapsed_ms)
        } else {
            write!(f, "run cancelled after {}ms", self.elapsed_ms)
        }
    }
}

impl std::error::Error for CancelledError {}

/// Shared cancellation flag for one run, cloneable across worker threads.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    started: Instant,
    deadline: Option<Duration>,
}

impl CancelToken {
    pub fn new(deadline_ms: u64) -> Self {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            deadline: if deadline_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(deadline_ms))
            },
        }
    }

    /// Request cancellation (§6 `cancel()`).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Checked by workers between node dispatches (§4.5, §5.1).
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(CancelledError {
                elapsed_ms: self.started.elapsed().as_millis() as u64,
                deadline_exceeded: false,
            });
        }
        if let Some(deadline) = self.deadline {
            if self.started.elapsed() > deadline {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(CancelledError {
                    elapsed_ms: self.started.elapsed().as_millis() as u64,
                    deadline_exceeded: true,
                });
            }
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new(0);
        assert!(token.check().is_ok());
    }

    #[test]
    fn explicit_cancel_is_observed() {
        let token = CancelToken::new(0);
        token.cancel();
        assert!(token.check().is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn zero_deadline_means_unbounded() {
        let token = CancelToken::new(0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(token.check().is_ok());
    }

    #[test]
    fn deadline_in_the_past_trips_immediately() {
        let token = CancelToken::new(1);
        std::thread::sleep(Duration::from_millis(5));
        let err = token.check().unwrap_err();
        assert!(err.deadline_exceeded);
    }
}
