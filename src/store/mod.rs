//! # Result store
//!
//! A content-addressed cache from [`NodeId`] to computed result, split into
//! a durable tier (survives restarts, bincode-serialized) and an ephemeral
//! tier (in-memory only, for `Value::Opaque` payloads that cannot be
//! serialized) — §4.4. Coordinates concurrent workers computing the same
//! node via an atomic claim protocol so a node is computed at most once
//! per store lifetime, even when many workers become ready for it at the
//! same instant (§4.4 invariant, §8 "at-most-once" property).

pub mod backend;
pub mod codec;

pub use backend::{BackendError, DurableRecord, FileBackend, InMemoryBackend, StoreBackend};
pub use codec::{Codec, CodecError, CodecRegistry};

use crate::plan::NodeId;
use crate::value::Value;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Errors raised by the result store (§7, `StoreError`).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// `forget` was called on a node that is still computing or has active
    /// awaiters (§4.4: deletion is restricted to terminal records with no
    /// active awaiters).
    #[error("node {0} is still computing or has active awaiters; cannot forget")]
    StoreBusy(NodeId),
}

/// A node's settled result.
#[derive(Debug, Clone)]
pub enum ResultRecord {
    Success(Value),
    Failure(String),
}

/// Outcome of attempting to claim a node for computation (§4.4).
pub enum ClaimOutcome {
    /// No other worker is computing this node; the caller now owns it and
    /// must eventually call `put_success` or `put_failure`.
    Claimed,
    /// Another worker already claimed this node; the caller should await
    /// the result instead of recomputing it.
    AlreadyComputing,
    AlreadySucceeded(Value),
    AlreadyFailed(String),
}

enum SlotState {
    Computing,
    Done(ResultRecord),
}

struct Slot {
    state: Mutex<SlotState>,
    condvar: Condvar,
}

/// The two-tier, content-addressed result cache (§4.4).
pub struct ResultStore {
    durable: Arc<dyn StoreBackend>,
    codecs: CodecRegistry,
    cache: DashMap<NodeId, ResultRecord>,
    in_flight: DashMap<NodeId, Arc<Slot>>,
}

impl ResultStore {
    /// Open a store against `durable`, replaying any previously-persisted
    /// results into the in-memory cache (§4.4a startup recovery).
    pub fn open(durable: Arc<dyn StoreBackend>) -> Result<Self, StoreError> {
        let cache = DashMap::new();
        let codecs = CodecRegistry::default();
        for (id, record) in durable.load_all()? {
            let result = match record {
                DurableRecord::Success { codec_tag, bytes } => {
                    let codec = codecs.by_tag(&codec_tag)?;
                    ResultRecord::Success(codec.decode(&bytes)?)
                }
                DurableRecord::Failure { message } => ResultRecord::Failure(message),
            };
            cache.insert(id, result);
        }
        Ok(ResultStore {
            durable,
            codecs,
            cache,
            in_flight: DashMap::new(),
        })
    }

    /// Attempt to become the sole computer of `id` (§4.4).
    pub fn claim(&self, id: &NodeId) -> ClaimOutcome {
        if let Some(record) = self.cache.get(id) {
            return match &*record {
                ResultRecord::Success(v) => ClaimOutcome::AlreadySucceeded(v.clone()),
                ResultRecord::Failure(e) => ClaimOutcome::AlreadyFailed(e.clone()),
            };
        }
        let mut claimed = false;
        self.in_flight.entry(id.clone()).or_insert_with(|| {
            claimed = true;
            Arc::new(Slot {
                state: Mutex::new(SlotState::Computing),
                condvar: Condvar::new(),
            })
        });
        if claimed {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::AlreadyComputing
        }
    }

    /// Record a successful result for `id`, persisting it to the durable
    /// tier unless its codec is ephemeral-only (§4.4).
    pub fn put_success(&self, id: &NodeId, value: Value) -> Result<(), StoreError> {
        let codec = self.codecs.codec_for(&value);
        if codec.is_persistent() {
            let bytes = codec.encode(&value)?;
            self.durable.persist(
                id,
                &DurableRecord::Success {
                    codec_tag: codec.tag().to_string(),
                    bytes,
                },
            )?;
        }
        self.cache.insert(id.clone(), ResultRecord::Success(value.clone()));
        self.settle(id, ResultRecord::Success(value));
        Ok(())
    }

    /// Record a failed result for `id` (§4.4, `AlreadyFailed`).
    pub fn put_failure(&self, id: &NodeId, message: String) -> Result<(), StoreError> {
        self.durable.persist(
            id,
            &DurableRecord::Failure {
                message: message.clone(),
            },
        )?;
        self.cache
            .insert(id.clone(), ResultRecord::Failure(message.clone()));
        self.settle(id, ResultRecord::Failure(message));
        Ok(())
    }

    fn settle(&self, id: &NodeId, record: ResultRecord) {
        if let Some((_, slot)) = self.in_flight.remove(id) {
            let mut state = slot.state.lock();
            *state = SlotState::Done(record);
            slot.condvar.notify_all();
        }
    }

    /// Block the calling thread until `id` settles, or return immediately
    /// if it already has (§4.5, workers await dependencies this way).
    pub fn await_result(&self, id: &NodeId) -> ResultRecord {
        self.await_result_cancellable(id, &|| false)
            .expect("an always-false cancellation check never reports cancelled")
    }

    /// Like `await_result`, but polls `is_cancelled` periodically instead of
    /// blocking on the condvar indefinitely, so a worker parked on a stalled
    /// dependency can still observe cancellation (§4.5, §5: "`await` calls
    /// return `Cancelled`"). Returns `None` if `is_cancelled` reports true
    /// before the node settles.
    pub fn await_result_cancellable(
        &self,
        id: &NodeId,
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Option<ResultRecord> {
        if let Some(record) = self.cache.get(id) {
            return Some(record.clone());
        }
        let slot = match self.in_flight.get(id) {
            Some(slot) => slot.clone(),
            // Nothing claimed it and it's not in the cache: the caller
            // raced a `settle` that already happened, so re-check the cache.
            None => {
                return Some(
                    self.cache
                        .get(id)
                        .map(|r| r.clone())
                        .expect("node must be either in flight or settled before awaiting"),
                )
            }
        };
        let mut state = slot.state.lock();
        loop {
            match &*state {
                SlotState::Done(record) => return Some(record.clone()),
                SlotState::Computing => {
                    if is_cancelled() {
                        return None;
                    }
                    // Poll rather than wait unboundedly, so cancellation is
                    // observed within one tick even if this node never settles.
                    slot.condvar
                        .wait_for(&mut state, std::time::Duration::from_millis(50));
                }
            }
        }
    }

    /// Non-blocking lookup of a settled result, if any (§6 `inspect`).
    pub fn get(&self, id: &NodeId) -> Option<ResultRecord> {
        self.cache.get(id).map(|r| r.clone())
    }

    /// Manually evict `id` from the in-memory cache (§4.4, resolved Open
    /// Question: no automatic eviction policy; callers forget explicitly).
    /// The durable tier's record, if any, is left on disk.
    ///
    /// Restricted to terminal records with no active awaiters (§4.4):
    /// fails with `StoreBusy` if `id` is still `Computing` or anyone is
    /// in `in_flight` for it.
    pub fn forget(&self, id: &NodeId) -> Result<(), StoreError> {
        if self.in_flight.contains_key(id) {
            return Err(StoreError::StoreBusy(id.clone()));
        }
        self.cache.remove(id);
        Ok(())
    }
}
