use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::oneshot;

use crate::{envelope::Response, error::RpcError};

/// Receiving half of a pending slot: resolves with the matching response or
/// a cancellation.
pub type PendingReceiver = oneshot::Receiver<Result<Response, RpcError>>;

type PendingSender = oneshot::Sender<Result<Response, RpcError>>;

/// Process-local mapping from request id to its pending one-shot slot.
///
/// Safe under many-producer/many-consumer access. A slot leaves the map on
/// exactly one of: response delivery, caller-side removal (timeout or
/// cancellation), or [`cancel_all`](Self::cancel_all).
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, PendingSender>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh pending slot for `id`.
    ///
    /// A duplicate id is a caller bug and is rejected rather than silently
    /// overwriting the existing slot.
    pub fn register(&self, id: &str) -> Result<PendingReceiver, RpcError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        if pending.contains_key(id) {
            return Err(RpcError::DuplicateRequestId(id.to_string()));
        }
        pending.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Fulfills the slot for `id` with `response`. Returns false when no
    /// slot exists (stale response after a timeout or removal).
    pub fn complete(&self, id: &str, response: Response) -> bool {
        let sender = self.lock().remove(id);
        match sender {
            Some(tx) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Removes the slot for `id` without resolving it. Best-effort: racing
    /// with an in-flight completion is harmless.
    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Fails every outstanding slot with `reason` and clears the map.
    pub fn cancel_all(&self, reason: impl Fn() -> RpcError) {
        let drained: Vec<PendingSender> = {
            let mut pending = self.lock();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(reason()));
        }
    }

    /// Number of outstanding slots.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no slots are outstanding.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingSender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
