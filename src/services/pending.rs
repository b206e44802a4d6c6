//! Pending-request table shared by requesters and the response dispatcher.
//!
//! Maps a request's message id to the one-shot slot its caller is waiting on.
//! Every insert and removal happens under one mutex, so when a response and a
//! timeout race for the same id exactly one of them removes the slot; the
//! other finds nothing and does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

/// Why waiting on a pending slot ended without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PendingError {
    #[error("no response before the timeout")]
    TimedOut,

    #[error("pending slot dropped without a response")]
    Abandoned,
}

#[derive(Default)]
struct Table {
    slots: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
    unmatched: AtomicU64,
}

/// Concurrency-safe map of in-flight validation requests.
///
/// Only [`register`](Self::register), [`resolve`](Self::resolve) and
/// [`expire`](Self::expire) touch the map.
#[derive(Clone, Default)]
pub struct PendingRequests {
    table: Arc<Table>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<bool>>> {
        // No code panics while holding the lock; a poisoned map is still consistent
        self.table
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a fresh message id and the slot its response will resolve.
    pub fn register(&self) -> PendingResponse {
        let (sender, receiver) = oneshot::channel();
        let mut slots = self.slots();
        let mut message_id = Uuid::new_v4();
        while slots.contains_key(&message_id) {
            message_id = Uuid::new_v4();
        }
        slots.insert(message_id, sender);

        PendingResponse {
            message_id,
            receiver,
            table: self.clone(),
        }
    }

    /// Remove the slot for `message_id` and complete it with `exists`.
    ///
    /// Returns `false` when no slot was waiting: the call already timed out,
    /// or the response belongs to another process.
    pub fn resolve(&self, message_id: Uuid, exists: bool) -> bool {
        let mut slots = self.slots();
        match slots.remove(&message_id) {
            Some(sender) => {
                // Sent under the lock, so an `expire` that misses always finds the value.
                // The receiver may have been dropped by a cancelled caller
                let _ = sender.send(exists);
                true
            }
            None => {
                drop(slots);
                self.table.unmatched.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Remove the slot for `message_id` without completing it.
    ///
    /// Returns `true` if the slot was still pending.
    pub fn expire(&self, message_id: Uuid) -> bool {
        self.slots().remove(&message_id).is_some()
    }

    /// Number of requests still waiting for a response.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Responses that arrived with no slot waiting for them.
    ///
    /// A steadily rising count suggests the requester timeout is too tight.
    pub fn unmatched_responses(&self) -> u64 {
        self.table.unmatched.load(Ordering::Relaxed)
    }
}

/// A caller's handle on its registered slot.
///
/// Dropping the handle expires the slot, so a cancelled call leaves no entry behind.
pub struct PendingResponse {
    message_id: Uuid,
    receiver: oneshot::Receiver<bool>,
    table: PendingRequests,
}

impl PendingResponse {
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Wait for the response, giving up after `timeout`.
    ///
    /// If the timer fires while a response is being delivered, whichever side
    /// removes the slot first wins: a response that got there first is still
    /// returned.
    pub async fn wait(&mut self, timeout: Duration) -> Result<bool, PendingError> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(exists)) => Ok(exists),
            Ok(Err(_)) => Err(PendingError::Abandoned),
            Err(_) => {
                if self.table.expire(self.message_id) {
                    Err(PendingError::TimedOut)
                } else {
                    // A resolver removed the slot first and has already sent
                    (&mut self.receiver)
                        .await
                        .map_err(|_| PendingError::Abandoned)
                }
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.table.expire(self.message_id);
    }
}
