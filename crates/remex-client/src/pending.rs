use std::collections::HashMap;
use std::sync::Mutex;

use remex_common::{CorrelationId, Payload, RemexError, Result, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Receiving half handed to a caller waiting on a reply.
pub type ReplySlot = oneshot::Receiver<Result<Value>>;

/// Outstanding requests of one connection, keyed by correlation id.
///
/// Every entry leaves the table exactly once: by [`complete`](Self::complete)
/// when its reply arrives, by [`remove`](Self::remove) when the send never
/// happened, or by [`fail_all`](Self::fail_all) when the connection drops.
#[derive(Default)]
pub struct PendingTable {
    waiters: Mutex<HashMap<CorrelationId, oneshot::Sender<Result<Value>>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id that is not currently pending and registers a slot.
    pub fn register(&self) -> (CorrelationId, ReplySlot) {
        let (tx, rx) = oneshot::channel();
        let mut waiters = lock(&self.waiters);
        let id = loop {
            let id = Uuid::new_v4();
            if !waiters.contains_key(&id) {
                break id;
            }
        };
        waiters.insert(id, tx);
        (id, rx)
    }

    /// Resolves the waiter for `id` with `payload`.
    ///
    /// Returns the payload back when nobody is waiting on `id`: the frame is
    /// not a reply but a new command from the peer.
    pub fn complete(&self, id: CorrelationId, payload: Payload) -> Option<Payload> {
        let waiter = lock(&self.waiters).remove(&id);
        match waiter {
            Some(tx) => {
                let outcome = match payload {
                    Payload::Value(value) => Ok(value),
                    Payload::Command(command) => Err(RemexError::InvalidResponse(format!(
                        "expected a value, got a {} command",
                        command.kind()
                    ))),
                };
                // The caller may have given up waiting; nothing to do then.
                let _ = tx.send(outcome);
                None
            }
            None => Some(payload),
        }
    }

    /// Fails the waiter for `id`, if it is still pending.
    pub fn fail(&self, id: CorrelationId, err: RemexError) -> bool {
        match lock(&self.waiters).remove(&id) {
            Some(tx) => {
                let _ = tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Drops the entry for `id` without resolving it.
    pub fn remove(&self, id: CorrelationId) -> bool {
        lock(&self.waiters).remove(&id).is_some()
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        lock(&self.waiters).contains_key(&id)
    }

    /// Fails every outstanding request with `connection lost: <endpoint>`.
    ///
    /// Returns how many callers were failed.
    pub fn fail_all(&self, endpoint: &str) -> usize {
        let drained: Vec<_> = lock(&self.waiters).drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(RemexError::ConnectionLost(endpoint.to_string())));
        }
        count
    }

    pub fn len(&self) -> usize {
        lock(&self.waiters).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
