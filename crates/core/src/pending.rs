//! Correlation map for asynchronous request/response round trips.
//!
//! Every outstanding request is keyed by a correlation id. An entry is
//! removed exactly once: by the matching result, by its deadline, or by
//! cancellation. Resolving an id that is no longer present is a no-op, so a
//! result that arrives after its timeout has no observable effect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use crate::connection::ConnectionId;

/// Why waiting on a pending call ended without a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PendingError {
    #[error("no result within {0:?}")]
    TimedOut(Duration),

    #[error("pending call was cancelled")]
    Cancelled,
}

struct PendingEntry<T> {
    sender: oneshot::Sender<T>,
    origin: Option<ConnectionId>,
    created_at: Instant,
}

/// Shared map of in-flight calls. Cloning shares the same map.
pub struct PendingCalls<T> {
    inner: Arc<Mutex<HashMap<String, PendingEntry<T>>>>,
}

impl<T> Clone for PendingCalls<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for PendingCalls<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingCalls<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEntry<T>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new call and get the receiver its result will arrive on.
    ///
    /// Re-registering an id replaces the previous entry; the old waiter sees
    /// [`PendingError::Cancelled`].
    pub fn register(
        &self,
        id: impl Into<String>,
        origin: Option<ConnectionId>,
    ) -> oneshot::Receiver<T> {
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(
            id.into(),
            PendingEntry {
                sender,
                origin,
                created_at: Instant::now(),
            },
        );
        receiver
    }

    /// Deliver a result. Returns `false` if the id is unknown or already settled.
    pub fn resolve(&self, id: &str, value: T) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            debug!(call_id = %id, "Ignoring result for unknown or settled call");
            return false;
        };
        debug!(
            call_id = %id,
            origin = ?entry.origin,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            "Pending call resolved"
        );
        entry.sender.send(value).is_ok()
    }

    /// Drop an entry without a value. Returns `false` if it was already gone.
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Drop every entry; each waiter sees [`PendingError::Cancelled`].
    /// Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.len();
        inner.clear();
        dropped
    }

    /// Wait for the result of a registered call, releasing the entry on timeout.
    pub async fn wait(
        &self,
        id: &str,
        receiver: oneshot::Receiver<T>,
        timeout: Duration,
    ) -> Result<T, PendingError> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(PendingError::Cancelled),
            Err(_) => {
                self.cancel(id);
                Err(PendingError::TimedOut(timeout))
            }
        }
    }

    /// Ids of every call still waiting.
    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
