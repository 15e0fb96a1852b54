//! Correlation of in-flight invocations with inbound response messages.
//!
//! Every invocation that expects an answer registers a [`PendingOperation`]
//! and keeps the returned [`PendingHandle`]. The MQTT receive task calls
//! [`PendingOperationRegistry::handle_message`] for each inbound publish;
//! terminal states release the waiter, intermediate states are recorded and
//! forwarded as progress for asynchronous skills.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use skillbridge_core::{BridgeError, CORRELATION_FIELD, Result, STATE_FIELD};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Opaque per-invocation token.
pub type CorrelationId = String;

/// States that end an invocation.
pub const TERMINAL_STATES: [&str; 6] = [
    "SUCCESS",
    "FAILURE",
    "ERROR",
    "COMPLETED",
    "ABORTED",
    "CANCELLED",
];

/// Check whether a state ends the invocation.
pub fn is_terminal_state(state: &str) -> bool {
    TERMINAL_STATES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(state.trim()))
}

/// Check whether a terminal state means the action succeeded.
pub fn is_success_state(state: &str) -> bool {
    let state = state.trim();
    state.eq_ignore_ascii_case("SUCCESS") || state.eq_ignore_ascii_case("COMPLETED")
}

/// Read the `State` field (key matched case-insensitively), upper-cased.
pub fn extract_state(payload: &Value) -> Option<String> {
    payload
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(STATE_FIELD))
        .and_then(|(_, v)| v.as_str())
        .map(|s| s.trim().to_ascii_uppercase())
}

fn extract_correlation_id(payload: &Value) -> Option<&str> {
    payload
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(CORRELATION_FIELD))
        .and_then(|(_, v)| v.as_str())
}

/// One in-flight invocation.
#[derive(Debug)]
pub struct PendingOperation {
    pub correlation_id: CorrelationId,
    pub response_topic: String,
    pub created_at: DateTime<Utc>,
    pub is_async: bool,
    pub state_update_path: Option<String>,
    pub last_response_payload: Option<Value>,
    pub last_state: Option<String>,
    /// Taken on the first terminal message so the waiter is signalled once
    completion: Option<oneshot::Sender<Value>>,
    progress: Option<mpsc::UnboundedSender<String>>,
}

/// Waiter side of a registration.
#[derive(Debug)]
pub struct PendingHandle {
    pub correlation_id: CorrelationId,
    pub response_topic: String,
    /// Resolves with the terminal payload
    pub completion: oneshot::Receiver<Value>,
    /// Intermediate states, only fed for asynchronous operations
    pub progress: mpsc::UnboundedReceiver<String>,
}

/// Outcome of dispatching one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No pending operation awaits this message
    Dropped,
    /// Recorded as intermediate state; the waiter keeps waiting
    Progress,
    /// Terminal state delivered to the waiter
    Completed,
}

#[derive(Debug, Default)]
struct RegistryInner {
    operations: HashMap<CorrelationId, PendingOperation>,
    by_topic: HashMap<String, CorrelationId>,
}

/// Thread-safe correlation id -> pending operation store.
///
/// The lock is never held across an await point, so `register`/`unregister`
/// from request tasks and `complete` from the receive task can interleave freely.
#[derive(Debug, Default)]
pub struct PendingOperationRegistry {
    inner: Mutex<RegistryInner>,
}

impl PendingOperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `correlation_id` on `response_topic`.
    pub fn register(
        &self,
        correlation_id: &str,
        response_topic: &str,
        state_update_path: Option<String>,
    ) -> Result<PendingHandle> {
        let (completion_tx, completion_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let is_async = state_update_path.is_some();

        let mut inner = self.inner.lock();
        if inner.operations.contains_key(correlation_id) {
            return Err(BridgeError::Validation(format!(
                "Correlation id already registered: {}",
                correlation_id
            )));
        }

        if let Some(previous) = inner
            .by_topic
            .insert(response_topic.to_string(), correlation_id.to_string())
        {
            warn!(
                "Response topic {} was awaited by {}; {} now receives untagged responses",
                response_topic, previous, correlation_id
            );
        }

        inner.operations.insert(
            correlation_id.to_string(),
            PendingOperation {
                correlation_id: correlation_id.to_string(),
                response_topic: response_topic.to_string(),
                created_at: Utc::now(),
                is_async,
                state_update_path,
                last_response_payload: None,
                last_state: None,
                completion: Some(completion_tx),
                progress: is_async.then_some(progress_tx),
            },
        );

        debug!("Registered pending operation {} on {}", correlation_id, response_topic);
        Ok(PendingHandle {
            correlation_id: correlation_id.to_string(),
            response_topic: response_topic.to_string(),
            completion: completion_rx,
            progress: progress_rx,
        })
    }

    /// Record a message seen on `topic`; release the waiter on a terminal state.
    pub fn complete(&self, topic: &str, payload: Value, state: Option<&str>) -> Dispatch {
        let mut inner = self.inner.lock();

        let tagged = extract_correlation_id(&payload)
            .filter(|id| {
                inner
                    .operations
                    .get(*id)
                    .is_some_and(|op| op.response_topic == topic)
            })
            .map(str::to_string);
        let Some(id) = tagged.or_else(|| inner.by_topic.get(topic).cloned()) else {
            return Dispatch::Dropped;
        };
        let Some(op) = inner.operations.get_mut(&id) else {
            return Dispatch::Dropped;
        };

        let state = state.map(|s| s.trim().to_ascii_uppercase());
        op.last_response_payload = Some(payload.clone());
        if state.is_some() {
            op.last_state = state.clone();
        }

        match state {
            Some(state) if is_terminal_state(&state) => match op.completion.take() {
                Some(tx) => {
                    // receiver may already be gone after a timeout
                    let _ = tx.send(payload);
                    debug!("Pending operation {} completed with {}", id, state);
                    Dispatch::Completed
                }
                None => Dispatch::Dropped,
            },
            Some(state) => {
                if let Some(progress) = &op.progress {
                    let _ = progress.send(state);
                }
                Dispatch::Progress
            }
            None => Dispatch::Progress,
        }
    }

    /// Parse and dispatch a raw inbound publish.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Dispatch {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring non-JSON message on {}: {}", topic, e);
                return Dispatch::Dropped;
            }
        };
        let state = extract_state(&value);
        let outcome = self.complete(topic, value, state.as_deref());
        if outcome == Dispatch::Dropped {
            debug!("No pending operation for message on {}", topic);
        }
        outcome
    }

    /// Remove a registration. Safe to call more than once.
    pub fn unregister(&self, correlation_id: &str, response_topic: &str) -> Option<PendingOperation> {
        let mut inner = self.inner.lock();
        if inner
            .by_topic
            .get(response_topic)
            .is_some_and(|id| id == correlation_id)
        {
            inner.by_topic.remove(response_topic);
        }
        let removed = inner.operations.remove(correlation_id);
        if removed.is_some() {
            debug!("Unregistered pending operation {}", correlation_id);
        }
        removed
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.inner.lock().operations.contains_key(correlation_id)
    }

    /// Last state seen for an operation.
    pub fn last_state(&self, correlation_id: &str) -> Option<String> {
        self.inner
            .lock()
            .operations
            .get(correlation_id)
            .and_then(|op| op.last_state.clone())
    }

    /// Last payload seen for an operation.
    pub fn last_payload(&self, correlation_id: &str) -> Option<Value> {
        self.inner
            .lock()
            .operations
            .get(correlation_id)
            .and_then(|op| op.last_response_payload.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
