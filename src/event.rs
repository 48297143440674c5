//! Lifecycle events for admission, processing, escalation and replenishment

use crate::transaction::Transaction;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Empty,
    String(String),
    Map(HashMap<String, serde_json::Value>),
}

/// Branch event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchEvent {
    /// Event key (e.g., "branch.transaction.admitted")
    pub key: EventKey,

    /// Event payload
    pub payload: EventPayload,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BranchEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            key: key.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an event with no payload
    pub fn empty(key: impl Into<String>) -> Self {
        Self::new(key, EventPayload::Empty)
    }

    /// Create an event with a string payload
    pub fn with_string(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(key, EventPayload::String(message.into()))
    }

    /// Create an event with a map payload
    pub fn with_map(key: impl Into<String>, map: HashMap<String, serde_json::Value>) -> Self {
        Self::new(key, EventPayload::Map(map))
    }

    /// Event describing a transaction, plus extra fields
    pub fn for_transaction(
        key: impl Into<String>,
        txn: &Transaction,
        extra: impl IntoIterator<Item = (&'static str, serde_json::Value)>,
    ) -> Self {
        let mut map = HashMap::from([
            ("transaction_id".to_string(), serde_json::json!(txn.id)),
            ("account_id".to_string(), serde_json::json!(txn.account)),
            ("kind".to_string(), serde_json::json!(txn.kind)),
            ("priority".to_string(), serde_json::json!(txn.priority)),
        ]);
        map.extend(extra.into_iter().map(|(k, v)| (k.to_string(), v)));
        Self::with_map(key, map)
    }

    /// Look up a field of a map payload
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        match &self.payload {
            EventPayload::Map(map) => map.get(name),
            _ => None,
        }
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<BranchEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event. Dropped if nobody listens.
    pub fn emit(&self, event: BranchEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BranchEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to filtered events as an `EventStream` (implements `Stream`)
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&BranchEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        use tokio_stream::wrappers::BroadcastStream;
        use tokio_stream::StreamExt as TokioStreamExt;
        let stream = BroadcastStream::new(self.sender.subscribe())
            .filter_map(|r: Result<BranchEvent, _>| r.ok())
            .filter(move |e| filter(e));
        EventStream {
            inner: Box::pin(stream),
        }
    }

    /// Subscribe to all events as an `EventStream` (implements `Stream`)
    pub fn subscribe_stream(&self) -> EventStream {
        self.subscribe_filtered(|_| true)
    }
}

/// Event stream, implements `futures_core::Stream<Item = BranchEvent>`.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = BranchEvent> + Send>>,
}

impl Stream for EventStream {
    type Item = BranchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl EventStream {
    /// Receive the next matching event
    pub async fn recv(&mut self) -> Option<BranchEvent> {
        use tokio_stream::StreamExt;
        self.next().await
    }
}

/// Event catalog - predefined event keys
pub mod events {
    pub const TRANSACTION_ADMITTED: &str = "branch.transaction.admitted";
    pub const TRANSACTION_REJECTED: &str = "branch.transaction.rejected";
    pub const TRANSACTION_STARTED: &str = "branch.transaction.started";
    pub const TRANSACTION_COMPLETED: &str = "branch.transaction.completed";
    pub const TRANSACTION_FAILED: &str = "branch.transaction.failed";
    pub const TRANSACTION_ESCALATED: &str = "branch.transaction.escalated";
    pub const POOLS_REPLENISHED: &str = "branch.pools.replenished";
    pub const BUSINESS_CLOSED: &str = "branch.business.closed";
    pub const SHUTDOWN_STARTED: &str = "branch.shutdown.started";
    pub const SHUTDOWN_COMPLETE: &str = "branch.shutdown.complete";
}
