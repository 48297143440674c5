//! Security event log
//!
//! Append-only sink for clearance escalations, fraud flags, admission
//! rejections and external events. The default [`SecurityLog`] keeps entries
//! in memory up to a fixed cap and silently drops anything beyond it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Well-known security log messages
pub mod messages {
    pub const CLEARANCE_REQUIRED: &str = "Clearance required";
    pub const FRAUD_SUSPECTED: &str = "Fraud suspected";
    pub const NETWORK_FAILURE: &str = "Network failure";
    pub const NETWORK_ISSUE: &str = "Network issue";
    pub const MAINTENANCE_WINDOW: &str = "Maintenance window";
    pub const REGULATORY_UPDATE: &str = "Regulatory update";
    pub const REJECTED_OUTSIDE_HOURS: &str = "Transaction rejected: Outside business hours";
    pub const LIMIT_REACHED: &str = "Customer transaction limit reached";
    pub const NO_TOKENS: &str = "No tokens available";
    pub const NO_RESOURCES: &str = "No resources available";
}

/// One security log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEntry {
    pub at: DateTime<Utc>,
    pub event: String,
}

impl fmt::Display for SecurityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time:{} {}", self.at.timestamp(), self.event)
    }
}

/// Sink for security events
#[async_trait]
pub trait SecuritySink: Send + Sync {
    /// Append an event. Never fails; a full sink drops the event.
    async fn log_event(&self, event: &str);

    /// Read-only copy of every retained entry, oldest first
    async fn entries(&self) -> Vec<SecurityEntry>;
}

/// In-memory capped security log
#[derive(Clone)]
pub struct SecurityLog {
    entries: Arc<Mutex<Vec<SecurityEntry>>>,
    capacity: usize,
}

impl SecurityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            capacity,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Count retained entries whose text equals `event`
    pub async fn count(&self, event: &str) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| entry.event == event)
            .count()
    }
}

#[async_trait]
impl SecuritySink for SecurityLog {
    async fn log_event(&self, event: &str) {
        tracing::warn!(event, "branch.security");
        let mut entries = self.entries.lock().await;
        if entries.len() < self.capacity {
            entries.push(SecurityEntry {
                at: Utc::now(),
                event: event.to_string(),
            });
        }
    }

    async fn entries(&self) -> Vec<SecurityEntry> {
        self.entries.lock().await.clone()
    }
}
