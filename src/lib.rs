//! # Branch Lane
//!
//! A simulated bank-branch transaction engine built around four priority lanes.
//!
//! ## Core
//!
//! - Critical, high, medium and low lanes with strict cross-lane priority and
//!   earliest-submission order inside a lane
//! - LRU allocation of tellers, ATMs and security tokens, with a counting gate
//!   bounding concurrent token holders
//! - Admission under one resource-wide lock (quota, pool and lane checks)
//! - A single scheduler dispatching one transaction at a time to the processor
//! - Escalation of queued transactions on network distress and regulatory events
//! - Periodic pool replenishment and a business-hours window
//! - Capped security log and per-account transaction histories
//! - Event system for transaction lifecycle notifications
//!
//! ## Feature Flags
//!
//! | Feature | Default | Dependencies | Description |
//! |---------|---------|-------------|-------------|
//! | `telemetry` | ✅ | `opentelemetry` | OpenTelemetry counters and processing latency histogram (span names are always exported) |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use branch_lane::{BranchBuilder, BranchConfig, Priority, Transaction, TransactionKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let branch = BranchBuilder::new(BranchConfig::default()).build()?;
//!     branch.start().await?;
//!
//!     let txn = Transaction::new(1, 0, 200, Priority::High, TransactionKind::Withdraw);
//!     let admitted = branch.submit(txn).await?;
//!     println!("queued in {:?}", admitted.priority);
//!
//!     branch.wait_for_close().await;
//!     branch.shutdown().await;
//!     for account in branch.histories().await {
//!         println!("{}: {}", account.id, account.balance);
//!     }
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod admission;
pub mod branch;
pub mod clock;
pub mod config;
pub mod entropy;
pub mod error;
pub mod escalation;
pub mod event;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod replenish;
pub mod scheduler;
pub mod security;
pub mod shutdown;
pub mod telemetry;
pub mod transaction;

pub use account::{
    Account, AccountId, AccountProfile, AccountSnapshot, AccountStore, HistoryRecord, Outcome,
};
pub use admission::{final_priority, Admission, Admitted};
pub use branch::{Branch, BranchBuilder};
pub use clock::BusinessHours;
pub use config::BranchConfig;
pub use entropy::{EntropySource, FixedEntropy, ThreadEntropy};
pub use error::{BranchError, Result, TransactionError};
pub use escalation::{EscalationProtocol, ExternalEvent, InjectorSettings};
pub use event::{BranchEvent, EventEmitter, EventPayload, EventStream};
pub use pool::{
    Lease, PoolStatus, Replenishment, ResourceGrant, ResourceKind, ResourcePool, ResourcePools,
    TokenLease,
};
pub use processor::{Processed, ProcessorSettings, TransactionProcessor};
pub use queue::{LaneFull, LaneStatus, QueuedTransaction, TransactionQueue};
pub use replenish::Replenisher;
pub use scheduler::{Scheduler, SchedulerState};
pub use security::{messages, SecurityEntry, SecurityLog, SecuritySink};
pub use shutdown::Shutdown;
pub use transaction::{Amount, Priority, Transaction, TransactionId, TransactionKind};

use serde::{Deserialize, Serialize};

/// Branch statistics snapshot
///
/// Point-in-time view of the lanes, the resource pools and the scheduler.
///
/// # Example
///
/// ```rust,ignore
/// let stats = branch.stats().await;
/// println!("{} pending, {} dispatched", stats.total_pending, stats.dispatched);
///
/// for lane in &stats.lanes {
///     println!("{:?}: {}/{}", lane.priority, lane.pending, lane.capacity);
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchStats {
    pub total_pending: usize,
    pub dispatched: u64,
    pub business_open: bool,
    /// Lanes, critical first
    pub lanes: Vec<LaneStatus>,
    pub pools: PoolStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> BranchStats {
        BranchStats {
            total_pending: 3,
            dispatched: 7,
            business_open: true,
            lanes: Priority::ALL
                .iter()
                .map(|priority| LaneStatus {
                    priority: *priority,
                    pending: if *priority == Priority::High { 3 } else { 0 },
                    capacity: 20,
                })
                .collect(),
            pools: PoolStatus {
                tellers_busy: 2,
                atms_busy: 1,
                tokens_busy: 2,
                tokens_outstanding: 2,
                available_funds: 50_000,
                transaction_capacity: 10,
            },
        }
    }

    #[test]
    fn test_branch_stats_serialization() {
        let stats = stats();
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("total_pending"));
        assert!(json.contains("tokens_outstanding"));

        let parsed: BranchStats = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, stats);
    }

    #[tokio::test]
    async fn test_branch_builder_stats() {
        let branch = BranchBuilder::new(BranchConfig::deterministic())
            .with_accounts(AccountStore::new(10).with_account(0, 100, false, false))
            .build()
            .unwrap();

        let stats = branch.stats().await;
        assert_eq!(stats.lanes.len(), 4);
        assert_eq!(stats.total_pending, 0);
        assert!(stats.business_open);
        assert_eq!(stats.pools.available_funds, 50_000);
    }
}
