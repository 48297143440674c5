//! Priority lanes holding admitted transactions
//!
//! Four lanes, one per [`Priority`]. A transaction sits in exactly one lane
//! and its `priority` field always names that lane. Every operation runs
//! under one queue-wide lock; callers must not hold an account lock while
//! calling in.

use crate::error::BranchError;
use crate::pool::ResourceGrant;
use crate::transaction::{Priority, Transaction, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::Mutex;

/// A transaction waiting in a lane, with the resources admission acquired for it
#[derive(Debug)]
pub struct QueuedTransaction {
    pub transaction: Transaction,
    grant: Option<ResourceGrant>,
}

impl QueuedTransaction {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            grant: None,
        }
    }

    /// Attach the admission grant (builder pattern)
    pub fn with_grant(mut self, grant: ResourceGrant) -> Self {
        self.grant = Some(grant);
        self
    }

    pub fn grant(&self) -> Option<&ResourceGrant> {
        self.grant.as_ref()
    }

    /// Split into the transaction and its grant
    pub fn into_parts(self) -> (Transaction, Option<ResourceGrant>) {
        (self.transaction, self.grant)
    }
}

/// Enqueue refused because the lane is at capacity. Hands the entry back so
/// the caller can release its grant.
#[derive(Error, Debug)]
#[error("Lane {priority:?} is full")]
pub struct LaneFull {
    pub priority: Priority,
    pub queued: QueuedTransaction,
}

impl From<LaneFull> for BranchError {
    fn from(full: LaneFull) -> Self {
        BranchError::LaneFull(full.priority)
    }
}

/// Lane status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStatus {
    pub priority: Priority,
    pub pending: usize,
    pub capacity: usize,
}

/// Lane state
struct LaneState {
    /// Pending transactions in insertion order
    pending: VecDeque<QueuedTransaction>,
}

impl LaneState {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Position of the unprocessed entry with the earliest submission time.
    /// The first one found wins on equal times.
    fn earliest(&self) -> Option<usize> {
        let mut earliest: Option<(usize, &Transaction)> = None;
        for (index, queued) in self.pending.iter().enumerate() {
            let txn = &queued.transaction;
            if txn.processed {
                continue;
            }
            match earliest {
                Some((_, best)) if best.submitted_at <= txn.submitted_at => {}
                _ => earliest = Some((index, txn)),
            }
        }
        earliest.map(|(index, _)| index)
    }
}

/// Transaction queue with critical, high, medium and low lanes
pub struct TransactionQueue {
    lanes: Mutex<[LaneState; 4]>,
    lane_capacity: usize,
}

impl TransactionQueue {
    /// Create a queue whose lanes each hold at most `lane_capacity` entries
    pub fn new(lane_capacity: usize) -> Self {
        Self {
            lanes: Mutex::new([
                LaneState::new(),
                LaneState::new(),
                LaneState::new(),
                LaneState::new(),
            ]),
            lane_capacity,
        }
    }

    /// Append to the end of `priority`'s lane. The transaction's priority is
    /// rewritten to match the lane.
    pub async fn enqueue(
        &self,
        priority: Priority,
        mut queued: QueuedTransaction,
    ) -> std::result::Result<(), LaneFull> {
        let mut lanes = self.lanes.lock().await;
        let lane = &mut lanes[priority.lane()];
        if lane.pending.len() >= self.lane_capacity {
            return Err(LaneFull { priority, queued });
        }
        queued.transaction.priority = priority;
        queued.transaction.processed = false;
        lane.pending.push_back(queued);
        Ok(())
    }

    /// Claim the next transaction: first non-empty lane from critical to low,
    /// earliest submission inside it. The claimed entry is marked processed
    /// and removed in the same critical section.
    pub async fn claim_next(&self) -> Option<QueuedTransaction> {
        let mut lanes = self.lanes.lock().await;
        for lane in lanes.iter_mut() {
            if lane.pending.is_empty() {
                continue;
            }
            let index = lane.earliest()?;
            let mut queued = lane.pending.remove(index)?;
            queued.transaction.processed = true;
            return Some(queued);
        }
        None
    }

    /// Move every entry of `from` matching `predicate` to the end of `to`,
    /// keeping the relative order of both the moved and the remaining entries.
    ///
    /// Entries that do not fit in a full destination lane stay where they are.
    /// Returns the ids of the moved transactions.
    pub async fn promote<F>(&self, from: Priority, to: Priority, predicate: F) -> Vec<TransactionId>
    where
        F: Fn(&Transaction) -> bool,
    {
        if from == to {
            return Vec::new();
        }
        let mut lanes = self.lanes.lock().await;
        let mut room = self
            .lane_capacity
            .saturating_sub(lanes[to.lane()].pending.len());

        let source = std::mem::take(&mut lanes[from.lane()].pending);
        let mut kept = VecDeque::with_capacity(source.len());
        let mut moved = Vec::new();
        for mut queued in source {
            if room > 0 && predicate(&queued.transaction) {
                room -= 1;
                queued.transaction.priority = to;
                moved.push(queued);
            } else {
                kept.push_back(queued);
            }
        }
        lanes[from.lane()].pending = kept;

        let ids = moved.iter().map(|queued| queued.transaction.id).collect();
        lanes[to.lane()].pending.extend(moved);
        ids
    }

    /// Number of pending transactions in one lane
    pub async fn lane_len(&self, priority: Priority) -> usize {
        self.lanes.lock().await[priority.lane()].pending.len()
    }

    /// Total pending transactions
    pub async fn len(&self) -> usize {
        self.lanes
            .lock()
            .await
            .iter()
            .map(|lane| lane.pending.len())
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of one lane's transactions, in lane order
    pub async fn pending(&self, priority: Priority) -> Vec<Transaction> {
        self.lanes.lock().await[priority.lane()]
            .pending
            .iter()
            .map(|queued| queued.transaction.clone())
            .collect()
    }

    /// Status of every lane, critical first
    pub async fn status(&self) -> Vec<LaneStatus> {
        let lanes = self.lanes.lock().await;
        Priority::ALL
            .iter()
            .map(|priority| LaneStatus {
                priority: *priority,
                pending: lanes[priority.lane()].pending.len(),
                capacity: self.lane_capacity,
            })
            .collect()
    }

    /// Remove and return everything still queued, critical lane first
    pub async fn drain(&self) -> Vec<QueuedTransaction> {
        let mut lanes = self.lanes.lock().await;
        lanes
            .iter_mut()
            .flat_map(|lane| std::mem::take(&mut lane.pending))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionKind;
    use chrono::{Duration, TimeZone, Utc};

    fn at(offset_secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(offset_secs)
    }

    fn queued(id: TransactionId, kind: TransactionKind, amount: u32, submitted: i64) -> QueuedTransaction {
        QueuedTransaction::new(
            Transaction::new(id, 0, amount, Priority::Low, kind).with_submitted_at(at(submitted)),
        )
    }

    fn ids(txns: &[Transaction]) -> Vec<TransactionId> {
        txns.iter().map(|txn| txn.id).collect()
    }

    #[tokio::test]
    async fn test_enqueue_rewrites_priority() {
        let queue = TransactionQueue::new(20);
        queue
            .enqueue(Priority::High, queued(1, TransactionKind::Deposit, 10, 0))
            .await
            .unwrap();

        let pending = queue.pending(Priority::High).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].priority, Priority::High);
        assert_eq!(queue.lane_len(Priority::Low).await, 0);
    }

    #[tokio::test]
    async fn test_enqueue_full_lane() {
        let queue = TransactionQueue::new(1);
        queue
            .enqueue(Priority::Low, queued(1, TransactionKind::Inquiry, 10, 0))
            .await
            .unwrap();
        let full = queue
            .enqueue(Priority::Low, queued(2, TransactionKind::Inquiry, 10, 1))
            .await
            .unwrap_err();
        assert_eq!(full.priority, Priority::Low);
        assert_eq!(full.queued.transaction.id, 2);
        assert_eq!(queue.len().await, 1);

        let err: BranchError = full.into();
        assert!(matches!(err, BranchError::LaneFull(Priority::Low)));
    }

    #[tokio::test]
    async fn test_claim_next_empty() {
        let queue = TransactionQueue::new(20);
        assert!(queue.claim_next().await.is_none());
    }

    #[tokio::test]
    async fn test_claim_next_strict_priority() {
        let queue = TransactionQueue::new(20);
        queue
            .enqueue(Priority::Low, queued(1, TransactionKind::Deposit, 10, 0))
            .await
            .unwrap();
        queue
            .enqueue(Priority::Medium, queued(2, TransactionKind::Deposit, 10, 1))
            .await
            .unwrap();
        queue
            .enqueue(Priority::Critical, queued(3, TransactionKind::Deposit, 10, 2))
            .await
            .unwrap();

        let order: Vec<_> = [
            queue.claim_next().await.unwrap(),
            queue.claim_next().await.unwrap(),
            queue.claim_next().await.unwrap(),
        ]
        .into_iter()
        .map(|q| (q.transaction.id, q.transaction.priority))
        .collect();

        assert_eq!(
            order,
            vec![
                (3, Priority::Critical),
                (2, Priority::Medium),
                (1, Priority::Low)
            ]
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_claim_next_earliest_submission_wins() {
        let queue = TransactionQueue::new(20);
        for (id, submitted) in [(1, 30), (2, 10), (3, 20), (4, 10)] {
            queue
                .enqueue(Priority::Medium, queued(id, TransactionKind::Deposit, 10, submitted))
                .await
                .unwrap();
        }

        let claimed = queue.claim_next().await.unwrap();
        assert_eq!(claimed.transaction.id, 2);
        assert!(claimed.transaction.processed);
        // remaining entries keep their relative order
        assert_eq!(ids(&queue.pending(Priority::Medium).await), vec![1, 3, 4]);

        // equal times: the earlier lane position wins
        assert_eq!(queue.claim_next().await.unwrap().transaction.id, 4);
        assert_eq!(queue.claim_next().await.unwrap().transaction.id, 3);
        assert_eq!(queue.claim_next().await.unwrap().transaction.id, 1);
    }

    #[tokio::test]
    async fn test_claimed_entries_never_remain() {
        let queue = TransactionQueue::new(20);
        for id in 0..5 {
            queue
                .enqueue(Priority::High, queued(id, TransactionKind::Deposit, 10, id as i64))
                .await
                .unwrap();
        }
        while let Some(claimed) = queue.claim_next().await {
            assert!(claimed.transaction.processed);
            assert!(queue
                .pending(Priority::High)
                .await
                .iter()
                .all(|txn| !txn.processed));
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_promote_moves_matching_in_order() {
        let queue = TransactionQueue::new(20);
        queue
            .enqueue(Priority::Critical, queued(10, TransactionKind::Deposit, 10, 0))
            .await
            .unwrap();
        for (id, kind) in [
            (1, TransactionKind::Withdraw),
            (2, TransactionKind::Deposit),
            (3, TransactionKind::Withdraw),
            (4, TransactionKind::Inquiry),
        ] {
            queue
                .enqueue(Priority::Medium, queued(id, kind, 10, id as i64))
                .await
                .unwrap();
        }
        let before = queue.len().await;

        let moved = queue
            .promote(Priority::Medium, Priority::Critical, |txn| {
                txn.kind == TransactionKind::Withdraw
            })
            .await;

        assert_eq!(moved, vec![1, 3]);
        assert_eq!(queue.len().await, before);
        assert_eq!(ids(&queue.pending(Priority::Medium).await), vec![2, 4]);
        let critical = queue.pending(Priority::Critical).await;
        assert_eq!(ids(&critical), vec![10, 1, 3]);
        assert!(critical.iter().all(|txn| txn.priority == Priority::Critical));
    }

    #[tokio::test]
    async fn test_promote_respects_destination_capacity() {
        let queue = TransactionQueue::new(2);
        queue
            .enqueue(Priority::Critical, queued(1, TransactionKind::Deposit, 10, 0))
            .await
            .unwrap();
        for id in 2..4 {
            queue
                .enqueue(Priority::High, queued(id, TransactionKind::Deposit, 400, id as i64))
                .await
                .unwrap();
        }

        let moved = queue
            .promote(Priority::High, Priority::Critical, |txn| txn.amount > 300)
            .await;

        assert_eq!(moved, vec![2]);
        assert_eq!(queue.len().await, 3);
        assert_eq!(ids(&queue.pending(Priority::High).await), vec![3]);
    }

    #[tokio::test]
    async fn test_promote_same_lane_is_noop() {
        let queue = TransactionQueue::new(20);
        queue
            .enqueue(Priority::Low, queued(1, TransactionKind::Deposit, 10, 0))
            .await
            .unwrap();
        let moved = queue.promote(Priority::Low, Priority::Low, |_| true).await;
        assert!(moved.is_empty());
        assert_eq!(queue.lane_len(Priority::Low).await, 1);
    }

    #[tokio::test]
    async fn test_promoted_entry_competes_by_submission_time() {
        let queue = TransactionQueue::new(20);
        queue
            .enqueue(Priority::Critical, queued(1, TransactionKind::Deposit, 10, 50))
            .await
            .unwrap();
        queue
            .enqueue(Priority::Medium, queued(2, TransactionKind::Withdraw, 10, 5))
            .await
            .unwrap();
        queue
            .promote(Priority::Medium, Priority::Critical, |txn| {
                txn.kind == TransactionKind::Withdraw
            })
            .await;

        // appended behind id 1 but submitted earlier
        assert_eq!(queue.claim_next().await.unwrap().transaction.id, 2);
    }

    #[tokio::test]
    async fn test_status_and_drain() {
        let queue = TransactionQueue::new(20);
        queue
            .enqueue(Priority::High, queued(1, TransactionKind::Deposit, 10, 0))
            .await
            .unwrap();
        queue
            .enqueue(Priority::Low, queued(2, TransactionKind::Inquiry, 10, 1))
            .await
            .unwrap();

        let status = queue.status().await;
        assert_eq!(status.len(), 4);
        assert_eq!(status[1].pending, 1);
        assert_eq!(status[3].pending, 1);
        assert_eq!(status[0].capacity, 20);

        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty().await);
    }
}
