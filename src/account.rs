//! Account store with per-account locking
//!
//! Profile flags (VIP, clearance) are fixed when an account is opened and can
//! be read without taking the account lock. Balance and history live behind
//! one `tokio::sync::Mutex` per account.

use crate::error::{BranchError, Result, TransactionError};
use crate::transaction::{Amount, Priority, Transaction, TransactionId, TransactionKind};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Account identifier
pub type AccountId = u32;

/// Result of executing a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed(TransactionError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// One entry in an account's append-only history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub amount: Amount,
    /// Priority the transaction was executed with
    pub priority: Priority,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(txn: &Transaction, outcome: Outcome) -> Self {
        Self {
            transaction_id: txn.id,
            kind: txn.kind,
            amount: txn.amount,
            priority: txn.priority,
            outcome,
            recorded_at: Utc::now(),
        }
    }
}

impl fmt::Display for HistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.outcome {
            Outcome::Success => "Success",
            Outcome::Failed(err) => err.code(),
        };
        write!(
            f,
            "Transaction ID:{} {} {} Priority:{} Status:{}",
            self.transaction_id, self.kind, self.amount, self.priority, status
        )
    }
}

/// Immutable account flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: AccountId,
    pub vip: bool,
    pub requires_clearance: bool,
}

/// Mutable account state, only reachable through the account lock
#[derive(Debug)]
pub struct AccountState {
    /// Negative balance means the account is locked
    pub balance: i64,
    history: Vec<HistoryRecord>,
    history_capacity: usize,
}

impl AccountState {
    pub fn is_locked(&self) -> bool {
        self.balance < 0
    }

    /// Append to history. Records beyond the cap are dropped; returns false then.
    pub fn record(&mut self, record: HistoryRecord) -> bool {
        if self.history.len() >= self.history_capacity {
            tracing::warn!(
                transaction_id = record.transaction_id,
                "history full, dropping record"
            );
            return false;
        }
        self.history.push(record);
        true
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }
}

/// An account: profile plus locked state
#[derive(Debug)]
pub struct Account {
    profile: AccountProfile,
    state: Mutex<AccountState>,
}

impl Account {
    pub fn profile(&self) -> AccountProfile {
        self.profile
    }

    /// Acquire the per-account lock
    pub async fn lock(&self) -> MutexGuard<'_, AccountState> {
        self.state.lock().await
    }

    /// Copy of the account for reporting
    pub async fn snapshot(&self) -> AccountSnapshot {
        let state = self.state.lock().await;
        AccountSnapshot {
            id: self.profile.id,
            balance: state.balance,
            vip: self.profile.vip,
            requires_clearance: self.profile.requires_clearance,
            history: state.history.clone(),
        }
    }
}

/// Read-only account view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub balance: i64,
    pub vip: bool,
    pub requires_clearance: bool,
    pub history: Vec<HistoryRecord>,
}

/// All accounts of the branch. The set of accounts is fixed once the store
/// is shared.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: BTreeMap<AccountId, Arc<Account>>,
    history_capacity: usize,
}

impl AccountStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            accounts: BTreeMap::new(),
            history_capacity,
        }
    }

    /// Open accounts `0..count` with random balances (500..2500), VIP with
    /// probability 1/3 and clearance with probability 1/2.
    pub fn random(count: u32, history_capacity: usize) -> Self {
        let mut rng = rand::thread_rng();
        let mut store = Self::new(history_capacity);
        for id in 0..count {
            let balance = rng.gen_range(500..2500);
            let vip = rng.gen_ratio(1, 3);
            let requires_clearance = rng.gen_bool(0.5);
            store.open(id, balance, vip, requires_clearance);
        }
        store
    }

    /// Open (or replace) an account
    pub fn open(&mut self, id: AccountId, balance: i64, vip: bool, requires_clearance: bool) {
        let account = Account {
            profile: AccountProfile {
                id,
                vip,
                requires_clearance,
            },
            state: Mutex::new(AccountState {
                balance,
                history: Vec::new(),
                history_capacity: self.history_capacity,
            }),
        };
        self.accounts.insert(id, Arc::new(account));
    }

    /// Open an account (builder pattern)
    pub fn with_account(
        mut self,
        id: AccountId,
        balance: i64,
        vip: bool,
        requires_clearance: bool,
    ) -> Self {
        self.open(id, balance, vip, requires_clearance);
        self
    }

    pub fn get(&self, id: AccountId) -> Result<Arc<Account>> {
        self.accounts
            .get(&id)
            .cloned()
            .ok_or(BranchError::AccountNotFound(id))
    }

    /// Profile lookup, no account lock taken
    pub fn profile(&self, id: AccountId) -> Result<AccountProfile> {
        self.accounts
            .get(&id)
            .map(|account| account.profile)
            .ok_or(BranchError::AccountNotFound(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.accounts.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Snapshot every account, ordered by id. Locks one account at a time.
    pub async fn snapshots(&self) -> Vec<AccountSnapshot> {
        let mut snapshots = Vec::with_capacity(self.accounts.len());
        for account in self.accounts.values() {
            snapshots.push(account.snapshot().await);
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(id: TransactionId) -> Transaction {
        Transaction::new(id, 0, 100, Priority::Medium, TransactionKind::Deposit)
    }

    #[tokio::test]
    async fn test_open_and_profile() {
        let store = AccountStore::new(10).with_account(1, 1000, true, false);
        let profile = store.profile(1).unwrap();
        assert!(profile.vip);
        assert!(!profile.requires_clearance);
        assert!(matches!(
            store.profile(2),
            Err(BranchError::AccountNotFound(2))
        ));
    }

    #[tokio::test]
    async fn test_locked_read_modify_write() {
        let store = AccountStore::new(10).with_account(0, 1000, false, false);
        let account = store.get(0).unwrap();
        {
            let mut state = account.lock().await;
            state.balance -= 250;
            state.record(HistoryRecord::new(&txn(1), Outcome::Success));
        }
        let snapshot = account.snapshot().await;
        assert_eq!(snapshot.balance, 750);
        assert_eq!(snapshot.history.len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let store = AccountStore::new(2).with_account(0, 0, false, false);
        let account = store.get(0).unwrap();
        let mut state = account.lock().await;
        assert!(state.record(HistoryRecord::new(&txn(1), Outcome::Success)));
        assert!(state.record(HistoryRecord::new(&txn(2), Outcome::Success)));
        assert!(!state.record(HistoryRecord::new(&txn(3), Outcome::Success)));
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.history()[1].transaction_id, 2);
    }

    #[tokio::test]
    async fn test_negative_balance_is_locked() {
        let store = AccountStore::new(2).with_account(0, -1, false, false);
        let account = store.get(0).unwrap();
        assert!(account.lock().await.is_locked());
    }

    #[tokio::test]
    async fn test_random_store() {
        let store = AccountStore::random(5, 50);
        assert_eq!(store.len(), 5);
        for snapshot in store.snapshots().await {
            assert!((500..2500).contains(&snapshot.balance));
            assert!(snapshot.history.is_empty());
        }
    }

    #[test]
    fn test_history_record_display() {
        let record = HistoryRecord::new(
            &txn(4),
            Outcome::Failed(TransactionError::InsufficientFunds),
        );
        assert_eq!(
            record.to_string(),
            "Transaction ID:4 deposit 100 Priority:medium Status:INSUFFICIENT_FUNDS"
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::Failed(TransactionError::FraudSuspected))
            .unwrap();
        assert_eq!(json, r#"{"status":"failed","error":"FraudSuspected"}"#);
    }
}
