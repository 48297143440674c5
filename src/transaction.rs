//! Transactions and priority levels

use crate::account::AccountId;
use crate::error::{BranchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier
pub type TransactionId = u64;

/// Transaction amount (always non-negative)
pub type Amount = u32;

/// Transaction priority (lower level = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    /// All priorities, highest first. Lane scans follow this order.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Parse a numeric level (0=critical .. 3=low)
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::Critical),
            1 => Ok(Self::High),
            2 => Ok(Self::Medium),
            3 => Ok(Self::Low),
            other => Err(BranchError::InvalidPriority(other)),
        }
    }

    /// Numeric level
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Lane index backing this priority
    pub fn lane(self) -> usize {
        self as usize
    }

    /// True for critical and high; these need a security token and a teller.
    pub fn is_secure(self) -> bool {
        self <= Priority::High
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Withdraw,
    Deposit,
    Inquiry,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Withdraw => "withdraw",
            Self::Deposit => "deposit",
            Self::Inquiry => "inquiry",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account: AccountId,
    pub amount: Amount,
    pub priority: Priority,
    pub kind: TransactionKind,
    /// Submission time, used as the tie-break inside a lane
    pub submitted_at: DateTime<Utc>,
    /// Set when the scheduler claims the transaction
    pub processed: bool,
}

impl Transaction {
    /// Create a transaction stamped with the current time
    pub fn new(
        id: TransactionId,
        account: AccountId,
        amount: Amount,
        priority: Priority,
        kind: TransactionKind,
    ) -> Self {
        Self {
            id,
            account,
            amount,
            priority,
            kind,
            submitted_at: Utc::now(),
            processed: false,
        }
    }

    /// Override the submission time (builder pattern)
    pub fn with_submitted_at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// Signed balance delta applied on success
    pub fn balance_delta(&self) -> i64 {
        match self.kind {
            TransactionKind::Withdraw => -i64::from(self.amount),
            TransactionKind::Deposit => i64::from(self.amount),
            TransactionKind::Inquiry => 0,
        }
    }
}
