//! Error types for the branch transaction engine
//!
//! Two layers of errors live here:
//!
//! - [`TransactionError`] is the business taxonomy. Every variant is an
//!   expected outcome of admitting or executing a transaction and is recorded
//!   into the owning account's history or into the security log. None of them
//!   stop the engine.
//! - [`BranchError`] covers everything the caller of the library has to react
//!   to: unknown accounts, full lanes, bad configuration, shutdown, and
//!   admission rejections (wrapping a [`TransactionError`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use branch_lane::{BranchError, TransactionError};
//!
//! match branch.submit(txn).await {
//!     Ok(admitted) => println!("queued in {:?}", admitted.priority),
//!     Err(BranchError::Rejected(TransactionError::OutsideBusinessHours)) => {
//!         eprintln!("branch is closed");
//!     }
//!     Err(e) => eprintln!("unexpected error: {}", e),
//! }
//! ```

use crate::account::AccountId;
use crate::pool::ResourceKind;
use crate::transaction::{Priority, TransactionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business outcome of a failed admission or execution.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionError {
    /// Withdrawal larger than the current balance
    #[error("Insufficient funds")]
    InsufficientFunds,

    /// Account balance is negative
    #[error("Account locked")]
    AccountLocked,

    /// Global transaction capacity is exhausted
    #[error("System overload")]
    SystemOverload,

    /// Amount above the fraud threshold
    #[error("Fraud suspected")]
    FraudSuspected,

    /// Synthetic network failure
    #[error("Network failure")]
    NetworkFailure,

    /// Business hours are over
    #[error("Outside business hours")]
    OutsideBusinessHours,

    /// Per-customer quota exhausted
    #[error("Transaction limit exceeded")]
    TransactionLimitExceeded,

    /// No token, teller or ATM could be allocated
    #[error("No {0} available")]
    ResourceUnavailable(ResourceKind),
}

impl TransactionError {
    /// Stable upper-case code used in reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::SystemOverload => "SYSTEM_OVERLOAD",
            Self::FraudSuspected => "FRAUD_SUSPECTED",
            Self::NetworkFailure => "NETWORK_FAILURE",
            Self::OutsideBusinessHours => "OUTSIDE_BUSINESS_HOURS",
            Self::TransactionLimitExceeded => "TRANSACTION_LIMIT_EXCEEDED",
            Self::ResourceUnavailable(_) => "RESOURCE_UNAVAILABLE",
        }
    }
}

/// Branch engine error type
#[derive(Error, Debug)]
pub enum BranchError {
    /// Account not opened in the store
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Priority level outside 0..=3
    #[error("Invalid priority level: {0}")]
    InvalidPriority(u8),

    /// Amount must be a positive integer
    #[error("Transaction {0} has a zero amount")]
    InvalidAmount(TransactionId),

    /// Lane is at its capacity cap
    #[error("Lane {0:?} is full")]
    LaneFull(Priority),

    /// Admission rejected the transaction
    #[error("Transaction rejected: {0}")]
    Rejected(#[from] TransactionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Shutdown in progress
    #[error("Branch is shutting down, not accepting new transactions")]
    ShutdownInProgress,

    /// Waiting for the queue to empty took too long
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type alias using BranchError
pub type Result<T> = std::result::Result<T, BranchError>;
