//! Transaction admission
//!
//! Admission validates a transaction, settles its final priority, acquires a
//! security token (critical and high only) and a teller or ATM, then enqueues
//! it. Steps after the business-hours check run under the resource-wide lock,
//! so quota, pool and lane checks see a single consistent snapshot. Admission
//! never takes an account lock.

use crate::account::{AccountProfile, AccountStore};
use crate::clock::BusinessHours;
use crate::error::{BranchError, Result, TransactionError};
use crate::event::{events, BranchEvent, EventEmitter};
use crate::pool::{ResourceGrant, ResourceKind, ResourcePools};
use crate::queue::{LaneFull, QueuedTransaction, TransactionQueue};
use crate::security::{messages, SecuritySink};
use crate::telemetry;
use crate::transaction::{Priority, Transaction, TransactionId, TransactionKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

/// Receipt for an admitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admitted {
    pub transaction_id: TransactionId,
    /// Final priority, also the lane the transaction waits in
    pub priority: Priority,
    /// Teller or ATM assigned
    pub station: ResourceKind,
    pub station_index: usize,
    pub token_index: Option<usize>,
}

/// Final priority: VIP accounts and large amounts are capped to at most high,
/// inquiries always go to low.
pub fn final_priority(
    profile: &AccountProfile,
    txn: &Transaction,
    large_amount_threshold: u32,
) -> Priority {
    let mut priority = txn.priority;
    if profile.vip {
        priority = priority.min(Priority::High);
    }
    if txn.amount > large_amount_threshold {
        priority = priority.min(Priority::High);
    }
    if txn.kind == TransactionKind::Inquiry {
        priority = Priority::Low;
    }
    priority
}

/// Why a locked admission attempt failed
enum Refusal {
    Business(TransactionError, &'static str),
    LaneFull(Priority),
}

/// Admission stage
pub struct Admission {
    accounts: Arc<AccountStore>,
    pools: Arc<ResourcePools>,
    queue: Arc<TransactionQueue>,
    hours: Arc<BusinessHours>,
    security: Arc<dyn SecuritySink>,
    events: EventEmitter,
    large_amount_threshold: u32,
}

impl Admission {
    pub fn new(
        accounts: Arc<AccountStore>,
        pools: Arc<ResourcePools>,
        queue: Arc<TransactionQueue>,
        hours: Arc<BusinessHours>,
        security: Arc<dyn SecuritySink>,
        events: EventEmitter,
        large_amount_threshold: u32,
    ) -> Self {
        Self {
            accounts,
            pools,
            queue,
            hours,
            security,
            events,
            large_amount_threshold,
        }
    }

    /// Admit a transaction into the lane matching its final priority.
    ///
    /// Business rejections come back as [`BranchError::Rejected`] and are
    /// written to the security log. Nothing is held after a rejection.
    pub async fn assign(&self, txn: Transaction) -> Result<Admitted> {
        let span = tracing::info_span!(
            telemetry::SPAN_ADMIT,
            transaction_id = txn.id,
            account_id = txn.account
        );
        self.assign_traced(txn).instrument(span).await
    }

    async fn assign_traced(&self, txn: Transaction) -> Result<Admitted> {
        if txn.amount == 0 {
            tracing::warn!("branch.admit: zero amount refused");
            return Err(BranchError::InvalidAmount(txn.id));
        }

        if !self.hours.is_open() {
            return self
                .reject(
                    &txn,
                    TransactionError::OutsideBusinessHours,
                    messages::REJECTED_OUTSIDE_HOURS,
                )
                .await;
        }

        let profile = self.accounts.profile(txn.account)?;

        match self.assign_locked(&profile, txn.clone()).await {
            Ok(admitted) => {
                tracing::info!(
                    transaction_id = admitted.transaction_id,
                    lane = %admitted.priority,
                    station = %admitted.station,
                    station_index = admitted.station_index,
                    token_index = ?admitted.token_index,
                    "branch.admit: transaction queued"
                );
                #[cfg(feature = "telemetry")]
                telemetry::record_admitted(admitted.priority.as_str());
                self.events.emit(BranchEvent::for_transaction(
                    events::TRANSACTION_ADMITTED,
                    &Transaction {
                        priority: admitted.priority,
                        ..txn
                    },
                    [
                        ("station", serde_json::json!(admitted.station)),
                        ("station_index", serde_json::json!(admitted.station_index)),
                        ("token_index", serde_json::json!(admitted.token_index)),
                    ],
                ));
                Ok(admitted)
            }
            Err(Refusal::Business(err, message)) => self.reject(&txn, err, message).await,
            Err(Refusal::LaneFull(priority)) => {
                tracing::warn!(transaction_id = txn.id, lane = %priority, "branch.admit: lane full");
                self.security.log_event(messages::NO_RESOURCES).await;
                Err(BranchError::LaneFull(priority))
            }
        }
    }

    /// Steps 2 to 6 under the resource-wide lock
    async fn assign_locked(
        &self,
        profile: &AccountProfile,
        mut txn: Transaction,
    ) -> std::result::Result<Admitted, Refusal> {
        let mut resources = self.pools.lock().await;

        if resources.quota(txn.account) <= 0 {
            return Err(Refusal::Business(
                TransactionError::TransactionLimitExceeded,
                messages::LIMIT_REACHED,
            ));
        }

        txn.priority = final_priority(profile, &txn, self.large_amount_threshold);

        let token = if txn.priority.is_secure() {
            match self.pools.try_acquire_token(&mut resources) {
                Some(token) => Some(token),
                None => {
                    return Err(Refusal::Business(
                        TransactionError::ResourceUnavailable(ResourceKind::Token),
                        messages::NO_TOKENS,
                    ))
                }
            }
        } else {
            None
        };

        let station_kind = if txn.priority.is_secure() {
            ResourceKind::Teller
        } else {
            ResourceKind::Atm
        };
        let station = match resources.acquire_station(station_kind) {
            Some(station) => station,
            None => {
                if let Some(token) = token {
                    resources.release_token(token);
                }
                return Err(Refusal::Business(
                    TransactionError::ResourceUnavailable(station_kind),
                    messages::NO_RESOURCES,
                ));
            }
        };

        let grant = ResourceGrant::new(token, station);
        let admitted = Admitted {
            transaction_id: txn.id,
            priority: txn.priority,
            station: station_kind,
            station_index: grant.station().index(),
            token_index: grant.token_index(),
        };

        let priority = txn.priority;
        match self
            .queue
            .enqueue(priority, QueuedTransaction::new(txn).with_grant(grant))
            .await
        {
            Ok(()) => Ok(admitted),
            Err(LaneFull { queued, .. }) => {
                let (_, grant) = queued.into_parts();
                if let Some(grant) = grant {
                    resources.release_grant(grant);
                }
                Err(Refusal::LaneFull(priority))
            }
        }
    }

    async fn reject(
        &self,
        txn: &Transaction,
        err: TransactionError,
        message: &str,
    ) -> Result<Admitted> {
        tracing::info!(
            transaction_id = txn.id,
            account_id = txn.account,
            reason = err.code(),
            "branch.admit: transaction rejected"
        );
        self.security.log_event(message).await;
        #[cfg(feature = "telemetry")]
        telemetry::record_rejected(err.code());
        self.events.emit(BranchEvent::for_transaction(
            events::TRANSACTION_REJECTED,
            txn,
            [("reason", serde_json::json!(err.code()))],
        ));
        Err(BranchError::Rejected(err))
    }
}
