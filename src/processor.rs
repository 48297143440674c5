//! Transaction processor
//!
//! Executes one claimed transaction against its account. The account lock is
//! held for the whole execution; the resource lock is taken only briefly for
//! the capacity check and the counter updates. The queue lock is never taken
//! here.

use crate::account::{AccountStore, HistoryRecord, Outcome};
use crate::clock::BusinessHours;
use crate::config::BranchConfig;
use crate::entropy::EntropySource;
use crate::error::{Result, TransactionError};
use crate::event::{events, BranchEvent, EventEmitter};
use crate::pool::ResourcePools;
use crate::queue::QueuedTransaction;
use crate::security::{messages, SecuritySink};
use crate::telemetry;
use crate::transaction::{Priority, Transaction, TransactionKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Processor settings taken from the branch configuration
#[derive(Debug, Clone, Copy)]
pub struct ProcessorSettings {
    pub fraud_threshold: u32,
    pub network_failure_rate: f64,
    pub processing_delay: Duration,
}

impl From<&BranchConfig> for ProcessorSettings {
    fn from(config: &BranchConfig) -> Self {
        Self {
            fraud_threshold: config.fraud_threshold,
            network_failure_rate: config.network_failure_rate,
            processing_delay: config.processing_delay,
        }
    }
}

/// Result of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    /// The transaction as executed, including any priority escalation
    pub transaction: Transaction,
    pub outcome: Outcome,
}

/// Transaction processor
pub struct TransactionProcessor {
    accounts: Arc<AccountStore>,
    pools: Arc<ResourcePools>,
    hours: Arc<BusinessHours>,
    security: Arc<dyn SecuritySink>,
    entropy: Arc<dyn EntropySource>,
    events: EventEmitter,
    settings: ProcessorSettings,
}

impl TransactionProcessor {
    pub fn new(
        accounts: Arc<AccountStore>,
        pools: Arc<ResourcePools>,
        hours: Arc<BusinessHours>,
        security: Arc<dyn SecuritySink>,
        entropy: Arc<dyn EntropySource>,
        events: EventEmitter,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            accounts,
            pools,
            hours,
            security,
            entropy,
            events,
            settings,
        }
    }

    /// Execute a claimed transaction and release everything admission
    /// acquired for it, whatever the outcome.
    pub async fn process(&self, queued: QueuedTransaction) -> Result<Processed> {
        let span = tracing::info_span!(
            telemetry::SPAN_PROCESS,
            transaction_id = queued.transaction.id,
            account_id = queued.transaction.account
        );
        async move {
            let (txn, grant) = queued.into_parts();
            let started = Instant::now();
            self.events
                .emit(BranchEvent::for_transaction(events::TRANSACTION_STARTED, &txn, []));
            let result = self.execute(txn).await;
            if let Some(grant) = grant {
                self.pools.release(grant).await;
            }
            let processed = result?;

            let code = match processed.outcome {
                Outcome::Success => "SUCCESS",
                Outcome::Failed(err) => err.code(),
            };
            #[cfg(feature = "telemetry")]
            telemetry::record_processed(
                processed.transaction.priority.as_str(),
                code,
                started.elapsed().as_secs_f64(),
            );
            let key = if processed.outcome.is_success() {
                events::TRANSACTION_COMPLETED
            } else {
                events::TRANSACTION_FAILED
            };
            self.events.emit(BranchEvent::for_transaction(
                key,
                &processed.transaction,
                [
                    ("outcome", serde_json::json!(code)),
                    (
                        "duration_ms",
                        serde_json::json!(started.elapsed().as_millis() as u64),
                    ),
                ],
            ));
            Ok(processed)
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, mut txn: Transaction) -> Result<Processed> {
        let account = self.accounts.get(txn.account)?;
        let mut state = account.lock().await;

        if !self.hours.is_open() {
            let outcome = Outcome::Failed(TransactionError::OutsideBusinessHours);
            tracing::info!(transaction_id = txn.id, "branch.process: outside business hours");
            state.record(HistoryRecord::new(&txn, outcome));
            return Ok(Processed {
                transaction: txn,
                outcome,
            });
        }

        if account.profile().requires_clearance && txn.priority > Priority::High {
            txn.priority = Priority::High;
            tracing::info!(transaction_id = txn.id, "branch.process: escalated for clearance");
            self.security.log_event(messages::CLEARANCE_REQUIRED).await;
        }

        let validation = self.validate(state.balance, &mut txn).await;
        let outcome = match validation {
            Ok(()) => {
                let delta = txn.balance_delta();
                state.balance += delta;
                self.pools.lock().await.record_success(txn.account, delta);
                state.record(HistoryRecord::new(&txn, Outcome::Success));
                if !self.settings.processing_delay.is_zero() {
                    tokio::time::sleep(self.settings.processing_delay).await;
                }
                tracing::info!(
                    transaction_id = txn.id,
                    balance = state.balance,
                    "branch.process: transaction completed"
                );
                Outcome::Success
            }
            Err(err) => {
                let outcome = Outcome::Failed(err);
                state.record(HistoryRecord::new(&txn, outcome));
                tracing::info!(
                    transaction_id = txn.id,
                    error = err.code(),
                    "branch.process: transaction failed"
                );
                outcome
            }
        };

        Ok(Processed {
            transaction: txn,
            outcome,
        })
    }

    /// Business validation, first failing rule wins
    async fn validate(
        &self,
        balance: i64,
        txn: &mut Transaction,
    ) -> std::result::Result<(), TransactionError> {
        if balance < 0 {
            return Err(TransactionError::AccountLocked);
        }
        if txn.kind == TransactionKind::Withdraw && balance < i64::from(txn.amount) {
            return Err(TransactionError::InsufficientFunds);
        }
        if self.pools.lock().await.transaction_capacity <= 0 {
            return Err(TransactionError::SystemOverload);
        }
        if txn.amount > self.settings.fraud_threshold {
            txn.priority = Priority::Critical;
            tracing::warn!(transaction_id = txn.id, "branch.process: flagged for fraud");
            self.security.log_event(messages::FRAUD_SUSPECTED).await;
            return Err(TransactionError::FraudSuspected);
        }
        if self.entropy.chance(self.settings.network_failure_rate) {
            tracing::warn!(transaction_id = txn.id, "branch.process: network issue");
            self.security.log_event(messages::NETWORK_FAILURE).await;
            return Err(TransactionError::NetworkFailure);
        }
        Ok(())
    }
}
