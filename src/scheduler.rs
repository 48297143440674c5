//! Scheduler loop
//!
//! Alternates between two states. While idle it claims the next queued
//! transaction, sleeping for the idle poll interval when every lane is empty.
//! Once it has a claim it is dispatching: it hands the claim to the processor
//! and waits for that single execution to finish before going idle again, so
//! at most one transaction executes at a time.

use crate::error::Result;
use crate::processor::{Processed, TransactionProcessor};
use crate::queue::TransactionQueue;
use crate::shutdown::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Scheduler state, observable through [`Scheduler::state`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Dispatching,
}

pub struct Scheduler {
    queue: Arc<TransactionQueue>,
    processor: Arc<TransactionProcessor>,
    idle_poll: Duration,
    work_ready: Arc<Notify>,
    dispatching: AtomicBool,
    dispatched: AtomicU64,
}

impl Scheduler {
    pub fn new(
        queue: Arc<TransactionQueue>,
        processor: Arc<TransactionProcessor>,
        idle_poll: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            idle_poll,
            work_ready: Arc::new(Notify::new()),
            dispatching: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Handle used by admission to cut the idle wait short
    pub fn work_ready(&self) -> Arc<Notify> {
        Arc::clone(&self.work_ready)
    }

    /// Number of transactions dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Dispatching while a claimed transaction is with the processor
    pub fn state(&self) -> SchedulerState {
        if self.dispatching.load(Ordering::SeqCst) {
            SchedulerState::Dispatching
        } else {
            SchedulerState::Idle
        }
    }

    /// Claim and execute one transaction.
    ///
    /// Returns `None` when every lane is empty.
    pub async fn dispatch_next(&self) -> Option<Result<Processed>> {
        let queued = self.queue.claim_next().await?;
        let transaction_id = queued.transaction.id;
        tracing::debug!(transaction_id, "branch.scheduler: dispatching");

        self.dispatching.store(true, Ordering::SeqCst);
        let result = self.processor.process(queued).await;
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        self.dispatching.store(false, Ordering::SeqCst);
        if let Err(ref e) = result {
            tracing::error!(transaction_id, error = %e, "branch.scheduler: dispatch failed");
        }
        Some(result)
    }

    /// Run until shutdown. The in-flight dispatch always completes first.
    pub async fn run(&self, shutdown: &Shutdown) {
        tracing::info!("branch.scheduler: started");

        while !shutdown.is_triggered() {
            if self.dispatch_next().await.is_none() {
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_poll) => {}
                    _ = self.work_ready.notified() => {}
                    _ = shutdown.wait() => {}
                }
            }
        }

        tracing::info!(dispatched = self.dispatched(), "branch.scheduler: stopped");
    }
}
