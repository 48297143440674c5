//! Branch facade wiring admission, the scheduler and the background jobs

use crate::account::{AccountSnapshot, AccountStore};
use crate::admission::{Admission, Admitted};
use crate::clock::BusinessHours;
use crate::config::BranchConfig;
use crate::entropy::{EntropySource, ThreadEntropy};
use crate::error::{BranchError, Result};
use crate::escalation::{EscalationProtocol, InjectorSettings};
use crate::event::{events, BranchEvent, EventEmitter};
use crate::pool::ResourcePools;
use crate::processor::{ProcessorSettings, TransactionProcessor};
use crate::queue::TransactionQueue;
use crate::replenish::Replenisher;
use crate::scheduler::Scheduler;
use crate::security::{SecurityEntry, SecurityLog, SecuritySink};
use crate::shutdown::Shutdown;
use crate::transaction::Transaction;
use crate::BranchStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A running branch
pub struct Branch {
    config: BranchConfig,
    accounts: Arc<AccountStore>,
    pools: Arc<ResourcePools>,
    queue: Arc<TransactionQueue>,
    hours: Arc<BusinessHours>,
    security: Arc<dyn SecuritySink>,
    events: EventEmitter,
    admission: Admission,
    scheduler: Arc<Scheduler>,
    escalation: Arc<EscalationProtocol>,
    replenisher: Arc<Replenisher>,
    shutdown: Arc<Shutdown>,
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl Branch {
    /// Start the scheduler, event injector, replenisher and closing timer
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            anyhow::bail!("branch already started");
        }
        if self.shutdown.is_triggered() {
            return Err(BranchError::ShutdownInProgress.into());
        }
        tracing::info!(
            tellers = self.config.tellers,
            atms = self.config.atms,
            tokens = self.config.tokens,
            accounts = self.accounts.len(),
            "Starting branch"
        );

        let mut handles = Vec::with_capacity(4);

        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = Arc::clone(&self.shutdown);
        handles.push(tokio::spawn(async move { scheduler.run(&shutdown).await }));

        let escalation = Arc::clone(&self.escalation);
        let shutdown = Arc::clone(&self.shutdown);
        handles.push(tokio::spawn(async move { escalation.run(&shutdown).await }));

        let replenisher = Arc::clone(&self.replenisher);
        let shutdown = Arc::clone(&self.shutdown);
        handles.push(tokio::spawn(async move { replenisher.run(&shutdown).await }));

        let hours = Arc::clone(&self.hours);
        let shutdown = Arc::clone(&self.shutdown);
        let emitter = self.events.clone();
        handles.push(tokio::spawn(async move {
            if hours.run_until_close(&shutdown).await {
                emitter.emit(BranchEvent::empty(events::BUSINESS_CLOSED));
            }
        }));

        *tasks = Some(handles);
        Ok(())
    }

    /// Admit a transaction
    pub async fn submit(&self, txn: Transaction) -> Result<Admitted> {
        if self.shutdown.is_triggered() {
            return Err(BranchError::ShutdownInProgress);
        }
        let admitted = self.admission.assign(txn).await?;
        self.scheduler.work_ready().notify_one();
        Ok(admitted)
    }

    /// Close business hours now. Returns true if the branch was open.
    pub fn close_business(&self) -> bool {
        let closed = self.hours.close();
        if closed {
            tracing::info!("branch.hours: closed early");
            self.events.emit(BranchEvent::empty(events::BUSINESS_CLOSED));
        }
        closed
    }

    /// Wait until business hours are over.
    ///
    /// Closes the window itself once it has elapsed, so this returns even
    /// when the closing timer was never started.
    pub async fn wait_for_close(&self) {
        while self.hours.is_open() && !self.shutdown.is_triggered() {
            if self.hours.remaining().is_zero() {
                if self.hours.close() {
                    tracing::info!("branch.hours: closed");
                    self.events.emit(BranchEvent::empty(events::BUSINESS_CLOSED));
                }
                break;
            }
            let remaining = self.hours.remaining().max(self.config.idle_poll);
            self.shutdown.sleep(remaining).await;
        }
    }

    /// Wait until every lane is empty
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        let drained = tokio::time::timeout(timeout, async {
            while !self.queue.is_empty().await {
                tokio::time::sleep(self.config.idle_poll).await;
            }
        })
        .await;
        drained.map_err(|_| BranchError::Timeout(timeout))
    }

    /// Stop the background loops after the in-flight dispatch finishes.
    ///
    /// Transactions still queued are dropped and their resources released.
    pub async fn shutdown(&self) {
        if self.shutdown.trigger() {
            tracing::info!("Shutting down branch");
            self.events.emit(BranchEvent::empty(events::SHUTDOWN_STARTED));
        }

        let handles = self.tasks.lock().await.take().unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "branch task ended abnormally");
            }
        }

        let leftover = self.queue.drain().await;
        if !leftover.is_empty() {
            tracing::warn!(count = leftover.len(), "Dropping transactions still queued at shutdown");
        }
        for queued in leftover {
            let (_, grant) = queued.into_parts();
            if let Some(grant) = grant {
                self.pools.release(grant).await;
            }
        }

        self.events.emit(BranchEvent::empty(events::SHUTDOWN_COMPLETE));
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub async fn stats(&self) -> BranchStats {
        let lanes = self.queue.status().await;
        BranchStats {
            total_pending: lanes.iter().map(|lane| lane.pending).sum(),
            lanes,
            pools: self.pools.status().await,
            dispatched: self.scheduler.dispatched(),
            business_open: self.hours.is_open(),
        }
    }

    /// Per-account balances and histories, by account id
    pub async fn histories(&self) -> Vec<AccountSnapshot> {
        self.accounts.snapshots().await
    }

    pub async fn security_log(&self) -> Vec<SecurityEntry> {
        self.security.entries().await
    }

    pub fn config(&self) -> &BranchConfig {
        &self.config
    }

    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    pub fn pools(&self) -> &Arc<ResourcePools> {
        &self.pools
    }

    pub fn queue(&self) -> &Arc<TransactionQueue> {
        &self.queue
    }

    pub fn hours(&self) -> &Arc<BusinessHours> {
        &self.hours
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn escalation(&self) -> &Arc<EscalationProtocol> {
        &self.escalation
    }

    pub fn replenisher(&self) -> &Arc<Replenisher> {
        &self.replenisher
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }
}

/// Builder for [`Branch`]
pub struct BranchBuilder {
    config: BranchConfig,
    accounts: Option<AccountStore>,
    security: Option<Arc<dyn SecuritySink>>,
    entropy: Option<Arc<dyn EntropySource>>,
}

impl BranchBuilder {
    pub fn new(config: BranchConfig) -> Self {
        Self {
            config,
            accounts: None,
            security: None,
            entropy: None,
        }
    }

    /// Use these accounts instead of a randomly opened store
    pub fn with_accounts(mut self, accounts: AccountStore) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn with_security_sink(mut self, security: Arc<dyn SecuritySink>) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = Some(entropy);
        self
    }

    /// Build the branch. Business hours open here.
    pub fn build(self) -> anyhow::Result<Branch> {
        let config = self.config;
        config.validate()?;

        let accounts = Arc::new(self.accounts.unwrap_or_else(|| {
            AccountStore::random(config.customers, config.history_capacity)
        }));
        let security: Arc<dyn SecuritySink> = match self.security {
            Some(security) => security,
            None => Arc::new(SecurityLog::new(config.security_log_capacity)),
        };
        let entropy: Arc<dyn EntropySource> = match self.entropy {
            Some(entropy) => entropy,
            None => Arc::new(ThreadEntropy),
        };
        let events = EventEmitter::new(config.event_capacity);

        let pools = Arc::new(ResourcePools::new(&config, accounts.ids()));
        let queue = Arc::new(TransactionQueue::new(config.lane_capacity));
        let hours = Arc::new(BusinessHours::open(config.business_hours));

        let admission = Admission::new(
            Arc::clone(&accounts),
            Arc::clone(&pools),
            Arc::clone(&queue),
            Arc::clone(&hours),
            Arc::clone(&security),
            events.clone(),
            config.large_amount_threshold,
        );
        let processor = Arc::new(TransactionProcessor::new(
            Arc::clone(&accounts),
            Arc::clone(&pools),
            Arc::clone(&hours),
            Arc::clone(&security),
            Arc::clone(&entropy),
            events.clone(),
            ProcessorSettings::from(&config),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            processor,
            config.idle_poll,
        ));
        let escalation = Arc::new(EscalationProtocol::new(
            Arc::clone(&queue),
            Arc::clone(&security),
            Arc::clone(&entropy),
            events.clone(),
            InjectorSettings::from(&config),
        ));
        let replenisher = Arc::new(Replenisher::new(
            Arc::clone(&pools),
            Arc::clone(&security),
            entropy,
            events.clone(),
            config.replenish_interval,
        ));

        Ok(Branch {
            config,
            accounts,
            pools,
            queue,
            hours,
            security,
            events,
            admission,
            scheduler,
            escalation,
            replenisher,
            shutdown: Arc::new(Shutdown::new()),
            tasks: Mutex::new(None),
        })
    }
}
