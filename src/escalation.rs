//! Escalation protocol and external event injector
//!
//! Network distress promotes every queued medium-lane withdrawal to the
//! critical lane. A regulatory update promotes every high-lane transaction
//! above the large-amount threshold. A maintenance window is logged only.
//!
//! Promotion keeps the grant a transaction was admitted with, so a promoted
//! entry still releases exactly what it acquired.

use crate::config::BranchConfig;
use crate::entropy::EntropySource;
use crate::event::{events, BranchEvent, EventEmitter};
use crate::queue::TransactionQueue;
use crate::security::{messages, SecuritySink};
use crate::shutdown::Shutdown;
use crate::telemetry;
use crate::transaction::{Priority, TransactionId, TransactionKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::Instrument;

/// Injector timing and probabilities
#[derive(Debug, Clone, Copy)]
pub struct InjectorSettings {
    pub event_interval: Duration,
    pub network_distress_rate: f64,
    pub network_distress_delay: Duration,
    pub regulatory_rate: f64,
    /// Maintenance fires when the wall-clock second is a multiple of this; 0 disables it
    pub maintenance_period_secs: u64,
    pub maintenance_pause: Duration,
    pub large_amount_threshold: u32,
}

impl From<&BranchConfig> for InjectorSettings {
    fn from(config: &BranchConfig) -> Self {
        Self {
            event_interval: config.event_interval,
            network_distress_rate: config.network_distress_rate,
            network_distress_delay: config.network_distress_delay,
            regulatory_rate: config.regulatory_rate,
            maintenance_period_secs: config.maintenance_period_secs,
            maintenance_pause: config.maintenance_pause,
            large_amount_threshold: config.large_amount_threshold,
        }
    }
}

/// External event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalEvent {
    NetworkDistress,
    MaintenanceWindow,
    RegulatoryUpdate,
}

impl ExternalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalEvent::NetworkDistress => "network_distress",
            ExternalEvent::MaintenanceWindow => "maintenance_window",
            ExternalEvent::RegulatoryUpdate => "regulatory_update",
        }
    }
}

pub struct EscalationProtocol {
    queue: Arc<TransactionQueue>,
    security: Arc<dyn SecuritySink>,
    entropy: Arc<dyn EntropySource>,
    events: EventEmitter,
    settings: InjectorSettings,
}

impl EscalationProtocol {
    pub fn new(
        queue: Arc<TransactionQueue>,
        security: Arc<dyn SecuritySink>,
        entropy: Arc<dyn EntropySource>,
        events: EventEmitter,
        settings: InjectorSettings,
    ) -> Self {
        Self {
            queue,
            security,
            entropy,
            events,
            settings,
        }
    }

    /// Promote every medium-lane withdrawal to critical
    pub async fn network_distress(&self) -> Vec<TransactionId> {
        self.security.log_event(messages::NETWORK_ISSUE).await;
        self.promote_withdrawals().await
    }

    async fn promote_withdrawals(&self) -> Vec<TransactionId> {
        let span = tracing::info_span!(telemetry::SPAN_ESCALATE, trigger = "network_distress");
        let moved = self
            .queue
            .promote(Priority::Medium, Priority::Critical, |txn| {
                txn.kind == TransactionKind::Withdraw
            })
            .instrument(span)
            .await;
        self.escalated(ExternalEvent::NetworkDistress, Priority::Medium, moved)
    }

    /// Promote every high-lane transaction above the large-amount threshold
    pub async fn regulatory_update(&self) -> Vec<TransactionId> {
        self.security.log_event(messages::REGULATORY_UPDATE).await;
        let threshold = self.settings.large_amount_threshold;
        let span = tracing::info_span!(telemetry::SPAN_ESCALATE, trigger = "regulatory_update");
        let moved = self
            .queue
            .promote(Priority::High, Priority::Critical, |txn| txn.amount > threshold)
            .instrument(span)
            .await;
        self.escalated(ExternalEvent::RegulatoryUpdate, Priority::High, moved)
    }

    /// Informational only; the queue is left alone
    pub async fn maintenance_window(&self) {
        self.security.log_event(messages::MAINTENANCE_WINDOW).await;
        tracing::info!("branch.escalate: maintenance in progress");
    }

    fn escalated(
        &self,
        trigger: ExternalEvent,
        from: Priority,
        moved: Vec<TransactionId>,
    ) -> Vec<TransactionId> {
        tracing::info!(
            trigger = trigger.as_str(),
            from = from.as_str(),
            moved = moved.len(),
            "branch.escalate: promoted to critical"
        );
        #[cfg(feature = "telemetry")]
        telemetry::record_escalated(moved.len() as u64);
        self.events.emit(BranchEvent::with_map(
            events::TRANSACTION_ESCALATED,
            HashMap::from([
                ("trigger".to_string(), serde_json::json!(trigger.as_str())),
                ("from".to_string(), serde_json::json!(from)),
                ("to".to_string(), serde_json::json!(Priority::Critical)),
                ("transaction_ids".to_string(), serde_json::json!(moved)),
            ]),
        ));
        moved
    }

    fn maintenance_due(&self) -> bool {
        let period = self.settings.maintenance_period_secs;
        if period == 0 {
            return false;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|now| now.as_secs() % period == 0)
            .unwrap_or(false)
    }

    /// One evaluation of every trigger. Returns the events that fired.
    pub async fn inject_once(&self, shutdown: &Shutdown) -> Vec<ExternalEvent> {
        let mut fired = Vec::new();

        if self.entropy.chance(self.settings.network_distress_rate) {
            self.security.log_event(messages::NETWORK_ISSUE).await;
            tracing::warn!("branch.escalate: network issue detected, delaying");
            fired.push(ExternalEvent::NetworkDistress);
            if !self.settings.network_distress_delay.is_zero()
                && !shutdown.sleep(self.settings.network_distress_delay).await
            {
                return fired;
            }
            self.promote_withdrawals().await;
        }

        if self.maintenance_due() {
            self.maintenance_window().await;
            fired.push(ExternalEvent::MaintenanceWindow);
            if !self.settings.maintenance_pause.is_zero()
                && !shutdown.sleep(self.settings.maintenance_pause).await
            {
                return fired;
            }
        }

        if self.entropy.chance(self.settings.regulatory_rate) {
            self.regulatory_update().await;
            fired.push(ExternalEvent::RegulatoryUpdate);
        }

        fired
    }

    /// Evaluate the triggers every event interval until shutdown
    pub async fn run(&self, shutdown: &Shutdown) {
        tracing::info!(
            interval_ms = self.settings.event_interval.as_millis() as u64,
            "branch.escalate: injector started"
        );
        while shutdown.sleep(self.settings.event_interval).await {
            self.inject_once(shutdown).await;
        }
        tracing::info!("branch.escalate: injector stopped");
    }
}
