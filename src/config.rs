//! Branch configuration

use crate::error::{BranchError, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Branch configuration
///
/// Defaults describe a small branch: three tellers, two ATMs, five security
/// tokens and a ten second business day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchConfig {
    /// Number of tellers (serve critical and high priority)
    pub tellers: usize,
    /// Number of ATMs (serve medium and low priority)
    pub atms: usize,
    /// Number of security tokens
    pub tokens: usize,
    /// Number of customer accounts opened by the random store
    pub customers: u32,
    /// Branch cash at opening
    pub initial_funds: i64,
    /// Global transaction capacity, restored on every replenishment
    pub transaction_capacity: i64,
    /// Per-customer quota at opening
    pub customer_quota: i64,
    /// Quota range drawn for every customer on replenishment
    pub replenished_quota: RangeInclusive<i64>,
    /// Fund transfer range received on replenishment (upper bound exclusive)
    pub fund_transfer: (i64, i64),
    /// Maximum pending transactions per lane
    pub lane_capacity: usize,
    /// Maximum history records per account
    pub history_capacity: usize,
    /// Maximum security log entries
    pub security_log_capacity: usize,
    /// Amounts above this are capped to high priority at admission
    pub large_amount_threshold: u32,
    /// Amounts above this are flagged as fraud by the processor
    pub fraud_threshold: u32,
    /// Probability of a synthetic network failure per transaction
    pub network_failure_rate: f64,
    /// Length of the business day
    #[serde(with = "duration_serde")]
    pub business_hours: Duration,
    /// Simulated service time of a successful transaction
    #[serde(with = "duration_serde")]
    pub processing_delay: Duration,
    /// Scheduler back-off when every lane is empty
    #[serde(with = "duration_serde")]
    pub idle_poll: Duration,
    /// Replenishment period
    #[serde(with = "duration_serde")]
    pub replenish_interval: Duration,
    /// Event injector period
    #[serde(with = "duration_serde")]
    pub event_interval: Duration,
    /// Probability of a network-distress event per injector tick
    pub network_distress_rate: f64,
    /// Delay between detecting network distress and escalating
    #[serde(with = "duration_serde")]
    pub network_distress_delay: Duration,
    /// Probability of a regulatory event per injector tick
    pub regulatory_rate: f64,
    /// Maintenance window fires when unix seconds are a multiple of this
    pub maintenance_period_secs: u64,
    /// Pause taken by the injector during a maintenance window
    #[serde(with = "duration_serde")]
    pub maintenance_pause: Duration,
    /// Event bus capacity
    pub event_capacity: usize,
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            tellers: 3,
            atms: 2,
            tokens: 5,
            customers: 5,
            initial_funds: 50_000,
            transaction_capacity: 10,
            customer_quota: 5,
            replenished_quota: 5..=7,
            fund_transfer: (1000, 5000),
            lane_capacity: 20,
            history_capacity: 50,
            security_log_capacity: 30,
            large_amount_threshold: 300,
            fraud_threshold: 500,
            network_failure_rate: 0.01,
            business_hours: Duration::from_secs(10),
            processing_delay: Duration::from_millis(50),
            idle_poll: Duration::from_millis(50),
            replenish_interval: Duration::from_secs(4),
            event_interval: Duration::from_secs(3),
            network_distress_rate: 0.05,
            network_distress_delay: Duration::from_secs(1),
            regulatory_rate: 0.03,
            maintenance_period_secs: 8,
            maintenance_pause: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

impl BranchConfig {
    /// Set pool sizes (builder pattern)
    pub fn with_pools(mut self, tellers: usize, atms: usize, tokens: usize) -> Self {
        self.tellers = tellers;
        self.atms = atms;
        self.tokens = tokens;
        self
    }

    /// Set the business day length (builder pattern)
    pub fn with_business_hours(mut self, business_hours: Duration) -> Self {
        self.business_hours = business_hours;
        self
    }

    /// Set the simulated service time (builder pattern)
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    /// Set the scheduler idle back-off (builder pattern)
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Set the synthetic network failure probability (builder pattern)
    pub fn with_network_failure_rate(mut self, rate: f64) -> Self {
        self.network_failure_rate = rate;
        self
    }

    /// Set global capacity and per-customer quota baselines (builder pattern)
    pub fn with_capacity(mut self, transaction_capacity: i64, customer_quota: i64) -> Self {
        self.transaction_capacity = transaction_capacity;
        self.customer_quota = customer_quota;
        self
    }

    /// Set the per-lane pending cap (builder pattern)
    pub fn with_lane_capacity(mut self, lane_capacity: usize) -> Self {
        self.lane_capacity = lane_capacity;
        self
    }

    /// Set background loop periods (builder pattern)
    pub fn with_intervals(mut self, replenish: Duration, events: Duration) -> Self {
        self.replenish_interval = replenish;
        self.event_interval = events;
        self
    }

    /// Set event injector probabilities (builder pattern)
    pub fn with_event_rates(mut self, network_distress: f64, regulatory: f64) -> Self {
        self.network_distress_rate = network_distress;
        self.regulatory_rate = regulatory;
        self
    }

    /// A configuration with no random failures, no artificial delays and no
    /// random events. Used by tests and benchmarks.
    pub fn deterministic() -> Self {
        Self {
            network_failure_rate: 0.0,
            processing_delay: Duration::ZERO,
            idle_poll: Duration::from_millis(1),
            network_distress_rate: 0.0,
            network_distress_delay: Duration::ZERO,
            regulatory_rate: 0.0,
            maintenance_period_secs: 0,
            maintenance_pause: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tellers == 0 || self.atms == 0 || self.tokens == 0 {
            return Err(BranchError::ConfigError(
                "resource pools must have at least one entry".to_string(),
            ));
        }
        if self.lane_capacity == 0 {
            return Err(BranchError::ConfigError(
                "lane capacity must be positive".to_string(),
            ));
        }
        for (name, rate) in [
            ("network_failure_rate", self.network_failure_rate),
            ("network_distress_rate", self.network_distress_rate),
            ("regulatory_rate", self.regulatory_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(BranchError::ConfigError(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    name, rate
                )));
            }
        }
        if self.event_capacity == 0 || self.event_capacity > usize::MAX / 2 {
            return Err(BranchError::ConfigError(format!(
                "event capacity must be within 1..={}, got {}",
                usize::MAX / 2,
                self.event_capacity
            )));
        }
        if self.replenished_quota.is_empty() || *self.replenished_quota.end() == i64::MAX {
            return Err(BranchError::ConfigError(
                "replenished quota range must be non-empty and end below i64::MAX".to_string(),
            ));
        }
        if self.fund_transfer.0 >= self.fund_transfer.1 {
            return Err(BranchError::ConfigError(
                "fund transfer range is empty".to_string(),
            ));
        }
        Ok(())
    }
}
