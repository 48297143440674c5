//! Span names and OpenTelemetry metrics for the branch engine.
//!
//! Span names are always available. The metrics half needs the `telemetry`
//! feature; its recording functions are no-ops until [`init_branch_metrics`]
//! has been called, so the engine can run without a meter provider.

#[cfg(feature = "telemetry")]
use opentelemetry::global;
#[cfg(feature = "telemetry")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "telemetry")]
use opentelemetry::KeyValue;
#[cfg(feature = "telemetry")]
use std::sync::OnceLock;

// ============================================================================
// Span Constants
// ============================================================================

/// Span for admitting a transaction
pub const SPAN_ADMIT: &str = "branch.admit";

/// Span for processing a claimed transaction
pub const SPAN_PROCESS: &str = "branch.process";

/// Span for an escalation sweep
pub const SPAN_ESCALATE: &str = "branch.escalate";

/// Span for a replenishment cycle
pub const SPAN_REPLENISH: &str = "branch.replenish";

// ============================================================================
// Attribute Constants
// ============================================================================

/// Lane (priority) attribute
pub const ATTR_LANE: &str = "branch.lane";

/// Outcome code attribute
pub const ATTR_OUTCOME: &str = "branch.outcome";

// ============================================================================
// Metrics
// ============================================================================

#[cfg(feature = "telemetry")]
static METRICS: OnceLock<BranchMetricsRecorder> = OnceLock::new();

/// OpenTelemetry instruments for branch-level observability.
#[cfg(feature = "telemetry")]
pub struct BranchMetricsRecorder {
    /// Transactions admitted into a lane
    pub transactions_admitted_total: Counter<u64>,
    /// Transactions rejected at admission
    pub transactions_rejected_total: Counter<u64>,
    /// Transactions executed successfully
    pub transactions_completed_total: Counter<u64>,
    /// Transactions that executed with a failure outcome
    pub transactions_failed_total: Counter<u64>,
    /// Queued transactions promoted by escalation
    pub transactions_escalated_total: Counter<u64>,
    /// Processing latency in seconds
    pub processing_duration_seconds: Histogram<f64>,
}

/// Get the global branch metrics recorder (None if not initialized).
#[cfg(feature = "telemetry")]
pub fn metrics() -> Option<&'static BranchMetricsRecorder> {
    METRICS.get()
}

/// Initialize branch metrics using the global OpenTelemetry meter provider.
///
/// Safe to call multiple times; only the first call takes effect.
#[cfg(feature = "telemetry")]
pub fn init_branch_metrics() {
    let meter = global::meter("branch-lane");

    let recorder = BranchMetricsRecorder {
        transactions_admitted_total: meter
            .u64_counter("branch_transactions_admitted_total")
            .with_description("Transactions admitted into a lane")
            .init(),
        transactions_rejected_total: meter
            .u64_counter("branch_transactions_rejected_total")
            .with_description("Transactions rejected at admission")
            .init(),
        transactions_completed_total: meter
            .u64_counter("branch_transactions_completed_total")
            .with_description("Transactions executed successfully")
            .init(),
        transactions_failed_total: meter
            .u64_counter("branch_transactions_failed_total")
            .with_description("Transactions executed with a failure outcome")
            .init(),
        transactions_escalated_total: meter
            .u64_counter("branch_transactions_escalated_total")
            .with_description("Queued transactions promoted to the critical lane")
            .init(),
        processing_duration_seconds: meter
            .f64_histogram("branch_processing_duration_seconds")
            .with_description("Transaction processing duration in seconds")
            .init(),
    };

    let _ = METRICS.set(recorder);
}

/// Record an admission into `lane`.
#[cfg(feature = "telemetry")]
pub fn record_admitted(lane: &str) {
    if let Some(m) = metrics() {
        m.transactions_admitted_total
            .add(1, &[KeyValue::new(ATTR_LANE, lane.to_string())]);
    }
}

/// Record an admission rejection with its outcome code.
#[cfg(feature = "telemetry")]
pub fn record_rejected(code: &str) {
    if let Some(m) = metrics() {
        m.transactions_rejected_total
            .add(1, &[KeyValue::new(ATTR_OUTCOME, code.to_string())]);
    }
}

/// Record a processed transaction with its duration.
#[cfg(feature = "telemetry")]
pub fn record_processed(lane: &str, outcome: &str, duration_secs: f64) {
    if let Some(m) = metrics() {
        let attrs = [
            KeyValue::new(ATTR_LANE, lane.to_string()),
            KeyValue::new(ATTR_OUTCOME, outcome.to_string()),
        ];
        if outcome == "SUCCESS" {
            m.transactions_completed_total.add(1, &attrs);
        } else {
            m.transactions_failed_total.add(1, &attrs);
        }
        m.processing_duration_seconds.record(duration_secs, &attrs);
    }
}

/// Record `count` promotions into the critical lane.
#[cfg(feature = "telemetry")]
pub fn record_escalated(count: u64) {
    if let Some(m) = metrics() {
        m.transactions_escalated_total.add(count, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_constants_follow_convention() {
        for span in [SPAN_ADMIT, SPAN_PROCESS, SPAN_ESCALATE, SPAN_REPLENISH] {
            assert!(span.starts_with("branch."), "Span {} should start with branch.", span);
        }
    }

    #[test]
    fn test_attribute_keys_are_unique() {
        let keys = vec![ATTR_LANE, ATTR_OUTCOME];
        let unique: std::collections::HashSet<&str> = keys.iter().copied().collect();
        assert_eq!(keys.len(), unique.len(), "Attribute keys must be unique");
    }

    #[cfg(feature = "telemetry")]
    #[test]
    fn test_recording_without_init_is_noop() {
        record_admitted("high");
        record_rejected("RESOURCE_UNAVAILABLE");
        record_processed("low", "SUCCESS", 0.05);
        record_processed("low", "NETWORK_FAILURE", 0.0);
        record_escalated(3);
    }

    #[cfg(feature = "telemetry")]
    #[test]
    fn test_init_is_idempotent() {
        init_branch_metrics();
        init_branch_metrics();
        assert!(metrics().is_some());
        record_admitted("critical");
        record_escalated(1);
    }
}
