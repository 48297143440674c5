//! Periodic pool replenishment

use crate::entropy::EntropySource;
use crate::event::{events, BranchEvent, EventEmitter};
use crate::pool::{Replenishment, ResourcePools};
use crate::security::SecuritySink;
use crate::shutdown::Shutdown;
use crate::telemetry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Calls [`ResourcePools::reset_pools`] every interval and logs the fund
/// transfer it received.
pub struct Replenisher {
    pools: Arc<ResourcePools>,
    security: Arc<dyn SecuritySink>,
    entropy: Arc<dyn EntropySource>,
    events: EventEmitter,
    interval: Duration,
}

impl Replenisher {
    pub fn new(
        pools: Arc<ResourcePools>,
        security: Arc<dyn SecuritySink>,
        entropy: Arc<dyn EntropySource>,
        events: EventEmitter,
        interval: Duration,
    ) -> Self {
        Self {
            pools,
            security,
            entropy,
            events,
            interval,
        }
    }

    /// One replenishment cycle
    pub async fn replenish(&self) -> Replenishment {
        let span = tracing::info_span!(telemetry::SPAN_REPLENISH);
        async {
            let replenishment = self.pools.reset_pools(self.entropy.as_ref()).await;
            self.security
                .log_event(&format!(
                    "Fund transfer of {} received",
                    replenishment.fund_transfer
                ))
                .await;
            tracing::info!(
                fund_transfer = replenishment.fund_transfer,
                available_funds = replenishment.available_funds,
                transaction_capacity = replenishment.transaction_capacity,
                "branch.replenish: pools reset"
            );
            self.events.emit(BranchEvent::with_map(
                events::POOLS_REPLENISHED,
                HashMap::from([
                    (
                        "fund_transfer".to_string(),
                        serde_json::json!(replenishment.fund_transfer),
                    ),
                    (
                        "available_funds".to_string(),
                        serde_json::json!(replenishment.available_funds),
                    ),
                    (
                        "transaction_capacity".to_string(),
                        serde_json::json!(replenishment.transaction_capacity),
                    ),
                ]),
            ));
            replenishment
        }
        .instrument(span)
        .await
    }

    /// Replenish every interval until shutdown
    pub async fn run(&self, shutdown: &Shutdown) {
        while shutdown.sleep(self.interval).await {
            self.replenish().await;
        }
        tracing::info!("branch.replenish: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BranchConfig;
    use crate::entropy::FixedEntropy;
    use crate::pool::ResourceKind;
    use crate::security::SecurityLog;

    fn replenisher() -> (Replenisher, Arc<ResourcePools>, SecurityLog, EventEmitter) {
        let config = BranchConfig::deterministic();
        let pools = Arc::new(ResourcePools::new(&config, [0, 1]));
        let security = SecurityLog::new(config.security_log_capacity);
        let events = EventEmitter::new(16);
        let replenisher = Replenisher::new(
            Arc::clone(&pools),
            Arc::new(security.clone()),
            Arc::new(FixedEntropy { hit: false }),
            events.clone(),
            Duration::from_millis(5),
        );
        (replenisher, pools, security, events)
    }

    #[tokio::test]
    async fn test_replenish_resets_and_logs_transfer() {
        let (replenisher, pools, security, events) = replenisher();
        let mut rx = events.subscribe();
        {
            let mut state = pools.lock().await;
            state.transaction_capacity = 2;
            state.set_quota(0, 0);
            let _ = state.acquire_station(ResourceKind::Teller);
        }

        let replenishment = replenisher.replenish().await;

        assert_eq!(replenishment.fund_transfer, 1000);
        assert_eq!(replenishment.available_funds, 51_000);
        assert_eq!(replenishment.transaction_capacity, 10);
        let state = pools.lock().await;
        assert_eq!(state.quota(0), 5);
        assert_eq!(state.pool(ResourceKind::Teller).busy(), 0);
        drop(state);

        assert_eq!(security.count("Fund transfer of 1000 received").await, 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, events::POOLS_REPLENISHED);
        assert_eq!(event.field("fund_transfer"), Some(&serde_json::json!(1000)));
    }

    #[tokio::test]
    async fn test_run_replenishes_until_shutdown() {
        let (replenisher, _, security, _) = replenisher();
        let replenisher = Arc::new(replenisher);
        let shutdown = Arc::new(Shutdown::new());
        let handle = {
            let replenisher = Arc::clone(&replenisher);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { replenisher.run(&shutdown).await })
        };

        tokio::time::timeout(Duration::from_secs(2), async {
            while security.is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("at least one replenishment");

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("replenisher should stop")
            .unwrap();
    }
}
