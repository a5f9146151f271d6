//! Background expiry sweeper.
//!
//! Runs on a fixed interval using only public coordinator and tracker
//! operations. A failed step is logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::cache::TieredCache;
use crate::config::AppConfig;
use crate::tracker::{AgeOutOutcome, SelectorTracker};

/// What one sweep accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub l1_expired: u64,
    /// `None` when the L2 purge failed this round.
    pub l2_expired: Option<u64>,
    pub invalidations_reconciled: Option<u64>,
    pub selectors_aged_out: AgeOutOutcome,
    pub key_states_pruned: u64,
    pub metrics_persisted: bool,
}

pub struct ExpirySweeper {
    cache: Arc<TieredCache>,
    tracker: Arc<SelectorTracker>,
    interval: Duration,
    batch_size: usize,
    selector_horizon: Duration,
}

impl ExpirySweeper {
    pub fn new(config: &AppConfig, cache: Arc<TieredCache>, tracker: Arc<SelectorTracker>) -> Self {
        Self {
            cache,
            tracker,
            interval: config.sweep_interval(),
            batch_size: config.sweep_batch_size,
            selector_horizon: config.selector_horizon(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run every sweep step once. Safe to call repeatedly.
    pub async fn run_once(&self) -> SweepReport {
        let l1_expired = self.cache.purge_expired_l1() as u64;

        let l2_expired = match self.cache.purge_expired_l2(self.batch_size).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, "L2 expiry purge failed, retrying next sweep");
                None
            }
        };

        let invalidations_reconciled = match self.cache.reconcile_invalidations().await {
            Ok(n) => Some(n as u64),
            Err(e) => {
                tracing::warn!(error = %e, "deferred invalidations still pending");
                None
            }
        };

        let selectors_aged_out = self.tracker.age_out(self.selector_horizon).await;
        let key_states_pruned = self.cache.prune_key_states() as u64;

        let metrics_persisted = match self.cache.persist_metrics_snapshot().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist metrics snapshot");
                false
            }
        };

        let report = SweepReport {
            l1_expired,
            l2_expired,
            invalidations_reconciled,
            selectors_aged_out,
            key_states_pruned,
            metrics_persisted,
        };
        tracing::info!(
            l1_expired = report.l1_expired,
            l2_expired = ?report.l2_expired,
            reconciled = ?report.invalidations_reconciled,
            selectors_aged_out = report.selectors_aged_out.in_memory,
            "sweep complete"
        );
        report
    }

    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::cache::durable::DurableTier;
    use crate::cache::durable::testing::FlakyTier;
    use crate::cache::{CacheDb, ContentKind, EntryMetadata, KeyNormalizer, OperationKind};
    use crate::config::TtlConfig;

    fn short_ttl_config() -> AppConfig {
        AppConfig {
            ttl: TtlConfig { page_secs: 1, text_secs: 1, long_threshold_secs: 1, ..Default::default() },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_once_reaps_both_tiers() {
        let config = short_ttl_config();
        let db = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let l2: Arc<dyn DurableTier> = db.clone();
        let cache = Arc::new(TieredCache::new(&config, Some(l2.clone())));
        let tracker = Arc::new(SelectorTracker::new(&config, Some(l2)));
        let sweeper = ExpirySweeper::new(&config, cache.clone(), tracker);

        let normalizer = KeyNormalizer::default();
        for url in ["https://example.com/a", "https://example.com/b"] {
            let key = normalizer.normalize(url, None, OperationKind::Navigate).unwrap();
            cache
                .store(&key, Bytes::from_static(b"v"), EntryMetadata::new(url, ContentKind::Page))
                .await;
        }

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let report = sweeper.run_once().await;
        assert_eq!(report.l1_expired, 2);
        assert_eq!(report.l2_expired, Some(2));
        assert!(report.metrics_persisted);
        assert_eq!(db.metrics_snapshot_count().await.unwrap(), 1);

        let again = sweeper.run_once().await;
        assert_eq!(again.l1_expired, 0);
        assert_eq!(again.l2_expired, Some(0));
    }

    #[tokio::test]
    async fn test_run_once_survives_l2_outage() {
        let config = AppConfig::default();
        let tier = Arc::new(FlakyTier::new().await);
        let cache = Arc::new(TieredCache::new(&config, Some(tier.clone())));
        let tracker = Arc::new(SelectorTracker::new(&config, Some(tier.clone())));
        let sweeper = ExpirySweeper::new(&config, cache.clone(), tracker);

        let key = KeyNormalizer::default()
            .normalize("https://example.com/a", None, OperationKind::Navigate)
            .unwrap();
        cache
            .store(&key, Bytes::from_static(b"v"), EntryMetadata::new("https://example.com/a", ContentKind::Page))
            .await;

        tier.set_failing(true);
        cache.invalidate(&key).await;
        let report = sweeper.run_once().await;
        assert_eq!(report.l2_expired, None);
        assert_eq!(report.invalidations_reconciled, None);
        assert!(!report.metrics_persisted);

        tier.set_failing(false);
        let report = sweeper.run_once().await;
        assert_eq!(report.invalidations_reconciled, Some(1));
        assert!(tier.get(&key, chrono::Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let config = AppConfig::default();
        let cache = Arc::new(TieredCache::new(&config, None));
        let tracker = Arc::new(SelectorTracker::new(&config, None));
        let sweeper = Arc::new(ExpirySweeper::new(&config, cache, tracker).with_interval(Duration::from_millis(10)));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(sweeper.run_loop(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
