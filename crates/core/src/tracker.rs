//! Selector performance tracking.
//!
//! Records which selectors succeed or fail per domain and ranks them. The
//! in-process map is authoritative; every update is mirrored to L2
//! best-effort with a merge that never lowers a counter.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::durable::DurableTier;
use crate::cache::entry::truncate_millis;
use crate::cache::key::normalize_domain;
use crate::cache::selector::{ElementType, SelectorStrategy, canonicalize_selector};
use crate::config::AppConfig;

/// Outcome statistics for one (domain, strategy, selector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorRecord {
    pub domain: String,
    pub selector: String,
    pub strategy: SelectorStrategy,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: DateTime<Utc>,
    pub avg_latency_ms: f64,
}

impl SelectorRecord {
    fn new(domain: String, selector: String, strategy: SelectorStrategy, now: DateTime<Utc>) -> Self {
        Self {
            domain,
            selector,
            strategy,
            success_count: 0,
            failure_count: 0,
            last_used_at: now,
            avg_latency_ms: 0.0,
        }
    }

    pub fn uses(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Ranking score, damped so a single success does not outrank a long record.
    pub fn score(&self) -> f64 {
        self.success_count as f64 / (self.uses() + 1) as f64
    }

    pub fn success_rate(&self) -> f64 {
        match self.uses() {
            0 => 0.0,
            n => self.success_count as f64 / n as f64,
        }
    }

    fn merge_from(&mut self, other: &SelectorRecord) {
        if other.uses() >= self.uses() {
            self.avg_latency_ms = other.avg_latency_ms;
        }
        self.success_count = self.success_count.max(other.success_count);
        self.failure_count = self.failure_count.max(other.failure_count);
        self.last_used_at = self.last_used_at.max(other.last_used_at);
    }
}

fn rank(a: &SelectorRecord, b: &SelectorRecord) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| b.last_used_at.cmp(&a.last_used_at))
        .then_with(|| a.avg_latency_ms.total_cmp(&b.avg_latency_ms))
        .then_with(|| a.selector.cmp(&b.selector))
}

type RecordKey = (String, SelectorStrategy, String);

/// Records removed by [`SelectorTracker::age_out`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgeOutOutcome {
    pub in_memory: u64,
    /// `None` when L2 could not be reached.
    pub in_l2: Option<u64>,
}

pub struct SelectorTracker {
    records: DashMap<RecordKey, SelectorRecord>,
    store: Option<Arc<dyn DurableTier>>,
    l2_timeout: Duration,
    min_success_rate: f64,
}

impl std::fmt::Debug for SelectorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorTracker")
            .field("records", &self.records.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl SelectorTracker {
    pub fn new(config: &AppConfig, store: Option<Arc<dyn DurableTier>>) -> Self {
        Self {
            records: DashMap::new(),
            store,
            l2_timeout: config.l2_timeout(),
            min_success_rate: config.min_success_rate,
        }
    }

    /// Warm the in-memory view from L2, merging with anything already recorded.
    pub async fn load(&self) -> Result<usize, Error> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let loaded = tokio::time::timeout(self.l2_timeout, store.load_selectors())
            .await
            .map_err(|_| Error::TierUnavailable("loading selector records timed out".into()))??;

        let count = loaded.len();
        for record in loaded {
            let key = (record.domain.clone(), record.strategy, record.selector.clone());
            self.records
                .entry(key)
                .and_modify(|existing| existing.merge_from(&record))
                .or_insert_with(|| record.clone());
        }
        tracing::info!(count, "loaded selector records");
        Ok(count)
    }

    /// Record one use of a selector.
    ///
    /// `strategy` of `None` infers it from the expression. L2 write failures
    /// are logged and do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an empty domain or selector and
    /// `Error::InvalidKey` for a selector that cannot be parsed.
    pub async fn record_outcome(
        &self, domain: &str, selector: &str, strategy: Option<SelectorStrategy>, succeeded: bool, latency: Duration,
    ) -> Result<SelectorRecord, Error> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Err(Error::InvalidInput("domain must not be empty".into()));
        }
        let selector = selector.trim();
        if selector.is_empty() {
            return Err(Error::InvalidInput("selector must not be empty".into()));
        }
        let strategy = strategy.unwrap_or_else(|| SelectorStrategy::infer(selector));
        let canonical = canonicalize_selector(selector, strategy)?;

        let now = truncate_millis(Utc::now());
        let latency_ms = latency.as_secs_f64() * 1_000.0;

        let snapshot = {
            let mut record = self
                .records
                .entry((domain.clone(), strategy, canonical.clone()))
                .or_insert_with(|| SelectorRecord::new(domain, canonical, strategy, now));
            if succeeded {
                record.success_count += 1;
            } else {
                record.failure_count += 1;
            }
            let n = record.uses() as f64;
            record.avg_latency_ms += (latency_ms - record.avg_latency_ms) / n;
            record.last_used_at = record.last_used_at.max(now);
            record.clone()
        };

        tracing::debug!(
            domain = %snapshot.domain,
            selector = %snapshot.selector,
            strategy = %snapshot.strategy,
            succeeded,
            "recorded selector outcome"
        );

        if let Some(store) = &self.store {
            match tokio::time::timeout(self.l2_timeout, store.upsert_selector(&snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "failed to persist selector record"),
                Err(_) => tracing::warn!("persisting selector record timed out"),
            }
        }

        Ok(snapshot)
    }

    /// Selectors for `domain` ordered best first, optionally narrowed to one
    /// strategy and one element type.
    pub fn best_selectors(
        &self, domain: &str, strategy: Option<SelectorStrategy>, element_type: ElementType, limit: usize,
    ) -> Vec<SelectorRecord> {
        let domain = normalize_domain(domain);
        let mut matches: Vec<SelectorRecord> = self
            .records
            .iter()
            .filter(|r| r.domain == domain && strategy.is_none_or(|s| r.strategy == s))
            .filter(|r| element_type.matches(&r.selector))
            .map(|r| r.value().clone())
            .collect();
        matches.sort_by(rank);
        matches.truncate(limit);
        matches
    }

    /// Best selector whose plain success rate exceeds `min_success_rate`
    /// (the configured default when `None`).
    pub fn preferred_selector(
        &self, domain: &str, strategy: Option<SelectorStrategy>, element_type: ElementType,
        min_success_rate: Option<f64>,
    ) -> Option<SelectorRecord> {
        let threshold = min_success_rate.unwrap_or(self.min_success_rate);
        self.best_selectors(domain, strategy, element_type, usize::MAX)
            .into_iter()
            .find(|r| r.success_rate() > threshold)
    }

    /// Drop records not used within `older_than`, in memory and in L2.
    pub async fn age_out(&self, older_than: Duration) -> AgeOutOutcome {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let before = self.records.len();
        self.records.retain(|_, r| r.last_used_at >= cutoff);
        let in_memory = before.saturating_sub(self.records.len()) as u64;

        let in_l2 = match &self.store {
            Some(store) => match tokio::time::timeout(self.l2_timeout, store.delete_selectors_before(cutoff)).await {
                Ok(Ok(n)) => Some(n),
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "failed to age out selector records in L2");
                    None
                }
                Err(_) => {
                    tracing::warn!("aging out selector records in L2 timed out");
                    None
                }
            },
            None => Some(0),
        };

        if in_memory > 0 || in_l2.is_some_and(|n| n > 0) {
            tracing::info!(in_memory, ?in_l2, "aged out selector records");
        }
        AgeOutOutcome { in_memory, in_l2 }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::connection::CacheDb;
    use crate::cache::durable::testing::FlakyTier;

    const MS: Duration = Duration::from_millis(10);

    fn tracker() -> SelectorTracker {
        SelectorTracker::new(&AppConfig::default(), None)
    }

    #[tokio::test]
    async fn test_record_counts_and_latency() {
        let t = tracker();
        t.record_outcome("example.com", "div.title", None, true, Duration::from_millis(10))
            .await
            .unwrap();
        let rec = t
            .record_outcome("Example.COM", "div.title", None, false, Duration::from_millis(30))
            .await
            .unwrap();

        assert_eq!(rec.success_count, 1);
        assert_eq!(rec.failure_count, 1);
        assert!((rec.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(rec.strategy, SelectorStrategy::Css);
        assert_eq!(t.len(), 1);
    }

    #[tokio::test]
    async fn test_equivalent_selectors_share_a_record() {
        let t = tracker();
        t.record_outcome("example.com", "div>p", None, true, MS).await.unwrap();
        t.record_outcome("example.com", "div  >  p", None, true, MS).await.unwrap();
        assert_eq!(t.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_malformed() {
        let t = tracker();
        assert!(matches!(t.record_outcome("", "div", None, true, MS).await, Err(Error::InvalidInput(_))));
        assert!(matches!(t.record_outcome("example.com", "  ", None, true, MS).await, Err(Error::InvalidInput(_))));
        assert!(t.record_outcome("example.com", "div[x", None, true, MS).await.is_err());
    }

    #[tokio::test]
    async fn test_ranking_monotonic() {
        let t = tracker();
        for _ in 0..3 {
            t.record_outcome("example.com", "h1", None, true, MS).await.unwrap();
        }
        t.record_outcome("example.com", ".headline", None, true, MS).await.unwrap();

        let best = t.best_selectors("example.com", None, ElementType::General, 10);
        assert_eq!(best[0].selector, "h1");

        let mut last_score = best[1].score();
        for _ in 0..5 {
            let rec = t.record_outcome("example.com", ".headline", None, true, MS).await.unwrap();
            assert!(rec.score() >= last_score);
            last_score = rec.score();
        }
        assert_eq!(t.best_selectors("example.com", None, ElementType::General, 1)[0].selector, ".headline");

        let before = t.best_selectors("example.com", None, ElementType::General, 10)[0].score();
        let after = t
            .record_outcome("example.com", ".headline", None, false, MS)
            .await
            .unwrap()
            .score();
        assert!(after <= before);
    }

    #[tokio::test]
    async fn test_best_filters_by_strategy_and_limit() {
        let t = tracker();
        t.record_outcome("example.com", "h1", None, true, MS).await.unwrap();
        t.record_outcome("example.com", "//h1", None, true, MS).await.unwrap();
        t.record_outcome("other.org", "h2", None, true, MS).await.unwrap();

        let xpath = t.best_selectors("example.com", Some(SelectorStrategy::XPath), ElementType::General, 10);
        assert_eq!(xpath.len(), 1);
        assert_eq!(xpath[0].selector, "//h1");
        assert_eq!(t.best_selectors("example.com", None, ElementType::General, 1).len(), 1);
        assert!(t.best_selectors("nowhere.net", None, ElementType::General, 10).is_empty());
    }

    #[tokio::test]
    async fn test_preferred_selector_threshold() {
        let t = tracker();
        for ok in [true, true, true, true, false] {
            t.record_outcome("example.com", "h1", None, ok, MS).await.unwrap();
        }
        assert!(t.preferred_selector("example.com", None, ElementType::General, None).is_none());
        assert_eq!(t.preferred_selector("example.com", None, ElementType::General, Some(0.5)).unwrap().selector, "h1");

        for _ in 0..5 {
            t.record_outcome("example.com", "h1", None, true, MS).await.unwrap();
        }
        assert!(t.preferred_selector("example.com", None, ElementType::General, None).is_some());
    }

    #[tokio::test]
    async fn test_best_filters_by_element_type() {
        let t = tracker();
        for _ in 0..5 {
            t.record_outcome("example.com", "nav > ul", None, true, MS).await.unwrap();
            t.record_outcome("example.com", "form input[name=q]", None, true, MS).await.unwrap();
        }
        t.record_outcome("example.com", "h1", None, true, MS).await.unwrap();

        let nav = t.best_selectors("example.com", None, ElementType::Navigation, 10);
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].selector, "nav > ul");
        assert_eq!(t.best_selectors("example.com", None, ElementType::General, 10).len(), 3);

        let form = t.preferred_selector("example.com", None, ElementType::Forms, None).unwrap();
        assert!(form.selector.starts_with("form"));
        assert!(t.preferred_selector("example.com", None, ElementType::Links, None).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let t = Arc::new(tracker());
        let mut handles = Vec::new();
        for i in 0..32 {
            let t = t.clone();
            handles.push(tokio::spawn(async move {
                t.record_outcome("example.com", "h1", None, i % 4 != 0, MS).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let rec = &t.best_selectors("example.com", None, ElementType::General, 1)[0];
        assert_eq!(rec.success_count, 24);
        assert_eq!(rec.failure_count, 8);
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let db: Arc<dyn DurableTier> = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let t = SelectorTracker::new(&AppConfig::default(), Some(db.clone()));
        t.record_outcome("example.com", "h1", None, true, MS).await.unwrap();
        t.record_outcome("example.com", "h1", None, false, MS).await.unwrap();

        let fresh = SelectorTracker::new(&AppConfig::default(), Some(db));
        assert_eq!(fresh.load().await.unwrap(), 1);
        let rec = &fresh.best_selectors("example.com", None, ElementType::General, 1)[0];
        assert_eq!((rec.success_count, rec.failure_count), (1, 1));
    }

    #[tokio::test]
    async fn test_l2_failure_does_not_fail_record() {
        let tier = Arc::new(FlakyTier::new().await);
        tier.set_failing(true);
        let t = SelectorTracker::new(&AppConfig::default(), Some(tier));
        let rec = t.record_outcome("example.com", "h1", None, true, MS).await.unwrap();
        assert_eq!(rec.success_count, 1);
    }

    #[tokio::test]
    async fn test_age_out() {
        let db: Arc<dyn DurableTier> = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let t = SelectorTracker::new(&AppConfig::default(), Some(db.clone()));
        t.record_outcome("example.com", "h1", None, true, MS).await.unwrap();

        let kept = t.age_out(Duration::from_secs(90 * 86_400)).await;
        assert_eq!(kept, AgeOutOutcome { in_memory: 0, in_l2: Some(0) });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let dropped = t.age_out(Duration::from_millis(5)).await;
        assert_eq!(dropped, AgeOutOutcome { in_memory: 1, in_l2: Some(1) });
        assert!(t.is_empty());
        assert!(db.load_selectors().await.unwrap().is_empty());
    }
}
