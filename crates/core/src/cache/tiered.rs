//! Two-tier cache coordinator.
//!
//! Lookups consult L1, then L2 with promotion into L1. Stores classify the
//! payload, write L2 first for long-lived content, then L1. L2 faults and
//! timeouts are absorbed: the coordinator keeps serving from L1 and reports
//! the tier as degraded.
//!
//! Promotions race against invalidations. Every invalidation and store
//! stamps the key (or domain) with a value from a logical clock; a promotion
//! reads the clock before it goes to L2 and is inserted into L1 only if no
//! newer stamp exists, checked under the L1 lock. When an L2 delete fails,
//! the key keeps a `l2_stale_before` marker so older L2 rows are never
//! promoted, and the sweeper retries the delete. Pattern invalidations
//! follow the same scheme with the pattern as the stamp key.
//!
//! Every invalidation is also written to a bounded ledger reported by
//! [`TieredCache::report`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::durable::DurableTier;
use super::entry::{CacheEntry, EntryMetadata, EntrySummary, Tier};
use super::history::HistoryRecord;
use super::key::{CacheKey, normalize_domain};
use super::ledger::{InvalidationEvent, InvalidationLedger, InvalidationScope, InvalidationSummary};
use super::memory::MemoryTier;
use super::metrics::{CacheMetrics, MetricsRecord, MetricsSnapshot};
use super::policy::{ContentKind, Durability, TtlPolicy};
use crate::Error;
use crate::config::AppConfig;

/// Result of a lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit { entry: Arc<CacheEntry>, served_from: Tier },
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    pub fn served_from(&self) -> Option<Tier> {
        match self {
            Lookup::Hit { served_from, .. } => Some(*served_from),
            Lookup::Miss => None,
        }
    }

    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            Lookup::Hit { entry, .. } => Some(entry),
            Lookup::Miss => None,
        }
    }
}

/// Where a stored payload ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreOutcome {
    pub durability: Durability,
    pub ttl_secs: Option<u64>,
    pub in_l1: bool,
    pub in_l2: bool,
}

impl StoreOutcome {
    pub fn is_cached(&self) -> bool {
        self.in_l1 || self.in_l2
    }
}

/// Rows removed by an invalidation. `l2_removed` is `None` when L2 could not
/// be reached and the delete was deferred to the sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RemovalOutcome {
    pub l1_removed: u64,
    pub l2_removed: Option<u64>,
}

/// Health of the durable tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum L2Status {
    Available,
    Degraded { reason: String },
    Disabled,
}

/// Counter snapshot plus tier occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub metrics: MetricsSnapshot,
    pub hit_rate: f64,
    pub l1_entries: u64,
    pub l1_bytes: u64,
    pub l1_capacity_bytes: u64,
    pub invalidations: u64,
    pub l2: L2Status,
}

/// Occupancy of one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierReport {
    pub entries: u64,
    pub bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Administrative read model.
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub l1: TierReport,
    pub l2: Option<TierReport>,
    pub history_records: Option<u64>,
    pub selector_records: Option<u64>,
    pub l2_status: L2Status,
    pub metrics: MetricsSnapshot,
    pub invalidations: InvalidationSummary,
}

/// Entries held for one domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainReport {
    pub domain: String,
    pub l1: Vec<EntrySummary>,
    /// `None` when L2 is disabled or could not be reached.
    pub l2: Option<Vec<EntrySummary>>,
    pub history: Option<Vec<HistoryRecord>>,
}

/// Invalidation events listed in a report.
const REPORT_RECENT_INVALIDATIONS: usize = 20;

/// Result of [`TieredCache::get_or_fetch`].
#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: Bytes,
    /// `None` when the payload came from the fetch callback.
    pub served_from: Option<Tier>,
    pub stored: Option<StoreOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryOutcome {
    pub l1_removed: u64,
    pub l2_removed: Option<u64>,
}

#[derive(Debug)]
struct KeyState {
    seq: u64,
    l2_stale_before: Option<DateTime<Utc>>,
    touched: Instant,
}

impl KeyState {
    fn new() -> Self {
        Self { seq: 0, l2_stale_before: None, touched: Instant::now() }
    }

    /// Whether an L2 row created at `created_at` may enter L1 for a
    /// promotion that started at clock value `started`.
    fn admits(&self, started: u64, created_at: DateTime<Utc>) -> bool {
        self.seq < started && self.l2_stale_before.is_none_or(|cutoff| created_at > cutoff)
    }
}

/// The tiered cache coordinator.
pub struct TieredCache {
    l1: MemoryTier,
    l2: Option<Arc<dyn DurableTier>>,
    policy: TtlPolicy,
    metrics: CacheMetrics,
    clock: AtomicU64,
    key_states: DashMap<CacheKey, KeyState>,
    domain_states: DashMap<String, KeyState>,
    pattern_states: DashMap<String, KeyState>,
    history_cleared_at: AtomicU64,
    ledger: InvalidationLedger,
    l2_timeout: Duration,
    batch_size: usize,
    l2_degraded: AtomicBool,
    l2_last_error: Mutex<Option<String>>,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("l1", &self.l1)
            .field("l2_enabled", &self.l2.is_some())
            .field("l2_timeout", &self.l2_timeout)
            .finish_non_exhaustive()
    }
}

impl TieredCache {
    /// Build a coordinator. `l2` of `None` runs L1-only.
    pub fn new(config: &AppConfig, l2: Option<Arc<dyn DurableTier>>) -> Self {
        Self {
            l1: MemoryTier::new(config.l1_capacity_bytes),
            l2,
            policy: TtlPolicy::new(config.ttl.clone()),
            metrics: CacheMetrics::default(),
            clock: AtomicU64::new(1),
            key_states: DashMap::new(),
            domain_states: DashMap::new(),
            pattern_states: DashMap::new(),
            history_cleared_at: AtomicU64::new(0),
            ledger: InvalidationLedger::default(),
            l2_timeout: config.l2_timeout(),
            batch_size: config.sweep_batch_size,
            l2_degraded: AtomicBool::new(false),
            l2_last_error: Mutex::new(None),
        }
    }

    /// Find a cached value. Never performs the real operation.
    pub async fn lookup(&self, key: &CacheKey) -> Lookup {
        let now = Utc::now();
        if let Some(entry) = self.l1.get(key, now) {
            self.metrics.record_l1_hit();
            tracing::debug!(key = %key, "L1 hit");
            return Lookup::Hit { entry, served_from: Tier::L1 };
        }

        let Some(l2) = &self.l2 else {
            self.metrics.record_miss();
            tracing::debug!(key = %key, "miss");
            return Lookup::Miss;
        };

        let started = self.tick();
        let entry = match self.l2_call("get", l2.get(key, now)).await {
            Ok(Some(entry)) if !entry.is_expired_at(now) => Arc::new(entry),
            Ok(_) | Err(_) => {
                self.metrics.record_miss();
                tracing::debug!(key = %key, "miss");
                return Lookup::Miss;
            }
        };

        match self.l1.insert_if(entry.clone(), || self.admits_promotion(&entry, started)) {
            Ok(Some(evicted)) => {
                self.metrics.record_evictions(evicted);
                self.metrics.record_promotion();
                self.metrics.record_l2_hit();
                tracing::info!(key = %key, evicted, "promoted L2 entry into L1");
                Lookup::Hit { entry, served_from: Tier::L2 }
            }
            Ok(None) => self.discard_promotion(key),
            Err(err) => {
                if !self.admits_promotion(&entry, started) {
                    return self.discard_promotion(key);
                }
                self.metrics.record_l2_hit();
                tracing::debug!(key = %key, error = %err, "L2 hit served without promotion");
                Lookup::Hit { entry, served_from: Tier::L2 }
            }
        }
    }

    /// Classify and write a payload through the tiers.
    pub async fn store(&self, key: &CacheKey, payload: Bytes, metadata: EntryMetadata) -> StoreOutcome {
        let class = self.policy.classify(&metadata, payload.len());
        let mut outcome = StoreOutcome {
            durability: class.durability,
            ttl_secs: class.ttl.map(|t| t.as_secs()),
            in_l1: false,
            in_l2: false,
        };

        if class.durability == Durability::Ephemeral {
            tracing::debug!(key = %key, kind = metadata.content_kind.as_str(), "dynamic content not cached");
            return outcome;
        }

        let entry = Arc::new(CacheEntry::new(key.clone(), payload, metadata, class.durability, class.ttl, Utc::now()));

        if let (true, Some(l2)) = (class.durability.writes_l2(), &self.l2) {
            outcome.in_l2 = self.l2_call("put", l2.put(&entry)).await.is_ok();
        }

        // Older L2 rows for this key must not be promoted over this value.
        let stale_before = (self.l2.is_some() && !outcome.in_l2).then_some(entry.created_at);
        let seq = self.stamp_key(key, stale_before);

        match self.l1.insert_if(entry.clone(), || self.is_latest_write(&entry, seq)) {
            Ok(Some(evicted)) => {
                self.metrics.record_evictions(evicted);
                outcome.in_l1 = true;
            }
            Ok(None) => {
                tracing::debug!(key = %key, "store superseded by a newer write");
            }
            Err(err) => {
                tracing::debug!(key = %key, error = %err, l2 = outcome.in_l2, "entry not admitted to L1");
            }
        }

        if outcome.is_cached() {
            self.metrics.record_store(entry.size_bytes);
        }
        tracing::debug!(
            key = %key,
            durability = class.durability.as_str(),
            l1 = outcome.in_l1,
            l2 = outcome.in_l2,
            "stored"
        );
        outcome
    }

    /// Serve from cache, or run `fetch`, store its payload and return it.
    ///
    /// Errors from `fetch` are returned untouched and nothing is cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &CacheKey, metadata: EntryMetadata, fetch: F) -> Result<Fetched, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if let Lookup::Hit { entry, served_from } = self.lookup(key).await {
            return Ok(Fetched { payload: entry.payload.clone(), served_from: Some(served_from), stored: None });
        }

        let payload = fetch().await?;
        let stored = self.store(key, payload.clone(), metadata).await;
        Ok(Fetched { payload, served_from: None, stored: Some(stored) })
    }

    /// Remove a key from both tiers.
    pub async fn invalidate(&self, key: &CacheKey) -> RemovalOutcome {
        self.invalidate_because(key, "explicit").await
    }

    /// [`invalidate`](Self::invalidate), recording `reason` in the ledger.
    pub async fn invalidate_because(&self, key: &CacheKey, reason: &str) -> RemovalOutcome {
        let cutoff = Utc::now();
        let l2_removed = match &self.l2 {
            Some(l2) => self.l2_call("delete", l2.delete_before(key, cutoff)).await.ok(),
            None => Some(0),
        };

        self.stamp_key(key, l2_removed.is_none().then_some(cutoff));
        let removed = self.l1.remove(key);
        let l1_removed = u64::from(removed.is_some());

        self.ledger.record(InvalidationEvent {
            at: cutoff,
            scope: InvalidationScope::Key,
            target: key.to_string(),
            domain: removed.map(|e| e.domain.clone()),
            reason: reason.to_string(),
            l1_removed,
            l2_removed,
        });
        RemovalOutcome { l1_removed, l2_removed }
    }

    /// Remove every entry whose origin host equals `domain` from both tiers.
    pub async fn invalidate_domain(&self, domain: &str) -> RemovalOutcome {
        self.invalidate_domain_because(domain, "explicit").await
    }

    pub async fn invalidate_domain_because(&self, domain: &str, reason: &str) -> RemovalOutcome {
        let domain = normalize_domain(domain);
        let cutoff = Utc::now();
        let l2_removed = match &self.l2 {
            Some(l2) => self.l2_call("delete_domain", l2.delete_domain_before(&domain, cutoff)).await.ok(),
            None => Some(0),
        };

        self.stamp_domain(&domain, l2_removed.is_none().then_some(cutoff));
        let l1_removed = self.l1.remove_domain(&domain) as u64;

        self.ledger.record(InvalidationEvent {
            at: cutoff,
            scope: InvalidationScope::Domain,
            target: domain.clone(),
            domain: Some(domain),
            reason: reason.to_string(),
            l1_removed,
            l2_removed,
        });
        RemovalOutcome { l1_removed, l2_removed }
    }

    /// Remove every entry whose URL contains `pattern`, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a blank pattern.
    pub async fn invalidate_pattern(&self, pattern: &str, reason: &str) -> Result<RemovalOutcome, Error> {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern.is_empty() {
            return Err(Error::InvalidInput("pattern must not be empty".to_string()));
        }

        let cutoff = Utc::now();
        let l2_removed = match &self.l2 {
            Some(l2) => self.l2_call("delete_matching", l2.delete_matching_before(&pattern, cutoff)).await.ok(),
            None => Some(0),
        };

        self.stamp_pattern(&pattern, l2_removed.is_none().then_some(cutoff));
        let l1_removed = self.l1.remove_matching(|e| url_matches(&e.metadata.url, &pattern)) as u64;

        self.ledger.record(InvalidationEvent {
            at: cutoff,
            scope: InvalidationScope::Pattern,
            target: pattern,
            domain: None,
            reason: reason.to_string(),
            l1_removed,
            l2_removed,
        });
        Ok(RemovalOutcome { l1_removed, l2_removed })
    }

    /// Drop expired entries from both tiers now.
    pub async fn clear_expired(&self) -> ExpiryOutcome {
        let l1_removed = self.purge_expired_l1() as u64;
        let l2_removed = self.purge_expired_l2(self.batch_size).await.ok();
        ExpiryOutcome { l1_removed, l2_removed }
    }

    /// Remove search history and workflow records of `kind`, or all of them.
    pub async fn clear_history(&self, kind: Option<ContentKind>) -> RemovalOutcome {
        let l2_removed = match &self.l2 {
            Some(l2) => self.l2_call("clear_history", l2.clear_history(kind)).await.ok(),
            None => Some(0),
        };

        self.history_cleared_at.store(self.tick(), Ordering::SeqCst);
        let l1_removed = self.l1.remove_matching(|e| {
            e.durability == Durability::Permanent && kind.is_none_or(|k| e.metadata.content_kind == k)
        }) as u64;

        self.ledger.record(InvalidationEvent {
            at: Utc::now(),
            scope: InvalidationScope::History,
            target: kind.map_or("all", |k| k.as_str()).to_string(),
            domain: None,
            reason: "clear_history".to_string(),
            l1_removed,
            l2_removed,
        });
        RemovalOutcome { l1_removed, l2_removed }
    }

    pub fn stats(&self) -> CacheStats {
        let metrics = self.metrics.snapshot();
        CacheStats {
            metrics,
            hit_rate: metrics.hit_rate(),
            l1_entries: self.l1.len() as u64,
            l1_bytes: self.l1.used_bytes() as u64,
            l1_capacity_bytes: self.l1.capacity_bytes() as u64,
            invalidations: self.ledger.total(),
            l2: self.l2_status(),
        }
    }

    pub fn l2_status(&self) -> L2Status {
        if self.l2.is_none() {
            return L2Status::Disabled;
        }
        if self.l2_degraded.load(Ordering::Acquire) {
            let reason = self.l2_last_error.lock().clone().unwrap_or_else(|| "unknown".to_string());
            return L2Status::Degraded { reason };
        }
        L2Status::Available
    }

    pub async fn report(&self) -> CacheReport {
        let bounds = self.l1.age_bounds();
        let l1 = TierReport {
            entries: self.l1.len() as u64,
            bytes: self.l1.used_bytes() as u64,
            oldest: bounds.map(|(lo, _)| lo),
            newest: bounds.map(|(_, hi)| hi),
        };

        let durable = match &self.l2 {
            Some(l2) => self.l2_call("stats", l2.stats()).await.ok(),
            None => None,
        };

        CacheReport {
            l1,
            l2: durable.as_ref().map(|d| TierReport {
                entries: d.pages.count,
                bytes: d.pages.bytes,
                oldest: d.pages.oldest,
                newest: d.pages.newest,
            }),
            history_records: durable.as_ref().map(|d| d.history_count),
            selector_records: durable.as_ref().map(|d| d.selector_count),
            l2_status: self.l2_status(),
            metrics: self.metrics.snapshot(),
            invalidations: self.ledger.summary(REPORT_RECENT_INVALIDATIONS),
        }
    }

    /// Entries held for `domain` in each tier, newest first, limited to those
    /// created at or after `since`.
    pub async fn domain_report(&self, domain: &str, since: Option<DateTime<Utc>>, limit: usize) -> DomainReport {
        let domain = normalize_domain(domain);
        let now = Utc::now();
        let l1: Vec<EntrySummary> = self
            .l1
            .snapshot(now, limit, |e| e.domain == domain && since.is_none_or(|t| e.created_at >= t))
            .iter()
            .map(|e| EntrySummary::from(e.as_ref()))
            .collect();

        let (l2, history): (Option<Vec<EntrySummary>>, Option<Vec<HistoryRecord>>) = match &self.l2 {
            Some(l2) => {
                let pages = self
                    .l2_call("pages_by_domain", l2.pages_by_domain(&domain, since, now, limit))
                    .await
                    .ok()
                    .map(|pages| pages.iter().map(EntrySummary::from).collect());
                let history = self
                    .l2_call("list_history", l2.list_history(Some(domain.as_str()), limit))
                    .await
                    .ok()
                    .map(|records| {
                        records
                            .into_iter()
                            .filter(|r| since.is_none_or(|t| r.created_at >= t))
                            .collect()
                    });
                (pages, history)
            }
            None => (None, None),
        };

        DomainReport { domain, l1, l2, history }
    }

    /// Drop expired L1 entries.
    pub fn purge_expired_l1(&self) -> usize {
        let n = self.l1.purge_expired(Utc::now());
        self.metrics.record_expirations(n as u64);
        n
    }

    /// Delete expired L2 rows in batches of `batch`, yielding between batches.
    pub async fn purge_expired_l2(&self, batch: usize) -> Result<u64, Error> {
        let Some(l2) = &self.l2 else {
            return Ok(0);
        };
        let batch = batch.max(1);
        let now = Utc::now();
        let mut total = 0;
        loop {
            let n = self.l2_call("purge_expired", l2.purge_expired(now, batch)).await?;
            total += n;
            if n < batch as u64 {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.metrics.record_expirations(total);
        Ok(total)
    }

    /// Retry L2 deletes that failed during invalidation.
    ///
    /// Returns the number of markers cleared.
    pub async fn reconcile_invalidations(&self) -> Result<usize, Error> {
        let Some(l2) = &self.l2 else {
            return Ok(0);
        };

        let keys: Vec<(CacheKey, DateTime<Utc>)> = self
            .key_states
            .iter()
            .filter_map(|s| s.l2_stale_before.map(|c| (s.key().clone(), c)))
            .collect();
        let domains: Vec<(String, DateTime<Utc>)> = self
            .domain_states
            .iter()
            .filter_map(|s| s.l2_stale_before.map(|c| (s.key().clone(), c)))
            .collect();
        let patterns: Vec<(String, DateTime<Utc>)> = self
            .pattern_states
            .iter()
            .filter_map(|s| s.l2_stale_before.map(|c| (s.key().clone(), c)))
            .collect();

        let mut cleared = 0;
        for (key, cutoff) in keys {
            self.l2_call("delete", l2.delete_before(&key, cutoff)).await?;
            let current = self.key_states.get_mut(&key).filter(|s| s.l2_stale_before == Some(cutoff));
            if let Some(mut state) = current {
                state.l2_stale_before = None;
                cleared += 1;
            }
        }
        for (domain, cutoff) in domains {
            self.l2_call("delete_domain", l2.delete_domain_before(&domain, cutoff)).await?;
            let current = self.domain_states.get_mut(&domain).filter(|s| s.l2_stale_before == Some(cutoff));
            if let Some(mut state) = current {
                state.l2_stale_before = None;
                cleared += 1;
            }
        }
        for (pattern, cutoff) in patterns {
            self.l2_call("delete_matching", l2.delete_matching_before(&pattern, cutoff)).await?;
            let current = self.pattern_states.get_mut(&pattern).filter(|s| s.l2_stale_before == Some(cutoff));
            if let Some(mut state) = current {
                state.l2_stale_before = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Forget key and domain stamps that no in-flight promotion can still race.
    ///
    /// Promotions are bounded by the L2 timeout, so stamps older than twice
    /// that (and at least a minute) are dead. Stamps carrying a stale marker
    /// are kept until reconciled.
    pub fn prune_key_states(&self) -> usize {
        let window = (self.l2_timeout * 2).max(Duration::from_secs(60));
        self.prune_key_states_older_than(window)
    }

    fn prune_key_states_older_than(&self, window: Duration) -> usize {
        let before = self.state_count();
        self.key_states
            .retain(|_, s| s.l2_stale_before.is_some() || s.touched.elapsed() < window);
        self.domain_states
            .retain(|_, s| s.l2_stale_before.is_some() || s.touched.elapsed() < window);
        self.pattern_states
            .retain(|_, s| s.l2_stale_before.is_some() || s.touched.elapsed() < window);
        before.saturating_sub(self.state_count())
    }

    fn state_count(&self) -> usize {
        self.key_states.len() + self.domain_states.len() + self.pattern_states.len()
    }

    /// Append the current counters to `cache_metrics`.
    pub async fn persist_metrics_snapshot(&self) -> Result<(), Error> {
        let Some(l2) = &self.l2 else {
            return Ok(());
        };
        let record = MetricsRecord {
            recorded_at: Utc::now(),
            metrics: self.metrics.snapshot(),
            l1_entries: self.l1.len() as u64,
            l1_bytes: self.l1.used_bytes() as u64,
        };
        self.l2_call("append_metrics", l2.append_metrics(&record)).await
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn stamp_key(&self, key: &CacheKey, stale_before: Option<DateTime<Utc>>) -> u64 {
        let mut state = self.key_states.entry(key.clone()).or_insert_with(KeyState::new);
        Self::stamp(&mut state, self.tick(), stale_before)
    }

    fn stamp_domain(&self, domain: &str, stale_before: Option<DateTime<Utc>>) -> u64 {
        let mut state = self.domain_states.entry(domain.to_string()).or_insert_with(KeyState::new);
        Self::stamp(&mut state, self.tick(), stale_before)
    }

    fn stamp_pattern(&self, pattern: &str, stale_before: Option<DateTime<Utc>>) -> u64 {
        let mut state = self.pattern_states.entry(pattern.to_string()).or_insert_with(KeyState::new);
        Self::stamp(&mut state, self.tick(), stale_before)
    }

    fn stamp(state: &mut KeyState, seq: u64, stale_before: Option<DateTime<Utc>>) -> u64 {
        state.seq = seq;
        state.touched = Instant::now();
        if let Some(cutoff) = stale_before {
            state.l2_stale_before = Some(state.l2_stale_before.map_or(cutoff, |old| old.max(cutoff)));
        }
        seq
    }

    /// Called with the L1 lock held.
    fn admits_promotion(&self, entry: &CacheEntry, started: u64) -> bool {
        if entry.durability == Durability::Permanent && self.history_cleared_at.load(Ordering::SeqCst) >= started {
            return false;
        }
        let key_ok = self
            .key_states
            .get(&entry.key)
            .is_none_or(|s| s.admits(started, entry.created_at));
        let domain_ok = self
            .domain_states
            .get(&entry.domain)
            .is_none_or(|s| s.admits(started, entry.created_at));
        let pattern_ok = self
            .pattern_states
            .iter()
            .all(|s| !url_matches(&entry.metadata.url, s.key()) || s.admits(started, entry.created_at));
        key_ok && domain_ok && pattern_ok
    }

    /// Called with the L1 lock held.
    fn is_latest_write(&self, entry: &CacheEntry, seq: u64) -> bool {
        let key_ok = self.key_states.get(&entry.key).is_some_and(|s| s.seq == seq);
        let domain_ok = self.domain_states.get(&entry.domain).is_none_or(|s| s.seq < seq);
        let pattern_ok = self
            .pattern_states
            .iter()
            .all(|s| !url_matches(&entry.metadata.url, s.key()) || s.seq < seq);
        key_ok && domain_ok && pattern_ok
    }

    fn discard_promotion(&self, key: &CacheKey) -> Lookup {
        let err = Error::StaleInvalidationRace(key.to_string());
        self.metrics.record_stale_promotion();
        self.metrics.record_miss();
        tracing::debug!(error = %err, "discarded promotion");
        Lookup::Miss
    }

    async fn l2_call<T>(&self, op: &'static str, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
        let result = match tokio::time::timeout(self.l2_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::TierUnavailable(format!(
                "L2 {op} timed out after {}ms",
                self.l2_timeout.as_millis()
            ))),
        };

        match &result {
            Ok(_) => self.mark_l2_healthy(),
            Err(err) if err.is_tier_fault() => self.mark_l2_degraded(op, err),
            Err(err) => {
                self.metrics.record_l2_error();
                tracing::warn!(op, error = %err, "L2 returned an unusable result");
            }
        }
        result
    }

    fn mark_l2_degraded(&self, op: &'static str, err: &Error) {
        self.metrics.record_l2_error();
        *self.l2_last_error.lock() = Some(err.to_string());
        if !self.l2_degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(op, error = %err, "L2 unavailable, serving from L1 only");
        } else {
            tracing::debug!(op, error = %err, "L2 still unavailable");
        }
    }

    fn mark_l2_healthy(&self) {
        if self.l2_degraded.swap(false, Ordering::AcqRel) {
            tracing::info!("L2 available again");
        }
    }
}

/// `pattern` is already lower-cased.
fn url_matches(url: &str, pattern: &str) -> bool {
    url.to_ascii_lowercase().contains(pattern)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::cache::connection::CacheDb;
    use crate::cache::durable::testing::FlakyTier;
    use crate::cache::key::{KeyNormalizer, OperationKind};
    use crate::config::TtlConfig;

    fn key(url: &str, op: OperationKind) -> CacheKey {
        KeyNormalizer::default().normalize(url, None, op).unwrap()
    }

    fn page_key(url: &str) -> CacheKey {
        key(url, OperationKind::Navigate)
    }

    fn page_meta(url: &str) -> EntryMetadata {
        EntryMetadata::new(url, ContentKind::Page)
    }

    async fn cache_with_db(config: AppConfig) -> (TieredCache, Arc<CacheDb>) {
        let db = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let l2: Arc<dyn DurableTier> = db.clone();
        (TieredCache::new(&config, Some(l2)), db)
    }

    #[tokio::test]
    async fn test_store_then_lookup_hits_l1() {
        let (cache, _) = cache_with_db(AppConfig::default()).await;
        let k = page_key("https://example.com/a");

        let outcome = cache.store(&k, Bytes::from_static(b"hello"), page_meta("https://example.com/a")).await;
        assert!(outcome.in_l1);
        assert!(outcome.in_l2);
        assert_eq!(outcome.durability, Durability::Long);

        let hit = cache.lookup(&k).await;
        assert_eq!(hit.served_from(), Some(Tier::L1));
        assert_eq!(hit.entry().unwrap().payload, Bytes::from_static(b"hello"));
        assert_eq!(cache.stats().metrics.l1_hits, 1);
    }

    #[tokio::test]
    async fn test_miss_on_unknown_key() {
        let (cache, _) = cache_with_db(AppConfig::default()).await;
        assert!(!cache.lookup(&page_key("https://example.com/none")).await.is_hit());
        assert_eq!(cache.stats().metrics.misses, 1);
    }

    #[tokio::test]
    async fn test_evicted_long_entry_promoted_from_l2() {
        let a = page_key("https://example.com/a");
        let b = page_key("https://example.com/b");
        let payload = Bytes::from(vec![b'x'; 200]);
        let entry_size = payload.len() + a.len();
        let config = AppConfig { l1_capacity_bytes: entry_size + entry_size / 2, ..Default::default() };
        let (cache, _) = cache_with_db(config).await;

        cache.store(&a, payload.clone(), page_meta("https://example.com/a")).await;
        cache.store(&b, payload.clone(), page_meta("https://example.com/b")).await;

        let first = cache.lookup(&a).await;
        assert_eq!(first.served_from(), Some(Tier::L2));
        assert_eq!(first.entry().unwrap().payload, payload);

        let second = cache.lookup(&a).await;
        assert_eq!(second.served_from(), Some(Tier::L1));

        let stats = cache.stats();
        assert_eq!(stats.metrics.promotions, 1);
        assert!(stats.metrics.evictions >= 2);
    }

    #[tokio::test]
    async fn test_short_ttl_expires() {
        let config = AppConfig { ttl: TtlConfig { text_secs: 1, ..Default::default() }, ..Default::default() };
        let (cache, _) = cache_with_db(config).await;
        let k = key("https://example.com/a", OperationKind::Extract);
        let meta = EntryMetadata::new("https://example.com/a", ContentKind::TextSelector);

        let outcome = cache.store(&k, Bytes::from_static(b"v"), meta).await;
        assert_eq!(outcome.durability, Durability::Short);
        assert!(!outcome.in_l2);
        assert!(cache.lookup(&k).await.is_hit());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!cache.lookup(&k).await.is_hit());
    }

    #[tokio::test]
    async fn test_dynamic_content_not_cached() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        let k = page_key("https://shop.example.com/live/price");
        let big = Bytes::from(vec![0u8; 64 * 1024]);
        let meta = EntryMetadata::new("https://shop.example.com/live/price", ContentKind::Dynamic);

        let outcome = cache.store(&k, big, meta).await;
        assert!(!outcome.is_cached());
        assert!(!cache.lookup(&k).await.is_hit());
        assert_eq!(db.page_stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_oversized_long_entry_is_l2_only() {
        let config = AppConfig { l1_capacity_bytes: 64, ..Default::default() };
        let (cache, _) = cache_with_db(config).await;
        let k = page_key("https://example.com/big");

        let outcome = cache
            .store(&k, Bytes::from(vec![1u8; 1024]), page_meta("https://example.com/big"))
            .await;
        assert!(!outcome.in_l1);
        assert!(outcome.in_l2);

        let hit = cache.lookup(&k).await;
        assert_eq!(hit.served_from(), Some(Tier::L2));
        assert_eq!(cache.stats().l1_entries, 0);
    }

    #[tokio::test]
    async fn test_oversized_short_entry_not_cached() {
        let config = AppConfig { l1_capacity_bytes: 64, ..Default::default() };
        let (cache, db) = cache_with_db(config).await;
        let k = key("https://example.com/a", OperationKind::Extract);
        let meta = EntryMetadata::new("https://example.com/a", ContentKind::TextSelector);

        let outcome = cache.store(&k, Bytes::from(vec![1u8; 1024]), meta).await;
        assert_eq!(outcome.durability, Durability::Short);
        assert!(!outcome.is_cached());
        assert!(!cache.lookup(&k).await.is_hit());
        assert_eq!(cache.stats().metrics.stores, 0);
        assert!(DurableTier::get(db.as_ref(), &k, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_large_payload_boundary_ignores_key_length() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        let limit = AppConfig::default().ttl.large_payload_bytes;
        let meta = || EntryMetadata::new("https://example.com/a", ContentKind::TextSelector);

        let below = key("https://example.com/below", OperationKind::Extract);
        let outcome = cache.store(&below, Bytes::from(vec![b'x'; limit - 1]), meta()).await;
        assert_eq!(outcome.durability, Durability::Short);
        assert_eq!(outcome.ttl_secs, Some(1_800));
        assert!(outcome.in_l1);
        assert!(!outcome.in_l2);
        assert!(DurableTier::get(db.as_ref(), &below, Utc::now()).await.unwrap().is_none());

        let at = key("https://example.com/at", OperationKind::Extract);
        let outcome = cache.store(&at, Bytes::from(vec![b'x'; limit]), meta()).await;
        assert_eq!(outcome.durability, Durability::Long);
        assert_eq!(outcome.ttl_secs, Some(3_600));
        assert!(outcome.in_l2);
    }

    #[tokio::test]
    async fn test_invalidate_removes_from_both_tiers() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        let k = page_key("https://example.com/a");
        cache.store(&k, Bytes::from_static(b"v"), page_meta("https://example.com/a")).await;

        let removed = cache.invalidate(&k).await;
        assert_eq!(removed, RemovalOutcome { l1_removed: 1, l2_removed: Some(1) });
        assert!(!cache.lookup(&k).await.is_hit());
        assert!(db.get_page(&k, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_during_inflight_promotion() {
        let tier = Arc::new(FlakyTier::stalling(Duration::from_millis(150)).await);
        let config = AppConfig { l2_timeout_ms: 5_000, ..Default::default() };
        let cache = Arc::new(TieredCache::new(&config, Some(tier.clone())));
        let k = page_key("https://example.com/a");

        cache.store(&k, Bytes::from_static(b"old"), page_meta("https://example.com/a")).await;
        cache.l1.remove(&k);

        let promoting = {
            let cache = cache.clone();
            let k = k.clone();
            tokio::spawn(async move { cache.lookup(&k).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.invalidate(&k).await;
        promoting.await.unwrap();

        assert!(!cache.lookup(&k).await.is_hit());
        assert!(cache.l1.get(&k, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_promotion_started_before_invalidation_is_refused() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        let k = page_key("https://example.com/a");
        cache.store(&k, Bytes::from_static(b"old"), page_meta("https://example.com/a")).await;
        let row = DurableTier::get(db.as_ref(), &k, Utc::now()).await.unwrap().unwrap();

        let started = cache.tick();
        cache.invalidate(&k).await;

        let entry = Arc::new(row);
        let admitted = cache.l1.insert_if(entry.clone(), || cache.admits_promotion(&entry, started)).unwrap();
        assert_eq!(admitted, None);
        assert!(cache.l1.get(&k, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_failed_l2_delete_blocks_promotion_until_reconciled() {
        let tier = Arc::new(FlakyTier::new().await);
        let cache = TieredCache::new(&AppConfig::default(), Some(tier.clone()));
        let k = page_key("https://example.com/a");
        cache.store(&k, Bytes::from_static(b"old"), page_meta("https://example.com/a")).await;

        tier.set_failing(true);
        let removed = cache.invalidate(&k).await;
        assert_eq!(removed.l2_removed, None);

        tier.set_failing(false);
        assert!(!cache.lookup(&k).await.is_hit());
        assert_eq!(cache.stats().metrics.stale_promotions, 1);

        assert_eq!(cache.reconcile_invalidations().await.unwrap(), 1);
        assert!(DurableTier::get(tier.as_ref(), &k, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_degraded_l2_keeps_serving() {
        let tier = Arc::new(FlakyTier::new().await);
        tier.set_failing(true);
        let cache = TieredCache::new(&AppConfig::default(), Some(tier.clone()));
        let k = page_key("https://example.com/a");

        let outcome = cache.store(&k, Bytes::from_static(b"v"), page_meta("https://example.com/a")).await;
        assert!(outcome.in_l1);
        assert!(!outcome.in_l2);
        assert!(cache.lookup(&k).await.is_hit());
        assert!(!cache.lookup(&page_key("https://example.com/other")).await.is_hit());

        match cache.stats().l2 {
            L2Status::Degraded { reason } => assert!(reason.contains("disk unreachable")),
            other => panic!("expected degraded L2, got {other:?}"),
        }

        tier.set_failing(false);
        cache.store(&k, Bytes::from_static(b"v2"), page_meta("https://example.com/a")).await;
        assert_eq!(cache.stats().l2, L2Status::Available);
    }

    #[tokio::test]
    async fn test_l2_timeout_degrades() {
        let tier = Arc::new(FlakyTier::stalling(Duration::from_millis(500)).await);
        let config = AppConfig { l2_timeout_ms: 20, ..Default::default() };
        let cache = TieredCache::new(&config, Some(tier));
        let k = page_key("https://example.com/a");

        let outcome = cache.store(&k, Bytes::from_static(b"v"), page_meta("https://example.com/a")).await;
        assert!(outcome.in_l1);
        assert!(!outcome.in_l2);
        assert!(matches!(cache.stats().l2, L2Status::Degraded { .. }));
    }

    #[tokio::test]
    async fn test_l1_only_when_disabled() {
        let cache = TieredCache::new(&AppConfig::default(), None);
        let k = page_key("https://example.com/a");
        let outcome = cache.store(&k, Bytes::from_static(b"v"), page_meta("https://example.com/a")).await;
        assert!(outcome.in_l1);
        assert!(!outcome.in_l2);
        assert_eq!(cache.stats().l2, L2Status::Disabled);
        assert!(cache.lookup(&k).await.is_hit());
    }

    #[test]
    fn test_l2_status_wire_shape() {
        let degraded = L2Status::Degraded { reason: "timed out".into() };
        assert_eq!(
            serde_json::to_value(&degraded).unwrap(),
            serde_json::json!({ "status": "degraded", "reason": "timed out" })
        );
        assert_eq!(serde_json::to_value(L2Status::Disabled).unwrap(), serde_json::json!({ "status": "disabled" }));
    }

    #[tokio::test]
    async fn test_concurrent_stores_keep_one_intact_value() {
        let (cache, _) = cache_with_db(AppConfig::default()).await;
        let cache = Arc::new(cache);
        let k = page_key("https://example.com/a");

        let payloads: Vec<Bytes> = (0..16).map(|i| Bytes::from(format!("value-{i}-").repeat(50))).collect();
        let mut handles = Vec::new();
        for payload in payloads.clone() {
            let cache = cache.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache.store(&k, payload, page_meta("https://example.com/a")).await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let valid: HashSet<Bytes> = payloads.into_iter().collect();
        let from_l1 = cache.lookup(&k).await;
        assert!(valid.contains(&from_l1.entry().unwrap().payload));

        cache.l1.remove(&k);
        let from_l2 = cache.lookup(&k).await;
        assert!(valid.contains(&from_l2.entry().unwrap().payload));
    }

    #[tokio::test]
    async fn test_get_or_fetch() {
        let (cache, _) = cache_with_db(AppConfig::default()).await;
        let k = page_key("https://example.com/a");
        let calls = AtomicU64::new(0);

        for _ in 0..2 {
            let fetched = cache
                .get_or_fetch(&k, page_meta("https://example.com/a"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(Bytes::from_static(b"fresh"))
                })
                .await
                .unwrap();
            assert_eq!(fetched.payload, Bytes::from_static(b"fresh"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other = page_key("https://example.com/b");
        let err = cache
            .get_or_fetch(&other, page_meta("https://example.com/b"), || async {
                Err::<Bytes, _>(std::io::Error::other("browser crashed"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "browser crashed");
        assert!(!cache.lookup(&other).await.is_hit());
    }

    #[tokio::test]
    async fn test_invalidate_domain() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        for url in ["https://example.com/a", "https://example.com/b", "https://other.org/c"] {
            cache.store(&page_key(url), Bytes::from_static(b"v"), page_meta(url)).await;
        }

        let removed = cache.invalidate_domain("Example.com").await;
        assert_eq!(removed, RemovalOutcome { l1_removed: 2, l2_removed: Some(2) });
        assert!(!cache.lookup(&page_key("https://example.com/a")).await.is_hit());
        assert!(cache.lookup(&page_key("https://other.org/c")).await.is_hit());
        assert_eq!(db.page_stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_history_is_permanent_until_cleared() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        let k = key("https://example.com/search?q=rust", OperationKind::SearchHistory);
        let meta = EntryMetadata::new("https://example.com/search?q=rust", ContentKind::SearchHistory);

        let outcome = cache.store(&k, Bytes::from_static(b"[1,2,3]"), meta).await;
        assert_eq!(outcome.durability, Durability::Permanent);
        assert_eq!(outcome.ttl_secs, None);
        assert_eq!(db.history_count().await.unwrap(), 1);

        let removed = cache.clear_history(Some(ContentKind::SearchHistory)).await;
        assert_eq!(removed, RemovalOutcome { l1_removed: 1, l2_removed: Some(1) });
        assert!(!cache.lookup(&k).await.is_hit());
    }

    #[tokio::test]
    async fn test_clear_expired_and_report() {
        let config = AppConfig {
            ttl: TtlConfig { page_secs: 1, long_threshold_secs: 1, ..Default::default() },
            ..Default::default()
        };
        let (cache, _) = cache_with_db(config).await;
        let k = page_key("https://example.com/a");
        cache.store(&k, Bytes::from_static(b"v"), page_meta("https://example.com/a")).await;

        let report = cache.report().await;
        assert_eq!(report.l1.entries, 1);
        assert_eq!(report.l2.as_ref().map(|t| t.entries), Some(1));
        assert_eq!(report.l2_status, L2Status::Available);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let cleared = cache.clear_expired().await;
        assert_eq!(cleared, ExpiryOutcome { l1_removed: 1, l2_removed: Some(1) });

        let report = cache.report().await;
        assert_eq!(report.l1.entries, 0);
        assert_eq!(report.l2.map(|t| t.entries), Some(0));
    }

    #[tokio::test]
    async fn test_prune_and_persist_metrics() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        let k = page_key("https://example.com/a");
        cache.store(&k, Bytes::from_static(b"v"), page_meta("https://example.com/a")).await;
        cache.invalidate_domain("example.com").await;

        assert_eq!(cache.prune_key_states(), 0);
        assert_eq!(cache.prune_key_states_older_than(Duration::ZERO), 2);

        cache.persist_metrics_snapshot().await.unwrap();
        assert_eq!(db.metrics_snapshot_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_spans_tiers() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        for url in ["https://example.com/archive/1", "https://Other.org/ARCHIVE/2", "https://example.com/docs"] {
            cache.store(&page_key(url), Bytes::from_static(b"v"), page_meta(url)).await;
        }

        let removed = cache.invalidate_pattern("/Archive/", "source_updated").await.unwrap();
        assert_eq!(removed, RemovalOutcome { l1_removed: 2, l2_removed: Some(2) });
        assert!(!cache.lookup(&page_key("https://example.com/archive/1")).await.is_hit());
        assert!(cache.lookup(&page_key("https://example.com/docs")).await.is_hit());
        assert_eq!(db.page_stats().await.unwrap().count, 1);

        assert!(matches!(cache.invalidate_pattern("   ", "x").await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_promotion_started_before_pattern_invalidation_is_refused() {
        let (cache, db) = cache_with_db(AppConfig::default()).await;
        let k = page_key("https://example.com/archive/1");
        cache.store(&k, Bytes::from_static(b"old"), page_meta("https://example.com/archive/1")).await;
        let row = DurableTier::get(db.as_ref(), &k, Utc::now()).await.unwrap().unwrap();

        let started = cache.tick();
        cache.invalidate_pattern("/archive/", "explicit").await.unwrap();

        let entry = Arc::new(row);
        let admitted = cache.l1.insert_if(entry.clone(), || cache.admits_promotion(&entry, started)).unwrap();
        assert_eq!(admitted, None);

        // Unrelated URLs are unaffected by the pattern stamp.
        let other = page_key("https://example.com/docs");
        cache.store(&other, Bytes::from_static(b"v"), page_meta("https://example.com/docs")).await;
        assert_eq!(cache.lookup(&other).await.served_from(), Some(Tier::L1));
    }

    #[tokio::test]
    async fn test_deferred_pattern_delete_is_reconciled() {
        let tier = Arc::new(FlakyTier::new().await);
        let cache = TieredCache::new(&AppConfig::default(), Some(tier.clone()));
        let k = page_key("https://example.com/archive/1");
        cache.store(&k, Bytes::from_static(b"old"), page_meta("https://example.com/archive/1")).await;

        tier.set_failing(true);
        let removed = cache.invalidate_pattern("/archive/", "explicit").await.unwrap();
        assert_eq!(removed.l2_removed, None);

        tier.set_failing(false);
        assert!(!cache.lookup(&k).await.is_hit());
        assert_eq!(cache.reconcile_invalidations().await.unwrap(), 1);
        assert!(DurableTier::get(tier.as_ref(), &k, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidations_are_ledgered() {
        let (cache, _) = cache_with_db(AppConfig::default()).await;
        let k = page_key("https://example.com/a");
        cache.store(&k, Bytes::from_static(b"v"), page_meta("https://example.com/a")).await;

        cache.invalidate_because(&k, "content_changed").await;
        cache.invalidate_domain("other.org").await;
        cache.invalidate_pattern("/rss/", "explicit").await.unwrap();
        cache.clear_history(None).await;

        assert_eq!(cache.stats().invalidations, 4);
        let summary = cache.report().await.invalidations;
        assert_eq!(summary.total, 4);
        let scopes: Vec<InvalidationScope> = summary.recent.iter().map(|e| e.scope).collect();
        assert_eq!(
            scopes,
            vec![
                InvalidationScope::History,
                InvalidationScope::Pattern,
                InvalidationScope::Domain,
                InvalidationScope::Key
            ]
        );
        let key_event = &summary.recent[3];
        assert_eq!(key_event.reason, "content_changed");
        assert_eq!(key_event.domain.as_deref(), Some("example.com"));
        assert_eq!(key_event.l1_removed, 1);
        assert_eq!(summary.top_reasons[0].name, "explicit");
    }

    #[tokio::test]
    async fn test_domain_report_lists_each_tier() {
        let config = AppConfig { l1_capacity_bytes: 64 * 1024, ..Default::default() };
        let (cache, _) = cache_with_db(config).await;
        let docs = page_key("https://example.com/docs");
        let meta = page_meta("https://example.com/docs").with_title("Docs");
        cache.store(&docs, Bytes::from_static(b"docs"), meta).await;
        let text = key("https://example.com/a", OperationKind::Extract);
        let meta = EntryMetadata::new("https://example.com/a", ContentKind::TextSelector);
        cache.store(&text, Bytes::from_static(b"short"), meta).await;
        let search = key("https://example.com/search?q=rust", OperationKind::SearchHistory);
        let meta = EntryMetadata::new("https://example.com/search?q=rust", ContentKind::SearchHistory);
        cache.store(&search, Bytes::from_static(b"[]"), meta).await;
        cache.store(&page_key("https://other.org/x"), Bytes::from_static(b"v"), page_meta("https://other.org/x")).await;

        let report = cache.domain_report("EXAMPLE.com", None, 10).await;
        assert_eq!(report.domain, "example.com");
        assert_eq!(report.l1.len(), 3);
        let l2 = report.l2.unwrap();
        assert_eq!(l2.len(), 1);
        assert_eq!(l2[0].title.as_deref(), Some("Docs"));
        assert_eq!(report.history.unwrap().len(), 1);

        let future = Utc::now() + chrono::Duration::hours(1);
        let report = cache.domain_report("example.com", Some(future), 10).await;
        assert!(report.l1.is_empty());
        assert_eq!(report.l2.map(|v| v.len()), Some(0));
        assert_eq!(report.history.map(|v| v.len()), Some(0));

        assert_eq!(cache.domain_report("example.com", None, 1).await.l1.len(), 1);
    }

    #[tokio::test]
    async fn test_domain_report_without_l2() {
        let cache = TieredCache::new(&AppConfig { l2_enabled: false, ..Default::default() }, None);
        let k = page_key("https://example.com/a");
        cache.store(&k, Bytes::from_static(b"v"), page_meta("https://example.com/a")).await;

        let report = cache.domain_report("example.com", None, 10).await;
        assert_eq!(report.l1.len(), 1);
        assert!(report.l2.is_none());
        assert!(report.history.is_none());
    }
}
