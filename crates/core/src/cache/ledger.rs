//! Bounded record of recent invalidations.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Events kept before the oldest is dropped.
pub const LEDGER_CAPACITY: usize = 100;

/// How many reasons and domains a summary ranks.
const TOP_N: usize = 5;

/// What an invalidation targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    Key,
    Domain,
    Pattern,
    History,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationEvent {
    pub at: DateTime<Utc>,
    pub scope: InvalidationScope,
    /// Key, domain, URL pattern or history kind.
    pub target: String,
    pub domain: Option<String>,
    pub reason: String,
    pub l1_removed: u64,
    /// `None` when the L2 delete was deferred.
    pub l2_removed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub name: String,
    pub count: u64,
}

/// Counts over the retained events plus the lifetime total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationSummary {
    pub total: u64,
    /// Newest first.
    pub recent: Vec<InvalidationEvent>,
    pub top_reasons: Vec<Tally>,
    pub top_domains: Vec<Tally>,
}

/// Ring of the last [`LEDGER_CAPACITY`] invalidation events.
#[derive(Debug)]
pub struct InvalidationLedger {
    capacity: usize,
    total: AtomicU64,
    events: Mutex<VecDeque<InvalidationEvent>>,
}

impl Default for InvalidationLedger {
    fn default() -> Self {
        Self::with_capacity(LEDGER_CAPACITY)
    }
}

impl InvalidationLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), total: AtomicU64::new(0), events: Mutex::new(VecDeque::new()) }
    }

    pub fn record(&self, event: InvalidationEvent) {
        tracing::info!(
            scope = ?event.scope,
            target = %event.target,
            reason = %event.reason,
            l1_removed = event.l1_removed,
            l2_removed = ?event.l2_removed,
            "cache invalidated"
        );
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Events recorded since startup, including dropped ones.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summarize retained events, listing at most `recent` of them.
    pub fn summary(&self, recent: usize) -> InvalidationSummary {
        let events = self.events.lock();
        let mut reasons: HashMap<&str, u64> = HashMap::new();
        let mut domains: HashMap<&str, u64> = HashMap::new();
        for event in events.iter() {
            *reasons.entry(event.reason.as_str()).or_default() += 1;
            if let Some(domain) = &event.domain {
                *domains.entry(domain.as_str()).or_default() += 1;
            }
        }

        InvalidationSummary {
            total: self.total(),
            recent: events.iter().rev().take(recent).cloned().collect(),
            top_reasons: top(reasons),
            top_domains: top(domains),
        }
    }
}

fn top(counts: HashMap<&str, u64>) -> Vec<Tally> {
    let mut tallies: Vec<Tally> = counts
        .into_iter()
        .map(|(name, count)| Tally { name: name.to_string(), count })
        .collect();
    tallies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    tallies.truncate(TOP_N);
    tallies
}
