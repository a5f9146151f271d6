//! Selector performance tools.

pub mod best;
pub mod record;

use chrono::{DateTime, Utc};
use serde::Serialize;
use webmemo_core::SelectorRecord;
use webmemo_core::cache::SelectorStrategy;

pub use best::{SelectorBestParams, best_impl};
pub use record::{SelectorRecordParams, record_impl};

/// A tracker record plus its derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct SelectorView {
    pub selector: String,
    pub strategy: SelectorStrategy,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub score: f64,
    pub avg_latency_ms: f64,
    pub last_used_at: DateTime<Utc>,
}

impl From<&SelectorRecord> for SelectorView {
    fn from(record: &SelectorRecord) -> Self {
        Self {
            selector: record.selector.clone(),
            strategy: record.strategy,
            success_count: record.success_count,
            failure_count: record.failure_count,
            success_rate: record.success_rate(),
            score: record.score(),
            avg_latency_ms: record.avg_latency_ms,
            last_used_at: record.last_used_at,
        }
    }
}
