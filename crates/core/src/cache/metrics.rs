//! Process-wide cache counters and their periodic snapshots in `cache_metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

use super::connection::CacheDb;
use crate::Error;

/// Lock-free counters owned by the coordinator.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    bytes_stored: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    promotions: AtomicU64,
    stale_promotions: AtomicU64,
    l2_errors: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MetricsSnapshot {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub bytes_stored: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub stale_promotions: u64,
    pub l2_errors: u64,
}

impl MetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

impl CacheMetrics {
    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self, bytes: usize) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        self.bytes_stored.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, n: usize) {
        if n > 0 {
            self.evictions.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn record_expirations(&self, n: u64) {
        if n > 0 {
            self.expirations.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_promotion(&self) {
        self.stale_promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_error(&self) {
        self.l2_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            stale_promotions: self.stale_promotions.load(Ordering::Relaxed),
            l2_errors: self.l2_errors.load(Ordering::Relaxed),
        }
    }
}

/// A row of `cache_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRecord {
    pub recorded_at: DateTime<Utc>,
    pub metrics: MetricsSnapshot,
    pub l1_entries: u64,
    pub l1_bytes: u64,
}

impl CacheDb {
    pub async fn append_metrics(&self, record: &MetricsRecord) -> Result<(), Error> {
        let r = record.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let m = r.metrics;
                conn.execute(
                    "INSERT INTO cache_metrics (
                        recorded_at_ms, l1_hits, l2_hits, misses, stores, bytes_stored,
                        evictions, expirations, promotions, stale_promotions, l2_errors,
                        l1_entries, l1_bytes
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        r.recorded_at.timestamp_millis(),
                        m.l1_hits as i64,
                        m.l2_hits as i64,
                        m.misses as i64,
                        m.stores as i64,
                        m.bytes_stored as i64,
                        m.evictions as i64,
                        m.expirations as i64,
                        m.promotions as i64,
                        m.stale_promotions as i64,
                        m.l2_errors as i64,
                        r.l1_entries as i64,
                        r.l1_bytes as i64,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    pub async fn metrics_snapshot_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM cache_metrics", [], |row| row.get(0))?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }
}
