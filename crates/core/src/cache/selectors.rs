//! Persistence for selector performance records.

use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, rusqlite};

use super::connection::CacheDb;
use super::entry::from_millis;
use super::selector::SelectorStrategy;
use crate::Error;
use crate::tracker::SelectorRecord;

struct SelectorRow {
    domain: String,
    strategy: String,
    selector: String,
    success_count: i64,
    failure_count: i64,
    avg_latency_ms: f64,
    last_used_at_ms: i64,
}

impl SelectorRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            domain: row.get(0)?,
            strategy: row.get(1)?,
            selector: row.get(2)?,
            success_count: row.get(3)?,
            failure_count: row.get(4)?,
            avg_latency_ms: row.get(5)?,
            last_used_at_ms: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<SelectorRecord, Error> {
        let strategy = self
            .strategy
            .parse::<SelectorStrategy>()
            .map_err(|e| Error::CorruptRow(e.to_string()))?;
        Ok(SelectorRecord {
            domain: self.domain,
            selector: self.selector,
            strategy,
            success_count: self.success_count.max(0) as u64,
            failure_count: self.failure_count.max(0) as u64,
            last_used_at: from_millis(self.last_used_at_ms),
            avg_latency_ms: self.avg_latency_ms,
        })
    }
}

impl CacheDb {
    /// Merge a record into `selector_records`.
    ///
    /// Counters and last-use only move forward; the latency mean follows
    /// whichever side has seen more samples. Replaying an older snapshot is
    /// therefore harmless.
    pub async fn upsert_selector(&self, record: &SelectorRecord) -> Result<(), Error> {
        let record = record.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO selector_records (
                        domain, strategy, selector, success_count, failure_count,
                        avg_latency_ms, last_used_at_ms
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(domain, strategy, selector) DO UPDATE SET
                        avg_latency_ms = CASE
                            WHEN excluded.success_count + excluded.failure_count >= success_count + failure_count
                            THEN excluded.avg_latency_ms ELSE avg_latency_ms END,
                        success_count = MAX(success_count, excluded.success_count),
                        failure_count = MAX(failure_count, excluded.failure_count),
                        last_used_at_ms = MAX(last_used_at_ms, excluded.last_used_at_ms)",
                    params![
                        &record.domain,
                        record.strategy.as_str(),
                        &record.selector,
                        record.success_count as i64,
                        record.failure_count as i64,
                        record.avg_latency_ms,
                        record.last_used_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    pub async fn load_selectors(&self) -> Result<Vec<SelectorRecord>, Error> {
        let rows = self
            .conn
            .call(|conn| -> Result<Vec<SelectorRow>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT domain, strategy, selector, success_count, failure_count,
                            avg_latency_ms, last_used_at_ms
                     FROM selector_records",
                )?;
                let rows = stmt
                    .query_map([], SelectorRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter().map(SelectorRow::into_record).collect()
    }

    /// Drop records last used before `cutoff`.
    pub async fn delete_selectors_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute("DELETE FROM selector_records WHERE last_used_at_ms < ?1", params![cutoff_ms])?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn selector_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM selector_records", [], |row| row.get(0))?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }
}
