//! Durable page entries in the `cached_pages` table.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, rusqlite};

use super::connection::CacheDb;
use super::entry::{CacheEntry, EntryMetadata, from_millis};
use super::key::CacheKey;
use super::policy::{ContentKind, Durability};
use crate::Error;

const PAGE_COLUMNS: &str = "key, url, title, content_digest, content_kind, extraction_method,
     durability, payload, created_at_ms, expires_at_ms";

/// Raw column values, decoded outside the rusqlite row callback.
struct PageRow {
    key: String,
    url: String,
    title: Option<String>,
    content_digest: Option<String>,
    content_kind: String,
    extraction_method: Option<String>,
    durability: String,
    payload: Vec<u8>,
    created_at_ms: i64,
    expires_at_ms: Option<i64>,
}

impl PageRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            content_digest: row.get(3)?,
            content_kind: row.get(4)?,
            extraction_method: row.get(5)?,
            durability: row.get(6)?,
            payload: row.get(7)?,
            created_at_ms: row.get(8)?,
            expires_at_ms: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, Error> {
        let key = CacheKey::parse(&self.key).map_err(|e| Error::CorruptRow(e.to_string()))?;
        let content_kind = ContentKind::from_db(&self.content_kind)
            .ok_or_else(|| Error::CorruptRow(format!("unknown content kind: {}", self.content_kind)))?;
        let durability = Durability::from_db(&self.durability)
            .ok_or_else(|| Error::CorruptRow(format!("unknown durability: {}", self.durability)))?;

        let metadata = EntryMetadata {
            url: self.url,
            title: self.title,
            content_digest: self.content_digest,
            content_kind,
            extraction_method: self.extraction_method,
        };
        let mut entry = CacheEntry::new(
            key,
            Bytes::from(self.payload),
            metadata,
            durability,
            None,
            from_millis(self.created_at_ms),
        );
        entry.expires_at = self.expires_at_ms.map(from_millis);
        Ok(entry)
    }
}

/// Occupancy of the `cached_pages` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageStats {
    pub count: u64,
    pub bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl CacheDb {
    /// Insert or overwrite a page entry. Commits before returning.
    pub async fn upsert_page(&self, entry: &CacheEntry) -> Result<(), Error> {
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cached_pages (
                        key, domain, url, title, content_digest, content_kind, extraction_method,
                        durability, payload, size_bytes, created_at_ms, expires_at_ms
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    ON CONFLICT(key) DO UPDATE SET
                        domain = excluded.domain,
                        url = excluded.url,
                        title = excluded.title,
                        content_digest = excluded.content_digest,
                        content_kind = excluded.content_kind,
                        extraction_method = excluded.extraction_method,
                        durability = excluded.durability,
                        payload = excluded.payload,
                        size_bytes = excluded.size_bytes,
                        created_at_ms = excluded.created_at_ms,
                        expires_at_ms = excluded.expires_at_ms",
                    params![
                        entry.key.as_str(),
                        &entry.domain,
                        &entry.metadata.url,
                        &entry.metadata.title,
                        &entry.metadata.content_digest,
                        entry.metadata.content_kind.as_str(),
                        &entry.metadata.extraction_method,
                        entry.durability.as_str(),
                        entry.payload.as_ref(),
                        entry.size_bytes as i64,
                        entry.created_at.timestamp_millis(),
                        entry.expires_at.map(|t| t.timestamp_millis()),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Point lookup. Rows expired at `now` are invisible.
    pub async fn get_page(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheEntry>, Error> {
        let key = key.as_str().to_string();
        let now_ms = now.timestamp_millis();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<PageRow>, Error> {
                let sql = format!(
                    "SELECT {PAGE_COLUMNS} FROM cached_pages
                     WHERE key = ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)"
                );
                match conn.query_row(&sql, params![key, now_ms], PageRow::read) {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(PageRow::into_entry).transpose()
    }

    /// Live pages for a domain, newest first, optionally limited to those
    /// created at or after `since`.
    pub async fn pages_by_domain(
        &self, domain: &str, since: Option<DateTime<Utc>>, now: DateTime<Utc>, limit: usize,
    ) -> Result<Vec<CacheEntry>, Error> {
        let domain = domain.to_string();
        let since_ms = since.map_or(i64::MIN, |t| t.timestamp_millis());
        let now_ms = now.timestamp_millis();
        let limit = limit as i64;
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<PageRow>, Error> {
                let sql = format!(
                    "SELECT {PAGE_COLUMNS} FROM cached_pages
                     WHERE domain = ?1 AND created_at_ms >= ?2
                       AND (expires_at_ms IS NULL OR expires_at_ms > ?3)
                     ORDER BY created_at_ms DESC
                     LIMIT ?4"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![domain, since_ms, now_ms, limit], PageRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter().map(PageRow::into_entry).collect()
    }

    /// Delete a page only if it was created at or before `cutoff`.
    ///
    /// A newer write that landed after the invalidation survives.
    pub async fn delete_page_before(&self, key: &CacheKey, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let key = key.as_str().to_string();
        let cutoff_ms = cutoff.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute(
                    "DELETE FROM cached_pages WHERE key = ?1 AND created_at_ms <= ?2",
                    params![key, cutoff_ms],
                )?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn delete_domain_pages_before(&self, domain: &str, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let domain = domain.to_string();
        let cutoff_ms = cutoff.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute(
                    "DELETE FROM cached_pages WHERE domain = ?1 AND created_at_ms <= ?2",
                    params![domain, cutoff_ms],
                )?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete pages whose URL contains `pattern` (ASCII case-insensitive)
    /// and were created at or before `cutoff`.
    pub async fn delete_pages_matching_before(&self, pattern: &str, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let pattern = pattern.to_ascii_lowercase();
        let cutoff_ms = cutoff.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute(
                    "DELETE FROM cached_pages WHERE instr(lower(url), ?1) > 0 AND created_at_ms <= ?2",
                    params![pattern, cutoff_ms],
                )?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete at most `batch` expired pages.
    ///
    /// Returns the number of deleted rows; callers loop until it drops
    /// below `batch`.
    pub async fn purge_expired_pages(&self, now: DateTime<Utc>, batch: usize) -> Result<u64, Error> {
        let now_ms = now.timestamp_millis();
        let batch = batch as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute(
                    "DELETE FROM cached_pages WHERE key IN (
                        SELECT key FROM cached_pages
                        WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1
                        LIMIT ?2
                    )",
                    params![now_ms, batch],
                )?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn page_stats(&self) -> Result<PageStats, Error> {
        self.conn
            .call(|conn| -> Result<PageStats, Error> {
                let (count, bytes, oldest, newest): (i64, i64, Option<i64>, Option<i64>) = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0), MIN(created_at_ms), MAX(created_at_ms)
                     FROM cached_pages",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;
                Ok(PageStats {
                    count: count as u64,
                    bytes: bytes as u64,
                    oldest: oldest.map(from_millis),
                    newest: newest.map(from_millis),
                })
            })
            .await
            .map_err(Error::from)
    }
}
