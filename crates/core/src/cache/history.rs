//! Search history and workflow state records.
//!
//! These rows never expire; they leave only through `clear_history` or an
//! explicit invalidation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_rusqlite::{params, rusqlite};

use super::connection::CacheDb;
use super::entry::{CacheEntry, EntryMetadata, from_millis};
use super::key::CacheKey;
use super::policy::{ContentKind, Durability};
use crate::Error;

/// A permanent record as stored in `history_records`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub key: String,
    pub kind: ContentKind,
    pub domain: String,
    pub url: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
    #[serde(skip)]
    pub payload: Bytes,
}

impl HistoryRecord {
    fn into_entry(self, content_digest: Option<String>, extraction_method: Option<String>) -> Result<CacheEntry, Error> {
        let key = CacheKey::parse(&self.key).map_err(|e| Error::CorruptRow(e.to_string()))?;
        let metadata = EntryMetadata {
            url: self.url,
            title: self.title,
            content_digest,
            content_kind: self.kind,
            extraction_method,
        };
        Ok(CacheEntry::new(key, self.payload, metadata, Durability::Permanent, None, self.created_at))
    }
}

fn history_kind(raw: &str) -> Result<ContentKind, Error> {
    match ContentKind::from_db(raw) {
        Some(kind @ (ContentKind::SearchHistory | ContentKind::WorkflowState)) => Ok(kind),
        _ => Err(Error::CorruptRow(format!("unexpected history kind: {raw}"))),
    }
}

struct HistoryRow {
    key: String,
    kind: String,
    domain: String,
    url: String,
    title: Option<String>,
    content_digest: Option<String>,
    extraction_method: Option<String>,
    payload: Vec<u8>,
    created_at_ms: i64,
    access_count: i64,
}

impl HistoryRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            kind: row.get(1)?,
            domain: row.get(2)?,
            url: row.get(3)?,
            title: row.get(4)?,
            content_digest: row.get(5)?,
            extraction_method: row.get(6)?,
            payload: row.get(7)?,
            created_at_ms: row.get(8)?,
            access_count: row.get(9)?,
        })
    }

    fn split(self) -> Result<(HistoryRecord, Option<String>, Option<String>), Error> {
        let record = HistoryRecord {
            key: self.key,
            kind: history_kind(&self.kind)?,
            domain: self.domain,
            url: self.url,
            title: self.title,
            created_at: from_millis(self.created_at_ms),
            access_count: self.access_count.max(0) as u64,
            payload: Bytes::from(self.payload),
        };
        Ok((record, self.content_digest, self.extraction_method))
    }
}

const HISTORY_COLUMNS: &str = "key, kind, domain, url, title, content_digest, extraction_method,
     payload, created_at_ms, access_count";

impl CacheDb {
    /// Insert or overwrite a permanent record. The access count survives an overwrite.
    pub async fn upsert_history(&self, entry: &CacheEntry) -> Result<(), Error> {
        let kind = entry.metadata.content_kind;
        if !matches!(kind, ContentKind::SearchHistory | ContentKind::WorkflowState) {
            return Err(Error::InvalidInput(format!("{} is not a history kind", kind.as_str())));
        }
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO history_records (
                        key, kind, domain, url, title, content_digest, extraction_method,
                        payload, size_bytes, created_at_ms, access_count
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)
                    ON CONFLICT(key) DO UPDATE SET
                        kind = excluded.kind,
                        domain = excluded.domain,
                        url = excluded.url,
                        title = excluded.title,
                        content_digest = excluded.content_digest,
                        extraction_method = excluded.extraction_method,
                        payload = excluded.payload,
                        size_bytes = excluded.size_bytes,
                        created_at_ms = excluded.created_at_ms",
                    params![
                        entry.key.as_str(),
                        kind.as_str(),
                        &entry.domain,
                        &entry.metadata.url,
                        &entry.metadata.title,
                        &entry.metadata.content_digest,
                        &entry.metadata.extraction_method,
                        entry.payload.as_ref(),
                        entry.size_bytes as i64,
                        entry.created_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Fetch a permanent record as a cache entry, bumping its access count.
    pub async fn get_history_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, Error> {
        let key = key.as_str().to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<HistoryRow>, Error> {
                let n = conn.execute(
                    "UPDATE history_records SET access_count = access_count + 1 WHERE key = ?1",
                    params![key],
                )?;
                if n == 0 {
                    return Ok(None);
                }
                let sql = format!("SELECT {HISTORY_COLUMNS} FROM history_records WHERE key = ?1");
                match conn.query_row(&sql, params![key], HistoryRow::read) {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        match row {
            Some(row) => {
                let (record, digest, method) = row.split()?;
                record.into_entry(digest, method).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Most recent history records, optionally filtered by kind and domain.
    pub async fn list_history(
        &self, kind: Option<ContentKind>, domain: Option<&str>, limit: usize,
    ) -> Result<Vec<HistoryRecord>, Error> {
        let kind = kind.map(|k| k.as_str().to_string());
        let domain = domain.map(str::to_string);
        let limit = limit as i64;
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<HistoryRow>, Error> {
                let sql = format!(
                    "SELECT {HISTORY_COLUMNS} FROM history_records
                     WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR domain = ?2)
                     ORDER BY created_at_ms DESC
                     LIMIT ?3"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![kind, domain, limit], HistoryRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter().map(|row| row.split().map(|(r, _, _)| r)).collect()
    }

    pub async fn delete_history_before(&self, key: &CacheKey, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let key = key.as_str().to_string();
        let cutoff_ms = cutoff.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute(
                    "DELETE FROM history_records WHERE key = ?1 AND created_at_ms <= ?2",
                    params![key, cutoff_ms],
                )?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn delete_domain_history_before(&self, domain: &str, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let domain = domain.to_string();
        let cutoff_ms = cutoff.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute(
                    "DELETE FROM history_records WHERE domain = ?1 AND created_at_ms <= ?2",
                    params![domain, cutoff_ms],
                )?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn delete_history_matching_before(&self, pattern: &str, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let pattern = pattern.to_ascii_lowercase();
        let cutoff_ms = cutoff.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute(
                    "DELETE FROM history_records WHERE instr(lower(url), ?1) > 0 AND created_at_ms <= ?2",
                    params![pattern, cutoff_ms],
                )?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove history records of one kind, or all of them.
    pub async fn clear_history(&self, kind: Option<ContentKind>) -> Result<u64, Error> {
        let kind = kind.map(|k| k.as_str().to_string());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let n = conn.execute("DELETE FROM history_records WHERE ?1 IS NULL OR kind = ?1", params![kind])?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn history_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM history_records", [], |row| row.get(0))?;
                Ok(n as u64)
            })
            .await
            .map_err(Error::from)
    }
}
