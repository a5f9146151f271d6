//! Cache entry and its metadata.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::key::{CacheKey, normalize_domain};
use super::policy::{ContentKind, Durability};

/// Which tier served a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    L1,
    L2,
}

/// Descriptive metadata carried next to a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EntryMetadata {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    /// SHA-256 of the payload, filled in at store time when absent.
    #[serde(default)]
    pub content_digest: Option<String>,
    pub content_kind: ContentKind,
    #[serde(default)]
    pub extraction_method: Option<String>,
}

impl EntryMetadata {
    pub fn new(url: impl Into<String>, content_kind: ContentKind) -> Self {
        Self { url: url.into(), title: None, content_digest: None, content_kind, extraction_method: None }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_extraction_method(mut self, method: impl Into<String>) -> Self {
        self.extraction_method = Some(method.into());
        self
    }
}

/// A memoized operation result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Bytes,
    pub metadata: EntryMetadata,
    pub durability: Durability,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size_bytes: usize,
    pub domain: String,
}

/// Payload-free view of an entry for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub key: String,
    pub url: String,
    pub title: Option<String>,
    pub content_kind: ContentKind,
    pub durability: Durability,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&CacheEntry> for EntrySummary {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.to_string(),
            url: entry.metadata.url.clone(),
            title: entry.metadata.title.clone(),
            content_kind: entry.metadata.content_kind,
            durability: entry.durability,
            size_bytes: entry.size_bytes as u64,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
        }
    }
}

impl CacheEntry {
    pub fn new(
        key: CacheKey, payload: Bytes, mut metadata: EntryMetadata, durability: Durability, ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        if metadata.content_digest.is_none() {
            metadata.content_digest = Some(hex::encode(Sha256::digest(&payload)));
        }
        let created_at = truncate_millis(now);
        let expires_at = ttl.map(|ttl| expiry_after(created_at, ttl));
        let size_bytes = payload.len() + key.len();
        let domain = normalize_domain(&metadata.url);

        Self { key, payload, metadata, durability, created_at, expires_at, size_bytes, domain }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// `created_at + ttl`, saturating at the latest representable instant.
fn expiry_after(created_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| created_at.checked_add_signed(d))
        .map_or_else(|| truncate_millis(DateTime::<Utc>::MAX_UTC), truncate_millis)
}

/// Timestamps are persisted as unix milliseconds, so in-memory copies are
/// truncated the same way to compare equal after a round trip.
pub(crate) fn truncate_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(t.timestamp_millis())
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}
