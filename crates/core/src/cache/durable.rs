//! The L2 seam between the coordinator and its durable backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::connection::CacheDb;
use super::entry::CacheEntry;
use super::history::HistoryRecord;
use super::key::CacheKey;
use super::metrics::MetricsRecord;
use super::pages::PageStats;
use super::policy::{ContentKind, Durability};
use crate::Error;
use crate::tracker::SelectorRecord;

/// Aggregate L2 occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurableStats {
    pub pages: PageStats,
    pub history_count: u64,
    pub selector_count: u64,
}

/// Durable storage operations used by the coordinator, the tracker and the sweeper.
#[async_trait]
pub trait DurableTier: Send + Sync {
    /// Live entry for `key`, from either pages or history.
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheEntry>, Error>;

    /// Write an entry, routing permanent ones to history. Must be durable on return.
    async fn put(&self, entry: &CacheEntry) -> Result<(), Error>;

    /// Delete `key` if its row was created at or before `cutoff`.
    async fn delete_before(&self, key: &CacheKey, cutoff: DateTime<Utc>) -> Result<u64, Error>;

    async fn delete_domain_before(&self, domain: &str, cutoff: DateTime<Utc>) -> Result<u64, Error>;

    /// Delete rows whose URL contains `pattern`, created at or before `cutoff`.
    async fn delete_matching_before(&self, pattern: &str, cutoff: DateTime<Utc>) -> Result<u64, Error>;

    /// Live page rows for `domain`, newest first.
    async fn pages_by_domain(
        &self, domain: &str, since: Option<DateTime<Utc>>, now: DateTime<Utc>, limit: usize,
    ) -> Result<Vec<CacheEntry>, Error>;

    async fn list_history(&self, domain: Option<&str>, limit: usize) -> Result<Vec<HistoryRecord>, Error>;

    /// Delete up to `batch` expired rows.
    async fn purge_expired(&self, now: DateTime<Utc>, batch: usize) -> Result<u64, Error>;

    async fn clear_history(&self, kind: Option<ContentKind>) -> Result<u64, Error>;

    async fn stats(&self) -> Result<DurableStats, Error>;

    async fn append_metrics(&self, record: &MetricsRecord) -> Result<(), Error>;

    async fn upsert_selector(&self, record: &SelectorRecord) -> Result<(), Error>;

    async fn load_selectors(&self) -> Result<Vec<SelectorRecord>, Error>;

    async fn delete_selectors_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error>;
}

#[async_trait]
impl DurableTier for CacheDb {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheEntry>, Error> {
        if let Some(entry) = self.get_page(key, now).await? {
            return Ok(Some(entry));
        }
        self.get_history_entry(key).await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), Error> {
        match entry.durability {
            Durability::Permanent => self.upsert_history(entry).await,
            _ => self.upsert_page(entry).await,
        }
    }

    async fn delete_before(&self, key: &CacheKey, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let pages = self.delete_page_before(key, cutoff).await?;
        let history = self.delete_history_before(key, cutoff).await?;
        Ok(pages + history)
    }

    async fn delete_domain_before(&self, domain: &str, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let pages = self.delete_domain_pages_before(domain, cutoff).await?;
        let history = self.delete_domain_history_before(domain, cutoff).await?;
        Ok(pages + history)
    }

    async fn delete_matching_before(&self, pattern: &str, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let pages = self.delete_pages_matching_before(pattern, cutoff).await?;
        let history = self.delete_history_matching_before(pattern, cutoff).await?;
        Ok(pages + history)
    }

    async fn pages_by_domain(
        &self, domain: &str, since: Option<DateTime<Utc>>, now: DateTime<Utc>, limit: usize,
    ) -> Result<Vec<CacheEntry>, Error> {
        CacheDb::pages_by_domain(self, domain, since, now, limit).await
    }

    async fn list_history(&self, domain: Option<&str>, limit: usize) -> Result<Vec<HistoryRecord>, Error> {
        CacheDb::list_history(self, None, domain, limit).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>, batch: usize) -> Result<u64, Error> {
        self.purge_expired_pages(now, batch).await
    }

    async fn clear_history(&self, kind: Option<ContentKind>) -> Result<u64, Error> {
        CacheDb::clear_history(self, kind).await
    }

    async fn stats(&self) -> Result<DurableStats, Error> {
        Ok(DurableStats {
            pages: self.page_stats().await?,
            history_count: self.history_count().await?,
            selector_count: self.selector_count().await?,
        })
    }

    async fn append_metrics(&self, record: &MetricsRecord) -> Result<(), Error> {
        CacheDb::append_metrics(self, record).await
    }

    async fn upsert_selector(&self, record: &SelectorRecord) -> Result<(), Error> {
        CacheDb::upsert_selector(self, record).await
    }

    async fn load_selectors(&self) -> Result<Vec<SelectorRecord>, Error> {
        CacheDb::load_selectors(self).await
    }

    async fn delete_selectors_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        CacheDb::delete_selectors_before(self, cutoff).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes for exercising tier faults.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    /// Delegates to an in-memory `CacheDb` until told to fail or stall.
    pub struct FlakyTier {
        inner: CacheDb,
        failing: AtomicBool,
        stall: Option<Duration>,
    }

    impl FlakyTier {
        pub async fn new() -> Self {
            Self { inner: CacheDb::open_in_memory().await.unwrap(), failing: AtomicBool::new(false), stall: None }
        }

        /// Every call sleeps for `stall` before answering.
        pub async fn stalling(stall: Duration) -> Self {
            Self { stall: Some(stall), ..Self::new().await }
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        async fn gate(&self) -> Result<(), Error> {
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::TierUnavailable("disk unreachable".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DurableTier for FlakyTier {
        async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheEntry>, Error> {
            self.gate().await?;
            DurableTier::get(&self.inner, key, now).await
        }

        async fn put(&self, entry: &CacheEntry) -> Result<(), Error> {
            self.gate().await?;
            DurableTier::put(&self.inner, entry).await
        }

        async fn delete_before(&self, key: &CacheKey, cutoff: DateTime<Utc>) -> Result<u64, Error> {
            self.gate().await?;
            DurableTier::delete_before(&self.inner, key, cutoff).await
        }

        async fn delete_domain_before(&self, domain: &str, cutoff: DateTime<Utc>) -> Result<u64, Error> {
            self.gate().await?;
            DurableTier::delete_domain_before(&self.inner, domain, cutoff).await
        }

        async fn delete_matching_before(&self, pattern: &str, cutoff: DateTime<Utc>) -> Result<u64, Error> {
            self.gate().await?;
            DurableTier::delete_matching_before(&self.inner, pattern, cutoff).await
        }

        async fn pages_by_domain(
            &self, domain: &str, since: Option<DateTime<Utc>>, now: DateTime<Utc>, limit: usize,
        ) -> Result<Vec<CacheEntry>, Error> {
            self.gate().await?;
            DurableTier::pages_by_domain(&self.inner, domain, since, now, limit).await
        }

        async fn list_history(&self, domain: Option<&str>, limit: usize) -> Result<Vec<HistoryRecord>, Error> {
            self.gate().await?;
            DurableTier::list_history(&self.inner, domain, limit).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>, batch: usize) -> Result<u64, Error> {
            self.gate().await?;
            DurableTier::purge_expired(&self.inner, now, batch).await
        }

        async fn clear_history(&self, kind: Option<ContentKind>) -> Result<u64, Error> {
            self.gate().await?;
            DurableTier::clear_history(&self.inner, kind).await
        }

        async fn stats(&self) -> Result<DurableStats, Error> {
            self.gate().await?;
            DurableTier::stats(&self.inner).await
        }

        async fn append_metrics(&self, record: &MetricsRecord) -> Result<(), Error> {
            self.gate().await?;
            DurableTier::append_metrics(&self.inner, record).await
        }

        async fn upsert_selector(&self, record: &SelectorRecord) -> Result<(), Error> {
            self.gate().await?;
            DurableTier::upsert_selector(&self.inner, record).await
        }

        async fn load_selectors(&self) -> Result<Vec<SelectorRecord>, Error> {
            self.gate().await?;
            DurableTier::load_selectors(&self.inner).await
        }

        async fn delete_selectors_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
            self.gate().await?;
            DurableTier::delete_selectors_before(&self.inner, cutoff).await
        }
    }
}
