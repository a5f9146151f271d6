//! Two-tier cache for browser operation results.
//!
//! - `key`: canonical cache keys from (URL, selector, operation)
//! - `policy`: TTL and durability classification
//! - `memory`: the L1 byte-bounded LRU
//! - `connection`, `pages`, `history`, `selectors`, `metrics`: the SQLite-backed L2
//! - `ledger`: recent invalidation events
//! - `tiered`: the coordinator tying both tiers together

pub mod connection;
pub mod durable;
pub mod entry;
pub mod history;
pub mod key;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod migrations;
pub mod pages;
pub mod policy;
pub mod selector;
pub mod selectors;
pub mod tiered;

pub use crate::Error;

pub use connection::CacheDb;
pub use durable::{DurableStats, DurableTier};
pub use entry::{CacheEntry, EntryMetadata, EntrySummary, Tier};
pub use history::HistoryRecord;
pub use key::{CacheKey, KeyNormalizer, OperationKind, normalize_domain};
pub use ledger::{InvalidationEvent, InvalidationScope, InvalidationSummary};
pub use memory::MemoryTier;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use policy::{Classification, ContentKind, Durability, TtlPolicy};
pub use selector::{ElementType, SelectorStrategy, canonicalize_selector};
pub use tiered::{
    CacheReport, CacheStats, DomainReport, ExpiryOutcome, Fetched, L2Status, Lookup, RemovalOutcome, StoreOutcome,
    TieredCache,
};
