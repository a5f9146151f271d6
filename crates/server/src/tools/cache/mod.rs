//! Cache MCP tools.

pub mod clear;
pub mod invalidate;
pub mod lookup;
pub mod stats;
pub mod store;

pub use clear::{CacheClearParams, clear_impl};
pub use invalidate::{CacheInvalidateParams, invalidate_impl};
pub use lookup::{CacheLookupParams, lookup_impl};
pub use stats::{CacheStatsParams, stats_impl};
pub use store::{CacheStoreParams, store_impl};
