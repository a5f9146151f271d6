//! cache_stats tool implementation.

use std::time::Duration;

use chrono::Utc;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use webmemo_core::cache::normalize_domain;
use webmemo_core::{Error, TieredCache};

use crate::tools::json_result;

/// Parameters for the cache_stats tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatsParams {
    /// Include per-tier occupancy, age bounds and recent invalidations (queries L2).
    #[serde(default)]
    pub detailed: bool,

    /// List the entries held for this domain in each tier instead of totals.
    #[serde(default)]
    pub domain: Option<String>,

    /// With `domain`, only entries created within this many seconds.
    #[serde(default)]
    pub since_secs: Option<u64>,

    /// With `domain`, maximum entries listed per tier (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

impl Default for CacheStatsParams {
    fn default() -> Self {
        Self { detailed: false, domain: None, since_secs: None, limit: default_limit() }
    }
}

/// Implementation of the cache_stats tool.
pub async fn stats_impl(cache: &TieredCache, params: CacheStatsParams) -> Result<CallToolResult, McpError> {
    if let Some(domain) = params.domain {
        let domain = normalize_domain(&domain);
        if domain.is_empty() {
            return Err(Error::InvalidInput("domain must not be empty".to_string()).into());
        }
        let since = params
            .since_secs
            .and_then(|secs| chrono::Duration::from_std(Duration::from_secs(secs)).ok())
            .and_then(|age| Utc::now().checked_sub_signed(age));
        return json_result(&cache.domain_report(&domain, since, params.limit).await);
    }

    if params.detailed {
        json_result(&cache.report().await)
    } else {
        json_result(&cache.stats())
    }
}
