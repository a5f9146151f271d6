//! cache_invalidate tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use webmemo_core::cache::{OperationKind, RemovalOutcome, normalize_domain};
use webmemo_core::{Error, KeyNormalizer, TieredCache};

use crate::tools::json_result;

/// Parameters for the cache_invalidate tool.
///
/// Exactly one of `url`, `domain` or `pattern` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateParams {
    /// Invalidate the entries for this URL (plus `selector` and `operation`).
    #[serde(default)]
    pub url: Option<String>,

    /// Invalidate every entry whose origin host equals this domain.
    #[serde(default)]
    pub domain: Option<String>,

    /// Invalidate every entry whose URL contains this text, ignoring case
    /// (e.g. "/archive/").
    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub selector: Option<String>,

    /// Operation of the entry to drop. With a `url` and no operation, the
    /// entries of every operation are dropped.
    #[serde(default)]
    pub operation: Option<OperationKind>,

    /// Why the entries are stale, kept in the invalidation ledger
    /// (default: "explicit").
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheInvalidateOutput {
    /// The normalized URL, domain or pattern.
    pub target: String,
    /// Keys dropped for a URL target.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    pub removed: RemovalOutcome,
    /// `true` when an L2 delete failed and was left to the sweeper.
    pub deferred: bool,
}

/// Implementation of the cache_invalidate tool.
pub async fn invalidate_impl(
    cache: &TieredCache, normalizer: &KeyNormalizer, params: CacheInvalidateParams,
) -> Result<CallToolResult, McpError> {
    let reason = params
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("explicit");

    let (target, keys, removed) = match (params.url, params.domain, params.pattern) {
        (Some(url), None, None) => {
            let target = normalizer.normalize_url(&url)?.to_string();
            let operations = match params.operation {
                Some(operation) => vec![operation],
                None => OperationKind::ALL.to_vec(),
            };

            let mut keys = Vec::with_capacity(operations.len());
            let mut removed = RemovalOutcome { l1_removed: 0, l2_removed: Some(0) };
            for operation in operations {
                let key = normalizer.normalize(&url, params.selector.as_deref(), operation)?;
                let outcome = cache.invalidate_because(&key, reason).await;
                removed.l1_removed += outcome.l1_removed;
                removed.l2_removed = removed.l2_removed.zip(outcome.l2_removed).map(|(a, b)| a + b);
                keys.push(key.to_string());
            }
            (target, keys, removed)
        }
        (None, Some(domain), None) => {
            let domain = normalize_domain(&domain);
            if domain.is_empty() {
                return Err(Error::InvalidInput("domain must not be empty".to_string()).into());
            }
            let removed = cache.invalidate_domain_because(&domain, reason).await;
            (domain, Vec::new(), removed)
        }
        (None, None, Some(pattern)) => {
            let removed = cache.invalidate_pattern(&pattern, reason).await?;
            (pattern.trim().to_ascii_lowercase(), Vec::new(), removed)
        }
        _ => {
            return Err(
                Error::InvalidInput("exactly one of 'url', 'domain' or 'pattern' is required".to_string()).into(),
            );
        }
    };

    let deferred = removed.l2_removed.is_none();
    json_result(&CacheInvalidateOutput { target, keys, removed, deferred })
}
