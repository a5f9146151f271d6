//! cache_lookup tool implementation.
//!
//! Normalizes the request into a cache key and consults both tiers. A miss
//! is a normal result, not an error.

use chrono::{DateTime, Utc};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use webmemo_core::cache::{Durability, EntryMetadata, Lookup, OperationKind, Tier};
use webmemo_core::{KeyNormalizer, TieredCache};

use crate::tools::json_result;

/// Parameters for the cache_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheLookupParams {
    /// The page URL the operation ran against.
    pub url: String,

    /// CSS, XPath or `text=` selector, if the operation targeted an element.
    #[serde(default)]
    pub selector: Option<String>,

    /// The browser operation being memoized.
    pub operation: OperationKind,
}

/// Output from the cache_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLookupOutput {
    pub key: String,
    pub hit: bool,
    pub served_from: Option<Tier>,
    /// Payload decoded as UTF-8 (lossy).
    pub payload: Option<String>,
    pub metadata: Option<EntryMetadata>,
    pub durability: Option<Durability>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Implementation of the cache_lookup tool.
pub async fn lookup_impl(
    cache: &TieredCache, normalizer: &KeyNormalizer, params: CacheLookupParams,
) -> Result<CallToolResult, McpError> {
    let key = normalizer.normalize(&params.url, params.selector.as_deref(), params.operation)?;

    let output = match cache.lookup(&key).await {
        Lookup::Hit { entry, served_from } => CacheLookupOutput {
            key: key.to_string(),
            hit: true,
            served_from: Some(served_from),
            payload: Some(String::from_utf8_lossy(&entry.payload).into_owned()),
            metadata: Some(entry.metadata.clone()),
            durability: Some(entry.durability),
            created_at: Some(entry.created_at),
            expires_at: entry.expires_at,
        },
        Lookup::Miss => CacheLookupOutput {
            key: key.to_string(),
            hit: false,
            served_from: None,
            payload: None,
            metadata: None,
            durability: None,
            created_at: None,
            expires_at: None,
        },
    };

    json_result(&output)
}
