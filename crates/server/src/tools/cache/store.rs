//! cache_store tool implementation.
//!
//! Writes the result of a real browser operation through the tiers. The
//! content kind is inferred from the request when not given.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use webmemo_core::cache::{ContentKind, EntryMetadata, OperationKind, StoreOutcome};
use webmemo_core::{Error, KeyNormalizer, TieredCache};

use crate::tools::json_result;

/// Parameters for the cache_store tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheStoreParams {
    /// The page URL the operation ran against.
    pub url: String,

    /// CSS, XPath or `text=` selector, if the operation targeted an element.
    #[serde(default)]
    pub selector: Option<String>,

    /// The browser operation being memoized.
    pub operation: OperationKind,

    /// The operation result to cache.
    pub payload: String,

    /// Page title, if known.
    #[serde(default)]
    pub title: Option<String>,

    /// How the payload was produced (e.g. "readability", "selector").
    #[serde(default)]
    pub extraction_method: Option<String>,

    /// Override the inferred content kind (e.g. "dynamic" for live data).
    #[serde(default)]
    pub content_kind: Option<ContentKind>,
}

/// Output from the cache_store tool.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStoreOutput {
    pub key: String,
    pub content_kind: ContentKind,
    pub outcome: StoreOutcome,
}

/// Implementation of the cache_store tool.
pub async fn store_impl(
    cache: &TieredCache, normalizer: &KeyNormalizer, params: CacheStoreParams,
) -> Result<CallToolResult, McpError> {
    if params.payload.is_empty() {
        return Err(Error::InvalidInput("payload must not be empty".to_string()).into());
    }

    let selector = params.selector.as_deref();
    let key = normalizer.normalize(&params.url, selector, params.operation)?;
    let content_kind = params
        .content_kind
        .unwrap_or_else(|| ContentKind::infer(&params.url, selector, params.operation));

    let mut metadata = EntryMetadata::new(params.url, content_kind);
    if let Some(title) = params.title {
        metadata = metadata.with_title(title);
    }
    if let Some(method) = params.extraction_method {
        metadata = metadata.with_extraction_method(method);
    }

    let outcome = cache.store(&key, params.payload.into(), metadata).await;

    json_result(&CacheStoreOutput { key: key.to_string(), content_kind, outcome })
}
