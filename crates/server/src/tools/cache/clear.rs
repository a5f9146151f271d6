//! cache_clear_expired tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use webmemo_core::TieredCache;
use webmemo_core::cache::{ContentKind, ExpiryOutcome, RemovalOutcome};

use crate::tools::json_result;

/// Parameters for the cache_clear_expired tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearParams {
    /// Also delete permanent search history and workflow records.
    #[serde(default)]
    pub clear_history: bool,

    /// Restrict history clearing to one kind ("search_history" or "workflow_state").
    #[serde(default)]
    pub history_kind: Option<ContentKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheClearOutput {
    pub expired: ExpiryOutcome,
    pub history: Option<RemovalOutcome>,
}

/// Implementation of the cache_clear_expired tool.
pub async fn clear_impl(cache: &TieredCache, params: CacheClearParams) -> Result<CallToolResult, McpError> {
    let expired = cache.clear_expired().await;

    let history = if params.clear_history {
        Some(cache.clear_history(params.history_kind).await)
    } else {
        None
    };

    json_result(&CacheClearOutput { expired, history })
}
