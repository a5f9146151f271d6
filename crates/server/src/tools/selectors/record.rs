//! selector_record tool implementation.

use std::time::Duration;

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use webmemo_core::SelectorTracker;
use webmemo_core::cache::SelectorStrategy;

use super::SelectorView;
use crate::tools::json_result;

/// Parameters for the selector_record tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelectorRecordParams {
    /// Host the selector was used on.
    pub domain: String,

    pub selector: String,

    /// "css", "xpath" or "text". Inferred from the selector when omitted.
    #[serde(default)]
    pub strategy: Option<SelectorStrategy>,

    /// Whether the selector located the intended element.
    pub succeeded: bool,

    /// Time the lookup took, in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorRecordOutput {
    pub domain: String,
    pub record: SelectorView,
}

/// Implementation of the selector_record tool.
pub async fn record_impl(tracker: &SelectorTracker, params: SelectorRecordParams) -> Result<CallToolResult, McpError> {
    let record = tracker
        .record_outcome(
            &params.domain,
            &params.selector,
            params.strategy,
            params.succeeded,
            Duration::from_millis(params.latency_ms),
        )
        .await?;

    let view = SelectorView::from(&record);
    json_result(&SelectorRecordOutput { domain: record.domain, record: view })
}
