//! selector_best tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use webmemo_core::cache::{ElementType, SelectorStrategy, normalize_domain};
use webmemo_core::{Error, SelectorTracker};

use super::SelectorView;
use crate::tools::json_result;

/// Parameters for the selector_best tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelectorBestParams {
    pub domain: String,

    /// Restrict to one strategy ("css", "xpath" or "text").
    #[serde(default)]
    pub strategy: Option<SelectorStrategy>,

    /// Restrict to selectors for one kind of element ("navigation",
    /// "content", "forms" or "links"). Defaults to "general", which matches all.
    #[serde(default)]
    pub element_type: ElementType,

    /// Maximum number of selectors to return (default: 5).
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Success rate a selector must exceed to be preferred. Uses the
    /// configured default when omitted.
    #[serde(default)]
    pub min_success_rate: Option<f64>,
}

fn default_limit() -> usize {
    5
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorBestOutput {
    pub domain: String,
    pub selectors: Vec<SelectorView>,
    /// Best selector above the success threshold, if any.
    pub preferred: Option<SelectorView>,
}

/// Implementation of the selector_best tool.
pub async fn best_impl(tracker: &SelectorTracker, params: SelectorBestParams) -> Result<CallToolResult, McpError> {
    if let Some(rate) = params.min_success_rate.filter(|r| !(0.0..=1.0).contains(r)) {
        return Err(Error::InvalidInput(format!("min_success_rate must be within 0..=1, got {rate}")).into());
    }

    let selectors = tracker
        .best_selectors(&params.domain, params.strategy, params.element_type, params.limit)
        .iter()
        .map(SelectorView::from)
        .collect();
    let preferred = tracker
        .preferred_selector(&params.domain, params.strategy, params.element_type, params.min_success_rate)
        .as_ref()
        .map(SelectorView::from);

    json_result(&SelectorBestOutput { domain: normalize_domain(&params.domain), selectors, preferred })
}
