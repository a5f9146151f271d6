//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the cache and selector tools.
use std::sync::Arc;

use crate::tools::cache::{
    CacheClearParams, CacheInvalidateParams, CacheLookupParams, CacheStatsParams, CacheStoreParams, clear_impl,
    invalidate_impl, lookup_impl, stats_impl, store_impl,
};
use crate::tools::selectors::{SelectorBestParams, SelectorRecordParams, best_impl, record_impl};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use webmemo_core::{KeyNormalizer, SelectorTracker, TieredCache};

/// The main MCP server handler for webmemo.
#[derive(Clone)]
pub struct WebmemoServer {
    cache: Arc<TieredCache>,
    tracker: Arc<SelectorTracker>,
    normalizer: Arc<KeyNormalizer>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl WebmemoServer {
    /// Create a new server handler over shared cache state.
    pub fn new(cache: Arc<TieredCache>, tracker: Arc<SelectorTracker>, normalizer: Arc<KeyNormalizer>) -> Self {
        Self { cache, tracker, normalizer, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Look up a memoized browser operation result by URL, optional selector and operation. Returns hit=false on a miss."
    )]
    async fn cache_lookup(&self, params: Parameters<CacheLookupParams>) -> Result<CallToolResult, McpError> {
        lookup_impl(&self.cache, &self.normalizer, params.0).await
    }

    /// Store the result of a browser operation.
    ///
    /// The TTL and tier placement are derived from the content kind, which is
    /// inferred from the URL, selector and operation unless given.
    #[tool(
        description = "Store the result of a browser operation. TTL and durability are chosen from the content kind; dynamic content is not cached."
    )]
    async fn cache_store(&self, params: Parameters<CacheStoreParams>) -> Result<CallToolResult, McpError> {
        store_impl(&self.cache, &self.normalizer, params.0).await
    }

    #[tool(
        description = "Invalidate cached entries in both tiers: by url (every operation unless one is given), by domain, or by a URL substring pattern. An optional reason is kept in the invalidation ledger."
    )]
    async fn cache_invalidate(&self, params: Parameters<CacheInvalidateParams>) -> Result<CallToolResult, McpError> {
        invalidate_impl(&self.cache, &self.normalizer, params.0).await
    }

    #[tool(
        description = "Cache hit/miss counters, tier occupancy and L2 health. Set detailed=true for per-tier age bounds and recent invalidations, or domain to list that domain's entries."
    )]
    async fn cache_stats(&self, params: Parameters<CacheStatsParams>) -> Result<CallToolResult, McpError> {
        stats_impl(&self.cache, params.0).await
    }

    #[tool(description = "Remove expired entries from both tiers, and optionally clear search history and workflow records.")]
    async fn cache_clear_expired(&self, params: Parameters<CacheClearParams>) -> Result<CallToolResult, McpError> {
        clear_impl(&self.cache, params.0).await
    }

    #[tool(description = "Record whether a selector located its element on a domain, with the time it took.")]
    async fn selector_record(&self, params: Parameters<SelectorRecordParams>) -> Result<CallToolResult, McpError> {
        record_impl(&self.tracker, params.0).await
    }

    #[tool(
        description = "Rank the selectors recorded for a domain, optionally for one element type, and return the preferred one if its success rate clears the threshold."
    )]
    async fn selector_best(&self, params: Parameters<SelectorBestParams>) -> Result<CallToolResult, McpError> {
        best_impl(&self.tracker, params.0).await
    }
}

impl ServerHandler for WebmemoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "webmemo".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
