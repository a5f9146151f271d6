//! TTL and durability classification.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::entry::EntryMetadata;
use super::key::{OperationKind, normalize_domain};
use crate::config::TtlConfig;

/// Closed set of content shapes the cache knows how to age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Navigation landmarks, forms and other layout that rarely moves.
    StructuralSelector,
    /// Text pulled out by a plain text or simple selector.
    TextSelector,
    /// Navigation results and extracted page content.
    Page,
    /// Prices, tickers, search results and other live data.
    Dynamic,
    SearchHistory,
    WorkflowState,
}

/// Ordered from least to most durable, so `max` picks the winner of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Never cached.
    Ephemeral,
    /// L1 only.
    Short,
    /// Written through to L2.
    Long,
    /// L2 authoritative, no expiry.
    Permanent,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Durability::Ephemeral => "ephemeral",
            Durability::Short => "short",
            Durability::Long => "long",
            Durability::Permanent => "permanent",
        }
    }

    pub fn writes_l2(&self) -> bool {
        matches!(self, Durability::Long | Durability::Permanent)
    }

    pub(crate) fn from_db(s: &str) -> Option<Self> {
        match s {
            "ephemeral" => Some(Durability::Ephemeral),
            "short" => Some(Durability::Short),
            "long" => Some(Durability::Long),
            "permanent" => Some(Durability::Permanent),
            _ => None,
        }
    }
}

const SEARCH_HOSTS: &[&str] = &["duckduckgo.com", "google.com", "bing.com"];
const REALTIME_PATHS: &[&str] = &[
    "/api/", "/live/", "/current/", "/now/", "/realtime/", "/ajax/", "/stream/", "/ws/", "/feed/", "/rss/",
];
const FEED_EXTENSIONS: &[&str] = &[".json", ".xml"];
const DYNAMIC_SELECTORS: &[&str] = &[".price", ".stock", ".timestamp", ".live", ".current", ".now"];
const STRUCTURAL_SELECTORS: &[&str] = &["nav", "header", "footer", "menu", "form", "input[", "button[", "[role"];

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::StructuralSelector => "structural_selector",
            ContentKind::TextSelector => "text_selector",
            ContentKind::Page => "page",
            ContentKind::Dynamic => "dynamic",
            ContentKind::SearchHistory => "search_history",
            ContentKind::WorkflowState => "workflow_state",
        }
    }

    pub(crate) fn from_db(s: &str) -> Option<Self> {
        match s {
            "structural_selector" => Some(ContentKind::StructuralSelector),
            "text_selector" => Some(ContentKind::TextSelector),
            "page" => Some(ContentKind::Page),
            "dynamic" => Some(ContentKind::Dynamic),
            "search_history" => Some(ContentKind::SearchHistory),
            "workflow_state" => Some(ContentKind::WorkflowState),
            _ => None,
        }
    }

    /// Derive the content kind from the shape of a request.
    pub fn infer(url: &str, selector: Option<&str>, operation: OperationKind) -> Self {
        match operation {
            OperationKind::SearchHistory => return ContentKind::SearchHistory,
            OperationKind::Workflow => return ContentKind::WorkflowState,
            _ => {}
        }

        let host = normalize_domain(url);
        let lowered = url.to_lowercase();
        let search_host = SEARCH_HOSTS
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{h}")));
        let path = lowered.split(['?', '#']).next().unwrap_or_default();
        if search_host
            || lowered.contains("search")
            || REALTIME_PATHS.iter().any(|p| lowered.contains(p))
            || FEED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        {
            return ContentKind::Dynamic;
        }

        let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
            return ContentKind::Page;
        };

        let selector = selector.to_lowercase();
        if DYNAMIC_SELECTORS.iter().any(|p| selector.contains(p)) {
            ContentKind::Dynamic
        } else if STRUCTURAL_SELECTORS.iter().any(|p| selector.contains(p)) {
            ContentKind::StructuralSelector
        } else if !selector.contains(['.', '#', '[', ':', '>']) {
            ContentKind::TextSelector
        } else {
            ContentKind::Page
        }
    }
}

/// Outcome of classification.
///
/// `ttl` of `None` means the entry never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub ttl: Option<Duration>,
    pub durability: Durability,
}

/// Maps content metadata and payload size onto a TTL and durability class.
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    config: TtlConfig,
}

impl TtlPolicy {
    pub fn new(config: TtlConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, metadata: &EntryMetadata, payload_size: usize) -> Classification {
        let base = match metadata.content_kind {
            ContentKind::Dynamic => {
                return Classification { ttl: Some(Duration::ZERO), durability: Durability::Ephemeral };
            }
            ContentKind::SearchHistory | ContentKind::WorkflowState => {
                return Classification { ttl: None, durability: Durability::Permanent };
            }
            ContentKind::StructuralSelector => self.config.structural_secs,
            ContentKind::TextSelector => self.config.text_secs,
            ContentKind::Page => self.config.page_secs,
        };

        let mut ttl = Duration::from_secs(base);
        let mut durability =
            if base >= self.config.long_threshold_secs { Durability::Long } else { Durability::Short };

        if payload_size >= self.config.large_payload_bytes {
            ttl = ttl.max(Duration::from_secs(self.config.large_payload_min_secs));
            durability = durability.max(Durability::Long);
        }

        Classification { ttl: Some(ttl), durability }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind: ContentKind) -> EntryMetadata {
        EntryMetadata::new("https://example.com/", kind)
    }

    #[test]
    fn test_classify_table() {
        let policy = TtlPolicy::default();

        let c = policy.classify(&meta(ContentKind::StructuralSelector), 100);
        assert_eq!(c.ttl, Some(Duration::from_secs(86_400)));
        assert_eq!(c.durability, Durability::Long);

        let c = policy.classify(&meta(ContentKind::TextSelector), 100);
        assert_eq!(c.ttl, Some(Duration::from_secs(1_800)));
        assert_eq!(c.durability, Durability::Short);

        let c = policy.classify(&meta(ContentKind::Page), 100);
        assert_eq!(c.ttl, Some(Duration::from_secs(3_600)));
        assert_eq!(c.durability, Durability::Long);

        let c = policy.classify(&meta(ContentKind::SearchHistory), 100);
        assert_eq!(c.ttl, None);
        assert_eq!(c.durability, Durability::Permanent);
    }

    #[test]
    fn test_large_payload_promoted() {
        let policy = TtlPolicy::default();
        let c = policy.classify(&meta(ContentKind::TextSelector), 10 * 1024);
        assert_eq!(c.ttl, Some(Duration::from_secs(3_600)));
        assert_eq!(c.durability, Durability::Long);

        let c = policy.classify(&meta(ContentKind::StructuralSelector), 50 * 1024);
        assert_eq!(c.ttl, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_dynamic_never_cached() {
        let policy = TtlPolicy::default();
        let c = policy.classify(&meta(ContentKind::Dynamic), 1024 * 1024);
        assert_eq!(c.durability, Durability::Ephemeral);
        assert_eq!(c.ttl, Some(Duration::ZERO));
    }

    #[test]
    fn test_configured_values() {
        let policy = TtlPolicy::new(TtlConfig { text_secs: 7_200, ..Default::default() });
        let c = policy.classify(&meta(ContentKind::TextSelector), 10);
        assert_eq!(c.durability, Durability::Long);
    }

    #[test]
    fn test_durability_order() {
        assert!(Durability::Ephemeral < Durability::Short);
        assert!(Durability::Long < Durability::Permanent);
        assert!(Durability::Long.writes_l2());
        assert!(!Durability::Short.writes_l2());
    }

    #[test]
    fn test_infer() {
        use OperationKind::*;
        assert_eq!(ContentKind::infer("https://duckduckgo.com/?q=rust", None, Navigate), ContentKind::Dynamic);
        assert_eq!(ContentKind::infer("https://example.com/api/v1/x", None, Extract), ContentKind::Dynamic);
        assert_eq!(ContentKind::infer("https://shop.com/item", Some(".price"), ResolveSelector), ContentKind::Dynamic);
        assert_eq!(
            ContentKind::infer("https://example.com", Some("nav > ul"), ResolveSelector),
            ContentKind::StructuralSelector
        );
        assert_eq!(ContentKind::infer("https://example.com", Some("h1"), Extract), ContentKind::TextSelector);
        assert_eq!(ContentKind::infer("https://example.com", Some("div.body"), Extract), ContentKind::Page);
        assert_eq!(ContentKind::infer("https://example.com/docs", None, Navigate), ContentKind::Page);
        assert_eq!(ContentKind::infer("https://example.com", None, Workflow), ContentKind::WorkflowState);
    }

    #[test]
    fn test_infer_feed_and_socket_urls() {
        use OperationKind::*;
        for url in [
            "https://example.com/ajax/cart",
            "https://example.com/stream/events",
            "https://example.com/ws/chat",
            "https://example.com/feed/",
            "https://example.com/RSS/news",
            "https://example.com/data/items.json?page=2",
            "https://example.com/sitemap.XML",
        ] {
            assert_eq!(ContentKind::infer(url, None, Navigate), ContentKind::Dynamic, "{url}");
        }
        assert_eq!(ContentKind::infer("https://json.example.com/docs", None, Navigate), ContentKind::Page);
        assert_eq!(ContentKind::infer("https://example.com/feeds-overview", None, Navigate), ContentKind::Page);
    }
}
