//! Canonical cache key generation.
//!
//! A key is `<operation>:<sha256 hex>` over length-prefixed components, so
//! no component can bleed into its neighbour.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::selector::{SelectorStrategy, canonicalize_selector};
use crate::Error;
use crate::config::AppConfig;

/// The browser operation whose result is being memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Navigate,
    Extract,
    ResolveSelector,
    SearchHistory,
    Workflow,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Navigate,
        OperationKind::Extract,
        OperationKind::ResolveSelector,
        OperationKind::SearchHistory,
        OperationKind::Workflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Navigate => "navigate",
            OperationKind::Extract => "extract",
            OperationKind::ResolveSelector => "resolve_selector",
            OperationKind::SearchHistory => "search_history",
            OperationKind::Workflow => "workflow",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "navigate" => Ok(OperationKind::Navigate),
            "extract" => Ok(OperationKind::Extract),
            "resolve_selector" => Ok(OperationKind::ResolveSelector),
            "search_history" => Ok(OperationKind::SearchHistory),
            "workflow" => Ok(OperationKind::Workflow),
            other => Err(Error::InvalidKey(format!("unknown operation kind: {other}"))),
        }
    }
}

/// Opaque, canonical cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Re-validate a key previously produced by [`KeyNormalizer::normalize`].
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if the string is not `<operation>:<64 hex chars>`.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (op, digest) = raw
            .split_once(':')
            .ok_or_else(|| Error::InvalidKey(format!("not a cache key: {raw}")))?;
        op.parse::<OperationKind>()?;
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return Err(Error::InvalidKey(format!("not a cache key: {raw}")));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps raw (URL, selector, operation) triples onto canonical keys.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    excluded_params: HashSet<String>,
    param_sensitive_domains: Vec<String>,
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl KeyNormalizer {
    pub fn new<P, D>(excluded_params: P, param_sensitive_domains: D) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            excluded_params: excluded_params.into_iter().map(|p| p.as_ref().to_lowercase()).collect(),
            param_sensitive_domains: param_sensitive_domains
                .into_iter()
                .map(|d| d.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.excluded_query_params, &config.param_sensitive_domains)
    }

    /// Canonicalize a URL.
    ///
    /// Normalization steps:
    /// 1. Trim whitespace and default the scheme to https:// if missing
    /// 2. Lowercase scheme and host, drop default ports and the fragment
    /// 3. Collapse duplicate slashes and drop a trailing slash (root excepted)
    /// 4. Drop excluded query parameters unless the host is parameter-sensitive
    /// 5. Sort the remaining query pairs
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` for empty input, unparsable URLs, URLs
    /// without a host and schemes other than http/https.
    pub fn normalize_url(&self, input: &str) -> Result<Url, Error> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidKey("empty URL".into()));
        }

        let url_str = if trimmed.contains("://") {
            trimmed.to_string()
        } else if let Some(rest) = trimmed.strip_prefix("//") {
            format!("https://{rest}")
        } else {
            format!("https://{trimmed}")
        };

        let mut parsed = Url::parse(&url_str).map_err(|e| Error::InvalidKey(format!("{trimmed}: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidKey(format!("unsupported scheme: {scheme}"))),
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .map(str::to_lowercase)
            .ok_or_else(|| Error::InvalidKey(format!("URL has no host: {trimmed}")))?;
        parsed
            .set_host(Some(&host))
            .map_err(|e| Error::InvalidKey(e.to_string()))?;

        parsed.set_fragment(None);

        let path = collapse_path(parsed.path());
        parsed.set_path(&path);

        if parsed.query().is_some() {
            let sensitive = self.is_param_sensitive(&host);
            let mut pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| sensitive || !self.excluded_params.contains(&k.to_lowercase()))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            pairs.sort();

            if pairs.is_empty() {
                parsed.set_query(None);
            } else {
                parsed.query_pairs_mut().clear().extend_pairs(&pairs);
            }
        }

        Ok(parsed)
    }

    /// Produce the canonical key for a request.
    ///
    /// An empty selector is treated as no selector.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if the URL or selector is malformed.
    pub fn normalize(&self, url: &str, selector: Option<&str>, operation: OperationKind) -> Result<CacheKey, Error> {
        let normalized = self.normalize_url(url)?;

        let (strategy, canonical) = match selector.map(str::trim).filter(|s| !s.is_empty()) {
            Some(expr) => {
                let strategy = SelectorStrategy::infer(expr);
                (strategy.as_str(), canonicalize_selector(expr, strategy)?)
            }
            None => ("", String::new()),
        };

        let digest = digest_components(&[operation.as_str(), normalized.as_str(), strategy, &canonical]);
        Ok(CacheKey(format!("{}:{digest}", operation.as_str())))
    }

    fn is_param_sensitive(&self, host: &str) -> bool {
        self.param_sensitive_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

/// Lower-cased host of a URL, or of a bare domain string. Ports are dropped.
pub fn normalize_domain(raw: &str) -> String {
    let trimmed = raw.trim();
    let host = match Url::parse(trimmed) {
        Ok(url) if url.host_str().is_some() => url.host_str().unwrap_or_default().to_string(),
        _ => strip_port(trimmed.split(['/', '?', '#']).next().unwrap_or_default()).to_string(),
    };
    host.trim_end_matches('.').to_lowercase()
}

/// `host:port` to `host`; bracketed IPv6 literals keep their brackets.
fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return authority.find(']').map_or(authority, |end| &authority[..=end]);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    }
}

fn collapse_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn digest_components(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
