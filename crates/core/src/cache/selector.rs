//! Selector strategies and canonical selector text.
//!
//! Two selectors that locate the same elements through trivially different
//! spellings (whitespace, attribute quoting, order of comma groups) must map
//! to the same cache key and the same tracker record.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Element-locating mechanism used by a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    Css,
    #[serde(rename = "xpath")]
    XPath,
    Text,
}

impl SelectorStrategy {
    /// Guess the strategy from the expression itself.
    ///
    /// `text=` prefixes are text rules; expressions rooted at `/`, `./`, `..`
    /// or `(` are XPath; everything else is CSS.
    pub fn infer(expr: &str) -> Self {
        let trimmed = expr.trim_start();
        if trimmed.starts_with("text=") {
            SelectorStrategy::Text
        } else if trimmed.starts_with('/') || trimmed.starts_with("./") || trimmed.starts_with("..") || trimmed.starts_with('(') {
            SelectorStrategy::XPath
        } else {
            SelectorStrategy::Css
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorStrategy::Css => "css",
            SelectorStrategy::XPath => "xpath",
            SelectorStrategy::Text => "text",
        }
    }
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "css" => Ok(SelectorStrategy::Css),
            "xpath" => Ok(SelectorStrategy::XPath),
            "text" => Ok(SelectorStrategy::Text),
            other => Err(Error::InvalidInput(format!("unknown selector strategy: {other}"))),
        }
    }
}

/// Broad role of the element a selector targets.
///
/// `General` matches every selector. The other kinds match selectors that
/// mention one of their hints: single-letter tags (`a`, `p`) must appear as a
/// whole word, longer hints anywhere in the lower-cased text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    #[default]
    General,
    Navigation,
    Content,
    Forms,
    Links,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::General => "general",
            ElementType::Navigation => "navigation",
            ElementType::Content => "content",
            ElementType::Forms => "forms",
            ElementType::Links => "links",
        }
    }

    fn hints(&self) -> &'static [&'static str] {
        match self {
            ElementType::General => &[],
            ElementType::Navigation => &["nav", "header", "footer", "menu"],
            ElementType::Content => &["article", "main", ".content", "p"],
            ElementType::Forms => &["form", "input", "button", "select"],
            ElementType::Links => &["a", "link"],
        }
    }

    /// Whether `selector` plausibly targets this kind of element.
    pub fn matches(&self, selector: &str) -> bool {
        let hints = self.hints();
        if hints.is_empty() {
            return true;
        }
        let lowered = selector.to_lowercase();
        hints.iter().any(|h| {
            if h.len() > 1 {
                lowered.contains(h)
            } else {
                lowered.split(|c: char| !c.is_ascii_alphanumeric()).any(|word| word == *h)
            }
        })
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest selector accepted, in bytes.
pub const MAX_SELECTOR_LEN: usize = 4_096;

/// Deepest parenthesis nesting accepted in a CSS selector.
pub const MAX_NESTING: usize = 16;

/// Canonicalize a selector expression for the given strategy.
///
/// # Errors
///
/// Returns `Error::InvalidKey` for empty or overlong selectors, for
/// unbalanced brackets, parentheses or quotes, and for CSS nested deeper
/// than `MAX_NESTING` parentheses.
pub fn canonicalize_selector(expr: &str, strategy: SelectorStrategy) -> Result<String, Error> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidKey("empty selector".into()));
    }
    if trimmed.len() > MAX_SELECTOR_LEN {
        return Err(Error::InvalidKey(format!(
            "selector of {} bytes exceeds the {MAX_SELECTOR_LEN} byte limit",
            trimmed.len()
        )));
    }

    match strategy {
        SelectorStrategy::Css => {
            let canonical = canonical_css(trimmed, 0)?;
            if canonical.is_empty() {
                return Err(Error::InvalidKey(format!("selector has no groups: {trimmed}")));
            }
            Ok(canonical)
        }
        SelectorStrategy::XPath => canonical_xpath(trimmed),
        SelectorStrategy::Text => Ok(collapse_whitespace(trimmed)),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn unbalanced(what: &str, expr: &str) -> Error {
    Error::InvalidKey(format!("unbalanced {what} in selector: {expr}"))
}

/// Index just past the quoted literal starting at `start`.
fn skip_quoted(chars: &[char], start: usize) -> Option<usize> {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Index of the bracket closing the one opened at `start`.
fn find_close(chars: &[char], start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            i = skip_quoted(chars, i)?;
            continue;
        }
        if c == '\\' {
            i += 2;
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Split on `sep` where it is not nested in brackets, parentheses or quotes.
fn split_top_level(expr: &str, sep: char) -> Result<Vec<String>, Error> {
    let chars: Vec<char> = expr.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let end = match c {
            '"' | '\'' => skip_quoted(&chars, i).ok_or_else(|| unbalanced("quote", expr))?,
            '[' => find_close(&chars, i, '[', ']').ok_or_else(|| unbalanced("bracket", expr))? + 1,
            '(' => find_close(&chars, i, '(', ')').ok_or_else(|| unbalanced("parenthesis", expr))? + 1,
            '\\' => (i + 2).min(chars.len()),
            c if c == sep => {
                parts.push(std::mem::take(&mut current));
                i += 1;
                continue;
            }
            _ => i + 1,
        };
        current.extend(&chars[i..end]);
        i = end;
    }
    parts.push(current);
    Ok(parts)
}

fn canonical_css(expr: &str, depth: usize) -> Result<String, Error> {
    if depth > MAX_NESTING {
        return Err(Error::InvalidKey(format!("selector nested deeper than {MAX_NESTING} levels")));
    }
    let mut groups = split_top_level(expr, ',')?
        .iter()
        .map(|group| canonical_compound(group.trim(), depth))
        .collect::<Result<Vec<_>, _>>()?;
    groups.retain(|g| !g.is_empty());
    groups.sort();
    groups.dedup();
    Ok(groups.join(","))
}

fn canonical_compound(group: &str, depth: usize) -> Result<String, Error> {
    let chars: Vec<char> = group.chars().collect();
    let mut out = String::with_capacity(group.len());
    let mut pending_space = false;
    let mut i = 0;

    let flush = |out: &mut String, pending: &mut bool| {
        if *pending && !out.is_empty() && !out.ends_with(' ') {
            out.push(' ');
        }
        *pending = false;
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                pending_space = true;
                i += 1;
            }
            '>' | '+' | '~' => {
                while out.ends_with(' ') {
                    out.pop();
                }
                out.push(' ');
                out.push(c);
                out.push(' ');
                pending_space = false;
                i += 1;
            }
            '[' => {
                flush(&mut out, &mut pending_space);
                let end = find_close(&chars, i, '[', ']').ok_or_else(|| unbalanced("bracket", group))?;
                let inner: String = chars[i + 1..end].iter().collect();
                out.push_str(&canonical_attribute(&inner, group)?);
                i = end + 1;
            }
            '(' => {
                flush(&mut out, &mut pending_space);
                let end = find_close(&chars, i, '(', ')').ok_or_else(|| unbalanced("parenthesis", group))?;
                let inner: String = chars[i + 1..end].iter().collect();
                out.push('(');
                out.push_str(&canonical_css(inner.trim(), depth + 1)?);
                out.push(')');
                i = end + 1;
            }
            '"' | '\'' => {
                flush(&mut out, &mut pending_space);
                let end = skip_quoted(&chars, i).ok_or_else(|| unbalanced("quote", group))?;
                out.extend(&chars[i..end]);
                i = end;
            }
            '\\' => {
                flush(&mut out, &mut pending_space);
                let end = (i + 2).min(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            ')' | ']' => return Err(unbalanced("closing delimiter", group)),
            _ => {
                flush(&mut out, &mut pending_space);
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out.trim().to_string())
}

/// Canonical `[name op value flags]` with the value unquoted when it is an identifier.
fn canonical_attribute(inner: &str, group: &str) -> Result<String, Error> {
    let chars: Vec<char> = inner.trim().chars().collect();
    let mut i = 0;
    let mut name = String::new();
    while i < chars.len() {
        let c = chars[i];
        let is_op = c == '=' || (matches!(c, '~' | '|' | '^' | '$' | '*') && chars.get(i + 1) == Some(&'='));
        if is_op || c.is_whitespace() {
            break;
        }
        name.push(c);
        i += 1;
    }
    if name.is_empty() {
        return Err(Error::InvalidKey(format!("attribute selector without a name: {group}")));
    }

    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if i == chars.len() {
        return Ok(format!("[{name}]"));
    }

    let mut op = String::new();
    if chars[i] != '=' {
        op.push(chars[i]);
        i += 1;
    }
    if chars.get(i) != Some(&'=') {
        return Err(Error::InvalidKey(format!("malformed attribute selector: {group}")));
    }
    op.push('=');
    i += 1;

    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }

    let value = match chars.get(i) {
        Some('"') | Some('\'') => {
            let end = skip_quoted(&chars, i).ok_or_else(|| unbalanced("quote", group))?;
            let raw: String = chars[i + 1..end - 1].iter().collect();
            i = end;
            raw
        }
        _ => {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            chars[start..i].iter().collect()
        }
    };

    let flags: String = chars[i..].iter().collect::<String>().trim().to_ascii_lowercase();

    let value = if is_css_identifier(&value) { value } else { format!("\"{}\"", value.replace('"', "\\\"")) };
    if flags.is_empty() { Ok(format!("[{name}{op}{value}]")) } else { Ok(format!("[{name}{op}{value} {flags}]")) }
}

fn is_css_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let ident_char = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii();
    let start_ok = match first {
        '-' => value.chars().nth(1).is_some_and(|c| !c.is_ascii_digit() && ident_char(c)),
        c => c.is_ascii_alphabetic() || c == '_' || !c.is_ascii(),
    };
    start_ok && chars.all(ident_char)
}

fn canonical_xpath(expr: &str) -> Result<String, Error> {
    const PUNCT: &[char] = &['/', '[', ']', '(', ')', '=', ',', '|', '!', '<', '>'];

    let chars: Vec<char> = expr.chars().collect();
    let mut out = String::with_capacity(expr.len());
    let mut pending_space = false;
    let mut after_punct = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }
        if PUNCT.contains(&c) {
            out.push(c);
            pending_space = false;
            after_punct = true;
            i += 1;
            continue;
        }
        if pending_space && !after_punct && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        after_punct = false;

        if c == '"' || c == '\'' {
            let end = chars[i + 1..]
                .iter()
                .position(|&q| q == c)
                .map(|p| i + 1 + p)
                .ok_or_else(|| unbalanced("quote", expr))?;
            let literal: String = chars[i + 1..end].iter().collect();
            if literal.contains('\'') {
                out.push('"');
                out.push_str(&literal);
                out.push('"');
            } else {
                out.push('\'');
                out.push_str(&literal);
                out.push('\'');
            }
            i = end + 1;
        } else {
            out.push(c);
            i += 1;
        }
    }

    Ok(out)
}
