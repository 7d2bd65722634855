//! Candidate items from the daily feed.
//!
//! Items are produced by the upstream fetcher and cached per source type.
//! The core only reads them: it parses their timestamps, filters on their
//! titles, and renders them into prompt text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Kind of a feed item
///
/// The known kinds each get their own prompt rendering; anything else falls
/// back to a generic layout under `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemKind {
    News,
    Project,
    Paper,
    SocialMedia,
    Other(String),
}

impl ItemKind {
    /// Wire name, as used in `type:id` references and cache keys
    pub fn as_str(&self) -> &str {
        match self {
            ItemKind::News => "news",
            ItemKind::Project => "project",
            ItemKind::Paper => "paper",
            ItemKind::SocialMedia => "socialMedia",
            ItemKind::Other(name) => name,
        }
    }
}

impl From<String> for ItemKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "news" => ItemKind::News,
            "project" => ItemKind::Project,
            "paper" => ItemKind::Paper,
            "socialMedia" => ItemKind::SocialMedia,
            _ => ItemKind::Other(s),
        }
    }
}

impl From<&str> for ItemKind {
    fn from(s: &str) -> Self {
        ItemKind::from(s.to_string())
    }
}

impl From<ItemKind> for String {
    fn from(kind: ItemKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific payload of an item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDetails {
    /// HTML body (news, papers, posts)
    #[serde(default)]
    pub content_html: Option<String>,

    /// Star count (projects); upstream sends either a number or a string
    #[serde(default, rename = "totalStars")]
    pub total_stars: Option<serde_json::Value>,
}

/// A single item in the fetched pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Upstream identifier (numbers are normalized to strings)
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,

    /// Item kind
    #[serde(rename = "type")]
    pub kind: ItemKind,

    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,

    /// Raw publication timestamp; may be missing or malformed
    #[serde(default)]
    pub published_date: Option<String>,

    /// Secondary timestamp field some sources use instead
    #[serde(default)]
    pub date: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Author name(s); a string or a list depending on the source
    #[serde(default)]
    pub authors: Option<serde_json::Value>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub details: ItemDetails,
}

impl CandidateItem {
    /// Create a minimal item (used by fixtures and tests)
    pub fn new(
        kind: impl Into<ItemKind>,
        id: impl Into<String>,
        title: impl Into<String>,
        published: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            title: title.into(),
            published_date: published.map(str::to_string),
            date: None,
            url: String::new(),
            description: None,
            authors: None,
            source: None,
            details: ItemDetails::default(),
        }
    }

    /// Items from a JSON list, skipping entries that don't deserialize
    ///
    /// Accepts a bare array or an object wrapping one under `items` or
    /// `data`. Returns the items and the number of entries skipped.
    pub fn from_json_list(value: &serde_json::Value) -> (Vec<CandidateItem>, usize) {
        let entries: &[serde_json::Value] = match value {
            serde_json::Value::Array(entries) => entries.as_slice(),
            serde_json::Value::Object(map) => match map.get("items").or_else(|| map.get("data")) {
                Some(serde_json::Value::Array(entries)) => entries.as_slice(),
                _ => &[],
            },
            _ => &[],
        };

        let mut skipped = 0;
        let items = entries
            .iter()
            .filter_map(|entry| match CandidateItem::deserialize(entry) {
                Ok(item) => Some(item),
                Err(_) => {
                    skipped += 1;
                    None
                }
            })
            .collect();

        (items, skipped)
    }

    /// Reference to this item
    pub fn item_ref(&self) -> ItemRef {
        ItemRef::new(self.kind.clone(), self.id.clone())
    }

    /// Raw timestamp string, preferring `published_date` over `date`
    pub fn published_raw(&self) -> Option<&str> {
        self.published_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.date.as_deref().filter(|s| !s.trim().is_empty()))
    }

    /// Parsed publication time, if present and well-formed
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_raw().and_then(parse_timestamp)
    }

    /// Title shortened for log lines
    pub fn short_title(&self, max_chars: usize) -> String {
        truncate_chars(&self.title, max_chars)
    }

    /// Render the item as prompt text, one layout per kind
    pub fn render_for_prompt(&self) -> String {
        let published = self.published_raw().unwrap_or("");
        let content = self
            .details
            .content_html
            .as_deref()
            .map(strip_html)
            .unwrap_or_default();

        match &self.kind {
            ItemKind::News => format!(
                "News Title: {}\nPublished: {}\nUrl: {}\nContent Summary: {}",
                self.title, published, self.url, content
            ),
            ItemKind::Project => format!(
                "Project Name: {}\nPublished: {}\nUrl: {}\nDescription: {}\nStars: {}",
                self.title,
                published,
                self.url,
                self.description.as_deref().unwrap_or(""),
                self.details
                    .total_stars
                    .as_ref()
                    .map(json_scalar_text)
                    .unwrap_or_default()
            ),
            ItemKind::Paper => format!(
                "Papers Title: {}\nPublished: {}\nUrl: {}\nAbstract/Content Summary: {}",
                self.title, published, self.url, content
            ),
            ItemKind::SocialMedia => format!(
                "socialMedia Post by {}: Published: {}\nUrl: {}\nContent: {}",
                self.authors
                    .as_ref()
                    .map(json_scalar_text)
                    .unwrap_or_default(),
                published,
                self.url,
                content
            ),
            ItemKind::Other(kind) => {
                let mut text = format!(
                    "Type: {}\nTitle: {}\nDescription: {}\nURL: {}",
                    kind,
                    non_empty_or_na(&self.title),
                    self.description.as_deref().map(non_empty_or_na).unwrap_or("N/A"),
                    non_empty_or_na(&self.url)
                );
                if let Some(published) = self.published_raw() {
                    text.push_str(&format!("\nPublished: {}", published));
                }
                if let Some(source) = self.source.as_deref().filter(|s| !s.is_empty()) {
                    text.push_str(&format!("\nSource: {}", source));
                }
                if !content.is_empty() {
                    text.push_str(&format!("\nContent: {}", content));
                }
                text
            }
        }
    }
}

/// A `type:id` reference to an item in the pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: String,
}

/// Error for malformed `type:id` references
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid item reference '{0}': expected \"type:id\"")]
pub struct InvalidItemRef(pub String);

impl ItemRef {
    pub fn new(kind: impl Into<ItemKind>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl std::str::FromStr for ItemRef {
    type Err = InvalidItemRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| InvalidItemRef(s.to_string()))?;

        if kind.is_empty() || id.is_empty() {
            return Err(InvalidItemRef(s.to_string()));
        }

        Ok(ItemRef::new(kind, id))
    }
}

impl std::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Parse a feed timestamp into UTC
///
/// Accepts RFC 3339, RFC 2822, and naive `YYYY-MM-DD[ HH:MM:SS]` forms
/// (naive values are taken as UTC). Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Wide enough that html2text never hard-wraps a line we then rejoin
const HTML_RENDER_WIDTH: usize = 10_000;

/// Render an HTML fragment as single-line plain text
pub fn strip_html(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), HTML_RENDER_WIDTH).unwrap_or_default();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate on character boundaries, appending "..." when shortened
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

fn non_empty_or_na(s: &str) -> &str {
    if s.is_empty() {
        "N/A"
    } else {
        s
    }
}

fn json_scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(values) => values
            .iter()
            .map(json_scalar_text)
            .collect::<Vec<_>>()
            .join(", "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Accept strings, numbers, and null where a string is expected
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}
