//! Item filtering and selection.
//!
//! Rules run in a fixed order for every item: timestamp validity, recency
//! window, title dedup, block-list, allow-list. The first failing rule
//! rejects the item. Survivors are sorted newest first and capped.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::item::truncate_chars;
use crate::domain::{CandidateItem, ItemRef};

/// Characters of the title kept in rejection records
const TITLE_PREVIEW_CHARS: usize = 30;

/// Selection rules for one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRules {
    /// Maximum item age in hours
    pub recency_hours: i64,

    pub max_items: usize,

    /// Title must contain one of these (case-insensitive); empty accepts all
    pub allow_keywords: Vec<String>,

    /// Title must contain none of these (case-insensitive)
    pub block_keywords: Vec<String>,

    /// Rejections beyond this count are logged at debug only
    pub log_limit: usize,
}

impl Default for SelectionRules {
    fn default() -> Self {
        Self {
            recency_hours: 48,
            max_items: 30,
            allow_keywords: Vec::new(),
            block_keywords: Vec::new(),
            log_limit: 20,
        }
    }
}

/// Why an item was not selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectReason {
    MissingTimestamp,
    InvalidTimestamp { raw: String },
    TooOld { age_hours: i64 },
    DuplicateTitle,
    Blocked { keyword: String },
    NoAllowedKeyword,
    DuplicateRef,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingTimestamp => write!(f, "no timestamp"),
            RejectReason::InvalidTimestamp { raw } => write!(f, "unparseable timestamp '{}'", raw),
            RejectReason::TooOld { age_hours } => write!(f, "too old ({}h)", age_hours),
            RejectReason::DuplicateTitle => write!(f, "duplicate title"),
            RejectReason::Blocked { keyword } => write!(f, "blocked keyword '{}'", keyword),
            RejectReason::NoAllowedKeyword => write!(f, "no allowed keyword"),
            RejectReason::DuplicateRef => write!(f, "duplicate item reference"),
        }
    }
}

/// A rejected item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub item_ref: ItemRef,
    /// Title truncated for display
    pub title: String,
    pub reason: RejectReason,
}

/// Outcome of a selection pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionReport {
    /// Selected references, newest first, no duplicates
    pub selected: Vec<ItemRef>,

    pub rejections: Vec<Rejection>,

    /// Number of items examined
    pub considered: usize,

    /// Accepted items dropped by the `max_items` cap
    pub over_cap: usize,
}

impl SelectionReport {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Selected references as `"type:id"` strings
    pub fn ref_strings(&self) -> Vec<String> {
        self.selected.iter().map(ToString::to_string).collect()
    }
}

/// Run one selection pass over `pool`
///
/// `now` is captured once by the caller so every item is judged against
/// the same instant.
pub fn select(pool: &[CandidateItem], rules: &SelectionRules, now: DateTime<Utc>) -> SelectionReport {
    // Windows too large for chrono impose no age limit
    let window = Duration::try_hours(rules.recency_hours);
    let allow: Vec<String> = lowercase_all(&rules.allow_keywords);
    let block: Vec<String> = lowercase_all(&rules.block_keywords);

    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut seen_refs: HashSet<ItemRef> = HashSet::new();
    let mut accepted: Vec<(DateTime<Utc>, ItemRef)> = Vec::new();
    let mut rejections = Vec::new();

    for item in pool {
        let verdict = judge(item, now, window, &allow, &block, &seen_titles, &seen_refs);

        match verdict {
            Ok(published_at) => {
                seen_titles.insert(normalize_title(&item.title));
                seen_refs.insert(item.item_ref());
                accepted.push((published_at, item.item_ref()));
            }
            Err(reason) => {
                let rejection = Rejection {
                    item_ref: item.item_ref(),
                    title: truncate_chars(&item.title, TITLE_PREVIEW_CHARS),
                    reason,
                };
                if rejections.len() < rules.log_limit {
                    info!(item = %rejection.item_ref, title = %rejection.title, reason = %rejection.reason, "Rejected item");
                } else {
                    debug!(item = %rejection.item_ref, title = %rejection.title, reason = %rejection.reason, "Rejected item");
                }
                rejections.push(rejection);
            }
        }
    }

    // Stable, so equal timestamps keep pool order
    accepted.sort_by(|a, b| b.0.cmp(&a.0));

    let over_cap = accepted.len().saturating_sub(rules.max_items);
    let selected: Vec<ItemRef> = accepted
        .into_iter()
        .take(rules.max_items)
        .map(|(_, item_ref)| item_ref)
        .collect();

    info!(
        considered = pool.len(),
        selected = selected.len(),
        rejected = rejections.len(),
        over_cap,
        "Selection complete"
    );

    SelectionReport {
        selected,
        rejections,
        considered: pool.len(),
        over_cap,
    }
}

fn judge(
    item: &CandidateItem,
    now: DateTime<Utc>,
    window: Option<Duration>,
    allow: &[String],
    block: &[String],
    seen_titles: &HashSet<String>,
    seen_refs: &HashSet<ItemRef>,
) -> Result<DateTime<Utc>, RejectReason> {
    let raw = item.published_raw().ok_or(RejectReason::MissingTimestamp)?;
    let published_at = item
        .published_at()
        .ok_or_else(|| RejectReason::InvalidTimestamp { raw: raw.to_string() })?;

    let age = now - published_at;
    if window.is_some_and(|window| age > window) {
        return Err(RejectReason::TooOld {
            age_hours: age.num_hours(),
        });
    }

    let title = normalize_title(&item.title);
    if seen_titles.contains(&title) {
        return Err(RejectReason::DuplicateTitle);
    }

    if let Some(keyword) = block.iter().find(|k| title.contains(k.as_str())) {
        return Err(RejectReason::Blocked {
            keyword: keyword.clone(),
        });
    }

    if !allow.is_empty() && !allow.iter().any(|k| title.contains(k.as_str())) {
        return Err(RejectReason::NoAllowedKeyword);
    }

    if seen_refs.contains(&item.item_ref()) {
        return Err(RejectReason::DuplicateRef);
    }

    Ok(published_at)
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn lowercase_all(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
    }

    fn item(id: &str, title: &str, published: Option<&str>) -> CandidateItem {
        CandidateItem::new("news", id, title, published)
    }

    fn rules() -> SelectionRules {
        SelectionRules::default()
    }

    #[test]
    fn test_huge_recency_window_means_no_limit() {
        let pool = vec![item("1", "ancient", Some("1970-01-01")), item("2", "fresh", Some("2024-01-03"))];
        let rules = SelectionRules {
            recency_hours: i64::MAX,
            ..rules()
        };

        assert!(select(&[], &rules, now()).is_empty());
        let report = select(&pool, &rules, now());
        assert_eq!(report.ref_strings(), vec!["news:2", "news:1"]);
    }

    #[test]
    fn test_rejects_missing_and_malformed_timestamps() {
        let pool = vec![
            item("1", "a", None),
            item("2", "b", Some("not a date")),
            item("3", "c", Some("2024-01-03T10:00:00Z")),
        ];

        let report = select(&pool, &rules(), now());
        assert_eq!(report.ref_strings(), vec!["news:3"]);
        assert_eq!(report.rejections[0].reason, RejectReason::MissingTimestamp);
        assert!(matches!(
            report.rejections[1].reason,
            RejectReason::InvalidTimestamp { .. }
        ));
    }

    #[test]
    fn test_recency_window_boundary() {
        let pool = vec![
            item("edge", "exactly 48h", Some("2024-01-01T12:00:00Z")),
            item("old", "48h and a second", Some("2024-01-01T11:59:59Z")),
            item("future", "from tomorrow", Some("2024-01-04T00:00:00Z")),
        ];

        let report = select(&pool, &rules(), now());
        assert_eq!(report.ref_strings(), vec!["news:future", "news:edge"]);
        assert_eq!(
            report.rejections[0].reason,
            RejectReason::TooOld { age_hours: 48 }
        );
    }

    #[test]
    fn test_first_title_wins() {
        let pool = vec![
            item("1", "  Same Title ", Some("2024-01-03T08:00:00Z")),
            item("2", "same title", Some("2024-01-03T09:00:00Z")),
        ];

        let report = select(&pool, &rules(), now());
        assert_eq!(report.ref_strings(), vec!["news:1"]);
        assert_eq!(report.rejections[0].reason, RejectReason::DuplicateTitle);
    }

    #[test]
    fn test_rejected_item_does_not_shadow_later_duplicate() {
        let pool = vec![
            item("1", "Launch", None),
            item("2", "launch", Some("2024-01-03T09:00:00Z")),
        ];

        let report = select(&pool, &rules(), now());
        assert_eq!(report.ref_strings(), vec!["news:2"]);
    }

    #[test]
    fn test_block_list_beats_allow_list() {
        let rules = SelectionRules {
            allow_keywords: vec!["AI".to_string()],
            block_keywords: vec!["Sponsored".to_string()],
            ..rules()
        };
        let pool = vec![
            item("1", "Sponsored AI tool", Some("2024-01-03T08:00:00Z")),
            item("2", "New AI model", Some("2024-01-03T08:00:00Z")),
            item("3", "Weather report", Some("2024-01-03T08:00:00Z")),
        ];

        let report = select(&pool, &rules, now());
        assert_eq!(report.ref_strings(), vec!["news:2"]);
        assert_eq!(
            report.rejections[0].reason,
            RejectReason::Blocked {
                keyword: "sponsored".to_string()
            }
        );
        assert_eq!(report.rejections[1].reason, RejectReason::NoAllowedKeyword);
    }

    #[test]
    fn test_empty_allow_list_accepts_all() {
        let pool = vec![item("1", "anything", Some("2024-01-03T08:00:00Z"))];
        assert_eq!(select(&pool, &rules(), now()).selected.len(), 1);
    }

    #[test]
    fn test_sorted_newest_first_and_capped() {
        let rules = SelectionRules {
            max_items: 2,
            ..rules()
        };
        let pool = vec![
            item("a", "a", Some("2024-01-03T01:00:00Z")),
            item("b", "b", Some("2024-01-03T03:00:00Z")),
            item("c", "c", Some("2024-01-03T02:00:00Z")),
        ];

        let report = select(&pool, &rules, now());
        assert_eq!(report.ref_strings(), vec!["news:b", "news:c"]);
        assert_eq!(report.over_cap, 1);
    }

    #[test]
    fn test_duplicate_refs_dropped() {
        let pool = vec![
            item("1", "first", Some("2024-01-03T01:00:00Z")),
            item("1", "second", Some("2024-01-03T02:00:00Z")),
        ];

        let report = select(&pool, &rules(), now());
        assert_eq!(report.ref_strings(), vec!["news:1"]);
        assert_eq!(report.rejections[0].reason, RejectReason::DuplicateRef);
    }

    #[test]
    fn test_rejection_titles_truncated() {
        let long = "x".repeat(100);
        let pool = vec![item("1", &long, None)];
        let report = select(&pool, &rules(), now());
        assert_eq!(report.rejections[0].title.chars().count(), TITLE_PREVIEW_CHARS + 3);
    }

    #[test]
    fn test_empty_pool() {
        let report = select(&[], &rules(), now());
        assert!(report.is_empty());
        assert_eq!(report.considered, 0);
    }
}
