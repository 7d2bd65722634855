//! Item pool loading and selection resolution.
//!
//! The pool for a date is the union of every configured source type.
//! Each type is read from the cache first and fetched upstream on a miss;
//! a type that can't be loaded contributes nothing rather than failing the
//! whole pool.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::adapters::{CacheStore, SourceFetcher};
use crate::domain::{CandidateItem, DigestError, ItemKind, ItemRef};

/// Separator placed between and around rendered items in the seed text
pub const ITEM_SEPARATOR: &str = "\n\n------\n\n";

/// Items for one date, grouped by source type
#[derive(Debug, Clone, Default)]
pub struct ItemPool {
    by_source: HashMap<String, Vec<CandidateItem>>,
}

impl ItemPool {
    pub fn from_items(source_type: impl Into<String>, items: Vec<CandidateItem>) -> Self {
        let mut pool = Self::default();
        pool.by_source.insert(source_type.into(), items);
        pool
    }

    /// Items of one source type, in upstream order
    pub fn items(&self, source_type: &str) -> &[CandidateItem] {
        self.by_source.get(source_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_source.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find an item by reference
    ///
    /// Looks in the source type named by the reference's kind first, then
    /// everywhere else, and matches on both kind and id.
    pub fn find(&self, item_ref: &ItemRef) -> Option<&CandidateItem> {
        let matches = |item: &&CandidateItem| item.kind == item_ref.kind && item.id == item_ref.id;

        self.items(item_ref.kind.as_str())
            .iter()
            .find(matches)
            .or_else(|| self.by_source.values().flatten().find(matches))
    }
}

/// Cache key for a date's items of one source type
pub fn cache_key(date: &str, source_type: &str) -> String {
    format!("{}-{}", date, source_type)
}

/// Load every source type concurrently
pub async fn load_pool(
    date: &str,
    source_types: &[String],
    cache: &dyn CacheStore,
    fetcher: &dyn SourceFetcher,
) -> ItemPool {
    let loads = source_types
        .iter()
        .map(|source_type| load_source(date, source_type, cache, fetcher));

    let results = join_all(loads).await;

    let mut pool = ItemPool::default();
    for (source_type, result) in source_types.iter().zip(results) {
        match result {
            Ok(items) => {
                info!(source_type = %source_type, count = items.len(), "Loaded items");
                pool.by_source.insert(source_type.clone(), items);
            }
            Err(e) => {
                warn!(source_type = %source_type, error = %e, "Source unavailable, continuing without it");
                pool.by_source.insert(source_type.clone(), Vec::new());
            }
        }
    }

    pool
}

async fn load_source(
    date: &str,
    source_type: &str,
    cache: &dyn CacheStore,
    fetcher: &dyn SourceFetcher,
) -> Result<Vec<CandidateItem>, DigestError> {
    let key = cache_key(date, source_type);
    let upstream = |message: String| DigestError::UpstreamFetch {
        source_type: source_type.to_string(),
        message,
    };

    match cache.get(&key).await {
        Ok(Some(value)) => {
            let (items, skipped) = CandidateItem::from_json_list(&value);
            if skipped > 0 {
                warn!(key = %key, skipped, "Skipped malformed cached items");
            }
            if !items.is_empty() {
                debug!(key = %key, count = items.len(), "Cache hit");
                return Ok(items);
            }
        }
        Ok(None) => debug!(key = %key, "Cache miss"),
        Err(e) => warn!(key = %key, error = %e, "Cache read failed, fetching upstream"),
    }

    let items = fetcher
        .fetch(source_type)
        .await
        .map_err(|e| upstream(format!("{:#}", e)))?;

    if !items.is_empty() {
        match serde_json::to_value(&items) {
            Ok(value) => {
                if let Err(e) = cache.put(&key, &value).await {
                    warn!(key = %key, error = %e, "Cache write failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to encode items for cache"),
        }
    }

    Ok(items)
}

/// Resolve `"type:id"` strings against the pool
///
/// Malformed or unknown references are skipped with a warning, repeats
/// keep their first position. Fails with `Validation` when nothing resolves.
pub fn resolve_selection<S: AsRef<str>>(refs: &[S], pool: &ItemPool) -> Result<Vec<CandidateItem>, DigestError> {
    let mut resolved = Vec::with_capacity(refs.len());
    let mut seen: HashSet<ItemRef> = HashSet::new();

    for raw in refs {
        let raw = raw.as_ref();
        let item_ref: ItemRef = match raw.parse() {
            Ok(item_ref) => item_ref,
            Err(e) => {
                warn!(reference = raw, error = %e, "Skipping malformed reference");
                continue;
            }
        };

        if seen.contains(&item_ref) {
            debug!(reference = raw, "Skipping repeated reference");
            continue;
        }

        match pool.find(&item_ref) {
            Some(item) => {
                seen.insert(item_ref);
                resolved.push(item.clone());
            }
            None => warn!(reference = raw, "Skipping reference not found in pool"),
        }
    }

    if resolved.is_empty() {
        return Err(DigestError::validation(format!(
            "None of the {} selected references matched an item",
            refs.len()
        )));
    }

    Ok(resolved)
}

/// Render items into the seed text for the first stage
///
/// Every item is framed by separators, including before the first and
/// after the last.
pub fn render_seed(items: &[CandidateItem]) -> String {
    if items.is_empty() {
        return String::new();
    }

    let rendered: Vec<String> = items.iter().map(CandidateItem::render_for_prompt).collect();
    format!("{sep}{}{sep}", rendered.join(ITEM_SEPARATOR), sep = ITEM_SEPARATOR)
}

/// Kinds present in a list of items (for log lines)
pub fn kinds_of(items: &[CandidateItem]) -> Vec<ItemKind> {
    let mut kinds: Vec<ItemKind> = Vec::new();
    for item in items {
        if !kinds.contains(&item.kind) {
            kinds.push(item.kind.clone());
        }
    }
    kinds
}
