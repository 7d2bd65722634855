//! HTTP fetcher for upstream feeds.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::SourceFetcher;
use crate::domain::CandidateItem;

/// Fetches a JSON list of items per source type from a configured URL
pub struct HttpFeedFetcher {
    urls: HashMap<String, String>,
    http: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(urls: HashMap<String, String>) -> Self {
        Self {
            urls,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFeedFetcher {
    async fn fetch(&self, source_type: &str) -> Result<Vec<CandidateItem>> {
        let url = self
            .urls
            .get(source_type)
            .ok_or_else(|| anyhow!("No feed URL configured for source type '{}'", source_type))?;

        debug!(source_type, url = %url, "Fetching feed");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch feed: {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Feed error ({}): {}", status, body));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Feed returned invalid JSON: {}", url))?;

        let (items, skipped) = CandidateItem::from_json_list(&value);
        if skipped > 0 {
            warn!(source_type, skipped, "Skipped malformed feed entries");
        }

        Ok(items)
    }
}
