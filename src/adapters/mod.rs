//! Adapter interfaces for external systems.
//!
//! The core talks to four collaborators through these traits:
//! - GenerationService: streaming text generation
//! - CacheStore: per-day item cache
//! - VersionedStore: path-keyed document store with version tokens
//! - SourceFetcher: upstream feed for a source type

pub mod cache;
pub mod chat;
pub mod feed;
pub mod git_store;
pub mod scripted;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use crate::domain::{CandidateItem, DigestError};

pub use cache::{FileCache, MemoryCache};
pub use chat::ChatCompletionsClient;
pub use feed::HttpFeedFetcher;
pub use git_store::{GitContentsStore, MemoryStore};
pub use scripted::ScriptedGeneration;

/// Ordered text fragments from one generation call
///
/// Dropping the stream cancels the underlying request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming text generation
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Human-readable service name
    fn name(&self) -> &str;

    /// Start a generation call; fragments arrive on the returned stream
    async fn invoke(&self, user_text: &str, system_instruction: &str) -> Result<FragmentStream>;
}

/// Key-value cache of raw feed items
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Cached value for `key`, or `None` on a miss
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}

/// Path-keyed document store with optimistic concurrency
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Current version token for `path`, or `None` if it doesn't exist
    async fn version_token(&self, path: &str) -> Result<Option<String>, DigestError>;

    /// Current content at `path`, or `None` if it doesn't exist
    async fn read(&self, path: &str) -> Result<Option<String>, DigestError>;

    /// Write `content` at `path`, returning the new version token
    ///
    /// `prior` must match the current token (or be `None` for a new path);
    /// a mismatch fails with `DigestError::PublishConflict`.
    async fn create_or_update(
        &self,
        path: &str,
        content: &str,
        message: &str,
        prior: Option<&str>,
    ) -> Result<String, DigestError>;
}

/// Upstream source of feed items
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source_type: &str) -> Result<Vec<CandidateItem>>;
}
