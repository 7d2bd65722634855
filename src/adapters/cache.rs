//! Item caches keyed by `"{date}-{source_type}"`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStore;

/// Cache backed by one JSON file per key under a directory
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open (and create) a cache directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl CacheStore for FileCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read cache entry: {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt cache entry: {}", path.display()))?;
        Ok(Some(value))
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let path = self.path_for(key);
        let dir = self.dir.clone();
        let body = serde_json::to_vec_pretty(value)?;

        // Write to a temp file in the same directory, then rename over the entry
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&body)?;
            tmp.flush()?;
            tmp.persist(&path)
                .with_context(|| format!("Failed to persist cache entry: {}", path.display()))?;
            Ok(())
        })
        .await
        .context("Cache write task panicked")??;

        Ok(())
    }
}

/// In-process cache
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}
