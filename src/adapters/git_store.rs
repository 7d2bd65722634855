//! Versioned document stores.
//!
//! `GitContentsStore` commits through the GitHub repository contents API,
//! where the blob sha of a path is its version token. `MemoryStore` keeps
//! documents in process with a counter as the token.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::VersionedStore;
use crate::domain::DigestError;

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Store backed by a GitHub repository branch
pub struct GitContentsStore {
    api_base: String,
    owner: String,
    repo: String,
    branch: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ContentsFile {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContentInfo,
}

#[derive(Debug, Deserialize)]
struct PutContentInfo {
    sha: String,
}

impl GitContentsStore {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn headers(&self, path: &str) -> Result<HeaderMap, DigestError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| store_error(path, e))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("dailyforge"));
        Ok(headers)
    }

    async fn fetch_file(&self, path: &str) -> Result<Option<ContentsFile>, DigestError> {
        let response = self
            .http
            .get(self.contents_url(path))
            .query(&[("ref", self.branch.as_str())])
            .headers(self.headers(path)?)
            .send()
            .await
            .map_err(|e| store_error(path, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let file: ContentsFile = response.json().await.map_err(|e| store_error(path, e))?;
                Ok(Some(file))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DigestError::Store {
                    path: path.to_string(),
                    message: format!("GET failed ({}): {}", status, body),
                })
            }
        }
    }
}

#[async_trait]
impl VersionedStore for GitContentsStore {
    async fn version_token(&self, path: &str) -> Result<Option<String>, DigestError> {
        Ok(self.fetch_file(path).await?.map(|f| f.sha))
    }

    async fn read(&self, path: &str) -> Result<Option<String>, DigestError> {
        let Some(file) = self.fetch_file(path).await? else {
            return Ok(None);
        };

        if file.encoding.as_deref().is_some_and(|e| e != "base64") {
            return Err(DigestError::Store {
                path: path.to_string(),
                message: format!("Unsupported encoding: {:?}", file.encoding),
            });
        }

        let encoded: String = file
            .content
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = STANDARD.decode(encoded).map_err(|e| store_error(path, e))?;
        let text = String::from_utf8(bytes).map_err(|e| store_error(path, e))?;
        Ok(Some(text))
    }

    async fn create_or_update(
        &self,
        path: &str,
        content: &str,
        message: &str,
        prior: Option<&str>,
    ) -> Result<String, DigestError> {
        let body = PutContents {
            message,
            content: STANDARD.encode(content.as_bytes()),
            branch: &self.branch,
            sha: prior,
        };

        debug!(path, update = prior.is_some(), "Committing document");

        let response = self
            .http
            .put(self.contents_url(path))
            .headers(self.headers(path)?)
            .json(&body)
            .send()
            .await
            .map_err(|e| store_error(path, e))?;

        let status = response.status();
        if status.is_success() {
            let put: PutResponse = response.json().await.map_err(|e| store_error(path, e))?;
            return Ok(put.content.sha);
        }

        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(DigestError::PublishConflict {
                path: path.to_string(),
                message: format!("{}: {}", status, text),
            });
        }

        Err(DigestError::Store {
            path: path.to_string(),
            message: format!("PUT failed ({}): {}", status, text),
        })
    }
}

fn store_error(path: &str, err: impl std::fmt::Display) -> DigestError {
    DigestError::Store {
        path: path.to_string(),
        message: err.to_string(),
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    content: String,
    version: u64,
}

/// In-process versioned store
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
    failures: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `path` fail with a store error
    pub fn with_failure(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(path.into(), message.into());
        self
    }

    /// Seed a document without going through the version check
    pub async fn insert(&self, path: &str, content: &str) {
        let mut docs = self.documents.write().await;
        let version = docs.get(path).map(|d| d.version + 1).unwrap_or(1);
        docs.insert(
            path.to_string(),
            StoredDocument {
                content: content.to_string(),
                version,
            },
        );
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.documents.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

fn token_for(version: u64) -> String {
    format!("v{}", version)
}

#[async_trait]
impl VersionedStore for MemoryStore {
    async fn version_token(&self, path: &str) -> Result<Option<String>, DigestError> {
        Ok(self
            .documents
            .read()
            .await
            .get(path)
            .map(|d| token_for(d.version)))
    }

    async fn read(&self, path: &str) -> Result<Option<String>, DigestError> {
        Ok(self
            .documents
            .read()
            .await
            .get(path)
            .map(|d| d.content.clone()))
    }

    async fn create_or_update(
        &self,
        path: &str,
        content: &str,
        _message: &str,
        prior: Option<&str>,
    ) -> Result<String, DigestError> {
        if let Some(message) = self.failures.get(path) {
            return Err(DigestError::Store {
                path: path.to_string(),
                message: message.clone(),
            });
        }

        let mut docs = self.documents.write().await;
        let current = docs.get(path).map(|d| token_for(d.version));

        if current.as_deref() != prior {
            return Err(DigestError::PublishConflict {
                path: path.to_string(),
                message: format!("expected {:?}, found {:?}", prior, current),
            });
        }

        let version = docs.get(path).map(|d| d.version + 1).unwrap_or(1);
        docs.insert(
            path.to_string(),
            StoredDocument {
                content: content.to_string(),
                version,
            },
        );

        Ok(token_for(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contents_url() {
        let store = GitContentsStore::new("octo", "daily", "main", "t")
            .with_api_base("https://ghe.example.com/api/v3/");
        assert_eq!(
            store.contents_url("daily/2024-01-01.md"),
            "https://ghe.example.com/api/v3/repos/octo/daily/contents/daily/2024-01-01.md"
        );
    }

    #[test]
    fn test_put_body_omits_sha_for_new_paths() {
        let body = PutContents {
            message: "Add daily report for 2024-01-01",
            content: STANDARD.encode("hi"),
            branch: "main",
            sha: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("sha").is_none());
        assert_eq!(json["content"], "aGk=");
    }

    #[tokio::test]
    async fn test_memory_store_create_then_update() {
        let store = MemoryStore::new();
        assert!(store.version_token("a.md").await.unwrap().is_none());

        let v1 = store.create_or_update("a.md", "one", "m", None).await.unwrap();
        assert_eq!(store.version_token("a.md").await.unwrap(), Some(v1.clone()));

        let v2 = store
            .create_or_update("a.md", "two", "m", Some(&v1))
            .await
            .unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.read("a.md").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_memory_store_stale_token_conflicts() {
        let store = MemoryStore::new();
        store.insert("a.md", "one").await;

        let err = store
            .create_or_update("a.md", "two", "m", None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
