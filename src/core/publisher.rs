//! Commits finished documents to the versioned store.
//!
//! Each artifact is handled on its own: read the path's current version
//! token, then create or update against that token. A failure on one
//! artifact is recorded in its outcome and the rest still go through.
//! Nothing is rolled back.

use tracing::{info, warn};

use crate::adapters::VersionedStore;
use crate::domain::{PublishAction, PublishArtifact, PublishOutcome};

pub struct Publisher<'a> {
    store: &'a dyn VersionedStore,
}

impl<'a> Publisher<'a> {
    pub fn new(store: &'a dyn VersionedStore) -> Self {
        Self { store }
    }

    /// Publish every artifact in order, one outcome per artifact
    pub async fn publish(&self, artifacts: &[PublishArtifact]) -> Vec<PublishOutcome> {
        let mut outcomes = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            outcomes.push(self.publish_one(artifact).await);
        }
        outcomes
    }

    async fn publish_one(&self, artifact: &PublishArtifact) -> PublishOutcome {
        let path = artifact.path.as_str();

        if artifact.content.trim().is_empty() {
            info!(path, "No content, skipping");
            return PublishOutcome::skipped(path);
        }

        let prior = match self.store.version_token(path).await {
            Ok(prior) => prior,
            Err(e) => {
                warn!(path, error = %e, "Failed to read version token");
                return PublishOutcome::failed(path, None, e.to_string());
            }
        };

        match self
            .store
            .create_or_update(path, &artifact.content, &artifact.commit_message, prior.as_deref())
            .await
        {
            Ok(new_version) => {
                let action = if prior.is_some() {
                    PublishAction::Updated
                } else {
                    PublishAction::Created
                };
                info!(path, %action, version = %new_version, "Published");
                PublishOutcome {
                    artifact_path: path.to_string(),
                    prior_version: prior,
                    action,
                    new_version: Some(new_version),
                    error: None,
                }
            }
            Err(e) => {
                warn!(path, conflict = e.is_conflict(), error = %e, "Publish failed");
                PublishOutcome::failed(path, prior, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;

    #[tokio::test]
    async fn test_created_then_updated() {
        let store = MemoryStore::new();
        let publisher = Publisher::new(&store);
        let artifact = PublishArtifact::daily("2024-01-01", "v1");

        let first = publisher.publish(std::slice::from_ref(&artifact)).await;
        assert_eq!(first[0].action, PublishAction::Created);
        assert!(first[0].prior_version.is_none());

        let second = publisher
            .publish(&[PublishArtifact::daily("2024-01-01", "v2")])
            .await;
        assert_eq!(second[0].action, PublishAction::Updated);
        assert_eq!(second[0].prior_version, first[0].new_version);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_others() {
        let store = MemoryStore::new().with_failure("daily/2024-01-01.md", "forbidden");
        let publisher = Publisher::new(&store);

        let outcomes = publisher
            .publish(&[
                PublishArtifact::daily("2024-01-01", "digest"),
                PublishArtifact::podcast("2024-01-01", "script"),
            ])
            .await;

        assert!(outcomes[0].is_failed());
        assert!(outcomes[0].error.as_deref().unwrap_or("").contains("forbidden"));
        assert_eq!(outcomes[1].action, PublishAction::Created);
        assert_eq!(store.paths().await, vec!["podcast/2024-01-01.md"]);
    }

    #[tokio::test]
    async fn test_whitespace_only_is_skipped() {
        let store = MemoryStore::new();
        let outcomes = Publisher::new(&store)
            .publish(&[PublishArtifact::podcast("2024-01-01", " \n")])
            .await;
        assert_eq!(outcomes[0], PublishOutcome::skipped("podcast/2024-01-01.md"));
        assert!(store.paths().await.is_empty());
    }
}
