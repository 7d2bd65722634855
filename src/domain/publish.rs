//! Artifacts handed to the publisher and the outcome of each commit.

use serde::{Deserialize, Serialize};

/// A document to publish at a store path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishArtifact {
    /// Store path, e.g. `daily/2024-01-01.md`
    pub path: String,

    /// Markdown body; empty bodies are skipped
    pub content: String,

    pub commit_message: String,
}

impl PublishArtifact {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        commit_message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            commit_message: commit_message.into(),
        }
    }

    /// Daily digest at `daily/{date}.md`
    pub fn daily(date: &str, content: impl Into<String>) -> Self {
        Self::new(
            format!("daily/{}.md", date),
            content,
            format!("Add daily report for {}", date),
        )
    }

    /// Podcast script at `podcast/{date}.md`
    pub fn podcast(date: &str, content: impl Into<String>) -> Self {
        Self::new(
            format!("podcast/{}.md", date),
            content,
            format!("Add podcast script for {}", date),
        )
    }
}

/// What happened to an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishAction {
    /// No prior version existed
    Created,
    /// A prior version was replaced
    Updated,
    /// Content was empty, nothing written
    Skipped,
    /// The store rejected the write
    Failed,
}

impl std::fmt::Display for PublishAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PublishAction::Created => "created",
            PublishAction::Updated => "updated",
            PublishAction::Skipped => "skipped",
            PublishAction::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of publishing one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub artifact_path: String,

    /// Version token observed before the write
    pub prior_version: Option<String>,

    pub action: PublishAction,

    /// Version token returned by the store after the write
    pub new_version: Option<String>,

    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn skipped(path: impl Into<String>) -> Self {
        Self {
            artifact_path: path.into(),
            prior_version: None,
            action: PublishAction::Skipped,
            new_version: None,
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, prior_version: Option<String>, error: String) -> Self {
        Self {
            artifact_path: path.into(),
            prior_version,
            action: PublishAction::Failed,
            new_version: None,
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.action == PublishAction::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths_and_messages() {
        let daily = PublishArtifact::daily("2024-01-01", "body");
        assert_eq!(daily.path, "daily/2024-01-01.md");
        assert_eq!(daily.commit_message, "Add daily report for 2024-01-01");

        let podcast = PublishArtifact::podcast("2024-01-01", "");
        assert_eq!(podcast.path, "podcast/2024-01-01.md");
        assert_eq!(podcast.commit_message, "Add podcast script for 2024-01-01");
    }

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&PublishAction::Updated).unwrap();
        assert_eq!(json, "\"updated\"");
    }
}
