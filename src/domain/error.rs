//! Error taxonomy for digest generation and publishing.

use thiserror::Error;
use uuid::Uuid;

use crate::core::limits::LimitViolation;

use super::stage::StageResult;

/// Errors surfaced by the core components
#[derive(Debug, Error)]
pub enum DigestError {
    /// Bad input: empty seed, invalid pipeline, unresolvable selection
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The generation call produced no usable text
    #[error("Stage '{stage}' produced no output: {reason}")]
    EmptyGeneration { stage: String, reason: String },

    /// The fragment stream failed part-way
    #[error("Generation failed in stage '{stage}': {message}")]
    Generation { stage: String, message: String },

    #[error("Stage '{stage}' timed out after {seconds}s")]
    StageTimeout { stage: String, seconds: u64 },

    #[error("Limit reached in stage '{stage}': {violation}")]
    Limit {
        stage: String,
        violation: LimitViolation,
    },

    #[error("Failed to fetch '{source_type}' items: {message}")]
    UpstreamFetch { source_type: String, message: String },

    /// The store rejected a write because the path changed underneath us
    #[error("Conflicting update for '{path}': {message}")]
    PublishConflict { path: String, message: String },

    #[error("Store error for '{path}': {message}")]
    Store { path: String, message: String },

    /// A pipeline stage failed; results of the stages before it are kept
    #[error("Pipeline '{pipeline}' failed at stage '{stage}': {message}")]
    Stage {
        run_id: Uuid,
        pipeline: String,
        stage: String,
        message: String,
        completed: Vec<StageResult>,
    },
}

impl DigestError {
    pub fn validation(message: impl Into<String>) -> Self {
        DigestError::Validation(message.into())
    }

    /// Results preserved by a stage failure (empty for other errors)
    pub fn completed_stages(&self) -> &[StageResult] {
        match self {
            DigestError::Stage { completed, .. } => completed,
            _ => &[],
        }
    }

    /// Run that failed, for looking up its journal
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            DigestError::Stage { run_id, .. } => Some(*run_id),
            _ => None,
        }
    }

    /// Whether this is a version conflict on publish
    pub fn is_conflict(&self) -> bool {
        matches!(self, DigestError::PublishConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_readable() {
        let err = DigestError::StageTimeout {
            stage: "summarize".to_string(),
            seconds: 30,
        };
        assert_eq!(err.to_string(), "Stage 'summarize' timed out after 30s");

        let err = DigestError::Limit {
            stage: "highlight".to_string(),
            violation: LimitViolation::MaxOutputBytes { actual: 9, limit: 8 },
        };
        assert!(err.to_string().contains("Maximum output bytes exceeded: 9 > 8"));
    }

    #[test]
    fn test_completed_stages_only_on_stage_error() {
        let kept = StageResult::new("summarize", "x".into(), "x".into(), String::new(), String::new(), 1);
        let run_id = Uuid::new_v4();
        let err = DigestError::Stage {
            run_id,
            pipeline: "digest".to_string(),
            stage: "highlight".to_string(),
            message: "boom".to_string(),
            completed: vec![kept],
        };
        assert_eq!(err.completed_stages().len(), 1);
        assert_eq!(err.run_id(), Some(run_id));
        assert!(DigestError::validation("x").completed_stages().is_empty());
        assert!(DigestError::validation("x").run_id().is_none());
    }
}
