//! Results produced by pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output of one completed stage
///
/// Built once by the orchestrator and never mutated afterwards. The
/// sanitized output is what later stages and documents consume; the raw
/// output and the prompt pair are kept for the audit document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Name of the stage that produced this result
    pub stage_name: String,

    /// Concatenated fragments exactly as streamed
    pub raw_output: String,

    /// Output after fence stripping; never empty
    pub sanitized_output: String,

    /// System instruction the stage ran with
    pub system_instruction: String,

    /// User input the stage ran with
    pub user_input: String,

    pub duration_ms: u64,

    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(
        stage_name: impl Into<String>,
        raw_output: String,
        sanitized_output: String,
        system_instruction: String,
        user_input: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            raw_output,
            sanitized_output,
            system_instruction,
            user_input,
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    /// Size of the sanitized output in bytes
    pub fn output_bytes(&self) -> usize {
        self.sanitized_output.len()
    }
}

/// Look up a stage result by name
pub fn find_stage<'a>(stages: &'a [StageResult], name: &str) -> Option<&'a StageResult> {
    stages.iter().find(|s| s.stage_name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_stage() {
        let stages = vec![
            StageResult::new("summarize", "a".into(), "a".into(), "sys".into(), "in".into(), 5),
            StageResult::new("highlight", "b".into(), "b".into(), "sys".into(), "a".into(), 7),
        ];

        assert_eq!(find_stage(&stages, "highlight").map(|s| s.duration_ms), Some(7));
        assert!(find_stage(&stages, "podcast_full").is_none());
    }

    #[test]
    fn test_output_bytes_counts_utf8() {
        let result = StageResult::new("s", "摘要".into(), "摘要".into(), String::new(), String::new(), 0);
        assert_eq!(result.output_bytes(), 6);
    }
}
