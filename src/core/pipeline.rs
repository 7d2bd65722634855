//! Pipeline definitions and loading.
//!
//! A pipeline is an ordered list of generation stages. Each stage reads
//! either the run's seed text or the sanitized output of an earlier stage.
//! The built-in digest, podcast and analysis pipelines are constructed in
//! code; custom pipelines can be loaded from YAML.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::limits::StageLimits;
use crate::config::PromptConfig;
use crate::domain::DigestError;

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name (used in CLI and journal)
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub limits: StageLimits,

    /// Ordered list of stages to execute
    pub stages: Vec<StageSpec>,
}

impl PipelineDefinition {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// Fill in empty system instructions from the prompt configuration
    pub fn with_prompts(mut self, prompts: &PromptConfig) -> Self {
        for stage in &mut self.stages {
            if stage.system_instruction.is_empty() {
                stage.system_instruction = prompts.instruction_for(&stage.name);
            }
        }
        self
    }

    pub fn with_limits(mut self, limits: StageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validate the pipeline definition
    ///
    /// Requires a name, at least one stage, unique stage names, and stage
    /// references that point strictly backwards.
    pub fn validate(&self) -> Result<(), DigestError> {
        if self.name.is_empty() {
            return Err(DigestError::validation("Pipeline name cannot be empty"));
        }

        if self.stages.is_empty() {
            return Err(DigestError::validation(format!(
                "Pipeline '{}' must have at least one stage",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.name.is_empty() {
                return Err(DigestError::validation(format!("Stage {} has an empty name", i)));
            }

            if !seen.insert(stage.name.as_str()) {
                return Err(DigestError::validation(format!(
                    "Duplicate stage name '{}'",
                    stage.name
                )));
            }

            if let InputSource::PreviousStage { ref previous_stage } = stage.input_from {
                match self.stage_index(previous_stage) {
                    Some(idx) if idx >= i => {
                        return Err(DigestError::validation(format!(
                            "Stage '{}' references later stage '{}' (forward references not allowed)",
                            stage.name, previous_stage
                        )));
                    }
                    None => {
                        return Err(DigestError::validation(format!(
                            "Stage '{}' references non-existent stage '{}'",
                            stage.name, previous_stage
                        )));
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }
}

/// A single generation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name (unique within pipeline)
    pub name: String,

    /// System instruction sent with the stage's input
    #[serde(default)]
    pub system_instruction: String,

    /// Where to get input from
    #[serde(default)]
    pub input_from: InputSource,

    /// Override for `limits.stage_timeout_seconds`
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl StageSpec {
    /// Stage reading the run's seed text
    pub fn from_seed(name: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_instruction: system_instruction.into(),
            input_from: InputSource::default(),
            timeout_seconds: None,
        }
    }

    /// Stage reading an earlier stage's sanitized output
    pub fn from_stage(
        name: impl Into<String>,
        system_instruction: impl Into<String>,
        previous_stage: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system_instruction: system_instruction.into(),
            input_from: InputSource::PreviousStage {
                previous_stage: previous_stage.into(),
            },
            timeout_seconds: None,
        }
    }

    /// Effective timeout for this stage
    pub fn timeout(&self, limits: &StageLimits) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(limits.stage_timeout_seconds))
    }
}

/// Source of input for a stage
///
/// YAML forms:
/// - `input_from: seed`
/// - `input_from: { previous_stage: stage_name }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSource {
    /// The run's seed text
    Seed(SeedMarker),

    /// Sanitized output of an earlier stage
    PreviousStage { previous_stage: String },
}

/// Marker deserializing from the string "seed"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedMarker {
    Seed,
}

impl Default for InputSource {
    fn default() -> Self {
        Self::Seed(SeedMarker::Seed)
    }
}

/// Stage names used by the built-in pipelines
pub mod stages {
    pub const SUMMARIZE: &str = "summarize";
    pub const HIGHLIGHT: &str = "highlight";
    pub const PODCAST_FULL: &str = "podcast_full";
    pub const PODCAST_SHORT: &str = "podcast_short";
    pub const ANALYSIS: &str = "analysis";
}

/// Pipelines shipped with the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinPipeline {
    /// summarize <- seed, highlight <- summarize
    Digest,
    /// podcast_full <- seed, podcast_short <- seed
    Podcast,
    /// analysis <- seed
    Analysis,
}

impl BuiltinPipeline {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinPipeline::Digest => "digest",
            BuiltinPipeline::Podcast => "podcast",
            BuiltinPipeline::Analysis => "analysis",
        }
    }

    /// Build the definition with instructions from `prompts`
    pub fn definition(&self, prompts: &PromptConfig) -> PipelineDefinition {
        let instruction = |stage: &str| prompts.instruction_for(stage);

        let (description, stage_list) = match self {
            BuiltinPipeline::Digest => (
                "Summarize selected items, then condense the summary",
                vec![
                    StageSpec::from_seed(stages::SUMMARIZE, instruction(stages::SUMMARIZE)),
                    StageSpec::from_stage(
                        stages::HIGHLIGHT,
                        instruction(stages::HIGHLIGHT),
                        stages::SUMMARIZE,
                    ),
                ],
            ),
            BuiltinPipeline::Podcast => (
                "Write full and short podcast scripts from digest text",
                vec![
                    StageSpec::from_seed(stages::PODCAST_FULL, instruction(stages::PODCAST_FULL)),
                    StageSpec::from_seed(stages::PODCAST_SHORT, instruction(stages::PODCAST_SHORT)),
                ],
            ),
            BuiltinPipeline::Analysis => (
                "Analytical pass over summarized content",
                vec![StageSpec::from_seed(stages::ANALYSIS, instruction(stages::ANALYSIS))],
            ),
        };

        PipelineDefinition {
            name: self.name().to_string(),
            description: description.to_string(),
            limits: StageLimits::default(),
            stages: stage_list,
        }
    }
}

impl std::str::FromStr for BuiltinPipeline {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "digest" => Ok(BuiltinPipeline::Digest),
            "podcast" => Ok(BuiltinPipeline::Podcast),
            "analysis" => Ok(BuiltinPipeline::Analysis),
            other => Err(DigestError::validation(format!("Unknown pipeline '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PIPELINE_YAML: &str = r#"
name: test
description: Test pipeline

limits:
  max_stages: 4

stages:
  - name: first
    system_instruction: Summarize the items.
    input_from: seed

  - name: second
    input_from:
      previous_stage: first
    timeout_seconds: 5
"#;

    #[test]
    fn test_pipeline_parsing() {
        let pipeline = PipelineDefinition::from_yaml(TEST_PIPELINE_YAML).unwrap();

        assert_eq!(pipeline.name, "test");
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.limits.max_stages, 4);
        assert_eq!(pipeline.stages[0].input_from, InputSource::default());
        assert_eq!(
            pipeline.stages[1].timeout(&pipeline.limits),
            Duration::from_secs(5)
        );
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_with_prompts_fills_only_missing() {
        let pipeline = PipelineDefinition::from_yaml(TEST_PIPELINE_YAML)
            .unwrap()
            .with_prompts(&PromptConfig::default());

        assert_eq!(pipeline.stages[0].system_instruction, "Summarize the items.");
        assert!(!pipeline.stages[1].system_instruction.is_empty());
    }

    #[test]
    fn test_invalid_stage_reference() {
        let yaml = r#"
name: invalid
stages:
  - name: first
    input_from:
      previous_stage: nonexistent
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        assert!(matches!(pipeline.validate(), Err(DigestError::Validation(_))));
    }

    #[test]
    fn test_forward_and_self_references_rejected() {
        let pipeline = PipelineDefinition {
            name: "p".to_string(),
            description: String::new(),
            limits: StageLimits::default(),
            stages: vec![
                StageSpec::from_stage("a", "", "b"),
                StageSpec::from_seed("b", ""),
            ],
        };
        assert!(pipeline.validate().is_err());

        let pipeline = PipelineDefinition {
            stages: vec![StageSpec::from_stage("a", "", "a")],
            ..pipeline
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_duplicate_and_empty() {
        let pipeline = PipelineDefinition {
            name: "p".to_string(),
            description: String::new(),
            limits: StageLimits::default(),
            stages: vec![StageSpec::from_seed("a", ""), StageSpec::from_seed("a", "")],
        };
        assert!(pipeline.validate().is_err());

        let empty = PipelineDefinition {
            stages: Vec::new(),
            ..pipeline
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_builtin_shapes() {
        let prompts = PromptConfig::default();

        let digest = BuiltinPipeline::Digest.definition(&prompts);
        assert!(digest.validate().is_ok());
        assert_eq!(digest.stages[0].name, stages::SUMMARIZE);
        assert_eq!(
            digest.stages[1].input_from,
            InputSource::PreviousStage {
                previous_stage: stages::SUMMARIZE.to_string()
            }
        );

        let podcast = BuiltinPipeline::Podcast.definition(&prompts);
        assert!(podcast
            .stages
            .iter()
            .all(|s| s.input_from == InputSource::default()));

        assert_eq!("analysis".parse::<BuiltinPipeline>().unwrap(), BuiltinPipeline::Analysis);
        assert!("weekly".parse::<BuiltinPipeline>().is_err());
    }
}
