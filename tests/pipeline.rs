//! Pipeline Integration Tests
//!
//! Stage chaining, failure handling, timeouts and the run journal.

use std::sync::Arc;
use std::time::Duration;

use dailyforge::adapters::scripted::{ScriptedGeneration, ScriptedReply};
use dailyforge::core::{aggregate, sanitize, Orchestrator, PipelineDefinition, RunJournal, StageLimits, StageSpec};
use dailyforge::domain::{DigestError, EventType, RunState, StageStatus};
use futures::stream;
use tempfile::TempDir;

fn three_stage() -> PipelineDefinition {
    PipelineDefinition {
        name: "three".to_string(),
        description: "three chained stages".to_string(),
        limits: StageLimits::default(),
        stages: vec![
            StageSpec::from_seed("one", "sys-one"),
            StageSpec::from_stage("two", "sys-two", "one"),
            StageSpec::from_stage("three", "sys-three", "two"),
        ],
    }
}

fn failing_at_two() -> ScriptedGeneration {
    ScriptedGeneration::new()
        .with_reply("sys-one", ScriptedReply::text("first output"))
        .with_reply(
            "sys-two",
            ScriptedReply::FailAfter {
                fragments: vec!["partial".to_string()],
                message: "connection reset".to_string(),
            },
        )
        .with_reply("sys-three", ScriptedReply::text("never"))
}

#[tokio::test]
async fn test_failure_at_stage_two_keeps_stage_one() {
    let generator = Arc::new(failing_at_two());
    let orchestrator = Orchestrator::new(generator.clone());

    let run = orchestrator.run(&three_stage(), "seed").await.unwrap();

    match &run.state {
        RunState::Failed { stage, error } => {
            assert_eq!(stage, "two");
            assert!(error.contains("connection reset"), "error was: {}", error);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    assert_eq!(run.stages.len(), 1);
    assert_eq!(run.stages[0].stage_name, "one");
    assert_eq!(run.stages[0].sanitized_output, "first output");

    // Stage three never ran
    let calls = generator.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.system_instruction != "sys-three"));

    let err = run.into_stages().unwrap_err();
    assert_eq!(err.completed_stages().len(), 1);
    assert!(matches!(err, DigestError::Stage { ref stage, .. } if stage == "two"));
}

#[tokio::test]
async fn test_empty_stage_output_fails_run() {
    let generator = Arc::new(
        ScriptedGeneration::new()
            .with_reply("sys-one", ScriptedReply::text("ok"))
            .with_reply("sys-two", ScriptedReply::Fragments(vec![String::new(), "  ".to_string()])),
    );

    let run = Orchestrator::new(generator).run(&three_stage(), "seed").await.unwrap();

    assert!(matches!(run.state, RunState::Failed { ref stage, .. } if stage == "two"));
    assert!(run.is_stage_completed("one"));
}

#[tokio::test]
async fn test_each_stage_reads_previous_sanitized_output() {
    let generator = Arc::new(
        ScriptedGeneration::new()
            .with_reply("sys-one", ScriptedReply::text("```markdown\nalpha\n```"))
            .with_reply("sys-two", ScriptedReply::text("beta"))
            .with_reply("sys-three", ScriptedReply::text("gamma")),
    );

    let run = Orchestrator::new(generator.clone())
        .run(&three_stage(), "seed")
        .await
        .unwrap();

    assert!(run.is_completed());
    let inputs: Vec<String> = generator.calls().into_iter().map(|c| c.user_text).collect();
    assert_eq!(inputs, vec!["seed", "alpha", "beta"]);
    assert_eq!(run.output_of("three"), Some("gamma"));
}

#[tokio::test]
async fn test_stalled_stage_times_out() {
    let mut definition = three_stage();
    definition.stages[0].timeout_seconds = Some(1);

    let generator = Arc::new(ScriptedGeneration::new().with_reply("sys-one", ScriptedReply::Stall));
    let run = Orchestrator::new(generator).run(&definition, "seed").await.unwrap();

    match run.state {
        RunState::Failed { stage, error } => {
            assert_eq!(stage, "one");
            assert!(error.contains("timed out"), "error was: {}", error);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_journal_records_run() {
    let temp = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(Arc::new(failing_at_two())).with_journal(temp.path());

    let run = orchestrator.run(&three_stage(), "seed").await.unwrap();

    let journal = RunJournal::open(temp.path(), run.id).await.unwrap();
    let replayed = journal.load_run().await.unwrap().unwrap();

    assert_eq!(replayed.id, run.id);
    assert_eq!(replayed.pipeline_name, "three");
    assert!(matches!(replayed.state, RunState::Failed { ref stage, .. } if stage == "two"));
    assert_eq!(replayed.stage_statuses.get("one"), Some(&StageStatus::Completed));
    assert_eq!(replayed.stage_statuses.get("two"), Some(&StageStatus::Failed));
    assert!(replayed.stage_statuses.get("three").is_none());

    assert_eq!(
        journal.load_stage_output("one").await.unwrap().as_deref(),
        Some("first output")
    );
    assert!(journal.load_stage_output("two").await.unwrap().is_none());

    let failed = journal.last_event_of_type(EventType::RunFailed).await.unwrap();
    assert!(failed.is_some());
}

#[test]
fn test_yaml_definition_with_timeouts() {
    let yaml = r#"
name: custom
description: Custom two-stage pipeline

limits:
  stage_timeout_seconds: 30
  run_timeout_seconds: 120

stages:
  - name: draft
    system_instruction: Write a draft
    input_from: seed
    timeout_seconds: 5

  - name: polish
    system_instruction: Polish the draft
    input_from:
      previous_stage: draft
"#;

    let definition = PipelineDefinition::from_yaml(yaml).unwrap();
    definition.validate().unwrap();

    assert_eq!(definition.stages[0].timeout(&definition.limits), Duration::from_secs(5));
    assert_eq!(definition.stages[1].timeout(&definition.limits), Duration::from_secs(30));
    // Unset limits keep their defaults
    assert_eq!(definition.limits.max_stages, 16);
}

#[test]
fn test_forward_reference_rejected() {
    let yaml = r#"
name: broken
stages:
  - name: first
    input_from:
      previous_stage: second
  - name: second
"#;

    let definition = PipelineDefinition::from_yaml(yaml).unwrap();
    assert!(matches!(definition.validate(), Err(DigestError::Validation(_))));
}

#[tokio::test]
async fn test_aggregate_concatenates_in_order() {
    let fragments = stream::iter(vec![Ok("a".to_string()), Ok("b".to_string()), Ok("c".to_string())]);
    assert_eq!(aggregate("s", fragments).await.unwrap(), "abc");
}

#[tokio::test]
async fn test_aggregate_empty_is_error() {
    let none = stream::iter(Vec::<anyhow::Result<String>>::new());
    assert!(matches!(
        aggregate("s", none).await,
        Err(DigestError::EmptyGeneration { .. })
    ));

    let blank = stream::iter(vec![Ok(String::new())]);
    assert!(matches!(
        aggregate("s", blank).await,
        Err(DigestError::EmptyGeneration { .. })
    ));
}

#[test]
fn test_sanitize_idempotent() {
    let samples = [
        "",
        "plain text",
        "```\nbody\n```",
        "```markdown\n```json\n{}\n```\n```",
        "````\n```\ninner\n```\n````",
        "```md\nunclosed",
        "  ```\n  spaced\n```  ",
        "text before\n```\ncode\n```\ntext after",
        "```\n```\n```\n```",
        "```a\n```b\nx\n```\n```\n",
    ];

    for sample in samples {
        let once = sanitize(sample);
        assert_eq!(sanitize(&once), once, "not idempotent for {:?}", sample);
    }
}
