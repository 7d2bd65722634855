//! Pipeline execution engine.
//!
//! Runs the stages of a definition strictly in order. Each stage resolves
//! its input, streams a generation call under a timeout, sanitizes the
//! result, and records it before the next stage may start. The first
//! failing stage ends the run; results gathered so far stay on the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::GenerationService;
use crate::domain::{DigestError, Event, EventType, PipelineRun, RunState, StageResult, StageStatus};

use super::aggregator::aggregate;
use super::journal::{stage_fingerprint, RunJournal};
use super::limits::RunTracker;
use super::pipeline::{InputSource, PipelineDefinition, StageSpec};
use super::sanitize::sanitize;

/// Main pipeline orchestrator
pub struct Orchestrator {
    generator: Arc<dyn GenerationService>,

    /// Root directory for run journals; `None` disables journaling
    runs_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn GenerationService>) -> Self {
        Self {
            generator,
            runs_dir: None,
        }
    }

    /// Journal every run under `runs_dir`
    pub fn with_journal(mut self, runs_dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = Some(runs_dir.into());
        self
    }

    /// Execute a pipeline over `seed`
    ///
    /// Returns `Err` only when the definition or seed is invalid. Stage
    /// failures come back as `Ok` with `RunState::Failed`.
    #[instrument(skip(self, definition, seed), fields(pipeline = %definition.name))]
    pub async fn run(&self, definition: &PipelineDefinition, seed: &str) -> Result<PipelineRun, DigestError> {
        definition.validate()?;
        if seed.trim().is_empty() {
            return Err(DigestError::validation("Seed text is empty"));
        }

        let run_id = Uuid::new_v4();
        info!(%run_id, stages = definition.stages.len(), generator = self.generator.name(), "Starting pipeline run");

        let journal = self.open_journal(run_id).await;
        let mut run = PipelineRun::new(run_id, definition.name.clone());
        let mut tracker = RunTracker::new();

        record(
            &journal,
            Event::new(
                run_id,
                None,
                EventType::RunStarted,
                stage_fingerprint(run_id, "run", seed),
                format!("pipeline {}", definition.name),
                StageStatus::Running,
            ),
        )
        .await;

        for stage in &definition.stages {
            run.stage_statuses.insert(stage.name.clone(), StageStatus::Running);

            match self
                .execute_stage(&journal, &run, definition, stage, seed, &mut tracker)
                .await
            {
                Ok(result) => {
                    run.stage_statuses.insert(stage.name.clone(), StageStatus::Completed);
                    run.stages.push(result);
                }
                Err(e) => {
                    run.stage_statuses.insert(stage.name.clone(), StageStatus::Failed);
                    return Ok(fail_run(&journal, run, &stage.name, e).await);
                }
            }
        }

        Ok(complete_run(&journal, run).await)
    }

    async fn open_journal(&self, run_id: Uuid) -> Option<RunJournal> {
        let runs_dir = self.runs_dir.as_ref()?;
        match RunJournal::open(runs_dir, run_id).await {
            Ok(journal) => Some(journal),
            Err(e) => {
                warn!(error = %e, "Run journal unavailable, continuing without it");
                None
            }
        }
    }

    async fn execute_stage(
        &self,
        journal: &Option<RunJournal>,
        run: &PipelineRun,
        definition: &PipelineDefinition,
        stage: &StageSpec,
        seed: &str,
        tracker: &mut RunTracker,
    ) -> Result<StageResult, DigestError> {
        let limits = &definition.limits;
        let limit_error = |violation| DigestError::Limit {
            stage: stage.name.clone(),
            violation,
        };

        limits.check(tracker).map_err(limit_error)?;

        let input = resolve_input(run, stage, seed)?;
        limits.validate_input(input).map_err(limit_error)?;

        let fingerprint = stage_fingerprint(run.id, &stage.name, input);
        let timeout = stage.timeout(limits);
        let started = Instant::now();

        info!(stage = %stage.name, input_bytes = input.len(), "Stage started");
        record(
            journal,
            Event::new(
                run.id,
                Some(stage.name.clone()),
                EventType::StageStarted,
                fingerprint.clone(),
                format!("Stage '{}' started ({} bytes in)", stage.name, input.len()),
                StageStatus::Running,
            ),
        )
        .await;

        let outcome = tokio::time::timeout(timeout, self.generate(&stage.name, input, &stage.system_instruction)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(_) => Err(DigestError::StageTimeout {
                stage: stage.name.clone(),
                seconds: timeout.as_secs(),
            }),
            Ok(generated) => generated.and_then(|raw| {
                let sanitized = sanitize(&raw);
                if sanitized.trim().is_empty() {
                    return Err(DigestError::EmptyGeneration {
                        stage: stage.name.clone(),
                        reason: "output empty after removing code fences".to_string(),
                    });
                }
                limits.validate_output(&sanitized).map_err(limit_error)?;
                Ok(StageResult::new(
                    stage.name.clone(),
                    raw,
                    sanitized,
                    stage.system_instruction.clone(),
                    input.to_string(),
                    duration_ms,
                ))
            }),
        };

        match result {
            Ok(result) => {
                tracker.record_stage(input.len() as u64, result.output_bytes() as u64);

                if let Some(journal) = journal {
                    if let Err(e) = journal.store_stage_output(&stage.name, &result.sanitized_output).await {
                        warn!(stage = %stage.name, error = %e, "Failed to store stage output");
                    }
                }
                record(
                    journal,
                    Event::new(
                        run.id,
                        Some(stage.name.clone()),
                        EventType::StageCompleted,
                        fingerprint,
                        format!("Stage '{}' completed in {}ms", stage.name, duration_ms),
                        StageStatus::Completed,
                    )
                    .with_duration(duration_ms),
                )
                .await;

                info!(stage = %stage.name, duration_ms, output_bytes = result.output_bytes(), "Stage completed");
                Ok(result)
            }
            Err(e) => {
                record(
                    journal,
                    Event::new(
                        run.id,
                        Some(stage.name.clone()),
                        EventType::StageFailed,
                        fingerprint,
                        format!("Stage '{}' failed", stage.name),
                        StageStatus::Failed,
                    )
                    .with_duration(duration_ms)
                    .with_error(e.to_string()),
                )
                .await;

                error!(stage = %stage.name, duration_ms, error = %e, "Stage failed");
                Err(e)
            }
        }
    }

    /// One generation call, streamed to completion
    async fn generate(&self, stage: &str, input: &str, system_instruction: &str) -> Result<String, DigestError> {
        let stream = self
            .generator
            .invoke(input, system_instruction)
            .await
            .map_err(|e| DigestError::EmptyGeneration {
                stage: stage.to_string(),
                reason: format!("generation call failed: {:#}", e),
            })?;

        debug!(stage, "Receiving fragments");
        aggregate(stage, stream).await
    }
}

/// Input text for a stage per its `InputSource`
fn resolve_input<'a>(run: &'a PipelineRun, stage: &StageSpec, seed: &'a str) -> Result<&'a str, DigestError> {
    match &stage.input_from {
        InputSource::Seed(_) => Ok(seed),
        InputSource::PreviousStage { previous_stage } => run.output_of(previous_stage).ok_or_else(|| {
            DigestError::validation(format!(
                "Stage '{}' needs output of '{}', which has not completed",
                stage.name, previous_stage
            ))
        }),
    }
}

async fn fail_run(journal: &Option<RunJournal>, mut run: PipelineRun, stage: &str, err: DigestError) -> PipelineRun {
    let message = err.to_string();

    record(
        journal,
        Event::new(
            run.id,
            Some(stage.to_string()),
            EventType::RunFailed,
            format!("{}:failed", run.id),
            format!("Run failed at stage '{}'", stage),
            StageStatus::Failed,
        )
        .with_error(message.clone()),
    )
    .await;

    error!(run_id = %run.id, stage, kept = run.stages.len(), "Pipeline run failed");

    run.state = RunState::Failed {
        stage: stage.to_string(),
        error: message,
    };
    run.completed_at = Some(Utc::now());
    run
}

async fn complete_run(journal: &Option<RunJournal>, mut run: PipelineRun) -> PipelineRun {
    let total_ms: u64 = run.stages.iter().map(|s| s.duration_ms).sum();

    record(
        journal,
        Event::new(
            run.id,
            None,
            EventType::RunCompleted,
            format!("{}:complete", run.id),
            format!("Run completed, {} stages", run.stages.len()),
            StageStatus::Completed,
        )
        .with_duration(total_ms),
    )
    .await;

    info!(run_id = %run.id, stages = run.stages.len(), total_ms, "Pipeline run completed");

    run.state = RunState::Completed;
    run.completed_at = Some(Utc::now());
    run
}

/// Append to the journal if there is one; failures are logged, not fatal
async fn record(journal: &Option<RunJournal>, event: Event) {
    if let Some(journal) = journal {
        if let Err(e) = journal.append(&event).await {
            warn!(event = %event.event_type, error = %e, "Failed to append journal event");
        }
    }
}
