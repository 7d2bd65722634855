//! End-to-end daily run and the operations it is built from.
//!
//! `DailyJob::run` loads the pool, selects items, runs the digest
//! pipeline, and publishes the daily document. The individual steps are
//! exposed for the CLI's manual commands.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{CacheStore, SourceFetcher, VersionedStore};
use crate::config::{OutputConfig, Settings};
use crate::domain::{DigestError, PipelineRun, PublishArtifact, PublishOutcome, StageResult};

use super::compose::{compose_podcast_from, PipelineBundle};
use super::orchestrator::Orchestrator;
use super::pipeline::{stages, BuiltinPipeline, PipelineDefinition};
use super::pool::{kinds_of, load_pool, render_seed, resolve_selection, ItemPool};
use super::publisher::Publisher;
use super::selector::{select, SelectionReport};

/// How a daily run ended
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DailyOutcome {
    /// Nothing to do (no items survived selection)
    Skipped { reason: String },
    /// Digest generated and handed to the store
    Published {
        run_id: Uuid,
        selected: usize,
        outcomes: Vec<PublishOutcome>,
    },
    /// Generation failed; nothing was published
    Failed {
        /// Set when a pipeline run started, so `status` can find its journal
        run_id: Option<Uuid>,
        stage: Option<String>,
        error: String,
        /// Stages that finished before the failure
        completed: Vec<StageResult>,
    },
}

/// Outcome plus the human-readable log of the run
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: String,
    pub outcome: DailyOutcome,
    pub log: Vec<String>,
}

impl DailyReport {
    /// True unless generation or any publish failed
    pub fn is_success(&self) -> bool {
        match &self.outcome {
            DailyOutcome::Skipped { .. } => true,
            DailyOutcome::Published { outcomes, .. } => !outcomes.iter().any(PublishOutcome::is_failed),
            DailyOutcome::Failed { .. } => false,
        }
    }
}

/// Collaborators and settings for daily runs
pub struct DailyJob {
    settings: Settings,
    orchestrator: Orchestrator,
    cache: Arc<dyn CacheStore>,
    fetcher: Arc<dyn SourceFetcher>,
    store: Arc<dyn VersionedStore>,
}

impl DailyJob {
    pub fn new(
        settings: Settings,
        orchestrator: Orchestrator,
        cache: Arc<dyn CacheStore>,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn VersionedStore>,
    ) -> Self {
        Self {
            settings,
            orchestrator,
            cache,
            fetcher,
            store,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Generate and publish the digest for `date`
    ///
    /// Never returns an error: every failure ends up in the report.
    pub async fn run(&self, date: &str, now: DateTime<Utc>) -> DailyReport {
        let mut log = RunLog::default();
        log.push(format!("[Start] Daily run for {}", date));

        let (pool, report) = self.select(date, now).await;
        log.push(format!(
            "[Select] {} of {} items selected, {} rejected",
            report.selected.len(),
            report.considered,
            report.rejections.len()
        ));
        for rejection in report.rejections.iter().take(self.settings.selection.log_limit) {
            log.push(format!("[Filter-Reject] {}: {}", rejection.reason, rejection.title));
        }

        if report.is_empty() {
            log.push("[Skip] No items selected after filtering".to_string());
            return log.finish(
                date,
                DailyOutcome::Skipped {
                    reason: "no items selected".to_string(),
                },
            );
        }

        let generated = match self.digest(date, &report.ref_strings(), &pool).await {
            Ok(generated) => generated,
            Err(e) => {
                let stage = match &e {
                    DigestError::Stage { stage, .. } => Some(stage.clone()),
                    _ => None,
                };
                log.push(format!("[Error] {}", e));
                let completed = e.completed_stages().to_vec();
                for result in &completed {
                    log.push(format!(
                        "[Partial] {} completed ({} bytes)",
                        result.stage_name,
                        result.output_bytes()
                    ));
                }
                return log.finish(
                    date,
                    DailyOutcome::Failed {
                        run_id: e.run_id(),
                        stage,
                        error: e.to_string(),
                        completed,
                    },
                );
            }
        };
        log.push(format!("[Generate] {} stages completed", generated.bundle.stages.len()));

        let digest = generated.bundle.digest_markdown.unwrap_or_default();
        let outcomes = self.publish(&[PublishArtifact::daily(date, digest)]).await;
        for outcome in &outcomes {
            match &outcome.error {
                Some(error) => log.push(format!("[Commit] {} failed: {}", outcome.artifact_path, error)),
                None => log.push(format!("[Commit] {} {}", outcome.artifact_path, outcome.action)),
            }
        }

        log.finish(
            date,
            DailyOutcome::Published {
                run_id: generated.run_id,
                selected: report.selected.len(),
                outcomes,
            },
        )
    }

    /// Items for `date` across every configured source type
    pub async fn pool(&self, date: &str) -> ItemPool {
        load_pool(
            date,
            &self.settings.selection.source_types,
            self.cache.as_ref(),
            self.fetcher.as_ref(),
        )
        .await
    }

    /// Load the pool for `date` and run selection over it
    pub async fn select(&self, date: &str, now: DateTime<Utc>) -> (ItemPool, SelectionReport) {
        let pool = self.pool(date).await;

        let candidates: Vec<_> = self
            .settings
            .selection
            .source_types
            .iter()
            .flat_map(|t| pool.items(t).iter().cloned())
            .collect();

        let report = select(&candidates, &self.settings.selection.rules(), now);
        (pool, report)
    }

    /// Run the digest pipeline over the referenced items
    pub async fn digest<S: AsRef<str>>(
        &self,
        date: &str,
        refs: &[S],
        pool: &ItemPool,
    ) -> Result<DigestBundle, DigestError> {
        let items = resolve_selection(refs, pool)?;
        info!(date, items = items.len(), kinds = ?kinds_of(&items), "Generating digest");

        let seed = render_seed(&items);
        let run = self.run_builtin(BuiltinPipeline::Digest, &seed).await?;
        let run_id = run.id;

        let bundle = PipelineBundle::assemble(date, run, None, &self.settings.output)?;
        Ok(DigestBundle { run_id, bundle })
    }

    /// Run the podcast pipeline over digest text and compose the script
    pub async fn podcast(&self, date: &str, seed: &str) -> Result<String, DigestError> {
        let run = self.run_builtin(BuiltinPipeline::Podcast, seed).await?;
        let results = run.into_stages()?;
        compose_podcast_from(date, &results, &self.settings.output)
    }

    /// Digest text stored for `date`, used as a podcast seed
    pub async fn stored_digest(&self, date: &str) -> Result<String, DigestError> {
        let artifact = PublishArtifact::daily(date, "");
        self.store
            .read(&artifact.path)
            .await?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| DigestError::validation(format!("No stored digest at {}", artifact.path)))
    }

    /// Run the one-stage analysis pipeline
    pub async fn analysis(&self, seed: &str) -> Result<String, DigestError> {
        let run = self.run_builtin(BuiltinPipeline::Analysis, seed).await?;
        let results = run.into_stages()?;
        results
            .into_iter()
            .find(|s| s.stage_name == stages::ANALYSIS)
            .map(|s| s.sanitized_output)
            .ok_or_else(|| DigestError::validation("Analysis produced no result"))
    }

    /// Run a user-supplied pipeline and return its last stage's output
    pub async fn custom(&self, definition: PipelineDefinition, seed: &str) -> Result<String, DigestError> {
        let definition = definition.with_prompts(&self.settings.prompts);
        let run = self.orchestrator.run(&definition, seed).await?;
        run.into_stages()?
            .pop()
            .map(|s| s.sanitized_output)
            .ok_or_else(|| DigestError::validation(format!("Pipeline '{}' produced no result", definition.name)))
    }

    pub async fn publish(&self, artifacts: &[PublishArtifact]) -> Vec<PublishOutcome> {
        Publisher::new(self.store.as_ref()).publish(artifacts).await
    }

    async fn run_builtin(&self, pipeline: BuiltinPipeline, seed: &str) -> Result<PipelineRun, DigestError> {
        let definition = pipeline
            .definition(&self.settings.prompts)
            .with_limits(self.settings.limits.clone());
        let run = self.orchestrator.run(&definition, seed).await?;
        if !run.is_completed() {
            warn!(pipeline = pipeline.name(), run_id = %run.id, "Pipeline did not complete");
        }
        Ok(run)
    }
}

/// Digest bundle tagged with the run that produced it
#[derive(Debug, Clone)]
pub struct DigestBundle {
    pub run_id: Uuid,
    pub bundle: PipelineBundle,
}

/// The calendar date at `now` in the configured offset
pub fn today(output: &OutputConfig, now: DateTime<Utc>) -> String {
    let local = now + Duration::hours(i64::from(output.utc_offset_hours));
    local.format(&output.date_format).to_string()
}

#[derive(Default)]
struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    fn push(&mut self, line: String) {
        info!("{}", line);
        self.lines.push(line);
    }

    fn finish(self, date: &str, outcome: DailyOutcome) -> DailyReport {
        DailyReport {
            date: date.to_string(),
            outcome,
            log: self.lines,
        }
    }
}
