//! Command-line interface for dailyforge.
//!
//! `run` is the scheduled entry point. The other commands expose the
//! individual steps (selection, digest, podcast, publishing) for manual
//! runs, plus run inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{
    CacheStore, ChatCompletionsClient, FileCache, GenerationService, GitContentsStore, HttpFeedFetcher, MemoryStore,
    ScriptedGeneration, VersionedStore,
};
use crate::config::Settings;
use crate::core::{
    compose_prompts, list_runs, today, DailyJob, DailyOutcome, Orchestrator, PipelineDefinition, RunJournal,
};
use crate::domain::{DigestError, PublishArtifact, PublishOutcome, RunState};

/// dailyforge - daily digest generator
#[derive(Parser, Debug)]
#[command(name = "dailyforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: search for .dailyforge/config.yaml upwards)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use a local echo generator and an in-memory store
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Select, generate and publish today's digest
    Run {
        /// Date to run for (default: today in the configured offset)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Show which items would be selected and why others were rejected
    Select {
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Generate a digest from hand-picked items
    Digest {
        /// Item reference as type:id (repeatable)
        #[arg(long = "item", required = true)]
        items: Vec<String>,

        #[arg(short, long)]
        date: Option<String>,

        /// Commit the digest to the store
        #[arg(long)]
        publish: bool,
    },

    /// Generate a podcast script from a digest
    #[command(group(ArgGroup::new("source").required(true).args(["from_store", "input"])))]
    Podcast {
        #[arg(short, long)]
        date: Option<String>,

        /// Use the digest already stored for the date
        #[arg(long)]
        from_store: bool,

        /// Read the digest text from a file
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Commit the script to the store
        #[arg(long)]
        publish: bool,
    },

    /// Run the one-stage analysis pipeline over a file
    Analysis {
        #[arg(short, long)]
        input: PathBuf,

        /// Run this YAML pipeline instead of the built-in analysis
        #[arg(long)]
        pipeline: Option<PathBuf>,
    },

    /// Commit existing documents to the store
    Publish {
        #[arg(short, long)]
        date: String,

        /// Daily digest document
        #[arg(long)]
        daily: Option<PathBuf>,

        /// Podcast script document
        #[arg(long)]
        podcast: Option<PathBuf>,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let settings = Settings::load(self.config.as_deref())?;
        let dry_run = self.dry_run;

        match self.command {
            Commands::Run { date } => run_daily(settings, dry_run, date).await,
            Commands::Select { date } => show_selection(settings, date).await,
            Commands::Digest { items, date, publish } => {
                run_digest(settings, dry_run, items, date, publish).await
            }
            Commands::Podcast {
                date,
                from_store,
                input,
                publish,
            } => run_podcast(settings, dry_run, date, from_store, input, publish).await,
            Commands::Analysis { input, pipeline } => {
                run_analysis(settings, dry_run, &input, pipeline.as_deref()).await
            }
            Commands::Publish { date, daily, podcast } => {
                publish_files(settings, dry_run, &date, daily, podcast).await
            }
            Commands::Status { run_id } => show_status(&settings, &run_id).await,
            Commands::Runs { limit } => show_runs(&settings, limit).await,
            Commands::Config => show_config(&settings),
        }
    }
}

/// Wire the job's collaborators from settings
async fn build_job(settings: Settings, dry_run: bool) -> Result<DailyJob> {
    let generator: Arc<dyn GenerationService> = if dry_run {
        Arc::new(ScriptedGeneration::new())
    } else {
        let mut client = ChatCompletionsClient::new(settings.generation.api_key()?, &settings.generation.model)
            .with_base_url(&settings.generation.base_url);
        if let Some(temperature) = settings.generation.temperature {
            client = client.with_temperature(temperature);
        }
        Arc::new(client)
    };

    let store: Arc<dyn VersionedStore> = if dry_run {
        Arc::new(MemoryStore::new())
    } else if settings.store.is_configured() {
        let store = &settings.store;
        Arc::new(
            GitContentsStore::new(&store.owner, &store.repo, &store.branch, store.token()?)
                .with_api_base(&store.api_base),
        )
    } else {
        anyhow::bail!("No store configured. Set store.owner and store.repo, or use --dry-run");
    };

    let cache: Arc<dyn CacheStore> = Arc::new(FileCache::open(settings.cache_dir()).await?);
    let fetcher = Arc::new(HttpFeedFetcher::new(settings.feeds.clone()));
    let orchestrator = Orchestrator::new(generator).with_journal(settings.runs_dir());

    Ok(DailyJob::new(settings, orchestrator, cache, fetcher, store))
}

fn resolve_date(settings: &Settings, date: Option<String>) -> String {
    date.unwrap_or_else(|| today(&settings.output, Utc::now()))
}

async fn read_input(path: &Path) -> Result<String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    if text.trim().is_empty() {
        anyhow::bail!("Input is empty: {}", path.display());
    }
    Ok(text)
}

/// Run the full daily job
async fn run_daily(settings: Settings, dry_run: bool, date: Option<String>) -> Result<()> {
    let date = resolve_date(&settings, date);
    let runs_dir = settings.runs_dir();
    let job = build_job(settings, dry_run).await?;

    let report = job.run(&date, Utc::now()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let DailyOutcome::Failed {
        run_id: Some(run_id),
        completed,
        ..
    } = &report.outcome
    {
        let path = write_prompts(&runs_dir, *run_id, &compose_prompts(&date, completed)).await?;
        eprintln!("\n[Run {} failed, prompts of completed stages at {}]", run_id, path.display());
    }

    if !report.is_success() {
        anyhow::bail!("Daily run for {} did not succeed", date);
    }
    Ok(())
}

/// Selection only reads the pool, so it never needs generation or store credentials
async fn show_selection(settings: Settings, date: Option<String>) -> Result<()> {
    let date = resolve_date(&settings, date);
    let job = build_job(settings, true).await?;

    let (_, report) = job.select(&date, Utc::now()).await;

    println!(
        "Selected {} of {} items ({} over the cap)",
        report.selected.len(),
        report.considered,
        report.over_cap
    );
    for item_ref in &report.selected {
        println!("  {}", item_ref);
    }

    if !report.rejections.is_empty() {
        println!("\nRejected:");
        println!("{:<24} {:<32} {}", "ITEM", "TITLE", "REASON");
        println!("{}", "-".repeat(80));
        for rejection in &report.rejections {
            println!("{:<24} {:<32} {}", rejection.item_ref.to_string(), rejection.title, rejection.reason);
        }
    }

    Ok(())
}

async fn run_digest(
    settings: Settings,
    dry_run: bool,
    items: Vec<String>,
    date: Option<String>,
    publish: bool,
) -> Result<()> {
    let date = resolve_date(&settings, date);
    let runs_dir = settings.runs_dir();
    let job = build_job(settings, dry_run).await?;

    let pool = job.pool(&date).await;
    let generated = match job.digest(&date, &items, &pool).await {
        Ok(generated) => generated,
        Err(e) => {
            report_partial(&runs_dir, &date, &e).await?;
            return Err(e.into());
        }
    };

    let prompts_path = write_prompts(&runs_dir, generated.run_id, &generated.bundle.prompts_markdown).await?;

    let digest = generated.bundle.digest_markdown.unwrap_or_default();
    println!("{}", digest);
    eprintln!("\n[Run {} completed, prompts at {}]", generated.run_id, prompts_path.display());

    if publish {
        let outcomes = job.publish(&[PublishArtifact::daily(&date, digest)]).await;
        report_outcomes(&outcomes)?;
    }
    Ok(())
}

/// Audit document for a run, next to its journal
async fn write_prompts(runs_dir: &Path, run_id: Uuid, doc: &str) -> Result<PathBuf> {
    let run_dir = runs_dir.join(run_id.to_string());
    tokio::fs::create_dir_all(&run_dir).await?;
    let path = run_dir.join("prompts.md");
    tokio::fs::write(&path, doc)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Print the stages a failed run finished and save their prompts
async fn report_partial(runs_dir: &Path, date: &str, error: &DigestError) -> Result<()> {
    let Some(run_id) = error.run_id() else {
        return Ok(());
    };
    let completed = error.completed_stages();

    for result in completed {
        eprintln!("\n## {} (completed before the failure)\n\n{}", result.stage_name, result.sanitized_output);
    }
    let path = write_prompts(runs_dir, run_id, &compose_prompts(date, completed)).await?;
    eprintln!("\n[Run {} failed, prompts at {}]", run_id, path.display());
    Ok(())
}

async fn run_podcast(
    settings: Settings,
    dry_run: bool,
    date: Option<String>,
    from_store: bool,
    input: Option<PathBuf>,
    publish: bool,
) -> Result<()> {
    let date = resolve_date(&settings, date);
    let job = build_job(settings, dry_run).await?;

    let seed = match input {
        Some(path) if !from_store => read_input(&path).await?,
        _ => job.stored_digest(&date).await?,
    };

    let script = job.podcast(&date, &seed).await?;
    println!("{}", script);

    if publish {
        let outcomes = job.publish(&[PublishArtifact::podcast(&date, script)]).await;
        report_outcomes(&outcomes)?;
    }
    Ok(())
}

async fn run_analysis(settings: Settings, dry_run: bool, input: &Path, pipeline: Option<&Path>) -> Result<()> {
    let seed = read_input(input).await?;
    let job = build_job(settings, dry_run).await?;

    let analysis = match pipeline {
        Some(path) => job.custom(PipelineDefinition::from_file(path)?, &seed).await?,
        None => job.analysis(&seed).await?,
    };
    println!("{}", analysis);
    Ok(())
}

async fn publish_files(
    settings: Settings,
    dry_run: bool,
    date: &str,
    daily: Option<PathBuf>,
    podcast: Option<PathBuf>,
) -> Result<()> {
    if daily.is_none() && podcast.is_none() {
        anyhow::bail!("Nothing to publish. Use --daily <file> and/or --podcast <file>");
    }

    let mut artifacts = Vec::new();
    if let Some(path) = daily {
        artifacts.push(PublishArtifact::daily(date, read_file(&path).await?));
    }
    if let Some(path) = podcast {
        artifacts.push(PublishArtifact::podcast(date, read_file(&path).await?));
    }

    let job = build_job(settings, dry_run).await?;
    let outcomes = job.publish(&artifacts).await;
    report_outcomes(&outcomes)
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn report_outcomes(outcomes: &[PublishOutcome]) -> Result<()> {
    println!("{:<28} {:<10} {}", "PATH", "ACTION", "VERSION");
    println!("{}", "-".repeat(80));
    for outcome in outcomes {
        let detail = match (&outcome.error, &outcome.new_version) {
            (Some(error), _) => error.clone(),
            (None, Some(version)) => version.clone(),
            (None, None) => "-".to_string(),
        };
        println!("{:<28} {:<10} {}", outcome.artifact_path, outcome.action.to_string(), detail);
    }

    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} documents failed to publish", failed, outcomes.len());
    }
    Ok(())
}

/// Show the status of a run
async fn show_status(settings: &Settings, run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str).with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let runs_dir = settings.runs_dir();
    if !runs_dir.join(run_id.to_string()).exists() {
        anyhow::bail!("Run not found: {}", run_id);
    }

    let journal = RunJournal::open(&runs_dir, run_id).await?;
    let run = journal
        .load_run()
        .await?
        .with_context(|| format!("Run {} has no events", run_id))?;

    println!("Run ID: {}", run.id);
    println!("Pipeline: {}", run.pipeline_name);
    println!("State: {}", state_label(&run.state));
    if let RunState::Failed { stage, error } = &run.state {
        println!("Failed at: {} ({})", stage, error);
    }
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }

    println!("\nStage statuses:");
    let mut statuses: Vec<_> = run.stage_statuses.iter().collect();
    statuses.sort_by(|a, b| a.0.cmp(b.0));
    for (stage, status) in statuses {
        println!("  {}: {:?}", stage, status);
    }

    Ok(())
}

/// List recent runs
async fn show_runs(settings: &Settings, limit: usize) -> Result<()> {
    let runs_dir = settings.runs_dir();
    let ids = list_runs(&runs_dir).await?;

    if ids.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<10}", "RUN ID", "PIPELINE", "STATE");
    println!("{}", "-".repeat(62));

    for id in ids.into_iter().take(limit) {
        let journal = RunJournal::open(&runs_dir, id).await?;
        match journal.load_run().await? {
            Some(run) => println!("{:<38} {:<12} {:<10}", run.id, run.pipeline_name, state_label(&run.state)),
            None => println!("{:<38} {:<12} {:<10}", id, "-", "empty"),
        }
    }

    Ok(())
}

fn state_label(state: &RunState) -> &'static str {
    match state {
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Failed { .. } => "failed",
    }
}

fn show_config(settings: &Settings) -> Result<()> {
    println!("dailyforge configuration");
    println!();
    println!(
        "Config file: {}",
        settings
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", settings.home.display());
    println!("  Runs:  {}", settings.runs_dir().display());
    println!("  Cache: {}", settings.cache_dir().display());
    println!();

    let selection = &settings.selection;
    println!("Selection:");
    println!("  Recency window: {}h", selection.recency_hours);
    println!("  Max items:      {}", selection.max_items);
    println!("  Source types:   {}", selection.source_types.join(", "));
    println!("  Allow keywords: {}", selection.allow_keywords.len());
    println!("  Block keywords: {}", selection.block_keywords.len());
    println!();

    println!("Generation:");
    println!("  Endpoint: {}", settings.generation.base_url);
    println!("  Model:    {}", settings.generation.model);
    println!("  Key env:  {}", settings.generation.api_key_env);
    println!();

    println!("Store:");
    if settings.store.is_configured() {
        println!(
            "  {}/{} @ {} (token env {})",
            settings.store.owner, settings.store.repo, settings.store.branch, settings.store.token_env
        );
    } else {
        println!("  (not configured)");
    }
    println!();

    println!("Feeds:");
    if settings.feeds.is_empty() {
        println!("  (none)");
    } else {
        let mut feeds: Vec<_> = settings.feeds.iter().collect();
        feeds.sort();
        for (source_type, url) in feeds {
            println!("  {}: {}", source_type, url);
        }
    }
    println!();

    let limits = &settings.limits;
    println!("Limits:");
    println!("  Max stages:        {}", limits.max_stages);
    println!("  Stage timeout:     {}s", limits.stage_timeout_seconds);
    println!("  Run timeout:       {}s", limits.run_timeout_seconds);
    println!("  Max input size:    {} bytes", limits.max_input_bytes);
    println!("  Max output size:   {} bytes", limits.max_output_bytes);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digest_items() {
        let cli = Cli::try_parse_from(["dailyforge", "digest", "--item", "news:1", "--item", "paper:2", "--publish"])
            .unwrap();
        match cli.command {
            Commands::Digest { items, publish, .. } => {
                assert_eq!(items, vec!["news:1", "paper:2"]);
                assert!(publish);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_podcast_requires_a_source() {
        assert!(Cli::try_parse_from(["dailyforge", "podcast"]).is_err());
        assert!(Cli::try_parse_from(["dailyforge", "podcast", "--from-store", "--input", "x.md"]).is_err());
        assert!(Cli::try_parse_from(["dailyforge", "--dry-run", "podcast", "--from-store"]).is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dailyforge", "runs", "--dry-run", "--config", "c.yaml"]).unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
    }
}
