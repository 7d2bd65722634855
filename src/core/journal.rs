//! Per-run journal with file-based persistence.
//!
//! Each run gets a directory under the runs root:
//!
//! ```text
//! {runs_dir}/{run_id}/events.jsonl     append-only event log
//! {runs_dir}/{run_id}/stages/{name}.md sanitized stage outputs
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Event, EventType, PipelineRun};

/// File-based journal for one run, events stored as JSONL
pub struct RunJournal {
    run_dir: PathBuf,
    events_path: PathBuf,
    stages_dir: PathBuf,
}

impl RunJournal {
    /// Create or open the journal for a run under `runs_dir`
    pub async fn open(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = runs_dir.join(run_id.to_string());
        let stages_dir = run_dir.join("stages");

        fs::create_dir_all(&stages_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", stages_dir.display()))?;

        Ok(Self {
            events_path: run_dir.join("events.jsonl"),
            run_dir,
            stages_dir,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Store a stage's sanitized output
    pub async fn store_stage_output(&self, stage: &str, content: &str) -> Result<PathBuf> {
        let path = self.stages_dir.join(format!("{}.md", stage));

        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write stage output: {}", path.display()))?;

        Ok(path)
    }

    pub async fn load_stage_output(&self, stage: &str) -> Result<Option<String>> {
        let path = self.stages_dir.join(format!("{}.md", stage));

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read stage output: {}", path.display()))?;

        Ok(Some(content))
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild the run's status from its events
    pub async fn load_run(&self) -> Result<Option<PipelineRun>> {
        let events = self.replay().await?;
        Ok(PipelineRun::from_events(&events))
    }

    /// Last event of a given type
    pub async fn last_event_of_type(&self, event_type: EventType) -> Result<Option<Event>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }
}

/// List run IDs under `runs_dir`, newest directory first
pub async fn list_runs(runs_dir: &Path) -> Result<Vec<Uuid>> {
    if !runs_dir.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    let mut entries = fs::read_dir(runs_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Ok(uuid) = Uuid::parse_str(&name) {
            let modified = entry.metadata().await.and_then(|m| m.modified()).ok();
            runs.push((modified, uuid));
        }
    }

    runs.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(runs.into_iter().map(|(_, id)| id).collect())
}

/// Fingerprint of a stage input: "{run_id}:{stage}:{hash16}"
pub fn stage_fingerprint(run_id: Uuid, stage: &str, input: &str) -> String {
    format!("{}:{}:{}", run_id, stage, hash_input(input))
}

/// First 16 hex chars of the SHA-256 of `input`
pub fn hash_input(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunState, StageStatus};
    use tempfile::TempDir;

    fn event(run_id: Uuid, stage: Option<&str>, event_type: EventType, status: StageStatus) -> Event {
        Event::new(
            run_id,
            stage.map(str::to_string),
            event_type,
            stage_fingerprint(run_id, stage.unwrap_or("run"), "seed"),
            format!("{} event", event_type),
            status,
        )
    }

    #[tokio::test]
    async fn test_append_and_replay_in_order() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let journal = RunJournal::open(temp.path(), run_id).await.unwrap();

        for i in 0..5 {
            let stage = format!("stage{}", i);
            journal
                .append(&event(run_id, Some(&stage), EventType::StageStarted, StageStatus::Running))
                .await
                .unwrap();
        }

        let events = journal.replay().await.unwrap();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.stage, Some(format!("stage{}", i)));
        }
    }

    #[tokio::test]
    async fn test_load_run_and_stage_outputs() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let journal = RunJournal::open(temp.path(), run_id).await.unwrap();

        assert!(journal.load_run().await.unwrap().is_none());

        journal
            .append(&event(run_id, None, EventType::RunStarted, StageStatus::Running))
            .await
            .unwrap();
        journal
            .append(&event(run_id, Some("summarize"), EventType::StageCompleted, StageStatus::Completed))
            .await
            .unwrap();
        journal
            .append(&event(run_id, None, EventType::RunCompleted, StageStatus::Completed))
            .await
            .unwrap();
        journal.store_stage_output("summarize", "## Summary").await.unwrap();

        let run = journal.load_run().await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert!(run.is_stage_completed("summarize"));
        assert_eq!(
            journal.load_stage_output("summarize").await.unwrap().as_deref(),
            Some("## Summary")
        );
        assert!(journal.load_stage_output("highlight").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs_ignores_other_entries() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        RunJournal::open(temp.path(), run_id).await.unwrap();
        std::fs::create_dir_all(temp.path().join("not-a-run")).unwrap();
        std::fs::write(temp.path().join("stray.txt"), "x").unwrap();

        assert_eq!(list_runs(temp.path()).await.unwrap(), vec![run_id]);
        assert!(list_runs(&temp.path().join("missing")).await.unwrap().is_empty());
    }

    #[test]
    fn test_fingerprint_format() {
        let run_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = stage_fingerprint(run_id, "summarize", "test input");

        assert!(key.starts_with("550e8400-e29b-41d4-a716-446655440000:summarize:"));
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_input_hash_consistency() {
        assert_eq!(hash_input("test input"), hash_input("test input"));
        assert_ne!(hash_input("test input"), hash_input("different input"));
    }
}
