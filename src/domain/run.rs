//! Pipeline run state and reconstruction from journal events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DigestError;
use super::events::{Event, EventType, StageStatus};
use super::stage::StageResult;

/// A single execution of a pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline_name: String,

    pub state: RunState,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Results of completed stages, in execution order
    pub stages: Vec<StageResult>,

    /// Status of each stage (stage name -> status)
    pub stage_statuses: HashMap<String, StageStatus>,
}

impl PipelineRun {
    pub fn new(id: Uuid, pipeline_name: impl Into<String>) -> Self {
        Self {
            id,
            pipeline_name: pipeline_name.into(),
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            stages: Vec::new(),
            stage_statuses: HashMap::new(),
        }
    }

    /// Rebuild run status from journal events
    ///
    /// Stage outputs are not part of the event stream, so the rebuilt run
    /// carries statuses only; `stages` stays empty.
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first = events.first()?;

        let mut run = Self {
            id: first.run_id,
            pipeline_name: String::new(),
            state: RunState::Running,
            started_at: first.timestamp,
            completed_at: None,
            stages: Vec::new(),
            stage_statuses: HashMap::new(),
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
                if let Some(name) = event.summary.strip_prefix("pipeline ") {
                    self.pipeline_name = name.to_string();
                }
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    stage: event.stage.clone().unwrap_or_default(),
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StageStarted => self.set_status(event, StageStatus::Running),
            EventType::StageCompleted => self.set_status(event, StageStatus::Completed),
            EventType::StageFailed => self.set_status(event, StageStatus::Failed),
        }
    }

    fn set_status(&mut self, event: &Event, status: StageStatus) {
        if let Some(ref stage) = event.stage {
            self.stage_statuses.insert(stage.clone(), status);
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }

    pub fn is_stage_completed(&self, stage: &str) -> bool {
        self.stage_statuses
            .get(stage)
            .map(|s| *s == StageStatus::Completed)
            .unwrap_or(false)
    }

    /// Sanitized output of a completed stage
    pub fn output_of(&self, stage: &str) -> Option<&str> {
        super::stage::find_stage(&self.stages, stage).map(|s| s.sanitized_output.as_str())
    }

    /// Stage results of a completed run, or a `Stage` error carrying the
    /// results produced before the failure
    pub fn into_stages(self) -> Result<Vec<StageResult>, DigestError> {
        match self.state {
            RunState::Completed => Ok(self.stages),
            RunState::Failed { stage, error } => Err(DigestError::Stage {
                run_id: self.id,
                pipeline: self.pipeline_name,
                stage,
                message: error,
                completed: self.stages,
            }),
            RunState::Running => Err(DigestError::Stage {
                run_id: self.id,
                pipeline: self.pipeline_name,
                stage: String::new(),
                message: "run did not finish".to_string(),
                completed: self.stages,
            }),
        }
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    #[default]
    Running,

    Completed,

    /// Failed at `stage`; later stages never ran
    Failed { stage: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(run_id: Uuid, stage: Option<&str>, event_type: EventType, status: StageStatus) -> Event {
        Event::new(
            run_id,
            stage.map(str::to_string),
            event_type,
            format!("{}:{}", run_id, stage.unwrap_or("run")),
            "pipeline digest".to_string(),
            status,
        )
    }

    #[test]
    fn test_run_from_events_completed() {
        let run_id = Uuid::new_v4();
        let events = vec![
            event(run_id, None, EventType::RunStarted, StageStatus::Running),
            event(run_id, Some("summarize"), EventType::StageStarted, StageStatus::Running),
            event(run_id, Some("summarize"), EventType::StageCompleted, StageStatus::Completed),
            event(run_id, None, EventType::RunCompleted, StageStatus::Completed),
        ];

        let run = PipelineRun::from_events(&events).unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.pipeline_name, "digest");
        assert!(run.is_completed());
        assert!(run.is_stage_completed("summarize"));
    }

    #[test]
    fn test_run_from_events_failed() {
        let run_id = Uuid::new_v4();
        let events = vec![
            event(run_id, None, EventType::RunStarted, StageStatus::Running),
            event(run_id, Some("highlight"), EventType::StageFailed, StageStatus::Failed),
            event(run_id, Some("highlight"), EventType::RunFailed, StageStatus::Failed)
                .with_error("empty".to_string()),
        ];

        let run = PipelineRun::from_events(&events).unwrap();
        assert_eq!(
            run.state,
            RunState::Failed {
                stage: "highlight".to_string(),
                error: "empty".to_string()
            }
        );
        assert!(PipelineRun::from_events(&[]).is_none());
    }

    #[test]
    fn test_into_stages_preserves_partial_results() {
        let mut run = PipelineRun::new(Uuid::new_v4(), "digest");
        run.stages.push(StageResult::new(
            "summarize",
            "s".into(),
            "s".into(),
            String::new(),
            String::new(),
            1,
        ));
        run.state = RunState::Failed {
            stage: "highlight".to_string(),
            error: "timeout".to_string(),
        };

        match run.into_stages() {
            Err(DigestError::Stage { stage, completed, .. }) => {
                assert_eq!(stage, "highlight");
                assert_eq!(completed.len(), 1);
                assert_eq!(completed[0].stage_name, "summarize");
            }
            other => panic!("expected stage error, got {:?}", other),
        }
    }
}
