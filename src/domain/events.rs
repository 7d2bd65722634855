//! Journal events for pipeline runs.
//!
//! Every run transition is recorded as an immutable event in an append-only
//! log, so a run's status can be rebuilt after the process exits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in a run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Stage name (absent for run-level events)
    pub stage: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Input fingerprint: "{run_id}:{stage}:{input_hash}"
    pub fingerprint: String,

    /// Human-readable summary (no prompt bodies, no secrets)
    pub summary: String,

    pub status: StageStatus,

    /// Time taken in milliseconds (completed stages)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        stage: Option<String>,
        event_type: EventType,
        fingerprint: String,
        summary: String,
        status: StageStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            stage,
            event_type,
            fingerprint,
            summary,
            status,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of journal events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCompleted,
    RunFailed,
    StageStarted,
    StageCompleted,
    StageFailed,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::RunStarted => "run_started",
            EventType::RunCompleted => "run_completed",
            EventType::RunFailed => "run_failed",
            EventType::StageStarted => "stage_started",
            EventType::StageCompleted => "stage_completed",
            EventType::StageFailed => "stage_failed",
        };
        f.write_str(name)
    }
}

/// Status of a stage or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet started
    #[default]
    Pending,

    Running,

    Completed,

    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            Some("summarize".to_string()),
            EventType::StageStarted,
            "fp".to_string(),
            "Starting summarize".to_string(),
            StageStatus::Running,
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"stage_started\""));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, EventType::StageStarted);
        assert_eq!(parsed.status, StageStatus::Running);
    }

    #[test]
    fn test_event_builders() {
        let event = Event::new(
            Uuid::new_v4(),
            Some("highlight".to_string()),
            EventType::StageFailed,
            "fp".to_string(),
            "highlight failed".to_string(),
            StageStatus::Failed,
        )
        .with_duration(1500)
        .with_error("stream closed".to_string());

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error.as_deref(), Some("stream closed"));
    }
}
