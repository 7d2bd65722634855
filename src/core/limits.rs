//! Stage limits for pipeline execution.
//!
//! Bounds a run through configurable limits on:
//! - Number of stages
//! - Input/output sizes per stage
//! - Per-stage and per-run timeouts

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits applied to every stage of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLimits {
    /// Maximum number of stages per run (default: 16)
    #[serde(default = "default_max_stages")]
    pub max_stages: u32,

    /// Maximum user input size in bytes (default: 2MB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Maximum generated output size in bytes (default: 2MB)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,

    /// Per-stage timeout in seconds, covering the whole stream (default: 600)
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,

    /// Total run timeout in seconds (default: 3600)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
}

fn default_max_stages() -> u32 {
    16
}
fn default_max_input_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_max_output_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_stage_timeout() -> u64 {
    600
}
fn default_run_timeout() -> u64 {
    3600
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_stages: default_max_stages(),
            max_input_bytes: default_max_input_bytes(),
            max_output_bytes: default_max_output_bytes(),
            stage_timeout_seconds: default_stage_timeout(),
            run_timeout_seconds: default_run_timeout(),
        }
    }
}

impl StageLimits {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    /// Validate a stage's user input against the size limit
    pub fn validate_input(&self, input: &str) -> Result<(), LimitViolation> {
        let size = input.len() as u64;
        if size > self.max_input_bytes {
            return Err(LimitViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }
        Ok(())
    }

    /// Validate a stage's generated output against the size limit
    pub fn validate_output(&self, output: &str) -> Result<(), LimitViolation> {
        let size = output.len() as u64;
        if size > self.max_output_bytes {
            return Err(LimitViolation::MaxOutputBytes {
                actual: size,
                limit: self.max_output_bytes,
            });
        }
        Ok(())
    }

    /// Check the tracker before starting another stage
    pub fn check(&self, tracker: &RunTracker) -> Result<(), LimitViolation> {
        if tracker.stages_executed >= self.max_stages {
            return Err(LimitViolation::MaxStages {
                actual: tracker.stages_executed,
                limit: self.max_stages,
            });
        }

        let elapsed = tracker.elapsed_seconds();
        if elapsed >= self.run_timeout_seconds {
            return Err(LimitViolation::RunTimeout {
                elapsed_seconds: elapsed,
                limit_seconds: self.run_timeout_seconds,
            });
        }

        Ok(())
    }
}

/// Tracks resource usage during a run
#[derive(Debug, Clone)]
pub struct RunTracker {
    pub stages_executed: u32,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub started_at: Instant,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            stages_executed: 0,
            input_bytes: 0,
            output_bytes: 0,
            started_at: Instant::now(),
        }
    }

    /// Record a completed stage
    pub fn record_stage(&mut self, input_bytes: u64, output_bytes: u64) {
        self.stages_executed += 1;
        self.input_bytes += input_bytes;
        self.output_bytes += output_bytes;
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Limit violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("Maximum stages exceeded: {actual} >= {limit}")]
    MaxStages { actual: u32, limit: u32 },

    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: u64, limit: u64 },

    #[error("Maximum output bytes exceeded: {actual} > {limit}")]
    MaxOutputBytes { actual: u64, limit: u64 },

    #[error("Run timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    RunTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = StageLimits::default();
        assert_eq!(limits.max_stages, 16);
        assert_eq!(limits.max_input_bytes, 2 * 1024 * 1024);
        assert_eq!(limits.stage_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let limits: StageLimits = serde_yaml::from_str("stage_timeout_seconds: 30").unwrap();
        assert_eq!(limits.stage_timeout_seconds, 30);
        assert_eq!(limits.max_stages, 16);
    }

    #[test]
    fn test_output_validation() {
        let limits = StageLimits {
            max_output_bytes: 4,
            ..Default::default()
        };

        assert!(limits.validate_output("abcd").is_ok());
        assert_eq!(
            limits.validate_output("abcde"),
            Err(LimitViolation::MaxOutputBytes { actual: 5, limit: 4 })
        );
    }

    #[test]
    fn test_tracker_stage_counting() {
        let limits = StageLimits {
            max_stages: 1,
            ..Default::default()
        };

        let mut tracker = RunTracker::new();
        assert!(limits.check(&tracker).is_ok());

        tracker.record_stage(10, 10);
        assert!(matches!(
            limits.check(&tracker),
            Err(LimitViolation::MaxStages { .. })
        ));
    }
}
