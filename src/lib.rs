//! dailyforge - daily digest generator
//!
//! Builds a daily digest from upstream feed items:
//! - Items are loaded per source type (cache first) and filtered by
//!   recency, keywords and duplicate titles
//! - The selection is rendered into a seed and run through a chain of
//!   streaming generation stages, each stage reading an earlier output
//! - Stage outputs are composed into Markdown documents and committed to a
//!   versioned store
//!
//! Every pipeline run is journaled as JSONL events so its status can be
//! inspected after the fact.
//!
//! # Modules
//!
//! - `adapters`: Generation, cache, store and feed integrations
//! - `core`: Selection, orchestration, composition, publishing
//! - `domain`: Items, runs, events, errors
//! - `config`: YAML config and resolved settings
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Daily job for today
//! dailyforge run
//!
//! # Preview selection
//! dailyforge select --date 2024-01-01
//!
//! # Digest from hand-picked items without calling out
//! dailyforge --dry-run digest --item news:42 --item paper:7
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::Settings;
pub use core::{DailyJob, Orchestrator, PipelineDefinition};
pub use domain::{CandidateItem, DigestError, Event, EventType, PipelineRun, RunState};
