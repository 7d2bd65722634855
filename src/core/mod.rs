//! Core digest logic.
//!
//! - Selector: item filtering and ordering
//! - Aggregator / Sanitize: turning fragment streams into clean text
//! - Pipeline / Orchestrator / Limits: sequential stage execution
//! - Journal: per-run event log
//! - Compose / Publisher: documents and commits
//! - Pool / Daily: item loading and the end-to-end job

pub mod aggregator;
pub mod compose;
pub mod daily;
pub mod journal;
pub mod limits;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod publisher;
pub mod sanitize;
pub mod selector;

pub use aggregator::aggregate;
pub use compose::{compose_digest, compose_podcast, compose_prompts, PipelineBundle};
pub use daily::{today, DailyJob, DailyOutcome, DailyReport, DigestBundle};
pub use journal::{hash_input, list_runs, stage_fingerprint, RunJournal};
pub use limits::{LimitViolation, RunTracker, StageLimits};
pub use orchestrator::Orchestrator;
pub use pipeline::{BuiltinPipeline, InputSource, PipelineDefinition, StageSpec};
pub use pool::{load_pool, render_seed, resolve_selection, ItemPool};
pub use publisher::Publisher;
pub use sanitize::{normalize_quotes, sanitize};
pub use selector::{select, RejectReason, Rejection, SelectionReport, SelectionRules};
