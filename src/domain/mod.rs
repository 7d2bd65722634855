//! Domain types for dailyforge.
//!
//! - Items: feed entries and `type:id` references
//! - Events: journal records of run transitions
//! - Run: pipeline execution state
//! - Stage: per-stage outputs
//! - Publish: artifacts and commit outcomes

pub mod error;
pub mod events;
pub mod item;
pub mod publish;
pub mod run;
pub mod stage;

pub use error::DigestError;
pub use events::{Event, EventType, StageStatus};
pub use item::{parse_timestamp, strip_html, CandidateItem, InvalidItemRef, ItemDetails, ItemKind, ItemRef};
pub use publish::{PublishAction, PublishArtifact, PublishOutcome};
pub use run::{PipelineRun, RunState};
pub use stage::StageResult;
