//! Typed records for the persisted entity store.
//!
//! - `status` — step, aggregate, repository, and entry-type enums
//! - `entity` — `Entity`, its step records, and `Repository` sub-entities
//! - `outcome` — `Outcome<T>` separating skips from failures

mod entity;
mod outcome;
mod status;

pub use entity::{
    ClaudeInitCounters, ClaudeInitRecord, Entity, GenerationCounters, GenerationRecord,
    LinkCategory, Links, NoCounters, ProcessingSteps, RepoAnalysisCounters, Repository,
    StepRecord, StepState, UploadCounters, UploadRecord,
};
pub use outcome::Outcome;
pub use status::{
    AggregateStatus, EntryType, FailureKind, RepoStatus, StepName, StepStatus,
};
