//! Drives entities through the five stages.
//!
//! Resume decisions read the per-step records only. A new entity runs from
//! link extraction; a known one runs from its first step that is neither
//! completed nor skipped. A stage that fails stops the entity so later steps
//! stay pending for [`Pipeline::retry_failed`].

pub mod manual;
mod pipeline;
pub mod summary;

pub use pipeline::{Collaborators, DEFAULT_RETRY_DELAY, Pipeline};
pub use summary::{BatchSummary, ManualReport, RetrySummary};
