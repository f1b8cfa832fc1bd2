//! The five stage executors.
//!
//! | Stage | Module | Work item |
//! |-------|--------|-----------|
//! | link_extraction | [`link_extraction`] | the entity's page |
//! | repo_analysis | [`repo_analysis`] | each code URL |
//! | claude_init | [`claude_init`] | each cloned repository with code |
//! | gradio_generation | [`gradio`] | each initialized repository |
//! | space_upload | [`space_upload`] | each repository with an app |
//!
//! Every executor takes the session and the entity's index, marks its step
//! `in_progress`, persists after each work item, and settles the step. Only
//! store failures escape as `Err`; everything else becomes an [`Outcome`].

pub mod claude_init;
pub mod gradio;
pub mod link_extraction;
pub mod prompts;
pub mod repo_analysis;
pub mod space_upload;

#[cfg(test)]
pub(crate) mod testing;

use crate::errors::StoreError;
use crate::model::{AggregateStatus, Outcome, StepName, StepStatus};
use crate::store::Session;

/// Mark `step` as running and persist.
pub(crate) fn begin(session: &mut Session, idx: usize, step: StepName) -> Result<(), StoreError> {
    let entity = session.entity_mut(idx);
    entity.set_step(step, StepStatus::InProgress, None);
    entity.set_aggregate(step.running_status());
    tracing::info!(entity = %entity.id, step = %step, "Stage started");
    session.checkpoint()
}

/// Settle `step` with `status` and persist.
pub(crate) fn finish(
    session: &mut Session,
    idx: usize,
    step: StepName,
    status: StepStatus,
    message: Option<String>,
) -> Result<(), StoreError> {
    let entity = session.entity_mut(idx);
    entity.set_step(step, status, message.clone());
    let aggregate = if status == StepStatus::Error {
        AggregateStatus::Error
    } else {
        step.settled_status()
    };
    entity.set_aggregate(aggregate);

    match status {
        StepStatus::Error => {
            tracing::warn!(entity = %entity.id, step = %step, error = ?message, "Stage failed")
        }
        _ => tracing::info!(entity = %entity.id, step = %step, status = %status, note = ?message, "Stage settled"),
    }
    session.checkpoint()
}

/// Settle `step` as skipped. `reason` is recorded on the step when given.
pub(crate) fn skip<T>(
    session: &mut Session,
    idx: usize,
    step: StepName,
    reason: &str,
    record_reason: bool,
) -> Result<Outcome<T>, StoreError> {
    let message = record_reason.then(|| reason.to_string());
    finish(session, idx, step, StepStatus::Skipped, message)?;
    Ok(Outcome::skipped(reason))
}

/// Per-repository results for one stage invocation.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    /// Work items attempted in this invocation.
    pub attempted: usize,
    /// Attempts that succeeded.
    pub succeeded: usize,
    /// Items that had already succeeded earlier and were not re-run.
    pub already_done: usize,
    pub first_error: Option<String>,
}

impl Tally {
    pub fn record(&mut self, result: Result<(), String>) {
        self.attempted += 1;
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => {
                if self.first_error.is_none() {
                    self.first_error = Some(e);
                }
            }
        }
    }

    pub fn total(&self) -> usize {
        self.attempted + self.already_done
    }

    pub fn successes(&self) -> usize {
        self.succeeded + self.already_done
    }

    pub fn failures(&self) -> usize {
        self.attempted - self.succeeded
    }

    /// `completed` when anything succeeded (noting partial failures),
    /// `error` when every item failed.
    pub fn settle(
        &self,
        session: &mut Session,
        idx: usize,
        step: StepName,
        noun: &str,
    ) -> Result<Outcome<usize>, StoreError> {
        if self.failures() == 0 {
            finish(session, idx, step, StepStatus::Completed, None)?;
            return Ok(Outcome::Succeeded(self.successes()));
        }

        if self.successes() == 0 {
            let mut message = format!("All {} {} failed", self.total(), noun);
            if let Some(first) = &self.first_error {
                message.push_str(": ");
                message.push_str(first);
            }
            finish(session, idx, step, StepStatus::Error, Some(message.clone()))?;
            return Ok(Outcome::Failed(message));
        }

        let message = format!("{} of {} {} failed", self.failures(), self.total(), noun);
        finish(session, idx, step, StepStatus::Completed, Some(message))?;
        Ok(Outcome::Succeeded(self.successes()))
    }
}
