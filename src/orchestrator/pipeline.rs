use std::time::Duration;

use crate::agent::Agent;
use crate::config::Config;
use crate::discovery::PageSource;
use crate::errors::{PipelineError, StoreError};
use crate::hub::SpaceHost;
use crate::model::{Entity, Outcome, StepName, StepStatus};
use crate::repos::Cloner;
use crate::stages::{claude_init, gradio, link_extraction, repo_analysis, space_upload};
use crate::store::{EntityStore, Session};

use super::manual::{manual_entity_id, manual_title, validate_url};
use super::summary::{BatchSummary, ManualReport, RetrySummary};

/// Base of the linear backoff between Space upload attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// External systems the stages talk to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub pages: &'a dyn PageSource,
    pub cloner: &'a dyn Cloner,
    pub agent: &'a dyn Agent,
    pub host: &'a dyn SpaceHost,
}

/// What happened to one entity in a single pass.
#[derive(Debug, Default)]
struct EntityRun {
    repos_cloned: usize,
    /// The stage that stopped the pass and its message.
    failure: Option<(StepName, String)>,
}

/// First step that still has work: not completed and not skipped.
fn resume_point(entity: &Entity) -> Option<StepName> {
    StepName::ALL
        .into_iter()
        .find(|step| !entity.step_status(*step).is_settled())
}

/// Whether `retry_failed` should re-dispatch `step` for this entity.
fn retry_due(entity: &Entity, step: StepName) -> bool {
    let status = entity.step_status(step);
    if status == StepStatus::Error {
        return true;
    }
    let ready = step
        .prerequisite()
        .is_none_or(|p| entity.step_status(p).is_settled());
    status.is_unfinished() && ready
}

pub struct Pipeline<'a> {
    config: &'a Config,
    parts: Collaborators<'a>,
    retry_delay: Duration,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, parts: Collaborators<'a>) -> Self {
        Self {
            config,
            parts,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn open_session(&self) -> Result<Session, StoreError> {
        Session::open(EntityStore::new(self.config.database_path.clone()))
    }

    fn generation_concurrency(&self) -> usize {
        if self.config.pipeline.parallel_generation {
            self.config.generation_concurrency()
        } else {
            1
        }
    }

    async fn run_stage(
        &self,
        session: &mut Session,
        idx: usize,
        step: StepName,
    ) -> Result<Outcome<usize>, StoreError> {
        match step {
            StepName::LinkExtraction => link_extraction::run(session, idx, self.parts.pages).await,
            StepName::RepoAnalysis => {
                repo_analysis::run(session, idx, self.parts.cloner, &self.config.repos_path).await
            }
            StepName::ClaudeInit => {
                claude_init::run(session, idx, self.parts.agent, &self.config.claude).await
            }
            StepName::GradioGeneration => {
                gradio::run(session, idx, self.parts.agent, self.generation_concurrency()).await
            }
            StepName::SpaceUpload => {
                space_upload::run(
                    session,
                    idx,
                    self.parts.host,
                    &self.config.hub,
                    self.retry_delay,
                )
                .await
            }
        }
    }

    /// Run `first` and every later stage in order, stopping at a failure.
    async fn run_from(
        &self,
        session: &mut Session,
        idx: usize,
        first: StepName,
    ) -> Result<EntityRun, StoreError> {
        let mut run = EntityRun::default();
        for step in StepName::ALL.into_iter().filter(|s| *s >= first) {
            match self.run_stage(session, idx, step).await? {
                Outcome::Succeeded(count) => {
                    if step == StepName::RepoAnalysis {
                        run.repos_cloned += count;
                    }
                }
                Outcome::Skipped(reason) => {
                    tracing::debug!(entity = %session.entity(idx).id, step = %step, reason = %reason, "Stage skipped");
                }
                Outcome::Failed(error) => {
                    run.failure = Some((step, error));
                    break;
                }
            }
        }
        Ok(run)
    }

    /// Process the daily listing for `date` (today when `None`).
    ///
    /// New papers run from the start, known ones resume at their first
    /// unsettled step, and fully settled ones are left untouched.
    pub async fn process_batch(&self, date: Option<&str>) -> Result<BatchSummary, PipelineError> {
        let mut session = self.open_session()?;

        let retry = if self.config.pipeline.auto_retry_failed {
            Some(self.retry_in(&mut session).await?)
        } else {
            None
        };

        let papers = match self.parts.pages.daily_papers(date).await {
            Ok(papers) => papers,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch daily papers");
                Vec::new()
            }
        };
        tracing::info!(count = papers.len(), date = ?date, "Papers found");

        let mut summary = BatchSummary {
            found: papers.len(),
            retry,
            ..BatchSummary::default()
        };

        for paper in &papers {
            let (idx, first) = match session.position(&paper.id) {
                Some(idx) => (idx, resume_point(session.entity(idx))),
                None => {
                    let idx = session.upsert(Entity::discovered(&paper.id, &paper.title));
                    (idx, Some(StepName::LinkExtraction))
                }
            };
            let Some(first) = first else {
                tracing::debug!(paper = %paper.id, "Already processed");
                summary.skipped += 1;
                summary.skipped_ids.push(paper.id.clone());
                continue;
            };

            tracing::info!(paper = %paper.id, from = %first, "Processing paper");
            let run = self.run_from(&mut session, idx, first).await?;
            summary.repos_cloned += run.repos_cloned;
            match run.failure {
                Some((step, error)) => {
                    tracing::warn!(paper = %paper.id, step = %step, error = %error, "Paper stopped");
                    summary.errored += 1;
                    summary.errored_ids.push(paper.id.clone());
                }
                None => summary.processed += 1,
            }
        }

        summary.total_in_database = session.entities().len();
        Ok(summary)
    }

    /// Run a manually submitted URL through the pipeline.
    pub async fn process_manual_url(
        &self,
        url: &str,
        title: Option<&str>,
    ) -> Result<ManualReport, PipelineError> {
        let url = validate_url(url)?;
        let id = manual_entity_id(&url);
        let mut session = self.open_session()?;

        if let Some(idx) = session.position(&id)
            && session.entity(idx).step_status(StepName::LinkExtraction) == StepStatus::Completed
        {
            tracing::info!(entity = %id, "URL already processed");
            return Ok(ManualReport::AlreadyProcessed { id });
        }

        let title = manual_title(&url, title);
        let idx = session.upsert(Entity::manual(&id, &title, &url));
        tracing::info!(entity = %id, url = %url, "Processing manual URL");
        let run = self.run_from(&mut session, idx, StepName::LinkExtraction).await?;

        Ok(ManualReport::Processed {
            links: session.entity(idx).links.clone(),
            id,
            title,
            url,
            repos_cloned: run.repos_cloned,
            error: run.failure.map(|(_, error)| error),
        })
    }

    /// Re-dispatch errored stages, and pending stages whose prerequisite has
    /// settled, for every entity with an error.
    ///
    /// A failed link extraction is reported for review and never retried.
    pub async fn retry_failed(&self) -> Result<RetrySummary, PipelineError> {
        let mut session = self.open_session()?;
        Ok(self.retry_in(&mut session).await?)
    }

    async fn retry_in(&self, session: &mut Session) -> Result<RetrySummary, StoreError> {
        let failed: Vec<usize> = (0..session.entities().len())
            .filter(|idx| session.entity(*idx).has_error())
            .collect();
        let mut summary = RetrySummary {
            failed_found: failed.len(),
            ..RetrySummary::default()
        };
        tracing::info!(count = failed.len(), "Failed entities found");

        for idx in failed {
            let id = session.entity(idx).id.clone();
            if session.entity(idx).step_status(StepName::LinkExtraction) == StepStatus::Error {
                tracing::warn!(entity = %id, "Link extraction failed; needs manual review");
                summary.needs_review.push(id);
                continue;
            }

            let mut dispatched = false;
            let mut failing = false;
            for step in StepName::ALL {
                if !retry_due(session.entity(idx), step) {
                    continue;
                }
                dispatched = true;
                tracing::info!(entity = %id, step = %step, "Retrying stage");
                if self.run_stage(session, idx, step).await?.is_failed() {
                    failing = true;
                    break;
                }
            }

            if dispatched {
                summary.retried += 1;
            }
            if failing {
                summary.still_failing += 1;
            }
        }

        Ok(summary)
    }
}
