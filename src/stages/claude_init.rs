//! Stage 3: run the coding agent's `/init` in each cloned repository.
//!
//! Success is judged by the `CLAUDE.md` marker file, not by the exit code
//! alone.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::agent::{Agent, AgentFailure};
use crate::config::ClaudeSettings;
use crate::errors::StoreError;
use crate::model::{ClaudeInitRecord, Outcome, StepName};
use crate::store::Session;

use super::{Tally, begin, skip};

const STEP: StepName = StepName::ClaudeInit;
pub const MARKER_FILE: &str = "CLAUDE.md";
const INIT_COMMAND: &str = "/init";

/// Run `/init` in `repo_dir` and check for the marker file.
pub async fn init_repository(
    agent: &dyn Agent,
    repo_dir: &Path,
    timeout: Option<Duration>,
) -> Result<PathBuf, AgentFailure> {
    let output = agent
        .run(repo_dir, INIT_COMMAND, timeout)
        .await
        .map_err(|e| AgentFailure::from_exec(&e))?;

    if !output.success() {
        return Err(AgentFailure::classify(output.exit_code, &output.combined_output));
    }

    let marker = repo_dir.join(MARKER_FILE);
    if marker.is_file() {
        Ok(marker)
    } else {
        Err(AgentFailure::MarkerMissing)
    }
}

/// Returns the number of initialized repositories.
pub async fn run(
    session: &mut Session,
    idx: usize,
    agent: &dyn Agent,
    settings: &ClaudeSettings,
) -> Result<Outcome<usize>, StoreError> {
    if !settings.init_enabled {
        return skip(session, idx, STEP, "Claude /init disabled", true);
    }

    let eligible: Vec<(String, PathBuf)> = session
        .entity(idx)
        .repositories
        .iter()
        .filter(|r| r.is_cloned() && r.has_code)
        .filter_map(|r| r.clone_path.clone().map(|p| (r.url.clone(), p)))
        .collect();
    if eligible.is_empty() {
        return skip(session, idx, STEP, "No cloned repositories with code", false);
    }

    if !agent.ensure_available().await {
        session
            .entity_mut(idx)
            .processing_steps
            .claude_init
            .counters
            .claude_available = false;
        return skip(session, idx, STEP, "Claude CLI not found", true);
    }

    begin(session, idx, STEP)?;
    session
        .entity_mut(idx)
        .processing_steps
        .claude_init
        .counters
        .claude_available = true;
    let mut tally = Tally::default();

    for (url, path) in eligible {
        if session
            .entity(idx)
            .repository(&url)
            .is_some_and(|r| r.is_initialized())
        {
            tally.already_done += 1;
            continue;
        }

        tracing::info!(repo = %url, path = %path.display(), "Running Claude /init");
        let mut record = ClaudeInitRecord {
            attempted: true,
            claude_available: true,
            ..ClaudeInitRecord::default()
        };
        if !path.is_dir() {
            let error = format!("Checkout {} no longer exists", path.display());
            tracing::warn!(repo = %url, error = %error, "Claude /init skipped");
            record.error = Some(error.clone());
            tally.record(Err(error));
        } else {
            match init_repository(agent, &path, settings.init_timeout).await {
                Ok(marker) => {
                    record.success = true;
                    record.claude_md_path = Some(marker);
                    record.initialized_at = Some(Utc::now());
                    tally.record(Ok(()));
                }
                Err(failure) => {
                    tracing::warn!(repo = %url, error = %failure, kind = failure.kind().as_str(), "Claude /init failed");
                    record.error = Some(failure.to_string());
                    record.error_kind = Some(failure.kind());
                    tally.record(Err(failure.to_string()));
                }
            }
        }

        let entity = session.entity_mut(idx);
        if let Some(repo) = entity.repositories.iter_mut().find(|r| r.url == url) {
            repo.claude_init = Some(record);
        }
        entity.processing_steps.claude_init.counters.repos_initialized = tally.successes();
        entity.updated_at = Utc::now();
        session.checkpoint()?;
    }

    session
        .entity_mut(idx)
        .processing_steps
        .claude_init
        .counters
        .repos_initialized = tally.successes();
    tally.settle(session, idx, STEP, "initializations")
}
