//! Stage 4: drive the coding agent through two prompts per initialized
//! repository to produce a Spaces manifest and a Gradio demo.
//!
//! With a concurrency above one, repositories are generated in parallel up
//! to that limit. Each result is persisted as soon as it arrives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;

use crate::agent::Agent;
use crate::errors::{ExecError, StoreError};
use crate::exec::CommandOutput;
use crate::model::{GenerationRecord, Outcome, StepName};
use crate::store::Session;

use super::prompts::{build_app_prompt, build_manifest_prompt};
use super::{Tally, begin, skip};

const STEP: StepName = StepName::GradioGeneration;
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(300);
const APP_TIMEOUT: Duration = Duration::from_secs(600);

pub const APP_FILE: &str = "app.py";
pub const README_FILE: &str = "README.md";

fn command_error(result: Result<CommandOutput, ExecError>) -> Option<String> {
    match result {
        Ok(output) if output.success() => None,
        Ok(output) => Some(format!("Command failed (exit code {})", output.exit_code)),
        Err(ExecError::TimedOut { secs, .. }) => {
            Some(format!("Command timed out after {} seconds", secs))
        }
        Err(e) => Some(e.to_string()),
    }
}

/// Generate the manifest and app for one repository checkout.
pub async fn generate_app(agent: &dyn Agent, repo_dir: &Path, languages: &[String]) -> GenerationRecord {
    let mut record = GenerationRecord::default();
    if !repo_dir.is_dir() {
        record.error = Some("Invalid clone path".to_string());
        return record;
    }
    record.attempted = true;

    let manifest = agent
        .run(repo_dir, &build_manifest_prompt(), Some(MANIFEST_TIMEOUT))
        .await;
    if let Some(e) = command_error(manifest) {
        record.error = Some(format!("Failed to update README.md: {}", e));
        return record;
    }
    let readme = repo_dir.join(README_FILE);
    if readme.is_file() {
        record.readme_updated = true;
        record.readme_path = Some(readme);
    }

    let app = agent
        .run(repo_dir, &build_app_prompt(languages), Some(APP_TIMEOUT))
        .await;
    if let Some(e) = command_error(app) {
        record.error = Some(format!("Failed to generate app.py: {}", e));
        return record;
    }
    let app_path = repo_dir.join(APP_FILE);
    if !app_path.is_file() {
        record.error = Some("app.py was not created".to_string());
        return record;
    }
    record.app_created = true;
    record.app_path = Some(app_path);

    if record.readme_updated {
        record.success = true;
        record.generated_at = Some(Utc::now());
    } else {
        record.error = Some("Partial success - some files missing".to_string());
    }
    record
}

/// Returns the number of repositories with a generated app.
///
/// `concurrency` of one runs repositories sequentially.
pub async fn run(
    session: &mut Session,
    idx: usize,
    agent: &dyn Agent,
    concurrency: usize,
) -> Result<Outcome<usize>, StoreError> {
    let eligible: Vec<(String, PathBuf, Vec<String>)> = session
        .entity(idx)
        .repositories
        .iter()
        .filter(|r| r.is_initialized())
        .filter_map(|r| {
            r.clone_path
                .clone()
                .map(|p| (r.url.clone(), p, r.languages.clone()))
        })
        .collect();
    if eligible.is_empty() {
        return skip(session, idx, STEP, "No initialized repositories", false);
    }

    if !agent.ensure_available().await {
        return skip(session, idx, STEP, "Claude CLI not found", true);
    }

    begin(session, idx, STEP)?;
    session
        .entity_mut(idx)
        .processing_steps
        .gradio_generation
        .counters
        .repos_generated = eligible.len();

    let mut tally = Tally::default();
    let mut pending = Vec::new();
    for (url, path, languages) in eligible {
        if session.entity(idx).repository(&url).is_some_and(|r| r.has_app()) {
            tally.already_done += 1;
        } else {
            pending.push((url, path, languages));
        }
    }

    let mut results = futures::stream::iter(pending)
        .map(|(url, path, languages)| async move {
            tracing::info!(repo = %url, "Generating Gradio app");
            let record = generate_app(agent, &path, &languages).await;
            (url, record)
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((url, record)) = results.next().await {
        match &record.error {
            None => tally.record(Ok(())),
            Some(e) => {
                tracing::warn!(repo = %url, error = %e, "Gradio app generation failed");
                tally.record(Err(e.clone()))
            }
        }

        let entity = session.entity_mut(idx);
        if let Some(repo) = entity.repositories.iter_mut().find(|r| r.url == url) {
            repo.gradio_generation = Some(record);
        }
        entity.processing_steps.gradio_generation.counters.apps_created = tally.successes();
        entity.updated_at = Utc::now();
        session.checkpoint()?;
    }

    session
        .entity_mut(idx)
        .processing_steps
        .gradio_generation
        .counters
        .apps_created = tally.successes();
    tally.settle(session, idx, STEP, "app generations")
}
