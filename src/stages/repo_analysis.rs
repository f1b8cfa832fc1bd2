//! Stage 2: clone every code URL and take a census of each checkout.

use std::collections::HashSet;
use std::path::Path;

use crate::errors::StoreError;
use crate::model::{Outcome, StepName};
use crate::repos::{Cloner, clone_repository, parse_github_url};
use crate::store::Session;

use super::{Tally, begin, skip};

const STEP: StepName = StepName::RepoAnalysis;

/// Returns the number of cloned repositories.
///
/// URLs naming the same `owner/name` share one checkout, so only the first of
/// them is cloned. URLs already cloned (with the checkout still on disk) are
/// counted without cloning again. The store is persisted after every
/// repository.
pub async fn run(
    session: &mut Session,
    idx: usize,
    cloner: &dyn Cloner,
    repos_root: &Path,
) -> Result<Outcome<usize>, StoreError> {
    let urls = clone_targets(&session.entity(idx).links.code_repositories);
    if urls.is_empty() {
        let counters = &mut session.entity_mut(idx).processing_steps.repo_analysis.counters;
        counters.repos_found = 0;
        counters.repos_cloned = 0;
        return skip(session, idx, STEP, "No code repositories found", false);
    }

    begin(session, idx, STEP)?;
    let entity_id = session.entity(idx).id.clone();
    let mut tally = Tally::default();

    for url in &urls {
        let already_cloned = session.entity(idx).repository(url).is_some_and(|r| {
            r.is_cloned() && r.clone_path.as_ref().is_some_and(|p| p.exists())
        });
        if already_cloned {
            tracing::debug!(url = %url, "Repository already cloned");
            tally.already_done += 1;
            continue;
        }

        let record = clone_repository(cloner, url, &entity_id, repos_root).await;
        tally.record(match &record.error {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        });

        let entity = session.entity_mut(idx);
        entity.upsert_repository(record);
        let counters = &mut entity.processing_steps.repo_analysis.counters;
        counters.repos_found = urls.len();
        counters.repos_cloned = tally.successes();
        session.checkpoint()?;
    }

    let counters = &mut session.entity_mut(idx).processing_steps.repo_analysis.counters;
    counters.repos_found = urls.len();
    counters.repos_cloned = tally.successes();

    tally.settle(session, idx, STEP, "clones")
}

/// One URL per clone destination, first occurrence wins.
fn clone_targets(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.iter()
        .filter(|url| {
            let key = parse_github_url(url)
                .map(|repo| repo.full_name().to_lowercase())
                .unwrap_or_else(|| url.to_string());
            let first = seen.insert(key);
            if !first {
                tracing::debug!(url = %url, "Repository already listed under another URL");
            }
            first
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, RepoStatus, StepStatus};
    use crate::stages::testing::{MockCloner, session_with};
    use tempfile::tempdir;

    fn entity_with_code(urls: &[&str]) -> Entity {
        let mut entity = Entity::discovered("2307.09288", "Llama 2");
        entity.links.code_repositories = urls.iter().map(|u| u.to_string()).collect();
        entity.set_step(StepName::LinkExtraction, StepStatus::Completed, None);
        entity
    }

    #[tokio::test]
    async fn test_clones_and_records_counters() {
        let dir = tempdir().unwrap();
        let repos = dir.path().join("repos");
        let (mut session, idx) =
            session_with(dir.path(), entity_with_code(&["https://github.com/acme/demo"]));
        let cloner = MockCloner::default();

        let outcome = run(&mut session, idx, &cloner, &repos).await.unwrap();

        assert_eq!(outcome, Outcome::Succeeded(1));
        let entity = session.entity(idx);
        assert_eq!(entity.repositories.len(), 1);
        let repo = &entity.repositories[0];
        assert_eq!(repo.url, "https://github.com/acme/demo");
        assert_eq!(repo.status, RepoStatus::Cloned);
        assert!(repo.has_code);
        assert_eq!(repo.languages, vec!["Python"]);

        let step = &entity.processing_steps.repo_analysis;
        assert_eq!(step.state.status, StepStatus::Completed);
        assert_eq!(step.counters.repos_found, 1);
        assert_eq!(step.counters.repos_cloned, 1);
        assert!(step.state.started_at.is_some());
        assert!(step.state.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_no_code_links_is_skipped() {
        let dir = tempdir().unwrap();
        let (mut session, idx) = session_with(dir.path(), entity_with_code(&[]));
        let cloner = MockCloner::default();

        let outcome = run(&mut session, idx, &cloner, dir.path()).await.unwrap();

        assert!(outcome.is_skipped());
        assert_eq!(
            session.entity(idx).step_status(StepName::RepoAnalysis),
            StepStatus::Skipped
        );
        assert!(cloner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_partial_clone_failure_completes() {
        let dir = tempdir().unwrap();
        let (mut session, idx) = session_with(
            dir.path(),
            entity_with_code(&["https://github.com/acme/good", "https://github.com/acme/bad"]),
        );
        let cloner = MockCloner::failing(&["https://github.com/acme/bad"]);

        let outcome = run(&mut session, idx, &cloner, dir.path()).await.unwrap();

        assert_eq!(outcome, Outcome::Succeeded(1));
        let step = &session.entity(idx).processing_steps.repo_analysis;
        assert_eq!(step.state.status, StepStatus::Completed);
        assert_eq!(step.state.error.as_deref(), Some("1 of 2 clones failed"));
        assert_eq!(step.counters.repos_found, 2);
        assert_eq!(step.counters.repos_cloned, 1);
    }

    #[tokio::test]
    async fn test_all_clones_failing_is_error() {
        let dir = tempdir().unwrap();
        let (mut session, idx) =
            session_with(dir.path(), entity_with_code(&["https://github.com/acme/bad"]));
        let cloner = MockCloner::failing(&["https://github.com/acme/bad"]);

        let outcome = run(&mut session, idx, &cloner, dir.path()).await.unwrap();

        assert!(outcome.is_failed());
        assert_eq!(
            session.entity(idx).step_status(StepName::RepoAnalysis),
            StepStatus::Error
        );
    }

    #[tokio::test]
    async fn test_already_cloned_repository_not_recloned() {
        let dir = tempdir().unwrap();
        let (mut session, idx) =
            session_with(dir.path(), entity_with_code(&["https://github.com/acme/demo"]));
        let cloner = MockCloner::default();
        run(&mut session, idx, &cloner, dir.path()).await.unwrap();
        assert_eq!(cloner.calls().len(), 1);

        run(&mut session, idx, &cloner, dir.path()).await.unwrap();

        assert_eq!(cloner.calls().len(), 1);
        assert_eq!(
            session.entity(idx).processing_steps.repo_analysis.counters.repos_cloned,
            1
        );
    }

    #[test]
    fn test_clone_targets_keep_first_url_per_repository() {
        let urls: Vec<String> = [
            "https://github.com/acme/demo",
            "https://github.com/acme/demo/issues",
            "https://github.com/Acme/Demo.git",
            "https://gitlab.com/acme/demo",
            "https://github.com/acme/other",
        ]
        .iter()
        .map(|u| u.to_string())
        .collect();

        assert_eq!(
            clone_targets(&urls),
            vec![
                "https://github.com/acme/demo",
                "https://gitlab.com/acme/demo",
                "https://github.com/acme/other",
            ]
        );
    }

    #[tokio::test]
    async fn test_overlapping_urls_share_one_checkout() {
        let dir = tempdir().unwrap();
        let (mut session, idx) = session_with(
            dir.path(),
            entity_with_code(&[
                "https://github.com/acme/demo",
                "https://github.com/acme/demo/issues",
            ]),
        );
        // Cloning the second URL would wipe the first checkout before failing.
        let cloner = MockCloner::failing(&["https://github.com/acme/demo/issues"]);

        let outcome = run(&mut session, idx, &cloner, dir.path()).await.unwrap();

        assert_eq!(outcome, Outcome::Succeeded(1));
        assert_eq!(cloner.calls(), vec!["https://github.com/acme/demo"]);
        let entity = session.entity(idx);
        assert_eq!(entity.repositories.len(), 1);
        let repo = &entity.repositories[0];
        assert_eq!(repo.status, RepoStatus::Cloned);
        assert!(repo.clone_path.as_ref().unwrap().join(".git").exists());

        let step = &entity.processing_steps.repo_analysis;
        assert_eq!(step.state.status, StepStatus::Completed);
        assert_eq!(step.state.error, None);
        assert_eq!(step.counters.repos_found, 1);
        assert_eq!(step.counters.repos_cloned, 1);
    }

    #[tokio::test]
    async fn test_vanished_checkout_is_cloned_again() {
        let dir = tempdir().unwrap();
        let (mut session, idx) =
            session_with(dir.path(), entity_with_code(&["https://github.com/acme/demo"]));
        let cloner = MockCloner::default();
        run(&mut session, idx, &cloner, dir.path()).await.unwrap();

        let path = session.entity(idx).repositories[0].clone_path.clone().unwrap();
        std::fs::remove_dir_all(&path).unwrap();
        run(&mut session, idx, &cloner, dir.path()).await.unwrap();

        assert_eq!(cloner.calls().len(), 2);
        assert!(path.join(".git").exists());
    }

    #[tokio::test]
    async fn test_progress_is_persisted() {
        let dir = tempdir().unwrap();
        let (mut session, idx) =
            session_with(dir.path(), entity_with_code(&["https://github.com/acme/demo"]));
        run(&mut session, idx, &MockCloner::default(), dir.path())
            .await
            .unwrap();

        let store = crate::store::EntityStore::new(dir.path().join("database.json"));
        let db = store.load();
        let saved = db.find("2307.09288").unwrap();
        assert_eq!(saved.repositories.len(), 1);
        assert_eq!(saved.step_status(StepName::RepoAnalysis), StepStatus::Completed);
    }
}
