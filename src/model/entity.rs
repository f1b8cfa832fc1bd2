//! Entity, step, and repository records as persisted in the store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{
    AggregateStatus, EntryType, FailureKind, RepoStatus, StepName, StepStatus,
};

/// Fixed link categories produced by link extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkCategory {
    CodeRepositories,
    ModelWeights,
    Datasets,
    DemoLinks,
    PaperLinks,
}

impl LinkCategory {
    pub const ALL: [LinkCategory; 5] = [
        Self::CodeRepositories,
        Self::ModelWeights,
        Self::Datasets,
        Self::DemoLinks,
        Self::PaperLinks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeRepositories => "code_repositories",
            Self::ModelWeights => "model_weights",
            Self::Datasets => "datasets",
            Self::DemoLinks => "demo_links",
            Self::PaperLinks => "paper_links",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CodeRepositories => "Code Repositories",
            Self::ModelWeights => "Model Weights",
            Self::Datasets => "Datasets",
            Self::DemoLinks => "Demo Links",
            Self::PaperLinks => "Paper Links",
        }
    }
}

/// Categorized URLs found on an entity's page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub code_repositories: Vec<String>,
    #[serde(default)]
    pub model_weights: Vec<String>,
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub demo_links: Vec<String>,
    #[serde(default)]
    pub paper_links: Vec<String>,
}

impl Links {
    pub fn get(&self, category: LinkCategory) -> &[String] {
        match category {
            LinkCategory::CodeRepositories => &self.code_repositories,
            LinkCategory::ModelWeights => &self.model_weights,
            LinkCategory::Datasets => &self.datasets,
            LinkCategory::DemoLinks => &self.demo_links,
            LinkCategory::PaperLinks => &self.paper_links,
        }
    }

    pub fn get_mut(&mut self, category: LinkCategory) -> &mut Vec<String> {
        match category {
            LinkCategory::CodeRepositories => &mut self.code_repositories,
            LinkCategory::ModelWeights => &mut self.model_weights,
            LinkCategory::Datasets => &mut self.datasets,
            LinkCategory::DemoLinks => &mut self.demo_links,
            LinkCategory::PaperLinks => &mut self.paper_links,
        }
    }

    pub fn total(&self) -> usize {
        LinkCategory::ALL.iter().map(|c| self.get(*c).len()).sum()
    }
}

/// Status and timing shared by every step record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StepState {
    /// Move to `status`.
    ///
    /// `started_at` is stamped only on the first entry into `in_progress`;
    /// `completed_at` is stamped on every entry into `completed` or `error`.
    /// Re-entering `in_progress` drops a stale error message.
    pub fn transition(&mut self, status: StepStatus, error: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        match status {
            StepStatus::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
                self.error = None;
            }
            StepStatus::Completed | StepStatus::Error => {
                self.completed_at = Some(now);
            }
            StepStatus::Pending | StepStatus::Skipped => {}
        }
        if error.is_some() {
            self.error = error;
        }
    }
}

/// A step record: common state plus step-specific counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord<C> {
    #[serde(flatten)]
    pub state: StepState,
    #[serde(flatten)]
    pub counters: C,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoCounters {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoAnalysisCounters {
    #[serde(default)]
    pub repos_found: usize,
    #[serde(default)]
    pub repos_cloned: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaudeInitCounters {
    #[serde(default)]
    pub repos_initialized: usize,
    #[serde(default)]
    pub claude_available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationCounters {
    #[serde(default)]
    pub repos_generated: usize,
    #[serde(default)]
    pub apps_created: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadCounters {
    #[serde(default)]
    pub spaces_created: usize,
    #[serde(default)]
    pub spaces_failed: usize,
    #[serde(default)]
    pub space_urls: Vec<String>,
}

/// Per-step records for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSteps {
    #[serde(default)]
    pub link_extraction: StepRecord<NoCounters>,
    #[serde(default)]
    pub repo_analysis: StepRecord<RepoAnalysisCounters>,
    #[serde(default)]
    pub claude_init: StepRecord<ClaudeInitCounters>,
    #[serde(default)]
    pub gradio_generation: StepRecord<GenerationCounters>,
    #[serde(default)]
    pub space_upload: StepRecord<UploadCounters>,
}

impl ProcessingSteps {
    pub fn state(&self, step: StepName) -> &StepState {
        match step {
            StepName::LinkExtraction => &self.link_extraction.state,
            StepName::RepoAnalysis => &self.repo_analysis.state,
            StepName::ClaudeInit => &self.claude_init.state,
            StepName::GradioGeneration => &self.gradio_generation.state,
            StepName::SpaceUpload => &self.space_upload.state,
        }
    }

    pub fn state_mut(&mut self, step: StepName) -> &mut StepState {
        match step {
            StepName::LinkExtraction => &mut self.link_extraction.state,
            StepName::RepoAnalysis => &mut self.repo_analysis.state,
            StepName::ClaudeInit => &mut self.claude_init.state,
            StepName::GradioGeneration => &mut self.gradio_generation.state,
            StepName::SpaceUpload => &mut self.space_upload.state,
        }
    }

    pub fn status(&self, step: StepName) -> StepStatus {
        self.state(step).status
    }
}

/// Result of running the coding agent's `/init` on one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaudeInitRecord {
    pub attempted: bool,
    pub success: bool,
    pub claude_available: bool,
    #[serde(default)]
    pub claude_md_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default)]
    pub initialized_at: Option<DateTime<Utc>>,
}

/// Result of generating the demo app for one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub attempted: bool,
    pub success: bool,
    pub app_created: bool,
    pub readme_updated: bool,
    #[serde(default)]
    pub app_path: Option<PathBuf>,
    #[serde(default)]
    pub readme_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

/// Result of publishing one repository as a Space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub success: bool,
    #[serde(default)]
    pub space_url: Option<String>,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub files_uploaded: usize,
    #[serde(default)]
    pub total_size_mb: f64,
}

/// A code repository referenced by an entity. Identified by `url` within
/// its parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub url: String,
    #[serde(default)]
    pub status: RepoStatus,
    #[serde(default)]
    pub clone_path: Option<PathBuf>,
    #[serde(default)]
    pub cloned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub has_code: bool,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_init: Option<ClaudeInitRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradio_generation: Option<GenerationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_upload: Option<UploadRecord>,
}

impl Repository {
    pub fn pending(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn is_cloned(&self) -> bool {
        self.status == RepoStatus::Cloned
    }

    pub fn is_initialized(&self) -> bool {
        self.claude_init.as_ref().is_some_and(|r| r.success)
    }

    pub fn has_app(&self) -> bool {
        self.gradio_generation.as_ref().is_some_and(|r| r.success)
    }

    pub fn is_published(&self) -> bool {
        self.space_upload.as_ref().is_some_and(|r| r.success)
    }
}

/// A tracked paper or manually submitted URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub entry_type: EntryType,
    #[serde(default)]
    pub aggregate_status: AggregateStatus,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub processing_steps: ProcessingSteps,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// A discovered paper with every step pending.
    pub fn discovered(id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            source_url: None,
            entry_type: EntryType::Discovered,
            aggregate_status: AggregateStatus::Pending,
            links: Links::default(),
            processing_steps: ProcessingSteps::default(),
            repositories: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A manually submitted URL with every step pending.
    pub fn manual(id: &str, title: &str, source_url: &str) -> Self {
        Self {
            source_url: Some(source_url.to_string()),
            entry_type: EntryType::Manual,
            ..Self::discovered(id, title)
        }
    }

    pub fn step_status(&self, step: StepName) -> StepStatus {
        self.processing_steps.status(step)
    }

    /// Transition one step and refresh `updated_at`.
    pub fn set_step(&mut self, step: StepName, status: StepStatus, error: Option<String>) {
        let now = Utc::now();
        self.processing_steps
            .state_mut(step)
            .transition(status, error, now);
        self.updated_at = now;
    }

    pub fn set_aggregate(&mut self, status: AggregateStatus) {
        self.aggregate_status = status;
        self.updated_at = Utc::now();
    }

    /// Whether any step, or the aggregate label, records an error.
    pub fn has_error(&self) -> bool {
        self.aggregate_status == AggregateStatus::Error
            || StepName::ALL
                .iter()
                .any(|step| self.step_status(*step) == StepStatus::Error)
    }

    pub fn repository(&self, url: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.url == url)
    }

    /// Replace the repository with the same URL, or append it.
    pub fn upsert_repository(&mut self, repo: Repository) {
        match self.repositories.iter_mut().find(|r| r.url == repo.url) {
            Some(existing) => *existing = repo,
            None => self.repositories.push(repo),
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_started_at_set_once() {
        let mut state = StepState::default();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);

        state.transition(StepStatus::InProgress, None, t0);
        state.transition(StepStatus::Error, Some("boom".into()), t0);
        state.transition(StepStatus::InProgress, None, t1);

        assert_eq!(state.started_at, Some(t0));
        assert_eq!(state.error, None);
    }

    #[test]
    fn test_completed_at_never_cleared() {
        let mut state = StepState::default();
        let t0 = Utc::now();

        state.transition(StepStatus::InProgress, None, t0);
        state.transition(StepStatus::Completed, None, t0);
        state.transition(StepStatus::InProgress, None, t0 + Duration::seconds(1));

        assert_eq!(state.completed_at, Some(t0));
        assert_eq!(state.status, StepStatus::InProgress);
    }

    #[test]
    fn test_skipped_does_not_stamp_completion() {
        let mut state = StepState::default();
        state.transition(StepStatus::Skipped, Some("no work".into()), Utc::now());
        assert!(state.completed_at.is_none());
        assert!(state.started_at.is_none());
        assert_eq!(state.error.as_deref(), Some("no work"));
    }

    #[test]
    fn test_set_step_refreshes_updated_at() {
        let mut entity = Entity::discovered("2307.09288", "Llama 2");
        let before = entity.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        entity.set_step(StepName::RepoAnalysis, StepStatus::InProgress, None);
        assert!(entity.updated_at > before);
        assert_eq!(entity.step_status(StepName::RepoAnalysis), StepStatus::InProgress);
    }

    #[test]
    fn test_step_counters_flatten_into_record() {
        let mut steps = ProcessingSteps::default();
        steps.repo_analysis.counters.repos_found = 2;
        steps.repo_analysis.counters.repos_cloned = 1;
        steps.repo_analysis.state.status = StepStatus::Completed;

        let value = serde_json::to_value(&steps).unwrap();
        let record = &value["repo_analysis"];
        assert_eq!(record["status"], "completed");
        assert_eq!(record["repos_found"], 2);
        assert_eq!(record["repos_cloned"], 1);
        assert!(record["started_at"].is_null());
    }

    #[test]
    fn test_sub_records_absent_until_attempted() {
        let repo = Repository::pending("https://github.com/acme/demo");
        let value = serde_json::to_value(&repo).unwrap();
        assert!(value.get("claude_init").is_none());
        assert!(value.get("gradio_generation").is_none());
        assert!(value.get("space_upload").is_none());
        assert!(!repo.is_initialized());
    }

    #[test]
    fn test_upsert_repository_replaces_by_url() {
        let mut entity = Entity::discovered("x", "X");
        entity.upsert_repository(Repository::pending("https://github.com/a/b"));
        let mut cloned = Repository::pending("https://github.com/a/b");
        cloned.status = RepoStatus::Cloned;
        entity.upsert_repository(cloned);

        assert_eq!(entity.repositories.len(), 1);
        assert!(entity.repositories[0].is_cloned());
    }

    #[test]
    fn test_has_error_from_step_or_aggregate() {
        let mut entity = Entity::discovered("x", "X");
        assert!(!entity.has_error());
        entity.set_step(StepName::SpaceUpload, StepStatus::Error, Some("fail".into()));
        assert!(entity.has_error());

        let mut other = Entity::discovered("y", "Y");
        other.set_aggregate(AggregateStatus::Error);
        assert!(other.has_error());
    }

    #[test]
    fn test_manual_entity_fields() {
        let entity = Entity::manual("manual_x", "Manual Entry: u", "https://example.com");
        assert_eq!(entity.entry_type, EntryType::Manual);
        assert_eq!(entity.source_url.as_deref(), Some("https://example.com"));
        assert_eq!(entity.aggregate_status, AggregateStatus::Pending);
    }

    #[test]
    fn test_links_by_category() {
        let mut links = Links::default();
        links
            .get_mut(LinkCategory::Datasets)
            .push("https://huggingface.co/datasets/a/b".into());
        assert_eq!(links.get(LinkCategory::Datasets).len(), 1);
        assert_eq!(links.total(), 1);
    }
}
