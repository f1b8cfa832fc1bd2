//! Shared fixtures for stage and orchestrator tests: in-memory collaborators
//! and entities pre-advanced to a given stage.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::agent::Agent;
use crate::config::{ClaudeSettings, HubSettings, InstallMethod};
use crate::discovery::{PageSource, PaperRef, paper_page_url};
use crate::errors::{ExecError, HubError};
use crate::exec::CommandOutput;
use crate::hub::{SpaceHost, UploadFile};
use crate::model::{
    AggregateStatus, ClaudeInitRecord, Entity, GenerationRecord, RepoStatus, Repository,
    StepName, StepStatus,
};
use crate::repos::{Cloner, GithubRepo, clone_destination};
use crate::store::{EntityStore, Session};

pub const PY_SOURCE: &str = "import torch\n\n\
def train(model, data):\n    for batch in data:\n        loss = model(batch)\n        loss.backward()\n    return model\n";

fn ok_output() -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        combined_output: String::new(),
    }
}

/// Lay out a checkout: `.git`, one Python source file, and a README.
pub fn write_checkout(dest: &Path, name: &str) {
    std::fs::create_dir_all(dest.join(".git")).unwrap();
    std::fs::write(dest.join(".git").join("HEAD"), "ref: refs/heads/main\n").unwrap();
    std::fs::write(dest.join("main.py"), PY_SOURCE).unwrap();
    std::fs::write(dest.join("README.md"), format!("# {}\n\nRun `python main.py`.\n", name)).unwrap();
}

pub fn session_with(dir: &Path, entity: Entity) -> (Session, usize) {
    let mut session = Session::open(EntityStore::new(dir.join("database.json"))).unwrap();
    let idx = session.upsert(entity);
    (session, idx)
}

pub fn repo_url(name: &str) -> String {
    format!("https://github.com/acme/{}", name)
}

/// Markup for a paper page linking to the given URLs.
pub fn paper_markup(urls: &[&str]) -> String {
    let anchors: Vec<String> = urls
        .iter()
        .map(|u| format!("<a href=\"{}\">link</a>", u))
        .collect();
    format!("<html><body>{}</body></html>", anchors.join("\n"))
}

/// Links extracted and every repository cloned under `<dir>/repos`.
pub fn cloned_entity(dir: &Path, id: &str, names: &[&str]) -> Entity {
    let mut entity = Entity::discovered(id, "Test Paper");
    let repos_root = dir.join("repos");
    for name in names {
        let url = repo_url(name);
        let github = GithubRepo {
            owner: "acme".to_string(),
            name: name.to_string(),
        };
        let dest = clone_destination(&repos_root, id, &github);
        write_checkout(&dest, name);

        entity.links.code_repositories.push(url.clone());
        entity.repositories.push(Repository {
            url,
            status: RepoStatus::Cloned,
            clone_path: Some(dest),
            cloned_at: Some(Utc::now()),
            has_code: true,
            languages: vec!["Python".to_string()],
            ..Repository::default()
        });
    }
    entity.set_step(StepName::LinkExtraction, StepStatus::Completed, None);
    entity.set_step(StepName::RepoAnalysis, StepStatus::Completed, None);
    entity.processing_steps.repo_analysis.counters.repos_found = names.len();
    entity.processing_steps.repo_analysis.counters.repos_cloned = names.len();
    entity.set_aggregate(AggregateStatus::ReposAnalyzed);
    entity
}

/// `cloned_entity` plus a successful `/init` (with `CLAUDE.md`) everywhere.
pub fn initialized_entity(dir: &Path, id: &str, names: &[&str]) -> Entity {
    let mut entity = cloned_entity(dir, id, names);
    for repo in &mut entity.repositories {
        let Some(path) = repo.clone_path.clone() else {
            continue;
        };
        let marker = path.join("CLAUDE.md");
        std::fs::write(&marker, "# CLAUDE.md\n").unwrap();
        repo.claude_init = Some(ClaudeInitRecord {
            attempted: true,
            success: true,
            claude_available: true,
            claude_md_path: Some(marker),
            initialized_at: Some(Utc::now()),
            ..ClaudeInitRecord::default()
        });
    }
    entity.set_step(StepName::ClaudeInit, StepStatus::Completed, None);
    entity.processing_steps.claude_init.counters.repos_initialized = names.len();
    entity.processing_steps.claude_init.counters.claude_available = true;
    entity.set_aggregate(AggregateStatus::ClaudeInitialized);
    entity
}

/// `initialized_entity` plus a generated `app.py` everywhere.
pub fn generated_entity(dir: &Path, id: &str, names: &[&str]) -> Entity {
    let mut entity = initialized_entity(dir, id, names);
    for repo in &mut entity.repositories {
        let Some(path) = repo.clone_path.clone() else {
            continue;
        };
        let app = path.join("app.py");
        std::fs::write(&app, "import gradio as gr\n\ngr.Interface(lambda x: x, \"text\", \"text\").launch()\n").unwrap();
        std::fs::write(path.join("requirements.txt"), "gradio\n").unwrap();
        repo.gradio_generation = Some(GenerationRecord {
            attempted: true,
            success: true,
            app_created: true,
            readme_updated: true,
            app_path: Some(app),
            readme_path: Some(path.join("README.md")),
            generated_at: Some(Utc::now()),
            ..GenerationRecord::default()
        });
    }
    entity.set_step(StepName::GradioGeneration, StepStatus::Completed, None);
    entity.processing_steps.gradio_generation.counters.repos_generated = names.len();
    entity.processing_steps.gradio_generation.counters.apps_created = names.len();
    entity.set_aggregate(AggregateStatus::GradioGenerated);
    entity
}

pub fn test_settings() -> ClaudeSettings {
    ClaudeSettings {
        cli_path: None,
        init_enabled: true,
        auto_approve: true,
        auto_install: false,
        install_method: InstallMethod::Auto,
        init_timeout: Some(Duration::from_secs(60)),
        api_key_present: false,
        search_path: Vec::new(),
    }
}

pub fn hub_settings() -> HubSettings {
    HubSettings {
        token: "hf_test".to_string(),
        username: "alice".to_string(),
        upload_enabled: true,
        private: false,
        force: false,
    }
}

/// Cloner that writes a checkout instead of running git. URLs listed in
/// `failing` exit 128 without touching the destination.
#[derive(Default)]
pub struct MockCloner {
    failing: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl MockCloner {
    pub fn failing(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Cloner for MockCloner {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.failing.iter().any(|u| u == url) {
            return Ok(CommandOutput {
                exit_code: 128,
                combined_output: "fatal: repository not found\n".to_string(),
            });
        }
        let name = url.rsplit('/').next().unwrap_or("repo");
        write_checkout(dest, name);
        Ok(ok_output())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AgentMode {
    /// Writes the files each prompt asks for.
    Working,
    /// Exits 0 without writing anything.
    Silent,
    Failing(i32, String),
}

/// Scripted coding agent.
pub struct MockAgent {
    available: bool,
    mode: AgentMode,
    calls: Mutex<Vec<(PathBuf, String)>>,
    probes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockAgent {
    fn new(available: bool, mode: AgentMode) -> Self {
        Self {
            available,
            mode,
            calls: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn available() -> Self {
        Self::new(true, AgentMode::Working)
    }

    pub fn unavailable() -> Self {
        Self::new(false, AgentMode::Working)
    }

    pub fn silent() -> Self {
        Self::new(true, AgentMode::Silent)
    }

    pub fn failing(exit_code: i32, output: &str) -> Self {
        Self::new(true, AgentMode::Failing(exit_code, output.to_string()))
    }

    /// Working directory and prompt of every run, in call order.
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn write_outputs(cwd: &Path, prompt: &str) {
        if prompt == "/init" {
            std::fs::write(cwd.join("CLAUDE.md"), "# CLAUDE.md\n\nProject notes.\n").unwrap();
        } else if prompt.starts_with("Please add") {
            let readme = cwd.join("README.md");
            let body = std::fs::read_to_string(&readme).unwrap_or_default();
            std::fs::write(&readme, format!("---\ntitle: Demo\nsdk: gradio\n---\n\n{}", body))
                .unwrap();
        } else if prompt.starts_with("Please create") {
            std::fs::write(cwd.join("app.py"), "import gradio as gr\n").unwrap();
            std::fs::write(cwd.join("requirements.txt"), "gradio\n").unwrap();
        }
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn ensure_available(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.available
    }

    async fn run(
        &self,
        cwd: &Path,
        prompt: &str,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((cwd.to_path_buf(), prompt.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.mode {
            AgentMode::Working => {
                Self::write_outputs(cwd, prompt);
                Ok(ok_output())
            }
            AgentMode::Silent => Ok(ok_output()),
            AgentMode::Failing(code, output) => Ok(CommandOutput {
                exit_code: *code,
                combined_output: output.clone(),
            }),
        }
    }
}

/// Canned listing and pages. Unknown URLs fail with 404.
#[derive(Default)]
pub struct MockPages {
    papers: Vec<PaperRef>,
    pages: HashMap<String, String>,
    listing_fails: bool,
    fetches: Mutex<Vec<String>>,
}

impl MockPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// List the paper and serve its page with `markup`.
    pub fn with_paper(mut self, id: &str, title: &str, markup: &str) -> Self {
        self.papers.push(PaperRef {
            id: id.to_string(),
            title: title.to_string(),
        });
        self.pages.insert(paper_page_url(id), markup.to_string());
        self
    }

    /// List the paper without serving its page.
    pub fn with_unreachable_paper(mut self, id: &str, title: &str) -> Self {
        self.papers.push(PaperRef {
            id: id.to_string(),
            title: title.to_string(),
        });
        self
    }

    pub fn with_page(mut self, url: &str, markup: &str) -> Self {
        self.pages.insert(url.to_string(), markup.to_string());
        self
    }

    pub fn failing_listing() -> Self {
        Self {
            listing_fails: true,
            ..Self::default()
        }
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for MockPages {
    async fn daily_papers(&self, _date: Option<&str>) -> Result<Vec<PaperRef>, HubError> {
        if self.listing_fails {
            return Err(HubError::Status {
                url: "https://huggingface.co/api/daily_papers".to_string(),
                status: 500,
                body: "internal error".to_string(),
            });
        }
        Ok(self.papers.clone())
    }

    async fn fetch(&self, url: &str) -> Result<String, HubError> {
        self.fetches.lock().unwrap().push(url.to_string());
        self.pages.get(url).cloned().ok_or_else(|| HubError::Status {
            url: url.to_string(),
            status: 404,
            body: "not found".to_string(),
        })
    }
}

/// In-memory hosting platform. The first `transient_failures` uploads fail
/// with a 503.
#[derive(Default)]
pub struct MockHost {
    existing: Mutex<HashSet<String>>,
    created: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, Vec<String>, String)>>,
    transient_failures: AtomicUsize,
    upload_attempts: AtomicUsize,
    space_checks: AtomicUsize,
}

impl MockHost {
    pub fn with_existing(space_ids: &[&str]) -> Self {
        let host = Self::default();
        host.existing
            .lock()
            .unwrap()
            .extend(space_ids.iter().map(|s| s.to_string()));
        host
    }

    pub fn flaky(transient_failures: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(transient_failures),
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    /// Space id, uploaded paths, and commit summary of every successful upload.
    pub fn uploads(&self) -> Vec<(String, Vec<String>, String)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    pub fn space_checks(&self) -> usize {
        self.space_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpaceHost for MockHost {
    async fn space_exists(&self, space_id: &str) -> Result<bool, HubError> {
        self.space_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.existing.lock().unwrap().contains(space_id))
    }

    async fn create_space(&self, space_id: &str, _private: bool) -> Result<(), HubError> {
        self.existing.lock().unwrap().insert(space_id.to_string());
        self.created.lock().unwrap().push(space_id.to_string());
        Ok(())
    }

    async fn upload_files(
        &self,
        space_id: &str,
        files: &[UploadFile],
        summary: &str,
    ) -> Result<(), HubError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(HubError::Status {
                url: format!("https://huggingface.co/api/spaces/{}/commit/main", space_id),
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        self.uploads.lock().unwrap().push((
            space_id.to_string(),
            files.iter().map(|f| f.path_in_repo.clone()).collect(),
            summary.to_string(),
        ));
        Ok(())
    }
}
