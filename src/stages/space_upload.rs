//! Stage 5: publish each repository with a generated app as a Gradio Space.
//!
//! Per repository: size census, Space existence check (and creation), a
//! generated Space card replacing `README.md`, then the upload itself. Large
//! repositories go up in two passes: core files first, then a bounded
//! best-effort pass for big assets.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use glob::Pattern;
use regex::Regex;
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::config::HubSettings;
use crate::errors::{HubError, StoreError};
use crate::hub::{SpaceHost, UploadFile, space_url};
use crate::model::{Outcome, Repository, StepName, UploadRecord};
use crate::repos::parse_github_url;
use crate::store::Session;

use super::gradio::{APP_FILE, README_FILE};
use super::prompts::GRADIO_VERSION;
use super::{Tally, begin, skip};

const STEP: StepName = StepName::SpaceUpload;

const MB: f64 = 1024.0 * 1024.0;
pub const MAX_FILE_SIZE_MB: f64 = 50.0;
pub const MAX_TOTAL_SIZE_MB: f64 = 500.0;
const LARGE_BINARY_MB: f64 = 10.0;

const STAGED_TOTAL_MB: f64 = 50.0;
const STAGED_FILE_COUNT: usize = 300;
const ASSET_MIN_MB: f64 = 1.0;
const MAX_ASSETS: usize = 10;

const MAX_ATTEMPTS: u32 = 3;

const SPACE_PREFIX: &str = "SNIPED_";
const MAX_SPACE_NAME: usize = 96;
pub const ORIGINAL_README: &str = "README_original.md";
const SHORT_DESCRIPTION_LEN: usize = 100;

const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    "node_modules",
    "*.egg-info",
    "dist",
    "build",
    ".vscode",
    ".idea",
    "venv",
    "env",
    ".venv",
];

const EXCLUDED_FILES: &[&str] = &[
    "*.pyc",
    "*.pyo",
    "*.pyd",
    ".coverage",
    ".env",
    ".env.*",
    ".DS_Store",
    "Thumbs.db",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "bin", "safetensors", "ckpt", "pt", "pth", "h5", "pb", "onnx", "tflite", "pkl", "pickle",
    "npz", "npy", "mp4", "avi", "mov", "mkv", "webm", "zip", "tar", "gz", "bz2", "xz", "7z",
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "mp3", "wav", "flac", "ogg", "pdf", "doc",
    "docx", "ppt", "pptx",
];

/// Held back from the core pass of a staged upload.
const CORE_EXCLUDED_EXTENSIONS: &[&str] = &[
    "onnx", "pt", "pth", "h5", "pb", "bin", "weights", "mp4", "avi", "mov", "mkv", "zip", "tar",
    "gz", "tgz", "jpg", "jpeg", "png", "gif",
];
const ASSET_DIRS: &[&str] = &["assets", "screenshots", "demo", "examples"];

/// Eligible for the asset pass of a staged upload.
const ASSET_EXTENSIONS: &[&str] = &[
    "onnx", "pt", "pth", "h5", "pb", "bin", "weights", "mp4", "avi", "mov", "mkv", "zip", "tar",
    "gz",
];

static DASH_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

static EXCLUDED_DIR_PATTERNS: LazyLock<Vec<Pattern>> =
    LazyLock::new(|| compile_patterns(EXCLUDED_DIRS));
static EXCLUDED_FILE_PATTERNS: LazyLock<Vec<Pattern>> =
    LazyLock::new(|| compile_patterns(EXCLUDED_FILES));

fn compile_patterns(raw: &[&str]) -> Vec<Pattern> {
    raw.iter().filter_map(|p| Pattern::new(p).ok()).collect()
}

fn name_matches(patterns: &[Pattern], name: &str) -> bool {
    patterns.iter().any(|p| p.matches(name))
}

/// `SNIPED_` plus the repository name lowercased, with every character
/// outside `[a-z0-9-]` turned into a hyphen and hyphen runs collapsed.
/// Capped at 96 characters.
pub fn sanitize_space_name(repo_name: &str) -> String {
    let replaced: String = repo_name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let collapsed = DASH_RUNS.replace_all(&replaced, "-");
    let mut name = format!("{}{}", SPACE_PREFIX, collapsed.trim_matches('-'));
    if name.len() > MAX_SPACE_NAME {
        name.truncate(MAX_SPACE_NAME);
        let trimmed = name.trim_end_matches('-').len();
        name.truncate(trimmed);
    }
    name
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn size_mb(bytes: u64) -> f64 {
    bytes as f64 / MB
}

/// One uploadable file found in a checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CensusEntry {
    /// `/`-separated path relative to the checkout root.
    pub rel: String,
    pub path: PathBuf,
    pub size: u64,
}

impl CensusEntry {
    fn size_mb(&self) -> f64 {
        size_mb(self.size)
    }

    fn extension(&self) -> String {
        lowercase_extension(&self.path)
    }

    fn in_asset_dir(&self) -> bool {
        self.rel
            .split('/')
            .rev()
            .skip(1)
            .any(|dir| ASSET_DIRS.contains(&dir))
    }

    /// Held back from the core pass.
    fn is_heavy(&self) -> bool {
        CORE_EXCLUDED_EXTENSIONS.contains(&self.extension().as_str()) || self.in_asset_dir()
    }

    fn as_upload(&self) -> UploadFile {
        UploadFile {
            path_in_repo: self.rel.clone(),
            local_path: self.path.clone(),
            size: self.size,
        }
    }
}

/// Files in a checkout after the exclusion rules, with size warnings.
#[derive(Debug, Clone, Default)]
pub struct FileCensus {
    pub files: Vec<CensusEntry>,
    pub total_bytes: u64,
    pub warnings: Vec<String>,
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name_matches(&EXCLUDED_DIR_PATTERNS, name))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

impl FileCensus {
    pub fn scan(root: &Path) -> Self {
        let mut census = Self::default();
        let entries = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_excluded_dir(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in entries {
            let name = entry.file_name().to_string_lossy();
            if name_matches(&EXCLUDED_FILE_PATTERNS, &name) {
                continue;
            }
            let Some(rel) = relative_path(root, entry.path()) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let file = CensusEntry {
                rel,
                path: entry.into_path(),
                size: metadata.len(),
            };

            let mb = file.size_mb();
            if mb > MAX_FILE_SIZE_MB {
                census.warnings.push(format!(
                    "File {} is {:.1}MB (exceeds {}MB limit)",
                    file.rel, mb, MAX_FILE_SIZE_MB
                ));
            }
            if mb > LARGE_BINARY_MB && BINARY_EXTENSIONS.contains(&file.extension().as_str()) {
                census.warnings.push(format!(
                    "Large binary file {} ({:.1}MB) - may cause upload issues",
                    file.rel, mb
                ));
            }

            census.total_bytes += file.size;
            census.files.push(file);
        }
        census
    }

    pub fn total_mb(&self) -> f64 {
        size_mb(self.total_bytes)
    }

    /// Files within the per-file cap.
    pub fn uploadable(&self) -> impl Iterator<Item = &CensusEntry> {
        self.files.iter().filter(|f| f.size_mb() <= MAX_FILE_SIZE_MB)
    }

    /// Whether the upload should be split into a core pass and an asset pass.
    pub fn needs_staging(&self) -> bool {
        self.total_mb() > STAGED_TOTAL_MB || self.files.len() > STAGED_FILE_COUNT
    }

    /// Large assets for the second pass, in path order, at most ten.
    pub fn assets(&self) -> Vec<&CensusEntry> {
        self.uploadable()
            .filter(|f| f.size_mb() > ASSET_MIN_MB)
            .filter(|f| ASSET_EXTENSIONS.contains(&f.extension().as_str()))
            .take(MAX_ASSETS)
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct SpaceCard<'a> {
    title: &'a str,
    emoji: &'static str,
    #[serde(rename = "colorFrom")]
    color_from: &'static str,
    #[serde(rename = "colorTo")]
    color_to: &'static str,
    sdk: &'static str,
    sdk_version: &'static str,
    app_file: &'static str,
    pinned: bool,
    short_description: String,
    tags: [&'static str; 4],
    license: &'static str,
}

/// What the generated Space card says about its source.
#[derive(Debug, Clone)]
pub struct CardDetails<'a> {
    pub repo_name: &'a str,
    pub repo_url: &'a str,
    pub paper_id: &'a str,
    pub paper_title: &'a str,
    pub languages: &'a [String],
    pub has_app: bool,
}

fn short_description(title: &str) -> String {
    if title.chars().count() > SHORT_DESCRIPTION_LEN {
        let head: String = title.chars().take(SHORT_DESCRIPTION_LEN - 3).collect();
        format!("{}...", head)
    } else {
        title.to_string()
    }
}

/// Space card: YAML front matter followed by a short description of the
/// paper and source repository.
pub fn render_space_readme(details: &CardDetails<'_>) -> Result<String, serde_yaml::Error> {
    let card = SpaceCard {
        title: details.repo_name,
        emoji: "🤖",
        color_from: "yellow",
        color_to: "blue",
        sdk: "gradio",
        sdk_version: GRADIO_VERSION,
        app_file: APP_FILE,
        pinned: false,
        short_description: short_description(details.paper_title),
        tags: ["research", "paper", "code", "papersnipe"],
        license: "mit",
    };
    let front_matter = serde_yaml::to_string(&card)?;

    let languages = if details.languages.is_empty() {
        "Not detected".to_string()
    } else {
        details.languages.join(", ")
    };
    let (app_status, usage) = if details.has_app {
        (
            "Generated",
            "This Space includes a Gradio app generated from the repository code.",
        )
    } else {
        (
            "Not found",
            "This Space contains the repository code. Add an app.py to create a demo.",
        )
    };

    Ok(format!(
        "---\n{front}---\n\n# {name}\n\n\
         ## Paper\n\n\
         - **Paper ID**: {id}\n\
         - **Title**: {title}\n\
         - **Original Repository**: [{url}]({url})\n\n\
         ## Repository\n\n\
         - **Languages**: {languages}\n\
         - **Gradio App**: {app_status}\n\n\
         ## Usage\n\n{usage}\n\n\
         ## Disclaimer\n\n\
         This is an automated upload. The code comes from the original repository and may need \
         additional configuration or dependencies to run.\n\n\
         ## License\n\n\
         See the original repository for licensing information: {url}\n",
        front = front_matter,
        name = details.repo_name,
        id = details.paper_id,
        title = details.paper_title,
        url = details.repo_url,
    ))
}

/// Replace `README.md` with `content`, moving an existing README to
/// `README_original.md` unless a backup is already there.
fn install_space_readme(repo_dir: &Path, content: &str) -> std::io::Result<()> {
    let readme = repo_dir.join(README_FILE);
    let backup = repo_dir.join(ORIGINAL_README);
    if readme.is_file() && !backup.exists() {
        std::fs::rename(&readme, &backup)?;
        tracing::debug!(path = %backup.display(), "Backed up original README");
    }
    std::fs::write(&readme, content)
}

/// Run `op` up to three times, sleeping `retry_delay × attempt` between
/// attempts. Only transient errors are retried.
async fn with_retry<F, Fut>(retry_delay: Duration, what: &str, mut op: F) -> Result<(), HubError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), HubError>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = retry_delay * attempt;
                tracing::warn!(
                    what,
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Transient upload error, will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Publish one repository. Never fails: every problem ends up in the
/// returned record's `error`.
pub async fn publish_repository(
    host: &dyn SpaceHost,
    hub: &HubSettings,
    paper_id: &str,
    paper_title: &str,
    repo: &Repository,
    retry_delay: Duration,
) -> UploadRecord {
    let mut record = UploadRecord::default();

    let Some(repo_dir) = repo.clone_path.as_deref().filter(|p| p.is_dir()) else {
        record.error = Some("Invalid or missing clone path".to_string());
        return record;
    };
    let Some(github) = parse_github_url(&repo.url) else {
        record.error = Some("Could not parse GitHub URL".to_string());
        return record;
    };

    let space_id = format!("{}/{}", hub.username, sanitize_space_name(&github.name));
    tracing::info!(repo = %repo.url, space = %space_id, "Preparing Space upload");

    let census = FileCensus::scan(repo_dir);
    record.warnings = census.warnings.clone();
    record.total_size_mb = (census.total_mb() * 10.0).round() / 10.0;
    for warning in &census.warnings {
        tracing::warn!(space = %space_id, "{}", warning);
    }
    if census.total_mb() > MAX_TOTAL_SIZE_MB {
        record.error = Some(format!(
            "Repository too large ({:.0}MB exceeds {}MB limit)",
            census.total_mb(),
            MAX_TOTAL_SIZE_MB
        ));
        return record;
    }

    let exists = match host.space_exists(&space_id).await {
        Ok(exists) => exists,
        Err(e) => {
            record.error = Some(format!("Failed to check Space: {}", e));
            return record;
        }
    };
    if exists && !hub.force {
        record.error = Some(format!(
            "Space already exists: {} (set upload.force to overwrite)",
            space_url(&space_id)
        ));
        record.space_url = Some(space_url(&space_id));
        record.space_id = Some(space_id);
        return record;
    }
    if !exists {
        if let Err(e) = host.create_space(&space_id, hub.private).await {
            record.error = Some(format!("Failed to create Space: {}", e));
            return record;
        }
    } else {
        tracing::info!(space = %space_id, "Updating existing Space");
    }

    let details = CardDetails {
        repo_name: &github.name,
        repo_url: &repo.url,
        paper_id,
        paper_title,
        languages: &repo.languages,
        has_app: repo_dir.join(APP_FILE).is_file(),
    };
    let written = render_space_readme(&details)
        .map_err(|e| e.to_string())
        .and_then(|content| install_space_readme(repo_dir, &content).map_err(|e| e.to_string()));
    if let Err(e) = written {
        record.error = Some(format!("Failed to write Space README: {}", e));
        return record;
    }

    // Rescan so the new card and the README backup are included.
    let census = FileCensus::scan(repo_dir);
    let staged = census.needs_staging();

    let (core, summary): (Vec<UploadFile>, String) = if staged {
        tracing::info!(space = %space_id, files = census.files.len(), total_mb = census.total_mb(), "Using staged upload");
        (
            census
                .uploadable()
                .filter(|f| !f.is_heavy())
                .map(CensusEntry::as_upload)
                .collect(),
            format!("Upload core files for paper {}", paper_id),
        )
    } else {
        (
            census.uploadable().map(CensusEntry::as_upload).collect(),
            format!("Upload repository for paper {}", paper_id),
        )
    };

    let uploaded = with_retry(retry_delay, "core files", || {
        host.upload_files(&space_id, &core, &summary)
    })
    .await;
    if let Err(e) = uploaded {
        let message = e.to_string();
        let mut error = format!("Upload failed (Stage 1): {}", message);
        if message.to_lowercase().contains("file is too large") {
            error.push_str(" (File too large - check warnings)");
        }
        record.error = Some(error);
        return record;
    }
    record.files_uploaded = core.len();

    if staged {
        let assets = census.assets();
        let mut sent = 0;
        for asset in &assets {
            let file = [asset.as_upload()];
            let summary = format!("Add asset: {}", asset.rel);
            match host.upload_files(&space_id, &file, &summary).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!(space = %space_id, asset = %asset.rel, error = %e, "Asset upload failed");
                    record
                        .warnings
                        .push(format!("Failed to upload asset {}: {}", asset.rel, e));
                }
            }
        }
        if !assets.is_empty() {
            tracing::info!(space = %space_id, sent, of = assets.len(), "Asset pass finished");
        }
        record.files_uploaded += sent;
    }

    record.success = true;
    record.space_url = Some(space_url(&space_id));
    record.space_id = Some(space_id);
    tracing::info!(url = ?record.space_url, files = record.files_uploaded, "Space upload complete");
    record
}

/// Returns the number of published repositories.
///
/// `retry_delay` is the base of the linear backoff between upload attempts.
pub async fn run(
    session: &mut Session,
    idx: usize,
    host: &dyn SpaceHost,
    hub: &HubSettings,
    retry_delay: Duration,
) -> Result<Outcome<usize>, StoreError> {
    if let Some(reason) = hub.upload_blocker() {
        return skip(session, idx, STEP, &reason, true);
    }

    let eligible: Vec<Repository> = session
        .entity(idx)
        .repositories
        .iter()
        .filter(|r| r.has_app() && r.clone_path.is_some())
        .cloned()
        .collect();
    if eligible.is_empty() {
        return skip(session, idx, STEP, "No apps to upload", true);
    }

    begin(session, idx, STEP)?;
    let paper_id = session.entity(idx).id.clone();
    let paper_title = session.entity(idx).title.clone();
    let mut tally = Tally::default();
    let mut urls = Vec::new();

    for repo in eligible {
        if repo.is_published() {
            tally.already_done += 1;
            if let Some(url) = repo.space_upload.as_ref().and_then(|r| r.space_url.clone()) {
                urls.push(url);
            }
            continue;
        }

        let record =
            publish_repository(host, hub, &paper_id, &paper_title, &repo, retry_delay).await;
        match &record.error {
            None => {
                if let Some(url) = &record.space_url {
                    urls.push(url.clone());
                }
                tally.record(Ok(()));
            }
            Some(e) => {
                tracing::warn!(repo = %repo.url, error = %e, "Space upload failed");
                tally.record(Err(e.clone()));
            }
        }

        let entity = session.entity_mut(idx);
        if let Some(stored) = entity.repositories.iter_mut().find(|r| r.url == repo.url) {
            stored.space_upload = Some(record);
        }
        let counters = &mut entity.processing_steps.space_upload.counters;
        counters.spaces_created = tally.successes();
        counters.spaces_failed = tally.failures();
        counters.space_urls = urls.clone();
        entity.updated_at = Utc::now();
        session.checkpoint()?;
    }

    let counters = &mut session.entity_mut(idx).processing_steps.space_upload.counters;
    counters.spaces_created = tally.successes();
    counters.spaces_failed = tally.failures();
    counters.space_urls = urls;
    tally.settle(session, idx, STEP, "uploads")
}
