//! Source repositories: GitHub URL parsing, shallow cloning, and a census of
//! the checked-out code.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::errors::ExecError;
use crate::exec::{self, CommandOutput, CommandSpec};
use crate::model::{RepoStatus, Repository};

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

static GITHUB_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"github\.com/([^/]+)/([^/\.]+)").unwrap());

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "cs", "go", "rs", "rb", "php",
    "swift", "kt", "scala", "m", "mm", "r", "jl", "dart", "vue", "svelte", "sh", "bash", "ipynb",
];

const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "__pycache__",
    ".pytest_cache",
    "dist",
    "build",
    "venv",
    "env",
    ".env",
    ".venv",
    "site-packages",
];

const MIN_FILE_SIZE: u64 = 50;
const MIN_CODE_FILES: usize = 1;
const MIN_TOTAL_SIZE: u64 = 100;

const README_NAMES: &[&str] = &["README.md", "README.rst", "README.txt", "README"];

const README_CODE_INDICATORS: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "java",
    "c++",
    "rust",
    "go",
    "install",
    "pip install",
    "npm install",
    "cargo build",
    "usage",
    "quickstart",
    "getting started",
    "import ",
    "from ",
    "require(",
    "def ",
    "class ",
    "function ",
    "const ",
    "example",
    "tutorial",
    "api",
    "library",
    "framework",
];

/// Owner and name of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubRepo {
    pub owner: String,
    pub name: String,
}

impl GithubRepo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

pub fn parse_github_url(url: &str) -> Option<GithubRepo> {
    let caps = GITHUB_REGEX.captures(url)?;
    Some(GithubRepo {
        owner: caps[1].to_string(),
        name: caps[2].to_string(),
    })
}

/// `<root>/<entity id with . → _>/<owner>_<name>`
pub fn clone_destination(repos_root: &Path, entity_id: &str, repo: &GithubRepo) -> PathBuf {
    repos_root
        .join(entity_id.replace('.', "_"))
        .join(format!("{}_{}", repo.owner, repo.name))
}

/// Fetches a repository into a local directory.
/// Real implementation: `GitCloner`. Tests substitute a fake that writes files.
#[async_trait]
pub trait Cloner: Send + Sync {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<CommandOutput, ExecError>;
}

/// Shallow clones with the external `git` binary.
pub struct GitCloner;

#[async_trait]
impl Cloner for GitCloner {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<CommandOutput, ExecError> {
        let spec = CommandSpec::new("git")
            .args(["clone", "--depth", "1", url])
            .arg(dest.to_string_lossy())
            .timeout(Some(CLONE_TIMEOUT));
        exec::run(&spec).await
    }
}

/// Clone one code URL for `entity_id` and record the result.
///
/// Never fails: every problem ends up in the returned record's `error`.
pub async fn clone_repository(
    cloner: &dyn Cloner,
    url: &str,
    entity_id: &str,
    repos_root: &Path,
) -> Repository {
    let mut record = Repository::pending(url);

    let Some(repo) = parse_github_url(url) else {
        return failed(record, "Not a valid GitHub URL".to_string());
    };
    let dest = clone_destination(repos_root, entity_id, &repo);

    if let Some(parent) = dest.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        return failed(record, format!("Failed to create {}: {}", parent.display(), e));
    }
    if dest.exists()
        && let Err(e) = tokio::fs::remove_dir_all(&dest).await
    {
        return failed(record, format!("Failed to remove stale {}: {}", dest.display(), e));
    }

    record.status = RepoStatus::Cloning;
    tracing::info!(repo = %repo.full_name(), dest = %dest.display(), "Cloning repository");

    match cloner.clone_repo(url, &dest).await {
        Ok(output) if output.success() => {}
        Ok(output) => {
            return failed(
                record,
                format!("Git clone failed: {}", output.combined_output.trim()),
            );
        }
        Err(e) if e.is_timeout() => {
            return failed(record, "Clone timeout (5 minutes exceeded)".to_string());
        }
        Err(e) => return failed(record, e.to_string()),
    }

    if !dest.join(".git").exists() {
        return failed(
            record,
            format!("Clone finished but {} is not a git checkout", dest.display()),
        );
    }

    record.status = RepoStatus::Cloned;
    record.cloned_at = Some(Utc::now());
    record.has_code = has_code(&dest);
    record.languages = detect_languages(&dest);
    record.clone_path = Some(dest);
    tracing::info!(
        repo = %repo.full_name(),
        has_code = record.has_code,
        languages = ?record.languages,
        "Cloned repository"
    );
    record
}

fn failed(mut record: Repository, error: String) -> Repository {
    tracing::warn!(url = %record.url, error = %error, "Repository clone failed");
    record.status = RepoStatus::Error;
    record.error = Some(error);
    record
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Source files at least `MIN_FILE_SIZE` bytes long, with their sizes.
fn source_files(root: &Path) -> impl Iterator<Item = (PathBuf, u64)> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let ext = lowercase_extension(e.path())?;
            if !CODE_EXTENSIONS.contains(&ext.as_str()) {
                return None;
            }
            let size = e.metadata().ok()?.len();
            (size >= MIN_FILE_SIZE).then(|| (e.into_path(), size))
        })
}

/// Whether the checkout contains real source code.
///
/// Falls back to README wording and `.gitattributes` linguist hints when no
/// source file passes the size thresholds.
pub fn has_code(root: &Path) -> bool {
    let (count, total) = source_files(root).fold((0usize, 0u64), |(n, bytes), (_, size)| {
        (n + 1, bytes + size)
    });
    if count >= MIN_CODE_FILES && total >= MIN_TOTAL_SIZE {
        return true;
    }

    for name in README_NAMES {
        let path = root.join(name);
        if !path.is_file() {
            continue;
        }
        if let Ok(bytes) = std::fs::read(&path) {
            let content = String::from_utf8_lossy(&bytes).to_lowercase();
            if README_CODE_INDICATORS.iter().any(|i| content.contains(i)) {
                return true;
            }
        }
    }

    std::fs::read(root.join(".gitattributes"))
        .map(|bytes| String::from_utf8_lossy(&bytes).contains("linguist-language"))
        .unwrap_or(false)
}

fn language_for(ext: &str) -> Option<&'static str> {
    let language = match ext {
        "py" | "ipynb" => "Python",
        "js" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "java" => "Java",
        "cpp" => "C++",
        "c" => "C",
        "h" => "C/C++",
        "cs" => "C#",
        "go" => "Go",
        "rs" => "Rust",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "kt" => "Kotlin",
        "scala" => "Scala",
        "m" => "Objective-C",
        "r" => "R",
        "jl" => "Julia",
        "dart" => "Dart",
        "vue" => "Vue",
        "svelte" => "Svelte",
        "sh" | "bash" => "Shell",
        _ => return None,
    };
    Some(language)
}

/// Sorted, deduplicated language names present in the checkout.
pub fn detect_languages(root: &Path) -> Vec<String> {
    let mut languages: Vec<String> = source_files(root)
        .filter_map(|(path, _)| {
            let ext = lowercase_extension(&path)?;
            language_for(&ext).map(str::to_string)
        })
        .collect();
    languages.sort();
    languages.dedup();
    languages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    const PY_SOURCE: &str = "import torch\n\n\
def main():\n    model = torch.nn.Linear(4, 2)\n    x = torch.randn(8, 4)\n    print(model(x).shape)\n\n\
if __name__ == \"__main__\":\n    main()\n";

    struct FakeCloner {
        exit_code: i32,
        write_git_dir: bool,
        timeout: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCloner {
        fn ok() -> Self {
            Self {
                exit_code: 0,
                write_git_dir: true,
                timeout: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Cloner for FakeCloner {
        async fn clone_repo(&self, url: &str, dest: &Path) -> Result<CommandOutput, ExecError> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.timeout {
                return Err(ExecError::TimedOut {
                    program: "git".into(),
                    secs: 300,
                });
            }
            if self.exit_code == 0 {
                fs::create_dir_all(dest).unwrap();
                if self.write_git_dir {
                    fs::create_dir_all(dest.join(".git")).unwrap();
                }
                fs::write(dest.join("train.py"), PY_SOURCE).unwrap();
            }
            Ok(CommandOutput {
                exit_code: self.exit_code,
                combined_output: if self.exit_code == 0 {
                    String::new()
                } else {
                    "fatal: repository not found\n".into()
                },
            })
        }
    }

    #[test]
    fn test_parse_github_url() {
        let repo = parse_github_url("https://github.com/facebookresearch/llama").unwrap();
        assert_eq!(repo.owner, "facebookresearch");
        assert_eq!(repo.name, "llama");

        let repo = parse_github_url("https://github.com/owner/repo.git").unwrap();
        assert_eq!(repo.name, "repo");

        let repo = parse_github_url("https://github.com/owner/repo/tree/main/src").unwrap();
        assert_eq!(repo.full_name(), "owner/repo");

        assert!(parse_github_url("https://gitlab.com/owner/repo").is_none());
        assert!(parse_github_url("https://github.com/owner").is_none());
    }

    #[test]
    fn test_clone_destination() {
        let repo = GithubRepo {
            owner: "facebookresearch".into(),
            name: "llama".into(),
        };
        assert_eq!(
            clone_destination(Path::new("/repos"), "2307.09288", &repo),
            PathBuf::from("/repos/2307_09288/facebookresearch_llama")
        );
    }

    #[tokio::test]
    async fn test_clone_success_records_census() {
        let dir = tempdir().unwrap();
        let cloner = FakeCloner::ok();

        let record = clone_repository(
            &cloner,
            "https://github.com/facebookresearch/llama",
            "2307.09288",
            dir.path(),
        )
        .await;

        assert_eq!(record.status, RepoStatus::Cloned);
        assert!(record.error.is_none());
        assert!(record.cloned_at.is_some());
        assert!(record.has_code);
        assert_eq!(record.languages, vec!["Python"]);
        assert_eq!(
            record.clone_path,
            Some(dir.path().join("2307_09288").join("facebookresearch_llama"))
        );
    }

    #[tokio::test]
    async fn test_clone_removes_stale_directory() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("1_2").join("o_r");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("leftover.txt"), "old").unwrap();

        let record =
            clone_repository(&FakeCloner::ok(), "https://github.com/o/r", "1.2", dir.path()).await;

        assert!(record.is_cloned());
        assert!(!stale.join("leftover.txt").exists());
    }

    #[tokio::test]
    async fn test_clone_failure_keeps_git_output() {
        let dir = tempdir().unwrap();
        let cloner = FakeCloner {
            exit_code: 128,
            ..FakeCloner::ok()
        };

        let record =
            clone_repository(&cloner, "https://github.com/o/missing", "1.2", dir.path()).await;

        assert_eq!(record.status, RepoStatus::Error);
        assert_eq!(
            record.error.as_deref(),
            Some("Git clone failed: fatal: repository not found")
        );
        assert!(record.clone_path.is_none());
    }

    #[tokio::test]
    async fn test_clone_timeout_message() {
        let dir = tempdir().unwrap();
        let cloner = FakeCloner {
            timeout: true,
            ..FakeCloner::ok()
        };

        let record = clone_repository(&cloner, "https://github.com/o/r", "1.2", dir.path()).await;
        assert_eq!(
            record.error.as_deref(),
            Some("Clone timeout (5 minutes exceeded)")
        );
    }

    #[tokio::test]
    async fn test_clone_without_git_dir_is_error() {
        let dir = tempdir().unwrap();
        let cloner = FakeCloner {
            write_git_dir: false,
            ..FakeCloner::ok()
        };

        let record = clone_repository(&cloner, "https://github.com/o/r", "1.2", dir.path()).await;
        assert_eq!(record.status, RepoStatus::Error);
        assert!(record.error.unwrap().contains("not a git checkout"));
    }

    #[tokio::test]
    async fn test_non_github_url_not_cloned() {
        let dir = tempdir().unwrap();
        let cloner = FakeCloner::ok();

        let record = clone_repository(&cloner, "https://gitlab.com/o/r", "1.2", dir.path()).await;

        assert_eq!(record.error.as_deref(), Some("Not a valid GitHub URL"));
        assert!(cloner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_has_code_ignores_tiny_and_vendored_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tiny.py"), "x = 1\n").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), PY_SOURCE.repeat(4)).unwrap();

        assert!(!has_code(dir.path()));
        assert!(detect_languages(dir.path()).is_empty());
    }

    #[test]
    fn test_has_code_readme_fallback() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "# Project\n\nRun `pip install foo`.\n").unwrap();
        assert!(has_code(dir.path()));
    }

    #[test]
    fn test_has_code_gitattributes_fallback() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitattributes"), "*.cu linguist-language=Cuda\n").unwrap();
        assert!(has_code(dir.path()));
    }

    #[test]
    fn test_empty_repo_has_no_code() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("LICENSE"), "MIT").unwrap();
        assert!(!has_code(dir.path()));
    }

    #[test]
    fn test_detect_languages_sorted_and_deduplicated() {
        let dir = tempdir().unwrap();
        let body = "x".repeat(80);
        fs::create_dir_all(dir.path().join("examples")).unwrap();
        fs::write(dir.path().join("a.py"), &body).unwrap();
        fs::write(dir.path().join("examples/b.ipynb"), &body).unwrap();
        fs::write(dir.path().join("kernel.h"), &body).unwrap();
        fs::write(dir.path().join("run.SH"), &body).unwrap();

        assert_eq!(detect_languages(dir.path()), vec!["C/C++", "Python", "Shell"]);
    }
}
