//! Coding-agent CLI: discovery, optional installation, invocation, and
//! classification of failed runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::{ClaudeSettings, InstallMethod};
use crate::errors::ExecError;
use crate::exec::{self, CommandOutput, CommandSpec};
use crate::model::FailureKind;

const INSTALL_SCRIPT_URL: &str = "https://claude.ai/install.sh";
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const EXCERPT_LEN: usize = 300;

/// Runs prompts through a coding agent inside a working directory.
/// Real implementation: `ClaudeCli`. Test double: a scripted agent that
/// writes the files a real run would produce.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Whether the agent can be invoked. Discovery (and installation, when
    /// enabled) happens on the first call; the answer is cached.
    async fn ensure_available(&self) -> bool;

    async fn run(
        &self,
        cwd: &Path,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError>;
}

/// Why an agent run did not produce what was asked of it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentFailure {
    #[error("Insufficient API credits")]
    InsufficientCredits,

    #[error("Authentication failed")]
    Authentication,

    #[error("Command execution failed")]
    Execution,

    #[error("Claude /init failed (exit code {exit_code}){}", excerpt_suffix(.detail))]
    Unknown { exit_code: i32, detail: String },

    #[error("Claude /init completed but CLAUDE.md was not created")]
    MarkerMissing,

    #[error("Claude /init timed out after {secs} seconds")]
    TimedOut { secs: u64 },
}

fn excerpt_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}

impl AgentFailure {
    /// Classify a non-zero exit from the agent's combined output.
    pub fn classify(exit_code: i32, output: &str) -> Self {
        let lower = output.to_lowercase();
        if lower.contains("credit balance is too low") {
            Self::InsufficientCredits
        } else if lower.contains("authentication") || lower.contains("api key") {
            Self::Authentication
        } else if lower.contains("not found") || lower.contains("no such file") {
            Self::Execution
        } else {
            Self::Unknown {
                exit_code,
                detail: output.trim().chars().take(EXCERPT_LEN).collect(),
            }
        }
    }

    /// Map a failure to run the process at all.
    pub fn from_exec(err: &ExecError) -> Self {
        match err {
            ExecError::TimedOut { secs, .. } => Self::TimedOut { secs: *secs },
            ExecError::Spawn { .. } | ExecError::Wait { .. } => Self::Execution,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InsufficientCredits => FailureKind::InsufficientCredits,
            Self::Authentication => FailureKind::Authentication,
            Self::Execution => FailureKind::Execution,
            Self::Unknown { .. } => FailureKind::Unknown,
            Self::MarkerMissing => FailureKind::MarkerMissing,
            Self::TimedOut { .. } => FailureKind::Timeout,
        }
    }
}

/// Where to look for the CLI, in priority order.
pub fn candidate_paths(settings: &ClaudeSettings) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = &settings.cli_path {
        candidates.push(path.clone());
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".claude").join("local").join("claude"));
    }
    candidates.push(PathBuf::from("/usr/local/bin/claude"));
    candidates.push(PathBuf::from("/usr/bin/claude"));
    candidates.extend(settings.search_path.iter().map(|dir| dir.join("claude")));
    candidates
}

/// The Claude Code CLI.
pub struct ClaudeCli {
    settings: ClaudeSettings,
    resolved: OnceCell<Option<PathBuf>>,
}

impl ClaudeCli {
    pub fn new(settings: ClaudeSettings) -> Self {
        Self {
            settings,
            resolved: OnceCell::new(),
        }
    }

    fn discover(&self) -> Option<PathBuf> {
        candidate_paths(&self.settings)
            .into_iter()
            .find(|path| path.is_file())
    }

    async fn install(&self) -> bool {
        let method = match self.settings.install_method {
            InstallMethod::Skip => {
                tracing::info!("Claude CLI installation skipped (install_method = skip)");
                return false;
            }
            InstallMethod::Auto | InstallMethod::Curl => "curl",
        };

        tracing::info!(method, url = INSTALL_SCRIPT_URL, "Installing Claude CLI");
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg(format!("curl -fsSL {} | bash", INSTALL_SCRIPT_URL))
            .timeout(Some(INSTALL_TIMEOUT));

        match exec::run(&spec).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                tracing::warn!(
                    exit_code = output.exit_code,
                    output = %output.combined_output.trim(),
                    "Claude CLI installation failed"
                );
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Claude CLI installation failed");
                false
            }
        }
    }

    async fn resolve(&self) -> Option<PathBuf> {
        if let Some(path) = self.discover() {
            tracing::info!(path = %path.display(), "Found Claude CLI");
            return Some(path);
        }
        if !self.settings.auto_install {
            tracing::warn!("Claude CLI not found and auto-install is disabled");
            return None;
        }
        if !self.install().await {
            return None;
        }
        let found = self.discover();
        match &found {
            Some(path) => tracing::info!(path = %path.display(), "Installed Claude CLI"),
            None => tracing::warn!("Installation completed but Claude CLI not found"),
        }
        found
    }
}

#[async_trait]
impl Agent for ClaudeCli {
    async fn ensure_available(&self) -> bool {
        self.resolved
            .get_or_init(|| self.resolve())
            .await
            .is_some()
    }

    async fn run(
        &self,
        cwd: &Path,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError> {
        let Some(program) = self.resolved.get_or_init(|| self.resolve()).await.clone() else {
            return Err(ExecError::Spawn {
                program: "claude".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Claude CLI not found",
                ),
            });
        };

        if !self.settings.api_key_present {
            tracing::warn!("ANTHROPIC_API_KEY not set; relying on stored CLI credentials");
        }

        let spec = CommandSpec::new(program.to_string_lossy())
            .args(self.settings.flags())
            .arg(prompt)
            .current_dir(cwd)
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .timeout(timeout);
        exec::run(&spec).await
    }
}
