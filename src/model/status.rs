//! Status enums for entities, pipeline steps, and repositories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a single pipeline step.
///
/// `pending → in_progress → {completed, error}`, or `pending → skipped` when
/// the step has no work to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Error,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    /// Check if the step has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Skipped)
    }

    /// Completed or skipped: later steps are free to run.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Pending or interrupted mid-run.
    pub fn is_unfinished(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid step status: {}", s)),
        }
    }
}

/// Coarse whole-entity lifecycle label.
///
/// Display cache only. Resume decisions always read the per-step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    #[default]
    Pending,
    ExtractingLinks,
    LinksExtracted,
    AnalyzingRepos,
    ReposAnalyzed,
    InitializingClaude,
    ClaudeInitialized,
    GeneratingGradio,
    GradioGenerated,
    UploadingSpaces,
    Completed,
    Error,
}

impl AggregateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ExtractingLinks => "extracting_links",
            Self::LinksExtracted => "links_extracted",
            Self::AnalyzingRepos => "analyzing_repos",
            Self::ReposAnalyzed => "repos_analyzed",
            Self::InitializingClaude => "initializing_claude",
            Self::ClaudeInitialized => "claude_initialized",
            Self::GeneratingGradio => "generating_gradio",
            Self::GradioGenerated => "gradio_generated",
            Self::UploadingSpaces => "uploading_spaces",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Clone state of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    #[default]
    Pending,
    Cloning,
    Cloned,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Cloning => "cloning",
            Self::Cloned => "cloned",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// How an entity entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    #[default]
    Discovered,
    Manual,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Manual => "manual",
        }
    }
}

/// The five fixed pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    LinkExtraction,
    RepoAnalysis,
    ClaudeInit,
    GradioGeneration,
    SpaceUpload,
}

impl StepName {
    pub const ALL: [StepName; 5] = [
        Self::LinkExtraction,
        Self::RepoAnalysis,
        Self::ClaudeInit,
        Self::GradioGeneration,
        Self::SpaceUpload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkExtraction => "link_extraction",
            Self::RepoAnalysis => "repo_analysis",
            Self::ClaudeInit => "claude_init",
            Self::GradioGeneration => "gradio_generation",
            Self::SpaceUpload => "space_upload",
        }
    }

    /// The step that must settle before this one may run.
    pub fn prerequisite(&self) -> Option<StepName> {
        match self {
            Self::LinkExtraction => None,
            Self::RepoAnalysis => Some(Self::LinkExtraction),
            Self::ClaudeInit => Some(Self::RepoAnalysis),
            Self::GradioGeneration => Some(Self::ClaudeInit),
            Self::SpaceUpload => Some(Self::GradioGeneration),
        }
    }

    /// Aggregate label shown while the step runs.
    pub fn running_status(&self) -> AggregateStatus {
        match self {
            Self::LinkExtraction => AggregateStatus::ExtractingLinks,
            Self::RepoAnalysis => AggregateStatus::AnalyzingRepos,
            Self::ClaudeInit => AggregateStatus::InitializingClaude,
            Self::GradioGeneration => AggregateStatus::GeneratingGradio,
            Self::SpaceUpload => AggregateStatus::UploadingSpaces,
        }
    }

    /// Aggregate label once the step has settled.
    pub fn settled_status(&self) -> AggregateStatus {
        match self {
            Self::LinkExtraction => AggregateStatus::LinksExtracted,
            Self::RepoAnalysis => AggregateStatus::ReposAnalyzed,
            Self::ClaudeInit => AggregateStatus::ClaudeInitialized,
            Self::GradioGeneration => AggregateStatus::GradioGenerated,
            Self::SpaceUpload => AggregateStatus::Completed,
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("Invalid step name: {}", s))
    }
}

/// Coarse classification of a coding-agent failure, derived from its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientCredits,
    Authentication,
    Execution,
    Timeout,
    MarkerMissing,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientCredits => "insufficient_credits",
            Self::Authentication => "authentication",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::MarkerMissing => "marker_missing",
            Self::Unknown => "unknown",
        }
    }
}
