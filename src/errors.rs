//! Typed error hierarchy for the paper pipeline.
//!
//! - `StoreError` — persisting the entity store
//! - `ExecError` — spawning and waiting on external commands
//! - `HubError` — hosting-platform API calls
//! - `PipelineError` — orchestrator failures that abort an entry point

use std::path::PathBuf;

use thiserror::Error;

/// Errors from saving the entity store. These are the only errors fatal to
/// a batch.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize entity store: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write store file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to replace store file {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Entity store {path} is locked by another process")]
    Locked { path: PathBuf },
}

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs} seconds")]
    TimedOut { program: String, secs: u64 },
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Errors from the hosting-platform client.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("LFS upload of {path} failed: {message}")]
    Lfs { path: String, message: String },

    #[error("Malformed JSON exchanged with {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HubError {
    /// Timeouts, connection failures, and gateway errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Status { status, body, .. } => {
                matches!(status, 408 | 429 | 502 | 503 | 504)
                    || body.to_lowercase().contains("timed out")
            }
            Self::Io { .. } | Self::Lfs { .. } | Self::Json { .. } => false,
        }
    }
}

/// Errors that abort a pipeline entry point.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Entity {id} not found")]
    NotFound { id: String },
}
