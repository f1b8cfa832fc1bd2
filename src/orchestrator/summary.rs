//! Plain-text results of the pipeline entry points.

use std::fmt;

use crate::model::{LinkCategory, Links};

const LISTED_IDS: usize = 5;

fn write_ids(f: &mut fmt::Formatter<'_>, ids: &[String]) -> fmt::Result {
    for id in ids.iter().take(LISTED_IDS) {
        writeln!(f, "  - {}", id)?;
    }
    if ids.len() > LISTED_IDS {
        writeln!(f, "  ... and {} more", ids.len() - LISTED_IDS)?;
    }
    Ok(())
}

/// Result of one `process_batch` run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// Papers in the listing.
    pub found: usize,
    /// Papers that had stages run without any of them failing.
    pub processed: usize,
    /// Papers with every step already settled.
    pub skipped: usize,
    /// Papers where a stage failed during this run.
    pub errored: usize,
    pub repos_cloned: usize,
    pub total_in_database: usize,
    pub skipped_ids: Vec<String>,
    pub errored_ids: Vec<String>,
    /// Set when failed entities were retried before the batch.
    pub retry: Option<RetrySummary>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(retry) = &self.retry {
            writeln!(f, "{}", retry)?;
        }
        if self.found == 0 {
            return writeln!(f, "No papers found to process.");
        }

        writeln!(f, "Processing complete!")?;
        writeln!(f)?;
        writeln!(f, "- Processed: {} papers", self.processed)?;
        writeln!(f, "- Skipped: {} papers", self.skipped)?;
        writeln!(f, "- Errors: {} papers", self.errored)?;
        writeln!(f, "- Repositories cloned: {}", self.repos_cloned)?;
        writeln!(f, "- Total in database: {} papers", self.total_in_database)?;

        if !self.skipped_ids.is_empty() {
            writeln!(f)?;
            writeln!(f, "Skipped papers:")?;
            write_ids(f, &self.skipped_ids)?;
        }
        if !self.errored_ids.is_empty() {
            writeln!(f)?;
            writeln!(f, "Papers with errors (see `papersnipe show <id>`):")?;
            write_ids(f, &self.errored_ids)?;
        }
        Ok(())
    }
}

/// Result of `retry_failed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrySummary {
    /// Entities with an error aggregate or an errored step.
    pub failed_found: usize,
    /// Entities that had at least one stage re-dispatched.
    pub retried: usize,
    /// Retried entities that still have a failing stage.
    pub still_failing: usize,
    /// Entities whose link extraction failed; these are never retried.
    pub needs_review: Vec<String>,
}

impl fmt::Display for RetrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed_found == 0 {
            return writeln!(f, "No failed jobs found");
        }
        writeln!(f, "Retry complete!")?;
        writeln!(f)?;
        writeln!(f, "- Papers retried: {}", self.retried)?;
        writeln!(f, "- Still failing: {}", self.still_failing)?;
        writeln!(f, "- Total failed found: {}", self.failed_found)?;
        if !self.needs_review.is_empty() {
            writeln!(f)?;
            writeln!(f, "Link extraction failed (manual review needed):")?;
            write_ids(f, &self.needs_review)?;
        }
        Ok(())
    }
}

/// Result of `process_manual_url`.
#[derive(Debug, Clone, PartialEq)]
pub enum ManualReport {
    /// Links were already extracted for this URL; nothing was run.
    AlreadyProcessed { id: String },
    Processed {
        id: String,
        title: String,
        url: String,
        links: Links,
        repos_cloned: usize,
        /// First stage failure, if any.
        error: Option<String>,
    },
}

impl ManualReport {
    pub fn id(&self) -> &str {
        match self {
            Self::AlreadyProcessed { id } | Self::Processed { id, .. } => id,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::AlreadyProcessed { .. } => None,
            Self::Processed { error, .. } => error.as_deref(),
        }
    }
}

impl fmt::Display for ManualReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyProcessed { id } => {
                writeln!(f, "This URL has already been processed (ID: {})", id)?;
                writeln!(f, "Use `papersnipe show {}` to see the results.", id)
            }
            Self::Processed {
                id,
                title,
                url,
                links,
                repos_cloned,
                error,
            } => {
                match error {
                    Some(e) => writeln!(f, "Error: {}", e)?,
                    None => writeln!(f, "Successfully processed manual URL!")?,
                }
                writeln!(f)?;
                writeln!(f, "Entry Details:")?;
                writeln!(f, "- ID: {}", id)?;
                writeln!(f, "- Title: {}", title)?;
                writeln!(f, "- URL: {}", url)?;
                writeln!(f)?;
                writeln!(f, "Extracted Links:")?;
                for category in LinkCategory::ALL {
                    let count = links.get(category).len();
                    if count > 0 {
                        writeln!(f, "- {}: {}", category.label(), count)?;
                    }
                }
                writeln!(f)?;
                writeln!(f, "Repositories: {} cloned", repos_cloned)?;
                writeln!(f)?;
                writeln!(f, "Saved to database. View details with `papersnipe show {}`", id)
            }
        }
    }
}
