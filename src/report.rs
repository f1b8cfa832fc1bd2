//! Plain-text views of the entity store: `papersnipe stats` and
//! `papersnipe show`.

use std::fmt;

use crate::model::{Entity, EntryType, LinkCategory, Repository, StepName};
use crate::store::Database;

const RECENT_ENTITIES: usize = 5;
const TITLE_WIDTH: usize = 60;
const ERROR_WIDTH: usize = 100;

/// First `max` characters of `text`, with `...` when cut.
fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}

/// Totals across the whole store.
pub struct StatsView<'a> {
    db: &'a Database,
}

impl<'a> StatsView<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }
}

impl fmt::Display for StatsView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let papers = &self.db.papers;
        if papers.is_empty() {
            writeln!(f, "Database is empty. Run `papersnipe process` to fetch today's papers.")?;
            return Ok(());
        }

        let manual = papers
            .iter()
            .filter(|p| p.entry_type == EntryType::Manual)
            .count();
        let errored = papers.iter().filter(|p| p.has_error()).count();

        writeln!(f, "Database Statistics")?;
        writeln!(f, "===================")?;
        writeln!(f)?;
        writeln!(
            f,
            "Total papers: {} ({} discovered, {} manual)",
            papers.len(),
            papers.len() - manual,
            manual
        )?;
        writeln!(f, "With errors:  {}", errored)?;
        writeln!(f)?;

        writeln!(f, "Links extracted:")?;
        for category in LinkCategory::ALL {
            let total: usize = papers.iter().map(|p| p.links.get(category).len()).sum();
            writeln!(f, "  {:<20} {}", category.label(), total)?;
        }
        writeln!(f)?;

        let total = |count: fn(&Entity) -> usize| -> usize { papers.iter().map(count).sum() };
        let found = total(|p| p.processing_steps.repo_analysis.counters.repos_found);
        let cloned = total(|p| p.processing_steps.repo_analysis.counters.repos_cloned);
        let initialized = total(|p| p.processing_steps.claude_init.counters.repos_initialized);
        let apps = total(|p| p.processing_steps.gradio_generation.counters.apps_created);
        let spaces = total(|p| p.processing_steps.space_upload.counters.spaces_created);
        let claude_seen = papers
            .iter()
            .any(|p| p.processing_steps.claude_init.counters.claude_available);

        writeln!(f, "Repository analysis:")?;
        writeln!(f, "  {:<20} {}", "Repositories found", found)?;
        writeln!(f, "  {:<20} {}", "Repositories cloned", cloned)?;
        writeln!(
            f,
            "  {:<20} {} ({})",
            "Claude init",
            initialized,
            if claude_seen {
                "Claude CLI available"
            } else {
                "Claude CLI not available"
            }
        )?;
        writeln!(f, "  {:<20} {}", "Gradio apps", apps)?;
        writeln!(f, "  {:<20} {}", "Spaces uploaded", spaces)?;
        writeln!(f)?;

        let mut recent: Vec<&Entity> = papers.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        writeln!(f, "Recently added:")?;
        for paper in recent.into_iter().take(RECENT_ENTITIES) {
            writeln!(
                f,
                "  {} {}: {} ({})",
                paper.created_at.format("%Y-%m-%d"),
                paper.id,
                clip(&paper.title, TITLE_WIDTH),
                paper.aggregate_status
            )?;
        }
        Ok(())
    }
}

/// Everything recorded for one entity.
pub struct EntityView<'a> {
    entity: &'a Entity,
}

impl<'a> EntityView<'a> {
    pub fn new(entity: &'a Entity) -> Self {
        Self { entity }
    }

    fn write_repository(f: &mut fmt::Formatter<'_>, repo: &Repository) -> fmt::Result {
        writeln!(f, "  {} [{}]", repo.url, repo.status)?;
        if let Some(path) = &repo.clone_path {
            writeln!(f, "    Path:      {}", path.display())?;
        }
        if let Some(error) = &repo.error {
            writeln!(f, "    Error:     {}", clip(error, ERROR_WIDTH))?;
        }
        if repo.is_cloned() {
            let languages = if repo.languages.is_empty() {
                "none detected".to_string()
            } else {
                repo.languages.join(", ")
            };
            writeln!(
                f,
                "    Code:      {} ({})",
                if repo.has_code { "yes" } else { "no" },
                languages
            )?;
        }

        if let Some(init) = &repo.claude_init {
            match (&init.claude_md_path, &init.error) {
                (Some(path), _) if init.success => {
                    writeln!(f, "    Claude:    initialized ({})", path.display())?
                }
                (_, Some(error)) => writeln!(f, "    Claude:    failed: {}", clip(error, ERROR_WIDTH))?,
                _ if !init.claude_available => writeln!(f, "    Claude:    CLI not available")?,
                _ => {}
            }
        }

        if let Some(generation) = &repo.gradio_generation {
            match (&generation.app_path, &generation.error) {
                (Some(path), _) if generation.success => writeln!(
                    f,
                    "    Gradio:    {}{}",
                    path.display(),
                    if generation.readme_updated {
                        " (README updated)"
                    } else {
                        ""
                    }
                )?,
                (_, Some(error)) => writeln!(f, "    Gradio:    failed: {}", clip(error, ERROR_WIDTH))?,
                _ => {}
            }
        }

        if let Some(upload) = &repo.space_upload {
            if upload.success {
                writeln!(
                    f,
                    "    Space:     {} ({} files, {}MB)",
                    upload.space_url.as_deref().unwrap_or("unknown"),
                    upload.files_uploaded,
                    upload.total_size_mb
                )?;
            } else if let Some(error) = &upload.error {
                writeln!(f, "    Space:     failed: {}", clip(error, ERROR_WIDTH))?;
            }
            for warning in &upload.warnings {
                writeln!(f, "    Warning:   {}", warning)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for EntityView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = self.entity;
        writeln!(f, "{}", entity.title)?;
        writeln!(f, "{}", "=".repeat(entity.title.chars().count().min(80)))?;
        writeln!(f)?;
        writeln!(f, "ID:       {}", entity.id)?;
        writeln!(f, "Type:     {}", entity.entry_type.as_str())?;
        if let Some(url) = &entity.source_url {
            writeln!(f, "URL:      {}", url)?;
        }
        writeln!(f, "Status:   {}", entity.aggregate_status)?;
        writeln!(f, "Added:    {}", entity.created_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Updated:  {}", entity.updated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f)?;

        writeln!(f, "Steps:")?;
        for step in StepName::ALL {
            let state = entity.processing_steps.state(step);
            match &state.error {
                Some(note) => writeln!(f, "  {:<18} {:<12} {}", step, state.status, note)?,
                None => writeln!(f, "  {:<18} {}", step, state.status)?,
            }
        }
        writeln!(f)?;

        writeln!(f, "Links:")?;
        for category in LinkCategory::ALL {
            let links = entity.links.get(category);
            if links.is_empty() {
                writeln!(f, "  {}: none", category.label())?;
                continue;
            }
            writeln!(f, "  {}:", category.label())?;
            for link in links {
                writeln!(f, "    - {}", link)?;
            }
        }

        if !entity.repositories.is_empty() {
            writeln!(f)?;
            writeln!(f, "Repositories:")?;
            for repo in &entity.repositories {
                Self::write_repository(f, repo)?;
            }
        }
        Ok(())
    }
}
