//! Pipeline commands: `process`, `url`, and `retry`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use papersnipe::agent::ClaudeCli;
use papersnipe::config::Config;
use papersnipe::discovery::HubPages;
use papersnipe::hub::HubClient;
use papersnipe::orchestrator::{Collaborators, Pipeline};
use papersnipe::repos::GitCloner;

/// The real external systems, built once per command.
struct Live {
    pages: HubPages,
    cloner: GitCloner,
    agent: ClaudeCli,
    host: HubClient,
}

impl Live {
    fn new(config: &Config) -> Self {
        Self {
            pages: HubPages::new(),
            cloner: GitCloner,
            agent: ClaudeCli::new(config.claude.clone()),
            host: HubClient::new(config.hub.token.clone()),
        }
    }

    fn parts(&self) -> Collaborators<'_> {
        Collaborators {
            pages: &self.pages,
            cloner: &self.cloner,
            agent: &self.agent,
            host: &self.host,
        }
    }
}

fn load_config(project_dir: &Path, verbose: bool) -> Result<Config> {
    let config = Config::load(project_dir, verbose)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    tracing::debug!(
        database = %config.database_path.display(),
        repos = %config.repos_path.display(),
        "Configuration loaded"
    );
    Ok(config)
}

pub async fn cmd_process(project_dir: &Path, verbose: bool, date: Option<&str>) -> Result<()> {
    if let Some(date) = date {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD", date))?;
    }

    let config = load_config(project_dir, verbose)?;
    let live = Live::new(&config);
    let summary = Pipeline::new(&config, live.parts())
        .process_batch(date)
        .await?;

    println!();
    print!("{}", summary);
    println!();
    Ok(())
}

pub async fn cmd_url(
    project_dir: &Path,
    verbose: bool,
    url: &str,
    title: Option<&str>,
) -> Result<()> {
    let config = load_config(project_dir, verbose)?;
    let live = Live::new(&config);
    let report = Pipeline::new(&config, live.parts())
        .process_manual_url(url, title)
        .await?;

    println!();
    print!("{}", report);
    println!();
    Ok(())
}

pub async fn cmd_retry(project_dir: &Path, verbose: bool) -> Result<()> {
    let config = load_config(project_dir, verbose)?;
    let live = Live::new(&config);
    let summary = Pipeline::new(&config, live.parts()).retry_failed().await?;

    println!();
    print!("{}", summary);
    println!();
    Ok(())
}
