//! Read-only store views: `stats` and `show`.

use std::path::Path;

use anyhow::Result;

use papersnipe::config::Config;
use papersnipe::errors::PipelineError;
use papersnipe::report::{EntityView, StatsView};
use papersnipe::store::EntityStore;

pub fn cmd_stats(project_dir: &Path) -> Result<()> {
    let config = Config::load(project_dir, false)?;
    let db = EntityStore::new(config.database_path.clone()).load();

    println!();
    print!("{}", StatsView::new(&db));
    println!();
    Ok(())
}

pub fn cmd_show(project_dir: &Path, id: &str) -> Result<()> {
    let id = id.trim();
    let config = Config::load(project_dir, false)?;
    let db = EntityStore::new(config.database_path.clone()).load();
    let entity = db.find(id).ok_or_else(|| PipelineError::NotFound { id: id.to_string() })?;

    println!();
    print!("{}", EntityView::new(entity));
    println!();
    Ok(())
}
