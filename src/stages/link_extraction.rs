//! Stage 1: fetch the entity's page and categorize its links.

use crate::discovery::{PageSource, paper_page_url};
use crate::errors::StoreError;
use crate::links::extract_links;
use crate::model::{Outcome, StepName, StepStatus};
use crate::store::Session;

use super::{begin, finish};

const STEP: StepName = StepName::LinkExtraction;

/// Returns the number of categorized links.
///
/// Manual entries fetch their submitted URL, discovered papers their paper
/// page. A fetch failure settles the step as `error`. Links are replaced
/// wholesale.
pub async fn run(
    session: &mut Session,
    idx: usize,
    pages: &dyn PageSource,
) -> Result<Outcome<usize>, StoreError> {
    begin(session, idx, STEP)?;

    let entity = session.entity(idx);
    let (url, what) = match &entity.source_url {
        Some(url) => (url.clone(), "URL"),
        None => (paper_page_url(&entity.id), "paper page"),
    };

    let markup = match pages.fetch(&url).await {
        Ok(markup) => markup,
        Err(e) => {
            let message = format!("Failed to fetch {}: {}", what, e);
            finish(session, idx, STEP, StepStatus::Error, Some(message.clone()))?;
            return Ok(Outcome::Failed(message));
        }
    };

    let links = extract_links(&markup);
    let total = links.total();
    tracing::info!(
        entity = %session.entity(idx).id,
        code = links.code_repositories.len(),
        models = links.model_weights.len(),
        datasets = links.datasets.len(),
        demos = links.demo_links.len(),
        papers = links.paper_links.len(),
        "Links extracted"
    );

    session.entity_mut(idx).links = links;
    finish(session, idx, STEP, StepStatus::Completed, None)?;
    Ok(Outcome::Succeeded(total))
}
