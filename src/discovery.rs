//! Daily-paper listing and page fetching over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::errors::HubError;
use crate::hub::{HUB_BASE, expect_success};

const DAILY_PAPERS_URL: &str = "https://huggingface.co/api/daily_papers";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A paper announced in the daily listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperRef {
    pub id: String,
    pub title: String,
}

/// Source of paper listings and page markup.
/// Real implementation: `HubPages`. Tests substitute canned pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Papers announced on `date` (`YYYY-MM-DD`), or today when `None`.
    async fn daily_papers(&self, date: Option<&str>) -> Result<Vec<PaperRef>, HubError>;

    /// Raw markup of the page at `url`.
    async fn fetch(&self, url: &str) -> Result<String, HubError>;
}

/// Canonical page for a discovered paper.
pub fn paper_page_url(id: &str) -> String {
    format!("{}/papers/{}", HUB_BASE, id)
}

#[derive(Debug, Deserialize)]
struct DailyPaper {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyItem {
    #[serde(default)]
    paper: Option<DailyPaper>,
    #[serde(default)]
    title: Option<String>,
}

/// Turn listing items into paper references, skipping items without an id.
fn papers_from_listing(items: Vec<DailyItem>) -> Vec<PaperRef> {
    items
        .into_iter()
        .filter_map(|item| {
            let paper = item.paper?;
            let id = paper.id.filter(|id| !id.is_empty())?;
            let title = item
                .title
                .or(paper.title)
                .unwrap_or_else(|| "Untitled".to_string());
            Some(PaperRef { id, title })
        })
        .collect()
}

/// Pages served by the hosting platform's public site.
pub struct HubPages {
    client: Client,
}

impl HubPages {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HubPages {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageSource for HubPages {
    async fn daily_papers(&self, date: Option<&str>) -> Result<Vec<PaperRef>, HubError> {
        let mut request = self.client.get(DAILY_PAPERS_URL).timeout(FETCH_TIMEOUT);
        if let Some(date) = date {
            request = request.query(&[("date", date)]);
        }

        let resp = request.send().await.map_err(|source| HubError::Request {
            url: DAILY_PAPERS_URL.to_string(),
            source,
        })?;
        let items: Vec<DailyItem> = expect_success(DAILY_PAPERS_URL, resp)
            .await?
            .json()
            .await
            .map_err(|source| HubError::Request {
                url: DAILY_PAPERS_URL.to_string(),
                source,
            })?;

        let papers = papers_from_listing(items);
        tracing::info!(count = papers.len(), date = ?date, "Fetched daily papers");
        Ok(papers)
    }

    async fn fetch(&self, url: &str) -> Result<String, HubError> {
        tracing::debug!(url, "Fetching page");
        let resp = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|source| HubError::Request {
                url: url.to_string(),
                source,
            })?;
        expect_success(url, resp)
            .await?
            .text()
            .await
            .map_err(|source| HubError::Request {
                url: url.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_page_url() {
        assert_eq!(
            paper_page_url("2307.09288"),
            "https://huggingface.co/papers/2307.09288"
        );
    }

    #[test]
    fn test_listing_parses_ids_and_titles() {
        let json = r#"[
            {"paper": {"id": "2307.09288", "title": "Inner"}, "title": "Llama 2"},
            {"paper": {"id": "2401.00001"}},
            {"paper": {"title": "No id"}, "title": "Dropped"},
            {"title": "No paper"}
        ]"#;
        let items: Vec<DailyItem> = serde_json::from_str(json).unwrap();
        let papers = papers_from_listing(items);

        assert_eq!(
            papers,
            vec![
                PaperRef {
                    id: "2307.09288".into(),
                    title: "Llama 2".into()
                },
                PaperRef {
                    id: "2401.00001".into(),
                    title: "Untitled".into()
                },
            ]
        );
    }

    #[test]
    fn test_listing_ignores_unknown_fields() {
        let json = r#"[{"paper": {"id": "1.2", "upvotes": 5, "authors": []}, "numComments": 3, "title": "T"}]"#;
        let items: Vec<DailyItem> = serde_json::from_str(json).unwrap();
        assert_eq!(papers_from_listing(items).len(), 1);
    }
}
