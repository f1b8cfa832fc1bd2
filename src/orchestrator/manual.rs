//! Validation and stable ids for manually submitted URLs.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::PipelineError;

static PAPER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"huggingface\.co/papers/(\d+\.\d+)").unwrap());
static SPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"huggingface\.co/spaces/([^/]+/[^/?#]+)").unwrap());
static MODEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"huggingface\.co/([^/]+/[^/?#]+)(?:/|$)").unwrap());
static DOMAIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://(?:www\.)?([^/]+)").unwrap());

const HASH_LEN: usize = 12;
const DOMAIN_LEN: usize = 20;

/// Trim `raw` and check it is an http(s) URL.
pub fn validate_url(raw: &str) -> Result<String, PipelineError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(PipelineError::InvalidUrl {
            url: raw.to_string(),
            reason: "Please provide a valid URL".to_string(),
        });
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(PipelineError::InvalidUrl {
            url: url.to_string(),
            reason: "URL must start with http:// or https://".to_string(),
        });
    }
    Ok(url.to_string())
}

/// Stable entity id for a submitted URL.
///
/// Paper pages keep their paper number, Spaces and models get `space_` or
/// `model_` plus `owner_name`, and anything else becomes
/// `manual_<domain>_<hash>`.
pub fn manual_entity_id(url: &str) -> String {
    if let Some(caps) = PAPER_REGEX.captures(url) {
        return caps[1].to_string();
    }
    if let Some(caps) = SPACE_REGEX.captures(url) {
        return format!("space_{}", caps[1].replace('/', "_"));
    }
    if !url.contains("/spaces/")
        && !url.contains("/papers/")
        && let Some(caps) = MODEL_REGEX.captures(url)
    {
        return format!("model_{}", caps[1].replace('/', "_"));
    }

    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    let hash = &digest[..HASH_LEN];
    match DOMAIN_REGEX.captures(url) {
        Some(caps) => {
            let domain: String = caps[1].replace('.', "_").chars().take(DOMAIN_LEN).collect();
            format!("manual_{}_{}", domain, hash)
        }
        None => format!("manual_{}", hash),
    }
}

/// The submitted title, or `Manual Entry: <url>` when blank.
pub fn manual_title(url: &str, title: Option<&str>) -> String {
    match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => format!("Manual Entry: {}", url),
    }
}
