//! Link extraction from paper pages.
//!
//! Pure functions: markup in, categorized [`Links`] out. Anchor `href`s and
//! bare URLs anywhere in the markup are collected, cleaned, deduplicated, and
//! sorted into five categories. URLs matching no category are dropped.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{LinkCategory, Links};

/// Base for site-relative `href`s.
pub const SITE_BASE: &str = "https://huggingface.co";

static HREF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).unwrap());

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"{}\\|^`\[\]]+[^\s<>"{}\\|^`\[\].,;!?)]"#).unwrap()
});

static ENTITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").unwrap());

static TRAILING_PUNCT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.,;:!?)}\]]+$").unwrap());

const CODE_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org", "git.io"];
const DEMO_HOSTS: &[&str] = &["colab.research.google.com", "kaggle.com/code", "replicate.com"];
const PAPER_HOSTS: &[&str] = &[
    "arxiv.org",
    "aclweb.org",
    "openreview.net",
    "proceedings.mlr.press",
];

/// Extract and categorize every link found in `markup`.
pub fn extract_links(markup: &str) -> Links {
    let mut links = Links::default();
    for url in collect_urls(markup) {
        if let Some(category) = categorize(&url) {
            links.get_mut(category).push(url);
        }
    }
    links
}

/// Every distinct URL in the markup, in sorted order.
pub fn collect_urls(markup: &str) -> BTreeSet<String> {
    let mut urls = BTreeSet::new();

    for caps in HREF_REGEX.captures_iter(markup) {
        let href = decode_entities(&caps[1]);
        if href.starts_with("http") {
            urls.insert(href);
        } else if href.starts_with('/') && !href.starts_with("//") {
            urls.insert(format!("{}{}", SITE_BASE, href));
        }
    }

    // Attribute values such as `data-props` carry escaped JSON; scanning the
    // raw text would run a URL on into the `&quot;` that closes it.
    let decoded = decode_entities(markup);
    for m in URL_REGEX.find_iter(&decoded) {
        let cleaned = TRAILING_PUNCT_REGEX.replace(m.as_str(), "");
        if !cleaned.is_empty() {
            urls.insert(cleaned.into_owned());
        }
    }

    urls
}

/// First matching category wins.
pub fn categorize(url: &str) -> Option<LinkCategory> {
    let lower = url.to_lowercase();
    let on_hub = lower.contains("huggingface.co");

    if CODE_HOSTS.iter().any(|host| lower.contains(host)) {
        Some(LinkCategory::CodeRepositories)
    } else if on_hub && (lower.contains("/models/") || lower.contains("/model/")) {
        Some(LinkCategory::ModelWeights)
    } else if on_hub && lower.contains("/datasets/") {
        Some(LinkCategory::Datasets)
    } else if (on_hub && lower.contains("/spaces/"))
        || DEMO_HOSTS.iter().any(|host| lower.contains(host))
    {
        Some(LinkCategory::DemoLinks)
    } else if PAPER_HOSTS.iter().any(|host| lower.contains(host)) || lower.ends_with(".pdf") {
        Some(LinkCategory::PaperLinks)
    } else {
        None
    }
}

/// Decode HTML character references. Unknown named entities are kept as-is.
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    ENTITY_REGEX
        .replace_all(raw, |caps: &regex::Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "nbsp" => Some('\u{a0}'),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
