use std::collections::HashSet;
use std::sync::LazyLock;

use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::Client;
use scraper::Selector;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::Settings;
use crate::error::FetchError;
use crate::parser::dom::{self, Dom};
use crate::parser::{self, blocks::collapse_whitespace};
use crate::paths;

const MAX_REDIRECTS: usize = 10;
const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Stripped before plain text is taken.
const PLAIN_TEXT_CHROME: &[&str] = &[
    "script",
    "style",
    "nav",
    "header",
    "footer",
    ".navbar",
    ".menu",
    ".navigation",
    ".sidebar",
    ".header",
    ".footer",
    ".cookie",
    ".modal",
    ".popup",
    "[role=navigation]",
    "[role=banner]",
    "[role=contentinfo]",
    "noscript",
    "iframe",
    "embed",
    "object",
];

static CHROME: LazyLock<Vec<Selector>> =
    LazyLock::new(|| PLAIN_TEXT_CHROME.iter().map(|s| dom::selector(s)).collect());
static H1: LazyLock<Selector> = LazyLock::new(|| dom::selector("h1"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| dom::selector("title"));
static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| dom::selector(r#"meta[property="og:title"]"#));
static CRUMB_NAV_LINKS: LazyLock<Selector> =
    LazyLock::new(|| dom::selector(r#"nav[class*="breadcrumb"] a"#));
static CRUMB_LIST_ITEMS: LazyLock<Selector> = LazyLock::new(|| {
    dom::selector(r#"ol[class*="breadcrumb"] > li, ul[class*="breadcrumb"] > li"#)
});
static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| dom::selector(r#"script[type="application/ld+json"]"#));
static LINKS: LazyLock<Selector> = LazyLock::new(|| dom::selector("a[href]"));

/// One fetched help page, before normalization.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Final URL after redirects.
    pub url: Url,
    pub title: Option<String>,
    pub breadcrumbs: Vec<String>,
    pub section: String,
    pub html: String,
    pub plain_text: String,
    pub links: Vec<Url>,
}

pub fn build_client(settings: &Settings) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(settings.timeout())
        .redirect(Policy::limited(MAX_REDIRECTS))
        .build()
}

/// GET `url` and parse it. A response without a content type is treated as HTML.
pub async fn fetch_and_parse(client: &Client, url: &Url) -> Result<RawPage, FetchError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|source| FetchError::Network {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !content_type.is_empty() && !HTML_CONTENT_TYPES.iter().any(|t| content_type.starts_with(t)) {
        return Err(FetchError::UnsupportedContent {
            url: url.to_string(),
            content_type,
        });
    }

    let final_url = response.url().clone();
    if &final_url != url {
        debug!("{} redirected to {}", url, final_url);
    }
    let html = response.text().await.map_err(|source| FetchError::Network {
        url: final_url.to_string(),
        source,
    })?;
    parse_page(&html, &final_url)
}

/// Pure half of the fetcher: title, breadcrumbs, section, plain text and links.
pub fn parse_page(html: &str, url: &Url) -> Result<RawPage, FetchError> {
    if html.trim().is_empty() {
        return Err(FetchError::Parse {
            url: url.to_string(),
            reason: "empty body".into(),
        });
    }
    let mut dom = Dom::parse(html);

    let title = extract_title(&dom);
    let breadcrumbs = extract_breadcrumbs(&dom);
    let section = section_label(&breadcrumbs, url);
    let links = extract_links(&dom, url);

    for sel in CHROME.iter() {
        dom.prune_matching(sel);
    }
    let plain_text = plain_text(&dom);

    Ok(RawPage {
        url: url.clone(),
        title,
        breadcrumbs,
        section,
        html: html.to_string(),
        plain_text,
        links,
    })
}

fn extract_title(dom: &Dom) -> Option<String> {
    let first_text = |sel: &Selector| {
        dom.select(sel)
            .map(|el| dom.text(*el))
            .find(|t| !t.is_empty())
    };
    first_text(&H1)
        .or_else(|| first_text(&TITLE))
        .or_else(|| {
            dom.select(&OG_TITLE)
                .filter_map(|el| el.value().attr("content"))
                .map(collapse_whitespace)
                .find(|t| !t.is_empty())
        })
}

/// Breadcrumb nav links, else breadcrumb list items, else JSON-LD `BreadcrumbList`.
fn extract_breadcrumbs(dom: &Dom) -> Vec<String> {
    for sel in [&*CRUMB_NAV_LINKS, &*CRUMB_LIST_ITEMS] {
        let crumbs: Vec<String> = dom
            .select(sel)
            .map(|el| dom.text(*el))
            .filter(|t| !t.is_empty())
            .collect();
        if !crumbs.is_empty() {
            return crumbs;
        }
    }

    for script in dom.select(&LD_JSON) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };
        let crumbs = json_ld_breadcrumbs(&value);
        if !crumbs.is_empty() {
            return crumbs;
        }
    }
    Vec::new()
}

fn json_ld_breadcrumbs(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(json_ld_breadcrumbs)
            .find(|c| !c.is_empty())
            .unwrap_or_default(),
        Value::Object(map) => {
            if let Some(Value::Array(elements)) = map.get("itemListElement") {
                return elements
                    .iter()
                    .filter_map(|e| {
                        e.get("name")
                            .or_else(|| e.get("item").and_then(|i| i.get("name")))
                            .and_then(Value::as_str)
                    })
                    .map(collapse_whitespace)
                    .filter(|n| !n.is_empty())
                    .collect();
            }
            map.get("@graph").map(json_ld_breadcrumbs).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// `"A > B | [segment]"`; either side may be missing.
fn section_label(breadcrumbs: &[String], url: &Url) -> String {
    let mut parts = Vec::new();
    if !breadcrumbs.is_empty() {
        parts.push(breadcrumbs.join(" > "));
    }
    if let Some(segment) = paths::help_segment(url) {
        parts.push(format!("[{}]", segment));
    }
    parts.join(" | ")
}

/// One line per live text node under the content root.
fn plain_text(dom: &Dom) -> String {
    let root = parser::content_root(dom);
    root.descendants()
        .filter(|n| !dom.is_pruned(*n))
        .filter_map(|n| n.value().as_text().map(|t| collapse_whitespace(t)))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_links(dom: &Dom, url: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    dom.select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| paths::resolve_url(href, url))
        .filter(|link| seen.insert(link.clone()))
        .collect()
}
