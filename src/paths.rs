//! URL canonicalization: document keys, crawl scope, and the link graph.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;
use uuid::Uuid;

use crate::parser::blocks::Block;

const HELP_SEGMENT: &str = "/help/";
const PAGE_EXTENSIONS: &[&str] = &[".html", ".htm", ".php", ".aspx"];

static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static NUMERIC_PAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\d+)\.html?$").unwrap());

/// Canonical lowercase key for a help page: everything after the first
/// `/help/` segment, without query, fragment or surrounding slashes.
/// Returns `""` for paths outside the help tree.
pub fn normalize_path(url: &str) -> String {
    let path = match Url::parse(url.trim()) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => bare_path(url),
    };
    help_remainder(&path)
        .map(|rest| rest.trim_matches('/').to_lowercase())
        .unwrap_or_default()
}

fn bare_path(raw: &str) -> String {
    let raw = raw.trim();
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    let path = &raw[..end];
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn help_remainder(path: &str) -> Option<&str> {
    let lower = path.to_ascii_lowercase();
    lower
        .find(HELP_SEGMENT)
        .map(|idx| &path[idx + HELP_SEGMENT.len()..])
}

/// Whether a discovered URL belongs to the crawl: same host and port as the
/// base, inside the help tree, and pointing at a page rather than a folder.
pub fn is_in_scope(url: &Url, base: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    if url.host_str() != base.host_str() || url.port_or_known_default() != base.port_or_known_default() {
        return false;
    }
    let path = url.path();
    let Some(rest) = help_remainder(path) else {
        return false;
    };
    if rest.trim_matches('/').is_empty() {
        return false;
    }
    let lower = path.to_ascii_lowercase();
    PAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) || !path.ends_with('/')
}

/// Resolves `href` against `base` and drops the fragment, giving a frontier key.
pub fn resolve_url(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url)
}

/// Sorted, deduplicated canonical paths of every link in the blocks.
pub fn extract_outgoing_links(blocks: &[Block]) -> BTreeSet<String> {
    blocks
        .iter()
        .flat_map(|b| b.body.links())
        .map(|link| normalize_path(&link.target))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Stable document key derived from a URL.
pub fn extract_doc_id(url: &str) -> String {
    let path = match Url::parse(url.trim()) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => bare_path(url),
    };
    let path = path.trim_matches('/');
    let last = path.rsplit('/').next().unwrap_or_default();

    if let Some(stem) = strip_page_extension(last) {
        if SLUG_RE.is_match(stem) {
            return stem.to_string();
        }
        if let Some(caps) = NUMERIC_PAGE_RE.captures(&format!("/{}", last)) {
            return caps[1].to_string();
        }
    }

    if let Some(segment) = path.rsplit('/').find(|s| SLUG_RE.is_match(s)) {
        return segment.to_string();
    }

    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

fn strip_page_extension(segment: &str) -> Option<&str> {
    let lower = segment.to_ascii_lowercase();
    PAGE_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| &segment[..segment.len() - ext.len()])
}

/// First folder after `/help/`, used as the coarse section token.
pub fn help_segment(url: &Url) -> Option<String> {
    let rest = help_remainder(url.path())?;
    let first = rest.split('/').next()?.trim();
    if first.is_empty() || strip_page_extension(first).is_some() && !rest.contains('/') {
        return None;
    }
    Some(first.to_string())
}
