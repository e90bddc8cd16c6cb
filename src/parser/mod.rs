pub mod blocks;
pub mod boilerplate;
pub mod dom;
pub mod enrich;
pub mod entities;
pub mod filters;
pub mod special;
pub mod structure;
pub mod tables;

use std::sync::LazyLock;

use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use blocks::{Block, BlockBody};
use dom::Dom;

/// Main-content roots, tried in order; `body` when none match.
const CONTENT_ROOTS: &[&str] = &[
    "main",
    "article",
    ".content",
    ".main-content",
    "#content",
    ".article-content",
    "[role=main]",
    ".help-content",
    ".documentation-content",
];

static ROOTS: LazyLock<Vec<Selector>> =
    LazyLock::new(|| CONTENT_ROOTS.iter().map(|s| dom::selector(s)).collect());

/// The live element holding the page's main content.
pub fn content_root(dom: &Dom) -> ElementRef<'_> {
    dom.first_match(&ROOTS).unwrap_or_else(|| dom.body())
}

pub struct NormalizeInput<'a> {
    pub html: &'a str,
    pub title: Option<&'a str>,
    pub breadcrumbs: &'a [String],
    pub source_url: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub blocks: Vec<Block>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub breadcrumbs: Vec<String>,
    pub extracted_at: String,
    pub special_blocks_count: usize,
    pub word_count: usize,
    pub headers: Vec<OutlineEntry>,
    pub images_count: usize,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub level: u8,
    pub text: String,
    pub id: String,
}

/// Pipeline: boilerplate → special blocks → structure → noise → validate → enrich.
pub fn normalize(input: &NormalizeInput<'_>) -> NormalizedDocument {
    let base = input.source_url.and_then(|u| Url::parse(u).ok());
    let mut dom = Dom::parse(input.html);

    boilerplate::strip(&mut dom);
    let special = special::extract(&mut dom);

    let root = content_root(&dom);
    let main_flow = structure::walk(&dom, *root, base.as_ref());
    let main_count = main_flow.len();

    let mut bodies = filters::drop_noise(main_flow);
    bodies.extend(special.into_iter().map(BlockBody::SpecialBlock));
    let bodies = filters::validate(bodies);
    debug!(
        "normalized {}: {} main-flow candidates, {} blocks kept",
        input.source_url.unwrap_or("<inline>"),
        main_count,
        bodies.len()
    );

    let blocks = enrich::enrich(bodies);
    let metadata = metadata(input, base.as_ref(), &blocks);
    NormalizedDocument { blocks, metadata }
}

fn metadata(input: &NormalizeInput<'_>, base: Option<&Url>, blocks: &[Block]) -> DocumentMetadata {
    let headers: Vec<OutlineEntry> = blocks
        .iter()
        .filter_map(|b| match &b.body {
            BlockBody::Header { level, text, id, .. } => Some(OutlineEntry {
                level: *level,
                text: text.clone(),
                id: id.clone(),
            }),
            _ => None,
        })
        .collect();

    let title = input
        .title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .or_else(|| headers.iter().find(|h| h.level == 1).map(|h| h.text.clone()));

    let breadcrumbs = if input.breadcrumbs.is_empty() {
        base.map(breadcrumbs_from_url).unwrap_or_default()
    } else {
        input.breadcrumbs.to_vec()
    };

    DocumentMetadata {
        title,
        breadcrumbs,
        extracted_at: chrono::Utc::now().to_rfc3339(),
        special_blocks_count: blocks
            .iter()
            .filter(|b| matches!(b.body, BlockBody::SpecialBlock(_)))
            .count(),
        word_count: blocks.iter().map(|b| b.text().split_whitespace().count()).sum(),
        headers,
        images_count: blocks
            .iter()
            .filter(|b| matches!(b.body, BlockBody::Image { .. }))
            .count(),
        source_url: input.source_url.map(String::from),
    }
}

/// Folder names between `/help/` and the page itself.
fn breadcrumbs_from_url(url: &Url) -> Vec<String> {
    let path = url.path();
    let Some(idx) = path.to_ascii_lowercase().find("/help/") else {
        return Vec::new();
    };
    let rest = path[idx + "/help/".len()..].trim_matches('/');
    let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    segments
        .into_iter()
        .map(|s| s.replace(['_', '-'], " "))
        .collect()
}
