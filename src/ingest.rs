//! Fetched page → stored document, and re-normalization of stored HTML.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::db::{self, DocContent, DocRow};
use crate::error::DocError;
use crate::fetcher::RawPage;
use crate::parser::entities::{extract_entities, NewEntity};
use crate::parser::{self, NormalizeInput};
use crate::paths;

static DOC_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap());

/// A document ready to be written, built without touching the store.
#[derive(Debug, Clone)]
pub struct PreparedDoc {
    pub row: DocRow,
    pub entities: Vec<NewEntity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NormalizeSummary {
    pub blocks_count: usize,
    pub entities_count: usize,
}

pub fn prepare(page: &RawPage, normalize: bool) -> PreparedDoc {
    let url = page.url.to_string();
    let doc_id = paths::extract_doc_id(&url);
    let normalized_path = Some(paths::normalize_path(&url)).filter(|p| !p.is_empty());

    let content = DocContent {
        html: page.html.clone(),
        plain_text: page.plain_text.clone(),
        breadcrumbs: page.breadcrumbs.clone(),
        blocks: Vec::new(),
        outgoing_links: Vec::new(),
        metadata: None,
    };

    let (content, entities) = if normalize {
        normalize_content(&url, page.title.as_deref(), content)
    } else {
        let links: BTreeSet<String> = page
            .links
            .iter()
            .map(|l| paths::normalize_path(l.as_str()))
            .filter(|p| !p.is_empty())
            .collect();
        let content = DocContent {
            outgoing_links: links.into_iter().collect(),
            ..content
        };
        (content, Vec::new())
    };

    PreparedDoc {
        row: DocRow {
            doc_id,
            url,
            normalized_path,
            title: page.title.clone(),
            section: Some(page.section.clone()).filter(|s| !s.is_empty()),
            content,
            last_crawled: chrono::Utc::now().to_rfc3339(),
        },
        entities,
    }
}

/// Writes a prepared document; returns the `doc_id` it was stored under.
pub fn store(conn: &Connection, doc: &PreparedDoc) -> anyhow::Result<String> {
    db::upsert_doc(conn, &doc.row, &doc.entities)
}

/// Runs the normalizer over stored HTML and fills blocks, links and metadata.
pub fn normalize_content(
    url: &str,
    title: Option<&str>,
    mut content: DocContent,
) -> (DocContent, Vec<NewEntity>) {
    let doc = parser::normalize(&NormalizeInput {
        html: &content.html,
        title,
        breadcrumbs: &content.breadcrumbs,
        source_url: Some(url),
    });
    let entities = extract_entities(&doc.blocks, &doc.metadata.breadcrumbs, url);
    content.outgoing_links = paths::extract_outgoing_links(&doc.blocks).into_iter().collect();
    content.blocks = doc.blocks;
    content.metadata = Some(doc.metadata);
    (content, entities)
}

pub fn validate_doc_key(doc_id: &str) -> Result<(), DocError> {
    if DOC_KEY_RE.is_match(doc_id) {
        Ok(())
    } else {
        Err(DocError::InvalidDocKey(doc_id.to_string()))
    }
}

/// Re-normalizes one stored document in place. Stored content is untouched on failure.
pub fn renormalize(conn: &Connection, doc_id: &str) -> Result<NormalizeSummary, DocError> {
    validate_doc_key(doc_id)?;
    let doc = db::get_document(conn, doc_id)?.ok_or_else(|| DocError::NotFound(doc_id.to_string()))?;
    if doc.content.html.trim().is_empty() {
        return Err(DocError::NoHtml(doc_id.to_string()));
    }

    let (content, entities) = normalize_content(&doc.url, doc.title.as_deref(), doc.content);
    db::replace_normalized(conn, doc_id, &content, &entities)?;

    let summary = NormalizeSummary {
        blocks_count: content.blocks.len(),
        entities_count: entities.len(),
    };
    info!(
        "Normalized {}: {} blocks, {} entities",
        doc_id, summary.blocks_count, summary.entities_count
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::parse_page;
    use url::Url;

    fn fixture_page() -> RawPage {
        let html = std::fs::read_to_string("tests/fixtures/help_page.html").unwrap();
        let url = Url::parse("https://elma365.com/ru/help/crm/leads.html").unwrap();
        parse_page(&html, &url).unwrap()
    }

    #[test]
    fn prepare_normalized_document() {
        let doc = prepare(&fixture_page(), true);
        assert_eq!(doc.row.doc_id, "leads");
        assert_eq!(doc.row.normalized_path.as_deref(), Some("crm/leads.html"));
        assert!(doc.row.content.is_normalized());
        assert!(!doc.row.content.blocks.is_empty());
        assert!(doc.row.content.outgoing_links.contains(&"admin/settings.html".to_string()));
        assert!(!doc.entities.is_empty());
    }

    #[test]
    fn prepare_raw_only() {
        let doc = prepare(&fixture_page(), false);
        assert!(!doc.row.content.is_normalized());
        assert!(doc.row.content.blocks.is_empty());
        assert!(doc.entities.is_empty());
        assert!(doc.row.content.outgoing_links.contains(&"admin/settings.html".to_string()));
    }

    #[test]
    fn renormalize_stored_raw_doc() {
        let conn = db::memory();
        store(&conn, &prepare(&fixture_page(), false)).unwrap();

        let summary = renormalize(&conn, "leads").unwrap();
        assert!(summary.blocks_count > 0);
        let stored = db::get_document(&conn, "leads").unwrap().unwrap();
        assert!(stored.content.is_normalized());
        assert_eq!(stored.content.blocks.len(), summary.blocks_count);
        assert_eq!(db::doc_entities(&conn, "leads").unwrap().len(), summary.entities_count);
    }

    #[test]
    fn renormalize_regenerates_entities() {
        let conn = db::memory();
        store(&conn, &prepare(&fixture_page(), false)).unwrap();
        renormalize(&conn, "leads").unwrap();
        let code_blocks = |conn: &Connection| {
            db::doc_entities(conn, "leads")
                .unwrap()
                .into_iter()
                .filter(|e| e.kind == "code_block")
                .count()
        };
        assert_eq!(code_blocks(&conn), 1);

        let html = db::get_document(&conn, "leads").unwrap().unwrap().content.html;
        let start = html.find("<pre>").unwrap();
        let end = html.find("</pre>").unwrap() + "</pre>".len();
        let without_code = format!("{}{}", &html[..start], &html[end..]);
        conn.execute(
            "UPDATE docs SET content = json_set(content, '$.html', ?1) WHERE doc_id = 'leads'",
            [&without_code],
        )
        .unwrap();

        renormalize(&conn, "leads").unwrap();
        assert_eq!(code_blocks(&conn), 0);
        let stored = db::get_document(&conn, "leads").unwrap().unwrap();
        assert!(!stored
            .content
            .blocks
            .iter()
            .any(|b| matches!(b.body, parser::blocks::BlockBody::CodeBlock { .. })));
    }

    #[test]
    fn renormalize_errors() {
        let conn = db::memory();
        assert!(matches!(renormalize(&conn, "missing"), Err(DocError::NotFound(_))));
        assert!(matches!(renormalize(&conn, "../etc"), Err(DocError::InvalidDocKey(_))));
        assert!(matches!(renormalize(&conn, ""), Err(DocError::InvalidDocKey(_))));

        let mut doc = prepare(&fixture_page(), false);
        doc.row.content.html.clear();
        store(&conn, &doc).unwrap();
        assert!(matches!(renormalize(&conn, "leads"), Err(DocError::NoHtml(_))));
    }
}
