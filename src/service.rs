//! Request-level operations over the crawler and the document store.

use std::path::Path;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::crawler::{AddUrl, CrawlStatus, Crawler, StartCrawl};
use crate::db::{self, CrawlerState, DocRecord, EntityFilters, EntityRecord, PlainTextRow, SharedConn, Stats};
use crate::error::DocError;
use crate::ingest::{self, NormalizeSummary};
use crate::parser::blocks::Block;

const SNIPPET_RADIUS: usize = 100;
const NORMALIZE_CHUNK: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct DocView {
    pub title: Option<String>,
    pub breadcrumbs: Vec<String>,
    pub blocks: Vec<Block>,
    pub plain_text: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocSummary {
    pub doc_id: String,
    pub title: Option<String>,
    pub url: String,
    pub section: Option<String>,
    pub breadcrumbs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelevantDoc {
    pub doc_id: String,
    pub title: Option<String>,
    pub url: String,
    pub section: Option<String>,
    pub breadcrumbs: Vec<String>,
    pub snippet: String,
    /// Character offset of the first match in the plain text.
    pub match_position: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeAllSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct DocService {
    conn: SharedConn,
    crawler: Crawler,
}

impl DocService {
    pub fn new(settings: Settings, conn: Connection) -> Self {
        let conn = db::shared(conn);
        let crawler = Crawler::new(settings, conn.clone());
        Self { conn, crawler }
    }

    /// Opens the configured database, creating the schema if needed.
    pub fn open(settings: Settings) -> anyhow::Result<Self> {
        let conn = db::connect(&settings.db_path)?;
        db::init_schema(&conn)?;
        Ok(Self::new(settings, conn))
    }

    // ── Crawling ──

    pub fn start_crawl(&self, start_url: Option<&str>) -> Result<StartCrawl, DocError> {
        self.crawler.start(start_url)
    }

    pub fn add_url(&self, url: &str) -> Result<AddUrl, DocError> {
        self.crawler.add_url(url)
    }

    pub fn crawl_status(&self) -> CrawlStatus {
        self.crawler.status()
    }

    pub fn stop_crawl(&self) -> bool {
        self.crawler.stop()
    }

    pub fn crawler_state(&self) -> Result<Option<CrawlerState>, DocError> {
        Ok(db::load_crawler_state(&db::lock(&self.conn))?)
    }

    // ── Normalization ──

    pub fn normalize_document(&self, doc_id: &str) -> Result<NormalizeSummary, DocError> {
        ingest::renormalize(&db::lock(&self.conn), doc_id)
    }

    /// Re-normalizes every stored document with HTML, in parallel chunks.
    /// Already-normalized documents are skipped unless `force` is set.
    pub fn normalize_all(&self, force: bool) -> Result<NormalizeAllSummary, DocError> {
        let ids = db::list_doc_ids(&db::lock(&self.conn))?;
        let mut summary = NormalizeAllSummary::default();

        let pb = ProgressBar::new(ids.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .context("progress template")?
                .progress_chars("#>-"),
        );

        for chunk in ids.chunks(NORMALIZE_CHUNK) {
            let mut docs = Vec::with_capacity(chunk.len());
            {
                let conn = db::lock(&self.conn);
                for id in chunk {
                    match db::get_document(&conn, id)? {
                        Some(doc) if doc.content.html.trim().is_empty() => summary.skipped += 1,
                        Some(doc) if doc.content.is_normalized() && !force => summary.skipped += 1,
                        Some(doc) => docs.push(doc),
                        None => summary.skipped += 1,
                    }
                }
            }

            let results: Vec<_> = docs
                .into_par_iter()
                .map(|doc| {
                    let (content, entities) =
                        ingest::normalize_content(&doc.url, doc.title.as_deref(), doc.content);
                    (doc.doc_id, content, entities)
                })
                .collect();

            let conn = db::lock(&self.conn);
            for (doc_id, content, entities) in results {
                match db::replace_normalized(&conn, &doc_id, &content, &entities) {
                    Ok(()) => summary.processed += 1,
                    Err(e) => {
                        warn!("Failed to normalize {}: {:#}", doc_id, e);
                        summary.failed += 1;
                    }
                }
            }
            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        info!(
            "Normalized {} documents ({} skipped, {} failed)",
            summary.processed, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    // ── Reading ──

    pub fn get_doc(&self, doc_id: &str) -> Result<DocView, DocError> {
        let doc = self.document(doc_id)?;
        Ok(DocView {
            title: doc.title,
            breadcrumbs: doc.content.breadcrumbs,
            blocks: doc.content.blocks,
            plain_text: doc.content.plain_text,
            url: doc.url,
        })
    }

    /// Full stored record, including HTML and metadata.
    pub fn document(&self, doc_id: &str) -> Result<DocRecord, DocError> {
        ingest::validate_doc_key(doc_id)?;
        db::get_document(&db::lock(&self.conn), doc_id)?
            .ok_or_else(|| DocError::NotFound(doc_id.to_string()))
    }

    pub fn list_docs(&self, offset: usize, limit: Option<usize>) -> Result<Vec<DocSummary>, DocError> {
        let docs = db::list_docs(&db::lock(&self.conn), offset, limit)?;
        Ok(docs
            .into_iter()
            .map(|d| DocSummary {
                doc_id: d.doc_id,
                title: d.title,
                url: d.url,
                section: d.section,
                breadcrumbs: d.content.breadcrumbs,
            })
            .collect())
    }

    /// Stored plain text per document, in crawl order.
    pub fn plain_texts(&self, offset: usize, limit: usize) -> Result<Vec<PlainTextRow>, DocError> {
        Ok(db::list_plain_text(&db::lock(&self.conn), offset, limit)?)
    }

    pub fn doc_entities(&self, doc_id: &str) -> Result<Vec<EntityRecord>, DocError> {
        ingest::validate_doc_key(doc_id)?;
        Ok(db::doc_entities(&db::lock(&self.conn), doc_id)?)
    }

    pub fn search_entities(&self, kind: &str, filters: &EntityFilters) -> Result<Vec<EntityRecord>, DocError> {
        Ok(db::search_entities(&db::lock(&self.conn), kind, filters)?)
    }

    /// Documents whose plain text contains `query`, case-insensitively, ordered by title.
    pub fn find_relevant(&self, query: &str, limit: usize) -> Result<Vec<RelevantDoc>, DocError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let rows = db::scan_docs(&db::lock(&self.conn))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let pos = find_ignore_case(&row.plain_text, query)?;
                let snippet = snippet(&row.plain_text, pos, query.chars().count());
                Some(RelevantDoc {
                    doc_id: row.doc_id,
                    title: row.title,
                    url: row.url,
                    section: row.section,
                    breadcrumbs: row.breadcrumbs,
                    snippet,
                    match_position: pos,
                })
            })
            .take(limit)
            .collect())
    }

    /// Documents whose section or breadcrumbs mention `section`, ordered by title.
    pub fn docs_by_section(&self, section: &str) -> Result<Vec<DocSummary>, DocError> {
        let needle = section.trim().to_lowercase();
        let rows = db::scan_docs(&db::lock(&self.conn))?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                row.section
                    .as_deref()
                    .is_some_and(|s| s.to_lowercase().contains(&needle))
                    || row.breadcrumbs.iter().any(|b| b.to_lowercase().contains(&needle))
            })
            .map(|row| DocSummary {
                doc_id: row.doc_id,
                title: row.title,
                url: row.url,
                section: row.section,
                breadcrumbs: row.breadcrumbs,
            })
            .collect())
    }

    // ── Export ──

    /// Writes one pretty-printed `<doc_id>.json` per stored document into `dir`.
    pub fn export_json(&self, dir: &Path) -> Result<usize, DocError> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let ids = db::list_doc_ids(&db::lock(&self.conn))?;
        let mut written = 0;
        for id in ids {
            let Some(doc) = db::get_document(&db::lock(&self.conn), &id)? else {
                continue;
            };
            let path = dir.join(format!("{}.json", sanitize_file_name(&doc.doc_id)));
            let json = serde_json::to_string_pretty(&doc).context("serializing document")?;
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            written += 1;
        }
        info!("Exported {} documents to {}", written, dir.display());
        Ok(written)
    }

    pub fn stats(&self) -> Result<Stats, DocError> {
        Ok(db::get_stats(&db::lock(&self.conn))?)
    }
}

/// Char offset of the first case-insensitive match of `needle` in `haystack`.
///
/// Lowercasing can change a character's length (`İ` → `i̇`), so the lowered
/// text keeps a map back to original character positions.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.to_lowercase();
    let mut lowered = String::with_capacity(haystack.len());
    let mut origin = Vec::with_capacity(haystack.len());
    for (idx, ch) in haystack.chars().enumerate() {
        for lc in ch.to_lowercase() {
            origin.push((lowered.len(), idx));
            lowered.push(lc);
        }
    }
    let byte = lowered.find(&needle)?;
    origin
        .iter()
        .find(|(start, _)| *start == byte)
        .map(|(_, idx)| *idx)
}

/// Up to `SNIPPET_RADIUS` characters either side of the match.
fn snippet(text: &str, pos: usize, len: usize) -> String {
    let start = pos.saturating_sub(SNIPPET_RADIUS);
    let end = pos + len + SNIPPET_RADIUS;
    text.chars().skip(start).take(end - start).collect()
}

fn sanitize_file_name(doc_id: &str) -> String {
    doc_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocContent, DocRow};
    use crate::fetcher::parse_page;
    use url::Url;

    fn service() -> DocService {
        DocService::new(Settings::default(), db::memory())
    }

    fn insert(svc: &DocService, doc_id: &str, title: &str, section: &str, crumbs: &[&str], text: &str) {
        let row = DocRow {
            doc_id: doc_id.into(),
            url: format!("https://elma365.com/ru/help/{}.html", doc_id),
            normalized_path: Some(format!("{}.html", doc_id)),
            title: Some(title.into()),
            section: Some(section.into()),
            content: DocContent {
                html: format!("<main><h1>{}</h1><p>{}</p></main>", title, text),
                plain_text: text.into(),
                breadcrumbs: crumbs.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            last_crawled: "2024-01-01T00:00:00Z".into(),
        };
        db::upsert_doc(&db::lock(&svc.conn), &row, &[]).unwrap();
    }

    #[test]
    fn find_relevant_is_case_insensitive_and_ordered_by_title() {
        let svc = service();
        insert(&svc, "b", "Бизнес-процессы", "Процессы | [bpm]", &["BPM"], "Запуск ПРОЦЕССА вручную");
        insert(&svc, "a", "Автоматизация", "Процессы | [bpm]", &["BPM"], "Каждый процесс имеет карточку");
        insert(&svc, "c", "Лиды", "CRM | [crm]", &["CRM"], "Ничего общего");

        let hits = svc.find_relevant("процесс", 10).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].match_position, 7);
        assert_eq!(hits[1].match_position, 7);
        assert_eq!(hits[1].snippet, "Запуск ПРОЦЕССА вручную");

        assert_eq!(svc.find_relevant("процесс", 1).unwrap().len(), 1);
        assert!(svc.find_relevant("  ", 10).unwrap().is_empty());
    }

    #[test]
    fn snippet_window() {
        let text = format!("{}needle{}", "a".repeat(150), "b".repeat(150));
        let pos = find_ignore_case(&text, "NEEDLE").unwrap();
        assert_eq!(pos, 150);
        let s = snippet(&text, pos, 6);
        assert_eq!(s.chars().count(), 206);
        assert!(s.starts_with('a') && s.ends_with('b'));
        assert_eq!(snippet("short needle", 6, 6), "short needle");
    }

    #[test]
    fn docs_by_section_matches_section_or_breadcrumbs() {
        let svc = service();
        insert(&svc, "leads", "Лиды", "CRM > Лиды | [crm]", &["CRM", "Лиды"], "text");
        insert(&svc, "deals", "Сделки", "", &["crm"], "text");
        insert(&svc, "apps", "Приложения", "Платформа | [platform]", &["Платформа"], "text");

        let ids: Vec<_> = svc
            .docs_by_section("crm")
            .unwrap()
            .into_iter()
            .map(|d| d.doc_id)
            .collect();
        assert_eq!(ids, vec!["leads", "deals"]);
        assert_eq!(svc.docs_by_section("ПЛАТФОРМА").unwrap().len(), 1);
    }

    #[test]
    fn normalize_all_skips_normalized_unless_forced() {
        let svc = service();
        insert(&svc, "one", "One", "", &[], "first body text");
        insert(&svc, "two", "Two", "", &[], "second body text");

        let first = svc.normalize_all(false).unwrap();
        assert_eq!(first, NormalizeAllSummary { processed: 2, skipped: 0, failed: 0 });
        let again = svc.normalize_all(false).unwrap();
        assert_eq!(again, NormalizeAllSummary { processed: 0, skipped: 2, failed: 0 });
        let forced = svc.normalize_all(true).unwrap();
        assert_eq!(forced.processed, 2);

        let doc = svc.get_doc("one").unwrap();
        assert_eq!(doc.title.as_deref(), Some("One"));
        assert!(!doc.blocks.is_empty());
    }

    #[test]
    fn normalize_document_and_entities() {
        let svc = service();
        let html = std::fs::read_to_string("tests/fixtures/help_page.html").unwrap();
        let url = Url::parse("https://elma365.com/ru/help/crm/leads.html").unwrap();
        let page = parse_page(&html, &url).unwrap();
        ingest::store(&db::lock(&svc.conn), &ingest::prepare(&page, false)).unwrap();

        let summary = svc.normalize_document("leads").unwrap();
        assert_eq!(svc.doc_entities("leads").unwrap().len(), summary.entities_count);

        let code = svc
            .search_entities("code_block", &EntityFilters { language: Some("javascript".into()), ..Default::default() })
            .unwrap();
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].doc_id, "leads");

        assert!(matches!(svc.get_doc("nope"), Err(DocError::NotFound(_))));
        assert!(matches!(svc.get_doc("a b"), Err(DocError::InvalidDocKey(_))));
    }

    #[test]
    fn export_writes_one_file_per_doc() {
        let svc = service();
        insert(&svc, "one", "One", "", &[], "body");
        insert(&svc, "two", "Two", "", &[], "body");
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(svc.export_json(dir.path()).unwrap(), 2);
        let raw = std::fs::read_to_string(dir.path().join("one.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["doc_id"], "one");
        assert!(raw.contains("\n  "));
    }

    #[test]
    fn stats_and_listing() {
        let svc = service();
        insert(&svc, "one", "One", "", &[], "body");
        let stats = svc.stats().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(svc.list_docs(0, None).unwrap().len(), 1);
        assert!(!svc.crawl_status().is_crawling);

        let plain = svc.plain_texts(0, 10).unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].doc_id, "one");
        assert_eq!(plain[0].plain_text.as_deref(), Some("body"));
    }
}
