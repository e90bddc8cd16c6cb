use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::parser::blocks::Block;
use crate::parser::entities::NewEntity;
use crate::parser::DocumentMetadata;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS docs (
            id              INTEGER PRIMARY KEY,
            doc_id          TEXT UNIQUE NOT NULL,
            url             TEXT UNIQUE NOT NULL,
            normalized_path TEXT UNIQUE,
            title           TEXT,
            section         TEXT,
            content         TEXT NOT NULL,
            outgoing_links  TEXT NOT NULL DEFAULT '[]',
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            last_crawled    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_docs_title ON docs(title);

        CREATE TABLE IF NOT EXISTS entities (
            id         INTEGER PRIMARY KEY,
            doc_id     TEXT NOT NULL REFERENCES docs(doc_id) ON DELETE CASCADE,
            type       TEXT NOT NULL,
            data       TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_entities_doc ON entities(doc_id);
        CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type);

        CREATE TABLE IF NOT EXISTS crawler_state (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            last_run        TEXT,
            pages_total     INTEGER NOT NULL DEFAULT 0,
            pages_processed INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'idle' CHECK(status IN ('idle','running','error')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

#[cfg(test)]
pub fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}

/// Connection shared between the crawler and request handlers.
pub type SharedConn = Arc<Mutex<Connection>>;

pub fn shared(conn: Connection) -> SharedConn {
    Arc::new(Mutex::new(conn))
}

/// Locks the shared connection. Never hold the guard across an `.await`.
pub fn lock(conn: &SharedConn) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Documents ──

/// The JSON `content` column. Always written as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocContent {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub plain_text: String,
    #[serde(default)]
    pub breadcrumbs: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub outgoing_links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

impl DocContent {
    pub fn is_normalized(&self) -> bool {
        self.metadata.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct DocRow {
    pub doc_id: String,
    pub url: String,
    pub normalized_path: Option<String>,
    pub title: Option<String>,
    pub section: Option<String>,
    pub content: DocContent,
    pub last_crawled: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocRecord {
    pub doc_id: String,
    pub url: String,
    pub normalized_path: Option<String>,
    pub title: Option<String>,
    pub section: Option<String>,
    pub content: DocContent,
    pub created_at: String,
    pub last_crawled: Option<String>,
}

/// Inserts or replaces a document and its entity set in one transaction.
/// A row that already owns the same `normalized_path` is the same document,
/// so URL variants of one page keep a single row. Returns the stored `doc_id`.
pub fn upsert_doc(conn: &Connection, doc: &DocRow, entities: &[NewEntity]) -> Result<String> {
    let content = serde_json::to_string(&doc.content)?;
    let links = serde_json::to_string(&doc.content.outgoing_links)?;
    let tx = conn.unchecked_transaction()?;
    let owner: Option<String> = match &doc.normalized_path {
        Some(path) => tx
            .query_row("SELECT doc_id FROM docs WHERE normalized_path = ?1", [path], |row| row.get(0))
            .optional()?,
        None => None,
    };
    let doc_id = owner.unwrap_or_else(|| doc.doc_id.clone());
    let updated = tx
        .execute(
            "UPDATE docs SET url = ?2, normalized_path = ?3, title = ?4, section = ?5,
                content = ?6, outgoing_links = ?7, last_crawled = ?8
             WHERE doc_id = ?1",
            rusqlite::params![
                doc_id, doc.url, doc.normalized_path, doc.title, doc.section,
                content, links, doc.last_crawled,
            ],
        )
        .with_context(|| format!("updating {}", doc.url))?;
    if updated == 0 {
        tx.execute(
            "INSERT INTO docs (doc_id, url, normalized_path, title, section, content, outgoing_links, last_crawled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                doc_id, doc.url, doc.normalized_path, doc.title, doc.section,
                content, links, doc.last_crawled,
            ],
        )
        .with_context(|| format!("inserting {}", doc.url))?;
    }
    replace_entities(&tx, &doc_id, entities)?;
    tx.commit()?;
    Ok(doc_id)
}

/// Swaps in freshly normalized content and entities for an existing document.
pub fn replace_normalized(
    conn: &Connection,
    doc_id: &str,
    content: &DocContent,
    entities: &[NewEntity],
) -> Result<()> {
    let json = serde_json::to_string(content)?;
    let links = serde_json::to_string(&content.outgoing_links)?;
    let tx = conn.unchecked_transaction()?;
    let updated = tx.execute(
        "UPDATE docs SET content = ?2, outgoing_links = ?3 WHERE doc_id = ?1",
        rusqlite::params![doc_id, json, links],
    )?;
    if updated == 0 {
        bail!("document {} disappeared during normalization", doc_id);
    }
    replace_entities(&tx, doc_id, entities)?;
    tx.commit()?;
    Ok(())
}

fn replace_entities(conn: &Connection, doc_id: &str, entities: &[NewEntity]) -> Result<()> {
    conn.execute("DELETE FROM entities WHERE doc_id = ?1", [doc_id])?;
    let mut stmt = conn.prepare("INSERT INTO entities (doc_id, type, data) VALUES (?1, ?2, ?3)")?;
    for e in entities {
        stmt.execute(rusqlite::params![doc_id, e.kind, e.data.to_string()])?;
    }
    Ok(())
}

const DOC_COLUMNS: &str =
    "doc_id, url, normalized_path, title, section, content, created_at, last_crawled";

fn doc_from_row(row: &rusqlite::Row) -> rusqlite::Result<(DocRecord, String)> {
    let content: String = row.get(5)?;
    Ok((
        DocRecord {
            doc_id: row.get(0)?,
            url: row.get(1)?,
            normalized_path: row.get(2)?,
            title: row.get(3)?,
            section: row.get(4)?,
            content: DocContent::default(),
            created_at: row.get(6)?,
            last_crawled: row.get(7)?,
        },
        content,
    ))
}

fn with_content((mut doc, raw): (DocRecord, String)) -> Result<DocRecord> {
    doc.content =
        serde_json::from_str(&raw).with_context(|| format!("corrupt content for {}", doc.doc_id))?;
    Ok(doc)
}

pub fn get_document(conn: &Connection, doc_id: &str) -> Result<Option<DocRecord>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM docs WHERE doc_id = ?1", DOC_COLUMNS),
            [doc_id],
            doc_from_row,
        )
        .optional()?;
    row.map(with_content).transpose()
}

/// Newest first, like the document listing page.
pub fn list_docs(conn: &Connection, offset: usize, limit: Option<usize>) -> Result<Vec<DocRecord>> {
    let sql = format!(
        "SELECT {} FROM docs ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
        DOC_COLUMNS,
        limit.map(|n| n as i64).unwrap_or(-1),
        offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], doc_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(with_content).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct PlainTextRow {
    pub id: i64,
    pub doc_id: String,
    pub plain_text: Option<String>,
}

/// `content.plain_text` only, oldest first.
pub fn list_plain_text(conn: &Connection, offset: usize, limit: usize) -> Result<Vec<PlainTextRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, doc_id, json_extract(content, '$.plain_text') FROM docs
         ORDER BY id ASC LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![limit as i64, offset as i64], |row| {
            Ok(PlainTextRow {
                id: row.get(0)?,
                doc_id: row.get(1)?,
                plain_text: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_doc_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT doc_id FROM docs ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Light projection for text search and section listings (no HTML, no blocks).
pub struct DocScanRow {
    pub doc_id: String,
    pub title: Option<String>,
    pub url: String,
    pub section: Option<String>,
    pub breadcrumbs: Vec<String>,
    pub plain_text: String,
}

pub fn scan_docs(conn: &Connection) -> Result<Vec<DocScanRow>> {
    let mut stmt = conn.prepare(
        "SELECT doc_id, title, url, section,
                COALESCE(json_extract(content, '$.breadcrumbs'), '[]'),
                COALESCE(json_extract(content, '$.plain_text'), '')
         FROM docs
         ORDER BY title, doc_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(doc_id, title, url, section, crumbs, plain_text)| -> Result<DocScanRow> {
            let breadcrumbs = serde_json::from_str(&crumbs)
                .with_context(|| format!("corrupt breadcrumbs for {}", doc_id))?;
            Ok(DocScanRow {
                doc_id,
                title,
                url,
                section,
                breadcrumbs,
                plain_text,
            })
        })
        .collect()
}

// ── Entities ──

#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    pub id: i64,
    pub doc_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct EntityFilters {
    pub level: Option<u8>,
    pub language: Option<String>,
    pub kind: Option<String>,
    pub ordered: Option<bool>,
    pub breadcrumbs: Vec<String>,
    pub limit: Option<usize>,
}

pub const DEFAULT_ENTITY_LIMIT: usize = 100;

fn entity_from_row(row: &rusqlite::Row) -> rusqlite::Result<(i64, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn entity_record((id, doc_id, kind, data, created_at): (i64, String, String, String, String)) -> Result<EntityRecord> {
    Ok(EntityRecord {
        id,
        data: serde_json::from_str(&data).with_context(|| format!("corrupt entity {}", id))?,
        doc_id,
        kind,
        created_at,
    })
}

/// Entities of one type. Type-specific filters only apply to their type;
/// every breadcrumb given must be present.
pub fn search_entities(conn: &Connection, kind: &str, filters: &EntityFilters) -> Result<Vec<EntityRecord>> {
    let mut conditions = vec!["type = ?1".to_string()];
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(kind.to_string())];

    if let Some(level) = filters.level.filter(|_| kind == "header") {
        params.push(Box::new(level));
        conditions.push(format!("json_extract(data, '$.level') = ?{}", params.len()));
    }
    if let Some(language) = filters.language.as_ref().filter(|_| kind == "code_block") {
        params.push(Box::new(language.clone()));
        conditions.push(format!("json_extract(data, '$.language') = ?{}", params.len()));
    }
    if let Some(special) = filters.kind.as_ref().filter(|_| kind == "special_block") {
        params.push(Box::new(special.clone()));
        conditions.push(format!("json_extract(data, '$.kind') = ?{}", params.len()));
    }
    if let Some(ordered) = filters.ordered.filter(|_| kind == "list") {
        params.push(Box::new(ordered));
        conditions.push(format!("json_extract(data, '$.ordered') = ?{}", params.len()));
    }
    for crumb in &filters.breadcrumbs {
        params.push(Box::new(crumb.clone()));
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM json_each(entities.data, '$.breadcrumbs') WHERE value = ?{})",
            params.len()
        ));
    }

    let sql = format!(
        "SELECT id, doc_id, type, data, created_at FROM entities WHERE {} ORDER BY id LIMIT {}",
        conditions.join(" AND "),
        filters.limit.unwrap_or(DEFAULT_ENTITY_LIMIT)
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), entity_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(entity_record).collect()
}

pub fn doc_entities(conn: &Connection, doc_id: &str) -> Result<Vec<EntityRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, doc_id, type, data, created_at FROM entities WHERE doc_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([doc_id], entity_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(entity_record).collect()
}

// ── Crawler state ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Error => "error",
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(RunStatus::Idle),
            "running" => Ok(RunStatus::Running),
            "error" => Ok(RunStatus::Error),
            other => bail!("unknown crawler status {:?}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlerState {
    pub last_run: Option<String>,
    pub pages_total: usize,
    pub pages_processed: usize,
    pub status: RunStatus,
    pub updated_at: String,
}

pub fn save_crawler_state(conn: &Connection, state: &CrawlerState) -> Result<()> {
    conn.execute(
        "INSERT INTO crawler_state (id, last_run, pages_total, pages_processed, status, updated_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            last_run = excluded.last_run,
            pages_total = excluded.pages_total,
            pages_processed = excluded.pages_processed,
            status = excluded.status,
            updated_at = excluded.updated_at",
        rusqlite::params![
            state.last_run,
            state.pages_total,
            state.pages_processed,
            state.status.as_str(),
            state.updated_at,
        ],
    )?;
    Ok(())
}

pub fn load_crawler_state(conn: &Connection) -> Result<Option<CrawlerState>> {
    let row = conn
        .query_row(
            "SELECT last_run, pages_total, pages_processed, status, updated_at
             FROM crawler_state WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, usize>(1)?,
                    row.get::<_, usize>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(|(last_run, pages_total, pages_processed, status, updated_at)| -> Result<CrawlerState> {
        Ok(CrawlerState {
            last_run,
            pages_total,
            pages_processed,
            status: status.parse()?,
            updated_at,
        })
    })
    .transpose()
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub normalized: usize,
    pub with_html: usize,
    pub without_html: usize,
    pub entities: usize,
    pub entities_by_type: Vec<(String, usize)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM docs", [], |r| r.get(0))?;
    let normalized: usize = conn.query_row(
        "SELECT COUNT(*) FROM docs WHERE json_extract(content, '$.metadata') IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let with_html: usize = conn.query_row(
        "SELECT COUNT(*) FROM docs
         WHERE json_extract(content, '$.metadata') IS NULL
           AND COALESCE(json_extract(content, '$.html'), '') != ''",
        [],
        |r| r.get(0),
    )?;
    let entities: usize = conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;

    let mut stmt =
        conn.prepare("SELECT type, COUNT(*) FROM entities GROUP BY type ORDER BY COUNT(*) DESC, type")?;
    let entities_by_type = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stats {
        total,
        normalized,
        with_html,
        without_html: total - normalized - with_html,
        entities,
        entities_by_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(doc_id: &str, html: &str) -> DocRow {
        DocRow {
            doc_id: doc_id.into(),
            url: format!("https://example.com/help/{}.html", doc_id),
            normalized_path: Some(format!("{}.html", doc_id)),
            title: Some(doc_id.to_uppercase()),
            section: Some("CRM | [crm]".into()),
            content: DocContent {
                html: html.into(),
                plain_text: format!("text of {}", doc_id),
                breadcrumbs: vec!["CRM".into(), "Лиды".into()],
                ..Default::default()
            },
            last_crawled: "2024-01-01T00:00:00+00:00".into(),
        }
    }

    fn entity(kind: &'static str, data: serde_json::Value) -> NewEntity {
        NewEntity {
            kind,
            data,
        }
    }

    #[test]
    fn upsert_replaces_content_and_entities() {
        let conn = memory();
        upsert_doc(&conn, &doc("lead", "<p>v1</p>"), &[entity("header", json!({"level": 1}))]).unwrap();
        upsert_doc(
            &conn,
            &doc("lead", "<p>v2</p>"),
            &[
                entity("header", json!({"level": 2})),
                entity("list", json!({"ordered": true})),
            ],
        )
        .unwrap();

        let stored = get_document(&conn, "lead").unwrap().unwrap();
        assert_eq!(stored.content.html, "<p>v2</p>");
        assert_eq!(list_doc_ids(&conn).unwrap(), vec!["lead"]);
        let entities = doc_entities(&conn, "lead").unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].data["level"], 2);
    }

    #[test]
    fn plain_text_listing_pages_by_id() {
        let conn = memory();
        for id in ["a", "b", "c"] {
            upsert_doc(&conn, &doc(id, "<p>x</p>"), &[]).unwrap();
        }
        let rows = list_plain_text(&conn, 1, 5).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(rows[0].plain_text.as_deref(), Some("text of b"));
        assert_eq!(list_plain_text(&conn, 0, 1).unwrap().len(), 1);
    }

    #[test]
    fn missing_doc_is_none() {
        let conn = memory();
        assert!(get_document(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn entity_filters() {
        let conn = memory();
        upsert_doc(&conn, &doc("a", "<p>a</p>"), &[]).unwrap();
        let crumbs = json!(["CRM", "Лиды"]);
        replace_normalized(
            &conn,
            "a",
            &DocContent::default(),
            &[
                entity("header", json!({"level": 1, "breadcrumbs": crumbs})),
                entity("header", json!({"level": 2, "breadcrumbs": ["Platform"]})),
                entity("code_block", json!({"language": "js", "breadcrumbs": crumbs})),
                entity("list", json!({"ordered": true, "breadcrumbs": crumbs})),
                entity("list", json!({"ordered": false, "breadcrumbs": crumbs})),
                entity("special_block", json!({"kind": "Важно", "breadcrumbs": crumbs})),
            ],
        )
        .unwrap();

        let level2 = EntityFilters { level: Some(2), ..Default::default() };
        let hits = search_entities(&conn, "header", &level2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].data["level"], 2);

        let crm = EntityFilters { breadcrumbs: vec!["Лиды".into()], ..Default::default() };
        assert_eq!(search_entities(&conn, "header", &crm).unwrap().len(), 1);

        let js = EntityFilters { language: Some("js".into()), ..Default::default() };
        assert_eq!(search_entities(&conn, "code_block", &js).unwrap().len(), 1);

        let ordered = EntityFilters { ordered: Some(true), ..Default::default() };
        assert_eq!(search_entities(&conn, "list", &ordered).unwrap().len(), 1);

        let important = EntityFilters { kind: Some("Важно".into()), ..Default::default() };
        assert_eq!(search_entities(&conn, "special_block", &important).unwrap().len(), 1);

        let limited = EntityFilters { limit: Some(1), ..Default::default() };
        assert_eq!(search_entities(&conn, "header", &limited).unwrap().len(), 1);
    }

    #[test]
    fn deleting_doc_cascades_to_entities() {
        let conn = memory();
        upsert_doc(&conn, &doc("x", "<p>x</p>"), &[entity("header", json!({}))]).unwrap();
        conn.execute("DELETE FROM docs WHERE doc_id = 'x'", []).unwrap();
        assert!(doc_entities(&conn, "x").unwrap().is_empty());
    }

    #[test]
    fn same_normalized_path_updates_one_row() {
        let conn = memory();
        upsert_doc(&conn, &doc("leads", "<p>v1</p>"), &[]).unwrap();
        let mut variant = doc("Leads", "<p>v2</p>");
        variant.url = "https://example.com/help/Leads.html".into();
        variant.normalized_path = Some("leads.html".into());

        let stored_as = upsert_doc(&conn, &variant, &[entity("header", json!({"level": 1}))]).unwrap();
        assert_eq!(stored_as, "leads");
        assert_eq!(list_doc_ids(&conn).unwrap(), vec!["leads"]);
        let stored = get_document(&conn, "leads").unwrap().unwrap();
        assert_eq!(stored.content.html, "<p>v2</p>");
        assert_eq!(stored.url, "https://example.com/help/Leads.html");
        assert_eq!(doc_entities(&conn, "leads").unwrap().len(), 1);
    }

    #[test]
    fn documents_without_path_coexist() {
        let conn = memory();
        let mut no_path = doc("c", "<p>c</p>");
        no_path.normalized_path = None;
        upsert_doc(&conn, &no_path, &[]).unwrap();
        let mut no_path = doc("d", "<p>d</p>");
        no_path.normalized_path = None;
        upsert_doc(&conn, &no_path, &[]).unwrap();
        assert_eq!(list_doc_ids(&conn).unwrap(), vec!["c", "d"]);
    }

    #[test]
    fn crawler_state_round_trip() {
        let conn = memory();
        assert!(load_crawler_state(&conn).unwrap().is_none());
        let mut state = CrawlerState {
            last_run: Some("2024-01-01T00:00:00+00:00".into()),
            pages_total: 10,
            pages_processed: 4,
            status: RunStatus::Running,
            updated_at: "2024-01-01T00:00:01+00:00".into(),
        };
        save_crawler_state(&conn, &state).unwrap();
        state.status = RunStatus::Idle;
        state.pages_processed = 10;
        save_crawler_state(&conn, &state).unwrap();
        let loaded = load_crawler_state(&conn).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Idle);
        assert_eq!(loaded.pages_processed, 10);
    }

    #[test]
    fn stats_split_by_normalization() {
        let conn = memory();
        upsert_doc(&conn, &doc("a", "<p>a</p>"), &[]).unwrap();
        upsert_doc(&conn, &doc("b", ""), &[]).unwrap();
        let s = get_stats(&conn).unwrap();
        assert_eq!((s.total, s.normalized, s.with_html, s.without_html), (2, 0, 1, 1));
    }

    #[test]
    fn scan_reads_breadcrumbs_and_text() {
        let conn = memory();
        upsert_doc(&conn, &doc("b", "<p>b</p>"), &[]).unwrap();
        upsert_doc(&conn, &doc("a", "<p>a</p>"), &[]).unwrap();
        let rows = scan_docs(&conn).unwrap();
        assert_eq!(rows[0].doc_id, "a");
        assert_eq!(rows[0].breadcrumbs, vec!["CRM", "Лиды"]);
        assert_eq!(rows[1].plain_text, "text of b");
    }
}
