mod config;
mod crawler;
mod db;
mod error;
mod fetcher;
mod frontier;
mod ingest;
mod parser;
mod paths;
mod service;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::crawler::{AddUrl, CrawlStats};
use crate::db::{EntityFilters, DEFAULT_ENTITY_LIMIT};
use crate::service::DocService;

#[derive(Parser)]
#[command(name = "helpdocs", about = "Help-center crawler and structured document index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Recursively crawl the help tree
    Crawl {
        /// Start page (default: <base_url>/help/)
        #[arg(long)]
        start_url: Option<String>,
        #[arg(long)]
        max_depth: Option<u8>,
        /// Max concurrent fetches
        #[arg(long)]
        concurrency: Option<usize>,
        /// Pause between batches
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Fetch and store a single page
    AddUrl { url: String },
    /// Show the last crawl run and store counts
    Status,
    /// Re-run normalization over stored HTML
    Normalize {
        doc_id: Option<String>,
        /// Normalize every stored document
        #[arg(long, conflicts_with = "doc_id")]
        all: bool,
        /// With --all, also redo documents that are already normalized
        #[arg(long, requires = "all")]
        force: bool,
    },
    /// List stored documents, newest first
    Docs {
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Print each document's stored plain text instead of the summary table
        #[arg(long)]
        plain: bool,
    },
    /// Show one document
    Doc {
        doc_id: String,
        /// Print the full document as JSON
        #[arg(long)]
        json: bool,
        /// List the document's extracted entities instead of its blocks
        #[arg(long, conflicts_with = "json")]
        entities: bool,
    },
    /// Search extracted entities (header, list, code_block, special_block, image, paragraph)
    Entities {
        #[arg(value_name = "TYPE")]
        kind: String,
        #[arg(long)]
        level: Option<u8>,
        #[arg(long)]
        language: Option<String>,
        /// Special block kind, e.g. "Важно"
        #[arg(long = "kind")]
        special_kind: Option<String>,
        #[arg(long)]
        ordered: Option<bool>,
        /// Required breadcrumb (repeatable)
        #[arg(long = "breadcrumb")]
        breadcrumbs: Vec<String>,
        #[arg(short = 'n', long, default_value_t = DEFAULT_ENTITY_LIMIT)]
        limit: usize,
    },
    /// Full-text search over plain text
    Search {
        query: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// List documents in a section
    Section { name: String },
    /// Write every document as JSON
    Export {
        /// Output directory (default: configured export_dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;

    let result = match cli.command {
        Commands::Init => {
            let path = settings.db_path.clone();
            DocService::open(settings)?;
            println!("Database ready at {}", path.display());
            Ok(())
        }
        Commands::Crawl {
            start_url,
            max_depth,
            concurrency,
            delay_ms,
        } => {
            if let Some(d) = max_depth {
                settings.max_depth = d;
            }
            if let Some(c) = concurrency {
                settings.max_concurrent = c;
            }
            if let Some(d) = delay_ms {
                settings.delay_ms = d;
            }
            let svc = DocService::open(settings)?;
            let start = svc.start_crawl(start_url.as_deref())?;
            let Some(handle) = start.handle else {
                println!("Crawler is already running.");
                return Ok(());
            };
            let stats = watch_crawl(&svc, handle).await?;
            print_crawl_stats(&stats);
            Ok(())
        }
        Commands::AddUrl { url } => {
            let svc = DocService::open(settings)?;
            match svc.add_url(&url)? {
                AddUrl::Started(handle) => {
                    let stats = watch_crawl(&svc, handle).await?;
                    print_crawl_stats(&stats);
                }
                AddUrl::Queued => println!("Queued {}", url),
                AddUrl::Rejected(reason) => println!("Rejected: {}", reason),
            }
            Ok(())
        }
        Commands::Status => {
            let svc = DocService::open(settings)?;
            match svc.crawler_state()? {
                Some(state) => {
                    println!("Status:    {}", state.status.as_str());
                    println!("Last run:  {}", state.last_run.as_deref().unwrap_or("-"));
                    println!("Processed: {}/{}", state.pages_processed, state.pages_total);
                    println!("Updated:   {}", state.updated_at);
                }
                None => println!("No crawl has run yet."),
            }
            let s = svc.stats()?;
            println!("Documents: {} ({} normalized)", s.total, s.normalized);
            Ok(())
        }
        Commands::Normalize { doc_id, all, force } => {
            let svc = DocService::open(settings)?;
            match (doc_id, all) {
                (Some(id), _) => {
                    let s = svc.normalize_document(&id)?;
                    println!("{}: {} blocks, {} entities", id, s.blocks_count, s.entities_count);
                }
                (None, true) => {
                    let s = svc.normalize_all(force)?;
                    println!(
                        "Normalized {} documents ({} skipped, {} failed).",
                        s.processed, s.skipped, s.failed
                    );
                }
                (None, false) => println!("Pass a doc_id or --all."),
            }
            Ok(())
        }
        Commands::Docs { offset, limit, plain: true } => {
            let svc = DocService::open(settings)?;
            let rows = svc.plain_texts(offset, limit)?;
            for r in &rows {
                println!("── {} (#{}) ──", r.doc_id, r.id);
                println!("{}\n", r.plain_text.as_deref().unwrap_or(""));
            }
            println!("{} documents", rows.len());
            Ok(())
        }
        Commands::Docs { offset, limit, plain: false } => {
            let svc = DocService::open(settings)?;
            let docs = svc.list_docs(offset, Some(limit))?;
            for d in &docs {
                println!(
                    "{:<24} | {:<40} | {}",
                    truncate(&d.doc_id, 24),
                    truncate(d.title.as_deref().unwrap_or("-"), 40),
                    d.section.as_deref().unwrap_or("-")
                );
            }
            println!("\n{} documents", docs.len());
            Ok(())
        }
        Commands::Doc { doc_id, json, entities } => {
            let svc = DocService::open(settings)?;
            if entities {
                let rows = svc.doc_entities(&doc_id)?;
                for e in &rows {
                    let text = e.data["text"].as_str().unwrap_or_default();
                    println!("{:<14} | {}", e.kind, truncate(text, 70));
                }
                println!("\n{} entities", rows.len());
                return Ok(());
            }
            let doc = svc.get_doc(&doc_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&doc)?);
                return Ok(());
            }
            println!("{}", doc.title.as_deref().unwrap_or("(untitled)"));
            println!("{}", doc.url);
            if !doc.breadcrumbs.is_empty() {
                println!("{}", doc.breadcrumbs.join(" > "));
            }
            println!("{}", "-".repeat(80));
            for (i, b) in doc.blocks.iter().enumerate() {
                println!("{:>4} | {:<14} | {}", i, b.body.type_name(), truncate(&b.text(), 56));
            }
            println!("\n{} blocks", doc.blocks.len());
            Ok(())
        }
        Commands::Entities {
            kind,
            level,
            language,
            special_kind,
            ordered,
            breadcrumbs,
            limit,
        } => {
            let svc = DocService::open(settings)?;
            let filters = EntityFilters {
                level,
                language,
                kind: special_kind,
                ordered,
                breadcrumbs,
                limit: Some(limit),
            };
            let rows = svc.search_entities(&kind, &filters)?;
            if rows.is_empty() {
                println!("No {} entities found.", kind);
                return Ok(());
            }
            println!("{:>3} | {:<24} | {}", "#", "Doc", "Text");
            println!("{}", "-".repeat(90));
            for (i, e) in rows.iter().enumerate() {
                let text = e.data["text"]
                    .as_str()
                    .or_else(|| e.data["alt"].as_str())
                    .or_else(|| e.data["src"].as_str())
                    .unwrap_or_default();
                println!("{:>3} | {:<24} | {}", i + 1, truncate(&e.doc_id, 24), truncate(text, 60));
            }
            println!("\n{} {} entities", rows.len(), kind);
            Ok(())
        }
        Commands::Search { query, limit } => {
            let svc = DocService::open(settings)?;
            let hits = svc.find_relevant(&query, limit)?;
            if hits.is_empty() {
                println!("Nothing matches {:?}.", query);
                return Ok(());
            }
            for h in &hits {
                println!(
                    "{} [{}] @{}",
                    h.title.as_deref().unwrap_or(&h.doc_id),
                    h.doc_id,
                    h.match_position
                );
                println!("    {}", truncate(&h.snippet.replace('\n', " "), 110));
            }
            println!("\n{} documents", hits.len());
            Ok(())
        }
        Commands::Section { name } => {
            let svc = DocService::open(settings)?;
            let docs = svc.docs_by_section(&name)?;
            for d in &docs {
                println!(
                    "{:<24} | {:<40} | {}",
                    truncate(&d.doc_id, 24),
                    truncate(d.title.as_deref().unwrap_or("-"), 40),
                    d.breadcrumbs.join(" > ")
                );
            }
            println!("\n{} documents in {:?}", docs.len(), name);
            Ok(())
        }
        Commands::Export { dir } => {
            let dir = dir.unwrap_or_else(|| settings.export_dir.clone());
            let svc = DocService::open(settings)?;
            let n = svc.export_json(&dir)?;
            println!("Exported {} documents to {}", n, dir.display());
            Ok(())
        }
        Commands::Stats => {
            let svc = DocService::open(settings)?;
            let s = svc.stats()?;
            println!("Total:      {}", s.total);
            println!("Normalized: {}", s.normalized);
            println!("With HTML:  {}", s.with_html);
            println!("No HTML:    {}", s.without_html);
            println!("Entities:   {}", s.entities);
            for (kind, n) in &s.entities_by_type {
                println!("  {:<14} {}", kind, n);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Spinner with live counts until the run ends; Ctrl-C asks the crawler to stop.
async fn watch_crawl(svc: &DocService, mut handle: JoinHandle<CrawlStats>) -> anyhow::Result<CrawlStats> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    let mut ticker = tokio::time::interval(Duration::from_millis(250));

    let stats = loop {
        tokio::select! {
            joined = &mut handle => break joined?,
            _ = tokio::signal::ctrl_c() => {
                svc.stop_crawl();
                pb.set_message("stopping after in-flight pages...");
            }
            _ = ticker.tick() => {
                let s = svc.crawl_status();
                pb.set_message(format!(
                    "{} visited, {} queued, {} failed",
                    s.visited_count, s.queue_size, s.stats.total_failed
                ));
            }
        }
    };

    pb.finish_and_clear();
    Ok(stats)
}

fn print_crawl_stats(stats: &CrawlStats) {
    println!(
        "Crawled {} pages ({} failed, {} skipped).",
        stats.total_crawled, stats.total_failed, stats.total_skipped
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
