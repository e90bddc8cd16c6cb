//! Crawl coordinator: one run at a time, bounded fan-out, per-page accounting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Settings;
use crate::db::{self, CrawlerState, RunStatus, SharedConn};
use crate::error::{DocError, FetchError};
use crate::fetcher;
use crate::frontier::Frontier;
use crate::ingest;
use crate::paths;

const DEFAULT_START_PATH: &str = "/help/";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlStats {
    pub total_crawled: usize,
    pub total_failed: usize,
    pub total_skipped: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlStatus {
    pub is_crawling: bool,
    pub visited_count: usize,
    pub queue_size: usize,
    pub stats: CrawlStats,
}

pub struct StartCrawl {
    pub run_accepted: bool,
    pub handle: Option<JoinHandle<CrawlStats>>,
}

pub enum AddUrl {
    /// Sent to the running crawl's inbox.
    Queued,
    /// The crawler was idle; a single-page run was started.
    Started(JoinHandle<CrawlStats>),
    Rejected(String),
}

struct Shared {
    running: AtomicBool,
    stop: AtomicBool,
    inbox: Mutex<Option<UnboundedSender<Url>>>,
    status: Mutex<CrawlStatus>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held by the run task; dropping it returns the crawler to idle.
struct RunGuard {
    shared: Arc<Shared>,
}

impl RunGuard {
    fn acquire(shared: &Arc<Shared>) -> Option<(Self, UnboundedReceiver<Url>)> {
        shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        shared.stop.store(false, Ordering::Release);
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&shared.inbox) = Some(tx);
        *lock(&shared.status) = CrawlStatus {
            is_crawling: true,
            stats: CrawlStats {
                started_at: Some(Utc::now()),
                ..Default::default()
            },
            ..Default::default()
        };
        Some((Self { shared: Arc::clone(shared) }, rx))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.shared.inbox).take();
        {
            let mut status = lock(&self.shared.status);
            status.is_crawling = false;
            status.queue_size = 0;
            status.stats.finished_at.get_or_insert_with(Utc::now);
        }
        self.shared.running.store(false, Ordering::Release);
    }
}

enum PageOutcome {
    Stored(Vec<Url>),
    Skipped(FetchError),
    Failed(anyhow::Error),
}

#[derive(Clone)]
pub struct Crawler {
    settings: Arc<Settings>,
    conn: SharedConn,
    shared: Arc<Shared>,
}

impl Crawler {
    pub fn new(settings: Settings, conn: SharedConn) -> Self {
        Self {
            settings: Arc::new(settings),
            conn,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                inbox: Mutex::new(None),
                status: Mutex::new(CrawlStatus::default()),
            }),
        }
    }

    /// Starts a recursive crawl from `start_url` (default: `<base>/help/`).
    /// A second run while one is active is refused.
    pub fn start(&self, start_url: Option<&str>) -> Result<StartCrawl, DocError> {
        let seed = match start_url {
            Some(raw) => self.resolve(raw)?,
            None => self.resolve(DEFAULT_START_PATH)?,
        };
        let Some((guard, inbox)) = RunGuard::acquire(&self.shared) else {
            warn!("Crawler is already running, ignoring start for {}", seed);
            return Ok(StartCrawl {
                run_accepted: false,
                handle: None,
            });
        };
        info!("Starting crawl from {} (max depth {})", seed, self.settings.max_depth);
        let handle = tokio::spawn(self.clone().run(guard, inbox, seed, self.settings.max_depth));
        Ok(StartCrawl {
            run_accepted: true,
            handle: Some(handle),
        })
    }

    /// Queues a page on the running crawl, or fetches just that page when idle.
    pub fn add_url(&self, raw: &str) -> Result<AddUrl, DocError> {
        let url = self.resolve(raw)?;
        if !paths::is_in_scope(&url, &self.base()?) {
            warn!("Invalid help URL: {}", url);
            return Ok(AddUrl::Rejected(format!("{} is outside the help tree", url)));
        }

        if let Some((guard, inbox)) = RunGuard::acquire(&self.shared) {
            info!("Crawler idle, fetching {} on its own", url);
            return Ok(AddUrl::Started(tokio::spawn(self.clone().run(guard, inbox, url, 0))));
        }

        let inbox = lock(&self.shared.inbox);
        match inbox.as_ref() {
            Some(tx) if tx.send(url.clone()).is_ok() => {
                info!("Added URL to queue: {}", url);
                Ok(AddUrl::Queued)
            }
            _ => Ok(AddUrl::Rejected("crawl is shutting down".into())),
        }
    }

    /// Asks the running crawl to drop its queue. In-flight pages still finish.
    pub fn stop(&self) -> bool {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        self.shared.stop.store(true, Ordering::Release);
        true
    }

    pub fn status(&self) -> CrawlStatus {
        lock(&self.shared.status).clone()
    }

    fn base(&self) -> Result<Url, DocError> {
        Url::parse(&self.settings.base_url)
            .map_err(|e| DocError::CrawlRejected(format!("bad base_url {:?}: {}", self.settings.base_url, e)))
    }

    fn resolve(&self, raw: &str) -> Result<Url, DocError> {
        let raw = raw.trim();
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => paths::resolve_url(raw, &self.base()?)
                .ok_or_else(|| DocError::CrawlRejected(format!("invalid URL {:?}", raw)))?,
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DocError::CrawlRejected(format!("unsupported scheme in {}", url)));
        }
        Ok(url)
    }

    fn publish(&self, frontier: &Frontier, stats: &CrawlStats) {
        let mut status = lock(&self.shared.status);
        status.visited_count = frontier.visited();
        status.queue_size = frontier.queued();
        status.stats = stats.clone();
    }

    fn save_state(&self, stats: &CrawlStats, status: RunStatus, total: usize, processed: usize) {
        let state = CrawlerState {
            last_run: stats.started_at.map(|t| t.to_rfc3339()),
            pages_total: total,
            pages_processed: processed,
            status,
            updated_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = db::save_crawler_state(&db::lock(&self.conn), &state) {
            warn!("Could not save crawler state: {:#}", e);
        }
    }

    async fn run(
        self,
        _guard: RunGuard,
        mut inbox: UnboundedReceiver<Url>,
        seed: Url,
        max_depth: u8,
    ) -> CrawlStats {
        let mut stats = lock(&self.shared.status).stats.clone();

        let client = match fetcher::build_client(&self.settings) {
            Ok(client) => client,
            Err(e) => {
                error!("Could not build HTTP client: {}", e);
                stats.finished_at = Some(Utc::now());
                self.save_state(&stats, RunStatus::Error, 0, 0);
                lock(&self.shared.status).stats = stats.clone();
                return stats;
            }
        };
        let scope = self.base().unwrap_or_else(|_| seed.clone());
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent.max(1)));
        let delay = self.settings.delay();

        let mut frontier = Frontier::new(max_depth);
        frontier.push(seed, 0);
        self.save_state(&stats, RunStatus::Running, 1, 0);

        loop {
            while let Ok(url) = inbox.try_recv() {
                frontier.requeue(url, 0);
            }
            if self.shared.stop.load(Ordering::Acquire) {
                let dropped = frontier.drain();
                if dropped > 0 {
                    info!("Stop requested, dropped {} queued URLs", dropped);
                }
            }
            if frontier.is_empty() {
                // Close the inbox under its lock so no add_url lands after the last check.
                let mut slot = lock(&self.shared.inbox);
                let mut late = false;
                while let Ok(url) = inbox.try_recv() {
                    late |= frontier.requeue(url, 0);
                }
                if !late {
                    slot.take();
                    break;
                }
                continue;
            }

            let batch = frontier.next_batch(self.settings.max_concurrent.max(1));
            if batch.is_empty() {
                continue;
            }
            self.crawl_batch(&client, &semaphore, &scope, batch, &mut frontier, &mut stats)
                .await;

            let visited = frontier.visited();
            self.save_state(&stats, RunStatus::Running, visited + frontier.queued(), visited);
            if !frontier.is_empty() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        stats.finished_at = Some(Utc::now());
        self.publish(&frontier, &stats);
        let visited = frontier.visited();
        self.save_state(&stats, RunStatus::Idle, visited, visited);
        info!(
            "Crawl finished: {} crawled, {} failed, {} skipped",
            stats.total_crawled, stats.total_failed, stats.total_skipped
        );
        stats
    }

    async fn crawl_batch(
        &self,
        client: &Client,
        semaphore: &Arc<Semaphore>,
        scope: &Url,
        batch: Vec<(Url, u8)>,
        frontier: &mut Frontier,
        stats: &mut CrawlStats,
    ) {
        let mut tasks = JoinSet::new();
        for (url, depth) in batch {
            let client = client.clone();
            let semaphore = Arc::clone(semaphore);
            let conn = Arc::clone(&self.conn);
            let normalize = self.settings.normalize_on_crawl;
            tasks.spawn(async move {
                let outcome = crawl_page(client, semaphore, conn, url.clone(), depth, normalize).await;
                (url, depth, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((url, depth, PageOutcome::Stored(links))) => {
                    frontier.mark_visited(url);
                    stats.total_crawled += 1;
                    let next = depth.saturating_add(1);
                    for link in links.into_iter().filter(|l| paths::is_in_scope(l, scope)) {
                        frontier.push(link, next);
                    }
                }
                Ok((url, _, PageOutcome::Skipped(e))) => {
                    debug!("Skipping {}: {}", url, e);
                    frontier.mark_visited(url);
                    stats.total_skipped += 1;
                }
                Ok((url, _, PageOutcome::Failed(e))) => {
                    warn!("Failed to crawl {}: {:#}", url, e);
                    frontier.mark_failed(url);
                    stats.total_failed += 1;
                }
                Err(e) => {
                    error!("Crawl task panicked: {}", e);
                    stats.total_failed += 1;
                }
            }
            self.publish(frontier, stats);
        }
    }
}

async fn crawl_page(
    client: Client,
    semaphore: Arc<Semaphore>,
    conn: SharedConn,
    url: Url,
    depth: u8,
    normalize: bool,
) -> PageOutcome {
    let page = {
        let Ok(_permit) = semaphore.acquire().await else {
            return PageOutcome::Failed(anyhow::anyhow!("crawl semaphore closed"));
        };
        info!("Crawling: {} (depth: {})", url, depth);
        match fetcher::fetch_and_parse(&client, &url).await {
            Ok(page) => page,
            Err(e) if e.is_skip() => return PageOutcome::Skipped(e),
            Err(e) => return PageOutcome::Failed(e.into()),
        }
    };

    let links = page.links.clone();
    let stored = tokio::task::spawn_blocking(move || {
        let doc = ingest::prepare(&page, normalize);
        let conn = db::lock(&conn);
        ingest::store(&conn, &doc)
    })
    .await;

    match stored {
        Ok(Ok(doc_id)) => {
            debug!("Saved {} as {}", url, doc_id);
            PageOutcome::Stored(links)
        }
        Ok(Err(e)) => PageOutcome::Failed(e),
        Err(e) => PageOutcome::Failed(anyhow::anyhow!("store task failed: {}", e)),
    }
}
