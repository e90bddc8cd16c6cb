use thiserror::Error;

/// Why a single page could not be turned into a `RawPage`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} is not an HTML page ({content_type})")]
    UnsupportedContent { url: String, content_type: String },
    #[error("could not parse {url}: {reason}")]
    Parse { url: String, reason: String },
}

impl FetchError {
    /// Non-HTML responses are skipped, not counted as failures.
    pub fn is_skip(&self) -> bool {
        matches!(self, FetchError::UnsupportedContent { .. })
    }
}

/// Request-level failures surfaced by `DocService`.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("document {0} not found")]
    NotFound(String),
    #[error("document {0} has no stored HTML")]
    NoHtml(String),
    #[error("invalid document key {0:?}")]
    InvalidDocKey(String),
    #[error("crawl request rejected: {0}")]
    CrawlRejected(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for DocError {
    fn from(e: rusqlite::Error) -> Self {
        DocError::Store(e.into())
    }
}
