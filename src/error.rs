use thiserror::Error;

use crate::models::placeholder;

/// Per-row scrape failure. Never stops a run; each variant maps to a
/// placeholder cell.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("could not parse response: {0}")]
    Parse(String),

    #[error("no data for {0}")]
    NoData(String),

    #[error("row has no source URL")]
    MissingUrl,
}

impl ScrapeError {
    /// Worth another attempt: connection trouble, timeouts, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::NoData(_) => placeholder::NO_DATA,
            Self::Parse(_) => placeholder::ERROR,
            _ => placeholder::NOT_AVAILABLE,
        }
    }
}

/// Misconfiguration and checkpoint I/O problems in the row loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("shard index {index} must be below shard step {step}")]
    ShardOutOfRange { index: usize, step: usize },

    #[error("shard step must be at least 1")]
    ZeroShardStep,

    #[error("start index {start} is after end index {end}")]
    EmptyWindow { start: usize, end: usize },

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("checkpoint {path}: {source}")]
    Checkpoint {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
