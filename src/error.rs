//! Error taxonomy shared by the crawl, ingestion and repair paths.
use thiserror::Error;

use crate::model::Topic;

/// Failures reported by a browser session.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    #[error("timed out after {waited_ms}ms waiting for `{selector}`")]
    Timeout { selector: String, waited_ms: u64 },
    #[error("element `{0}` not found")]
    ElementNotFound(String),
    #[error("browser session closed")]
    Closed,
    #[error("browser support unavailable: {0}")]
    Unsupported(String),
}

/// A crawl either returns records or fails with this.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("crawl session failed: {0}")]
    Session(#[from] BrowserError),
}

/// Terminal classifications of a repair attempt.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("source page not found: {reason}")]
    NotFoundPage { reason: String },
    #[error("recovery affordance `{selector}` missing")]
    AffordanceMissing { selector: String },
    #[error("repair navigation failed: {0}")]
    Navigation(#[from] BrowserError),
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
}

/// Record rejected at pipeline entry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("record has an empty title")]
    EmptyTitle,
    #[error("record `{title}` has an empty author name")]
    EmptyAuthorName { title: String },
    #[error("payload for {} delivered to a {} consumer", actual.as_str(), expected.as_str())]
    TopicMismatch { expected: Topic, actual: Topic },
}

/// Per-record ingestion failure; logged and skipped by the consumer loop.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("unsupported media at {url}")]
    UnsupportedMedia { url: String },
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error("media deadline of {0}s exceeded")]
    DeadlineExceeded(u64),
}

impl IngestError {
    /// Validation failures are discarded quietly; everything else is worth a warning.
    pub fn is_validation(&self) -> bool {
        matches!(self, IngestError::Validation(_))
    }
}
