use std::time::Duration;
use thiserror::Error;

/// Errors from the feed provider (lookup, rule management, stream connect).
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed authentication failed: HTTP {status}: {body}")]
    Unauthorized { status: u16, body: String },

    #[error("Feed rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unknown account: {0}")]
    UnknownEntity(String),

    #[error("Unexpected feed payload: {0}")]
    Payload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => FeedError::Unauthorized { status, body },
            429 => FeedError::RateLimited { retry_after },
            _ => FeedError::Status { status, body },
        }
    }

    /// Worth retrying at the call site.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Http(_) | FeedError::RateLimited { .. } => true,
            FeedError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FeedError::Unauthorized { .. })
    }

    /// Provider-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FeedError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors from the exchange capability.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// Timeout, connection reset, 5xx, 429. Safe to retry.
    #[error("Transient exchange failure: {0}")]
    Transient(String),

    /// 4xx or `success:false`. Terminal for the request.
    #[error("Order rejected (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Unexpected exchange payload: {0}")]
    Payload(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }

    pub fn from_status(status: u16, reason: String) -> Self {
        if status >= 500 || status == 429 {
            ExchangeError::Transient(format!("HTTP {status}: {reason}"))
        } else {
            ExchangeError::Rejected { status, reason }
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return ExchangeError::from_status(status.as_u16(), e.to_string());
        }
        if e.is_decode() {
            ExchangeError::Payload(e.to_string())
        } else {
            // timeout, connect, reset, body read
            ExchangeError::Transient(e.to_string())
        }
    }
}

/// A single desired rule the provider refused to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub expression: String,
    pub reason: String,
}

/// Errors from one rule synchronization attempt.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Listing filter rules failed: {0}")]
    List(#[source] FeedError),

    #[error("Deleting filter rules failed: {0}")]
    Delete(#[source] FeedError),

    #[error("Provider kept {0} rule(s) scheduled for deletion")]
    NotDeleted(usize),

    #[error("Adding filter rules failed: {0}")]
    Add(#[source] FeedError),

    #[error("{} filter rule(s) rejected", failures.len())]
    Rejected { failures: Vec<RuleFailure> },
}

impl SyncError {
    pub fn is_auth(&self) -> bool {
        match self {
            SyncError::List(e) | SyncError::Delete(e) | SyncError::Add(e) => e.is_auth(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::List(e) | SyncError::Delete(e) | SyncError::Add(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Fatal outcome of the stream connection loop.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream connect failed: {0}")]
    Connect(#[source] FeedError),

    #[error("Stream rule sync failed: {0}")]
    Sync(#[source] SyncError),
}
