//! Error types for the fetch and load pipeline.
//!
//! Component-local failures (one record that will not serialize, one staged
//! line that will not parse) are logged and recovered where they happen and
//! never show up here. What remains is either retried by the caller
//! ([`FetchError::Transient`]) or ends the run ([`PipelineError`]).

use thiserror::Error;

/// A failed upstream page request.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network failure, timeout, rate limiting, or an upstream 5xx. Worth
    /// re-attempting the same page.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Anything else: 4xx responses, malformed bodies, API-level errors.
    #[error("upstream request failed: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Classify an HTTP status that was not a success.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            FetchError::Transient(format!("HTTP {} from {}", status, context))
        } else {
            FetchError::Permanent(format!("HTTP {} from {}", status, context))
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            FetchError::Transient(e.to_string())
        } else {
            FetchError::Permanent(e.to_string())
        }
    }
}

/// A failed statement against the target store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store understood the statement but refused it.
    #[error("statement rejected: {0}")]
    Rejected(String),
}

/// Terminal failure of a fetch or load run.
///
/// Durable output written before the failure (staged lines, rows from
/// completed batches) stays valid.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("fetch from {source_name} failed: {error}")]
    Fetch {
        source_name: String,
        #[source]
        error: FetchError,
    },

    #[error("run aborted: fetch from {source_name} still failing after {attempts} attempts: {error}")]
    RunAborted {
        source_name: String,
        attempts: u32,
        #[source]
        error: FetchError,
    },

    #[error("target store setup failed on `{statement}`: {error}")]
    Setup {
        statement: String,
        #[source]
        error: StoreError,
    },

    #[error("batch {batch}: {} record write(s) exhausted retries (staged lines {failed_lines:?}): {error}", .failed_lines.len())]
    Write {
        batch: usize,
        failed_lines: Vec<usize>,
        #[source]
        error: StoreError,
    },

    #[error("search query failed: {0}")]
    Query(#[source] StoreError),

    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}
