//! Core data types that flow through the pipeline.
//!
//! Upstream records stay opaque JSON from fetch through staging; only the
//! loader maps them into the [`IssueRow`] write shape.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A document as returned by the upstream API. Never modified after fetch.
pub type Record = serde_json::Value;

/// One upstream response: ordered records plus continuation metadata.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    pub has_more: bool,
    /// Continuation token suggested by the upstream, if it sends one.
    pub next_hint: Option<String>,
}

impl Page {
    pub fn new(records: Vec<Record>, has_more: bool) -> Self {
        Self {
            records,
            has_more,
            next_hint: None,
        }
    }
}

/// The order an upstream returns records in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrder {
    OldestFirst,
    /// History-style APIs; results are reversed before staging.
    NewestFirst,
}

/// What a fetch run does when a page cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Propagate the error and stop.
    Strict,
    /// Log, stop the run, and keep whatever was already fetched.
    Lenient,
}

/// Row shape written to the target table and returned by search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRow {
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub url: Option<String>,
}

impl IssueRow {
    /// Map a staged GitHub issue into the write shape.
    ///
    /// Returns `None` when `title`, `user.login`, or an RFC 3339
    /// `created_at` is missing.
    pub fn from_record(record: &Record) -> Option<Self> {
        let title = record.get("title")?.as_str()?.to_string();
        let author = record.get("user")?.get("login")?.as_str()?.to_string();
        let created_at = record.get("created_at")?.as_str()?;
        let created_at = DateTime::parse_from_rfc3339(created_at)
            .ok()?
            .with_timezone(&Utc);

        Some(Self {
            title,
            body: record
                .get("body")
                .and_then(|b| b.as_str())
                .map(str::to_string),
            author,
            created_at,
            url: record
                .get("html_url")
                .and_then(|u| u.as_str())
                .map(str::to_string),
        })
    }
}
