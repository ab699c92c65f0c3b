//! GitHub issues source.
//!
//! Pages through `GET /repos/{owner}/{repo}/issues?page=N&per_page=M`,
//! starting at page 1. A run continues while the response carries a
//! `Link: <...>; rel="next"` header; when the header is absent, a full page
//! is taken to mean more may follow. Issues with comments have them fetched
//! from their `comments_url` and staged separately.
//!
//! `per_page` is clamped to 100, the largest page GitHub serves.
//!
//! `GITHUB_TOKEN` is optional. Without it the API allows 60 requests per
//! hour, which the default pacing delay does not stay under for large
//! repositories.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::config::{FetchConfig, GithubSourceConfig};
use crate::cursor::{PaginationCursor, Position};
use crate::error::FetchError;
use crate::models::{FailurePolicy, Page, Record};
use crate::traits::{PageRequest, PageSource};

const MAX_PER_PAGE: u32 = 100;

pub struct GithubIssues {
    config: GithubSourceConfig,
    client: Client,
    token: Option<String>,
}

impl GithubIssues {
    pub fn new(config: GithubSourceConfig, fetch: &FetchConfig, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            client,
            token,
        })
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/issues",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo
        )
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, concat!("issue-harvest/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        request
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response, FetchError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // GitHub reports an exhausted rate limit as 403.
        if status == StatusCode::FORBIDDEN && rate_limit_exhausted(response.headers()) {
            return Err(FetchError::Transient(format!(
                "HTTP {} from {}: rate limit exhausted",
                status, context
            )));
        }
        Err(FetchError::from_status(status, context))
    }
}

fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}

/// Whether a `Link` header advertises a next page. `None` without a header.
fn link_has_next(headers: &HeaderMap) -> Option<bool> {
    let link = headers.get(LINK)?.to_str().ok()?;
    Some(
        link.split(',')
            .any(|part| part.split(';').skip(1).any(|p| p.trim() == "rel=\"next\"")),
    )
}

async fn json_array(response: Response, context: &str) -> Result<Vec<Record>, FetchError> {
    let body: Record = response.json().await?;
    match body {
        Record::Array(items) => Ok(items),
        other => Err(FetchError::Permanent(format!(
            "expected a JSON array from {}, got {}",
            context,
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Record) -> &'static str {
    match value {
        Record::Null => "null",
        Record::Bool(_) => "a boolean",
        Record::Number(_) => "a number",
        Record::String(_) => "a string",
        Record::Array(_) => "an array",
        Record::Object(_) => "an object",
    }
}

#[async_trait]
impl PageSource for GithubIssues {
    fn name(&self) -> &str {
        "github"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Lenient
    }

    fn cursor(&self) -> PaginationCursor {
        PaginationCursor::pages(1)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
        let Position::Page(page) = request.position else {
            return Err(FetchError::Permanent(format!(
                "github issues are paged by number, got {:?}",
                request.position
            )));
        };
        let url = self.issues_url();
        let per_page = request.page_size.min(MAX_PER_PAGE);
        debug!(%url, page, per_page, "fetching issues page");

        let response = self
            .send(
                self.get(&url)
                    .query(&[("page", page), ("per_page", per_page)]),
                "issues",
            )
            .await?;
        let has_next = link_has_next(response.headers());
        let records = json_array(response, "issues").await?;

        let has_more = has_next.unwrap_or(records.len() >= per_page as usize);
        Ok(Page::new(records, has_more))
    }

    fn has_related_records(&self) -> bool {
        self.config.comments
    }

    fn has_related(&self, record: &Record) -> bool {
        self.config.comments
            && record.get("comments").and_then(|c| c.as_u64()).unwrap_or(0) > 0
            && record.get("comments_url").and_then(|u| u.as_str()).is_some()
    }

    async fn related(&self, record: &Record) -> Result<Vec<Record>, FetchError> {
        let Some(url) = record.get("comments_url").and_then(|u| u.as_str()) else {
            return Ok(Vec::new());
        };
        let response = self.send(self.get(url), "comments").await?;
        json_array(response, "comments").await
    }
}
