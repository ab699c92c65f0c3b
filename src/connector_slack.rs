//! Slack channel history source.
//!
//! Calls `conversations.history`, which returns messages newest first. Each
//! request asks for messages strictly older than the last `ts` seen, so the
//! cursor walks backwards through the channel until `has_more` is false.
//! The fetch loop reverses the collected messages so they are staged oldest
//! first.
//!
//! Requires `SLACK_TOKEN` (a bot or user token with `channels:history`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::{FetchConfig, SlackSourceConfig};
use crate::cursor::{PaginationCursor, Position};
use crate::error::FetchError;
use crate::models::{FailurePolicy, Page, Record, SourceOrder};
use crate::traits::{PageRequest, PageSource};

pub struct SlackHistory {
    config: SlackSourceConfig,
    client: Client,
    token: Option<String>,
}

#[derive(Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<Record>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

impl SlackHistory {
    pub fn new(config: SlackSourceConfig, fetch: &FetchConfig, token: Option<String>) -> Result<Self> {
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

    fn history_url(&self) -> String {
        format!(
            "{}/conversations.history",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

/// Map an `ok: false` envelope to a fetch error.
fn api_error(error: Option<String>) -> FetchError {
    let error = error.unwrap_or_else(|| "unknown_error".to_string());
    match error.as_str() {
        "ratelimited" | "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            FetchError::Transient(format!("slack api error: {}", error))
        }
        _ => FetchError::Permanent(format!("slack api error: {}", error)),
    }
}

#[async_trait]
impl PageSource for SlackHistory {
    fn name(&self) -> &str {
        "slack"
    }

    fn order(&self) -> SourceOrder {
        SourceOrder::NewestFirst
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Strict
    }

    fn cursor(&self) -> PaginationCursor {
        PaginationCursor::before("ts")
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
        let Position::Before(latest) = &request.position else {
            return Err(FetchError::Permanent(format!(
                "slack history is paged by timestamp, got {:?}",
                request.position
            )));
        };
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| FetchError::Permanent("SLACK_TOKEN is not set".to_string()))?;

        let mut query = vec![
            ("channel", self.config.channel.clone()),
            ("limit", request.page_size.to_string()),
        ];
        if let Some(latest) = latest {
            query.push(("latest", latest.clone()));
        }
        debug!(channel = %self.config.channel, latest = ?latest, "fetching channel history");

        let response = self
            .client
            .get(self.history_url())
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, "conversations.history"));
        }

        let body: HistoryResponse = response.json().await?;
        if !body.ok {
            return Err(api_error(body.error));
        }

        let mut page = Page::new(body.messages, body.has_more);
        page.next_hint = body
            .response_metadata
            .and_then(|m| m.next_cursor)
            .filter(|c| !c.is_empty());
        Ok(page)
    }
}
