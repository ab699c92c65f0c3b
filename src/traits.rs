//! Extension points for upstream sources.
//!
//! Every upstream the pipeline can page through implements [`PageSource`].
//! The fetch loop only talks to this trait, so the built-in GitHub and
//! Slack sources and any custom Rust source go through the same pacing,
//! retry and staging logic.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │            SourceRegistry            │
//! │  ┌──────────────┐ ┌───────────────┐  │
//! │  │ github issues│ │ slack history │  │
//! │  └──────────────┘ └───────────────┘  │
//! └──────────────────┬───────────────────┘
//!                    ▼
//!        FetchLoop → DurableStager
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::cursor::{PaginationCursor, Position};
use crate::error::FetchError;
use crate::models::{FailurePolicy, Page, Record, SourceOrder};

/// Parameters for one upstream page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub position: Position,
    pub page_size: u32,
}

/// A paginated upstream collection.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use issue_harvest::cursor::PaginationCursor;
/// use issue_harvest::error::FetchError;
/// use issue_harvest::models::{FailurePolicy, Page};
/// use issue_harvest::traits::{PageRequest, PageSource};
///
/// struct Empty;
///
/// #[async_trait]
/// impl PageSource for Empty {
///     fn name(&self) -> &str { "empty" }
///     fn failure_policy(&self) -> FailurePolicy { FailurePolicy::Strict }
///     fn cursor(&self) -> PaginationCursor { PaginationCursor::pages(1) }
///
///     async fn fetch_page(&self, _request: &PageRequest) -> Result<Page, FetchError> {
///         Ok(Page::new(vec![], false))
///     }
/// }
/// ```
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Short identifier, also used to name the staging files.
    fn name(&self) -> &str;

    /// Order records arrive in. Newest-first sources are reversed so the
    /// staged output is chronological.
    fn order(&self) -> SourceOrder {
        SourceOrder::OldestFirst
    }

    fn failure_policy(&self) -> FailurePolicy;

    /// A fresh cursor positioned at the start of the collection.
    fn cursor(&self) -> PaginationCursor;

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError>;

    /// Whether this source stages related records at all. Callers open a
    /// related staging file only when this is true.
    fn has_related_records(&self) -> bool {
        false
    }

    /// Whether [`related`](PageSource::related) has anything to fetch for
    /// this record. Lets the fetch loop skip the rate-limit wait otherwise.
    fn has_related(&self, _record: &Record) -> bool {
        false
    }

    /// Records attached to `record` that are staged next to it, such as
    /// the comments on an issue.
    async fn related(&self, _record: &Record) -> Result<Vec<Record>, FetchError> {
        Ok(Vec::new())
    }
}

/// Named collection of the sources available to `harvest fetch`.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn PageSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Build the registry from the `[sources.*]` sections of the config.
    pub fn from_config(config: &Config) -> Result<Self> {
        use crate::connector_github::GithubIssues;
        use crate::connector_slack::SlackHistory;

        let mut registry = Self::new();
        if let Some(github) = &config.sources.github {
            let token = std::env::var("GITHUB_TOKEN").ok();
            registry.register(Arc::new(GithubIssues::new(github.clone(), &config.fetch, token)?));
        }
        if let Some(slack) = &config.sources.slack {
            let token = std::env::var("SLACK_TOKEN").ok();
            registry.register(Arc::new(SlackHistory::new(slack.clone(), &config.fetch, token)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn PageSource>) {
        self.sources.push(source);
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn PageSource>> {
        self.sources.iter().find(|s| s.name() == name).cloned()
    }

    /// Like [`find`](Self::find), with an error listing what is configured.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn PageSource>> {
        match self.find(name) {
            Some(source) => Ok(source),
            None => {
                let available: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
                if available.is_empty() {
                    bail!(
                        "Unknown source: '{}'. No sources are configured; add [sources.github] or [sources.slack].",
                        name
                    );
                }
                bail!(
                    "Unknown source: '{}'. Available: {}",
                    name,
                    available.join(", ")
                )
            }
        }
    }

}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
