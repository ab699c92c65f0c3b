//! The rate-limited pagination loop.
//!
//! [`FetchLoop`] pulls one page at a time from a [`PageSource`]: wait on the
//! [`RateLimiter`], request the page at the cursor, advance the cursor from
//! the page's last record. It stops when the upstream reports no more
//! pages, a page comes back empty, or the cursor stalls. Transient failures
//! re-attempt the same page after another wait, up to a bounded number of
//! attempts.
//!
//! What happens when a page finally fails depends on the source's
//! [`FailurePolicy`]: strict sources propagate the error, lenient ones log it
//! and end the run with whatever was already fetched (and staged).

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::FetchConfig;
use crate::cursor::{Advance, PaginationCursor};
use crate::error::PipelineError;
use crate::models::{FailurePolicy, Page, Record, SourceOrder};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::rate_limit::RateLimiter;
use crate::stage::{DurableStager, StageOutcome};
use crate::traits::{PageRequest, PageSource};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: u32,
    /// Attempts per page, counting the first.
    pub max_attempts: u32,
    /// Stop once this many records have been fetched.
    pub limit: Option<usize>,
}

impl FetchOptions {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_attempts: config.max_attempts.max(1),
            limit: None,
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// Drives one pagination run over a source.
///
/// Pages are pulled lazily through [`next_page`](FetchLoop::next_page);
/// [`fetch_all`] and [`fetch_and_stage`] are the two ways runs are consumed.
pub struct FetchLoop {
    source: Arc<dyn PageSource>,
    cursor: PaginationCursor,
    limiter: RateLimiter,
    options: FetchOptions,
    pages: usize,
    fetched: usize,
    done: bool,
}

impl FetchLoop {
    pub fn new(source: Arc<dyn PageSource>, limiter: RateLimiter, options: FetchOptions) -> Self {
        let cursor = source.cursor();
        Self {
            source,
            cursor,
            limiter,
            options,
            pages: 0,
            fetched: 0,
            done: false,
        }
    }

    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    /// Pages received so far, including a final empty one.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn fetched(&self) -> usize {
        self.fetched
    }

    /// Fetch the next page of records, in upstream order.
    ///
    /// Returns `Ok(None)` once the run is over. After an error the loop is
    /// finished as well.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>, PipelineError> {
        if self.done {
            return Ok(None);
        }
        if self.options.limit.is_some_and(|limit| self.fetched >= limit) {
            self.done = true;
            return Ok(None);
        }

        let request = PageRequest {
            position: self.cursor.position().clone(),
            page_size: self.options.page_size,
        };
        let page = match self.fetch_with_retry(&request).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        self.pages += 1;

        let Page {
            mut records,
            has_more,
            ..
        } = page;

        if records.is_empty() {
            info!(source = self.source.name(), page = self.pages, "empty page, ending run");
            self.done = true;
            return Ok(None);
        }

        match self.cursor.advance(records.last(), has_more) {
            Advance::Moved(_) => {}
            Advance::Exhausted => self.done = true,
            Advance::Stalled => {
                warn!(
                    source = self.source.name(),
                    position = ?self.cursor.position(),
                    "cursor did not move past the previous page, ending run"
                );
                self.done = true;
            }
        }

        if let Some(limit) = self.options.limit {
            let remaining = limit - self.fetched;
            if records.len() >= remaining {
                records.truncate(remaining);
                self.done = true;
            }
        }

        self.fetched += records.len();
        Ok(Some(records))
    }

    async fn fetch_with_retry(&self, request: &PageRequest) -> Result<Page, PipelineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.wait().await;

            match self.source.fetch_page(request).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.options.max_attempts => {
                    warn!(
                        source = self.source.name(),
                        attempt,
                        max_attempts = self.options.max_attempts,
                        error = %e,
                        "transient fetch failure, retrying page"
                    );
                }
                Err(e) if e.is_transient() => {
                    return Err(PipelineError::RunAborted {
                        source_name: self.source.name().to_string(),
                        attempts: attempt,
                        error: e,
                    });
                }
                Err(e) => {
                    return Err(PipelineError::Fetch {
                        source_name: self.source.name().to_string(),
                        error: e,
                    });
                }
            }
        }
    }
}

/// Records from a completed (or leniently aborted) run.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Chronological order, oldest first.
    pub records: Vec<Record>,
    pub pages: usize,
    /// Why a lenient run stopped early.
    pub aborted: Option<String>,
}

/// Fetch every page and return the records oldest first.
pub async fn fetch_all(
    source: Arc<dyn PageSource>,
    limiter: RateLimiter,
    options: FetchOptions,
) -> Result<FetchOutcome, PipelineError> {
    let policy = source.failure_policy();
    let order = source.order();
    let mut fetch = FetchLoop::new(source, limiter, options);
    let mut outcome = FetchOutcome::default();

    loop {
        match fetch.next_page().await {
            Ok(Some(records)) => outcome.records.extend(records),
            Ok(None) => break,
            Err(e) => match policy {
                FailurePolicy::Strict => return Err(e),
                FailurePolicy::Lenient => {
                    error!(source = fetch.source().name(), error = %e, "fetch run stopped early");
                    outcome.aborted = Some(e.to_string());
                    break;
                }
            },
        }
    }

    if order == SourceOrder::NewestFirst {
        outcome.records.reverse();
    }
    outcome.pages = fetch.pages();
    Ok(outcome)
}

/// Counts from [`fetch_and_stage`].
#[derive(Debug, Default)]
pub struct StageReport {
    pub pages: usize,
    pub fetched: usize,
    pub staged: StageOutcome,
    pub related: StageOutcome,
    /// Related fetches that failed and were skipped.
    pub related_failures: usize,
    pub aborted: Option<String>,
}

/// Fetch a source into staging files.
///
/// Oldest-first sources are staged page by page as they arrive, so a
/// lenient run that stops early keeps every page it already received.
/// Newest-first sources are fetched in full, reversed, then staged.
/// Related records (issue comments) go to `related` when one is given.
pub async fn fetch_and_stage(
    source: Arc<dyn PageSource>,
    limiter: RateLimiter,
    options: FetchOptions,
    stager: &DurableStager,
    related: Option<&DurableStager>,
    progress: &dyn ProgressReporter,
) -> Result<StageReport, PipelineError> {
    let mut report = StageReport::default();

    if source.order() == SourceOrder::NewestFirst {
        let outcome = fetch_all(source.clone(), limiter.clone(), options).await?;
        progress.report(ProgressEvent::Fetched {
            source: source.name().to_string(),
            page: outcome.pages,
            records: outcome.records.len(),
            total: outcome.records.len(),
        });
        report.pages = outcome.pages;
        report.fetched = outcome.records.len();
        report.aborted = outcome.aborted;
        report.staged = stager.stage_all(&outcome.records).await?;
        if let Some(related) = related {
            stage_related(&*source, &limiter, &outcome.records, related, &mut report).await?;
        }
        return Ok(report);
    }

    let policy = source.failure_policy();
    let mut fetch = FetchLoop::new(source.clone(), limiter.clone(), options);
    loop {
        let records = match fetch.next_page().await {
            Ok(Some(records)) => records,
            Ok(None) => break,
            Err(e) => match policy {
                FailurePolicy::Strict => return Err(e),
                FailurePolicy::Lenient => {
                    error!(source = source.name(), error = %e, "fetch run stopped early, staged output kept");
                    report.aborted = Some(e.to_string());
                    break;
                }
            },
        };

        report.staged.absorb(stager.stage_all(&records).await?);
        progress.report(ProgressEvent::Fetched {
            source: source.name().to_string(),
            page: fetch.pages(),
            records: records.len(),
            total: fetch.fetched(),
        });

        if let Some(related) = related {
            stage_related(&*source, &limiter, &records, related, &mut report).await?;
        }
    }

    report.pages = fetch.pages();
    report.fetched = fetch.fetched();
    Ok(report)
}

/// Fetch and stage related records one parent at a time, each request paced
/// by the limiter. A failed fetch is logged and skipped.
async fn stage_related(
    source: &dyn PageSource,
    limiter: &RateLimiter,
    records: &[Record],
    stager: &DurableStager,
    report: &mut StageReport,
) -> Result<(), PipelineError> {
    for record in records.iter().filter(|r| source.has_related(r)) {
        limiter.wait().await;
        match source.related(record).await {
            Ok(children) => report.related.absorb(stager.stage_all(&children).await?),
            Err(e) => {
                report.related_failures += 1;
                warn!(
                    source = source.name(),
                    parent = ?record.get("id"),
                    error = %e,
                    "failed to fetch related records"
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Position;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted responses and records the requests it saw.
    struct Scripted {
        policy: FailurePolicy,
        responses: Mutex<Vec<Result<Page, FetchError>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl Scripted {
        fn new(policy: FailurePolicy, mut responses: Vec<Result<Page, FetchError>>) -> Self {
            responses.reverse();
            Self {
                policy,
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageSource for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn failure_policy(&self) -> FailurePolicy {
            self.policy
        }
        fn cursor(&self) -> PaginationCursor {
            PaginationCursor::pages(1)
        }
        async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(Page::default()))
        }
    }

    fn records(range: std::ops::Range<u32>) -> Vec<Record> {
        range.map(|id| json!({ "id": id })).collect()
    }

    fn no_delay() -> RateLimiter {
        RateLimiter::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn collects_pages_until_has_more_is_false() {
        let source = Arc::new(Scripted::new(
            FailurePolicy::Strict,
            vec![
                Ok(Page::new(records(0..3), true)),
                Ok(Page::new(records(3..6), true)),
                Ok(Page::new(records(6..7), false)),
            ],
        ));
        let outcome = fetch_all(source.clone(), no_delay(), FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.records, records(0..7));
        assert_eq!(outcome.pages, 3);
        let positions: Vec<Position> = source
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.position.clone())
            .collect();
        assert_eq!(
            positions,
            vec![Position::Page(1), Position::Page(2), Position::Page(3)]
        );
    }

    #[tokio::test]
    async fn empty_page_ends_run_even_if_has_more() {
        let source = Arc::new(Scripted::new(
            FailurePolicy::Strict,
            vec![
                Ok(Page::new(records(0..2), true)),
                Ok(Page::new(vec![], true)),
                Ok(Page::new(records(2..4), false)),
            ],
        ));
        let outcome = fetch_all(source.clone(), no_delay(), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(source.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transient_failures_retry_the_same_page() {
        let source = Arc::new(Scripted::new(
            FailurePolicy::Strict,
            vec![
                Ok(Page::new(records(0..2), true)),
                Err(FetchError::Transient("HTTP 503".into())),
                Err(FetchError::Transient("HTTP 429".into())),
                Ok(Page::new(records(2..3), false)),
            ],
        ));
        let outcome = fetch_all(source.clone(), no_delay(), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.records, records(0..3));

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests[1..].iter().all(|r| r.position == Position::Page(2)));
    }

    #[tokio::test]
    async fn exhausted_retries_abort_strict_run() {
        let source = Arc::new(Scripted::new(
            FailurePolicy::Strict,
            vec![
                Ok(Page::new(records(0..2), true)),
                Err(FetchError::Transient("timeout".into())),
                Err(FetchError::Transient("timeout".into())),
                Err(FetchError::Transient("timeout".into())),
            ],
        ));
        let options = FetchOptions {
            max_attempts: 3,
            ..FetchOptions::default()
        };
        let err = fetch_all(source, no_delay(), options).await.unwrap_err();
        assert!(matches!(err, PipelineError::RunAborted { attempts: 3, .. }), "{err}");
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let source = Arc::new(Scripted::new(
            FailurePolicy::Strict,
            vec![Err(FetchError::Permanent("HTTP 404".into()))],
        ));
        let err = fetch_all(source.clone(), no_delay(), FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { .. }));
        assert_eq!(source.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lenient_run_keeps_what_it_fetched() {
        let source = Arc::new(Scripted::new(
            FailurePolicy::Lenient,
            vec![
                Ok(Page::new(records(0..4), true)),
                Err(FetchError::Permanent("HTTP 403 rate limit".into())),
            ],
        ));
        let outcome = fetch_all(source, no_delay(), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.records, records(0..4));
        assert!(outcome.aborted.unwrap().contains("403"));
    }

    #[tokio::test]
    async fn limit_truncates_the_last_page() {
        let source = Arc::new(Scripted::new(
            FailurePolicy::Strict,
            vec![
                Ok(Page::new(records(0..4), true)),
                Ok(Page::new(records(4..8), true)),
                Ok(Page::new(records(8..12), true)),
            ],
        ));
        let options = FetchOptions {
            limit: Some(6),
            ..FetchOptions::default()
        };
        let outcome = fetch_all(source.clone(), no_delay(), options).await.unwrap();
        assert_eq!(outcome.records, records(0..6));
        assert_eq!(source.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_request_is_paced() {
        let source = Arc::new(Scripted::new(
            FailurePolicy::Strict,
            vec![
                Ok(Page::new(records(0..1), true)),
                Err(FetchError::Transient("HTTP 502".into())),
                Ok(Page::new(records(1..2), false)),
            ],
        ));
        let start = tokio::time::Instant::now();
        fetch_all(
            source,
            RateLimiter::new(Duration::from_millis(2000)),
            FetchOptions::default(),
        )
        .await
        .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(6000));
    }
}
