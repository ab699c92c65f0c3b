//! Batched loading of a staging file into the target store.
//!
//! The loader opens the staging file, runs the schema setup once, then reads it line
//! by line and groups mapped rows into batches of `batch_size`. Every row of
//! a batch is written as its own task; a semaphore with `max_in_flight`
//! permits caps how many of those writes run at once. A batch is finished
//! only when all of its writes have completed, and the next batch is not
//! read until then.
//!
//! The semaphore is sized independently of the connection pool;
//! `max_in_flight` must stay below `db.max_connections` (checked at config
//! load).
//!
//! # Failure handling
//!
//! - Blank, malformed and unmappable staged lines are logged, counted and
//!   skipped.
//! - A failed write is retried with exponential backoff up to
//!   `write_retries` times.
//! - A row that still fails lets the rest of its batch drain, then fails
//!   the run with [`PipelineError::Write`] naming the staged lines that were
//!   not written. Earlier batches stay committed.
//! - Setup failures are fatal and never retried.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LoadConfig;
use crate::error::{PipelineError, StoreError};
use crate::models::IssueRow;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::stage::StagedReader;
use crate::store::{Schema, SqlParam, TargetStore};

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub max_in_flight: usize,
    /// Retries per row after the first failed attempt.
    pub write_retries: u32,
    /// Backoff before the first retry; doubles on each further retry.
    pub retry_base: Duration,
}

impl LoadOptions {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_in_flight: config.max_in_flight.max(1),
            write_retries: config.write_retries,
            retry_base: Duration::from_millis(100),
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from_config(&LoadConfig::default())
    }
}

/// Summary of a load run.
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    /// Rows written per batch, in dispatch order.
    pub batches: Vec<usize>,
    pub loaded: usize,
    pub blank: usize,
    pub malformed: usize,
    /// Valid JSON lines missing a title, author or creation time.
    pub unmappable: usize,
    /// Cancelled before every batch was dispatched.
    pub cancelled: bool,
}

impl LoadReport {
    pub fn skipped(&self) -> usize {
        self.malformed + self.unmappable
    }
}

pub struct BatchLoader {
    store: Arc<dyn TargetStore>,
    schema: Schema,
    options: LoadOptions,
    permits: Arc<Semaphore>,
}

impl BatchLoader {
    pub fn new(store: Arc<dyn TargetStore>, schema: Schema, options: LoadOptions) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_in_flight));
        Self {
            store,
            schema,
            options,
            permits,
        }
    }

    /// Drop and recreate the table and its view.
    pub async fn setup(&self) -> Result<(), PipelineError> {
        for statement in self.schema.setup_statements() {
            debug!(%statement, "running setup statement");
            self.store
                .execute(&statement, &[])
                .await
                .map_err(|error| PipelineError::Setup {
                    statement: statement.clone(),
                    error,
                })?;
        }
        info!(table = %self.schema.table, view = %self.schema.view, "target schema ready");
        Ok(())
    }

    /// Set up the schema and load every row of a staging file.
    ///
    /// `cancel` is checked before each batch is dispatched. Once it fires,
    /// no further batch starts; the report comes back with `cancelled` set.
    pub async fn load_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<LoadReport, PipelineError> {
        let mut reader = StagedReader::open(path).await?;
        self.setup().await?;

        let mut report = LoadReport::default();
        let mut batch: Vec<(usize, IssueRow)> = Vec::with_capacity(self.options.batch_size);

        while let Some(line) = reader.next_record().await? {
            match IssueRow::from_record(&line.record) {
                Some(row) => batch.push((line.line_no, row)),
                None => {
                    report.unmappable += 1;
                    warn!(line = line.line_no, "staged record has no title, author or created_at; skipping");
                }
            }

            if batch.len() >= self.options.batch_size {
                let rows = std::mem::take(&mut batch);
                if !self.dispatch(rows, cancel, &mut report, progress).await? {
                    break;
                }
            }
        }
        if !batch.is_empty() && !report.cancelled {
            self.dispatch(batch, cancel, &mut report, progress).await?;
        }

        report.blank = reader.blank();
        report.malformed = reader.malformed();
        info!(
            batches = report.batches.len(),
            loaded = report.loaded,
            skipped = report.skipped(),
            cancelled = report.cancelled,
            "load finished"
        );
        Ok(report)
    }

    /// Write one batch unless cancelled. Returns whether it ran.
    async fn dispatch(
        &self,
        rows: Vec<(usize, IssueRow)>,
        cancel: &CancellationToken,
        report: &mut LoadReport,
        progress: &dyn ProgressReporter,
    ) -> Result<bool, PipelineError> {
        if cancel.is_cancelled() {
            warn!(pending = rows.len(), "load cancelled, no further batches will start");
            report.cancelled = true;
            return Ok(false);
        }

        let number = report.batches.len() + 1;
        let written = self.write_batch(number, rows).await?;
        report.batches.push(written);
        report.loaded += written;
        progress.report(ProgressEvent::Loaded {
            batch: number,
            records: written,
            total: report.loaded,
        });
        Ok(true)
    }

    /// Write every row concurrently and wait for all of them.
    async fn write_batch(
        &self,
        number: usize,
        rows: Vec<(usize, IssueRow)>,
    ) -> Result<usize, PipelineError> {
        let statement: Arc<str> = self.schema.insert_statement().into();
        let size = rows.len();
        let mut tasks = JoinSet::new();
        let mut lines_by_task = HashMap::with_capacity(size);

        for (line_no, row) in rows {
            let store = self.store.clone();
            let permits = self.permits.clone();
            let statement = statement.clone();
            let retries = self.options.write_retries;
            let base = self.options.retry_base;
            let handle = tasks.spawn(async move {
                let params = Schema::insert_params(&row);
                match permits.acquire_owned().await {
                    Ok(_permit) => {
                        write_with_retry(&*store, &statement, &params, retries, base, line_no).await
                    }
                    Err(_) => Err(StoreError::Rejected("write limiter closed".to_string())),
                }
            });
            lines_by_task.insert(handle.id(), line_no);
        }

        let mut written = 0;
        let mut failed_lines = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (
                    e.id(),
                    Err(StoreError::Rejected(format!("write task failed: {}", e))),
                ),
            };
            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    failed_lines.extend(lines_by_task.get(&id).copied());
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(error) = first_error {
            failed_lines.sort_unstable();
            return Err(PipelineError::Write {
                batch: number,
                failed_lines,
                error,
            });
        }

        debug!(batch = number, rows = size, "batch written");
        Ok(written)
    }
}

async fn write_with_retry(
    store: &dyn TargetStore,
    statement: &str,
    params: &[SqlParam],
    retries: u32,
    base: Duration,
    line_no: usize,
) -> Result<(), StoreError> {
    let mut attempt = 0;
    loop {
        match store.execute(statement, params).await {
            Ok(_) => return Ok(()),
            Err(e) if attempt < retries => {
                let backoff = base.saturating_mul(1 << attempt.min(16));
                attempt += 1;
                warn!(
                    line = line_no,
                    attempt,
                    retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "row write failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
