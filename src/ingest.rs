//! Fetch and load command orchestration.
//!
//! `harvest fetch` and `harvest load` are separate runs joined by the
//! staging files on disk. Do not run a load against a staging file that a
//! fetch is still appending to.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::fetch::{fetch_and_stage, FetchOptions};
use crate::load::{BatchLoader, LoadOptions, LoadReport};
use crate::progress::ProgressReporter;
use crate::rate_limit::RateLimiter;
use crate::stage::DurableStager;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PgStore;
use crate::store::{Schema, TargetStore};
use crate::traits::SourceRegistry;

/// `harvest fetch <source>`: page through a source into its staging files.
pub async fn run_fetch(
    config: &Config,
    source: &str,
    limit: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let registry = SourceRegistry::from_config(config)?;
    let source = registry.resolve(source)?;
    let name = source.name().to_string();

    let records_path = config.staging.records_path(&name);
    let stager = DurableStager::open(&records_path)
        .await
        .with_context(|| format!("Failed to open staging file {}", records_path.display()))?;
    let comments_path = config.staging.comments_path(&name);
    let related = if source.has_related_records() {
        let stager = DurableStager::open(&comments_path)
            .await
            .with_context(|| format!("Failed to open staging file {}", comments_path.display()))?;
        Some(stager)
    } else {
        None
    };

    let mut options = FetchOptions::from_config(&config.fetch);
    options.limit = limit;
    let limiter = RateLimiter::new(config.fetch.delay());

    info!(source = %name, path = %records_path.display(), delay_ms = config.fetch.delay_ms, "fetch started");
    let report = fetch_and_stage(source, limiter, options, &stager, related.as_ref(), progress).await?;
    stager.sync().await?;
    if let Some(related) = &related {
        related.sync().await?;
    }

    println!("fetch {}", name);
    println!("  pages: {}", report.pages);
    println!("  fetched: {} records", report.fetched);
    println!("  staged: {} -> {}", report.staged.written, records_path.display());
    if report.staged.skipped > 0 {
        println!("  skipped (unserializable): {}", report.staged.skipped);
    }
    if report.related.written > 0 || report.related_failures > 0 {
        println!("  comments staged: {} -> {}", report.related.written, comments_path.display());
        println!("  comment fetches failed: {}", report.related_failures);
    }
    match &report.aborted {
        Some(reason) => {
            warn!(source = %name, %reason, "fetch ended early");
            println!("  stopped early: {}", reason);
        }
        None => println!("ok"),
    }
    Ok(())
}

/// `harvest load`: set up the target schema and load a staging file.
///
/// Without `--input`, loads the GitHub issues staging file. With
/// `dry_run`, rows go to an in-process store instead of the database.
pub async fn run_load(
    config: &Config,
    input: Option<PathBuf>,
    dry_run: bool,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let input = input.unwrap_or_else(|| config.staging.records_path("github"));
    if !input.exists() {
        anyhow::bail!("Staging file not found: {}", input.display());
    }

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let result = if dry_run {
        let store = Arc::new(MemoryStore::new());
        load_into(config, store, &input, &cancel, progress).await
    } else {
        let pool = db::connect(config).await?;
        let store = Arc::new(PgStore::new(pool.clone()));
        let result = load_into(config, store, &input, &cancel, progress).await;
        pool.close().await;
        result
    };
    watcher.abort();
    let report = result?;

    if dry_run {
        println!("load {} (dry-run)", input.display());
    } else {
        println!("load {}", input.display());
    }
    println!("  batches: {}", report.batches.len());
    println!("  loaded: {} rows", report.loaded);
    println!("  skipped: {} malformed, {} unmappable", report.malformed, report.unmappable);
    if report.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
    Ok(())
}

async fn load_into(
    config: &Config,
    store: Arc<dyn TargetStore>,
    input: &Path,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<LoadReport> {
    let loader = BatchLoader::new(
        store,
        Schema::from_config(&config.load),
        LoadOptions::from_config(&config.load),
    );
    Ok(loader.load_file(input, cancel, progress).await?)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, finishing the current batch");
        cancel.cancel();
    }
}
