//! Title search over the materialized view.
//!
//! The gateway owns no state besides a store handle and the schema names.
//! The query text only ever travels as the single bound parameter of
//! [`Schema::search_statement`].

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::models::IssueRow;
use crate::store::postgres::PgStore;
use crate::store::{like_pattern, Schema, SqlParam, TargetStore};

pub struct SearchGateway {
    store: Arc<dyn TargetStore>,
    schema: Schema,
}

impl SearchGateway {
    pub fn new(store: Arc<dyn TargetStore>, schema: Schema) -> Self {
        Self { store, schema }
    }

    /// Rows whose title contains `text`, newest first.
    pub async fn search(&self, text: &str) -> Result<Vec<IssueRow>, PipelineError> {
        let pattern = like_pattern(text);
        debug!(%pattern, view = %self.schema.view, "searching");
        self.store
            .query(&self.schema.search_statement(), &[SqlParam::Text(Some(pattern))])
            .await
            .map_err(PipelineError::Query)
    }
}

/// `harvest search`: print matching rows as a JSON array.
pub async fn run_search(config: &Config, text: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let gateway = SearchGateway::new(
        Arc::new(PgStore::new(pool.clone())),
        Schema::from_config(&config.load),
    );

    let rows = gateway.search(text).await?;
    println!("{}", serde_json::to_string_pretty(&rows)?);

    pool.close().await;
    Ok(())
}
