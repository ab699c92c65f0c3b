use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::load::{BatchLoader, LoadOptions};
use crate::store::postgres::PgStore;
use crate::store::Schema;

/// `harvest setup`: recreate the target table and its materialized view.
pub async fn run_setup(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let loader = BatchLoader::new(
        Arc::new(PgStore::new(pool.clone())),
        Schema::from_config(&config.load),
        LoadOptions::from_config(&config.load),
    );
    loader.setup().await?;
    pool.close().await;
    Ok(())
}
