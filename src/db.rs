use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::Config;

/// Open the connection pool to the target database.
///
/// The pool is created once per command and passed explicitly to whatever
/// needs it.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let db = &config.db;
    let mut options = PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .username(&db.user)
        .database(&db.database);
    if let Some(password) = &db.password {
        options = options.password(password);
    }

    let pool = PgPoolOptions::new()
        .min_connections(db.min_connections)
        .max_connections(db.max_connections)
        .acquire_timeout(Duration::from_secs(db.acquire_timeout_secs))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to {}:{}/{}", db.host, db.port, db.database))?;

    info!(
        host = %db.host,
        port = db.port,
        database = %db.database,
        max_connections = db.max_connections,
        "connected to target database"
    );
    Ok(pool)
}
