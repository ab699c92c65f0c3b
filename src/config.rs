//! TOML configuration for `harvest`.
//!
//! Every tunable of the pipeline lives here: target-store connection and
//! pool bounds, the upstream rate-limit delay, staging location, batch size
//! and write concurrency. Database credentials and API tokens may also be
//! supplied through the environment, which takes precedence over the file.
//!
//! ```toml
//! [db]
//! host = "materialized"
//! port = 6875
//! user = "materialize"
//! database = "materialize"
//!
//! [fetch]
//! delay_ms = 2000
//!
//! [load]
//! batch_size = 100
//! max_in_flight = 100
//!
//! [sources.github]
//! owner = "MaterializeInc"
//! repo = "materialize"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target-store connection settings and pool bounds.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_db_name")]
    pub database: String,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: None,
            database: default_db_name(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}
fn default_db_port() -> u16 {
    6875
}
fn default_db_user() -> String {
    "materialize".to_string()
}
fn default_db_name() -> String {
    "materialize".to_string()
}
fn default_min_connections() -> u32 {
    100
}
fn default_max_connections() -> u32 {
    200
}
fn default_acquire_timeout_secs() -> u64 {
    30
}

/// Upstream fetch pacing and retry bounds.
#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Delay before every upstream request, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Attempts per page before a transient failure aborts the run.
    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            page_size: default_page_size(),
            max_attempts: default_fetch_attempts(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl FetchConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

fn default_delay_ms() -> u64 {
    2000
}
fn default_page_size() -> u32 {
    100
}
fn default_fetch_attempts() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

impl StagingConfig {
    /// Staging file for records of the named source (`<dir>/<source>.data`).
    pub fn records_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.data", source))
    }

    /// Staging file for comments attached to records of the named source.
    pub fn comments_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}-comments.data", source))
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Batch loader settings.
#[derive(Debug, Deserialize, Clone)]
pub struct LoadConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent writes allowed within one batch. Kept independent of the
    /// pool size; must stay below `db.max_connections`.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_view")]
    pub view: String,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_in_flight: default_max_in_flight(),
            write_retries: default_write_retries(),
            table: default_table(),
            view: default_view(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_max_in_flight() -> usize {
    100
}
fn default_write_retries() -> u32 {
    3
}
fn default_table() -> String {
    "github_issues".to_string()
}
fn default_view() -> String {
    "information".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4000".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub github: Option<GithubSourceConfig>,
    pub slack: Option<SlackSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubSourceConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_github_api")]
    pub api_base: String,
    /// Fetch and stage comments for issues that have any.
    #[serde(default = "default_true")]
    pub comments: bool,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackSourceConfig {
    pub channel: String,
    #[serde(default = "default_slack_api")]
    pub api_base: String,
}

fn default_slack_api() -> String {
    "https://slack.com/api".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

impl Config {
    /// Overlay database settings from `HARVEST_DB_*` variables.
    ///
    /// Takes the lookup as a closure so tests do not have to mutate the
    /// process environment.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("HARVEST_DB_HOST") {
            self.db.host = host;
        }
        if let Some(port) = var("HARVEST_DB_PORT") {
            self.db.port = port
                .parse()
                .with_context(|| format!("HARVEST_DB_PORT is not a valid port: '{}'", port))?;
        }
        if let Some(user) = var("HARVEST_DB_USER") {
            self.db.user = user;
        }
        if let Some(password) = var("HARVEST_DB_PASSWORD") {
            self.db.password = Some(password);
        }
        if let Some(name) = var("HARVEST_DB_NAME") {
            self.db.database = name;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.load.batch_size == 0 {
            bail!("load.batch_size must be > 0");
        }
        if self.load.max_in_flight == 0 {
            bail!("load.max_in_flight must be > 0");
        }
        if self.db.min_connections > self.db.max_connections {
            bail!("db.min_connections must be <= db.max_connections");
        }
        // Writes awaiting a connection while every connection is held by
        // another pending write would never make progress.
        if self.db.max_connections as usize <= self.load.max_in_flight {
            bail!(
                "db.max_connections ({}) must exceed load.max_in_flight ({})",
                self.db.max_connections,
                self.load.max_in_flight
            );
        }
        if !(1..=1000).contains(&self.fetch.page_size) {
            bail!("fetch.page_size must be in 1..=1000");
        }
        if self.fetch.max_attempts == 0 {
            bail!("fetch.max_attempts must be >= 1");
        }
        check_identifier("load.table", &self.load.table)?;
        check_identifier("load.view", &self.load.view)?;

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => bail!("Unknown logging.format: '{}'. Must be text or json.", other),
        }
        Ok(())
    }
}

/// Table and view names are spliced into statements, so only plain SQL
/// identifiers are accepted.
fn check_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        bail!("{} must be a plain identifier, got '{}'", field, value);
    }
    Ok(())
}
