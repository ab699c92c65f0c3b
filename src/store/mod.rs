//! Target-store abstraction.
//!
//! The loader and the search gateway only need two capabilities from the
//! analytical database: run a statement, and run a query that returns issue
//! rows. [`TargetStore`] exposes exactly that, so the same statements run
//! against the real database ([`postgres::PgStore`]) and against the
//! in-process [`memory::MemoryStore`] used by tests and `load --dry-run`.
//!
//! All statement text is built by [`Schema`] from validated identifiers;
//! user-supplied values only ever travel as [`SqlParam`]s.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::IssueRow;

/// A bound statement parameter (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(Option<String>),
    Timestamp(DateTime<Utc>),
}

/// Statement execution against the target database.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Run a statement, returning the number of affected rows.
    async fn execute(&self, statement: &str, params: &[SqlParam]) -> Result<u64, StoreError>;

    /// Run a query whose result columns are those of [`IssueRow`].
    async fn query(&self, statement: &str, params: &[SqlParam])
        -> Result<Vec<IssueRow>, StoreError>;
}

/// Names of the target table and the view search reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub table: String,
    pub view: String,
}

impl Schema {
    pub fn new(table: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            view: view.into(),
        }
    }

    pub fn from_config(config: &crate::config::LoadConfig) -> Self {
        Self::new(&config.table, &config.view)
    }

    /// Setup statements, in execution order.
    ///
    /// Running them twice leaves the same schema as running them once. The
    /// table is recreated empty each time, so every load starts clean.
    pub fn setup_statements(&self) -> Vec<String> {
        vec![
            format!("DROP MATERIALIZED VIEW IF EXISTS {}", self.view),
            format!("DROP TABLE IF EXISTS {}", self.table),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (title TEXT, body TEXT, author TEXT, created_at TIMESTAMPTZ, url TEXT)",
                self.table
            ),
            format!(
                "CREATE MATERIALIZED VIEW IF NOT EXISTS {} AS SELECT * FROM {}",
                self.view, self.table
            ),
        ]
    }

    pub fn insert_statement(&self) -> String {
        format!(
            "INSERT INTO {} (title, body, author, created_at, url) VALUES ($1, $2, $3, $4, $5)",
            self.table
        )
    }

    pub fn insert_params(row: &IssueRow) -> Vec<SqlParam> {
        vec![
            SqlParam::Text(Some(row.title.clone())),
            SqlParam::Text(row.body.clone()),
            SqlParam::Text(Some(row.author.clone())),
            SqlParam::Timestamp(row.created_at),
            SqlParam::Text(row.url.clone()),
        ]
    }

    pub fn search_statement(&self) -> String {
        format!(
            "SELECT title, body, author, created_at, url FROM {} WHERE title LIKE $1::text ORDER BY created_at DESC",
            self.view
        )
    }
}

/// Build a `LIKE` pattern matching `text` anywhere in the column.
///
/// `\`, `%` and `_` in the text are escaped so they match literally.
pub fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
