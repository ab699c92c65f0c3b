//! [`TargetStore`] over a postgres-wire connection pool.
//!
//! The analytical target speaks the postgres protocol, so the pool is a
//! plain [`PgPool`]. Every statement goes through `sqlx::query` with its
//! parameters bound in order.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

use super::{SqlParam, TargetStore};
use crate::error::StoreError;
use crate::models::IssueRow;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value.as_deref()),
            SqlParam::Timestamp(value) => query.bind(*value),
        };
    }
    query
}

fn row_to_issue(row: &PgRow) -> Result<IssueRow, sqlx::Error> {
    Ok(IssueRow {
        title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
        body: row.try_get("body")?,
        author: row.try_get::<Option<String>, _>("author")?.unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        url: row.try_get("url")?,
    })
}

#[async_trait]
impl TargetStore for PgStore {
    async fn execute(&self, statement: &str, params: &[SqlParam]) -> Result<u64, StoreError> {
        let result = bind_all(sqlx::query(statement), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query(
        &self,
        statement: &str,
        params: &[SqlParam],
    ) -> Result<Vec<IssueRow>, StoreError> {
        let rows = bind_all(sqlx::query(statement), params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(row_to_issue)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}
