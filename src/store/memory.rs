//! In-process [`TargetStore`] for tests and `load --dry-run`.
//!
//! Understands the statements [`Schema`](super::Schema) produces: dropping
//! and creating the table and its view, single-row inserts, and the search
//! query. Anything else is rejected. Views read through to their table, so
//! rows are visible to search as soon as they are inserted.
//!
//! Also records write concurrency and can be told to fail writes, which is
//! what the loader tests use it for.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{SqlParam, TargetStore};
use crate::error::StoreError;
use crate::models::IssueRow;

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<IssueRow>>,
    /// view name -> table it selects from
    views: BTreeMap<String, String>,
    /// title -> remaining injected failures
    failing_titles: HashMap<String, u32>,
    failing_prefixes: Vec<String>,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    write_latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    insert_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            write_latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            insert_attempts: AtomicUsize::new(0),
        }
    }

    /// Hold every insert for `latency` so concurrent writes overlap.
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Reject the next `times` inserts of a row with this title.
    pub fn fail_writes_for(&self, title: &str, times: u32) {
        self.lock().failing_titles.insert(title.to_string(), times);
    }

    /// Reject every statement starting with `prefix`.
    pub fn fail_statements_starting_with(&self, prefix: &str) {
        self.lock().failing_prefixes.push(normalize(prefix));
    }

    pub fn tables(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    /// `(view, table)` pairs.
    pub fn views(&self) -> Vec<(String, String)> {
        self.lock()
            .views
            .iter()
            .map(|(v, t)| (v.clone(), t.clone()))
            .collect()
    }

    /// Rows of a table in insertion order.
    pub fn rows(&self, table: &str) -> Vec<IssueRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Highest number of inserts that were running at the same moment.
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Inserts attempted, including rejected ones.
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn insert(&self, table: &str, params: &[SqlParam]) -> Result<u64, StoreError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if !self.write_latency.is_zero() {
            tokio::time::sleep(self.write_latency).await;
        }

        let row = row_from_params(params)?;
        let mut state = self.lock();
        if let Some(remaining) = state.failing_titles.get_mut(&row.title) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Rejected(format!(
                    "injected write failure for '{}'",
                    row.title
                )));
            }
        }
        match state.tables.get_mut(table) {
            Some(rows) => {
                rows.push(row);
                Ok(1)
            }
            None => Err(StoreError::Rejected(format!("unknown table '{}'", table))),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn normalize(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_word(rest: &str) -> &str {
    rest.split([' ', '(']).next().unwrap_or_default()
}

fn text_param(params: &[SqlParam], index: usize) -> Result<Option<String>, StoreError> {
    match params.get(index) {
        Some(SqlParam::Text(value)) => Ok(value.clone()),
        other => Err(StoreError::Rejected(format!(
            "expected text parameter ${}, got {:?}",
            index + 1,
            other
        ))),
    }
}

fn row_from_params(params: &[SqlParam]) -> Result<IssueRow, StoreError> {
    if params.len() != 5 {
        return Err(StoreError::Rejected(format!(
            "insert expects 5 parameters, got {}",
            params.len()
        )));
    }
    let created_at = match &params[3] {
        SqlParam::Timestamp(ts) => *ts,
        other => {
            return Err(StoreError::Rejected(format!(
                "expected timestamp parameter $4, got {:?}",
                other
            )))
        }
    };
    Ok(IssueRow {
        title: text_param(params, 0)?.unwrap_or_default(),
        body: text_param(params, 1)?,
        author: text_param(params, 2)?.unwrap_or_default(),
        created_at,
        url: text_param(params, 4)?,
    })
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn execute(&self, statement: &str, params: &[SqlParam]) -> Result<u64, StoreError> {
        let statement = normalize(statement);
        {
            let state = self.lock();
            if let Some(prefix) = state
                .failing_prefixes
                .iter()
                .find(|p| statement.starts_with(p.as_str()))
            {
                return Err(StoreError::Rejected(format!(
                    "injected failure for statements starting with '{}'",
                    prefix
                )));
            }
        }

        if let Some(rest) = statement.strip_prefix("INSERT INTO ") {
            return self.insert(first_word(rest), params).await;
        }

        let mut state = self.lock();
        if let Some(view) = statement.strip_prefix("DROP MATERIALIZED VIEW IF EXISTS ") {
            state.views.remove(first_word(view));
            return Ok(0);
        }
        if let Some(table) = statement.strip_prefix("DROP TABLE IF EXISTS ") {
            let table = first_word(table);
            if let Some((view, _)) = state.views.iter().find(|(_, t)| t.as_str() == table) {
                return Err(StoreError::Rejected(format!(
                    "cannot drop table '{}': view '{}' depends on it",
                    table, view
                )));
            }
            state.tables.remove(table);
            return Ok(0);
        }
        if let Some(table) = statement.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            state.tables.entry(first_word(table).to_string()).or_default();
            return Ok(0);
        }
        if let Some(rest) = statement.strip_prefix("CREATE MATERIALIZED VIEW IF NOT EXISTS ") {
            let view = first_word(rest);
            let table = rest
                .split_once(" AS SELECT * FROM ")
                .map(|(_, t)| first_word(t))
                .ok_or_else(|| StoreError::Rejected(format!("unsupported view: {}", statement)))?;
            if !state.tables.contains_key(table) {
                return Err(StoreError::Rejected(format!("unknown table '{}'", table)));
            }
            state
                .views
                .entry(view.to_string())
                .or_insert_with(|| table.to_string());
            return Ok(0);
        }

        Err(StoreError::Rejected(format!(
            "unsupported statement: {}",
            statement
        )))
    }

    async fn query(
        &self,
        statement: &str,
        params: &[SqlParam],
    ) -> Result<Vec<IssueRow>, StoreError> {
        let statement = normalize(statement);
        let relation = statement
            .split_once(" FROM ")
            .map(|(_, rest)| first_word(rest))
            .ok_or_else(|| StoreError::Rejected(format!("unsupported query: {}", statement)))?;
        if !statement.contains("WHERE title LIKE $1") {
            return Err(StoreError::Rejected(format!(
                "unsupported query: {}",
                statement
            )));
        }
        let pattern = text_param(params, 0)?.unwrap_or_default();

        let state = self.lock();
        let table = state
            .views
            .get(relation)
            .map(String::as_str)
            .unwrap_or(relation);
        let rows = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::Rejected(format!("unknown relation '{}'", relation)))?;

        let mut hits: Vec<IssueRow> = rows
            .iter()
            .filter(|row| like_matches(&pattern, &row.title))
            .cloned()
            .collect();
        if statement.ends_with("ORDER BY created_at DESC") {
            hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(hits)
    }
}

#[derive(Debug, PartialEq)]
enum LikeToken {
    Literal(char),
    AnyRun,
    AnyOne,
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyOne,
            c => LikeToken::Literal(c),
        });
    }
    tokens
}

/// SQL `LIKE` with `\` as the escape character.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let tokens = like_tokens(pattern);
    let text: Vec<char> = text.chars().collect();

    // matched[j]: the tokens consumed so far match text[..j]
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::AnyRun => {
                let mut reachable = false;
                for j in 0..=text.len() {
                    reachable |= matched[j];
                    next[j] = reachable;
                }
            }
            LikeToken::AnyOne => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            LikeToken::Literal(c) => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}
