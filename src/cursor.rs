//! Position tracking within a paginated upstream collection.
//!
//! A [`PaginationCursor`] holds the token sent on the next request and moves
//! it forward from the last record of each page. It only ever moves in one
//! direction: an advance that would revisit or stay on a position already
//! requested is reported as [`Advance::Stalled`] and the position is left
//! alone, so a misbehaving upstream cannot make a run loop forever.

use std::cmp::Ordering;

use crate::models::Record;

/// The token sent upstream to select the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// 1-based page number (`?page=N`).
    Page(u32),
    /// Only records strictly older than this timestamp (`latest=`).
    /// `None` asks for the newest page.
    Before(Option<String>),
    /// Only records strictly newer than this timestamp (`oldest=`).
    After(Option<String>),
}

/// Result of [`PaginationCursor::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Moved(Position),
    /// The candidate position does not move past the current one.
    Stalled,
    /// The upstream reported no continuation.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct PaginationCursor {
    position: Position,
    /// Record field holding the timestamp for `Before`/`After` cursors.
    timestamp_field: String,
    exhausted: bool,
}

impl PaginationCursor {
    /// Page-numbered cursor starting at `first_page`.
    pub fn pages(first_page: u32) -> Self {
        Self {
            position: Position::Page(first_page),
            timestamp_field: String::new(),
            exhausted: false,
        }
    }

    /// Timestamp cursor walking backwards through history, newest page first.
    pub fn before(timestamp_field: &str) -> Self {
        Self {
            position: Position::Before(None),
            timestamp_field: timestamp_field.to_string(),
            exhausted: false,
        }
    }

    /// Timestamp cursor walking forwards from `since` (or the beginning).
    pub fn after(timestamp_field: &str, since: Option<String>) -> Self {
        Self {
            position: Position::After(since),
            timestamp_field: timestamp_field.to_string(),
            exhausted: false,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Move past the page that just arrived.
    ///
    /// `last` is the final record of that page in upstream order; it may be
    /// `None` when the page was empty.
    pub fn advance(&mut self, last: Option<&Record>, has_more: bool) -> Advance {
        if !has_more {
            self.exhausted = true;
            return Advance::Exhausted;
        }
        if self.exhausted {
            return Advance::Exhausted;
        }

        let next = match &self.position {
            Position::Page(n) => match n.checked_add(1) {
                Some(next) => Position::Page(next),
                None => return Advance::Stalled,
            },
            Position::Before(current) => {
                let Some(ts) = last.and_then(|r| self.timestamp_of(r)) else {
                    return Advance::Stalled;
                };
                if let Some(current) = current {
                    if compare_timestamps(&ts, current) != Ordering::Less {
                        return Advance::Stalled;
                    }
                }
                Position::Before(Some(ts))
            }
            Position::After(current) => {
                let Some(ts) = last.and_then(|r| self.timestamp_of(r)) else {
                    return Advance::Stalled;
                };
                if let Some(current) = current {
                    if compare_timestamps(&ts, current) != Ordering::Greater {
                        return Advance::Stalled;
                    }
                }
                Position::After(Some(ts))
            }
        };

        self.position = next.clone();
        Advance::Moved(next)
    }

    fn timestamp_of(&self, record: &Record) -> Option<String> {
        match record.get(&self.timestamp_field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Compare `seconds.fraction` timestamps numerically.
///
/// Slack-style `"1512085950.000216"` values do not fit an `f64` without
/// losing the fraction, so the integer and fractional parts are compared
/// separately. Anything unparseable falls back to string order.
pub fn compare_timestamps(a: &str, b: &str) -> Ordering {
    match (split_timestamp(a), split_timestamp(b)) {
        (Some((sa, fa)), Some((sb, fb))) => sa.cmp(&sb).then_with(|| {
            let width = fa.len().max(fb.len());
            format!("{:0<width$}", fa).cmp(&format!("{:0<width$}", fb))
        }),
        _ => a.cmp(b),
    }
}

fn split_timestamp(ts: &str) -> Option<(u64, &str)> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((secs.parse().ok()?, frac))
}
