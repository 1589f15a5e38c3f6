//! Materialized query results and change detection.

use std::collections::BTreeSet;

use querybus_lang::{EventMode, SelectQuery};
use querybus_proto::ChangeKind;

use crate::source::Row;

/// A registered query with its last observed rows.
#[derive(Debug, Clone)]
pub struct TrackedQuery {
    /// Query text exactly as subscribed.
    pub text: String,
    /// Parsed query.
    pub select: SelectQuery,
    /// Output column names.
    pub columns: Vec<String>,
    /// Which changes are reported.
    pub mode: EventMode,
    rows: BTreeSet<Row>,
}

/// A row change detected between two executions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub row: Row,
}

impl TrackedQuery {
    pub fn new(
        text: impl Into<String>,
        select: SelectQuery,
        columns: Vec<String>,
        mode: EventMode,
        rows: Vec<Row>,
    ) -> Self {
        Self {
            text: text.into(),
            select,
            columns,
            mode,
            rows: rows.into_iter().collect(),
        }
    }

    /// Rows from the last execution, ordered.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Replace the stored rows and return the changes this query reports.
    ///
    /// Removals come first so a replaced row reads as remove-then-add.
    pub fn apply(&mut self, rows: Vec<Row>) -> Vec<RowChange> {
        let next: BTreeSet<Row> = rows.into_iter().collect();
        let mut changes = Vec::new();

        if self.mode.reports_removed() {
            changes.extend(self.rows.difference(&next).map(|row| RowChange {
                kind: ChangeKind::Removed,
                row: row.clone(),
            }));
        }
        if self.mode.reports_added() {
            changes.extend(next.difference(&self.rows).map(|row| RowChange {
                kind: ChangeKind::Added,
                row: row.clone(),
            }));
        }

        self.rows = next;
        changes
    }
}

/// The set of queries a session is tracking.
#[derive(Debug, Default)]
pub struct ResultVector {
    queries: Vec<TrackedQuery>,
}

impl ResultVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a query, replacing any earlier registration of the same text.
    pub fn insert(&mut self, query: TrackedQuery) {
        self.remove(&query.text);
        self.queries.push(query);
    }

    /// Stop tracking a query. Returns true if it was tracked.
    pub fn remove(&mut self, text: &str) -> bool {
        let before = self.queries.len();
        self.queries.retain(|q| q.text != text);
        self.queries.len() != before
    }

    pub fn get(&self, text: &str) -> Option<&TrackedQuery> {
        self.queries.iter().find(|q| q.text == text)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedQuery> {
        self.queries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedQuery> {
        self.queries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
