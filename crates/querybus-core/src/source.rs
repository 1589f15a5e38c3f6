//! Query execution seam.
//!
//! A [`QuerySource`] runs parsed subscription queries against whatever the
//! host exposes. [`MemoryTableSource`] keeps named tables in memory and is
//! what the test suites drive; [`project`] holds the row selection logic so
//! other sources can share it.

use std::collections::HashMap;

use parking_lot::RwLock;

use querybus_lang::{Projection, SelectQuery};

use crate::error::SourceError;

/// One result row, values aligned with the query's output columns.
pub type Row = Vec<String>;

/// Executes parsed queries.
pub trait QuerySource: Send + Sync {
    /// Run `query` and return its current rows.
    fn execute(&self, query: &SelectQuery) -> Result<Vec<Row>, SourceError>;
}

/// A named table with a fixed column layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row, builder style.
    pub fn with_row<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_row(values);
        self
    }

    /// Add a row. Missing trailing values are filled with empty strings.
    pub fn push_row<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row: Row = values.into_iter().map(Into::into).collect();
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    /// Keep only rows matching `keep`.
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[String]) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    fn column_index(&self, table: &str, column: &str) -> Result<usize, SourceError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| SourceError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }
}

/// Select the rows of `table` that `query` asks for.
pub fn project(table: &Table, query: &SelectQuery) -> Result<Vec<Row>, SourceError> {
    let filters = query
        .filters
        .iter()
        .map(|f| Ok((table.column_index(&query.table, &f.column)?, f.value.as_str())))
        .collect::<Result<Vec<_>, SourceError>>()?;

    let indices = match &query.projection {
        Projection::Wildcard => (0..table.columns.len()).collect::<Vec<_>>(),
        Projection::Columns(columns) => columns
            .iter()
            .map(|c| table.column_index(&query.table, &c.name))
            .collect::<Result<Vec<_>, SourceError>>()?,
    };

    Ok(table
        .rows
        .iter()
        .filter(|row| filters.iter().all(|(i, value)| row[*i] == *value))
        .map(|row| indices.iter().map(|i| row[*i].clone()).collect())
        .collect())
}

/// In-memory table source.
#[derive(Debug, Default)]
pub struct MemoryTableSource {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, builder style.
    pub fn with_table(self, name: impl Into<String>, table: Table) -> Self {
        self.set_table(name, table);
        self
    }

    /// Insert or replace a table.
    pub fn set_table(&self, name: impl Into<String>, table: Table) {
        self.tables.write().insert(name.into(), table);
    }

    /// Remove a table.
    pub fn remove_table(&self, name: &str) -> Option<Table> {
        self.tables.write().remove(name)
    }

    /// Mutate a table in place. Returns false if it does not exist.
    pub fn update_table<F>(&self, name: &str, update: F) -> bool
    where
        F: FnOnce(&mut Table),
    {
        match self.tables.write().get_mut(name) {
            Some(table) => {
                update(table);
                true
            }
            None => false,
        }
    }
}

impl QuerySource for MemoryTableSource {
    fn execute(&self, query: &SelectQuery) -> Result<Vec<Row>, SourceError> {
        let tables = self.tables.read();
        let table = tables
            .get(&query.table)
            .ok_or_else(|| SourceError::UnknownTable(query.table.clone()))?;
        project(table, query)
    }
}
