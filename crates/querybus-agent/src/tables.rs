//! Table source backed by a JSON document.
//!
//! The document maps table names to arrays of records:
//!
//! ```json
//! { "processes": [ { "pid": 1, "name": "init" }, { "pid": 42, "name": "sshd" } ] }
//! ```
//!
//! The file is read again on every query so edits show up on the next
//! tracking pass.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use querybus_core::source::project;
use querybus_core::{QuerySource, Row, SourceError, Table};
use querybus_lang::SelectQuery;

use crate::error::Error;

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct TableDocument(BTreeMap<String, Vec<BTreeMap<String, Value>>>);

/// Reads tables from a JSON file on every query.
#[derive(Debug, Clone)]
pub struct FileTableSource {
    path: PathBuf,
}

impl FileTableSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and convert every table in the document.
    pub fn load(&self) -> Result<HashMap<String, Table>, Error> {
        let text = std::fs::read_to_string(&self.path)?;
        let document: TableDocument = serde_json::from_str(&text)?;

        Ok(document
            .0
            .into_iter()
            .map(|(name, records)| (name, build_table(records)))
            .collect())
    }
}

fn build_table(records: Vec<BTreeMap<String, Value>>) -> Table {
    let columns: BTreeSet<&String> = records.iter().flat_map(|r| r.keys()).collect();
    let columns: Vec<String> = columns.into_iter().cloned().collect();

    let mut table = Table::new(columns.iter().cloned());
    for record in &records {
        let row: Row = columns
            .iter()
            .map(|c| record.get(c).map(value_text).unwrap_or_default())
            .collect();
        table.push_row(row);
    }
    table
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl QuerySource for FileTableSource {
    fn execute(&self, query: &SelectQuery) -> Result<Vec<Row>, SourceError> {
        let tables = self.load().map_err(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "cannot read tables");
            SourceError::Unavailable(e.to_string())
        })?;
        let table = tables
            .get(&query.table)
            .ok_or_else(|| SourceError::UnknownTable(query.table.clone()))?;
        project(table, query)
    }
}
