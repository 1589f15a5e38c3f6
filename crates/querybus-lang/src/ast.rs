//! Parsed form of a subscription query.

/// A parsed `SELECT` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    /// Selected columns.
    pub projection: Projection,
    /// Source table.
    pub table: String,
    /// Equality filters joined by `AND`.
    pub filters: Vec<Filter>,
}

/// The column list of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// `SELECT *`
    Wildcard,
    /// An explicit column list.
    Columns(Vec<Column>),
}

/// A selected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name in the source table.
    pub name: String,
    /// Optional output alias.
    pub alias: Option<String>,
}

/// An equality filter `column = value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Column {
    /// Create a column without an alias.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    /// Set the output alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name reported in result rows.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl Filter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl SelectQuery {
    /// Check if the query selects `*`.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.projection, Projection::Wildcard)
    }

    /// Explicit columns, or `None` for a wildcard.
    pub fn columns(&self) -> Option<&[Column]> {
        match &self.projection {
            Projection::Wildcard => None,
            Projection::Columns(columns) => Some(columns),
        }
    }

    /// Output column names, or `None` for a wildcard.
    pub fn column_names(&self) -> Option<Vec<String>> {
        self.columns().map(|columns| {
            columns
                .iter()
                .map(|c| c.output_name().to_string())
                .collect()
        })
    }
}
