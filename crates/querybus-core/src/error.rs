//! Core error types.

use thiserror::Error;

/// Connection manager and transport errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] querybus_proto::Error),

    /// The first queued message did not carry a usable topic.
    #[error("topic negotiation failed: no topic assigned")]
    TopicNegotiation,

    /// No usable query text; the peer link has been torn down.
    #[error("query session lost: {0}")]
    SessionLost(QueryError),

    /// Column or event directives were rejected; the link is intact.
    #[error("subscription rejected: {0}")]
    Directive(QueryError),

    /// Initial result set could not be built.
    #[error("result materialization failed: {0}")]
    Materialize(QueryError),

    /// A readiness descriptor outlived its queue binding.
    #[error("readiness descriptor is stale")]
    StaleDescriptor,

    /// Operation requires an active peer link.
    #[error("not connected to a peer")]
    NotConnected,
}

impl Error {
    /// Whether the caller must go back to the connect/listen stage.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::SessionLost(_) | Error::NotConnected)
    }
}

/// Failures while reading, parsing or materializing subscription queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// No subscription was queued.
    #[error("no query registered")]
    NoQueries,

    /// Session is not connected.
    #[error("not connected")]
    Disconnected,

    /// A queued payload could not be decoded.
    #[error("malformed subscription payload: {0}")]
    MalformedPayload(String),

    /// A subscription carried blank query text.
    #[error("empty query text")]
    EmptyQuery,

    /// Query text did not parse.
    #[error("invalid query '{query}': {reason}")]
    Syntax { query: String, reason: String },

    /// Query selects `*` instead of naming its columns.
    #[error("* is unexpected, write columns instead")]
    Wildcard { query: String },

    /// Event directive was not understood.
    #[error("{reason}")]
    Directive { query: String, reason: String },

    /// The query source rejected the query.
    #[error("query '{query}' failed: {error}")]
    Source {
        query: String,
        #[source]
        error: SourceError,
    },
}

/// Errors raised by a query source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Table does not exist.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// Column does not exist in the table.
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Backing data could not be read.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}
