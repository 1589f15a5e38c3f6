//! Agent error types.

use thiserror::Error;

/// Agent errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection manager error.
    #[error("connection error: {0}")]
    Core(#[from] querybus_core::Error),

    /// The endpoint stopped reporting link status.
    #[error("endpoint closed")]
    EndpointClosed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Table document could not be parsed.
    #[error("invalid table document: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
