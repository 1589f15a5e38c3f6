//! querybus core - broker connection lifecycle and query tracking.
//!
//! A host agent keeps one peer link to a master on a pub/sub bus. The
//! [`ConnectionManager`] brings that link up, negotiates a session topic,
//! reads query subscriptions from it and reports row changes back.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use querybus_core::{ConnectionConfig, ConnectionManager, MemoryTableSource, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), querybus_core::Error> {
//!     let config = ConnectionConfig::new("sensor1", "bus");
//!     let source = Arc::new(MemoryTableSource::new());
//!     let mut manager = ConnectionManager::open(config, source)?;
//!
//!     if manager.listen_for_broker_connection().await? {
//!         manager.get_and_set_topic()?;
//!         manager.get_and_process_query()?;
//!         manager.track_response_changes(&ShutdownSignal::new())?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod manager;
pub mod memory;
pub mod query;
pub mod queue;
pub mod source;
pub mod status;
pub mod topic;
pub mod transport;

pub use cancel::{Cancellation, NeverCancel, ShutdownSignal};
pub use config::ConnectionConfig;
pub use endpoint::{Delivery, Direction, Endpoint, PeerHandle};
pub use error::{Error, QueryError, SourceError};
pub use manager::ConnectionManager;
pub use memory::{MemoryEndpoint, MemoryRemote};
pub use query::{QueryManager, ResultVector, TrackedQuery};
pub use queue::{MessageQueue, ReadinessDescriptor};
pub use source::{project, MemoryTableSource, QuerySource, Row, Table};
pub use status::{StatusEvent, StatusFeed, StatusTag};
pub use transport::NngEndpoint;

/// Re-export protocol types.
pub use querybus_proto as proto;
