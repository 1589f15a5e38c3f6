//! querybus agent library.
//!
//! Runs a host's side of the querybus protocol: it connects to (or waits for)
//! a master, serves query subscriptions against a JSON table document and
//! reports row changes until shut down.

pub mod config;
pub mod driver;
pub mod error;
pub mod tables;

pub use config::{AgentConfig, Args};
pub use driver::Driver;
pub use error::Error;
pub use tables::FileTableSource;
