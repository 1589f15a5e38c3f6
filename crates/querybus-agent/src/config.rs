//! Agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use querybus_core::config::{DEFAULT_LISTEN_ADDRESS, DEFAULT_PORT};
use querybus_core::ConnectionConfig;

use crate::error::Error;

/// Default base topic path.
pub const DEFAULT_BASE_PATH: &str = "querybus";

/// Default table document.
pub const DEFAULT_TABLES_PATH: &str = "./tables.json";

/// Default pause between tracking passes, in milliseconds.
pub const DEFAULT_TRACKING_INTERVAL_MS: u64 = 1000;

/// Default pause between queue and status polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default pause between connect attempts, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Connection manager settings.
    pub connection: ConnectionConfig,

    /// Master to dial. `None` means wait for the master to connect.
    pub master: Option<String>,

    /// JSON document holding the tables queries run against.
    pub tables_path: PathBuf,

    /// Pause between tracking passes.
    pub tracking_interval: Duration,

    /// Pause between queue and status polls while waiting.
    pub poll_interval: Duration,
}

impl AgentConfig {
    /// Create a listening configuration for the given host and base topic.
    pub fn new(host_name: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(host_name, base_path),
            master: None,
            tables_path: PathBuf::from(DEFAULT_TABLES_PATH),
            tracking_interval: Duration::from_millis(DEFAULT_TRACKING_INTERVAL_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Dial `address` instead of listening.
    pub fn with_master(mut self, address: impl Into<String>) -> Self {
        self.master = Some(address.into());
        self
    }

    pub fn with_tables_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tables_path = path.into();
        self
    }

    pub fn with_tracking_interval(mut self, interval: Duration) -> Self {
        self.tracking_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether the agent dials its master.
    pub fn is_connect_mode(&self) -> bool {
        self.master.is_some()
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.connection.host_name.trim().is_empty() {
            return Err(Error::Config("host name must not be empty".to_string()));
        }
        if self.tracking_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::Config("intervals must be positive".to_string()));
        }
        Ok(())
    }
}

/// Command-line arguments for the agent.
#[derive(Parser, Debug)]
#[command(name = "querybus-agent")]
#[command(version, about = "querybus host agent", long_about = None)]
pub struct Args {
    /// Host name, used as the bus identity and in the host topic.
    #[arg(long)]
    pub host: String,

    /// Base topic path.
    #[arg(long, default_value = DEFAULT_BASE_PATH)]
    pub base_path: String,

    /// Port for both listening and dialing.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to listen on.
    #[arg(long, default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen_address: String,

    /// Master address to dial. Without it the agent listens.
    #[arg(short, long)]
    pub master: Option<String>,

    /// Pause between connect attempts in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL_MS)]
    pub retry_ms: u64,

    /// JSON table document.
    #[arg(short, long, default_value = DEFAULT_TABLES_PATH)]
    pub tables: PathBuf,

    /// Pause between tracking passes in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TRACKING_INTERVAL_MS)]
    pub tracking_ms: u64,

    /// Pause between polls in milliseconds.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_ms: u64,
}

impl Args {
    /// Convert command-line arguments to agent configuration.
    pub fn into_config(self) -> AgentConfig {
        let connection = ConnectionConfig::new(self.host, self.base_path)
            .with_port(self.port)
            .with_listen_address(self.listen_address)
            .with_retry_interval(Duration::from_millis(self.retry_ms));

        AgentConfig {
            connection,
            master: self.master,
            tables_path: self.tables,
            tracking_interval: Duration::from_millis(self.tracking_ms),
            poll_interval: Duration::from_millis(self.poll_ms),
        }
    }
}
