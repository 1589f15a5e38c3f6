//! Connection configuration.

use std::time::Duration;

use crate::topic::host_topic;

/// Default port for both listening and connecting.
pub const DEFAULT_PORT: u16 = 9999;

/// Default address to listen on.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

/// Default pause between polls while connecting to a master.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Local host name, also the bus identity.
    pub host_name: String,

    /// Base topic path the host topic is derived from.
    pub base_path: String,

    /// Port used for both listen and outbound connect.
    pub port: u16,

    /// Address to listen on.
    pub listen_address: String,

    /// Pause between outgoing status polls while connecting.
    pub retry_interval: Duration,
}

impl ConnectionConfig {
    /// Create a configuration for the given host and base topic path.
    pub fn new(host_name: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            base_path: base_path.into(),
            port: DEFAULT_PORT,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the listen address.
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    /// Set the connect retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Initial subscription topic for this host.
    pub fn base_topic(&self) -> String {
        host_topic(&self.base_path, &self.host_name)
    }
}
