//! Server configuration.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use ptree_core::FramerConfig;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 12345;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: SocketAddr,
    /// Framing limits applied to every connection
    pub framer: FramerConfig,
    /// Read attempts that return nothing within this window count as idle
    /// for the framer
    pub read_timeout: Duration,
    /// Longest a single send may take, waiting for the send lock included;
    /// a peer that does not drain its socket within it is disconnected
    pub write_timeout: Duration,
    /// Notifications a session may have queued before it is disconnected
    pub max_outbox_entries: usize,
    /// How long shutdown waits for sessions to finish
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            framer: FramerConfig::default(),
            read_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_secs(10),
            max_outbox_entries: 64 * 1024,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
