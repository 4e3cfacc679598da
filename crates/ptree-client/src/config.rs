//! Client configuration.

use std::time::Duration;

use ptree_core::FramerConfig;
use ptree_proto::FeatureFlags;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Notification interval requested at sign-in, in milliseconds
    pub refresh_rate: u32,
    /// Features requested at sign-in
    pub features: FeatureFlags,
    /// How long a request waits for its response
    pub request_timeout: Duration,
    /// Read window after which a read counts as idle for the framer
    pub read_timeout: Duration,
    /// Framing limits for messages from the server
    pub framer: FramerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            refresh_rate: 100,
            features: FeatureFlags::ENABLE_METAUPDATE,
            request_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(500),
            framer: FramerConfig::default(),
        }
    }
}
