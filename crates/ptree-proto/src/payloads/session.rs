//! Session setup payloads.

use crate::{codec::wire_record, flags::FeatureFlags};

wire_record! {
    /// First message on every connection.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SigninRequest {
        /// Protocol version the client speaks
        pub version: u32,
        /// Requested notification refresh interval in milliseconds
        pub refresh_rate: u32,
        /// Optional behaviours
        pub features: FeatureFlags,
    }
}

wire_record! {
    /// Version accepted by the server, 0 if the requested one is unsupported.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SigninResponse {
        /// Accepted version
        pub version: u32,
    }
}
