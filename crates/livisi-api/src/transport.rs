// Shared transport configuration for building reqwest::Client instances.
//
// The SHC speaks plain HTTP on the local network, so there is no TLS
// surface here -- just timeouts and the service port, which tests
// override to point at a mock server.

use std::time::Duration;

/// Default REST service port on the hub.
pub const WEBSERVICE_PORT: u16 = 8080;

/// Websocket port on first-generation ("Classic") hubs.
pub const CLASSIC_WEBSOCKET_PORT: u16 = 8080;

/// Websocket port on second-generation ("Avatar") hubs.
pub const AVATAR_WEBSOCKET_PORT: u16 = 9090;

/// Transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout. The hub usually answers within a second;
    /// anything beyond this is treated as unreachable.
    pub timeout: Duration,
    /// REST service port.
    pub port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            port: WEBSERVICE_PORT,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent("livisi-rs/0.1.0")
            .build()
            .map_err(|e| {
                crate::error::Error::Internal(format!("failed to build HTTP client: {e}"))
            })
    }
}
