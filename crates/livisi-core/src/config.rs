// ── Runtime connection configuration ──
//
// Describes *how* to connect to a Smart Home Controller. Carries the
// credential and connection tuning, never touches disk -- the embedding
// application constructs a `HubConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;

/// Configuration for connecting to a single Smart Home Controller.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub address (IP or hostname, no scheme or port).
    pub host: String,
    /// Local hub password (the hub always authenticates as user `admin`).
    pub password: SecretString,
    /// REST service port. Every known hub uses the default; tests point
    /// this at a mock server.
    pub service_port: u16,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// How often to rebuild the full device catalog.
    pub poll_interval: Duration,
    /// Whether to maintain the push channel. When off, state only
    /// changes at poll boundaries.
    pub websocket_enabled: bool,
}

impl HubConfig {
    /// Config for a hub at the given address with the given password,
    /// default tuning.
    pub fn new(host: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            password,
            ..Self::default()
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.1".into(),
            password: SecretString::from(String::new()),
            service_port: livisi_api::transport::WEBSERVICE_PORT,
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(60),
            websocket_enabled: true,
        }
    }
}
