//! Cloud API configuration.

use serde::Deserialize;

/// Default endpoint of the signed public API.
pub const DEFAULT_BASE_URL: &str = "https://api-e.ecoflow.com/iot-open/sign";

/// Configuration for the cloud REST client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Base URL the endpoint paths are appended to.
    pub base_url: String,
    /// Developer access key.
    pub access_key: String,
    /// Developer secret key, used to sign requests.
    pub secret_key: String,
    /// Installation group; part of the MQTT client id.
    pub group: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            group: "default".to_string(),
            request_timeout_secs: 10,
        }
    }
}
