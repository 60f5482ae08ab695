//! MQTT adapter configuration.

use serde::Deserialize;

/// Client-side tuning for the broker connection.
///
/// Broker address and credentials are not configured here; they are issued
/// by the cloud at startup (see [`Broker`](crate::Broker)).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    /// Capacity of the client request channel.
    pub channel_capacity: usize,
    /// Pause after a connection error before polling again, in seconds.
    pub retry_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 30,
            channel_capacity: 64,
            retry_delay_secs: 5,
        }
    }
}
