//! MQTT adapter error types.

use efbridge_domain::error::BridgeError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The rumqttc client rejected a request.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// An outbound message could not be encoded as JSON.
    #[error("failed to encode MQTT payload")]
    Serialize(#[source] serde_json::Error),
}

impl MqttError {
    /// Convert into a [`BridgeError::Transport`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> BridgeError {
        BridgeError::Transport(Box::new(self))
    }
}

impl From<MqttError> for BridgeError {
    fn from(err: MqttError) -> Self {
        err.into_domain()
    }
}
