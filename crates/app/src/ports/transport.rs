//! Transport port: the MQTT side as seen by the coordinator.

use std::future::Future;

use efbridge_domain::device::DeviceSn;
use efbridge_domain::error::BridgeError;
use efbridge_domain::payload::RawMessage;

/// Outbound messaging and connection control.
///
/// Inbound messages do not go through this trait: the adapter calls
/// [`Bridge::on_message`](crate::services::bridge::Bridge::on_message)
/// directly.
pub trait Transport: Send + Sync {
    /// Publish a set-command on the device's set topic.
    fn publish_set(
        &self,
        sn: &DeviceSn,
        message: RawMessage,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Drop and re-establish the broker connection.
    fn reconnect(&self) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Whether the broker connection is currently up.
    fn is_connected(&self) -> bool;
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn publish_set(
        &self,
        sn: &DeviceSn,
        message: RawMessage,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).publish_set(sn, message)
    }

    fn reconnect(&self) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).reconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
