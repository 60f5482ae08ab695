//! Event bus port: publish/subscribe for bridge events.

use std::future::Future;

use efbridge_domain::error::BridgeError;
use efbridge_domain::event::BridgeEvent;

/// Publishes bridge events to interested subscribers.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: BridgeEvent) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: BridgeEvent) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).publish(event)
    }
}
