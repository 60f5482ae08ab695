//! In-process event bus backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use efbridge_domain::error::BridgeError;
use efbridge_domain::event::BridgeEvent;

use crate::ports::EventPublisher;

/// Fans bridge events out to the host and the daemon's event logger.
///
/// Publishing never fails: with no subscriber the event is dropped, and a
/// subscriber that falls more than `capacity` events behind observes a lag
/// on its next receive.
pub struct InProcessEventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl InProcessEventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events published *after* this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, event: BridgeEvent) -> impl Future<Output = Result<(), BridgeError>> + Send {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!(sn = %event.sn(), "no subscriber, event dropped");
        }
        async { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efbridge_domain::device::DeviceSn;
    use efbridge_domain::event::PointReading;
    use efbridge_domain::point::{BatteryPoint, PointValue};
    use serde_json::json;
    use tokio::sync::broadcast::error::RecvError;

    fn discovered(serial: &str) -> BridgeEvent {
        BridgeEvent::ModuleDiscovered {
            sn: DeviceSn::new("HJ31"),
            point: BatteryPoint::new(format!("bp_addr.{serial}")),
        }
    }

    #[tokio::test]
    async fn should_deliver_event_to_subscriber() {
        let bus = InProcessEventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(discovered("A")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), discovered("A"));
    }

    #[tokio::test]
    async fn should_deliver_event_to_multiple_subscribers() {
        let bus = InProcessEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(discovered("A")).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap(), discovered("A"));
        assert_eq!(rx2.recv().await.unwrap(), discovered("A"));
    }

    #[tokio::test]
    async fn should_succeed_when_no_subscribers() {
        let bus = InProcessEventBus::new(16);
        assert!(bus.publish(discovered("A")).await.is_ok());
    }

    #[tokio::test]
    async fn should_not_deliver_events_published_before_subscription() {
        let bus = InProcessEventBus::new(16);
        bus.publish(discovered("early")).await.unwrap();

        let mut rx = bus.subscribe();
        bus.publish(discovered("late")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), discovered("late"));
    }

    #[tokio::test]
    async fn should_keep_publication_order_of_one_device() {
        let bus = InProcessEventBus::new(16);
        let mut rx = bus.subscribe();
        let sn = DeviceSn::new("HJ31");
        let refreshed = BridgeEvent::PointsRefreshed {
            sn: sn.clone(),
            readings: vec![PointReading::new("bpSoc", PointValue::Int(64))],
        };
        let command = BridgeEvent::CommandSent {
            sn: sn.clone(),
            key: "ems.maxChargeSoc".to_string(),
            value: json!(90),
        };

        bus.publish(discovered("A")).await.unwrap();
        bus.publish(refreshed.clone()).await.unwrap();
        bus.publish(command.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), discovered("A"));
        assert_eq!(rx.recv().await.unwrap(), refreshed);
        assert_eq!(rx.recv().await.unwrap(), command);
    }

    #[tokio::test]
    async fn should_report_lag_to_slow_subscriber() {
        let bus = InProcessEventBus::new(2);
        let mut rx = bus.subscribe();

        for serial in ["A", "B", "C", "D"] {
            bus.publish(discovered(serial)).await.unwrap();
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(rx.recv().await.unwrap(), discovered("C"));
        assert_eq!(rx.recv().await.unwrap(), discovered("D"));
    }
}
