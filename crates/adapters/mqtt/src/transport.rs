//! rumqttc-backed transport.
//!
//! [`connect`] splits the connection into two halves: [`MqttTransport`]
//! implements the outbound port and is handed to the bridge, while
//! [`MqttEventLoop`] drives the connection and routes inbound publishes.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::sync::Notify;

use efbridge_app::ports::Transport;
use efbridge_domain::device::{DeviceSn, DeviceTopics, MessageClass, parse_public_topic};
use efbridge_domain::error::BridgeError;
use efbridge_domain::payload::RawMessage;

use crate::config::MqttConfig;
use crate::error::MqttError;

const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Broker endpoint and credentials, as issued by the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: bool,
}

/// Stable client id derived from the broker user and the configured group.
///
/// The broker limits how many distinct ids an account may use per day, so
/// the id must not change between restarts.
#[must_use]
pub fn client_id(username: &str, group: &str) -> String {
    format!("efbridge-{username}-{}", group.replace(' ', "-"))
}

/// Create a client for `broker`. Nothing is sent until the returned event
/// loop is [run](MqttEventLoop::run).
#[must_use]
pub fn connect(
    broker: &Broker,
    client_id: String,
    config: &MqttConfig,
) -> (MqttTransport, MqttEventLoop) {
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
    options.set_credentials(broker.username.clone(), broker.password.clone());
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    if broker.tls {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);
    let connected = Arc::new(AtomicBool::new(false));
    let reconnect = Arc::new(Notify::new());

    let transport = MqttTransport {
        client: client.clone(),
        username: broker.username.clone(),
        connected: Arc::clone(&connected),
        reconnect: Arc::clone(&reconnect),
    };
    let event_loop = MqttEventLoop {
        eventloop,
        client,
        username: broker.username.clone(),
        connected,
        reconnect,
        retry_delay: Duration::from_secs(config.retry_delay_secs),
    };
    (transport, event_loop)
}

/// Outbound half of the connection.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    username: String,
    connected: Arc<AtomicBool>,
    reconnect: Arc<Notify>,
}

impl Transport for MqttTransport {
    fn publish_set(
        &self,
        sn: &DeviceSn,
        message: RawMessage,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let topic = DeviceTopics::public(&self.username, sn).set;
        let client = self.client.clone();
        async move {
            let payload = serde_json::to_vec(&message).map_err(MqttError::Serialize)?;
            tracing::debug!(%topic, bytes = payload.len(), "publishing set-command");
            client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
                .map_err(MqttError::Client)?;
            Ok(())
        }
    }

    fn reconnect(&self) -> impl Future<Output = Result<(), BridgeError>> + Send {
        self.reconnect.notify_one();
        async { Ok(()) }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Inbound half of the connection.
pub struct MqttEventLoop {
    eventloop: EventLoop,
    client: AsyncClient,
    username: String,
    connected: Arc<AtomicBool>,
    reconnect: Arc<Notify>,
    retry_delay: Duration,
}

impl MqttEventLoop {
    /// Poll the connection forever, subscribing to every topic of `devices`
    /// on each (re)connect and handing inbound publishes to `on_message`.
    ///
    /// Connection errors are logged and retried after the configured delay.
    pub async fn run<F>(mut self, devices: Vec<DeviceSn>, on_message: F)
    where
        F: Fn(&DeviceSn, MessageClass, &[u8]),
    {
        let filters = subscriptions(&self.username, &devices);
        let reconnect = Arc::clone(&self.reconnect);

        loop {
            tokio::select! {
                () = reconnect.notified() => {
                    tracing::info!("dropping broker connection on request");
                    self.connected.store(false, Ordering::SeqCst);
                    self.eventloop.clean();
                }
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        tracing::info!(code = ?ack.code, "connected to broker");
                        self.connected.store(true, Ordering::SeqCst);
                        self.subscribe(&filters);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        dispatch(&publish.topic, &publish.payload, &on_message);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.connected.store(false, Ordering::SeqCst);
                        tracing::warn!(%err, "broker connection error");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
    }

    fn subscribe(&self, filters: &[SubscribeFilter]) {
        if filters.is_empty() {
            return;
        }
        match self.client.try_subscribe_many(filters.to_vec()) {
            Ok(()) => tracing::debug!(count = filters.len(), "subscribed to device topics"),
            Err(err) => tracing::warn!(%err, "unable to subscribe to device topics"),
        }
    }
}

/// Subscription filters for every topic of every device.
fn subscriptions(username: &str, devices: &[DeviceSn]) -> Vec<SubscribeFilter> {
    devices
        .iter()
        .flat_map(|sn| {
            DeviceTopics::public(username, sn)
                .subscriptions()
                .into_iter()
                .map(|topic| SubscribeFilter::new(topic.to_string(), QoS::AtLeastOnce))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Route one publish to `on_message`; returns whether the topic was known.
fn dispatch<F>(topic: &str, payload: &[u8], on_message: &F) -> bool
where
    F: Fn(&DeviceSn, MessageClass, &[u8]),
{
    match parse_public_topic(topic) {
        Some((sn, class)) => {
            tracing::trace!(%topic, bytes = payload.len(), "inbound publish");
            on_message(&sn, class, payload);
            true
        }
        None => {
            tracing::debug!(%topic, "ignoring publish on unexpected topic");
            false
        }
    }
}
