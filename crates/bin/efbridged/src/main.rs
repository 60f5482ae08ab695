//! # efbridged: efbridge daemon
//!
//! Composition root that wires the adapters into the bridge and runs it.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars) and install the tracing
//!   subscriber
//! - Obtain MQTT credentials from the cloud and build the MQTT client
//! - Construct the bridge, injecting the cloud client, the MQTT transport and
//!   the event bus via port traits
//! - Run the MQTT event loop and the poll loop until Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing_subscriber::EnvFilter;

use efbridge_adapter_cloud_http::CloudClient;
use efbridge_adapter_mqtt::Broker;
use efbridge_app::event_bus::InProcessEventBus;
use efbridge_app::services::bridge::Bridge;
use efbridge_domain::device::{DeviceSn, MessageClass};
use efbridge_domain::event::BridgeEvent;
use efbridge_domain::payload::Normalizer;
use efbridge_domain::point::Unit;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    // Cloud
    let cloud = Arc::new(CloudClient::new(&config.cloud).context("failed to build cloud client")?);
    let certification = cloud
        .certification()
        .await
        .context("failed to obtain MQTT credentials")?;

    // MQTT
    let broker = Broker {
        tls: certification.tls(),
        host: certification.host,
        port: certification.port,
        username: certification.account,
        password: certification.password,
    };
    let client_id = efbridge_adapter_mqtt::client_id(&broker.username, &config.cloud.group);
    let (transport, event_loop) = efbridge_adapter_mqtt::connect(&broker, client_id, &config.mqtt);

    // Event bus
    let event_bus = Arc::new(InProcessEventBus::new(256));
    tokio::spawn(log_events(event_bus.subscribe()));

    // Bridge
    let mut bridge = Bridge::new(
        cloud,
        Arc::new(transport),
        event_bus,
        Normalizer::default(),
        config.bridge_config(),
    );
    let devices = bridge.setup().await.context("failed to fetch device list")?;
    if devices.is_empty() {
        tracing::warn!("no devices to bridge");
    }
    let bridge = Arc::new(bridge);

    let inbound = Arc::clone(&bridge);
    let mqtt = tokio::spawn(event_loop.run(
        devices,
        move |sn: &DeviceSn, class: MessageClass, payload: &[u8]| {
            inbound.on_message(sn, class, payload);
        },
    ));

    let interval = config.poll_interval();
    tracing::info!(
        broker = %broker.host,
        interval_secs = interval.as_secs(),
        "efbridged started"
    );
    bridge.run(interval, shutdown_signal()).await;

    mqtt.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Log every bridge event until the bus closes.
async fn log_events(rx: broadcast::Receiver<BridgeEvent>) {
    let mut events = BroadcastStream::new(rx);
    while let Some(result) = events.next().await {
        match result {
            Ok(event) => log_event(&event),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "event logger lagged, some events were dropped");
            }
        }
    }
}

fn log_event(event: &BridgeEvent) {
    let sn = event.sn();
    match event {
        BridgeEvent::DeviceAdded {
            display_name,
            catalog,
            ..
        } => tracing::info!(%sn, %display_name, catalog, "device added"),
        BridgeEvent::PointsRefreshed { readings, .. } => {
            tracing::debug!(%sn, points = readings.len(), "points refreshed");
            for reading in readings {
                tracing::trace!(
                    %sn,
                    key = %reading.key,
                    value = %reading.value,
                    unit = reading.unit.map_or("", Unit::as_str),
                    "point value"
                );
            }
        }
        BridgeEvent::ModuleDiscovered { point, .. } => tracing::debug!(
            %sn,
            key = %point.key(),
            name = %point.name(),
            unit = point.unit().as_str(),
            device_class = ?point.device_class(),
            "battery point added"
        ),
        BridgeEvent::StatusChanged { report, .. } => tracing::info!(
            %sn,
            state = %report.state,
            mqtt_connected = ?report.mqtt_connected,
            quota_requests = ?report.quota_requests,
            "status updated"
        ),
        BridgeEvent::CommandSent { key, value, .. } => {
            tracing::info!(%sn, key = %key, %value, "command sent");
        }
    }
}
