//! # efbridge-adapter-mqtt
//!
//! MQTT adapter. Connects to the vendor broker with cloud-issued credentials.
//!
//! ## Responsibilities
//! - Build a `rumqttc` client with a stable client id
//! - Subscribe to the public-API topics of every bridged device, again after
//!   each reconnect
//! - Hand inbound publishes to the bridge as `(serial, message class, bytes)`
//! - Implement the `Transport` port: set-command publishing, forced
//!   reconnects and the connected flag
//!
//! ## Dependency rule
//! Same as other adapters: depends on `efbridge-app` and `efbridge-domain`.

mod config;
mod error;
mod transport;

pub use config::MqttConfig;
pub use error::MqttError;
pub use transport::{Broker, MqttEventLoop, MqttTransport, client_id, connect};
