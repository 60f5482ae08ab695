//! # efbridge-adapter-cloud-http
//!
//! Cloud REST adapter for the vendor's signed public API.
//!
//! ## Responsibilities
//! - Sign every request (sorted query, nonce, millisecond timestamp,
//!   HMAC-SHA256 under the secret key)
//! - `/certification`: MQTT broker credentials
//! - `/device/list`: registered devices with their online flag
//! - `/device/quota/all`: full parameter snapshot of one device
//! - Implement the `CloudApi` port
//!
//! ## Dependency rule
//! Same as other adapters: depends on `efbridge-app` and `efbridge-domain`.

mod client;
mod config;
mod error;
mod signing;

pub use client::{Certification, CloudClient};
pub use config::{CloudConfig, DEFAULT_BASE_URL};
pub use error::CloudError;
