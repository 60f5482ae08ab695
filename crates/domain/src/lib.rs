//! # efbridge-domain
//!
//! Pure domain model for the efbridge cloud-telemetry bridge.
//!
//! ## Responsibilities
//! - Foundational types: device serials, message classes, error conventions, timestamps
//! - Normalize heterogeneous vendor payloads into one flat parameter map
//! - Hold per-device runtime data (parameters, bounded message histories, timestamps)
//! - Discover battery sub-modules from the parameter stream
//! - Infer device liveness from polling cadence
//! - Describe **logical points** (sensors, numbers, switches, selects) and
//!   the per-product catalogs they come from
//! - Define the events the bridge publishes to the host
//!
//! ## Dependency rule
//! This crate has **no internal dependencies** and performs no IO or logging.
//! Anything that could fail softly is reported back to the caller (the `app`
//! crate), which decides how to log it.

pub mod error;
pub mod time;

pub mod catalog;
pub mod device;
pub mod discovery;
pub mod event;
pub mod history;
pub mod liveness;
pub mod params;
pub mod payload;
pub mod point;
pub mod status_codes;
pub mod store;
