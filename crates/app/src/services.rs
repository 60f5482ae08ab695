//! Application services.
//!
//! [`bridge::Bridge`] accepts port implementations via generic parameters
//! (constructor injection), keeping this layer decoupled from concrete
//! adapters.

pub mod bridge;
pub mod device_runtime;
