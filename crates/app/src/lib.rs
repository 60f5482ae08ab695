//! # efbridge-app
//!
//! Application layer: the bridge coordinator and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `CloudApi`: device list and bulk quota fetches
//!   - `Transport`: set-command publishing and broker reconnects
//!   - `EventPublisher`: fan-out of bridge events
//! - Hold one `DeviceRuntime` per device (store, discovery, liveness, catalog)
//! - Run the `Bridge`: inbound message routing, the poll cycle, out-of-band
//!   quota re-polls and the set-command path
//! - Provide **in-process infrastructure** (event bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `efbridge-domain` only (plus `tokio` for channels, timers and
//! spawning). Never imports adapter crates. Adapters depend on *this* crate,
//! not the reverse.

pub mod event_bus;
pub mod ports;
pub mod services;
