//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the bridge core and the outside world.
//! They are defined here (in `app`) so that both the coordinator and the
//! adapters can depend on them without creating circular dependencies.

pub mod cloud;
pub mod event_bus;
pub mod transport;

pub use cloud::CloudApi;
pub use event_bus::EventPublisher;
pub use transport::Transport;
