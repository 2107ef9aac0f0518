//! In-process event bus.
//!
//! - [`EventBus`]: publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the event envelope carried on the bus.
//!
//! Producers (the job runner) publish without knowing who listens; the
//! API layer subscribes and forwards events to WebSocket clients.

pub mod bus;

pub use bus::{EventBus, PlatformEvent};
