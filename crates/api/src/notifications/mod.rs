//! Event bus to WebSocket delivery.
//!
//! The [`ProgressForwarder`] subscribes to the event bus and pushes job
//! progress to every connected client.

pub mod forwarder;

pub use forwarder::ProgressForwarder;
