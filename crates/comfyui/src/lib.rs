//! ComfyUI generation engine adapter.
//!
//! Provides typed WebSocket message parsing, a persistent WebSocket
//! connection with reconnect backoff, HTTP API wrappers, workflow template
//! materialization, and the [`GenerationClient`](generation::GenerationClient)
//! contract the job runner drives.

pub mod api;
pub mod client;
pub mod events;
pub mod generation;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod workflow;
