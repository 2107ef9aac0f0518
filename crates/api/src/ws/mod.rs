//! WebSocket push channel.
//!
//! Browser clients connect to `/api/v1/ws` and receive job progress frames.
//! The channel is outbound only; inbound frames other than close are ignored.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
