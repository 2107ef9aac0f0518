use std::sync::Arc;

use sampler_pipeline::service::JobService;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: sampler_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Sample job control operations.
    pub jobs: Arc<JobService>,
    /// Event bus carrying progress events.
    pub event_bus: Arc<sampler_events::EventBus>,
}
