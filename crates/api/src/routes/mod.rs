pub mod health;
pub mod sample_jobs;
pub mod training_runs;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws                                  WebSocket (progress push)
///
/// /sample-jobs                         list, create
/// /sample-jobs/{id}                    get (job + items + progress), delete
/// /sample-jobs/{id}/start              start (POST)
/// /sample-jobs/{id}/stop               stop (POST)
/// /sample-jobs/{id}/resume             resume (POST)
///
/// /training-runs                       discovered training runs
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/sample-jobs", sample_jobs::router())
        .nest("/training-runs", training_runs::router())
}
