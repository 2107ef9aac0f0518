use axum::routing::get;
use axum::Router;

use crate::handlers::training_runs;
use crate::state::AppState;

/// Routes mounted at `/training-runs`.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(training_runs::list_training_runs))
}
