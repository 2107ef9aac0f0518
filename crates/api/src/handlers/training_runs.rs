use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/training-runs
///
/// Training runs found under the checkpoint directory, each with its
/// checkpoints in step order.
pub async fn list_training_runs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.jobs.clone();
    let runs = tokio::task::spawn_blocking(move || jobs.training_runs())
        .await
        .map_err(|e| AppError::InternalError(format!("Checkpoint scan panicked: {e}")))??;
    Ok(Json(DataResponse { data: runs }))
}
