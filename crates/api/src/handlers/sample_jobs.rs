//! Handlers for the `/sample-jobs` resource.
//!
//! Control calls return as soon as the state change is recorded; the run
//! itself proceeds in the background and reports through `/ws`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use sampler_core::types::DbId;
use sampler_db::models::sample_job::{CreateSampleJob, SampleJobView};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/sample-jobs
///
/// Expand a preset over a training run's checkpoints into a `pending` job.
/// Returns 201 with the created job.
pub async fn create_sample_job(
    State(state): State<AppState>,
    payload: Result<Json<CreateSampleJob>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let job = state.jobs.create(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: SampleJobView::from(job),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/sample-jobs
///
/// Every job, newest first.
pub async fn list_sample_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs: Vec<SampleJobView> = state
        .jobs
        .list()
        .await?
        .into_iter()
        .map(SampleJobView::from)
        .collect();
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/sample-jobs/{id}
///
/// The job, its items in execution order, and derived progress.
pub async fn get_sample_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let detail = state.jobs.show(job_id).await?;
    Ok(Json(DataResponse { data: detail }))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// POST /api/v1/sample-jobs/{id}/start
pub async fn start_sample_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.start(job_id).await?;
    Ok(Json(DataResponse {
        data: SampleJobView::from(job),
    }))
}

/// POST /api/v1/sample-jobs/{id}/stop
///
/// The job stays `running` until its in-flight item finishes.
pub async fn stop_sample_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.stop(job_id).await?;
    Ok(Json(DataResponse {
        data: SampleJobView::from(job),
    }))
}

/// POST /api/v1/sample-jobs/{id}/resume
pub async fn resume_sample_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.resume(job_id).await?;
    Ok(Json(DataResponse {
        data: SampleJobView::from(job),
    }))
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/v1/sample-jobs/{id}
///
/// Deletes the job and its items. Returns 204.
pub async fn delete_sample_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<StatusCode> {
    state.jobs.delete(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
