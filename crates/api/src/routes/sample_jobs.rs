//! Route definitions for the `/sample-jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::sample_jobs;
use crate::state::AppState;

/// Routes mounted at `/sample-jobs`.
///
/// ```text
/// GET    /                -> list_sample_jobs
/// POST   /                -> create_sample_job
/// GET    /{id}            -> get_sample_job
/// DELETE /{id}            -> delete_sample_job
/// POST   /{id}/start      -> start_sample_job
/// POST   /{id}/stop       -> stop_sample_job
/// POST   /{id}/resume     -> resume_sample_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(sample_jobs::list_sample_jobs).post(sample_jobs::create_sample_job),
        )
        .route(
            "/{id}",
            get(sample_jobs::get_sample_job).delete(sample_jobs::delete_sample_job),
        )
        .route("/{id}/start", post(sample_jobs::start_sample_job))
        .route("/{id}/stop", post(sample_jobs::stop_sample_job))
        .route("/{id}/resume", post(sample_jobs::resume_sample_job))
}
