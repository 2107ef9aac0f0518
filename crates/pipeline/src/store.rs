//! Persistence seam for the orchestration engine.
//!
//! [`SampleJobStore`] lists exactly the reads and state transitions the
//! service and runner need. [`PgSampleJobStore`] delegates to the
//! repositories in `sampler-db`.

use async_trait::async_trait;
use sampler_core::error::CoreError;
use sampler_core::types::DbId;
use sampler_db::models::sample_job::{NewSampleJob, NewSampleJobItem, SampleJob, SampleJobItem};
use sampler_db::models::sample_preset::SamplePreset;
use sampler_db::models::status::SampleJobStatus;
use sampler_db::repositories::{SampleJobItemRepo, SampleJobRepo, SamplePresetRepo};
use sqlx::PgPool;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::Internal(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Job, item and preset persistence.
///
/// Transitions return `false` when the row was not in the expected state,
/// so concurrent callers cannot both win.
#[async_trait]
pub trait SampleJobStore: Send + Sync {
    async fn find_preset(&self, id: DbId) -> StoreResult<Option<SamplePreset>>;

    /// Insert a job and all its items atomically.
    async fn create_job(&self, job: &NewSampleJob, items: &[NewSampleJobItem])
        -> StoreResult<SampleJob>;

    async fn find_job(&self, id: DbId) -> StoreResult<Option<SampleJob>>;

    /// Every job, newest first.
    async fn list_jobs(&self) -> StoreResult<Vec<SampleJob>>;

    async fn list_jobs_by_status(&self, status: SampleJobStatus) -> StoreResult<Vec<SampleJob>>;

    async fn transition_job(
        &self,
        id: DbId,
        from: SampleJobStatus,
        to: SampleJobStatus,
    ) -> StoreResult<bool>;

    /// Move a non-terminal job to `failed` with its cause.
    async fn fail_job(&self, id: DbId, error: &str) -> StoreResult<bool>;

    /// Delete a job and its items.
    async fn delete_job(&self, id: DbId) -> StoreResult<bool>;

    /// A job's items in execution order.
    async fn list_items(&self, job_id: DbId) -> StoreResult<Vec<SampleJobItem>>;

    async fn next_pending_item(&self, job_id: DbId) -> StoreResult<Option<SampleJobItem>>;

    /// `pending -> running`.
    async fn mark_item_running(&self, item_id: DbId) -> StoreResult<bool>;

    /// Record the engine correlation id and count the attempt.
    async fn record_submission(&self, item_id: DbId, prompt_id: &str) -> StoreResult<()>;

    /// `running -> completed`, incrementing the job's `completed_items`.
    async fn complete_item(&self, item_id: DbId, output_path: &str) -> StoreResult<bool>;

    /// `running -> failed`.
    async fn fail_item(&self, item_id: DbId, error: &str) -> StoreResult<bool>;

    /// Return a job's `running` items to `pending`.
    async fn reset_running_items(&self, job_id: DbId) -> StoreResult<u64>;
}

/// [`SampleJobStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgSampleJobStore {
    pool: PgPool,
}

impl PgSampleJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SampleJobStore for PgSampleJobStore {
    async fn find_preset(&self, id: DbId) -> StoreResult<Option<SamplePreset>> {
        Ok(SamplePresetRepo::find_by_id(&self.pool, id).await?)
    }

    async fn create_job(
        &self,
        job: &NewSampleJob,
        items: &[NewSampleJobItem],
    ) -> StoreResult<SampleJob> {
        Ok(SampleJobRepo::create_with_items(&self.pool, job, items).await?)
    }

    async fn find_job(&self, id: DbId) -> StoreResult<Option<SampleJob>> {
        Ok(SampleJobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_jobs(&self) -> StoreResult<Vec<SampleJob>> {
        Ok(SampleJobRepo::list(&self.pool).await?)
    }

    async fn list_jobs_by_status(&self, status: SampleJobStatus) -> StoreResult<Vec<SampleJob>> {
        Ok(SampleJobRepo::list_by_status(&self.pool, status).await?)
    }

    async fn transition_job(
        &self,
        id: DbId,
        from: SampleJobStatus,
        to: SampleJobStatus,
    ) -> StoreResult<bool> {
        Ok(SampleJobRepo::transition(&self.pool, id, from, to).await?)
    }

    async fn fail_job(&self, id: DbId, error: &str) -> StoreResult<bool> {
        Ok(SampleJobRepo::fail(&self.pool, id, error).await?)
    }

    async fn delete_job(&self, id: DbId) -> StoreResult<bool> {
        Ok(SampleJobRepo::delete(&self.pool, id).await?)
    }

    async fn list_items(&self, job_id: DbId) -> StoreResult<Vec<SampleJobItem>> {
        Ok(SampleJobItemRepo::list_by_job(&self.pool, job_id).await?)
    }

    async fn next_pending_item(&self, job_id: DbId) -> StoreResult<Option<SampleJobItem>> {
        Ok(SampleJobItemRepo::next_pending(&self.pool, job_id).await?)
    }

    async fn mark_item_running(&self, item_id: DbId) -> StoreResult<bool> {
        Ok(SampleJobItemRepo::mark_running(&self.pool, item_id).await?)
    }

    async fn record_submission(&self, item_id: DbId, prompt_id: &str) -> StoreResult<()> {
        Ok(SampleJobItemRepo::record_submission(&self.pool, item_id, prompt_id).await?)
    }

    async fn complete_item(&self, item_id: DbId, output_path: &str) -> StoreResult<bool> {
        Ok(SampleJobItemRepo::complete(&self.pool, item_id, output_path).await?)
    }

    async fn fail_item(&self, item_id: DbId, error: &str) -> StoreResult<bool> {
        Ok(SampleJobItemRepo::fail(&self.pool, item_id, error).await?)
    }

    async fn reset_running_items(&self, job_id: DbId) -> StoreResult<u64> {
        Ok(SampleJobItemRepo::reset_running(&self.pool, job_id).await?)
    }
}
