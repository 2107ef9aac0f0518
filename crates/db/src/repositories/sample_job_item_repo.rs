//! Repository for the `sample_job_items` table.

use sampler_core::types::DbId;
use sqlx::PgPool;

use crate::models::sample_job::SampleJobItem;
use crate::models::status::SampleJobItemStatus;

/// Column list for `sample_job_items` queries.
const COLUMNS: &str = "\
    id, job_id, sort_order, checkpoint_filename, checkpoint_path, \
    prompt_name, prompt_text, negative_prompt, steps, cfg, \
    sampler_name, scheduler, seed, width, height, status_id, \
    comfyui_prompt_id, output_path, error_message, attempts, \
    started_at, completed_at, created_at, updated_at";

/// Provides per-item state transitions for the job runner.
pub struct SampleJobItemRepo;

impl SampleJobItemRepo {
    /// All items of a job in execution order.
    pub async fn list_by_job(
        pool: &PgPool,
        job_id: DbId,
    ) -> Result<Vec<SampleJobItem>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sample_job_items WHERE job_id = $1 ORDER BY sort_order"
        );
        sqlx::query_as::<_, SampleJobItem>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// The lowest-ordered pending item of a job, if any.
    pub async fn next_pending(
        pool: &PgPool,
        job_id: DbId,
    ) -> Result<Option<SampleJobItem>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sample_job_items \
             WHERE job_id = $1 AND status_id = $2 \
             ORDER BY sort_order LIMIT 1"
        );
        sqlx::query_as::<_, SampleJobItem>(&query)
            .bind(job_id)
            .bind(SampleJobItemStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Move a pending item to `running` and stamp `started_at`.
    ///
    /// Returns `false` if the item was not pending.
    pub async fn mark_running(pool: &PgPool, item_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sample_job_items \
             SET status_id = $2, started_at = NOW(), error_message = NULL \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(item_id)
        .bind(SampleJobItemStatus::Running.id())
        .bind(SampleJobItemStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record an accepted submission and count the attempt.
    pub async fn record_submission(
        pool: &PgPool,
        item_id: DbId,
        prompt_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sample_job_items \
             SET comfyui_prompt_id = $2, attempts = attempts + 1 \
             WHERE id = $1",
        )
        .bind(item_id)
        .bind(prompt_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a running item `completed` and bump the job's counter, atomically.
    ///
    /// Returns `false` (and changes nothing) if the item was not running.
    pub async fn complete(
        pool: &PgPool,
        item_id: DbId,
        output_path: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let job_id: Option<DbId> = sqlx::query_scalar(
            "UPDATE sample_job_items \
             SET status_id = $2, output_path = $3, completed_at = NOW(), error_message = NULL \
             WHERE id = $1 AND status_id = $4 \
             RETURNING job_id",
        )
        .bind(item_id)
        .bind(SampleJobItemStatus::Completed.id())
        .bind(output_path)
        .bind(SampleJobItemStatus::Running.id())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("UPDATE sample_jobs SET completed_items = completed_items + 1 WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Mark a running item `failed` with its error.
    pub async fn fail(pool: &PgPool, item_id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sample_job_items \
             SET status_id = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(item_id)
        .bind(SampleJobItemStatus::Failed.id())
        .bind(error)
        .bind(SampleJobItemStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Return every running item of a job to `pending`.
    ///
    /// Used when a run is abandoned mid-item; the next start picks the item
    /// up again. Returns the number of items reset.
    pub async fn reset_running(pool: &PgPool, job_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sample_job_items \
             SET status_id = $2, started_at = NULL, comfyui_prompt_id = NULL \
             WHERE job_id = $1 AND status_id = $3",
        )
        .bind(job_id)
        .bind(SampleJobItemStatus::Pending.id())
        .bind(SampleJobItemStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
