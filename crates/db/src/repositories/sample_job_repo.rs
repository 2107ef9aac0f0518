//! Repository for the `sample_jobs` table.
//!
//! Status transitions are compare-and-set updates keyed on the current
//! `status_id`, so a transition only succeeds from the status the caller
//! observed.

use sampler_core::types::DbId;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::sample_job::{NewSampleJob, NewSampleJobItem, SampleJob};
use crate::models::status::{SampleJobItemStatus, SampleJobStatus};

/// Column list for `sample_jobs` queries.
const COLUMNS: &str = "\
    id, training_run_name, preset_id, workflow_name, vae, clip, shift, \
    status_id, total_items, completed_items, error_message, \
    created_at, updated_at";

/// Rows per multi-row item insert. 16 binds per row stays well below the
/// PostgreSQL bind parameter limit.
const INSERT_CHUNK_SIZE: usize = 1000;

/// Provides CRUD and state-transition operations for sample jobs.
pub struct SampleJobRepo;

impl SampleJobRepo {
    /// Insert a job together with all of its items in one transaction.
    ///
    /// `total_items` is the number of items; `completed_items` starts at
    /// the number of items inserted as `skipped`.
    pub async fn create_with_items(
        pool: &PgPool,
        job: &NewSampleJob,
        items: &[NewSampleJobItem],
    ) -> Result<SampleJob, sqlx::Error> {
        let total = i32::try_from(items.len())
            .map_err(|_| sqlx::Error::Protocol("too many sample job items".into()))?;
        let skipped = items
            .iter()
            .filter(|i| i.status == SampleJobItemStatus::Skipped)
            .count() as i32;

        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO sample_jobs \
                (training_run_name, preset_id, workflow_name, vae, clip, shift, \
                 status_id, total_items, completed_items) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        let created = sqlx::query_as::<_, SampleJob>(&query)
            .bind(&job.training_run_name)
            .bind(job.preset_id)
            .bind(&job.workflow_name)
            .bind(&job.vae)
            .bind(&job.clip)
            .bind(job.shift)
            .bind(SampleJobStatus::Pending.id())
            .bind(total)
            .bind(skipped)
            .fetch_one(&mut *tx)
            .await?;

        for (chunk_index, chunk) in items.chunks(INSERT_CHUNK_SIZE).enumerate() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO sample_job_items \
                    (job_id, sort_order, checkpoint_filename, checkpoint_path, \
                     prompt_name, prompt_text, negative_prompt, steps, cfg, \
                     sampler_name, scheduler, seed, width, height, status_id, \
                     output_path, completed_at) ",
            );
            builder.push_values(chunk.iter().enumerate(), |mut row, (i, new_item)| {
                let sort_order = (chunk_index * INSERT_CHUNK_SIZE + i) as i32;
                let item = &new_item.item;
                row.push_bind(created.id)
                    .push_bind(sort_order)
                    .push_bind(&item.checkpoint_filename)
                    .push_bind(&item.checkpoint_path)
                    .push_bind(&item.prompt_name)
                    .push_bind(&item.prompt_text)
                    .push_bind(&item.negative_prompt)
                    .push_bind(item.steps)
                    .push_bind(item.cfg)
                    .push_bind(&item.sampler_name)
                    .push_bind(&item.scheduler)
                    .push_bind(item.seed)
                    .push_bind(item.width)
                    .push_bind(item.height)
                    .push_bind(new_item.status.id())
                    .push_bind(&new_item.output_path);
                if new_item.status == SampleJobItemStatus::Skipped {
                    row.push("NOW()");
                } else {
                    row.push("NULL");
                }
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Find a job by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<SampleJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sample_jobs WHERE id = $1");
        sqlx::query_as::<_, SampleJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List every job, newest first.
    pub async fn list(pool: &PgPool) -> Result<Vec<SampleJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sample_jobs ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, SampleJob>(&query).fetch_all(pool).await
    }

    /// List jobs currently in `status`.
    pub async fn list_by_status(
        pool: &PgPool,
        status: SampleJobStatus,
    ) -> Result<Vec<SampleJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sample_jobs WHERE status_id = $1 ORDER BY id");
        sqlx::query_as::<_, SampleJob>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await
    }

    /// Move a job from `from` to `to`.
    ///
    /// Returns `false` when the job does not exist or is no longer in `from`.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: SampleJobStatus,
        to: SampleJobStatus,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE sample_jobs SET status_id = $3 WHERE id = $1 AND status_id = $2")
                .bind(id)
                .bind(from.id())
                .bind(to.id())
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a non-terminal job as `failed` with the fatal cause.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sample_jobs SET status_id = $2, error_message = $3 \
             WHERE id = $1 AND status_id NOT IN ($4, $5)",
        )
        .bind(id)
        .bind(SampleJobStatus::Failed.id())
        .bind(error)
        .bind(SampleJobStatus::Completed.id())
        .bind(SampleJobStatus::Failed.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a job; its items go with it (`ON DELETE CASCADE`).
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sample_jobs WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
