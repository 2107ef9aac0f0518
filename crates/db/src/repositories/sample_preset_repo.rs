//! Repository for the `sample_presets` table.

use sampler_core::types::DbId;
use sqlx::PgPool;
use sqlx::types::Json;

use crate::models::sample_preset::{CreateSamplePreset, SamplePreset};

const COLUMNS: &str = "id, name, prompts, negative_prompt, steps, cfgs, \
     sampler_pairs, seeds, width, height, created_at, updated_at";

/// Stores the parameter grids sample jobs are expanded from.
pub struct SamplePresetRepo;

impl SamplePresetRepo {
    /// Insert a new preset, returning the created row.
    pub async fn create(
        pool: &PgPool,
        input: &CreateSamplePreset,
    ) -> Result<SamplePreset, sqlx::Error> {
        let query = format!(
            "INSERT INTO sample_presets \
                (name, prompts, negative_prompt, steps, cfgs, sampler_pairs, seeds, width, height) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        let grid = &input.grid;
        sqlx::query_as::<_, SamplePreset>(&query)
            .bind(&input.name)
            .bind(Json(&grid.prompts))
            .bind(&grid.negative_prompt)
            .bind(Json(&grid.steps))
            .bind(Json(&grid.cfgs))
            .bind(Json(&grid.sampler_pairs))
            .bind(Json(&grid.seeds))
            .bind(grid.width)
            .bind(grid.height)
            .fetch_one(pool)
            .await
    }

    /// Find a preset by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<SamplePreset>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sample_presets WHERE id = $1");
        sqlx::query_as::<_, SamplePreset>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
