//! Sample preset model and DTO.

use sampler_core::preset::{NamedPrompt, SampleGrid, SamplerPair};
use sampler_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// A row from the `sample_presets` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SamplePreset {
    pub id: DbId,
    pub name: String,
    pub prompts: Json<Vec<NamedPrompt>>,
    pub negative_prompt: String,
    pub steps: Json<Vec<i32>>,
    pub cfgs: Json<Vec<f64>>,
    pub sampler_pairs: Json<Vec<SamplerPair>>,
    pub seeds: Json<Vec<i64>>,
    pub width: i32,
    pub height: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SamplePreset {
    /// The parameter lists of this preset.
    pub fn grid(&self) -> SampleGrid {
        SampleGrid {
            prompts: self.prompts.0.clone(),
            negative_prompt: self.negative_prompt.clone(),
            steps: self.steps.0.clone(),
            cfgs: self.cfgs.0.clone(),
            sampler_pairs: self.sampler_pairs.0.clone(),
            seeds: self.seeds.0.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

/// DTO for inserting a preset.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSamplePreset {
    pub name: String,
    #[serde(flatten)]
    pub grid: SampleGrid,
}
