//! Work item expansion.
//!
//! Turns a [`SampleGrid`] and a checkpoint selection into the ordered list
//! of fully-specified generation requests that make up a sample job.

use serde::Serialize;

use crate::error::CoreError;
use crate::preset::SampleGrid;

/// A checkpoint selected for sampling, with the model path the generation
/// engine knows it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCheckpoint {
    /// Checkpoint file name, e.g. `my-lora-step00001000.safetensors`.
    pub filename: String,
    /// Path relative to the engine's model folder.
    pub model_path: String,
}

/// One parameter tuple for one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    pub checkpoint_filename: String,
    pub checkpoint_path: String,
    pub prompt_name: String,
    pub prompt_text: String,
    pub negative_prompt: String,
    pub steps: i32,
    pub cfg: f64,
    pub sampler_name: String,
    pub scheduler: String,
    pub seed: i64,
    pub width: i32,
    pub height: i32,
}

/// Number of items a grid produces for `checkpoint_count` checkpoints.
///
/// A count too large to represent is a validation error.
pub fn expected_item_count(grid: &SampleGrid, checkpoint_count: usize) -> Result<usize, CoreError> {
    grid.combinations()
        .and_then(|per_checkpoint| per_checkpoint.checked_mul(checkpoint_count))
        .ok_or_else(|| CoreError::Validation("Sample grid is too large".into()))
}

/// Enumerate the cartesian product of checkpoints and grid parameters.
///
/// Nesting order is fixed, outermost first: checkpoint, prompt, steps, CFG,
/// sampler pair, seed. Identical inputs always yield identical output, so
/// item order doubles as execution order and keeps every checkpoint's items
/// contiguous.
pub fn expand(grid: &SampleGrid, checkpoints: &[ResolvedCheckpoint]) -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(expected_item_count(grid, checkpoints.len()).unwrap_or(0));

    for checkpoint in checkpoints {
        for prompt in &grid.prompts {
            for &steps in &grid.steps {
                for &cfg in &grid.cfgs {
                    for pair in &grid.sampler_pairs {
                        for &seed in &grid.seeds {
                            items.push(WorkItem {
                                checkpoint_filename: checkpoint.filename.clone(),
                                checkpoint_path: checkpoint.model_path.clone(),
                                prompt_name: prompt.name.clone(),
                                prompt_text: prompt.text.clone(),
                                negative_prompt: grid.negative_prompt.clone(),
                                steps,
                                cfg,
                                sampler_name: pair.sampler.clone(),
                                scheduler: pair.scheduler.clone(),
                                seed,
                                width: grid.width,
                                height: grid.height,
                            });
                        }
                    }
                }
            }
        }
    }

    items
}
