//! Sample preset parameter lists and their validation.
//!
//! A preset is a saved set of parameter lists. The cartesian product of
//! those lists (times the selected checkpoints) defines a sample job's
//! work items.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/* --------------------------------------------------------------------------
   Validation limits
   -------------------------------------------------------------------------- */

/// Maximum length for a preset name.
pub const MAX_PRESET_NAME_LEN: usize = 200;

/// Maximum length for a prompt name (it becomes part of output filenames).
pub const MAX_PROMPT_NAME_LEN: usize = 64;

/// Latent dimensions must be a multiple of this value.
pub const DIMENSION_MULTIPLE: i32 = 8;

/// Upper bound on any single image dimension.
pub const MAX_DIMENSION: i32 = 8192;

/* --------------------------------------------------------------------------
   Types
   -------------------------------------------------------------------------- */

/// A prompt with the short name used to label its outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPrompt {
    pub name: String,
    pub text: String,
}

/// A sampler together with the scheduler it is run with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerPair {
    pub sampler: String,
    pub scheduler: String,
}

/// The parameter lists of a preset, detached from its storage row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleGrid {
    pub prompts: Vec<NamedPrompt>,
    pub negative_prompt: String,
    pub steps: Vec<i32>,
    pub cfgs: Vec<f64>,
    pub sampler_pairs: Vec<SamplerPair>,
    pub seeds: Vec<i64>,
    pub width: i32,
    pub height: i32,
}

impl SampleGrid {
    /// Number of parameter combinations per checkpoint, or `None` if the
    /// product does not fit in a `usize`.
    pub fn combinations(&self) -> Option<usize> {
        [
            self.steps.len(),
            self.cfgs.len(),
            self.sampler_pairs.len(),
            self.seeds.len(),
        ]
        .into_iter()
        .try_fold(self.prompts.len(), usize::checked_mul)
    }
}

/* --------------------------------------------------------------------------
   Validation functions
   -------------------------------------------------------------------------- */

/// Validate a preset name: non-empty after trimming and within length limits.
pub fn validate_preset_name(name: &str) -> Result<(), CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Preset name must not be empty".into()));
    }
    if trimmed.len() > MAX_PRESET_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Preset name exceeds maximum length of {MAX_PRESET_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate every list of a grid and its image dimensions.
///
/// Rejects empty lists, duplicate or blank prompt names, non-positive step
/// counts and CFG values, blank sampler/scheduler names, and dimensions that
/// are not positive multiples of [`DIMENSION_MULTIPLE`].
pub fn validate_grid(grid: &SampleGrid) -> Result<(), CoreError> {
    require_non_empty("prompts", grid.prompts.len())?;
    require_non_empty("steps", grid.steps.len())?;
    require_non_empty("cfgs", grid.cfgs.len())?;
    require_non_empty("sampler_pairs", grid.sampler_pairs.len())?;
    require_non_empty("seeds", grid.seeds.len())?;

    let mut seen = std::collections::HashSet::new();
    for prompt in &grid.prompts {
        let name = prompt.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("Prompt names must not be empty".into()));
        }
        if name.len() > MAX_PROMPT_NAME_LEN {
            return Err(CoreError::Validation(format!(
                "Prompt name '{name}' exceeds {MAX_PROMPT_NAME_LEN} characters"
            )));
        }
        if !seen.insert(name) {
            return Err(CoreError::Validation(format!(
                "Duplicate prompt name '{name}'"
            )));
        }
    }

    if let Some(steps) = grid.steps.iter().find(|s| **s <= 0) {
        return Err(CoreError::Validation(format!(
            "Step count must be positive, got {steps}"
        )));
    }
    if let Some(cfg) = grid.cfgs.iter().find(|c| !c.is_finite() || **c <= 0.0) {
        return Err(CoreError::Validation(format!(
            "CFG must be a positive number, got {cfg}"
        )));
    }
    if grid
        .sampler_pairs
        .iter()
        .any(|p| p.sampler.trim().is_empty() || p.scheduler.trim().is_empty())
    {
        return Err(CoreError::Validation(
            "Sampler and scheduler names must not be empty".into(),
        ));
    }

    validate_dimension("width", grid.width)?;
    validate_dimension("height", grid.height)?;
    Ok(())
}

fn require_non_empty(field: &str, len: usize) -> Result<(), CoreError> {
    if len == 0 {
        Err(CoreError::Validation(format!(
            "Preset field '{field}' must contain at least one value"
        )))
    } else {
        Ok(())
    }
}

fn validate_dimension(field: &str, value: i32) -> Result<(), CoreError> {
    if value <= 0 || value > MAX_DIMENSION || value % DIMENSION_MULTIPLE != 0 {
        return Err(CoreError::Validation(format!(
            "{field} must be a positive multiple of {DIMENSION_MULTIPLE} up to {MAX_DIMENSION}, got {value}"
        )));
    }
    Ok(())
}
