//! Sample job and sample job item models and DTOs.

use sampler_core::expansion::WorkItem;
use sampler_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{SampleJobItemStatus, SampleJobStatus, StatusId};

/// A row from the `sample_jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct SampleJob {
    pub id: DbId,
    pub training_run_name: String,
    pub preset_id: DbId,
    pub workflow_name: String,
    pub vae: Option<String>,
    pub clip: Option<String>,
    pub shift: Option<f64>,
    pub status_id: StatusId,
    pub total_items: i32,
    pub completed_items: i32,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SampleJob {
    /// Typed view of `status_id`.
    ///
    /// The lookup table constrains the column, so an unknown id means the
    /// schema and the enum disagree; it is reported as `failed`.
    pub fn status(&self) -> SampleJobStatus {
        SampleJobStatus::from_id(self.status_id).unwrap_or(SampleJobStatus::Failed)
    }
}

/// A row from the `sample_job_items` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct SampleJobItem {
    pub id: DbId,
    pub job_id: DbId,
    pub sort_order: i32,
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
    pub status_id: StatusId,
    pub comfyui_prompt_id: Option<String>,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SampleJobItem {
    /// Typed view of `status_id`; unknown ids read as `failed`.
    pub fn status(&self) -> SampleJobItemStatus {
        SampleJobItemStatus::from_id(self.status_id).unwrap_or(SampleJobItemStatus::Failed)
    }

    /// The generation parameters of this item.
    pub fn work_item(&self) -> WorkItem {
        WorkItem {
            checkpoint_filename: self.checkpoint_filename.clone(),
            checkpoint_path: self.checkpoint_path.clone(),
            prompt_name: self.prompt_name.clone(),
            prompt_text: self.prompt_text.clone(),
            negative_prompt: self.negative_prompt.clone(),
            steps: self.steps,
            cfg: self.cfg,
            sampler_name: self.sampler_name.clone(),
            scheduler: self.scheduler.clone(),
            seed: self.seed,
            width: self.width,
            height: self.height,
        }
    }
}

/// DTO for creating a sample job via `POST /api/v1/sample-jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSampleJob {
    pub training_run_name: String,
    pub preset_id: DbId,
    pub workflow_name: String,
    pub vae: Option<String>,
    pub clip: Option<String>,
    /// Only for workflow families that take a sampling shift.
    pub shift: Option<f64>,
    /// Checkpoint file names; every checkpoint of the run when absent.
    pub checkpoints: Option<Vec<String>>,
    #[serde(default)]
    pub clear_existing: bool,
}

/// Job-level columns fixed at creation.
#[derive(Debug, Clone)]
pub struct NewSampleJob {
    pub training_run_name: String,
    pub preset_id: DbId,
    pub workflow_name: String,
    pub vae: Option<String>,
    pub clip: Option<String>,
    pub shift: Option<f64>,
}

/// An expanded work item ready for insertion.
///
/// Items whose output already exists are inserted as `skipped` with the
/// existing path recorded.
#[derive(Debug, Clone)]
pub struct NewSampleJobItem {
    pub item: WorkItem,
    pub status: SampleJobItemStatus,
    pub output_path: Option<String>,
}

/// API representation of a job: the row plus its status name.
#[derive(Debug, Clone, Serialize)]
pub struct SampleJobView {
    #[serde(flatten)]
    pub job: SampleJob,
    pub status: SampleJobStatus,
}

impl From<SampleJob> for SampleJobView {
    fn from(job: SampleJob) -> Self {
        let status = job.status();
        Self { job, status }
    }
}

/// API representation of an item: the row plus its status name.
#[derive(Debug, Clone, Serialize)]
pub struct SampleJobItemView {
    #[serde(flatten)]
    pub item: SampleJobItem,
    pub status: SampleJobItemStatus,
}

impl From<SampleJobItem> for SampleJobItemView {
    fn from(item: SampleJobItem) -> Self {
        let status = item.status();
        Self { item, status }
    }
}
