//! Sample job service: the control operations behind the HTTP API.
//!
//! Creation validates the request, expands the preset grid and persists the
//! job with its items in one transaction. The lifecycle calls check the
//! job's status, then hand the job to the [`JobRunner`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sampler_comfyui::generation::GenerationClient;
use sampler_comfyui::workflow::{WorkflowError, WorkflowTemplate};
use sampler_core::checkpoints::{
    discover_training_runs, find_training_run, CheckpointFile, TrainingRun,
};
use sampler_core::error::CoreError;
use sampler_core::expansion::{expand, expected_item_count, ResolvedCheckpoint};
use sampler_core::naming::{clear_checkpoint_outputs, ExistingOutputs};
use sampler_core::preset::{validate_grid, SampleGrid};
use sampler_core::types::DbId;
use sampler_db::models::sample_job::{
    CreateSampleJob, NewSampleJob, NewSampleJobItem, SampleJob, SampleJobItemView, SampleJobView,
};
use sampler_db::models::status::{SampleJobItemStatus, SampleJobStatus};
use serde::Serialize;

use crate::progress::{aggregate, JobProgress};
use crate::publisher::ProgressPublisher;
use crate::runner::JobRunner;
use crate::store::SampleJobStore;

/// Largest job a single request may create.
pub const MAX_JOB_ITEMS: usize = 100_000;

/// Message returned when the engine health check fails. The cause is only
/// logged.
pub const ENGINE_UNAVAILABLE: &str = "Generation engine unavailable";

/// Filesystem locations the service reads and writes.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root scanned for training run checkpoints.
    pub checkpoint_dir: PathBuf,
    /// Directory holding the workflow templates.
    pub workflow_dir: PathBuf,
    /// Root of the engine's sample output folder.
    pub output_dir: PathBuf,
}

/// A job with its items and derived progress.
#[derive(Debug, Clone, Serialize)]
pub struct SampleJobDetail {
    pub job: SampleJobView,
    pub progress: JobProgress,
    pub items: Vec<SampleJobItemView>,
}

pub struct JobService {
    store: Arc<dyn SampleJobStore>,
    client: Arc<dyn GenerationClient>,
    runner: Arc<JobRunner>,
    publisher: ProgressPublisher,
    config: ServiceConfig,
}

impl JobService {
    pub fn new(
        store: Arc<dyn SampleJobStore>,
        client: Arc<dyn GenerationClient>,
        runner: Arc<JobRunner>,
        publisher: ProgressPublisher,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            client,
            runner,
            publisher,
            config,
        }
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    /// Validate `input`, expand its items and persist the job as `pending`.
    pub async fn create(&self, input: CreateSampleJob) -> Result<SampleJob, CoreError> {
        let training_run_name = input.training_run_name.trim().to_string();
        if training_run_name.is_empty() {
            return Err(CoreError::Validation("Training run name is required".into()));
        }

        let preset = self
            .store
            .find_preset(input.preset_id)
            .await?
            .ok_or_else(|| CoreError::not_found("SamplePreset", input.preset_id))?;
        let grid = preset.grid();
        validate_grid(&grid)?;

        let prepared = {
            let config = self.config.clone();
            let run_name = training_run_name.clone();
            let request = input.clone();
            let grid = grid.clone();
            tokio::task::spawn_blocking(move || prepare_job(&config, &run_name, &request, &grid))
                .await
                .map_err(|e| CoreError::Internal(format!("Sample job preparation panicked: {e}")))??
        };

        let checkpoints = self.resolve_model_paths(&prepared.checkpoints).await;

        let mut items = Vec::with_capacity(prepared.item_count);
        for item in expand(&grid, &checkpoints) {
            let existing = prepared
                .existing
                .get(&item.checkpoint_filename)
                .and_then(|outputs| outputs.find(&item));
            items.push(match existing {
                Some(path) => NewSampleJobItem {
                    item,
                    status: SampleJobItemStatus::Skipped,
                    output_path: Some(relative_to(&path, &self.config.output_dir)),
                },
                None => NewSampleJobItem {
                    item,
                    status: SampleJobItemStatus::Pending,
                    output_path: None,
                },
            });
        }
        let skipped = items
            .iter()
            .filter(|i| i.status == SampleJobItemStatus::Skipped)
            .count();

        let new_job = NewSampleJob {
            training_run_name,
            preset_id: preset.id,
            workflow_name: prepared.template.name().to_string(),
            vae: input.vae,
            clip: input.clip,
            shift: input.shift,
        };
        let job = self.store.create_job(&new_job, &items).await?;

        tracing::info!(
            job_id = job.id,
            training_run = %job.training_run_name,
            total_items = job.total_items,
            skipped,
            "Sample job created",
        );
        self.publish(job.id).await;
        Ok(job)
    }

    /// Resolve each checkpoint against the engine's model list.
    ///
    /// Falls back to the bare filename when the engine is unreachable or
    /// does not list the checkpoint.
    async fn resolve_model_paths(&self, selected: &[CheckpointFile]) -> Vec<ResolvedCheckpoint> {
        let engine_models = match self.client.list_checkpoints().await {
            Ok(models) => Some(models),
            Err(e) => {
                tracing::warn!(error = %e, "Engine checkpoint list unavailable, using file names");
                None
            }
        };

        selected
            .iter()
            .map(|checkpoint| {
                let listed = engine_models.as_ref().and_then(|models| {
                    models
                        .iter()
                        .find(|model| model_file_name(model) == checkpoint.filename)
                });
                let model_path = match listed {
                    Some(path) => path.clone(),
                    None => {
                        if engine_models.is_some() {
                            tracing::warn!(
                                checkpoint = %checkpoint.filename,
                                "Checkpoint not listed by the engine, using its file name",
                            );
                        }
                        checkpoint.filename.clone()
                    }
                };
                ResolvedCheckpoint {
                    filename: checkpoint.filename.clone(),
                    model_path,
                }
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// `pending -> running`.
    pub async fn start(&self, id: DbId) -> Result<SampleJob, CoreError> {
        self.launch(id, SampleJobStatus::Pending, "start").await
    }

    /// `paused -> running`, continuing from the first pending item.
    pub async fn resume(&self, id: DbId) -> Result<SampleJob, CoreError> {
        self.launch(id, SampleJobStatus::Paused, "resume").await
    }

    async fn launch(
        &self,
        id: DbId,
        from: SampleJobStatus,
        action: &str,
    ) -> Result<SampleJob, CoreError> {
        let job = self.find(id).await?;
        if job.status() != from {
            return Err(CoreError::InvalidState(format!(
                "Cannot {action} a {} sample job",
                job.status()
            )));
        }

        self.client.health_check().await.map_err(|e| {
            tracing::warn!(job_id = id, error = %e, "Engine health check failed");
            CoreError::ServiceUnavailable(ENGINE_UNAVAILABLE.into())
        })?;

        self.runner.launch(id, from).await?;
        self.find(id).await
    }

    /// Pause a running job after its in-flight item.
    ///
    /// A job left `running` by a previous process has no live run; its
    /// `running` items go back to `pending` and the job is paused directly.
    pub async fn stop(&self, id: DbId) -> Result<SampleJob, CoreError> {
        let job = self.find(id).await?;
        if job.status() != SampleJobStatus::Running {
            return Err(CoreError::InvalidState(format!(
                "Cannot stop a {} sample job",
                job.status()
            )));
        }

        if !self.runner.request_stop(id).await {
            let reset = self.store.reset_running_items(id).await?;
            let paused = self
                .store
                .transition_job(id, SampleJobStatus::Running, SampleJobStatus::Paused)
                .await?;
            if !paused {
                return Err(CoreError::InvalidState(format!(
                    "Sample job {id} is no longer running"
                )));
            }
            tracing::warn!(job_id = id, reset, "Paused sample job with no active run");
            self.publish(id).await;
        }
        self.find(id).await
    }

    /// Delete a job and its items. The live run cannot be deleted.
    pub async fn delete(&self, id: DbId) -> Result<(), CoreError> {
        self.find(id).await?;
        if self.runner.is_live(id).await {
            return Err(CoreError::InvalidState(format!(
                "Sample job {id} is running; stop it before deleting"
            )));
        }
        if !self.store.delete_job(id).await? {
            return Err(CoreError::not_found("SampleJob", id));
        }
        tracing::info!(job_id = id, "Sample job deleted");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub async fn show(&self, id: DbId) -> Result<SampleJobDetail, CoreError> {
        let job = self.find(id).await?;
        let items = self.store.list_items(id).await?;
        Ok(SampleJobDetail {
            progress: aggregate(&items),
            job: job.into(),
            items: items.into_iter().map(SampleJobItemView::from).collect(),
        })
    }

    /// Every job, newest first.
    pub async fn list(&self) -> Result<Vec<SampleJob>, CoreError> {
        Ok(self.store.list_jobs().await?)
    }

    pub fn training_runs(&self) -> Result<Vec<TrainingRun>, CoreError> {
        discover_training_runs(&self.config.checkpoint_dir)
    }

    /// Report jobs persisted as `running` that have no live run.
    ///
    /// They are left as they are; `stop` followed by `resume` continues
    /// them.
    pub async fn log_orphaned_runs(&self) -> Result<Vec<DbId>, CoreError> {
        let mut orphaned = Vec::new();
        for job in self.store.list_jobs_by_status(SampleJobStatus::Running).await? {
            if self.runner.is_live(job.id).await {
                continue;
            }
            tracing::warn!(
                job_id = job.id,
                training_run = %job.training_run_name,
                completed_items = job.completed_items,
                total_items = job.total_items,
                "Sample job was running when the service stopped; stop and resume it to continue",
            );
            orphaned.push(job.id);
        }
        Ok(orphaned)
    }

    async fn find(&self, id: DbId) -> Result<SampleJob, CoreError> {
        self.store
            .find_job(id)
            .await?
            .ok_or_else(|| CoreError::not_found("SampleJob", id))
    }

    async fn publish(&self, id: DbId) {
        if let Err(e) = self.publisher.publish_job(self.store.as_ref(), id).await {
            tracing::warn!(job_id = id, error = %e, "Failed to publish progress");
        }
    }
}

/// Filesystem state a new job is built from.
struct PreparedJob {
    checkpoints: Vec<CheckpointFile>,
    template: WorkflowTemplate,
    item_count: usize,
    /// Outputs already on disk, per checkpoint file name. Empty when the
    /// request clears existing outputs.
    existing: HashMap<String, ExistingOutputs>,
}

/// The filesystem half of job creation: run lookup, checkpoint selection,
/// workflow checks, then clearing or indexing existing outputs.
///
/// Blocking; runs on the blocking thread pool.
fn prepare_job(
    config: &ServiceConfig,
    run_name: &str,
    input: &CreateSampleJob,
    grid: &SampleGrid,
) -> Result<PreparedJob, CoreError> {
    let run = find_training_run(&config.checkpoint_dir, run_name)?
        .ok_or_else(|| CoreError::not_found("TrainingRun", run_name))?;
    let selected = select_checkpoints(&run, input.checkpoints.as_deref())?;

    let item_count = expected_item_count(grid, selected.len())?;
    if item_count > MAX_JOB_ITEMS {
        return Err(CoreError::Validation(format!(
            "Job would contain {item_count} items; the limit is {MAX_JOB_ITEMS}"
        )));
    }

    let template =
        WorkflowTemplate::load(&config.workflow_dir, &input.workflow_name).map_err(workflow_error)?;
    template
        .check_options(input.vae.as_deref(), input.clip.as_deref(), input.shift)
        .map_err(workflow_error)?;

    let mut existing = HashMap::new();
    for checkpoint in &selected {
        if input.clear_existing {
            let removed =
                clear_checkpoint_outputs(&config.output_dir, run_name, &checkpoint.filename)
                    .map_err(|e| {
                        CoreError::Internal(format!(
                            "Failed to clear outputs of {}: {e}",
                            checkpoint.filename
                        ))
                    })?;
            if removed {
                tracing::info!(
                    training_run = %run_name,
                    checkpoint = %checkpoint.filename,
                    "Cleared existing sample outputs",
                );
            }
        } else {
            let outputs = ExistingOutputs::scan(&config.output_dir, run_name, &checkpoint.filename)
                .map_err(|e| {
                    CoreError::Internal(format!(
                        "Failed to scan outputs of {}: {e}",
                        checkpoint.filename
                    ))
                })?;
            existing.insert(checkpoint.filename.clone(), outputs);
        }
    }

    Ok(PreparedJob {
        checkpoints: selected.into_iter().cloned().collect(),
        template,
        item_count,
        existing,
    })
}

/// Pick the requested checkpoints in run order, or all of them.
fn select_checkpoints<'a>(
    run: &'a TrainingRun,
    requested: Option<&[String]>,
) -> Result<Vec<&'a CheckpointFile>, CoreError> {
    let selected: Vec<&CheckpointFile> = match requested {
        None => run.checkpoints.iter().collect(),
        Some(names) => {
            if let Some(unknown) = names.iter().find(|name| run.checkpoint(name).is_none()) {
                return Err(CoreError::Validation(format!(
                    "Checkpoint '{unknown}' is not part of training run '{}'",
                    run.name
                )));
            }
            run.checkpoints
                .iter()
                .filter(|c| names.contains(&c.filename))
                .collect()
        }
    };
    if selected.is_empty() {
        return Err(CoreError::Validation("No checkpoints selected".into()));
    }
    Ok(selected)
}

fn workflow_error(e: WorkflowError) -> CoreError {
    match e {
        WorkflowError::Io { .. } => CoreError::Internal(e.to_string()),
        other => CoreError::Validation(other.to_string()),
    }
}

/// Last path segment of an engine model name, which may use either separator.
fn model_file_name(model: &str) -> &str {
    model.rsplit(['/', '\\']).next().unwrap_or(model)
}

fn relative_to(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
