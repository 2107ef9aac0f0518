//! Job runner: the execution loop and the single run slot.
//!
//! [`JobRunner`] owns one slot. Launching a job moves it to `running`
//! and spawns a task that takes the job's `pending` items in execution
//! order and drives each through the [`GenerationClient`]:
//!
//! 1. mark the item `running`
//! 2. materialize the workflow and submit it
//! 3. wait for the outputs under the per-item timeout
//! 4. record `completed` or `failed`, then publish progress
//!
//! Transient failures (engine busy, network errors, timeouts) are retried
//! with exponential backoff up to `max_attempts` submissions. Any other
//! failure fails the item and the run moves on, except an unreachable
//! engine, which fails the whole job.
//!
//! A stop request cancels the run's token. The token is only checked
//! between items, so the in-flight item always reaches a terminal state
//! before the job becomes `paused`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sampler_comfyui::generation::{
    GeneratedImage, GenerationClient, GenerationError, GenerationRequest,
};
use sampler_comfyui::reconnect::BackoffConfig;
use sampler_comfyui::workflow::{WorkflowInputs, WorkflowTemplate};
use sampler_core::error::CoreError;
use sampler_core::naming::sample_filename_prefix;
use sampler_core::types::DbId;
use sampler_db::models::sample_job::{SampleJob, SampleJobItem};
use sampler_db::models::status::SampleJobStatus;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::publisher::ProgressPublisher;
use crate::store::{SampleJobStore, StoreResult};

/// Execution settings for the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory holding the workflow templates.
    pub workflow_dir: PathBuf,
    /// Upper bound on waiting for one submission's result.
    pub item_timeout: Duration,
    /// Submissions per item before a transient failure becomes final.
    pub max_attempts: u32,
    /// Delay between retries of the same item.
    pub retry_backoff: BackoffConfig,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Paused,
    Failed,
    /// The job row disappeared.
    Vanished,
}

#[derive(Debug)]
enum ItemOutcome {
    Completed,
    Failed,
    /// Another writer moved the item out of `pending`.
    NotClaimed,
    EngineUnreachable(String),
}

struct RunContext {
    store: Arc<dyn SampleJobStore>,
    client: Arc<dyn GenerationClient>,
    publisher: ProgressPublisher,
    config: RunnerConfig,
}

struct ActiveRun {
    job_id: DbId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveRun {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Runs at most one sample job at a time.
pub struct JobRunner {
    ctx: Arc<RunContext>,
    slot: Mutex<Option<ActiveRun>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn SampleJobStore>,
        client: Arc<dyn GenerationClient>,
        publisher: ProgressPublisher,
        mut config: RunnerConfig,
    ) -> Self {
        config.max_attempts = config.max_attempts.max(1);
        Self {
            ctx: Arc::new(RunContext {
                store,
                client,
                publisher,
                config,
            }),
            slot: Mutex::new(None),
        }
    }

    /// Move a job from `from` to `running` and start its execution loop.
    ///
    /// Fails with `invalid_state` while the slot holds a live run, or if
    /// the job is no longer in `from`.
    pub async fn launch(&self, job_id: DbId, from: SampleJobStatus) -> Result<(), CoreError> {
        let mut slot = self.slot.lock().await;
        if let Some(run) = slot.as_ref().filter(|run| run.is_live()) {
            // A run whose job already left `running` is only publishing its
            // final progress; it no longer holds the slot.
            if self.job_is_running(run.job_id).await? {
                return Err(CoreError::InvalidState(if run.job_id == job_id {
                    format!("Sample job {job_id} is already running")
                } else {
                    format!(
                        "Sample job {} is running; only one job runs at a time",
                        run.job_id
                    )
                }));
            }
            tracing::debug!(job_id = run.job_id, "Previous run is finishing, releasing the slot");
        }

        if !self
            .ctx
            .store
            .transition_job(job_id, from, SampleJobStatus::Running)
            .await?
        {
            return Err(CoreError::InvalidState(format!(
                "Sample job {job_id} is no longer {from}"
            )));
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_job(Arc::clone(&self.ctx), job_id, cancel.clone()));
        *slot = Some(ActiveRun {
            job_id,
            cancel,
            handle,
        });

        tracing::info!(job_id, from = %from, "Sample job run started");
        Ok(())
    }

    async fn job_is_running(&self, job_id: DbId) -> Result<bool, CoreError> {
        Ok(self
            .ctx
            .store
            .find_job(job_id)
            .await?
            .is_some_and(|job| job.status() == SampleJobStatus::Running))
    }

    /// Ask the live run of `job_id` to pause at the next item boundary.
    ///
    /// Returns `false` if `job_id` has no live run in this process.
    pub async fn request_stop(&self, job_id: DbId) -> bool {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(run) if run.job_id == job_id && run.is_live() => {
                run.cancel.cancel();
                tracing::info!(job_id, "Stop requested, pausing after the current item");
                true
            }
            _ => false,
        }
    }

    /// Whether `job_id` has a live run in this process.
    pub async fn is_live(&self, job_id: DbId) -> bool {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .is_some_and(|run| run.job_id == job_id && run.is_live())
    }

    /// The job holding the slot, if its run is live.
    pub async fn active_job(&self) -> Option<DbId> {
        let slot = self.slot.lock().await;
        slot.as_ref().filter(|run| run.is_live()).map(|run| run.job_id)
    }

    /// Stop the live run, waiting up to `grace` for its item to finish.
    ///
    /// A run still mid-item after `grace` leaves its job `running`; it is
    /// reported as orphaned on the next start.
    pub async fn shutdown(&self, grace: Duration) {
        let Some(run) = self.slot.lock().await.take() else {
            return;
        };
        if !run.is_live() {
            return;
        }
        run.cancel.cancel();
        if tokio::time::timeout(grace, run.handle).await.is_err() {
            tracing::warn!(
                job_id = run.job_id,
                "Sample job still mid-item at shutdown; it stays running"
            );
        }
    }
}

/* --------------------------------------------------------------------------
   Execution loop
   -------------------------------------------------------------------------- */

async fn run_job(ctx: Arc<RunContext>, job_id: DbId, cancel: CancellationToken) {
    let outcome = match drive(&ctx, job_id, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(job_id, error = %e, "Sample job run aborted");
            if let Err(e) = ctx
                .store
                .fail_job(job_id, &format!("internal error: {e}"))
                .await
            {
                tracing::error!(job_id, error = %e, "Failed to mark sample job failed");
            }
            RunOutcome::Failed
        }
    };

    if let Err(e) = ctx.publisher.publish_job(ctx.store.as_ref(), job_id).await {
        tracing::warn!(job_id, error = %e, "Failed to publish final progress");
    }
    tracing::info!(job_id, ?outcome, "Sample job run finished");
}

async fn drive(
    ctx: &RunContext,
    job_id: DbId,
    cancel: &CancellationToken,
) -> StoreResult<RunOutcome> {
    let Some(job) = ctx.store.find_job(job_id).await? else {
        return Ok(RunOutcome::Vanished);
    };
    ctx.publisher.publish_job(ctx.store.as_ref(), job_id).await?;

    let template = match load_template(&ctx.config.workflow_dir, &job.workflow_name).await {
        Ok(template) => template,
        Err(reason) => {
            tracing::error!(job_id, error = %reason, "Workflow unavailable");
            ctx.store
                .fail_job(job_id, &format!("workflow unavailable: {reason}"))
                .await?;
            return Ok(RunOutcome::Failed);
        }
    };

    loop {
        let Some(item) = ctx.store.next_pending_item(job_id).await? else {
            let moved = ctx
                .store
                .transition_job(job_id, SampleJobStatus::Running, SampleJobStatus::Completed)
                .await?;
            if !moved {
                tracing::warn!(job_id, "Sample job left running state before completion");
            }
            return Ok(RunOutcome::Completed);
        };

        if cancel.is_cancelled() {
            ctx.store
                .transition_job(job_id, SampleJobStatus::Running, SampleJobStatus::Paused)
                .await?;
            tracing::info!(job_id, next_item = item.id, "Sample job paused");
            return Ok(RunOutcome::Paused);
        }

        if let ItemOutcome::EngineUnreachable(reason) =
            execute_item(ctx, &job, &template, &item).await?
        {
            ctx.store.fail_job(job_id, &reason).await?;
            tracing::error!(job_id, item_id = item.id, reason = %reason, "Sample job failed");
            return Ok(RunOutcome::Failed);
        }
        ctx.publisher.publish_job(ctx.store.as_ref(), job_id).await?;
    }
}

/// Read the job's workflow template on the blocking pool.
async fn load_template(dir: &Path, name: &str) -> Result<WorkflowTemplate, String> {
    let (dir, name) = (dir.to_path_buf(), name.to_string());
    match tokio::task::spawn_blocking(move || WorkflowTemplate::load(&dir, &name)).await {
        Ok(loaded) => loaded.map_err(|e| e.to_string()),
        Err(e) => Err(format!("template load panicked: {e}")),
    }
}

async fn execute_item(
    ctx: &RunContext,
    job: &SampleJob,
    template: &WorkflowTemplate,
    item: &SampleJobItem,
) -> StoreResult<ItemOutcome> {
    if !ctx.store.mark_item_running(item.id).await? {
        tracing::warn!(job_id = job.id, item_id = item.id, "Item no longer pending");
        return Ok(ItemOutcome::NotClaimed);
    }
    ctx.publisher.publish_job(ctx.store.as_ref(), job.id).await?;

    let work = item.work_item();
    let filename_prefix = sample_filename_prefix(&job.training_run_name, &work);
    let request = GenerationRequest {
        workflow: template.materialize(&WorkflowInputs {
            item: &work,
            filename_prefix: &filename_prefix,
            vae: job.vae.as_deref(),
            clip: job.clip.as_deref(),
            shift: job.shift,
        }),
        filename_prefix: filename_prefix.clone(),
    };

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let error = match generate(ctx, item.id, &request).await? {
            Ok(images) => match images.first() {
                Some(image) => {
                    let output_path = image.relative_path();
                    ctx.store.complete_item(item.id, &output_path).await?;
                    tracing::info!(
                        job_id = job.id,
                        item_id = item.id,
                        attempt,
                        output_path = %output_path,
                        "Sample generated",
                    );
                    return Ok(ItemOutcome::Completed);
                }
                None => GenerationError::Protocol("engine returned no output images".into()),
            },
            Err(e) => e,
        };

        if error.is_unreachable() {
            let reason = error.to_string();
            ctx.store.fail_item(item.id, &reason).await?;
            return Ok(ItemOutcome::EngineUnreachable(reason));
        }

        if error.is_transient() && attempt < ctx.config.max_attempts {
            let delay = ctx.config.retry_backoff.delay_for(attempt);
            tracing::warn!(
                job_id = job.id,
                item_id = item.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient generation failure, retrying",
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        tracing::warn!(
            job_id = job.id,
            item_id = item.id,
            attempt,
            error = %error,
            "Sample item failed",
        );
        ctx.store.fail_item(item.id, &error.to_string()).await?;
        return Ok(ItemOutcome::Failed);
    }
}

/// One submission: submit, record the prompt id, await under the timeout.
async fn generate(
    ctx: &RunContext,
    item_id: DbId,
    request: &GenerationRequest,
) -> StoreResult<Result<Vec<GeneratedImage>, GenerationError>> {
    let prompt_id = match ctx.client.submit(request).await {
        Ok(prompt_id) => prompt_id,
        Err(e) => return Ok(Err(e)),
    };
    ctx.store.record_submission(item_id, &prompt_id).await?;

    let timeout = ctx.config.item_timeout;
    match tokio::time::timeout(timeout, ctx.client.await_result(&prompt_id)).await {
        Ok(result) => Ok(result),
        Err(_) => {
            if let Err(e) = ctx.client.cancel(&prompt_id).await {
                tracing::debug!(
                    item_id,
                    prompt_id = %prompt_id,
                    error = %e,
                    "Cancel after timeout failed"
                );
            }
            Ok(Err(GenerationError::Timeout(format!(
                "no result for prompt {prompt_id} after {}s",
                timeout.as_secs_f64()
            ))))
        }
    }
}
