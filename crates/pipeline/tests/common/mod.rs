//! Shared fixtures for the orchestration tests: an in-memory store, a
//! scripted generation client and a harness wiring them to a service.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use sampler_comfyui::generation::{
    GeneratedImage, GenerationClient, GenerationError, GenerationRequest,
};
use sampler_comfyui::reconnect::BackoffConfig;
use sampler_core::preset::{NamedPrompt, SampleGrid, SamplerPair};
use sampler_core::types::DbId;
use sampler_db::models::sample_job::{
    CreateSampleJob, NewSampleJob, NewSampleJobItem, SampleJob, SampleJobItem,
};
use sampler_db::models::sample_preset::SamplePreset;
use sampler_db::models::status::{SampleJobItemStatus, SampleJobStatus};
use sampler_events::EventBus;
use sampler_pipeline::publisher::ProgressPublisher;
use sampler_pipeline::runner::{JobRunner, RunnerConfig};
use sampler_pipeline::service::{JobService, ServiceConfig};
use sampler_pipeline::store::{SampleJobStore, StoreResult};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    next_id: DbId,
    presets: Vec<SamplePreset>,
    jobs: Vec<SampleJob>,
    items: Vec<SampleJobItem>,
}

impl State {
    fn id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn job_mut(&mut self, id: DbId) -> Option<&mut SampleJob> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    fn item_mut(&mut self, id: DbId) -> Option<&mut SampleJobItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }
}

/// [`SampleJobStore`] with the same transition guards as the SQL queries.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    paused_reads: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryStore {
    pub fn add_preset(&self, grid: SampleGrid) -> DbId {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        let now = Utc::now();
        state.presets.push(SamplePreset {
            id,
            name: format!("preset-{id}"),
            prompts: Json(grid.prompts),
            negative_prompt: grid.negative_prompt,
            steps: Json(grid.steps),
            cfgs: Json(grid.cfgs),
            sampler_pairs: Json(grid.sampler_pairs),
            seeds: Json(grid.seeds),
            width: grid.width,
            height: grid.height,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn job(&self, id: DbId) -> SampleJob {
        let state = self.state.lock().unwrap();
        state.jobs.iter().find(|j| j.id == id).cloned().unwrap()
    }

    pub fn items(&self, job_id: DbId) -> Vec<SampleJobItem> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<_> = state
            .items
            .iter()
            .filter(|i| i.job_id == job_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.sort_order);
        items
    }

    /// Hold item reads of paused jobs until a permit is added to the
    /// returned semaphore.
    pub fn hold_paused_reads(&self) -> Arc<Semaphore> {
        let hold = Arc::new(Semaphore::new(0));
        *self.paused_reads.lock().unwrap() = Some(Arc::clone(&hold));
        hold
    }

    fn is_paused(&self, job_id: DbId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .iter()
            .any(|j| j.id == job_id && j.status() == SampleJobStatus::Paused)
    }

    /// Force a job status, bypassing the transition guards.
    pub fn set_job_status(&self, id: DbId, status: SampleJobStatus) {
        let mut state = self.state.lock().unwrap();
        state.job_mut(id).unwrap().status_id = status.id();
    }

    /// Force an item status, bypassing the transition guards.
    pub fn set_item_status(&self, id: DbId, status: SampleJobItemStatus) {
        let mut state = self.state.lock().unwrap();
        let item = state.item_mut(id).unwrap();
        item.status_id = status.id();
        if status == SampleJobItemStatus::Running {
            item.started_at = Some(Utc::now());
        }
    }
}

#[async_trait]
impl SampleJobStore for MemoryStore {
    async fn find_preset(&self, id: DbId) -> StoreResult<Option<SamplePreset>> {
        let state = self.state.lock().unwrap();
        Ok(state.presets.iter().find(|p| p.id == id).cloned())
    }

    async fn create_job(
        &self,
        job: &NewSampleJob,
        items: &[NewSampleJobItem],
    ) -> StoreResult<SampleJob> {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        let now = Utc::now();
        let skipped = items
            .iter()
            .filter(|i| i.status == SampleJobItemStatus::Skipped)
            .count();
        let row = SampleJob {
            id,
            training_run_name: job.training_run_name.clone(),
            preset_id: job.preset_id,
            workflow_name: job.workflow_name.clone(),
            vae: job.vae.clone(),
            clip: job.clip.clone(),
            shift: job.shift,
            status_id: SampleJobStatus::Pending.id(),
            total_items: items.len() as i32,
            completed_items: skipped as i32,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.push(row.clone());

        for (sort_order, new) in items.iter().enumerate() {
            let item_id = state.id();
            let w = &new.item;
            state.items.push(SampleJobItem {
                id: item_id,
                job_id: id,
                sort_order: sort_order as i32,
                checkpoint_filename: w.checkpoint_filename.clone(),
                checkpoint_path: w.checkpoint_path.clone(),
                prompt_name: w.prompt_name.clone(),
                prompt_text: w.prompt_text.clone(),
                negative_prompt: w.negative_prompt.clone(),
                steps: w.steps,
                cfg: w.cfg,
                sampler_name: w.sampler_name.clone(),
                scheduler: w.scheduler.clone(),
                seed: w.seed,
                width: w.width,
                height: w.height,
                status_id: new.status.id(),
                comfyui_prompt_id: None,
                output_path: new.output_path.clone(),
                error_message: None,
                attempts: 0,
                started_at: None,
                completed_at: (new.status == SampleJobItemStatus::Skipped).then_some(now),
                created_at: now,
                updated_at: now,
            });
        }
        Ok(row)
    }

    async fn find_job(&self, id: DbId) -> StoreResult<Option<SampleJob>> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_jobs(&self) -> StoreResult<Vec<SampleJob>> {
        let state = self.state.lock().unwrap();
        let mut jobs = state.jobs.clone();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn list_jobs_by_status(&self, status: SampleJobStatus) -> StoreResult<Vec<SampleJob>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status_id == status.id())
            .cloned()
            .collect())
    }

    async fn transition_job(
        &self,
        id: DbId,
        from: SampleJobStatus,
        to: SampleJobStatus,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.job_mut(id) {
            Some(job) if job.status_id == from.id() => {
                job.status_id = to.id();
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_job(&self, id: DbId, error: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.job_mut(id) {
            Some(job) if !job.status().is_terminal() => {
                job.status_id = SampleJobStatus::Failed.id();
                job.error_message = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_job(&self, id: DbId) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.jobs.len();
        state.jobs.retain(|j| j.id != id);
        state.items.retain(|i| i.job_id != id);
        Ok(state.jobs.len() < before)
    }

    async fn list_items(&self, job_id: DbId) -> StoreResult<Vec<SampleJobItem>> {
        let hold = self.paused_reads.lock().unwrap().clone();
        if let Some(hold) = hold {
            if self.is_paused(job_id) {
                hold.acquire().await.unwrap().forget();
            }
        }
        Ok(self.items(job_id))
    }

    async fn next_pending_item(&self, job_id: DbId) -> StoreResult<Option<SampleJobItem>> {
        Ok(self
            .items(job_id)
            .into_iter()
            .find(|i| i.status() == SampleJobItemStatus::Pending))
    }

    async fn mark_item_running(&self, item_id: DbId) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.item_mut(item_id) {
            Some(item) if item.status() == SampleJobItemStatus::Pending => {
                item.status_id = SampleJobItemStatus::Running.id();
                item.started_at = Some(Utc::now());
                item.error_message = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_submission(&self, item_id: DbId, prompt_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.item_mut(item_id) {
            item.comfyui_prompt_id = Some(prompt_id.to_string());
            item.attempts += 1;
        }
        Ok(())
    }

    async fn complete_item(&self, item_id: DbId, output_path: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let job_id = match state.item_mut(item_id) {
            Some(item) if item.status() == SampleJobItemStatus::Running => {
                item.status_id = SampleJobItemStatus::Completed.id();
                item.output_path = Some(output_path.to_string());
                item.completed_at = Some(Utc::now());
                item.job_id
            }
            _ => return Ok(false),
        };
        if let Some(job) = state.job_mut(job_id) {
            job.completed_items += 1;
        }
        Ok(true)
    }

    async fn fail_item(&self, item_id: DbId, error: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.item_mut(item_id) {
            Some(item) if item.status() == SampleJobItemStatus::Running => {
                item.status_id = SampleJobItemStatus::Failed.id();
                item.error_message = Some(error.to_string());
                item.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_running_items(&self, job_id: DbId) -> StoreResult<u64> {
        let mut state = self.state.lock().unwrap();
        let mut reset = 0;
        for item in state.items.iter_mut().filter(|i| i.job_id == job_id) {
            if item.status() == SampleJobItemStatus::Running {
                item.status_id = SampleJobItemStatus::Pending.id();
                item.started_at = None;
                item.comfyui_prompt_id = None;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

// ---------------------------------------------------------------------------
// Scripted generation client
// ---------------------------------------------------------------------------

/// What the fake engine does with one submission.
#[derive(Debug, Clone)]
pub enum Step {
    /// Accept and produce one image.
    Ok,
    /// Refuse the submission itself.
    SubmitErr(GenerationError),
    /// Accept, then report a failure.
    ResultErr(GenerationError),
    /// Accept and never finish.
    Hang,
}

/// A [`GenerationClient`] replaying a script; `Step::Ok` once it runs out.
#[derive(Default)]
pub struct FakeClient {
    script: Mutex<VecDeque<Step>>,
    accepted: Mutex<HashMap<String, (Step, String)>>,
    prefixes: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    models: Mutex<Vec<String>>,
    unhealthy: AtomicBool,
    counter: AtomicU64,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeClient {
    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn set_models(&self, models: &[&str]) {
        *self.models.lock().unwrap() = models.iter().map(|m| m.to_string()).collect();
    }

    /// Hold every result until a permit is added to the returned semaphore.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Filename prefixes of accepted submissions, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.prefixes.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for FakeClient {
    async fn health_check(&self) -> Result<(), GenerationError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(GenerationError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, GenerationError> {
        Ok(self.models.lock().unwrap().clone())
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Ok);
        if let Step::SubmitErr(e) = step {
            return Err(e);
        }
        let prompt_id = format!("prompt-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.prefixes
            .lock()
            .unwrap()
            .push(request.filename_prefix.clone());
        self.accepted
            .lock()
            .unwrap()
            .insert(prompt_id.clone(), (step, request.filename_prefix.clone()));
        Ok(prompt_id)
    }

    async fn await_result(&self, prompt_id: &str) -> Result<Vec<GeneratedImage>, GenerationError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let Some((step, prefix)) = self.accepted.lock().unwrap().remove(prompt_id) else {
            return Err(GenerationError::Protocol(format!("unknown prompt {prompt_id}")));
        };
        match step {
            Step::ResultErr(e) => Err(e),
            Step::Hang => std::future::pending().await,
            _ => {
                let (subfolder, stem) = prefix.rsplit_once('/').unwrap_or(("", prefix.as_str()));
                Ok(vec![GeneratedImage {
                    filename: format!("{stem}_00001_.png"),
                    subfolder: subfolder.to_string(),
                }])
            }
        }
    }

    async fn cancel(&self, prompt_id: &str) -> Result<(), GenerationError> {
        self.cancelled.lock().unwrap().push(prompt_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const RUN: &str = "lora";
pub const WORKFLOW: &str = "sdxl";
pub const CHECKPOINTS: [&str; 2] = ["lora-000100.safetensors", "lora-000200.safetensors"];

/// Two prompts, one step count, one CFG, one sampler pair, two seeds:
/// four items per checkpoint.
pub fn grid() -> SampleGrid {
    SampleGrid {
        prompts: vec![
            NamedPrompt {
                name: "portrait".into(),
                text: "a portrait photo".into(),
            },
            NamedPrompt {
                name: "landscape".into(),
                text: "a mountain lake".into(),
            },
        ],
        negative_prompt: "blurry".into(),
        steps: vec![20],
        cfgs: vec![7.0],
        sampler_pairs: vec![SamplerPair {
            sampler: "euler".into(),
            scheduler: "normal".into(),
        }],
        seeds: vec![1, 2],
        width: 512,
        height: 512,
    }
}

pub fn sdxl_workflow() -> serde_json::Value {
    serde_json::json!({
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "base.safetensors"}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 1024, "height": 1024, "batch_size": 1}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "3": {"class_type": "KSampler", "inputs": {
            "seed": 0, "steps": 1, "cfg": 1.0, "sampler_name": "x", "scheduler": "y", "denoise": 1.0,
            "model": ["4", 0], "positive": ["6", 0], "negative": ["7", 0], "latent_image": ["5", 0]
        }},
        "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI", "images": ["8", 0]}}
    })
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub client: Arc<FakeClient>,
    pub bus: Arc<EventBus>,
    pub service: JobService,
    pub preset_id: DbId,
    root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(item_timeout: Duration) -> Self {
        let root = tempfile::tempdir().unwrap();
        let checkpoint_dir = root.path().join("checkpoints");
        let workflow_dir = root.path().join("workflows");
        let output_dir = root.path().join("output");

        std::fs::create_dir_all(checkpoint_dir.join(RUN)).unwrap();
        for checkpoint in CHECKPOINTS {
            std::fs::write(checkpoint_dir.join(RUN).join(checkpoint), b"").unwrap();
        }
        std::fs::create_dir_all(&workflow_dir).unwrap();
        std::fs::write(
            workflow_dir.join(format!("{WORKFLOW}.json")),
            sdxl_workflow().to_string(),
        )
        .unwrap();
        std::fs::create_dir_all(&output_dir).unwrap();

        let store = Arc::new(MemoryStore::default());
        let preset_id = store.add_preset(grid());
        let client = Arc::new(FakeClient::default());
        let bus = Arc::new(EventBus::default());
        let publisher = ProgressPublisher::new(Arc::clone(&bus));

        let runner = Arc::new(JobRunner::new(
            store.clone(),
            client.clone(),
            publisher.clone(),
            RunnerConfig {
                workflow_dir: workflow_dir.clone(),
                item_timeout,
                max_attempts: 3,
                retry_backoff: BackoffConfig {
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    multiplier: 2.0,
                },
            },
        ));
        let service = JobService::new(
            store.clone(),
            client.clone(),
            runner,
            publisher,
            ServiceConfig {
                checkpoint_dir,
                workflow_dir,
                output_dir,
            },
        );

        Self {
            store,
            client,
            bus,
            service,
            preset_id,
            root,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.path().join("output")
    }

    pub fn workflow_dir(&self) -> PathBuf {
        self.root.path().join("workflows")
    }

    pub fn request(&self) -> CreateSampleJob {
        CreateSampleJob {
            training_run_name: RUN.into(),
            preset_id: self.preset_id,
            workflow_name: WORKFLOW.into(),
            vae: None,
            clip: None,
            shift: None,
            checkpoints: None,
            clear_existing: false,
        }
    }

    pub async fn create_job(&self) -> SampleJob {
        self.service.create(self.request()).await.unwrap()
    }

    /// Poll until the job reaches `status`, failing after five seconds.
    pub async fn wait_for_status(&self, id: DbId, status: SampleJobStatus) -> SampleJob {
        self.wait_until(|s| s.job(id).status() == status).await;
        self.store.job(id)
    }

    /// Poll until `check` holds for the store, failing after five seconds.
    pub async fn wait_until(&self, check: impl Fn(&MemoryStore) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check(&self.store) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Write a file into `dir`, creating parents.
pub fn touch(dir: &Path, name: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), b"png").unwrap();
}
