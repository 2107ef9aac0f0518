#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tempfile::TempDir;
use tower::ServiceExt;

use sampler_api::config::{SamplerConfig, ServerConfig};
use sampler_api::router::build_app_router;
use sampler_api::state::AppState;
use sampler_api::ws::WsManager;
use sampler_comfyui::generation::{
    GeneratedImage, GenerationClient, GenerationError, GenerationRequest,
};
use sampler_core::preset::{NamedPrompt, SampleGrid, SamplerPair};
use sampler_core::types::DbId;
use sampler_db::models::sample_preset::CreateSamplePreset;
use sampler_db::repositories::SamplePresetRepo;
use sampler_events::EventBus;
use sampler_pipeline::publisher::ProgressPublisher;
use sampler_pipeline::runner::JobRunner;
use sampler_pipeline::service::JobService;
use sampler_pipeline::store::{PgSampleJobStore, SampleJobStore};

pub const RUN: &str = "lora";
pub const CHECKPOINTS: [&str; 2] = ["lora-000100.safetensors", "lora-000200.safetensors"];

/// A generation engine that is never reachable.
pub struct OfflineEngine;

#[async_trait]
impl GenerationClient for OfflineEngine {
    async fn health_check(&self) -> Result<(), GenerationError> {
        Err(GenerationError::Unreachable("connection refused".into()))
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, GenerationError> {
        Err(GenerationError::Unreachable("connection refused".into()))
    }

    async fn submit(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Unreachable("connection refused".into()))
    }

    async fn await_result(&self, _prompt_id: &str) -> Result<Vec<GeneratedImage>, GenerationError> {
        Err(GenerationError::Unreachable("connection refused".into()))
    }
}

/// Build a test `ServerConfig` whose directories live under `root`.
pub fn test_config(root: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        sampler: SamplerConfig {
            comfyui_url: "http://127.0.0.1:1".into(),
            comfyui_ws_url: "ws://127.0.0.1:1".into(),
            checkpoint_dir: root.path().join("checkpoints"),
            workflow_dir: root.path().join("workflows"),
            output_dir: root.path().join("output"),
            item_timeout_secs: 5,
            item_max_attempts: 3,
            item_retry_initial_delay_ms: 1,
            history_poll_interval_ms: 50,
        },
    }
}

/// The app under test plus the directories it reads.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub root: TempDir,
}

/// Build the full application router over `pool` with one training run
/// (two checkpoints) and an `sdxl` workflow on disk.
pub fn build_test_app(pool: PgPool) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(&root);

    let run_dir = config.sampler.checkpoint_dir.join(RUN);
    std::fs::create_dir_all(&run_dir).unwrap();
    for checkpoint in CHECKPOINTS {
        std::fs::write(run_dir.join(checkpoint), b"").unwrap();
    }
    std::fs::create_dir_all(&config.sampler.workflow_dir).unwrap();
    std::fs::write(
        config.sampler.workflow_dir.join("sdxl.json"),
        sdxl_workflow().to_string(),
    )
    .unwrap();

    let event_bus = Arc::new(EventBus::default());
    let store: Arc<dyn SampleJobStore> = Arc::new(PgSampleJobStore::new(pool.clone()));
    let client: Arc<dyn GenerationClient> = Arc::new(OfflineEngine);
    let publisher = ProgressPublisher::new(Arc::clone(&event_bus));
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&store),
        Arc::clone(&client),
        publisher.clone(),
        config.sampler.runner_config(),
    ));
    let jobs = Arc::new(JobService::new(
        store,
        client,
        runner,
        publisher,
        config.sampler.service_config(),
    ));

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        ws_manager: Arc::new(WsManager::new()),
        jobs,
        event_bus,
    };

    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        root,
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

/// Insert a preset with two step counts: two items per checkpoint.
pub async fn create_preset(pool: &PgPool) -> DbId {
    let input = CreateSamplePreset {
        name: "Quick look".into(),
        grid: SampleGrid {
            prompts: vec![NamedPrompt {
                name: "portrait".into(),
                text: "a portrait photo".into(),
            }],
            negative_prompt: "blurry".into(),
            steps: vec![20, 30],
            cfgs: vec![7.0],
            sampler_pairs: vec![SamplerPair {
                sampler: "euler".into(),
                scheduler: "normal".into(),
            }],
            seeds: vec![42],
            width: 512,
            height: 512,
        },
    };
    SamplePresetRepo::create(pool, &input).await.unwrap().id
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
