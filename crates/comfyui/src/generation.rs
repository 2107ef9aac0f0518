//! The generation client contract and its ComfyUI implementation.
//!
//! [`GenerationClient`] is what the job runner drives: submit a
//! materialized workflow, then wait for its outputs. Errors are classified
//! so the runner can tell a dead engine from a busy one and from a request
//! the engine refused.
//!
//! [`ComfyUIGenerationClient`] keeps one persistent WebSocket connection
//! (reconnecting with backoff) and answers `await_result` by racing the
//! pushed completion events against a `/history` poll, so a missed or
//! delayed WebSocket message never leaves a waiter stuck.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError, HistoryEntry};
use crate::client::ComfyUIClient;
use crate::events::ComfyUIEvent;
use crate::processor::process_messages;
use crate::reconnect::{reconnect_loop, BackoffConfig};

/// Broadcast channel capacity for ComfyUI events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for the connection task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/* --------------------------------------------------------------------------
   Contract
   -------------------------------------------------------------------------- */

/// A fully materialized generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The API-format graph to queue.
    pub workflow: serde_json::Value,
    /// The save node's filename prefix, for logging and correlation.
    pub filename_prefix: String,
}

/// An image written by the engine, relative to its output folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    pub filename: String,
    pub subfolder: String,
}

impl GeneratedImage {
    /// `subfolder/filename`, or the bare filename at the output root.
    pub fn relative_path(&self) -> String {
        if self.subfolder.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.subfolder.trim_end_matches('/'), self.filename)
        }
    }
}

/// Classified failure of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The engine cannot be contacted at all.
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    /// The engine is up but asked us to come back later.
    #[error("engine busy: {0}")]
    Busy(String),

    /// A request failed after a connection was made.
    #[error("network error: {0}")]
    Network(String),

    /// The engine refused the request (invalid parameters, node errors).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The engine ran the request and reported an error.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// No result arrived within the per-item timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The engine answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GenerationError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Network(_) | Self::Timeout(_))
    }

    /// Whether the engine itself is gone.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

impl From<ComfyUIApiError> for GenerationError {
    fn from(e: ComfyUIApiError) -> Self {
        if e.is_connect() {
            return Self::Unreachable(e.to_string());
        }
        match e {
            ComfyUIApiError::Request(e) if e.is_decode() => Self::Protocol(e.to_string()),
            ComfyUIApiError::Request(e) => Self::Network(e.to_string()),
            ComfyUIApiError::ApiError { status, body } => match status {
                429 | 503 => Self::Busy(format!("HTTP {status}")),
                400..=499 => Self::Rejected(body),
                _ => Self::Network(format!("HTTP {status}: {body}")),
            },
        }
    }
}

/// Adapter to an image-generation engine.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Succeeds when the engine answers.
    async fn health_check(&self) -> Result<(), GenerationError>;

    /// Checkpoint names known to the engine, relative to its model folder.
    async fn list_checkpoints(&self) -> Result<Vec<String>, GenerationError>;

    /// Queue a request; returns the engine's correlation id.
    async fn submit(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Wait until the prompt has finished and return its output images.
    ///
    /// Callers bound the wait with their own timeout.
    async fn await_result(&self, prompt_id: &str) -> Result<Vec<GeneratedImage>, GenerationError>;

    /// Best-effort removal of a prompt that is no longer awaited.
    async fn cancel(&self, _prompt_id: &str) -> Result<(), GenerationError> {
        Ok(())
    }
}

/* --------------------------------------------------------------------------
   ComfyUI implementation
   -------------------------------------------------------------------------- */

/// Connection settings for [`ComfyUIGenerationClient`].
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub ws_url: String,
    /// Interval of the `/history` fallback poll.
    pub history_poll_interval: Duration,
    pub reconnect: BackoffConfig,
}

/// [`GenerationClient`] backed by one ComfyUI instance.
pub struct ComfyUIGenerationClient {
    api: ComfyUIApi,
    client: Arc<ComfyUIClient>,
    event_tx: broadcast::Sender<ComfyUIEvent>,
    history_poll_interval: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ComfyUIGenerationClient {
    /// Create the client and spawn its WebSocket connection task.
    ///
    /// Returns immediately; the connection is established (and
    /// re-established) in the background.
    pub fn start(config: ComfyUIConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let client = Arc::new(ComfyUIClient::new(config.ws_url));

        let task = tokio::spawn({
            let client = Arc::clone(&client);
            let event_tx = event_tx.clone();
            let cancel = cancel.clone();
            let reconnect = config.reconnect;
            async move {
                tracing::info!(ws_url = %client.ws_url(), "Starting ComfyUI connection task");
                run_connection_loop(&client, &event_tx, &reconnect, &cancel).await;
                tracing::info!("ComfyUI connection task exited");
            }
        });

        Arc::new(Self {
            api: ComfyUIApi::new(config.api_url),
            client,
            event_tx,
            history_poll_interval: config.history_poll_interval,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Subscribe to interpreted ComfyUI events.
    pub fn subscribe(&self) -> broadcast::Receiver<ComfyUIEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the connection task, waiting briefly for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down ComfyUI client");
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }
    }

    /// Interpret a history entry: `None` while the prompt is unfinished.
    fn finished_outputs(
        entry: &HistoryEntry,
    ) -> Option<Result<Vec<GeneratedImage>, GenerationError>> {
        if let Some(error) = entry.error_message() {
            return Some(Err(GenerationError::ExecutionFailed(error)));
        }
        let images: Vec<GeneratedImage> = entry
            .output_images()
            .into_iter()
            .map(|image| GeneratedImage {
                filename: image.filename,
                subfolder: image.subfolder,
            })
            .collect();
        let completed = entry.status.as_ref().is_some_and(|s| s.completed);
        match (images.is_empty(), completed) {
            (false, _) => Some(Ok(images)),
            (true, true) => Some(Err(GenerationError::Protocol(
                "prompt finished without output images".into(),
            ))),
            (true, false) => None,
        }
    }

    async fn poll_history(
        &self,
        prompt_id: &str,
    ) -> Option<Result<Vec<GeneratedImage>, GenerationError>> {
        match self.api.get_history(prompt_id).await {
            Ok(Some(entry)) => Self::finished_outputs(&entry),
            Ok(None) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[async_trait]
impl GenerationClient for ComfyUIGenerationClient {
    async fn health_check(&self) -> Result<(), GenerationError> {
        self.api.system_stats().await?;
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, GenerationError> {
        Ok(self.api.list_checkpoints().await?)
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let response = self
            .api
            .submit_workflow(&request.workflow, self.client.client_id())
            .await?;
        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            filename_prefix = %request.filename_prefix,
            "Workflow submitted to ComfyUI",
        );
        Ok(response.prompt_id)
    }

    async fn await_result(&self, prompt_id: &str) -> Result<Vec<GeneratedImage>, GenerationError> {
        let mut events = self.event_tx.subscribe();
        let mut poll = tokio::time::interval(self.history_poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) if event.prompt_id() == Some(prompt_id) => match event {
                        ComfyUIEvent::Completed { .. } => {
                            // History may trail the completion message.
                            if let Some(result) = self.poll_history(prompt_id).await {
                                return result;
                            }
                        }
                        ComfyUIEvent::Failed { error, .. } => {
                            return Err(GenerationError::ExecutionFailed(error));
                        }
                        ComfyUIEvent::Interrupted { .. } => {
                            return Err(GenerationError::ExecutionFailed(
                                "execution interrupted".into(),
                            ));
                        }
                        _ => {}
                    },
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(
                            skipped,
                            prompt_id,
                            "Event receiver lagged, relying on history poll"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Sender lives as long as self; only reachable during teardown.
                        events = self.event_tx.subscribe();
                    }
                },
                _ = poll.tick() => {
                    if let Some(result) = self.poll_history(prompt_id).await {
                        return result;
                    }
                }
            }
        }
    }

    async fn cancel(&self, prompt_id: &str) -> Result<(), GenerationError> {
        self.api.cancel_execution(prompt_id).await?;
        self.api.interrupt().await?;
        Ok(())
    }
}

/// Connect, process messages until the socket drops, then reconnect.
///
/// Runs until the cancellation token is triggered.
async fn run_connection_loop(
    client: &ComfyUIClient,
    event_tx: &broadcast::Sender<ComfyUIEvent>,
    backoff: &BackoffConfig,
    cancel: &CancellationToken,
) {
    let mut next = tokio::select! {
        _ = cancel.cancelled() => return,
        result = client.connect() => match result {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!(error = %e, "Initial ComfyUI connection failed");
                None
            }
        },
    };

    loop {
        let conn = match next.take() {
            Some(conn) => conn,
            None => {
                tracing::warn!("ComfyUI not connected, entering reconnect loop");
                match reconnect_loop(client, backoff, cancel).await {
                    Some(conn) => conn,
                    None => return,
                }
            }
        };

        let _ = event_tx.send(ComfyUIEvent::Connected);
        let mut ws_stream = conn.ws_stream;
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = process_messages(&mut ws_stream, event_tx) => {}
        }
        let _ = event_tx.send(ComfyUIEvent::Disconnected);

        if cancel.is_cancelled() {
            return;
        }
        tracing::info!("ComfyUI connection lost");
    }
}
