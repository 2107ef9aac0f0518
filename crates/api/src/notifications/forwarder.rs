use std::sync::Arc;

use axum::extract::ws::Message;
use sampler_core::job_events::{EVENT_SAMPLE_JOB_PROGRESS, MSG_TYPE_SAMPLE_JOB_PROGRESS};
use sampler_events::PlatformEvent;
use serde_json::json;
use tokio::sync::broadcast;

use crate::ws::WsManager;

/// Forwards `sample_job.progress` events to WebSocket clients as
/// `{"type": "sample_job_progress", "data": <snapshot>}`.
pub struct ProgressForwarder {
    ws_manager: Arc<WsManager>,
}

impl ProgressForwarder {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Run until the event bus is dropped.
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.forward(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Progress forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, progress forwarder shutting down");
                    break;
                }
            }
        }
    }

    /// Push one event; returns the number of clients reached.
    pub async fn forward(&self, event: &PlatformEvent) -> usize {
        let Some(frame) = progress_frame(event) else {
            return 0;
        };
        let reached = self
            .ws_manager
            .broadcast(Message::Text(frame.to_string().into()))
            .await;
        tracing::trace!(job_id = ?event.source_entity_id, reached, "Progress forwarded");
        reached
    }
}

/// The WebSocket frame for a progress event; `None` for other events.
pub fn progress_frame(event: &PlatformEvent) -> Option<serde_json::Value> {
    (event.event_type == EVENT_SAMPLE_JOB_PROGRESS).then(|| {
        json!({
            "type": MSG_TYPE_SAMPLE_JOB_PROGRESS,
            "data": event.payload,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_events_are_wrapped() {
        let event = PlatformEvent::new(EVENT_SAMPLE_JOB_PROGRESS)
            .with_source("sample_job", 7)
            .with_payload(json!({"job_id": 7, "status": "running"}));
        let frame = progress_frame(&event).unwrap();
        assert_eq!(frame["type"], "sample_job_progress");
        assert_eq!(frame["data"]["job_id"], 7);
    }

    #[test]
    fn other_events_are_ignored() {
        assert!(progress_frame(&PlatformEvent::new("fs_change")).is_none());
    }

    #[tokio::test]
    async fn forward_reaches_connected_clients() {
        let manager = Arc::new(WsManager::new());
        let mut rx = manager.add("c1".into()).await;
        let forwarder = ProgressForwarder::new(Arc::clone(&manager));

        let event = PlatformEvent::new(EVENT_SAMPLE_JOB_PROGRESS)
            .with_payload(json!({"job_id": 1}));
        assert_eq!(forwarder.forward(&event).await, 1);

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(frame["data"]["job_id"], 1);
    }
}
