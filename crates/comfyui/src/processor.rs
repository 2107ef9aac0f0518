//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them into
//! typed [`ComfyUIMessage`] variants and broadcasts the interpreted
//! [`ComfyUIEvent`]s.

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use crate::client::ComfyUIStream;
use crate::events::ComfyUIEvent;
use crate::messages::{parse_message, ComfyUIMessage};

/// Process WebSocket messages until the connection closes or fails.
///
/// Binary frames (preview images) are ignored.
pub async fn process_messages(
    ws_stream: &mut ComfyUIStream,
    event_tx: &broadcast::Sender<ComfyUIEvent>,
) {
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => handle_text_message(&text, event_tx),
            Ok(Message::Binary(_)) => {
                tracing::trace!("Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "ComfyUI WebSocket closed");
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

fn handle_text_message(text: &str, event_tx: &broadcast::Sender<ComfyUIEvent>) {
    match parse_message(text) {
        Ok(msg) => {
            if let Some(event) = interpret(msg) {
                // Nobody waiting is fine; the history poll covers it.
                let _ = event_tx.send(event);
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, raw_message = %text, "Skipping ComfyUI message");
        }
    }
}

/// Map a parsed message to the event it implies, logging along the way.
pub fn interpret(msg: ComfyUIMessage) -> Option<ComfyUIEvent> {
    match msg {
        ComfyUIMessage::Progress(data) => {
            tracing::debug!(value = data.value, max = data.max, "Generation progress");
            data.prompt_id.map(|prompt_id| ComfyUIEvent::Progress {
                prompt_id,
                value: data.value,
                max: data.max,
            })
        }
        ComfyUIMessage::ExecutionStart(data) => {
            tracing::info!(prompt_id = %data.prompt_id, "Execution started");
            None
        }
        ComfyUIMessage::Executing(data) => match data.node {
            Some(node) => {
                tracing::debug!(prompt_id = %data.prompt_id, node = %node, "Executing node");
                None
            }
            None => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution completed (all nodes done)");
                Some(ComfyUIEvent::Completed {
                    prompt_id: data.prompt_id,
                })
            }
        },
        ComfyUIMessage::ExecutionSuccess(data) => Some(ComfyUIEvent::Completed {
            prompt_id: data.prompt_id,
        }),
        ComfyUIMessage::Executed(data) => {
            tracing::debug!(
                prompt_id = %data.prompt_id,
                node = %data.node,
                "Node executed with output"
            );
            None
        }
        ComfyUIMessage::ExecutionError(data) => {
            tracing::error!(
                prompt_id = %data.prompt_id,
                node_id = %data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error",
            );
            Some(ComfyUIEvent::Failed {
                prompt_id: data.prompt_id,
                error: data.exception_message,
            })
        }
        ComfyUIMessage::ExecutionInterrupted(data) => {
            tracing::warn!(prompt_id = %data.prompt_id, "Execution interrupted");
            Some(ComfyUIEvent::Interrupted {
                prompt_id: data.prompt_id,
            })
        }
        ComfyUIMessage::ExecutionCached(data) => {
            tracing::debug!(
                prompt_id = %data.prompt_id,
                cached = data.nodes.len(),
                "Execution used cache"
            );
            None
        }
        ComfyUIMessage::Status(data) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
            None
        }
    }
}
