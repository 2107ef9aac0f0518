//! Events emitted by the ComfyUI connection task.
//!
//! These are the interpreted form of raw WebSocket messages: connection
//! state changes plus the per-prompt outcomes a waiter cares about.

use serde::Serialize;

/// A state change observed on the ComfyUI WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComfyUIEvent {
    /// The WebSocket connection was established.
    Connected,

    /// The WebSocket connection was lost.
    Disconnected,

    /// A prompt made progress (step `value` of `max`).
    Progress {
        prompt_id: String,
        value: i32,
        max: i32,
    },

    /// Every node of a prompt has run. Outputs are read from the history.
    Completed { prompt_id: String },

    /// A prompt failed inside the engine.
    Failed { prompt_id: String, error: String },

    /// A prompt was interrupted.
    Interrupted { prompt_id: String },
}

impl ComfyUIEvent {
    /// Prompt the event refers to; `None` for connection events.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Connected | Self::Disconnected => None,
            Self::Progress { prompt_id, .. }
            | Self::Completed { prompt_id }
            | Self::Failed { prompt_id, .. }
            | Self::Interrupted { prompt_id } => Some(prompt_id),
        }
    }
}
