//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum.

use serde::Deserialize;

/// The ComfyUI WebSocket message kinds the sampler reacts to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth).
    #[serde(rename = "status")]
    Status(StatusData),

    #[serde(rename = "execution_start")]
    ExecutionStart(PromptData),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A specific node is executing, or the prompt finished when `node` is
    /// `None`.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step progress from a long-running node (e.g. KSampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Sent by newer ComfyUI versions once every node has run.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptData),

    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    /// Execution was stopped through `POST /interrupt`.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptData),
}

impl ComfyUIMessage {
    /// The prompt this message belongs to, if it is prompt-scoped.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Status(_) => None,
            Self::Progress(data) => data.prompt_id.as_deref(),
            Self::ExecutionStart(data)
            | Self::ExecutionSuccess(data)
            | Self::ExecutionInterrupted(data) => Some(&data.prompt_id),
            Self::ExecutionCached(data) => Some(&data.prompt_id),
            Self::Executing(data) => Some(&data.prompt_id),
            Self::Executed(data) => Some(&data.prompt_id),
            Self::ExecutionError(data) => Some(&data.prompt_id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload carrying only the prompt id.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    /// Older ComfyUI versions omit the prompt id.
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub output: serde_json::Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    pub exception_type: String,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or `type` values outside
/// [`ComfyUIMessage`]; ComfyUI extensions add their own message kinds, so
/// callers should skip these.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}},"sid":"abc"}}"#;
        assert_matches!(
            parse_message(json).unwrap(),
            ComfyUIMessage::Status(data) if data.status.exec_info.queue_remaining == 3
        );
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg.prompt_id(), Some("xyz"));
        assert_matches!(msg, ComfyUIMessage::Executing(data) if data.node.is_none());
    }

    #[test]
    fn parse_progress_with_and_without_prompt_id() {
        let with = parse_message(
            r#"{"type":"progress","data":{"value":5,"max":20,"prompt_id":"p1","node":"3"}}"#,
        )
        .unwrap();
        assert_eq!(with.prompt_id(), Some("p1"));

        let without = parse_message(r#"{"type":"progress","data":{"value":5,"max":20}}"#).unwrap();
        assert_eq!(without.prompt_id(), None);
        assert_matches!(without, ComfyUIMessage::Progress(data) if data.value == 5 && data.max == 20);
    }

    #[test]
    fn parse_execution_success_and_interrupted() {
        let success =
            parse_message(r#"{"type":"execution_success","data":{"prompt_id":"p","timestamp":1}}"#)
                .unwrap();
        assert_matches!(success, ComfyUIMessage::ExecutionSuccess(data) if data.prompt_id == "p");

        let interrupted = parse_message(
            r#"{"type":"execution_interrupted","data":{"prompt_id":"p","node_id":"3","node_type":"KSampler","executed":[]}}"#,
        )
        .unwrap();
        assert_matches!(interrupted, ComfyUIMessage::ExecutionInterrupted(_));
    }

    #[test]
    fn parse_execution_error_ignores_extra_fields() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","node_type":"KSampler","exception_message":"out of memory","exception_type":"torch.cuda.OutOfMemoryError","traceback":[]}}"#;
        assert_matches!(
            parse_message(json).unwrap(),
            ComfyUIMessage::ExecutionError(data)
                if data.node_id == "5" && data.exception_message == "out of memory"
        );
    }

    #[test]
    fn parse_executed_message() {
        let json = r#"{"type":"executed","data":{"node":"9","output":{"images":[{"filename":"out.png"}]},"prompt_id":"abc"}}"#;
        assert_matches!(
            parse_message(json).unwrap(),
            ComfyUIMessage::Executed(data) if data.node == "9" && data.output.is_object()
        );
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        assert!(parse_message(r#"{"type":"crystools.monitor","data":{}}"#).is_err());
        assert!(parse_message("not json at all").is_err());
    }
}
