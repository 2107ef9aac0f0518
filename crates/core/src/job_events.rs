//! Event type constants for sample job notifications.
//!
//! `EVENT_*` names travel on the in-process event bus. `MSG_TYPE_*` values
//! tag the JSON frames pushed to WebSocket clients, which share the channel
//! with filesystem-change notifications (tagged `fs_change` by the watcher).

/// Event bus name for a sample job progress snapshot.
pub const EVENT_SAMPLE_JOB_PROGRESS: &str = "sample_job.progress";

/// Source entity type attached to sample job events.
pub const ENTITY_SAMPLE_JOB: &str = "sample_job";

/// WebSocket message type for sample job progress snapshots.
pub const MSG_TYPE_SAMPLE_JOB_PROGRESS: &str = "sample_job_progress";
