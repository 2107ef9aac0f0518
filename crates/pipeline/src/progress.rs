//! Progress aggregation.
//!
//! Progress is never stored: it is recomputed from a job's items on every
//! read and after every transition. The result depends only on the items,
//! so reading twice without an intervening transition yields identical
//! progress.

use chrono::TimeDelta;
use sampler_core::types::{DbId, Timestamp};
use sampler_db::models::sample_job::{SampleJob, SampleJobItem};
use sampler_db::models::status::{SampleJobItemStatus, SampleJobStatus};
use serde::Serialize;

/// Checkpoint-level view of a job's items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    /// Checkpoints whose items are all terminal.
    pub checkpoints_completed: usize,
    pub total_checkpoints: usize,
    /// Checkpoint of the first non-terminal item in execution order.
    pub current_checkpoint: Option<String>,
    /// Terminal items of the current checkpoint.
    pub current_checkpoint_progress: usize,
    /// All items of the current checkpoint.
    pub current_checkpoint_total: usize,
    pub failed_items: usize,
    /// Omitted until at least one item has completed with timings.
    pub estimated_completion_time: Option<Timestamp>,
}

/// A job's counters plus its progress; the payload of progress events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: DbId,
    pub status: SampleJobStatus,
    pub total_items: i32,
    pub completed_items: i32,
    #[serde(flatten)]
    pub progress: JobProgress,
}

impl ProgressSnapshot {
    pub fn new(job: &SampleJob, items: &[SampleJobItem]) -> Self {
        Self {
            job_id: job.id,
            status: job.status(),
            total_items: job.total_items,
            completed_items: job.completed_items,
            progress: aggregate(items),
        }
    }
}

/// Aggregate items (in any order) into [`JobProgress`].
pub fn aggregate(items: &[SampleJobItem]) -> JobProgress {
    let mut ordered: Vec<&SampleJobItem> = items.iter().collect();
    ordered.sort_by_key(|item| item.sort_order);

    // Checkpoints in order of first appearance with (terminal, total) counts.
    let mut checkpoints: Vec<(&str, usize, usize)> = Vec::new();
    for item in &ordered {
        let terminal = item.status().is_terminal() as usize;
        match checkpoints
            .iter_mut()
            .find(|(name, _, _)| *name == item.checkpoint_filename)
        {
            Some(entry) => {
                entry.1 += terminal;
                entry.2 += 1;
            }
            None => checkpoints.push((item.checkpoint_filename.as_str(), terminal, 1)),
        }
    }

    let current = ordered
        .iter()
        .find(|item| !item.status().is_terminal())
        .map(|item| item.checkpoint_filename.as_str());
    let (current_checkpoint_progress, current_checkpoint_total) = current
        .and_then(|name| checkpoints.iter().find(|(n, _, _)| *n == name))
        .map(|(_, done, total)| (*done, *total))
        .unwrap_or((0, 0));

    JobProgress {
        checkpoints_completed: checkpoints
            .iter()
            .filter(|(_, done, total)| done == total)
            .count(),
        total_checkpoints: checkpoints.len(),
        current_checkpoint: current.map(str::to_string),
        current_checkpoint_progress,
        current_checkpoint_total,
        failed_items: ordered
            .iter()
            .filter(|item| item.status() == SampleJobItemStatus::Failed)
            .count(),
        estimated_completion_time: estimate_completion(&ordered),
    }
}

/// `anchor + remaining * mean_duration`, where the anchor is the latest
/// item transition and the mean is over completed items with both
/// timestamps. Skipped items carry no generation time and are excluded.
fn estimate_completion(items: &[&SampleJobItem]) -> Option<Timestamp> {
    let remaining = items.iter().filter(|i| !i.status().is_terminal()).count();
    if remaining == 0 {
        return None;
    }

    let durations: Vec<TimeDelta> = items
        .iter()
        .filter(|i| i.status() == SampleJobItemStatus::Completed)
        .filter_map(|i| Some(i.completed_at? - i.started_at?))
        .filter(|d| *d >= TimeDelta::zero())
        .collect();
    if durations.is_empty() {
        return None;
    }

    let total_ms: i64 = durations.iter().map(TimeDelta::num_milliseconds).sum();
    let mean_ms = total_ms / durations.len() as i64;

    let anchor = items
        .iter()
        .flat_map(|i| [i.started_at, i.completed_at])
        .flatten()
        .max()?;

    let remaining_ms = mean_ms.checked_mul(i64::try_from(remaining).ok()?)?;
    anchor.checked_add_signed(TimeDelta::try_milliseconds(remaining_ms)?)
}
