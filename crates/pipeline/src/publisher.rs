//! Progress event publisher.
//!
//! Publishes a [`ProgressSnapshot`] as a `sample_job.progress` event after
//! every job or item transition. Delivery is best-effort: persisted state
//! stays the source of truth and clients can always re-fetch it.

use std::sync::Arc;

use sampler_core::job_events::{ENTITY_SAMPLE_JOB, EVENT_SAMPLE_JOB_PROGRESS};
use sampler_core::types::DbId;
use sampler_events::{EventBus, PlatformEvent};

use crate::progress::ProgressSnapshot;
use crate::store::{SampleJobStore, StoreResult};

/// Emits progress snapshots onto the [`EventBus`].
#[derive(Clone)]
pub struct ProgressPublisher {
    bus: Arc<EventBus>,
}

impl ProgressPublisher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Publish an already computed snapshot.
    pub fn publish(&self, snapshot: &ProgressSnapshot) {
        let payload = match serde_json::to_value(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    job_id = snapshot.job_id,
                    error = %e,
                    "Failed to serialize progress"
                );
                return;
            }
        };
        let event = PlatformEvent::new(EVENT_SAMPLE_JOB_PROGRESS)
            .with_source(ENTITY_SAMPLE_JOB, snapshot.job_id)
            .with_payload(payload);
        let receivers = self.bus.publish(event);
        tracing::trace!(job_id = snapshot.job_id, receivers, "Progress published");
    }

    /// Load a job and its items, then publish their snapshot.
    ///
    /// Returns `None` if the job no longer exists.
    pub async fn publish_job(
        &self,
        store: &dyn SampleJobStore,
        job_id: DbId,
    ) -> StoreResult<Option<ProgressSnapshot>> {
        let Some(job) = store.find_job(job_id).await? else {
            return Ok(None);
        };
        let items = store.list_items(job_id).await?;
        let snapshot = ProgressSnapshot::new(&job, &items);
        self.publish(&snapshot);
        Ok(Some(snapshot))
    }
}
