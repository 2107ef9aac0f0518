//! Sample job orchestration.
//!
//! - [`service::JobService`]: the control plane (create, start, stop,
//!   resume, delete, show, list).
//! - [`runner::JobRunner`]: owns the single run slot and drives a job's
//!   items through the generation client one at a time.
//! - [`progress`]: derives checkpoint-level progress and the ETA from a
//!   job's items.
//! - [`publisher::ProgressPublisher`]: pushes progress snapshots onto the
//!   event bus.
//! - [`store::SampleJobStore`]: the persistence seam, with a PostgreSQL
//!   implementation.

pub mod progress;
pub mod publisher;
pub mod runner;
pub mod service;
pub mod store;
