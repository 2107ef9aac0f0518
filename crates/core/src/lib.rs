//! Domain types and pure logic for checkpoint sample generation.
//!
//! Nothing in this crate performs network or database I/O. Filesystem
//! access is limited to checkpoint discovery and output-existence checks.

pub mod checkpoints;
pub mod error;
pub mod expansion;
pub mod job_events;
pub mod naming;
pub mod preset;
pub mod types;
