//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod sample_job_item_repo;
pub mod sample_job_repo;
pub mod sample_preset_repo;

pub use sample_job_item_repo::SampleJobItemRepo;
pub use sample_job_repo::SampleJobRepo;
pub use sample_preset_repo::SamplePresetRepo;
