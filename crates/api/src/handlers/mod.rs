pub mod sample_jobs;
pub mod training_runs;
