//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, plus the DTOs used to insert it.

pub mod sample_job;
pub mod sample_preset;
pub mod status;
