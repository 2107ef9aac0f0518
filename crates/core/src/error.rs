use std::fmt::Display;

/// Domain errors shared by every crate in the workspace.
///
/// Each variant corresponds to one stable, machine-readable error kind
/// reported to API callers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed or unresolvable input (`invalid_payload`).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown job, training run or preset (`not_found`).
    #[error("Entity not found: {entity} {key}")]
    NotFound { entity: &'static str, key: String },

    /// The requested transition is not permitted from the current status
    /// (`invalid_state`).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The generation engine could not be reached (`service_unavailable`).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Unexpected persistence or logic failure (`internal_error`).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a [`CoreError::NotFound`] for an entity identified by `key`.
    pub fn not_found(entity: &'static str, key: impl Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
