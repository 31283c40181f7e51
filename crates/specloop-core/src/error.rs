//! Error taxonomy for the refinement engine.

use specloop_state::StorageError;

use crate::config::ConfigError;

/// Errors returned to callers of the coordinator and loop.
///
/// Failures inside a single round (generation, scoring) never surface here;
/// they are absorbed into degraded results. What does surface is whatever
/// stops a request before or outside a round.
#[derive(Debug, thiserror::Error)]
pub enum SpecloopError {
    #[error("specification not found: {spec_id}")]
    NotFound { spec_id: String },

    #[error("object {object_id} not found in {spec_id}")]
    ObjectNotFound { spec_id: String, object_id: String },

    #[error("object {object_id} is not editable")]
    NotEditable { object_id: String },

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("instruction must not be empty")]
    EmptyInstruction,

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task failed: {0}")]
    Task(String),
}

impl From<StorageError> for SpecloopError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { spec_id } => SpecloopError::NotFound { spec_id },
            other => SpecloopError::Storage(other),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SpecloopError>;
