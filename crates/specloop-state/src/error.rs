//! Error types for specloop-state

use thiserror::Error;

/// Errors surfaced by [`crate::SpecStore`] implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No specification stored under this id
    #[error("specification not found: {spec_id}")]
    NotFound { spec_id: String },

    /// Iteration records are write-once
    #[error("iteration already recorded: {iter_id}")]
    DuplicateIteration { iter_id: String },

    /// Spec ids must be safe to use as file names and record keys
    #[error("invalid spec id: {spec_id:?}")]
    InvalidSpecId { spec_id: String },

    /// Stored digest is not 64 lowercase hex chars
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Could not reach the backing database
    #[error("connection failed: {0}")]
    Connection(String),

    /// Backend query or write failed
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the error means "absent" rather than "broken".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
