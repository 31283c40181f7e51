//! Storage contract for specifications and their iteration history.
//!
//! The refinement core depends only on [`SpecStore`], never on a backend's
//! native types. In-memory fakes live in [`crate::fakes`].

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{IterationId, IterationRecord, SpecId, Specification};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable keyed storage for specs and their audit trail.
///
/// Guarantees:
/// - `get_spec` returns `StorageError::NotFound` for unknown ids.
/// - `put_spec` replaces the stored document for that id.
/// - `save_iteration` is atomic per record: either the whole record is
///   stored or nothing is. Records are write-once; saving the same
///   `iter_id` twice fails with `StorageError::DuplicateIteration`.
/// - `get_iterations` returns records ordered by timestamp ascending (ties
///   keep insertion order). Unknown spec ids yield an empty history, since
///   a failed first generation may leave records without a stored spec.
#[async_trait]
pub trait SpecStore: Send + Sync {
    /// Load the current document for `spec_id`.
    async fn get_spec(&self, spec_id: &SpecId) -> StorageResult<Specification>;

    /// Store (or replace) the document for `spec_id`.
    async fn put_spec(&self, spec_id: &SpecId, spec: &Specification) -> StorageResult<()>;

    /// Append one immutable iteration record, returning its id.
    async fn save_iteration(&self, record: &IterationRecord) -> StorageResult<IterationId>;

    /// Full history for `spec_id`, oldest first.
    async fn get_iterations(&self, spec_id: &SpecId) -> StorageResult<Vec<IterationRecord>>;
}

pub(crate) fn ensure_valid(spec_id: &SpecId) -> StorageResult<()> {
    if spec_id.is_valid() {
        Ok(())
    } else {
        Err(StorageError::InvalidSpecId {
            spec_id: spec_id.0.clone(),
        })
    }
}
